use std::fs;
use std::path::{Path, PathBuf};

use potts_core::errors::ErrorInfo;
use potts_core::{Alphabet, PottsError};
use serde::{Deserialize, Serialize};

use crate::partition;
use crate::tempering;

/// YAML-configurable parameters governing an inference run.
///
/// Required fields carry no serde default; [`InferenceConfig::from_yaml_str`]
/// validates the whole structure before any sampling starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Walker layout across compute workers.
    pub workers: WorkerConfig,
    /// Newton solver settings.
    pub newton: NewtonConfig,
    /// Equilibration and sampling schedule.
    pub sampling: SamplingConfig,
    /// Model inputs (target marginals, couplings, sequences).
    pub model: ModelConfig,
    /// Master seed and substream policy.
    #[serde(default)]
    pub seed_policy: SeedPolicy,
    /// Output directory configuration.
    #[serde(default)]
    pub output: OutputConfig,
}

/// Walker and worker layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Total number of MC walkers.
    pub walkers: usize,
    /// Number of compute workers sharing the walkers.
    #[serde(default = "default_worker_count")]
    pub count: usize,
    /// MC steps per walker per kernel call.
    #[serde(default = "default_steps_per_call")]
    pub steps_per_call: usize,
    /// Each worker's walker count must be a multiple of this.
    #[serde(default = "default_workgroup_size")]
    pub workgroup_size: usize,
}

fn default_worker_count() -> usize {
    1
}

fn default_steps_per_call() -> usize {
    2048
}

fn default_workgroup_size() -> usize {
    256
}

/// Quasi-Newton update settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewtonConfig {
    /// Number of Newton-MCMC rounds.
    pub rounds: usize,
    /// Newton update steps per round.
    #[serde(default = "default_newton_steps")]
    pub steps: usize,
    /// Initial step size.
    pub gamma: f64,
    /// Pseudocount damping of the coupling update.
    #[serde(default = "default_damping")]
    pub damping: f64,
    /// Effective alignment size used for anti-overfitting noise; disabled when absent.
    #[serde(default)]
    pub noise_samples: Option<u64>,
    /// Optional weighted L1 regularization of the update.
    #[serde(default)]
    pub regularization: Option<RegularizationConfig>,
    /// Run Newton steps against a preloaded sample before the first round.
    #[serde(default)]
    pub preopt: bool,
    /// Reset every walker to the start sequence at the beginning of each round.
    #[serde(default = "default_reset_seqs")]
    pub reset_seqs: bool,
    /// What to do with a trial whose SSR increased.
    #[serde(default)]
    pub acceptance: AcceptancePolicy,
}

fn default_newton_steps() -> usize {
    128
}

fn default_damping() -> f64 {
    0.001
}

fn default_reset_seqs() -> bool {
    true
}

/// Regularization matrix and strength.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegularizationConfig {
    /// JSON pair table with the couplings' shape.
    pub matrix: PathBuf,
    /// Overall strength multiplying the matrix.
    #[serde(default = "default_reg_lambda")]
    pub lambda: f64,
}

fn default_reg_lambda() -> f64 {
    1.0
}

/// Acceptance rule applied after each trial step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AcceptancePolicy {
    /// Every trial is accepted.
    #[default]
    Always,
    /// Trials that raise the SSR are discarded and `gamma` is halved.
    ShrinkOnIncrease,
}

/// Equilibration and sampling schedule, in kernel calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Kernel calls before the first sample.
    pub equil_time: usize,
    /// Kernel calls between samples.
    pub sample_time: usize,
    /// Number of snapshots of every walker.
    pub samples: usize,
    /// Persist live marginals every this many equilibration calls (0 disables).
    #[serde(default)]
    pub track_equil: usize,
    /// Kernel calls with fixed couplings before round 0.
    #[serde(default)]
    pub preequil_time: usize,
    /// Optional parallel tempering.
    #[serde(default)]
    pub tempering: Option<TemperingConfig>,
}

/// Parallel tempering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemperingConfig {
    /// Inverse temperature ladder.
    pub ladder: LadderPolicy,
    /// Exchange attempts after every iteration block.
    #[serde(default = "default_swaps")]
    pub swaps: usize,
}

fn default_swaps() -> usize {
    10000
}

/// Supported ladder construction strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LadderPolicy {
    /// Explicit inverse temperatures; the first entry is the reference `beta0`.
    Manual {
        /// Ordered inverse temperatures.
        betas: Vec<f32>,
    },
    /// `levels` inverse temperatures `beta0 * ratio^-k`.
    Geometric {
        /// Number of levels.
        levels: usize,
        /// Reference inverse temperature.
        #[serde(default = "default_beta0")]
        beta0: f32,
        /// Spacing ratio between adjacent levels.
        #[serde(default = "default_ratio")]
        ratio: f32,
    },
}

fn default_beta0() -> f32 {
    1.0
}

fn default_ratio() -> f32 {
    1.25
}

/// Model inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Alphabet, one letter per residue state.
    pub alphabet: Alphabet,
    /// Target bivariate marginals (JSON pair table).
    pub target: PathBuf,
    /// Explicit sequence length, checked against every other source.
    #[serde(default)]
    pub length: Option<usize>,
    /// Initial couplings.
    #[serde(default)]
    pub couplings: Option<CouplingSource>,
    /// Directory of a previous round providing couplings, start sequence and sequences.
    #[serde(default)]
    pub seqmodel: Option<PathBuf>,
    /// Start sequence for the walkers.
    #[serde(default)]
    pub start_seq: Option<StartSeq>,
    /// Sequences preloaded into worker buffers.
    #[serde(default)]
    pub seqs: Option<SeqSource>,
}

/// Origin of the initial couplings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CouplingSource {
    /// All couplings zero.
    Zero,
    /// Independent-site log scores of the target.
    LogScore,
    /// JSON pair table on disk.
    File(PathBuf),
}

impl From<String> for CouplingSource {
    fn from(value: String) -> Self {
        match value.as_str() {
            "zero" => CouplingSource::Zero,
            "logscore" => CouplingSource::LogScore,
            _ => CouplingSource::File(PathBuf::from(value)),
        }
    }
}

impl From<CouplingSource> for String {
    fn from(value: CouplingSource) -> Self {
        match value {
            CouplingSource::Zero => "zero".into(),
            CouplingSource::LogScore => "logscore".into(),
            CouplingSource::File(path) => path.display().to_string(),
        }
    }
}

/// Origin of preloaded sequences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SeqSource {
    /// Uniformly random sequences.
    Zero,
    /// Sequences drawn from the target's site-independent model.
    LogScore,
    /// Text file with one sequence per line.
    File(PathBuf),
}

impl From<String> for SeqSource {
    fn from(value: String) -> Self {
        match value.as_str() {
            "zero" => SeqSource::Zero,
            "logscore" => SeqSource::LogScore,
            _ => SeqSource::File(PathBuf::from(value)),
        }
    }
}

impl From<SeqSource> for String {
    fn from(value: SeqSource) -> Self {
        match value {
            SeqSource::Zero => "zero".into(),
            SeqSource::LogScore => "logscore".into(),
            SeqSource::File(path) => path.display().to_string(),
        }
    }
}

/// Where the first walker sequence comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StartSeq {
    /// Uniformly random sequence.
    Random,
    /// Literal sequence written in the alphabet.
    Literal(String),
}

impl From<String> for StartSeq {
    fn from(value: String) -> Self {
        if value == "rand" {
            StartSeq::Random
        } else {
            StartSeq::Literal(value)
        }
    }
}

impl From<StartSeq> for String {
    fn from(value: StartSeq) -> Self {
        match value {
            StartSeq::Random => "rand".into(),
            StartSeq::Literal(text) => text,
        }
    }
}

/// Deterministic seeding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedPolicy {
    /// Master seed used for the run.
    #[serde(default = "default_master_seed")]
    pub master_seed: u64,
    /// Optional label recorded in the manifest.
    #[serde(default)]
    pub label: Option<String>,
}

fn default_master_seed() -> u64 {
    0x05EE_D5EE_DD15_5EED_u64
}

impl Default for SeedPolicy {
    fn default() -> Self {
        Self {
            master_seed: default_master_seed(),
            label: None,
        }
    }
}

/// Output directory layout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Root directory for run artefacts. Nothing is persisted when absent.
    #[serde(default)]
    pub run_directory: Option<PathBuf>,
    /// Per-round metrics filename relative to `run_directory`.
    #[serde(default = "default_metrics_filename")]
    pub metrics_file: PathBuf,
    /// Manifest filename relative to `run_directory`.
    #[serde(default = "default_manifest_filename")]
    pub manifest_file: PathBuf,
}

fn default_metrics_filename() -> PathBuf {
    PathBuf::from("rounds.csv")
}

fn default_manifest_filename() -> PathBuf {
    PathBuf::from("manifest.json")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            run_directory: None,
            metrics_file: default_metrics_filename(),
            manifest_file: default_manifest_filename(),
        }
    }
}

pub(crate) fn live_seqs_missing() -> PottsError {
    PottsError::Config(
        ErrorInfo::new(
            "live-seqs-missing",
            "walkers keep their sequences between rounds but no sequences were preloaded",
        )
        .with_hint("set model.seqs or model.seqmodel, or enable newton.reset_seqs"),
    )
}

impl InferenceConfig {
    /// Parses and validates a YAML document.
    pub fn from_yaml_str(text: &str) -> Result<Self, PottsError> {
        let config: InferenceConfig = serde_yaml::from_str(text).map_err(|err| {
            PottsError::Config(ErrorInfo::new("config-parse", err.to_string()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a YAML file.
    pub fn load(path: &Path) -> Result<Self, PottsError> {
        let text = fs::read_to_string(path).map_err(|err| PottsError::io("config-read", err, path))?;
        Self::from_yaml_str(&text).map_err(|err| match err {
            PottsError::Config(info) => {
                PottsError::Config(info.with_context("path", path.display()))
            }
            other => other,
        })
    }

    /// Checks every cross-field constraint.
    pub fn validate(&self) -> Result<(), PottsError> {
        let w = &self.workers;
        partition::divide_walkers(w.walkers, w.count, w.workgroup_size)?;
        if w.steps_per_call == 0 {
            return Err(PottsError::config(
                "steps-per-call",
                "steps_per_call must be at least 1",
            ));
        }

        let n = &self.newton;
        if !(n.gamma.is_finite() && n.gamma > 0.0) {
            return Err(PottsError::Config(
                ErrorInfo::new("gamma", "gamma must be a positive number")
                    .with_context("gamma", n.gamma),
            ));
        }
        if !(n.damping.is_finite() && n.damping >= 0.0) {
            return Err(PottsError::Config(
                ErrorInfo::new("damping", "damping must be non-negative")
                    .with_context("damping", n.damping),
            ));
        }
        if n.noise_samples == Some(0) {
            return Err(PottsError::config(
                "noise-samples",
                "noise_samples must be at least 1 when set",
            ));
        }

        let s = &self.sampling;
        if s.samples == 0 {
            return Err(PottsError::config("samples", "samples must be at least 1"));
        }
        if s.track_equil != 0 && s.equil_time % s.track_equil != 0 {
            return Err(PottsError::Config(
                ErrorInfo::new("track-equil", "track_equil must be a divisor of equil_time")
                    .with_context("track_equil", s.track_equil)
                    .with_context("equil_time", s.equil_time),
            ));
        }
        if let Some(t) = &s.tempering {
            let ladder = tempering::build_ladder(&t.ladder)?;
            tempering::check_divides(ladder.len(), w.walkers)?;
        }

        if !n.reset_seqs && self.model.seqs.is_none() && self.model.seqmodel.is_none() {
            return Err(live_seqs_missing());
        }

        if let Some(length) = self.model.length {
            if length < 2 {
                return Err(PottsError::config("length", "sequence length must be at least 2"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
workers:
  walkers: 512
  count: 2
newton:
  rounds: 4
  gamma: 0.0004
sampling:
  equil_time: 16
  sample_time: 4
  samples: 8
model:
  alphabet: "ACGT"
  target: bimarg.json
  couplings: zero
  start_seq: rand
"#;

    #[test]
    fn minimal_document_gets_defaults() {
        let config = InferenceConfig::from_yaml_str(MINIMAL).unwrap();
        assert_eq!(config.workers.workgroup_size, 256);
        assert_eq!(config.workers.steps_per_call, 2048);
        assert_eq!(config.newton.steps, 128);
        assert!((config.newton.damping - 0.001).abs() < 1e-12);
        assert!(config.newton.reset_seqs);
        assert_eq!(config.newton.acceptance, AcceptancePolicy::Always);
        assert_eq!(config.model.couplings, Some(CouplingSource::Zero));
        assert_eq!(config.model.start_seq, Some(StartSeq::Random));
        assert_eq!(config.model.alphabet.len(), 4);
    }

    #[test]
    fn missing_required_field_is_config_error() {
        let text = MINIMAL.replace("  gamma: 0.0004\n", "");
        let err = InferenceConfig::from_yaml_str(&text).unwrap_err();
        assert_eq!(err.info().code, "config-parse");
    }

    #[test]
    fn track_equil_must_divide_equil_time() {
        let text = MINIMAL.replace("  samples: 8\n", "  samples: 8\n  track_equil: 5\n");
        let err = InferenceConfig::from_yaml_str(&text).unwrap_err();
        assert_eq!(err.info().code, "track-equil");
    }

    #[test]
    fn tempering_levels_must_divide_walkers() {
        let text = MINIMAL.replace(
            "  samples: 8\n",
            "  samples: 8\n  tempering:\n    ladder:\n      type: manual\n      betas: [1.0, 0.8, 0.5]\n",
        );
        let err = InferenceConfig::from_yaml_str(&text).unwrap_err();
        assert_eq!(err.info().code, "tempering-divisibility");
    }

    #[test]
    fn bad_partition_is_rejected_before_sampling() {
        let text = MINIMAL.replace("walkers: 512", "walkers: 500");
        let err = InferenceConfig::from_yaml_str(&text).unwrap_err();
        assert_eq!(err.info().code, "walker-partition");
    }

    #[test]
    fn kept_walkers_need_preloaded_sequences() {
        let text = MINIMAL.replace("  gamma: 0.0004\n", "  gamma: 0.0004\n  reset_seqs: false\n");
        let err = InferenceConfig::from_yaml_str(&text).unwrap_err();
        assert_eq!(err.info().code, "live-seqs-missing");
        let text = text.replace("  start_seq: rand\n", "  start_seq: rand\n  seqs: logscore\n");
        assert!(InferenceConfig::from_yaml_str(&text).is_ok());
    }

    #[test]
    fn acceptance_policy_parses_kebab_case() {
        let text = MINIMAL.replace(
            "  gamma: 0.0004\n",
            "  gamma: 0.0004\n  acceptance: shrink-on-increase\n",
        );
        let config = InferenceConfig::from_yaml_str(&text).unwrap();
        assert_eq!(config.newton.acceptance, AcceptancePolicy::ShrinkOnIncrease);
    }
}
