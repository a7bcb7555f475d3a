use std::path::{Path, PathBuf};

use potts_core::errors::ErrorInfo;
use potts_core::{fieldless_gauge_even, Couplings, PottsError, RngHandle, SeqBatch};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, instrument, warn};

use crate::aggregate::{mean_bimarg, sum_counts, Discrepancy};
use crate::artifacts::{self, round_name, seqs_file, status_report, write_counts, write_pairs, RoundDir};
use crate::cluster::ComputeCluster;
use crate::config::{live_seqs_missing, InferenceConfig, NewtonConfig};
use crate::determinism::{noise_rng, preopt_noise_rng, round_rng, tempering_rng};
use crate::driver::{McmcDriver, McmcSample, Schedule};
use crate::inputs::ModelInputs;
use crate::manifest::{MetricsRecorder, RoundRecord, RunManifest};
use crate::newton::{NewtonSettings, NewtonSolver, NewtonState};
use crate::tempering::Tempering;
use crate::worker::{Buffer, BufferData, ComputeWorker, SeqBuf, Slot};

/// Per-round result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    /// Round index.
    pub round: usize,
    /// Discrepancy of the round's sample against the target.
    pub discrepancy: Discrepancy,
    /// Final Newton state.
    pub newton: NewtonState,
    /// True when the Newton solver stopped on its step-size floor.
    pub stopped_early: bool,
}

/// Result of a full inference run.
#[derive(Debug, Clone)]
pub struct InferenceOutcome {
    /// Couplings after the last round.
    pub couplings: Couplings,
    /// Start sequence chosen for the next round.
    pub startseq: Vec<u8>,
    /// One summary per completed round.
    pub rounds: Vec<RoundSummary>,
}

/// Sequences through rounds of sampling and Newton updates.
pub struct Inference<W> {
    config: InferenceConfig,
    inputs: ModelInputs,
    cluster: ComputeCluster<W>,
    tempering: Option<Tempering>,
    couplings: Couplings,
    out: Option<PathBuf>,
}

impl<W: ComputeWorker> Inference<W> {
    /// Prepares a run: assigns temperatures and loads preloaded sequences.
    pub fn new(
        config: InferenceConfig,
        inputs: ModelInputs,
        mut cluster: ComputeCluster<W>,
    ) -> Result<Self, PottsError> {
        config.validate()?;
        let tempering = match &config.sampling.tempering {
            Some(t) => {
                let mut pt = Tempering::new(t, tempering_rng(config.seed_policy.master_seed))?;
                pt.install(&mut cluster)?;
                info!(
                    levels = pt.ladder().len(),
                    swaps = t.swaps,
                    "parallel tempering enabled"
                );
                Some(pt)
            }
            None => None,
        };
        match &inputs.seqs {
            Some(seqs) => {
                let beta0 = tempering.as_ref().map(Tempering::beta0);
                load_preloaded(&mut cluster, seqs, beta0)?;
            }
            None if !config.newton.reset_seqs => return Err(live_seqs_missing()),
            None => {}
        }
        let couplings = inputs.couplings.clone();
        let out = config.output.run_directory.clone();
        Ok(Self {
            config,
            inputs,
            cluster,
            tempering,
            couplings,
            out,
        })
    }

    /// Overrides the output directory.
    pub fn with_output(mut self, dir: Option<PathBuf>) -> Self {
        self.out = dir;
        self
    }

    /// Current couplings.
    pub fn couplings(&self) -> &Couplings {
        &self.couplings
    }

    /// The compute cluster.
    pub fn cluster_mut(&mut self) -> &mut ComputeCluster<W> {
        &mut self.cluster
    }

    fn startseq(&self) -> Result<Vec<u8>, PottsError> {
        self.inputs.startseq.clone().ok_or_else(|| {
            PottsError::Config(
                ErrorInfo::new("startseq-missing", "a start sequence is required")
                    .with_hint("set model.start_seq or model.seqmodel"),
            )
        })
    }

    fn schedule(&self) -> Schedule {
        Schedule::from_config(&self.config.sampling)
    }

    /// Full Newton-MCMC inference.
    #[instrument(level = "info", skip_all, fields(rounds = self.config.newton.rounds))]
    pub fn run(&mut self) -> Result<InferenceOutcome, PottsError> {
        let mut startseq = self.startseq()?;
        let out = self.out.clone();
        let mut manifest = RunManifest::new(&self.config, self.inputs.length);
        let mut metrics = match &out {
            Some(root) => {
                let path = root.join(&self.config.output.manifest_file);
                manifest.write(&path)?;
                Some(MetricsRecorder::create(&root.join(&self.config.output.metrics_file))?)
            }
            None => None,
        };

        if self.config.newton.preopt {
            if self.inputs.seqs.is_none() {
                return Err(PottsError::config(
                    "preopt-seqs",
                    "pre-optimization requires preloaded sequences (model.seqs or model.seqmodel)",
                ));
            }
            self.preopt(out.as_deref())?;
        } else if self.config.sampling.preequil_time != 0 {
            self.preequilibrate(&startseq)?;
        } else {
            info!("no pre-optimization");
        }

        self.cluster.broadcast(
            Buffer::BimargTarget,
            &BufferData::Pairs(self.inputs.target.clone()),
        )?;

        let mut rounds = Vec::with_capacity(self.config.newton.rounds);
        for i in 0..self.config.newton.rounds {
            let (summary, next) = self.round(i, &startseq, out.as_deref())?;
            startseq = next;
            if let Some(recorder) = metrics.as_mut() {
                recorder.push(RoundRecord {
                    round: i,
                    discrepancy: summary.discrepancy,
                    newton_steps: summary.newton.accepted,
                    gamma: summary.newton.gamma,
                })?;
            }
            if let Some(root) = &out {
                manifest.rounds.push(PathBuf::from(round_name(i)));
                manifest.write(&root.join(&self.config.output.manifest_file))?;
            }
            rounds.push(summary);
        }

        Ok(InferenceOutcome {
            couplings: self.couplings.clone(),
            startseq,
            rounds,
        })
    }

    /// Newton steps against the preloaded sample before round 0.
    fn preopt(&mut self, out: Option<&Path>) -> Result<(), PottsError> {
        let _span = info_span!("preopt").entered();
        info!("processing preloaded sequences");
        self.cluster.broadcast(
            Buffer::Couplings(Slot::Main),
            &BufferData::Pairs(self.couplings.clone()),
        )?;
        self.cluster.for_each(|w| {
            w.calc_energies(SeqBuf::Large, Slot::Main)?;
            w.calc_bimarg(SeqBuf::Large)
        })?;
        let bimarg = mean_bimarg(&self.cluster.gather_pairs(Buffer::Bimarg(Slot::Main))?)?;
        let bicount = sum_counts(&self.cluster.gather_counts()?)?;
        let seqs = self.cluster.gather_seqs(SeqBuf::Large)?;

        let dir = match out {
            Some(root) => Some(RoundDir::create(root, "preopt")?),
            None => None,
        };
        if let Some(dir) = &dir {
            let p = dir.path();
            write_pairs(&p.join("initbimarg.json"), &bimarg)?;
            write_pairs(&p.join("initJ.json"), &self.couplings)?;
            write_counts(&p.join("initbicounts.json"), bimarg.length(), bimarg.states(), &bicount)?;
            for (n, batch) in seqs.iter().enumerate() {
                artifacts::write_seqs(&p.join(seqs_file(n)), batch, &self.inputs.alphabet)?;
            }
        }
        let d = Discrepancy::between(&self.inputs.target, &bimarg);
        info!(ferr = d.ferr, ssr = d.ssr, wdf = d.wdf, "unweighted sample discrepancy");

        let rng = preopt_noise_rng(self.config.seed_policy.master_seed);
        let outcome = build_solver(&self.config.newton, &self.inputs, rng)
            .solve(&mut self.cluster, &bimarg, 0)?;
        if let Some(dir) = &dir {
            write_pairs(&dir.path().join("perturbedbimarg.json"), &outcome.bimarg)?;
            write_pairs(&dir.path().join("perturbedJ.json"), &outcome.couplings)?;
        }
        self.couplings = outcome.couplings;
        Ok(())
    }

    /// Kernel calls with fixed couplings before round 0.
    fn preequilibrate(&mut self, startseq: &[u8]) -> Result<(), PottsError> {
        let calls = self.config.sampling.preequil_time;
        let _span = info_span!("preequil", calls).entered();
        self.couplings = fieldless_gauge_even(&[], &self.couplings);
        if self.config.newton.reset_seqs {
            self.cluster.for_each(|w| w.fill_seqs(startseq))?;
        }
        self.cluster.broadcast(
            Buffer::Couplings(Slot::Main),
            &BufferData::Pairs(self.couplings.clone()),
        )?;
        McmcDriver::new(&mut self.cluster, self.tempering.as_mut()).equilibrate(calls)?;
        info!("pre-equilibration done");
        Ok(())
    }

    /// One round: sample, summarize, solve, choose the next start sequence.
    #[instrument(level = "info", skip(self, startseq, out))]
    fn round(
        &mut self,
        round: usize,
        startseq: &[u8],
        out: Option<&Path>,
    ) -> Result<(RoundSummary, Vec<u8>), PottsError> {
        let alphabet = self.inputs.alphabet.clone();
        self.couplings = fieldless_gauge_even(&[], &self.couplings);
        let dir = match out {
            Some(root) => Some(RoundDir::create(root, &round_name(round))?),
            None => None,
        };
        if let Some(dir) = &dir {
            dir.write_model(&self.couplings, startseq, &alphabet)?;
        }
        if self.config.newton.reset_seqs {
            self.cluster.for_each(|w| w.fill_seqs(startseq))?;
        }

        let schedule = self.schedule();
        let sample = McmcDriver::new(&mut self.cluster, self.tempering.as_mut())
            .run(&self.couplings, &schedule)?;
        let discrepancy = Discrepancy::between(&self.inputs.target, &sample.bimarg);
        info!(
            ferr = discrepancy.ferr,
            ssr = discrepancy.ssr,
            wdf = discrepancy.wdf,
            "sample discrepancy"
        );
        if let Some(dir) = &dir {
            let report = status_report(
                &round_name(round),
                &discrepancy,
                &sample,
                &self.couplings,
                startseq,
                &alphabet,
            );
            dir.write_equilibration(&sample.equilibration)?;
            dir.write_sample(&sample, &report, &alphabet)?;
        }

        let rng = noise_rng(self.config.seed_policy.master_seed, round);
        let outcome = build_solver(&self.config.newton, &self.inputs, rng)
            .solve(&mut self.cluster, &sample.bimarg, round)?;
        if outcome.stopped_early {
            warn!(round, "newton solver stopped on its step-size floor");
        }
        if let Some(dir) = &dir {
            dir.write_predicted(&outcome.bimarg)?;
        }
        self.couplings = outcome.couplings;

        let next = pick_startseq(&sample, self.config.seed_policy.master_seed, round)?;
        Ok((
            RoundSummary {
                round,
                discrepancy,
                newton: outcome.state,
                stopped_early: outcome.stopped_early,
            },
            next,
        ))
    }

    /// One sampling run under the current couplings without Newton updates.
    ///
    /// Walkers start from the start sequence unless live sequences were
    /// preloaded. Writes the sample and the live walkers' state when an
    /// output directory is set.
    #[instrument(level = "info", skip_all)]
    pub fn sample_once(&mut self) -> Result<McmcSample, PottsError> {
        let preloaded_live = !self.config.newton.reset_seqs
            || self
                .inputs
                .seqs
                .as_ref()
                .is_some_and(|s| s.len() == self.cluster.total_walkers());
        if !preloaded_live {
            let startseq = self.startseq()?;
            self.cluster.for_each(|w| w.fill_seqs(&startseq))?;
        }
        let schedule = self.schedule();
        let sample = McmcDriver::new(&mut self.cluster, self.tempering.as_mut())
            .run(&self.couplings, &schedule)?;

        if let Some(root) = self.out.clone() {
            let dir = RoundDir::create_at(&root)?;
            let alphabet = &self.inputs.alphabet;
            let d = Discrepancy::between(&self.inputs.target, &sample.bimarg);
            let startseq = self.inputs.startseq.clone().unwrap_or_default();
            let report = status_report("mcmc", &d, &sample, &self.couplings, &startseq, alphabet);
            dir.write_equilibration(&sample.equilibration)?;
            dir.write_sample(&sample, &report, alphabet)?;

            self.cluster.for_each(|w| w.calc_energies(SeqBuf::Main, Slot::Main))?;
            let live = self.cluster.gather_seqs(SeqBuf::Main)?;
            let energies = self.cluster.gather_values(Buffer::Energies(SeqBuf::Main))?.concat();
            let betas = self.cluster.gather_values(Buffer::Betas)?.concat();
            let mut all = SeqBatch::new(self.inputs.length);
            for seq in live.iter().flat_map(SeqBatch::iter) {
                all.push(seq)?;
            }
            artifacts::write_seqs(&root.join("mainseqs"), &all, alphabet)?;
            artifacts::write_energies(&root.join("mainE.json"), &energies)?;
            artifacts::write_energies(&root.join("mainB.json"), &betas)?;
        }
        Ok(sample)
    }
}

fn build_solver<'a>(newton: &NewtonConfig, inputs: &'a ModelInputs, rng: RngHandle) -> NewtonSolver<'a> {
    let solver = NewtonSolver::new(NewtonSettings::from_config(newton), &inputs.target, rng);
    match &inputs.regularization {
        Some(reg) => solver.with_regularization(reg),
        None => solver,
    }
}

/// Loads preloaded sequences.
///
/// The live walkers take the last `walkers` sequences. The whole batch goes
/// to the large buffers unless it holds exactly one sequence per walker;
/// with tempering those samples are taken as drawn at `beta0`.
fn load_preloaded<W: ComputeWorker>(
    cluster: &mut ComputeCluster<W>,
    seqs: &SeqBatch,
    beta0: Option<f32>,
) -> Result<(), PottsError> {
    let large = cluster.total_seqs(SeqBuf::Large);
    let walkers = cluster.total_walkers();
    if seqs.len() >= walkers {
        cluster.load_seqs(SeqBuf::Main, &seqs.tail(walkers))?;
    }
    if seqs.len() == large || seqs.len() != walkers {
        cluster.load_seqs(SeqBuf::Large, seqs)?;
        if let Some(beta0) = beta0 {
            cluster.for_each(|w| {
                let n = w.nseq(SeqBuf::Large);
                w.set_buf(Buffer::SampleBetas, BufferData::Values(vec![beta0; n]))
            })?;
        }
    }
    Ok(())
}

/// Uniform draw from the round's sample.
fn pick_startseq(sample: &McmcSample, master_seed: u64, round: usize) -> Result<Vec<u8>, PottsError> {
    let total = sample.len();
    if total == 0 {
        return Err(PottsError::Consistency(ErrorInfo::new(
            "empty-sample",
            "round produced no sequences",
        )));
    }
    let index = round_rng(master_seed, round).index(total);
    sample
        .seq(index)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| PottsError::Consistency(ErrorInfo::new("empty-sample", "sample index out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::{CpuWorker, WorkerLayout};
    use crate::tempering::SwapStats;
    use potts_core::PairMatrix;

    fn cluster() -> ComputeCluster<CpuWorker> {
        let layout = WorkerLayout {
            length: 2,
            states: 4,
            walkers: 4,
            samples: 2,
            steps_per_call: 1,
        };
        let workers = (0..2)
            .map(|i| CpuWorker::new(i, layout, i as u64).unwrap())
            .collect();
        ComputeCluster::new(workers).unwrap()
    }

    fn numbered(count: usize) -> SeqBatch {
        let rows = (0..count).map(|n| vec![(n % 4) as u8, (n / 4 % 4) as u8]).collect();
        SeqBatch::from_rows(2, rows).unwrap()
    }

    fn concat(batches: Vec<SeqBatch>) -> Vec<Vec<u8>> {
        batches
            .iter()
            .flat_map(|b| b.iter().map(<[u8]>::to_vec).collect::<Vec<_>>())
            .collect()
    }

    #[test]
    fn a_full_sample_fills_both_buffers() {
        let mut cluster = cluster();
        let seqs = numbered(16);
        load_preloaded(&mut cluster, &seqs, Some(0.5)).unwrap();

        let live = concat(cluster.gather_seqs(SeqBuf::Main).unwrap());
        let tail: Vec<Vec<u8>> = seqs.tail(8).iter().map(<[u8]>::to_vec).collect();
        assert_eq!(live, tail);
        let large = concat(cluster.gather_seqs(SeqBuf::Large).unwrap());
        assert_eq!(large.len(), 16);
        assert_eq!(large[3], vec![3, 0]);
        let betas = cluster.gather_values(Buffer::SampleBetas).unwrap().concat();
        assert!(betas.iter().all(|&b| b == 0.5));
    }

    #[test]
    fn one_sequence_per_walker_only_fills_the_live_buffer() {
        let mut cluster = cluster();
        load_preloaded(&mut cluster, &numbered(8), None).unwrap();
        let live = concat(cluster.gather_seqs(SeqBuf::Main).unwrap());
        assert_eq!(live[7], vec![3, 1]);
        let large = concat(cluster.gather_seqs(SeqBuf::Large).unwrap());
        assert!(large.iter().all(|s| s == &[0, 0]));

        let err = load_preloaded(&mut cluster, &numbered(5), None).unwrap_err();
        assert!(err.to_string().contains("expected 16 total sequences, got 5"));
    }

    #[test]
    fn start_sequence_choice_follows_the_round_seed() {
        let sample = McmcSample {
            bimarg: PairMatrix::zeros(2, 4),
            bicount: Vec::new(),
            energies: Vec::new(),
            seqs: vec![numbered(16)],
            equilibration: Vec::new(),
            swaps: SwapStats::default(),
        };
        let a = pick_startseq(&sample, 9, 3).unwrap();
        assert_eq!(a, pick_startseq(&sample, 9, 3).unwrap());
        assert_eq!(a.len(), 2);

        let empty = McmcSample {
            seqs: Vec::new(),
            ..sample
        };
        assert_eq!(pick_startseq(&empty, 9, 3).unwrap_err().info().code, "empty-sample");
    }
}
