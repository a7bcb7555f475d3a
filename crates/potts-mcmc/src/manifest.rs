use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use potts_core::errors::ErrorInfo;
use potts_core::{PottsError, RunProvenance, SchemaVersion};
use serde::{Deserialize, Serialize};

use crate::aggregate::Discrepancy;
use crate::artifacts::{read_json, write_json, SCHEMA_VERSION};
use crate::config::InferenceConfig;

/// Structured manifest describing a running or completed inference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    /// Artifact schema of the run.
    pub schema_version: SchemaVersion,
    /// Configuration used for the run.
    pub config: InferenceConfig,
    /// Master seed all substreams derive from.
    pub master_seed: u64,
    /// Optional seed label captured from the configuration.
    pub seed_label: Option<String>,
    /// Model dimensions, alphabet and tool versions.
    pub provenance: RunProvenance,
    /// Per-round metrics file (relative to the run directory).
    pub metrics_file: PathBuf,
    /// Completed round directories in order.
    pub rounds: Vec<PathBuf>,
}

impl RunManifest {
    /// Fresh manifest for `config` and a model of length `length`.
    pub fn new(config: &InferenceConfig, length: usize) -> Self {
        let mut provenance = RunProvenance {
            length,
            alphabet: config.model.alphabet.to_string(),
            seed: config.seed_policy.master_seed,
            created_at: Utc::now().to_rfc3339(),
            ..RunProvenance::default()
        };
        provenance
            .tool_versions
            .insert(env!("CARGO_PKG_NAME").to_string(), env!("CARGO_PKG_VERSION").to_string());
        Self {
            schema_version: SCHEMA_VERSION,
            config: config.clone(),
            master_seed: config.seed_policy.master_seed,
            seed_label: config.seed_policy.label.clone(),
            provenance,
            metrics_file: config.output.metrics_file.clone(),
            rounds: Vec::new(),
        }
    }

    /// Writes the manifest to a JSON file.
    pub fn write(&self, path: &Path) -> Result<(), PottsError> {
        write_json(path, self)
    }

    /// Loads a manifest from disk.
    pub fn load(path: &Path) -> Result<Self, PottsError> {
        let manifest: RunManifest = read_json(path)?;
        if !SCHEMA_VERSION.reads(&manifest.schema_version) {
            return Err(PottsError::Serde(
                ErrorInfo::new("manifest-schema", "unsupported manifest schema version")
                    .with_context("path", path.display()),
            ));
        }
        Ok(manifest)
    }
}

/// One row of the per-round metrics file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Round index.
    pub round: usize,
    /// Discrepancy of the round's sample against the target.
    pub discrepancy: Discrepancy,
    /// Accepted Newton steps.
    pub newton_steps: usize,
    /// Step size when the solver finished.
    pub gamma: f64,
}

const CSV_HEADER: &str = "round,ferr,ssr,wdf,newton_steps,gamma";

/// Appends per-round metrics to a CSV file.
#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    path: PathBuf,
    records: Vec<RoundRecord>,
}

impl MetricsRecorder {
    /// Recorder writing to `path`; the file is truncated and a header written.
    pub fn create(path: &Path) -> Result<Self, PottsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| PottsError::io("metrics-mkdir", err, parent))?;
        }
        fs::write(path, format!("{CSV_HEADER}\n"))
            .map_err(|err| PottsError::io("metrics-write", err, path))?;
        Ok(Self {
            path: path.to_path_buf(),
            records: Vec::new(),
        })
    }

    /// Appends one row.
    pub fn push(&mut self, record: RoundRecord) -> Result<(), PottsError> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|err| PottsError::io("metrics-open", err, &self.path))?;
        let d = record.discrepancy;
        writeln!(
            file,
            "{},{:.7},{:.7},{:.7},{},{:.6e}",
            record.round, d.ferr, d.ssr, d.wdf, record.newton_steps, record.gamma
        )
        .map_err(|err| PottsError::io("metrics-write", err, &self.path))?;
        self.records.push(record);
        Ok(())
    }

    /// Rows recorded so far.
    pub fn records(&self) -> &[RoundRecord] {
        &self.records
    }
}
