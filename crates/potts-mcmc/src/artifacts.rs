use std::fs;
use std::path::{Path, PathBuf};

use potts_core::errors::ErrorInfo;
use potts_core::{indep_bimarg, Alphabet, Bimarg, Couplings, PairMatrix, PottsError, SchemaVersion, SeqBatch};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::aggregate::Discrepancy;
use crate::driver::McmcSample;

/// Schema version written into every JSON artifact.
pub const SCHEMA_VERSION: SchemaVersion = SchemaVersion::new(1, 0, 0);

/// Couplings of a round.
pub const COUPLINGS_FILE: &str = "J.json";
/// Sample marginals of a round.
pub const BIMARG_FILE: &str = "bimarg.json";
/// Sample pair counts of a round.
pub const BICOUNTS_FILE: &str = "bicounts.json";
/// Sample energies of a round.
pub const ENERGIES_FILE: &str = "energies.json";
/// Start sequence of a round.
pub const STARTSEQ_FILE: &str = "startseq";
/// Marginals predicted by the Newton solver.
pub const PREDICTED_FILE: &str = "predicted_bimarg.json";
/// Human readable round summary.
pub const INFO_FILE: &str = "info.txt";

/// Name of the `n`-th per-worker sequence file.
pub fn seqs_file(n: usize) -> String {
    format!("seqs-{n}")
}

/// Directory name of round `i`.
pub fn round_name(i: usize) -> String {
    format!("run_{i}")
}

/// Versioned pair table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairPayload {
    /// Payload schema.
    pub schema_version: SchemaVersion,
    /// Sequence length.
    pub length: usize,
    /// Alphabet size.
    pub states: usize,
    /// Row-major values in pair order.
    pub values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PairFile {
    Versioned(PairPayload),
    Rows(Vec<Vec<f32>>),
}

/// Versioned pair counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountsPayload {
    /// Payload schema.
    pub schema_version: SchemaVersion,
    /// Sequence length.
    pub length: usize,
    /// Alphabet size.
    pub states: usize,
    /// Counts in pair order.
    pub counts: Vec<u32>,
}

/// Versioned per-sequence energies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergiesPayload {
    /// Payload schema.
    pub schema_version: SchemaVersion,
    /// One energy per sequence.
    pub energies: Vec<f32>,
}

fn ensure_parent(path: &Path) -> Result<(), PottsError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| PottsError::io("artifact-mkdir", err, parent))?;
        }
    }
    Ok(())
}

/// Serializes `value` as pretty JSON.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PottsError> {
    ensure_parent(path)?;
    let json = serde_json::to_string_pretty(value).map_err(|err| {
        PottsError::Serde(
            ErrorInfo::new("artifact-serialize", err.to_string()).with_context("path", path.display()),
        )
    })?;
    fs::write(path, json).map_err(|err| PottsError::io("artifact-write", err, path))
}

/// Parses a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PottsError> {
    let text = fs::read_to_string(path).map_err(|err| PottsError::io("artifact-read", err, path))?;
    serde_json::from_str(&text).map_err(|err| {
        PottsError::Serde(
            ErrorInfo::new("artifact-parse", err.to_string()).with_context("path", path.display()),
        )
    })
}

fn check_schema(found: &SchemaVersion, path: &Path) -> Result<(), PottsError> {
    if !SCHEMA_VERSION.reads(found) {
        return Err(PottsError::Serde(
            ErrorInfo::new("artifact-schema", "unsupported artifact schema version")
                .with_context("path", path.display())
                .with_context("found", format!("{}.{}.{}", found.major, found.minor, found.patch)),
        ));
    }
    Ok(())
}

/// Writes a versioned pair table.
pub fn write_pairs(path: &Path, pairs: &PairMatrix) -> Result<(), PottsError> {
    write_json(
        path,
        &PairPayload {
            schema_version: SCHEMA_VERSION,
            length: pairs.length(),
            states: pairs.states(),
            values: pairs.values().to_vec(),
        },
    )
}

/// Reads a pair table, either versioned or as bare `[[f32; q*q]; L(L-1)/2]` rows.
pub fn read_pairs(path: &Path) -> Result<PairMatrix, PottsError> {
    let attach = |err: PottsError| match err {
        PottsError::Config(info) => PottsError::Config(info.with_context("path", path.display())),
        other => other,
    };
    match read_json::<PairFile>(path)? {
        PairFile::Versioned(payload) => {
            check_schema(&payload.schema_version, path)?;
            PairMatrix::from_values(payload.length, payload.states, payload.values).map_err(attach)
        }
        PairFile::Rows(rows) => PairMatrix::from_rows(&rows).map_err(attach),
    }
}

/// Writes versioned pair counts for a table of shape `(length, states)`.
pub fn write_counts(path: &Path, length: usize, states: usize, counts: &[u32]) -> Result<(), PottsError> {
    write_json(
        path,
        &CountsPayload {
            schema_version: SCHEMA_VERSION,
            length,
            states,
            counts: counts.to_vec(),
        },
    )
}

/// Reads versioned pair counts.
pub fn read_counts(path: &Path) -> Result<CountsPayload, PottsError> {
    let payload: CountsPayload = read_json(path)?;
    check_schema(&payload.schema_version, path)?;
    Ok(payload)
}

/// Writes versioned energies.
pub fn write_energies(path: &Path, energies: &[f32]) -> Result<(), PottsError> {
    write_json(
        path,
        &EnergiesPayload {
            schema_version: SCHEMA_VERSION,
            energies: energies.to_vec(),
        },
    )
}

/// Reads versioned energies.
pub fn read_energies(path: &Path) -> Result<Vec<f32>, PottsError> {
    let payload: EnergiesPayload = read_json(path)?;
    check_schema(&payload.schema_version, path)?;
    Ok(payload.energies)
}

/// Writes one sequence per line.
pub fn write_seqs(path: &Path, seqs: &SeqBatch, alphabet: &Alphabet) -> Result<(), PottsError> {
    ensure_parent(path)?;
    let mut text = String::with_capacity(seqs.len() * (seqs.seq_len() + 1));
    for seq in seqs.iter() {
        text.push_str(&alphabet.decode(seq));
        text.push('\n');
    }
    fs::write(path, text).map_err(|err| PottsError::io("seqs-write", err, path))
}

/// Reads one sequence per line; blank lines are skipped.
pub fn read_seqs(path: &Path, alphabet: &Alphabet) -> Result<SeqBatch, PottsError> {
    let text = fs::read_to_string(path).map_err(|err| PottsError::io("seqs-read", err, path))?;
    let mut batch: Option<SeqBatch> = None;
    for (line_no, line) in text.lines().map(str::trim).enumerate() {
        if line.is_empty() {
            continue;
        }
        let with_line = |err: PottsError| match err {
            PottsError::Config(info) => PottsError::Config(
                info.with_context("path", path.display()).with_context("line", line_no + 1),
            ),
            PottsError::Consistency(info) => PottsError::Consistency(
                info.with_context("path", path.display()).with_context("line", line_no + 1),
            ),
            other => other,
        };
        let seq = alphabet.encode(line).map_err(&with_line)?;
        batch
            .get_or_insert_with(|| SeqBatch::new(seq.len()))
            .push(&seq)
            .map_err(&with_line)?;
    }
    batch.ok_or_else(|| {
        PottsError::Config(
            ErrorInfo::new("seqs-empty", "sequence file holds no sequences")
                .with_context("path", path.display()),
        )
    })
}

/// Writes a single sequence as text.
pub fn write_startseq(path: &Path, seq: &[u8], alphabet: &Alphabet) -> Result<(), PottsError> {
    ensure_parent(path)?;
    fs::write(path, alphabet.decode(seq)).map_err(|err| PottsError::io("startseq-write", err, path))
}

/// Reads a single sequence.
pub fn read_startseq(path: &Path, alphabet: &Alphabet) -> Result<Vec<u8>, PottsError> {
    let text = fs::read_to_string(path).map_err(|err| PottsError::io("startseq-read", err, path))?;
    alphabet.encode(text.trim())
}

fn tail(values: impl ExactSizeIterator<Item = String>) -> String {
    let skip = values.len().saturating_sub(5);
    values.skip(skip).collect::<Vec<_>>().join(" ")
}

/// Human readable summary of a sampled round.
pub fn status_report(
    name: &str,
    discrepancy: &Discrepancy,
    sample: &McmcSample,
    couplings: &Couplings,
    startseq: &[u8],
    alphabet: &Alphabet,
) -> String {
    let connected = {
        let indep = indep_bimarg(&sample.bimarg);
        sample
            .bimarg
            .values()
            .iter()
            .zip(indep.values())
            .zip(couplings.values())
            .map(|((&f, &fi), &j)| (j as f64) * (f as f64 - fi as f64))
            .sum::<f64>()
    };
    let (lowest, mean) = if sample.energies.is_empty() {
        (0.0, 0.0)
    } else {
        let lowest = sample.energies.iter().copied().fold(f32::INFINITY, f32::min);
        let mean = sample.energies.iter().map(|&e| e as f64).sum::<f64>() / sample.energies.len() as f64;
        (lowest, mean)
    };
    [
        format!("Start Seq: {}", alphabet.decode(startseq)),
        format!(
            "{name} Ferr: {:9.7}  SSR: {:9.5}  wDf: {:9.5}",
            discrepancy.ferr, discrepancy.ssr, discrepancy.wdf
        ),
        format!("{name} dX: {connected:9.7}  SSR: {:9.5}", discrepancy.ssr),
        format!("Bicounts: {}...", tail(sample.bicount.iter().map(u32::to_string))),
        format!("Marginals: {}...", tail(sample.bimarg.values().iter().map(f32::to_string))),
        format!("Couplings: {}...", tail(couplings.values().iter().map(f32::to_string))),
        format!("Energies: Lowest = {lowest}, Mean = {mean}"),
    ]
    .join("\n")
}

/// One round directory of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundDir {
    path: PathBuf,
}

impl RoundDir {
    /// Creates (if needed) `root/name`.
    pub fn create(root: &Path, name: &str) -> Result<Self, PottsError> {
        Self::create_at(&root.join(name))
    }

    /// Creates (if needed) `path` itself, parents included.
    pub fn create_at(path: &Path) -> Result<Self, PottsError> {
        fs::create_dir_all(path).map_err(|err| PottsError::io("artifact-mkdir", err, path))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Existing directory, e.g. a previous round used as a starting model.
    pub fn open(path: &Path) -> Result<Self, PottsError> {
        if !path.is_dir() {
            return Err(PottsError::Config(
                ErrorInfo::new("round-dir", "round directory does not exist")
                    .with_context("path", path.display()),
            ));
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the round's couplings and start sequence.
    pub fn write_model(&self, couplings: &Couplings, startseq: &[u8], alphabet: &Alphabet) -> Result<(), PottsError> {
        write_pairs(&self.path.join(COUPLINGS_FILE), couplings)?;
        write_startseq(&self.path.join(STARTSEQ_FILE), startseq, alphabet)
    }

    /// Writes sample marginals, counts, energies, sequences and the summary.
    pub fn write_sample(&self, sample: &McmcSample, report: &str, alphabet: &Alphabet) -> Result<(), PottsError> {
        let bimarg = &sample.bimarg;
        write_pairs(&self.path.join(BIMARG_FILE), bimarg)?;
        write_counts(
            &self.path.join(BICOUNTS_FILE),
            bimarg.length(),
            bimarg.states(),
            &sample.bicount,
        )?;
        write_energies(&self.path.join(ENERGIES_FILE), &sample.energies)?;
        for (n, seqs) in sample.seqs.iter().enumerate() {
            write_seqs(&self.path.join(seqs_file(n)), seqs, alphabet)?;
        }
        let info = self.path.join(INFO_FILE);
        fs::write(&info, report).map_err(|err| PottsError::io("artifact-write", err, &info))
    }

    /// Writes equilibration snapshots as `equilibration/bimarg_{j}.json`.
    pub fn write_equilibration(&self, snapshots: &[Bimarg]) -> Result<(), PottsError> {
        for (j, bimarg) in snapshots.iter().enumerate() {
            write_pairs(&self.path.join("equilibration").join(format!("bimarg_{j}.json")), bimarg)?;
        }
        Ok(())
    }

    /// Writes the marginals predicted for the next round's couplings.
    pub fn write_predicted(&self, bimarg: &Bimarg) -> Result<(), PottsError> {
        write_pairs(&self.path.join(PREDICTED_FILE), bimarg)
    }

    /// Couplings of the round.
    pub fn load_couplings(&self) -> Result<Couplings, PottsError> {
        read_pairs(&self.path.join(COUPLINGS_FILE))
    }

    /// Start sequence of the round.
    pub fn load_startseq(&self, alphabet: &Alphabet) -> Result<Vec<u8>, PottsError> {
        read_startseq(&self.path.join(STARTSEQ_FILE), alphabet)
    }

    /// Sample marginals of the round.
    pub fn load_bimarg(&self) -> Result<Bimarg, PottsError> {
        read_pairs(&self.path.join(BIMARG_FILE))
    }

    /// Every `seqs-{n}` file, concatenated in worker order.
    pub fn load_seqs(&self, alphabet: &Alphabet) -> Result<Option<SeqBatch>, PottsError> {
        let mut all: Option<SeqBatch> = None;
        for n in 0.. {
            let path = self.path.join(seqs_file(n));
            if !path.is_file() {
                break;
            }
            let part = read_seqs(&path, alphabet)?;
            match all.as_mut() {
                None => all = Some(part),
                Some(batch) => {
                    for seq in part.iter() {
                        batch.push(seq)?;
                    }
                }
            }
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_dirs_create_missing_parents() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("runs").join("mcmc");
        let at = RoundDir::create_at(&root).unwrap();
        assert!(at.path().is_dir());
        let round = RoundDir::create(&dir.path().join("fresh"), &round_name(0)).unwrap();
        assert!(round.path().ends_with("fresh/run_0"));
        assert!(RoundDir::open(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn equilibration_snapshots_are_numbered_in_order() {
        let dir = tempdir().unwrap();
        let round = RoundDir::create_at(dir.path()).unwrap();
        let mut second = PairMatrix::zeros(3, 2);
        second.values_mut()[0] = 1.0;
        round
            .write_equilibration(&[PairMatrix::zeros(3, 2), second.clone()])
            .unwrap();
        let read = read_pairs(&dir.path().join("equilibration/bimarg_1.json")).unwrap();
        assert_eq!(read, second);
    }
}
