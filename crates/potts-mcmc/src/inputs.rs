use std::path::Path;

use potts_core::errors::ErrorInfo;
use potts_core::{
    fieldless_gauge_even, unimarg, Alphabet, Bimarg, Couplings, PairMatrix, PottsError, RngHandle,
    SeqBatch,
};
use tracing::info;

use crate::artifacts::{read_pairs, read_seqs, RoundDir};
use crate::config::{CouplingSource, ModelConfig, RegularizationConfig, SeqSource, StartSeq};

/// Smallest univariate frequency entering a log score.
const LOGSCORE_FLOOR: f64 = 1e-10;

/// Resolved model inputs of a run.
#[derive(Debug, Clone)]
pub struct ModelInputs {
    /// Residue alphabet.
    pub alphabet: Alphabet,
    /// Sequence length `L`.
    pub length: usize,
    /// Target bivariate marginals.
    pub target: Bimarg,
    /// Initial couplings.
    pub couplings: Couplings,
    /// Start sequence, when one was configured.
    pub startseq: Option<Vec<u8>>,
    /// Preloaded sequences, when configured.
    pub seqs: Option<SeqBatch>,
    /// Per-entry regularization weights `lambda * C`.
    pub regularization: Option<PairMatrix>,
}

impl ModelInputs {
    /// Alphabet size `q`.
    pub fn states(&self) -> usize {
        self.alphabet.len()
    }

    /// Loads and cross-checks every model input.
    ///
    /// `L` and `q` are inferred from the alphabet, the explicit length, the
    /// target and the couplings; any disagreement is a configuration error.
    /// `nseqs` is the number of sequences generated for `zero`/`logscore`
    /// sequence sources.
    pub fn resolve(
        model: &ModelConfig,
        regularization: Option<&RegularizationConfig>,
        nseqs: usize,
        rng: &mut RngHandle,
    ) -> Result<Self, PottsError> {
        let alphabet = model.alphabet.clone();
        let q = alphabet.len();
        let target = read_pairs(&model.target)?;
        target.validate_marginals().map_err(|err| with_path(err, &model.target))?;
        let mut shape = ShapeCheck::new(q);
        shape.observe("target", target.length(), target.states())?;
        if let Some(length) = model.length {
            shape.observe("length", length, q)?;
        }

        let seqmodel = model.seqmodel.as_deref().map(RoundDir::open).transpose()?;

        let couplings = match (&model.couplings, &seqmodel) {
            (Some(CouplingSource::Zero), _) => PairMatrix::zeros(target.length(), q),
            (Some(CouplingSource::LogScore), _) => logscore_couplings(&target),
            (Some(CouplingSource::File(path)), _) => read_pairs(path)?,
            (None, Some(dir)) => dir.load_couplings()?,
            (None, None) => {
                return Err(PottsError::config(
                    "couplings-missing",
                    "couplings are required: set model.couplings or model.seqmodel",
                ))
            }
        };
        shape.observe("couplings", couplings.length(), couplings.states())?;
        let length = target.length();

        let startseq = match (&model.start_seq, &seqmodel) {
            (Some(StartSeq::Random), _) => Some((0..length).map(|_| rng.index(q) as u8).collect()),
            (Some(StartSeq::Literal(text)), _) => Some(alphabet.encode(text)?),
            (None, Some(dir)) => Some(dir.load_startseq(&alphabet)?),
            (None, None) => None,
        };
        if let Some(seq) = &startseq {
            shape.observe("start_seq", seq.len(), q)?;
        }

        let seqs = match (&model.seqs, &seqmodel) {
            (Some(SeqSource::Zero), _) => Some(random_seqs(length, q, nseqs, rng)?),
            (Some(SeqSource::LogScore), _) => Some(independent_seqs(&target, nseqs, rng)?),
            (Some(SeqSource::File(path)), _) => Some(read_seqs(path, &alphabet)?),
            (None, Some(dir)) => dir.load_seqs(&alphabet)?,
            (None, None) => None,
        };
        if let Some(batch) = &seqs {
            shape.observe("seqs", batch.seq_len(), q)?;
        }

        let regularization = match regularization {
            Some(reg) => {
                let mut matrix = read_pairs(&reg.matrix)?;
                shape.observe("regularization", matrix.length(), matrix.states())?;
                for v in matrix.values_mut() {
                    *v = (*v as f64 * reg.lambda) as f32;
                }
                Some(matrix)
            }
            None => None,
        };

        info!(
            length,
            states = q,
            alphabet = %alphabet,
            preloaded = seqs.as_ref().map(SeqBatch::len).unwrap_or(0),
            "model inputs resolved"
        );
        Ok(Self {
            alphabet,
            length,
            target,
            couplings,
            startseq,
            seqs,
            regularization,
        })
    }
}

fn with_path(err: PottsError, path: &Path) -> PottsError {
    match err {
        PottsError::Config(info) => PottsError::Config(info.with_context("path", path.display())),
        other => other,
    }
}

/// First source fixes `(L, q)`; every later source must agree.
struct ShapeCheck {
    states: usize,
    length: Option<(usize, &'static str)>,
}

impl ShapeCheck {
    fn new(states: usize) -> Self {
        Self {
            states,
            length: None,
        }
    }

    fn observe(&mut self, source: &'static str, length: usize, states: usize) -> Result<(), PottsError> {
        if states != self.states {
            return Err(PottsError::Config(
                ErrorInfo::new("model-shape", "alphabet size disagrees with an input")
                    .with_context("source", source)
                    .with_context("alphabet", self.states)
                    .with_context("found", states),
            ));
        }
        match self.length {
            Some((expected, first)) if expected != length => Err(PottsError::Config(
                ErrorInfo::new("model-shape", "sequence length disagrees between inputs")
                    .with_context(first, expected)
                    .with_context(source, length),
            )),
            Some(_) => Ok(()),
            None => {
                self.length = Some((length, source));
                Ok(())
            }
        }
    }
}

/// Couplings carrying the independent-site log scores `h = -log f_i` of `target`.
pub fn logscore_couplings(target: &Bimarg) -> Couplings {
    let fields: Vec<Vec<f64>> = unimarg(target)
        .into_iter()
        .map(|f| f.into_iter().map(|p| -p.max(LOGSCORE_FLOOR).ln()).collect())
        .collect();
    fieldless_gauge_even(&fields, &PairMatrix::zeros(target.length(), target.states()))
}

/// `count` uniformly random sequences.
pub fn random_seqs(
    length: usize,
    states: usize,
    count: usize,
    rng: &mut RngHandle,
) -> Result<SeqBatch, PottsError> {
    let rows = (0..count)
        .map(|_| (0..length).map(|_| rng.index(states) as u8).collect())
        .collect();
    SeqBatch::from_rows(length, rows)
}

/// `count` sequences drawn from the site-independent model of `target`.
pub fn independent_seqs(
    target: &Bimarg,
    count: usize,
    rng: &mut RngHandle,
) -> Result<SeqBatch, PottsError> {
    let cumulative: Vec<Vec<f64>> = unimarg(target)
        .into_iter()
        .map(|f| {
            f.iter()
                .scan(0.0, |acc, &p| {
                    *acc += p;
                    Some(*acc)
                })
                .collect()
        })
        .collect();
    let rows = (0..count)
        .map(|_| {
            cumulative
                .iter()
                .map(|cdf| {
                    let u = rng.uniform();
                    cdf.iter().position(|&c| u < c).unwrap_or(cdf.len() - 1) as u8
                })
                .collect()
        })
        .collect();
    SeqBatch::from_rows(target.length(), rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy::sequence_energy;
    use potts_core::indep_bimarg;

    fn skewed_target() -> Bimarg {
        let mut uni = PairMatrix::zeros(3, 2);
        for n in 0..3 {
            uni.row_mut(n).copy_from_slice(&[0.64, 0.16, 0.16, 0.04]);
        }
        indep_bimarg(&uni)
    }

    #[test]
    fn logscore_favours_frequent_residues() {
        let j = logscore_couplings(&skewed_target());
        assert!(sequence_energy(&j, &[0, 0, 0]) < sequence_energy(&j, &[1, 1, 1]));
        let expected = 3.0 * (4.0f64).ln();
        let diff = sequence_energy(&j, &[1, 1, 1]) - sequence_energy(&j, &[0, 0, 0]);
        assert!((diff - expected).abs() < 1e-4, "{diff} vs {expected}");
    }

    #[test]
    fn shape_mismatch_names_both_sources() {
        let mut check = ShapeCheck::new(2);
        check.observe("target", 5, 2).unwrap();
        let err = check.observe("couplings", 4, 2).unwrap_err();
        assert_eq!(err.info().code, "model-shape");
        assert_eq!(err.info().context.get("target").map(String::as_str), Some("5"));
        assert!(check.observe("seqs", 5, 3).is_err());
    }

    #[test]
    fn independent_sampling_follows_the_univariates() {
        let mut rng = RngHandle::from_seed(21);
        let seqs = independent_seqs(&skewed_target(), 4000, &mut rng).unwrap();
        let zeros = seqs.iter().filter(|s| s[0] == 0).count() as f64 / 4000.0;
        assert!((zeros - 0.8).abs() < 0.03, "{zeros}");
    }

    #[test]
    fn random_sequences_stay_inside_the_alphabet() {
        let mut rng = RngHandle::from_seed(4);
        let seqs = random_seqs(6, 3, 50, &mut rng).unwrap();
        assert_eq!((seqs.len(), seqs.seq_len()), (50, 6));
        assert!(seqs.iter().flatten().all(|&s| s < 3));
        assert!(random_seqs(6, 3, 0, &mut rng).unwrap().is_empty());
    }
}
