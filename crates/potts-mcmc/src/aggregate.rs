use potts_core::errors::ErrorInfo;
use potts_core::{Bimarg, PairMatrix, PottsError};
use serde::{Deserialize, Serialize};

/// Target entries above this value enter the mean relative error.
pub const FERR_THRESHOLD: f32 = 0.01;

/// `sum_w Neff_w * bimarg_w / sum_w Neff_w`.
///
/// A total effective sample size of zero or a non-finite total is a
/// divergence of the current Newton step.
pub fn weighted_bimarg(neffs: &[f64], bimargs: &[Bimarg]) -> Result<(Bimarg, f64), PottsError> {
    check_parts(neffs.len(), bimargs)?;
    let total: f64 = neffs.iter().sum();
    if total == 0.0 || !total.is_finite() {
        return Err(PottsError::Divergence(
            ErrorInfo::new("neff-collapse", "effective sample size collapsed")
                .with_context("neff", total)
                .with_context(
                    "per_worker",
                    neffs.iter().map(|n| format!("{n:.1}")).collect::<Vec<_>>().join(","),
                )
                .with_hint("decrease gamma or increase damping"),
        ));
    }
    let mut acc = vec![0.0f64; bimargs[0].values().len()];
    for (neff, bimarg) in neffs.iter().zip(bimargs) {
        for (a, &v) in acc.iter_mut().zip(bimarg.values()) {
            *a += neff * v as f64;
        }
    }
    let values = acc.into_iter().map(|v| (v / total) as f32).collect();
    let out = PairMatrix::from_values(bimargs[0].length(), bimargs[0].states(), values)?;
    Ok((out, total))
}

/// Unweighted mean across workers.
pub fn mean_bimarg(bimargs: &[Bimarg]) -> Result<Bimarg, PottsError> {
    check_parts(bimargs.len(), bimargs)?;
    let mut acc = vec![0.0f64; bimargs[0].values().len()];
    for bimarg in bimargs {
        for (a, &v) in acc.iter_mut().zip(bimarg.values()) {
            *a += v as f64;
        }
    }
    let n = bimargs.len() as f64;
    let values = acc.into_iter().map(|v| (v / n) as f32).collect();
    PairMatrix::from_values(bimargs[0].length(), bimargs[0].states(), values)
}

/// Element-wise sum of per-worker pair counts.
pub fn sum_counts(counts: &[Vec<u32>]) -> Result<Vec<u32>, PottsError> {
    let Some(first) = counts.first() else {
        return Ok(Vec::new());
    };
    let mut total = vec![0u32; first.len()];
    for part in counts {
        if part.len() != total.len() {
            return Err(PottsError::Consistency(
                ErrorInfo::new("count-shape", "pair count vectors differ in length")
                    .with_context("expected", total.len())
                    .with_context("found", part.len()),
            ));
        }
        for (t, &c) in total.iter_mut().zip(part) {
            *t += c;
        }
    }
    Ok(total)
}

fn check_parts(expected: usize, bimargs: &[Bimarg]) -> Result<(), PottsError> {
    let Some(first) = bimargs.first() else {
        return Err(PottsError::Consistency(ErrorInfo::new(
            "aggregate-empty",
            "nothing to aggregate",
        )));
    };
    if expected != bimargs.len() || bimargs.iter().any(|b| !b.same_shape(first)) {
        return Err(PottsError::Consistency(
            ErrorInfo::new("aggregate-shape", "per-worker marginals disagree in count or shape")
                .with_context("weights", expected)
                .with_context("marginals", bimargs.len()),
        ));
    }
    Ok(())
}

/// Discrepancy between model and target marginals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    /// Mean relative error over target entries above [`FERR_THRESHOLD`].
    pub ferr: f64,
    /// Sum of squared residuals.
    pub ssr: f64,
    /// Target-weighted sum of absolute differences.
    pub wdf: f64,
}

impl Discrepancy {
    /// Compares `model` against `target`.
    pub fn between(target: &Bimarg, model: &Bimarg) -> Self {
        let mut rel = 0.0;
        let mut n = 0usize;
        let mut wdf = 0.0;
        for (&t, &m) in target.values().iter().zip(model.values()) {
            let (t, m) = (t as f64, m as f64);
            let diff = (t - m).abs();
            wdf += t * diff;
            if t > FERR_THRESHOLD as f64 {
                rel += diff / t;
                n += 1;
            }
        }
        Self {
            ferr: if n == 0 { 0.0 } else { rel / n as f64 },
            ssr: target.ssr(model),
            wdf,
        }
    }
}
