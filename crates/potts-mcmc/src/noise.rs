use potts_core::errors::ErrorInfo;
use potts_core::{Bimarg, PairMatrix, PottsError, RngHandle, PRIOR_PSEUDOCOUNT};
use rand_distr::{Beta, Binomial, Distribution};

/// Draws a finite-sample version of `target` as seen in an alignment of
/// `samples` sequences.
///
/// Each entry draws `p ~ Beta(1 + N f, 1 + N - N f)` and then
/// `c ~ Binomial(N, p)`. Rows are normalized and mixed with the uniform
/// prior, so every entry lies strictly inside `(0, 1)`.
pub fn resample_marginals(
    target: &Bimarg,
    samples: u64,
    rng: &mut RngHandle,
) -> Result<Bimarg, PottsError> {
    let n = samples as f64;
    let width = target.row_width();
    let mut values = Vec::with_capacity(target.values().len());
    for row in target.rows() {
        let mut counts = Vec::with_capacity(width);
        for &f in row {
            let ct = n * (f as f64).clamp(0.0, 1.0);
            let beta = Beta::new(1.0 + ct, 1.0 + n - ct).map_err(|err| noise_error(err.to_string(), f))?;
            let p: f64 = beta.sample(rng.inner_mut());
            let binomial = Binomial::new(samples, p).map_err(|err| noise_error(err.to_string(), f))?;
            counts.push(binomial.sample(rng.inner_mut()) as f64);
        }
        let total: f64 = counts.iter().sum();
        if total > 0.0 {
            values.extend(counts.iter().map(|c| (c / total) as f32));
        } else {
            values.extend(std::iter::repeat(1.0 / width as f32).take(width));
        }
    }
    let mut out = PairMatrix::from_values(target.length(), target.states(), values)?;
    out.apply_prior(PRIOR_PSEUDOCOUNT);
    Ok(out)
}

fn noise_error(message: String, value: f32) -> PottsError {
    PottsError::Config(
        ErrorInfo::new("noise-resample", message)
            .with_context("marginal", value)
            .with_hint("target marginals must lie in [0, 1]"),
    )
}
