//! Pairwise parameter tables shared by couplings and bivariate marginals.
//!
//! Both quantities are stored as one row per position pair `i < j` in
//! row-major pair order `(0,1), (0,2), .., (L-2, L-1)`, each row holding the
//! `q x q` joint table flattened as `a * q + b`.

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorInfo, PottsError};

/// Tolerance on the per-pair normalization of loaded marginals.
pub const ROW_SUM_TOLERANCE: f64 = 1e-4;

/// Pseudocount weight applied by [`PairMatrix::apply_prior`] after noise resampling.
pub const PRIOR_PSEUDOCOUNT: f64 = 0.001;

/// Dense `(L(L-1)/2, q^2)` table of 32-bit values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairMatrix {
    length: usize,
    states: usize,
    values: Vec<f32>,
}

/// Pairwise interaction energies `J`.
pub type Couplings = PairMatrix;

/// Bivariate marginals, one joint distribution per position pair.
pub type Bimarg = PairMatrix;

/// Number of position pairs for a sequence of length `length`.
pub fn num_pairs(length: usize) -> usize {
    length * length.saturating_sub(1) / 2
}

/// Row index of pair `(i, j)`, `i < j`.
pub fn pair_index(length: usize, i: usize, j: usize) -> usize {
    debug_assert!(i < j && j < length);
    i * length - i * (i + 1) / 2 + (j - i - 1)
}

/// Iterates position pairs in row order.
pub fn pairs(length: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..length).flat_map(move |i| (i + 1..length).map(move |j| (i, j)))
}

/// Recovers `(L, q)` from a `(rows, cols)` parameter shape.
pub fn shape_from_param_shape(rows: usize, cols: usize) -> Result<(usize, usize), PottsError> {
    let length = (((1.0 + (1.0 + 8.0 * rows as f64).sqrt()) / 2.0) + 0.5) as usize;
    let states = ((cols as f64).sqrt() + 0.5) as usize;
    if rows == 0 || num_pairs(length) != rows || states * states != cols {
        return Err(PottsError::Config(
            ErrorInfo::new(
                "pair-shape",
                "parameter shape does not correspond to a Potts model",
            )
            .with_context("rows", rows)
            .with_context("cols", cols),
        ));
    }
    Ok((length, states))
}

impl PairMatrix {
    /// Zero-filled table for length `length` and alphabet size `states`.
    pub fn zeros(length: usize, states: usize) -> Self {
        Self {
            length,
            states,
            values: vec![0.0; num_pairs(length) * states * states],
        }
    }

    /// Builds a table from flat values, checking the length.
    pub fn from_values(length: usize, states: usize, values: Vec<f32>) -> Result<Self, PottsError> {
        let expected = num_pairs(length) * states * states;
        if values.len() != expected || length < 2 || states == 0 {
            return Err(PottsError::Config(
                ErrorInfo::new("pair-values", "value count does not match (L, q)")
                    .with_context("length", length)
                    .with_context("states", states)
                    .with_context("expected", expected)
                    .with_context("found", values.len()),
            ));
        }
        Ok(Self {
            length,
            states,
            values,
        })
    }

    /// Builds a table from `rows` rows of `q^2` values, inferring `(L, q)`.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self, PottsError> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        if rows.iter().any(|row| row.len() != cols) {
            return Err(PottsError::config("pair-rows", "rows have unequal lengths"));
        }
        let (length, states) = shape_from_param_shape(rows.len(), cols)?;
        Self::from_values(length, states, rows.concat())
    }

    /// Sequence length `L`.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Alphabet size `q`.
    pub fn states(&self) -> usize {
        self.states
    }

    /// Number of pair rows.
    pub fn num_pairs(&self) -> usize {
        num_pairs(self.length)
    }

    /// Width of a row, `q^2`.
    pub fn row_width(&self) -> usize {
        self.states * self.states
    }

    /// Flat view of all values.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Mutable flat view of all values.
    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    /// Row for pair index `n`.
    pub fn row(&self, n: usize) -> &[f32] {
        let w = self.row_width();
        &self.values[n * w..(n + 1) * w]
    }

    /// Mutable row for pair index `n`.
    pub fn row_mut(&mut self, n: usize) -> &mut [f32] {
        let w = self.row_width();
        &mut self.values[n * w..(n + 1) * w]
    }

    /// Iterates rows in pair order.
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.values.chunks(self.row_width())
    }

    /// Value for residues `(a, b)` at pair row `n`.
    pub fn get(&self, n: usize, a: u8, b: u8) -> f32 {
        self.values[n * self.row_width() + a as usize * self.states + b as usize]
    }

    /// Returns true when `other` has the same `(L, q)`.
    pub fn same_shape(&self, other: &PairMatrix) -> bool {
        self.length == other.length && self.states == other.states
    }

    /// Rescales every row to sum to one.
    pub fn normalize_rows(&mut self) {
        let w = self.row_width();
        for row in self.values.chunks_mut(w) {
            let total: f64 = row.iter().map(|&v| v as f64).sum();
            if total > 0.0 {
                for v in row.iter_mut() {
                    *v = (*v as f64 / total) as f32;
                }
            }
        }
    }

    /// Mixes every row with the uniform distribution: `(1 - pc) f + pc / q^2`.
    pub fn apply_prior(&mut self, pc: f64) {
        let uniform = 1.0 / self.row_width() as f64;
        for v in self.values.iter_mut() {
            *v = ((1.0 - pc) * *v as f64 + pc * uniform) as f32;
        }
    }

    /// Checks that the table is a valid set of bivariate marginals.
    pub fn validate_marginals(&self) -> Result<(), PottsError> {
        if let Some(pos) = self
            .values
            .iter()
            .position(|v| !v.is_finite() || *v < 0.0 || *v > 1.0)
        {
            return Err(PottsError::Config(
                ErrorInfo::new("bimarg-range", "marginals must satisfy 0 <= f <= 1")
                    .with_context("index", pos)
                    .with_context("value", self.values[pos]),
            ));
        }
        for (n, row) in self.rows().enumerate() {
            let total: f64 = row.iter().map(|&v| v as f64).sum();
            if (total - 1.0).abs() > ROW_SUM_TOLERANCE {
                return Err(PottsError::Config(
                    ErrorInfo::new("bimarg-normalization", "pair marginals do not sum to 1")
                        .with_context("pair", n)
                        .with_context("sum", total),
                ));
            }
        }
        Ok(())
    }

    /// Sum of squared residuals against `other`.
    pub fn ssr(&self, other: &PairMatrix) -> f64 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(&a, &b)| {
                let d = a as f64 - b as f64;
                d * d
            })
            .sum()
    }
}

/// Univariate marginals `(L, q)` implied by a set of bivariate marginals.
///
/// Position 0 is read from the row sums of pair `(0, 1)`; every other position
/// `j` from the column sums of pair `(0, j)`. Each row is renormalized.
pub fn unimarg(bimarg: &Bimarg) -> Vec<Vec<f64>> {
    let (length, q) = (bimarg.length(), bimarg.states());
    let mut marg = vec![vec![0.0f64; q]; length];
    let first = bimarg.row(0);
    for a in 0..q {
        marg[0][a] = (0..q).map(|b| first[a * q + b] as f64).sum();
    }
    for j in 1..length {
        let row = bimarg.row(pair_index(length, 0, j));
        for b in 0..q {
            marg[j][b] = (0..q).map(|a| row[a * q + b] as f64).sum();
        }
    }
    for f in marg.iter_mut() {
        let total: f64 = f.iter().sum();
        if total > 0.0 {
            f.iter_mut().for_each(|v| *v /= total);
        }
    }
    marg
}

/// Bivariate marginals of the site-independent model with the same univariates.
pub fn indep_bimarg(bimarg: &Bimarg) -> Bimarg {
    let f = unimarg(bimarg);
    let (length, q) = (bimarg.length(), bimarg.states());
    let mut out = PairMatrix::zeros(length, q);
    for (n, (i, j)) in pairs(length).enumerate() {
        let row = out.row_mut(n);
        for a in 0..q {
            for b in 0..q {
                row[a * q + b] = (f[i][a] * f[j][b]) as f32;
            }
        }
    }
    out
}
