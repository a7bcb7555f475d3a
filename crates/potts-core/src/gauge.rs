//! Gauge re-centering of coupling tables.

use crate::pairs::{pairs, Couplings};

/// Moves fields into the couplings evenly and re-centers every pair table.
///
/// Energies `E(s) = sum_i h_i(s_i) + sum_{i<j} J_ij(s_i, s_j)` change by a
/// sequence-independent constant only. `fields` is `L x q`; pass zeros to
/// re-center couplings alone.
pub fn fieldless_gauge_even(fields: &[Vec<f64>], couplings: &Couplings) -> Couplings {
    let (length, q) = (couplings.length(), couplings.states());
    let mut h: Vec<Vec<f64>> = (0..length)
        .map(|i| fields.get(i).cloned().unwrap_or_else(|| vec![0.0; q]))
        .collect();
    let mut centered: Vec<Vec<f64>> = Vec::with_capacity(couplings.num_pairs());

    for (n, (i, j)) in pairs(length).enumerate() {
        let row = couplings.row(n);
        let mean = row.iter().map(|&v| v as f64).sum::<f64>() / (q * q) as f64;
        let row_dev: Vec<f64> = (0..q)
            .map(|a| (0..q).map(|b| row[a * q + b] as f64).sum::<f64>() / q as f64 - mean)
            .collect();
        let col_dev: Vec<f64> = (0..q)
            .map(|b| (0..q).map(|a| row[a * q + b] as f64).sum::<f64>() / q as f64 - mean)
            .collect();
        let mut zeroed = vec![0.0; q * q];
        for a in 0..q {
            for b in 0..q {
                zeroed[a * q + b] = row[a * q + b] as f64 - row_dev[a] - col_dev[b] - mean;
            }
        }
        for a in 0..q {
            h[i][a] += row_dev[a];
            h[j][a] += col_dev[a];
        }
        centered.push(zeroed);
    }

    for field in h.iter_mut() {
        let mean = field.iter().sum::<f64>() / q as f64;
        field.iter_mut().for_each(|v| *v -= mean);
    }

    let share = 1.0 / (length - 1).max(1) as f64;
    let mut out = Couplings::zeros(length, q);
    for (n, (i, j)) in pairs(length).enumerate() {
        let row = out.row_mut(n);
        for a in 0..q {
            for b in 0..q {
                row[a * q + b] =
                    (centered[n][a * q + b] + share * (h[i][a] + h[j][b])) as f32;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pairs::PairMatrix;

    fn energy(j: &Couplings, fields: &[Vec<f64>], seq: &[u8]) -> f64 {
        let mut e: f64 = fields
            .iter()
            .zip(seq)
            .map(|(h, &s)| h[s as usize])
            .sum();
        for (n, (a, b)) in pairs(seq.len()).enumerate() {
            e += j.get(n, seq[a], seq[b]) as f64;
        }
        e
    }

    #[test]
    fn energy_differences_are_preserved() {
        let (length, q) = (4, 3);
        let values: Vec<f32> = (0..6 * 9).map(|k| ((k * 7 % 11) as f32) * 0.1 - 0.4).collect();
        let j = PairMatrix::from_values(length, q, values).unwrap();
        let fields = vec![vec![0.3, -0.2, 0.1], vec![0.0; 3], vec![1.0, 0.0, -1.0], vec![0.0; 3]];
        let gauged = fieldless_gauge_even(&fields, &j);
        let zero_fields = vec![vec![0.0; q]; length];

        let seqs: [&[u8]; 3] = [&[0, 1, 2, 0], &[2, 2, 1, 0], &[1, 0, 0, 2]];
        let shift = energy(&j, &fields, seqs[0]) - energy(&gauged, &zero_fields, seqs[0]);
        for seq in &seqs[1..] {
            let d = energy(&j, &fields, seq) - energy(&gauged, &zero_fields, seq);
            assert!((d - shift).abs() < 1e-5);
        }
    }
}
