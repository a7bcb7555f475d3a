use potts_core::{pair_index, Couplings};

/// Potts energy `E(s) = sum_{i<j} J_ij(s_i, s_j)`.
pub fn sequence_energy(couplings: &Couplings, seq: &[u8]) -> f64 {
    let length = seq.len();
    let mut energy = 0.0;
    let mut n = 0;
    for i in 0..length {
        for j in i + 1..length {
            energy += couplings.get(n, seq[i], seq[j]) as f64;
            n += 1;
        }
    }
    energy
}

/// Coupling between residue `a` at `pos` and residue `b` at `other`.
fn pair_term(couplings: &Couplings, pos: usize, a: u8, other: usize, b: u8) -> f32 {
    let length = couplings.length();
    if pos < other {
        couplings.get(pair_index(length, pos, other), a, b)
    } else {
        couplings.get(pair_index(length, other, pos), b, a)
    }
}

/// Energy change from setting `seq[pos]` to `residue`.
pub fn mutation_delta(couplings: &Couplings, seq: &[u8], pos: usize, residue: u8) -> f64 {
    let current = seq[pos];
    let mut delta = 0.0;
    for (other, &b) in seq.iter().enumerate() {
        if other == pos {
            continue;
        }
        delta += (pair_term(couplings, pos, residue, other, b)
            - pair_term(couplings, pos, current, other, b)) as f64;
    }
    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use potts_core::PairMatrix;

    fn couplings() -> Couplings {
        let values: Vec<f32> = (0..6 * 4).map(|k| (k as f32 * 0.37).sin()).collect();
        PairMatrix::from_values(4, 2, values).unwrap()
    }

    #[test]
    fn mutation_delta_matches_energy_difference() {
        let j = couplings();
        let seq = [0u8, 1, 1, 0];
        for pos in 0..4 {
            let mut mutated = seq;
            mutated[pos] = 1 - seq[pos];
            let expected = sequence_energy(&j, &mutated) - sequence_energy(&j, &seq);
            let delta = mutation_delta(&j, &seq, pos, mutated[pos]);
            assert!((expected - delta).abs() < 1e-6, "pos {pos}: {expected} vs {delta}");
        }
    }

    #[test]
    fn zero_couplings_give_zero_energy() {
        let j = PairMatrix::zeros(5, 3);
        assert_eq!(sequence_energy(&j, &[0, 1, 2, 1, 0]), 0.0);
    }
}
