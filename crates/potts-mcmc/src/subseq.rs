use potts_core::errors::ErrorInfo;
use potts_core::{Couplings, PottsError, SchemaVersion, SeqBatch};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::artifacts::SCHEMA_VERSION;
use crate::cluster::ComputeCluster;
use crate::worker::{Buffer, BufferData, ComputeWorker, SeqBuf, Slot};

/// Log relative frequencies of a set of subsequences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubseqReport {
    /// Artifact schema version.
    pub schema_version: SchemaVersion,
    /// Fixed positions the subsequences occupy.
    pub positions: Vec<usize>,
    /// One entry per subsequence.
    pub log_freq: Vec<f64>,
}

/// Position mask with `positions` set.
pub fn fixed_mask(length: usize, positions: &[usize]) -> Result<Vec<bool>, PottsError> {
    if positions.is_empty() {
        return Err(PottsError::config("fixed-positions", "at least one fixed position is required"));
    }
    let mut mask = vec![false; length];
    for &p in positions {
        if p >= length {
            return Err(PottsError::Config(
                ErrorInfo::new("fixed-positions", "fixed position outside the sequence")
                    .with_context("position", p)
                    .with_context("length", length),
            ));
        }
        mask[p] = true;
    }
    Ok(mask)
}

/// `log(sum(exp(x)))` without overflow; `-inf` for an empty slice.
pub fn logsumexp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// For every subsequence, `logsumexp(E_orig - E_sub)` over the background
/// sequences, where `E_sub` is the energy after substituting the
/// subsequence's residues at `positions`.
pub fn subseq_log_freq<W: ComputeWorker>(
    cluster: &mut ComputeCluster<W>,
    couplings: &Couplings,
    background: &SeqBatch,
    subseqs: &SeqBatch,
    positions: &[usize],
) -> Result<SubseqReport, PottsError> {
    let mask = fixed_mask(couplings.length(), positions)?;
    cluster.broadcast(Buffer::Couplings(Slot::Main), &BufferData::Pairs(couplings.clone()))?;
    cluster.load_seqs(SeqBuf::Large, background)?;
    cluster.for_each(|w| {
        w.mark_pos(&mask)?;
        w.calc_energies(SeqBuf::Large, Slot::Main)
    })?;
    let original = cluster.gather_values(Buffer::Energies(SeqBuf::Large))?.concat();
    info!(
        background = original.len(),
        subseqs = subseqs.len(),
        fixed = positions.len(),
        "computing substituted energies"
    );

    let mut log_freq = Vec::with_capacity(subseqs.len());
    for (n, sub) in subseqs.iter().enumerate() {
        cluster.for_each(|w| {
            w.copy_subseq(sub)?;
            w.calc_energies(SeqBuf::Large, Slot::Main)
        })?;
        let energies = cluster.gather_values(Buffer::Energies(SeqBuf::Large))?.concat();
        let diffs: Vec<f64> = original
            .iter()
            .zip(&energies)
            .map(|(&e0, &e)| e0 as f64 - e as f64)
            .collect();
        let value = logsumexp(&diffs);
        debug!(subseq = n, log_freq = value, "substituted");
        log_freq.push(value);
    }
    Ok(SubseqReport {
        schema_version: SCHEMA_VERSION,
        positions: positions.to_vec(),
        log_freq,
    })
}
