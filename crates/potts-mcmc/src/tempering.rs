use potts_core::errors::ErrorInfo;
use potts_core::{PottsError, RngHandle};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cluster::ComputeCluster;
use crate::config::{LadderPolicy, TemperingConfig};
use crate::worker::{Buffer, ComputeWorker, SeqBuf, Slot};

/// Builds the inverse temperature ladder. The first entry is `beta0`.
pub fn build_ladder(policy: &LadderPolicy) -> Result<Vec<f32>, PottsError> {
    let ladder = match policy {
        LadderPolicy::Manual { betas } => betas.clone(),
        LadderPolicy::Geometric {
            levels,
            beta0,
            ratio,
        } => {
            if *ratio <= 1.0 {
                return Err(PottsError::Config(
                    ErrorInfo::new("tempering-ratio", "geometric ladder ratio must exceed 1")
                        .with_context("ratio", ratio),
                ));
            }
            let mut beta = *beta0;
            let mut ladder = Vec::with_capacity(*levels);
            for _ in 0..*levels {
                ladder.push(beta);
                beta /= ratio;
            }
            ladder
        }
    };
    if ladder.is_empty() {
        return Err(PottsError::config(
            "tempering-ladder",
            "temperature ladder needs at least one level",
        ));
    }
    if let Some(bad) = ladder.iter().find(|b| !(b.is_finite() && **b > 0.0)) {
        return Err(PottsError::Config(
            ErrorInfo::new("tempering-ladder", "inverse temperatures must be positive")
                .with_context("beta", bad),
        ));
    }
    for (k, beta) in ladder.iter().enumerate() {
        if ladder[..k].contains(beta) {
            return Err(PottsError::Config(
                ErrorInfo::new("tempering-ladder", "inverse temperatures must be distinct")
                    .with_context("beta", beta),
            ));
        }
    }
    Ok(ladder)
}

/// Fails unless `levels` evenly divides `walkers`.
pub fn check_divides(levels: usize, walkers: usize) -> Result<(), PottsError> {
    if levels == 0 || walkers % levels != 0 {
        return Err(PottsError::Config(
            ErrorInfo::new(
                "tempering-divisibility",
                "number of temperature levels must evenly divide the walker count",
            )
            .with_context("levels", levels)
            .with_context("walkers", walkers),
        ));
    }
    Ok(())
}

/// Metropolis acceptance for exchanging the temperatures of two walkers.
pub fn exchange_acceptance(beta_a: f32, energy_a: f32, beta_b: f32, energy_b: f32) -> f64 {
    let exponent = (beta_a as f64 - beta_b as f64) * (energy_a as f64 - energy_b as f64);
    exponent.exp().min(1.0)
}

/// Outcome of one swap pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapStats {
    /// Exchange attempts.
    pub attempted: usize,
    /// Accepted exchanges.
    pub accepted: usize,
}

/// Parallel tempering controller.
#[derive(Debug, Clone)]
pub struct Tempering {
    ladder: Vec<f32>,
    swaps: usize,
    rng: RngHandle,
}

impl Tempering {
    /// Builds the controller from its configuration.
    pub fn new(config: &TemperingConfig, rng: RngHandle) -> Result<Self, PottsError> {
        Self::with_ladder(build_ladder(&config.ladder)?, config.swaps, rng)
    }

    /// Builds the controller from an explicit ladder.
    pub fn with_ladder(ladder: Vec<f32>, swaps: usize, rng: RngHandle) -> Result<Self, PottsError> {
        build_ladder(&LadderPolicy::Manual {
            betas: ladder.clone(),
        })?;
        Ok(Self { ladder, swaps, rng })
    }

    /// The inverse temperature ladder.
    pub fn ladder(&self) -> &[f32] {
        &self.ladder
    }

    /// Reference inverse temperature whose walkers are sampled.
    pub fn beta0(&self) -> f32 {
        self.ladder[0]
    }

    /// Assigns one inverse temperature to every walker.
    ///
    /// Each level receives `walkers / levels` walkers; the contiguous groups
    /// are shuffled across all walkers and then split by `partition`.
    pub fn assign(&mut self, partition: &[usize]) -> Result<Vec<Vec<f32>>, PottsError> {
        let walkers: usize = partition.iter().sum();
        check_divides(self.ladder.len(), walkers)?;
        let per_level = walkers / self.ladder.len();
        let mut betas: Vec<f32> = self
            .ladder
            .iter()
            .flat_map(|&beta| std::iter::repeat(beta).take(per_level))
            .collect();
        betas.shuffle(self.rng.inner_mut());

        let mut out = Vec::with_capacity(partition.len());
        let mut start = 0;
        for &share in partition {
            out.push(betas[start..start + share].to_vec());
            start += share;
        }
        Ok(out)
    }

    /// Flags walkers at the reference temperature.
    pub fn marks(&self, betas: &[f32]) -> Vec<bool> {
        let beta0 = self.beta0();
        betas.iter().map(|&b| b == beta0).collect()
    }

    /// Attempts up to the configured number of exchanges between walkers on
    /// adjacent levels, permuting `betas` in place.
    pub fn swap_pass(&mut self, betas: &mut [f32], energies: &[f32]) -> SwapStats {
        let mut stats = SwapStats::default();
        let levels = self.ladder.len();
        if levels < 2 {
            return stats;
        }
        let mut members: Vec<Vec<usize>> = vec![Vec::new(); levels];
        for (walker, beta) in betas.iter().enumerate() {
            if let Some(level) = self.ladder.iter().position(|b| b == beta) {
                members[level].push(walker);
            }
        }

        for _ in 0..self.swaps {
            let level = self.rng.index(levels - 1);
            if members[level].is_empty() || members[level + 1].is_empty() {
                continue;
            }
            let ia = self.rng.index(members[level].len());
            let ib = self.rng.index(members[level + 1].len());
            let a = members[level][ia];
            let b = members[level + 1][ib];
            stats.attempted += 1;
            let acceptance = exchange_acceptance(betas[a], energies[a], betas[b], energies[b]);
            if self.rng.uniform() < acceptance {
                betas.swap(a, b);
                members[level][ia] = b;
                members[level + 1][ib] = a;
                stats.accepted += 1;
            }
        }
        stats
    }

    /// Assigns the ladder to the live walkers of every worker and marks the
    /// reference-temperature walkers.
    pub fn install<W: ComputeWorker>(
        &mut self,
        cluster: &mut ComputeCluster<W>,
    ) -> Result<(), PottsError> {
        let betas = self.assign(cluster.partition())?;
        let marks: Vec<Vec<bool>> = betas.iter().map(|b| self.marks(b)).collect();
        cluster.scatter_betas(betas)?;
        cluster.mark_seqs(&marks)
    }

    /// Swap pass over the whole cluster after a full iteration block.
    pub fn swap<W: ComputeWorker>(
        &mut self,
        cluster: &mut ComputeCluster<W>,
    ) -> Result<SwapStats, PottsError> {
        cluster.for_each(|w| w.calc_energies(SeqBuf::Main, Slot::Main))?;
        let energies: Vec<f32> = cluster
            .gather_values(Buffer::Energies(SeqBuf::Main))?
            .concat();
        let mut betas: Vec<f32> = cluster.gather_values(Buffer::Betas)?.concat();
        let stats = self.swap_pass(&mut betas, &energies);
        debug!(
            attempted = stats.attempted,
            accepted = stats.accepted,
            "tempering swap pass"
        );

        let shares = split_by(&betas, cluster.partition());
        let marks: Vec<Vec<bool>> = shares.iter().map(|b| self.marks(b)).collect();
        cluster.scatter_betas(shares)?;
        cluster.mark_seqs(&marks)?;
        Ok(stats)
    }
}

fn split_by(values: &[f32], partition: &[usize]) -> Vec<Vec<f32>> {
    let mut out = Vec::with_capacity(partition.len());
    let mut start = 0;
    for &share in partition {
        out.push(values[start..start + share].to_vec());
        start += share;
    }
    out
}
