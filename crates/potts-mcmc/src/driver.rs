use potts_core::errors::ErrorInfo;
use potts_core::{Bimarg, Couplings, PottsError, SeqBatch};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::aggregate::{mean_bimarg, sum_counts};
use crate::cluster::ComputeCluster;
use crate::config::SamplingConfig;
use crate::tempering::{SwapStats, Tempering};
use crate::worker::{Buffer, BufferData, ComputeWorker, SeqBuf, Slot};

/// Kernel-call schedule of one sampling run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Calls before the first snapshot.
    pub equil: usize,
    /// Calls between snapshots.
    pub interval: usize,
    /// Snapshots of every walker.
    pub samples: usize,
    /// Live marginals are recorded every this many equilibration calls (0 disables).
    pub track_every: usize,
}

impl Schedule {
    /// Schedule from the sampling section of a configuration.
    pub fn from_config(config: &SamplingConfig) -> Self {
        Self {
            equil: config.equil_time,
            interval: config.sample_time,
            samples: config.samples,
            track_every: config.track_equil,
        }
    }

    fn validate(&self) -> Result<(), PottsError> {
        if self.samples == 0 {
            return Err(PottsError::config("samples", "samples must be at least 1"));
        }
        if self.track_every != 0 && self.equil % self.track_every != 0 {
            return Err(PottsError::Config(
                ErrorInfo::new("track-equil", "track_equil must be a divisor of equil_time")
                    .with_context("track_equil", self.track_every)
                    .with_context("equil_time", self.equil),
            ));
        }
        Ok(())
    }
}

/// Result of one sampling run.
#[derive(Debug, Clone)]
pub struct McmcSample {
    /// Unweighted mean of the per-worker marginals of the large buffers.
    pub bimarg: Bimarg,
    /// Summed pair counts.
    pub bicount: Vec<u32>,
    /// Energies of every sampled sequence under the sampling couplings.
    pub energies: Vec<f32>,
    /// Sampled sequences, one batch per worker.
    pub seqs: Vec<SeqBatch>,
    /// Live marginals recorded during equilibration.
    pub equilibration: Vec<Bimarg>,
    /// Accumulated tempering exchange counts.
    pub swaps: SwapStats,
}

impl McmcSample {
    /// Sequence `index` of the concatenated sample.
    pub fn seq(&self, mut index: usize) -> Option<&[u8]> {
        for batch in &self.seqs {
            if index < batch.len() {
                return Some(batch.get(index));
            }
            index -= batch.len();
        }
        None
    }

    /// Total number of sampled sequences.
    pub fn len(&self) -> usize {
        self.seqs.iter().map(SeqBatch::len).sum()
    }

    /// True when nothing was sampled.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drives equilibration and sampling over a cluster.
pub struct McmcDriver<'a, W> {
    cluster: &'a mut ComputeCluster<W>,
    tempering: Option<&'a mut Tempering>,
    swaps: SwapStats,
}

impl<'a, W: ComputeWorker> McmcDriver<'a, W> {
    /// Driver over `cluster`, with an optional tempering controller.
    pub fn new(cluster: &'a mut ComputeCluster<W>, tempering: Option<&'a mut Tempering>) -> Self {
        Self {
            cluster,
            tempering,
            swaps: SwapStats::default(),
        }
    }

    /// One kernel call on every worker, then a swap pass when tempering.
    fn step(&mut self) -> Result<(), PottsError> {
        self.cluster.run_all()?;
        if let Some(pt) = self.tempering.as_deref_mut() {
            let stats = pt.swap(self.cluster)?;
            self.swaps.attempted += stats.attempted;
            self.swaps.accepted += stats.accepted;
        }
        Ok(())
    }

    /// `calls` iterations with fixed couplings and no recording.
    pub fn equilibrate(&mut self, calls: usize) -> Result<(), PottsError> {
        for _ in 0..calls {
            self.step()?;
        }
        self.cluster.wait_all()
    }

    /// Samples under `couplings` following `schedule`.
    pub fn run(&mut self, couplings: &Couplings, schedule: &Schedule) -> Result<McmcSample, PottsError> {
        schedule.validate()?;
        self.cluster
            .broadcast(Buffer::Couplings(Slot::Main), &BufferData::Pairs(couplings.clone()))?;

        let mut equilibration = Vec::new();
        if schedule.track_every == 0 {
            for _ in 0..schedule.equil {
                self.step()?;
            }
        } else {
            for j in 0..schedule.equil / schedule.track_every {
                for _ in 0..schedule.track_every {
                    self.step()?;
                }
                self.cluster.for_each(|w| w.calc_bimarg(SeqBuf::Main))?;
                let live = mean_bimarg(&self.cluster.gather_pairs(Buffer::Bimarg(Slot::Main))?)?;
                debug!(block = j, "recorded equilibration marginals");
                equilibration.push(live);
            }
        }

        let partition = self.cluster.partition().to_vec();
        self.cluster.for_each(|w| w.store_seqs(0))?;
        for j in 1..schedule.samples {
            for _ in 0..schedule.interval {
                self.step()?;
            }
            let mut index = 0;
            self.cluster.for_each(|w| {
                let offset = j * partition[index];
                index += 1;
                w.store_seqs(offset)
            })?;
        }

        self.cluster.for_each(|w| {
            w.calc_bimarg(SeqBuf::Large)?;
            w.calc_energies(SeqBuf::Large, Slot::Main)
        })?;
        let bimarg = mean_bimarg(&self.cluster.gather_pairs(Buffer::Bimarg(Slot::Main))?)?;
        let bicount = sum_counts(&self.cluster.gather_counts()?)?;
        let energies = self
            .cluster
            .gather_values(Buffer::Energies(SeqBuf::Large))?
            .concat();
        let seqs = self.cluster.gather_seqs(SeqBuf::Large)?;
        info!(
            sequences = energies.len(),
            swaps_accepted = self.swaps.accepted,
            "sampling finished"
        );
        Ok(McmcSample {
            bimarg,
            bicount,
            energies,
            seqs,
            equilibration,
            swaps: self.swaps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::{CpuWorker, WorkerLayout};
    use potts_core::PairMatrix;

    fn cluster() -> ComputeCluster<CpuWorker> {
        let layout = WorkerLayout {
            length: 3,
            states: 2,
            walkers: 4,
            samples: 3,
            steps_per_call: 4,
        };
        let workers = (0..2)
            .map(|i| CpuWorker::new(i, layout, 11 + i as u64).unwrap())
            .collect();
        ComputeCluster::new(workers).unwrap()
    }

    #[test]
    fn tracking_records_one_snapshot_per_block() {
        let mut cluster = cluster();
        cluster.for_each(|w| w.fill_seqs(&[0, 1, 0])).unwrap();
        let schedule = Schedule {
            equil: 4,
            interval: 1,
            samples: 3,
            track_every: 2,
        };
        let sample = McmcDriver::new(&mut cluster, None)
            .run(&PairMatrix::zeros(3, 2), &schedule)
            .unwrap();
        assert_eq!(sample.equilibration.len(), 2);
        assert_eq!(sample.len(), 2 * 4 * 3);
        assert_eq!(sample.energies.len(), sample.len());
        assert_eq!(sample.bicount.iter().sum::<u32>(), 24 * 3);
    }

    #[test]
    fn schedule_rejects_partial_tracking_blocks() {
        let schedule = Schedule {
            equil: 5,
            interval: 1,
            samples: 2,
            track_every: 2,
        };
        let err = McmcDriver::new(&mut cluster(), None)
            .run(&PairMatrix::zeros(3, 2), &schedule)
            .unwrap_err();
        assert_eq!(err.info().code, "track-equil");
    }

    #[test]
    fn sample_indices_run_across_worker_batches() {
        let first = SeqBatch::filled(&[0, 0, 0], 2);
        let second = SeqBatch::filled(&[1, 1, 1], 3);
        let sample = McmcSample {
            bimarg: PairMatrix::zeros(3, 2),
            bicount: Vec::new(),
            energies: Vec::new(),
            seqs: vec![first, second],
            equilibration: Vec::new(),
            swaps: SwapStats::default(),
        };
        assert_eq!(sample.len(), 5);
        assert_eq!(sample.seq(1), Some(&[0u8, 0, 0][..]));
        assert_eq!(sample.seq(2), Some(&[1u8, 1, 1][..]));
        assert_eq!(sample.seq(5), None);
    }
}
