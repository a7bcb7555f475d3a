use potts_core::errors::ErrorInfo;
use potts_core::{Bimarg, Couplings, PairMatrix, PottsError, RngHandle, SeqBatch};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cluster::ComputeCluster;
use crate::config::InferenceConfig;
use crate::determinism::worker_seed;
use crate::energy::{mutation_delta, sequence_energy};
use crate::partition::divide_walkers;
use crate::slot::TwoSlot;
use crate::worker::{BufKind, Buffer, BufferData, ComputeWorker, SeqBuf, Slot};

/// Buffer geometry of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerLayout {
    /// Sequence length `L`.
    pub length: usize,
    /// Alphabet size `q`.
    pub states: usize,
    /// Live walkers on this worker.
    pub walkers: usize,
    /// Snapshots held by the large buffer.
    pub samples: usize,
    /// Metropolis steps per walker per kernel call.
    pub steps_per_call: usize,
}

/// Host implementation of [`ComputeWorker`] using single-site Metropolis moves.
///
/// Kernel calls are queued by [`ComputeWorker::run_mcmc`] and executed at the
/// next synchronization point, so a cluster loop that issues one call per
/// worker behaves like asynchronous submission.
#[derive(Debug, Clone)]
pub struct CpuWorker {
    index: usize,
    layout: WorkerLayout,
    rng: RngHandle,
    couplings_main: Couplings,
    couplings: TwoSlot<Couplings>,
    bimarg_main: Bimarg,
    bimarg: TwoSlot<Bimarg>,
    target: Bimarg,
    betas: Vec<f32>,
    marks: Vec<bool>,
    fixed: Vec<bool>,
    seqs: SeqBatch,
    large: SeqBatch,
    large_betas: Vec<f32>,
    large_marks: Vec<bool>,
    energies: Vec<f32>,
    large_energies: Vec<f32>,
    bicount: Vec<u32>,
    neff: f64,
    weights: Vec<f32>,
    pending: usize,
    kernel_calls: u64,
}

impl CpuWorker {
    /// Worker `index` with all buffers zeroed and every walker at `beta = 1`.
    pub fn new(index: usize, layout: WorkerLayout, seed: u64) -> Result<Self, PottsError> {
        if layout.length < 2 || layout.states == 0 || layout.walkers == 0 || layout.samples == 0 {
            return Err(PottsError::Config(
                ErrorInfo::new("worker-layout", "worker layout has an empty dimension")
                    .with_context("worker", index)
                    .with_context("length", layout.length)
                    .with_context("states", layout.states)
                    .with_context("walkers", layout.walkers)
                    .with_context("samples", layout.samples),
            ));
        }
        let zeros = PairMatrix::zeros(layout.length, layout.states);
        let nlarge = layout.walkers * layout.samples;
        let blank = vec![0u8; layout.length];
        Ok(Self {
            index,
            layout,
            rng: RngHandle::from_seed(seed),
            couplings_main: zeros.clone(),
            couplings: TwoSlot::new(zeros.clone()),
            bimarg_main: zeros.clone(),
            bimarg: TwoSlot::new(zeros.clone()),
            target: zeros,
            betas: vec![1.0; layout.walkers],
            marks: vec![true; layout.walkers],
            fixed: vec![false; layout.length],
            seqs: SeqBatch::filled(&blank, layout.walkers),
            large: SeqBatch::filled(&blank, nlarge),
            large_betas: vec![1.0; nlarge],
            large_marks: vec![true; nlarge],
            energies: vec![0.0; layout.walkers],
            large_energies: vec![0.0; nlarge],
            bicount: vec![0; layout.length * (layout.length - 1) / 2 * layout.states * layout.states],
            neff: 0.0,
            weights: vec![0.0; nlarge],
            pending: 0,
            kernel_calls: 0,
        })
    }

    /// One worker per configured compute unit, walkers split evenly.
    pub fn cluster(
        config: &InferenceConfig,
        length: usize,
        states: usize,
    ) -> Result<ComputeCluster<CpuWorker>, PottsError> {
        let w = &config.workers;
        let shares = divide_walkers(w.walkers, w.count, w.workgroup_size)?;
        let workers = shares
            .into_iter()
            .enumerate()
            .map(|(index, walkers)| {
                let layout = WorkerLayout {
                    length,
                    states,
                    walkers,
                    samples: config.sampling.samples,
                    steps_per_call: w.steps_per_call,
                };
                CpuWorker::new(index, layout, worker_seed(config.seed_policy.master_seed, index))
            })
            .collect::<Result<Vec<_>, _>>()?;
        ComputeCluster::new(workers)
    }

    /// Workers holding `background` sequences in their large buffers, one
    /// live walker each, for energy evaluation without sampling.
    pub fn background(
        count: usize,
        length: usize,
        states: usize,
        background: usize,
        master_seed: u64,
    ) -> Result<ComputeCluster<CpuWorker>, PottsError> {
        let shares = divide_walkers(background, count, 1)?;
        let workers = shares
            .into_iter()
            .enumerate()
            .map(|(index, samples)| {
                let layout = WorkerLayout {
                    length,
                    states,
                    walkers: 1,
                    samples,
                    steps_per_call: 1,
                };
                CpuWorker::new(index, layout, worker_seed(master_seed, index))
            })
            .collect::<Result<Vec<_>, _>>()?;
        ComputeCluster::new(workers)
    }

    /// Worker index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Buffer geometry.
    pub fn layout(&self) -> &WorkerLayout {
        &self.layout
    }

    /// Kernel calls executed so far.
    pub fn kernel_calls(&self) -> u64 {
        self.kernel_calls
    }

    /// Kernel calls submitted but not yet executed.
    pub fn pending_calls(&self) -> usize {
        self.pending
    }

    fn flush(&mut self) {
        if self.pending == 0 {
            return;
        }
        let free: Vec<usize> = (0..self.layout.length).filter(|&p| !self.fixed[p]).collect();
        let q = self.layout.states;
        let calls = std::mem::take(&mut self.pending);
        for _ in 0..calls {
            self.kernel_calls += 1;
            if free.is_empty() || q < 2 {
                continue;
            }
            for walker in 0..self.layout.walkers {
                let beta = self.betas[walker] as f64;
                for _ in 0..self.layout.steps_per_call {
                    let pos = free[self.rng.index(free.len())];
                    let seq = self.seqs.get(walker);
                    let current = seq[pos] as usize;
                    let mut proposal = self.rng.index(q - 1);
                    if proposal >= current {
                        proposal += 1;
                    }
                    let delta = mutation_delta(&self.couplings_main, seq, pos, proposal as u8);
                    if delta <= 0.0 || self.rng.uniform() < (-beta * delta).exp() {
                        self.seqs.get_mut(walker)[pos] = proposal as u8;
                    }
                }
            }
        }
    }

    fn pairs_slot(&self, kind: BufKind, slot: Slot) -> &PairMatrix {
        match (kind, slot) {
            (BufKind::Couplings, Slot::Main) => &self.couplings_main,
            (BufKind::Couplings, Slot::Front) => self.couplings.front(),
            (BufKind::Couplings, Slot::Back) => self.couplings.back(),
            (BufKind::Bimarg, Slot::Main) => &self.bimarg_main,
            (BufKind::Bimarg, Slot::Front) => self.bimarg.front(),
            (BufKind::Bimarg, Slot::Back) => self.bimarg.back(),
        }
    }

    fn write_pairs(&mut self, kind: BufKind, slot: Slot, value: PairMatrix) {
        match (kind, slot) {
            (BufKind::Couplings, Slot::Main) => self.couplings_main = value,
            (BufKind::Couplings, Slot::Front) => self.couplings.set_front(value),
            (BufKind::Couplings, Slot::Back) => self.couplings.set_back(value),
            (BufKind::Bimarg, Slot::Main) => self.bimarg_main = value,
            (BufKind::Bimarg, Slot::Front) => self.bimarg.set_front(value),
            (BufKind::Bimarg, Slot::Back) => self.bimarg.set_back(value),
        }
    }

    fn check_pairs(&self, name: Buffer, value: &PairMatrix) -> Result<(), PottsError> {
        if value.length() != self.layout.length || value.states() != self.layout.states {
            return Err(PottsError::Consistency(
                ErrorInfo::new("pair-shape", "pair table does not match the worker layout")
                    .with_context("buffer", format!("{name:?}"))
                    .with_context("expected", format!("L={} q={}", self.layout.length, self.layout.states))
                    .with_context("found", format!("L={} q={}", value.length(), value.states())),
            ));
        }
        Ok(())
    }

    fn check_len(&self, what: &str, expected: usize, found: usize) -> Result<(), PottsError> {
        if expected != found {
            return Err(PottsError::Consistency(
                ErrorInfo::new(
                    "buffer-size",
                    format!("expected {expected} entries for {what}, got {found}"),
                )
                .with_context("worker", self.index),
            ));
        }
        Ok(())
    }

    fn batch(&self, buf: SeqBuf) -> (&SeqBatch, &[bool]) {
        match buf {
            SeqBuf::Main => (&self.seqs, &self.marks),
            SeqBuf::Large => (&self.large, &self.large_marks),
        }
    }

    fn slot_of(name: Buffer) -> Option<(BufKind, Slot)> {
        match name {
            Buffer::Couplings(slot) => Some((BufKind::Couplings, slot)),
            Buffer::Bimarg(slot) => Some((BufKind::Bimarg, slot)),
            _ => None,
        }
    }

    fn next_j(&self, gamma: f64, damping: f64, reg: Option<&PairMatrix>) -> Couplings {
        let j_back = self.couplings.back();
        let bi_back = self.bimarg.back();
        let mut front = j_back.clone();
        let values = front.values_mut();
        for (k, v) in values.iter_mut().enumerate() {
            let j = j_back.values()[k] as f64;
            let f = bi_back.values()[k] as f64;
            let t = self.target.values()[k] as f64;
            let mut next = j - gamma * (t - f) / (f + damping);
            if let Some(reg) = reg {
                let sign = if j > 0.0 {
                    1.0
                } else if j < 0.0 {
                    -1.0
                } else {
                    0.0
                };
                next -= gamma * reg.values()[k] as f64 * sign;
            }
            *v = next as f32;
        }
        front
    }
}

impl ComputeWorker for CpuWorker {
    fn nseq(&self, buf: SeqBuf) -> usize {
        match buf {
            SeqBuf::Main => self.layout.walkers,
            SeqBuf::Large => self.layout.walkers * self.layout.samples,
        }
    }

    fn set_buf(&mut self, name: Buffer, data: BufferData) -> Result<(), PottsError> {
        self.flush();
        match name {
            Buffer::Couplings(_) | Buffer::Bimarg(_) | Buffer::BimargTarget => {
                let value = data.into_pairs()?;
                self.check_pairs(name, &value)?;
                match Self::slot_of(name) {
                    Some((kind, slot)) => self.write_pairs(kind, slot, value),
                    None => self.target = value,
                }
            }
            Buffer::Betas => {
                let betas = data.into_values()?;
                self.check_len("betas", self.layout.walkers, betas.len())?;
                self.betas = betas;
            }
            Buffer::SampleBetas => {
                let betas = data.into_values()?;
                self.check_len("sample betas", self.nseq(SeqBuf::Large), betas.len())?;
                self.large_betas = betas;
            }
            Buffer::Seqs(buf) => {
                let seqs = data.into_seqs()?;
                self.check_len("sequence length", self.layout.length, seqs.seq_len())?;
                self.check_len("sequences", self.nseq(buf), seqs.len())?;
                match buf {
                    SeqBuf::Main => self.seqs = seqs,
                    SeqBuf::Large => {
                        // loaded samples count as drawn at beta = 1 until told otherwise
                        self.large = seqs;
                        self.large_betas.fill(1.0);
                        self.large_marks.fill(true);
                    }
                }
            }
            Buffer::Energies(_) | Buffer::Bicount | Buffer::Neff | Buffer::Weights => {
                return Err(PottsError::Worker(
                    ErrorInfo::new("buffer-readonly", "buffer is written by kernels only")
                        .with_context("buffer", format!("{name:?}"))
                        .with_context("worker", self.index),
                ));
            }
        }
        Ok(())
    }

    fn get_buf(&mut self, name: Buffer) -> Result<BufferData, PottsError> {
        self.flush();
        Ok(match name {
            Buffer::Couplings(slot) => BufferData::Pairs(self.pairs_slot(BufKind::Couplings, slot).clone()),
            Buffer::Bimarg(slot) => BufferData::Pairs(self.pairs_slot(BufKind::Bimarg, slot).clone()),
            Buffer::BimargTarget => BufferData::Pairs(self.target.clone()),
            Buffer::Betas => BufferData::Values(self.betas.clone()),
            Buffer::SampleBetas => BufferData::Values(self.large_betas.clone()),
            Buffer::Seqs(SeqBuf::Main) => BufferData::Seqs(self.seqs.clone()),
            Buffer::Seqs(SeqBuf::Large) => BufferData::Seqs(self.large.clone()),
            Buffer::Energies(SeqBuf::Main) => BufferData::Values(self.energies.clone()),
            Buffer::Energies(SeqBuf::Large) => BufferData::Values(self.large_energies.clone()),
            Buffer::Bicount => BufferData::Counts(self.bicount.clone()),
            Buffer::Neff => BufferData::Scalar(self.neff),
            Buffer::Weights => BufferData::Values(self.weights.clone()),
        })
    }

    fn run_mcmc(&mut self) -> Result<(), PottsError> {
        self.pending += 1;
        Ok(())
    }

    fn calc_energies(&mut self, seqs: SeqBuf, couplings: Slot) -> Result<(), PottsError> {
        self.flush();
        let j = self.pairs_slot(BufKind::Couplings, couplings);
        let (batch, _) = self.batch(seqs);
        let energies: Vec<f32> = batch.iter().map(|s| sequence_energy(j, s) as f32).collect();
        match seqs {
            SeqBuf::Main => self.energies = energies,
            SeqBuf::Large => self.large_energies = energies,
        }
        Ok(())
    }

    fn calc_bimarg(&mut self, seqs: SeqBuf) -> Result<(), PottsError> {
        self.flush();
        let (length, q) = (self.layout.length, self.layout.states);
        let (batch, marks) = self.batch(seqs);
        let mut counts = vec![0u32; self.bicount.len()];
        let mut used = 0u64;
        for (seq, _) in batch.iter().zip(marks).filter(|&(_, &m)| m) {
            used += 1;
            let mut n = 0;
            for i in 0..length {
                for j in i + 1..length {
                    counts[n * q * q + seq[i] as usize * q + seq[j] as usize] += 1;
                    n += 1;
                }
            }
        }
        if used == 0 {
            return Err(PottsError::Consistency(
                ErrorInfo::new("no-marked-seqs", "no marked sequences to count")
                    .with_context("buffer", format!("{seqs:?}"))
                    .with_context("worker", self.index),
            ));
        }
        let values = counts.iter().map(|&c| (c as f64 / used as f64) as f32).collect();
        self.bimarg_main = PairMatrix::from_values(length, q, values)?;
        self.bicount = counts;
        Ok(())
    }

    fn update_j(&mut self, gamma: f64, damping: f64) -> Result<(), PottsError> {
        self.flush();
        let front = self.next_j(gamma, damping, None);
        self.couplings.set_front(front);
        Ok(())
    }

    fn update_j_weightfn(
        &mut self,
        gamma: f64,
        damping: f64,
        reg: &PairMatrix,
    ) -> Result<(), PottsError> {
        self.flush();
        self.check_pairs(Buffer::Couplings(Slot::Front), reg)?;
        let front = self.next_j(gamma, damping, Some(reg));
        self.couplings.set_front(front);
        Ok(())
    }

    fn perturb_marg(&mut self) -> Result<(), PottsError> {
        self.flush();
        let (length, q) = (self.layout.length, self.layout.states);
        let trial = self.couplings.front();
        let nlarge = self.large.len();

        let mut logw = vec![f64::NEG_INFINITY; nlarge];
        let mut max_logw = f64::NEG_INFINITY;
        let mut any_nan = false;
        for (k, seq) in self.large.iter().enumerate() {
            if !self.large_marks[k] {
                continue;
            }
            let delta = sequence_energy(trial, seq) - self.large_energies[k] as f64;
            let lw = -(self.large_betas[k] as f64) * delta;
            if lw.is_nan() {
                any_nan = true;
            }
            logw[k] = lw;
            if lw > max_logw {
                max_logw = lw;
            }
        }

        let mut weights = vec![0.0f64; nlarge];
        if max_logw.is_finite() {
            for (w, lw) in weights.iter_mut().zip(&logw) {
                *w = (lw - max_logw).exp();
            }
        }
        let sum: f64 = weights.iter().sum();
        let sum_sq: f64 = weights.iter().map(|w| w * w).sum();
        self.neff = if any_nan || max_logw == f64::INFINITY {
            f64::NAN
        } else if sum == 0.0 {
            0.0
        } else {
            sum * sum / sum_sq
        };

        let mut marg = vec![0.0f64; self.bicount.len()];
        if sum > 0.0 {
            for (k, seq) in self.large.iter().enumerate() {
                let w = weights[k] / sum;
                if w == 0.0 {
                    continue;
                }
                let mut n = 0;
                for i in 0..length {
                    for j in i + 1..length {
                        marg[n * q * q + seq[i] as usize * q + seq[j] as usize] += w;
                        n += 1;
                    }
                }
            }
        }
        let front = PairMatrix::from_values(length, q, marg.into_iter().map(|v| v as f32).collect())?;
        self.bimarg.set_front(front);
        self.weights = weights.into_iter().map(|w| w as f32).collect();
        Ok(())
    }

    fn swap_buf(&mut self, kind: BufKind) -> Result<(), PottsError> {
        self.flush();
        match kind {
            BufKind::Couplings => self.couplings.swap(),
            BufKind::Bimarg => self.bimarg.swap(),
        }
        Ok(())
    }

    fn store_buf(&mut self, kind: BufKind) -> Result<(), PottsError> {
        self.flush();
        match kind {
            BufKind::Couplings => self.couplings.commit(),
            BufKind::Bimarg => self.bimarg.commit(),
        }
        Ok(())
    }

    fn copy_buf(&mut self, src: Buffer, dst: Buffer) -> Result<(), PottsError> {
        self.flush();
        let (Some((src_kind, src_slot)), Some((dst_kind, dst_slot))) =
            (Self::slot_of(src), Self::slot_of(dst))
        else {
            return Err(PottsError::Worker(
                ErrorInfo::new("buffer-copy", "only pair table buffers can be copied")
                    .with_context("src", format!("{src:?}"))
                    .with_context("dst", format!("{dst:?}")),
            ));
        };
        let value = self.pairs_slot(src_kind, src_slot).clone();
        self.write_pairs(dst_kind, dst_slot, value);
        Ok(())
    }

    fn fill_seqs(&mut self, seq: &[u8]) -> Result<(), PottsError> {
        self.flush();
        self.check_len("sequence length", self.layout.length, seq.len())?;
        if let Some(&bad) = seq.iter().find(|&&s| s as usize >= self.layout.states) {
            return Err(PottsError::Consistency(
                ErrorInfo::new("seq-state", "residue index outside the alphabet")
                    .with_context("residue", bad)
                    .with_context("states", self.layout.states),
            ));
        }
        self.seqs = SeqBatch::filled(seq, self.layout.walkers);
        Ok(())
    }

    fn store_seqs(&mut self, offset: usize) -> Result<(), PottsError> {
        self.flush();
        self.large.write_at(offset, &self.seqs)?;
        let end = offset + self.layout.walkers;
        self.large_betas[offset..end].copy_from_slice(&self.betas);
        self.large_marks[offset..end].copy_from_slice(&self.marks);
        Ok(())
    }

    fn mark_seqs(&mut self, mask: &[bool]) -> Result<(), PottsError> {
        self.flush();
        self.check_len("walker mask", self.layout.walkers, mask.len())?;
        self.marks = mask.to_vec();
        Ok(())
    }

    fn mark_pos(&mut self, mask: &[bool]) -> Result<(), PottsError> {
        self.flush();
        self.check_len("position mask", self.layout.length, mask.len())?;
        self.fixed = mask.to_vec();
        Ok(())
    }

    fn copy_subseq(&mut self, seq: &[u8]) -> Result<(), PottsError> {
        self.flush();
        self.check_len("sequence length", self.layout.length, seq.len())?;
        let fixed: Vec<usize> = (0..self.layout.length).filter(|&p| self.fixed[p]).collect();
        for k in 0..self.large.len() {
            let target = self.large.get_mut(k);
            for &p in &fixed {
                target[p] = seq[p];
            }
        }
        Ok(())
    }

    fn wait(&mut self) -> Result<(), PottsError> {
        self.flush();
        Ok(())
    }

    fn log_profile(&self) {
        debug!(
            worker = self.index,
            kernel_calls = self.kernel_calls,
            pending = self.pending,
            walkers = self.layout.walkers,
            steps_per_call = self.layout.steps_per_call,
            "cpu worker profile"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(walkers: usize, samples: usize) -> WorkerLayout {
        WorkerLayout {
            length: 4,
            states: 2,
            walkers,
            samples,
            steps_per_call: 16,
        }
    }

    #[test]
    fn kernel_calls_run_at_synchronization_points() {
        let mut w = CpuWorker::new(0, layout(4, 1), 3).unwrap();
        w.run_mcmc().unwrap();
        w.run_mcmc().unwrap();
        assert_eq!((w.pending_calls(), w.kernel_calls()), (2, 0));
        w.wait().unwrap();
        assert_eq!((w.pending_calls(), w.kernel_calls()), (0, 2));
    }

    #[test]
    fn fixed_positions_never_change() {
        let mut w = CpuWorker::new(0, layout(8, 1), 5).unwrap();
        w.fill_seqs(&[1, 0, 1, 0]).unwrap();
        w.mark_pos(&[true, false, true, false]).unwrap();
        for _ in 0..10 {
            w.run_mcmc().unwrap();
        }
        let seqs = w.get_buf(Buffer::Seqs(SeqBuf::Main)).unwrap().into_seqs().unwrap();
        assert!(seqs.iter().all(|s| s[0] == 1 && s[2] == 1));
    }

    #[test]
    fn bimarg_counts_only_marked_walkers() {
        let mut w = CpuWorker::new(0, layout(2, 1), 1).unwrap();
        let seqs = SeqBatch::from_rows(4, vec![vec![0, 0, 0, 0], vec![1, 1, 1, 1]]).unwrap();
        w.set_buf(Buffer::Seqs(SeqBuf::Main), BufferData::Seqs(seqs)).unwrap();
        w.mark_seqs(&[true, false]).unwrap();
        w.calc_bimarg(SeqBuf::Main).unwrap();
        let bimarg = w.get_buf(Buffer::Bimarg(Slot::Main)).unwrap().into_pairs().unwrap();
        assert!(bimarg.rows().all(|r| r == [1.0, 0.0, 0.0, 0.0]));
        w.mark_seqs(&[false, false]).unwrap();
        assert_eq!(w.calc_bimarg(SeqBuf::Main).unwrap_err().info().code, "no-marked-seqs");
    }

    #[test]
    fn reweighting_with_unchanged_couplings_reproduces_sample_marginals() {
        let mut w = CpuWorker::new(0, layout(4, 2), 9).unwrap();
        w.fill_seqs(&[0, 1, 0, 1]).unwrap();
        for offset in [0, 4] {
            w.run_mcmc().unwrap();
            w.store_seqs(offset).unwrap();
        }
        w.calc_bimarg(SeqBuf::Large).unwrap();
        w.calc_energies(SeqBuf::Large, Slot::Main).unwrap();
        w.copy_buf(Buffer::Couplings(Slot::Main), Buffer::Couplings(Slot::Front)).unwrap();
        w.perturb_marg().unwrap();
        let neff = w.get_buf(Buffer::Neff).unwrap().into_scalar().unwrap();
        assert!((neff - 8.0).abs() < 1e-9);
        let sample = w.get_buf(Buffer::Bimarg(Slot::Main)).unwrap().into_pairs().unwrap();
        let trial = w.get_buf(Buffer::Bimarg(Slot::Front)).unwrap().into_pairs().unwrap();
        assert!(sample.ssr(&trial) < 1e-10);
    }

    #[test]
    fn swap_and_store_move_couplings_between_slots() {
        let mut w = CpuWorker::new(0, layout(4, 1), 2).unwrap();
        let mut j = PairMatrix::zeros(4, 2);
        j.values_mut()[0] = 0.5;
        w.set_buf(Buffer::Couplings(Slot::Front), BufferData::Pairs(j.clone())).unwrap();
        w.swap_buf(BufKind::Couplings).unwrap();
        let back = w.get_buf(Buffer::Couplings(Slot::Back)).unwrap().into_pairs().unwrap();
        assert_eq!(back, j);
        w.swap_buf(BufKind::Couplings).unwrap();
        w.store_buf(BufKind::Couplings).unwrap();
        let back = w.get_buf(Buffer::Couplings(Slot::Back)).unwrap().into_pairs().unwrap();
        assert_eq!(back, j);
    }

    #[test]
    fn regularized_update_pulls_couplings_toward_zero() {
        let mut w = CpuWorker::new(0, layout(4, 1), 2).unwrap();
        let mut j = PairMatrix::zeros(4, 2);
        j.values_mut()[..3].copy_from_slice(&[0.2, -0.3, 0.0]);
        let mut f = PairMatrix::from_values(4, 2, vec![0.25; 24]).unwrap();
        f.values_mut()[..2].copy_from_slice(&[0.5, 0.1]);
        let target = PairMatrix::from_values(4, 2, vec![0.25; 24]).unwrap();
        let reg = PairMatrix::from_values(4, 2, vec![0.1; 24]).unwrap();
        w.set_buf(Buffer::Couplings(Slot::Back), BufferData::Pairs(j)).unwrap();
        w.set_buf(Buffer::Bimarg(Slot::Back), BufferData::Pairs(f)).unwrap();
        w.set_buf(Buffer::BimargTarget, BufferData::Pairs(target)).unwrap();

        let (gamma, damping) = (0.1, 0.01);
        w.update_j_weightfn(gamma, damping, &reg).unwrap();
        let front = w.get_buf(Buffer::Couplings(Slot::Front)).unwrap().into_pairs().unwrap();
        let expected = [
            0.2 - gamma * (0.25 - 0.5) / (0.5 + damping) - gamma * 0.1,
            -0.3 - gamma * (0.25 - 0.1) / (0.1 + damping) + gamma * 0.1,
            0.0,
        ];
        for (got, want) in front.values().iter().zip(expected) {
            assert!((*got as f64 - want).abs() < 1e-6, "{got} vs {want}");
        }

        w.update_j(gamma, damping).unwrap();
        let plain = w.get_buf(Buffer::Couplings(Slot::Front)).unwrap().into_pairs().unwrap();
        assert!((plain.values()[0] - front.values()[0] - 0.01).abs() < 1e-6);
    }

    #[test]
    fn loaded_samples_are_reweighted_at_their_sample_beta() {
        let mut w = CpuWorker::new(0, layout(1, 2), 1).unwrap();
        let seqs = SeqBatch::from_rows(4, vec![vec![0; 4], vec![1; 4]]).unwrap();
        w.set_buf(Buffer::SampleBetas, BufferData::Values(vec![0.2; 2])).unwrap();
        w.set_buf(Buffer::Seqs(SeqBuf::Large), BufferData::Seqs(seqs)).unwrap();
        let betas = w.get_buf(Buffer::SampleBetas).unwrap().into_values().unwrap();
        assert_eq!(betas, vec![1.0, 1.0]);

        w.set_buf(Buffer::SampleBetas, BufferData::Values(vec![0.5; 2])).unwrap();
        w.calc_energies(SeqBuf::Large, Slot::Main).unwrap();
        let mut trial = PairMatrix::zeros(4, 2);
        trial.values_mut()[0] = 1.0;
        w.set_buf(Buffer::Couplings(Slot::Front), BufferData::Pairs(trial)).unwrap();
        w.perturb_marg().unwrap();

        // only the all-zero sequence pays J01(0, 0) = 1
        let front = w.get_buf(Buffer::Bimarg(Slot::Front)).unwrap().into_pairs().unwrap();
        let expected = (-0.5f64).exp() / (1.0 + (-0.5f64).exp());
        assert!((front.get(0, 0, 0) as f64 - expected).abs() < 1e-6);
        assert!(w.set_buf(Buffer::SampleBetas, BufferData::Values(vec![1.0; 3])).is_err());
    }

    #[test]
    fn subsequences_overwrite_only_fixed_positions() {
        let mut w = CpuWorker::new(0, layout(1, 3), 4).unwrap();
        let rows = vec![vec![0, 0, 0, 0], vec![1, 1, 1, 1], vec![0, 1, 0, 1]];
        let large = SeqBatch::from_rows(4, rows).unwrap();
        w.set_buf(Buffer::Seqs(SeqBuf::Large), BufferData::Seqs(large)).unwrap();
        w.mark_pos(&[false, true, false, true]).unwrap();
        w.copy_subseq(&[1, 0, 1, 0]).unwrap();
        let large = w.get_buf(Buffer::Seqs(SeqBuf::Large)).unwrap().into_seqs().unwrap();
        assert_eq!(large.get(0), &[0, 0, 0, 0]);
        assert_eq!(large.get(1), &[1, 0, 1, 0]);
        assert_eq!(large.get(2), &[0, 0, 0, 0]);
        assert!(w.copy_subseq(&[1, 0]).is_err());
    }

    #[test]
    fn outputs_cannot_be_written() {
        let mut w = CpuWorker::new(0, layout(4, 1), 2).unwrap();
        let err = w.set_buf(Buffer::Neff, BufferData::Scalar(1.0)).unwrap_err();
        assert!(matches!(err, PottsError::Worker(_)));
        let err = w.set_buf(Buffer::Betas, BufferData::Values(vec![1.0; 3])).unwrap_err();
        assert!(matches!(err, PottsError::Consistency(_)));
    }
}
