use potts_core::errors::ErrorInfo;
use potts_core::{PairMatrix, PottsError, SeqBatch};
use serde::{Deserialize, Serialize};

/// Which copy of a pair table an operation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    /// Couplings used for sampling, or marginals of the last sample.
    Main,
    /// Trial values.
    Front,
    /// Last accepted values.
    Back,
}

/// Double-buffered quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufKind {
    /// Couplings `J`.
    Couplings,
    /// Bivariate marginals.
    Bimarg,
}

/// Sequence buffer class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeqBuf {
    /// Live walkers (the "small" buffer).
    Main,
    /// Accumulated samples, a multiple of the walker count.
    Large,
}

/// Named worker buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Buffer {
    /// Coupling table in a slot.
    Couplings(Slot),
    /// Marginal table in a slot.
    Bimarg(Slot),
    /// Target marginals used by the coupling update.
    BimargTarget,
    /// Inverse temperature of every live walker.
    Betas,
    /// Inverse temperature each large-buffer sequence was drawn at.
    SampleBetas,
    /// Sequence buffer.
    Seqs(SeqBuf),
    /// Energies of a sequence buffer.
    Energies(SeqBuf),
    /// Raw pair counts of the last marginal computation.
    Bicount,
    /// Effective sample size of the last reweighting.
    Neff,
    /// Importance weights of the last reweighting.
    Weights,
}

/// Payload moved in and out of worker buffers.
#[derive(Debug, Clone, PartialEq)]
pub enum BufferData {
    /// Pair table.
    Pairs(PairMatrix),
    /// Per-walker or per-sequence scalars.
    Values(Vec<f32>),
    /// Sequences.
    Seqs(SeqBatch),
    /// Pair counts.
    Counts(Vec<u32>),
    /// Single scalar.
    Scalar(f64),
}

fn kind_mismatch(expected: &str, found: &BufferData) -> PottsError {
    let found = match found {
        BufferData::Pairs(_) => "pairs",
        BufferData::Values(_) => "values",
        BufferData::Seqs(_) => "seqs",
        BufferData::Counts(_) => "counts",
        BufferData::Scalar(_) => "scalar",
    };
    PottsError::Worker(
        ErrorInfo::new("buffer-kind", "buffer payload has the wrong kind")
            .with_context("expected", expected)
            .with_context("found", found),
    )
}

impl BufferData {
    /// Unwraps a pair table.
    pub fn into_pairs(self) -> Result<PairMatrix, PottsError> {
        match self {
            BufferData::Pairs(m) => Ok(m),
            other => Err(kind_mismatch("pairs", &other)),
        }
    }

    /// Unwraps scalars.
    pub fn into_values(self) -> Result<Vec<f32>, PottsError> {
        match self {
            BufferData::Values(v) => Ok(v),
            other => Err(kind_mismatch("values", &other)),
        }
    }

    /// Unwraps sequences.
    pub fn into_seqs(self) -> Result<SeqBatch, PottsError> {
        match self {
            BufferData::Seqs(s) => Ok(s),
            other => Err(kind_mismatch("seqs", &other)),
        }
    }

    /// Unwraps pair counts.
    pub fn into_counts(self) -> Result<Vec<u32>, PottsError> {
        match self {
            BufferData::Counts(c) => Ok(c),
            other => Err(kind_mismatch("counts", &other)),
        }
    }

    /// Unwraps a scalar.
    pub fn into_scalar(self) -> Result<f64, PottsError> {
        match self {
            BufferData::Scalar(x) => Ok(x),
            other => Err(kind_mismatch("scalar", &other)),
        }
    }
}

/// Operations the inference core issues to one compute unit.
///
/// Kernel operations are submitted without blocking; results become visible
/// at the next [`ComputeWorker::wait`] or buffer read on the same worker.
pub trait ComputeWorker {
    /// Capacity of a sequence buffer.
    fn nseq(&self, buf: SeqBuf) -> usize;

    /// Overwrites a named buffer.
    fn set_buf(&mut self, name: Buffer, data: BufferData) -> Result<(), PottsError>;

    /// Synchronous read of a named buffer.
    fn get_buf(&mut self, name: Buffer) -> Result<BufferData, PottsError>;

    /// Advances the live walkers by one kernel call of MC steps.
    fn run_mcmc(&mut self) -> Result<(), PottsError>;

    /// Energies of `seqs` under the couplings in `couplings`, stored in `Energies(seqs)`.
    fn calc_energies(&mut self, seqs: SeqBuf, couplings: Slot) -> Result<(), PottsError>;

    /// Marginals and pair counts of `seqs`, stored in `Bimarg(Main)` and `Bicount`.
    fn calc_bimarg(&mut self, seqs: SeqBuf) -> Result<(), PottsError>;

    /// `J_front = J_back - gamma (target - f_back) / (f_back + damping)`.
    fn update_j(&mut self, gamma: f64, damping: f64) -> Result<(), PottsError>;

    /// [`ComputeWorker::update_j`] with an added `-gamma * reg * sign(J_back)` term.
    fn update_j_weightfn(
        &mut self,
        gamma: f64,
        damping: f64,
        reg: &PairMatrix,
    ) -> Result<(), PottsError>;

    /// Reweights the large sample to the trial couplings, filling
    /// `Bimarg(Front)`, `Weights` and `Neff`.
    fn perturb_marg(&mut self) -> Result<(), PottsError>;

    /// Exchanges front and back.
    fn swap_buf(&mut self, kind: BufKind) -> Result<(), PottsError>;

    /// Commits the trial: back <- front.
    fn store_buf(&mut self, kind: BufKind) -> Result<(), PottsError>;

    /// Copies one pair table buffer into another.
    fn copy_buf(&mut self, src: Buffer, dst: Buffer) -> Result<(), PottsError>;

    /// Sets every live walker to `seq`.
    fn fill_seqs(&mut self, seq: &[u8]) -> Result<(), PottsError>;

    /// Snapshots the live walkers into the large buffer at sequence offset `offset`.
    fn store_seqs(&mut self, offset: usize) -> Result<(), PottsError>;

    /// Flags live walkers whose samples count toward marginals.
    fn mark_seqs(&mut self, mask: &[bool]) -> Result<(), PottsError>;

    /// Flags positions held fixed by the MC kernel.
    fn mark_pos(&mut self, mask: &[bool]) -> Result<(), PottsError>;

    /// Writes the residues of `seq` at the fixed positions into every
    /// sequence of the large buffer.
    fn copy_subseq(&mut self, seq: &[u8]) -> Result<(), PottsError>;

    /// Blocks until every submitted operation completed.
    fn wait(&mut self) -> Result<(), PottsError>;

    /// Diagnostic hook without semantic effect.
    fn log_profile(&self) {}
}
