use potts_core::errors::ErrorInfo;
use potts_core::{PairMatrix, PottsError, SeqBatch};
use tracing::debug;

use crate::worker::{Buffer, BufferData, ComputeWorker, SeqBuf};

/// Fan-out over every compute worker of a run.
///
/// Collective operations are issued to every worker before any blocking
/// read, so workers overlap their queued work.
#[derive(Debug)]
pub struct ComputeCluster<W> {
    workers: Vec<W>,
    partition: Vec<usize>,
}

impl<W: ComputeWorker> ComputeCluster<W> {
    /// Wraps `workers`; the partition is read from their live buffer sizes.
    pub fn new(workers: Vec<W>) -> Result<Self, PottsError> {
        if workers.is_empty() {
            return Err(PottsError::config("workers", "at least one worker is required"));
        }
        let partition = workers.iter().map(|w| w.nseq(SeqBuf::Main)).collect();
        Ok(Self { workers, partition })
    }

    /// Number of workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Always false for a constructed cluster.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Live walkers per worker.
    pub fn partition(&self) -> &[usize] {
        &self.partition
    }

    /// Total live walkers.
    pub fn total_walkers(&self) -> usize {
        self.partition.iter().sum()
    }

    /// Capacity of `buf` summed over workers.
    pub fn total_seqs(&self, buf: SeqBuf) -> usize {
        self.workers.iter().map(|w| w.nseq(buf)).sum()
    }

    /// Borrow the workers.
    pub fn workers(&self) -> &[W] {
        &self.workers
    }

    /// Consumes the cluster.
    pub fn into_workers(self) -> Vec<W> {
        self.workers
    }

    /// Issues `op` to every worker in order.
    pub fn for_each<F>(&mut self, mut op: F) -> Result<(), PottsError>
    where
        F: FnMut(&mut W) -> Result<(), PottsError>,
    {
        for (index, worker) in self.workers.iter_mut().enumerate() {
            op(worker).map_err(|err| tag_worker(err, index))?;
        }
        Ok(())
    }

    /// Writes the same payload to every worker.
    pub fn broadcast(&mut self, name: Buffer, data: &BufferData) -> Result<(), PottsError> {
        self.for_each(|w| w.set_buf(name, data.clone()))
    }

    /// Writes one payload per worker.
    pub fn scatter(&mut self, name: Buffer, parts: Vec<BufferData>) -> Result<(), PottsError> {
        if parts.len() != self.workers.len() {
            return Err(PottsError::Consistency(
                ErrorInfo::new("scatter-count", "one payload per worker is required")
                    .with_context("workers", self.workers.len())
                    .with_context("payloads", parts.len()),
            ));
        }
        for (index, (worker, part)) in self.workers.iter_mut().zip(parts).enumerate() {
            worker.set_buf(name, part).map_err(|err| tag_worker(err, index))?;
        }
        Ok(())
    }

    /// Sets the inverse temperature of every live walker.
    pub fn scatter_betas(&mut self, betas: Vec<Vec<f32>>) -> Result<(), PottsError> {
        self.scatter(Buffer::Betas, betas.into_iter().map(BufferData::Values).collect())
    }

    /// Sets the sample mask of every worker's live walkers.
    pub fn mark_seqs(&mut self, masks: &[Vec<bool>]) -> Result<(), PottsError> {
        if masks.len() != self.workers.len() {
            return Err(PottsError::Consistency(
                ErrorInfo::new("scatter-count", "one mask per worker is required")
                    .with_context("workers", self.workers.len())
                    .with_context("masks", masks.len()),
            ));
        }
        for (index, (worker, mask)) in self.workers.iter_mut().zip(masks).enumerate() {
            worker.mark_seqs(mask).map_err(|err| tag_worker(err, index))?;
        }
        Ok(())
    }

    /// One kernel call on every worker.
    pub fn run_all(&mut self) -> Result<(), PottsError> {
        self.for_each(|w| w.run_mcmc())
    }

    /// Blocks until every worker drained its queue.
    pub fn wait_all(&mut self) -> Result<(), PottsError> {
        self.for_each(|w| w.wait())
    }

    /// Reads `name` from every worker.
    pub fn gather(&mut self, name: Buffer) -> Result<Vec<BufferData>, PottsError> {
        let mut out = Vec::with_capacity(self.workers.len());
        for (index, worker) in self.workers.iter_mut().enumerate() {
            out.push(worker.get_buf(name).map_err(|err| tag_worker(err, index))?);
        }
        Ok(out)
    }

    /// Reads a pair table from every worker.
    pub fn gather_pairs(&mut self, name: Buffer) -> Result<Vec<PairMatrix>, PottsError> {
        self.gather(name)?
            .into_iter()
            .map(BufferData::into_pairs)
            .collect()
    }

    /// Reads per-walker or per-sequence scalars from every worker.
    pub fn gather_values(&mut self, name: Buffer) -> Result<Vec<Vec<f32>>, PottsError> {
        self.gather(name)?
            .into_iter()
            .map(BufferData::into_values)
            .collect()
    }

    /// Reads a sequence buffer from every worker.
    pub fn gather_seqs(&mut self, buf: SeqBuf) -> Result<Vec<SeqBatch>, PottsError> {
        self.gather(Buffer::Seqs(buf))?
            .into_iter()
            .map(BufferData::into_seqs)
            .collect()
    }

    /// Reads the pair counts from every worker.
    pub fn gather_counts(&mut self) -> Result<Vec<Vec<u32>>, PottsError> {
        self.gather(Buffer::Bicount)?
            .into_iter()
            .map(BufferData::into_counts)
            .collect()
    }

    /// Reads the effective sample size from every worker.
    pub fn gather_neff(&mut self) -> Result<Vec<f64>, PottsError> {
        self.gather(Buffer::Neff)?
            .into_iter()
            .map(BufferData::into_scalar)
            .collect()
    }

    /// Reads a pair table from the first worker.
    ///
    /// Pair tables written by broadcasts and per-worker updates are
    /// value-identical across workers.
    pub fn read_pairs(&mut self, name: Buffer) -> Result<PairMatrix, PottsError> {
        self.workers[0]
            .get_buf(name)
            .and_then(BufferData::into_pairs)
            .map_err(|err| tag_worker(err, 0))
    }

    /// Splits `seqs` across the workers' `buf` buffers.
    ///
    /// The total must equal the summed buffer capacity.
    pub fn load_seqs(&mut self, buf: SeqBuf, seqs: &SeqBatch) -> Result<(), PottsError> {
        let sizes: Vec<usize> = self.workers.iter().map(|w| w.nseq(buf)).collect();
        let parts = seqs.split(&sizes)?;
        debug!(?buf, total = seqs.len(), workers = sizes.len(), "loading sequences");
        self.scatter(
            Buffer::Seqs(buf),
            parts.into_iter().map(BufferData::Seqs).collect(),
        )
    }
}

fn tag_worker(err: PottsError, index: usize) -> PottsError {
    let tag = |info: ErrorInfo| {
        if info.context.contains_key("worker") {
            info
        } else {
            info.with_context("worker", index)
        }
    };
    match err {
        PottsError::Config(info) => PottsError::Config(tag(info)),
        PottsError::Divergence(info) => PottsError::Divergence(tag(info)),
        PottsError::Consistency(info) => PottsError::Consistency(tag(info)),
        PottsError::Worker(info) => PottsError::Worker(tag(info)),
        PottsError::Serde(info) => PottsError::Serde(tag(info)),
    }
}
