#![deny(missing_docs)]

//! Newton-MCMC inference of Potts model couplings.
//!
//! Rounds alternate Metropolis sampling over a cluster of compute workers
//! with quasi-Newton coupling updates evaluated by importance reweighting of
//! the round's sample.

/// Neff-weighted aggregation and discrepancy statistics.
pub mod aggregate;
/// Round directories and versioned JSON artifacts.
pub mod artifacts;
/// Fan-out over compute workers.
pub mod cluster;
/// YAML configuration schema and defaults.
pub mod config;
/// Host reference compute worker.
pub mod cpu;
/// Deterministic seed derivation helpers.
pub mod determinism;
/// Equilibration and sampling loop.
pub mod driver;
/// Potts energy functions.
pub mod energy;
/// Model input loading and `(L, q)` resolution.
pub mod inputs;
/// Run manifest and per-round metrics.
pub mod manifest;
/// Quasi-Newton coupling solver.
pub mod newton;
/// Target resampling noise.
pub mod noise;
/// Round sequencing, pre-optimization and pre-equilibration.
pub mod orchestrator;
/// Walker partitioning across workers.
pub mod partition;
/// Front/back value holder.
pub mod slot;
/// Subsequence frequencies at fixed positions.
pub mod subseq;
/// Parallel tempering controller.
pub mod tempering;
/// Compute worker contract.
pub mod worker;

pub use aggregate::{mean_bimarg, sum_counts, weighted_bimarg, Discrepancy};
pub use cluster::ComputeCluster;
pub use config::{AcceptancePolicy, InferenceConfig};
pub use cpu::{CpuWorker, WorkerLayout};
pub use driver::{McmcDriver, McmcSample, Schedule};
pub use inputs::ModelInputs;
pub use newton::{NewtonOutcome, NewtonSettings, NewtonSolver, NewtonState};
pub use noise::resample_marginals;
pub use orchestrator::{Inference, InferenceOutcome, RoundSummary};
pub use partition::divide_walkers;
pub use slot::TwoSlot;
pub use subseq::{subseq_log_freq, SubseqReport};
pub use tempering::Tempering;
pub use worker::{BufKind, Buffer, BufferData, ComputeWorker, SeqBuf, Slot};
