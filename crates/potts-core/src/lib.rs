#![deny(missing_docs)]
#![doc = "Core data types for Potts coupling inference: pair tables, sequences, errors and seeding."]

pub mod errors;
pub mod gauge;
pub mod pairs;
pub mod provenance;
pub mod rng;
pub mod seqs;

pub use errors::{ErrorInfo, PottsError};
pub use gauge::fieldless_gauge_even;
pub use pairs::{
    indep_bimarg, num_pairs, pair_index, pairs, shape_from_param_shape, unimarg, Bimarg,
    Couplings, PairMatrix, PRIOR_PSEUDOCOUNT,
};
pub use provenance::{RunProvenance, SchemaVersion};
pub use rng::{derive_substream_seed, RngHandle};
pub use seqs::{Alphabet, SeqBatch};
