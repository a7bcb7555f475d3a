use potts_core::{derive_substream_seed, RngHandle};

const WORKER_STREAM: u64 = 0x5752_4b00_0000_0000;
const NOISE_STREAM: u64 = 0x4e4f_4953_0000_0000;
const TEMPERING_STREAM: u64 = 0x5054_0000_0000_0000;
const ROUND_STREAM: u64 = 0x524e_4400_0000_0000;
const PREOPT_STREAM: u64 = 0x5052_4500_0000_0000;
const INPUTS_STREAM: u64 = 0x494e_5000_0000_0000;

/// Seed of the MC kernel of worker `index`.
pub fn worker_seed(master_seed: u64, index: usize) -> u64 {
    derive_substream_seed(master_seed, WORKER_STREAM | index as u64)
}

/// RNG for target resampling during the Newton steps of `round`.
pub fn noise_rng(master_seed: u64, round: usize) -> RngHandle {
    RngHandle::substream(master_seed, NOISE_STREAM | round as u64)
}

/// RNG for target resampling during pre-optimization.
pub fn preopt_noise_rng(master_seed: u64) -> RngHandle {
    RngHandle::substream(master_seed, PREOPT_STREAM)
}

/// RNG for temperature assignment and exchanges.
pub fn tempering_rng(master_seed: u64) -> RngHandle {
    RngHandle::substream(master_seed, TEMPERING_STREAM)
}

/// RNG for host-side choices of `round` (start sequences, preloaded sequences).
pub fn round_rng(master_seed: u64, round: usize) -> RngHandle {
    RngHandle::substream(master_seed, ROUND_STREAM | round as u64)
}

/// RNG for generated model inputs (random start sequence, `zero`/`logscore` sequences).
pub fn inputs_rng(master_seed: u64) -> RngHandle {
    RngHandle::substream(master_seed, INPUTS_STREAM)
}
