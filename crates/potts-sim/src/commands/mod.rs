pub mod energies;
pub mod infer;
pub mod mcmc;
pub mod subseq;

use std::error::Error;
use std::fs;
use std::path::Path;

use potts_core::PottsError;
use potts_mcmc::determinism::inputs_rng;
use potts_mcmc::{ComputeCluster, CpuWorker, InferenceConfig, ModelInputs};
use serde::Serialize;

/// Resolves the model inputs of `config` and builds one host worker per
/// configured compute unit.
pub fn prepare(
    config: &InferenceConfig,
) -> Result<(ModelInputs, ComputeCluster<CpuWorker>), PottsError> {
    let mut rng = inputs_rng(config.seed_policy.master_seed);
    // generated sequence sources fill the large buffers
    let nseqs = config.workers.walkers * config.sampling.samples;
    let inputs = ModelInputs::resolve(
        &config.model,
        config.newton.regularization.as_ref(),
        nseqs,
        &mut rng,
    )?;
    let cluster = CpuWorker::cluster(config, inputs.length, inputs.states())?;
    Ok((inputs, cluster))
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), Box<dyn Error>> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}
