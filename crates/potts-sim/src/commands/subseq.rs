use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use potts_mcmc::artifacts;
use potts_mcmc::determinism::inputs_rng;
use potts_mcmc::{subseq_log_freq, CpuWorker, InferenceConfig, ModelInputs};
use tracing::info;

#[derive(Args, Debug)]
pub struct SubseqArgs {
    /// YAML configuration providing the alphabet, couplings and worker count.
    #[arg(long)]
    pub config: PathBuf,
    /// Comma separated fixed positions.
    #[arg(long, value_delimiter = ',', required = true)]
    pub fixed: Vec<usize>,
    /// Background sequences whose fixed positions are substituted.
    #[arg(long)]
    pub background: PathBuf,
    /// Full-length sequences supplying the residues at the fixed positions.
    #[arg(long)]
    pub subseqs: PathBuf,
    /// Output JSON file.
    #[arg(long)]
    pub out: PathBuf,
}

pub fn run(args: &SubseqArgs) -> Result<(), Box<dyn Error>> {
    let config = InferenceConfig::load(&args.config)?;
    let mut rng = inputs_rng(config.seed_policy.master_seed);
    let inputs = ModelInputs::resolve(&config.model, None, 0, &mut rng)?;
    let background = artifacts::read_seqs(&args.background, &inputs.alphabet)?;
    let subseqs = artifacts::read_seqs(&args.subseqs, &inputs.alphabet)?;
    for (name, batch) in [("background", &background), ("subseqs", &subseqs)] {
        if batch.seq_len() != inputs.length {
            return Err(format!(
                "{name} sequences have length {}, couplings expect {}",
                batch.seq_len(),
                inputs.length
            )
            .into());
        }
    }

    let mut cluster = CpuWorker::background(
        config.workers.count,
        inputs.length,
        inputs.states(),
        background.len(),
        config.seed_policy.master_seed,
    )?;
    let report = subseq_log_freq(&mut cluster, &inputs.couplings, &background, &subseqs, &args.fixed)?;
    artifacts::write_json(&args.out, &report)?;
    info!(count = report.log_freq.len(), out = %args.out.display(), "log frequencies written");
    Ok(())
}
