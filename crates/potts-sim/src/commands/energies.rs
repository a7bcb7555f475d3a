use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use potts_mcmc::artifacts;
use potts_mcmc::determinism::inputs_rng;
use potts_mcmc::energy::sequence_energy;
use potts_mcmc::{InferenceConfig, ModelInputs};
use tracing::info;

#[derive(Args, Debug)]
pub struct EnergiesArgs {
    /// YAML configuration providing the alphabet and couplings.
    #[arg(long)]
    pub config: PathBuf,
    /// Sequence file, one sequence per line.
    #[arg(long)]
    pub seqs: PathBuf,
    /// Output JSON file.
    #[arg(long)]
    pub out: PathBuf,
}

pub fn run(args: &EnergiesArgs) -> Result<(), Box<dyn Error>> {
    let config = InferenceConfig::load(&args.config)?;
    let mut rng = inputs_rng(config.seed_policy.master_seed);
    let inputs = ModelInputs::resolve(&config.model, None, 0, &mut rng)?;
    let seqs = artifacts::read_seqs(&args.seqs, &inputs.alphabet)?;
    if seqs.seq_len() != inputs.length {
        return Err(format!(
            "sequences in {} have length {}, couplings expect {}",
            args.seqs.display(),
            seqs.seq_len(),
            inputs.length
        )
        .into());
    }

    let energies: Vec<f32> = seqs
        .iter()
        .map(|seq| sequence_energy(&inputs.couplings, seq) as f32)
        .collect();
    artifacts::write_energies(&args.out, &energies)?;
    info!(count = energies.len(), out = %args.out.display(), "energies written");
    Ok(())
}
