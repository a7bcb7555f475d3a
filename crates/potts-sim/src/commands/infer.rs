use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::Args;
use potts_mcmc::artifacts::RoundDir;
use potts_mcmc::{Inference, InferenceConfig};
use tracing::info;

use super::{prepare, write_json};

#[derive(Args, Debug)]
pub struct InferArgs {
    /// YAML configuration describing the inference run.
    #[arg(long)]
    pub config: PathBuf,
    /// Output directory for round directories, metrics and manifest.
    #[arg(long)]
    pub out: PathBuf,
    /// Override the configured number of rounds.
    #[arg(long)]
    pub rounds: Option<usize>,
    /// Override the configured master seed.
    #[arg(long)]
    pub seed: Option<u64>,
}

pub fn run(args: &InferArgs) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(&args.out)?;
    let mut config = InferenceConfig::load(&args.config)?;
    if let Some(rounds) = args.rounds {
        config.newton.rounds = rounds;
    }
    if let Some(seed) = args.seed {
        config.seed_policy.master_seed = seed;
    }

    let (inputs, cluster) = prepare(&config)?;
    let alphabet = inputs.alphabet.clone();
    let mut inference = Inference::new(config, inputs, cluster)?.with_output(Some(args.out.clone()));
    let outcome = inference.run()?;

    RoundDir::create(&args.out, "final")?.write_model(
        &outcome.couplings,
        &outcome.startseq,
        &alphabet,
    )?;
    write_json(&args.out.join("summary.json"), &outcome.rounds)?;

    if let Some(last) = outcome.rounds.last() {
        info!(
            rounds = outcome.rounds.len(),
            ssr = last.discrepancy.ssr,
            ferr = last.discrepancy.ferr,
            "inference finished"
        );
        println!(
            "{} rounds, last sample ssr {:.6} ferr {:.4}",
            outcome.rounds.len(),
            last.discrepancy.ssr,
            last.discrepancy.ferr
        );
    }
    Ok(())
}
