use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use potts_mcmc::{Discrepancy, Inference, InferenceConfig};

use super::prepare;

#[derive(Args, Debug)]
pub struct McmcArgs {
    /// YAML configuration; only the sampling, worker and model sections are used.
    #[arg(long)]
    pub config: PathBuf,
    /// Output directory for the sample and the live walkers.
    #[arg(long)]
    pub out: PathBuf,
}

pub fn run(args: &McmcArgs) -> Result<(), Box<dyn Error>> {
    let config = InferenceConfig::load(&args.config)?;
    let (inputs, cluster) = prepare(&config)?;
    let target = inputs.target.clone();
    let mut inference = Inference::new(config, inputs, cluster)?.with_output(Some(args.out.clone()));
    let sample = inference.sample_once()?;

    let d = Discrepancy::between(&target, &sample.bimarg);
    println!(
        "{} sequences, ssr {:.6} ferr {:.4}, {} of {} swaps accepted",
        sample.len(),
        d.ssr,
        d.ferr,
        sample.swaps.accepted,
        sample.swaps.attempted
    );
    Ok(())
}
