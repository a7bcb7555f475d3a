use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use commands::{
    energies::{self, EnergiesArgs},
    infer::{self, InferArgs},
    mcmc::{self, McmcArgs},
    subseq::{self, SubseqArgs},
};

mod commands;
mod logging;

#[derive(Parser, Debug)]
#[command(name = "potts-sim", about = "Newton-MCMC inference of Potts couplings")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Silence all log output.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Also write logs to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run Newton-MCMC rounds from a configuration.
    Infer(InferArgs),
    /// Sample once under the configured couplings without updating them.
    Mcmc(McmcArgs),
    /// Compute energies of a sequence file under the configured couplings.
    Energies(EnergiesArgs),
    /// Log relative frequencies of subsequences substituted at fixed positions.
    SubseqFreq(SubseqArgs),
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    logging::setup_logging(cli.verbose, cli.quiet, cli.log_file.as_deref())?;
    match cli.command {
        Command::Infer(args) => infer::run(&args),
        Command::Mcmc(args) => mcmc::run(&args),
        Command::Energies(args) => energies::run(&args),
        Command::SubseqFreq(args) => subseq::run(&args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_the_subcommand() {
        let cli = Cli::parse_from([
            "potts-sim", "infer", "--config", "run.yaml", "--out", "out", "-vv",
        ]);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Command::Infer(ref a) if a.rounds.is_none()));
    }

    #[test]
    fn fixed_positions_split_on_commas() {
        let cli = Cli::parse_from([
            "potts-sim", "subseq-freq", "--config", "run.yaml", "--fixed", "0,3,7",
            "--background", "bg.txt", "--subseqs", "sub.txt", "--out", "logf.json",
        ]);
        assert!(matches!(cli.command, Command::SubseqFreq(ref a) if a.fixed == [0, 3, 7]));
    }
}
