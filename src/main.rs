use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use emergent_selfish::config::ExperimentConfig;
use emergent_selfish::error::Result;
use emergent_selfish::{results, train};

#[derive(Parser, Debug)]
#[command(about = "Sender/receiver signalling game experiments", allow_negative_numbers = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one training run
    Train {
        /// JSON experiment config; defaults are used when absent
        #[arg(long, short = 'f')]
        config: Option<PathBuf>,

        /// `key.path=value` overrides, applied in order
        #[arg(long = "set", short = 'p')]
        overrides: Vec<String>,
    },
    /// Collect the best run per bias into a results folder
    Generate {
        #[arg(long)]
        experiment_name: String,

        #[arg(long)]
        results_dir: PathBuf,

        #[arg(long)]
        output_dir: PathBuf,
    },
    /// Print the best run under a directory
    Check { dir: PathBuf },
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Train { config, overrides } => {
            let config = match config {
                Some(path) => ExperimentConfig::load(path)?,
                None => ExperimentConfig::default(),
            }
            .apply_overrides(&overrides)?;
            tracing::info!("operative config:\n{}", serde_json::to_string_pretty(&config)?);
            train::train(config)?;
        }
        Command::Generate {
            experiment_name,
            results_dir,
            output_dir,
        } => {
            let folder = results::generate_results_folder(&experiment_name, results_dir, output_dir)?;
            tracing::info!("results written to {}", folder.display());
        }
        Command::Check { dir } => {
            let summary = results::metric_over_runs(&dir)?;
            match summary.best {
                Some((score, name)) => println!("{} {}", score, name),
                None => println!("no results in {}", dir.display()),
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
