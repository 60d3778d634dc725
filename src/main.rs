//! flowdfa - workflow automaton tool
//!
//! Validates workflow graphs and walks them, either one-shot or from an
//! interactive REPL.

mod commands;
mod config;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use config::Config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flowdfa")]
#[command(about = "Validate and walk declarative workflow graphs")]
#[command(version)]
struct Cli {
    /// YAML config file
    #[arg(short, long, env = "FLOWDFA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build a graph and report its structure and pruning diagnosis
    Validate {
        /// Graph definition file (.yaml or .json)
        file: PathBuf,
    },

    /// Apply a sequence of transfers and print the resulting history
    Walk {
        /// Graph definition file (.yaml or .json)
        file: PathBuf,

        /// Start from a synthetic state with this id instead of the graph's start
        #[arg(long)]
        from: Option<String>,

        /// Successors of the synthetic --from state
        #[arg(long, value_delimiter = ',', requires = "from")]
        next: Vec<String>,

        /// Target state ids, in order
        path: Vec<String>,
    },

    /// Start an interactive session on a graph
    Repl {
        /// Graph definition file (.yaml or .json)
        file: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // An explicitly named config file must load; otherwise fall back to defaults
    let config = Config::load(cli.config.as_deref()).map_err(|e| {
        eprintln!("{}: {}", "Error".red(), e);
        e
    })?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Some(path) = &cli.config {
        tracing::debug!("Loaded config from {}", path.display());
    }

    match cli.command {
        Commands::Repl { file } => {
            repl::run(&file, &config)?;
        }
        cmd => match commands::execute(cmd, &config) {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
