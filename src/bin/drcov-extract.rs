use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use drcov_extract::DrCov;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "A tool to inspect and split DrCov files.", long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the coverage of one module to a new .drcov file
    Extract {
        /// Path to the input .drcov file
        input: PathBuf,
        /// Path of the .drcov file to write
        output: PathBuf,
        /// Module to keep (by name substring)
        module: String,
    },

    /// Print the coverage of one module
    Show {
        /// Path to the .drcov file
        input: PathBuf,
        /// Module to show (by name substring)
        module: String,
    },

    /// Print the coverage of every module
    ShowAll {
        /// Path to the .drcov file
        input: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load(path: &Path) -> Result<DrCov> {
    drcov_extract::from_file(path)
        .with_context(|| format!("Failed to parse DrCov file '{}'", path.display()))
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    match args.command {
        Command::Extract {
            input,
            output,
            module,
        } => {
            let coverage = load(&input)?;
            let found = coverage
                .export_module_by_name_to_file(&module, &output)
                .with_context(|| format!("Failed to write '{}'", output.display()))?;
            if !found {
                println!("{module} is not found");
            }
        }
        Command::Show { input, module } => {
            let coverage = load(&input)?;
            match coverage.export_module_by_name_to_vec(&module)? {
                Some(bytes) => {
                    let exported = DrCov::from_bytes(&bytes)
                        .context("Failed to re-read exported module")?;
                    println!("{exported}");
                }
                None => println!("{module} is not found"),
            }
        }
        Command::ShowAll { input } => {
            println!("{}", load(&input)?);
        }
    }
    Ok(())
}
