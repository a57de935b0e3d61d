use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod client;
mod setup;

#[derive(Parser)]
#[command(name = "vouch", version, about = "Vouch identity and liveness verification")]
struct Cli {
    /// Base URL of the running vouchd
    #[arg(long, global = true, default_value = "http://127.0.0.1:5000")]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download and verify the face models
    Setup {
        /// Target directory (default: system or per-user model dir)
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },
    /// Request a new gesture challenge
    Challenge {
        /// Write the reference picture and description card here
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Verify the current camera frame against the active challenge
    Capture,
    /// Show the current verification state
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = client::Client::new(&cli.url);

    match cli.command {
        Command::Setup { model_dir } => setup::run(model_dir),
        Command::Challenge { save } => client::challenge(&client, save.as_deref()),
        Command::Capture => {
            if !client::capture(&client)? {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Status => client::status(&client),
    }
}
