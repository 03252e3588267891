mod auth;
mod commands;
mod config;
mod error;
mod models;
mod routes;
mod state;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use strongbox_core::config::StrongboxConfig;

#[derive(Parser)]
#[command(name = "strongbox-server")]
#[command(about = "Encrypted, replicated container/object store node")]
#[command(version)]
struct Cli {
    /// Path to the config directory (default: ~/.strongbox)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Passphrase for the local keyfile (or set STRONGBOX_PASSPHRASE env var).
    /// If not provided, will prompt interactively.
    #[arg(long, global = true, env = "STRONGBOX_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config, catalog and keyfile
    Init,

    /// Run the node (the default)
    Serve,

    /// Add a new current payload key; objects sealed earlier stay readable
    RotateKey,
}

/// Get passphrase from CLI arg, env var, or interactive prompt.
pub fn get_passphrase(cli_passphrase: &Option<String>) -> anyhow::Result<String> {
    if let Some(p) = cli_passphrase {
        return Ok(p.clone());
    }
    use std::io::{self, Write};
    print!("Enter passphrase: ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("strongbox=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let base_dir = match cli.config_dir {
        Some(ref dir) => dir.clone(),
        None => StrongboxConfig::default_base_dir()?,
    };

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Init => commands::init::run(&base_dir, &cli.passphrase),
        Commands::Serve => commands::serve::run(&base_dir, &cli.passphrase).await,
        Commands::RotateKey => commands::rotate_key::run(&base_dir, &cli.passphrase).await,
    }
}
