use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use hibrowse::cli::serve::Backend;

#[derive(Parser)]
#[command(
    name = "hibrowse",
    about = "Federated hierarchical object browser\n\nProviders expose batch queues, module trees, and catalogs as one navigable tree."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an object provider
    Serve {
        #[command(subcommand)]
        backend: Backend,
    },
    /// Browse providers interactively or run a single command
    Browse {
        /// Provider host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Provider port
        #[arg(long, default_value_t = 8888)]
        port: u16,
        /// Deep link to navigate to at startup
        #[arg(long)]
        path: Option<String>,
        /// Command to execute (if omitted, starts the REPL)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Write a .desktop shortcut for a deep link
    Shortcut {
        /// Deep link the shortcut reopens
        #[arg(long)]
        path: String,
        /// Destination .desktop file
        #[arg(long)]
        output: PathBuf,
        /// Display name (defaults to "Hierarchy Browser")
        #[arg(long)]
        name: Option<String>,
        /// Absolute icon path
        #[arg(long)]
        icon: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Commands::Serve { backend } => hibrowse::cli::serve::run(backend)?,
        Commands::Browse {
            host,
            port,
            path,
            command,
        } => hibrowse::cli::browse::run(host, port, path, command)?,
        Commands::Shortcut {
            path,
            output,
            name,
            icon,
        } => hibrowse::cli::shortcut::run(path, output, name, icon)?,
    }

    Ok(())
}
