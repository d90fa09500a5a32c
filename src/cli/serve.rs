//! The `serve` subcommand: run one provider back-end over TCP.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand};

use crate::backends::accounts::{AccountsSource, System};
use crate::backends::catalog::CatalogSource;
use crate::backends::home::HomeSource;
use crate::backends::modules::ModulesSource;
use crate::backends::noco::{NocoSource, read_config};
use crate::backends::slurm::SlurmSource;
use crate::provider::{ObjectSource, ProviderOptions, ProviderServer};

#[derive(Debug, Args)]
pub struct ListenArgs {
    /// Host to bind
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8888)]
    pub port: u16,
    /// Override the advertised root name
    #[arg(long)]
    pub root_name: Option<String>,
    /// Directory of *.png icon resources
    #[arg(long, default_value = "resources")]
    pub resources: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum Backend {
    /// Slurm batch system: partitions and their jobs
    Slurm {
        #[command(flatten)]
        listen: ListenArgs,
        /// Apply ROT13 to user names in listings
        #[arg(long)]
        scramble_users: bool,
    },
    /// Lmod-style software module tree
    Modules {
        #[command(flatten)]
        listen: ListenArgs,
        /// Root directory of the module tree
        #[arg(long)]
        module_root: PathBuf,
    },
    /// The caller's home directory
    Home {
        #[command(flatten)]
        listen: ListenArgs,
    },
    /// A directory of JSON object files
    Catalog {
        #[command(flatten)]
        listen: ListenArgs,
        /// Directory holding the object files
        #[arg(long)]
        objects_dir: PathBuf,
    },
    /// Systems reachable by the caller, probed over ssh
    Accounts {
        #[command(flatten)]
        listen: ListenArgs,
        /// System to probe, as Name=hostname (repeatable)
        #[arg(long = "system")]
        systems: Vec<String>,
    },
    /// A NocoDB instance: tables and records
    Noco {
        #[command(flatten)]
        listen: ListenArgs,
        /// key=value config file with baseURL and Token1
        #[arg(long, default_value = "./config.dat")]
        config: PathBuf,
    },
}

/// Build the selected back-end and serve it forever.
pub fn run(backend: Backend) -> Result<()> {
    let (listen, options, source) = build(backend)?;
    let server = Arc::new(ProviderServer::new(options, source));
    let rt = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
    rt.block_on(server.serve(&listen.host, listen.port))
}

fn build(backend: Backend) -> Result<(ListenArgs, ProviderOptions, Arc<dyn ObjectSource>)> {
    match backend {
        Backend::Slurm {
            listen,
            scramble_users,
        } => {
            let options = options_for(&listen, "Slurm Batch System").badge_icons(["Job.png"]);
            Ok((listen, options, Arc::new(SlurmSource::new(scramble_users))))
        }
        Backend::Modules {
            listen,
            module_root,
        } => {
            let options = options_for(&listen, "Available Software").badge_icons(["Software.png"]);
            Ok((listen, options, Arc::new(ModulesSource::new(module_root))))
        }
        Backend::Home { listen } => {
            let options = options_for(&listen, "Home Directory");
            Ok((listen, options, Arc::new(HomeSource::new()?)))
        }
        Backend::Catalog {
            listen,
            objects_dir,
        } => {
            let options = options_for(&listen, "Research Computing");
            Ok((listen, options, Arc::new(CatalogSource::new(objects_dir))))
        }
        Backend::Accounts { listen, systems } => {
            let mut parsed = Vec::new();
            for spec in &systems {
                match System::parse(spec) {
                    Some(system) => parsed.push(system),
                    None => bail!("invalid --system '{spec}', expected Name=hostname"),
                }
            }
            let options = options_for(&listen, "Accounts");
            Ok((listen, options, Arc::new(AccountsSource::new(parsed))))
        }
        Backend::Noco { listen, config } => {
            let config = read_config(&config)?;
            let options = options_for(&listen, "NocoDB");
            Ok((listen, options, Arc::new(NocoSource::new(config)?)))
        }
    }
}

fn options_for(listen: &ListenArgs, default_name: &str) -> ProviderOptions {
    ProviderOptions::new(
        listen.root_name.as_deref().unwrap_or(default_name),
        listen.resources.clone(),
    )
}
