//! Command-line surface.

pub mod doctor;
mod service;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::service::{HttpServiceRegistry, ServicesStore};
use crate::settings::Settings;
use crate::wallet::RpcBalanceOracle;

#[derive(Parser, Debug)]
#[command(
    name = "olas-operate",
    version,
    about = "Provision, fund, and run a staked agent service"
)]
pub struct Cli {
    /// TOML config file layered over ~/.olas-operate/settings.json.
    #[arg(long, global = true, env = "OPERATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List deployable service templates.
    Templates,

    /// Provision a service from a template, waiting until it is funded.
    Spawn {
        /// Template hash (see `templates`).
        template: String,

        /// Chain RPC endpoint the service is built against.
        #[arg(long)]
        rpc: String,

        /// Stake the service (default when the template supports staking).
        #[arg(long, conflicts_with = "no_staking")]
        staking: bool,

        /// Run without staking.
        #[arg(long)]
        no_staking: bool,
    },

    /// Start (deploy) the managed service.
    Start {
        /// Wait for the operator wallet to reach the start minimum first.
        #[arg(long)]
        wait: bool,
    },

    /// Pause the managed service.
    Stop,

    /// Show services, wallet balance, and staking position.
    Status,

    /// Update a service to the latest version of its template.
    Update {
        /// Service hash.
        service: String,
    },

    /// Delete a service.
    Delete {
        /// Service hash.
        service: String,
    },

    /// Inspect or change persisted settings.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Probe the backend and chain RPC endpoint.
    Doctor {
        /// Exit with an error when any check fails.
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    /// List all settings.
    List,
    /// Print one setting by dotted path (e.g. `chain.rpc_url`).
    Get { path: String },
    /// Set one setting by dotted path.
    Set { path: String, value: String },
    /// Reset one setting to its default.
    Reset { path: String },
}

/// Shared collaborators for service commands.
pub(crate) struct Console {
    pub config: Config,
    pub store: Arc<ServicesStore>,
    pub oracle: Arc<RpcBalanceOracle>,
}

impl Console {
    fn load(config_path: Option<&Path>) -> anyhow::Result<Self> {
        Self::open(Config::from_env_with_toml(config_path)?)
    }

    fn open(config: Config) -> anyhow::Result<Self> {
        let registry =
            HttpServiceRegistry::new(config.backend.url.clone(), config.backend.request_timeout)
                .context("cannot construct backend client")?;
        let oracle =
            RpcBalanceOracle::new(config.chain.rpc_url.clone(), config.backend.request_timeout)
                .context("cannot construct RPC client")?;
        Ok(Self {
            store: Arc::new(ServicesStore::new(Arc::new(registry))),
            oracle: Arc::new(oracle),
            config,
        })
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Config { command } => run_config_command(command),
        Command::Doctor { strict } => {
            let config = match Config::from_env_with_toml(config_path) {
                Ok(config) => Some(config),
                Err(e) => {
                    eprintln!("Configuration error: {e}");
                    None
                }
            };
            doctor::run_doctor_command(config.as_ref(), strict).await
        }
        Command::Templates => service::templates(&Console::load(config_path)?).await,
        Command::Spawn {
            template,
            rpc,
            staking,
            no_staking,
        } => {
            let staking = match (staking, no_staking) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            service::spawn(&Console::load(config_path)?, &template, &rpc, staking).await
        }
        Command::Start { wait } => service::start(&Console::load(config_path)?, wait).await,
        Command::Stop => service::stop(&Console::load(config_path)?).await,
        Command::Status => service::status(&Console::load(config_path)?).await,
        Command::Update { service } => {
            service::update(&Console::load(config_path)?, &service).await
        }
        Command::Delete { service } => {
            service::delete(&Console::load(config_path)?, &service).await
        }
    }
}

fn run_config_command(command: ConfigCommand) -> anyhow::Result<()> {
    let path = Settings::default_path();
    let mut settings = Settings::load_from(&path);
    match command {
        ConfigCommand::List => {
            for (key, value) in settings.list() {
                println!("{key} = {value}");
            }
        }
        ConfigCommand::Get { path: key } => match settings.get(&key) {
            Some(value) => println!("{value}"),
            None => anyhow::bail!("unknown setting '{key}'"),
        },
        ConfigCommand::Set { path: key, value } => {
            settings.set(&key, &value).map_err(anyhow::Error::msg)?;
            settings.save_to(&path).map_err(anyhow::Error::msg)?;
            println!("{key} = {}", settings.get(&key).unwrap_or_default());
        }
        ConfigCommand::Reset { path: key } => {
            settings.reset(&key).map_err(anyhow::Error::msg)?;
            settings.save_to(&path).map_err(anyhow::Error::msg)?;
            println!("{key} reset to {}", settings.get(&key).unwrap_or_default());
        }
    }
    Ok(())
}
