//! olas-operate: operator console for provisioning, funding, and running a
//! staked autonomous agent service.
//!
//! The console sits between two request/response collaborators, the backend
//! service registry and a chain RPC endpoint, and orchestrates:
//!
//! - the provisioning wizard ([`spawn::SpawnWizard`]) from staking choice to a
//!   funded, built service;
//! - the start/pause toggle for the managed service
//!   ([`run_state::RunStateController`]);
//! - a shared, subscribable service list ([`service::ServicesStore`]).

pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod error;
pub mod run_state;
pub mod service;
pub mod settings;
pub mod spawn;
pub mod staking;
pub mod testing;
pub mod wallet;

pub use config::Config;
