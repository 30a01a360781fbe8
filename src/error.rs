//! Error types for olas-operate.

use std::time::Duration;

use crate::service::ServiceHash;
use crate::spawn::SpawnScreenState;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Errors from the backend service registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Backend unreachable at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("Backend request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Backend rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Service {0} not found")]
    ServiceNotFound(ServiceHash),

    #[error("Service template {0} not found")]
    TemplateNotFound(ServiceHash),

    #[error("Invalid response from backend: {0}")]
    InvalidResponse(String),

    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),
}

impl RegistryError {
    /// Whether retrying the same request later could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unreachable { .. } | Self::Timeout { .. } => true,
            Self::Rejected { status, .. } => *status >= 500,
            Self::ServiceNotFound(_)
            | Self::TemplateNotFound(_)
            | Self::InvalidResponse(_)
            | Self::InvalidUrl(_) => false,
        }
    }
}

/// Errors from the chain balance oracle.
#[derive(Debug, thiserror::Error)]
pub enum BalanceError {
    #[error("RPC endpoint unreachable at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),

    #[error("Balance overflows decimal range: {0}")]
    Overflow(String),
}

/// Provisioning wizard errors.
///
/// None of these abandon the session: the wizard stays on the stage where the
/// error occurred.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("Action not available in stage {stage}: {action}")]
    WrongStage {
        stage: SpawnScreenState,
        action: &'static str,
    },

    #[error("Invalid stage transition from {from} to {to}")]
    InvalidTransition {
        from: SpawnScreenState,
        to: SpawnScreenState,
    },

    #[error("Template {0} has no staking program")]
    StakingUnavailable(ServiceHash),

    #[error("Invalid RPC endpoint '{rpc}': {reason}")]
    InvalidRpc { rpc: String, reason: String },

    #[error("Service build failed: {0}")]
    Build(#[source] RegistryError),

    #[error("Funding not observed within {0:?}")]
    FundingTimedOut(Duration),

    #[error("Funding monitor stopped unexpectedly")]
    MonitorStopped,
}

/// Run-state controller errors.
#[derive(Debug, thiserror::Error)]
pub enum RunStateError {
    #[error("A start/stop request is already in flight")]
    Busy,

    #[error("Start is disabled: {0}")]
    StartDisabled(crate::run_state::StartDisabledReason),

    #[error("No service to stop")]
    NothingToStop,

    #[error("No service template available")]
    NoTemplate,

    #[error("Request failed: {0}")]
    Request(#[from] RegistryError),
}
