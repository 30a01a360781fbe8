//! Configuration for olas-operate.
//!
//! Settings are loaded with priority: env var > config.toml > settings.json > default.
//! Bootstrap env vars live in `~/.olas-operate/.env` (loaded via dotenvy
//! early in startup).

pub(crate) mod helpers;

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use url::Url;

use crate::error::ConfigError;
use crate::service::Address;
use crate::settings::Settings;
use crate::spawn::FundingPollPolicy;

/// Main configuration for the operator console.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    pub chain: ChainConfig,
    pub funding: FundingConfig,
}

/// Backend service API resolved config.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub url: Url,
    pub request_timeout: Duration,
}

impl BackendConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let raw_url = helpers::optional_env("OPERATE_BACKEND_URL")?
            .unwrap_or_else(|| settings.backend.url.clone());
        let url = parse_http_url("OPERATE_BACKEND_URL", &raw_url)?;

        let timeout_ms = helpers::parse_optional_env::<u64>(
            "OPERATE_REQUEST_TIMEOUT_MS",
            "a positive integer",
        )?
        .unwrap_or(settings.backend.request_timeout_ms);
        let timeout_ms = helpers::require_positive("OPERATE_REQUEST_TIMEOUT_MS", timeout_ms)?;

        Ok(Self {
            url,
            request_timeout: Duration::from_millis(timeout_ms),
        })
    }
}

/// Chain RPC and operator wallet resolved config.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub rpc_url: Url,
    pub wallet_address: Option<Address>,
    pub staking_token: Address,
    pub min_start_balance: Decimal,
}

impl ChainConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let raw_rpc = helpers::optional_env("OPERATE_RPC_URL")?
            .unwrap_or_else(|| settings.chain.rpc_url.clone());
        let rpc_url = parse_http_url("OPERATE_RPC_URL", &raw_rpc)?;

        let wallet_address = helpers::optional_env("OPERATE_WALLET_ADDRESS")?
            .or_else(|| settings.chain.wallet_address.clone())
            .map(|raw| parse_address("OPERATE_WALLET_ADDRESS", &raw))
            .transpose()?;

        let staking_token = parse_address(
            "OPERATE_STAKING_TOKEN_ADDRESS",
            &helpers::optional_env("OPERATE_STAKING_TOKEN_ADDRESS")?
                .unwrap_or_else(|| settings.chain.staking_token_address.clone()),
        )?;

        let raw_min = helpers::optional_env("OPERATE_MIN_START_BALANCE")?
            .unwrap_or_else(|| settings.chain.min_start_balance.clone());
        let min_start_balance =
            Decimal::from_str(&raw_min).map_err(|e| ConfigError::InvalidValue {
                key: "OPERATE_MIN_START_BALANCE".to_string(),
                message: format!("must be a decimal amount: {e}"),
            })?;
        if min_start_balance.is_sign_negative() {
            return Err(ConfigError::InvalidValue {
                key: "OPERATE_MIN_START_BALANCE".to_string(),
                message: "must be >= 0".to_string(),
            });
        }

        Ok(Self {
            rpc_url,
            wallet_address,
            staking_token,
            min_start_balance,
        })
    }
}

/// Funding verification resolved config.
#[derive(Debug, Clone)]
pub struct FundingConfig {
    pub poll: FundingPollPolicy,
    pub balance_refresh: Duration,
}

impl FundingConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let interval_ms = helpers::parse_optional_env::<u64>(
            "OPERATE_FUNDING_POLL_INTERVAL_MS",
            "a positive integer",
        )?
        .unwrap_or(settings.funding.poll_interval_ms);
        let interval_ms =
            helpers::require_positive("OPERATE_FUNDING_POLL_INTERVAL_MS", interval_ms)?;

        let max_backoff_ms = helpers::parse_optional_env::<u64>(
            "OPERATE_FUNDING_MAX_BACKOFF_MS",
            "a positive integer",
        )?
        .unwrap_or(settings.funding.max_backoff_ms);
        if max_backoff_ms < interval_ms {
            return Err(ConfigError::InvalidValue {
                key: "OPERATE_FUNDING_MAX_BACKOFF_MS".to_string(),
                message: format!("must be >= poll interval ({interval_ms} ms)"),
            });
        }

        let timeout_secs = helpers::parse_optional_env::<u64>(
            "OPERATE_FUNDING_TIMEOUT_SECS",
            "a positive integer",
        )?
        .or(settings.funding.timeout_secs);
        if let Some(secs) = timeout_secs {
            helpers::require_positive("OPERATE_FUNDING_TIMEOUT_SECS", secs)?;
        }

        let refresh_ms = helpers::parse_optional_env::<u64>(
            "OPERATE_BALANCE_REFRESH_MS",
            "a positive integer",
        )?
        .unwrap_or(settings.funding.balance_refresh_ms);
        let refresh_ms = helpers::require_positive("OPERATE_BALANCE_REFRESH_MS", refresh_ms)?;

        Ok(Self {
            poll: FundingPollPolicy {
                interval: Duration::from_millis(interval_ms),
                max_backoff: Duration::from_millis(max_backoff_ms),
                timeout: timeout_secs.map(Duration::from_secs),
            },
            balance_refresh: Duration::from_millis(refresh_ms),
        })
    }
}

fn parse_http_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("invalid URL '{raw}': {e}"),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected an http(s) URL, got scheme '{}'", url.scheme()),
        });
    }
    Ok(url)
}

fn parse_address(key: &str, raw: &str) -> Result<Address, ConfigError> {
    Address::parse(raw).map_err(|message| ConfigError::InvalidValue {
        key: key.to_string(),
        message,
    })
}

impl Config {
    /// Load configuration from environment variables and settings files.
    ///
    /// Loads both `./.env` (higher priority) and `~/.olas-operate/.env`
    /// (lower priority) via dotenvy, which never overwrites existing vars.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_toml(None)
    }

    /// Load from env with an optional TOML config file overlay.
    pub fn from_env_with_toml(toml_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        crate::bootstrap::load_operate_env();
        let mut settings = Settings::load();

        Self::apply_toml_overlay(&mut settings, toml_path)?;

        Self::build(&settings)
    }

    /// Load and merge a TOML config file into settings.
    ///
    /// If `explicit_path` is `Some`, loads from that path (errors are fatal).
    /// If `None`, tries `~/.olas-operate/config.toml` (missing file is ignored).
    fn apply_toml_overlay(
        settings: &mut Settings,
        explicit_path: Option<&std::path::Path>,
    ) -> Result<(), ConfigError> {
        let path = explicit_path
            .map(std::path::PathBuf::from)
            .unwrap_or_else(Settings::default_toml_path);

        match Settings::load_toml(&path) {
            Ok(Some(toml_settings)) => {
                settings.merge_from(&toml_settings);
                tracing::debug!("Loaded TOML config from {}", path.display());
            }
            Ok(None) => {
                if explicit_path.is_some() {
                    return Err(ConfigError::ParseError(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
            }
            Err(e) => {
                if explicit_path.is_some() {
                    return Err(ConfigError::ParseError(format!(
                        "Failed to load config file {}: {}",
                        path.display(),
                        e
                    )));
                }
                tracing::warn!("Failed to load default config file: {}", e);
            }
        }
        Ok(())
    }

    /// Build config from settings.
    pub fn build(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            backend: BackendConfig::resolve(settings)?,
            chain: ChainConfig::resolve(settings)?,
            funding: FundingConfig::resolve(settings)?,
        })
    }
}
