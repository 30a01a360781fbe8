//! Shared service identity and status model.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Content hash identifying a service template or a provisioned service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceHash(String);

impl ServiceHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceHash {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// EVM account address, normalized to lowercase `0x` + 40 hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        let hex = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| format!("address '{raw}' must be 0x-prefixed"))?;
        if hex.len() != 40 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(format!("address '{raw}' must be 40 hex characters"));
        }
        Ok(Self(format!("0x{}", hex.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Address without the `0x` prefix, left-padded to a 32-byte ABI word.
    pub fn abi_word(&self) -> String {
        format!("{:0>64}", &self.0[2..])
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Lifecycle state of a provisioned service.
///
/// Only confirmed registry responses move a service between states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    #[default]
    NotDeployed,
    Deploying,
    Deployed,
    Stopping,
    Stopped,
}

impl DeploymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotDeployed => "not_deployed",
            Self::Deploying => "deploying",
            Self::Deployed => "deployed",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }

    /// Whether the service is running or on its way there.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Deployed | Self::Deploying)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operational funds each role needs, in native token units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundRequirementTemplate {
    /// Per agent instance key.
    pub agent: Decimal,
    /// For the service safe.
    #[serde(default)]
    pub safe: Decimal,
}

/// Staking program a template can be enrolled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingProgram {
    pub id: String,
    /// Minimum deposit the staking safe must hold, in staking token units.
    pub min_staking_deposit: Decimal,
    /// Agent bond posted in the staking token on registration.
    #[serde(default)]
    pub olas_cost_of_bond: Decimal,
}

impl StakingProgram {
    /// Total staking-token amount required before staking can proceed.
    pub fn required_stake(&self) -> Decimal {
        self.min_staking_deposit + self.olas_cost_of_bond
    }
}

/// Deployment parameters carried by a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateConfiguration {
    pub agent_id: u32,
    #[serde(default = "default_threshold")]
    pub threshold: u32,
    /// Agent instance keys the backend creates at build time.
    #[serde(default = "default_number_of_keys")]
    pub number_of_keys: u32,
    pub fund_requirements: FundRequirementTemplate,
    #[serde(default)]
    pub staking: Option<StakingProgram>,
    /// Suggested RPC endpoint shown to the operator.
    #[serde(default)]
    pub rpc: Option<String>,
}

fn default_threshold() -> u32 {
    1
}

fn default_number_of_keys() -> u32 {
    1
}

/// Immutable descriptor of a deployable agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTemplate {
    pub hash: ServiceHash,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub service_version: String,
    pub configuration: TemplateConfiguration,
}

impl ServiceTemplate {
    pub fn staking_program(&self) -> Option<&StakingProgram> {
        self.configuration.staking.as_ref()
    }

    pub fn supports_staking(&self) -> bool {
        self.staking_program().is_some()
    }
}

/// Keys created for a service by the backend build step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceKeys {
    /// Agent instance addresses.
    #[serde(default)]
    pub instances: Vec<Address>,
    /// Service multisig, which doubles as the staking safe.
    #[serde(default)]
    pub safe: Option<Address>,
}

/// A provisioned service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub hash: ServiceHash,
    pub template_hash: ServiceHash,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: DeploymentStatus,
    #[serde(default)]
    pub rpc: Option<String>,
    #[serde(default)]
    pub keys: ServiceKeys,
}
