//! Chain balance lookups for operator and service addresses.

mod rpc;
mod watcher;

pub use rpc::RpcBalanceOracle;
pub use watcher::WalletBalanceWatcher;

use std::fmt;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::BalanceError;
use crate::service::Address;

/// Read-only balance source.
///
/// Amounts are in whole token units (18-decimal base units already scaled).
#[async_trait]
pub trait BalanceOracle: Send + Sync {
    /// Native token balance of `address`.
    async fn get_balance(&self, address: &Address) -> Result<Decimal, BalanceError>;

    /// ERC-20 balance of `address` for the `token` contract.
    async fn get_token_balance(
        &self,
        address: &Address,
        token: &Address,
    ) -> Result<Decimal, BalanceError>;
}

/// Operator wallet balance as last observed.
///
/// `Unresolved` means the balance is not known (still loading or the oracle is
/// unreachable) and is deliberately distinct from a resolved zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WalletBalance {
    #[default]
    Unresolved,
    Resolved(Decimal),
}

impl WalletBalance {
    pub fn amount(self) -> Option<Decimal> {
        match self {
            Self::Unresolved => None,
            Self::Resolved(amount) => Some(amount),
        }
    }

    /// One-shot lookup, collapsing oracle failures into `Unresolved`.
    pub async fn fetch(oracle: &dyn BalanceOracle, address: &Address) -> Self {
        match oracle.get_balance(address).await {
            Ok(amount) => Self::Resolved(amount),
            Err(e) => {
                tracing::warn!(address = %address, error = %e, "wallet balance unavailable");
                Self::Unresolved
            }
        }
    }
}

impl From<Option<Decimal>> for WalletBalance {
    fn from(value: Option<Decimal>) -> Self {
        value.map_or(Self::Unresolved, Self::Resolved)
    }
}

impl fmt::Display for WalletBalance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unresolved => f.write_str("unresolved"),
            Self::Resolved(amount) => write!(f, "{}", amount.normalize()),
        }
    }
}
