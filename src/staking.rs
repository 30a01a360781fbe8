//! Staking position summary for status surfaces.
//!
//! Both figures are read off the service safe, not the staking contract.
//! Tokens already transferred into the staking contract are not counted, and
//! reward eligibility for the current epoch is not queried on chain.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::error::BalanceError;
use crate::service::{Address, DeploymentStatus, Service, ServiceTemplate};
use crate::wallet::BalanceOracle;

/// Stake required when the template does not name a staking program.
pub const DEFAULT_MINIMUM_STAKE: Decimal = dec!(20);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StakingSummary {
    pub program_id: Option<String>,
    /// Staking-token balance held by the service safe.
    pub safe_token_balance: Decimal,
    pub minimum: Decimal,
    /// The safe holds at least `minimum`.
    pub meets_minimum: bool,
    /// `meets_minimum` and the service is deployed.
    pub running_with_stake: bool,
}

impl StakingSummary {
    pub fn new(
        template: Option<&ServiceTemplate>,
        safe_token_balance: Decimal,
        status: DeploymentStatus,
    ) -> Self {
        let program = template.and_then(ServiceTemplate::staking_program);
        let minimum = program.map_or(DEFAULT_MINIMUM_STAKE, |p| p.required_stake());
        let meets_minimum = safe_token_balance >= minimum;
        Self {
            program_id: program.map(|p| p.id.clone()),
            safe_token_balance,
            minimum,
            meets_minimum,
            running_with_stake: meets_minimum && status == DeploymentStatus::Deployed,
        }
    }

    /// Read the safe's staking-token balance and summarize it.
    ///
    /// A service without a safe holds nothing.
    pub async fn fetch(
        oracle: &dyn BalanceOracle,
        service: &Service,
        template: Option<&ServiceTemplate>,
        staking_token: &Address,
    ) -> Result<Self, BalanceError> {
        let balance = match &service.keys.safe {
            Some(safe) => oracle.get_token_balance(safe, staking_token).await?,
            None => Decimal::ZERO,
        };
        Ok(Self::new(template, balance, service.status))
    }
}
