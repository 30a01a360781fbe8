//! Fund requirement calculator.
//!
//! Pure mapping from a template, the keys its build produced, and the staking
//! decision to the two per-address requirement pools. Maps are always rebuilt
//! from scratch; callers never patch a previous result.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::service::{Address, ServiceKeys, ServiceTemplate};

/// Address → minimum balance required, in whole token units.
pub type FundRequirementMap = BTreeMap<Address, Decimal>;

/// Both requirement pools for one wizard session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FundRequirements {
    /// Native-token operational funds for agent instances and the safe.
    pub agent: FundRequirementMap,
    /// Staking-token funds for the staking safe. Empty when not staking.
    pub staking: FundRequirementMap,
}

/// Compute agent and staking requirements for `template` built with `keys`.
///
/// Agent pool: every instance key gets the per-agent amount; the safe gets
/// the safe amount when the template asks for one. Staking pool: the safe
/// gets minimum deposit plus bond, only when `is_staking` and the template
/// carries a staking program.
pub fn compute_fund_requirements(
    template: &ServiceTemplate,
    keys: &ServiceKeys,
    is_staking: bool,
) -> FundRequirements {
    let fund = &template.configuration.fund_requirements;
    let agent_amount = fund.agent.max(Decimal::ZERO);
    let safe_amount = fund.safe.max(Decimal::ZERO);

    let mut agent = FundRequirementMap::new();
    for instance in &keys.instances {
        add(&mut agent, instance, agent_amount);
    }
    if let Some(safe) = &keys.safe
        && !safe_amount.is_zero()
    {
        add(&mut agent, safe, safe_amount);
    }

    let mut staking = FundRequirementMap::new();
    if is_staking
        && let (Some(program), Some(safe)) = (template.staking_program(), &keys.safe)
    {
        add(&mut staking, safe, program.required_stake().max(Decimal::ZERO));
    }

    FundRequirements { agent, staking }
}

fn add(map: &mut FundRequirementMap, address: &Address, amount: Decimal) {
    *map.entry(address.clone()).or_insert(Decimal::ZERO) += amount;
}
