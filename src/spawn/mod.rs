//! Service provisioning: fund requirements, wizard stages, and funding
//! verification.

mod funding;
mod monitor;
mod state;
mod wizard;

pub use funding::{FundRequirementMap, FundRequirements, compute_fund_requirements};
pub use monitor::{
    FundingAsset, FundingMonitor, FundingOutcome, FundingPollPolicy, FundingProgress,
    check_funding_once, wait_for_outcome,
};
pub use state::{SpawnScreenState, SpawnStage, is_forward_transition};
pub use wizard::{SpawnOutcome, SpawnWizard};
