//! Wizard stages and the transition table.

use std::fmt;

use crate::service::Service;
use crate::spawn::funding::{FundRequirementMap, FundRequirements};

/// Observable wizard stage, without the data each stage carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpawnScreenState {
    StakingCheck,
    Rpc,
    StakingFunding,
    AgentFunding,
    Done,
}

impl SpawnScreenState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StakingCheck => "staking_check",
            Self::Rpc => "rpc",
            Self::StakingFunding => "staking_funding",
            Self::AgentFunding => "agent_funding",
            Self::Done => "done",
        }
    }

    pub fn is_funding(self) -> bool {
        matches!(self, Self::StakingFunding | Self::AgentFunding)
    }
}

impl fmt::Display for SpawnScreenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wizard stage together with the data that stage requires on entry.
///
/// The staking branch is carried in the variants themselves: `StakingFunding`
/// only exists on the staking path, and `Rpc`/`AgentFunding`/`Done` record the
/// decision.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SpawnStage {
    #[default]
    StakingCheck,
    Rpc {
        is_staking: bool,
    },
    StakingFunding {
        service: Service,
        requirements: FundRequirements,
    },
    AgentFunding {
        service: Service,
        requirements: FundRequirements,
        is_staking: bool,
    },
    Done {
        service: Service,
        is_staking: bool,
    },
}

impl SpawnStage {
    pub fn screen(&self) -> SpawnScreenState {
        match self {
            Self::StakingCheck => SpawnScreenState::StakingCheck,
            Self::Rpc { .. } => SpawnScreenState::Rpc,
            Self::StakingFunding { .. } => SpawnScreenState::StakingFunding,
            Self::AgentFunding { .. } => SpawnScreenState::AgentFunding,
            Self::Done { .. } => SpawnScreenState::Done,
        }
    }

    /// Staking decision, once made.
    pub fn is_staking(&self) -> Option<bool> {
        match self {
            Self::StakingCheck => None,
            Self::StakingFunding { .. } => Some(true),
            Self::Rpc { is_staking }
            | Self::AgentFunding { is_staking, .. }
            | Self::Done { is_staking, .. } => Some(*is_staking),
        }
    }

    pub fn service(&self) -> Option<&Service> {
        match self {
            Self::StakingCheck | Self::Rpc { .. } => None,
            Self::StakingFunding { service, .. }
            | Self::AgentFunding { service, .. }
            | Self::Done { service, .. } => Some(service),
        }
    }

    pub fn requirements(&self) -> Option<&FundRequirements> {
        match self {
            Self::StakingFunding { requirements, .. } | Self::AgentFunding { requirements, .. } => {
                Some(requirements)
            }
            Self::StakingCheck | Self::Rpc { .. } | Self::Done { .. } => None,
        }
    }

    /// The pool the current stage is waiting on.
    pub fn pending_pool(&self) -> Option<&FundRequirementMap> {
        match self {
            Self::StakingFunding { requirements, .. } => Some(&requirements.staking),
            Self::AgentFunding { requirements, .. } => Some(&requirements.agent),
            Self::StakingCheck | Self::Rpc { .. } | Self::Done { .. } => None,
        }
    }

    /// Whether `next` is a legal forward step from this stage.
    pub fn can_advance_to(&self, next: SpawnScreenState) -> bool {
        is_forward_transition(self.screen(), next, self.is_staking())
    }
}

/// Forward transition table.
///
/// `is_staking` is the decision held by the session, if any; `Rpc` branches on
/// it.
pub fn is_forward_transition(
    from: SpawnScreenState,
    to: SpawnScreenState,
    is_staking: Option<bool>,
) -> bool {
    use SpawnScreenState::*;
    match (from, to) {
        (StakingCheck, Rpc) => true,
        (Rpc, StakingFunding) => is_staking == Some(true),
        (Rpc, AgentFunding) => is_staking == Some(false),
        (StakingFunding, AgentFunding) => true,
        (AgentFunding, Done) => true,
        _ => false,
    }
}
