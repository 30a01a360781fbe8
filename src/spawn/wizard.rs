//! Provisioning wizard.
//!
//! One [`SpawnWizard`] is one wizard session for one template. The session
//! moves strictly forward through [`SpawnStage`]s:
//!
//! ```text
//! StakingCheck ─▶ Rpc ─┬─(staking)──▶ StakingFunding ─▶ AgentFunding ─▶ Done
//!                      └─(no staking)──────────────────▶ AgentFunding ─▶ Done
//! ```
//!
//! Funding stages own a [`FundingMonitor`] that lives exactly as long as the
//! stage does. [`SpawnWizard::cancel`] and [`SpawnWizard::finish`] drop it and
//! reset the session.

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use url::Url;
use uuid::Uuid;

use crate::error::{RegistryError, SpawnError};
use crate::service::{Address, Service, ServiceHash, ServiceTemplate, ServicesStore};
use crate::spawn::funding::{FundRequirementMap, compute_fund_requirements};
use crate::spawn::monitor::{
    FundingAsset, FundingMonitor, FundingOutcome, FundingPollPolicy, FundingProgress,
    check_funding_once, wait_for_outcome,
};
use crate::spawn::state::{SpawnScreenState, SpawnStage};
use crate::wallet::BalanceOracle;

/// Result of leaving the wizard from `Done`.
#[derive(Debug)]
pub struct SpawnOutcome {
    /// The provisioned service handed to the rest of the application.
    pub service: Service,
    /// Set when the post-completion services refresh failed. The session is
    /// reset regardless.
    pub refresh_error: Option<RegistryError>,
}

pub struct SpawnWizard {
    template: ServiceTemplate,
    store: Arc<ServicesStore>,
    oracle: Arc<dyn BalanceOracle>,
    staking_token: Address,
    policy: FundingPollPolicy,
    stage: watch::Sender<SpawnStage>,
    /// Held for the duration of every mutating action.
    session: Mutex<Session>,
}

/// Mutable session state guarded together with the action lock.
struct Session {
    /// Correlates log events of one wizard run; renewed on reset.
    id: Uuid,
    /// Monitor of the current funding stage.
    monitor: Option<FundingMonitor>,
}

impl Session {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            monitor: None,
        }
    }
}

impl SpawnWizard {
    pub fn new(
        template: ServiceTemplate,
        store: Arc<ServicesStore>,
        oracle: Arc<dyn BalanceOracle>,
        staking_token: Address,
        policy: FundingPollPolicy,
    ) -> Self {
        let (stage, _) = watch::channel(SpawnStage::StakingCheck);
        Self {
            template,
            store,
            oracle,
            staking_token,
            policy,
            stage,
            session: Mutex::new(Session::new()),
        }
    }

    /// Resolve `template_hash` through the registry and open a session for it.
    pub async fn for_template(
        template_hash: &ServiceHash,
        store: Arc<ServicesStore>,
        oracle: Arc<dyn BalanceOracle>,
        staking_token: Address,
        policy: FundingPollPolicy,
    ) -> Result<Self, RegistryError> {
        let template = store.registry().get_service_template(template_hash).await?;
        Ok(Self::new(template, store, oracle, staking_token, policy))
    }

    pub fn template(&self) -> &ServiceTemplate {
        &self.template
    }

    pub fn screen(&self) -> SpawnScreenState {
        self.stage.borrow().screen()
    }

    pub fn stage(&self) -> SpawnStage {
        self.stage.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SpawnStage> {
        self.stage.subscribe()
    }

    pub fn is_staking(&self) -> Option<bool> {
        self.stage.borrow().is_staking()
    }

    pub fn service(&self) -> Option<Service> {
        self.stage.borrow().service().cloned()
    }

    pub fn agent_fund_requirements(&self) -> FundRequirementMap {
        self.stage
            .borrow()
            .requirements()
            .map(|r| r.agent.clone())
            .unwrap_or_default()
    }

    pub fn staking_fund_requirements(&self) -> FundRequirementMap {
        self.stage
            .borrow()
            .requirements()
            .map(|r| r.staking.clone())
            .unwrap_or_default()
    }

    /// Whether the template can be staked at all.
    pub fn staking_eligible(&self) -> bool {
        self.template.supports_staking()
    }

    /// Latest observation of the running funding monitor, if any.
    pub async fn funding_progress(&self) -> Option<FundingProgress> {
        self.session
            .lock()
            .await
            .monitor
            .as_ref()
            .map(FundingMonitor::latest)
    }

    /// Record the staking decision and move to `Rpc`.
    pub async fn choose_staking(&self, is_staking: bool) -> Result<SpawnScreenState, SpawnError> {
        let mut session = self.session.lock().await;
        self.expect_stage(SpawnScreenState::StakingCheck, "choose_staking")?;
        if is_staking && !self.staking_eligible() {
            return Err(SpawnError::StakingUnavailable(self.template.hash.clone()));
        }
        self.advance(&mut session, SpawnStage::Rpc { is_staking })
    }

    /// Validate `rpc`, build the service against it, and compute both pools.
    ///
    /// On any failure the session stays on `Rpc`.
    pub async fn submit_rpc(&self, rpc: &str) -> Result<SpawnScreenState, SpawnError> {
        let mut session = self.session.lock().await;
        self.expect_stage(SpawnScreenState::Rpc, "submit_rpc")?;
        let is_staking = self.is_staking().unwrap_or(false);

        validate_rpc(rpc)?;
        let service = self
            .store
            .registry()
            .build_service(&self.template.hash, rpc.trim())
            .await
            .map_err(SpawnError::Build)?;

        if service.keys.instances.is_empty() {
            return Err(SpawnError::Build(RegistryError::InvalidResponse(
                "built service has no agent instance keys".to_string(),
            )));
        }
        if is_staking && service.keys.safe.is_none() {
            return Err(SpawnError::Build(RegistryError::InvalidResponse(
                "built service has no safe to stake from".to_string(),
            )));
        }

        let requirements = compute_fund_requirements(&self.template, &service.keys, is_staking);
        tracing::info!(
            service_hash = %service.hash,
            agent_addresses = requirements.agent.len(),
            staking_addresses = requirements.staking.len(),
            "service built, fund requirements computed"
        );

        let next = if is_staking {
            SpawnStage::StakingFunding {
                service,
                requirements,
            }
        } else {
            SpawnStage::AgentFunding {
                service,
                requirements,
                is_staking,
            }
        };
        self.advance(&mut session, next)
    }

    /// Check the current funding stage once and advance if its pool is met.
    ///
    /// Not-yet-funded is not an error: the stage is returned unchanged.
    pub async fn check_funding(&self) -> Result<SpawnScreenState, SpawnError> {
        let mut session = self.session.lock().await;
        let expected = self.screen();
        self.check_funding_locked(&mut session, expected).await
    }

    /// One funding check for the `expected` stage, run under the session lock.
    ///
    /// If the session already left `expected`, its current screen is returned
    /// without checking anything.
    async fn check_funding_locked(
        &self,
        session: &mut Session,
        expected: SpawnScreenState,
    ) -> Result<SpawnScreenState, SpawnError> {
        let stage = self.stage();
        if stage.screen() != expected {
            return Ok(stage.screen());
        }
        let Some((asset, pool)) = self.pending_pool(&stage) else {
            return Err(SpawnError::WrongStage {
                stage: stage.screen(),
                action: "check_funding",
            });
        };

        let already_funded = session
            .monitor
            .as_ref()
            .is_some_and(|m| m.latest().outcome() == Some(FundingOutcome::Funded));
        let funded = if already_funded {
            true
        } else {
            match check_funding_once(self.oracle.as_ref(), &asset, &pool).await {
                Ok(shortfall) => {
                    tracing::debug!(
                        stage = %stage.screen(),
                        pending = shortfall.len(),
                        "funding check"
                    );
                    shortfall.is_empty()
                }
                Err(e) => {
                    tracing::warn!(stage = %stage.screen(), error = %e, "funding check failed");
                    false
                }
            }
        };

        if funded {
            self.advance(session, next_after_funding(stage))
        } else {
            Ok(stage.screen())
        }
    }

    /// Wait for the current funding stage's monitor and advance when funded.
    ///
    /// Returns early with the current screen if the session was reset or
    /// moved on meanwhile. A timed-out or stopped monitor is discarded so the next
    /// call starts a fresh wait.
    pub async fn await_funding(&self) -> Result<SpawnScreenState, SpawnError> {
        let (started_in, waiting_on, progress) = {
            let mut session = self.session.lock().await;
            let stage = self.stage();
            let Some((asset, pool)) = self.pending_pool(&stage) else {
                return Err(SpawnError::WrongStage {
                    stage: stage.screen(),
                    action: "await_funding",
                });
            };
            let session_id = session.id;
            let running = session.monitor.get_or_insert_with(|| {
                tracing::info!(
                    session_id = %session_id,
                    stage = %stage.screen(),
                    "restarting funding monitor"
                );
                FundingMonitor::spawn(self.oracle.clone(), asset, pool, self.policy.clone())
            });
            (session_id, stage.screen(), running.progress())
        };

        let outcome = wait_for_outcome(progress).await;

        let mut session = self.session.lock().await;
        let stage = self.stage();
        if session.id != started_in || stage.screen() != waiting_on {
            return Ok(stage.screen());
        }
        match outcome {
            FundingOutcome::Funded => self.advance(&mut session, next_after_funding(stage)),
            FundingOutcome::TimedOut => {
                session.monitor = None;
                Err(SpawnError::FundingTimedOut(
                    self.policy.timeout.unwrap_or_default(),
                ))
            }
            FundingOutcome::Stopped => {
                session.monitor = None;
                Err(SpawnError::MonitorStopped)
            }
        }
    }

    /// Guarded stage setter.
    ///
    /// Moves to `target` only along the transition table and only when the
    /// target's entry data is already available. Funding stages are left
    /// through a one-shot funding check, so this never skips verification.
    pub async fn set_screen(
        &self,
        target: SpawnScreenState,
    ) -> Result<SpawnScreenState, SpawnError> {
        let mut session = self.session.lock().await;
        let current = self.stage();
        if current.screen() == target {
            return Ok(target);
        }
        let invalid = SpawnError::InvalidTransition {
            from: current.screen(),
            to: target,
        };
        if !current.can_advance_to(target) || !current.screen().is_funding() {
            return Err(invalid);
        }
        let reached = self
            .check_funding_locked(&mut session, current.screen())
            .await?;
        if reached == target {
            Ok(reached)
        } else {
            Err(invalid)
        }
    }

    /// Abandon the session from any stage.
    ///
    /// Stops funding polling and resets all session state. A service that was
    /// already built is left in place.
    pub async fn cancel(&self) {
        let mut session = self.session.lock().await;
        let from = self.screen();
        let closed = session.id;
        *session = Session::new();
        self.stage.send_replace(SpawnStage::StakingCheck);
        tracing::info!(
            session_id = %closed,
            from = %from,
            template_hash = %self.template.hash,
            "wizard cancelled"
        );
    }

    /// Close a completed session and hand off the provisioned service.
    ///
    /// Resets the session, then refreshes the shared service list.
    pub async fn finish(&self) -> Result<SpawnOutcome, SpawnError> {
        let (service, closed) = {
            let mut session = self.session.lock().await;
            let stage = self.stage();
            let SpawnStage::Done { service, .. } = stage else {
                return Err(SpawnError::WrongStage {
                    stage: stage.screen(),
                    action: "finish",
                });
            };
            let closed = session.id;
            *session = Session::new();
            self.stage.send_replace(SpawnStage::StakingCheck);
            (service, closed)
        };

        let refresh_error = match self.store.update_services_state().await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(
                    session_id = %closed,
                    error = %e,
                    "Failed to update services after provisioning"
                );
                Some(e)
            }
        };
        tracing::info!(
            session_id = %closed,
            service_hash = %service.hash,
            "wizard finished"
        );
        Ok(SpawnOutcome {
            service,
            refresh_error,
        })
    }

    fn expect_stage(
        &self,
        expected: SpawnScreenState,
        action: &'static str,
    ) -> Result<(), SpawnError> {
        let stage = self.screen();
        if stage == expected {
            Ok(())
        } else {
            Err(SpawnError::WrongStage { stage, action })
        }
    }

    /// Asset and pool the given stage verifies, if it is a funding stage.
    fn pending_pool(&self, stage: &SpawnStage) -> Option<(FundingAsset, FundRequirementMap)> {
        let pool = stage.pending_pool()?.clone();
        let asset = match stage.screen() {
            SpawnScreenState::StakingFunding => FundingAsset::Token(self.staking_token.clone()),
            _ => FundingAsset::Native,
        };
        Some((asset, pool))
    }

    /// Move to `next` through the transition table, replacing the monitor.
    fn advance(
        &self,
        session: &mut Session,
        next: SpawnStage,
    ) -> Result<SpawnScreenState, SpawnError> {
        let current = self.stage();
        if !current.can_advance_to(next.screen()) {
            return Err(SpawnError::InvalidTransition {
                from: current.screen(),
                to: next.screen(),
            });
        }

        session.monitor = self.pending_pool(&next).map(|(asset, pool)| {
            FundingMonitor::spawn(self.oracle.clone(), asset, pool, self.policy.clone())
        });

        let screen = next.screen();
        tracing::info!(
            session_id = %session.id,
            from = %current.screen(),
            to = %screen,
            template_hash = %self.template.hash,
            "wizard stage advanced"
        );
        self.stage.send_replace(next);
        Ok(screen)
    }
}

fn next_after_funding(stage: SpawnStage) -> SpawnStage {
    match stage {
        SpawnStage::StakingFunding {
            service,
            requirements,
        } => SpawnStage::AgentFunding {
            service,
            requirements,
            is_staking: true,
        },
        SpawnStage::AgentFunding {
            service,
            is_staking,
            ..
        } => SpawnStage::Done {
            service,
            is_staking,
        },
        other => other,
    }
}

fn validate_rpc(raw: &str) -> Result<Url, SpawnError> {
    let trimmed = raw.trim();
    let invalid = |reason: String| SpawnError::InvalidRpc {
        rpc: raw.to_string(),
        reason,
    };
    if trimmed.is_empty() {
        return Err(invalid("RPC endpoint is empty".to_string()));
    }
    let url = Url::parse(trimmed).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https" | "ws" | "wss") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}
