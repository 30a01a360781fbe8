//! Start/pause control for the managed service.
//!
//! Status only changes after the registry confirms a request. While a request
//! is in flight the controller reports [`ToggleState::Loading`] and refuses a
//! second one.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rust_decimal::Decimal;
use tokio::sync::watch;

use crate::error::RunStateError;
use crate::service::{DeploymentStatus, ServicesStore};
use crate::wallet::WalletBalance;

/// Why the start affordance is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartDisabledReason {
    /// The wallet balance could not be resolved.
    RpcUnavailable,
    /// The wallet balance is below the start minimum.
    InsufficientFunds,
}

impl StartDisabledReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RpcUnavailable => "RPC unavailable",
            Self::InsufficientFunds => "insufficient funds",
        }
    }
}

impl fmt::Display for StartDisabledReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the single start/pause affordance currently offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleState {
    Loading,
    Pause,
    Start,
    Disabled(StartDisabledReason),
}

impl fmt::Display for ToggleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading => f.write_str("loading"),
            Self::Pause => f.write_str("pause"),
            Self::Start => f.write_str("start"),
            Self::Disabled(reason) => write!(f, "start disabled ({reason})"),
        }
    }
}

/// Start guard: `None` when starting is allowed.
pub fn start_blocker(balance: WalletBalance, minimum: Decimal) -> Option<StartDisabledReason> {
    match balance {
        WalletBalance::Unresolved => Some(StartDisabledReason::RpcUnavailable),
        WalletBalance::Resolved(amount) if amount < minimum => {
            Some(StartDisabledReason::InsufficientFunds)
        }
        WalletBalance::Resolved(_) => None,
    }
}

pub struct RunStateController {
    store: Arc<ServicesStore>,
    min_start_balance: Decimal,
    is_loading: AtomicBool,
}

/// Clears the loading flag when the request resolves either way.
struct LoadingGuard<'a>(&'a AtomicBool);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RunStateController {
    pub fn new(store: Arc<ServicesStore>, min_start_balance: Decimal) -> Self {
        Self {
            store,
            min_start_balance,
            is_loading: AtomicBool::new(false),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading.load(Ordering::Acquire)
    }

    pub fn min_start_balance(&self) -> Decimal {
        self.min_start_balance
    }

    pub fn toggle_state(&self, balance: WalletBalance) -> ToggleState {
        if self.is_loading() {
            return ToggleState::Loading;
        }
        if self.store.service_status().is_active() {
            return ToggleState::Pause;
        }
        match start_blocker(balance, self.min_start_balance) {
            Some(reason) => ToggleState::Disabled(reason),
            None => ToggleState::Start,
        }
    }

    /// Start when stopped, pause when running.
    pub async fn toggle(&self, balance: WalletBalance) -> Result<DeploymentStatus, RunStateError> {
        if self.store.service_status().is_active() {
            self.stop().await
        } else {
            self.start(balance).await
        }
    }

    /// Create and deploy a service from the first template, or redeploy the
    /// existing one.
    pub async fn start(&self, balance: WalletBalance) -> Result<DeploymentStatus, RunStateError> {
        if let Some(reason) = start_blocker(balance, self.min_start_balance) {
            return Err(RunStateError::StartDisabled(reason));
        }
        let _loading = self.begin()?;
        let registry = self.store.registry();

        match self.store.current_service() {
            Some(service) => {
                registry.start_deployment(&service.hash).await.map_err(|e| {
                    tracing::warn!(service_hash = %service.hash, error = %e, "start failed");
                    e
                })?;
                tracing::info!(service_hash = %service.hash, "service started");
            }
            None => {
                let templates = registry.get_service_templates().await?;
                let template = templates.first().ok_or(RunStateError::NoTemplate)?;
                let service = registry.create_service(template, true).await.map_err(|e| {
                    tracing::warn!(template_hash = %template.hash, error = %e, "create failed");
                    e
                })?;
                tracing::info!(
                    service_hash = %service.hash,
                    template_hash = %template.hash,
                    "service created and deployed"
                );
                self.store.upsert_service(service);
            }
        }

        self.store.set_service_status(DeploymentStatus::Deployed);
        Ok(DeploymentStatus::Deployed)
    }

    /// Wait until the published balance clears the start guard, then start.
    ///
    /// `balance` is usually fed by a
    /// [`WalletBalanceWatcher`](crate::wallet::WalletBalanceWatcher). If the
    /// feed closes first, the last observed blocker is returned.
    pub async fn start_when_ready(
        &self,
        mut balance: watch::Receiver<WalletBalance>,
    ) -> Result<DeploymentStatus, RunStateError> {
        let minimum = self.min_start_balance;
        let observed = balance
            .wait_for(|b| start_blocker(*b, minimum).is_none())
            .await
            .map(|b| *b);
        let ready = match observed {
            Ok(ready) => ready,
            Err(_) => {
                let last = *balance.borrow();
                let reason =
                    start_blocker(last, minimum).unwrap_or(StartDisabledReason::RpcUnavailable);
                return Err(RunStateError::StartDisabled(reason));
            }
        };
        tracing::info!(balance = %ready, "operator balance sufficient, starting");
        self.start(ready).await
    }

    /// Stop the managed service.
    pub async fn stop(&self) -> Result<DeploymentStatus, RunStateError> {
        let _loading = self.begin()?;
        let service = self
            .store
            .current_service()
            .ok_or(RunStateError::NothingToStop)?;

        self.store
            .registry()
            .stop_deployment(&service.hash)
            .await
            .map_err(|e| {
                tracing::warn!(service_hash = %service.hash, error = %e, "stop failed");
                e
            })?;
        tracing::info!(service_hash = %service.hash, "service stopped");

        self.store.set_service_status(DeploymentStatus::Stopped);
        Ok(DeploymentStatus::Stopped)
    }

    /// Set the loading flag before any request is issued.
    fn begin(&self) -> Result<LoadingGuard<'_>, RunStateError> {
        self.is_loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| RunStateError::Busy)?;
        Ok(LoadingGuard(&self.is_loading))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRegistry;
    use rust_decimal_macros::dec;

    #[test]
    fn start_guard_distinguishes_unresolved_from_low_balance() {
        assert_eq!(
            start_blocker(WalletBalance::Unresolved, dec!(1)),
            Some(StartDisabledReason::RpcUnavailable)
        );
        assert_eq!(
            start_blocker(WalletBalance::Resolved(Decimal::ZERO), dec!(1)),
            Some(StartDisabledReason::InsufficientFunds)
        );
        assert_eq!(
            start_blocker(WalletBalance::Resolved(dec!(0.99)), dec!(1)),
            Some(StartDisabledReason::InsufficientFunds)
        );
        assert_eq!(start_blocker(WalletBalance::Resolved(dec!(1)), dec!(1)), None);
    }

    #[test]
    fn toggle_state_follows_status_and_balance() {
        let store = Arc::new(ServicesStore::new(Arc::new(FakeRegistry::default())));
        let controller = RunStateController::new(store.clone(), dec!(1));

        assert_eq!(
            controller.toggle_state(WalletBalance::Unresolved),
            ToggleState::Disabled(StartDisabledReason::RpcUnavailable)
        );
        assert_eq!(
            controller.toggle_state(WalletBalance::Resolved(dec!(5))),
            ToggleState::Start
        );

        store.set_service_status(DeploymentStatus::Deployed);
        assert_eq!(
            controller.toggle_state(WalletBalance::Unresolved),
            ToggleState::Pause
        );
    }

    #[tokio::test]
    async fn disabled_start_issues_no_request() {
        let registry = Arc::new(FakeRegistry::default());
        let store = Arc::new(ServicesStore::new(registry.clone()));
        let controller = RunStateController::new(store, dec!(1));

        let err = controller
            .start(WalletBalance::Resolved(dec!(0.5)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RunStateError::StartDisabled(StartDisabledReason::InsufficientFunds)
        ));
        assert!(registry.call_log().is_empty());
        assert!(!controller.is_loading());
    }
}
