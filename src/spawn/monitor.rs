//! Funding verification as a cancellable background task.
//!
//! A [`FundingMonitor`] polls the balance oracle until every address in one
//! requirement pool holds at least its required amount. It is owned by the
//! wizard session: dropping the monitor aborts the task.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::try_join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::BalanceError;
use crate::service::Address;
use crate::spawn::funding::FundRequirementMap;
use crate::wallet::BalanceOracle;

/// Polling cadence for funding verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingPollPolicy {
    /// Delay between checks while the oracle answers.
    pub interval: Duration,
    /// Upper bound for the backoff applied while the oracle is unreachable.
    pub max_backoff: Duration,
    /// Overall wait limit; `None` keeps polling until funded.
    pub timeout: Option<Duration>,
}

impl Default for FundingPollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
            timeout: None,
        }
    }
}

impl FundingPollPolicy {
    /// Delay before the next check after `consecutive_failures` oracle errors.
    pub fn next_delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return self.interval;
        }
        let factor = 2u32.saturating_pow(consecutive_failures.min(16));
        self.interval
            .saturating_mul(factor)
            .min(self.max_backoff.max(self.interval))
    }
}

/// Which balance a pool is checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FundingAsset {
    Native,
    Token(Address),
}

/// Latest monitor observation.
#[derive(Debug, Clone, PartialEq)]
pub enum FundingProgress {
    Checking,
    /// Remaining shortfall per address.
    Pending(FundRequirementMap),
    Unreachable { reason: String, retry_in: Duration },
    Funded,
    TimedOut,
}

impl FundingProgress {
    pub fn outcome(&self) -> Option<FundingOutcome> {
        match self {
            Self::Funded => Some(FundingOutcome::Funded),
            Self::TimedOut => Some(FundingOutcome::TimedOut),
            Self::Checking | Self::Pending(_) | Self::Unreachable { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundingOutcome {
    Funded,
    TimedOut,
    /// The task ended without a verdict (aborted or panicked).
    Stopped,
}

/// Shortfall of every address below its requirement. Empty means funded.
pub async fn check_funding_once(
    oracle: &dyn BalanceOracle,
    asset: &FundingAsset,
    requirements: &FundRequirementMap,
) -> Result<FundRequirementMap, BalanceError> {
    let lookups = requirements.iter().map(|(address, required)| async move {
        let balance = match asset {
            FundingAsset::Native => oracle.get_balance(address).await?,
            FundingAsset::Token(token) => oracle.get_token_balance(address, token).await?,
        };
        Ok::<_, BalanceError>((address, *required, balance))
    });

    let mut shortfall = FundRequirementMap::new();
    for (address, required, balance) in try_join_all(lookups).await? {
        if balance < required {
            shortfall.insert(address.clone(), required - balance);
        }
    }
    Ok(shortfall)
}

pub struct FundingMonitor {
    progress: watch::Receiver<FundingProgress>,
    handle: JoinHandle<()>,
}

impl FundingMonitor {
    pub fn spawn(
        oracle: Arc<dyn BalanceOracle>,
        asset: FundingAsset,
        requirements: FundRequirementMap,
        policy: FundingPollPolicy,
    ) -> Self {
        let (tx, progress) = watch::channel(FundingProgress::Checking);
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let mut failures = 0u32;
            loop {
                let delay = match check_funding_once(oracle.as_ref(), &asset, &requirements).await
                {
                    Ok(shortfall) if shortfall.is_empty() => {
                        tracing::info!(addresses = requirements.len(), "funding observed");
                        tx.send_replace(FundingProgress::Funded);
                        return;
                    }
                    Ok(shortfall) => {
                        failures = 0;
                        tracing::debug!(pending = shortfall.len(), "not yet funded");
                        tx.send_replace(FundingProgress::Pending(shortfall));
                        policy.next_delay(0)
                    }
                    Err(e) => {
                        failures = failures.saturating_add(1);
                        let retry_in = policy.next_delay(failures);
                        tracing::warn!(
                            error = %e,
                            retry_in_ms = retry_in.as_millis() as u64,
                            "balance oracle unavailable during funding check"
                        );
                        tx.send_replace(FundingProgress::Unreachable {
                            reason: e.to_string(),
                            retry_in,
                        });
                        retry_in
                    }
                };

                let delay = match policy.timeout {
                    Some(timeout) => {
                        let remaining = timeout.saturating_sub(started.elapsed());
                        if remaining.is_zero() {
                            tracing::warn!(timeout_secs = timeout.as_secs(), "funding wait timed out");
                            tx.send_replace(FundingProgress::TimedOut);
                            return;
                        }
                        delay.min(remaining)
                    }
                    None => delay,
                };
                tokio::time::sleep(delay).await;
            }
        });
        Self { progress, handle }
    }

    pub fn progress(&self) -> watch::Receiver<FundingProgress> {
        self.progress.clone()
    }

    pub fn latest(&self) -> FundingProgress {
        self.progress.borrow().clone()
    }
}

impl Drop for FundingMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Wait until the monitor behind `progress` reaches a verdict.
pub async fn wait_for_outcome(mut progress: watch::Receiver<FundingProgress>) -> FundingOutcome {
    loop {
        if let Some(outcome) = progress.borrow_and_update().outcome() {
            return outcome;
        }
        if progress.changed().await.is_err() {
            return progress
                .borrow()
                .outcome()
                .unwrap_or(FundingOutcome::Stopped);
        }
    }
}
