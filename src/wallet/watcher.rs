//! Background refresh of the operator wallet balance.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::service::Address;
use crate::wallet::{BalanceOracle, WalletBalance};

/// Re-fetches one address's native balance on a fixed cadence.
///
/// The refresh task stops when the watcher is dropped.
pub struct WalletBalanceWatcher {
    balance: watch::Receiver<WalletBalance>,
    handle: JoinHandle<()>,
}

impl WalletBalanceWatcher {
    pub fn spawn(oracle: Arc<dyn BalanceOracle>, address: Address, refresh: Duration) -> Self {
        let (tx, balance) = watch::channel(WalletBalance::Unresolved);
        let handle = tokio::spawn(async move {
            loop {
                let next = WalletBalance::fetch(oracle.as_ref(), &address).await;
                tx.send_if_modified(|current| {
                    if *current == next {
                        false
                    } else {
                        *current = next;
                        true
                    }
                });
                tokio::time::sleep(refresh).await;
            }
        });
        Self { balance, handle }
    }

    pub fn current(&self) -> WalletBalance {
        *self.balance.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<WalletBalance> {
        self.balance.clone()
    }
}

impl Drop for WalletBalanceWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
