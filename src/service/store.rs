//! Process-wide cache of the backend's service list.
//!
//! The store is the single owner of the "current services" view. Readers take
//! snapshots or subscribe for changes; writers go through
//! [`ServicesStore::update_services_state`] or
//! [`ServicesStore::set_service_status`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};

use crate::error::RegistryError;
use crate::service::{DeploymentStatus, Service, ServiceRegistry};

/// Point-in-time view of the managed services.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServicesSnapshot {
    pub services: Vec<Service>,
    /// Status of the managed (first) service.
    pub service_status: DeploymentStatus,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl ServicesSnapshot {
    pub fn current_service(&self) -> Option<&Service> {
        self.services.first()
    }
}

/// Owned, subscribable service-list cache shared by the wizard and the
/// run-state controller.
pub struct ServicesStore {
    registry: Arc<dyn ServiceRegistry>,
    state: watch::Sender<ServicesSnapshot>,
    /// Serializes refreshes so a slow response cannot overwrite a newer one.
    refresh_lock: Mutex<()>,
}

impl ServicesStore {
    pub fn new(registry: Arc<dyn ServiceRegistry>) -> Self {
        let (state, _) = watch::channel(ServicesSnapshot::default());
        Self {
            registry,
            state,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<dyn ServiceRegistry> {
        &self.registry
    }

    pub fn snapshot(&self) -> ServicesSnapshot {
        self.state.borrow().clone()
    }

    pub fn services(&self) -> Vec<Service> {
        self.state.borrow().services.clone()
    }

    pub fn current_service(&self) -> Option<Service> {
        self.state.borrow().current_service().cloned()
    }

    pub fn service_status(&self) -> DeploymentStatus {
        self.state.borrow().service_status
    }

    /// Receive every subsequent change to the snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ServicesSnapshot> {
        self.state.subscribe()
    }

    /// Re-fetch the service list from the registry.
    ///
    /// On failure the previous snapshot is kept.
    pub async fn update_services_state(&self) -> Result<(), RegistryError> {
        let _guard = self.refresh_lock.lock().await;
        let services = self.registry.get_services().await?;
        let service_status = services
            .first()
            .map(|service| service.status)
            .unwrap_or_default();
        tracing::debug!(
            count = services.len(),
            status = %service_status,
            "services state refreshed"
        );
        self.state.send_replace(ServicesSnapshot {
            services,
            service_status,
            refreshed_at: Some(Utc::now()),
        });
        Ok(())
    }

    /// Record a status confirmed by the registry for the managed service.
    pub fn set_service_status(&self, status: DeploymentStatus) {
        self.state.send_modify(|snapshot| {
            snapshot.service_status = status;
            if let Some(service) = snapshot.services.first_mut() {
                service.status = status;
            }
        });
    }

    /// Insert or replace a service returned by the registry.
    pub fn upsert_service(&self, service: Service) {
        self.state.send_modify(|snapshot| {
            match snapshot.services.iter_mut().find(|s| s.hash == service.hash) {
                Some(existing) => *existing = service,
                None => snapshot.services.push(service),
            }
            if let Some(first) = snapshot.services.first() {
                snapshot.service_status = first.status;
            }
        });
    }
}
