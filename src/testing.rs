//! In-memory collaborators for tests and offline dry runs.
//!
//! [`FakeRegistry`] behaves like the backend registry with the same guards
//! (missing RPC, duplicate deployment, start while running) and records every
//! call. [`FakeBalanceOracle`] serves balances from a table.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Semaphore;

use crate::error::{BalanceError, RegistryError};
use crate::service::{
    Address, DeploymentStatus, Service, ServiceHash, ServiceKeys, ServiceRegistry,
    ServiceTemplate,
};
use crate::wallet::BalanceOracle;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct RegistryState {
    templates: Vec<ServiceTemplate>,
    services: Vec<Service>,
    build_keys: ServiceKeys,
    calls: Vec<String>,
    fail_next: HashSet<String>,
    created: u32,
    updated: u32,
}

/// Scripted [`ServiceRegistry`].
#[derive(Default)]
pub struct FakeRegistry {
    state: Mutex<RegistryState>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeRegistry {
    pub fn with_templates(templates: Vec<ServiceTemplate>) -> Self {
        let registry = Self::default();
        lock(&registry.state).templates = templates;
        registry
    }

    pub fn set_services(&self, services: Vec<Service>) {
        lock(&self.state).services = services;
    }

    /// Keys attached to services produced by create/build.
    pub fn set_build_keys(&self, keys: ServiceKeys) {
        lock(&self.state).build_keys = keys;
    }

    /// Make the next call to `method` fail with a 500 rejection.
    pub fn fail_next(&self, method: &str) {
        lock(&self.state).fail_next.insert(method.to_string());
    }

    /// Park every subsequent call until [`FakeRegistry::release`].
    pub fn hold(&self) {
        *lock(&self.gate) = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self) {
        if let Some(gate) = lock(&self.gate).take() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    /// Number of recorded calls to `method`.
    pub fn calls(&self, method: &str) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|c| c.as_str() == method)
            .count()
    }

    pub fn call_log(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    pub fn services_snapshot(&self) -> Vec<Service> {
        lock(&self.state).services.clone()
    }

    async fn enter(&self, method: &str) -> Result<(), RegistryError> {
        {
            let mut state = lock(&self.state);
            state.calls.push(method.to_string());
        }
        let gate = lock(&self.gate).clone();
        if let Some(gate) = gate {
            let _ = gate.acquire().await;
        }
        if lock(&self.state).fail_next.remove(method) {
            return Err(RegistryError::Rejected {
                status: 500,
                message: format!("{method} failed"),
            });
        }
        Ok(())
    }
}

fn rejected(message: &str) -> RegistryError {
    RegistryError::Rejected {
        status: 400,
        message: message.to_string(),
    }
}

#[async_trait]
impl ServiceRegistry for FakeRegistry {
    async fn get_service_templates(&self) -> Result<Vec<ServiceTemplate>, RegistryError> {
        self.enter("get_service_templates").await?;
        Ok(lock(&self.state).templates.clone())
    }

    async fn get_service_template(
        &self,
        hash: &ServiceHash,
    ) -> Result<ServiceTemplate, RegistryError> {
        self.enter("get_service_template").await?;
        lock(&self.state)
            .templates
            .iter()
            .find(|t| &t.hash == hash)
            .cloned()
            .ok_or_else(|| RegistryError::TemplateNotFound(hash.clone()))
    }

    async fn get_services(&self) -> Result<Vec<Service>, RegistryError> {
        self.enter("get_services").await?;
        Ok(lock(&self.state).services.clone())
    }

    async fn create_service(
        &self,
        template: &ServiceTemplate,
        deploy: bool,
    ) -> Result<Service, RegistryError> {
        self.enter("create_service").await?;
        let mut state = lock(&self.state);
        state.created += 1;
        let service = Service {
            hash: ServiceHash::new(format!("svc-{}", state.created)),
            template_hash: template.hash.clone(),
            name: template.name.clone(),
            status: if deploy {
                DeploymentStatus::Deployed
            } else {
                DeploymentStatus::NotDeployed
            },
            rpc: template.configuration.rpc.clone(),
            keys: state.build_keys.clone(),
        };
        state.services.push(service.clone());
        Ok(service)
    }

    async fn build_service(
        &self,
        hash: &ServiceHash,
        rpc: &str,
    ) -> Result<Service, RegistryError> {
        self.enter("build_service").await?;
        if rpc.trim().is_empty() {
            return Err(rejected("Missing RPC"));
        }
        let mut state = lock(&self.state);
        if state
            .services
            .iter()
            .any(|s| &s.hash == hash && s.status != DeploymentStatus::NotDeployed)
        {
            return Err(rejected("Deployment already exists"));
        }
        let template = state
            .templates
            .iter()
            .find(|t| &t.hash == hash)
            .cloned()
            .ok_or_else(|| RegistryError::ServiceNotFound(hash.clone()))?;
        let service = Service {
            hash: hash.clone(),
            template_hash: template.hash.clone(),
            name: template.name.clone(),
            status: DeploymentStatus::NotDeployed,
            rpc: Some(rpc.to_string()),
            keys: state.build_keys.clone(),
        };
        state.services.retain(|s| &s.hash != hash);
        state.services.push(service.clone());
        Ok(service)
    }

    async fn start_deployment(&self, hash: &ServiceHash) -> Result<(), RegistryError> {
        self.enter("start_deployment").await?;
        let mut state = lock(&self.state);
        let service = state
            .services
            .iter_mut()
            .find(|s| &s.hash == hash)
            .ok_or_else(|| RegistryError::ServiceNotFound(hash.clone()))?;
        if service.status == DeploymentStatus::Deployed {
            return Err(rejected("Service is already running"));
        }
        service.status = DeploymentStatus::Deployed;
        Ok(())
    }

    async fn stop_deployment(&self, hash: &ServiceHash) -> Result<(), RegistryError> {
        self.enter("stop_deployment").await?;
        let mut state = lock(&self.state);
        let service = state
            .services
            .iter_mut()
            .find(|s| &s.hash == hash)
            .ok_or_else(|| RegistryError::ServiceNotFound(hash.clone()))?;
        if service.status == DeploymentStatus::Stopped {
            return Err(rejected("Service is already stopped"));
        }
        service.status = DeploymentStatus::Stopped;
        Ok(())
    }

    async fn update_service(&self, hash: &ServiceHash) -> Result<ServiceHash, RegistryError> {
        self.enter("update_service").await?;
        let mut state = lock(&self.state);
        let index = state
            .services
            .iter()
            .position(|s| &s.hash == hash)
            .ok_or_else(|| RegistryError::ServiceNotFound(hash.clone()))?;
        state.updated += 1;
        let next = ServiceHash::new(format!("{hash}-v{}", state.updated + 1));
        state.services[index].hash = next.clone();
        Ok(next)
    }

    async fn delete_service(&self, hash: &ServiceHash) -> Result<(), RegistryError> {
        self.enter("delete_service").await?;
        let mut state = lock(&self.state);
        let before = state.services.len();
        state.services.retain(|s| &s.hash != hash);
        if state.services.len() == before {
            return Err(RegistryError::ServiceNotFound(hash.clone()));
        }
        Ok(())
    }
}

#[derive(Default)]
struct OracleState {
    native: HashMap<Address, Decimal>,
    token: HashMap<(Address, Address), Decimal>,
    unreachable: bool,
    lookups: usize,
    parked: usize,
}

/// Table-driven [`BalanceOracle`]. Unknown addresses hold zero.
#[derive(Default)]
pub struct FakeBalanceOracle {
    state: Mutex<OracleState>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeBalanceOracle {
    pub fn set_balance(&self, address: &Address, amount: Decimal) {
        lock(&self.state).native.insert(address.clone(), amount);
    }

    pub fn set_token_balance(&self, address: &Address, token: &Address, amount: Decimal) {
        lock(&self.state)
            .token
            .insert((address.clone(), token.clone()), amount);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        lock(&self.state).unreachable = unreachable;
    }

    pub fn lookups(&self) -> usize {
        lock(&self.state).lookups
    }

    /// Park every subsequent lookup until [`FakeBalanceOracle::release`].
    pub fn hold(&self) {
        *lock(&self.gate) = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self) {
        if let Some(gate) = lock(&self.gate).take() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    /// Lookups currently parked by [`FakeBalanceOracle::hold`].
    pub fn parked(&self) -> usize {
        lock(&self.state).parked
    }

    async fn pass_gate(&self) {
        let gate = lock(&self.gate).clone();
        if let Some(gate) = gate {
            lock(&self.state).parked += 1;
            let _ = gate.acquire().await;
            lock(&self.state).parked -= 1;
        }
    }

    fn read<F>(&self, select: F) -> Result<Decimal, BalanceError>
    where
        F: FnOnce(&OracleState) -> Option<Decimal>,
    {
        let mut state = lock(&self.state);
        state.lookups += 1;
        if state.unreachable {
            return Err(BalanceError::Unreachable {
                url: "memory://oracle".to_string(),
                reason: "oracle offline".to_string(),
            });
        }
        Ok(select(&state).unwrap_or(Decimal::ZERO))
    }
}

#[async_trait]
impl BalanceOracle for FakeBalanceOracle {
    async fn get_balance(&self, address: &Address) -> Result<Decimal, BalanceError> {
        self.pass_gate().await;
        self.read(|state| state.native.get(address).copied())
    }

    async fn get_token_balance(
        &self,
        address: &Address,
        token: &Address,
    ) -> Result<Decimal, BalanceError> {
        self.pass_gate().await;
        self.read(|state| {
            state
                .token
                .get(&(address.clone(), token.clone()))
                .copied()
        })
    }
}
