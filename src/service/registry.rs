//! Client for the backend service registry.
//!
//! The backend owns templates and provisioned services; this module only
//! issues request/response calls and decodes the results.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::RegistryError;
use crate::service::{Service, ServiceHash, ServiceTemplate};

/// Request/response contract of the backend service registry.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn get_service_templates(&self) -> Result<Vec<ServiceTemplate>, RegistryError>;

    async fn get_service_template(
        &self,
        hash: &ServiceHash,
    ) -> Result<ServiceTemplate, RegistryError>;

    /// Current services with their deployment status.
    async fn get_services(&self) -> Result<Vec<Service>, RegistryError>;

    /// Create a service from a template, optionally deploying it right away.
    async fn create_service(
        &self,
        template: &ServiceTemplate,
        deploy: bool,
    ) -> Result<Service, RegistryError>;

    /// Mint, register, and build the service against `rpc`, creating its keys.
    async fn build_service(&self, hash: &ServiceHash, rpc: &str)
    -> Result<Service, RegistryError>;

    async fn start_deployment(&self, hash: &ServiceHash) -> Result<(), RegistryError>;

    async fn stop_deployment(&self, hash: &ServiceHash) -> Result<(), RegistryError>;

    /// Update the service to the latest version of its template.
    ///
    /// The backend re-keys the service, so the hash it answers with replaces
    /// `hash` from then on.
    async fn update_service(&self, hash: &ServiceHash) -> Result<ServiceHash, RegistryError>;

    async fn delete_service(&self, hash: &ServiceHash) -> Result<(), RegistryError>;
}

#[derive(Debug, Serialize)]
struct CreateServiceRequest<'a> {
    service_template: &'a ServiceTemplate,
    deploy: bool,
}

#[derive(Debug, Serialize)]
struct BuildServiceRequest<'a> {
    rpc: &'a str,
}

#[derive(Debug, serde::Deserialize)]
struct UpdateServiceResponse {
    hash: ServiceHash,
}

#[derive(Debug, serde::Deserialize)]
struct BackendErrorBody {
    error: String,
}

/// What a 404 means for the request being made.
#[derive(Debug, Clone, Copy)]
enum NotFound<'a> {
    Service(&'a ServiceHash),
    Template(&'a ServiceHash),
    Generic,
}

/// HTTP implementation of [`ServiceRegistry`] against the operate backend.
pub struct HttpServiceRegistry {
    base_url: Url,
    client: Client,
    timeout: Duration,
}

impl HttpServiceRegistry {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, RegistryError> {
        if base_url.cannot_be_a_base() {
            return Err(RegistryError::InvalidUrl(base_url.to_string()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RegistryError::InvalidUrl(format!("HTTP client init failed: {e}")))?;
        Ok(Self {
            base_url,
            client,
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, RegistryError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RegistryError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<serde_json::Value>,
        not_found: NotFound<'_>,
    ) -> Result<reqwest::Response, RegistryError> {
        let url = self.endpoint(segments)?;
        tracing::debug!(method = %method, url = %url, "backend request");

        let mut request = self.client.request(method, url.clone());
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RegistryError::Timeout {
                    timeout: self.timeout,
                }
            } else {
                RegistryError::Unreachable {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::NOT_FOUND {
            match not_found {
                NotFound::Service(hash) => return Err(RegistryError::ServiceNotFound(hash.clone())),
                NotFound::Template(hash) => {
                    return Err(RegistryError::TemplateNotFound(hash.clone()));
                }
                NotFound::Generic => {}
            }
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<BackendErrorBody>(&text)
            .map(|body| body.error)
            .unwrap_or_else(|_| {
                if text.trim().is_empty() {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                } else {
                    text.trim().to_string()
                }
            });
        Err(RegistryError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<serde_json::Value>,
        not_found: NotFound<'_>,
    ) -> Result<T, RegistryError> {
        self.send(method, segments, body, not_found)
            .await?
            .json::<T>()
            .await
            .map_err(|e| RegistryError::InvalidResponse(e.to_string()))
    }
}

fn to_body<T: Serialize>(value: &T) -> Result<serde_json::Value, RegistryError> {
    serde_json::to_value(value)
        .map_err(|e| RegistryError::InvalidResponse(format!("failed to encode request: {e}")))
}

#[async_trait]
impl ServiceRegistry for HttpServiceRegistry {
    async fn get_service_templates(&self) -> Result<Vec<ServiceTemplate>, RegistryError> {
        self.send_json(
            Method::GET,
            &["api", "services", "templates"],
            None,
            NotFound::Generic,
        )
        .await
    }

    async fn get_service_template(
        &self,
        hash: &ServiceHash,
    ) -> Result<ServiceTemplate, RegistryError> {
        self.send_json(
            Method::GET,
            &["api", "services", "templates", hash.as_str()],
            None,
            NotFound::Template(hash),
        )
        .await
    }

    async fn get_services(&self) -> Result<Vec<Service>, RegistryError> {
        self.send_json(Method::GET, &["api", "services"], None, NotFound::Generic)
            .await
    }

    async fn create_service(
        &self,
        template: &ServiceTemplate,
        deploy: bool,
    ) -> Result<Service, RegistryError> {
        let body = to_body(&CreateServiceRequest {
            service_template: template,
            deploy,
        })?;
        let service: Service = self
            .send_json(
                Method::POST,
                &["api", "services"],
                Some(body),
                NotFound::Template(&template.hash),
            )
            .await?;
        tracing::info!(
            service_hash = %service.hash,
            template_hash = %template.hash,
            deploy,
            "service created"
        );
        Ok(service)
    }

    async fn build_service(
        &self,
        hash: &ServiceHash,
        rpc: &str,
    ) -> Result<Service, RegistryError> {
        let body = to_body(&BuildServiceRequest { rpc })?;
        let service: Service = self
            .send_json(
                Method::POST,
                &["api", "services", hash.as_str(), "build"],
                Some(body),
                NotFound::Service(hash),
            )
            .await?;
        tracing::info!(
            service_hash = %service.hash,
            instances = service.keys.instances.len(),
            "service built"
        );
        Ok(service)
    }

    async fn start_deployment(&self, hash: &ServiceHash) -> Result<(), RegistryError> {
        self.send(
            Method::POST,
            &["api", "services", hash.as_str(), "deployment", "start"],
            None,
            NotFound::Service(hash),
        )
        .await?;
        tracing::info!(service_hash = %hash, "deployment started");
        Ok(())
    }

    async fn stop_deployment(&self, hash: &ServiceHash) -> Result<(), RegistryError> {
        self.send(
            Method::POST,
            &["api", "services", hash.as_str(), "deployment", "stop"],
            None,
            NotFound::Service(hash),
        )
        .await?;
        tracing::info!(service_hash = %hash, "deployment stopped");
        Ok(())
    }

    async fn update_service(&self, hash: &ServiceHash) -> Result<ServiceHash, RegistryError> {
        let updated: UpdateServiceResponse = self
            .send_json(
                Method::POST,
                &["api", "services", hash.as_str(), "update"],
                None,
                NotFound::Service(hash),
            )
            .await?;
        tracing::info!(
            service_hash = %hash,
            new_service_hash = %updated.hash,
            "service updated"
        );
        Ok(updated.hash)
    }

    async fn delete_service(&self, hash: &ServiceHash) -> Result<(), RegistryError> {
        self.send(
            Method::DELETE,
            &["api", "services", hash.as_str()],
            None,
            NotFound::Service(hash),
        )
        .await?;
        tracing::info!(service_hash = %hash, "service deleted");
        Ok(())
    }
}
