//! Client for the service-registry collaborator.
//!
//! Only the provider-lifecycle surface lives here: registering a service
//! on startup and unregistering it on shutdown. Registration has upsert
//! semantics from the provider's point of view — a conflicting stale entry
//! is replaced with one unregister-then-register cycle instead of failing
//! startup.

use async_trait::async_trait;
use arrowhead_core::{RegistrationError, ServiceRegistrationRequest};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::CollaboratorEndpoint;

/// Query parameters of `DELETE /serviceregistry/unregister`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnregisterQuery {
    pub service_definition: String,
    pub system_name: String,
    pub address: String,
    pub port: u16,
    pub service_uri: String,
}

/// Registers and unregisters provider services.
#[async_trait]
pub trait ServiceRegistryClient: Send + Sync {
    /// Registers one service, replacing a conflicting prior entry for the
    /// same (provider, definition, version) key.
    ///
    /// # Errors
    ///
    /// Returns `RegistrationError` when the registry cannot be reached or
    /// rejects the registration even after conflict resolution.
    async fn register(&self, request: &ServiceRegistrationRequest) -> Result<(), RegistrationError>;

    /// Removes one service registration. Removing an unknown registration
    /// is not an error.
    ///
    /// # Errors
    ///
    /// Returns `RegistrationError` when the registry cannot be reached or
    /// answers with an unexpected status.
    async fn unregister(&self, query: &UnregisterQuery) -> Result<(), RegistrationError>;
}

/// HTTP implementation against `POST /serviceregistry/register` and
/// `DELETE /serviceregistry/unregister`.
pub struct HttpServiceRegistryClient {
    client: reqwest::Client,
    base: String,
}

impl HttpServiceRegistryClient {
    /// Creates a client for the given registry endpoint.
    ///
    /// `client` must already carry the mutual-TLS identity when
    /// `tls_enabled` is true.
    #[must_use]
    pub fn new(client: reqwest::Client, endpoint: &CollaboratorEndpoint, tls_enabled: bool) -> Self {
        let scheme = if tls_enabled { "https" } else { "http" };
        Self {
            client,
            base: format!("{scheme}://{endpoint}/serviceregistry"),
        }
    }

    async fn register_once(
        &self,
        request: &ServiceRegistrationRequest,
    ) -> Result<reqwest::StatusCode, RegistrationError> {
        let response = self
            .client
            .post(format!("{}/register", self.base))
            .json(request)
            .send()
            .await
            .map_err(|e| RegistrationError {
                service: request.service_definition.clone(),
                status: None,
                detail: format!("registry unreachable: {e}"),
            })?;
        Ok(response.status())
    }
}

#[async_trait]
impl ServiceRegistryClient for HttpServiceRegistryClient {
    async fn register(&self, request: &ServiceRegistrationRequest) -> Result<(), RegistrationError> {
        let status = self.register_once(request).await?;
        if status.is_success() {
            info!(service = %request.service_definition, "service registered");
            return Ok(());
        }

        // The registry rejects duplicate keys; realize upsert semantics by
        // clearing the stale entry once and registering again.
        if matches!(status.as_u16(), 400 | 409) {
            debug!(
                service = %request.service_definition,
                "registration conflict, replacing stale entry"
            );
            let query = UnregisterQuery {
                service_definition: request.service_definition.clone(),
                system_name: request.provider_system.system_name.clone(),
                address: request.provider_system.address.clone(),
                port: request.provider_system.port,
                service_uri: request.service_uri.clone(),
            };
            self.unregister(&query).await?;

            let retry_status = self.register_once(request).await?;
            if retry_status.is_success() {
                info!(service = %request.service_definition, "service re-registered");
                return Ok(());
            }
            return Err(RegistrationError {
                service: request.service_definition.clone(),
                status: Some(retry_status.as_u16()),
                detail: "registry rejected registration after conflict resolution".to_string(),
            });
        }

        Err(RegistrationError {
            service: request.service_definition.clone(),
            status: Some(status.as_u16()),
            detail: "registry rejected registration".to_string(),
        })
    }

    async fn unregister(&self, query: &UnregisterQuery) -> Result<(), RegistrationError> {
        let response = self
            .client
            .delete(format!("{}/unregister", self.base))
            .query(query)
            .send()
            .await
            .map_err(|e| RegistrationError {
                service: query.service_definition.clone(),
                status: None,
                detail: format!("registry unreachable: {e}"),
            })?;

        let status = response.status();
        // 404 means the entry was already gone, which is the desired state.
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            debug!(service = %query.service_definition, "service unregistered");
            Ok(())
        } else {
            Err(RegistrationError {
                service: query.service_definition.clone(),
                status: Some(status.as_u16()),
                detail: "registry rejected unregistration".to_string(),
            })
        }
    }
}
