//! Gateway to the orchestrator collaborator.
//!
//! The trait seam exists so the resolver can be exercised against a mock
//! upstream; production code uses [`HttpOrchestratorGateway`] over the
//! shared mutually-authenticated HTTP client.

use async_trait::async_trait;
use arrowhead_core::{OrchestrationError, OrchestrationRequest, OrchestrationResponse};
use tracing::debug;

use crate::config::CollaboratorEndpoint;

/// Issues orchestration queries to the orchestrator collaborator.
#[async_trait]
pub trait OrchestratorGateway: Send + Sync {
    /// Performs one orchestration query.
    ///
    /// # Errors
    ///
    /// `Unreachable` for transport-level failures, `Rejected` for non-2xx
    /// responses or malformed response bodies.
    async fn orchestrate(
        &self,
        request: &OrchestrationRequest,
    ) -> Result<OrchestrationResponse, OrchestrationError>;
}

/// HTTP gateway posting JSON to `POST /orchestrator/orchestration`.
pub struct HttpOrchestratorGateway {
    client: reqwest::Client,
    url: String,
}

impl HttpOrchestratorGateway {
    /// Creates a gateway for the given orchestrator endpoint.
    ///
    /// `client` must already carry the mutual-TLS identity when
    /// `tls_enabled` is true.
    #[must_use]
    pub fn new(client: reqwest::Client, endpoint: &CollaboratorEndpoint, tls_enabled: bool) -> Self {
        let scheme = if tls_enabled { "https" } else { "http" };
        Self {
            client,
            url: format!("{scheme}://{endpoint}/orchestrator/orchestration"),
        }
    }
}

#[async_trait]
impl OrchestratorGateway for HttpOrchestratorGateway {
    async fn orchestrate(
        &self,
        request: &OrchestrationRequest,
    ) -> Result<OrchestrationResponse, OrchestrationError> {
        debug!(
            service = %request.requested_service.service_definition_requirement,
            url = %self.url,
            "issuing orchestration query"
        );

        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| OrchestrationError::Unreachable {
                detail: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(OrchestrationError::Rejected {
                status: status.as_u16(),
                detail,
            });
        }

        response
            .json()
            .await
            .map_err(|e| OrchestrationError::Rejected {
                status: status.as_u16(),
                detail: format!("malformed orchestration response: {e}"),
            })
    }
}
