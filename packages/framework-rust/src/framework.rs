//! Consumer facade composing resolution, token handling, and dispatch.
//!
//! `send_request` is the one operation consumers need: resolve the service
//! through the orchestrator (cached, single-flight), attach the live token
//! when the provider requires one, dispatch over the mutually-authenticated
//! transport, and — on an authorization rejection — invalidate the cached
//! resolution and retry the whole chain exactly once.

use std::sync::Arc;

use arrowhead_core::{DispatchError, FrameworkError, Identity, Params, SecurityError, SecurityLevel};
use bytes::Bytes;
use tracing::{debug, warn};

use crate::config::FrameworkConfig;
use crate::dispatch::{build_http_client, RequestDispatcher, ServiceEndpoint};
use crate::orchestration::{
    HttpOrchestratorGateway, OrchestrationResolver, OrchestrationResult, OrchestratorGateway,
    ResolveOptions,
};
use crate::security::TrustContext;
use crate::token::TokenCache;

/// Entry point for consumers: one facade owning the resolver, token cache,
/// and dispatcher for its lifetime.
pub struct Framework {
    identity: Identity,
    resolver: OrchestrationResolver,
    tokens: TokenCache,
    dispatcher: RequestDispatcher,
}

impl std::fmt::Debug for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framework")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl Framework {
    /// Builds the facade: loads trust material when TLS is configured,
    /// derives the identity, and wires the resolver/token-cache/dispatcher
    /// over one shared HTTP client.
    ///
    /// # Errors
    ///
    /// `SecurityError` when trust material cannot be loaded or no identity
    /// can be established (no TLS and no explicit system name).
    pub fn new(config: FrameworkConfig) -> Result<Self, SecurityError> {
        let trust = config
            .tls
            .as_ref()
            .map(|tls| TrustContext::from_settings(tls, &config.system))
            .transpose()?;

        let identity = match &trust {
            Some(context) => context.identity().clone(),
            None => {
                let name = config.system.name.clone().ok_or_else(|| {
                    SecurityError::Certificate(
                        "no TLS keystore and no explicit system name; identity cannot be \
                         established"
                            .to_string(),
                    )
                })?;
                Identity::new(name, config.system.address.clone(), config.system.port)
            }
        };

        let client = build_http_client(trust.as_ref().map(TrustContext::client_tls), &config.dispatch)?;
        let tls_enabled = config.tls.is_some();

        let gateway: Arc<dyn OrchestratorGateway> = Arc::new(HttpOrchestratorGateway::new(
            client.clone(),
            &config.orchestrator,
            tls_enabled,
        ));

        debug!(identity = %identity, "framework ready");
        Ok(Self {
            identity,
            resolver: OrchestrationResolver::new(
                gateway,
                config.resolver.clone(),
                config.security_level(),
            ),
            tokens: TokenCache::new(config.token.clone()),
            dispatcher: RequestDispatcher::new(client, config.dispatch.clone(), tls_enabled),
        })
    }

    /// The identity this framework authenticates as.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Resolves a service to its ranked provider candidates without
    /// dispatching, for callers layering their own failover policy.
    ///
    /// # Errors
    ///
    /// Propagates resolver failures; see
    /// [`OrchestrationResolver::resolve`].
    pub async fn resolve(
        &self,
        service: &str,
        options: &ResolveOptions,
    ) -> Result<Arc<OrchestrationResult>, FrameworkError> {
        Ok(self.resolver.resolve(service, &self.identity, options).await?)
    }

    /// Sends one request to the named service and returns the response
    /// bytes verbatim.
    ///
    /// # Errors
    ///
    /// A typed [`FrameworkError`]: orchestration failures (including
    /// `ServiceNotAvailable` — the dispatcher is never invoked then),
    /// dispatch failures after internal retries, or a missing token for a
    /// token-secured service.
    pub async fn send_request(&self, service: &str, params: Params) -> Result<Bytes, FrameworkError> {
        self.send_request_with(service, params, &ResolveOptions::default())
            .await
    }

    /// [`Framework::send_request`] with explicit resolve options (target
    /// system, all-candidates).
    ///
    /// # Errors
    ///
    /// See [`Framework::send_request`].
    pub async fn send_request_with(
        &self,
        service: &str,
        params: Params,
        options: &ResolveOptions,
    ) -> Result<Bytes, FrameworkError> {
        let mut result = self.resolver.resolve(service, &self.identity, options).await?;
        let mut refreshed = false;

        loop {
            self.store_tokens(&result);
            let matched = result.primary();
            let endpoint = ServiceEndpoint::from_match(matched).ok_or_else(|| {
                FrameworkError::InvalidMatch {
                    service: service.to_string(),
                    detail: "matched service carries no http-method metadata".to_string(),
                }
            })?;

            let token = if endpoint.security == SecurityLevel::Token {
                match self.tokens.token_for(
                    &self.identity,
                    &matched.provider.system_name,
                    service,
                ) {
                    Some(token) => Some(token),
                    None if !refreshed => {
                        // The cached resolution's token has expired; a fresh
                        // resolve carries a fresh token.
                        debug!(service, "token expired, re-resolving");
                        refreshed = true;
                        self.resolver.invalidate(service, &self.identity, options);
                        result = self.resolver.resolve(service, &self.identity, options).await?;
                        continue;
                    }
                    None => {
                        return Err(FrameworkError::MissingToken {
                            service: service.to_string(),
                        })
                    }
                }
            } else {
                None
            };

            match self
                .dispatcher
                .dispatch(&endpoint, &params, token.as_ref().map(crate::token::Token::as_str))
                .await
            {
                Ok(body) => return Ok(body),
                Err(DispatchError::Authorization { status }) if !refreshed => {
                    // One full-stack retry: the provider may have moved, or
                    // the token in the cached resolution may be stale.
                    warn!(service, status, "authorization rejected, re-resolving once");
                    refreshed = true;
                    self.resolver.invalidate(service, &self.identity, options);
                    result = self.resolver.resolve(service, &self.identity, options).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn store_tokens(&self, result: &OrchestrationResult) {
        for matched in &result.matches {
            self.tokens.store_from(&self.identity, matched);
        }
    }
}
