//! Orchestration resolver with TTL caching and single-flight coalescing.
//!
//! Repeated resolves for the same (service, requester, options) key within
//! the TTL window are served from cache without a network call. Concurrent
//! resolves for the same key while a query is in flight share that one
//! query: all callers observe its result or its failure. Failures are never
//! cached.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use arrowhead_core::{
    Identity, MatchedService, OrchestrationError, OrchestrationFlags, OrchestrationRequest,
    PreferredProvider, PreferredSystem, RequestedService, RequesterSystem, SecurityLevel,
    HTTP_SECURE_JSON,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::Shared;
use futures_util::FutureExt;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::ResolverConfig;

use super::gateway::OrchestratorGateway;

/// Caller-supplied options narrowing a resolution.
///
/// Participates in the cache key: resolves with different options never
/// share cache entries or in-flight queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Restrict matchmaking to this provider system.
    pub target_system: Option<String>,
    /// Caller intends to use the full candidate list (for failover
    /// policies), not just the primary match.
    pub all_candidates: bool,
}

impl ResolveOptions {
    fn fingerprint(&self) -> String {
        format!(
            "target={};all={}",
            self.target_system.as_deref().unwrap_or("-"),
            self.all_candidates
        )
    }
}

/// A successful resolution: ranked provider candidates, best first.
///
/// Non-empty by construction; an empty orchestrator answer becomes
/// [`OrchestrationError::ServiceNotAvailable`] instead.
#[derive(Debug)]
pub struct OrchestrationResult {
    /// Ranked candidates in the order the orchestrator returned them.
    pub matches: Vec<MatchedService>,
}

impl OrchestrationResult {
    /// The authoritative primary match (first entry).
    #[must_use]
    pub fn primary(&self) -> &MatchedService {
        &self.matches[0]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    service: String,
    requester: String,
    fingerprint: String,
}

struct CachedEntry {
    result: Arc<OrchestrationResult>,
    expires_at: Instant,
}

type FlightOutput = Result<Arc<OrchestrationResult>, OrchestrationError>;
type Flight = Shared<Pin<Box<dyn Future<Output = FlightOutput> + Send>>>;

/// Resolves service names to reachable providers via the orchestrator.
pub struct OrchestrationResolver {
    gateway: Arc<dyn OrchestratorGateway>,
    config: ResolverConfig,
    security: SecurityLevel,
    cache: Arc<DashMap<CacheKey, CachedEntry>>,
    inflight: Arc<DashMap<CacheKey, Flight>>,
}

impl OrchestrationResolver {
    /// Creates a resolver over the given gateway.
    ///
    /// `security` sets the security requirement advertised in every
    /// orchestration query.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn OrchestratorGateway>,
        config: ResolverConfig,
        security: SecurityLevel,
    ) -> Self {
        Self {
            gateway,
            config,
            security,
            cache: Arc::new(DashMap::new()),
            inflight: Arc::new(DashMap::new()),
        }
    }

    /// Resolves a service name to ranked provider candidates.
    ///
    /// The upstream query is bounded by the configured query timeout, which
    /// also bounds how long coalesced callers wait. A caller with a tighter
    /// deadline may wrap this call in its own timeout; abandoning the wait
    /// does not cancel the shared query for the other callers.
    ///
    /// # Errors
    ///
    /// `ServiceNotAvailable` when the orchestrator has no candidate,
    /// `Unreachable`/`Rejected` for transport or collaborator failures.
    /// Failures are never cached.
    pub async fn resolve(
        &self,
        service: &str,
        requester: &Identity,
        options: &ResolveOptions,
    ) -> Result<Arc<OrchestrationResult>, OrchestrationError> {
        let key = CacheKey {
            service: service.to_string(),
            requester: requester.system_name.clone(),
            fingerprint: options.fingerprint(),
        };

        {
            let now = Instant::now();
            if let Some(entry) = self.cache.get(&key) {
                if entry.expires_at > now {
                    debug!(service, "orchestration cache hit");
                    return Ok(Arc::clone(&entry.result));
                }
            }
        }
        // Lazily prune the expired entry before going upstream.
        self.cache
            .remove_if(&key, |_, entry| entry.expires_at <= Instant::now());

        let flight = match self.inflight.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                debug!(service, "joining in-flight orchestration query");
                occupied.get().clone()
            }
            Entry::Vacant(vacant) => {
                let request = self.build_request(service, requester, options);
                let flight = Self::query(
                    Arc::clone(&self.gateway),
                    request,
                    key.clone(),
                    Arc::clone(&self.cache),
                    Arc::clone(&self.inflight),
                    self.config.clone(),
                )
                .boxed()
                .shared();
                vacant.insert(flight.clone());
                flight
            }
        };

        flight.await
    }

    /// Drops the cache entry for the given key immediately, forcing the
    /// next resolve to query upstream. Called after an authorization
    /// failure: the provider may have moved, or the token embedded in the
    /// cached result may be stale.
    pub fn invalidate(&self, service: &str, requester: &Identity, options: &ResolveOptions) {
        let key = CacheKey {
            service: service.to_string(),
            requester: requester.system_name.clone(),
            fingerprint: options.fingerprint(),
        };
        if self.cache.remove(&key).is_some() {
            debug!(service, "orchestration cache entry invalidated");
        }
    }

    /// The single upstream query backing one cache key. Runs at most once
    /// per key at a time (guarded by the in-flight map); caches on success
    /// and always clears the in-flight entry when done.
    async fn query(
        gateway: Arc<dyn OrchestratorGateway>,
        request: OrchestrationRequest,
        key: CacheKey,
        cache: Arc<DashMap<CacheKey, CachedEntry>>,
        inflight: Arc<DashMap<CacheKey, Flight>>,
        config: ResolverConfig,
    ) -> FlightOutput {
        let outcome = match tokio::time::timeout(config.query_timeout, gateway.orchestrate(&request))
            .await
        {
            Ok(Ok(response)) if response.response.is_empty() => {
                Err(OrchestrationError::ServiceNotAvailable {
                    service: key.service.clone(),
                })
            }
            Ok(Ok(response)) => Ok(Arc::new(OrchestrationResult {
                matches: response.response,
            })),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(OrchestrationError::Unreachable {
                detail: format!(
                    "orchestration query timed out after {}ms",
                    config.query_timeout.as_millis()
                ),
            }),
        };

        match &outcome {
            Ok(result) => {
                cache.insert(
                    key.clone(),
                    CachedEntry {
                        result: Arc::clone(result),
                        expires_at: Instant::now() + config.cache_ttl,
                    },
                );
            }
            Err(e) => warn!(service = %key.service, error = %e, "orchestration query failed"),
        }
        inflight.remove(&key);
        outcome
    }

    fn build_request(
        &self,
        service: &str,
        requester: &Identity,
        options: &ResolveOptions,
    ) -> OrchestrationRequest {
        let security_requirements = match self.security {
            SecurityLevel::NotSecure => Vec::new(),
            level => vec![level.as_str().to_string()],
        };

        let mut flags = OrchestrationFlags::dynamic();
        let preferred_providers = match &options.target_system {
            Some(target) => {
                flags.only_preferred = true;
                vec![PreferredProvider {
                    provider_system: PreferredSystem {
                        system_name: target.clone(),
                        address: None,
                        port: None,
                    },
                }]
            }
            None => Vec::new(),
        };

        OrchestrationRequest {
            requester_system: RequesterSystem {
                system_name: requester.system_name.clone(),
                address: requester.address.clone(),
                port: requester.port,
                authentication_info: None,
            },
            requested_service: RequestedService {
                service_definition_requirement: service.to_string(),
                interface_requirements: vec![HTTP_SECURE_JSON.to_string()],
                security_requirements,
                metadata_requirements: std::collections::HashMap::new(),
                version_requirement: None,
                min_version_requirement: None,
                max_version_requirement: None,
                ping_providers: false,
            },
            orchestration_flags: flags,
            preferred_providers,
            commands: std::collections::HashMap::new(),
            qos_requirements: std::collections::HashMap::new(),
        }
    }
}
