//! Provider runtime: registration, routing, and the mutually-authenticated
//! listener.
//!
//! Follows the deferred lifecycle pattern: `new()` validates the binding
//! table and allocates shared state, `start()` binds the listener,
//! registers every binding with the service registry, and begins serving;
//! `stop()` deregisters best-effort and releases the listener. State
//! machine: Created -> Registering -> Serving -> Stopping -> Stopped.

use std::collections::HashMap;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use arc_swap::ArcSwap;
use arrowhead_core::{
    HandlerError, HttpMethod, Params, ProviderError, ProviderSystem, SecurityLevel,
    ServiceRegistrationRequest, HTTP_SECURE_JSON,
};
use axum::extract::Query;
use axum::http::header::HeaderName;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{on, MethodFilter};
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use bytes::Bytes;
use futures_util::FutureExt;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::{FrameworkConfig, ListenerConfig, SystemSettings};
use crate::dispatch::build_http_client;
use crate::registry::{HttpServiceRegistryClient, ServiceRegistryClient, UnregisterQuery};
use crate::security::TrustContext;

use super::binding::{HandlerFn, ServiceBinding};

/// Lifecycle state of a provider runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// Bindings collected, nothing registered or bound.
    Created,
    /// Registering bindings with the service registry.
    Registering,
    /// Listener up, requests being served.
    Serving,
    /// Deregistering and draining.
    Stopping,
    /// Listener closed, resources released.
    Stopped,
}

impl std::fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Registering => "registering",
            Self::Serving => "serving",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Resources held while the listener is up.
struct Serving {
    handle: axum_server::Handle,
    task: tokio::task::JoinHandle<()>,
    port: u16,
}

/// Server-side counterpart of the framework: turns a binding table into a
/// registered, routable, mutually-authenticated listener.
pub struct ProviderRuntime {
    system: SystemSettings,
    system_name: String,
    listener_config: ListenerConfig,
    security: SecurityLevel,
    bindings: Vec<Arc<ServiceBinding>>,
    registry: Arc<dyn ServiceRegistryClient>,
    server_tls: Option<Arc<rustls::ServerConfig>>,
    state: ArcSwap<RuntimeState>,
    serving: Mutex<Option<Serving>>,
}

impl std::fmt::Debug for ProviderRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRuntime")
            .field("system_name", &self.system_name)
            .field("security", &self.security)
            .finish_non_exhaustive()
    }
}

impl ProviderRuntime {
    /// Creates a runtime from a binding table and an injected registry
    /// client.
    ///
    /// # Errors
    ///
    /// `DuplicateBinding` when two bindings share a (uri, method) pair;
    /// `MissingSystemName` when neither configuration nor certificate
    /// yields a system name.
    pub fn new(
        config: &FrameworkConfig,
        trust: Option<&TrustContext>,
        bindings: Vec<ServiceBinding>,
        registry: Arc<dyn ServiceRegistryClient>,
    ) -> Result<Self, ProviderError> {
        let mut seen = HashSet::new();
        for binding in &bindings {
            if !seen.insert((binding.uri().to_string(), binding.method())) {
                return Err(ProviderError::DuplicateBinding {
                    uri: binding.uri().to_string(),
                    method: binding.method(),
                });
            }
        }

        let system_name = config
            .system
            .name
            .clone()
            .or_else(|| trust.map(|t| t.identity().system_name.clone()))
            .ok_or(ProviderError::MissingSystemName)?;

        Ok(Self {
            system: config.system.clone(),
            system_name,
            listener_config: config.listener.clone(),
            security: config.security_level(),
            bindings: bindings.into_iter().map(Arc::new).collect(),
            registry,
            server_tls: trust.map(TrustContext::server_config),
            state: ArcSwap::from_pointee(RuntimeState::Created),
            serving: Mutex::new(None),
        })
    }

    /// Creates a runtime wired to the HTTP service-registry client built
    /// from the same configuration.
    ///
    /// # Errors
    ///
    /// Propagates [`ProviderRuntime::new`] failures, plus `Security` when
    /// the outbound client cannot be built from the trust material.
    pub fn from_config(
        config: &FrameworkConfig,
        trust: Option<&TrustContext>,
        bindings: Vec<ServiceBinding>,
    ) -> Result<Self, ProviderError> {
        let client = build_http_client(trust.map(TrustContext::client_tls), &config.dispatch)?;
        let registry = Arc::new(HttpServiceRegistryClient::new(
            client,
            &config.service_registry,
            config.tls.is_some(),
        ));
        Self::new(config, trust, bindings, registry)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RuntimeState {
        **self.state.load()
    }

    /// Registers every binding and starts serving.
    ///
    /// The listener is bound first so OS-assigned ports (port 0) are known
    /// at registration time; registration happens before any request is
    /// served. Returns the actual bound port.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the runtime is `Created`. `Listener` when the
    /// bind fails. `Registration` when any binding cannot be registered —
    /// the listener is released and the state returns to `Created`.
    pub async fn start(&self) -> Result<u16, ProviderError> {
        let mut serving = self.serving.lock().await;
        let state = self.state();
        if serving.is_some() || state != RuntimeState::Created {
            return Err(ProviderError::InvalidState {
                operation: "start",
                state: state.to_string(),
            });
        }
        self.state.store(Arc::new(RuntimeState::Registering));

        let bind_addr = format!("{}:{}", self.system.address, self.system.port);
        let listener = match TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.state.store(Arc::new(RuntimeState::Created));
                return Err(ProviderError::Listener(format!(
                    "cannot bind {bind_addr}: {e}"
                )));
            }
        };
        let port = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => {
                self.state.store(Arc::new(RuntimeState::Created));
                return Err(ProviderError::Listener(e.to_string()));
            }
        };

        for binding in &self.bindings {
            let request = self.registration_request(binding, port);
            if let Err(e) = self.registry.register(&request).await {
                // Abort startup: the listener is dropped unused and the
                // runtime can be started again after the cause is fixed.
                self.state.store(Arc::new(RuntimeState::Created));
                return Err(e.into());
            }
        }

        let router = self.build_router();
        let std_listener = match listener.into_std() {
            Ok(listener) => listener,
            Err(e) => {
                self.state.store(Arc::new(RuntimeState::Created));
                return Err(ProviderError::Listener(e.to_string()));
            }
        };
        let handle = axum_server::Handle::new();

        let task = match &self.server_tls {
            Some(tls) => {
                let server = axum_server::from_tcp_rustls(
                    std_listener,
                    RustlsConfig::from_config(Arc::clone(tls)),
                )
                .handle(handle.clone());
                info!(port, "serving mutual-TLS connections");
                tokio::spawn(async move {
                    if let Err(e) = server.serve(router.into_make_service()).await {
                        error!(error = %e, "listener terminated");
                    }
                })
            }
            None => {
                let server = axum_server::from_tcp(std_listener).handle(handle.clone());
                info!(port, "serving plain HTTP connections");
                tokio::spawn(async move {
                    if let Err(e) = server.serve(router.into_make_service()).await {
                        error!(error = %e, "listener terminated");
                    }
                })
            }
        };

        *serving = Some(Serving { handle, task, port });
        self.state.store(Arc::new(RuntimeState::Serving));
        info!(
            system = %self.system_name,
            port,
            services = self.bindings.len(),
            "provider serving"
        );
        Ok(port)
    }

    /// Deregisters every binding (best effort), drains the listener, and
    /// releases its resources before returning.
    ///
    /// Idempotent: stopping a runtime that is not serving is a no-op.
    pub async fn stop(&self) {
        let mut serving_guard = self.serving.lock().await;
        let Some(serving) = serving_guard.take() else {
            debug!(state = %self.state(), "stop is a no-op");
            return;
        };
        self.state.store(Arc::new(RuntimeState::Stopping));

        for binding in &self.bindings {
            let query = UnregisterQuery {
                service_definition: binding.service_definition().to_string(),
                system_name: self.system_name.clone(),
                address: self.system.address.clone(),
                port: serving.port,
                service_uri: binding.uri().to_string(),
            };
            if let Err(e) = self.registry.unregister(&query).await {
                warn!(
                    service = %binding.service_definition(),
                    error = %e,
                    "deregistration failed"
                );
            }
        }

        serving
            .handle
            .graceful_shutdown(Some(self.listener_config.drain_timeout));
        if let Err(e) = serving.task.await {
            warn!(error = %e, "listener task ended abnormally");
        }

        self.state.store(Arc::new(RuntimeState::Stopped));
        info!(system = %self.system_name, "provider stopped");
    }

    fn registration_request(
        &self,
        binding: &ServiceBinding,
        port: u16,
    ) -> ServiceRegistrationRequest {
        ServiceRegistrationRequest {
            service_definition: binding.service_definition().to_string(),
            provider_system: ProviderSystem {
                system_name: self.system_name.clone(),
                address: self.system.address.clone(),
                port,
                authentication_info: String::new(),
            },
            service_uri: binding.uri().to_string(),
            end_of_validity: String::new(),
            secure: self.security,
            metadata: HashMap::from([(
                "http-method".to_string(),
                binding.method().as_str().to_string(),
            )]),
            version: "1".to_string(),
            interfaces: vec![HTTP_SECURE_JSON.to_string()],
        }
    }

    /// Assembles the axum router from the binding table.
    ///
    /// Routing is exact (uri, method); both path misses and method misses
    /// answer 404.
    fn build_router(&self) -> Router {
        let x_request_id = HeaderName::from_static("x-request-id");

        let mut router = Router::new();
        for binding in &self.bindings {
            let bound = Arc::clone(binding);
            let handler = move |Query(query): Query<Vec<(String, String)>>, body: Bytes| {
                let bound = Arc::clone(&bound);
                async move { handle_request(bound, query, body).await }
            };
            router = router.route(binding.uri(), on(method_filter(binding.method()), handler));
        }

        router
            .method_not_allowed_fallback(|| async { StatusCode::NOT_FOUND })
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(
                        x_request_id.clone(),
                        MakeRequestUuid,
                    ))
                    .layer(TraceLayer::new_for_http())
                    .layer(TimeoutLayer::with_status_code(
                        StatusCode::REQUEST_TIMEOUT,
                        self.listener_config.request_timeout,
                    ))
                    .layer(PropagateRequestIdLayer::new(x_request_id)),
            )
    }
}

fn method_filter(method: HttpMethod) -> MethodFilter {
    match method {
        HttpMethod::Get => MethodFilter::GET,
        HttpMethod::Post => MethodFilter::POST,
        HttpMethod::Put => MethodFilter::PUT,
        HttpMethod::Delete => MethodFilter::DELETE,
    }
}

/// Routes one matched request into its handler, containing every failure:
/// payload decode errors become 400, handler errors and panics become an
/// opaque 500. Nothing here can take down the listener.
async fn handle_request(
    binding: Arc<ServiceBinding>,
    query: Vec<(String, String)>,
    body: Bytes,
) -> Response {
    let params = Params {
        query_params: query,
        payload: if body.is_empty() { None } else { Some(body) },
    };

    let future = match binding.handler() {
        HandlerFn::Query(handler) => handler(params),
        HandlerFn::Payload(handler) => {
            let Some(payload) = params.payload.clone() else {
                return handler_error_response(
                    binding.service_definition(),
                    &HandlerError::BadPayload("missing request body".to_string()),
                );
            };
            match serde_json::from_slice(&payload) {
                Ok(value) => handler(value, params),
                Err(e) => {
                    return handler_error_response(
                        binding.service_definition(),
                        &HandlerError::BadPayload(e.to_string()),
                    );
                }
            }
        }
    };

    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(value)) => (StatusCode::OK, Json(value)).into_response(),
        Ok(Err(error)) => handler_error_response(binding.service_definition(), &error),
        Err(_) => {
            error!(service = %binding.service_definition(), "handler panicked");
            opaque_internal_error()
        }
    }
}

fn handler_error_response(service: &str, error: &HandlerError) -> Response {
    match error {
        HandlerError::BadPayload(detail) => {
            debug!(service, detail, "rejecting malformed payload");
            (StatusCode::BAD_REQUEST, Json(json!({ "error": detail }))).into_response()
        }
        HandlerError::Internal(detail) => {
            // The detail stays in the log; callers get an opaque body.
            error!(service, detail, "handler failed");
            opaque_internal_error()
        }
    }
}

fn opaque_internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal handler error" })),
    )
        .into_response()
}
