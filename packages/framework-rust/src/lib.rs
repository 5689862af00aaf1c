//! Arrowhead Framework — secure orchestration-and-dispatch client and
//! provider runtime for industrial service meshes.
//!
//! Consumer side: [`Framework::send_request`] resolves a service name into
//! a reachable provider via the orchestrator (TTL-cached, single-flight),
//! attaches the authorization token minted alongside the resolution, and
//! dispatches over mutual TLS with bounded retry. Provider side:
//! [`ProviderRuntime`] registers declarative [`ServiceBinding`]s with the
//! service registry and serves them on a mutually-authenticated listener.

pub mod config;
pub mod dispatch;
pub mod framework;
pub mod orchestration;
pub mod provider;
pub mod registry;
pub mod security;
pub mod token;

pub use config::{
    CollaboratorEndpoint, DispatchConfig, FrameworkConfig, ListenerConfig, ResolverConfig,
    SystemSettings, TlsSettings, TokenConfig,
};
pub use dispatch::{RequestDispatcher, ServiceEndpoint};
pub use framework::Framework;
pub use orchestration::{
    HttpOrchestratorGateway, OrchestrationResolver, OrchestrationResult, OrchestratorGateway,
    ResolveOptions,
};
pub use provider::{ProviderRuntime, RuntimeState, ServiceBinding};
pub use registry::{HttpServiceRegistryClient, ServiceRegistryClient, UnregisterQuery};
pub use security::{TrustContext, TrustMaterial};
pub use token::{Token, TokenCache};

// Re-export the shared types consumers touch directly.
pub use arrowhead_core::{
    DispatchError, FrameworkError, HandlerError, HttpMethod, Identity, OrchestrationError, Params,
    ProviderError, RegistrationError, SecurityError, SecurityLevel,
};
