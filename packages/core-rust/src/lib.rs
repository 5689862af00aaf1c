//! Arrowhead Core — wire models, shared domain types, and error taxonomy.

pub mod error;
pub mod models;
pub mod types;

pub use error::{
    DispatchError, FrameworkError, HandlerError, OrchestrationError, ProviderError,
    RegistrationError, SecurityError,
};
pub use models::{
    MatchedService, OrchestrationFlags, OrchestrationRequest, OrchestrationResponse,
    PreferredProvider, PreferredSystem, ProviderDescriptor, ProviderSystem, RequestedService,
    RequesterSystem,
    ServiceDefinitionRef, ServiceRegistrationRequest, HTTP_SECURE_JSON,
};
pub use types::{HttpMethod, Identity, Params, SecurityLevel};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
