//! Error taxonomy shared across the framework.
//!
//! Each component owns a small typed enum; the [`FrameworkError`] umbrella
//! is what `Framework::send_request` surfaces to callers. The split matters
//! for control flow: orchestration failures are retry-later conditions,
//! authorization failures trigger exactly one cache-invalidate-and-retry
//! cycle, and security errors are fatal at startup.

use bytes::Bytes;
use thiserror::Error;

use crate::types::HttpMethod;

/// Failure to establish the process identity from trust material.
///
/// Always fatal: without a valid identity there is nothing to authenticate
/// as, so construction of the framework or provider runtime aborts.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// Keystore could not be decoded, holds no usable private key, or the
    /// leaf certificate's subject common name cannot be parsed.
    #[error("certificate error: {0}")]
    Certificate(String),

    /// Truststore is empty or its contents are not valid certificates.
    #[error("trust store error: {0}")]
    Trust(String),
}

/// Failure to resolve a service name into reachable providers.
///
/// `Clone` so that coalesced concurrent resolve calls can all observe the
/// same failure from a single upstream query.
#[derive(Debug, Clone, Error)]
pub enum OrchestrationError {
    /// The orchestrator answered with an empty candidate list.
    #[error("no provider available for service `{service}`")]
    ServiceNotAvailable { service: String },

    /// The orchestrator could not be reached (connect, transport, timeout).
    #[error("orchestrator unreachable: {detail}")]
    Unreachable { detail: String },

    /// The orchestrator answered with a non-2xx status.
    #[error("orchestrator rejected the request with status {status}: {detail}")]
    Rejected { status: u16, detail: String },
}

/// Failure of a dispatched service call after internal retry handling.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The provider answered 401 or 403. The caller should invalidate its
    /// orchestration cache entry and re-resolve before giving up.
    #[error("provider rejected authorization with status {status}")]
    Authorization { status: u16 },

    /// Non-retryable application-level rejection; body returned verbatim.
    #[error("request failed with status {status}")]
    Request { status: u16, body: Bytes },

    /// Retryable failures (connection errors, 502/503/504) kept occurring
    /// until the attempt budget ran out.
    #[error("request failed after {attempts} attempts: {detail}")]
    Exhausted { attempts: u32, detail: String },

    /// The overall operation deadline elapsed.
    #[error("request timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },
}

/// Failure to register a service with the service registry.
///
/// Fatal to provider startup: a provider that is only partially visible in
/// the registry would receive traffic for services it never announced.
#[derive(Debug, Error)]
#[error("failed to register `{service}` with the service registry: {detail}")]
pub struct RegistrationError {
    pub service: String,
    pub status: Option<u16>,
    pub detail: String,
}

/// Application-level failure inside a provider handler.
///
/// Contained at the routing boundary: mapped to an HTTP status, never
/// allowed to take down the listener.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The request body could not be decoded as the declared payload type.
    #[error("invalid payload: {0}")]
    BadPayload(String),

    /// Any other handler failure; surfaced to the caller as an opaque 500.
    #[error("{0}")]
    Internal(String),
}

impl HandlerError {
    /// Convenience constructor for application failures.
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }
}

/// Failures of the provider runtime outside individual handlers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Two bindings share the same (uri, method) pair.
    #[error("duplicate handler binding for {method} {uri}")]
    DuplicateBinding { uri: String, method: HttpMethod },

    /// Neither the configuration nor the certificate yields a system name.
    #[error("provider requires a system name (explicit or certificate-derived)")]
    MissingSystemName,

    /// Trust material was rejected while building the listener transport.
    #[error(transparent)]
    Security(#[from] SecurityError),

    /// A lifecycle operation was invoked in the wrong state.
    #[error("provider runtime cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    /// Service registration failed during startup.
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// The listener could not be bound or served.
    #[error("listener error: {0}")]
    Listener(String),
}

/// Umbrella error surfaced by the `Framework` facade.
#[derive(Debug, Error)]
pub enum FrameworkError {
    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The matched service requires a token but none was embedded in the
    /// orchestration response, even after a fresh resolve.
    #[error("no authorization token available for service `{service}`")]
    MissingToken { service: String },

    /// The orchestration response was structurally unusable (e.g. no
    /// `http-method` metadata on the matched service).
    #[error("unusable orchestration match for `{service}`: {detail}")]
    InvalidMatch { service: String, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orchestration_error_is_cloneable() {
        let err = OrchestrationError::Rejected {
            status: 503,
            detail: "draining".into(),
        };
        let clone = err.clone();
        assert_eq!(clone.to_string(), err.to_string());
    }

    #[test]
    fn dispatch_error_messages() {
        let err = DispatchError::Authorization { status: 403 };
        assert_eq!(
            err.to_string(),
            "provider rejected authorization with status 403"
        );

        let err = DispatchError::Exhausted {
            attempts: 3,
            detail: "connection refused".into(),
        };
        assert!(err.to_string().contains("after 3 attempts"));
    }

    #[test]
    fn framework_error_converts_from_component_errors() {
        let err: FrameworkError = OrchestrationError::ServiceNotAvailable {
            service: "get-car".into(),
        }
        .into();
        assert!(matches!(err, FrameworkError::Orchestration(_)));

        let err: FrameworkError = DispatchError::Timeout { elapsed_ms: 1500 }.into();
        assert!(matches!(err, FrameworkError::Dispatch(_)));
    }

    #[test]
    fn provider_error_from_registration() {
        let err: ProviderError = RegistrationError {
            service: "create-car".into(),
            status: Some(400),
            detail: "already registered".into(),
        }
        .into();
        assert!(matches!(err, ProviderError::Registration(_)));
    }
}
