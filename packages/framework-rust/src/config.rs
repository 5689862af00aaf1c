//! Configuration types for the framework and provider runtime.
//!
//! All configuration is explicit: constructors take these structs, nothing
//! reads the environment. Process-wide state is limited to loaded trust
//! material owned by a `TrustContext`.

use std::path::PathBuf;
use std::time::Duration;

use arrowhead_core::SecurityLevel;

/// Top-level configuration shared by the consumer facade and the provider
/// runtime.
///
/// No `Default` impl because the collaborator endpoints have no sensible
/// defaults; use [`FrameworkConfig::new`] and override the tunable sections
/// as needed.
#[derive(Debug, Clone)]
pub struct FrameworkConfig {
    /// This system's own name/address/port.
    pub system: SystemSettings,
    /// TLS material paths. `None` disables TLS (plain HTTP, test setups).
    pub tls: Option<TlsSettings>,
    /// Orchestrator collaborator endpoint.
    pub orchestrator: CollaboratorEndpoint,
    /// Service Registry collaborator endpoint.
    pub service_registry: CollaboratorEndpoint,
    /// Orchestration resolver tunables.
    pub resolver: ResolverConfig,
    /// Outbound dispatch tunables.
    pub dispatch: DispatchConfig,
    /// Token cache tunables.
    pub token: TokenConfig,
    /// Inbound listener tunables.
    pub listener: ListenerConfig,
}

impl FrameworkConfig {
    /// Creates a configuration with default tunables and no TLS.
    #[must_use]
    pub fn new(
        system: SystemSettings,
        orchestrator: CollaboratorEndpoint,
        service_registry: CollaboratorEndpoint,
    ) -> Self {
        Self {
            system,
            tls: None,
            orchestrator,
            service_registry,
            resolver: ResolverConfig::default(),
            dispatch: DispatchConfig::default(),
            token: TokenConfig::default(),
            listener: ListenerConfig::default(),
        }
    }

    /// Sets the TLS material paths, builder style.
    #[must_use]
    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }

    /// The security level this system registers and requests services at:
    /// token security when TLS is configured, none otherwise.
    #[must_use]
    pub fn security_level(&self) -> SecurityLevel {
        if self.tls.is_some() {
            SecurityLevel::Token
        } else {
            SecurityLevel::NotSecure
        }
    }
}

/// This system's own identity settings.
#[derive(Debug, Clone)]
pub struct SystemSettings {
    /// System name. `None` derives the name from the leaf certificate's
    /// common name (first label).
    pub name: Option<String>,
    /// Address other systems use to reach this one.
    pub address: String,
    /// Port this system's provider listener binds. 0 means OS-assigned.
    pub port: u16,
}

impl SystemSettings {
    /// Settings with an explicit system name.
    #[must_use]
    pub fn named(name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            name: Some(name.into()),
            address: address.into(),
            port,
        }
    }
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            name: None,
            address: "localhost".to_string(),
            port: 8080,
        }
    }
}

/// Paths to the TLS material of this system.
///
/// The keystore is a PEM bundle holding the private key plus the leaf
/// certificate and any intermediates; the truststore is a PEM bundle of
/// trusted root/intermediate certificates. No `Default` impl because
/// certificate paths have no sensible defaults.
#[derive(Debug, Clone)]
pub struct TlsSettings {
    /// Path to the PEM keystore (private key + certificate chain).
    pub keystore_path: PathBuf,
    /// Optional keystore password. Encrypted keystores are rejected at
    /// load time; the field exists so configurations carrying a password
    /// fail with a clear error instead of silently ignoring it.
    pub keystore_password: Option<String>,
    /// Path to the PEM truststore (trusted roots).
    pub truststore_path: PathBuf,
}

/// Host/port pair of a collaborator core system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollaboratorEndpoint {
    pub host: String,
    pub port: u16,
}

impl CollaboratorEndpoint {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for CollaboratorEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Tunables of the orchestration resolver.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// How long a successful orchestration result stays served from cache.
    pub cache_ttl: Duration,
    /// Upper bound on a single upstream orchestration query, which also
    /// bounds how long coalesced callers wait on a shared in-flight query.
    pub query_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(30),
            query_timeout: Duration::from_secs(10),
        }
    }
}

/// Tunables of the request dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum attempts for retryable failures (connection errors,
    /// 502/503/504). 1 disables retries.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles per attempt.
    pub initial_backoff: Duration,
    /// Cap on the exponential backoff.
    pub max_backoff: Duration,
    /// Per-attempt request timeout.
    pub request_timeout: Duration,
    /// Deadline bounding the sum of all attempts and backoff sleeps.
    pub overall_deadline: Duration,
    /// Maximum idle pooled connections kept per provider endpoint.
    pub pool_max_idle_per_host: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
            overall_deadline: Duration::from_secs(60),
            pool_max_idle_per_host: 8,
        }
    }
}

/// Tunables of the token cache.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Safety margin subtracted from a token's expiry: a token within this
    /// window of expiring is treated as already expired.
    pub expiry_skew: Duration,
    /// Assumed lifetime for tokens whose expiry cannot be parsed (JWE or
    /// otherwise opaque credentials).
    pub fallback_ttl: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            expiry_skew: Duration::from_secs(10),
            fallback_ttl: Duration::from_secs(60),
        }
    }
}

/// Tunables of the provider-side listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Maximum time to wait for a single inbound request to complete.
    pub request_timeout: Duration,
    /// Maximum time `stop()` waits for in-flight requests to drain.
    pub drain_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(5),
        }
    }
}
