//! Mutually-authenticated request dispatch with bounded retry.
//!
//! One shared HTTP client (bounded connection pool, mTLS identity) is
//! reused across dispatches. Transient transport failures and 502/503/504
//! are retried with capped exponential backoff and jitter; everything else
//! fails fast with a typed classification the facade can branch on.

use std::time::Duration;

use arrowhead_core::{
    DispatchError, HttpMethod, MatchedService, Params, SecurityError, SecurityLevel,
};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::StatusCode;
use rand::Rng as _;
use tracing::{debug, warn};

use crate::config::DispatchConfig;
use crate::security::ClientTls;

/// A concrete, reachable provider endpoint for one service call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub address: String,
    pub port: u16,
    pub uri: String,
    pub method: HttpMethod,
    pub security: SecurityLevel,
}

impl ServiceEndpoint {
    /// Builds an endpoint from an orchestration match.
    ///
    /// Returns `None` when the match carries no usable `http-method`
    /// metadata, which makes it undispatchable.
    #[must_use]
    pub fn from_match(matched: &MatchedService) -> Option<Self> {
        Some(Self {
            address: matched.provider.address.clone(),
            port: matched.provider.port,
            uri: matched.service_uri.clone(),
            method: matched.http_method()?,
            security: matched.secure,
        })
    }
}

/// Builds the shared outbound HTTP client.
///
/// With TLS material the client presents the system identity and verifies
/// peers exclusively against the loaded trust anchors; without it the
/// client speaks plain HTTP (test setups).
pub(crate) fn build_http_client(
    tls: Option<&ClientTls>,
    config: &DispatchConfig,
) -> Result<reqwest::Client, SecurityError> {
    // Several TLS backends may be linked; pin the process-wide provider
    // before the client stack builds its rustls config. Already-installed
    // is fine.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .timeout(config.request_timeout);

    if let Some(tls) = tls {
        builder = builder
            .tls_built_in_root_certs(false)
            .identity(tls.identity.clone());
        for root in &tls.roots {
            builder = builder.add_root_certificate(root.clone());
        }
    }

    builder
        .build()
        .map_err(|e| SecurityError::Certificate(format!("cannot build HTTP client: {e}")))
}

/// Outcome of a single dispatch attempt, before retry handling.
enum AttemptError {
    /// Worth retrying: connection-level failure or 502/503/504.
    Retryable(String),
    /// Final: surfaced to the caller as-is.
    Fatal(DispatchError),
}

/// Dispatches service calls to resolved provider endpoints.
pub struct RequestDispatcher {
    client: reqwest::Client,
    config: DispatchConfig,
    tls_enabled: bool,
}

impl RequestDispatcher {
    /// Creates a dispatcher over an already-built HTTP client.
    #[must_use]
    pub fn new(client: reqwest::Client, config: DispatchConfig, tls_enabled: bool) -> Self {
        Self {
            client,
            config,
            tls_enabled,
        }
    }

    /// Performs one service call with retry handling.
    ///
    /// The bearer token is attached only when present and the endpoint's
    /// security level requires one. A 2xx response returns its body
    /// verbatim; no payload interpretation happens here.
    ///
    /// # Errors
    ///
    /// `Authorization` on 401/403 (never retried here), `Request` for other
    /// non-retryable statuses, `Exhausted` when the retry budget runs out,
    /// `Timeout` when the overall deadline elapses first.
    pub async fn dispatch(
        &self,
        endpoint: &ServiceEndpoint,
        params: &Params,
        token: Option<&str>,
    ) -> Result<Bytes, DispatchError> {
        let started = tokio::time::Instant::now();
        match tokio::time::timeout(
            self.config.overall_deadline,
            self.dispatch_with_retries(endpoint, params, token),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(DispatchError::Timeout {
                elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    async fn dispatch_with_retries(
        &self,
        endpoint: &ServiceEndpoint,
        params: &Params,
        token: Option<&str>,
    ) -> Result<Bytes, DispatchError> {
        let scheme = if self.tls_enabled { "https" } else { "http" };
        let url = format!(
            "{scheme}://{}:{}{}",
            endpoint.address, endpoint.port, endpoint.uri
        );

        let mut last_detail = String::new();
        for attempt in 1..=self.config.max_attempts {
            match self.attempt(&url, endpoint, params, token).await {
                Ok(body) => return Ok(body),
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Retryable(detail)) => {
                    warn!(%url, attempt, detail, "dispatch attempt failed");
                    last_detail = detail;
                    if attempt < self.config.max_attempts {
                        let delay = backoff_delay(attempt, &self.config);
                        debug!(
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(DispatchError::Exhausted {
            attempts: self.config.max_attempts,
            detail: last_detail,
        })
    }

    async fn attempt(
        &self,
        url: &str,
        endpoint: &ServiceEndpoint,
        params: &Params,
        token: Option<&str>,
    ) -> Result<Bytes, AttemptError> {
        let mut request = self.client.request(endpoint.method.into(), url);
        if !params.query_params.is_empty() {
            request = request.query(&params.query_params);
        }
        if let Some(payload) = &params.payload {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(payload.clone());
        }
        if let (Some(token), SecurityLevel::Token) = (token, endpoint.security) {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AttemptError::Retryable(e.to_string()))?;

        let status = response.status();
        match status {
            s if s.is_success() => response
                .bytes()
                .await
                .map_err(|e| AttemptError::Retryable(format!("body read failed: {e}"))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(AttemptError::Fatal(DispatchError::Authorization {
                    status: status.as_u16(),
                }))
            }
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
                Err(AttemptError::Retryable(format!("provider answered {status}")))
            }
            _ => {
                let body = response.bytes().await.unwrap_or_default();
                Err(AttemptError::Fatal(DispatchError::Request {
                    status: status.as_u16(),
                    body,
                }))
            }
        }
    }
}

/// Capped exponential backoff with equal jitter: half the capped delay is
/// fixed, the other half uniformly random.
fn backoff_delay(attempt: u32, config: &DispatchConfig) -> Duration {
    let exponential = config
        .initial_backoff
        .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
    let capped = exponential.min(config.max_backoff);
    let half = capped / 2;
    let jitter_ms = u64::try_from(half.as_millis()).unwrap_or(u64::MAX);
    half + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
}
