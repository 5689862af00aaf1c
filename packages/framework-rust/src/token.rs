//! Cache of bearer tokens embedded in orchestration results.
//!
//! Token issuance is a side effect of orchestration in this protocol: the
//! authorization collaborator mints tokens that arrive inside matched
//! services, so this cache never contacts any endpoint itself. A `None`
//! from [`TokenCache::token_for`] tells the caller a fresh resolve (which
//! may carry a new token) is required.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arrowhead_core::{Identity, MatchedService};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use dashmap::DashMap;
use tracing::debug;

use crate::config::TokenConfig;

/// A bearer credential for one (consumer, provider, service) tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    raw: String,
    expires_at: SystemTime,
}

impl Token {
    /// The raw credential, as sent in the `Authorization` header.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// When the credential stops being usable.
    #[must_use]
    pub fn expires_at(&self) -> SystemTime {
        self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TokenKey {
    consumer: String,
    provider: String,
    service: String,
}

/// Caches tokens keyed by (consumer, provider, service definition).
///
/// One live token per tuple: storing a fresh token replaces the previous
/// one wholesale. Expired entries are pruned lazily on access.
pub struct TokenCache {
    config: TokenConfig,
    entries: DashMap<TokenKey, Token>,
}

impl TokenCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(config: TokenConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
        }
    }

    /// Records the token embedded in a matched service, if any.
    ///
    /// The expiry is read from the token's `exp` claim when it is a
    /// readable JWS; opaque credentials (JWE, random strings) get the
    /// configured fallback lifetime instead.
    pub fn store_from(&self, consumer: &Identity, matched: &MatchedService) {
        let Some(raw) = matched.token() else { return };

        let expires_at = jwt_expiry(raw)
            .unwrap_or_else(|| SystemTime::now() + self.config.fallback_ttl);

        let key = TokenKey {
            consumer: consumer.system_name.clone(),
            provider: matched.provider.system_name.clone(),
            service: matched.service.service_definition.clone(),
        };
        debug!(
            provider = %key.provider,
            service = %key.service,
            "storing authorization token"
        );
        self.entries.insert(
            key,
            Token {
                raw: raw.to_string(),
                expires_at,
            },
        );
    }

    /// Returns the live token for the tuple, or `None` when there is no
    /// token or the cached one is within the expiry skew of dying.
    #[must_use]
    pub fn token_for(&self, consumer: &Identity, provider: &str, service: &str) -> Option<Token> {
        let key = TokenKey {
            consumer: consumer.system_name.clone(),
            provider: provider.to_string(),
            service: service.to_string(),
        };

        let expired = match self.entries.get(&key) {
            Some(entry) => {
                let deadline = entry.expires_at - self.config.expiry_skew;
                if SystemTime::now() < deadline {
                    return Some(entry.clone());
                }
                true
            }
            None => false,
        };

        if expired {
            self.entries.remove(&key);
            debug!(provider, service, "pruned expired authorization token");
        }
        None
    }
}

/// Extracts the `exp` claim from a JWS without verifying the signature.
///
/// Tokens are opaque credentials minted and verified elsewhere; only the
/// lifetime matters here. Returns `None` for anything that is not a
/// three-segment JWS with a JSON payload carrying a numeric `exp`.
fn jwt_expiry(raw: &str) -> Option<SystemTime> {
    let mut segments = raw.split('.');
    let (_header, payload, _signature) =
        (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        // More than three segments: JWE, treat as opaque.
        return None;
    }

    let decoded = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    let exp = claims.get("exp")?.as_u64()?;
    Some(UNIX_EPOCH + Duration::from_secs(exp))
}
