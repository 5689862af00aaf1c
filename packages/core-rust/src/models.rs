//! Wire models for the orchestrator and service-registry collaborators.
//!
//! All structs use `#[serde(rename_all = "camelCase")]` to match the JSON
//! bodies the collaborator services exchange. Optional fields are skipped on
//! serialization so request bodies stay minimal; response-side fields that
//! collaborators sometimes omit carry `#[serde(default)]`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::SecurityLevel;

/// Interface identifier for secure JSON-over-HTTP services, the only
/// transport this framework speaks.
pub const HTTP_SECURE_JSON: &str = "HTTP-SECURE-JSON";

// ---------------------------------------------------------------------------
// Orchestration request
// ---------------------------------------------------------------------------

/// The system asking for orchestration, as presented to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequesterSystem {
    pub system_name: String,
    pub address: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication_info: Option<String>,
}

/// The capability being requested, with interface/security constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestedService {
    pub service_definition_requirement: String,
    pub interface_requirements: Vec<String>,
    pub security_requirements: Vec<String>,
    #[serde(default)]
    pub metadata_requirements: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_requirement: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_version_requirement: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_version_requirement: Option<u32>,
    #[serde(default)]
    pub ping_providers: bool,
}

/// Behavior flags for a single orchestration query.
///
/// `Default` leaves every flag off; [`OrchestrationFlags::dynamic`] is the
/// combination used for store-free dynamic orchestration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationFlags {
    #[serde(default)]
    pub only_preferred: bool,
    #[serde(default)]
    pub override_store: bool,
    #[serde(default)]
    pub external_service_request: bool,
    #[serde(default)]
    pub enable_inter_cloud: bool,
    #[serde(default, rename = "enableQoS")]
    pub enable_qos: bool,
    #[serde(default)]
    pub matchmaking: bool,
    #[serde(default)]
    pub metadata_search: bool,
    #[serde(default)]
    pub trigger_inter_cloud: bool,
    #[serde(default)]
    pub ping_providers: bool,
}

impl OrchestrationFlags {
    /// Flags for dynamic orchestration: ask the orchestrator to matchmake
    /// against live registry state instead of its pre-provisioned store.
    #[must_use]
    pub fn dynamic() -> Self {
        Self {
            matchmaking: true,
            override_store: true,
            ..Self::default()
        }
    }
}

/// A provider the requester would prefer the orchestrator to pick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferredProvider {
    pub provider_system: PreferredSystem,
}

/// Minimal system reference inside a preferred-provider entry. Only the
/// name is required; address and port narrow the match when given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferredSystem {
    pub system_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Full orchestration query body for `POST /orchestrator/orchestration`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationRequest {
    pub requester_system: RequesterSystem,
    pub requested_service: RequestedService,
    pub orchestration_flags: OrchestrationFlags,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferred_providers: Vec<PreferredProvider>,
    #[serde(default)]
    pub commands: HashMap<String, String>,
    #[serde(default)]
    pub qos_requirements: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Orchestration response
// ---------------------------------------------------------------------------

/// A provider system as described in orchestration and registry responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub system_name: String,
    pub address: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication_info: Option<String>,
}

/// Reference to a service definition inside a matched-service entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDefinitionRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub service_definition: String,
}

/// One ranked provider candidate returned by the orchestrator.
///
/// `metadata["http-method"]` carries the method the provider registered the
/// service under; `authorization_tokens` maps interface identifiers to the
/// bearer tokens minted for this (consumer, provider, service) tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedService {
    pub provider: ProviderDescriptor,
    #[serde(rename = "service")]
    pub service: ServiceDefinitionRef,
    pub service_uri: String,
    #[serde(default)]
    pub secure: SecurityLevel,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default)]
    pub authorization_tokens: HashMap<String, String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl MatchedService {
    /// The bearer token minted for the JSON-over-HTTPS interface, if any.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.authorization_tokens
            .get(HTTP_SECURE_JSON)
            .map(String::as_str)
    }

    /// The HTTP method the provider registered this service under.
    #[must_use]
    pub fn http_method(&self) -> Option<crate::types::HttpMethod> {
        self.metadata
            .get("http-method")
            .and_then(|m| crate::types::HttpMethod::parse(m))
    }
}

/// Response body of `POST /orchestrator/orchestration`: ranked candidates,
/// best match first. An empty list means no reachable, authorized provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationResponse {
    #[serde(default)]
    pub response: Vec<MatchedService>,
}

// ---------------------------------------------------------------------------
// Service registration
// ---------------------------------------------------------------------------

/// Provider system descriptor embedded in a registration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSystem {
    pub system_name: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub authentication_info: String,
}

/// Registration body for `POST /serviceregistry/register`.
///
/// The registry keys entries by (provider system, service definition,
/// version); registering the same key again is a conflict the client
/// resolves by unregister-then-register (upsert semantics).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRegistrationRequest {
    pub service_definition: String,
    pub provider_system: ProviderSystem,
    pub service_uri: String,
    #[serde(default)]
    pub end_of_validity: String,
    pub secure: SecurityLevel,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub version: String,
    pub interfaces: Vec<String>,
}
