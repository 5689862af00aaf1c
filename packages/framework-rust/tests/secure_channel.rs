//! Mutual-TLS channel tests: a provider runtime serving over TLS with a
//! required client certificate, exercised with certificates minted from a
//! throwaway test CA.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use arrowhead_core::{RegistrationError, ServiceRegistrationRequest};
use arrowhead_framework::{
    CollaboratorEndpoint, FrameworkConfig, ProviderRuntime, ServiceBinding, ServiceRegistryClient,
    SystemSettings, TlsSettings, TrustContext, UnregisterQuery,
};
use serde_json::json;
use tempfile::NamedTempFile;

struct AcceptAllRegistry;

#[async_trait::async_trait]
impl ServiceRegistryClient for AcceptAllRegistry {
    async fn register(&self, _request: &ServiceRegistrationRequest) -> Result<(), RegistrationError> {
        Ok(())
    }

    async fn unregister(&self, _query: &UnregisterQuery) -> Result<(), RegistrationError> {
        Ok(())
    }
}

struct TestCa {
    cert: rcgen::Certificate,
    key: rcgen::KeyPair,
}

impl TestCa {
    fn new() -> Self {
        let mut params = rcgen::CertificateParams::new(Vec::new()).unwrap();
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "testcloud-ca");
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        Self { cert, key }
    }

    /// Issues a leaf for `common_name`, returning the keystore PEM bundle
    /// (key + leaf).
    fn issue(&self, common_name: &str) -> String {
        let mut params =
            rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        params
            .subject_alt_names
            .push(rcgen::SanType::IpAddress("127.0.0.1".parse().unwrap()));
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, common_name);
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();
        format!("{}{}", key.serialize_pem(), cert.pem())
    }
}

fn write_temp(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn provider_config() -> FrameworkConfig {
    let mut config = FrameworkConfig::new(
        SystemSettings {
            name: None,
            address: "127.0.0.1".into(),
            port: 0,
        },
        CollaboratorEndpoint::new("orchestrator", 8441),
        CollaboratorEndpoint::new("serviceregistry", 8443),
    );
    config.listener.drain_timeout = Duration::from_millis(100);
    config
}

fn ping_binding() -> Vec<ServiceBinding> {
    vec![ServiceBinding::query("ping", "/ping", |_params| async {
        Ok(json!({"pong": true}))
    })]
}

#[tokio::test]
async fn mutual_tls_round_trip_with_client_certificate() {
    let ca = TestCa::new();
    let keystore = write_temp(&ca.issue("car-factory.testcloud.company.eu"));
    let truststore = write_temp(&ca.cert.pem());

    let config = provider_config().with_tls(TlsSettings {
        keystore_path: keystore.path().to_path_buf(),
        keystore_password: None,
        truststore_path: truststore.path().to_path_buf(),
    });
    let trust = TrustContext::from_settings(config.tls.as_ref().unwrap(), &config.system).unwrap();
    assert_eq!(trust.identity().system_name, "car-factory");

    let runtime = ProviderRuntime::new(
        &config,
        Some(&trust),
        ping_binding(),
        Arc::new(AcceptAllRegistry),
    )
    .unwrap();
    let port = runtime.start().await.unwrap();

    // A client presenting a CA-signed certificate is served.
    let consumer_keystore = ca.issue("car-consumer.testcloud.company.eu");
    let client = reqwest::Client::builder()
        .use_rustls_tls()
        .tls_built_in_root_certs(false)
        .add_root_certificate(reqwest::Certificate::from_pem(ca.cert.pem().as_bytes()).unwrap())
        .identity(reqwest::Identity::from_pem(consumer_keystore.as_bytes()).unwrap())
        .build()
        .unwrap();

    let response = client
        .get(format!("https://localhost:{port}/ping"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, json!({"pong": true}));

    runtime.stop().await;
}

#[tokio::test]
async fn client_without_certificate_is_rejected_at_the_tls_layer() {
    let ca = TestCa::new();
    let keystore = write_temp(&ca.issue("car-factory.testcloud.company.eu"));
    let truststore = write_temp(&ca.cert.pem());

    let config = provider_config().with_tls(TlsSettings {
        keystore_path: keystore.path().to_path_buf(),
        keystore_password: None,
        truststore_path: truststore.path().to_path_buf(),
    });
    let trust = TrustContext::from_settings(config.tls.as_ref().unwrap(), &config.system).unwrap();
    let runtime = ProviderRuntime::new(
        &config,
        Some(&trust),
        ping_binding(),
        Arc::new(AcceptAllRegistry),
    )
    .unwrap();
    let port = runtime.start().await.unwrap();

    // Trusts the CA but presents no client certificate: the handshake is
    // rejected before any HTTP response exists.
    let client = reqwest::Client::builder()
        .use_rustls_tls()
        .tls_built_in_root_certs(false)
        .add_root_certificate(reqwest::Certificate::from_pem(ca.cert.pem().as_bytes()).unwrap())
        .build()
        .unwrap();

    let outcome = client
        .get(format!("https://localhost:{port}/ping"))
        .send()
        .await;
    assert!(outcome.is_err());

    runtime.stop().await;
}

#[tokio::test]
async fn client_from_a_foreign_ca_is_rejected() {
    let ca = TestCa::new();
    let keystore = write_temp(&ca.issue("car-factory.testcloud.company.eu"));
    let truststore = write_temp(&ca.cert.pem());

    let config = provider_config().with_tls(TlsSettings {
        keystore_path: keystore.path().to_path_buf(),
        keystore_password: None,
        truststore_path: truststore.path().to_path_buf(),
    });
    let trust = TrustContext::from_settings(config.tls.as_ref().unwrap(), &config.system).unwrap();
    let runtime = ProviderRuntime::new(
        &config,
        Some(&trust),
        ping_binding(),
        Arc::new(AcceptAllRegistry),
    )
    .unwrap();
    let port = runtime.start().await.unwrap();

    let foreign_ca = TestCa::new();
    let foreign_keystore = foreign_ca.issue("intruder.othercloud.eu");
    let client = reqwest::Client::builder()
        .use_rustls_tls()
        .tls_built_in_root_certs(false)
        .add_root_certificate(reqwest::Certificate::from_pem(ca.cert.pem().as_bytes()).unwrap())
        .identity(reqwest::Identity::from_pem(foreign_keystore.as_bytes()).unwrap())
        .build()
        .unwrap();

    let outcome = client
        .get(format!("https://localhost:{port}/ping"))
        .send()
        .await;
    assert!(outcome.is_err());

    runtime.stop().await;
}
