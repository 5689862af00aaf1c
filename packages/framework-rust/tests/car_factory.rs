//! End-to-end exercise of the register -> orchestrate -> token -> dispatch
//! loop over plain HTTP: a car-factory provider, a consumer framework, and
//! mock orchestrator/registry collaborators.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arrowhead_core::{
    MatchedService, OrchestrationRequest, OrchestrationResponse, ProviderDescriptor,
    RegistrationError, ServiceDefinitionRef, ServiceRegistrationRequest, HTTP_SECURE_JSON,
};
use arrowhead_framework::{
    CollaboratorEndpoint, Framework, FrameworkConfig, FrameworkError, HandlerError, OrchestrationError,
    Params, ProviderRuntime, RuntimeState, SecurityLevel, ServiceBinding, ServiceRegistryClient,
    SystemSettings, UnregisterQuery,
};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{any, post};
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use parking_lot::Mutex;
use serde_json::json;

/// Registry double that accepts everything.
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

/// Mock orchestrator answering with pre-provisioned matches per service
/// definition and counting upstream queries.
struct Orchestrator {
    calls: AtomicU32,
    matches: Mutex<HashMap<String, MatchedService>>,
}

async fn orchestration_handler(
    State(state): State<Arc<Orchestrator>>,
    Json(request): Json<OrchestrationRequest>,
) -> Json<OrchestrationResponse> {
    state.calls.fetch_add(1, Ordering::SeqCst);
    let service = &request.requested_service.service_definition_requirement;
    let response = state
        .matches
        .lock()
        .get(service)
        .cloned()
        .map_or_else(Vec::new, |matched| vec![matched]);
    Json(OrchestrationResponse { response })
}

async fn spawn_orchestrator(
    matches: HashMap<String, MatchedService>,
) -> (SocketAddr, Arc<Orchestrator>) {
    let state = Arc::new(Orchestrator {
        calls: AtomicU32::new(0),
        matches: Mutex::new(matches),
    });
    let app = Router::new()
        .route("/orchestrator/orchestration", post(orchestration_handler))
        .with_state(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

fn matched(
    service: &str,
    provider_port: u16,
    method: &str,
    secure: SecurityLevel,
    token: Option<&str>,
) -> MatchedService {
    let mut authorization_tokens = HashMap::new();
    if let Some(token) = token {
        authorization_tokens.insert(HTTP_SECURE_JSON.to_string(), token.to_string());
    }
    MatchedService {
        provider: ProviderDescriptor {
            id: None,
            system_name: "car-factory".into(),
            address: "127.0.0.1".into(),
            port: provider_port,
            authentication_info: None,
        },
        service: ServiceDefinitionRef {
            id: None,
            service_definition: service.into(),
        },
        service_uri: "/carfactory".into(),
        secure,
        metadata: HashMap::from([("http-method".to_string(), method.to_string())]),
        version: Some(1),
        authorization_tokens,
        warnings: Vec::new(),
    }
}

fn consumer_config(orchestrator: SocketAddr) -> FrameworkConfig {
    let mut config = FrameworkConfig::new(
        SystemSettings::named("car-consumer", "127.0.0.1", 8888),
        CollaboratorEndpoint::new(orchestrator.ip().to_string(), orchestrator.port()),
        CollaboratorEndpoint::new("serviceregistry", 8443),
    );
    config.dispatch.initial_backoff = Duration::from_millis(1);
    config.dispatch.max_backoff = Duration::from_millis(5);
    config
}

fn provider_config() -> FrameworkConfig {
    let mut config = FrameworkConfig::new(
        SystemSettings::named("car-factory", "127.0.0.1", 0),
        CollaboratorEndpoint::new("orchestrator", 8441),
        CollaboratorEndpoint::new("serviceregistry", 8443),
    );
    config.listener.drain_timeout = Duration::from_millis(100);
    config
}

fn car_factory_bindings() -> Vec<ServiceBinding> {
    let cars: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));
    let store = Arc::clone(&cars);
    vec![
        ServiceBinding::payload("create-car", "/carfactory", move |body, _params| {
            let store = Arc::clone(&store);
            async move {
                if body.get("brand").is_none() {
                    return Err(HandlerError::BadPayload("car needs a brand".into()));
                }
                store.lock().push(body);
                Ok(json!({"status": "success", "message": "Car created successfully"}))
            }
        }),
        ServiceBinding::query("get-car", "/carfactory", move |_params| {
            let cars = Arc::clone(&cars);
            async move { Ok(json!(cars.lock().clone())) }
        }),
    ]
}

#[tokio::test]
async fn car_factory_round_trip() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();

    let runtime = ProviderRuntime::new(
        &provider_config(),
        None,
        car_factory_bindings(),
        Arc::new(AcceptAllRegistry),
    )?;
    let provider_port = runtime.start().await?;
    assert_eq!(runtime.state(), RuntimeState::Serving);

    let (orchestrator_addr, orchestrator) = spawn_orchestrator(HashMap::from([
        (
            "create-car".to_string(),
            matched("create-car", provider_port, "POST", SecurityLevel::NotSecure, None),
        ),
        (
            "get-car".to_string(),
            matched("get-car", provider_port, "GET", SecurityLevel::NotSecure, None),
        ),
    ]))
    .await;

    let framework = Framework::new(consumer_config(orchestrator_addr)).unwrap();

    // Create a car.
    let body = framework
        .send_request(
            "create-car",
            Params::json(&json!({"brand": "Toyota", "color": "Red"}))?,
        )
        .await?;
    let created: serde_json::Value = serde_json::from_slice(&body)?;
    assert_eq!(
        created,
        json!({"status": "success", "message": "Car created successfully"})
    );

    // Fetch it back.
    let body = framework.send_request("get-car", Params::empty()).await?;
    let cars: serde_json::Value = serde_json::from_slice(&body)?;
    assert_eq!(cars, json!([{"brand": "Toyota", "color": "Red"}]));

    // Two distinct services resolved: two orchestration queries.
    assert_eq!(orchestrator.calls.load(Ordering::SeqCst), 2);

    // A repeated call within the TTL is served from the resolver cache.
    framework.send_request("get-car", Params::empty()).await?;
    assert_eq!(orchestrator.calls.load(Ordering::SeqCst), 2);

    // Stopping releases the listener; the port must refuse connections.
    runtime.stop().await;
    assert_eq!(runtime.state(), RuntimeState::Stopped);
    assert!(tokio::net::TcpStream::connect(("127.0.0.1", provider_port))
        .await
        .is_err());

    // stop() is idempotent.
    runtime.stop().await;
    assert_eq!(runtime.state(), RuntimeState::Stopped);
    Ok(())
}

#[tokio::test]
async fn empty_orchestration_never_reaches_the_provider() {
    // Scripted provider counting hits; the orchestrator knows no service.
    let hits = Arc::new(AtomicU32::new(0));
    let handler_hits = Arc::clone(&hits);
    let app = Router::new().route(
        "/carfactory",
        any(move || {
            let hits = Arc::clone(&handler_hits);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                "should never be called"
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let (orchestrator_addr, _) = spawn_orchestrator(HashMap::new()).await;
    let framework = Framework::new(consumer_config(orchestrator_addr)).unwrap();

    let err = framework
        .send_request("get-car", Params::empty())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FrameworkError::Orchestration(OrchestrationError::ServiceNotAvailable { ref service })
            if service == "get-car"
    ));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

/// Scripted provider answering the queued statuses, then 200 `ok`.
struct ScriptedProvider {
    statuses: Mutex<Vec<u16>>,
    calls: AtomicU32,
    last_authorization: Mutex<Option<String>>,
}

async fn scripted_handler(
    State(state): State<Arc<ScriptedProvider>>,
    headers: HeaderMap,
) -> (StatusCode, &'static str) {
    state.calls.fetch_add(1, Ordering::SeqCst);
    *state.last_authorization.lock() = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    let next = {
        let mut statuses = state.statuses.lock();
        if statuses.is_empty() {
            200
        } else {
            statuses.remove(0)
        }
    };
    (StatusCode::from_u16(next).unwrap(), "ok")
}

async fn spawn_scripted_provider(statuses: Vec<u16>) -> (SocketAddr, Arc<ScriptedProvider>) {
    let state = Arc::new(ScriptedProvider {
        statuses: Mutex::new(statuses),
        calls: AtomicU32::new(0),
        last_authorization: Mutex::new(None),
    });
    let app = Router::new()
        .route("/carfactory", any(scripted_handler))
        .with_state(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

#[tokio::test]
async fn authorization_rejection_triggers_exactly_one_re_resolution() {
    let (provider_addr, provider) = spawn_scripted_provider(vec![401]).await;
    let (orchestrator_addr, orchestrator) = spawn_orchestrator(HashMap::from([(
        "get-car".to_string(),
        matched("get-car", provider_addr.port(), "GET", SecurityLevel::NotSecure, None),
    )]))
    .await;

    let framework = Framework::new(consumer_config(orchestrator_addr)).unwrap();
    let body = framework.send_request("get-car", Params::empty()).await.unwrap();
    assert_eq!(&body[..], b"ok");

    // First dispatch hit the 401, the facade invalidated and re-resolved.
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    assert_eq!(orchestrator.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn persistent_authorization_rejection_surfaces_after_one_retry() {
    let (provider_addr, provider) = spawn_scripted_provider(vec![401, 401, 401]).await;
    let (orchestrator_addr, orchestrator) = spawn_orchestrator(HashMap::from([(
        "get-car".to_string(),
        matched("get-car", provider_addr.port(), "GET", SecurityLevel::NotSecure, None),
    )]))
    .await;

    let framework = Framework::new(consumer_config(orchestrator_addr)).unwrap();
    let err = framework
        .send_request("get-car", Params::empty())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FrameworkError::Dispatch(arrowhead_framework::DispatchError::Authorization { status: 401 })
    ));
    // Exactly one end-to-end retry: two dispatches, two resolutions.
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    assert_eq!(orchestrator.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn embedded_token_is_sent_as_bearer_for_token_secured_services() {
    let (provider_addr, provider) = spawn_scripted_provider(Vec::new()).await;

    let exp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
        + 3600;
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!("{{\"exp\":{exp}}}").as_bytes());
    let token = format!("{header}.{payload}.signature");

    let (orchestrator_addr, _) = spawn_orchestrator(HashMap::from([(
        "get-car".to_string(),
        matched(
            "get-car",
            provider_addr.port(),
            "GET",
            SecurityLevel::Token,
            Some(&token),
        ),
    )]))
    .await;

    let framework = Framework::new(consumer_config(orchestrator_addr)).unwrap();
    framework.send_request("get-car", Params::empty()).await.unwrap();

    assert_eq!(
        provider.last_authorization.lock().as_deref(),
        Some(format!("Bearer {token}").as_str())
    );
}
