//! Exercises the reverse-proxy passthrough handler end to end against a
//! real (if tiny) upstream HTTP server, the same way the teacher's
//! `tests/vllm_forwarding_tests.rs` drives its own forwarding handlers:
//! spin up an `axum` mock upstream on an ephemeral port, point the
//! gateway at it via the backend's `BACKEND_<NAME>_BASE_URL` env var,
//! and assert on both the gateway's response and what the upstream
//! actually received.

use actix_web::{test, web, App};
use axum::{extract::State, routing::get, Json, Router};
use gateway_core::app::{self, AppState};
use gateway_core::config::GatewayConfig;
use gateway_core::conversation_store_memory::MemoryConversationStore;
use gateway_core::credential::{BearerClaims, BearerVerifier, CredentialError, CredentialResolver, IdentityClient, OpaqueKeyVerification};
use gateway_core::eventbus::DisabledEventBus;
use gateway_core::kb_client::HttpKbClient;
use gateway_core::metrics::Metrics;
use gateway_core::models::{AuthPolicy, BodyPassthrough, RouteEntry};
use gateway_core::orchestrator::{Orchestrator, OrchestratorConfig};
use gateway_core::provider::{ChatProvider, CompletionRequest, DeltaStream, ProviderError};
use gateway_core::proxy::BackendClients;
use gateway_core::ratelimit::RateLimiter;
use gateway_core::route_table::RouteTable;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

static ENV_LOCK: Mutex<()> = Mutex::new(());

#[derive(Clone)]
struct UpstreamState {
    requests: Arc<AsyncMutex<Vec<String>>>,
}

async fn handle_ping(State(state): State<UpstreamState>, req: axum::http::Request<axum::body::Body>) -> Json<Value> {
    let subject = req
        .headers()
        .get("x-principal-subject")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state.requests.lock().await.push(subject);
    Json(json!({ "pong": true }))
}

struct MockUpstream {
    base_url: String,
    requests: Arc<AsyncMutex<Vec<String>>>,
    join: JoinHandle<()>,
}

impl MockUpstream {
    async fn start() -> Self {
        let requests = Arc::new(AsyncMutex::new(Vec::new()));
        let state = UpstreamState {
            requests: requests.clone(),
        };
        let router = Router::new()
            .route("/auth/ping", get(handle_ping))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");
        let join = tokio::spawn(async move {
            axum::serve(listener, router).await.expect("mock upstream server");
        });

        Self {
            base_url: format!("http://{addr}"),
            requests,
            join,
        }
    }

    async fn last_subject(&self) -> Option<String> {
        self.requests.lock().await.last().cloned()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.join.abort();
    }
}

struct EnvRestore {
    saved: Vec<(&'static str, Option<String>)>,
}

impl EnvRestore {
    fn capture(keys: &[&'static str]) -> Self {
        let saved = keys.iter().map(|k| (*k, std::env::var(k).ok())).collect();
        Self { saved }
    }
}

impl Drop for EnvRestore {
    fn drop(&mut self) {
        for (key, value) in &self.saved {
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }
}

struct UnusedBearer;
#[async_trait::async_trait]
impl BearerVerifier for UnusedBearer {
    async fn verify(&self, token: &str, _allow_refetch: bool) -> Result<BearerClaims, CredentialError> {
        Ok(BearerClaims {
            subject_id: token.to_string(),
            issued_at: 0,
            expires_at: None,
            scopes: vec![],
        })
    }
}
struct UnusedIdentity;
#[async_trait::async_trait]
impl IdentityClient for UnusedIdentity {
    async fn verify_opaque_key(&self, _raw_key: &str) -> Result<OpaqueKeyVerification, CredentialError> {
        Err(CredentialError::Malformed)
    }
}
struct UnusedProvider;
#[async_trait::async_trait]
impl ChatProvider for UnusedProvider {
    async fn stream_completion(&self, _request: CompletionRequest) -> Result<DeltaStream, ProviderError> {
        Err(ProviderError::Request("not exercised by this test".into()))
    }
}

fn test_config() -> GatewayConfig {
    GatewayConfig {
        listen_addr: "127.0.0.1:0".into(),
        tls_cert_path: None,
        tls_key_path: None,
        route_table_path: None,
        identity_endpoint: None,
        identity_jwks_cache_ttl: Duration::from_secs(300),
        eventbus_endpoint: "disabled".into(),
        conversation_store_dsn: Some("memory://".into()),
        ratelimit_anonymous_per_minute: 30,
        ratelimit_authenticated_per_minute: 120,
        cors_allow_origins: Vec::new(),
        streaming_idle_timeout: Duration::from_secs(120),
        streaming_word_buffer_ceiling_bytes: 256,
        streaming_directive_scan_limit_bytes: 4096,
        orchestrator_tool_iterations_max: 4,
        orchestrator_classifier_deadline_ms: 150,
        default_request_timeout: Duration::from_secs(5),
    }
}

#[actix_web::test]
async fn public_route_is_forwarded_with_principal_headers_stripped_for_anonymous_callers() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    let _restore = EnvRestore::capture(&["BACKEND_IDENTITY_BASE_URL"]);

    let upstream = MockUpstream::start().await;
    std::env::set_var("BACKEND_IDENTITY_BASE_URL", &upstream.base_url);

    let route_table = RouteTable::from_entries(vec![RouteEntry {
        method: "GET".into(),
        path_pattern: "/api/v1/auth/:action".into(),
        backend: "identity".into(),
        upstream_path_template: "/auth/:action".into(),
        auth_policy: AuthPolicy::Public,
        body_passthrough: BodyPassthrough::None,
        idempotent: true,
        timeout_seconds: Some(5),
    }])
    .unwrap();

    let conversation_store = Arc::new(MemoryConversationStore::new());
    let credential_resolver = Arc::new(CredentialResolver::new(Arc::new(UnusedIdentity), Arc::new(UnusedBearer)));
    let http_client = reqwest::Client::new();
    let kb_client = Arc::new(HttpKbClient::new(http_client.clone(), "http://localhost:9999".into()));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(UnusedProvider),
        conversation_store.clone(),
        kb_client.clone(),
        OrchestratorConfig {
            classifier_deadline: Duration::from_millis(150),
            tool_iterations_max: 4,
            default_model: "test-model".into(),
        },
    ));

    let state = web::Data::new(AppState {
        config: test_config(),
        route_table: Arc::new(route_table),
        credential_resolver,
        backend_clients: Arc::new(BackendClients::new(Duration::from_secs(5))),
        conversation_store,
        event_bus: Arc::new(DisabledEventBus),
        orchestrator,
        kb_client,
        rate_limiter: Arc::new(RateLimiter::new(30, 120)),
        metrics: Arc::new(Metrics::new()),
    });

    let app = test::init_service(App::new().app_data(state).configure(app::configure)).await;

    let req = test::TestRequest::get().uri("/api/v1/auth/ping").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["pong"], true);

    // Public routes never resolve a principal, so no x-principal-subject
    // header reaches the upstream.
    assert_eq!(upstream.last_subject().await, Some(String::new()));
}
