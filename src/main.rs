//! `gatewayd`: process entry point. Loads configuration, assembles
//! `AppState`, and starts the `actix-web` server. Grounded on the
//! teacher's `server.rs` top-level `main`/`run` split (load config, build
//! shared state, register routes, bind and serve).

use actix_web::{web, App, HttpServer};
use gateway_core::app::{self, AppState};
use gateway_core::config::GatewayConfig;
use gateway_core::conversation_store::ConversationStore;
use gateway_core::conversation_store_memory::MemoryConversationStore;
use gateway_core::conversation_store_sled::SledConversationStore;
use gateway_core::credential::CredentialResolver;
use gateway_core::cors::cors_from_config;
use gateway_core::eventbus::build_event_bus;
use gateway_core::identity_http::{HttpBearerVerifier, HttpIdentityClient};
use gateway_core::kb_client::{HttpKbClient, KbClient};
use gateway_core::metrics::Metrics;
use gateway_core::models::{AuthPolicy, BodyPassthrough, RouteEntry};
use gateway_core::orchestrator::{Orchestrator, OrchestratorConfig};
use gateway_core::proxy::BackendClients;
use gateway_core::provider::ChatProvider;
use gateway_core::provider_openai::OpenAiChatProvider;
use gateway_core::ratelimit::RateLimiter;
use gateway_core::route_table::RouteTable;
use std::sync::Arc;

/// A minimal, always-present route for the identity passthrough path, used
/// when `ROUTE_TABLE_PATH` is unset. Production deployments are expected
/// to supply a full YAML route document (§4.2 / §6).
fn default_routes() -> Vec<RouteEntry> {
    ["v1", "v0.3"]
        .into_iter()
        .map(|version| RouteEntry {
            method: "POST".into(),
            path_pattern: format!("/api/{version}/auth/:action"),
            backend: "identity".into(),
            upstream_path_template: "/auth/:action".into(),
            auth_policy: AuthPolicy::Public,
            body_passthrough: BodyPassthrough::Buffer,
            idempotent: false,
            timeout_seconds: Some(10),
        })
        .collect()
}

fn build_route_table(config: &GatewayConfig) -> Arc<RouteTable> {
    let table = match &config.route_table_path {
        Some(path) => RouteTable::load_from_path(path).unwrap_or_else(|e| {
            tracing::error!(error = %e, path = %path, "failed to load route table, falling back to defaults");
            RouteTable::from_entries(default_routes()).expect("default route table is well-formed")
        }),
        None => {
            tracing::warn!("ROUTE_TABLE_PATH unset; using the built-in default route table");
            RouteTable::from_entries(default_routes()).expect("default route table is well-formed")
        }
    };
    Arc::new(table)
}

fn build_conversation_store(config: &GatewayConfig) -> Arc<dyn ConversationStore> {
    match &config.conversation_store_dsn {
        Some(dsn) if dsn.starts_with("memory://") || dsn.is_empty() => {
            tracing::info!("conversation store: in-memory (non-durable)");
            Arc::new(MemoryConversationStore::new())
        }
        Some(path) => {
            tracing::info!(path = %path, "conversation store: sled");
            Arc::new(
                SledConversationStore::open(path).unwrap_or_else(|e| {
                    panic!("failed to open sled conversation store at '{path}': {e}")
                }),
            )
        }
        None => {
            tracing::info!("CONVERSATION_STORE_DSN unset; defaulting to in-memory conversation store");
            Arc::new(MemoryConversationStore::new())
        }
    }
}

fn build_chat_provider(client: reqwest::Client) -> Arc<dyn ChatProvider> {
    let base_url = std::env::var("CHAT_PROVIDER_BASE_URL")
        .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
    let api_key = std::env::var("CHAT_PROVIDER_API_KEY").ok();
    Arc::new(OpenAiChatProvider::new(client, base_url, api_key))
}

fn build_kb_client(client: reqwest::Client) -> Arc<dyn KbClient> {
    let base_url = std::env::var("KB_BASE_URL").unwrap_or_else(|_| "http://localhost:9100".to_string());
    Arc::new(HttpKbClient::new(client, base_url))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    gateway_core::config::init_tracing();

    let config = GatewayConfig::from_env();
    tracing::info!(addr = %config.listen_addr, "starting gatewayd");

    let route_table = build_route_table(&config);
    let backend_clients = Arc::new(BackendClients::new(config.default_request_timeout));

    let identity_base = config
        .identity_endpoint
        .clone()
        .unwrap_or_else(|| "http://localhost:9200".to_string());
    let http_client = reqwest::Client::builder()
        .timeout(config.default_request_timeout)
        .build()
        .expect("failed to build shared http client");
    let identity_client = Arc::new(HttpIdentityClient::new(http_client.clone(), identity_base.clone()));
    let bearer_verifier = Arc::new(HttpBearerVerifier::new(http_client.clone(), identity_base));
    let credential_resolver = Arc::new(CredentialResolver::new(identity_client, bearer_verifier));

    let conversation_store = build_conversation_store(&config);
    let event_bus = build_event_bus(config.eventbus_disabled());
    let chat_provider = build_chat_provider(http_client.clone());
    let kb_client = build_kb_client(http_client.clone());

    let orchestrator = Arc::new(Orchestrator::new(
        chat_provider,
        conversation_store.clone(),
        kb_client.clone(),
        OrchestratorConfig {
            classifier_deadline: std::time::Duration::from_millis(config.orchestrator_classifier_deadline_ms),
            tool_iterations_max: config.orchestrator_tool_iterations_max,
            default_model: std::env::var("CHAT_PROVIDER_DEFAULT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        },
    ));

    let rate_limiter = Arc::new(RateLimiter::new(
        config.ratelimit_anonymous_per_minute,
        config.ratelimit_authenticated_per_minute,
    ));
    let metrics = Arc::new(Metrics::new());

    let state = web::Data::new(AppState {
        config: config.clone(),
        route_table,
        credential_resolver,
        backend_clients,
        conversation_store,
        event_bus,
        orchestrator,
        kb_client,
        rate_limiter,
        metrics,
    });

    let listen_addr = config.listen_addr.clone();

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(cors_from_config(&state.config))
            .wrap(actix_web::middleware::Logger::default())
            .configure(app::configure)
    })
    .bind(&listen_addr)?
    .run()
    .await
}
