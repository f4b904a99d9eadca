//! Actix `App` wiring: shared state plus route registration. Grounded on
//! `server.rs`'s `config_routes` (`web::scope` + `.route(...)` chain
//! registered onto a `ServiceConfig`).

use crate::config::GatewayConfig;
use crate::conversation_store::ConversationStore;
use crate::credential::CredentialResolver;
use crate::eventbus::EventBus;
use crate::handlers;
use crate::kb_client::KbClient;
use crate::metrics::Metrics;
use crate::orchestrator::Orchestrator;
use crate::proxy::BackendClients;
use crate::ratelimit::RateLimiter;
use crate::route_table::RouteTable;
use actix_web::web;
use std::sync::Arc;

/// Every piece of shared, request-handling state. Constructor-injected
/// capabilities throughout (no global singletons), per spec.md §9.
pub struct AppState {
    pub config: GatewayConfig,
    pub route_table: Arc<RouteTable>,
    pub credential_resolver: Arc<CredentialResolver>,
    pub backend_clients: Arc<BackendClients>,
    pub conversation_store: Arc<dyn ConversationStore>,
    pub event_bus: Arc<dyn EventBus>,
    pub orchestrator: Arc<Orchestrator>,
    pub kb_client: Arc<dyn KbClient>,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics: Arc<Metrics>,
}

/// Versions the gateway currently answers on (§6): every route below is
/// registered identically under each prefix so a client pinned to either
/// one gets the same behavior.
const API_VERSIONS: &[&str] = &["v1", "v0.3"];

fn api_scope(version: &str) -> actix_web::Scope {
    web::scope(&format!("/api/{version}"))
        .route("/chat", web::post().to(handlers::chat::post_turn))
        .route("/conversations", web::post().to(handlers::conversations::create))
        .route("/conversations", web::get().to(handlers::conversations::list))
        .route("/conversations/{id}", web::get().to(handlers::conversations::get))
        .route("/conversations/{id}", web::delete().to(handlers::conversations::delete))
        .route("/conversations/{id}/messages", web::get().to(handlers::conversations::list_messages))
        .route("/kb/{operation}", web::post().to(handlers::kb::invoke))
        .route("/auth/{tail:.*}", web::to(handlers::auth_passthrough::forward))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    for version in API_VERSIONS {
        cfg.service(api_scope(version));
    }
    cfg.route("/healthz", web::get().to(handlers::health::liveness));
    cfg.route("/readyz", web::get().to(handlers::health::readiness));
    cfg.route("/metrics", web::get().to(handlers::health::metrics));
}
