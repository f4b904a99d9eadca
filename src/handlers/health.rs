//! Liveness, readiness, and the `/metrics` scrape endpoint.

use crate::app::AppState;
use crate::health::{aggregate, run_probe};
use actix_web::{web, HttpResponse};

pub async fn liveness() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "live" }))
}

pub async fn readiness(state: web::Data<AppState>) -> HttpResponse {
    let store = state.conversation_store.clone();
    let event_bus = state.event_bus.clone();

    let store_probe = run_probe("conversation_store", || async move {
        store
            .list_conversations("__readiness_probe__")
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    });

    let bus_probe = run_probe("event_bus", || async move {
        match event_bus.subscribe() {
            Ok(_) => Ok(()),
            Err(crate::eventbus::EventBusError::Disabled) => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    });

    let (store_result, bus_result) = tokio::join!(store_probe, bus_probe);
    let report = aggregate(vec![store_result, bus_result]);

    if report.ready {
        HttpResponse::Ok().json(report)
    } else {
        HttpResponse::ServiceUnavailable().json(report)
    }
}

pub async fn metrics(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(state.metrics.render())
}
