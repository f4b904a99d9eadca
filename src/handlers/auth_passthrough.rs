//! Plain reverse-proxy passthrough for routes that the static route
//! table (not a dedicated handler) resolves — identity/auth endpoints,
//! and any other backend the table names. Grounded on `server.rs`'s
//! generic forwarding handlers, generalized from one fixed upstream to
//! whichever backend `RouteTable::lookup` resolves.

use crate::app::AppState;
use crate::error::ApiError;
use crate::handlers::resolve_principal;
use crate::proxy;
use crate::route_table::body_passthrough_of;
use actix_web::{web, HttpRequest, HttpResponse};
use uuid::Uuid;

pub async fn forward(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Payload,
) -> Result<HttpResponse, ApiError> {
    let route_match = state
        .route_table
        .lookup(req.method().as_str(), req.path())
        .ok_or_else(|| ApiError::not_found("no route matches this path"))?;

    let entry = route_match.entry.clone();
    let captures = route_match.captures.clone();

    let principal = if proxy::requires_authentication(&entry.auth_policy) {
        let p = resolve_principal(&state.credential_resolver, &req).await?;
        if let crate::models::AuthPolicy::RequireScope(scope) = &entry.auth_policy {
            crate::handlers::require_scope(&p, scope)?;
        }
        Some(p)
    } else {
        None
    };

    let body = if proxy::should_read_body(&entry) {
        Some(proxy::read_body_respecting_limit(payload, 10 * 1024 * 1024).await?)
    } else {
        None
    };

    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    let result = proxy::forward(
        &state.backend_clients,
        &entry,
        &captures,
        &req,
        body,
        principal.as_ref(),
        request_id,
    )
    .await;

    if let Err(e) = &result {
        state.metrics.record_error(e.kind.type_str());
    }
    result
}
