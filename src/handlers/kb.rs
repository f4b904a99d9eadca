//! Direct KB tool-invocation endpoint, used by clients that want to call
//! a KB operation outside of an orchestrated chat turn (e.g. a UI
//! "search" box). The orchestrator's own tool path calls `KbClient`
//! in-process rather than looping back through this handler.

use crate::app::AppState;
use crate::error::{ApiError, ErrorKind};
use crate::handlers::{require_scope, resolve_principal};
use crate::kb_client::KbOperation;
use actix_web::{web, HttpRequest, HttpResponse};

pub async fn invoke(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, ApiError> {
    let principal = resolve_principal(&state.credential_resolver, &req).await?;
    require_scope(&principal, "kb")?;

    let operation = KbOperation::from_tool_name(&path.into_inner())
        .map_err(|e| ApiError::new(ErrorKind::NotFound, e.to_string()))?;

    let result = state
        .kb_client
        .invoke(operation, body.into_inner())
        .await
        .map_err(|e| ApiError::new(ErrorKind::BadGateway, e.to_string()))?;

    Ok(HttpResponse::Ok().json(result))
}
