//! Chat turn endpoint (§4.4 step 1, §6).
//!
//! A single route handles both transports: `stream: true` hands the
//! orchestrator's lazy chunk stream straight to [`ChatEventStream`];
//! `stream: false` drains it to completion and renders one of two output
//! shapes chosen by `format_hint` (§4.4 Output formats).

use crate::app::AppState;
use crate::error::{ApiError, ErrorKind};
use crate::handlers::resolve_principal;
use crate::orchestrator::{ChatOutcome, OrchestratorError};
use crate::sse::ChatEventStream;
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::StreamExt;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    #[serde(default)]
    pub stream: bool,
    /// `"legacy"` selects the choices-array shape; anything else (or
    /// absent) gets the flat `{response, conversation_id}` shape.
    #[serde(default)]
    pub format_hint: Option<String>,
}

pub async fn post_turn(state: web::Data<AppState>, req: HttpRequest, body: web::Json<TurnRequest>) -> Result<HttpResponse, ApiError> {
    let principal = resolve_principal(&state.credential_resolver, &req).await?;
    let decision = state.rate_limiter.check(&principal.subject_id, true);
    if !decision.allowed {
        return Err(ApiError::too_many_requests(decision.retry_after_secs));
    }

    let turn = body.into_inner();
    let outcome = state
        .orchestrator
        .process_chat(&principal.subject_id, turn.conversation_id, turn.message)
        .await
        .map_err(orchestrator_error_to_api)?;

    if turn.stream {
        let subscription = state.event_bus.subscribe().ok();
        let topic = outcome.conversation_id.to_string();
        let stream = ChatEventStream::new(outcome.chunks, subscription, topic);
        Ok(HttpResponse::Ok()
            .content_type("text/event-stream")
            .insert_header(("Cache-Control", "no-cache"))
            .insert_header(("Connection", "keep-alive"))
            .insert_header(("X-Accel-Buffering", "no"))
            .streaming(stream))
    } else {
        let rendered = render_response(outcome, turn.format_hint.as_deref()).await;
        Ok(HttpResponse::Ok().json(rendered))
    }
}

/// Drains the chunk stream, concatenating `content` chunks into the final
/// answer text, and shapes the result per `format_hint`.
async fn render_response(outcome: ChatOutcome, format_hint: Option<&str>) -> serde_json::Value {
    let ChatOutcome { conversation_id, model, mut chunks } = outcome;
    let mut response_text = String::new();
    let mut truncated = false;
    while let Some(chunk) = chunks.next().await {
        use crate::models::StreamChunkKind;
        match chunk.kind {
            StreamChunkKind::Content => {
                if let Some(text) = chunk.payload.get("text").and_then(|v| v.as_str()) {
                    response_text.push_str(text);
                }
            }
            StreamChunkKind::Done => {
                truncated = chunk.payload.get("truncated").and_then(|v| v.as_bool()).unwrap_or(false);
            }
            _ => {}
        }
    }

    match format_hint {
        Some("legacy") => serde_json::json!({
            "id": format!("chatcmpl-{conversation_id}"),
            "object": "chat.completion",
            "model": model,
            "conversation_id": conversation_id,
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": response_text },
                "finish_reason": if truncated { "length" } else { "stop" },
            }],
        }),
        _ => serde_json::json!({
            "response": response_text,
            "conversation_id": conversation_id,
            "truncated": truncated,
        }),
    }
}

fn orchestrator_error_to_api(e: OrchestratorError) -> ApiError {
    match e {
        OrchestratorError::Provider(e) => ApiError::new(ErrorKind::UpstreamUnavailable, e.to_string()),
        OrchestratorError::Store(e) => store_error_to_api(e),
        OrchestratorError::ToolIterationsExceeded => ApiError::new(ErrorKind::ToolFailure, "tool iteration budget exceeded"),
    }
}

fn store_error_to_api(e: crate::conversation_store::ConversationStoreError) -> ApiError {
    use crate::conversation_store::ConversationStoreError::*;
    match e {
        NotFound(id) => ApiError::not_found(format!("conversation {id} not found")),
        NotOwned { conversation, .. } => ApiError::not_found(format!("conversation {conversation} not found")),
        Backend(detail) => ApiError::new(ErrorKind::Internal, detail),
    }
}
