//! Conversation CRUD, fronting the Conversation Store Facade.

use crate::app::AppState;
use crate::conversation_store::ConversationStoreError;
use crate::error::{ApiError, ErrorKind};
use crate::handlers::resolve_principal;
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

fn store_error_to_api(e: ConversationStoreError) -> ApiError {
    match e {
        ConversationStoreError::NotFound(id) => ApiError::not_found(format!("conversation {id} not found")),
        // Ownership mismatches read as "not found" rather than "forbidden" —
        // existence of another subject's conversation is not disclosed.
        ConversationStoreError::NotOwned { conversation, .. } => {
            ApiError::not_found(format!("conversation {conversation} not found"))
        }
        ConversationStoreError::Backend(detail) => ApiError::new(ErrorKind::Internal, detail),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub title: Option<String>,
}

pub async fn create(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateConversationRequest>,
) -> Result<HttpResponse, ApiError> {
    let principal = resolve_principal(&state.credential_resolver, &req).await?;
    let conversation = state
        .conversation_store
        .create_conversation(&principal.subject_id, body.into_inner().title)
        .await
        .map_err(store_error_to_api)?;
    Ok(HttpResponse::Created().json(conversation))
}

pub async fn list(state: web::Data<AppState>, req: HttpRequest) -> Result<HttpResponse, ApiError> {
    let principal = resolve_principal(&state.credential_resolver, &req).await?;
    let conversations = state
        .conversation_store
        .list_conversations(&principal.subject_id)
        .await
        .map_err(store_error_to_api)?;
    Ok(HttpResponse::Ok().json(conversations))
}

pub async fn get(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let principal = resolve_principal(&state.credential_resolver, &req).await?;
    let conversation = state
        .conversation_store
        .get_conversation(&principal.subject_id, path.into_inner())
        .await
        .map_err(store_error_to_api)?;
    Ok(HttpResponse::Ok().json(conversation))
}

pub async fn delete(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let principal = resolve_principal(&state.credential_resolver, &req).await?;
    state
        .conversation_store
        .delete_conversation(&principal.subject_id, path.into_inner())
        .await
        .map_err(store_error_to_api)?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn list_messages(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let principal = resolve_principal(&state.credential_resolver, &req).await?;
    let messages = state
        .conversation_store
        .list_messages(&principal.subject_id, path.into_inner())
        .await
        .map_err(store_error_to_api)?;
    Ok(HttpResponse::Ok().json(messages))
}
