//! Conversation Store Facade (§4.8).
//!
//! Storage-agnostic trait and ownership-enforcing query helpers. Grounded
//! on the teacher's `chat_history::ChatHistoryStore` trait shape (async,
//! `thiserror`-backed error, `Send + Sync` object-safe) but narrowed to
//! this crate's `Conversation`/`Message` model and with list operations
//! scoped by owner rather than a generic filter struct, since every
//! conversation here belongs to exactly one subject (§3 invariant).

use crate::models::{Conversation, Message};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ConversationStoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("conversation not found: {0}")]
    NotFound(Uuid),
    #[error("conversation {conversation} is not owned by {subject}")]
    NotOwned { conversation: Uuid, subject: String },
}

pub type Result<T> = std::result::Result<T, ConversationStoreError>;

/// Storage-agnostic conversation/message persistence. Every method that
/// takes a `conversation_id` also takes the caller's `subject_id` and
/// enforces ownership itself, so handlers never need to re-check it.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, owner_subject_id: &str, title: Option<String>) -> Result<Conversation>;

    async fn get_conversation(&self, subject_id: &str, conversation_id: Uuid) -> Result<Conversation>;

    async fn list_conversations(&self, subject_id: &str) -> Result<Vec<Conversation>>;

    async fn delete_conversation(&self, subject_id: &str, conversation_id: Uuid) -> Result<()>;

    async fn append_message(&self, subject_id: &str, message: Message) -> Result<Message>;

    async fn list_messages(&self, subject_id: &str, conversation_id: Uuid) -> Result<Vec<Message>>;
}

/// Checks ownership and maps the mismatch into the store's error type;
/// shared by every backend's read/write paths (§3's "owner mismatch is
/// rejected, never silently scoped" invariant).
pub(crate) fn check_owner(conversation: &Conversation, subject_id: &str) -> Result<()> {
    if conversation.owner_subject_id == subject_id {
        Ok(())
    } else {
        Err(ConversationStoreError::NotOwned {
            conversation: conversation.conversation_id,
            subject: subject_id.to_string(),
        })
    }
}
