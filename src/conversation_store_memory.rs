//! In-memory conversation store backend.
//!
//! For development and tests; data is lost on process exit. Grounded on
//! `chat_history_memory::MemoryChatHistoryStore`'s `Arc<RwLock<HashMap<_>>>`
//! shape.

use crate::conversation_store::{check_owner, ConversationStore, ConversationStoreError, Result};
use crate::models::{Conversation, Message};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryConversationStore {
    conversations: RwLock<HashMap<Uuid, Conversation>>,
    messages: RwLock<HashMap<Uuid, Vec<Message>>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_err(e: impl std::fmt::Display) -> ConversationStoreError {
        ConversationStoreError::Backend(format!("lock poisoned: {e}"))
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn create_conversation(
        &self,
        owner_subject_id: &str,
        title: Option<String>,
    ) -> Result<Conversation> {
        let conversation = Conversation::new(owner_subject_id.to_string(), title);
        let mut conversations = self.conversations.write().map_err(Self::lock_err)?;
        conversations.insert(conversation.conversation_id, conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, subject_id: &str, conversation_id: Uuid) -> Result<Conversation> {
        let conversations = self.conversations.read().map_err(Self::lock_err)?;
        let conversation = conversations
            .get(&conversation_id)
            .cloned()
            .ok_or(ConversationStoreError::NotFound(conversation_id))?;
        check_owner(&conversation, subject_id)?;
        Ok(conversation)
    }

    async fn list_conversations(&self, subject_id: &str) -> Result<Vec<Conversation>> {
        let conversations = self.conversations.read().map_err(Self::lock_err)?;
        let mut owned: Vec<Conversation> = conversations
            .values()
            .filter(|c| c.owner_subject_id == subject_id)
            .cloned()
            .collect();
        owned.sort_by_key(|c| std::cmp::Reverse(c.created_at));
        Ok(owned)
    }

    async fn delete_conversation(&self, subject_id: &str, conversation_id: Uuid) -> Result<()> {
        let mut conversations = self.conversations.write().map_err(Self::lock_err)?;
        let conversation = conversations
            .get(&conversation_id)
            .cloned()
            .ok_or(ConversationStoreError::NotFound(conversation_id))?;
        check_owner(&conversation, subject_id)?;
        conversations.remove(&conversation_id);
        drop(conversations);
        self.messages.write().map_err(Self::lock_err)?.remove(&conversation_id);
        Ok(())
    }

    async fn append_message(&self, subject_id: &str, message: Message) -> Result<Message> {
        {
            let conversations = self.conversations.read().map_err(Self::lock_err)?;
            let conversation = conversations
                .get(&message.conversation_id)
                .cloned()
                .ok_or(ConversationStoreError::NotFound(message.conversation_id))?;
            check_owner(&conversation, subject_id)?;
        }
        let mut conversations = self.conversations.write().map_err(Self::lock_err)?;
        if let Some(c) = conversations.get_mut(&message.conversation_id) {
            c.message_count += 1;
        }
        drop(conversations);

        let mut messages = self.messages.write().map_err(Self::lock_err)?;
        messages
            .entry(message.conversation_id)
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, subject_id: &str, conversation_id: Uuid) -> Result<Vec<Message>> {
        {
            let conversations = self.conversations.read().map_err(Self::lock_err)?;
            let conversation = conversations
                .get(&conversation_id)
                .cloned()
                .ok_or(ConversationStoreError::NotFound(conversation_id))?;
            check_owner(&conversation, subject_id)?;
        }
        let messages = self.messages.read().map_err(Self::lock_err)?;
        Ok(messages.get(&conversation_id).cloned().unwrap_or_default())
    }
}
