//! sled-backed conversation store.
//!
//! Durable, single-file embedded backend — the default when
//! `CONVERSATION_STORE_DSN` points at a filesystem path rather than
//! `memory://`. Grounded on `chat_history_sqlite::SqliteChatHistoryStore`'s
//! overall shape (a handle wrapping the engine, JSON-serialized row
//! payloads, ownership checked in Rust after a single keyed read) but
//! using sled's two-tree layout instead of SQL tables, since sled is
//! already in the dependency stack for this purpose (§4.8).

use crate::conversation_store::{check_owner, ConversationStore, ConversationStoreError, Result};
use crate::models::{Conversation, Message};
use async_trait::async_trait;
use uuid::Uuid;

/// Conversations are stored keyed by their UUID bytes in one tree;
/// messages are stored in a second tree keyed by
/// `conversation_id_bytes ++ created_at_be_bytes ++ message_id_bytes` so a
/// range scan over a conversation's prefix yields messages in creation
/// order without a secondary index.
pub struct SledConversationStore {
    conversations: sled::Tree,
    messages: sled::Tree,
}

impl SledConversationStore {
    pub fn open(path: &str) -> Result<Self> {
        let db = sled::open(path).map_err(|e| ConversationStoreError::Backend(e.to_string()))?;
        let conversations = db
            .open_tree("conversations")
            .map_err(|e| ConversationStoreError::Backend(e.to_string()))?;
        let messages = db
            .open_tree("messages")
            .map_err(|e| ConversationStoreError::Backend(e.to_string()))?;
        Ok(Self {
            conversations,
            messages,
        })
    }

    fn read_conversation(&self, conversation_id: Uuid) -> Result<Conversation> {
        let bytes = self
            .conversations
            .get(conversation_id.as_bytes())
            .map_err(|e| ConversationStoreError::Backend(e.to_string()))?
            .ok_or(ConversationStoreError::NotFound(conversation_id))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ConversationStoreError::Backend(format!("corrupt conversation record: {e}")))
    }

    fn write_conversation(&self, conversation: &Conversation) -> Result<()> {
        let bytes = serde_json::to_vec(conversation)
            .map_err(|e| ConversationStoreError::Backend(e.to_string()))?;
        self.conversations
            .insert(conversation.conversation_id.as_bytes(), bytes)
            .map_err(|e| ConversationStoreError::Backend(e.to_string()))?;
        Ok(())
    }

    fn message_key(message: &Message) -> Vec<u8> {
        let mut key = Vec::with_capacity(32);
        key.extend_from_slice(message.conversation_id.as_bytes());
        key.extend_from_slice(&message.created_at.to_be_bytes());
        key.extend_from_slice(message.message_id.as_bytes());
        key
    }
}

#[async_trait]
impl ConversationStore for SledConversationStore {
    async fn create_conversation(
        &self,
        owner_subject_id: &str,
        title: Option<String>,
    ) -> Result<Conversation> {
        let conversation = Conversation::new(owner_subject_id.to_string(), title);
        self.write_conversation(&conversation)?;
        Ok(conversation)
    }

    async fn get_conversation(&self, subject_id: &str, conversation_id: Uuid) -> Result<Conversation> {
        let conversation = self.read_conversation(conversation_id)?;
        check_owner(&conversation, subject_id)?;
        Ok(conversation)
    }

    async fn list_conversations(&self, subject_id: &str) -> Result<Vec<Conversation>> {
        let mut owned = Vec::new();
        for entry in self.conversations.iter() {
            let (_, value) = entry.map_err(|e| ConversationStoreError::Backend(e.to_string()))?;
            let conversation: Conversation = serde_json::from_slice(&value)
                .map_err(|e| ConversationStoreError::Backend(format!("corrupt conversation record: {e}")))?;
            if conversation.owner_subject_id == subject_id {
                owned.push(conversation);
            }
        }
        owned.sort_by_key(|c| std::cmp::Reverse(c.created_at));
        Ok(owned)
    }

    async fn delete_conversation(&self, subject_id: &str, conversation_id: Uuid) -> Result<()> {
        let conversation = self.read_conversation(conversation_id)?;
        check_owner(&conversation, subject_id)?;

        self.conversations
            .remove(conversation_id.as_bytes())
            .map_err(|e| ConversationStoreError::Backend(e.to_string()))?;

        let prefix = conversation_id.as_bytes().to_vec();
        let keys: Vec<_> = self
            .messages
            .scan_prefix(&prefix)
            .keys()
            .filter_map(|k| k.ok())
            .collect();
        for key in keys {
            self.messages
                .remove(key)
                .map_err(|e| ConversationStoreError::Backend(e.to_string()))?;
        }
        Ok(())
    }

    async fn append_message(&self, subject_id: &str, message: Message) -> Result<Message> {
        let mut conversation = self.read_conversation(message.conversation_id)?;
        check_owner(&conversation, subject_id)?;

        let bytes = serde_json::to_vec(&message).map_err(|e| ConversationStoreError::Backend(e.to_string()))?;
        self.messages
            .insert(Self::message_key(&message), bytes)
            .map_err(|e| ConversationStoreError::Backend(e.to_string()))?;

        conversation.message_count += 1;
        self.write_conversation(&conversation)?;
        Ok(message)
    }

    async fn list_messages(&self, subject_id: &str, conversation_id: Uuid) -> Result<Vec<Message>> {
        let conversation = self.read_conversation(conversation_id)?;
        check_owner(&conversation, subject_id)?;

        let prefix = conversation_id.as_bytes().to_vec();
        let mut messages = Vec::new();
        for entry in self.messages.scan_prefix(&prefix) {
            let (_, value) = entry.map_err(|e| ConversationStoreError::Backend(e.to_string()))?;
            let message: Message = serde_json::from_slice(&value)
                .map_err(|e| ConversationStoreError::Backend(format!("corrupt message record: {e}")))?;
            messages.push(message);
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageRole;

    fn temp_store() -> (SledConversationStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SledConversationStore::open(dir.path().to_str().unwrap()).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn create_and_fetch_round_trips() {
        let (store, _dir) = temp_store();
        let c = store.create_conversation("user-1", None).await.unwrap();
        let fetched = store.get_conversation("user-1", c.conversation_id).await.unwrap();
        assert_eq!(fetched.conversation_id, c.conversation_id);
    }

    #[tokio::test]
    async fn messages_are_listed_in_creation_order() {
        let (store, _dir) = temp_store();
        let c = store.create_conversation("user-1", None).await.unwrap();
        for text in ["first", "second", "third"] {
            store
                .append_message("user-1", Message::new(c.conversation_id, MessageRole::User, text.into()))
                .await
                .unwrap();
        }
        let messages = store.list_messages("user-1", c.conversation_id).await.unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn non_owner_cannot_append() {
        let (store, _dir) = temp_store();
        let c = store.create_conversation("user-1", None).await.unwrap();
        let err = store
            .append_message("user-2", Message::new(c.conversation_id, MessageRole::User, "x".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ConversationStoreError::NotOwned { .. }));
    }

    #[tokio::test]
    async fn delete_also_removes_messages() {
        let (store, _dir) = temp_store();
        let c = store.create_conversation("user-1", None).await.unwrap();
        store
            .append_message("user-1", Message::new(c.conversation_id, MessageRole::User, "hi".into()))
            .await
            .unwrap();
        store.delete_conversation("user-1", c.conversation_id).await.unwrap();
        assert!(store.get_conversation("user-1", c.conversation_id).await.is_err());
    }
}
