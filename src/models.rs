//! Core data model: the wire and domain types shared by every component.
//!
//! Mirrors the shape of the teacher's `chat_history.rs` (plain structs,
//! small `snake_case` enums, `serde` derives throughout) but carries the
//! entities named in the specification's data model instead of the
//! teacher's routing/cost-tracking schema.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Which credential shape produced a `Principal`. Recorded for the audit
/// field required when both an opaque key and a bearer token are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    OpaqueKey,
    BearerToken,
}

/// An authenticated caller, after credential translation. Downstream code
/// must read tenancy only from `subject_id` (see §4.1 / DESIGN.md for the
/// historical defect this guards against).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub subject_id: String,
    pub credential_kind: CredentialKind,
    pub issued_at: u64,
    pub expires_at: Option<u64>,
    pub scopes: HashSet<String>,
    /// Which credential was actually used to authenticate when both an
    /// opaque key and a bearer token were present on the same request
    /// (§8's audit requirement).
    pub audit_credential_kind: CredentialKind,
}

impl Principal {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Auth policy attached to a route entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPolicy {
    Public,
    RequirePrincipal,
    RequireScope(String),
}

/// How a route forwards the inbound request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyPassthrough {
    Stream,
    Buffer,
    None,
}

/// Static route configuration, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEntry {
    pub method: String,
    pub path_pattern: String,
    pub backend: String,
    pub upstream_path_template: String,
    pub auth_policy: AuthPolicy,
    pub body_passthrough: BodyPassthrough,
    pub idempotent: bool,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// A persisted conversation, owned by exactly one subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: Uuid,
    pub owner_subject_id: String,
    pub created_at: u64,
    pub title: Option<String>,
    pub message_count: u64,
}

impl Conversation {
    pub fn new(owner_subject_id: String, title: Option<String>) -> Self {
        Self {
            conversation_id: Uuid::new_v4(),
            owner_subject_id,
            created_at: now_epoch_secs(),
            title,
            message_count: 0,
        }
    }
}

/// Message role, totally ordered within a conversation by `created_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// A persisted message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub created_at: u64,
    /// Extracted JSON directives for assistant messages (see `streaming_buffer`).
    pub directive_payload: Option<Vec<serde_json::Value>>,
    /// Set when persistence happened on a best-effort basis after client
    /// disconnect with a partial assistant response (Open Question, §9).
    #[serde(default)]
    pub truncated: bool,
}

impl Message {
    pub fn new(conversation_id: Uuid, role: MessageRole, content: String) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            conversation_id,
            role,
            content,
            created_at: now_epoch_secs(),
            directive_payload: None,
            truncated: false,
        }
    }
}

/// The execution path chosen by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentPath {
    Fast,
    Tool,
    MultiAgent,
}

/// Ephemeral classification result; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentClassification {
    pub path: IntentPath,
    pub confidence: f32,
    pub tools_hint: Vec<String>,
    /// Set when `path == MultiAgent`: which named scenario to dispatch to.
    pub scenario: Option<String>,
}

/// The closed set of SSE event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamChunkKind {
    Metadata,
    Content,
    ToolCall,
    WorldUpdate,
    Done,
    Error,
}

/// A transport-level chunk, strictly ordered by `sequence_number` within a
/// single SSE stream.
#[derive(Debug, Clone, Serialize)]
pub struct StreamChunk {
    pub kind: StreamChunkKind,
    pub payload: serde_json::Value,
    pub sequence_number: u64,
}

impl StreamChunk {
    pub fn new(kind: StreamChunkKind, payload: serde_json::Value, sequence_number: u64) -> Self {
        Self {
            kind,
            payload,
            sequence_number,
        }
    }
}
