//! KB RPC client (§4.4 tool path, §6).
//!
//! Two call shapes exist for the knowledge base: plain HTTP forwarding
//! (`handlers::kb`, via `proxy::forward`, for the `/api/vX/kb/*` routes
//! clients call directly) and direct tool invocation from the
//! orchestrator's tool path, which is what this module provides. Grounded
//! on `router_client.rs`'s `RouterClient` trait (thin async trait, one
//! reqwest-backed implementation, constructor-injected).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KbError {
    #[error("kb request failed: {0}")]
    Request(String),
    #[error("kb returned an error response: {0}")]
    Upstream(String),
    #[error("unknown kb operation: {0}")]
    UnknownOperation(String),
}

/// The closed set of KB operations the orchestrator's tool path may
/// invoke (spec.md §6's forwarded-route list, minus the plain-forwarding
/// routes that never go through the orchestrator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KbOperation {
    Search,
    Read,
    List,
    Context,
    Synthesize,
}

impl KbOperation {
    fn path_segment(self) -> &'static str {
        match self {
            KbOperation::Search => "search",
            KbOperation::Read => "read",
            KbOperation::List => "list",
            KbOperation::Context => "context",
            KbOperation::Synthesize => "synthesize",
        }
    }

    pub fn from_tool_name(name: &str) -> Result<Self, KbError> {
        match name {
            "search" => Ok(KbOperation::Search),
            "read" => Ok(KbOperation::Read),
            "list" => Ok(KbOperation::List),
            "context" => Ok(KbOperation::Context),
            "synthesize" => Ok(KbOperation::Synthesize),
            other => Err(KbError::UnknownOperation(other.to_string())),
        }
    }
}

#[async_trait]
pub trait KbClient: Send + Sync {
    async fn invoke(&self, operation: KbOperation, params: serde_json::Value) -> Result<serde_json::Value, KbError>;
}

/// Default HTTP implementation, calling the same backend the reverse
/// proxy forwards `/api/vX/kb/*` to.
pub struct HttpKbClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpKbClient {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl KbClient for HttpKbClient {
    async fn invoke(&self, operation: KbOperation, params: serde_json::Value) -> Result<serde_json::Value, KbError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), operation.path_segment());
        let response = self
            .client
            .post(&url)
            .json(&params)
            .send()
            .await
            .map_err(|e| KbError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(KbError::Upstream(format!("{status}: {body}")));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| KbError::Request(format!("failed to decode kb response: {e}")))
    }
}
