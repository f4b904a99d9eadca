//! External LLM Provider trait.
//!
//! The orchestrator's fast and tool paths both ultimately call out to a
//! backend chat-completion provider. This seam mirrors the teacher's
//! `router_client::RouterClient` trait — thin, async, object-safe, one
//! plan/decision call — except the method here produces a stream of text
//! deltas rather than a routing decision, since that is this component's
//! actual job (§4.4).

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider returned malformed output: {0}")]
    Malformed(String),
    #[error("provider timed out")]
    Timeout,
}

#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub turns: Vec<ChatTurn>,
    pub tools_hint: Vec<String>,
}

/// One incremental delta of an in-flight completion.
#[derive(Debug, Clone)]
pub struct CompletionDelta {
    pub text: String,
    pub finished: bool,
}

pub type DeltaStream = BoxStream<'static, Result<CompletionDelta, ProviderError>>;

/// A backend capable of producing a streamed completion. Implementations
/// own their own `reqwest::Client` and upstream auth; the orchestrator
/// only sees this trait.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn stream_completion(&self, request: CompletionRequest) -> Result<DeltaStream, ProviderError>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use futures_util::stream;

    /// A provider that replays a fixed sequence of deltas, for
    /// orchestrator and SSE transport tests.
    pub struct ScriptedProvider {
        pub deltas: Vec<CompletionDelta>,
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        async fn stream_completion(&self, _request: CompletionRequest) -> Result<DeltaStream, ProviderError> {
            let deltas = self.deltas.clone();
            Ok(Box::pin(stream::iter(deltas.into_iter().map(Ok))))
        }
    }
}
