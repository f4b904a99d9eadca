//! Unified Chat Orchestrator (§4.4).
//!
//! Ties together conversation resolution, intent classification, the
//! external chat provider, the KB RPC tool surface, the streaming buffer,
//! and conversation persistence into one call per user turn. Grounded on
//! `router_client.rs`'s constructor-injected, trait-object capability
//! pattern (no global singletons, per spec.md §9).
//!
//! `process_chat` returns a lazily-driven [`ChunkStream`] rather than a
//! collected `Vec` — each [`StreamChunk`] is produced only as its consumer
//! (the SSE transport, or the non-streaming JSON adapter) polls for the
//! next one, so a provider delta reaches the wire before the next one has
//! even arrived. The state machine is a `futures_util::stream::unfold`
//! loop over an internal [`Phase`], the same idiom `provider_openai.rs`
//! uses to decode an upstream SSE body one line at a time without an
//! `async-stream` dependency.

use crate::conversation_store::ConversationStore;
use crate::intent::classify;
use crate::kb_client::{KbClient, KbOperation};
use crate::models::{Conversation, IntentClassification, IntentPath, Message, MessageRole, StreamChunk, StreamChunkKind};
use crate::provider::{ChatProvider, ChatTurn, CompletionRequest, DeltaStream, ProviderError};
use crate::streaming_buffer::{BufferedOutput, StreamingBuffer};
use futures_util::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("conversation store error: {0}")]
    Store(#[from] crate::conversation_store::ConversationStoreError),
    #[error("tool iteration budget exceeded")]
    ToolIterationsExceeded,
}

pub struct OrchestratorConfig {
    pub classifier_deadline: Duration,
    pub tool_iterations_max: u32,
    pub default_model: String,
}

/// One member of a multi-agent scenario's fixed panel. Scenarios are data,
/// not code (§9): adding a scenario means adding a row to [`SCENARIOS`],
/// never a new branch of orchestration logic.
struct PanelMember {
    label: &'static str,
    system_prompt: &'static str,
}

struct ScenarioSpec {
    name: &'static str,
    panel: &'static [PanelMember],
}

const SCENARIOS: &[ScenarioSpec] = &[
    ScenarioSpec {
        name: "simulation",
        panel: &[
            PanelMember {
                label: "Simulator",
                system_prompt: "Advance the simulated scenario one concrete step. Describe only what happens, in plain prose.",
            },
            PanelMember {
                label: "Critic",
                system_prompt: "Review the simulated step for internal consistency and flag any contradiction with what came before.",
            },
        ],
    },
    ScenarioSpec {
        name: "roleplay",
        panel: &[
            PanelMember {
                label: "Character",
                system_prompt: "Stay fully in character for the requested roleplay and respond only in voice.",
            },
            PanelMember {
                label: "Narrator",
                system_prompt: "Add one short paragraph of scene-setting narration around the character's line.",
            },
        ],
    },
    ScenarioSpec {
        name: "debate",
        panel: &[
            PanelMember {
                label: "For",
                system_prompt: "Argue the strongest honest case for the position.",
            },
            PanelMember {
                label: "Against",
                system_prompt: "Argue the strongest honest case against the position.",
            },
            PanelMember {
                label: "Moderator",
                system_prompt: "Summarize both sides in two sentences and name the strongest point each side made.",
            },
        ],
    },
    ScenarioSpec {
        name: "brainstorm",
        panel: &[
            PanelMember {
                label: "Ideator",
                system_prompt: "Generate a short list of distinct, concrete ideas. No preamble.",
            },
            PanelMember {
                label: "Synthesizer",
                system_prompt: "Pick the two strongest ideas from the list above and explain why in one sentence each.",
            },
        ],
    },
];

const DEFAULT_SCENARIO: &ScenarioSpec = &SCENARIOS[0];

fn scenario_for(name: Option<&str>) -> &'static ScenarioSpec {
    name.and_then(|n| SCENARIOS.iter().find(|s| s.name == n)).unwrap_or(DEFAULT_SCENARIO)
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// What `process_chat` hands back to its caller: the resolved conversation
/// identity plus a stream the caller drives at its own pace (SSE framing
/// for `stream: true`, a drain-to-completion loop otherwise).
pub struct ChatOutcome {
    pub conversation_id: Uuid,
    pub model: String,
    pub chunks: ChunkStream,
}

pub struct Orchestrator {
    provider: Arc<dyn ChatProvider>,
    store: Arc<dyn ConversationStore>,
    kb_client: Arc<dyn KbClient>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        store: Arc<dyn ConversationStore>,
        kb_client: Arc<dyn KbClient>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            provider,
            store,
            kb_client,
            config,
        }
    }

    /// Resolves or creates the target conversation (§4.4 step 1), fetches
    /// its history, classifies the turn, persists the user message, and
    /// returns a lazy chunk stream for whichever path the classifier
    /// picked. No provider call happens before the caller starts polling
    /// the returned stream.
    pub async fn process_chat(
        &self,
        subject_id: &str,
        conversation_id: Option<Uuid>,
        user_text: String,
    ) -> Result<ChatOutcome, OrchestratorError> {
        let conversation: Conversation = match conversation_id {
            Some(id) => self.store.get_conversation(subject_id, id).await?,
            None => self.store.create_conversation(subject_id, None).await?,
        };
        let conversation_id = conversation.conversation_id;

        let history = self.store.list_messages(subject_id, conversation_id).await?;

        let classification = match timeout(self.config.classifier_deadline, async { classify(&user_text) }).await {
            Ok(c) => c,
            Err(_) => IntentClassification {
                path: IntentPath::Fast,
                confidence: 0.0,
                tools_hint: Vec::new(),
                scenario: None,
            },
        };

        self.store
            .append_message(subject_id, Message::new(conversation_id, MessageRole::User, user_text.clone()))
            .await?;

        let mut turns: Vec<ChatTurn> = history
            .into_iter()
            .map(|m| ChatTurn {
                role: format!("{:?}", m.role).to_ascii_lowercase(),
                content: m.content,
            })
            .collect();
        turns.push(ChatTurn {
            role: "user".to_string(),
            content: user_text,
        });

        let ctx = StreamCtx {
            provider: self.provider.clone(),
            store: self.store.clone(),
            kb_client: self.kb_client.clone(),
            subject_id: subject_id.to_string(),
            conversation_id,
            model: self.config.default_model.clone(),
            tool_iterations_max: self.config.tool_iterations_max,
        };

        let work = match classification.path {
            IntentPath::Fast | IntentPath::Tool => {
                let request = CompletionRequest {
                    model: ctx.model.clone(),
                    turns: turns.clone(),
                    tools_hint: classification.tools_hint.clone(),
                };
                let delta_stream = ctx.provider.stream_completion(request).await?;
                Phase::Turn {
                    delta_stream,
                    buffer: StreamingBuffer::new(),
                    turns,
                    tool_iteration: 0,
                    is_tool_path: matches!(classification.path, IntentPath::Tool),
                }
            }
            IntentPath::MultiAgent => {
                let scenario = scenario_for(classification.scenario.as_deref());
                let mut panel = scenario.panel.iter();
                let member = panel.next().expect("scenario panel is non-empty");
                let delta_stream = start_panel_member(&ctx, &turns, member).await?;
                Phase::MultiAgentTurn {
                    delta_stream,
                    buffer: StreamingBuffer::new(),
                    label: member.label,
                    panel,
                    base_turns: turns,
                }
            }
        };

        let state = StreamState {
            ctx,
            phase: Phase::Metadata(Box::new(work)),
            pending: VecDeque::new(),
            sequence: 0,
            assembled: String::new(),
            directives: Vec::new(),
            truncated: false,
            persisted: false,
        };

        let chunks = stream::unfold(state, step).boxed();

        Ok(ChatOutcome {
            conversation_id,
            model: self.config.default_model.clone(),
            chunks,
        })
    }
}

async fn start_panel_member(ctx: &StreamCtx, base_turns: &[ChatTurn], member: &PanelMember) -> Result<DeltaStream, ProviderError> {
    let mut turns = Vec::with_capacity(base_turns.len() + 1);
    turns.push(ChatTurn {
        role: "system".to_string(),
        content: member.system_prompt.to_string(),
    });
    turns.extend_from_slice(base_turns);
    let request = CompletionRequest {
        model: ctx.model.clone(),
        turns,
        tools_hint: Vec::new(),
    };
    ctx.provider.stream_completion(request).await
}

struct StreamCtx {
    provider: Arc<dyn ChatProvider>,
    store: Arc<dyn ConversationStore>,
    kb_client: Arc<dyn KbClient>,
    subject_id: String,
    conversation_id: Uuid,
    model: String,
    tool_iterations_max: u32,
}

enum Phase {
    /// Wraps the first working phase; consumed after the metadata chunk
    /// is emitted so it only ever fires once.
    Metadata(Box<Phase>),
    /// One in-flight provider turn on the fast/tool path. On a tool path
    /// turn that ends in a recognized KB directive, loops back into a
    /// fresh `Turn` with the tool result appended instead of advancing.
    Turn {
        delta_stream: DeltaStream,
        buffer: StreamingBuffer,
        turns: Vec<ChatTurn>,
        tool_iteration: u32,
        is_tool_path: bool,
    },
    /// One in-flight panel member's turn on the multi-agent path.
    MultiAgentTurn {
        delta_stream: DeltaStream,
        buffer: StreamingBuffer,
        label: &'static str,
        panel: std::slice::Iter<'static, PanelMember>,
        base_turns: Vec<ChatTurn>,
    },
    Persist,
    Finished,
}

struct StreamState {
    ctx: StreamCtx,
    phase: Phase,
    pending: VecDeque<StreamChunk>,
    sequence: u64,
    /// Text assembled for the part of the answer that will actually be
    /// persisted: the fast/tool path's final turn, or the multi-agent
    /// path's accumulated, labeled panel output. A tool-calling turn's
    /// own text is surfaced to the client as content chunks but does not
    /// survive into this buffer once its tool call is dispatched (§4.4:
    /// the tool result, not the request for it, is what the next turn
    /// continues from).
    assembled: String,
    directives: Vec<serde_json::Value>,
    truncated: bool,
    /// Guards against double persistence between the normal `Persist`
    /// phase and the best-effort `Drop` path below.
    persisted: bool,
}

impl StreamState {
    fn next_seq(&mut self) -> u64 {
        let seq = self.sequence;
        self.sequence += 1;
        seq
    }
}

/// Best-effort partial persistence on client disconnect (§4.6 scenario 6):
/// if the stream is dropped before `Persist` has run, whatever content
/// accumulated so far is flushed on a detached task with its own deadline,
/// marked `truncated`. Never blocks the drop itself.
impl Drop for StreamState {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }
        self.persisted = true;
        if self.assembled.is_empty() && self.directives.is_empty() {
            return;
        }
        let store = self.ctx.store.clone();
        let subject_id = self.ctx.subject_id.clone();
        let conversation_id = self.ctx.conversation_id;
        let mut message = Message::new(conversation_id, MessageRole::Assistant, std::mem::take(&mut self.assembled));
        message.truncated = true;
        let directives = std::mem::take(&mut self.directives);
        if !directives.is_empty() {
            message.directive_payload = Some(directives);
        }
        tokio::spawn(async move {
            let _ = timeout(Duration::from_secs(5), store.append_message(&subject_id, message)).await;
        });
    }
}

/// One step of the chunk stream's state machine. Called repeatedly by
/// `stream::unfold`; each call either returns the next queued chunk
/// immediately or drives exactly enough async work (a provider delta, a
/// KB call, a store append) to produce one.
async fn step(mut state: StreamState) -> Option<(StreamChunk, StreamState)> {
    loop {
        if let Some(chunk) = state.pending.pop_front() {
            return Some((chunk, state));
        }

        match std::mem::replace(&mut state.phase, Phase::Finished) {
            Phase::Finished => return None,

            Phase::Metadata(next) => {
                let seq = state.next_seq();
                state.pending.push_back(StreamChunk::new(
                    StreamChunkKind::Metadata,
                    serde_json::json!({
                        "conversation_id": state.ctx.conversation_id,
                        "model": state.ctx.model,
                    }),
                    seq,
                ));
                state.phase = *next;
            }

            Phase::Turn {
                mut delta_stream,
                mut buffer,
                mut turns,
                tool_iteration,
                is_tool_path,
            } => match delta_stream.next().await {
                Some(Ok(delta)) => {
                    let mut tool_call: Option<(KbOperation, serde_json::Value)> = None;
                    for output in buffer.push(&delta.text) {
                        emit_output(&mut state, output, is_tool_path, &mut tool_call);
                        if tool_call.is_some() {
                            break;
                        }
                    }
                    if tool_call.is_none() && delta.finished {
                        for output in buffer.flush() {
                            emit_output(&mut state, output, is_tool_path, &mut tool_call);
                            if tool_call.is_some() {
                                break;
                            }
                        }
                    }

                    if let Some((operation, params)) = tool_call {
                        if tool_iteration >= state.ctx.tool_iterations_max {
                            let seq = state.next_seq();
                            state.pending.push_back(StreamChunk::new(
                                StreamChunkKind::Error,
                                serde_json::json!({ "detail": "tool iteration budget exceeded" }),
                                seq,
                            ));
                            state.truncated = true;
                            state.phase = Phase::Persist;
                            continue;
                        }

                        // Content produced before the tool call is shown
                        // to the client but does not carry into the
                        // persisted answer — only the turn that finally
                        // stops calling tools does.
                        state.assembled.clear();

                        let tool_result = state.ctx.kb_client.invoke(operation, params).await;
                        let (result_text, result_chunk) = match tool_result {
                            Ok(value) => (value.to_string(), StreamChunk::new(StreamChunkKind::ToolCall, serde_json::json!({ "operation": operation, "status": "ok", "result": value }), state.next_seq())),
                            Err(e) => (
                                serde_json::json!({ "error": e.to_string() }).to_string(),
                                StreamChunk::new(StreamChunkKind::ToolCall, serde_json::json!({ "operation": operation, "status": "error", "detail": e.to_string() }), state.next_seq()),
                            ),
                        };
                        state.pending.push_back(result_chunk);

                        turns.push(ChatTurn {
                            role: "tool".to_string(),
                            content: result_text,
                        });
                        let request = CompletionRequest {
                            model: state.ctx.model.clone(),
                            turns: turns.clone(),
                            tools_hint: Vec::new(),
                        };
                        match state.ctx.provider.stream_completion(request).await {
                            Ok(next_stream) => {
                                state.phase = Phase::Turn {
                                    delta_stream: next_stream,
                                    buffer: StreamingBuffer::new(),
                                    turns,
                                    tool_iteration: tool_iteration + 1,
                                    is_tool_path,
                                };
                            }
                            Err(e) => {
                                let seq = state.next_seq();
                                state.pending.push_back(StreamChunk::new(StreamChunkKind::Error, serde_json::json!({ "detail": e.to_string() }), seq));
                                state.truncated = true;
                                state.phase = Phase::Persist;
                            }
                        }
                    } else if delta.finished {
                        state.phase = Phase::Persist;
                    } else {
                        state.phase = Phase::Turn {
                            delta_stream,
                            buffer,
                            turns,
                            tool_iteration,
                            is_tool_path,
                        };
                    }
                }
                Some(Err(_)) => {
                    state.truncated = true;
                    state.phase = Phase::Persist;
                }
                None => {
                    for output in buffer.flush() {
                        let mut ignored = None;
                        emit_output(&mut state, output, false, &mut ignored);
                    }
                    state.phase = Phase::Persist;
                }
            },

            Phase::MultiAgentTurn {
                mut delta_stream,
                mut buffer,
                label,
                mut panel,
                base_turns,
            } => match delta_stream.next().await {
                Some(Ok(delta)) => {
                    for output in buffer.push(&delta.text) {
                        let mut ignored = None;
                        emit_output(&mut state, output, false, &mut ignored);
                    }
                    if delta.finished {
                        for output in buffer.flush() {
                            let mut ignored = None;
                            emit_output(&mut state, output, false, &mut ignored);
                        }
                        match panel.next() {
                            Some(member) => match start_panel_member(&state.ctx, &base_turns, member).await {
                                Ok(next_stream) => {
                                    state.phase = Phase::MultiAgentTurn {
                                        delta_stream: next_stream,
                                        buffer: StreamingBuffer::new(),
                                        label: member.label,
                                        panel,
                                        base_turns,
                                    };
                                }
                                Err(e) => {
                                    let seq = state.next_seq();
                                    state.pending.push_back(StreamChunk::new(StreamChunkKind::Error, serde_json::json!({ "detail": e.to_string() }), seq));
                                    state.truncated = true;
                                    state.phase = Phase::Persist;
                                }
                            },
                            None => {
                                state.phase = Phase::Persist;
                            }
                        }
                    } else {
                        state.phase = Phase::MultiAgentTurn {
                            delta_stream,
                            buffer,
                            label,
                            panel,
                            base_turns,
                        };
                    }
                }
                Some(Err(_)) => {
                    state.truncated = true;
                    state.phase = Phase::Persist;
                }
                None => {
                    state.phase = Phase::Persist;
                }
            },

            Phase::Persist => {
                let mut message = Message::new(state.ctx.conversation_id, MessageRole::Assistant, state.assembled.clone());
                message.truncated = state.truncated;
                if !state.directives.is_empty() {
                    message.directive_payload = Some(state.directives.clone());
                }
                let result = state.ctx.store.append_message(&state.ctx.subject_id, message).await;
                state.persisted = true;
                match result {
                    Ok(_) => {
                        let seq = state.next_seq();
                        state.pending.push_back(StreamChunk::new(StreamChunkKind::Done, serde_json::json!({ "truncated": state.truncated }), seq));
                    }
                    Err(e) => {
                        let seq = state.next_seq();
                        state.pending.push_back(StreamChunk::new(StreamChunkKind::Error, serde_json::json!({ "detail": e.to_string() }), seq));
                    }
                }
                state.phase = Phase::Finished;
            }
        }
    }
}

/// Classifies one buffered output and either queues a chunk for it or, on
/// the tool path, recognizes it as a KB tool call and hands the operation
/// back to the caller instead of queuing a `WorldUpdate`.
fn emit_output(state: &mut StreamState, output: BufferedOutput, is_tool_path: bool, tool_call: &mut Option<(KbOperation, serde_json::Value)>) {
    match output {
        BufferedOutput::Content(text) => {
            state.assembled.push_str(&text);
            let seq = state.next_seq();
            state.pending.push_back(StreamChunk::new(StreamChunkKind::Content, serde_json::json!({ "text": text }), seq));
        }
        BufferedOutput::Directive(raw) => {
            let value: serde_json::Value = serde_json::from_str(&raw).unwrap_or_else(|_| serde_json::json!({ "raw": raw }));
            if is_tool_path {
                if let Some(op) = value.get("m").and_then(|m| m.as_str()).and_then(|m| KbOperation::from_tool_name(m).ok()) {
                    let params = value.get("p").cloned().unwrap_or_else(|| serde_json::json!({}));
                    *tool_call = Some((op, params));
                    return;
                }
            }
            state.directives.push(value.clone());
            let seq = state.next_seq();
            state.pending.push_back(StreamChunk::new(StreamChunkKind::WorldUpdate, value, seq));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation_store_memory::MemoryConversationStore;
    use crate::kb_client::KbError;
    use crate::provider::test_support::ScriptedProvider;
    use crate::provider::CompletionDelta;
    use async_trait::async_trait;
    use futures_util::StreamExt as _;

    fn deltas(parts: &[&str]) -> Vec<CompletionDelta> {
        let mut out: Vec<CompletionDelta> = parts
            .iter()
            .map(|p| CompletionDelta {
                text: p.to_string(),
                finished: false,
            })
            .collect();
        if let Some(last) = out.last_mut() {
            last.finished = true;
        }
        out
    }

    struct NullKb;
    #[async_trait]
    impl KbClient for NullKb {
        async fn invoke(&self, _operation: KbOperation, _params: serde_json::Value) -> Result<serde_json::Value, KbError> {
            Err(KbError::Upstream("not configured in test".into()))
        }
    }

    struct ScriptedKb {
        response: serde_json::Value,
    }
    #[async_trait]
    impl KbClient for ScriptedKb {
        async fn invoke(&self, _operation: KbOperation, _params: serde_json::Value) -> Result<serde_json::Value, KbError> {
            Ok(self.response.clone())
        }
    }

    fn orchestrator(provider: Arc<dyn ChatProvider>, store: Arc<dyn ConversationStore>, kb_client: Arc<dyn KbClient>) -> Orchestrator {
        Orchestrator::new(
            provider,
            store,
            kb_client,
            OrchestratorConfig {
                classifier_deadline: Duration::from_millis(150),
                tool_iterations_max: 4,
                default_model: "test-model".into(),
            },
        )
    }

    #[tokio::test]
    async fn fast_path_turn_starts_with_metadata_and_ends_with_done() {
        let store = Arc::new(MemoryConversationStore::new());
        let provider = Arc::new(ScriptedProvider {
            deltas: deltas(&["Hello ", "there."]),
        });
        let orchestrator = orchestrator(provider, store.clone(), Arc::new(NullKb));

        let outcome = orchestrator.process_chat("user-1", None, "hi".into()).await.unwrap();
        let chunks: Vec<StreamChunk> = outcome.chunks.collect().await;

        assert!(matches!(chunks.first().unwrap().kind, StreamChunkKind::Metadata));
        assert_eq!(chunks.first().unwrap().payload["model"], "test-model");
        assert!(matches!(chunks.last().unwrap().kind, StreamChunkKind::Done));

        let messages = store.list_messages("user-1", outcome.conversation_id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].content, "Hello there.");
    }

    #[tokio::test]
    async fn omitted_conversation_id_creates_a_new_conversation() {
        let store = Arc::new(MemoryConversationStore::new());
        let provider = Arc::new(ScriptedProvider { deltas: deltas(&["ok"]) });
        let orchestrator = orchestrator(provider, store.clone(), Arc::new(NullKb));

        let outcome = orchestrator.process_chat("user-1", None, "hi".into()).await.unwrap();
        let _: Vec<StreamChunk> = outcome.chunks.collect().await;

        let conversations = store.list_conversations("user-1").await.unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].conversation_id, outcome.conversation_id);
    }

    #[tokio::test]
    async fn directive_in_stream_becomes_world_update_chunk_and_is_recorded() {
        let store = Arc::new(MemoryConversationStore::new());
        let provider = Arc::new(ScriptedProvider {
            deltas: deltas(&["Sure! ", "{\"m\":\"spawn\",\"p\":{}}", " done."]),
        });
        let orchestrator = orchestrator(provider, store.clone(), Arc::new(NullKb));

        let outcome = orchestrator.process_chat("user-1", None, "spawn something".into()).await.unwrap();
        let chunks: Vec<StreamChunk> = outcome.chunks.collect().await;

        assert!(chunks.iter().any(|c| matches!(c.kind, StreamChunkKind::WorldUpdate)));

        let messages = store.list_messages("user-1", outcome.conversation_id).await.unwrap();
        let assistant = &messages[1];
        assert!(assistant.directive_payload.is_some());
    }

    #[tokio::test]
    async fn tool_path_directive_calls_kb_client_and_feeds_result_back() {
        let store = Arc::new(MemoryConversationStore::new());
        let provider = Arc::new(ScriptedProvider {
            deltas: deltas(&["{\"m\":\"search\",\"p\":{\"q\":\"rust\"}}"]),
        });
        let kb = Arc::new(ScriptedKb {
            response: serde_json::json!({ "hits": ["crates.io"] }),
        });
        let orchestrator = orchestrator(provider, store.clone(), kb);

        let outcome = orchestrator.process_chat("user-1", None, "please search for rust crates".into()).await.unwrap();
        let chunks: Vec<StreamChunk> = outcome.chunks.collect().await;

        assert!(chunks.iter().any(|c| matches!(c.kind, StreamChunkKind::ToolCall)));
        assert!(matches!(chunks.last().unwrap().kind, StreamChunkKind::Done));
    }

    #[tokio::test]
    async fn multi_agent_scenario_runs_its_whole_panel() {
        let store = Arc::new(MemoryConversationStore::new());
        let provider = Arc::new(ScriptedProvider {
            deltas: deltas(&["a panel reply"]),
        });
        let orchestrator = orchestrator(provider, store.clone(), Arc::new(NullKb));

        let outcome = orchestrator
            .process_chat("user-1", None, "let's roleplay a negotiation".into())
            .await
            .unwrap();
        let chunks: Vec<StreamChunk> = outcome.chunks.collect().await;

        let content_text: String = chunks
            .iter()
            .filter(|c| matches!(c.kind, StreamChunkKind::Content))
            .filter_map(|c| c.payload["text"].as_str().map(str::to_string))
            .collect();
        // "roleplay" scenario has a 2-member panel, each replying once,
        // and the panel's output accumulates rather than overwriting.
        assert_eq!(content_text, "a panel replya panel reply");
        assert!(matches!(chunks.last().unwrap().kind, StreamChunkKind::Done));
    }
}
