#![forbid(unsafe_code)]
#![doc = r#"
gateway_core

Gateway, Unified Chat Orchestrator, and Real-Time Event Fanout for a
multi-backend AI chat platform.

Crate highlights
- Credential Resolver (`credential`): normalises opaque keys and bearer
  tokens into one `Principal`.
- Route Table + Reverse Proxy Core (`route_table`, `proxy`): static,
  startup-loaded routing with segment captures, pooled per-backend HTTP
  forwarding.
- Unified Chat Orchestrator (`orchestrator`, `provider`, `intent`): one
  call per user turn, streamed through the Streaming Buffer.
- Streaming Buffer (`streaming_buffer`): word/JSON-directive-boundary
  preserving rebuffering, pure CPU.
- SSE Transport (`sse`): frames orchestrator output and merges it with
  Event Bus Adapter (`eventbus`) fanout.
- Conversation Store Facade (`conversation_store` + backends): pluggable
  persistence, memory or sled.
- Rate Limiter & CORS (`ratelimit`, `cors`), Health & Readiness
  (`health`), Metrics (`metrics`).

The `app` module wires all of the above into an `actix-web` `App`; `main`
(the `gatewayd` binary) starts the HTTP server.
"#]

pub mod app;
pub mod config;
pub mod conversation_store;
pub mod conversation_store_memory;
pub mod conversation_store_sled;
pub mod cors;
pub mod credential;
pub mod error;
pub mod eventbus;
pub mod handlers;
pub mod health;
pub mod identity_http;
pub mod intent;
pub mod kb_client;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod provider;
pub mod provider_openai;
pub mod proxy;
pub mod ratelimit;
pub mod route_table;
pub mod sse;
pub mod streaming_buffer;

pub use crate::error::{ApiError, ErrorKind};
pub use crate::models::{Conversation, Message, Principal, RouteEntry};
