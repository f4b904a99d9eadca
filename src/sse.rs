//! SSE Transport (§4.6).
//!
//! Frames [`StreamChunk`]s as `data: <json>\n\n` events and, when a
//! conversation has a live event-bus subscription, merges bus events in
//! *while* content is still being emitted rather than only after it ends
//! — every `poll_next` call races the orchestrator's content stream
//! against the bus receiver and returns whichever is ready first. Grounded
//! on `server.rs`'s `ResponsesSseToChatSse` (a struct wrapping an inner
//! stream with a manual `poll_next` state machine) and
//! `util::sse_proxy_stream` (the header set and `data: ...\n\n` framing,
//! `[DONE]` terminator).

use crate::eventbus::{Event, SubscriptionHandle};
use crate::models::{StreamChunk, StreamChunkKind};
use crate::orchestrator::ChunkStream;
use bytes::Bytes;
use futures_util::stream::Stream;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::broadcast;

fn frame(value: &serde_json::Value) -> Bytes {
    let json = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    Bytes::from(format!("data: {json}\n\n"))
}

fn chunk_to_json(chunk: &StreamChunk) -> serde_json::Value {
    let kind = match chunk.kind {
        StreamChunkKind::Metadata => "metadata",
        StreamChunkKind::Content => "content",
        StreamChunkKind::ToolCall => "tool_call",
        StreamChunkKind::WorldUpdate => "world_update",
        StreamChunkKind::Done => "done",
        StreamChunkKind::Error => "error",
    };
    serde_json::json!({
        "type": kind,
        "sequence": chunk.sequence_number,
        "data": chunk.payload,
    })
}

/// A `world.updates.*` bus message always surfaces to the client as
/// `world_update` — `bus_event` is not in the closed SSE event-type set
/// (§4.6).
fn event_to_json(event: &Event) -> serde_json::Value {
    serde_json::json!({
        "type": "world_update",
        "topic": event.topic,
        "kind": event.kind,
        "data": event.payload,
    })
}

/// Merges a conversation's content chunks with its event-bus subscription
/// (if any) into a single SSE byte stream. Content chunks are always
/// emitted as whole units — the merge point is only ever between two
/// `StreamingBuffer`-emitted outputs, never inside one (§4.6 invariant).
/// Once the content stream has yielded its terminal `done`/`error` chunk,
/// the bus is no longer polled: `[DONE]` follows immediately and the
/// subscription is torn down.
pub struct ChatEventStream {
    content: ChunkStream,
    bus: Option<SubscriptionHandle>,
    topic: String,
    content_done: bool,
    terminated: bool,
}

impl ChatEventStream {
    pub fn new(content: ChunkStream, bus: Option<SubscriptionHandle>, topic: String) -> Self {
        Self {
            content,
            bus,
            topic,
            content_done: false,
            terminated: false,
        }
    }
}

impl Stream for ChatEventStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.terminated {
                return Poll::Ready(None);
            }

            if this.content_done {
                this.terminated = true;
                this.bus = None;
                return Poll::Ready(Some(Ok(Bytes::from_static(b"data: [DONE]\n\n"))));
            }

            if let Some(bus) = this.bus.as_mut() {
                let mut recv_fut = Box::pin(bus.receiver_mut().recv());
                let poll_result = recv_fut.as_mut().poll(cx);
                drop(recv_fut);
                match poll_result {
                    Poll::Ready(Ok(event)) if event.topic == this.topic => {
                        return Poll::Ready(Some(Ok(frame(&event_to_json(&event)))));
                    }
                    // Not for this conversation, or the channel lagged:
                    // drop it and try again this same call, then fall
                    // through to polling content below.
                    Poll::Ready(Ok(_)) | Poll::Ready(Err(broadcast::error::RecvError::Lagged(_))) => {}
                    Poll::Ready(Err(broadcast::error::RecvError::Closed)) => {
                        this.bus = None;
                    }
                    Poll::Pending => {}
                }
            }

            match Pin::new(&mut this.content).poll_next(cx) {
                Poll::Ready(Some(chunk)) => {
                    let is_terminal = matches!(chunk.kind, StreamChunkKind::Done | StreamChunkKind::Error);
                    if is_terminal {
                        this.content_done = true;
                    }
                    return Poll::Ready(Some(Ok(frame(&chunk_to_json(&chunk)))));
                }
                Poll::Ready(None) => {
                    this.content_done = true;
                    continue;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventbus::{BroadcastEventBus, EventBus};
    use futures_util::stream::{self, StreamExt};

    fn chunk(kind: StreamChunkKind, seq: u64) -> StreamChunk {
        StreamChunk::new(kind, serde_json::json!({}), seq)
    }

    fn content_stream(chunks: Vec<StreamChunk>) -> ChunkStream {
        Box::pin(stream::iter(chunks))
    }

    #[tokio::test]
    async fn emits_one_frame_per_chunk_then_done_terminator() {
        let chunks = vec![chunk(StreamChunkKind::Metadata, 0), chunk(StreamChunkKind::Content, 1), chunk(StreamChunkKind::Done, 2)];
        let mut stream = ChatEventStream::new(content_stream(chunks), None, "conv-1".into());
        let mut frames = Vec::new();
        while let Some(item) = stream.next().await {
            frames.push(item.unwrap());
        }
        assert_eq!(frames.len(), 4);
        assert_eq!(frames.last().unwrap().as_ref(), b"data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn each_frame_is_a_complete_data_line() {
        let chunks = vec![chunk(StreamChunkKind::Content, 0), chunk(StreamChunkKind::Done, 1)];
        let mut stream = ChatEventStream::new(content_stream(chunks), None, "conv-1".into());
        while let Some(item) = stream.next().await {
            let bytes = item.unwrap();
            let text = String::from_utf8(bytes.to_vec()).unwrap();
            assert!(text.starts_with("data: "));
            assert!(text.ends_with("\n\n"));
        }
    }

    #[tokio::test]
    async fn bus_event_for_this_conversation_is_framed_as_world_update() {
        let bus = BroadcastEventBus::new(16);
        let subscription = bus.subscribe().unwrap();
        bus.publish(Event::new("conv-1", "npc_moved", serde_json::json!({ "x": 1 })))
            .await
            .unwrap();

        let chunks = vec![chunk(StreamChunkKind::Done, 0)];
        let mut stream = ChatEventStream::new(content_stream(chunks), Some(subscription), "conv-1".into());

        let first = stream.next().await.unwrap().unwrap();
        let text = String::from_utf8(first.to_vec()).unwrap();
        assert!(text.contains("\"type\":\"world_update\""));
        assert!(text.contains("npc_moved"));
    }

    #[tokio::test]
    async fn bus_event_for_a_different_conversation_is_dropped() {
        let bus = BroadcastEventBus::new(16);
        let subscription = bus.subscribe().unwrap();
        bus.publish(Event::new("conv-other", "npc_moved", serde_json::json!({})))
            .await
            .unwrap();

        let chunks = vec![chunk(StreamChunkKind::Content, 0), chunk(StreamChunkKind::Done, 1)];
        let mut stream = ChatEventStream::new(content_stream(chunks), Some(subscription), "conv-1".into());

        let first = stream.next().await.unwrap().unwrap();
        let text = String::from_utf8(first.to_vec()).unwrap();
        assert!(text.contains("\"type\":\"content\""));
    }

    #[tokio::test]
    async fn no_bus_events_appear_after_done() {
        let bus = BroadcastEventBus::new(16);
        let subscription = bus.subscribe().unwrap();

        let chunks = vec![chunk(StreamChunkKind::Done, 0)];
        let mut stream = ChatEventStream::new(content_stream(chunks), Some(subscription), "conv-1".into());

        let first = stream.next().await.unwrap().unwrap();
        assert!(String::from_utf8(first.to_vec()).unwrap().contains("\"type\":\"done\""));
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.as_ref(), b"data: [DONE]\n\n");
        assert!(stream.next().await.is_none());
    }
}
