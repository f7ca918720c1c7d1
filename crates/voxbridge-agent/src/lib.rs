//! Streaming conversational-agent adapter.
//!
//! A connector opens one bidirectional stream per pipeline. The caller gets
//! an [`AgentSink`] for the send side and a stream of [`StreamingResponse`]s
//! for the receive side. The setup request is always the first message on
//! the wire, ahead of any audio.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

pub mod sink;
pub mod websocket;
pub mod wire;

#[cfg(feature = "test-util")]
pub mod scripted;

pub use sink::{AgentSink, SendError, request_channel};
pub use websocket::WsAgentConnector;
pub use wire::{StreamingRequest, StreamingResponse};

/// Receive side of an agent stream. Ends when the agent finishes the turn,
/// the transport closes, or the sink is closed.
pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamingResponse>> + Send>>;

/// One open agent stream.
pub struct AgentStream {
    pub sink: AgentSink,
    pub responses: ResponseStream,
}

impl std::fmt::Debug for AgentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentStream")
            .field("sink", &self.sink)
            .finish_non_exhaustive()
    }
}

/// Opens agent streams.
#[async_trait]
pub trait AgentConnector: Send + Sync {
    /// Connector identifier for logs (e.g., "websocket", "scripted").
    fn id(&self) -> &str;

    /// Open a stream whose first request is `setup`. `buffer` bounds the
    /// number of queued outbound requests.
    async fn open(&self, setup: StreamingRequest, buffer: usize) -> anyhow::Result<AgentStream>;
}
