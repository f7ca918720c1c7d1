//! Send-side handle of an agent stream.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::wire::StreamingRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// The send side was half-closed or the stream is gone.
    #[error("agent stream send side is closed")]
    Closed,
}

/// Cloneable handle used to push caller audio to the agent and to close
/// the stream. Half-close ends the send side only; close also cancels the
/// receive side. Both are idempotent.
#[derive(Debug, Clone)]
pub struct AgentSink {
    inner: Arc<SinkInner>,
}

#[derive(Debug)]
struct SinkInner {
    tx: Mutex<Option<mpsc::Sender<StreamingRequest>>>,
    cancel: CancellationToken,
}

/// Create a bounded request channel whose first message is `setup`.
///
/// Connectors drain the receiver into their transport; when the receiver
/// yields `None` the send side has been half-closed.
pub fn request_channel(
    setup: StreamingRequest,
    capacity: usize,
) -> (AgentSink, mpsc::Receiver<StreamingRequest>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    // Capacity is at least one and the channel is fresh.
    let _ = tx.try_send(setup);
    let sink = AgentSink {
        inner: Arc::new(SinkInner {
            tx: Mutex::new(Some(tx)),
            cancel: CancellationToken::new(),
        }),
    };
    (sink, rx)
}

impl Drop for SinkInner {
    // The last handle going away ends the stream even if nobody closed it.
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl AgentSink {
    /// Queue one chunk of caller audio, waiting for capacity.
    pub async fn send_audio(&self, chunk: &[u8]) -> Result<(), SendError> {
        let tx = self.sender().ok_or(SendError::Closed)?;
        tx.send(StreamingRequest::audio(chunk))
            .await
            .map_err(|_| SendError::Closed)
    }

    /// End the send side. Returns `true` for the call that actually closed it.
    pub fn half_close(&self) -> bool {
        let closed = match self.inner.tx.lock() {
            Ok(mut guard) => guard.take().is_some(),
            Err(poisoned) => poisoned.into_inner().take().is_some(),
        };
        if closed {
            debug!("Agent stream half-closed");
        }
        closed
    }

    /// End both sides of the stream.
    pub fn close(&self) {
        self.half_close();
        self.inner.cancel.cancel();
    }

    pub fn is_send_open(&self) -> bool {
        self.sender().is_some_and(|tx| !tx.is_closed())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Token cancelled by [`close`](Self::close); transports stop on it.
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    fn sender(&self) -> Option<mpsc::Sender<StreamingRequest>> {
        match self.inner.tx.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
