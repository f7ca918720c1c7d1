//! In-memory agent driven step by step from tests.
//!
//! Every `open` hands a [`ScriptedStream`] to the test through
//! [`ScriptedAgent::next_stream`]. The test reads the requests the bridge
//! sent and pushes responses back.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::sink::{AgentSink, request_channel};
use crate::wire::{StreamingRequest, StreamingResponse};
use crate::{AgentConnector, AgentStream};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct ScriptedAgent {
    opened_tx: mpsc::UnboundedSender<ScriptedStream>,
    opened_rx: Mutex<mpsc::UnboundedReceiver<ScriptedStream>>,
    opens: AtomicUsize,
    max_active: AtomicUsize,
    /// Close tokens of every stream handed out.
    streams: std::sync::Mutex<Vec<CancellationToken>>,
    fail_next_open: AtomicBool,
}

/// The agent side of one open stream.
#[derive(Debug)]
pub struct ScriptedStream {
    requests: mpsc::Receiver<StreamingRequest>,
    responses: Option<mpsc::Sender<anyhow::Result<StreamingResponse>>>,
    sink: AgentSink,
}

impl Default for ScriptedAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedAgent {
    pub fn new() -> Self {
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        Self {
            opened_tx,
            opened_rx: Mutex::new(opened_rx),
            opens: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            streams: std::sync::Mutex::new(Vec::new()),
            fail_next_open: AtomicBool::new(false),
        }
    }

    /// Wait for the next stream the bridge opens. Panics after a timeout.
    pub async fn next_stream(&self) -> ScriptedStream {
        let mut rx = self.opened_rx.lock().await;
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for an agent stream")
            .expect("scripted agent dropped")
    }

    /// `true` when no stream was opened since the last `next_stream`.
    pub async fn no_pending_stream(&self) -> bool {
        self.opened_rx.lock().await.is_empty()
    }

    /// Make the next `open` fail with a transport error.
    pub fn fail_next_open(&self) {
        self.fail_next_open.store(true, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Streams not yet closed by the bridge.
    pub fn active_streams(&self) -> usize {
        match self.streams.lock() {
            Ok(streams) => streams.iter().filter(|t| !t.is_cancelled()).count(),
            Err(poisoned) => poisoned.into_inner().iter().filter(|t| !t.is_cancelled()).count(),
        }
    }

    pub fn max_concurrent_streams(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentConnector for ScriptedAgent {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn open(&self, setup: StreamingRequest, buffer: usize) -> anyhow::Result<AgentStream> {
        if self.fail_next_open.swap(false, Ordering::SeqCst) {
            anyhow::bail!("scripted agent refused the stream");
        }

        let (sink, requests) = request_channel(setup, buffer);
        let (resp_tx, resp_rx) = mpsc::channel(16);

        let active = match self.streams.lock() {
            Ok(mut streams) => {
                streams.push(sink.cancellation());
                streams.iter().filter(|t| !t.is_cancelled()).count()
            }
            Err(poisoned) => {
                let mut streams = poisoned.into_inner();
                streams.push(sink.cancellation());
                streams.iter().filter(|t| !t.is_cancelled()).count()
            }
        };
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.max_active.fetch_max(active, Ordering::SeqCst);

        let responses = ReceiverStream::new(resp_rx).take_until(sink.cancellation().cancelled_owned());

        let _ = self.opened_tx.send(ScriptedStream {
            requests,
            responses: Some(resp_tx),
            sink: sink.clone(),
        });

        Ok(AgentStream {
            sink,
            responses: Box::pin(responses),
        })
    }
}

impl ScriptedStream {
    /// Next request sent by the bridge, or `None` once the send side closed.
    pub async fn next_request(&mut self) -> Option<StreamingRequest> {
        tokio::time::timeout(WAIT, self.requests.recv())
            .await
            .expect("timed out waiting for an agent request")
    }

    /// Request already queued, without waiting.
    pub fn try_request(&mut self) -> Option<StreamingRequest> {
        self.requests.try_recv().ok()
    }

    pub async fn respond(&self, response: StreamingResponse) {
        if let Some(tx) = &self.responses {
            let _ = tx.send(Ok(response)).await;
        }
    }

    pub async fn fail(&self, message: &str) {
        if let Some(tx) = &self.responses {
            let _ = tx.send(Err(anyhow::anyhow!(message.to_string()))).await;
        }
    }

    /// Finish the turn: the response stream ends.
    pub fn end(&mut self) {
        self.responses = None;
    }

    pub fn is_send_closed(&self) -> bool {
        !self.sink.is_send_open()
    }

    pub fn is_closed(&self) -> bool {
        self.sink.is_closed()
    }

    /// Wait until the bridge closes the stream. Panics after a timeout.
    pub async fn closed(&self) {
        tokio::time::timeout(WAIT, self.sink.cancellation().cancelled())
            .await
            .expect("timed out waiting for the stream to close");
    }
}
