//! One pipeline instance: a supervised agent stream for one turn.
//!
//! Upstream drains the inbound channel into the agent sink; downstream
//! taps agent responses for barge-in and end-of-interaction, transcodes
//! response audio, and publishes carrier frames. Either side failing ends
//! both and surfaces one `Error` event.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use voxbridge_agent::{AgentConnector, AgentSink, AgentStream, ResponseStream, StreamingRequest};
use voxbridge_core::error::{Result, VoxBridgeError};
use voxbridge_core::protocol::OutboundFrame;
use voxbridge_core::session::{CallSession, SessionPhase, SessionSignal};
use voxbridge_core::types::QueryResult;
use voxbridge_media::Transcoder;

use crate::BridgeEvent;
use crate::frames;

pub(crate) type SharedSession = Arc<Mutex<CallSession>>;

pub(crate) fn lock(session: &SharedSession) -> MutexGuard<'_, CallSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything a pipeline task needs from its session.
pub(crate) struct PipelineContext {
    pub session_id: String,
    pub session: SharedSession,
    pub connector: Arc<dyn AgentConnector>,
    pub events: mpsc::Sender<BridgeEvent>,
    pub transcoder: Transcoder,
    pub agent_buffer: usize,
}

/// Handle to a running pipeline, owned by the session bridge.
pub(crate) struct Pipeline {
    number: u64,
    inbound: Option<mpsc::Sender<Bytes>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Pipeline {
    pub fn start(
        ctx: PipelineContext,
        number: u64,
        setup: StreamingRequest,
        inbound_buffer: usize,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(inbound_buffer.max(1));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(ctx, number, setup, inbound_rx, cancel.clone()));
        Self {
            number,
            inbound: Some(inbound_tx),
            cancel,
            task,
        }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    /// The inbound write path, if it is still open.
    pub fn inbound(&self) -> Option<&mpsc::Sender<Bytes>> {
        self.inbound.as_ref().filter(|tx| !tx.is_closed())
    }

    /// Close the inbound write path; the agent send side half-closes once
    /// queued audio is drained. Returns `false` if it was already closed.
    pub fn close_inbound(&mut self) -> bool {
        self.inbound.take().is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Close both legs and wait up to `grace` for the task to wind down.
    pub async fn shutdown(mut self, grace: Duration) {
        self.inbound.take();
        self.cancel.cancel();
        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            warn!(pipeline = self.number, "Pipeline did not stop in time, aborting");
            self.task.abort();
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    ctx: PipelineContext,
    number: u64,
    setup: StreamingRequest,
    inbound: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) {
    info!(
        session_id = %ctx.session_id,
        pipeline = number,
        connector = ctx.connector.id(),
        "Pipeline started"
    );

    let opened = tokio::select! {
        _ = cancel.cancelled() => None,
        opened = ctx.connector.open(setup, ctx.agent_buffer) => Some(opened),
    };

    let result = match opened {
        None => Ok(()),
        Some(Err(e)) => Err(VoxBridgeError::Agent(format!(
            "failed to open agent stream: {e:#}"
        ))),
        Some(Ok(stream)) => supervise(&ctx, stream, inbound, &cancel).await,
    };

    if let Err(e) = result {
        error!(session_id = %ctx.session_id, pipeline = number, error = %e, "Pipeline failed");
        if !cancel.is_cancelled() {
            publish(&ctx, BridgeEvent::Error { cause: e.to_string() }).await;
        }
    }

    if let Err(e) = lock(&ctx.session).apply(SessionSignal::PipelineEnded) {
        debug!(session_id = %ctx.session_id, error = %e, "Pipeline end after close");
    }
    info!(session_id = %ctx.session_id, pipeline = number, "Pipeline ended");
}

async fn supervise(
    ctx: &PipelineContext,
    stream: AgentStream,
    inbound: mpsc::Receiver<Bytes>,
    cancel: &CancellationToken,
) -> Result<()> {
    let AgentStream { sink, responses } = stream;

    let upstream = upstream(ctx, sink.clone(), inbound);
    let downstream = downstream(ctx, sink.clone(), responses);
    tokio::pin!(upstream, downstream);

    // Upstream finishing only half-closes; the agent may still answer.
    let result = tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        res = &mut downstream => res,
        () = &mut upstream => tokio::select! {
            _ = cancel.cancelled() => Ok(()),
            res = &mut downstream => res,
        },
    };

    sink.close();
    result
}

async fn upstream(ctx: &PipelineContext, sink: AgentSink, mut inbound: mpsc::Receiver<Bytes>) {
    let mut forwarded = 0usize;
    while let Some(chunk) = inbound.recv().await {
        if lock(&ctx.session).is_stopped() {
            debug!(session_id = %ctx.session_id, "Suppressing inbound audio after stop");
            continue;
        }
        let Some(chunk) = ctx.transcoder.upstream(chunk) else {
            continue;
        };
        if !sink.is_send_open() {
            debug!(session_id = %ctx.session_id, "Agent send side closed, dropping audio");
            continue;
        }
        match sink.send_audio(&chunk).await {
            Ok(()) => forwarded += chunk.len(),
            Err(e) => warn!(session_id = %ctx.session_id, error = %e, "Stale write to agent ignored"),
        }
    }
    debug!(session_id = %ctx.session_id, bytes = forwarded, "Inbound audio drained");
    sink.half_close();
}

async fn downstream(ctx: &PipelineContext, sink: AgentSink, mut responses: ResponseStream) -> Result<()> {
    while let Some(item) = responses.next().await {
        let response = item.map_err(|e| VoxBridgeError::Agent(format!("{e:#}")))?;

        if let Some(transcript) = response.interim_transcript() {
            barge_in(ctx, transcript).await;
        }

        let audio = ctx.transcoder.downstream(&response.output_audio)?;

        if let Some(result) = response.ending_result() {
            end_interaction(ctx, &sink, result.clone());
        }

        if let Some(audio) = audio {
            let out = frames::encode_audio(&mut lock(&ctx.session), &audio);
            if out.is_empty() {
                debug!(session_id = %ctx.session_id, "Dropping agent audio after terminal mark");
            }
            for frame in out {
                publish(ctx, BridgeEvent::Audio { frame }).await;
            }
        }
    }

    let mark = frames::flush_end_mark(&mut lock(&ctx.session));
    if let Some(frame) = mark {
        publish(ctx, BridgeEvent::Audio { frame }).await;
    }
    Ok(())
}

async fn barge_in(ctx: &PipelineContext, transcript: &str) {
    let clear = {
        let mut session = lock(&ctx.session);
        match session.apply(SessionSignal::BargeIn) {
            Ok(t) => Some(
                (t.from == SessionPhase::Active).then(|| OutboundFrame::clear(session.stream_sid())),
            ),
            Err(e) => {
                debug!(session_id = %ctx.session_id, error = %e, "Ignoring recognition result");
                None
            }
        }
    };
    let Some(clear) = clear else {
        return;
    };

    info!(session_id = %ctx.session_id, transcript, clear = clear.is_some(), "Caller barged in");
    publish(
        ctx,
        BridgeEvent::Interrupted {
            transcript: transcript.to_string(),
            clear,
        },
    )
    .await;
}

fn end_interaction(ctx: &PipelineContext, sink: &AgentSink, result: QueryResult) {
    {
        let mut session = lock(&ctx.session);
        if !session.cache_final_result(result) {
            debug!(session_id = %ctx.session_id, "Final query result already cached");
        }
        if let Err(e) = session.apply(SessionSignal::Stop) {
            debug!(session_id = %ctx.session_id, error = %e, "Stop after close");
        }
    }
    sink.half_close();
    info!(session_id = %ctx.session_id, "Agent ended the interaction");
}

async fn publish(ctx: &PipelineContext, event: BridgeEvent) {
    if ctx.events.send(event).await.is_err() {
        debug!(session_id = %ctx.session_id, "Event receiver dropped");
    }
}
