//! The per-call session bridge.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use voxbridge_agent::{AgentConnector, StreamingRequest};
use voxbridge_core::protocol::{END_OF_INTERACTION_MARK, InboundFrame};
use voxbridge_core::session::{CallSession, SessionPhase, SessionSignal};
use voxbridge_core::types::QueryResult;
use voxbridge_media::Transcoder;

use crate::frames;
use crate::pipeline::{Pipeline, PipelineContext, SharedSession, lock};
use crate::{BridgeEvent, BridgeSettings};

/// Bridges one carrier media stream to the agent.
///
/// Feed every carrier message to [`send`](Self::send) and consume the
/// returned event receiver concurrently; the bridge applies backpressure
/// through both channels. Call [`finish`](Self::finish) when the carrier
/// socket goes away.
pub struct SessionBridge {
    settings: BridgeSettings,
    connector: Arc<dyn AgentConnector>,
    session: SharedSession,
    session_id: String,
    events: mpsc::Sender<BridgeEvent>,
    pipeline: Option<Pipeline>,
    finished: bool,
}

impl SessionBridge {
    pub fn new(
        settings: BridgeSettings,
        connector: Arc<dyn AgentConnector>,
    ) -> (Self, mpsc::Receiver<BridgeEvent>) {
        Self::with_session(settings, connector, CallSession::new())
    }

    /// Bridge around an existing session (fixed id in tests).
    pub fn with_session(
        settings: BridgeSettings,
        connector: Arc<dyn AgentConnector>,
        session: CallSession,
    ) -> (Self, mpsc::Receiver<BridgeEvent>) {
        let (events, rx) = mpsc::channel(settings.event_buffer.max(1));
        let session_id = session.session_id().to_string();
        let bridge = Self {
            settings,
            connector,
            session: Arc::new(Mutex::new(session)),
            session_id,
            events,
            pipeline: None,
            finished: false,
        };
        (bridge, rx)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn phase(&self) -> SessionPhase {
        lock(&self.session).phase()
    }

    pub fn is_stopped(&self) -> bool {
        lock(&self.session).is_stopped()
    }

    pub fn call_sid(&self) -> Option<String> {
        lock(&self.session).call_sid().map(str::to_string)
    }

    pub fn final_query_result(&self) -> Option<QueryResult> {
        lock(&self.session).final_query_result().cloned()
    }

    /// Accept one carrier message.
    ///
    /// Builds a pipeline on demand, taps control frames, and forwards media
    /// audio. Frames that cannot be used (malformed, after stop, after
    /// finish, or with the write path gone) are dropped with a log line.
    pub async fn send(&mut self, raw: &str) {
        let Some(frame) = frames::decode_inbound(raw) else {
            return;
        };
        if self.finished {
            debug!(session_id = %self.session_id, "Dropping frame after finish");
            return;
        }

        if !matches!(frame, InboundFrame::Stop {}) {
            self.ensure_pipeline();
        }

        match &frame {
            InboundFrame::Start { start } => {
                lock(&self.session).set_call(&start.call_sid, &start.stream_sid);
                info!(
                    session_id = %self.session_id,
                    call_sid = %start.call_sid,
                    stream_sid = %start.stream_sid,
                    "Call started"
                );
                self.publish(BridgeEvent::CallStarted {
                    call_sid: start.call_sid.clone(),
                    stream_sid: start.stream_sid.clone(),
                })
                .await;
            }
            InboundFrame::Mark { mark } if mark.name == END_OF_INTERACTION_MARK => {
                self.acknowledge_end().await;
            }
            InboundFrame::Mark { mark } => {
                debug!(session_id = %self.session_id, name = %mark.name, "Playback mark");
            }
            InboundFrame::Stop {} => {
                if let Some(pipeline) = self.pipeline.as_mut() {
                    if pipeline.close_inbound() {
                        info!(session_id = %self.session_id, "Carrier stopped the stream");
                    }
                }
            }
            InboundFrame::Media { .. } => {}
        }

        let stopped = self.is_stopped();
        if stopped && matches!(frame, InboundFrame::Media { .. }) {
            warn!(session_id = %self.session_id, "Dropping media after stop");
            return;
        }
        if let Some(chunk) = frames::media_payload(&frame, stopped) {
            self.forward(chunk).await;
        }
    }

    /// Mark the session stopped: inbound audio is no longer forwarded and
    /// the next flushed agent audio is followed by the terminal mark.
    pub fn stop(&self) {
        match lock(&self.session).apply(SessionSignal::Stop) {
            Ok(t) if t.changed() => info!(session_id = %self.session_id, "Session stopped"),
            Ok(_) => {}
            Err(e) => debug!(session_id = %self.session_id, error = %e, "Stop ignored"),
        }
    }

    /// Tear the session down. Closes the inbound write path and the agent
    /// stream, then waits for the pipeline within the shutdown grace.
    /// Repeated calls do nothing.
    pub async fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        if let Some(pipeline) = self.pipeline.take() {
            debug!(session_id = %self.session_id, pipeline = pipeline.number(), "Shutting down pipeline");
            pipeline.shutdown(self.settings.shutdown_grace).await;
        }
        if let Err(e) = lock(&self.session).apply(SessionSignal::Finish) {
            debug!(session_id = %self.session_id, error = %e, "Finish on closed session");
        }
        info!(session_id = %self.session_id, "Session finished");
    }

    /// Start a pipeline unless one is running or the session stopped.
    fn ensure_pipeline(&mut self) {
        let mut session = lock(&self.session);

        if let Some(pipeline) = &self.pipeline {
            let running = matches!(session.phase(), SessionPhase::Active | SessionPhase::Interrupted);
            if running && !pipeline.is_finished() {
                return;
            }
            if running {
                // The task died without reporting its end.
                let _ = session.apply(SessionSignal::PipelineEnded);
            }
        }
        if session.phase() != SessionPhase::Idle {
            return;
        }

        let turn = match session.begin_turn() {
            Ok(turn) => turn,
            Err(e) => {
                debug!(session_id = %self.session_id, error = %e, "No new pipeline");
                return;
            }
        };
        let path = session.session_path(&self.settings.project_id);
        drop(session);

        let s = &self.settings;
        let setup = if turn.first {
            StreamingRequest::first_turn(&path, &s.starting_event, &s.language_code, s.output_sample_rate)
        } else {
            StreamingRequest::continuation(&path, &s.language_code, s.output_sample_rate)
        };

        let ctx = PipelineContext {
            session_id: self.session_id.clone(),
            session: self.session.clone(),
            connector: self.connector.clone(),
            events: self.events.clone(),
            transcoder: Transcoder::new(s.output_sample_rate),
            agent_buffer: s.agent_buffer,
        };
        debug!(session_id = %self.session_id, pipeline = turn.number, first = turn.first, "Building pipeline");
        self.pipeline = Some(Pipeline::start(ctx, turn.number, setup, s.inbound_buffer));
    }

    async fn forward(&mut self, chunk: Bytes) {
        let Some(tx) = self.pipeline.as_ref().and_then(Pipeline::inbound) else {
            warn!(session_id = %self.session_id, "Inbound write path closed, dropping media");
            return;
        };
        if tx.send(chunk).await.is_err() {
            warn!(session_id = %self.session_id, "Inbound write path ended, dropping media");
        }
    }

    async fn acknowledge_end(&mut self) {
        let summary = {
            let mut session = lock(&self.session);
            match session.apply(SessionSignal::EndAcknowledged) {
                Ok(_) => session.final_query_result().map(QueryResult::summary),
                Err(e) => {
                    debug!(session_id = %self.session_id, error = %e, "Unexpected end-of-interaction mark");
                    None
                }
            }
        };
        if let Some(query_result) = summary {
            info!(
                session_id = %self.session_id,
                intent = %query_result.intent.display_name,
                "Interaction ended"
            );
            self.publish(BridgeEvent::EndOfInteraction { query_result }).await;
        }
    }

    async fn publish(&self, event: BridgeEvent) {
        if self.events.send(event).await.is_err() {
            debug!(session_id = %self.session_id, "Event receiver dropped");
        }
    }
}
