//! Media WebSocket lifecycle: one session bridge per carrier stream.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use voxbridge_bridge::{BridgeEvent, SessionBridge};
use voxbridge_core::protocol::OutboundFrame;
use voxbridge_core::types::InteractionSummary;

use crate::state::GatewayState;

/// Handle a new carrier media stream.
pub async fn handle_media_socket(state: Arc<GatewayState>, ws: WebSocket) {
    let (mut bridge, events) = SessionBridge::new(state.settings.clone(), state.connector.clone());
    let session_id = bridge.session_id().to_string();
    info!(session_id = %session_id, "Media stream connected");

    state.register_call(&session_id).await;
    #[cfg(feature = "metrics")]
    crate::metrics::record_call_start();

    let (ws_tx, mut ws_rx) = ws.split();
    let writer = tokio::spawn(write_events(
        state.clone(),
        session_id.clone(),
        ws_tx,
        events,
    ));

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => bridge.send(text.as_str()).await,
            Ok(Message::Close(_)) => {
                debug!(session_id = %session_id, "Carrier closed the media stream");
                break;
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Media socket error");
                break;
            }
            _ => {}
        }
    }

    bridge.finish().await;
    // Dropping the bridge closes the event channel so the writer drains and exits.
    drop(bridge);
    if let Err(e) = writer.await {
        error!(session_id = %session_id, error = %e, "Event writer panicked");
    }

    state.remove_call(&session_id).await;
    #[cfg(feature = "metrics")]
    crate::metrics::record_call_end();
    info!(session_id = %session_id, "Media stream closed");
}

/// Consume bridge events: write carrier frames and trigger call control.
///
/// Keeps draining after the socket is gone so an end-of-interaction that
/// races the close still reaches call control.
async fn write_events(
    state: Arc<GatewayState>,
    session_id: String,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut events: mpsc::Receiver<BridgeEvent>,
) {
    let mut call_sid: Option<String> = None;
    let mut open = true;
    let mut completed = false;

    while let Some(event) = events.recv().await {
        #[cfg(feature = "metrics")]
        crate::metrics::record_bridge_event(event.kind());

        match event {
            BridgeEvent::CallStarted {
                call_sid: sid,
                stream_sid,
            } => {
                state.set_call(&session_id, &sid, &stream_sid).await;
                call_sid = Some(sid);
            }
            BridgeEvent::Audio { frame } => {
                write_frame(&session_id, &mut ws_tx, &mut open, &frame).await;
            }
            BridgeEvent::Interrupted { transcript, clear } => {
                debug!(session_id = %session_id, transcript = %transcript, "Interrupted");
                if let Some(frame) = clear {
                    write_frame(&session_id, &mut ws_tx, &mut open, &frame).await;
                }
            }
            BridgeEvent::EndOfInteraction { query_result } => {
                if completed {
                    continue;
                }
                completed = true;
                match call_sid.clone() {
                    Some(sid) => spawn_call_control(&state, &session_id, sid, query_result),
                    None => warn!(session_id = %session_id, "Interaction ended before the call started"),
                }
            }
            BridgeEvent::Error { cause } => {
                warn!(session_id = %session_id, cause = %cause, "Bridge pipeline failed");
                #[cfg(feature = "metrics")]
                crate::metrics::record_error("bridge");
            }
        }
    }

    if open {
        let _ = ws_tx.close().await;
    }
}

async fn write_frame(
    session_id: &str,
    ws_tx: &mut SplitSink<WebSocket, Message>,
    open: &mut bool,
    frame: &OutboundFrame,
) {
    if !*open {
        return;
    }
    let json = match frame.to_json() {
        Ok(json) => json,
        Err(e) => {
            error!(session_id, error = %e, "Failed to encode outbound frame");
            return;
        }
    };
    if ws_tx.send(Message::Text(json.into())).await.is_err() {
        debug!(session_id, "Media socket gone, discarding outbound frames");
        *open = false;
    }
}

fn spawn_call_control(
    state: &Arc<GatewayState>,
    session_id: &str,
    call_sid: String,
    summary: InteractionSummary,
) {
    let control = state.call_control.clone();
    let session_id = session_id.to_string();
    tokio::spawn(async move {
        match control.complete(&call_sid, &summary).await {
            Ok(()) => {
                #[cfg(feature = "metrics")]
                crate::metrics::record_call_control("ok");
            }
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    call_sid = %call_sid,
                    error = %e,
                    "Call control failed"
                );
                #[cfg(feature = "metrics")]
                crate::metrics::record_call_control("failed");
            }
        }
    });
}
