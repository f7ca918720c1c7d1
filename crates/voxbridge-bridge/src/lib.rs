//! Session bridge: one per phone call.
//!
//! The bridge decodes carrier frames, streams caller audio to the agent,
//! transcodes the agent's synthesized speech back to the carrier format, and
//! publishes a small fixed vocabulary of [`BridgeEvent`]s to its owner.

use std::time::Duration;

use serde::Serialize;

use voxbridge_core::config::Config;
use voxbridge_core::error::{Result, VoxBridgeError};
use voxbridge_core::protocol::OutboundFrame;
use voxbridge_core::types::InteractionSummary;

pub mod frames;
mod pipeline;
pub mod session;

pub use session::SessionBridge;

/// Events published by a [`SessionBridge`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BridgeEvent {
    /// The carrier announced the call.
    #[serde(rename_all = "camelCase")]
    CallStarted { call_sid: String, stream_sid: String },

    /// A frame ready for the carrier: synthesized audio or the terminal mark.
    Audio { frame: OutboundFrame },

    /// The caller spoke over the agent. `clear` is set on the first barge-in
    /// of a turn and should be written to the carrier to drop queued audio.
    Interrupted {
        transcript: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        clear: Option<OutboundFrame>,
    },

    /// The carrier finished playing the final audio of the interaction.
    #[serde(rename_all = "camelCase")]
    EndOfInteraction { query_result: InteractionSummary },

    /// The pipeline failed and was torn down.
    Error { cause: String },
}

impl BridgeEvent {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeEvent::CallStarted { .. } => "call_started",
            BridgeEvent::Audio { .. } => "audio",
            BridgeEvent::Interrupted { .. } => "interrupted",
            BridgeEvent::EndOfInteraction { .. } => "end_of_interaction",
            BridgeEvent::Error { .. } => "error",
        }
    }
}

/// Per-session settings resolved from config.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub project_id: String,
    pub starting_event: String,
    pub language_code: String,
    /// Requested agent output rate; also assumed for headerless audio.
    pub output_sample_rate: u32,
    pub inbound_buffer: usize,
    pub agent_buffer: usize,
    pub event_buffer: usize,
    /// How long `finish` waits for the pipeline before aborting it.
    pub shutdown_grace: Duration,
}

impl BridgeSettings {
    /// Settings with default buffers for the given agent identity.
    pub fn new(project_id: impl Into<String>, starting_event: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            starting_event: starting_event.into(),
            language_code: "en-US".into(),
            output_sample_rate: 16000,
            inbound_buffer: 32,
            agent_buffer: 32,
            event_buffer: 64,
            shutdown_grace: Duration::from_millis(2000),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let agent = config.agent();
        let bridge = config.bridge();

        let project_id = agent
            .resolve_project_id()
            .ok_or_else(|| VoxBridgeError::Config("No agent project id configured".into()))?;
        let starting_event = agent
            .resolve_starting_event()
            .ok_or_else(|| VoxBridgeError::Config("No starting event configured".into()))?;

        Ok(Self {
            project_id,
            starting_event,
            language_code: agent.resolve_language_code(),
            output_sample_rate: agent.output_sample_rate,
            inbound_buffer: bridge.inbound_buffer,
            agent_buffer: bridge.agent_buffer,
            event_buffer: bridge.event_buffer,
            shutdown_grace: Duration::from_millis(bridge.shutdown_grace_ms),
        })
    }
}
