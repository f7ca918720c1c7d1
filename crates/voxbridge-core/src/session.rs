//! Call session model: identity, lifecycle phase, and the cached final result.
//!
//! A session moves through `idle → active → interrupted* → stopped → closed`.
//! Transitions are driven only by [`SessionSignal`]s; anything else is
//! rejected with a [`TransitionError`] so callers can log and drop it.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::QueryResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SessionPhase {
    /// No pipeline running; the next inbound frame builds one.
    Idle,
    /// A pipeline is running and playback may be cleared on barge-in.
    Active,
    /// Caller barged in during this turn; playback was already cleared.
    Interrupted,
    /// Inbound audio is suppressed. `acknowledged` flips once the carrier
    /// echoes the end-of-interaction mark.
    Stopped { acknowledged: bool },
    Closed,
}

/// The named signals that move a session between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
    PipelineStarted,
    BargeIn,
    Stop,
    EndAcknowledged,
    PipelineEnded,
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionPhase,
    pub to: SessionPhase,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("signal {signal:?} is not valid in phase {phase}")]
pub struct TransitionError {
    pub phase: SessionPhase,
    pub signal: SessionSignal,
}

impl SessionPhase {
    /// Compute the phase reached by applying `signal`.
    pub fn next(self, signal: SessionSignal) -> Result<SessionPhase, TransitionError> {
        use SessionPhase::*;
        use SessionSignal as S;

        let next = match (self, signal) {
            (Closed, S::Finish) => Closed,
            (Closed, _) => return Err(TransitionError { phase: self, signal }),
            (_, S::Finish) => Closed,

            (Idle, S::PipelineStarted) => Active,
            (Active | Interrupted, S::BargeIn) => Interrupted,

            (Idle | Active | Interrupted, S::Stop) => Stopped {
                acknowledged: false,
            },
            (Stopped { .. }, S::Stop) => self,
            (Stopped { acknowledged: false }, S::EndAcknowledged) => Stopped { acknowledged: true },

            (Idle | Active | Interrupted, S::PipelineEnded) => Idle,
            (Stopped { .. }, S::PipelineEnded) => self,

            _ => return Err(TransitionError { phase: self, signal }),
        };
        Ok(next)
    }

    /// Inbound audio must no longer reach the agent.
    pub fn is_stopped(self) -> bool {
        matches!(self, SessionPhase::Stopped { .. } | SessionPhase::Closed)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Idle => f.write_str("idle"),
            SessionPhase::Active => f.write_str("active"),
            SessionPhase::Interrupted => f.write_str("interrupted"),
            SessionPhase::Stopped { acknowledged: false } => f.write_str("stopped"),
            SessionPhase::Stopped { acknowledged: true } => f.write_str("stopped (acknowledged)"),
            SessionPhase::Closed => f.write_str("closed"),
        }
    }
}

/// A conversational turn opened by `begin_turn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Turn {
    /// 1-based pipeline sequence number within the session.
    pub number: u64,
    /// The first turn opens the conversation with the trigger event.
    pub first: bool,
}

/// State of one phone call.
#[derive(Debug, Clone)]
pub struct CallSession {
    session_id: String,
    call_sid: Option<String>,
    stream_sid: Option<String>,
    phase: SessionPhase,
    turns: u64,
    final_query_result: Option<QueryResult>,
    end_mark_sent: bool,
}

impl Default for CallSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CallSession {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    pub fn with_id(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            call_sid: None,
            stream_sid: None,
            phase: SessionPhase::Idle,
            turns: 0,
            final_query_result: None,
            end_mark_sent: false,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn call_sid(&self) -> Option<&str> {
        self.call_sid.as_deref()
    }

    pub fn stream_sid(&self) -> Option<&str> {
        self.stream_sid.as_deref()
    }

    pub fn set_call(&mut self, call_sid: &str, stream_sid: &str) {
        self.call_sid = Some(call_sid.to_string());
        self.stream_sid = Some(stream_sid.to_string());
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_stopped(&self) -> bool {
        self.phase.is_stopped()
    }

    pub fn is_first_turn(&self) -> bool {
        self.turns == 0
    }

    pub fn apply(&mut self, signal: SessionSignal) -> Result<Transition, TransitionError> {
        if signal == SessionSignal::EndAcknowledged && self.final_query_result.is_none() {
            return Err(TransitionError {
                phase: self.phase,
                signal,
            });
        }
        let from = self.phase;
        self.phase = from.next(signal)?;
        Ok(Transition {
            from,
            to: self.phase,
        })
    }

    /// Mark a new pipeline as started and report which kind of turn it opens.
    pub fn begin_turn(&mut self) -> Result<Turn, TransitionError> {
        let first = self.is_first_turn();
        self.apply(SessionSignal::PipelineStarted)?;
        self.turns += 1;
        Ok(Turn {
            number: self.turns,
            first,
        })
    }

    /// Cache the result that ended the interaction. The first cached result
    /// wins; later calls return `false` and leave it untouched.
    pub fn cache_final_result(&mut self, result: QueryResult) -> bool {
        if self.final_query_result.is_some() {
            return false;
        }
        self.final_query_result = Some(result);
        true
    }

    pub fn final_query_result(&self) -> Option<&QueryResult> {
        self.final_query_result.as_ref()
    }

    /// Returns `true` exactly once, after the session has stopped, for the
    /// caller that gets to emit the terminal end-of-interaction mark.
    pub fn claim_end_mark(&mut self) -> bool {
        if self.end_mark_sent || !matches!(self.phase, SessionPhase::Stopped { .. }) {
            return false;
        }
        self.end_mark_sent = true;
        true
    }

    pub fn end_mark_sent(&self) -> bool {
        self.end_mark_sent
    }

    /// Stable agent-side session path for this call.
    pub fn session_path(&self, project_id: &str) -> String {
        format!("projects/{project_id}/agent/sessions/{}", self.session_id)
    }
}
