//! Gateway: the HTTP and WebSocket front-end of VoxBridge.
//!
//! Serves the call-setup document the carrier fetches when a call comes in,
//! accepts the carrier's media stream and runs one session bridge per
//! stream, and hands finished calls to call control.

pub mod call_control;
pub mod connection;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;
pub mod state;
pub mod twiml;

pub use call_control::{CallControl, TwilioCallControl};
pub use server::{router, start_gateway};
pub use state::GatewayState;
