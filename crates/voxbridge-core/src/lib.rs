//! Core types, config, errors, and call session model for VoxBridge.

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod types;
