//! Voice assistant controller module
//!
//! Owns the recognition session state machine: one mutable session slot,
//! session-tagged event filtering, grammar dispatch, and the error-recovery
//! policy between the speech channels and the host-facing sinks.

mod controller;

pub use controller::{ActivateError, ControlRequest, VoiceAssistantController};
