//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian
//! length. The host UI sends `Request`s and reads `Response`s; after a
//! `Subscribe` the connection turns into a one-way `Notification` stream.

use serde::{Deserialize, Serialize};

use crate::assistant::ActivateError;
use crate::events::{AssistantEvent, RecognitionErrorKind, RecognitionState};
use crate::speech::SessionId;

/// Requests from the host UI to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Start a listening session (the activation control was pressed)
    Activate,

    /// Abandon the in-progress session
    Cancel,

    /// Request current daemon status
    GetStatus,

    /// Ping to check connectivity
    Ping,

    /// Turn this connection into a notification stream
    Subscribe,
}

/// Responses from the daemon to the host UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// A listening session was started
    Activated { session: SessionId },

    /// Cancellation was delivered
    Canceled,

    /// Current daemon status
    Status(DaemonStatus),

    /// Pong response to ping
    Pong,

    /// Subscription confirmed; notifications follow
    Subscribed,

    /// Request failed
    Error { code: String, message: String },
}

impl Response {
    /// Map an activation refusal onto the wire
    pub fn from_activate_error(err: ActivateError) -> Self {
        let code = match err {
            ActivateError::AlreadyActive => "already_active",
            ActivateError::Unavailable(_) => "unavailable",
        };
        Response::Error {
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

/// Push notifications for subscribed clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// The engine moved to a new state
    StateChanged { state: RecognitionState },

    /// The engine disabled itself permanently
    Unavailable { reason: RecognitionErrorKind },

    /// A command was recognized; the host decides what the intent does
    Command { intent: String, transcript: String },
}

impl From<AssistantEvent> for Notification {
    fn from(event: AssistantEvent) -> Self {
        match event {
            AssistantEvent::StateChanged { state } => Notification::StateChanged { state },
            AssistantEvent::Unavailable { reason } => Notification::Unavailable { reason },
        }
    }
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Current engine state
    pub state: RecognitionState,

    /// Whether a recognition service is available
    pub recognition_supported: bool,

    /// Whether a synthesis service is available
    pub synthesis_supported: bool,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: RecognitionState::default(),
            recognition_supported: false,
            synthesis_supported: false,
            uptime_secs: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = Request::Activate;
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("activate"));
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::Status(DaemonStatus::default());
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("status"));
        assert!(json.contains("idle"));
    }

    #[test]
    fn test_notification_from_event() {
        let note = Notification::from(AssistantEvent::StateChanged {
            state: RecognitionState::Listening,
        });
        let json = serde_json::to_string(&note).unwrap();
        assert!(json.contains("state_changed"));
        assert!(json.contains("listening"));
    }

    #[test]
    fn test_activate_error_mapping() {
        let resp = Response::from_activate_error(ActivateError::AlreadyActive);
        match resp {
            Response::Error { code, .. } => assert_eq!(code, "already_active"),
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
