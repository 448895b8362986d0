//! Shared event vocabulary for the voice command engine
//!
//! Provides the recognition states published to the host UI, the error
//! taxonomy, and the dispatch record for matched commands.

use serde::{Deserialize, Serialize};

/// Where the engine currently is in the listen/interpret/reply cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionState {
    /// No session active, ready for activation
    Idle,
    /// Capture requested, waiting for the recognition service to open
    Starting,
    /// Microphone open, waiting for an utterance
    Listening,
    /// Transcript received, matching against the grammar
    Processing,
    /// Reply utterance in flight
    Speaking,
    /// Attempt failed, fallback feedback in flight
    Error,
}

impl Default for RecognitionState {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for RecognitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecognitionState::Idle => write!(f, "Idle"),
            RecognitionState::Starting => write!(f, "Starting"),
            RecognitionState::Listening => write!(f, "Listening"),
            RecognitionState::Processing => write!(f, "Processing"),
            RecognitionState::Speaking => write!(f, "Speaking"),
            RecognitionState::Error => write!(f, "Error"),
        }
    }
}

/// Why a listening attempt ended without a dispatched command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionErrorKind {
    /// The platform offers no recognition service
    Unsupported,
    /// Microphone access was refused
    PermissionDenied,
    /// The capture closed without hearing anything
    NoSpeech,
    /// The recognition service failed mid-capture
    Recognition,
}

impl RecognitionErrorKind {
    /// Fatal kinds disable the engine for the rest of the process lifetime.
    /// The others are per-attempt: the engine returns to idle and the next
    /// activation is allowed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unsupported | Self::PermissionDenied)
    }
}

impl std::fmt::Display for RecognitionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecognitionErrorKind::Unsupported => write!(f, "unsupported"),
            RecognitionErrorKind::PermissionDenied => write!(f, "permission_denied"),
            RecognitionErrorKind::NoSpeech => write!(f, "no_speech"),
            RecognitionErrorKind::Recognition => write!(f, "recognition"),
        }
    }
}

/// Notices broadcast to the host UI on every transition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantEvent {
    /// The engine moved to a new state
    StateChanged { state: RecognitionState },

    /// The engine disabled itself permanently; sent at most once
    Unavailable { reason: RecognitionErrorKind },
}

/// One matched command handed to the host's intent sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentDispatch {
    /// Opaque action identifier from the matched rule
    pub intent: String,

    /// Normalized transcript that matched
    pub transcript: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serialization() {
        let event = AssistantEvent::StateChanged {
            state: RecognitionState::Listening,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("state_changed"));
        assert!(json.contains("listening"));
    }

    #[test]
    fn test_unavailable_deserialization() {
        let json = r#"{"type":"unavailable","reason":"permission_denied"}"#;
        let event: AssistantEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(
            event,
            AssistantEvent::Unavailable {
                reason: RecognitionErrorKind::PermissionDenied
            }
        ));
    }

    #[test]
    fn test_fatal_split() {
        assert!(RecognitionErrorKind::Unsupported.is_fatal());
        assert!(RecognitionErrorKind::PermissionDenied.is_fatal());
        assert!(!RecognitionErrorKind::NoSpeech.is_fatal());
        assert!(!RecognitionErrorKind::Recognition.is_fatal());
    }
}
