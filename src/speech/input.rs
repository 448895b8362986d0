//! Speech capture channel
//!
//! Wraps the platform recognition capability behind a backend seam and
//! enforces single-flight capture: at most one utterance is being captured
//! at any time, and starting a second one is an error rather than a silent
//! no-op so double-fired controls stay diagnosable.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::events::RecognitionErrorKind;

/// Tag for one listening attempt. The controller issues a fresh one per
/// activation and drops events carrying any other, which is what keeps
/// stale callbacks from canceled captures from driving transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Events emitted by a capture, tagged with the session they belong to
#[derive(Debug, Clone)]
pub struct InputEvent {
    pub session: SessionId,
    pub kind: InputEventKind,
}

#[derive(Debug, Clone)]
pub enum InputEventKind {
    /// Capture opened; always precedes the terminal event
    Started,
    /// Terminal: an utterance was transcribed
    Result { transcript: String },
    /// Terminal: the capture closed without detecting speech
    Ended,
    /// Terminal: the capture failed
    Failed { kind: RecognitionErrorKind },
}

/// Platform recognition capability.
///
/// `start` begins capturing one utterance for the given session and must
/// emit `Started` followed by exactly one terminal event on the sender.
/// `cancel` abandons the current capture; a canceled capture must not emit
/// further events (stragglers are filtered by the session tag regardless).
pub trait RecognitionBackend: Send {
    fn start(&mut self, session: SessionId, events: mpsc::Sender<InputEvent>);
    fn cancel(&mut self);
}

/// Why a capture could not be started
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InputError {
    #[error("no speech recognition service is available")]
    Unsupported,

    #[error("a capture is already in progress")]
    AlreadyActive,
}

/// Single-flight wrapper around the recognition backend
pub struct SpeechInputChannel {
    backend: Option<Box<dyn RecognitionBackend>>,
    event_tx: mpsc::Sender<InputEvent>,
    active: Option<SessionId>,
}

impl SpeechInputChannel {
    /// Create the channel. `None` for the backend means the platform offers
    /// no recognition service; `start` will fail with `Unsupported`.
    pub fn new(
        backend: Option<Box<dyn RecognitionBackend>>,
        event_tx: mpsc::Sender<InputEvent>,
    ) -> Self {
        Self {
            backend,
            event_tx,
            active: None,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.backend.is_some()
    }

    /// Begin capturing one utterance for the given session
    pub fn start(&mut self, session: SessionId) -> Result<(), InputError> {
        if let Some(active) = self.active {
            warn!(%active, %session, "capture already in progress");
            return Err(InputError::AlreadyActive);
        }

        let backend = self.backend.as_mut().ok_or(InputError::Unsupported)?;

        debug!(%session, "starting capture");
        backend.start(session, self.event_tx.clone());
        self.active = Some(session);

        Ok(())
    }

    /// Cancel the in-progress capture; safe to call when idle
    pub fn stop(&mut self) {
        if let Some(session) = self.active.take() {
            debug!(%session, "canceling capture");
            if let Some(backend) = self.backend.as_mut() {
                backend.cancel();
            }
        }
    }

    /// Release the capture slot once its terminal event has been consumed.
    /// Ignores sessions that are no longer the active one.
    pub fn complete(&mut self, session: SessionId) {
        if self.active == Some(session) {
            self.active = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct RecordingBackend {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl RecognitionBackend for RecordingBackend {
        fn start(&mut self, session: SessionId, _events: mpsc::Sender<InputEvent>) {
            self.calls.lock().unwrap().push(format!("start {session}"));
        }

        fn cancel(&mut self) {
            self.calls.lock().unwrap().push("cancel".to_string());
        }
    }

    fn channel_with_backend() -> (SpeechInputChannel, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let backend = RecordingBackend {
            calls: Arc::clone(&calls),
        };
        let (event_tx, _event_rx) = mpsc::channel(16);
        (
            SpeechInputChannel::new(Some(Box::new(backend)), event_tx),
            calls,
        )
    }

    #[test]
    fn test_start_reaches_backend() {
        let (mut channel, calls) = channel_with_backend();
        channel.start(SessionId(1)).unwrap();
        assert_eq!(calls.lock().unwrap().as_slice(), ["start 1"]);
    }

    #[test]
    fn test_double_start_is_an_error() {
        let (mut channel, calls) = channel_with_backend();
        channel.start(SessionId(1)).unwrap();

        let err = channel.start(SessionId(2)).unwrap_err();
        assert_eq!(err, InputError::AlreadyActive);
        // the rejected start never touches the backend
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unsupported_platform() {
        let (event_tx, _event_rx) = mpsc::channel(16);
        let mut channel = SpeechInputChannel::new(None, event_tx);
        assert!(!channel.is_supported());
        assert_eq!(channel.start(SessionId(1)).unwrap_err(), InputError::Unsupported);
    }

    #[test]
    fn test_stop_when_idle_is_a_noop() {
        let (mut channel, calls) = channel_with_backend();
        channel.stop();
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_stop_frees_the_slot() {
        let (mut channel, calls) = channel_with_backend();
        channel.start(SessionId(1)).unwrap();
        channel.stop();
        channel.start(SessionId(2)).unwrap();
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            ["start 1", "cancel", "start 2"]
        );
    }

    #[test]
    fn test_complete_frees_the_slot() {
        let (mut channel, _calls) = channel_with_backend();
        channel.start(SessionId(1)).unwrap();
        channel.complete(SessionId(1));
        channel.start(SessionId(2)).unwrap();
    }

    #[test]
    fn test_complete_ignores_stale_session() {
        let (mut channel, _calls) = channel_with_backend();
        channel.start(SessionId(2)).unwrap();
        channel.complete(SessionId(1));
        assert_eq!(channel.start(SessionId(3)).unwrap_err(), InputError::AlreadyActive);
    }
}
