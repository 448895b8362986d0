//! Speech synthesis channel
//!
//! Serializes utterances to the synthesis backend: one playing at most,
//! one pending at most. An interrupt-priority request cancels the playing
//! utterance before the replacement starts; enqueued requests wait in the
//! single pending slot where the latest request wins.

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Tag for one synthesized utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtteranceId(pub u64);

impl std::fmt::Display for UtteranceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a new utterance relates to whatever is already playing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakPriority {
    /// Cancel the in-flight utterance, then start this one
    InterruptCurrent,
    /// Wait in the pending slot; a later enqueue replaces this one
    Enqueue,
}

/// Completion notifications from the synthesis backend
#[derive(Debug, Clone)]
pub enum OutputEvent {
    /// The backend finished playing the utterance
    Ended { utterance: UtteranceId },
}

/// Platform synthesis capability.
///
/// `speak` begins one utterance and must emit `Ended` for it on the sender
/// unless `cancel` arrives first; a canceled utterance must not report an
/// end.
pub trait SynthesisBackend: Send {
    fn speak(&mut self, utterance: UtteranceId, text: &str, events: mpsc::Sender<OutputEvent>);
    fn cancel(&mut self);
}

/// Serial, capacity-1 arbitration over the synthesis backend
pub struct SpeechOutputChannel {
    backend: Option<Box<dyn SynthesisBackend>>,
    event_tx: mpsc::Sender<OutputEvent>,
    current: Option<UtteranceId>,
    pending: Option<(UtteranceId, String)>,
    next_id: u64,
}

impl SpeechOutputChannel {
    /// Create the channel. `None` for the backend means no synthesis
    /// service exists; `speak` degrades to a log line and returns `None`.
    pub fn new(
        backend: Option<Box<dyn SynthesisBackend>>,
        event_tx: mpsc::Sender<OutputEvent>,
    ) -> Self {
        Self {
            backend,
            event_tx,
            current: None,
            pending: None,
            next_id: 1,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.backend.is_some()
    }

    /// Request an utterance. Returns the id whose `Ended` event callers
    /// should wait for, or `None` when synthesis is unavailable.
    pub fn speak(&mut self, text: &str, priority: SpeakPriority) -> Option<UtteranceId> {
        if self.backend.is_none() {
            warn!(%text, "no synthesis service, utterance dropped");
            return None;
        }

        let utterance = UtteranceId(self.next_id);
        self.next_id += 1;

        match priority {
            SpeakPriority::InterruptCurrent => {
                if let Some(current) = self.current.take() {
                    debug!(%current, %utterance, "interrupting utterance");
                    if let Some(backend) = self.backend.as_mut() {
                        backend.cancel();
                    }
                }
                self.pending = None;
                self.begin(utterance, text);
            }
            SpeakPriority::Enqueue => {
                if self.current.is_none() {
                    self.begin(utterance, text);
                } else {
                    if let Some((replaced, _)) = self.pending.take() {
                        debug!(%replaced, "pending utterance replaced");
                    }
                    self.pending = Some((utterance, text.to_string()));
                }
            }
        }

        Some(utterance)
    }

    /// Record a backend completion. Returns true when it was the utterance
    /// currently playing; ends reported for superseded utterances are
    /// ignored. Starts the pending utterance, if any.
    pub fn note_ended(&mut self, utterance: UtteranceId) -> bool {
        if self.current != Some(utterance) {
            debug!(%utterance, "ignoring end of superseded utterance");
            return false;
        }

        self.current = None;
        if let Some((next, text)) = self.pending.take() {
            self.begin(next, &text);
        }

        true
    }

    /// Drop whatever is playing or pending
    pub fn cancel_all(&mut self) {
        self.pending = None;
        if let Some(utterance) = self.current.take() {
            debug!(%utterance, "utterance canceled");
            if let Some(backend) = self.backend.as_mut() {
                backend.cancel();
            }
        }
    }

    fn begin(&mut self, utterance: UtteranceId, text: &str) {
        if let Some(backend) = self.backend.as_mut() {
            debug!(%utterance, "utterance started");
            backend.speak(utterance, text, self.event_tx.clone());
            self.current = Some(utterance);
        }
    }
}
