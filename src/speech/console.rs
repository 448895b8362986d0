//! Console development backends
//!
//! Stand-ins for the platform speech services so the daemon can be driven
//! end-to-end from a terminal: a capture reads one stdin line (blank line
//! means silence), synthesis logs the utterance and paces itself by text
//! length. Both honor the channel contracts: one terminal event per
//! capture, no end report for a canceled utterance.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::input::{InputEvent, InputEventKind, RecognitionBackend, SessionId};
use super::output::{OutputEvent, SynthesisBackend, UtteranceId};

use crate::events::RecognitionErrorKind;

/// Pause applied per character of spoken text
const PACE_PER_CHAR: Duration = Duration::from_millis(45);

/// Floor so even one-word replies are visible as "in flight"
const PACE_FLOOR: Duration = Duration::from_millis(400);

enum CaptureCmd {
    Start {
        session: SessionId,
        events: mpsc::Sender<InputEvent>,
    },
    Cancel,
}

/// Recognition backend fed by stdin lines
pub struct ConsoleRecognizer {
    cmd_tx: mpsc::UnboundedSender<CaptureCmd>,
}

impl ConsoleRecognizer {
    /// Spawn the stdin reader task and return the backend handle
    pub fn spawn() -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(capture_loop(cmd_rx));
        Self { cmd_tx }
    }
}

impl RecognitionBackend for ConsoleRecognizer {
    fn start(&mut self, session: SessionId, events: mpsc::Sender<InputEvent>) {
        let _ = self.cmd_tx.send(CaptureCmd::Start { session, events });
    }

    fn cancel(&mut self) {
        let _ = self.cmd_tx.send(CaptureCmd::Cancel);
    }
}

async fn capture_loop(mut cmd_rx: mpsc::UnboundedReceiver<CaptureCmd>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut capture: Option<(SessionId, mpsc::Sender<InputEvent>)> = None;
    let mut stdin_open = true;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(CaptureCmd::Start { session, events }) => {
                    let _ = events.send(InputEvent { session, kind: InputEventKind::Started }).await;
                    if stdin_open {
                        capture = Some((session, events));
                    } else {
                        // stdin is gone, the capture can only end silent
                        let _ = events.send(InputEvent { session, kind: InputEventKind::Ended }).await;
                    }
                }
                Some(CaptureCmd::Cancel) => capture = None,
                None => break,
            },
            line = lines.next_line(), if stdin_open => {
                let event = match line {
                    Ok(Some(text)) => {
                        if capture.is_none() {
                            debug!(%text, "dropping input, no capture active");
                            continue;
                        }
                        if text.trim().is_empty() {
                            InputEventKind::Ended
                        } else {
                            InputEventKind::Result { transcript: text }
                        }
                    }
                    Ok(None) => {
                        debug!("stdin closed");
                        stdin_open = false;
                        InputEventKind::Ended
                    }
                    Err(e) => {
                        warn!(?e, "stdin read error");
                        stdin_open = false;
                        InputEventKind::Failed { kind: RecognitionErrorKind::Recognition }
                    }
                };

                if let Some((session, events)) = capture.take() {
                    let _ = events.send(InputEvent { session, kind: event }).await;
                }
            },
        }
    }
}

struct SpeakJob {
    utterance: UtteranceId,
    text: String,
    events: mpsc::Sender<OutputEvent>,
}

enum SpeakCmd {
    Speak(SpeakJob),
    Cancel,
}

/// Synthesis backend that "plays" utterances as paced log lines
pub struct ConsoleSynthesizer {
    cmd_tx: mpsc::UnboundedSender<SpeakCmd>,
}

impl ConsoleSynthesizer {
    /// Spawn the playback task and return the backend handle
    pub fn spawn() -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(speak_loop(cmd_rx));
        Self { cmd_tx }
    }
}

impl SynthesisBackend for ConsoleSynthesizer {
    fn speak(&mut self, utterance: UtteranceId, text: &str, events: mpsc::Sender<OutputEvent>) {
        let _ = self.cmd_tx.send(SpeakCmd::Speak(SpeakJob {
            utterance,
            text: text.to_string(),
            events,
        }));
    }

    fn cancel(&mut self) {
        let _ = self.cmd_tx.send(SpeakCmd::Cancel);
    }
}

async fn speak_loop(mut cmd_rx: mpsc::UnboundedReceiver<SpeakCmd>) {
    let mut preempted: Option<SpeakJob> = None;

    loop {
        let job = match preempted.take() {
            Some(job) => job,
            None => match cmd_rx.recv().await {
                Some(SpeakCmd::Speak(job)) => job,
                Some(SpeakCmd::Cancel) => continue,
                None => break,
            },
        };

        info!(utterance = %job.utterance, text = %job.text, "speaking");

        let wait = tokio::time::sleep(pace(&job.text));
        tokio::pin!(wait);

        loop {
            tokio::select! {
                _ = &mut wait => {
                    let _ = job.events.send(OutputEvent::Ended { utterance: job.utterance }).await;
                    break;
                }
                cmd = cmd_rx.recv() => match cmd {
                    Some(SpeakCmd::Cancel) => {
                        debug!(utterance = %job.utterance, "utterance canceled");
                        break;
                    }
                    Some(SpeakCmd::Speak(next)) => {
                        preempted = Some(next);
                        break;
                    }
                    None => return,
                },
            }
        }
    }
}

fn pace(text: &str) -> Duration {
    PACE_FLOOR + PACE_PER_CHAR * text.chars().count() as u32
}
