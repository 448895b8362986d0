//! Recognition session state machine
//!
//! Drives the listen → interpret → reply cycle: `Idle → Starting →
//! Listening → Processing → Speaking → Idle`, with `Error` reachable from
//! any pre-reply state. Transitions are driven exclusively by channel
//! events; the controller is the sole owner of the session slot, so the
//! single-flight guarantee reduces to "there is one `Option`".

use std::time::Instant;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::events::{AssistantEvent, IntentDispatch, RecognitionErrorKind, RecognitionState};
use crate::grammar::CommandGrammar;
use crate::speech::{
    InputError, InputEvent, InputEventKind, OutputEvent, SessionId, SpeakPriority,
    SpeechInputChannel, SpeechOutputChannel, UtteranceId,
};

/// Spoken when the capture closed without hearing anything
const NO_SPEECH_REPLY: &str = "I didn't hear anything. Please try again.";

/// Spoken when no grammar rule matched the transcript
const NO_MATCH_REPLY: &str = "Sorry, I didn't catch a command. Try asking about our hours or menu.";

/// Spoken on a generic recognition failure
const RECOGNITION_REPLY: &str = "Something went wrong. Please try again.";

/// Spoken once when the feature disables itself
const UNAVAILABLE_REPLY: &str = "Voice commands aren't available right now.";

/// Why an activation request was refused
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ActivateError {
    #[error("a listening session is already in progress")]
    AlreadyActive,

    #[error("voice commands are unavailable: {0}")]
    Unavailable(RecognitionErrorKind),
}

/// Requests from the host's activation control
#[derive(Debug)]
pub enum ControlRequest {
    /// Start a listening session; the outcome is reported on the reply slot
    Activate {
        reply: oneshot::Sender<Result<SessionId, ActivateError>>,
    },

    /// Abandon the in-progress session, if any
    Cancel,
}

/// One listening attempt, alive from activation until the cycle completes
#[derive(Debug)]
struct RecognitionSession {
    id: SessionId,
    state: RecognitionState,
    transcript: Option<String>,
    error: Option<RecognitionErrorKind>,
    /// Reply utterance whose end returns the session to idle
    utterance: Option<UtteranceId>,
    started_at: Instant,
}

impl RecognitionSession {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            state: RecognitionState::Starting,
            transcript: None,
            error: None,
            utterance: None,
            started_at: Instant::now(),
        }
    }
}

/// The state machine mediating channels, grammar, and host sinks
pub struct VoiceAssistantController {
    grammar: CommandGrammar,
    input: SpeechInputChannel,
    output: SpeechOutputChannel,
    /// UI sink: every transition is published here
    notice_tx: broadcast::Sender<AssistantEvent>,
    /// Host sink for matched commands
    intent_tx: mpsc::Sender<IntentDispatch>,
    /// The single session slot
    session: Option<RecognitionSession>,
    next_session: u64,
    /// Set once on a fatal failure; never cleared
    disabled: Option<RecognitionErrorKind>,
}

impl VoiceAssistantController {
    pub fn new(
        grammar: CommandGrammar,
        input: SpeechInputChannel,
        output: SpeechOutputChannel,
        notice_tx: broadcast::Sender<AssistantEvent>,
        intent_tx: mpsc::Sender<IntentDispatch>,
    ) -> Self {
        Self {
            grammar,
            input,
            output,
            notice_tx,
            intent_tx,
            session: None,
            next_session: 1,
            disabled: None,
        }
    }

    /// Current state; `Idle` whenever no session exists
    pub fn state(&self) -> RecognitionState {
        self.session
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(RecognitionState::Idle)
    }

    /// Normalized transcript of the live session, once one was received
    pub fn transcript(&self) -> Option<&str> {
        self.session.as_ref().and_then(|s| s.transcript.as_deref())
    }

    /// Failure recorded on the live session, if any
    pub fn error_kind(&self) -> Option<RecognitionErrorKind> {
        self.session.as_ref().and_then(|s| s.error)
    }

    /// Capability check, run once before the event loop. A platform without
    /// a recognition service disables the engine immediately; missing
    /// synthesis only degrades feedback to visual.
    pub fn prepare(&mut self) {
        if !self.input.is_supported() {
            self.disable(RecognitionErrorKind::Unsupported);
        }
        if !self.output.is_supported() {
            warn!("no synthesis service, spoken feedback disabled");
        }
    }

    /// Run the controller, processing activation requests and channel events
    pub async fn run(
        &mut self,
        mut control_rx: mpsc::Receiver<ControlRequest>,
        mut input_rx: mpsc::Receiver<InputEvent>,
        mut output_rx: mpsc::Receiver<OutputEvent>,
    ) {
        self.prepare();
        info!(state = %self.state(), "voice assistant controller started");

        loop {
            tokio::select! {
                request = control_rx.recv() => match request {
                    Some(request) => self.handle_control(request),
                    None => break,
                },
                Some(event) = input_rx.recv() => self.handle_input(event),
                Some(event) = output_rx.recv() => self.handle_output(event),
            }
        }

        info!("voice assistant controller stopped");
    }

    fn handle_control(&mut self, request: ControlRequest) {
        match request {
            ControlRequest::Activate { reply } => {
                let _ = reply.send(self.activate());
            }
            ControlRequest::Cancel => self.cancel(),
        }
    }

    /// Start a listening session. Fails without side effects when one is
    /// already in progress or the feature is disabled.
    pub fn activate(&mut self) -> Result<SessionId, ActivateError> {
        if let Some(reason) = self.disabled {
            return Err(ActivateError::Unavailable(reason));
        }

        if self.session.is_some() {
            debug!(state = %self.state(), "activation rejected, session in progress");
            return Err(ActivateError::AlreadyActive);
        }

        let id = SessionId(self.next_session);
        self.next_session += 1;

        match self.input.start(id) {
            Ok(()) => {
                self.session = Some(RecognitionSession::new(id));
                info!(session = %id, "session started");
                self.notify(RecognitionState::Starting);
                Ok(id)
            }
            Err(InputError::Unsupported) => {
                self.disable(RecognitionErrorKind::Unsupported);
                Err(ActivateError::Unavailable(RecognitionErrorKind::Unsupported))
            }
            Err(InputError::AlreadyActive) => Err(ActivateError::AlreadyActive),
        }
    }

    /// Abandon the in-progress session without matching or replying.
    /// Stale events from it are rejected by their session tag afterwards.
    pub fn cancel(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        info!(session = %session.id, from = %session.state, "session canceled");
        self.input.stop();
        self.output.cancel_all();
        self.notify(RecognitionState::Idle);
    }

    /// Process a capture event. Anything not tagged with the live session
    /// is a stale callback from an abandoned capture and is dropped.
    pub fn handle_input(&mut self, event: InputEvent) {
        let Some(current) = self.session.as_ref().map(|s| s.id) else {
            debug!(session = %event.session, "dropping event, no session active");
            return;
        };
        if event.session != current {
            debug!(session = %event.session, %current, "dropping stale event");
            return;
        }

        match event.kind {
            InputEventKind::Started => {
                if self.state() == RecognitionState::Starting {
                    self.set_state(RecognitionState::Listening);
                }
            }
            InputEventKind::Result { transcript } => {
                self.input.complete(current);
                self.set_state(RecognitionState::Processing);
                self.process_transcript(transcript);
            }
            InputEventKind::Ended => {
                self.input.complete(current);
                self.fail(RecognitionErrorKind::NoSpeech);
            }
            InputEventKind::Failed { kind } => {
                self.input.complete(current);
                self.fail(kind);
            }
        }
    }

    /// Process a synthesis completion. The session returns to idle only
    /// when the utterance it was waiting for is the one that ended.
    pub fn handle_output(&mut self, event: OutputEvent) {
        let OutputEvent::Ended { utterance } = event;

        if !self.output.note_ended(utterance) {
            return;
        }

        let awaited = self.session.as_ref().and_then(|s| s.utterance);
        if awaited == Some(utterance) {
            self.finish();
        }
    }

    /// Match the transcript and produce the reply
    fn process_transcript(&mut self, raw: String) {
        let transcript = raw.trim().to_lowercase();
        info!(%transcript, "utterance transcribed");

        let matched = self
            .grammar
            .find(&transcript)
            .map(|rule| (rule.intent().to_owned(), rule.response().map(str::to_owned)));

        if let Some(session) = self.session.as_mut() {
            session.transcript = Some(transcript.clone());
        }

        let reply = match matched {
            Some((intent, response)) => {
                debug!(%intent, "dispatching intent");
                let _ = self.intent_tx.try_send(IntentDispatch { intent, transcript });
                response
            }
            None => Some(NO_MATCH_REPLY.to_string()),
        };

        let Some(text) = reply else {
            // matched a silent rule, nothing to wait for
            self.finish();
            return;
        };

        match self.output.speak(&text, SpeakPriority::InterruptCurrent) {
            Some(utterance) => {
                if let Some(session) = self.session.as_mut() {
                    session.utterance = Some(utterance);
                }
                self.set_state(RecognitionState::Speaking);
            }
            None => self.finish(),
        }
    }

    /// Record a failed attempt, speak the fallback, and let the speech end
    /// (or its absence) return the engine to idle
    fn fail(&mut self, kind: RecognitionErrorKind) {
        warn!(%kind, "listening attempt failed");

        if let Some(session) = self.session.as_mut() {
            session.error = Some(kind);
        }
        if kind.is_fatal() {
            self.disable(kind);
        }
        self.set_state(RecognitionState::Error);

        match self.output.speak(fallback_reply(kind), SpeakPriority::InterruptCurrent) {
            Some(utterance) => {
                if let Some(session) = self.session.as_mut() {
                    session.utterance = Some(utterance);
                }
            }
            None => self.finish(),
        }
    }

    /// Disable the feature for the rest of the process lifetime.
    /// The unavailability notice is published exactly once.
    fn disable(&mut self, reason: RecognitionErrorKind) {
        if self.disabled.is_some() {
            return;
        }
        self.disabled = Some(reason);
        warn!(%reason, "voice commands disabled");
        let _ = self.notice_tx.send(AssistantEvent::Unavailable { reason });
    }

    /// Drop the session and report idle
    fn finish(&mut self) {
        if let Some(session) = self.session.take() {
            let duration_ms = session.started_at.elapsed().as_millis() as u64;
            info!(
                session = %session.id,
                duration_ms = duration_ms,
                error = ?session.error,
                "session finished"
            );
        }
        self.notify(RecognitionState::Idle);
    }

    fn set_state(&mut self, to: RecognitionState) {
        if let Some(session) = self.session.as_mut() {
            let from = session.state;
            session.state = to;
            info!(%from, %to, "state transition");
        }
        self.notify(to);
    }

    fn notify(&self, state: RecognitionState) {
        let _ = self
            .notice_tx
            .send(AssistantEvent::StateChanged { state });
    }
}

fn fallback_reply(kind: RecognitionErrorKind) -> &'static str {
    match kind {
        RecognitionErrorKind::NoSpeech => NO_SPEECH_REPLY,
        RecognitionErrorKind::Recognition => RECOGNITION_REPLY,
        RecognitionErrorKind::Unsupported | RecognitionErrorKind::PermissionDenied => {
            UNAVAILABLE_REPLY
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::grammar::CommandRule;
    use crate::speech::{RecognitionBackend, SynthesisBackend};

    type CallLog = Arc<Mutex<Vec<String>>>;

    struct TestRecognizer {
        calls: CallLog,
    }

    impl RecognitionBackend for TestRecognizer {
        fn start(&mut self, session: SessionId, _events: mpsc::Sender<InputEvent>) {
            self.calls.lock().unwrap().push(format!("start {session}"));
        }

        fn cancel(&mut self) {
            self.calls.lock().unwrap().push("cancel".to_string());
        }
    }

    struct TestSynthesizer {
        calls: CallLog,
    }

    impl SynthesisBackend for TestSynthesizer {
        fn speak(&mut self, utterance: UtteranceId, text: &str, _events: mpsc::Sender<OutputEvent>) {
            self.calls.lock().unwrap().push(format!("speak {utterance} {text}"));
        }

        fn cancel(&mut self) {
            self.calls.lock().unwrap().push("cancel".to_string());
        }
    }

    struct Harness {
        controller: VoiceAssistantController,
        notices: broadcast::Receiver<AssistantEvent>,
        intents: mpsc::Receiver<IntentDispatch>,
        capture_calls: CallLog,
        speech_calls: CallLog,
    }

    impl Harness {
        /// Drain every queued notice
        fn notices(&mut self) -> Vec<AssistantEvent> {
            let mut seen = Vec::new();
            while let Ok(event) = self.notices.try_recv() {
                seen.push(event);
            }
            seen
        }

        fn states(&mut self) -> Vec<RecognitionState> {
            self.notices()
                .into_iter()
                .filter_map(|event| match event {
                    AssistantEvent::StateChanged { state } => Some(state),
                    AssistantEvent::Unavailable { .. } => None,
                })
                .collect()
        }

        fn spoken(&self) -> Vec<String> {
            self.speech_calls.lock().unwrap().clone()
        }
    }

    fn test_grammar() -> CommandGrammar {
        CommandGrammar::new(vec![
            CommandRule::new("SHOW_HOURS", ["hours"], Some("We're open nine to five")),
            CommandRule::new("START_ORDER", ["order"], None),
        ])
        .unwrap()
    }

    fn harness_with(recognition: bool, synthesis: bool) -> Harness {
        let capture_calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        let speech_calls: CallLog = Arc::new(Mutex::new(Vec::new()));

        let (input_tx, _input_rx) = mpsc::channel(16);
        let input_backend: Option<Box<dyn RecognitionBackend>> = recognition.then(|| {
            Box::new(TestRecognizer {
                calls: Arc::clone(&capture_calls),
            }) as Box<dyn RecognitionBackend>
        });
        let input = SpeechInputChannel::new(input_backend, input_tx);

        let (output_tx, _output_rx) = mpsc::channel(16);
        let output_backend: Option<Box<dyn SynthesisBackend>> = synthesis.then(|| {
            Box::new(TestSynthesizer {
                calls: Arc::clone(&speech_calls),
            }) as Box<dyn SynthesisBackend>
        });
        let output = SpeechOutputChannel::new(output_backend, output_tx);

        let (notice_tx, notices) = broadcast::channel(64);
        let (intent_tx, intents) = mpsc::channel(16);

        Harness {
            controller: VoiceAssistantController::new(
                test_grammar(),
                input,
                output,
                notice_tx,
                intent_tx,
            ),
            notices,
            intents,
            capture_calls,
            speech_calls,
        }
    }

    fn harness() -> Harness {
        harness_with(true, true)
    }

    fn input(session: SessionId, kind: InputEventKind) -> InputEvent {
        InputEvent { session, kind }
    }

    #[test]
    fn test_initial_state() {
        let h = harness();
        assert_eq!(h.controller.state(), RecognitionState::Idle);
    }

    #[test]
    fn test_matched_command_cycle() {
        let mut h = harness();

        let id = h.controller.activate().unwrap();
        h.controller.handle_input(input(id, InputEventKind::Started));
        h.controller.handle_input(input(
            id,
            InputEventKind::Result {
                transcript: "  What are your HOURS today?".to_string(),
            },
        ));

        assert_eq!(h.controller.state(), RecognitionState::Speaking);
        assert_eq!(h.controller.transcript(), Some("what are your hours today?"));
        assert_eq!(
            h.states(),
            [
                RecognitionState::Starting,
                RecognitionState::Listening,
                RecognitionState::Processing,
                RecognitionState::Speaking,
            ]
        );

        let dispatch = h.intents.try_recv().unwrap();
        assert_eq!(dispatch.intent, "SHOW_HOURS");
        assert_eq!(dispatch.transcript, "what are your hours today?");

        assert_eq!(h.spoken(), ["speak 1 We're open nine to five"]);

        h.controller
            .handle_output(OutputEvent::Ended { utterance: UtteranceId(1) });
        assert_eq!(h.controller.state(), RecognitionState::Idle);
        assert_eq!(h.states(), [RecognitionState::Idle]);
    }

    #[test]
    fn test_reactivation_while_active_is_rejected() {
        let mut h = harness();

        let id = h.controller.activate().unwrap();
        h.controller.handle_input(input(id, InputEventKind::Started));
        h.notices();

        let err = h.controller.activate().unwrap_err();
        assert_eq!(err, ActivateError::AlreadyActive);

        // the in-progress session is untouched
        assert_eq!(h.controller.state(), RecognitionState::Listening);
        assert!(h.states().is_empty());
        assert_eq!(h.capture_calls.lock().unwrap().as_slice(), ["start 1"]);
    }

    #[test]
    fn test_no_speech_recovers() {
        let mut h = harness();

        let id = h.controller.activate().unwrap();
        h.controller.handle_input(input(id, InputEventKind::Started));
        h.controller.handle_input(input(id, InputEventKind::Ended));

        assert_eq!(h.controller.state(), RecognitionState::Error);
        assert_eq!(
            h.controller.error_kind(),
            Some(RecognitionErrorKind::NoSpeech)
        );
        assert_eq!(h.spoken(), [format!("speak 1 {NO_SPEECH_REPLY}")]);

        h.controller
            .handle_output(OutputEvent::Ended { utterance: UtteranceId(1) });
        assert_eq!(h.controller.state(), RecognitionState::Idle);

        // per-attempt failure: the next activation is allowed
        assert!(h.controller.activate().is_ok());
    }

    #[test]
    fn test_no_match_speaks_fallback_without_dispatch() {
        let mut h = harness();

        let id = h.controller.activate().unwrap();
        h.controller.handle_input(input(id, InputEventKind::Started));
        h.controller.handle_input(input(
            id,
            InputEventKind::Result {
                transcript: "turn off the lights".to_string(),
            },
        ));

        assert_eq!(h.controller.state(), RecognitionState::Speaking);
        assert!(h.intents.try_recv().is_err());
        assert_eq!(h.spoken(), [format!("speak 1 {NO_MATCH_REPLY}")]);
    }

    #[test]
    fn test_silent_rule_dispatches_and_goes_idle() {
        let mut h = harness();

        let id = h.controller.activate().unwrap();
        h.controller.handle_input(input(id, InputEventKind::Started));
        h.controller.handle_input(input(
            id,
            InputEventKind::Result {
                transcript: "order a latte".to_string(),
            },
        ));

        assert_eq!(h.controller.state(), RecognitionState::Idle);
        assert_eq!(h.intents.try_recv().unwrap().intent, "START_ORDER");
        assert!(h.spoken().is_empty());
    }

    #[test]
    fn test_unsupported_platform_disables_once() {
        let mut h = harness_with(false, true);
        h.controller.prepare();

        let notices = h.notices();
        assert!(matches!(
            notices.as_slice(),
            [AssistantEvent::Unavailable {
                reason: RecognitionErrorKind::Unsupported
            }]
        ));

        for _ in 0..2 {
            let err = h.controller.activate().unwrap_err();
            assert_eq!(
                err,
                ActivateError::Unavailable(RecognitionErrorKind::Unsupported)
            );
        }

        // no further notices, no channel activity
        assert!(h.notices().is_empty());
        assert!(h.capture_calls.lock().unwrap().is_empty());
        assert!(h.spoken().is_empty());
    }

    #[test]
    fn test_permission_denied_is_fatal() {
        let mut h = harness();

        let id = h.controller.activate().unwrap();
        h.controller.handle_input(input(id, InputEventKind::Started));
        h.controller.handle_input(input(
            id,
            InputEventKind::Failed {
                kind: RecognitionErrorKind::PermissionDenied,
            },
        ));

        assert_eq!(h.controller.state(), RecognitionState::Error);
        assert_eq!(h.spoken(), [format!("speak 1 {UNAVAILABLE_REPLY}")]);

        h.controller
            .handle_output(OutputEvent::Ended { utterance: UtteranceId(1) });
        assert_eq!(h.controller.state(), RecognitionState::Idle);

        let err = h.controller.activate().unwrap_err();
        assert_eq!(
            err,
            ActivateError::Unavailable(RecognitionErrorKind::PermissionDenied)
        );

        // unavailability was published exactly once
        let unavailable = h
            .notices()
            .into_iter()
            .filter(|e| matches!(e, AssistantEvent::Unavailable { .. }))
            .count();
        assert_eq!(unavailable, 1);
    }

    #[test]
    fn test_recognition_error_recovers() {
        let mut h = harness();

        let id = h.controller.activate().unwrap();
        h.controller.handle_input(input(id, InputEventKind::Started));
        h.controller.handle_input(input(
            id,
            InputEventKind::Failed {
                kind: RecognitionErrorKind::Recognition,
            },
        ));

        h.controller
            .handle_output(OutputEvent::Ended { utterance: UtteranceId(1) });
        assert!(h.controller.activate().is_ok());
    }

    #[test]
    fn test_cancel_stops_capture_without_reply() {
        let mut h = harness();

        let id = h.controller.activate().unwrap();
        h.controller.handle_input(input(id, InputEventKind::Started));
        h.notices();

        h.controller.cancel();
        assert_eq!(h.controller.state(), RecognitionState::Idle);
        assert_eq!(h.states(), [RecognitionState::Idle]);
        assert_eq!(
            h.capture_calls.lock().unwrap().as_slice(),
            ["start 1", "cancel"]
        );
        assert!(h.spoken().is_empty());
    }

    #[test]
    fn test_stale_result_after_cancel_is_ignored() {
        let mut h = harness();

        let id = h.controller.activate().unwrap();
        h.controller.handle_input(input(id, InputEventKind::Started));
        h.controller.cancel();
        h.notices();

        h.controller.handle_input(input(
            id,
            InputEventKind::Result {
                transcript: "what are your hours".to_string(),
            },
        ));

        assert_eq!(h.controller.state(), RecognitionState::Idle);
        assert!(h.states().is_empty());
        assert!(h.intents.try_recv().is_err());
        assert!(h.spoken().is_empty());
    }

    #[test]
    fn test_stale_result_after_reactivation_is_ignored() {
        let mut h = harness();

        let first = h.controller.activate().unwrap();
        h.controller.cancel();
        let second = h.controller.activate().unwrap();
        assert_ne!(first, second);
        h.controller.handle_input(input(second, InputEventKind::Started));
        h.notices();

        // a straggler from the canceled capture must not drive the new session
        h.controller.handle_input(input(
            first,
            InputEventKind::Result {
                transcript: "what are your hours".to_string(),
            },
        ));
        assert_eq!(h.controller.state(), RecognitionState::Listening);
        assert!(h.intents.try_recv().is_err());

        h.controller.handle_input(input(
            second,
            InputEventKind::Result {
                transcript: "what are your hours".to_string(),
            },
        ));
        assert_eq!(h.controller.state(), RecognitionState::Speaking);
        assert_eq!(h.intents.try_recv().unwrap().intent, "SHOW_HOURS");
    }

    #[test]
    fn test_stale_speech_end_is_ignored() {
        let mut h = harness();

        let id = h.controller.activate().unwrap();
        h.controller.handle_input(input(id, InputEventKind::Started));
        h.controller.handle_input(input(
            id,
            InputEventKind::Result {
                transcript: "hours".to_string(),
            },
        ));
        assert_eq!(h.controller.state(), RecognitionState::Speaking);

        // an end report for an utterance we never started waiting on
        h.controller
            .handle_output(OutputEvent::Ended { utterance: UtteranceId(99) });
        assert_eq!(h.controller.state(), RecognitionState::Speaking);
    }

    #[test]
    fn test_no_synthesis_degrades_to_visual() {
        let mut h = harness_with(true, false);
        h.controller.prepare();
        h.notices();

        let id = h.controller.activate().unwrap();
        h.controller.handle_input(input(id, InputEventKind::Started));
        h.controller.handle_input(input(
            id,
            InputEventKind::Result {
                transcript: "what are your hours".to_string(),
            },
        ));

        // no utterance to wait for: the cycle completes immediately
        assert_eq!(h.controller.state(), RecognitionState::Idle);
        assert_eq!(h.intents.try_recv().unwrap().intent, "SHOW_HOURS");
        assert_eq!(
            h.states(),
            [
                RecognitionState::Starting,
                RecognitionState::Listening,
                RecognitionState::Processing,
                RecognitionState::Idle,
            ]
        );
    }

    #[test]
    fn test_no_synthesis_error_still_recovers() {
        let mut h = harness_with(true, false);
        h.controller.prepare();

        let id = h.controller.activate().unwrap();
        h.controller.handle_input(input(id, InputEventKind::Started));
        h.controller.handle_input(input(id, InputEventKind::Ended));

        assert_eq!(h.controller.state(), RecognitionState::Idle);
        assert!(h.controller.activate().is_ok());
    }

    /// Full loop with scripted backends: activation request in, intent and
    /// idle notice out.
    #[tokio::test]
    async fn test_run_loop_end_to_end() {
        struct ScriptedRecognizer;

        impl RecognitionBackend for ScriptedRecognizer {
            fn start(&mut self, session: SessionId, events: mpsc::Sender<InputEvent>) {
                let _ = events.try_send(InputEvent {
                    session,
                    kind: InputEventKind::Started,
                });
                let _ = events.try_send(InputEvent {
                    session,
                    kind: InputEventKind::Result {
                        transcript: "what are your hours".to_string(),
                    },
                });
            }

            fn cancel(&mut self) {}
        }

        struct InstantSynthesizer;

        impl SynthesisBackend for InstantSynthesizer {
            fn speak(
                &mut self,
                utterance: UtteranceId,
                _text: &str,
                events: mpsc::Sender<OutputEvent>,
            ) {
                let _ = events.try_send(OutputEvent::Ended { utterance });
            }

            fn cancel(&mut self) {}
        }

        let (input_tx, input_rx) = mpsc::channel(16);
        let (output_tx, output_rx) = mpsc::channel(16);
        let (notice_tx, mut notice_rx) = broadcast::channel(64);
        let (intent_tx, mut intent_rx) = mpsc::channel(16);
        let (control_tx, control_rx) = mpsc::channel(4);

        let mut controller = VoiceAssistantController::new(
            test_grammar(),
            SpeechInputChannel::new(Some(Box::new(ScriptedRecognizer)), input_tx),
            SpeechOutputChannel::new(Some(Box::new(InstantSynthesizer)), output_tx),
            notice_tx,
            intent_tx,
        );

        let loop_task = tokio::spawn(async move {
            controller.run(control_rx, input_rx, output_rx).await;
        });

        let (reply_tx, reply_rx) = oneshot::channel();
        control_tx
            .send(ControlRequest::Activate { reply: reply_tx })
            .await
            .unwrap();
        assert!(reply_rx.await.unwrap().is_ok());

        let dispatch = intent_rx.recv().await.unwrap();
        assert_eq!(dispatch.intent, "SHOW_HOURS");

        let mut saw_idle = false;
        while let Ok(event) = notice_rx.recv().await {
            if matches!(
                event,
                AssistantEvent::StateChanged {
                    state: RecognitionState::Idle
                }
            ) {
                saw_idle = true;
                break;
            }
        }
        assert!(saw_idle);

        drop(control_tx);
        loop_task.await.unwrap();
    }
}
