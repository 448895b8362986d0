//! Speech channel wrappers
//!
//! The input channel captures one utterance at a time from a recognition
//! backend; the output channel serializes synthesis with a single pending
//! slot. Both report through tagged events so the controller can discard
//! callbacks from work it has already abandoned.

mod console;
mod input;
mod output;

pub use console::{ConsoleRecognizer, ConsoleSynthesizer};
pub use input::{
    InputError, InputEvent, InputEventKind, RecognitionBackend, SessionId, SpeechInputChannel,
};
pub use output::{OutputEvent, SpeakPriority, SpeechOutputChannel, SynthesisBackend, UtteranceId};
