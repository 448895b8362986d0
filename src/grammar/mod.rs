//! Command grammar for spoken instructions
//!
//! An ordered rule set matched against normalized transcripts.
//! First rule whose keyword set hits wins; order is the tie-break.

mod rules;

pub use rules::{CommandGrammar, CommandRule, GrammarError};
