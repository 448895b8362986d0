//! Rule definitions and first-match lookup
//!
//! A rule matches when any of its keywords appears as a substring of the
//! lowercased, trimmed transcript. There is no scoring and no longest-match
//! preference: rules are tried in declaration order and the first hit wins.

use tracing::debug;

/// One recognizable instruction
#[derive(Debug, Clone)]
pub struct CommandRule {
    /// Keywords, any of which satisfies the rule
    keywords: Vec<String>,
    /// Opaque action identifier handed to the intent sink
    intent: String,
    /// Spoken reply; a rule without one dispatches silently
    response: Option<String>,
}

impl CommandRule {
    /// Create a rule. Keywords are lowercased and trimmed here so lookups
    /// stay case-insensitive regardless of how the rule was written.
    pub fn new<I, S>(intent: &str, keywords: I, response: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .collect(),
            intent: intent.to_string(),
            response: response.map(str::to_string),
        }
    }

    /// The rule's action identifier
    pub fn intent(&self) -> &str {
        &self.intent
    }

    /// The rule's spoken reply, if it has one
    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    /// Whether any keyword appears in the transcript
    fn matches(&self, transcript: &str) -> bool {
        self.keywords.iter().any(|k| transcript.contains(k.as_str()))
    }
}

/// Rule set rejected at construction time
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GrammarError {
    #[error("rule {index} ({intent:?}) has no keywords")]
    EmptyRule { index: usize, intent: String },

    #[error("rule {index} ({intent:?}) has a blank keyword that would match every utterance")]
    CatchAllRule { index: usize, intent: String },

    #[error("rule {index} has an empty intent")]
    EmptyIntent { index: usize },
}

/// Ordered, immutable set of command rules
#[derive(Debug, Clone)]
pub struct CommandGrammar {
    rules: Vec<CommandRule>,
}

impl CommandGrammar {
    /// Build a grammar, rejecting rules that could never work or that would
    /// shadow every rule after them. A misconfigured grammar must fail here
    /// rather than silently produce wrong dispatches.
    pub fn new(rules: Vec<CommandRule>) -> Result<Self, GrammarError> {
        for (index, rule) in rules.iter().enumerate() {
            if rule.intent.trim().is_empty() {
                return Err(GrammarError::EmptyIntent { index });
            }
            if rule.keywords.is_empty() {
                return Err(GrammarError::EmptyRule {
                    index,
                    intent: rule.intent.clone(),
                });
            }
            if rule.keywords.iter().any(|k| k.is_empty()) {
                return Err(GrammarError::CatchAllRule {
                    index,
                    intent: rule.intent.clone(),
                });
            }
        }

        Ok(Self { rules })
    }

    /// Number of rules in declaration order
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Find the first rule matching the transcript. The caller is expected
    /// to pass text already trimmed and lowercased; keywords were normalized
    /// at construction, so mixed-case input still matches.
    pub fn find(&self, transcript: &str) -> Option<&CommandRule> {
        let hit = self.rules.iter().find(|rule| rule.matches(transcript));

        match hit {
            Some(rule) => debug!(intent = %rule.intent, "grammar matched"),
            None => debug!(%transcript, "no grammar rule matched"),
        }

        hit
    }
}
