//! Error rules: ordered (pattern -> failure) mappings over command output.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use regex::Regex;

use crate::error::{EngineError, Error};

/// Context handed to custom error constructors.
#[derive(Debug)]
pub struct FailureContext<'a> {
    /// The command whose output matched.
    pub command: &'a str,

    /// The pattern that matched.
    pub pattern: &'a str,

    /// The full accumulated output.
    pub output: &'a str,
}

/// What to raise when an error rule matches.
#[derive(Clone)]
pub enum ErrorResponse {
    /// Raise `EngineError::CommandFailed` with this message.
    Message(String),

    /// Build a specific error directly (device-specific failure types).
    Custom(Arc<dyn Fn(&FailureContext<'_>) -> Error + Send + Sync>),
}

impl fmt::Debug for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(m) => f.debug_tuple("Message").field(m).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// One (pattern, failure) rule.
#[derive(Debug, Clone)]
pub struct ErrorRule {
    pattern: Regex,
    response: ErrorResponse,
}

impl ErrorRule {
    /// Create a rule raising `CommandFailed` with `message`.
    pub fn message(
        pattern: &str,
        message: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            response: ErrorResponse::Message(message.into()),
        })
    }

    /// Create a rule raising a custom error.
    pub fn custom(
        pattern: &str,
        build: Arc<dyn Fn(&FailureContext<'_>) -> Error + Send + Sync>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            response: ErrorResponse::Custom(build),
        })
    }

    /// The rule's pattern source text; also its identity within a table.
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

/// Ordered, mergeable set of error rules. First match wins.
#[derive(Debug, Clone, Default)]
pub struct ErrorTable {
    rules: IndexMap<String, ErrorRule>,
}

impl ErrorTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a rule, keyed by its pattern text.
    pub fn insert(&mut self, rule: ErrorRule) -> &mut Self {
        self.rules.insert(rule.pattern().to_string(), rule);
        self
    }

    /// Convenience: raise `CommandFailed` with `message` when `pattern`
    /// matches.
    pub fn fail_with(
        &mut self,
        pattern: &str,
        message: impl Into<String>,
    ) -> Result<&mut Self, regex::Error> {
        let rule = ErrorRule::message(pattern, message)?;
        Ok(self.insert(rule))
    }

    /// Merge another table's rules in; existing patterns are kept unless
    /// `override_existing` is set.
    pub fn extend(&mut self, other: &ErrorTable, override_existing: bool) {
        for (pattern, rule) in &other.rules {
            if override_existing || !self.rules.contains_key(pattern) {
                self.rules.insert(pattern.clone(), rule.clone());
            }
        }
    }

    /// Apply the table to a command's final output. Returns the first
    /// matching rule's error, if any.
    pub fn check(&self, command: &str, output: &str) -> Option<Error> {
        let rule = self.rules.values().find(|r| r.pattern.is_match(output))?;

        let error = match &rule.response {
            ErrorResponse::Message(message) => EngineError::CommandFailed {
                command: command.to_string(),
                message: message.clone(),
                pattern: rule.pattern().to_string(),
                output: output.to_string(),
            }
            .into(),
            ErrorResponse::Custom(build) => build(&FailureContext {
                command,
                pattern: rule.pattern(),
                output,
            }),
        };

        Some(error)
    }

    /// Number of rules in the table.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the table holds no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
