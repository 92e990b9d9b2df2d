//! Command value: one instruction for the expect engine.

use std::time::Duration;

use crate::pattern::Prompt;
use crate::rules::{ActionTable, ErrorTable};

/// One instruction to send to a session.
///
/// Everything beyond the literal text is optional: the expected prompt
/// defaults to the session's cached prompt, and action/error tables default
/// to whatever the current mode carries.
#[derive(Debug, Clone, Default)]
pub struct Command {
    /// Literal text to send (line terminator appended by the engine).
    pub text: String,

    /// Explicit expected prompt; `None` falls back to the cached prompt.
    pub prompt: Option<Prompt>,

    /// Action rules active for this command.
    pub actions: Option<ActionTable>,

    /// Error rules applied to the final output.
    pub errors: Option<ErrorTable>,

    /// Feed matched action rules into the loop detector.
    pub detect_loops: bool,

    /// Drain stale buffered input before sending.
    pub drain_first: bool,

    /// Per-read timeout override for this command.
    pub timeout: Option<Duration>,
}

impl Command {
    /// Create a command for the given text.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// An empty command: just the line terminator, used to probe prompts.
    pub fn probe() -> Self {
        Self::new("")
    }

    /// Set the explicit expected prompt.
    pub fn with_prompt(mut self, prompt: Prompt) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Set the action table.
    pub fn with_actions(mut self, actions: ActionTable) -> Self {
        self.actions = Some(actions);
        self
    }

    /// Set the error table.
    pub fn with_errors(mut self, errors: ErrorTable) -> Self {
        self.errors = Some(errors);
        self
    }

    /// Enable loop detection over this command's action firings.
    pub fn detect_loops(mut self) -> Self {
        self.detect_loops = true;
        self
    }

    /// Drain stale input before sending.
    pub fn drain_first(mut self) -> Self {
        self.drain_first = true;
        self
    }

    /// Override the per-read timeout for this command.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let cmd = Command::new("show version");
        assert_eq!(cmd.text, "show version");
        assert!(cmd.prompt.is_none());
        assert!(!cmd.detect_loops);
        assert!(!cmd.drain_first);
    }

    #[test]
    fn test_probe_is_empty() {
        assert_eq!(Command::probe().text, "");
    }

    #[test]
    fn test_builder_chain() {
        let cmd = Command::new("reload")
            .with_prompt(Prompt::pattern(r"#").unwrap())
            .detect_loops()
            .drain_first()
            .with_timeout(Duration::from_secs(5));
        assert!(cmd.prompt.is_some());
        assert!(cmd.detect_loops);
        assert!(cmd.drain_first);
        assert_eq!(cmd.timeout, Some(Duration::from_secs(5)));
    }
}
