//! Action rules: ordered (pattern -> response) reactions to device output.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use regex::Regex;

/// What an action rule wants done after its pattern matched.
///
/// The engine performs the actual send; responders stay synchronous and
/// object-safe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionReply {
    /// Send this text (newline-terminated by the engine).
    Send(String),

    /// Send this text but never log it (passwords).
    SendHidden(String),

    /// React without sending anything.
    None,
}

/// Callback invoked with the bunch that matched the rule's pattern.
pub type Responder = Arc<dyn Fn(&str) -> ActionReply + Send + Sync>;

/// One (pattern, responder, execute-once) rule.
#[derive(Clone)]
pub struct ActionRule {
    pattern: Regex,
    responder: Responder,
    execute_once: bool,
}

impl ActionRule {
    /// Create a rule with an arbitrary responder.
    pub fn new(
        pattern: &str,
        responder: Responder,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            responder,
            execute_once: false,
        })
    }

    /// Mark this rule as firing at most once per table lifetime.
    pub fn once(mut self) -> Self {
        self.execute_once = true;
        self
    }

    /// The rule's pattern source text; also its identity within a table.
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Whether this rule fires at most once.
    pub fn is_execute_once(&self) -> bool {
        self.execute_once
    }

    fn matches(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

impl fmt::Debug for ActionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRule")
            .field("pattern", &self.pattern.as_str())
            .field("execute_once", &self.execute_once)
            .finish()
    }
}

/// Ordered, mergeable set of action rules.
///
/// Rules are kept in insertion order; execute-once state is tracked in a
/// matched-pattern set rather than by deleting rules, so [`extend`] can
/// propagate "already fired" state across merges.
///
/// [`extend`]: ActionTable::extend
#[derive(Debug, Clone, Default)]
pub struct ActionTable {
    rules: IndexMap<String, ActionRule>,
    matched: HashSet<String>,
}

impl ActionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a rule, keyed by its pattern text. Replaces any rule with the
    /// same pattern in place.
    pub fn insert(&mut self, rule: ActionRule) -> &mut Self {
        self.rules.insert(rule.pattern().to_string(), rule);
        self
    }

    /// Convenience: always reply with `text` when `pattern` matches.
    pub fn reply(
        &mut self,
        pattern: &str,
        text: impl Into<String>,
    ) -> Result<&mut Self, regex::Error> {
        let text = text.into();
        let rule = ActionRule::new(pattern, Arc::new(move |_| ActionReply::Send(text.clone())))?;
        Ok(self.insert(rule))
    }

    /// Convenience: reply with hidden text (passwords) when `pattern` matches.
    pub fn reply_hidden(
        &mut self,
        pattern: &str,
        text: impl Into<String>,
    ) -> Result<&mut Self, regex::Error> {
        let text = text.into();
        let rule =
            ActionRule::new(pattern, Arc::new(move |_| ActionReply::SendHidden(text.clone())))?;
        Ok(self.insert(rule))
    }

    /// Convenience: reply once, then never again for this table's lifetime.
    pub fn reply_once(
        &mut self,
        pattern: &str,
        text: impl Into<String>,
    ) -> Result<&mut Self, regex::Error> {
        let text = text.into();
        let rule = ActionRule::new(pattern, Arc::new(move |_| ActionReply::Send(text.clone())))?
            .once();
        Ok(self.insert(rule))
    }

    /// Merge another table's rules in.
    ///
    /// Patterns already present are kept unless `override_existing` is set.
    /// Matched-pattern sets are unioned either way, so an execute-once rule
    /// that fired in `other` stays fired here.
    pub fn extend(&mut self, other: &ActionTable, override_existing: bool) {
        for (pattern, rule) in &other.rules {
            if override_existing || !self.rules.contains_key(pattern) {
                self.rules.insert(pattern.clone(), rule.clone());
            }
        }
        self.matched.extend(other.matched.iter().cloned());
    }

    /// Find the first rule (insertion order) whose pattern matches `text`
    /// and is still eligible to fire. Returns the rule's pattern identity.
    pub fn match_first(&self, text: &str) -> Option<String> {
        self.rules
            .values()
            .find(|rule| {
                if rule.is_execute_once() && self.matched.contains(rule.pattern()) {
                    return false;
                }
                rule.matches(text)
            })
            .map(|rule| rule.pattern().to_string())
    }

    /// Run the responder of the rule identified by `pattern` and record it
    /// as matched.
    pub fn fire(&mut self, pattern: &str, text: &str) -> Option<ActionReply> {
        let rule = self.rules.get(pattern)?;
        let reply = (rule.responder)(text);
        self.matched.insert(pattern.to_string());
        Some(reply)
    }

    /// Whether a rule already fired at least once.
    pub fn has_matched(&self, pattern: &str) -> bool {
        self.matched.contains(pattern)
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
