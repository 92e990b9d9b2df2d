//! Command modes: named interaction states arranged in a rooted tree.
//!
//! A mode is identified by its prompt pattern and reached by sending its
//! enter commands from its parent (and left via its exit commands). Modes are
//! shared, immutable configuration; per-session resolution state (exact
//! prompts) lives on the engine instead.

mod router;

pub use router::{ModeRouter, Step};

use indexmap::IndexMap;
use regex::Regex;

use crate::error::{Error, ModeError, Result};
use crate::pattern::{self, Prompt};
use crate::rules::{ActionTable, ErrorTable};

/// A node in the command-mode tree.
#[derive(Debug, Clone)]
pub struct Mode {
    /// Mode name (e.g. "exec", "enable", "config").
    pub name: String,

    /// Prompt pattern identifying this mode.
    pub prompt: Prompt,

    /// Name of the parent mode (`None` for the root).
    pub parent: Option<String>,

    /// Commands sent to enter this mode from its parent.
    pub enter_commands: Vec<String>,

    /// Commands sent to leave this mode for its parent.
    pub exit_commands: Vec<String>,

    /// Action rules active while entering.
    pub enter_actions: Option<ActionTable>,

    /// Error rules applied while entering.
    pub enter_errors: Option<ErrorTable>,

    /// Action rules active while exiting.
    pub exit_actions: Option<ActionTable>,

    /// Error rules applied while exiting.
    pub exit_errors: Option<ErrorTable>,

    /// Strings that must NOT be in the prompt for this mode to match.
    /// Disambiguates broad patterns ("#" matches both enable and config).
    pub not_contains: Vec<String>,

    /// Resolve a per-session literal prompt by probing after entry.
    pub exact_prompt: bool,
}

impl Mode {
    /// Create a mode with the given name and prompt pattern.
    pub fn new(name: impl Into<String>, pattern: &str) -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            prompt: Prompt::pattern(pattern)?,
            parent: None,
            enter_commands: vec![],
            exit_commands: vec![],
            enter_actions: None,
            enter_errors: None,
            exit_actions: None,
            exit_errors: None,
            not_contains: vec![],
            exact_prompt: false,
        })
    }

    /// Set the parent mode.
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Add an enter command.
    pub fn with_enter(mut self, command: impl Into<String>) -> Self {
        self.enter_commands.push(command.into());
        self
    }

    /// Add an exit command.
    pub fn with_exit(mut self, command: impl Into<String>) -> Self {
        self.exit_commands.push(command.into());
        self
    }

    /// Set the action rules active while entering.
    pub fn with_enter_actions(mut self, actions: ActionTable) -> Self {
        self.enter_actions = Some(actions);
        self
    }

    /// Set the error rules applied while entering.
    pub fn with_enter_errors(mut self, errors: ErrorTable) -> Self {
        self.enter_errors = Some(errors);
        self
    }

    /// Set the action rules active while exiting.
    pub fn with_exit_actions(mut self, actions: ActionTable) -> Self {
        self.exit_actions = Some(actions);
        self
    }

    /// Set the error rules applied while exiting.
    pub fn with_exit_errors(mut self, errors: ErrorTable) -> Self {
        self.exit_errors = Some(errors);
        self
    }

    /// Add a not_contains disambiguation string.
    pub fn with_not_contains(mut self, text: impl Into<String>) -> Self {
        self.not_contains.push(text.into());
        self
    }

    /// Resolve an exact per-session prompt by probing after entry.
    pub fn with_exact_prompt(mut self) -> Self {
        self.exact_prompt = true;
        self
    }

    /// Check whether a prompt string identifies this mode.
    pub fn matches(&self, prompt: &str) -> bool {
        if self.not_contains.iter().any(|nc| prompt.contains(nc)) {
            return false;
        }
        self.prompt.is_match(prompt)
    }
}

/// A validated, rooted tree of modes.
#[derive(Debug, Clone)]
pub struct ModeTree {
    modes: IndexMap<String, Mode>,
    root: String,
}

impl ModeTree {
    /// Build a tree, validating that there is exactly one root, every parent
    /// exists, and every parent chain terminates at the root.
    pub fn new(modes: impl IntoIterator<Item = Mode>) -> Result<Self> {
        let mut map: IndexMap<String, Mode> = IndexMap::new();
        for mode in modes {
            if map.insert(mode.name.clone(), mode.clone()).is_some() {
                return Err(ModeError::InvalidTree {
                    message: format!("duplicate mode '{}'", mode.name),
                }
                .into());
            }
        }

        let mut roots = map.values().filter(|m| m.parent.is_none());
        let root = match (roots.next(), roots.next()) {
            (Some(root), None) => root.name.clone(),
            (None, _) => {
                return Err(ModeError::InvalidTree {
                    message: "no root mode (every mode has a parent)".to_string(),
                }
                .into());
            }
            (Some(a), Some(b)) => {
                return Err(ModeError::InvalidTree {
                    message: format!("multiple root modes: '{}' and '{}'", a.name, b.name),
                }
                .into());
            }
        };

        // Every parent chain must reach the root within |modes| hops.
        for mode in map.values() {
            let mut current = mode;
            for _ in 0..map.len() {
                match &current.parent {
                    None => break,
                    Some(parent) => {
                        current = map.get(parent).ok_or_else(|| ModeError::InvalidTree {
                            message: format!(
                                "mode '{}' has unknown parent '{parent}'",
                                current.name
                            ),
                        })?;
                    }
                }
            }
            if current.parent.is_some() {
                return Err(ModeError::InvalidTree {
                    message: format!("cycle in parent chain of mode '{}'", mode.name),
                }
                .into());
            }
        }

        Ok(Self { modes: map, root })
    }

    /// Look up a mode by name.
    pub fn get(&self, name: &str) -> Result<&Mode> {
        self.modes.get(name).ok_or_else(|| {
            Error::from(ModeError::UnknownMode {
                name: name.to_string(),
            })
        })
    }

    /// The root mode.
    pub fn root(&self) -> &Mode {
        &self.modes[&self.root]
    }

    /// Iterate modes in definition order.
    pub fn iter(&self) -> impl Iterator<Item = &Mode> {
        self.modes.values()
    }

    /// Number of modes in the tree.
    pub fn len(&self) -> usize {
        self.modes.len()
    }

    /// Whether the tree holds no modes (never true for a validated tree).
    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    /// The ordered list of mode names from `name` up to the root, inclusive.
    pub fn path_to_root(&self, name: &str) -> Result<Vec<String>> {
        let mut path = Vec::new();
        let mut current = self.get(name)?;
        loop {
            path.push(current.name.clone());
            match &current.parent {
                None => return Ok(path),
                Some(parent) => current = self.get(parent)?,
            }
        }
    }

    /// A prompt matching any mode's prompt, for mode discovery.
    pub fn union_prompt(&self) -> Prompt {
        let sources: Vec<String> = self
            .modes
            .values()
            .map(|m| match &m.prompt {
                Prompt::Pattern(re) => format!("(?:{})", re.as_str()),
                Prompt::Literal(lit) => format!("(?:{})", regex::escape(lit.trim_end())),
            })
            .collect();

        let combined = sources.join("|");
        let regex = Regex::new(&combined)
            .unwrap_or_else(|_| pattern::compile_prompt_pattern(r"[$#>]").unwrap());
        Prompt::from_regex(regex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn cisco_tree() -> ModeTree {
        ModeTree::new([
            Mode::new("root", r">").unwrap(),
            Mode::new("enable", r"#")
                .unwrap()
                .with_parent("root")
                .with_enter("enable")
                .with_exit("disable")
                .with_not_contains("(config)"),
            Mode::new("config", r"\(config\)#")
                .unwrap()
                .with_parent("enable")
                .with_enter("configure terminal")
                .with_exit("end"),
        ])
        .unwrap()
    }

    #[test]
    fn test_valid_tree() {
        let tree = cisco_tree();
        assert_eq!(tree.root().name, "root");
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn test_path_to_root() {
        let tree = cisco_tree();
        assert_eq!(
            tree.path_to_root("config").unwrap(),
            vec!["config", "enable", "root"]
        );
        assert_eq!(tree.path_to_root("root").unwrap(), vec!["root"]);
    }

    #[test]
    fn test_multiple_roots_rejected() {
        let err = ModeTree::new([
            Mode::new("a", r">").unwrap(),
            Mode::new("b", r"#").unwrap(),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("multiple root"));
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let err = ModeTree::new([
            Mode::new("root", r">").unwrap(),
            Mode::new("child", r"#").unwrap().with_parent("missing"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("unknown parent"));
    }

    #[test]
    fn test_cycle_rejected() {
        let err = ModeTree::new([
            Mode::new("root", r">").unwrap(),
            Mode::new("a", r"#").unwrap().with_parent("b"),
            Mode::new("b", r"\$").unwrap().with_parent("a"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_not_contains_disambiguation() {
        let tree = cisco_tree();
        let enable = tree.get("enable").unwrap();
        assert!(enable.matches("router#"));
        assert!(!enable.matches("router(config)#"));
    }

    #[test]
    fn test_union_prompt_matches_any_mode() {
        let tree = cisco_tree();
        let union = tree.union_prompt();
        assert!(union.is_match("router>"));
        assert!(union.is_match("router#"));
        assert!(union.is_match("router(config)#"));
        assert!(!union.is_match("login:"));
    }
}
