//! Prompt matching: compiled patterns and per-session literal prompts.

use std::fmt;

use regex::Regex;

/// A prompt a session can settle on.
///
/// Most modes declare a generic `Pattern` (e.g. `#\s*$`). When a pattern is
/// too broad to disambiguate devices, a per-session `Literal` is resolved by
/// probing and matched as an exact trailing string instead.
#[derive(Debug, Clone)]
pub enum Prompt {
    /// Compiled regex matched against the buffer tail.
    Pattern(Regex),

    /// Exact per-session prompt text, matched as a suffix
    /// (tolerant of trailing whitespace on either side).
    Literal(String),
}

impl Prompt {
    /// Compile a prompt pattern, anchoring it to the end of the buffer
    /// if the author omitted an anchor.
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::Pattern(compile_prompt_pattern(pattern)?))
    }

    /// Wrap an already-compiled regex.
    pub fn from_regex(regex: Regex) -> Self {
        Self::Pattern(regex)
    }

    /// An exact literal prompt, as probed from a live session.
    pub fn literal(text: impl Into<String>) -> Self {
        Self::Literal(text.into())
    }

    /// Check whether `text` ends in this prompt.
    pub fn is_match(&self, text: &str) -> bool {
        match self {
            Self::Pattern(re) => re.is_match(text),
            Self::Literal(lit) => text.trim_end().ends_with(lit.trim_end()),
        }
    }

    /// Find the last occurrence of this prompt in `text`.
    ///
    /// Returns byte offsets `(start, end)`; used to truncate the trailing
    /// prompt off a command result.
    pub fn find_last(&self, text: &str) -> Option<(usize, usize)> {
        match self {
            Self::Pattern(re) => re.find_iter(text).last().map(|m| (m.start(), m.end())),
            Self::Literal(lit) => {
                let needle = lit.trim_end();
                if needle.is_empty() {
                    return None;
                }
                let trimmed = text.trim_end();
                if trimmed.ends_with(needle) {
                    Some((trimmed.len() - needle.len(), text.len()))
                } else {
                    None
                }
            }
        }
    }

    /// The matched prompt text at the tail of `text`, trimmed.
    pub fn matched_text<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.find_last(text).map(|(s, e)| text[s..e].trim())
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pattern(re) => write!(f, "{}", re.as_str()),
            Self::Literal(lit) => write!(f, "{lit}"),
        }
    }
}

impl PartialEq for Prompt {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Pattern(a), Self::Pattern(b)) => a.as_str() == b.as_str(),
            (Self::Literal(a), Self::Literal(b)) => a.trim_end() == b.trim_end(),
            _ => false,
        }
    }
}

impl Eq for Prompt {}

/// Compile a prompt pattern string into a regex.
///
/// If the pattern does not already anchor to the end of the buffer,
/// a `\s*$` anchor is appended.
pub fn compile_prompt_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let pattern = if pattern.ends_with('$') {
        pattern.to_string()
    } else {
        format!("{pattern}\\s*$")
    };

    Regex::new(&pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_matches_tail() {
        let prompt = Prompt::pattern(r"#").unwrap();
        assert!(prompt.is_match("router# "));
        assert!(prompt.is_match("some output\nrouter#"));
        assert!(!prompt.is_match("router> "));
    }

    #[test]
    fn test_pattern_keeps_existing_anchor() {
        let prompt = Prompt::pattern(r"router#$").unwrap();
        assert!(prompt.is_match("router#"));
        assert!(!prompt.is_match("router# x"));
    }

    #[test]
    fn test_literal_suffix_match() {
        let prompt = Prompt::literal("switch-01# ");
        assert!(prompt.is_match("output\nswitch-01#"));
        assert!(prompt.is_match("switch-01# "));
        assert!(!prompt.is_match("switch-02# "));
    }

    #[test]
    fn test_find_last_for_truncation() {
        let prompt = Prompt::pattern(r"#\s*$").unwrap();
        let (start, _) = prompt.find_last("OK\n# ").unwrap();
        assert_eq!(&"OK\n# "[..start], "OK\n");
    }

    #[test]
    fn test_prompt_equality() {
        assert_eq!(Prompt::literal("sw# "), Prompt::literal("sw#"));
        assert_eq!(
            Prompt::pattern(r"#\s*$").unwrap(),
            Prompt::pattern(r"#\s*$").unwrap()
        );
        assert_ne!(
            Prompt::literal("#"),
            Prompt::pattern(r"#\s*$").unwrap()
        );
    }
}
