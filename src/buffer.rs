//! Response buffer: normalized output accumulated in "bunches".
//!
//! Each bunch collects raw reads until an action rule consumes it; consumed
//! bunches (the triggering text and its prompt-like noise) stay out of the
//! final result but are kept for diagnostics. Prompt matching only searches
//! the last `search_depth` bytes of the active bunch, so large outputs (full
//! routing tables) stay cheap to scan.

#[derive(Debug, Default)]
struct Bunch {
    text: String,
    consumed: bool,
}

/// Buffer for accumulating normalized output across action firings.
#[derive(Debug)]
pub struct ResponseBuffer {
    /// Sealed bunches plus the active one (always non-empty).
    bunches: Vec<Bunch>,

    /// How many bytes from the end of the active bunch to search for prompts.
    search_depth: usize,
}

impl ResponseBuffer {
    /// Create a buffer with the given tail-search depth.
    pub fn new(search_depth: usize) -> Self {
        Self {
            bunches: vec![Bunch::default()],
            search_depth,
        }
    }

    /// Append normalized text to the active bunch.
    pub fn push(&mut self, text: &str) {
        // invariant: bunches is never empty
        self.bunches.last_mut().unwrap().text.push_str(text);
    }

    /// Mark the active bunch as consumed by an action and start a new one.
    ///
    /// Consumed text is excluded from [`concat`] (the command result) but
    /// still appears in [`full`] (diagnostics).
    ///
    /// [`concat`]: ResponseBuffer::concat
    /// [`full`]: ResponseBuffer::full
    pub fn consume_bunch(&mut self) {
        self.bunches.last_mut().unwrap().consumed = true;
        self.bunches.push(Bunch::default());
    }

    /// The active bunch.
    pub fn current(&self) -> &str {
        &self.bunches.last().unwrap().text
    }

    /// The tail of the active bunch, limited to the search depth.
    pub fn tail(&self) -> &str {
        let cur = self.current();
        let mut start = cur.len().saturating_sub(self.search_depth);
        while !cur.is_char_boundary(start) {
            start += 1;
        }
        &cur[start..]
    }

    /// Concatenate the unconsumed bunches: the command's result text.
    pub fn concat(&self) -> String {
        self.bunches
            .iter()
            .filter(|b| !b.consumed)
            .map(|b| b.text.as_str())
            .collect()
    }

    /// Concatenate every bunch, consumed or not, for diagnostics.
    pub fn full(&self) -> String {
        self.bunches.iter().map(|b| b.text.as_str()).collect()
    }

    /// Total accumulated length across all bunches.
    pub fn len(&self) -> usize {
        self.bunches.iter().map(|b| b.text.len()).sum()
    }

    /// Whether nothing has been accumulated yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything and start over with one empty bunch.
    pub fn clear(&mut self) {
        self.bunches.clear();
        self.bunches.push(Bunch::default());
    }
}

impl Default for ResponseBuffer {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Normalize a raw read: strip terminal escape sequences and canonicalize
/// newlines to `\n`.
pub fn normalize(raw: &str) -> String {
    let stripped = strip_ansi_escapes::strip(raw.as_bytes());
    String::from_utf8_lossy(&stripped)
        .replace("\r\n", "\n")
        .replace('\r', "\n")
}

/// The text after the last newline (the line a prompt would sit on).
pub fn last_line(text: &str) -> &str {
    match memchr::memrchr(b'\n', text.as_bytes()) {
        Some(i) => &text[i + 1..],
        None => text,
    }
}
