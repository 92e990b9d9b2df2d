//! Detection of repeating action-rule firing sequences.

/// Flags a rule (or short rule sequence) repeating beyond a threshold.
///
/// After each recorded identifier, every combination length `L` up to
/// `max_combination_length` is checked: if the most recent
/// `max_loops` consecutive `L`-length suffix chunks are pairwise identical,
/// the history is looping. This catches period-2 oscillation (A, B, A, B, ...)
/// as well as a single rule firing over and over.
#[derive(Debug, Clone)]
pub struct LoopDetector {
    max_loops: usize,
    max_combination_length: usize,
    history: Vec<String>,
}

impl LoopDetector {
    /// Create a detector with the given thresholds.
    pub fn new(max_loops: usize, max_combination_length: usize) -> Self {
        Self {
            max_loops,
            max_combination_length,
            history: Vec::new(),
        }
    }

    /// Record a matched-rule identifier; returns `true` if the history now
    /// constitutes a loop.
    pub fn record(&mut self, id: &str) -> bool {
        self.history.push(id.to_string());
        self.has_loop()
    }

    /// The identifiers recorded so far.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Forget all recorded identifiers.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    fn has_loop(&self) -> bool {
        for len in 1..=self.max_combination_length {
            let needed = len * self.max_loops;
            if self.history.len() < needed {
                continue;
            }
            let tail = &self.history[self.history.len() - needed..];
            let first = &tail[..len];
            if tail.chunks(len).all(|chunk| chunk == first) {
                return true;
            }
        }
        false
    }
}
