//! Merges short sentences before they are sent to synthesis.
//!
//! Every synthesis call has a fixed cost, so sentences are accumulated until
//! the buffer holds at least `min_chars` characters.

use tracing::debug;

pub const DEFAULT_MIN_CHARS: usize = 15;

#[derive(Debug)]
pub struct SentenceBuffer {
    text: String,
    min_chars: usize,
}

impl SentenceBuffer {
    pub fn new(min_chars: usize) -> Self {
        Self {
            text: String::new(),
            min_chars,
        }
    }

    /// Add a sentence; returns the buffered text once the threshold is reached.
    pub fn accept(&mut self, sentence: &str) -> Option<String> {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            return None;
        }

        if !self.text.is_empty() {
            self.text.push(' ');
        }
        self.text.push_str(sentence);

        let len = self.text.chars().count();
        if len >= self.min_chars {
            debug!("Buffer is long enough ({len} chars), flushing");
            return self.flush();
        }
        None
    }

    /// Take the buffered text, leaving the buffer empty.
    pub fn flush(&mut self) -> Option<String> {
        let text = std::mem::take(&mut self.text);
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }

    /// End-of-utterance flush, regardless of the threshold.
    pub fn force_flush(&mut self) -> Option<String> {
        if !self.text.is_empty() {
            debug!("Force-flushing {} buffered chars", self.text.chars().count());
        }
        self.flush()
    }
}

impl Default for SentenceBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_CHARS)
    }
}
