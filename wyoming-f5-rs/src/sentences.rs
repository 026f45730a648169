//! Incremental sentence boundary detection.
//!
//! Text arrives in arbitrary fragments. A sentence is complete once its
//! terminal punctuation (`.`, `!`, `?`, `…`, optionally followed by closing
//! quotes or brackets) is followed by whitespace. Anything after the last
//! boundary stays pending until more text arrives or `finish` is called.

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '…')
}

fn is_closing(c: char) -> bool {
    matches!(c, '"' | '\'' | '»' | '”' | ')' | ']')
}

#[derive(Debug, Default)]
pub struct SentenceBoundaryDetector {
    pending: String,
}

impl SentenceBoundaryDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment and return every sentence it completed, in order.
    pub fn add_chunk(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);

        let mut sentences = Vec::new();
        let mut start = 0;
        let mut chars = self.pending.char_indices().peekable();

        while let Some((i, c)) = chars.next() {
            if !is_terminal(c) {
                continue;
            }

            let mut end = i + c.len_utf8();
            while let Some(&(j, next)) = chars.peek() {
                if !is_terminal(next) && !is_closing(next) {
                    break;
                }
                end = j + next.len_utf8();
                chars.next();
            }

            if chars.peek().is_some_and(|&(_, next)| next.is_whitespace()) {
                let sentence = self.pending[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                start = end;
            }
        }

        self.pending.drain(..start);
        sentences
    }

    /// Return the unterminated tail (possibly empty) and reset.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        rest.trim().to_string()
    }
}
