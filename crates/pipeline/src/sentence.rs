//! Sentence buffering for streaming generator output.
//!
//! Accumulates text deltas and emits complete sentences so synthesis can
//! begin before the full reply is generated.

const TERMINATORS: &[char] = &['.', '!', '?', ';'];

/// Buffers reply deltas and splits them on sentence boundaries.
#[derive(Debug, Default)]
pub struct SentenceBuffer {
    buffer: String,
    /// Force emission past this many buffered characters, terminator or not
    max_buffer_chars: usize,
}

impl SentenceBuffer {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            max_buffer_chars: 500,
        }
    }

    /// Append a delta; returns any now-complete sentences.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);

        let mut sentences = Vec::new();
        loop {
            let boundary = self
                .buffer
                .char_indices()
                .find(|(_, c)| TERMINATORS.contains(c))
                .map(|(i, c)| i + c.len_utf8());

            match boundary {
                Some(end) => {
                    let rest = self.buffer.split_off(end);
                    let sentence = std::mem::replace(&mut self.buffer, rest);
                    let sentence = sentence.trim();
                    if !sentence.is_empty() {
                        sentences.push(sentence.to_string());
                    }
                    self.buffer = self.buffer.trim_start().to_string();
                }
                None => break,
            }
        }

        if self.buffer.len() >= self.max_buffer_chars {
            let overflow = std::mem::take(&mut self.buffer);
            sentences.push(overflow.trim().to_string());
        }

        sentences
    }

    /// Drain whatever remains, complete or not.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emits_on_terminator() {
        let mut buf = SentenceBuffer::new();
        assert!(buf.push("Welcome to the ").is_empty());
        let sentences = buf.push("club. We have nine courts");
        assert_eq!(sentences, vec!["Welcome to the club.".to_string()]);
        assert_eq!(buf.flush(), Some("We have nine courts".to_string()));
    }

    #[test]
    fn test_multiple_sentences_in_one_delta() {
        let mut buf = SentenceBuffer::new();
        let sentences = buf.push("Yes! Come by today. We're open");
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0], "Yes!");
        assert_eq!(sentences[1], "Come by today.");
    }

    #[test]
    fn test_flush_empty() {
        let mut buf = SentenceBuffer::new();
        buf.push("Done here.");
        assert!(buf.is_empty());
        assert_eq!(buf.flush(), None);
    }

    #[test]
    fn test_overflow_forces_emission() {
        let mut buf = SentenceBuffer::new();
        let long = "word ".repeat(120);
        let sentences = buf.push(&long);
        assert_eq!(sentences.len(), 1);
        assert!(buf.is_empty());
    }
}
