//! Splitting long transcripts into message-sized pieces.
//!
//! Lengths are counted in characters, not bytes, so multi-byte text is cut
//! at the same places as ASCII text of the same length.

const SENTENCE_DELIMITER: &str = ". ";

/// Splits `text` into chunks of at most `max_length` characters.
///
/// Text that already fits is returned as a single chunk. Otherwise the text is
/// split into sentences on `". "`, sentences are packed greedily into chunks
/// joined by a single space, and a sentence that does not fit on its own is
/// packed word by word instead. A single word longer than `max_length` is cut
/// into `max_length`-sized pieces, so no chunk ever exceeds the limit.
///
/// `max_length` must be greater than zero.
pub fn split_text(text: &str, max_length: usize) -> Vec<String> {
    if char_len(text) <= max_length {
        return vec![text.to_string()];
    }

    let mut packer = Packer::new(max_length);
    let sentences: Vec<&str> = text.split(SENTENCE_DELIMITER).collect();
    let last = sentences.len() - 1;

    for (index, raw) in sentences.iter().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }

        // The delimiter swallowed the period of every sentence but the last.
        let sentence = if index != last && !trimmed.ends_with('.') {
            format!("{trimmed}.")
        } else {
            trimmed.to_string()
        };

        if char_len(&sentence) <= max_length {
            packer.push(&sentence);
            continue;
        }

        packer.seal();
        for word in sentence.split_whitespace() {
            if char_len(word) <= max_length {
                packer.push(word);
            } else {
                for piece in hard_split(word, max_length) {
                    packer.push(&piece);
                }
            }
        }
    }

    packer.finish()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn hard_split(word: &str, max_length: usize) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    chars
        .chunks(max_length)
        .map(|piece| piece.iter().collect())
        .collect()
}

/// Greedy accumulator: pieces are appended to the open chunk while they fit,
/// otherwise the open chunk is sealed and a new one started.
struct Packer {
    max_length: usize,
    chunks: Vec<String>,
    current: String,
    current_len: usize,
}

impl Packer {
    fn new(max_length: usize) -> Self {
        Self {
            max_length,
            chunks: Vec::new(),
            current: String::new(),
            current_len: 0,
        }
    }

    fn fits(&self, len: usize) -> bool {
        if self.current.is_empty() {
            len <= self.max_length
        } else {
            self.current_len + 1 + len <= self.max_length
        }
    }

    /// `piece` must not exceed `max_length` on its own.
    fn push(&mut self, piece: &str) {
        let len = char_len(piece);
        if !self.fits(len) {
            self.seal();
        }
        if !self.current.is_empty() {
            self.current.push(' ');
            self.current_len += 1;
        }
        self.current.push_str(piece);
        self.current_len += len;
    }

    fn seal(&mut self) {
        if !self.current.is_empty() {
            self.chunks.push(std::mem::take(&mut self.current));
            self.current_len = 0;
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.seal();
        self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_bounded(chunks: &[String], max_length: usize) {
        for chunk in chunks {
            assert!(
                char_len(chunk) <= max_length,
                "chunk {chunk:?} exceeds {max_length}"
            );
            assert!(!chunk.is_empty());
        }
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        assert_eq!(split_text("Hello there.", 100), vec!["Hello there."]);
        assert_eq!(split_text("exact", 5), vec!["exact"]);
        assert_eq!(split_text("", 5), vec![""]);
    }

    #[test]
    fn test_one_sentence_per_chunk() {
        assert_eq!(split_text("A. B. C.", 4), vec!["A.", "B.", "C."]);
    }

    #[test]
    fn test_sentences_are_packed() {
        let text = "One two. Three four. Five six. Seven.";
        let chunks = split_text(text, 20);
        assert_eq!(chunks, vec!["One two. Three four.", "Five six. Seven."]);
    }

    #[test]
    fn test_last_sentence_keeps_missing_period() {
        let chunks = split_text("First sentence. Second one without period", 20);
        assert_eq!(chunks, vec!["First sentence.", "Second one without", "period"]);
    }

    #[test]
    fn test_long_sentence_splits_on_words() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let chunks = split_text(text, 12);
        assert_eq!(
            chunks,
            vec!["alpha beta", "gamma delta", "epsilon zeta", "eta theta"]
        );
    }

    #[test]
    fn test_word_tail_joins_following_sentence() {
        let chunks = split_text("aaaa bbbb cccc. Dd.", 10);
        assert_eq!(chunks, vec!["aaaa bbbb", "cccc. Dd."]);
    }

    #[test]
    fn test_oversized_word_is_hard_split() {
        let chunks = split_text("tiny abcdefghijklmnop end", 6);
        assert_eq!(chunks, vec!["tiny", "abcdef", "ghijkl", "mnop", "end"]);
        assert_bounded(&chunks, 6);
    }

    #[test]
    fn test_multibyte_counts_characters() {
        let text = "Привет мир. Как дела. Всё хорошо.";
        let chunks = split_text(text, 12);
        assert_eq!(chunks, vec!["Привет мир.", "Как дела.", "Всё хорошо."]);
        assert_bounded(&chunks, 12);
    }

    #[test]
    fn test_empty_sentences_are_skipped() {
        let chunks = split_text("Start. . . End of text here.", 12);
        assert_eq!(chunks, vec!["Start.", "End of text", "here."]);
        assert_bounded(&chunks, 12);
    }

    #[test]
    fn test_bound_holds_for_assorted_inputs() {
        let inputs = [
            "The quick brown fox jumps over the lazy dog. ".repeat(40),
            "x".repeat(1000),
            "word ".repeat(300),
            "Short. ".repeat(200),
            "Mixed Ünïcödé téxt with àccents. Ещё одно предложение. ".repeat(30),
            "no delimiters\nbut\tvarious   whitespace ".repeat(50),
        ];
        for text in &inputs {
            for max_length in [1, 2, 7, 13, 50, 200] {
                let chunks = split_text(text, max_length);
                assert!(!chunks.is_empty());
                assert_bounded(&chunks, max_length);
            }
        }
    }

    #[test]
    fn test_reconstruction_preserves_words() {
        let text = "Mary had a little lamb. Its fleece was white as snow. And everywhere that Mary went the lamb was sure to go";
        let chunks = split_text(text, 25);
        let joined = chunks.join(" ");
        let original: Vec<&str> = text.split_whitespace().collect();
        let rebuilt: Vec<&str> = joined.split_whitespace().collect();
        assert_eq!(original, rebuilt);
    }

    #[test]
    fn test_deterministic() {
        let text = "Some text. ".repeat(100);
        assert_eq!(split_text(&text, 33), split_text(&text, 33));
    }
}
