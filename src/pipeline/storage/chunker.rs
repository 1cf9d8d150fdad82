use std::sync::LazyLock;

use regex::Regex;

use super::types::{Chunker, TextChunk};

/// Target window length in whitespace tokens.
pub const TARGET_TOKENS: usize = 500;
/// Windows may end up to this many tokens early or late to land on a
/// sentence boundary.
pub const TOKEN_TOLERANCE: usize = 50;
/// Tokens shared by consecutive windows (≈ 11–14% of a window).
pub const OVERLAP_TOKENS: usize = 64;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\S+").unwrap());

/// Sliding-window chunker for guideline text.
///
/// Splits a document into overlapping windows of roughly `target_tokens`
/// tokens. Consecutive windows share `overlap_tokens` tokens, so any clause
/// no longer than the overlap that straddles a boundary appears whole in
/// one of the two adjacent chunks. Window ends snap to the last sentence
/// terminator inside `target ± tolerance` when there is one.
pub struct GuidelineChunker {
    target_tokens: usize,
    tolerance: usize,
    overlap_tokens: usize,
}

impl GuidelineChunker {
    pub fn new() -> Self {
        Self::with_params(TARGET_TOKENS, TOKEN_TOLERANCE, OVERLAP_TOKENS)
    }

    /// Custom window parameters. Tolerance and overlap are clamped so every
    /// window advances by at least one token.
    pub fn with_params(target_tokens: usize, tolerance: usize, overlap_tokens: usize) -> Self {
        let target_tokens = target_tokens.max(2);
        let tolerance = tolerance.min(target_tokens / 2);
        let min_window = target_tokens - tolerance;
        Self {
            target_tokens,
            tolerance,
            overlap_tokens: overlap_tokens.min(min_window - 1),
        }
    }

    pub fn overlap_tokens(&self) -> usize {
        self.overlap_tokens
    }

    fn window_end(&self, text: &str, spans: &[(usize, usize)], start: usize) -> usize {
        let lo = start + self.target_tokens - self.tolerance;
        let hi = start + self.target_tokens + self.tolerance;

        (lo..=hi)
            .rev()
            .find(|&end| ends_sentence(&text[spans[end - 1].0..spans[end - 1].1]))
            .unwrap_or(start + self.target_tokens)
    }
}

impl Default for GuidelineChunker {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunker for GuidelineChunker {
    fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let spans: Vec<(usize, usize)> = TOKEN
            .find_iter(text)
            .map(|m| (m.start(), m.end()))
            .collect();
        let total = spans.len();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < total {
            let end = if total - start <= self.target_tokens + self.tolerance {
                total
            } else {
                self.window_end(text, &spans, start)
            };

            let byte_start = spans[start].0;
            let byte_end = spans[end - 1].1;
            chunks.push(TextChunk {
                content: text[byte_start..byte_end].to_string(),
                chunk_index: chunks.len(),
                char_offset: byte_start,
                token_count: end - start,
            });

            if end == total {
                break;
            }
            let next = end.saturating_sub(self.overlap_tokens);
            start = if next > start { next } else { end };
        }

        chunks
    }
}

fn ends_sentence(token: &str) -> bool {
    token
        .trim_end_matches(['"', '\'', ')', ']'])
        .ends_with(['.', '!', '?', ';'])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn empty_text_returns_empty() {
        let chunker = GuidelineChunker::new();
        assert!(chunker.chunk("").is_empty());
        assert!(chunker.chunk("   \n\t ").is_empty());
    }

    #[test]
    fn short_document_is_single_chunk() {
        let text = "Administer broad-spectrum antimicrobials within one hour of recognition.";
        let chunks = GuidelineChunker::new().chunk(text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, text);
        assert_eq!(chunks[0].char_offset, 0);
    }

    #[test]
    fn default_windows_stay_within_tolerance() {
        let text = numbered_words(2_000);
        let chunks = GuidelineChunker::new().chunk(&text);
        assert!(chunks.len() > 3);
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(
                (TARGET_TOKENS - TOKEN_TOLERANCE..=TARGET_TOKENS + TOKEN_TOLERANCE)
                    .contains(&chunk.token_count),
                "window of {} tokens",
                chunk.token_count
            );
        }
        let overlap_ratio = OVERLAP_TOKENS as f32 / TARGET_TOKENS as f32;
        assert!((0.10..=0.15).contains(&overlap_ratio));
    }

    #[test]
    fn every_clause_up_to_overlap_survives_whole() {
        let chunker = GuidelineChunker::with_params(40, 5, 8);
        let words: Vec<String> = (0..300).map(|i| format!("w{i}")).collect();
        let text = words.join(" ");
        let chunks = chunker.chunk(&text);
        assert!(chunks.len() > 5);

        let clause_len = chunker.overlap_tokens();
        for i in 0..=words.len() - clause_len {
            let clause = words[i..i + clause_len].join(" ");
            assert!(
                chunks.iter().any(|c| c.content.contains(&clause)),
                "clause starting at token {i} was split across every chunk"
            );
        }
    }

    #[test]
    fn windows_snap_to_sentence_boundaries() {
        let sentence = "Measure lactate and remeasure if initial lactate is elevated. ";
        let text = sentence.repeat(60);
        let chunker = GuidelineChunker::with_params(50, 10, 6);
        let chunks = chunker.chunk(&text);
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(
                chunk.content.ends_with('.'),
                "chunk does not end on a sentence: ...{}",
                &chunk.content[chunk.content.len().saturating_sub(30)..]
            );
        }
    }

    #[test]
    fn chunk_indices_and_offsets_are_consistent() {
        let text = numbered_words(1_200);
        let chunks = GuidelineChunker::new().chunk(&text);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
            assert!(text[chunk.char_offset..].starts_with(&chunk.content));
        }
        assert!(chunks.windows(2).all(|w| w[0].char_offset < w[1].char_offset));
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = numbered_words(900);
        let chunker = GuidelineChunker::new();
        assert_eq!(chunker.chunk(&text), chunker.chunk(&text));
    }
}
