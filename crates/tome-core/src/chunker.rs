//! Sentence-window chunker.
//!
//! Sentences are the atomic unit: a chunk is never split mid-sentence. For
//! every sentence index, a window is seeded with that sentence and expanded
//! with whole neighbouring sentences, alternately to the right and then to
//! the left, as long as the joined length stays within `chunk_size`. Overlapping
//! windows over short inputs often collapse to identical strings, so exact
//! duplicates are removed, keeping first-occurrence order.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Chunker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Maximum chunk length in characters (default: 512). A single sentence
    /// longer than this is kept whole as its own chunk.
    pub chunk_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self { chunk_size: 512 }
    }
}

/// Split `text` into overlapping, sentence-respecting chunks.
///
/// Deterministic for identical inputs. Empty or whitespace-only input
/// yields an empty sequence.
#[must_use]
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return Vec::new();
    }

    let lengths: Vec<usize> = sentences.iter().map(|s| s.chars().count()).collect();

    let mut chunks = Vec::with_capacity(sentences.len());
    let mut seen = HashSet::new();
    for seed in 0..sentences.len() {
        let chunk = expand_window(&sentences, &lengths, seed, chunk_size);
        if seen.insert(chunk.clone()) {
            chunks.push(chunk);
        }
    }
    chunks
}

/// Sentence boundary: `.`, `!` or `?` followed by whitespace (or input end).
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().is_none_or(|next| next.is_whitespace()) {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    sentences
}

/// Grow a window around `seed`, trying the right neighbour before the left
/// on each round. A side closes once its next sentence would push the joined
/// length (including the single-space separators) past `chunk_size`.
fn expand_window(
    sentences: &[String],
    lengths: &[usize],
    seed: usize,
    chunk_size: usize,
) -> String {
    let mut start = seed;
    let mut end = seed;
    let mut total = lengths[seed];
    let mut right_open = true;
    let mut left_open = true;

    while right_open || left_open {
        if right_open {
            let next = end + 1;
            if next < sentences.len() && total + 1 + lengths[next] <= chunk_size {
                end = next;
                total += 1 + lengths[next];
            } else {
                right_open = false;
            }
        }
        if left_open {
            if start > 0 && total + 1 + lengths[start - 1] <= chunk_size {
                start -= 1;
                total += 1 + lengths[start];
            } else {
                left_open = false;
            }
        }
    }

    sentences[start..=end].join(" ")
}
