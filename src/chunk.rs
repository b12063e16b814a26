//! Recursive character text chunker.
//!
//! Splits record text into [`Chunk`]s of at most `chunk_size` characters,
//! with roughly `chunk_overlap` characters repeated between consecutive
//! chunks of the same record. Splitting prefers paragraph boundaries
//! (`\n\n`), then lines, then words, and only falls back to cutting between
//! characters when a single word is longer than `chunk_size`.
//!
//! Lengths are counted in `char`s, never bytes, so multi-byte text is never
//! cut inside a code point.

use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::models::{Chunk, Record};

/// Separators tried in order. The empty separator splits into characters.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Chunk every record of a corpus, preserving record order.
pub fn chunk_corpus(records: &[Record], config: &ChunkingConfig) -> Vec<Chunk> {
    records
        .iter()
        .flat_map(|r| chunk_record(r, config))
        .collect()
}

/// Chunk a single record. Blank text yields no chunks.
pub fn chunk_record(record: &Record, config: &ChunkingConfig) -> Vec<Chunk> {
    split_text(&record.text, config.chunk_size, config.chunk_overlap)
        .into_iter()
        .enumerate()
        .map(|(i, text)| make_chunk(record.index, i, text))
        .collect()
}

/// Split text into trimmed, non-empty pieces of at most `chunk_size` chars.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let splitter = Splitter {
        chunk_size: chunk_size.max(1),
        chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
    };
    splitter.split(text, &SEPARATORS)
}

struct Splitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Splitter {
    fn split(&self, text: &str, separators: &[&str]) -> Vec<String> {
        // Pick the first separator present in the text; the rest are used
        // for pieces that are still too long.
        let mut separator = separators.last().copied().unwrap_or("");
        let mut finer: &[&str] = &[];
        for (i, sep) in separators.iter().copied().enumerate() {
            if sep.is_empty() {
                separator = sep;
                break;
            }
            if text.contains(sep) {
                separator = sep;
                finer = &separators[i + 1..];
                break;
            }
        }

        let pieces: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split(separator).filter(|p| !p.is_empty()).collect()
        };

        let mut out = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();
        for piece in pieces {
            if char_len(piece) <= self.chunk_size {
                fitting.push(piece);
                continue;
            }
            if !fitting.is_empty() {
                out.extend(self.merge(&fitting, separator));
                fitting.clear();
            }
            if finer.is_empty() {
                out.push(piece.trim().to_string());
            } else {
                out.extend(self.split(piece, finer));
            }
        }
        if !fitting.is_empty() {
            out.extend(self.merge(&fitting, separator));
        }

        out.retain(|c| !c.is_empty());
        out
    }

    /// Greedily join pieces into chunks, carrying trailing pieces forward
    /// as overlap.
    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut chunks = Vec::new();
        let mut window: Vec<&str> = Vec::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            let joined_len = |empty: bool, total: usize| {
                total + len + if empty { 0 } else { sep_len }
            };

            if joined_len(window.is_empty(), total) > self.chunk_size && !window.is_empty() {
                push_trimmed(&mut chunks, &window.join(separator));

                // Drop from the front until the window fits the overlap
                // budget and leaves room for the next piece.
                while total > self.chunk_overlap
                    || (total > 0 && joined_len(window.is_empty(), total) > self.chunk_size)
                {
                    let first = char_len(window[0]);
                    total -= first + if window.len() > 1 { sep_len } else { 0 };
                    window.remove(0);
                    if window.is_empty() {
                        total = 0;
                        break;
                    }
                }
            }

            total += len + if window.is_empty() { 0 } else { sep_len };
            window.push(piece);
        }

        if !window.is_empty() {
            push_trimmed(&mut chunks, &window.join(separator));
        }
        chunks
    }
}

fn push_trimmed(chunks: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn make_chunk(record_index: usize, chunk_index: usize, text: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        record_index,
        chunk_index,
        text,
        hash,
    }
}
