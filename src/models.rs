//! Core data models that flow through the reindex and query pipeline.
//!
//! A [`Record`] is fetched from the data source, split into [`Chunk`]s,
//! embedded, and stored in a generation's vector index. Queries return
//! [`ScoredChunk`]s.

use serde::Serialize;

/// A raw text record from the corpus.
///
/// Records have no persistent identity: `index` is only their position in
/// the corpus snapshot they were fetched with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub index: usize,
    pub text: String,
}

impl Record {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }
}

/// Build a corpus from raw strings, dropping blank entries and numbering
/// the survivors contiguously.
pub fn corpus_from_texts<I, S>(texts: I) -> Vec<Record>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    texts
        .into_iter()
        .map(Into::into)
        .filter(|t: &String| !t.trim().is_empty())
        .enumerate()
        .map(|(i, t)| Record::new(i, t))
        .collect()
}

/// A bounded-size piece of a record's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Index of the record this chunk was cut from.
    pub record_index: usize,
    /// Position of the chunk within its record, contiguous from 0.
    pub chunk_index: usize,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// A chunk returned by a vector index query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub record_index: i64,
    pub chunk_index: i64,
    pub text: String,
    /// Cosine similarity to the query vector.
    pub score: f32,
}
