//! Index building: chunk → embed → persist.
//!
//! [`build_index`] is a plain function of the corpus and a destination
//! directory. It knows nothing about generations, locks, or which index is
//! active, and it never retries: retry policy belongs to the embedding
//! provider.

use anyhow::{bail, Result};
use tracing::{debug, info};

use crate::chunk::chunk_corpus;
use crate::config::ChunkingConfig;
use crate::embedding::EmbeddingProvider;
use crate::models::Record;
use crate::store::{IndexManifest, VectorIndex};

/// Parameters for one build.
pub struct BuildRequest<'a> {
    pub corpus: &'a [Record],
    pub destination: &'a std::path::Path,
    pub generation_id: &'a str,
    pub chunking: &'a ChunkingConfig,
    pub batch_size: usize,
}

/// Chunk, embed, and persist a corpus into `request.destination`.
///
/// Returns the open index on success. On failure nothing is left open; the
/// destination directory may exist and is the caller's to remove.
pub async fn build_index(
    request: BuildRequest<'_>,
    embedder: &dyn EmbeddingProvider,
) -> Result<VectorIndex> {
    let chunks = chunk_corpus(request.corpus, request.chunking);
    if chunks.is_empty() {
        bail!("corpus produced no chunks");
    }
    info!(
        records = request.corpus.len(),
        chunks = chunks.len(),
        generation = request.generation_id,
        "chunked corpus"
    );

    let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
    for (batch_no, batch) in chunks.chunks(request.batch_size.max(1)).enumerate() {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embedded = embedder.embed(&texts).await?;
        if embedded.len() != texts.len() {
            bail!(
                "embedding provider returned {} vectors for {} texts",
                embedded.len(),
                texts.len()
            );
        }
        debug!(batch = batch_no, size = texts.len(), "embedded batch");
        vectors.extend(embedded);
    }

    let dims = vectors.first().map(Vec::len).unwrap_or(0);
    if dims == 0 {
        bail!("embedding provider returned empty vectors");
    }
    if let Some(bad) = vectors.iter().position(|v| v.len() != dims) {
        bail!(
            "embedding dimensionality is inconsistent: chunk {} has {} dims, expected {}",
            bad,
            vectors[bad].len(),
            dims
        );
    }

    let manifest = IndexManifest {
        generation_id: request.generation_id.to_string(),
        model: embedder.model_name().to_string(),
        dims,
        created_at: chrono::Utc::now().to_rfc3339(),
    };

    let index = VectorIndex::create(request.destination, manifest, &chunks, &vectors).await?;
    info!(
        path = %request.destination.display(),
        chunks = index.chunk_count(),
        dims,
        "persisted index"
    );
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FixedEmbedder {
        dims: usize,
        drop_last: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut out: Vec<Vec<f32>> = texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0; self.dims];
                    v[t.len() % self.dims] = 1.0;
                    v
                })
                .collect();
            if self.drop_last {
                out.pop();
            }
            Ok(out)
        }
    }

    fn chunking() -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: 20,
            chunk_overlap: 0,
        }
    }

    #[tokio::test]
    async fn test_build_persists_every_chunk() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("gen-1");
        let corpus = vec![
            Record::new(0, "cats purr when they are happy"),
            Record::new(1, "dogs bark"),
        ];
        let index = build_index(
            BuildRequest {
                corpus: &corpus,
                destination: &dest,
                generation_id: "1",
                chunking: &chunking(),
                batch_size: 2,
            },
            &FixedEmbedder {
                dims: 3,
                drop_last: false,
            },
        )
        .await
        .unwrap();

        assert_eq!(index.chunk_count(), 3);
        assert_eq!(index.manifest().model, "fixed");
        assert_eq!(index.manifest().dims, 3);
        index.close().await;
    }

    #[tokio::test]
    async fn test_short_embedding_response_fails_before_persisting() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("gen-2");
        let corpus = vec![Record::new(0, "cats")];
        let result = build_index(
            BuildRequest {
                corpus: &corpus,
                destination: &dest,
                generation_id: "2",
                chunking: &chunking(),
                batch_size: 8,
            },
            &FixedEmbedder {
                dims: 3,
                drop_last: true,
            },
        )
        .await;

        assert!(result.is_err());
        assert!(!dest.exists());
    }
}
