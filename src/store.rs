//! Persistent vector index for one generation.
//!
//! Each generation directory holds a single SQLite file (`index.sqlite`)
//! with the chunks, their embeddings as little-endian `f32` BLOBs, and a
//! small `meta` table describing how the index was built. Queries are
//! brute-force cosine similarity over every stored vector, which is fine at
//! the corpus sizes this service targets.
//!
//! A [`VectorIndex`] owns an open connection pool. [`VectorIndex::close`]
//! must be awaited before the directory is removed; the coordinator relies
//! on this to release handles before deleting storage.

use anyhow::{bail, Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::{Path, PathBuf};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{Chunk, ScoredChunk};

/// File name of the index database inside a generation directory.
pub const INDEX_FILE: &str = "index.sqlite";

/// Build metadata stored alongside the vectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexManifest {
    pub generation_id: String,
    pub model: String,
    pub dims: usize,
    /// RFC 3339 build timestamp.
    pub created_at: String,
}

/// An open vector index backed by `<dir>/index.sqlite`.
pub struct VectorIndex {
    dir: PathBuf,
    pool: SqlitePool,
    manifest: IndexManifest,
    chunk_count: usize,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("dir", &self.dir)
            .field("manifest", &self.manifest)
            .field("chunk_count", &self.chunk_count)
            .finish()
    }
}

async fn connect(dir: &Path, create: bool) -> Result<SqlitePool> {
    let db_path = dir.join(INDEX_FILE);
    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(create)
        .journal_mode(SqliteJournalMode::Delete);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open index database {}", db_path.display()))?;
    Ok(pool)
}

async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id INTEGER PRIMARY KEY,
            record_index INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

impl VectorIndex {
    /// Create a new index in `dir` and persist `chunks` with their vectors.
    ///
    /// The directory is created if needed. On error the pool is closed
    /// before returning, so the caller may remove `dir` immediately.
    pub async fn create(
        dir: &Path,
        manifest: IndexManifest,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<Self> {
        if chunks.len() != vectors.len() {
            bail!(
                "chunk/vector count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            );
        }

        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create index directory {}", dir.display()))?;

        let pool = connect(dir, true).await?;
        if let Err(e) = Self::write_all(&pool, &manifest, chunks, vectors).await {
            pool.close().await;
            return Err(e);
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            pool,
            manifest,
            chunk_count: chunks.len(),
        })
    }

    async fn write_all(
        pool: &SqlitePool,
        manifest: &IndexManifest,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        create_schema(pool).await?;

        let mut tx = pool.begin().await?;

        for (key, value) in [
            ("generation_id", manifest.generation_id.clone()),
            ("model", manifest.model.clone()),
            ("dims", manifest.dims.to_string()),
            ("created_at", manifest.created_at.clone()),
        ] {
            sqlx::query("INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        for (chunk, vector) in chunks.iter().zip(vectors) {
            sqlx::query(
                "INSERT INTO chunks (record_index, chunk_index, text, hash, embedding) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(chunk.record_index as i64)
            .bind(chunk.chunk_index as i64)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Open an existing index. Fails if `dir` holds no index database.
    pub async fn open(dir: &Path) -> Result<Self> {
        if !dir.join(INDEX_FILE).is_file() {
            bail!("no index database in {}", dir.display());
        }

        let pool = connect(dir, false).await?;
        match Self::read_manifest(&pool).await {
            Ok((manifest, chunk_count)) => Ok(Self {
                dir: dir.to_path_buf(),
                pool,
                manifest,
                chunk_count,
            }),
            Err(e) => {
                pool.close().await;
                Err(e)
            }
        }
    }

    async fn read_manifest(pool: &SqlitePool) -> Result<(IndexManifest, usize)> {
        let rows = sqlx::query("SELECT key, value FROM meta")
            .fetch_all(pool)
            .await?;

        let get = |name: &str| -> Result<String> {
            rows.iter()
                .find(|r| r.get::<String, _>("key") == name)
                .map(|r| r.get::<String, _>("value"))
                .ok_or_else(|| anyhow::anyhow!("index manifest is missing '{}'", name))
        };

        let manifest = IndexManifest {
            generation_id: get("generation_id")?,
            model: get("model")?,
            dims: get("dims")?
                .parse()
                .with_context(|| "index manifest has a non-numeric 'dims'")?,
            created_at: get("created_at")?,
        };

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(pool)
            .await?;

        Ok((manifest, count as usize))
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Return the `k` chunks most similar to `query_vec`, best first.
    ///
    /// Fails if `query_vec` does not have the index's dimensionality.
    pub async fn query(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if query_vec.len() != self.manifest.dims {
            bail!(
                "query vector has {} dims but the index was built with {}",
                query_vec.len(),
                self.manifest.dims
            );
        }

        let rows = sqlx::query("SELECT record_index, chunk_index, text, embedding FROM chunks")
            .fetch_all(&self.pool)
            .await?;

        let mut scored: Vec<ScoredChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                ScoredChunk {
                    record_index: row.get("record_index"),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    score: cosine_similarity(query_vec, &vec),
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);

        Ok(scored)
    }

    /// Release every database handle. Consumes the index.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunk(record: usize, text: &str) -> Chunk {
        Chunk {
            record_index: record,
            chunk_index: 0,
            text: text.to_string(),
            hash: format!("hash-{}", record),
        }
    }

    fn manifest() -> IndexManifest {
        IndexManifest {
            generation_id: "abc".to_string(),
            model: "test-model".to_string(),
            dims: 2,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_query_reopen() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("gen-abc");

        let chunks = vec![chunk(0, "cats"), chunk(1, "dogs")];
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let index = VectorIndex::create(&dir, manifest(), &chunks, &vectors)
            .await
            .unwrap();
        assert_eq!(index.chunk_count(), 2);

        let hits = index.query(&[0.9, 0.1], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "cats");
        index.close().await;

        let reopened = VectorIndex::open(&dir).await.unwrap();
        assert_eq!(reopened.manifest(), &manifest());
        assert_eq!(reopened.chunk_count(), 2);
        let hits = reopened.query(&[0.0, 1.0], 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "dogs");
        reopened.close().await;

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_query_with_wrong_dims_fails() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("gen-dims");
        let index = VectorIndex::create(&dir, manifest(), &[chunk(0, "cats")], &[vec![1.0, 0.0]])
            .await
            .unwrap();

        let err = index.query(&[1.0, 0.0, 0.0, 0.0], 1).await.unwrap_err();
        assert!(err.to_string().contains("dims"));
        index.close().await;
    }

    #[tokio::test]
    async fn test_open_missing_index_fails() {
        let tmp = TempDir::new().unwrap();
        assert!(VectorIndex::open(tmp.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_create_rejects_mismatched_vectors() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("gen-x");
        let result = VectorIndex::create(&dir, manifest(), &[chunk(0, "a")], &[]).await;
        assert!(result.is_err());
        assert!(!dir.exists());
    }
}
