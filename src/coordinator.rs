//! Hot-swap reindexing.
//!
//! [`HotSwapCoordinator`] owns the one active index generation and the lock
//! that guards it. A reindex builds a complete new generation in a shadow
//! directory while the old one stays active, then swaps the reference in a
//! single step and deletes the old storage.
//!
//! # Protocol
//!
//! All steps run with the lock held for the whole call:
//!
//! 1. Pick a fresh generation id and shadow directory.
//! 2. Fetch the corpus. Failure → discard shadow, active untouched.
//! 3. Empty corpus → clear: release and delete the active generation,
//!    clear the pointer, discard shadow. Success.
//! 4. Build into the shadow directory. Failure → discard shadow, active
//!    untouched.
//! 5. Write the `ACTIVE` pointer, then replace the in-memory reference.
//!    Pointer failure → discard the new generation, active untouched.
//! 6. Close the old generation's handles, then delete its directory.
//!    Deletion failure is logged and otherwise ignored.
//!
//! Queries take the same lock (see [`crate::query`]), so they observe the
//! old generation or the new one, never a generation that is still
//! building.

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{error, info, warn};

use crate::builder::{build_index, BuildRequest};
use crate::config::ChunkingConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::ReindexError;
use crate::generation::{remove_storage, Generation, GenerationState, IndexLayout};
use crate::source::CorpusSource;
use crate::store::VectorIndex;

/// How new generations are built.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub chunking: ChunkingConfig,
    /// Texts per embedding request.
    pub batch_size: usize,
}

/// The generation currently serving queries, with its open index.
#[derive(Debug)]
pub struct ActiveGeneration {
    generation: Generation,
    index: VectorIndex,
}

impl ActiveGeneration {
    pub fn generation(&self) -> &Generation {
        &self.generation
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }
}

/// Result of a successful reindex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReindexOutcome {
    /// A new generation is active.
    Swapped {
        generation: String,
        chunks: usize,
        retired: Option<String>,
        /// The retired generation's directory could not be deleted.
        retired_cleanup_failed: bool,
    },
    /// The corpus was empty; no generation is active any more.
    Cleared {
        removed: Option<String>,
        removal_failed: bool,
    },
}

/// Snapshot of the active generation for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub ready: bool,
    pub generation: Option<String>,
    pub state: Option<GenerationState>,
    pub chunks: usize,
    pub model: Option<String>,
    pub dims: Option<usize>,
    pub created_at: Option<String>,
}

pub struct HotSwapCoordinator {
    layout: IndexLayout,
    settings: BuildSettings,
    source: Arc<dyn CorpusSource>,
    embedder: Arc<dyn EmbeddingProvider>,
    active: Mutex<Option<ActiveGeneration>>,
}

impl HotSwapCoordinator {
    /// Open the index directory and restore the generation named by the
    /// `ACTIVE` pointer, if any.
    ///
    /// The coordinator starts not ready when there is nothing usable to
    /// restore. An unreadable pointer, or one naming a missing or broken
    /// generation, is removed. A generation built with a different
    /// embedding model or dimensionality than `embedder` is left on disk
    /// but not served; once a reindex repoints `ACTIVE`, the next orphan
    /// scan removes it. Run the orphan reaper before this.
    pub async fn open(
        layout: IndexLayout,
        settings: BuildSettings,
        source: Arc<dyn CorpusSource>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> anyhow::Result<Self> {
        Self::open_with(layout, settings, source, embedder, true).await
    }

    /// Like [`HotSwapCoordinator::open`], but never removes a bad pointer.
    /// For processes that share the index directory with its owner.
    pub async fn open_read_only(
        layout: IndexLayout,
        settings: BuildSettings,
        source: Arc<dyn CorpusSource>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> anyhow::Result<Self> {
        Self::open_with(layout, settings, source, embedder, false).await
    }

    async fn open_with(
        layout: IndexLayout,
        settings: BuildSettings,
        source: Arc<dyn CorpusSource>,
        embedder: Arc<dyn EmbeddingProvider>,
        owner: bool,
    ) -> anyhow::Result<Self> {
        std::fs::create_dir_all(layout.root())?;

        let active = match layout.read_active() {
            Some(id) => restore(&layout, &id, embedder.as_ref(), owner).await,
            None => {
                if owner && layout.pointer_exists() {
                    discard_pointer(&layout);
                }
                None
            }
        };

        Ok(Self {
            layout,
            settings,
            source,
            embedder,
            active: Mutex::new(active),
        })
    }

    /// Exclusive access to the active generation. Held by queries for the
    /// whole retrieval + generation call.
    pub async fn lock(&self) -> MutexGuard<'_, Option<ActiveGeneration>> {
        self.active.lock().await
    }

    /// Rebuild the index. Returns `true` on success, including when an
    /// empty corpus cleared the index.
    pub async fn reindex(&self) -> bool {
        match self.try_reindex().await {
            Ok(outcome) => {
                info!(?outcome, "reindex succeeded");
                true
            }
            Err(e) => {
                error!(error = %e, "reindex failed");
                false
            }
        }
    }

    /// Rebuild the index, reporting what happened.
    pub async fn try_reindex(&self) -> Result<ReindexOutcome, ReindexError> {
        let mut active = self.active.lock().await;
        let started = Instant::now();

        let mut shadow = Generation::begin(
            &self.layout,
            active.as_ref().map(|a| a.generation.id()),
        );
        info!(
            generation = shadow.id(),
            source = %self.source.describe(),
            "reindex started"
        );

        let corpus = match self.source.fetch_corpus().await {
            Ok(corpus) => corpus,
            Err(e) => {
                self.discard(&mut shadow);
                return Err(ReindexError::DataSourceUnavailable(e));
            }
        };

        if corpus.is_empty() {
            info!("corpus is empty; clearing the index");
            self.discard(&mut shadow);
            return Ok(self.clear(&mut active).await);
        }

        let request = BuildRequest {
            corpus: &corpus,
            destination: shadow.path(),
            generation_id: shadow.id(),
            chunking: &self.settings.chunking,
            batch_size: self.settings.batch_size,
        };
        let index = match build_index(request, self.embedder.as_ref()).await {
            Ok(index) => index,
            Err(e) => {
                self.discard(&mut shadow);
                return Err(ReindexError::BuildFailure(e));
            }
        };
        shadow.transition(GenerationState::Ready);

        if let Err(e) = self.layout.write_active(shadow.id()) {
            index.close().await;
            self.discard(&mut shadow);
            return Err(ReindexError::SwapFailure {
                generation: shadow.id().to_string(),
                source: e,
            });
        }

        shadow.transition(GenerationState::Active);
        let generation = shadow.id().to_string();
        let chunks = index.chunk_count();
        let previous = active.replace(ActiveGeneration {
            generation: shadow,
            index,
        });

        let (retired, retired_cleanup_failed) = match previous {
            Some(old) => {
                let id = old.generation.id().to_string();
                let removed = retire(old).await;
                (Some(id), !removed)
            }
            None => (None, false),
        };

        info!(
            generation = %generation,
            chunks,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "swapped in new generation"
        );

        Ok(ReindexOutcome::Swapped {
            generation,
            chunks,
            retired,
            retired_cleanup_failed,
        })
    }

    /// Current active generation, read under the lock.
    pub async fn status(&self) -> IndexStatus {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(a) => {
                let manifest = a.index.manifest();
                IndexStatus {
                    ready: true,
                    generation: Some(a.generation.id().to_string()),
                    state: Some(a.generation.state()),
                    chunks: a.index.chunk_count(),
                    model: Some(manifest.model.clone()),
                    dims: Some(manifest.dims),
                    created_at: Some(manifest.created_at.clone()),
                }
            }
            None => IndexStatus {
                ready: false,
                generation: None,
                state: None,
                chunks: 0,
                model: None,
                dims: None,
                created_at: None,
            },
        }
    }

    /// Release the active index's handles without deleting anything. The
    /// `ACTIVE` pointer is kept so the next start restores it.
    pub async fn shutdown(&self) {
        if let Some(active) = self.active.lock().await.take() {
            info!(generation = active.generation.id(), "closing active generation");
            active.index.close().await;
        }
    }

    /// Mark a generation that will never become active as failed and
    /// delete its storage.
    fn discard(&self, shadow: &mut Generation) {
        shadow.transition(GenerationState::Failed);
        if let Err(e) = remove_storage(shadow.path()) {
            warn!(
                path = %shadow.path().display(),
                error = %e,
                "could not remove discarded generation; the orphan reaper will retry at startup"
            );
        }
    }

    async fn clear(&self, active: &mut Option<ActiveGeneration>) -> ReindexOutcome {
        discard_pointer(&self.layout);

        match active.take() {
            Some(old) => {
                let id = old.generation.id().to_string();
                let removed = retire(old).await;
                ReindexOutcome::Cleared {
                    removed: Some(id),
                    removal_failed: !removed,
                }
            }
            None => ReindexOutcome::Cleared {
                removed: None,
                removal_failed: false,
            },
        }
    }
}

/// Open the generation `id` for serving, or explain in the log why not.
async fn restore(
    layout: &IndexLayout,
    id: &str,
    embedder: &dyn EmbeddingProvider,
    owner: bool,
) -> Option<ActiveGeneration> {
    let generation = Generation::restored(layout, id);
    let index = match VectorIndex::open(generation.path()).await {
        Ok(index) => index,
        Err(e) => {
            warn!(
                generation = %id,
                error = %format!("{:#}", e),
                "active pointer names an unusable generation; starting not ready"
            );
            if owner {
                discard_pointer(layout);
            }
            return None;
        }
    };

    let manifest = index.manifest();
    if manifest.model != embedder.model_name() || manifest.dims != embedder.dims() {
        warn!(
            generation = %id,
            built_model = %manifest.model,
            built_dims = manifest.dims,
            model = embedder.model_name(),
            dims = embedder.dims(),
            "active generation was built with a different embedding model; starting not ready"
        );
        index.close().await;
        return None;
    }

    info!(
        generation = %id,
        chunks = index.chunk_count(),
        "restored active generation"
    );
    Some(ActiveGeneration { generation, index })
}

fn discard_pointer(layout: &IndexLayout) {
    if let Err(e) = layout.clear_active() {
        warn!(error = %format!("{:#}", e), "could not remove active pointer");
    }
}

/// Close a generation's handles, then delete its storage. Returns whether
/// the storage is gone.
async fn retire(old: ActiveGeneration) -> bool {
    let ActiveGeneration {
        mut generation,
        index,
    } = old;
    generation.transition(GenerationState::Retired);
    index.close().await;

    match remove_storage(generation.path()) {
        Ok(()) => {
            info!(generation = generation.id(), "deleted retired generation");
            true
        }
        Err(e) => {
            warn!(
                path = %generation.path().display(),
                error = %e,
                "could not delete retired generation; still serving the new index"
            );
            false
        }
    }
}
