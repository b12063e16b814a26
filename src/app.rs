//! Wiring from configuration to running components.
//!
//! [`App::start`] is the startup sequence of the process that owns the
//! index directory: reap orphaned generations, open the coordinator on
//! whatever `ACTIVE` names, and build the query service around it.
//! [`App::attach`] skips the reaping, for one-shot commands that may run
//! next to a serving process.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::coordinator::{BuildSettings, HotSwapCoordinator};
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::generation::IndexLayout;
use crate::llm::{create_chat_model, ChatModel};
use crate::prompt::PromptTemplate;
use crate::query::QueryService;
use crate::reaper::reap_orphans;
use crate::source::{create_source, CorpusSource};

/// The long-lived components of a running service.
#[derive(Clone)]
pub struct App {
    pub coordinator: Arc<HotSwapCoordinator>,
    pub query: Arc<QueryService>,
}

impl App {
    /// Build every component from `config`, reaping orphans first.
    pub async fn start(config: &Config) -> Result<Self> {
        let (source, embedder, chat) = providers(config)?;
        Self::with_providers(config, source, embedder, chat).await
    }

    /// Build every component without touching orphaned generations. A
    /// shadow directory another process is still building stays intact.
    pub async fn attach(config: &Config) -> Result<Self> {
        let (source, embedder, chat) = providers(config)?;
        Self::build(config, source, embedder, chat, false).await
    }

    /// Like [`App::start`], with the providers supplied by the caller.
    pub async fn with_providers(
        config: &Config,
        source: Arc<dyn CorpusSource>,
        embedder: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatModel>,
    ) -> Result<Self> {
        Self::build(config, source, embedder, chat, true).await
    }

    /// `reap` marks the caller as the directory's owner: orphans are
    /// removed and a bad `ACTIVE` pointer is cleared.
    async fn build(
        config: &Config,
        source: Arc<dyn CorpusSource>,
        embedder: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatModel>,
        reap: bool,
    ) -> Result<Self> {
        let template = PromptTemplate::new(&config.prompt.system, &config.prompt.human)
            .with_context(|| "Invalid [prompt] template")?;

        let layout = IndexLayout::new(&config.index.dir);
        if reap {
            let report = reap_orphans(&layout);
            info!(
                removed = report.removed.len(),
                failed = report.failed.len(),
                active = report.kept.as_deref().unwrap_or("none"),
                "orphan scan complete"
            );
        }

        let settings = BuildSettings {
            chunking: config.chunking.clone(),
            batch_size: config.embedding.batch_size,
        };
        let coordinator = if reap {
            HotSwapCoordinator::open(layout, settings, source, embedder.clone()).await?
        } else {
            HotSwapCoordinator::open_read_only(layout, settings, source, embedder.clone()).await?
        };
        let coordinator = Arc::new(coordinator);
        let query = Arc::new(QueryService::new(
            coordinator.clone(),
            embedder,
            chat,
            template,
            config.retrieval.top_k,
        ));

        Ok(Self { coordinator, query })
    }
}

type Providers = (
    Arc<dyn CorpusSource>,
    Arc<dyn EmbeddingProvider>,
    Arc<dyn ChatModel>,
);

fn providers(config: &Config) -> Result<Providers> {
    let source: Arc<dyn CorpusSource> = Arc::from(create_source(&config.source)?);
    let embedder: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&config.embedding)?);
    let chat: Arc<dyn ChatModel> = Arc::from(create_chat_model(&config.llm)?);
    Ok((source, embedder, chat))
}
