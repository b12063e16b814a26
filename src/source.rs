//! Corpus sources.
//!
//! A [`CorpusSource`] returns the full corpus snapshot for one reindex. The
//! coordinator treats any error from [`CorpusSource::fetch_corpus`] as
//! "data source unavailable" and leaves the active index alone.
//!
//! - [`MySqlSource`] runs one query against MySQL and takes the first column
//!   of every row as a record. A fresh connection is opened per fetch and
//!   closed before returning. Connecting and querying each have a timeout.
//! - [`FilesystemSource`] reads one record per file under a root directory,
//!   filtered by include/exclude globs.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::Row;
use std::time::Duration;
use walkdir::WalkDir;

use crate::config::{FilesystemSourceConfig, MySqlSourceConfig, SourceConfig};
use crate::models::{corpus_from_texts, Record};

#[async_trait]
pub trait CorpusSource: Send + Sync {
    /// Short human-readable description for logs (never includes secrets).
    fn describe(&self) -> String;

    /// Fetch every record of the current corpus. Blank records are dropped.
    async fn fetch_corpus(&self) -> Result<Vec<Record>>;
}

/// Create the configured [`CorpusSource`].
pub fn create_source(config: &SourceConfig) -> Result<Box<dyn CorpusSource>> {
    match config.provider.as_str() {
        "mysql" => Ok(Box::new(MySqlSource::new(&config.mysql))),
        "filesystem" => {
            let fs = config
                .filesystem
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("[source.filesystem] not configured"))?;
            Ok(Box::new(FilesystemSource::new(fs)?))
        }
        other => bail!("Unknown source provider: {}", other),
    }
}

// ============ MySQL ============

pub struct MySqlSource {
    options: MySqlConnectOptions,
    query: String,
    connect_timeout: Duration,
    query_timeout: Duration,
    label: String,
}

impl MySqlSource {
    pub fn new(config: &MySqlSourceConfig) -> Self {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database);

        Self {
            options,
            query: config.query.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            query_timeout: Duration::from_secs(config.query_timeout_secs),
            label: format!(
                "mysql://{}@{}:{}/{}",
                config.user, config.host, config.port, config.database
            ),
        }
    }
}

#[async_trait]
impl CorpusSource for MySqlSource {
    fn describe(&self) -> String {
        self.label.clone()
    }

    async fn fetch_corpus(&self) -> Result<Vec<Record>> {
        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(self.connect_timeout)
            .connect_with(self.options.clone())
            .await
            .with_context(|| format!("Failed to connect to {}", self.label))?;

        let rows = run_with_timeout(
            self.query_timeout,
            &self.query,
            sqlx::query(&self.query).fetch_all(&pool),
        )
        .await;
        pool.close().await;
        let rows = rows?;

        let mut texts = Vec::with_capacity(rows.len());
        for row in &rows {
            let text: Option<String> = row
                .try_get(0)
                .with_context(|| "First column of the corpus query must be text")?;
            if let Some(text) = text {
                texts.push(text);
            }
        }

        Ok(corpus_from_texts(texts))
    }
}

/// Await a corpus query, failing once `limit` has passed.
async fn run_with_timeout<T, F>(limit: Duration, query: &str, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.with_context(|| format!("Query failed: {}", query)),
        Err(_) => bail!("Query timed out after {:?}: {}", limit, query),
    }
}

// ============ Filesystem ============

pub struct FilesystemSource {
    config: FilesystemSourceConfig,
    include_set: GlobSet,
    exclude_set: GlobSet,
}

impl FilesystemSource {
    pub fn new(config: &FilesystemSourceConfig) -> Result<Self> {
        let include_set = build_globset(&config.include_globs)?;

        let mut default_excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        default_excludes.extend(config.exclude_globs.clone());
        let exclude_set = build_globset(&default_excludes)?;

        Ok(Self {
            config: config.clone(),
            include_set,
            exclude_set,
        })
    }

    fn scan(&self) -> Result<Vec<Record>> {
        let root = &self.config.root;
        if !root.exists() {
            bail!("Filesystem source root does not exist: {}", root.display());
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(root).follow_links(self.config.follow_symlinks);
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();

            if self.exclude_set.is_match(&rel_str) || !self.include_set.is_match(&rel_str) {
                continue;
            }

            let body = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            files.push((rel_str, body));
        }

        // Sort for deterministic record order
        files.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(corpus_from_texts(files.into_iter().map(|(_, body)| body)))
    }
}

#[async_trait]
impl CorpusSource for FilesystemSource {
    fn describe(&self) -> String {
        format!("filesystem:{}", self.config.root.display())
    }

    async fn fetch_corpus(&self) -> Result<Vec<Record>> {
        self.scan()
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
