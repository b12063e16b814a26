//! TOML configuration parsing and validation.
//!
//! The configuration is read once at startup. Data source credentials may be
//! overridden from the environment (`MYSQL_HOST`, `MYSQL_USER`,
//! `MYSQL_PASSWORD`, `MYSQL_DB`, `MYSQL_PORT`); provider API keys are read
//! from the environment by the providers themselves.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::prompt::PromptTemplate;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

// ============ [source] ============

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_source_provider")]
    pub provider: String,
    #[serde(default)]
    pub mysql: MySqlSourceConfig,
    #[serde(default)]
    pub filesystem: Option<FilesystemSourceConfig>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            provider: default_source_provider(),
            mysql: MySqlSourceConfig::default(),
            filesystem: None,
        }
    }
}

fn default_source_provider() -> String {
    "mysql".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct MySqlSourceConfig {
    #[serde(default = "default_mysql_host")]
    pub host: String,
    #[serde(default = "default_mysql_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_mysql_database")]
    pub database: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    /// Query returning the record text in its first column.
    #[serde(default = "default_mysql_query")]
    pub query: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Upper bound on the corpus query itself.
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

impl Default for MySqlSourceConfig {
    fn default() -> Self {
        Self {
            host: default_mysql_host(),
            user: default_mysql_user(),
            password: String::new(),
            database: default_mysql_database(),
            port: default_mysql_port(),
            query: default_mysql_query(),
            connect_timeout_secs: default_connect_timeout_secs(),
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

fn default_mysql_host() -> String {
    "localhost".to_string()
}
fn default_mysql_user() -> String {
    "root".to_string()
}
fn default_mysql_database() -> String {
    "rag".to_string()
}
fn default_mysql_port() -> u16 {
    3306
}
fn default_mysql_query() -> String {
    "SELECT conteudo FROM rag_base".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_query_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemSourceConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

// ============ [index] ============

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directory holding one subdirectory per index generation.
    pub dir: PathBuf,
}

// ============ [chunking] ============

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks of the same record.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    100
}

// ============ [embedding] ============

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (OpenAI-compatible gateway or Ollama host).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

// ============ [llm] ============

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            url: None,
            temperature: 0.0,
            max_retries: default_llm_max_retries(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_max_retries() -> u32 {
    3
}
fn default_llm_timeout_secs() -> u64 {
    60
}

// ============ [retrieval] ============

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    4
}

// ============ [prompt] ============

#[derive(Debug, Deserialize, Clone)]
pub struct PromptConfig {
    /// System message; must contain `{context}` unless `human` does.
    #[serde(default = "default_system_prompt")]
    pub system: String,
    #[serde(default = "default_human_prompt")]
    pub human: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system: default_system_prompt(),
            human: default_human_prompt(),
        }
    }
}

fn default_system_prompt() -> String {
    "Use o seguinte contexto recuperado para responder à pergunta. \
     Se a pergunta não for relevante para o contexto, diga \
     \"No momento ainda não tenho essa informação, por favor, entre em contato.\"\n\n\
     Contexto: {context}"
        .to_string()
}
fn default_human_prompt() -> String {
    "{question}".to_string()
}

// ============ [server] ============

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Directory of static front-end files served for unmatched routes.
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub reindex_on_startup: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            static_dir: None,
            reindex_on_startup: true,
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_true() -> bool {
    true
}

// ============ Loading ============

/// Read, parse, apply environment overrides, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;

    Ok(config)
}

/// Parse and validate a config from a TOML string, without environment overrides.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config")?;
    validate(&config)?;
    Ok(config)
}

/// Override data source connection parameters from the environment.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let mysql = &mut config.source.mysql;
    if let Some(host) = lookup("MYSQL_HOST") {
        mysql.host = host;
    }
    if let Some(user) = lookup("MYSQL_USER") {
        mysql.user = user;
    }
    if let Some(password) = lookup("MYSQL_PASSWORD") {
        mysql.password = password;
    }
    if let Some(database) = lookup("MYSQL_DB") {
        mysql.database = database;
    }
    if let Some(port) = lookup("MYSQL_PORT") {
        mysql.port = port
            .parse()
            .with_context(|| format!("MYSQL_PORT is not a valid port: {}", port))?;
    }
    Ok(())
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    match config.source.provider.as_str() {
        "mysql" => {
            if config.source.mysql.query_timeout_secs == 0 {
                anyhow::bail!("source.mysql.query_timeout_secs must be > 0");
            }
        }
        "filesystem" => {
            if config.source.filesystem.is_none() {
                anyhow::bail!("source.provider is 'filesystem' but [source.filesystem] is missing");
            }
        }
        other => anyhow::bail!(
            "Unknown source provider: '{}'. Must be mysql or filesystem.",
            other
        ),
    }

    if config.embedding.is_enabled() && config.embedding.provider != "local" {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    PromptTemplate::new(&config.prompt.system, &config.prompt.human)
        .with_context(|| "Invalid [prompt] templates")?;

    Ok(())
}
