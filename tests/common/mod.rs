//! In-process fakes shared by the integration tests.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hotswap_rag::app::App;
use hotswap_rag::config::{parse_config, Config};
use hotswap_rag::embedding::EmbeddingProvider;
use hotswap_rag::llm::ChatModel;
use hotswap_rag::models::{corpus_from_texts, Record};
use hotswap_rag::prompt::ChatMessage;
use hotswap_rag::source::CorpusSource;

pub const DIMS: usize = 32;

/// Texts containing this word make the embedder fail.
pub const POISON: &str = "POISON";

/// Deterministic bag-of-words embedder. Each lowercase word sets one
/// hashed dimension; dimension 0 is a constant bias so no vector is zero.
/// The width defaults to [`DIMS`] and can be changed mid-test to stand in
/// for a reconfigured model.
pub struct BagOfWordsEmbedder {
    delay: Duration,
    dims: AtomicUsize,
    pub calls: AtomicUsize,
}

impl BagOfWordsEmbedder {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            dims: AtomicUsize::new(DIMS),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_dims(dims: usize) -> Self {
        let embedder = Self::new();
        embedder.set_dims(dims);
        embedder
    }

    pub fn set_dims(&self, dims: usize) {
        assert!(dims >= 2, "need room for the bias dimension");
        self.dims.store(dims, Ordering::SeqCst);
    }
}

fn word_slot(word: &str, dims: usize) -> usize {
    let mut h: u32 = 2166136261;
    for b in word.bytes() {
        h ^= b as u32;
        h = h.wrapping_mul(16777619);
    }
    1 + (h as usize % (dims - 1))
}

#[async_trait]
impl EmbeddingProvider for BagOfWordsEmbedder {
    fn model_name(&self) -> &str {
        "bag-of-words"
    }
    fn dims(&self) -> usize {
        self.dims.load(Ordering::SeqCst)
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let dims = self.dims();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if texts.iter().any(|t| t.contains(POISON)) {
            bail!("embedding service rejected the batch");
        }
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0; dims];
                v[0] = 0.1;
                for word in t
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|w| !w.is_empty())
                {
                    v[word_slot(&word.to_lowercase(), dims)] += 1.0;
                }
                v
            })
            .collect())
    }
}

/// Replies with the system message, which under the test prompt is the
/// retrieved context.
pub struct EchoChat;

#[async_trait]
impl ChatModel for EchoChat {
    fn model_name(&self) -> &str {
        "echo"
    }
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        Ok(messages
            .first()
            .map(|m| m.content.clone())
            .unwrap_or_default())
    }
}

pub struct FailingChat;

#[async_trait]
impl ChatModel for FailingChat {
    fn model_name(&self) -> &str {
        "failing"
    }
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        bail!("model endpoint returned 502")
    }
}

/// One scripted answer from [`ScriptedSource`].
pub enum Step {
    Corpus(Vec<String>),
    Slow(Duration, Vec<String>),
    Fail(String),
}

impl Step {
    pub fn corpus(texts: &[&str]) -> Self {
        Step::Corpus(texts.iter().map(|t| t.to_string()).collect())
    }

    pub fn slow(delay: Duration, texts: &[&str]) -> Self {
        Step::Slow(delay, texts.iter().map(|t| t.to_string()).collect())
    }

    pub fn fail(message: &str) -> Self {
        Step::Fail(message.to_string())
    }
}

/// Corpus source that plays back a script, one step per fetch, and records
/// when each fetch started and finished.
#[derive(Default)]
pub struct ScriptedSource {
    steps: Mutex<VecDeque<Step>>,
    pub fetches: Mutex<Vec<(Instant, Instant)>>,
}

impl ScriptedSource {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fetches: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().unwrap().push_back(step);
    }

    pub fn fetch_log(&self) -> Vec<(Instant, Instant)> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl CorpusSource for ScriptedSource {
    fn describe(&self) -> String {
        "scripted".to_string()
    }

    async fn fetch_corpus(&self) -> Result<Vec<Record>> {
        let started = Instant::now();
        let step = self.steps.lock().unwrap().pop_front();
        let result = match step {
            Some(Step::Corpus(texts)) => Ok(corpus_from_texts(texts)),
            Some(Step::Slow(delay, texts)) => {
                tokio::time::sleep(delay).await;
                Ok(corpus_from_texts(texts))
            }
            Some(Step::Fail(message)) => Err(anyhow::anyhow!(message)),
            None => Err(anyhow::anyhow!("script exhausted")),
        };
        self.fetches.lock().unwrap().push((started, Instant::now()));
        result
    }
}

/// Config pointing at `index_dir`, with a prompt whose system message is
/// exactly the retrieved context.
pub fn test_config(index_dir: &Path) -> Config {
    let toml = format!(
        r#"
[index]
dir = "{}"

[chunking]
chunk_size = 200
chunk_overlap = 20

[retrieval]
top_k = 2

[prompt]
system = "{{context}}"
human = "{{question}}"
"#,
        index_dir.display()
    );
    parse_config(&toml).unwrap()
}

pub async fn start_app(
    index_dir: &Path,
    source: Arc<ScriptedSource>,
    embedder: Arc<BagOfWordsEmbedder>,
    chat: Arc<dyn ChatModel>,
) -> App {
    App::with_providers(&test_config(index_dir), source, embedder, chat)
        .await
        .unwrap()
}

/// Generation directories currently under `index_dir`.
pub fn generation_dirs(index_dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(index_dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter(|n| n.starts_with("gen-"))
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}
