//! Question answering over the active generation.
//!
//! A query holds the coordinator's lock from the moment it looks at the
//! active generation until the model has answered, so a reindex can never
//! delete the index a query is reading.
//!
//! Failures never escape as errors to callers of [`QueryService::answer`]:
//! they become one of two fixed user-facing messages, and the underlying
//! cause is logged.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::coordinator::HotSwapCoordinator;
use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::QueryError;
use crate::llm::ChatModel;
use crate::prompt::PromptTemplate;

/// Returned when no generation is active.
pub const NOT_READY_MESSAGE: &str =
    "O sistema RAG não está pronto. Por favor, reindexe os dados.";
/// Returned when retrieval or generation fails.
pub const DEGRADED_MESSAGE: &str = "Desculpe, não consegui processar sua pergunta no momento.";
/// Returned by the HTTP layer for a missing or empty question.
pub const MISSING_QUESTION_MESSAGE: &str = "Por favor, forneça uma pergunta.";

/// Separator between retrieved chunks in the prompt context.
const CONTEXT_SEPARATOR: &str = "\n\n";

/// What a question produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Answered(String),
    NotReady,
    Degraded,
}

impl Answer {
    /// The text shown to the user.
    pub fn text(&self) -> &str {
        match self {
            Answer::Answered(text) => text,
            Answer::NotReady => NOT_READY_MESSAGE,
            Answer::Degraded => DEGRADED_MESSAGE,
        }
    }
}

pub struct QueryService {
    coordinator: Arc<HotSwapCoordinator>,
    embedder: Arc<dyn EmbeddingProvider>,
    chat: Arc<dyn ChatModel>,
    template: PromptTemplate,
    top_k: usize,
}

impl QueryService {
    pub fn new(
        coordinator: Arc<HotSwapCoordinator>,
        embedder: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatModel>,
        template: PromptTemplate,
        top_k: usize,
    ) -> Self {
        Self {
            coordinator,
            embedder,
            chat,
            template,
            top_k: top_k.max(1),
        }
    }

    pub async fn answer(&self, question: &str) -> Answer {
        match self.try_answer(question).await {
            Ok(text) => Answer::Answered(text),
            Err(QueryError::NotReady) => Answer::NotReady,
            Err(e) => {
                warn!(error = %e, "question could not be answered");
                Answer::Degraded
            }
        }
    }

    /// Answer `question` from the active generation.
    pub async fn try_answer(&self, question: &str) -> Result<String, QueryError> {
        let active = self.coordinator.lock().await;
        let Some(active) = active.as_ref() else {
            return Err(QueryError::NotReady);
        };

        let query_vec = embed_query(self.embedder.as_ref(), question)
            .await
            .map_err(QueryError::Retrieval)?;
        let hits = active
            .index()
            .query(&query_vec, self.top_k)
            .await
            .map_err(QueryError::Retrieval)?;
        debug!(
            generation = active.generation().id(),
            hits = hits.len(),
            "retrieved context"
        );

        let context = hits
            .iter()
            .map(|h| h.text.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);
        let messages = self.template.render(&context, question);

        self.chat
            .complete(&messages)
            .await
            .map_err(QueryError::Generation)
    }
}
