//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/pergunta` | Answer `{ "pergunta": "..." }` from the active generation |
//! | `POST` | `/reindexar` | Rebuild the index from the data source |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/status` | Active generation summary |
//!
//! When `[server].static_dir` is set, every other path is served from that
//! directory.
//!
//! # Response contract
//!
//! `/pergunta` always answers `{ "resposta": "..." }`:
//!
//! | Status | When |
//! |--------|------|
//! | 200 | answered |
//! | 400 | body missing, malformed, or without a non-empty `pergunta` |
//! | 503 | no generation is active yet |
//! | 500 | retrieval or generation failed |
//!
//! `/reindexar` always answers 200 with `{ "status": "ok" }` or
//! `{ "status": "vazio" }` (failure). Clients rely on these exact shapes.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the bundled web
//! front-end can be served from elsewhere.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{info, warn};

use crate::app::App;
use crate::config::Config;
use crate::coordinator::{HotSwapCoordinator, IndexStatus};
use crate::query::{Answer, QueryService, MISSING_QUESTION_MESSAGE};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<HotSwapCoordinator>,
    pub query: Arc<QueryService>,
}

impl From<&App> for AppState {
    fn from(app: &App) -> Self {
        Self {
            coordinator: app.coordinator.clone(),
            query: app.query.clone(),
        }
    }
}

/// Build the router. Unmatched paths go to `static_dir` when given.
pub fn router(state: AppState, static_dir: Option<&Path>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .route("/pergunta", post(handle_question))
        .route("/reindexar", post(handle_reindex))
        .route("/health", get(handle_health))
        .route("/status", get(handle_status));

    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(cors).with_state(state)
}

/// Run the HTTP server until Ctrl-C.
///
/// Binds to `[server].bind`. When `[server].reindex_on_startup` is set, a
/// reindex runs before the listener opens; its failure is logged and the
/// server starts anyway (queries then get the not-ready answer until a
/// successful `/reindexar`). On shutdown the active index is closed.
pub async fn run_server(config: &Config, app: App) -> anyhow::Result<()> {
    if config.server.reindex_on_startup {
        info!("running startup reindex");
        if !app.coordinator.reindex().await {
            warn!("startup reindex failed; serving whatever generation was already active");
        }
    }

    let router = router(AppState::from(&app), config.server.static_dir.as_deref());

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "listening");
    println!("ragd listening on http://{}", config.server.bind);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "could not listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested");
        })
        .await?;

    app.coordinator.shutdown().await;
    Ok(())
}

// ============ POST /pergunta ============

#[derive(Deserialize)]
struct QuestionRequest {
    pergunta: Option<String>,
}

#[derive(Serialize)]
struct AnswerBody {
    resposta: String,
}

fn answer_response(status: StatusCode, text: &str) -> Response {
    (
        status,
        Json(AnswerBody {
            resposta: text.to_string(),
        }),
    )
        .into_response()
}

/// Extract a usable question from a raw request body.
fn parse_question(body: &[u8]) -> Option<String> {
    let request: QuestionRequest = serde_json::from_slice(body).ok()?;
    request.pergunta.filter(|q| !q.trim().is_empty())
}

/// Handler for `POST /pergunta`.
///
/// The body is parsed by hand so that a malformed request still gets the
/// `resposta` shape instead of axum's rejection text.
async fn handle_question(State(state): State<AppState>, body: Bytes) -> Response {
    let Some(question) = parse_question(&body) else {
        return answer_response(StatusCode::BAD_REQUEST, MISSING_QUESTION_MESSAGE);
    };

    let answer = state.query.answer(&question).await;
    let status = match answer {
        Answer::Answered(_) => StatusCode::OK,
        Answer::NotReady => StatusCode::SERVICE_UNAVAILABLE,
        Answer::Degraded => StatusCode::INTERNAL_SERVER_ERROR,
    };
    answer_response(status, answer.text())
}

// ============ POST /reindexar ============

#[derive(Serialize)]
struct ReindexResponse {
    status: &'static str,
}

/// Handler for `POST /reindexar`. Waits for any reindex already running.
async fn handle_reindex(State(state): State<AppState>) -> Json<ReindexResponse> {
    let status = if state.coordinator.reindex().await {
        "ok"
    } else {
        "vazio"
    };
    Json(ReindexResponse { status })
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /status ============

async fn handle_status(State(state): State<AppState>) -> Json<IndexStatus> {
    Json(state.coordinator.status().await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_question() {
        assert_eq!(
            parse_question(br#"{"pergunta": "o que e RAG?"}"#).as_deref(),
            Some("o que e RAG?")
        );
        assert_eq!(parse_question(br#"{"pergunta": ""}"#), None);
        assert_eq!(parse_question(br#"{"pergunta": "   "}"#), None);
        assert_eq!(parse_question(br#"{"outra": "x"}"#), None);
        assert_eq!(parse_question(br#"{"pergunta": 42}"#), None);
        assert_eq!(parse_question(b"not json"), None);
        assert_eq!(parse_question(b""), None);
    }
}
