//! HTTP contract tests, driving the router in-process.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use common::{start_app, BagOfWordsEmbedder, EchoChat, FailingChat, ScriptedSource, Step};
use hotswap_rag::llm::ChatModel;
use hotswap_rag::query::{DEGRADED_MESSAGE, MISSING_QUESTION_MESSAGE, NOT_READY_MESSAGE};
use hotswap_rag::server::{router, AppState};

async fn test_router(
    index_dir: &Path,
    steps: Vec<Step>,
    chat: Arc<dyn ChatModel>,
    static_dir: Option<&Path>,
) -> Router {
    let app = start_app(
        index_dir,
        Arc::new(ScriptedSource::new(steps)),
        Arc::new(BagOfWordsEmbedder::new()),
        chat,
    )
    .await;
    router(AppState::from(&app), static_dir)
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn ask(router: &Router, body: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/pergunta")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, body) = send(router, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn reindex(router: &Router) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/reindexar")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(router, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn get_json(router: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, body) = send(router, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_missing_or_malformed_question_is_400() {
    let tmp = TempDir::new().unwrap();
    let router = test_router(tmp.path(), vec![], Arc::new(EchoChat), None).await;

    for body in ["", "{}", "not json", r#"{"pergunta": ""}"#, r#"{"pergunta": 7}"#] {
        let (status, json) = ask(&router, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body: {:?}", body);
        assert_eq!(json["resposta"], MISSING_QUESTION_MESSAGE);
    }
}

#[tokio::test]
async fn test_question_before_reindex_is_503() {
    let tmp = TempDir::new().unwrap();
    let router = test_router(tmp.path(), vec![], Arc::new(EchoChat), None).await;

    let (status, json) = ask(&router, r#"{"pergunta": "o que é RAG?"}"#).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["resposta"], NOT_READY_MESSAGE);
}

#[tokio::test]
async fn test_reindex_then_answer() {
    let tmp = TempDir::new().unwrap();
    let router = test_router(
        tmp.path(),
        vec![Step::corpus(&[
            "RAG combina busca e geração de texto.",
            "O gato dorme no sofá.",
        ])],
        Arc::new(EchoChat),
        None,
    )
    .await;

    let (status, json) = reindex(&router).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, serde_json::json!({ "status": "ok" }));

    let (status, json) = ask(&router, r#"{"pergunta": "o que é RAG?"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["resposta"].as_str().unwrap().contains("RAG combina"));

    let (status, json) = get_json(&router, "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ready"], true);
    assert_eq!(json["chunks"], 2);
    assert_eq!(json["state"], "ACTIVE");
}

#[tokio::test]
async fn test_failed_reindex_reports_vazio() {
    let tmp = TempDir::new().unwrap();
    let router = test_router(
        tmp.path(),
        vec![Step::fail("Can't connect to MySQL server")],
        Arc::new(EchoChat),
        None,
    )
    .await;

    let (status, json) = reindex(&router).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, serde_json::json!({ "status": "vazio" }));

    let (status, _) = ask(&router, r#"{"pergunta": "oi"}"#).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_empty_corpus_reindex_reports_ok() {
    let tmp = TempDir::new().unwrap();
    let router = test_router(tmp.path(), vec![Step::corpus(&[])], Arc::new(EchoChat), None).await;

    let (_, json) = reindex(&router).await;
    assert_eq!(json["status"], "ok");

    let (_, json) = get_json(&router, "/status").await;
    assert_eq!(json["ready"], false);
}

#[tokio::test]
async fn test_generation_failure_is_500() {
    let tmp = TempDir::new().unwrap();
    let router = test_router(
        tmp.path(),
        vec![Step::corpus(&["conteúdo qualquer"])],
        Arc::new(FailingChat),
        None,
    )
    .await;

    reindex(&router).await;
    let (status, json) = ask(&router, r#"{"pergunta": "conteúdo?"}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["resposta"], DEGRADED_MESSAGE);
}

#[tokio::test]
async fn test_health_reports_version() {
    let tmp = TempDir::new().unwrap();
    let router = test_router(tmp.path(), vec![], Arc::new(EchoChat), None).await;

    let (status, json) = get_json(&router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_static_files_served_for_unmatched_paths() {
    let tmp = TempDir::new().unwrap();
    let web = tmp.path().join("web");
    std::fs::create_dir_all(&web).unwrap();
    std::fs::write(web.join("index.html"), "<h1>Assistente</h1>").unwrap();

    let router = test_router(
        &tmp.path().join("index"),
        vec![],
        Arc::new(EchoChat),
        Some(&web),
    )
    .await;

    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(body).unwrap(), "<h1>Assistente</h1>");

    let request = Request::builder()
        .uri("/missing.js")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
