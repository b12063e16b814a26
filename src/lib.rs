//! # Hot-swap RAG
//!
//! A retrieval-augmented question-answering service whose vector index can
//! be rebuilt from its data source while the service keeps running.
//!
//! Each rebuild produces a new *generation* in its own directory. Only after
//! the build succeeds is the generation promoted, in one step, to be the one
//! queries read; the previous generation is then closed and deleted. A
//! failed rebuild leaves the previous generation serving.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌───────────────────┐
//! │ CorpusSource│──▶│ build_index      │──▶│ gen-<id>/         │
//! │ MySQL / FS  │   │ chunk + embed    │   │   index.sqlite    │
//! └─────────────┘   └──────────────────┘   └─────────┬─────────┘
//!                                                    │ ACTIVE
//!                   ┌──────────────────┐             ▼
//!  POST /reindexar─▶│HotSwapCoordinator│◀── one lock ──┐
//!                   └──────────────────┘               │
//!  POST /pergunta ─▶ QueryService: embed → top-k → ChatModel
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`source`] | Corpus sources (MySQL, filesystem) |
//! | [`chunk`] | Recursive character splitting |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Chat model abstraction |
//! | [`prompt`] | Typed prompt templates |
//! | [`store`] | Per-generation SQLite vector index |
//! | [`builder`] | Corpus → index build |
//! | [`generation`] | Generation lifecycle and on-disk layout |
//! | [`coordinator`] | Hot-swap reindex protocol |
//! | [`reaper`] | Startup orphan cleanup |
//! | [`query`] | Question answering |
//! | [`server`] | HTTP API |
//! | [`app`] | Startup wiring |

pub mod app;
pub mod builder;
pub mod chunk;
pub mod config;
pub mod coordinator;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod query;
pub mod reaper;
pub mod server;
pub mod source;
pub mod store;
