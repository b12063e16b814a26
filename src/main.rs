//! # Hot-swap RAG daemon (`ragd`)
//!
//! Serves retrieval-augmented answers over an index that can be rebuilt
//! while the service runs.
//!
//! ## Usage
//!
//! ```bash
//! ragd --config ./config/ragd.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragd serve` | Start the HTTP server (reindexes first unless disabled) |
//! | `ragd reindex` | Rebuild the index once and exit |
//! | `ragd ask "<question>"` | Answer one question from the active index |
//! | `ragd status` | Show the active generation |
//! | `ragd reap` | Remove orphaned generation directories |
//!
//! `serve` and `reindex` own the index directory: they run the orphan scan
//! first, which deletes any generation a concurrently running process is
//! building. Run at most one of them per directory. `ask` and `status`
//! only read and are safe next to a running server.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hotswap_rag::app::App;
use hotswap_rag::config;
use hotswap_rag::coordinator::ReindexOutcome;
use hotswap_rag::generation::IndexLayout;
use hotswap_rag::reaper::reap_orphans;
use hotswap_rag::server;
use hotswap_rag::store::VectorIndex;

/// Hot-swap RAG daemon: question answering over a corpus that can be
/// reindexed without downtime.
#[derive(Parser)]
#[command(name = "ragd", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragd.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve {
        /// Skip the startup reindex even if the config enables it.
        #[arg(long)]
        no_reindex: bool,
    },

    /// Rebuild the index from the data source once.
    Reindex,

    /// Answer a single question from the active index (read only).
    Ask { question: String },

    /// Show the active generation (read only).
    Status,

    /// Remove generation directories not named by the active pointer.
    ///
    /// Do not run this while a reindex is in progress elsewhere.
    Reap,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()
        .ok();

    let cli = Cli::parse();
    let mut cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve { no_reindex } => {
            if no_reindex {
                cfg.server.reindex_on_startup = false;
            }
            let app = App::start(&cfg).await?;
            server::run_server(&cfg, app).await?;
        }
        Commands::Reindex => {
            let app = App::start(&cfg).await?;
            let result = app.coordinator.try_reindex().await;
            app.coordinator.shutdown().await;
            match result? {
                ReindexOutcome::Swapped {
                    generation,
                    chunks,
                    retired,
                    retired_cleanup_failed,
                } => {
                    println!("Active generation: gen-{} ({} chunks)", generation, chunks);
                    if let Some(old) = retired {
                        let note = if retired_cleanup_failed {
                            " (directory left behind; removed at next start)"
                        } else {
                            ""
                        };
                        println!("Retired: gen-{}{}", old, note);
                    }
                }
                ReindexOutcome::Cleared { removed, .. } => {
                    println!("Corpus is empty; index cleared.");
                    if let Some(old) = removed {
                        println!("Removed: gen-{}", old);
                    }
                }
            }
        }
        Commands::Ask { question } => {
            let app = App::attach(&cfg).await?;
            let answer = app.query.answer(&question).await;
            app.coordinator.shutdown().await;
            println!("{}", answer.text());
        }
        Commands::Status => {
            let layout = IndexLayout::new(&cfg.index.dir);
            let Some(id) = layout.read_active() else {
                println!("Not ready: no active generation.");
                return Ok(());
            };
            let index = VectorIndex::open(&layout.generation_path(&id)).await?;
            let manifest = index.manifest().clone();
            let chunks = index.chunk_count();
            index.close().await;

            println!("Active generation: gen-{}", id);
            println!("  chunks:     {}", chunks);
            println!("  model:      {}", manifest.model);
            println!("  dims:       {}", manifest.dims);
            println!("  created_at: {}", manifest.created_at);
        }
        Commands::Reap => {
            let report = reap_orphans(&IndexLayout::new(&cfg.index.dir));
            println!(
                "Active: {}",
                report
                    .kept
                    .as_deref()
                    .map(|id| format!("gen-{}", id))
                    .unwrap_or_else(|| "none".to_string())
            );
            for path in &report.removed {
                println!("Removed: {}", path.display());
            }
            for path in &report.failed {
                println!("Failed:  {}", path.display());
            }
            if !report.failed.is_empty() {
                anyhow::bail!("{} orphan(s) could not be removed", report.failed.len());
            }
        }
    }

    Ok(())
}
