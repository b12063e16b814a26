//! Error kinds surfaced at component boundaries.
//!
//! Lower layers return `anyhow::Error`; the coordinator and the query
//! service translate those into the kinds below, and the HTTP layer maps
//! the kinds onto fixed responses. No lower-level error reaches a client.

use thiserror::Error;

/// Why a reindex did not complete. In every case the previously active
/// generation is still the one being served.
#[derive(Debug, Error)]
pub enum ReindexError {
    #[error("data source unavailable: {0:#}")]
    DataSourceUnavailable(#[source] anyhow::Error),
    #[error("index build failed: {0:#}")]
    BuildFailure(#[source] anyhow::Error),
    #[error("could not promote generation {generation}: {source:#}")]
    SwapFailure {
        generation: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Why a question could not be answered.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("no index generation is active")]
    NotReady,
    #[error("retrieval failed: {0:#}")]
    Retrieval(#[source] anyhow::Error),
    #[error("answer generation failed: {0:#}")]
    Generation(#[source] anyhow::Error),
}
