//! Narrow read interface to the event store, plus its two back ends.

pub mod data_api;
pub mod ejson;
pub mod memory;
pub mod pipeline;

use std::future::Future;
use std::time::Duration;

use serde_json::{Map, Value};

use pipeline::{Filter, Sort, Stage};

pub type Document = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store rate limit exceeded. Please retry later.")]
    RateLimited,

    #[error("store API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("store call timed out after {0}s")]
    Timeout(u64),

    #[error("malformed store response: {0}")]
    Decode(String),
}

/// Read and aggregate access to stored collections.
/// Implemented by `DataApiClient` for production and `MemoryStore` for
/// fixtures and tests.
pub trait EventStore {
    async fn read_page(
        &self,
        collection: &str,
        filter: &Filter,
        sort: &Sort,
        limit: u64,
        skip: u64,
    ) -> Result<Vec<Document>, StoreError>;

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: &[Stage],
    ) -> Result<Vec<Document>, StoreError>;

    async fn read_all(&self, collection: &str, filter: &Filter)
    -> Result<Vec<Document>, StoreError>;
}

/// Collection names, overridable through configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collections {
    pub labels: String,
    pub semantics: String,
    pub metadata: String,
    pub summary: String,
}

impl Default for Collections {
    fn default() -> Self {
        Self {
            labels: "labels".into(),
            semantics: "semantics".into(),
            metadata: "metadata2".into(),
            summary: "summary".into(),
        }
    }
}

/// Run a store call under a deadline.
pub async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(StoreError::Timeout(limit.as_secs())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_passes_through_results() {
        let ok = bounded(Duration::from_secs(1), async { Ok::<_, StoreError>(7) }).await;
        assert_eq!(ok.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_reports_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, StoreError>(())
        };
        let err = bounded(Duration::from_secs(2), slow).await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout(2)), "got: {err}");
    }
}
