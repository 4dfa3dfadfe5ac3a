use std::fmt;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::pipeline::{self, Filter, Sort, Stage};
use super::{Document, EventStore, StoreError};
use crate::config::DataApiSettings;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;
/// Requests carry extended JSON so `{"$date": ..}` bounds keep their type;
/// responses come back relaxed.
const EJSON: &str = "application/ejson";

#[derive(Clone)]
struct ApiKey(String);

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[derive(Deserialize)]
struct DocumentsResponse {
    documents: Vec<Document>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    error_code: Option<String>,
}

/// HTTP client for an Atlas Data API compatible endpoint
/// (`/action/find`, `/action/aggregate`).
#[derive(Clone, Debug)]
pub struct DataApiClient {
    http: Client,
    api_key: ApiKey,
    base_url: String,
    data_source: String,
    database: String,
}

impl DataApiClient {
    pub fn new(http: Client, settings: &DataApiSettings) -> Self {
        Self {
            http,
            api_key: ApiKey(settings.api_key.clone()),
            base_url: settings.url.as_str().trim_end_matches('/').to_string(),
            data_source: settings.data_source.clone(),
            database: settings.database.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_base_url(http: Client, base_url: &str) -> Self {
        Self {
            http,
            api_key: ApiKey("test-key".to_string()),
            base_url: base_url.to_string(),
            data_source: "Cluster0".to_string(),
            database: "test".to_string(),
        }
    }

    fn envelope(&self, collection: &str) -> serde_json::Map<String, Value> {
        let mut body = serde_json::Map::new();
        body.insert("dataSource".into(), json!(self.data_source));
        body.insert("database".into(), json!(self.database));
        body.insert("collection".into(), json!(collection));
        body
    }

    async fn post_once(&self, action: &str, body: &Value) -> Result<Vec<Document>, StoreError> {
        let url = format!("{}/action/{action}", self.base_url);

        let response = self
            .http
            .post(&url)
            .header("api-key", &self.api_key.0)
            .header("User-Agent", crate::USER_AGENT)
            .header(CONTENT_TYPE, EJSON)
            .header(ACCEPT, "application/json")
            .body(body.to_string())
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!(action, "store rate limited");
            return Err(StoreError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ErrorBody>(&text) {
                Ok(ErrorBody {
                    error: Some(error),
                    error_code,
                }) => match error_code {
                    Some(code) => format!("{code}: {error}"),
                    None => error,
                },
                _ => {
                    let end = text.floor_char_boundary(200);
                    format!("HTTP {status}: {}", &text[..end])
                }
            };
            warn!(action, status = %status, "store API error");
            return Err(StoreError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let text = response.text().await?;
        let parsed: DocumentsResponse =
            serde_json::from_str(&text).map_err(|e| StoreError::Decode(e.to_string()))?;
        debug!(action, documents = parsed.documents.len(), "store call complete");
        Ok(parsed.documents)
    }

    async fn post(&self, action: &str, body: Value) -> Result<Vec<Document>, StoreError> {
        let mut last_err = None;
        for attempt in 0..MAX_RETRIES {
            match self.post_once(action, &body).await {
                Ok(docs) => return Ok(docs),
                Err(e) if is_retriable(&e) => {
                    last_err = Some(e);
                    if attempt + 1 < MAX_RETRIES {
                        let delay_ms = jittered_backoff(attempt);
                        debug!(
                            attempt = attempt + 1,
                            delay_ms, "retrying after transient store error"
                        );
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(StoreError::RateLimited))
    }
}

fn is_retriable(e: &StoreError) -> bool {
    matches!(
        e,
        StoreError::RateLimited
            | StoreError::Api {
                code: 500..=599,
                ..
            }
    )
}

/// Equal jitter backoff: base/2 + rand(0, base/2).
fn jittered_backoff(attempt: u32) -> u64 {
    let base = INITIAL_BACKOFF_MS * 2u64.pow(attempt);
    let half = base / 2;
    half + fastrand::u64(..half.max(1))
}

impl EventStore for DataApiClient {
    async fn read_page(
        &self,
        collection: &str,
        filter: &Filter,
        sort: &Sort,
        limit: u64,
        skip: u64,
    ) -> Result<Vec<Document>, StoreError> {
        let mut body = self.envelope(collection);
        body.insert("filter".into(), filter.to_json());
        body.insert("sort".into(), sort.to_json());
        body.insert("limit".into(), json!(limit));
        body.insert("skip".into(), json!(skip));
        self.post("find", Value::Object(body)).await
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: &[Stage],
    ) -> Result<Vec<Document>, StoreError> {
        let mut body = self.envelope(collection);
        body.insert("pipeline".into(), pipeline::to_json(pipeline));
        self.post("aggregate", Value::Object(body)).await
    }

    async fn read_all(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<Document>, StoreError> {
        let mut body = self.envelope(collection);
        body.insert("filter".into(), filter.to_json());
        self.post("find", Value::Object(body)).await
    }
}
