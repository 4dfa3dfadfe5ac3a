//! Read-only views over label events: paged listings, ranked keywords,
//! enrichment joins and cached per-language snapshots.

pub mod cache;
mod errors;
pub mod pipelines;
pub mod redact;
pub mod types;

pub use errors::{ViewError, reply};

use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::keywords::KeywordFiles;
use crate::lang::{Language, is_valid_language};
use crate::store::pipeline::Filter;
use crate::store::{Collections, Document, EventStore, bounded};
use cache::SnapshotCache;
use pipelines::{LOUD_MAX_ENTRIES, LOUD_WINDOW_HOURS};
use types::{EnrichedLabel, LabelEvent, Paging, RankedKeyword, SnapshotView, Unit};

pub const DEFAULT_LIST_AMOUNT: u32 = 100;
pub const DEFAULT_JOIN_AMOUNT: u32 = 13;
pub const SNAPSHOT_WINDOW_HOURS: u32 = 48;
pub const SNAPSHOT_TTL_HOURS: i64 = 12;

fn parse_language(code: &str) -> Result<Language, ViewError> {
    if !is_valid_language(code) {
        return Err(ViewError::UnsupportedLanguage(code.to_string()));
    }
    Language::parse(code).ok_or_else(|| ViewError::UnsupportedLanguage(code.to_string()))
}

/// Malformed documents are dropped with a warning rather than failing the page.
fn decode_events(docs: Vec<Document>) -> Vec<LabelEvent> {
    docs.into_iter()
        .filter_map(|doc| match serde_json::from_value(Value::Object(doc)) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(%e, "skipping malformed label event");
                None
            }
        })
        .collect()
}

fn redact_all(docs: Vec<Document>) -> Vec<EnrichedLabel> {
    docs.into_iter()
        .filter_map(|doc| match redact::redact(doc) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(%e, "skipping malformed joined record");
                None
            }
        })
        .collect()
}

/// Noogle rows carry `{_id, latest, summary: [..], labels: [..]}`; the first
/// label document becomes the record and the metadata list its summary.
fn regroup(mut row: Document) -> Option<Document> {
    let base = match row.remove("labels") {
        Some(Value::Array(labels)) => labels.into_iter().find_map(|v| match v {
            Value::Object(obj) => Some(obj),
            _ => None,
        }),
        _ => None,
    };
    let Some(mut base) = base else {
        let semantic_id = row.get("_id").cloned().unwrap_or(serde_json::Value::Null);
        warn!(%semantic_id, "no label document for group");
        return None;
    };
    base.insert(
        "summary".into(),
        row.remove("summary").unwrap_or(Value::Array(Vec::new())),
    );
    Some(base)
}

fn log_enrichment(op: &str, records: &[EnrichedLabel]) {
    let missing = records.iter().filter(|r| r.summary.is_none()).count();
    let outline: Vec<String> = records
        .iter()
        .map(|r| match &r.summary {
            Some(s) => match (&s.source, &s.nature) {
                (Some(source), Some(nature)) => format!("{source}/{nature}"),
                _ => "incomplete".to_string(),
            },
            None => "missing".to_string(),
        })
        .collect();
    if missing > 0 {
        debug!(op, missing, "records without enrichment");
    }
    debug!(op, records = records.len(), ?outline, "enrichment outline");
}

/// Query façade over an [`EventStore`]. Owns the snapshot cache for its
/// whole lifetime.
pub struct SemanticViews<S, C = SystemClock> {
    store: S,
    collections: Collections,
    keywords: KeywordFiles,
    cache: SnapshotCache,
    clock: C,
    store_timeout: Duration,
}

impl<S: EventStore> SemanticViews<S> {
    pub fn new(store: S, config: &Config) -> Self {
        Self::with_clock(store, config, SystemClock)
    }
}

impl<S: EventStore, C: Clock> SemanticViews<S, C> {
    pub fn with_clock(store: S, config: &Config, clock: C) -> Self {
        Self {
            store,
            collections: config.collections.clone(),
            keywords: KeywordFiles::new(&config.keywords_dir),
            cache: SnapshotCache::new(),
            clock,
            store_timeout: config.store_timeout,
        }
    }

    async fn list_collection(
        &self,
        collection: &str,
        code: &str,
        paging: Paging,
    ) -> Result<Vec<LabelEvent>, ViewError> {
        let lang = parse_language(code)?;
        let query = pipelines::paged_window(lang, paging);
        let docs = bounded(
            self.store_timeout,
            self.store.read_page(collection, &query.filter, &query.sort, query.limit, query.skip),
        )
        .await?;
        debug!(collection, rows = docs.len(), amount = paging.amount, skip = paging.skip, "page read");
        Ok(decode_events(docs))
    }

    /// Newest label documents for a language, full history.
    pub async fn list_labels(&self, code: &str, paging: Paging) -> Result<Vec<LabelEvent>, ViewError> {
        info!(lang = code, amount = paging.amount, skip = paging.skip, "view:labels");
        self.list_collection(&self.collections.labels, code, paging).await
    }

    /// Newest semantic documents for a language, full history.
    pub async fn list_semantics(
        &self,
        code: &str,
        paging: Paging,
    ) -> Result<Vec<LabelEvent>, ViewError> {
        info!(lang = code, amount = paging.amount, skip = paging.skip, "view:semantics");
        self.list_collection(&self.collections.semantics, code, paging).await
    }

    pub async fn list_enriched(
        &self,
        code: &str,
        paging: Paging,
    ) -> Result<Vec<EnrichedLabel>, ViewError> {
        let lang = parse_language(code)?;
        info!(%lang, amount = paging.amount, skip = paging.skip, "view:enrich");

        let stages = pipelines::enrich(lang, self.clock.now(), paging, &self.collections.metadata);
        let docs = bounded(
            self.store_timeout,
            self.store.aggregate(&self.collections.labels, &stages),
        )
        .await?;
        let records = redact_all(docs);
        log_enrichment("enrich", &records);
        Ok(records)
    }

    pub async fn list_ranked_keywords(
        &self,
        code: &str,
        paging: Paging,
    ) -> Result<Vec<RankedKeyword>, ViewError> {
        let lang = parse_language(code)?;
        info!(%lang, amount = paging.amount, skip = paging.skip, "view:loud");

        let since = pipelines::window_start(self.clock.now(), LOUD_WINDOW_HOURS);
        let stages = pipelines::loud(lang, since, LOUD_MAX_ENTRIES, paging);
        let docs = bounded(
            self.store_timeout,
            self.store.aggregate(&self.collections.semantics, &stages),
        )
        .await?;
        let ranked: Vec<RankedKeyword> = docs.iter().filter_map(RankedKeyword::from_document).collect();
        debug!(labels = ?ranked.iter().map(|k| k.label.as_str()).collect::<Vec<_>>(), "loudness");
        Ok(ranked)
    }

    pub async fn list_grouped(
        &self,
        code: &str,
        label: &str,
        paging: Paging,
    ) -> Result<Vec<EnrichedLabel>, ViewError> {
        let lang = parse_language(code)?;
        if label.trim().is_empty() {
            return Err(ViewError::InvalidArgument("label must not be empty"));
        }
        info!(%lang, label, amount = paging.amount, skip = paging.skip, "view:noogle");

        let stages = pipelines::noogle(lang, label, paging, &self.collections);
        let rows = bounded(
            self.store_timeout,
            self.store.aggregate(&self.collections.semantics, &stages),
        )
        .await?;
        let records = redact_all(rows.into_iter().filter_map(regroup).collect());
        log_enrichment("noogle", &records);
        Ok(records)
    }

    /// Cached summary for a language, recomputed once its TTL has elapsed.
    pub async fn language_snapshot(&self, code: &str) -> Result<SnapshotView, ViewError> {
        let lang = parse_language(code)?;
        info!(%lang, "view:langinfo");

        let entry = self
            .cache
            .get_or_refresh(
                lang,
                &self.clock,
                chrono::Duration::hours(SNAPSHOT_TTL_HOURS),
                |now| {
                    cache::gather(
                        &self.store,
                        &self.collections,
                        self.store_timeout,
                        lang,
                        SNAPSHOT_WINDOW_HOURS,
                        now,
                    )
                },
            )
            .await?;
        debug!(language = entry.lang_name, next = ?entry.next, "snapshot ready");
        entry.view().ok_or(ViewError::SnapshotUnavailable(lang))
    }

    /// Last computed snapshot without triggering a refresh, stale or not.
    /// Never waits: while a refresh for the language is in flight this
    /// reports the snapshot as unavailable.
    pub fn cached_snapshot(&self, code: &str) -> Result<SnapshotView, ViewError> {
        let lang = parse_language(code)?;
        self.cache
            .peek(lang)
            .and_then(|entry| entry.view())
            .ok_or(ViewError::SnapshotUnavailable(lang))
    }

    /// Languages with a keyword list, next to every supported language.
    pub async fn languages(&self) -> Result<Value, ViewError> {
        info!("view:languages");
        let available = self.keywords.available().await?;
        debug!(
            available = available.as_array().map_or(0, Vec::len),
            potential = Language::ALL.len(),
            "languages loaded"
        );
        Ok(json!({
            "available": available,
            "potential": Language::supported(),
        }))
    }

    pub async fn keywords(&self, code: &str) -> Result<Value, ViewError> {
        let lang = parse_language(code)?;
        info!(%lang, "view:keywords");
        Ok(self.keywords.for_language(lang).await?)
    }

    /// Every label and post recorded for one content id, internal ids removed.
    pub async fn unit(&self, semantic_id: &str) -> Result<Unit, ViewError> {
        if semantic_id.trim().is_empty() {
            return Err(ViewError::InvalidArgument("semantic id must not be empty"));
        }
        info!(semantic_id, "view:unit");

        let filter = Filter::semantic_id(semantic_id);
        let (labels, posts) = tokio::try_join!(
            bounded(
                self.store_timeout,
                self.store.read_all(&self.collections.semantics, &filter)
            ),
            bounded(
                self.store_timeout,
                self.store.read_all(&self.collections.summary, &filter)
            ),
        )?;
        debug!(labels = labels.len(), posts = posts.len(), "unit found");

        let strip = |docs: Vec<Document>| -> Vec<Document> {
            docs.into_iter()
                .map(|mut d| {
                    d.remove("_id");
                    d
                })
                .collect()
        };
        Ok(Unit {
            labels: strip(labels),
            posts: strip(posts),
        })
    }
}
