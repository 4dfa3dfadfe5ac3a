//! Per-language snapshot cache with a fixed TTL and lazy recomputation.
//!
//! Each language owns one entry behind its own async mutex. A refresh holds
//! the lock for the whole computation, so concurrent callers for the same
//! language wait for the in-flight result instead of recomputing, and no
//! reader sees a partially replaced entry.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use super::pipelines::{self, SNAPSHOT_MAX_ENTRIES, SNAPSHOT_TOP};
use super::types::{Paging, RankedKeyword, Snapshot, SnapshotView};
use crate::clock::Clock;
use crate::lang::Language;
use crate::store::{Collections, Document, EventStore, StoreError, bounded, ejson};

#[derive(Debug, Clone, PartialEq)]
pub struct LanguageSnapshot {
    pub lang_name: &'static str,
    pub content: Option<Snapshot>,
    pub computed_at: Option<DateTime<Utc>>,
    pub next: Option<DateTime<Utc>>,
}

impl LanguageSnapshot {
    fn empty(lang: Language) -> Self {
        Self {
            lang_name: lang.name(),
            content: None,
            computed_at: None,
            next: None,
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.content.is_some() && self.next.is_some_and(|next| now < next)
    }

    /// `None` until the first successful computation.
    pub fn view(&self) -> Option<SnapshotView> {
        Some(SnapshotView {
            content: self.content.clone()?,
            computed_at: self.computed_at?,
            next: self.next?,
        })
    }
}

pub struct SnapshotCache {
    entries: [Mutex<LanguageSnapshot>; Language::COUNT],
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self {
            entries: std::array::from_fn(|i| Mutex::new(LanguageSnapshot::empty(Language::ALL[i]))),
        }
    }

    /// Current entry without waiting. `None` while a refresh holds the lock.
    pub fn peek(&self, lang: Language) -> Option<LanguageSnapshot> {
        self.entries[lang.index()]
            .try_lock()
            .ok()
            .map(|entry| entry.clone())
    }

    /// Return the stored entry while it is fresh; otherwise run `compute`
    /// with the current time and commit its result with a new expiry. A
    /// failed computation leaves the previous entry in place.
    pub async fn get_or_refresh<F, Fut, E>(
        &self,
        lang: Language,
        clock: &impl Clock,
        ttl: Duration,
        compute: F,
    ) -> Result<LanguageSnapshot, E>
    where
        F: FnOnce(DateTime<Utc>) -> Fut,
        Fut: Future<Output = Result<Snapshot, E>>,
    {
        let mut entry = self.entries[lang.index()].lock().await;
        let now = clock.now();
        if entry.is_fresh(now) {
            debug!(%lang, "snapshot served from cache");
            return Ok(entry.clone());
        }

        debug!(%lang, "snapshot stale or empty, recomputing");
        let content = compute(now).await?;
        *entry = LanguageSnapshot {
            lang_name: lang.name(),
            content: Some(content),
            computed_at: Some(now),
            next: Some(now + ttl),
        };
        Ok(entry.clone())
    }
}

/// Gather the three snapshot inputs concurrently: top labels, distinct label
/// count, distinct contributor count.
pub async fn gather(
    store: &impl EventStore,
    collections: &Collections,
    limit: StdDuration,
    lang: Language,
    window_hours: u32,
    now: DateTime<Utc>,
) -> Result<Snapshot, StoreError> {
    let since = pipelines::window_start(now, window_hours);
    let ranking = pipelines::loud(lang, since, SNAPSHOT_MAX_ENTRIES, Paging::first(SNAPSHOT_TOP));
    let labels = pipelines::distinct_labels(lang, since, SNAPSHOT_MAX_ENTRIES);
    let people = pipelines::contributors(lang, since, SNAPSHOT_MAX_ENTRIES, &collections.metadata);

    let (ranked, label_docs, people_docs) = tokio::try_join!(
        bounded(limit, store.aggregate(&collections.semantics, &ranking)),
        bounded(limit, store.aggregate(&collections.semantics, &labels)),
        bounded(limit, store.aggregate(&collections.labels, &people)),
    )?;

    Ok(Snapshot {
        considered_hours_window: window_hours,
        language: lang,
        most: ranked
            .iter()
            .filter_map(RankedKeyword::from_document)
            .map(|k| k.label)
            .collect(),
        labels_count: label_docs
            .first()
            .and_then(|d| d.get("amount"))
            .and_then(ejson::as_u64)
            .unwrap_or(0),
        contributors: count_contributors(&people_docs),
    })
}

/// Distinct pseudonyms across the collected profile arrays. Missing data
/// counts as zero contributors.
pub fn count_contributors(docs: &[Document]) -> u64 {
    let Some(Value::Array(profiles)) = docs.first().and_then(|d| d.get("profiles")) else {
        return 0;
    };
    let mut seen = HashSet::new();
    let mut note = |v: &Value| match v {
        Value::Null => {}
        Value::String(s) => {
            seen.insert(s.clone());
        }
        other => {
            seen.insert(other.to_string());
        }
    };
    for profile in profiles {
        match profile {
            Value::Array(items) => items.iter().for_each(&mut note),
            other => note(other),
        }
    }
    seen.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn snapshot(labels_count: u64) -> Snapshot {
        Snapshot {
            considered_hours_window: 48,
            language: Language::En,
            most: vec![],
            labels_count,
            contributors: 0,
        }
    }

    fn doc(v: Value) -> Document {
        v.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn starts_empty_for_every_language() {
        let cache = SnapshotCache::new();
        for lang in Language::ALL {
            let entry = cache.peek(lang).unwrap();
            assert_eq!(entry.lang_name, lang.name());
            assert!(entry.content.is_none());
            assert!(entry.view().is_none());
        }
    }

    #[tokio::test]
    async fn fresh_entry_is_served_without_recomputing() {
        let cache = SnapshotCache::new();
        let clock = ManualClock::at("2024-03-01T00:00:00Z");
        let calls = AtomicUsize::new(0);
        let compute = |_: DateTime<Utc>| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, StoreError>(snapshot(1))
        };

        let first = cache
            .get_or_refresh(Language::En, &clock, Duration::hours(12), compute)
            .await
            .unwrap();
        clock.advance(Duration::hours(11));
        let second = cache
            .get_or_refresh(Language::En, &clock, Duration::hours(12), compute)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert_eq!(
            first.next.unwrap() - first.computed_at.unwrap(),
            Duration::hours(12)
        );
    }

    #[tokio::test]
    async fn stale_entry_is_recomputed_with_later_timestamp() {
        let cache = SnapshotCache::new();
        let clock = ManualClock::at("2024-03-01T00:00:00Z");

        let first = cache
            .get_or_refresh(Language::It, &clock, Duration::hours(12), |_: DateTime<Utc>| async {
                Ok::<_, StoreError>(snapshot(1))
            })
            .await
            .unwrap();
        clock.advance(Duration::hours(12));
        let second = cache
            .get_or_refresh(Language::It, &clock, Duration::hours(12), |_: DateTime<Utc>| async {
                Ok::<_, StoreError>(snapshot(2))
            })
            .await
            .unwrap();

        assert!(second.computed_at.unwrap() > first.computed_at.unwrap());
        assert_eq!(second.content.unwrap().labels_count, 2);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_entry() {
        let cache = SnapshotCache::new();
        let clock = ManualClock::at("2024-03-01T00:00:00Z");
        cache
            .get_or_refresh(Language::Fr, &clock, Duration::hours(1), |_: DateTime<Utc>| async {
                Ok::<_, StoreError>(snapshot(5))
            })
            .await
            .unwrap();
        clock.advance(Duration::hours(2));

        let err = cache
            .get_or_refresh(Language::Fr, &clock, Duration::hours(1), |_: DateTime<Utc>| async {
                Err::<Snapshot, _>(StoreError::Timeout(20))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout(20)));

        let kept = cache.peek(Language::Fr).unwrap();
        assert_eq!(kept.content.unwrap().labels_count, 5);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_recomputation() {
        let cache = SnapshotCache::new();
        let clock = ManualClock::at("2024-03-01T00:00:00Z");
        let calls = AtomicUsize::new(0);
        let compute = |_: DateTime<Utc>| async {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok::<_, StoreError>(snapshot(3))
        };

        let (a, b) = tokio::join!(
            cache.get_or_refresh(Language::De, &clock, Duration::hours(12), compute),
            cache.get_or_refresh(Language::De, &clock, Duration::hours(12), compute),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap(), b.unwrap());
    }

    #[tokio::test]
    async fn languages_refresh_independently() {
        let cache = SnapshotCache::new();
        let clock = ManualClock::at("2024-03-01T00:00:00Z");
        cache
            .get_or_refresh(Language::En, &clock, Duration::hours(12), |_: DateTime<Utc>| async {
                Ok::<_, StoreError>(snapshot(1))
            })
            .await
            .unwrap();
        assert!(cache.peek(Language::Es).unwrap().content.is_none());
    }

    #[tokio::test]
    async fn peek_does_not_wait_for_an_in_flight_refresh() {
        let cache = SnapshotCache::new();
        let clock = ManualClock::at("2024-03-01T00:00:00Z");
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let refresh = cache.get_or_refresh(
            Language::Nl,
            &clock,
            Duration::hours(12),
            |_: DateTime<Utc>| async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
                Ok::<_, StoreError>(snapshot(9))
            },
        );
        let observe = async {
            started_rx.await.unwrap();
            let during = cache.peek(Language::Nl);
            release_tx.send(()).unwrap();
            during
        };
        let (refreshed, during) = tokio::join!(refresh, observe);

        assert!(during.is_none());
        assert_eq!(refreshed.unwrap().content.unwrap().labels_count, 9);
        assert_eq!(
            cache.peek(Language::Nl).unwrap().content.unwrap().labels_count,
            9
        );
    }

    #[test]
    fn contributors_are_flattened_and_deduplicated() {
        let docs = vec![doc(json!({
            "_id": "dummy",
            "profiles": [["a", "b"], ["b", "c"], ["a"], ["c", "a"], []]
        }))];
        assert_eq!(count_contributors(&docs), 3);
    }

    #[test]
    fn missing_contributor_data_counts_zero() {
        assert_eq!(count_contributors(&[]), 0);
        assert_eq!(count_contributors(&[doc(json!({ "_id": "dummy" }))]), 0);
        assert_eq!(
            count_contributors(&[doc(json!({ "_id": "dummy", "profiles": null }))]),
            0
        );
    }
}
