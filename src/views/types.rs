use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::lang::Language;
use crate::store::{Document, ejson};

/// One keyword occurrence. Fields the views do not interpret travel in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelEvent {
    pub semantic_id: String,
    pub lang: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(with = "ejson::date")]
    pub when: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub wp: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Metadata joined on `semanticId`. Only built by the redactor, so the
/// internal fields are already gone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nature: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedLabel {
    #[serde(flatten)]
    pub event: LabelEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<EnrichmentRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedKeyword {
    pub label: String,
    pub wp: Value,
    pub count: u64,
}

impl RankedKeyword {
    /// `None` for groups without a usable label (events missing `label`).
    pub fn from_document(doc: &Document) -> Option<Self> {
        Some(Self {
            label: doc.get("label")?.as_str()?.to_string(),
            wp: doc.get("wp").cloned().unwrap_or(Value::Null),
            count: doc.get("count").and_then(ejson::as_u64)?,
        })
    }
}

/// Cached per-language summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub considered_hours_window: u32,
    pub language: Language,
    pub most: Vec<String>,
    pub labels_count: u64,
    pub contributors: u64,
}

/// Formatted snapshot with its validity interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotView {
    pub content: Snapshot,
    #[serde(with = "ejson::date")]
    pub computed_at: DateTime<Utc>,
    #[serde(with = "ejson::date")]
    pub next: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Unit {
    pub labels: Vec<Map<String, Value>>,
    pub posts: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub amount: u32,
    pub skip: u32,
}

impl Paging {
    /// A zero amount is raised to one.
    pub fn new(amount: u32, skip: u32) -> Self {
        Self {
            amount: amount.max(1),
            skip,
        }
    }

    pub fn first(amount: u32) -> Self {
        Self::new(amount, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn label_event_reads_extended_json_and_keeps_extra_fields() {
        let event: LabelEvent = serde_json::from_value(json!({
            "_id": { "$oid": "65f0" },
            "semanticId": "abc",
            "lang": "en",
            "label": "climate",
            "when": { "$date": "2024-03-01T12:00:00Z" },
            "wp": "Climate_change",
            "confidence": 0.7
        }))
        .unwrap();
        assert_eq!(event.label.as_deref(), Some("climate"));
        assert_eq!(event.extra["confidence"], 0.7);
        assert!(event.extra.contains_key("_id"));

        let out = serde_json::to_value(&event).unwrap();
        assert_eq!(out["when"], "2024-03-01T12:00:00.000Z");
        assert_eq!(out["semanticId"], "abc");
    }

    #[test]
    fn snapshot_view_serializes_iso_timestamps() {
        let at = DateTime::parse_from_rfc3339("2024-03-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let view = SnapshotView {
            content: Snapshot {
                considered_hours_window: 48,
                language: Language::En,
                most: vec!["x".into()],
                labels_count: 4,
                contributors: 2,
            },
            computed_at: at,
            next: at + chrono::Duration::hours(12),
        };
        let out = serde_json::to_value(&view).unwrap();
        assert_eq!(out["computedAt"], "2024-03-01T00:00:00.000Z");
        assert_eq!(out["next"], "2024-03-01T12:00:00.000Z");
        assert_eq!(out["content"]["consideredHoursWindow"], 48);
        assert_eq!(out["content"]["language"], "en");
        assert_eq!(out["content"]["labelsCount"], 4);
    }

    #[test]
    fn ranked_keyword_skips_unlabelled_groups() {
        let doc = |v: Value| v.as_object().unwrap().clone();
        let k = RankedKeyword::from_document(&doc(json!({ "label": "x", "wp": "X", "count": 2 })))
            .unwrap();
        assert_eq!(k.count, 2);
        assert_eq!(k.wp, json!("X"));
        assert!(RankedKeyword::from_document(&doc(json!({ "label": null, "count": 4 }))).is_none());
        assert!(RankedKeyword::from_document(&doc(json!({ "label": "y" }))).is_none());
    }

    #[test]
    fn paging_never_has_zero_amount() {
        assert_eq!(Paging::new(0, 3), Paging { amount: 1, skip: 3 });
        assert_eq!(Paging::first(13), Paging { amount: 13, skip: 0 });
    }
}
