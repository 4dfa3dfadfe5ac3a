use serde_json::{Map, Value};

use super::types::{EnrichedLabel, EnrichmentRecord, LabelEvent};
use crate::store::Document;

/// Internal metadata fields that never leave the service.
const SENSITIVE_SUMMARY_FIELDS: [&str; 6] = [
    "_id",
    "id",
    "user",
    "timeline",
    "impressionOrder",
    "impressionTime",
];

/// First joined document, whether the join produced a list or a single value.
fn first_summary(summary: Option<Value>) -> Option<Map<String, Value>> {
    match summary? {
        Value::Array(items) => items.into_iter().find_map(|v| match v {
            Value::Object(obj) => Some(obj),
            _ => None,
        }),
        Value::Object(obj) => Some(obj),
        _ => None,
    }
}

pub fn redact_summary(mut summary: Map<String, Value>) -> Result<EnrichmentRecord, serde_json::Error> {
    for field in SENSITIVE_SUMMARY_FIELDS {
        summary.remove(field);
    }
    serde_json::from_value(Value::Object(summary))
}

/// Strip the outer `_id`, keep only the first joined metadata document and
/// strip its internal fields. A record without a match gets `summary: None`.
pub fn redact(mut record: Document) -> Result<EnrichedLabel, serde_json::Error> {
    record.remove("_id");
    let summary = first_summary(record.remove("summary"))
        .map(redact_summary)
        .transpose()?;
    let event: LabelEvent = serde_json::from_value(Value::Object(record))?;
    Ok(EnrichedLabel { event, summary })
}
