//! MongoDB extended-JSON helpers: date encoding, field paths, and value ordering.

use std::cmp::Ordering;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Value, json};

/// Relaxed extended-JSON date, as accepted in Data API filters and pipelines.
pub fn date_value(ts: DateTime<Utc>) -> Value {
    json!({ "$date": iso(ts) })
}

/// ISO-8601 with millisecond precision and a `Z` suffix.
pub fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Accepts `"2024-01-01T00:00:00Z"`, `{"$date": "..."}`,
/// `{"$date": {"$numberLong": "..."}}`, `{"$date": 1700000000000}` and bare
/// integer milliseconds.
pub fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(from_millis),
        Value::Object(obj) => match obj.get("$date")? {
            Value::Object(inner) => inner
                .get("$numberLong")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<i64>().ok())
                .and_then(from_millis),
            other => parse_date(other),
        },
        _ => None,
    }
}

/// Counts come back plain in relaxed mode, wrapped (`{"$numberLong": "7"}`)
/// once they exceed 32 bits.
pub fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::Object(obj) => ["$numberInt", "$numberLong"]
            .iter()
            .find_map(|k| obj.get(*k))
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok()),
        _ => None,
    }
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Resolve a dotted path. An array met along the way fans out over its
/// elements and yields an array of the resolved values, skipping elements
/// where the rest of the path is missing.
pub fn get_path(doc: &Map<String, Value>, path: &str) -> Option<Value> {
    let (head, rest) = match path.split_once('.') {
        Some((h, r)) => (h, Some(r)),
        None => (path, None),
    };
    let value = doc.get(head)?;
    match rest {
        None => Some(value.clone()),
        Some(rest) => resolve_rest(value, rest),
    }
}

fn resolve_rest(value: &Value, rest: &str) -> Option<Value> {
    match value {
        Value::Object(obj) => get_path(obj, rest),
        Value::Array(items) => Some(Value::Array(
            items.iter().filter_map(|v| resolve_rest(v, rest)).collect(),
        )),
        _ => None,
    }
}

/// Total order over stored values, close enough to BSON ordering for the
/// pipelines built here: missing/null < numbers < strings < objects < arrays
/// < booleans < dates.
pub fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    if let (Some(da), Some(db)) = (a.and_then(parse_date), b.and_then(parse_date)) {
        return da.cmp(&db);
    }
    let (ra, rb) = (rank(a), rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
        _ => Ordering::Equal,
    }
}

fn rank(v: Option<&Value>) -> u8 {
    match v {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(o)) if o.contains_key("$date") => 6,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

/// `#[serde(with = "ejson::date")]` for `DateTime<Utc>` fields read from the store.
pub mod date {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::iso(*ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = Value::deserialize(d)?;
        super::parse_date(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("not a timestamp: {raw}")))
    }
}
