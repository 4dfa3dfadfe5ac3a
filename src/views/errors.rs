use serde::Serialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::keywords::KeywordError;
use crate::lang::Language;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    #[error("unsupported language '{0}'")]
    UnsupportedLanguage(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("snapshot for '{0}' has not been computed yet")]
    SnapshotUnavailable(Language),

    #[error("keyword list unavailable: {0}")]
    KeywordsUnavailable(#[from] KeywordError),
}

impl ViewError {
    pub fn kind(&self) -> &'static str {
        match self {
            ViewError::UnsupportedLanguage(_) => "unsupported_language",
            ViewError::InvalidArgument(_) => "invalid_argument",
            ViewError::StoreUnavailable(_) => "store_unavailable",
            ViewError::SnapshotUnavailable(_) => "snapshot_unavailable",
            ViewError::KeywordsUnavailable(_) => "keywords_unavailable",
        }
    }

    /// Structured failure body. Unsupported languages carry the supported
    /// set so clients can correct themselves.
    pub fn to_payload(&self) -> Value {
        let mut body = json!({
            "error": true,
            "kind": self.kind(),
            "message": self.to_string(),
        });
        if matches!(self, ViewError::UnsupportedLanguage(_)) {
            body["supported"] = json!(Language::supported());
        }
        body
    }
}

/// Envelope for every operation: `{"content": ..}` or a failure body.
pub fn reply<T: Serialize>(result: Result<T, ViewError>) -> Value {
    match result {
        Ok(payload) => match serde_json::to_value(&payload) {
            Ok(content) => json!({ "content": content }),
            Err(e) => {
                warn!(%e, "failed to serialize reply");
                json!({ "error": true, "kind": "internal", "message": e.to_string() })
            }
        },
        Err(e) => {
            if matches!(
                e,
                ViewError::StoreUnavailable(_) | ViewError::KeywordsUnavailable(_)
            ) {
                warn!(error = %e, "view failed");
            }
            e.to_payload()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_wrapped_in_content() {
        let out = reply(Ok::<_, ViewError>(vec![1, 2]));
        assert_eq!(out, json!({ "content": [1, 2] }));
    }

    #[test]
    fn unsupported_language_lists_supported_set() {
        let out = reply::<()>(Err(ViewError::UnsupportedLanguage("zz".into())));
        assert_eq!(out["error"], true);
        assert_eq!(out["kind"], "unsupported_language");
        assert!(out["message"].as_str().unwrap().contains("zz"));
        let supported = out["supported"].as_object().unwrap();
        assert_eq!(supported.len(), Language::ALL.len());
        assert_eq!(supported["en"], "english");
    }

    #[test]
    fn store_failures_are_typed_not_raw() {
        let out = reply::<()>(Err(StoreError::Timeout(20).into()));
        assert_eq!(out["kind"], "store_unavailable");
        assert!(out["message"].as_str().unwrap().contains("timed out"));
        assert!(out.get("supported").is_none());
    }

    #[test]
    fn snapshot_unavailable_has_its_own_kind() {
        let out = reply::<()>(Err(ViewError::SnapshotUnavailable(Language::Pt)));
        assert_eq!(out["kind"], "snapshot_unavailable");
        assert!(out["message"].as_str().unwrap().contains("pt"));
    }
}
