//! Environment-driven settings.
//!
//! - `DATA_API_URL`, `DATA_API_KEY`: store endpoint and credentials (required
//!   unless a fixture file is given)
//! - `DATA_API_SOURCE` (default `Cluster0`), `DATA_API_DATABASE` (default `facebook`)
//! - `LABELSCOPE_COLLECTION_{LABELS,SEMANTICS,METADATA,SUMMARY}`: collection names
//! - `LABELSCOPE_KEYWORDS_DIR` (default `rss/keywords`)
//! - `LABELSCOPE_STORE_TIMEOUT_SECS` (default 20)

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::store::Collections;

const DEFAULT_DATA_SOURCE: &str = "Cluster0";
const DEFAULT_DATABASE: &str = "facebook";
const DEFAULT_KEYWORDS_DIR: &str = "rss/keywords";
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),

    #[error("invalid DATA_API_URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("DATA_API_URL must use http or https, got '{0}'")]
    InvalidScheme(String),

    #[error("invalid LABELSCOPE_STORE_TIMEOUT_SECS: '{0}'")]
    InvalidTimeout(String),
}

#[derive(Clone)]
pub struct DataApiSettings {
    pub url: url::Url,
    pub api_key: String,
    pub data_source: String,
    pub database: String,
}

impl std::fmt::Debug for DataApiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataApiSettings")
            .field("url", &self.url.as_str())
            .field("api_key", &"[REDACTED]")
            .field("data_source", &self.data_source)
            .field("database", &self.database)
            .finish()
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl DataApiSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw_url = non_empty(&lookup, "DATA_API_URL").ok_or(ConfigError::Missing("DATA_API_URL"))?;
        let url = url::Url::parse(&raw_url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidScheme(url.scheme().to_string()));
        }
        let api_key =
            non_empty(&lookup, "DATA_API_KEY").ok_or(ConfigError::Missing("DATA_API_KEY"))?;
        Ok(Self {
            url,
            api_key,
            data_source: non_empty(&lookup, "DATA_API_SOURCE")
                .unwrap_or_else(|| DEFAULT_DATA_SOURCE.to_string()),
            database: non_empty(&lookup, "DATA_API_DATABASE")
                .unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub collections: Collections,
    pub keywords_dir: PathBuf,
    pub store_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Collections::default();
        let collection = |key: &str, default: String| non_empty(&lookup, key).unwrap_or(default);
        let collections = Collections {
            labels: collection("LABELSCOPE_COLLECTION_LABELS", defaults.labels),
            semantics: collection("LABELSCOPE_COLLECTION_SEMANTICS", defaults.semantics),
            metadata: collection("LABELSCOPE_COLLECTION_METADATA", defaults.metadata),
            summary: collection("LABELSCOPE_COLLECTION_SUMMARY", defaults.summary),
        };

        let store_timeout = match non_empty(&lookup, "LABELSCOPE_STORE_TIMEOUT_SECS") {
            None => DEFAULT_STORE_TIMEOUT,
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => return Err(ConfigError::InvalidTimeout(raw)),
            },
        };

        Ok(Self {
            collections,
            keywords_dir: non_empty(&lookup, "LABELSCOPE_KEYWORDS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_KEYWORDS_DIR)),
            store_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.collections, Collections::default());
        assert_eq!(config.keywords_dir, PathBuf::from("rss/keywords"));
        assert_eq!(config.store_timeout, Duration::from_secs(20));
    }

    #[test]
    fn overrides_are_trimmed_and_applied() {
        let config = Config::from_lookup(lookup(&[
            ("LABELSCOPE_COLLECTION_METADATA", " metadata3 "),
            ("LABELSCOPE_KEYWORDS_DIR", "/srv/kw"),
            ("LABELSCOPE_STORE_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.collections.metadata, "metadata3");
        assert_eq!(config.collections.labels, "labels");
        assert_eq!(config.keywords_dir, PathBuf::from("/srv/kw"));
        assert_eq!(config.store_timeout, Duration::from_secs(5));
    }

    #[test]
    fn zero_or_garbage_timeout_is_rejected() {
        for raw in ["0", "soon", "-3"] {
            let err = Config::from_lookup(lookup(&[("LABELSCOPE_STORE_TIMEOUT_SECS", raw)]))
                .unwrap_err();
            assert!(matches!(err, ConfigError::InvalidTimeout(_)), "{raw}: {err}");
        }
    }

    #[test]
    fn data_api_requires_url_and_key() {
        let err = DataApiSettings::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATA_API_URL")));

        let err = DataApiSettings::from_lookup(lookup(&[("DATA_API_URL", "https://data.example")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATA_API_KEY")));
    }

    #[test]
    fn data_api_rejects_non_http_url() {
        let err = DataApiSettings::from_lookup(lookup(&[
            ("DATA_API_URL", "ftp://data.example"),
            ("DATA_API_KEY", "k"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidScheme(ref s) if s == "ftp"));
    }

    #[test]
    fn data_api_settings_debug_hides_key() {
        let settings = DataApiSettings::from_lookup(lookup(&[
            ("DATA_API_URL", "https://data.example/app/v1"),
            ("DATA_API_KEY", "secret-key"),
        ]))
        .unwrap();
        assert_eq!(settings.data_source, "Cluster0");
        assert_eq!(settings.database, "facebook");
        assert!(!format!("{settings:?}").contains("secret-key"));
    }
}
