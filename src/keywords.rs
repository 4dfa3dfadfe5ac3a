//! Static keyword lists maintained next to the service and returned verbatim.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::lang::Language;

const AVAILABLE_FILE: &str = "available.json";

#[derive(Debug, thiserror::Error)]
pub enum KeywordError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct KeywordFiles {
    dir: PathBuf,
}

impl KeywordFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn load(&self, name: &str) -> Result<Value, KeywordError> {
        let path = self.dir.join(name);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| KeywordError::Io {
                path: display(&path),
                source,
            })?;
        let value = serde_json::from_str(&raw).map_err(|source| KeywordError::Parse {
            path: display(&path),
            source,
        })?;
        debug!(path = %path.display(), "keyword file loaded");
        Ok(value)
    }

    /// Languages that currently have a keyword list.
    pub async fn available(&self) -> Result<Value, KeywordError> {
        self.load(AVAILABLE_FILE).await
    }

    pub async fn for_language(&self, lang: Language) -> Result<Value, KeywordError> {
        self.load(&format!("{}.json", lang.code())).await
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
