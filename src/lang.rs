use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Languages with label coverage. Adding one here is the only way a code
/// becomes queryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Ar,
    De,
    En,
    Es,
    Fr,
    It,
    Nl,
    Pl,
    Pt,
    Ru,
}

impl Language {
    pub const COUNT: usize = 10;

    pub const ALL: [Language; Self::COUNT] = [
        Language::Ar,
        Language::De,
        Language::En,
        Language::Es,
        Language::Fr,
        Language::It,
        Language::Nl,
        Language::Pl,
        Language::Pt,
        Language::Ru,
    ];

    /// Total lookup: `None` is the unsupported branch.
    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.code() == code)
    }

    pub fn code(self) -> &'static str {
        match self {
            Language::Ar => "ar",
            Language::De => "de",
            Language::En => "en",
            Language::Es => "es",
            Language::Fr => "fr",
            Language::It => "it",
            Language::Nl => "nl",
            Language::Pl => "pl",
            Language::Pt => "pt",
            Language::Ru => "ru",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Language::Ar => "arabic",
            Language::De => "german",
            Language::En => "english",
            Language::Es => "spanish",
            Language::Fr => "french",
            Language::It => "italian",
            Language::Nl => "dutch",
            Language::Pl => "polish",
            Language::Pt => "portuguese",
            Language::Ru => "russian",
        }
    }

    /// Position in [`Language::ALL`], used to index per-language tables.
    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Code → name map returned to clients that asked for an unsupported code.
    pub fn supported() -> BTreeMap<&'static str, &'static str> {
        Self::ALL.into_iter().map(|l| (l.code(), l.name())).collect()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

pub fn is_valid_language(code: &str) -> bool {
    code.len() == 2 && Language::parse(code).is_some()
}
