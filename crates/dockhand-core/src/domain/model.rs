//! Model identifiers.
//!
//! A model id is `<maker>/<name>` (e.g. `acme/infer-7b`). The hub cache stores
//! it as a directory `models--acme--infer-7b`, and the container that serves it
//! carries that same name, so both directions are pure string rules.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::DockhandError;

const CACHE_PREFIX: &str = "models";
const SEPARATOR: &str = "--";

/// Identifier of an inference model (`<maker>/<name>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelId(String);

impl ModelId {
    /// `<maker>/<name>` 形式を検証して作成
    pub fn new(value: impl Into<String>) -> Result<Self, DockhandError> {
        let value = value.into();
        let valid = match value.split_once('/') {
            Some((maker, name)) => {
                is_segment(maker) && is_segment(name) && !name.contains('/')
            }
            None => false,
        };
        if valid {
            Ok(Self(value))
        } else {
            Err(DockhandError::InvalidModelId(value))
        }
    }

    /// `models--<maker>--<name>` から復元する。形式外なら `None`。
    pub fn from_cache_name(name: &str) -> Option<Self> {
        let name = name.trim_start_matches('/');
        let mut parts = name.split(SEPARATOR);
        let (Some(prefix), Some(maker), Some(model), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return None;
        };
        if prefix != CACHE_PREFIX {
            return None;
        }
        Self::new(format!("{maker}/{model}")).ok()
    }

    /// Container (and cache directory) name for this model.
    pub fn container_name(&self) -> String {
        format!(
            "{CACHE_PREFIX}{SEPARATOR}{}",
            self.0.replacen('/', SEPARATOR, 1)
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_segment(s: &str) -> bool {
    !s.is_empty()
        && !s.contains(SEPARATOR)
        && !s.chars().any(|c| c.is_whitespace() || c == ':')
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ModelId {
    type Error = DockhandError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ModelId> for String {
    fn from(id: ModelId) -> Self {
        id.0
    }
}
