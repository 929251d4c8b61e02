//! Service configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::errors::DockhandError;
use crate::domain::launch::DEFAULT_TOOL_CALL_PARSER;

/// DockhandConfig はサービス全体の設定
///
/// JSON ファイルから読み込める。省略したフィールドはデフォルト値。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockhandConfig {
    /// Image that serves one model per container.
    pub image: String,
    /// Host model cache, mounted read-only into every container.
    pub host_cache_dir: PathBuf,
    pub container_cache_dir: PathBuf,
    /// Log line pattern that marks the model server as ready.
    pub readiness_pattern: String,
    /// Deadline for `start_awaiting` when the caller gives none.
    pub readiness_timeout_secs: Option<u64>,
    /// Grace period handed to the runtime on stop.
    pub stop_timeout_secs: u64,
    pub notify_timeout_ms: u64,
    pub default_tool_call_parser: String,
}

impl Default for DockhandConfig {
    fn default() -> Self {
        Self {
            image: "vllm/vllm-openai:latest".to_string(),
            host_cache_dir: PathBuf::from("/root/.cache/huggingface"),
            container_cache_dir: PathBuf::from("/root/.cache/huggingface"),
            readiness_pattern: r"Application startup complete|Uvicorn running on".to_string(),
            readiness_timeout_secs: Some(600),
            stop_timeout_secs: 30,
            notify_timeout_ms: 2000,
            default_tool_call_parser: DEFAULT_TOOL_CALL_PARSER.to_string(),
        }
    }
}

impl DockhandConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DockhandError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DockhandError::Config(format!("read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| DockhandError::Config(format!("parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// 起動前の検証（Fail-fast）
    pub fn validate(&self) -> Result<(), DockhandError> {
        if self.image.trim().is_empty() {
            return Err(DockhandError::Config("image must not be empty".into()));
        }
        self.readiness_regex()?;
        Ok(())
    }

    pub fn readiness_regex(&self) -> Result<Regex, DockhandError> {
        Regex::new(&self.readiness_pattern)
            .map_err(|e| DockhandError::Config(format!("readiness_pattern: {e}")))
    }

    /// Directory scanned for `models--<maker>--<name>` entries.
    pub fn hub_dir(&self) -> PathBuf {
        self.host_cache_dir.join("hub")
    }

    pub fn readiness_timeout(&self) -> Option<Duration> {
        self.readiness_timeout_secs.map(Duration::from_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }
}
