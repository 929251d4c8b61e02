//! HubCacheModelSource - モデルキャッシュのディレクトリ一覧
//!
//! `models--<maker>--<name>` 形式のディレクトリだけを拾い、それ以外は warn して飛ばす。
//! ファイルシステムの走査は blocking なので spawn_blocking で実行する。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::warn;

use crate::domain::errors::DockhandError;
use crate::domain::model::ModelId;
use crate::ports::ModelSource;

pub struct HubCacheModelSource {
    hub_dir: PathBuf,
}

impl HubCacheModelSource {
    pub fn new(hub_dir: impl Into<PathBuf>) -> Self {
        Self {
            hub_dir: hub_dir.into(),
        }
    }
}

fn scan(hub_dir: &Path) -> Result<Vec<ModelId>, DockhandError> {
    let entries = std::fs::read_dir(hub_dir).map_err(|e| {
        DockhandError::ModelSource(format!("read {}: {e}", hub_dir.display()))
    })?;

    let mut models = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DockhandError::ModelSource(e.to_string()))?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        match ModelId::from_cache_name(&name) {
            Some(model) => models.push(model),
            None => warn!(
                directory = %name,
                "unexpected model directory, want models--<maker>--<name>; skipped"
            ),
        }
    }
    models.sort();
    models.dedup();
    Ok(models)
}

#[async_trait]
impl ModelSource for HubCacheModelSource {
    async fn list_models(&self) -> Result<Vec<ModelId>, DockhandError> {
        let hub_dir = self.hub_dir.clone();
        tokio::task::spawn_blocking(move || scan(&hub_dir))
            .await
            .map_err(|e| DockhandError::ModelSource(format!("scan task failed: {e}")))?
    }
}

/// Fixed list, for tests and for callers that discover models elsewhere.
pub struct StaticModelSource {
    models: Vec<ModelId>,
}

impl StaticModelSource {
    pub fn new(models: impl IntoIterator<Item = ModelId>) -> Self {
        let mut models: Vec<ModelId> = models.into_iter().collect();
        models.sort();
        Self { models }
    }
}

#[async_trait]
impl ModelSource for StaticModelSource {
    async fn list_models(&self) -> Result<Vec<ModelId>, DockhandError> {
        Ok(self.models.clone())
    }
}
