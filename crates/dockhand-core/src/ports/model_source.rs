//! ModelSource port - 既知モデルの一覧
//!
//! 実装: `impls::HubCacheModelSource`（キャッシュディレクトリを走査）

use async_trait::async_trait;

use crate::domain::errors::DockhandError;
use crate::domain::model::ModelId;

#[async_trait]
pub trait ModelSource: Send + Sync {
    /// Known models, sorted.
    async fn list_models(&self) -> Result<Vec<ModelId>, DockhandError>;
}
