//! ContainerService - ルーティング層から呼ばれる操作の表面
//!
//! ContainerServiceBuilder で構築する。registry・controller・watcher・reconciler を
//! ひとつの所有者にまとめ、プロセスの起動と終了に寿命を合わせる。

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::controller::LifecycleController;
use super::reconciler::EventReconciler;
use super::registry::ContainerRegistry;
use super::watcher::{Readiness, ReadinessWatcher};
use crate::config::DockhandConfig;
use crate::domain::container::StatusView;
use crate::domain::errors::DockhandError;
use crate::domain::launch::{ContainerHandle, LaunchParams};
use crate::domain::model::ModelId;
use crate::ports::ModelSource;

pub struct ContainerService {
    config: DockhandConfig,
    registry: Arc<ContainerRegistry>,
    controller: LifecycleController,
    watcher: Arc<ReadinessWatcher>,
    reconciler: EventReconciler,
    model_source: Arc<dyn ModelSource>,
}

impl ContainerService {
    pub(crate) fn new(
        config: DockhandConfig,
        registry: Arc<ContainerRegistry>,
        controller: LifecycleController,
        watcher: Arc<ReadinessWatcher>,
        reconciler: EventReconciler,
        model_source: Arc<dyn ModelSource>,
    ) -> Self {
        Self {
            config,
            registry,
            controller,
            watcher,
            reconciler,
            model_source,
        }
    }

    pub fn config(&self) -> &DockhandConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ContainerRegistry> {
        &self.registry
    }

    /// モデル一覧を取り込み、すでに動いているコンテナを引き取る
    ///
    /// 個々のモデルの inspect 失敗は warn して続行する（一覧の取得失敗だけがエラー）。
    pub async fn sync_models(&self) -> Result<Vec<ModelId>, DockhandError> {
        let discovered = self.model_source.list_models().await?;
        let added = self.registry.ensure_seeded(discovered.iter().cloned()).await;

        let mut adopted = 0;
        for model in &discovered {
            match self.controller.adopt(model).await {
                Ok(true) => adopted += 1,
                Ok(false) => {}
                Err(err) => warn!(model = %model, error = %err, "could not inspect existing container"),
            }
        }

        info!(discovered = discovered.len(), added, adopted, "models synced");
        Ok(self.registry.list_known_models().await)
    }

    pub async fn list_models(&self) -> Vec<ModelId> {
        self.registry.list_known_models().await
    }

    /// Unknown models yield `None`.
    pub async fn get_status(&self, model: &ModelId) -> Option<StatusView> {
        self.registry.get(model).await.map(|info| info.view())
    }

    pub async fn start_model(
        &self,
        model: &ModelId,
        params: LaunchParams,
    ) -> Result<ContainerHandle, DockhandError> {
        self.controller.start(model, params).await
    }

    pub async fn start_model_awaiting(
        &self,
        model: &ModelId,
        params: LaunchParams,
        deadline: Option<Duration>,
    ) -> Result<(ContainerHandle, Readiness), DockhandError> {
        self.controller.start_awaiting(model, params, deadline).await
    }

    pub async fn stop_model(&self, model: &ModelId) -> Result<(), DockhandError> {
        self.controller.stop(model).await
    }

    pub async fn start_reconciler(&self) -> bool {
        self.reconciler.start().await
    }

    pub async fn stop_reconciler(&self) -> bool {
        self.reconciler.stop().await
    }

    pub async fn reconciler_running(&self) -> bool {
        self.reconciler.is_running().await
    }

    /// Wait until every notification so far has been handed to the sink.
    pub async fn flush_notifications(&self) {
        self.registry.flush_notifications().await;
    }

    /// Stop background work and drain pending notifications. Containers keep running.
    pub async fn shutdown(&self) {
        self.reconciler.stop().await;
        self.watcher.cancel_all().await;
        self.registry.flush_notifications().await;
        info!("container service shut down");
    }
}
