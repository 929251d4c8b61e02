//! ContainerServiceBuilder - サービスの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - 必須コンポーネント（runtime, sink）が揃っているかを build() 時にチェック
//! - 設定（イメージ名、readiness パターン）も build() 時に検証
//! - 不足や不正があれば BuildError を返す。起動後に気づくことはない
//!
//! build() は通知の配送タスクを spawn するので tokio ランタイム内で呼ぶこと。

use std::sync::Arc;

use super::controller::LifecycleController;
use super::publisher::Publisher;
use super::reconciler::EventReconciler;
use super::registry::ContainerRegistry;
use super::service::ContainerService;
use super::watcher::ReadinessWatcher;
use crate::config::DockhandConfig;
use crate::impls::HubCacheModelSource;
use crate::ports::{Clock, ContainerRuntime, ModelSource, NotificationSink, SystemClock};

/// ContainerServiceBuilder は ContainerService を組み立てる
///
/// # 使用例
/// ```ignore
/// let service = ContainerServiceBuilder::new()
///     .runtime(Arc::new(DockerRuntime::connect()?))
///     .sink(Arc::new(TracingSink))
///     .config(config)
///     .build()?;
/// ```
///
/// model_source を省略すると設定の hub ディレクトリを走査する。
/// clock を省略すると SystemClock。
#[derive(Default)]
pub struct ContainerServiceBuilder {
    runtime: Option<Arc<dyn ContainerRuntime>>,
    sink: Option<Arc<dyn NotificationSink>>,
    model_source: Option<Arc<dyn ModelSource>>,
    clock: Option<Arc<dyn Clock>>,
    config: DockhandConfig,
}

/// BuildError はサービス構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing components: {0:?}. These must be set before build().")]
    Missing(Vec<&'static str>),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ContainerServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn model_source(mut self, source: Arc<dyn ModelSource>) -> Self {
        self.model_source = Some(source);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn config(mut self, config: DockhandConfig) -> Self {
        self.config = config;
        self
    }

    /// 検証してから ContainerService を生成
    ///
    /// # 検証
    /// - runtime / sink が設定されているか（不足分をまとめて BuildError::Missing）
    /// - 設定が妥当か（BuildError::Config）
    pub fn build(self) -> Result<ContainerService, BuildError> {
        let mut missing = Vec::new();
        if self.runtime.is_none() {
            missing.push("runtime");
        }
        if self.sink.is_none() {
            missing.push("sink");
        }
        let (Some(runtime), Some(sink)) = (self.runtime, self.sink) else {
            return Err(BuildError::Missing(missing));
        };

        self.config
            .validate()
            .map_err(|e| BuildError::Config(e.to_string()))?;
        let pattern = self
            .config
            .readiness_regex()
            .map_err(|e| BuildError::Config(e.to_string()))?;

        let model_source = self
            .model_source
            .unwrap_or_else(|| Arc::new(HubCacheModelSource::new(self.config.hub_dir())));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let publisher = Publisher::spawn(sink, self.config.notify_timeout());
        let registry = Arc::new(ContainerRegistry::new(clock, publisher));
        let watcher = Arc::new(ReadinessWatcher::new(
            Arc::clone(&runtime),
            Arc::clone(&registry),
            pattern,
        ));
        let controller = LifecycleController::new(
            Arc::clone(&runtime),
            Arc::clone(&registry),
            Arc::clone(&watcher),
            self.config.clone(),
        );
        let reconciler = EventReconciler::new(runtime, Arc::clone(&registry));

        Ok(ContainerService::new(
            self.config,
            registry,
            controller,
            watcher,
            reconciler,
            model_source,
        ))
    }
}
