//! LifecycleController - start / stop のオーケストレーション
//!
//! # start
//! 1. モデルが registry に存在するか確認（無ければ UnknownModel）
//! 2. 生きているハンドルがあればそれを返す（冪等）
//! 3. LaunchSpec を組み立てて runtime.create
//! 4. ID 付きハンドルなら attach（rank リセット → Created、通知は registry が積む）
//! 5. ReadinessWatcher を起動
//!
//! # stop
//! 1. ハンドルが無ければ何もしない（冪等）
//! 2. runtime.stop（registry の lock は握らない）
//! 3. 成功したら detach（Closed を通知）。失敗ならハンドルは残す
//!
//! 同じモデルへの start/stop はモデル単位の op lock で直列化する。
//! 別モデルの操作は並行に進む。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::registry::ContainerRegistry;
use super::watcher::{Readiness, ReadinessSignal, ReadinessWatcher};
use crate::config::DockhandConfig;
use crate::domain::errors::DockhandError;
use crate::domain::launch::{ContainerHandle, LaunchParams, LaunchSpec, Mount};
use crate::domain::model::ModelId;
use crate::domain::status::ContainerStatus;
use crate::ports::ContainerRuntime;

pub struct LifecycleController {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<ContainerRegistry>,
    watcher: Arc<ReadinessWatcher>,
    config: DockhandConfig,
    op_locks: Mutex<HashMap<ModelId, Arc<Mutex<()>>>>,
}

impl LifecycleController {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        registry: Arc<ContainerRegistry>,
        watcher: Arc<ReadinessWatcher>,
        config: DockhandConfig,
    ) -> Self {
        Self {
            runtime,
            registry,
            watcher,
            config,
            op_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn op_lock(&self, model: &ModelId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.op_locks.lock().await;
            Arc::clone(locks.entry(model.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// 起動コマンド・マウント・デバイス指定を決定的に組み立てる
    pub fn launch_spec(&self, model: &ModelId, params: &LaunchParams) -> LaunchSpec {
        LaunchSpec {
            name: model.container_name(),
            image: self.config.image.clone(),
            command: params.command(model, &self.config.default_tool_call_parser),
            port: params.port,
            devices: params.devices(),
            mounts: vec![Mount {
                host_path: self.config.host_cache_dir.to_string_lossy().into_owned(),
                container_path: self.config.container_cache_dir.to_string_lossy().into_owned(),
                read_only: true,
            }],
            auto_remove: true,
        }
    }

    /// Start a container for `model`, or return the live one.
    pub async fn start(
        &self,
        model: &ModelId,
        params: LaunchParams,
    ) -> Result<ContainerHandle, DockhandError> {
        let (handle, _) = self.launch(model, params).await?;
        Ok(handle)
    }

    /// `start` then wait for the readiness marker.
    ///
    /// `deadline` が `None` なら設定の readiness_timeout を使う。
    /// タイムアウトは失敗ではなく `Readiness::Pending`。
    pub async fn start_awaiting(
        &self,
        model: &ModelId,
        params: LaunchParams,
        deadline: Option<Duration>,
    ) -> Result<(ContainerHandle, Readiness), DockhandError> {
        let (handle, signal) = self.launch(model, params).await?;
        let deadline = deadline.or(self.config.readiness_timeout());
        let readiness = signal.wait(deadline).await;
        if readiness == Readiness::Pending {
            debug!(model = %model, container_id = %handle.id, "readiness not observed before deadline");
        }
        Ok((handle, readiness))
    }

    async fn launch(
        &self,
        model: &ModelId,
        params: LaunchParams,
    ) -> Result<(ContainerHandle, ReadinessSignal), DockhandError> {
        let _op = self.op_lock(model).await;

        let info = self
            .registry
            .get(model)
            .await
            .ok_or_else(|| DockhandError::UnknownModel(model.clone()))?;

        if let Some(handle) = info.live_handle() {
            debug!(model = %model, container_id = %handle.id, "container already running");
            let signal = if info.status == ContainerStatus::Started {
                self.watcher.ready_signal()
            } else {
                self.watcher.watch(model, handle).await
            };
            return Ok((handle.clone(), signal));
        }

        let spec = self.launch_spec(model, &params);
        info!(model = %model, image = %spec.image, port = spec.port, "launching container");

        let created = self
            .runtime
            .create(&spec)
            .await
            .map_err(|err| DockhandError::Launch {
                model: model.clone(),
                reason: err.to_string(),
            })?;
        let handle =
            ContainerHandle::from_runtime(created).ok_or_else(|| DockhandError::Launch {
                model: model.clone(),
                reason: "runtime returned no container id".to_string(),
            })?;

        self.registry
            .attach(model, handle.clone(), Some(params), ContainerStatus::Created)
            .await;
        let signal = self.watcher.watch(model, &handle).await;

        info!(model = %model, container_id = %handle.id, "container launched");
        Ok((handle, signal))
    }

    /// Stop the container of `model`. No handle means nothing to do.
    pub async fn stop(&self, model: &ModelId) -> Result<(), DockhandError> {
        let _op = self.op_lock(model).await;

        let Some(handle) = self.registry.get(model).await.and_then(|info| info.handle) else {
            debug!(model = %model, "no container to stop");
            return Ok(());
        };

        info!(model = %model, container_id = %handle.id, "stopping container");
        if let Err(err) = self.runtime.stop(&handle, self.config.stop_timeout()).await {
            warn!(model = %model, container_id = %handle.id, error = %err, "stop failed; handle kept");
            return Err(err.into());
        }

        self.watcher.cancel(model).await;
        self.registry.detach(model, &handle.id).await;
        Ok(())
    }

    /// 既に動いているコンテナ（前のプロセスが起動したもの）を取り込む
    ///
    /// Returns `true` when a container was attached.
    pub async fn adopt(&self, model: &ModelId) -> Result<bool, DockhandError> {
        let _op = self.op_lock(model).await;

        match self.registry.get(model).await {
            Some(info) if info.handle.is_none() => {}
            _ => return Ok(false),
        }

        let Some(found) = self.runtime.inspect(&model.container_name()).await? else {
            return Ok(false);
        };
        if !found.running {
            return Ok(false);
        }
        let Some(handle) = ContainerHandle::from_runtime(found) else {
            return Ok(false);
        };

        info!(model = %model, container_id = %handle.id, "adopted running container");
        self.registry
            .attach(model, handle, None, ContainerStatus::Started)
            .await;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::RuntimeError;
    use crate::domain::events::{ContainerNotification, LiveEvent};
    use crate::app::publisher::Publisher;
    use crate::domain::launch::{DeviceSelection, RuntimeContainer};
    use crate::impls::{InMemoryRuntime, RecordingSink};
    use crate::ports::SystemClock;

    struct Fixture {
        runtime: Arc<InMemoryRuntime>,
        registry: Arc<ContainerRegistry>,
        sink: Arc<RecordingSink>,
        controller: Arc<LifecycleController>,
        model: ModelId,
    }

    async fn fixture() -> Fixture {
        let runtime = Arc::new(InMemoryRuntime::new());
        let sink = Arc::new(RecordingSink::new());
        let publisher = Publisher::spawn(sink.clone(), Duration::from_secs(1));
        let registry = Arc::new(ContainerRegistry::new(Arc::new(SystemClock), publisher));
        let config = DockhandConfig::default();
        let watcher = Arc::new(ReadinessWatcher::new(
            runtime.clone(),
            registry.clone(),
            config.readiness_regex().unwrap(),
        ));
        let controller = Arc::new(LifecycleController::new(
            runtime.clone(),
            registry.clone(),
            watcher,
            config,
        ));
        let model = ModelId::new("acme/infer-7b").unwrap();
        registry.ensure_seeded([model.clone()]).await;
        Fixture {
            runtime,
            registry,
            sink,
            controller,
            model,
        }
    }

    #[tokio::test]
    async fn unknown_model_is_rejected_without_runtime_call() {
        let f = fixture().await;
        let ghost = ModelId::new("acme/ghost").unwrap();

        let result = f.controller.start(&ghost, LaunchParams::new(8001)).await;
        assert!(matches!(result, Err(DockhandError::UnknownModel(m)) if m == ghost));
        assert!(f.runtime.create_calls().is_empty());
    }

    #[tokio::test]
    async fn launch_spec_mounts_cache_and_omits_devices() {
        let f = fixture().await;
        let spec = f.controller.launch_spec(&f.model, &LaunchParams::new(8001));

        assert_eq!(spec.name, "models--acme--infer-7b");
        assert_eq!(spec.image, "vllm/vllm-openai:latest");
        assert!(spec.auto_remove);
        assert_eq!(spec.devices, None);
        assert_eq!(spec.mounts.len(), 1);
        assert!(spec.mounts[0].read_only);

        let spec = f
            .controller
            .launch_spec(&f.model, &LaunchParams::new(8001).with_devices("0,1"));
        assert_eq!(
            spec.devices,
            Some(DeviceSelection::Ids(vec!["0".into(), "1".into()]))
        );
    }

    #[tokio::test]
    async fn concurrent_starts_create_once() {
        let f = fixture().await;
        let a = {
            let controller = Arc::clone(&f.controller);
            let model = f.model.clone();
            tokio::spawn(async move { controller.start(&model, LaunchParams::new(8001)).await })
        };
        let b = {
            let controller = Arc::clone(&f.controller);
            let model = f.model.clone();
            tokio::spawn(async move { controller.start(&model, LaunchParams::new(8001)).await })
        };

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(f.runtime.create_calls().len(), 1);
    }

    #[tokio::test]
    async fn start_publishes_created() {
        let f = fixture().await;
        f.runtime.script_id("c123");
        f.controller
            .start(&f.model, LaunchParams::new(8001))
            .await
            .unwrap();

        f.registry.flush_notifications().await;
        assert_eq!(
            f.sink.events().await,
            vec![LiveEvent::from(ContainerNotification {
                name: f.model.clone(),
                status: ContainerStatus::Created,
                id: Some("c123".into()),
            })]
        );
    }

    #[tokio::test]
    async fn rejected_create_leaves_no_handle() {
        let f = fixture().await;
        f.runtime
            .fail_next_create(RuntimeError::Rejected("port is already allocated".into()));

        let result = f.controller.start(&f.model, LaunchParams::new(8001)).await;
        assert!(matches!(result, Err(DockhandError::Launch { .. })));

        let info = f.registry.get(&f.model).await.unwrap();
        assert_eq!(info.status, ContainerStatus::Closed);
        assert!(info.handle.is_none());
        f.registry.flush_notifications().await;
        assert!(f.sink.events().await.is_empty());
    }

    #[tokio::test]
    async fn missing_runtime_id_is_a_launch_failure() {
        let f = fixture().await;
        f.runtime.omit_next_id();

        let result = f.controller.start(&f.model, LaunchParams::new(8001)).await;
        assert!(matches!(result, Err(DockhandError::Launch { reason, .. }) if reason.contains("no container id")));
        assert!(f.registry.get(&f.model).await.unwrap().handle.is_none());
    }

    #[tokio::test]
    async fn stop_without_handle_is_noop() {
        let f = fixture().await;
        f.controller.stop(&f.model).await.unwrap();
        assert!(f.runtime.stop_calls().is_empty());
        f.registry.flush_notifications().await;
        assert!(f.sink.events().await.is_empty());
    }

    #[tokio::test]
    async fn stop_resets_entry_and_publishes_closed() {
        let f = fixture().await;
        let handle = f
            .controller
            .start(&f.model, LaunchParams::new(8001))
            .await
            .unwrap();

        f.controller.stop(&f.model).await.unwrap();
        assert_eq!(f.runtime.stop_calls(), vec![handle.id.clone()]);

        let info = f.registry.get(&f.model).await.unwrap();
        assert_eq!(info.status, ContainerStatus::Closed);
        assert!(info.handle.is_none());
        f.registry.flush_notifications().await;
        let last = f.sink.events().await.pop().unwrap();
        assert_eq!(
            last,
            LiveEvent::from(ContainerNotification {
                name: f.model.clone(),
                status: ContainerStatus::Closed,
                id: Some(handle.id),
            })
        );
    }

    #[tokio::test]
    async fn failed_stop_keeps_handle_for_retry() {
        let f = fixture().await;
        let handle = f
            .controller
            .start(&f.model, LaunchParams::new(8001))
            .await
            .unwrap();
        f.runtime
            .fail_next_stop(RuntimeError::Unavailable("socket closed".into()));

        assert!(matches!(
            f.controller.stop(&f.model).await,
            Err(DockhandError::Runtime(RuntimeError::Unavailable(_)))
        ));
        assert_eq!(
            f.registry.get(&f.model).await.unwrap().handle,
            Some(handle)
        );

        f.controller.stop(&f.model).await.unwrap();
        assert!(f.registry.get(&f.model).await.unwrap().handle.is_none());
    }

    #[tokio::test]
    async fn dead_container_is_replaced_on_start() {
        let f = fixture().await;
        let first = f
            .controller
            .start(&f.model, LaunchParams::new(8001))
            .await
            .unwrap();
        f.registry
            .advance(&f.model, &first.id, ContainerStatus::Died)
            .await;
        // auto-remove already took the container away
        f.runtime.stop(&first, Duration::ZERO).await.unwrap();

        let second = f
            .controller
            .start(&f.model, LaunchParams::new(8002))
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(f.runtime.create_calls().len(), 2);
        assert_eq!(
            f.registry.get(&f.model).await.unwrap().status,
            ContainerStatus::Created
        );
    }

    #[tokio::test]
    async fn adopt_attaches_running_container_as_started() {
        let f = fixture().await;
        f.runtime.insert_container(RuntimeContainer {
            id: Some("c777".into()),
            name: f.model.container_name(),
            running: true,
        });

        assert!(f.controller.adopt(&f.model).await.unwrap());
        let info = f.registry.get(&f.model).await.unwrap();
        assert_eq!(info.status, ContainerStatus::Started);
        assert_eq!(info.runtime_id.as_deref(), Some("c777"));

        // already attached
        assert!(!f.controller.adopt(&f.model).await.unwrap());

        // start on an adopted container reuses it and is ready at once
        let (handle, readiness) = f
            .controller
            .start_awaiting(&f.model, LaunchParams::new(8001), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert_eq!(handle.id, "c777");
        assert_eq!(readiness, Readiness::Ready);
        assert!(f.runtime.create_calls().is_empty());
    }

    #[tokio::test]
    async fn start_awaiting_times_out_as_pending() {
        let f = fixture().await;
        let (handle, readiness) = f
            .controller
            .start_awaiting(&f.model, LaunchParams::new(8001), Some(Duration::from_millis(50)))
            .await
            .unwrap();

        assert_eq!(readiness, Readiness::Pending);
        // the launch itself stands
        assert_eq!(
            f.registry.get(&f.model).await.unwrap().handle,
            Some(handle)
        );
    }
}
