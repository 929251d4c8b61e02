//! EventReconciler - ランタイムのイベントフィードを registry に反映するループ
//!
//! # フロー
//! 1. `events()` を購読
//! 2. イベントごとに status トークンを解釈（知らないトークンは無視）
//! 3. コンテナ名（なければ runtime id）からモデルを引く。無ければ捨てる
//! 4. registry で merge する（rank が上がったときの通知は registry が積む）
//!
//! 停止は協調的: キャンセルはイベント待ちの地点でだけ効き、処理中のイベントは最後まで反映される。
//! フィードが途切れたらループは終わる（自動リトライしない。再開は `start()` で明示的に）。

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::registry::ContainerRegistry;
use crate::domain::events::RuntimeEvent;
use crate::domain::status::ContainerStatus;
use crate::ports::{ContainerRuntime, EventStream};

struct RunningLoop {
    token: CancellationToken,
    join: JoinHandle<()>,
}

/// Single-instance handle around the reconcile loop.
pub struct EventReconciler {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<ContainerRegistry>,
    running: Mutex<Option<RunningLoop>>,
}

impl EventReconciler {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, registry: Arc<ContainerRegistry>) -> Self {
        Self {
            runtime,
            registry,
            running: Mutex::new(None),
        }
    }

    /// Start the loop. Returns `false` (no-op) when one is already running.
    pub async fn start(&self) -> bool {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|r| !r.join.is_finished()) {
            return false;
        }

        // subscribe here so events right after start() are not lost
        let events = self.runtime.events();
        let token = CancellationToken::new();
        let worker = ReconcileWorker {
            registry: Arc::clone(&self.registry),
        };
        let join = tokio::spawn(worker.run(events, token.clone()));
        *running = Some(RunningLoop { token, join });
        info!("event reconciler started");
        true
    }

    /// Request stop and wait for the loop to finish. Returns `false` if nothing was running.
    pub async fn stop(&self) -> bool {
        let Some(running) = self.running.lock().await.take() else {
            return false;
        };
        running.token.cancel();
        if let Err(err) = running.join.await {
            warn!(error = %err, "event reconciler task ended abnormally");
        }
        info!("event reconciler stopped");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.join.is_finished())
    }
}

struct ReconcileWorker {
    registry: Arc<ContainerRegistry>,
}

impl ReconcileWorker {
    async fn run(self, mut events: EventStream, token: CancellationToken) {
        loop {
            // cancellation is checked only between events
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = events.next() => next,
            };

            match next {
                Some(Ok(event)) => self.reconcile(event).await,
                Some(Err(err)) => {
                    warn!(error = %err, "runtime event feed interrupted; reconciler exiting");
                    break;
                }
                None => {
                    warn!("runtime event feed closed; reconciler exiting");
                    break;
                }
            }
        }
    }

    async fn reconcile(&self, event: RuntimeEvent) {
        let Some(observed) = ContainerStatus::from_runtime_token(&event.status) else {
            trace!(container_id = %event.id, token = %event.status, "unrecognized status ignored");
            return;
        };
        let Some(model) = self.registry.resolve(event.subject_name(), &event.id).await else {
            trace!(container_id = %event.id, name = ?event.subject_name(), "event for unknown container discarded");
            return;
        };

        if self.registry.advance(&model, &event.id, observed).await.is_none() {
            debug!(model = %model, container_id = %event.id, observed = %observed, "event did not change status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::app::publisher::Publisher;
    use crate::domain::launch::ContainerHandle;
    use crate::domain::model::ModelId;
    use crate::impls::{InMemoryRuntime, RecordingSink};
    use crate::ports::SystemClock;

    struct Fixture {
        runtime: Arc<InMemoryRuntime>,
        registry: Arc<ContainerRegistry>,
        sink: Arc<RecordingSink>,
        reconciler: EventReconciler,
        model: ModelId,
    }

    impl Fixture {
        /// Notifications delivered after the initial attach.
        async fn published(&self) -> usize {
            self.registry.flush_notifications().await;
            self.sink.events().await.len() - 1
        }
    }

    async fn fixture() -> Fixture {
        let runtime = Arc::new(InMemoryRuntime::new());
        let sink = Arc::new(RecordingSink::new());
        let publisher = Publisher::spawn(sink.clone(), Duration::from_secs(1));
        let registry = Arc::new(ContainerRegistry::new(Arc::new(SystemClock), publisher));
        let reconciler = EventReconciler::new(runtime.clone(), registry.clone());
        let model = ModelId::new("acme/infer-7b").unwrap();
        registry
            .attach(
                &model,
                ContainerHandle {
                    id: "c123".into(),
                    name: model.container_name(),
                },
                None,
                ContainerStatus::Created,
            )
            .await;
        Fixture {
            runtime,
            registry,
            sink,
            reconciler,
            model,
        }
    }

    fn event(status: &str) -> RuntimeEvent {
        RuntimeEvent::new("c123", status).with_name("models--acme--infer-7b")
    }

    async fn wait_for_status(f: &Fixture, status: ContainerStatus) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while f.registry.get(&f.model).await.map(|i| i.status) != Some(status) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("status not reached");
    }

    #[tokio::test]
    async fn out_of_order_events_keep_highest_rank() {
        let f = fixture().await;
        assert!(f.reconciler.start().await);

        f.runtime.emit_event(event("destroy"));
        f.runtime.emit_event(event("create"));
        wait_for_status(&f, ContainerStatus::Destroyed).await;
        f.reconciler.stop().await;

        assert_eq!(
            f.registry.get(&f.model).await.unwrap().status,
            ContainerStatus::Destroyed
        );
        // only the destroy transition was published
        assert_eq!(f.published().await, 1);
    }

    #[tokio::test]
    async fn unknown_subjects_and_tokens_are_discarded() {
        let f = fixture().await;
        f.reconciler.start().await;

        f.runtime
            .emit_event(RuntimeEvent::new("zzz", "start").with_name("redis"));
        f.runtime.emit_event(event("exec_start: nvidia-smi"));
        // sentinel: processed after the two above
        f.runtime.emit_event(event("start"));
        wait_for_status(&f, ContainerStatus::Started).await;
        f.reconciler.stop().await;

        assert_eq!(f.registry.list_known_models().await, vec![f.model.clone()]);
        assert_eq!(f.published().await, 1);
    }

    #[tokio::test]
    async fn stale_container_events_are_ignored() {
        let f = fixture().await;
        f.reconciler.start().await;

        // destroy of a previous container with the same name
        f.runtime
            .emit_event(RuntimeEvent::new("old", "destroy").with_name("models--acme--infer-7b"));
        f.runtime.emit_event(event("start"));
        wait_for_status(&f, ContainerStatus::Started).await;
        f.reconciler.stop().await;

        assert_eq!(
            f.registry.get(&f.model).await.unwrap().status,
            ContainerStatus::Started
        );
    }

    #[tokio::test]
    async fn second_start_is_a_noop() {
        let f = fixture().await;
        assert!(f.reconciler.start().await);
        assert!(!f.reconciler.start().await);
        assert!(f.reconciler.is_running().await);

        assert!(f.reconciler.stop().await);
        assert!(!f.reconciler.is_running().await);
        assert!(!f.reconciler.stop().await);
    }

    #[tokio::test]
    async fn feed_interruption_ends_loop_and_allows_restart() {
        let f = fixture().await;
        f.reconciler.start().await;
        f.runtime.interrupt_events("connection reset");

        tokio::time::timeout(Duration::from_secs(2), async {
            while f.reconciler.is_running().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("loop should exit on stream error");

        assert!(f.reconciler.start().await);
        f.runtime.emit_event(event("start"));
        wait_for_status(&f, ContainerStatus::Started).await;
        f.reconciler.stop().await;
    }
}
