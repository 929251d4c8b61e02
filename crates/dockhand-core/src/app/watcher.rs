//! ReadinessWatcher - ログを追いかけて起動完了を検出する
//!
//! # フロー
//! 1. `watch()` でコンテナのログを購読（同じモデル・同じコンテナなら既存の watch を共有）
//! 2. 1 行ずつ readiness パターンと照合
//! 3. 最初に一致したら registry を Started に進め（通知は registry が積む）、Ready を一度だけ送って終了
//!
//! 一致しないままストリームが終わった場合は何も送らない（Ready は来ないだけ）。
//! リトライも再起動もしない。キャンセルは次の行を待つ地点で効く。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use regex::Regex;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::ContainerRegistry;
use crate::domain::launch::ContainerHandle;
use crate::domain::model::ModelId;
use crate::domain::status::ContainerStatus;
use crate::ports::ContainerRuntime;

/// Outcome of waiting for readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Not observed (yet). Never means "failed".
    Pending,
}

/// Receiving side of one watch. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ReadinessSignal {
    rx: watch::Receiver<Readiness>,
}

impl ReadinessSignal {
    fn ready() -> Self {
        let (_, rx) = watch::channel(Readiness::Ready);
        Self { rx }
    }

    pub fn current(&self) -> Readiness {
        *self.rx.borrow()
    }

    /// Wait for `Ready`, at most `deadline` when given.
    ///
    /// Returns `Pending` on timeout or when the watch ended without a match.
    pub async fn wait(mut self, deadline: Option<Duration>) -> Readiness {
        let wait = async {
            match self.rx.wait_for(|r| *r == Readiness::Ready).await {
                Ok(_) => Readiness::Ready,
                Err(_) => Readiness::Pending,
            }
        };
        match deadline {
            Some(deadline) => tokio::time::timeout(deadline, wait)
                .await
                .unwrap_or(Readiness::Pending),
            None => wait.await,
        }
    }
}

struct ActiveWatch {
    generation: u64,
    runtime_id: String,
    token: CancellationToken,
    rx: watch::Receiver<Readiness>,
}

#[derive(Default)]
struct WatchTable {
    active: HashMap<ModelId, ActiveWatch>,
    next_generation: u64,
}

pub struct ReadinessWatcher {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<ContainerRegistry>,
    pattern: Regex,
    table: Arc<Mutex<WatchTable>>,
}

impl ReadinessWatcher {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        registry: Arc<ContainerRegistry>,
        pattern: Regex,
    ) -> Self {
        Self {
            runtime,
            registry,
            pattern,
            table: Arc::new(Mutex::new(WatchTable::default())),
        }
    }

    /// Start following `handle`'s logs for `model` (single-flight per model).
    ///
    /// - 同じコンテナの watch が動いていれば、それを共有する
    /// - 別のコンテナ（古いハンドル）の watch が残っていればキャンセルして置き換える
    pub async fn watch(&self, model: &ModelId, handle: &ContainerHandle) -> ReadinessSignal {
        let mut table = self.table.lock().await;

        if let Some(existing) = table.active.get(model) {
            if existing.runtime_id == handle.id {
                return ReadinessSignal {
                    rx: existing.rx.clone(),
                };
            }
            debug!(model = %model, stale = %existing.runtime_id, "replacing readiness watch");
            existing.token.cancel();
        }

        table.next_generation += 1;
        let generation = table.next_generation;
        let token = CancellationToken::new();
        let (tx, rx) = watch::channel(Readiness::Pending);
        // subscribe before spawning so no line is missed
        let lines = self.runtime.logs(handle);

        table.active.insert(
            model.clone(),
            ActiveWatch {
                generation,
                runtime_id: handle.id.clone(),
                token: token.clone(),
                rx: rx.clone(),
            },
        );

        let task = FollowTask {
            model: model.clone(),
            runtime_id: handle.id.clone(),
            generation,
            registry: Arc::clone(&self.registry),
            pattern: self.pattern.clone(),
            table: Arc::clone(&self.table),
        };
        tokio::spawn(task.run(lines, token, tx));

        ReadinessSignal { rx }
    }

    /// An already-satisfied signal, for containers known to be ready.
    pub fn ready_signal(&self) -> ReadinessSignal {
        ReadinessSignal::ready()
    }

    pub async fn is_watching(&self, model: &ModelId) -> bool {
        self.table.lock().await.active.contains_key(model)
    }

    /// Request the watch of `model` to stop. Returns whether one was active.
    pub async fn cancel(&self, model: &ModelId) -> bool {
        match self.table.lock().await.active.remove(model) {
            Some(watch) => {
                watch.token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn cancel_all(&self) {
        let mut table = self.table.lock().await;
        for (_, watch) in table.active.drain() {
            watch.token.cancel();
        }
    }
}

struct FollowTask {
    model: ModelId,
    runtime_id: String,
    generation: u64,
    registry: Arc<ContainerRegistry>,
    pattern: Regex,
    table: Arc<Mutex<WatchTable>>,
}

impl FollowTask {
    async fn run(
        self,
        mut lines: crate::ports::LogStream,
        token: CancellationToken,
        tx: watch::Sender<Readiness>,
    ) {
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(model = %self.model, "readiness watch cancelled");
                    break;
                }
                next = lines.next() => next,
            };

            match next {
                Some(Ok(line)) => {
                    if !self.pattern.is_match(&line) {
                        continue;
                    }
                    info!(model = %self.model, container_id = %self.runtime_id, "model server ready");
                    self.registry
                        .advance(&self.model, &self.runtime_id, ContainerStatus::Started)
                        .await;
                    // receivers may all be gone
                    let _ = tx.send(Readiness::Ready);
                    break;
                }
                Some(Err(err)) => {
                    warn!(model = %self.model, error = %err, "log stream interrupted; readiness unknown");
                    break;
                }
                None => {
                    debug!(model = %self.model, "log stream ended before readiness marker");
                    break;
                }
            }
        }

        let mut table = self.table.lock().await;
        if table
            .active
            .get(&self.model)
            .is_some_and(|w| w.generation == self.generation)
        {
            table.active.remove(&self.model);
        }
    }
}
