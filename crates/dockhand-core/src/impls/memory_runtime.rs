//! InMemoryRuntime - 開発・テスト用のコンテナランタイム
//!
//! # 実装詳細
//! - 状態は `std::sync::Mutex` で保護（lock 内で await しない）
//! - イベントフィードは broadcast チャネル（購読は `events()` の時点で有効）
//! - ログはコンテナごとに履歴 + broadcast。後から購読しても履歴から読める
//! - create / stop の失敗、ID なしのハンドルを台本として仕込める
//! - `hold_stops()` で stop を途中で止めておける（state の lock の外で待つ）

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use tokio::sync::{broadcast, watch};

use crate::domain::errors::RuntimeError;
use crate::domain::events::RuntimeEvent;
use crate::domain::launch::{ContainerHandle, LaunchSpec, RuntimeContainer};
use crate::ports::{ContainerRuntime, EventStream, LogStream};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct LogChannel {
    history: Vec<String>,
    live: Option<broadcast::Sender<String>>,
}

impl LogChannel {
    fn open() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            history: Vec::new(),
            live: Some(tx),
        }
    }
}

#[derive(Default)]
struct RuntimeState {
    containers: HashMap<String, RuntimeContainer>,
    logs: HashMap<String, LogChannel>,
    created: Vec<LaunchSpec>,
    stopped: Vec<String>,
    scripted_ids: VecDeque<String>,
    create_failures: VecDeque<RuntimeError>,
    stop_failures: VecDeque<RuntimeError>,
    omit_next_id: bool,
    next_id: u64,
}

/// InMemoryRuntime は台本どおりに振る舞うランタイム
pub struct InMemoryRuntime {
    state: Mutex<RuntimeState>,
    events: broadcast::Sender<Result<RuntimeEvent, RuntimeError>>,
    stop_gate: watch::Sender<bool>,
    held_stops: AtomicUsize,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (stop_gate, _) = watch::channel(false);
        Self {
            state: Mutex::new(RuntimeState::default()),
            events,
            stop_gate,
            held_stops: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Use `id` for the next successful create.
    pub fn script_id(&self, id: impl Into<String>) {
        self.state().scripted_ids.push_back(id.into());
    }

    pub fn fail_next_create(&self, error: RuntimeError) {
        self.state().create_failures.push_back(error);
    }

    pub fn fail_next_stop(&self, error: RuntimeError) {
        self.state().stop_failures.push_back(error);
    }

    /// Next create "succeeds" but reports no container id.
    pub fn omit_next_id(&self) {
        self.state().omit_next_id = true;
    }

    /// Pretend a container already exists (e.g. from a previous process).
    pub fn insert_container(&self, container: RuntimeContainer) {
        self.state()
            .containers
            .insert(container.name.clone(), container);
    }

    /// Park every `stop` call until `release_stops()`.
    pub fn hold_stops(&self) {
        self.stop_gate.send_replace(true);
    }

    pub fn release_stops(&self) {
        self.stop_gate.send_replace(false);
    }

    /// Number of `stop` calls currently parked.
    pub fn held_stops(&self) -> usize {
        self.held_stops.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> Vec<LaunchSpec> {
        self.state().created.clone()
    }

    pub fn stop_calls(&self) -> Vec<String> {
        self.state().stopped.clone()
    }

    pub fn emit_event(&self, event: RuntimeEvent) {
        // no subscribers is fine
        let _ = self.events.send(Ok(event));
    }

    /// Break every open event subscription with a stream error.
    pub fn interrupt_events(&self, reason: impl Into<String>) {
        let _ = self.events.send(Err(RuntimeError::Stream(reason.into())));
    }

    pub fn emit_log(&self, container_id: &str, line: impl Into<String>) {
        let line = line.into();
        let mut state = self.state();
        let channel = state
            .logs
            .entry(container_id.to_string())
            .or_insert_with(LogChannel::open);
        channel.history.push(line.clone());
        if let Some(tx) = &channel.live {
            let _ = tx.send(line);
        }
    }

    /// End the log stream of a container (as if it exited).
    pub fn close_logs(&self, container_id: &str) {
        let mut state = self.state();
        let channel = state.logs.entry(container_id.to_string()).or_default();
        channel.live = None;
    }
}

impl Default for InMemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    async fn create(&self, spec: &LaunchSpec) -> Result<RuntimeContainer, RuntimeError> {
        let mut state = self.state();
        state.created.push(spec.clone());

        if let Some(error) = state.create_failures.pop_front() {
            return Err(error);
        }
        if state
            .containers
            .get(&spec.name)
            .is_some_and(|existing| existing.running)
        {
            return Err(RuntimeError::Rejected(format!(
                "Conflict. The container name \"/{}\" is already in use",
                spec.name
            )));
        }
        if std::mem::take(&mut state.omit_next_id) {
            return Ok(RuntimeContainer {
                id: None,
                name: spec.name.clone(),
                running: false,
            });
        }

        state.next_id += 1;
        let fallback = format!("c{}", state.next_id);
        let id = state.scripted_ids.pop_front().unwrap_or(fallback);
        let container = RuntimeContainer {
            id: Some(id.clone()),
            name: spec.name.clone(),
            running: true,
        };
        state.containers.insert(spec.name.clone(), container.clone());
        state.logs.entry(id).or_insert_with(LogChannel::open);
        Ok(container)
    }

    async fn stop(&self, handle: &ContainerHandle, _grace: Duration) -> Result<(), RuntimeError> {
        let mut gate = self.stop_gate.subscribe();
        if *gate.borrow_and_update() {
            self.held_stops.fetch_add(1, Ordering::SeqCst);
            // the sender lives as long as self, so this only returns once released
            let _ = gate.wait_for(|held| !*held).await;
            self.held_stops.fetch_sub(1, Ordering::SeqCst);
        }

        let mut state = self.state();
        if let Some(error) = state.stop_failures.pop_front() {
            return Err(error);
        }
        state.stopped.push(handle.id.clone());

        // auto-remove: the container disappears once stopped
        let matches = state
            .containers
            .get(&handle.name)
            .is_some_and(|c| c.id.as_deref() == Some(handle.id.as_str()));
        if matches {
            state.containers.remove(&handle.name);
        }
        if let Some(channel) = state.logs.get_mut(&handle.id) {
            channel.live = None;
        }
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<Option<RuntimeContainer>, RuntimeError> {
        Ok(self.state().containers.get(name).cloned())
    }

    fn events(&self) -> EventStream {
        let rx = self.events.subscribe();
        stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(item) => return Some((item, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }

    fn logs(&self, handle: &ContainerHandle) -> LogStream {
        let mut state = self.state();
        let channel = state
            .logs
            .entry(handle.id.clone())
            .or_insert_with(LogChannel::open);
        let history: Vec<Result<String, RuntimeError>> =
            channel.history.iter().cloned().map(Ok).collect();
        let live = channel.live.as_ref().map(broadcast::Sender::subscribe);

        let live = stream::unfold(live, |rx| async move {
            let mut rx = rx?;
            loop {
                match rx.recv().await {
                    Ok(line) => return Some((Ok(line), Some(rx))),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        stream::iter(history).chain(live).boxed()
    }
}
