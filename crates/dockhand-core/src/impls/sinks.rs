//! NotificationSink の実装
//!
//! - **TracingSink**: ログに出すだけ
//! - **BroadcastSink**: tokio broadcast。ライブ更新層（WebSocket 等）が subscribe する
//! - **RecordingSink** / **FailingSink**: テスト用

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast};
use tracing::info;

use crate::domain::errors::NotifyError;
use crate::domain::events::LiveEvent;
use crate::ports::NotificationSink;

pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn publish(&self, topic: &str, event: &LiveEvent) -> Result<(), NotifyError> {
        let LiveEvent::ContainerModel(n) = event;
        info!(topic, model = %n.name, status = %n.status, container_id = ?n.id, "live event");
        Ok(())
    }
}

/// Fan-out to any number of live subscribers.
pub struct BroadcastSink {
    tx: broadcast::Sender<(String, LiveEvent)>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(String, LiveEvent)> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl NotificationSink for BroadcastSink {
    async fn publish(&self, topic: &str, event: &LiveEvent) -> Result<(), NotifyError> {
        self.tx
            .send((topic.to_string(), event.clone()))
            .map(|_| ())
            .map_err(|_| NotifyError::Closed)
    }
}

/// Keeps every published event in memory.
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<(String, LiveEvent)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<(String, LiveEvent)> {
        self.records.lock().await.clone()
    }

    pub async fn events(&self) -> Vec<LiveEvent> {
        self.records
            .lock()
            .await
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn publish(&self, topic: &str, event: &LiveEvent) -> Result<(), NotifyError> {
        self.records
            .lock()
            .await
            .push((topic.to_string(), event.clone()));
        Ok(())
    }
}

/// Rejects everything.
pub struct FailingSink;

#[async_trait]
impl NotificationSink for FailingSink {
    async fn publish(&self, _topic: &str, _event: &LiveEvent) -> Result<(), NotifyError> {
        Err(NotifyError::Rejected("sink is down".into()))
    }
}
