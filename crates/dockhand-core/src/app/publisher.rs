//! Publisher - 通知 sink への配送（outbox）
//!
//! # フロー
//! 1. registry が write lock を握ったまま `publish()` で outbox に積む（ブロックしない）
//! 2. 配送タスクが 1 本だけ outbox を順に読み、sink に渡す
//!
//! sink に届く順序 = registry が遷移を適用した順序。
//! 失敗やタイムアウトは warn ログのみで、状態更新には影響しない。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{trace, warn};

use crate::domain::events::{CONTAINER_TOPIC, ContainerNotification, LiveEvent};
use crate::ports::NotificationSink;

enum Outbound {
    Notify(ContainerNotification),
    Flush(oneshot::Sender<()>),
}

/// Enqueueing side of the outbox. Cheap to clone.
#[derive(Clone)]
pub struct Publisher {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Publisher {
    /// Start the delivery task. Must be called inside a tokio runtime.
    ///
    /// The task ends once every `Publisher` clone is dropped.
    pub fn spawn(sink: Arc<dyn NotificationSink>, timeout: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(Delivery { sink, timeout }.run(rx));
        Self { tx }
    }

    /// Queue a notification on the `container` topic. Never blocks, never fails.
    pub fn publish(&self, notification: ContainerNotification) {
        if self.tx.send(Outbound::Notify(notification)).is_err() {
            warn!("notification outbox closed; dropping notification");
        }
    }

    /// Wait until everything queued before this call has been handed to the sink.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Outbound::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

struct Delivery {
    sink: Arc<dyn NotificationSink>,
    timeout: Duration,
}

impl Delivery {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Outbound>) {
        while let Some(item) = rx.recv().await {
            match item {
                Outbound::Notify(notification) => self.deliver(notification).await,
                Outbound::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
    }

    async fn deliver(&self, notification: ContainerNotification) {
        let model = notification.name.clone();
        let status = notification.status;
        let event = LiveEvent::from(notification);

        match tokio::time::timeout(self.timeout, self.sink.publish(CONTAINER_TOPIC, &event)).await {
            Ok(Ok(())) => trace!(model = %model, status = %status, "notification published"),
            Ok(Err(err)) => {
                warn!(model = %model, status = %status, error = %err, "notification publish failed")
            }
            Err(_) => warn!(
                model = %model,
                status = %status,
                timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                "notification publish timed out"
            ),
        }
    }
}
