//! NotificationSink port - ライブ更新の配送先
//!
//! fire-and-forget。失敗は `app::publisher` がログに残して握りつぶす。

use async_trait::async_trait;

use crate::domain::errors::NotifyError;
use crate::domain::events::LiveEvent;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, topic: &str, event: &LiveEvent) -> Result<(), NotifyError>;
}
