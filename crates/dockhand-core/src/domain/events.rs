//! Events - ランタイムイベントとライブ更新
//!
//! - `RuntimeEvent`: ランタイムのイベントフィードから来るもの（入力）
//! - `LiveEvent`: 通知 sink に publish するもの（出力）

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::model::ModelId;
use super::status::ContainerStatus;

/// Topic used for every container notification.
pub const CONTAINER_TOPIC: &str = "container";

/// One entry of the runtime's global event feed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuntimeEvent {
    /// Runtime id of the subject container.
    pub id: String,
    /// Raw status/action token (`create`, `start`, `die`, ...).
    pub status: String,
    pub actor_attributes: HashMap<String, String>,
}

impl RuntimeEvent {
    pub fn new(id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: status.into(),
            actor_attributes: HashMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.actor_attributes.insert("name".to_string(), name.into());
        self
    }

    /// Container name carried by the event, if any.
    pub fn subject_name(&self) -> Option<&str> {
        self.actor_attributes.get("name").map(String::as_str)
    }
}

/// `{name, status, id}` for one status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerNotification {
    pub name: ModelId,
    pub status: ContainerStatus,
    pub id: Option<String>,
}

/// ライブ更新チャネルに流すペイロード
///
/// `{"type": "container:model", "data": {...}}` の形にシリアライズされる。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum LiveEvent {
    #[serde(rename = "container:model")]
    ContainerModel(ContainerNotification),
}

impl From<ContainerNotification> for LiveEvent {
    fn from(notification: ContainerNotification) -> Self {
        LiveEvent::ContainerModel(notification)
    }
}
