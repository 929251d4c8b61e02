//! ContainerRuntime port - コンテナランタイム（Docker など）
//!
//! create / stop / inspect と、2 種類のストリーム（イベント・ログ）を提供します。
//! ストリームは drop すれば購読終了。途中の中断は `RuntimeError::Stream`。
//!
//! # 実装
//! - `impls::DockerRuntime`（bollard）
//! - `impls::InMemoryRuntime`（開発・テスト用）

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::domain::errors::RuntimeError;
use crate::domain::events::RuntimeEvent;
use crate::domain::launch::{ContainerHandle, LaunchSpec, RuntimeContainer};

/// Global event feed for all containers on the host.
pub type EventStream = BoxStream<'static, Result<RuntimeEvent, RuntimeError>>;

/// Followed log output of one container, one line per item.
pub type LogStream = BoxStream<'static, Result<String, RuntimeError>>;

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start a detached container.
    async fn create(&self, spec: &LaunchSpec) -> Result<RuntimeContainer, RuntimeError>;

    /// Stop a container; `grace` is the time allowed before it is killed.
    async fn stop(&self, handle: &ContainerHandle, grace: Duration) -> Result<(), RuntimeError>;

    /// Look a container up by name. `Ok(None)` when it does not exist.
    async fn inspect(&self, name: &str) -> Result<Option<RuntimeContainer>, RuntimeError>;

    /// Subscribe to the event feed. The subscription is live once this returns.
    fn events(&self) -> EventStream;

    /// Follow a container's logs from the beginning.
    fn logs(&self, handle: &ContainerHandle) -> LogStream;
}
