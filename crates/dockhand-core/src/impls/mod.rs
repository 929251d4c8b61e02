//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **DockerRuntime**: bollard 経由の本番用ランタイム
//! - **InMemoryRuntime**: 開発・テスト用のランタイム
//! - **TracingSink / BroadcastSink**: 通知 sink
//! - **RecordingSink / FailingSink**: テスト用の通知 sink
//! - **HubCacheModelSource / StaticModelSource**: モデル一覧

pub mod docker;
pub mod hub_cache;
pub mod memory_runtime;
pub mod sinks;

// 主要な型を再エクスポート
pub use self::docker::DockerRuntime;
pub use self::hub_cache::{HubCacheModelSource, StaticModelSource};
pub use self::memory_runtime::InMemoryRuntime;
pub use self::sinks::{BroadcastSink, FailingSink, RecordingSink, TracingSink};
