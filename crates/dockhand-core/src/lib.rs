//! dockhand-core
//!
//! Lifecycle of per-model inference containers.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（model id, status + merge, launch params, registry entry, events, errors）
//! - **ports**: 抽象化レイヤー（ContainerRuntime, NotificationSink, ModelSource, Clock）
//! - **app**: アプリケーションロジック（registry, controller, watcher, reconciler, service）
//! - **impls**: 実装（DockerRuntime, InMemoryRuntime, sinks, hub cache）
//! - **config**: サービス設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{BuildError, ContainerService, ContainerServiceBuilder, Readiness};
pub use config::DockhandConfig;
pub use domain::{
    ContainerHandle, ContainerStatus, DockhandError, LaunchParams, LiveEvent, ModelId, StatusView,
};
