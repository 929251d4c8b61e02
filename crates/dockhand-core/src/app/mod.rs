//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてコンテナのライフサイクルを実装します。
//!
//! # 主要コンポーネント
//! - **ContainerRegistry**: モデル → コンテナ状態の正本
//! - **LifecycleController**: start / stop のオーケストレーション
//! - **ReadinessWatcher**: ログ追跡による起動完了検出
//! - **EventReconciler**: ランタイムのイベントフィードを registry に反映
//! - **Publisher**: 通知 sink への順序付き・best-effort な配送（outbox）
//! - **ContainerServiceBuilder / ContainerService**: 構築と外部向けの表面

pub mod builder;
pub mod controller;
pub mod publisher;
pub mod reconciler;
pub mod registry;
pub mod service;
pub mod watcher;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, ContainerServiceBuilder};
pub use self::controller::LifecycleController;
pub use self::publisher::Publisher;
pub use self::reconciler::EventReconciler;
pub use self::registry::ContainerRegistry;
pub use self::service::ContainerService;
pub use self::watcher::{Readiness, ReadinessSignal, ReadinessWatcher};
