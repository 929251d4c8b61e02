//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 外部の協調者（コンテナランタイム、ライブ更新チャネル、モデルキャッシュ）は
//! すべて trait 越しに扱い、app 層は実装の詳細を知りません。

pub mod runtime;
pub mod notification_sink;
pub mod model_source;
pub mod clock;

// 主要な trait を再エクスポート
pub use self::runtime::{ContainerRuntime, EventStream, LogStream};
pub use self::notification_sink::NotificationSink;
pub use self::model_source::ModelSource;
pub use self::clock::{Clock, FixedClock, SystemClock};
