//! Errors - エラー型と分類
//!
//! - start/stop の失敗は型付きの Result として呼び出し元に返す
//! - バックグラウンド（Reconciler / Watcher）の失敗はログのみ、伝播しない
//! - 未知の status トークンはエラーではない（`Option` で表現）

use thiserror::Error;

use super::model::ModelId;

/// ErrorKind は実行エラーの運用分類
///
/// - Transient: 一時的なエラー（リトライで回復しうる）
/// - Permanent: 恒久的なエラー（入力や状態が原因）
/// - Infrastructure: ランタイム自体の障害
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// Errors of the container runtime port.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// The runtime refused the request (bad image, port conflict, ...).
    #[error("runtime rejected request: {0}")]
    Rejected(String),

    #[error("no such container: {0}")]
    NotFound(String),

    /// Event feed or log stream interruption.
    #[error("runtime stream interrupted: {0}")]
    Stream(String),

    #[error("runtime unavailable: {0}")]
    Unavailable(String),
}

/// DockhandError はこのクレートのドメインエラー
#[derive(Debug, Error)]
pub enum DockhandError {
    /// ランタイムが作成を拒否した、または ID のないハンドルを返した
    #[error("launch failed for model={model}: {reason}")]
    Launch { model: ModelId, reason: String },

    #[error("unknown model: {0}")]
    UnknownModel(ModelId),

    #[error("invalid model id: {0:?} (expected <maker>/<name>)")]
    InvalidModelId(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("model source failed: {0}")]
    ModelSource(String),

    #[error("invalid config: {0}")]
    Config(String),
}

impl DockhandError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DockhandError::Launch { .. } => ErrorKind::Permanent,
            DockhandError::UnknownModel(_) => ErrorKind::Permanent,
            DockhandError::InvalidModelId(_) => ErrorKind::Permanent,
            DockhandError::Config(_) => ErrorKind::Permanent,
            DockhandError::Runtime(RuntimeError::Stream(_)) => ErrorKind::Transient,
            DockhandError::Runtime(RuntimeError::Rejected(_) | RuntimeError::NotFound(_)) => {
                ErrorKind::Permanent
            }
            DockhandError::Runtime(RuntimeError::Unavailable(_)) => ErrorKind::Infrastructure,
            DockhandError::ModelSource(_) => ErrorKind::Infrastructure,
        }
    }
}

/// NotifyError は通知 sink の失敗（publisher の外には出ない）
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification channel closed")]
    Closed,

    #[error("notification rejected: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_errors_are_classified() {
        let stream: DockhandError = RuntimeError::Stream("eof".into()).into();
        assert_eq!(stream.kind(), ErrorKind::Transient);

        let down: DockhandError = RuntimeError::Unavailable("socket".into()).into();
        assert_eq!(down.kind(), ErrorKind::Infrastructure);

        let launch = DockhandError::Launch {
            model: ModelId::new("acme/infer-7b").unwrap(),
            reason: "port is already allocated".into(),
        };
        assert_eq!(launch.kind(), ErrorKind::Permanent);
        assert!(launch.to_string().contains("acme/infer-7b"));
    }
}
