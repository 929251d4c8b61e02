//! Status - コンテナ状態と merge ルール
//!
//! 状態は 2 つの経路から非同期に届きます：
//! - LifecycleController の start/stop（と ReadinessWatcher）
//! - ランタイムのイベントフィード（EventReconciler）
//!
//! どちらの経路も `merge()` を通すことで、到着順や重複に関係なく
//! rank が単調非減少になります。

use std::fmt;

use serde::{Deserialize, Serialize};

/// ContainerStatus はコンテナの状態（宣言順 = rank）
///
/// # 順序
/// `Closed < Created < Started < Died < Destroyed`
///
/// - Created はコンテナ作成、Started はモデルサーバの起動完了
/// - auto-remove のコンテナは die の後に destroy されるので Died < Destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    /// No container for this model (fresh entry).
    Closed,
    Created,
    Started,
    Died,
    Destroyed,
}

impl ContainerStatus {
    /// 優先度としての rank
    pub fn rank(self) -> u8 {
        match self {
            ContainerStatus::Closed => 0,
            ContainerStatus::Created => 1,
            ContainerStatus::Started => 2,
            ContainerStatus::Died => 3,
            ContainerStatus::Destroyed => 4,
        }
    }

    /// ランタイムの status トークンを内部の状態に変換（部分写像）
    ///
    /// 知らないトークン（`stop`, `kill`, `exec_start: ...` など）は `None`。
    /// 呼び出し側はそれを no-op として扱います。
    pub fn from_runtime_token(token: &str) -> Option<Self> {
        match token.trim() {
            "create" | "created" => Some(ContainerStatus::Created),
            "start" | "started" | "running" => Some(ContainerStatus::Started),
            "die" | "died" | "exited" | "dead" => Some(ContainerStatus::Died),
            "destroy" | "destroyed" => Some(ContainerStatus::Destroyed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContainerStatus::Closed => "closed",
            ContainerStatus::Created => "created",
            ContainerStatus::Started => "started",
            ContainerStatus::Died => "died",
            ContainerStatus::Destroyed => "destroyed",
        }
    }

    /// The container behind a handle in this state is gone.
    pub fn is_terminal(self) -> bool {
        matches!(self, ContainerStatus::Died | ContainerStatus::Destroyed)
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 観測された状態を現在の状態に merge する
///
/// rank が厳密に大きいときだけ `(observed, true)`、それ以外は `(current, false)`。
pub fn merge(current: ContainerStatus, observed: ContainerStatus) -> (ContainerStatus, bool) {
    if observed.rank() > current.rank() {
        (observed, true)
    } else {
        (current, false)
    }
}

/// トークン版の merge。解釈できないトークンは変更なし。
pub fn merge_token(current: ContainerStatus, token: &str) -> (ContainerStatus, bool) {
    match ContainerStatus::from_runtime_token(token) {
        Some(observed) => merge(current, observed),
        None => (current, false),
    }
}
