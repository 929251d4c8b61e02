//! Launch - 起動パラメータと起動コマンドの組み立て
//!
//! コマンドは `LaunchParams` から決定的に組み立てます。
//! 省略されたオプションはフラグごと出力しません（空値や null を渡さない）。

use serde::{Deserialize, Serialize};

use super::model::ModelId;

/// Tool-call parser used when the caller does not pick one.
pub const DEFAULT_TOOL_CALL_PARSER: &str = "hermes";

/// LaunchParams は startModel の入力
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchParams {
    pub port: u16,

    /// GPU selection: `all` or comma-separated device ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_selector: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tensor_parallel_size: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_memory_utilization: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_parser: Option<String>,
}

impl LaunchParams {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            device_selector: None,
            tensor_parallel_size: None,
            gpu_memory_utilization: None,
            tool_call_parser: None,
        }
    }

    pub fn with_devices(mut self, selector: impl Into<String>) -> Self {
        self.device_selector = Some(selector.into());
        self
    }

    pub fn with_tensor_parallel_size(mut self, size: u32) -> Self {
        self.tensor_parallel_size = Some(size);
        self
    }

    pub fn with_gpu_memory_utilization(mut self, fraction: f32) -> Self {
        self.gpu_memory_utilization = Some(fraction);
        self
    }

    pub fn with_tool_call_parser(mut self, parser: impl Into<String>) -> Self {
        self.tool_call_parser = Some(parser.into());
        self
    }

    /// モデルサーバの起動引数を組み立てる
    ///
    /// 常に含む: `--model`, `--port`, `--enable-auto-tool-choice`, `--tool-call-parser`
    /// 値があるときだけ: `--tensor-parallel-size`, `--gpu-memory-utilization`
    pub fn command(&self, model: &ModelId, default_parser: &str) -> Vec<String> {
        let parser = self
            .tool_call_parser
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(default_parser);

        let mut command = vec![
            "--model".to_string(),
            model.to_string(),
            "--port".to_string(),
            self.port.to_string(),
            "--enable-auto-tool-choice".to_string(),
            "--tool-call-parser".to_string(),
            parser.to_string(),
        ];
        if let Some(size) = self.tensor_parallel_size {
            command.push("--tensor-parallel-size".to_string());
            command.push(size.to_string());
        }
        if let Some(fraction) = self.gpu_memory_utilization {
            command.push("--gpu-memory-utilization".to_string());
            command.push(fraction.to_string());
        }
        command
    }

    /// Device selector parsed for the runtime. `None` means no restriction.
    pub fn devices(&self) -> Option<DeviceSelection> {
        let raw = self.device_selector.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        if raw.eq_ignore_ascii_case("all") {
            return Some(DeviceSelection::All);
        }
        let ids: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        if ids.is_empty() {
            None
        } else {
            Some(DeviceSelection::Ids(ids))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelection {
    All,
    Ids(Vec<String>),
}

/// Bind mount into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
}

/// LaunchSpec はランタイムの create に渡すすべて
///
/// - detached / auto-remove はランタイム側の前提
/// - `devices` が `None` ならデバイス制限は一切付けない
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub port: u16,
    pub devices: Option<DeviceSelection>,
    pub mounts: Vec<Mount>,
    pub auto_remove: bool,
}

/// What the runtime reports for a container (create or inspect).
///
/// `id` can be missing; the controller treats that as a failed launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeContainer {
    pub id: Option<String>,
    pub name: String,
    pub running: bool,
}

/// ContainerHandle は稼働中コンテナへの参照
///
/// ContainerInfo が唯一の所有者。呼び出し元には複製を返す。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

impl ContainerHandle {
    /// ID が割り当てられていれば handle にする
    pub fn from_runtime(container: RuntimeContainer) -> Option<Self> {
        let id = container.id.filter(|id| !id.is_empty())?;
        Some(Self {
            id,
            name: container.name,
        })
    }
}
