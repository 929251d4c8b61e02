//! Registry entry and the status view derived from it.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::launch::{ContainerHandle, LaunchParams};
use super::status::ContainerStatus;

/// One entry per model in the registry.
///
/// Design:
/// - `handle` is `Some` only while we believe a container exists.
/// - `runtime_id` mirrors `handle.id`; events are matched against it.
/// - `params` are the launch parameters last used, kept for reporting only.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerInfo {
    pub status: ContainerStatus,
    pub handle: Option<ContainerHandle>,
    pub runtime_id: Option<String>,
    pub params: Option<LaunchParams>,
    pub updated_at: DateTime<Utc>,
}

impl ContainerInfo {
    /// Fresh entry: `Closed`, no handle.
    pub fn closed(now: DateTime<Utc>) -> Self {
        Self {
            status: ContainerStatus::Closed,
            handle: None,
            runtime_id: None,
            params: None,
            updated_at: now,
        }
    }

    /// New container lifetime: the rank restarts from `Closed`.
    pub fn attached(
        handle: ContainerHandle,
        params: Option<LaunchParams>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            status: ContainerStatus::Closed,
            runtime_id: Some(handle.id.clone()),
            handle: Some(handle),
            params,
            updated_at: now,
        }
    }

    /// A handle counts as live until the container is known to be gone.
    pub fn live_handle(&self) -> Option<&ContainerHandle> {
        self.handle
            .as_ref()
            .filter(|_| !self.status.is_terminal())
    }

    pub fn view(&self) -> StatusView {
        StatusView {
            status: self.status,
            runtime_id: self.runtime_id.clone(),
            port: self.params.as_ref().map(|p| p.port),
            tensor_parallel_size: self.params.as_ref().and_then(|p| p.tensor_parallel_size),
            gpu_memory_utilization: self.params.as_ref().and_then(|p| p.gpu_memory_utilization),
            updated_at: self.updated_at,
        }
    }
}

/// getStatus の戻り値
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    pub status: ContainerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tensor_parallel_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_memory_utilization: Option<f32>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> ContainerHandle {
        ContainerHandle {
            id: "c123".into(),
            name: "models--acme--infer-7b".into(),
        }
    }

    #[test]
    fn terminal_status_hides_handle() {
        let mut info = ContainerInfo::attached(handle(), None, Utc::now());
        assert!(info.live_handle().is_some());

        info.status = ContainerStatus::Died;
        assert!(info.live_handle().is_none());
        assert!(info.handle.is_some());
    }

    #[test]
    fn view_reports_launch_parameters() {
        let params = LaunchParams::new(8001).with_tensor_parallel_size(2);
        let mut info = ContainerInfo::attached(handle(), Some(params), Utc::now());
        info.status = ContainerStatus::Started;

        let json = serde_json::to_value(info.view()).unwrap();
        assert_eq!(json["status"], "started");
        assert_eq!(json["port"], 8001);
        assert_eq!(json["runtime_id"], "c123");
        assert_eq!(json["tensor_parallel_size"], 2);
        assert!(json.get("gpu_memory_utilization").is_none());
    }
}
