//! Domain model (model ids, statuses, launch parameters, registry entries, events).
//!
//! I/O を持たない純粋なデータとロジックだけを置く。

pub mod container;
pub mod errors;
pub mod events;
pub mod launch;
pub mod model;
pub mod status;

pub use self::container::{ContainerInfo, StatusView};
pub use self::errors::{DockhandError, ErrorKind, NotifyError, RuntimeError};
pub use self::events::{CONTAINER_TOPIC, ContainerNotification, LiveEvent, RuntimeEvent};
pub use self::launch::{
    ContainerHandle, DEFAULT_TOOL_CALL_PARSER, DeviceSelection, LaunchParams, LaunchSpec, Mount,
    RuntimeContainer,
};
pub use self::model::ModelId;
pub use self::status::{ContainerStatus, merge, merge_token};
