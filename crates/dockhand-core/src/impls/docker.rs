//! DockerRuntime - bollard による ContainerRuntime 実装
//!
//! - create: イメージが無ければ pull → create → start（start 失敗時は remove）
//! - stop: 304 / 404 は「すでに止まっている」とみなして成功
//! - events / logs: spawn したタスクが bollard のストリームを読み、
//!   bounded channel 経由で `'static` なストリームとして渡す。
//!   受け手が drop されたら次の送信を待たずにタスクを終える

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{DeviceRequest, EventMessage, HostConfig, PortBinding};
use bollard::system::EventsOptions;
use futures::Stream;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::domain::errors::RuntimeError;
use crate::domain::events::RuntimeEvent;
use crate::domain::launch::{
    ContainerHandle, DeviceSelection, LaunchSpec, Mount, RuntimeContainer,
};
use crate::ports::{ContainerRuntime, EventStream, LogStream};

const STREAM_BUFFER: usize = 64;

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the local socket.
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        Ok(Self { docker })
    }

    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        info!(image, "pulling image");
        let options = Some(CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        });
        let mut progress = self.docker.create_image(options, None, None);
        while progress.try_next().await.map_err(map_error)?.is_some() {}
        Ok(())
    }
}

fn map_error(err: BollardError) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(message),
        BollardError::DockerResponseServerError { message, .. } => RuntimeError::Rejected(message),
        other => RuntimeError::Unavailable(other.to_string()),
    }
}

fn bind(mount: &Mount) -> String {
    let mode = if mount.read_only { "ro" } else { "rw" };
    format!("{}:{}:{mode}", mount.host_path, mount.container_path)
}

fn device_requests(devices: Option<&DeviceSelection>) -> Option<Vec<DeviceRequest>> {
    let request = match devices? {
        DeviceSelection::All => DeviceRequest {
            driver: Some("nvidia".to_string()),
            count: Some(-1),
            capabilities: Some(vec![vec!["gpu".to_string()]]),
            ..Default::default()
        },
        DeviceSelection::Ids(ids) => DeviceRequest {
            driver: Some("nvidia".to_string()),
            device_ids: Some(ids.clone()),
            capabilities: Some(vec![vec!["gpu".to_string()]]),
            ..Default::default()
        },
    };
    Some(vec![request])
}

fn container_config(spec: &LaunchSpec) -> Config<String> {
    let port_key = format!("{}/tcp", spec.port);
    let port_bindings = HashMap::from([(
        port_key.clone(),
        Some(vec![PortBinding {
            host_ip: None,
            host_port: Some(spec.port.to_string()),
        }]),
    )]);

    let host_config = HostConfig {
        auto_remove: Some(spec.auto_remove),
        binds: Some(spec.mounts.iter().map(bind).collect()),
        device_requests: device_requests(spec.devices.as_ref()),
        port_bindings: Some(port_bindings),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        cmd: Some(spec.command.clone()),
        exposed_ports: Some(HashMap::from([(port_key, HashMap::new())])),
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn to_runtime_event(message: EventMessage) -> Option<RuntimeEvent> {
    let status = message.action?;
    let actor = message.actor?;
    Some(RuntimeEvent {
        id: actor.id?,
        status,
        actor_attributes: actor.attributes.unwrap_or_default(),
    })
}

/// Turn a channel receiver into a boxed `'static` stream.
fn channel_stream<T: Send + 'static>(rx: mpsc::Receiver<T>) -> stream::BoxStream<'static, T> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}

/// Next item of `source`, or `None` once it ends or nobody reads `tx` any more.
async fn next_unless_closed<S, T>(source: &mut S, tx: &mpsc::Sender<T>) -> Option<S::Item>
where
    S: Stream + Unpin,
{
    tokio::select! {
        _ = tx.closed() => None,
        item = source.next() => item,
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &LaunchSpec) -> Result<RuntimeContainer, RuntimeError> {
        self.ensure_image(&spec.image).await?;

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                container_config(spec),
            )
            .await
            .map_err(map_error)?;

        if let Err(err) = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            let _ = self
                .docker
                .remove_container(
                    &created.id,
                    Some(RemoveContainerOptions {
                        force: true,
                        v: true,
                        ..Default::default()
                    }),
                )
                .await;
            return Err(map_error(err));
        }

        debug!(name = %spec.name, container_id = %created.id, "container started");
        Ok(RuntimeContainer {
            id: Some(created.id).filter(|id| !id.is_empty()),
            name: spec.name.clone(),
            running: true,
        })
    }

    async fn stop(&self, handle: &ContainerHandle, grace: Duration) -> Result<(), RuntimeError> {
        let result = self
            .docker
            .stop_container(
                &handle.id,
                Some(StopContainerOptions {
                    t: i64::try_from(grace.as_secs()).unwrap_or(i64::MAX),
                }),
            )
            .await;

        match result {
            Ok(()) => Ok(()),
            // 304: already stopped, 404: already removed (auto-remove)
            Err(BollardError::DockerResponseServerError {
                status_code: 304 | 404,
                ..
            }) => Ok(()),
            Err(err) => Err(map_error(err)),
        }
    }

    async fn inspect(&self, name: &str) -> Result<Option<RuntimeContainer>, RuntimeError> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => Ok(Some(RuntimeContainer {
                id: inspect.id,
                name: inspect
                    .name
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| name.to_string()),
                running: inspect
                    .state
                    .and_then(|state| state.running)
                    .unwrap_or(false),
            })),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(err) => Err(map_error(err)),
        }
    }

    fn events(&self) -> EventStream {
        let docker = self.docker.clone();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        tokio::spawn(async move {
            let options = EventsOptions::<String> {
                filters: HashMap::from([("type".to_string(), vec!["container".to_string()])]),
                ..Default::default()
            };
            let mut feed = std::pin::pin!(docker.events(Some(options)));
            while let Some(item) = next_unless_closed(&mut feed, &tx).await {
                let item = match item {
                    Ok(message) => match to_runtime_event(message) {
                        Some(event) => Ok(event),
                        None => continue,
                    },
                    Err(err) => Err(RuntimeError::Stream(err.to_string())),
                };
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
        });

        channel_stream(rx)
    }

    fn logs(&self, handle: &ContainerHandle) -> LogStream {
        let docker = self.docker.clone();
        let container_id = handle.id.clone();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        tokio::spawn(async move {
            let options = LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                ..Default::default()
            };
            let mut output = std::pin::pin!(docker.logs(&container_id, Some(options)));
            // chunks may split or join lines
            let mut pending = String::new();
            while let Some(chunk) = next_unless_closed(&mut output, &tx).await {
                match chunk {
                    Ok(chunk) => {
                        pending.push_str(&chunk.to_string());
                        while let Some(pos) = pending.find('\n') {
                            let line: String = pending.drain(..=pos).collect();
                            let line = line.trim_end_matches(['\r', '\n']).to_string();
                            if tx.send(Ok(line)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(RuntimeError::Stream(err.to_string()))).await;
                        return;
                    }
                }
            }
            if !pending.is_empty() && !tx.is_closed() {
                let _ = tx.send(Ok(pending)).await;
            }
        });

        channel_stream(rx)
    }
}
