use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dockhand_core::impls::{BroadcastSink, DockerRuntime, TracingSink};
use dockhand_core::ports::NotificationSink;
use dockhand_core::{
    ContainerService, ContainerServiceBuilder, DockhandConfig, LaunchParams, ModelId, Readiness,
};

#[derive(Debug, Parser)]
#[command(name = "dockhand", about = "Run one inference model per container", version)]
struct Cli {
    /// JSON config file
    #[arg(long, env = "DOCKHAND_CONFIG")]
    config: Option<PathBuf>,

    /// Override the serving image
    #[arg(long, env = "DOCKHAND_IMAGE")]
    image: Option<String>,

    /// Override the host model cache directory
    #[arg(long, env = "DOCKHAND_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List models found in the cache
    Models,
    /// Show the status of one model
    Status { model: String },
    /// Launch the container for a model
    Start {
        model: String,
        #[arg(long)]
        port: u16,
        /// `all` or comma-separated GPU ids
        #[arg(long)]
        devices: Option<String>,
        #[arg(long)]
        tensor_parallel_size: Option<u32>,
        #[arg(long)]
        gpu_memory_utilization: Option<f32>,
        #[arg(long)]
        tool_call_parser: Option<String>,
        /// Wait up to SECS for the model server to become ready
        #[arg(long, value_name = "SECS")]
        wait: Option<u64>,
    },
    /// Stop the container of a model
    Stop { model: String },
    /// Follow runtime events and print live updates until Ctrl-C
    Watch,
}

fn load_config(cli: &Cli) -> Result<DockhandConfig> {
    let mut config = match &cli.config {
        Some(path) => DockhandConfig::from_json_file(path)?,
        None => DockhandConfig::default(),
    };
    if let Some(image) = &cli.image {
        config.image = image.clone();
    }
    if let Some(dir) = &cli.cache_dir {
        config.host_cache_dir = dir.clone();
    }
    Ok(config)
}

fn build_service(config: DockhandConfig, sink: Arc<dyn NotificationSink>) -> Result<ContainerService> {
    let runtime = DockerRuntime::connect().context("connect to container runtime")?;
    let service = ContainerServiceBuilder::new()
        .runtime(Arc::new(runtime))
        .sink(sink)
        .config(config)
        .build()?;
    Ok(service)
}

/// Build a service for a one-shot command and pick up running containers.
async fn open(config: DockhandConfig) -> Result<ContainerService> {
    let service = build_service(config, Arc::new(TracingSink))?;
    service.sync_models().await?;
    Ok(service)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dockhand=info,dockhand_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Models => {
            let service = open(config).await?;
            for model in service.list_models().await {
                println!("{model}");
            }
        }
        Commands::Status { model } => {
            let model = ModelId::new(model)?;
            let service = open(config).await?;
            match service.get_status(&model).await {
                Some(status) => print_json(&status)?,
                None => anyhow::bail!("unknown model: {model}"),
            }
        }
        Commands::Start {
            model,
            port,
            devices,
            tensor_parallel_size,
            gpu_memory_utilization,
            tool_call_parser,
            wait,
        } => {
            let model = ModelId::new(model)?;
            let mut params = LaunchParams::new(port);
            params.device_selector = devices;
            params.tensor_parallel_size = tensor_parallel_size;
            params.gpu_memory_utilization = gpu_memory_utilization;
            params.tool_call_parser = tool_call_parser;

            let service = open(config).await?;
            match wait {
                Some(secs) => {
                    let (handle, readiness) = service
                        .start_model_awaiting(&model, params, Some(Duration::from_secs(secs)))
                        .await?;
                    print_json(&handle)?;
                    if readiness == Readiness::Pending {
                        warn!(model = %model, "not ready after {secs}s; still starting");
                    }
                }
                None => print_json(&service.start_model(&model, params).await?)?,
            }
            service.shutdown().await;
        }
        Commands::Stop { model } => {
            let model = ModelId::new(model)?;
            let service = open(config).await?;
            service.stop_model(&model).await?;
            service.shutdown().await;
            info!(model = %model, "stopped");
        }
        Commands::Watch => watch(config).await?,
    }
    Ok(())
}

async fn watch(config: DockhandConfig) -> Result<()> {
    let sink = Arc::new(BroadcastSink::new(256));
    let mut updates = sink.subscribe();
    let service = build_service(config, sink.clone())?;

    service.sync_models().await?;
    service.start_reconciler().await;
    info!("watching container events (Ctrl-C to stop)");

    let mut health = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = health.tick() => {}
            update = updates.recv() => match update {
                Ok((topic, event)) => {
                    println!("{}", serde_json::json!({ "topic": topic, "event": event }));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "live updates dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
        if !service.reconciler_running().await {
            warn!("event feed ended");
            break;
        }
    }

    service.shutdown().await;
    Ok(())
}
