pub mod cli;
pub mod core;
pub mod models;
pub mod platform;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::core::config::Config;
pub use crate::core::coordinator::{Coordinator, CoordinatorError, CoordinatorResult, CoordinatorStatus};
pub use crate::core::event_loop::{spawn, CoordinatorHandle};
pub use crate::core::sink::{ChannelSink, FrameSink, Notice, SinkEvent, TracingSink};

use crate::cli::{Args, SourceArg};
use crate::core::loop_state::LoopPhase;
use crate::platform::camera::SyntheticCamera;
use crate::platform::pose::RemoteEstimatorFactory;
use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Entry point of the `posewatch` binary
pub fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;
    runtime.block_on(run_session(args))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn resolve_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    if let Some(variant) = args.variant {
        config.variant = variant;
    }
    if let Some(url) = &args.backend_url {
        config.backend_url = Some(url.clone());
    }
    if args.auto_submit {
        config.auto_submit = true;
    }
    if let Some(path) = &args.export {
        config.export_path = path.clone();
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn run_session(args: Args) -> anyhow::Result<()> {
    let config = resolve_config(&args)?;
    let camera = Arc::new(SyntheticCamera::new(config.camera.width, config.camera.height));
    let factory = Arc::new(RemoteEstimatorFactory::new(
        config.backend_url.clone(),
        config.submit_timeout(),
    ));

    let coordinator = Coordinator::new(config, camera, factory, Box::new(TracingSink));
    let (handle, task) = spawn(coordinator);

    let acquired = match &args.source {
        SourceArg::Webcam => handle.acquire_webcam().await,
        SourceArg::Image { path } => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            handle.acquire_image(bytes).await
        }
        SourceArg::Video { path } => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            handle.acquire_video_file(bytes).await
        }
    };

    if let Err(e) = acquired {
        handle.shutdown().await?;
        task.await?;
        return Err(e).context("Failed to acquire source");
    }

    let deadline = args.duration_secs.map(Duration::from_secs);
    tokio::select! {
        _ = sleep_or_forever(deadline) => info!("Run duration elapsed"),
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        _ = wait_until_idle(&handle) => {
            if args.source == SourceArg::Webcam {
                warn!("Detection halted; restart required");
            } else {
                info!("Source finished");
            }
        }
    }

    let status = handle.status().await?;
    let path = handle.export_to(None).await?;
    info!(
        frames = status.frames_recorded,
        fps = format_args!("{:.1}", status.fps),
        path = %path.display(),
        "Session finished"
    );

    handle.shutdown().await?;
    task.await?;
    Ok(())
}

async fn sleep_or_forever(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

/// Resolves once the loop has stopped on its own (one-shot done, clip ended, step failure)
async fn wait_until_idle(handle: &CoordinatorHandle) {
    loop {
        match handle.status().await {
            Ok(status) if status.phase != LoopPhase::Idle => {}
            _ => return,
        }
        tokio::time::sleep(IDLE_POLL_INTERVAL).await;
    }
}
