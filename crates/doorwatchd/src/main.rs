use anyhow::{Context, Result};
use clap::Parser;
use doorwatch_core::{IdentityId, Settings};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod engine;
mod pipeline;
mod registration;

/// How long a stop request may take to finish the frame in flight.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "doorwatchd", version, about = "Door camera face detection daemon")]
struct Args {
    /// Register a face for this employee id instead of running detection
    #[arg(long, value_name = "ID")]
    register: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let settings = Settings::load().context("failed to load configuration")?;
    let mode = match args.register {
        Some(id) => engine::Mode::Register(IdentityId(id)),
        None => engine::Mode::Detect,
    };

    tracing::info!(
        ?mode,
        server = %settings.server.url,
        camera = %settings.camera_device,
        camera_name = %settings.camera_name,
        "doorwatchd starting"
    );

    let engine::EngineHandle { stop, mut done } = engine::spawn_engine(settings, mode)?;

    let finished = tokio::select! {
        result = &mut done => result,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            tracing::info!("stop requested");
            stop.store(true, Ordering::Relaxed);
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut done).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!("engine still busy after stop request; exiting anyway");
                    return Ok(());
                }
            }
        }
    };

    finished
        .map_err(|_| engine::EngineError::ChannelClosed)?
        .context("engine failed")?;
    tracing::info!("doorwatchd stopped");
    Ok(())
}
