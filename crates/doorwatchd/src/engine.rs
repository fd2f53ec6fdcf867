use chrono::Utc;
use doorwatch_core::{
    EncoderError, EventLog, FaceEncoder, GalleryError, IdentityGallery, IdentityId, ServiceError,
    Settings,
};
use doorwatch_hw::{Camera, CameraError, FrameSource, STREAM_BUFFERS};
use doorwatch_rpc::{HttpFaceEncoder, OdooClient};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::pipeline::{DetectionSession, FrameOutcome, SessionConfig, SessionStats};
use crate::registration::{LineTrigger, RegistrationError, RegistrationFlow};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("attendance server: {0}")]
    Service(#[from] ServiceError),
    #[error("gallery error: {0}")]
    Gallery(#[from] GalleryError),
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),
    #[error("registration failed: {0}")]
    Registration(#[from] RegistrationError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited without reporting")]
    ChannelClosed,
}

/// What the engine thread does once its resources are up.
#[derive(Debug, Clone, Copy)]
pub enum Mode {
    Detect,
    Register(IdentityId),
}

/// Handle to a running engine thread.
pub struct EngineHandle {
    /// Checked by the loops between frames.
    pub stop: Arc<AtomicBool>,
    /// Resolves with the thread's final result.
    pub done: oneshot::Receiver<Result<(), EngineError>>,
}

/// Spawn the engine on a dedicated OS thread.
///
/// The camera, the server session and the encoder client are set up on that
/// thread (the HTTP client is blocking). Startup failures arrive through
/// [`EngineHandle::done`] like any other result.
pub fn spawn_engine(settings: Settings, mode: Mode) -> Result<EngineHandle, EngineError> {
    let stop = Arc::new(AtomicBool::new(false));
    let (done_tx, done) = oneshot::channel();
    let thread_stop = Arc::clone(&stop);

    std::thread::Builder::new()
        .name("doorwatch-engine".into())
        .spawn(move || {
            tracing::info!(?mode, "engine thread started");
            let result = run(&settings, mode, &thread_stop);
            tracing::info!(ok = result.is_ok(), "engine thread exiting");
            let _ = done_tx.send(result);
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { stop, done })
}

fn run(settings: &Settings, mode: Mode, stop: &AtomicBool) -> Result<(), EngineError> {
    // Fatal unless all three come up.
    let camera = Camera::open(&settings.camera_device)?;
    tracing::info!(
        device = %camera.device_path,
        width = camera.width,
        height = camera.height,
        fourcc = ?camera.fourcc,
        "camera opened"
    );
    let client = OdooClient::connect(&settings.server)?;
    let mut encoder = HttpFaceEncoder::new(&settings.encoder_url, settings.server.request_timeout)?;
    let mut stream = camera.stream()?;

    match mode {
        Mode::Detect => {
            let gallery = IdentityGallery::load(&client, settings.encoding_dim)?;
            let session = DetectionSession::new(gallery, SessionConfig::from_settings(settings));
            run_detection(session, &mut stream, &mut encoder, &client, stop)?;
        }
        Mode::Register(identity) => {
            let flow = RegistrationFlow {
                identity,
                dimension: settings.encoding_dim,
                snapshot_padding: settings.snapshot_padding,
                stale_frames: STREAM_BUFFERS as usize,
                directory: &client,
            };
            let mut trigger = LineTrigger::new(std::io::stdin().lock());
            flow.run(&mut trigger, &mut stream, &mut encoder, stop)?;
        }
    }
    Ok(())
}

/// Pull frames until stopped or the source fails. Per-frame analysis errors are logged and skipped.
pub fn run_detection(
    mut session: DetectionSession,
    source: &mut dyn FrameSource,
    encoder: &mut dyn FaceEncoder,
    log: &dyn EventLog,
    stop: &AtomicBool,
) -> Result<SessionStats, EngineError> {
    tracing::info!("detection running");
    let result = loop {
        if stop.load(Ordering::Relaxed) {
            break Ok(());
        }
        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => break Err(EngineError::Camera(e)),
        };
        match session.process_frame(&frame, Utc::now(), encoder, log) {
            Ok(FrameOutcome::Skipped) => {}
            Ok(FrameOutcome::Processed { faces, emitted }) => {
                tracing::debug!(
                    sequence = frame.sequence,
                    faces,
                    emitted = emitted.len(),
                    "frame processed"
                );
            }
            Err(e) => {
                tracing::warn!(sequence = frame.sequence, error = %e, "frame not analysed");
            }
        }
    };

    let stats = session.stats();
    tracing::info!(
        frames_seen = stats.frames_seen,
        frames_sampled = stats.frames_sampled,
        faces = stats.faces,
        unknown = stats.unknown,
        suppressed = stats.suppressed,
        emitted = stats.emitted,
        dropped = stats.dropped,
        "detection session ended"
    );
    result.map(|()| stats)
}
