//! Per-frame detection: sample, localize, match, cooldown filter, emit.

use chrono::{DateTime, TimeDelta, Utc};
use doorwatch_core::ports::SubmitReceipt;
use doorwatch_core::{
    BoundingBox, CooldownTracker, DetectionEvent, EncoderError, EuclideanMatcher, EventLog,
    FaceEncoder, IdentityGallery, Matcher, Settings,
};
use doorwatch_hw::{Frame, FrameError};
use std::borrow::Cow;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("downscale failed: {0}")]
    Downscale(#[from] FrameError),
    #[error("localize failed: {0}")]
    Localize(#[source] EncoderError),
    #[error("encode failed: {0}")]
    Encode(#[source] EncoderError),
}

/// Knobs of a detection session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub camera_name: String,
    pub match_threshold: f32,
    pub cooldown: TimeDelta,
    pub frame_skip: u32,
    pub downscale: f32,
    pub snapshot_padding: u32,
}

impl SessionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            camera_name: settings.camera_name.clone(),
            match_threshold: settings.match_threshold,
            cooldown: settings.cooldown,
            frame_skip: settings.frame_skip.max(1),
            downscale: settings.downscale,
            snapshot_padding: settings.snapshot_padding,
        }
    }
}

/// Running totals for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_seen: u64,
    pub frames_sampled: u64,
    pub faces: u64,
    pub unknown: u64,
    pub suppressed: u64,
    pub emitted: u64,
    pub dropped: u64,
}

#[derive(Debug, PartialEq)]
pub enum FrameOutcome {
    /// Not a sampled frame.
    Skipped,
    Processed {
        faces: usize,
        emitted: Vec<SubmitReceipt>,
    },
}

/// State of one detection run.
///
/// Owns the gallery snapshot and the cooldown map. The gallery is fixed for
/// the lifetime of the session; registrations made meanwhile are picked up
/// by the next session.
pub struct DetectionSession {
    gallery: IdentityGallery,
    matcher: EuclideanMatcher,
    cooldown: CooldownTracker,
    config: SessionConfig,
    frame_count: u64,
    stats: SessionStats,
}

impl DetectionSession {
    pub fn new(gallery: IdentityGallery, config: SessionConfig) -> Self {
        if gallery.is_empty() {
            tracing::warn!("gallery is empty; every face will be reported unknown");
        }
        Self {
            gallery,
            matcher: EuclideanMatcher,
            cooldown: CooldownTracker::new(config.cooldown),
            config,
            frame_count: 0,
            stats: SessionStats::default(),
        }
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Run one frame through the pipeline.
    ///
    /// An `Err` means the frame could not be analysed; the session stays usable.
    /// Emission failures are not errors: the event is dropped and counted.
    pub fn process_frame(
        &mut self,
        frame: &Frame,
        now: DateTime<Utc>,
        encoder: &mut dyn FaceEncoder,
        log: &dyn EventLog,
    ) -> Result<FrameOutcome, PipelineError> {
        self.frame_count += 1;
        self.stats.frames_seen += 1;
        if self.frame_count % u64::from(self.config.frame_skip) != 0 {
            return Ok(FrameOutcome::Skipped);
        }
        self.stats.frames_sampled += 1;

        let factor = self.config.downscale;
        let small: Cow<'_, Frame> = if factor < 1.0 {
            Cow::Owned(frame.downscale(factor)?)
        } else {
            Cow::Borrowed(frame)
        };

        let boxes = encoder
            .localize(&small.data, small.width, small.height)
            .map_err(PipelineError::Localize)?;
        if boxes.is_empty() {
            tracing::trace!(sequence = frame.sequence, "no faces");
            return Ok(FrameOutcome::Processed {
                faces: 0,
                emitted: Vec::new(),
            });
        }
        let probes = encoder
            .encode(&small.data, small.width, small.height, &boxes)
            .map_err(PipelineError::Encode)?;

        self.stats.faces += boxes.len() as u64;
        let mut emitted = Vec::new();

        for (bbox, probe) in boxes.iter().zip(&probes) {
            if probe.len() != self.gallery.dimension() {
                tracing::warn!(
                    expected = self.gallery.dimension(),
                    actual = probe.len(),
                    "probe has wrong dimension; skipping face"
                );
                self.stats.unknown += 1;
                continue;
            }

            let result = self.matcher.compare(
                probe,
                self.gallery.identities(),
                self.config.match_threshold,
            );
            let Some((identity, name)) = result.identity else {
                tracing::debug!(distance = result.distance, "unknown face");
                self.stats.unknown += 1;
                continue;
            };

            if !self.cooldown.should_emit(identity, now) {
                tracing::debug!(%identity, "in cooldown; suppressed");
                self.stats.suppressed += 1;
                continue;
            }

            let event = DetectionEvent {
                identity,
                identity_name: Some(name),
                timestamp: now,
                confidence: result.confidence,
                camera: self.config.camera_name.clone(),
                snapshot: snapshot(frame, &bbox.rescale_from(factor), self.config.snapshot_padding),
            };

            match log.submit(&event) {
                Ok(receipt) => {
                    self.cooldown.record_emit(identity, now);
                    self.stats.emitted += 1;
                    tracing::info!(
                        %identity,
                        name = %receipt.identity_name,
                        confidence = result.confidence,
                        event_id = receipt.event_id,
                        "detection logged"
                    );
                    emitted.push(receipt);
                }
                Err(e) => {
                    self.stats.dropped += 1;
                    tracing::warn!(%identity, error = %e, "failed to log detection; event dropped");
                }
            }
        }

        Ok(FrameOutcome::Processed {
            faces: boxes.len(),
            emitted,
        })
    }
}

/// JPEG of the padded face region, in `frame` coordinates. `None` if it cannot be produced.
pub fn snapshot(frame: &Frame, bbox: &BoundingBox, padding: u32) -> Option<Vec<u8>> {
    let crop = frame.crop_padded(bbox.x, bbox.y, bbox.width, bbox.height, padding)?;
    match crop.to_jpeg() {
        Ok(jpeg) => Some(jpeg),
        Err(e) => {
            tracing::warn!(error = %e, "snapshot encoding failed; logging without snapshot");
            None
        }
    }
}
