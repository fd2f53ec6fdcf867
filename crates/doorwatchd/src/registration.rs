//! Operator-triggered capture of one identity's encoding.
//!
//! Each attempt goes await trigger → capture → localize (exactly one face)
//! → encode → submit. An ambiguous capture sends the operator back to the
//! trigger; anything else ends the flow.

use crate::pipeline::snapshot;
use doorwatch_core::gallery::{self, Registration};
use doorwatch_core::{EncoderError, FaceEncoder, GalleryError, IdentityDirectory, IdentityId};
use doorwatch_hw::{CameraError, FrameSource};
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("expected exactly one face in the capture, found {faces}")]
    AmbiguousCapture { faces: usize },
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
}

/// What the operator asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Capture,
    Quit,
}

pub trait CaptureTrigger {
    /// Block until the operator decides.
    fn wait(&mut self) -> Trigger;
}

/// Line-oriented trigger: an empty line captures, `q` quits, end of input quits.
pub struct LineTrigger<R> {
    input: R,
}

impl<R: BufRead> LineTrigger<R> {
    pub fn new(input: R) -> Self {
        Self { input }
    }
}

impl<R: BufRead> CaptureTrigger for LineTrigger<R> {
    fn wait(&mut self) -> Trigger {
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) | Err(_) => Trigger::Quit,
            Ok(_) if line.trim().eq_ignore_ascii_case("q") => Trigger::Quit,
            Ok(_) => Trigger::Capture,
        }
    }
}

pub struct RegistrationFlow<'a> {
    pub identity: IdentityId,
    pub dimension: usize,
    pub snapshot_padding: u32,
    /// Frames thrown away before the capture so the driver's queue holds nothing stale.
    pub stale_frames: usize,
    pub directory: &'a dyn IdentityDirectory,
}

impl RegistrationFlow<'_> {
    /// Loop until one registration succeeds, the operator quits, or a non-retryable error.
    ///
    /// Returns the registered display name, or `None` if the operator quit.
    pub fn run(
        &self,
        trigger: &mut dyn CaptureTrigger,
        source: &mut dyn FrameSource,
        encoder: &mut dyn FaceEncoder,
        stop: &AtomicBool,
    ) -> Result<Option<String>, RegistrationError> {
        tracing::info!(
            identity = %self.identity,
            "registration: press Enter to capture, q to quit"
        );
        loop {
            if stop.load(Ordering::Relaxed) {
                return Ok(None);
            }
            if trigger.wait() == Trigger::Quit {
                tracing::info!("registration cancelled");
                return Ok(None);
            }
            match self.capture_once(source, encoder) {
                Ok(name) => {
                    tracing::info!(identity = %self.identity, %name, "face registered");
                    return Ok(Some(name));
                }
                Err(RegistrationError::AmbiguousCapture { faces }) => {
                    tracing::warn!(faces, "need exactly one face in view; try again");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One capture → localize → encode → submit attempt.
    pub fn capture_once(
        &self,
        source: &mut dyn FrameSource,
        encoder: &mut dyn FaceEncoder,
    ) -> Result<String, RegistrationError> {
        for _ in 0..self.stale_frames {
            source.next_frame()?;
        }
        let frame = source.next_frame()?;

        let boxes = encoder.localize(&frame.data, frame.width, frame.height)?;
        let [face] = boxes.as_slice() else {
            return Err(RegistrationError::AmbiguousCapture { faces: boxes.len() });
        };

        let encoding = encoder
            .encode(&frame.data, frame.width, frame.height, std::slice::from_ref(face))?
            .into_iter()
            .next()
            .ok_or_else(|| EncoderError::InvalidOutput("no encoding for the face".into()))?;

        let registration = Registration {
            identity: self.identity,
            encoding,
            image: snapshot(&frame, face, self.snapshot_padding),
        };
        Ok(gallery::register(self.directory, registration, self.dimension)?)
    }
}
