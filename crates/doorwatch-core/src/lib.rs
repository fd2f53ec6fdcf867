//! doorwatch-core — Door monitoring engine.
//!
//! Matches face encodings from a door camera against a gallery of known
//! identities, suppresses repeat sightings, and reconciles the resulting
//! detections against the attendance ledger.

pub mod config;
pub mod cooldown;
pub mod gallery;
pub mod matcher;
pub mod memory;
pub mod ports;
pub mod reconcile;
pub mod types;

pub use config::{ConfigError, ServerSettings, Settings};
pub use cooldown::CooldownTracker;
pub use gallery::{GalleryError, IdentityGallery, Registration};
pub use matcher::{EuclideanMatcher, Matcher};
pub use ports::{
    AttendanceLedger, DetectionStore, EncoderError, EventLog, FaceEncoder, IdentityDirectory,
    MismatchSink, ServiceError,
};
pub use reconcile::{ReconcileError, ReconcileReport, ReconcileRequest, Reconciler};
pub use types::{
    AttendanceRecord, BoundingBox, DetectionEvent, Embedding, Identity, IdentityId, MatchResult,
    MismatchRecord,
};
