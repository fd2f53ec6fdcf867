//! Contracts for the external collaborators: identity directory, event log,
//! attendance ledger, mismatch report sink and the face localizer/encoder.
//!
//! All calls are synchronous. A slow collaborator stalls the caller.

use crate::types::{
    AttendanceRecord, BoundingBox, DetectionEvent, Embedding, IdentityId, MismatchRecord,
};
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ServiceError {
    /// Collaborator unreachable (connect, timeout, transport failure).
    #[error("{service} unreachable: {message}")]
    Connectivity { service: &'static str, message: String },
    /// Collaborator answered and refused the request.
    #[error("{service} rejected request: {message}")]
    Rejected { service: &'static str, message: String },
    /// Collaborator answered with something outside the contract.
    #[error("{service} protocol violation: {message}")]
    Protocol { service: &'static str, message: String },
}

impl ServiceError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ServiceError::Connectivity { .. })
    }
}

/// One row of the directory's known-identities listing.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntry {
    pub id: IdentityId,
    pub name: String,
    /// Serialized encoding (JSON array text); `None` if the directory has none.
    pub encoding: Option<String>,
}

/// Upsert of one identity's encoding in the directory.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodingUpsert {
    pub identity: IdentityId,
    pub encoding: String,
    pub image: Option<Vec<u8>>,
}

pub trait IdentityDirectory {
    /// All identities with a non-empty encoding.
    fn fetch_known_identities(&self) -> Result<Vec<DirectoryEntry>, ServiceError>;

    /// Store `upsert.encoding` (and image) on the identity. Returns its display name.
    fn register(&self, upsert: &EncodingUpsert) -> Result<String, ServiceError>;
}

/// Acknowledgement from the event log.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitReceipt {
    pub event_id: i64,
    pub identity_name: String,
}

pub trait EventLog {
    fn submit(&self, event: &DetectionEvent) -> Result<SubmitReceipt, ServiceError>;
}

/// Read side of the event log used by reconciliation.
pub trait DetectionStore {
    /// Events with `from <= timestamp <= to`, restricted to `identities` when given.
    fn detections_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        identities: Option<&[IdentityId]>,
    ) -> Result<Vec<DetectionEvent>, ServiceError>;
}

pub trait AttendanceLedger {
    /// Records of `identity` whose check-in or check-out lies in `[start, end]`.
    ///
    /// Implementations should answer with a bounded range query on
    /// (identity, timestamp) rather than a scan.
    fn records_near(
        &self,
        identity: IdentityId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AttendanceRecord>, ServiceError>;
}

/// Destination of a reconciliation run.
pub trait MismatchSink {
    /// Discard every previously stored mismatch and store `records` as run `run_id`.
    fn replace_all(&mut self, run_id: Uuid, records: &[MismatchRecord]) -> Result<(), ServiceError>;
}

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("face encoder unreachable: {0}")]
    Unavailable(String),
    #[error("face encoder returned invalid output: {0}")]
    InvalidOutput(String),
}

/// Black-box face localization and encoding over an 8-bit grayscale frame.
pub trait FaceEncoder {
    /// Locate faces. Boxes are in the coordinate space of the given frame.
    fn localize(&mut self, frame: &[u8], width: u32, height: u32)
        -> Result<Vec<BoundingBox>, EncoderError>;

    /// Encode each face; the output has one embedding per box, in order.
    fn encode(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        faces: &[BoundingBox],
    ) -> Result<Vec<Embedding>, EncoderError>;
}
