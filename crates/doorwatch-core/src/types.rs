use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity key in the directory (the employee record id on the server).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub i64);

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bounding box for a detected face, in pixel coordinates of the frame it was found in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Map a box found in a frame resized by `factor` back to the original frame.
    ///
    /// A box found at 0.5x is doubled; `factor` must be positive.
    pub fn rescale_from(&self, factor: f32) -> BoundingBox {
        let inv = 1.0 / factor;
        BoundingBox {
            x: self.x * inv,
            y: self.y * inv,
            width: self.width * inv,
            height: self.height * inv,
        }
    }
}

/// Face encoding vector (typically 128-dimensional).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Both vectors are expected to share the system-wide dimension; extra
    /// components of the longer vector are ignored.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Serialize to the directory's text form, a JSON array of numbers.
    pub fn to_json(&self) -> String {
        // A Vec<f32> always serializes; the fallback is unreachable in practice.
        serde_json::to_string(&self.values).unwrap_or_else(|_| "[]".to_string())
    }
}

/// A known identity with its active encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub id: IdentityId,
    pub name: String,
    pub encoding: Embedding,
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Matched identity id and display name; `None` means "unknown".
    pub identity: Option<(IdentityId, String)>,
    /// Euclidean distance to the nearest gallery entry (`f32::INFINITY` for an empty gallery).
    pub distance: f32,
    /// Always `1 - distance`.
    pub confidence: f32,
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        self.identity.is_some()
    }
}

/// One emitted identification at the door.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub identity: IdentityId,
    pub identity_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Match confidence in [0, 1].
    pub confidence: f32,
    pub camera: String,
    #[serde(skip)]
    pub snapshot: Option<Vec<u8>>,
}

/// Attendance ledger entry (check-in/check-out through the app).
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceRecord {
    pub identity: IdentityId,
    pub check_in: Option<DateTime<Utc>>,
    pub check_out: Option<DateTime<Utc>>,
}

impl AttendanceRecord {
    /// True if the check-in or the check-out falls inside `[start, end]`.
    pub fn touches(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        let inside = |t: &DateTime<Utc>| *t >= start && *t <= end;
        self.check_in.as_ref().is_some_and(inside) || self.check_out.as_ref().is_some_and(inside)
    }
}

/// Remark attached to every mismatch line.
pub const MISMATCH_REMARK: &str = "Detected at door without app check-in/check-out";

/// A detection with no matching attendance record inside its window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MismatchRecord {
    pub identity: IdentityId,
    pub identity_name: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub confidence: f32,
    pub camera: String,
    #[serde(skip)]
    pub snapshot: Option<Vec<u8>>,
    pub remark: String,
}

impl MismatchRecord {
    pub fn from_event(event: &DetectionEvent) -> Self {
        Self {
            identity: event.identity,
            identity_name: event.identity_name.clone(),
            detected_at: event.timestamp,
            confidence: event.confidence,
            camera: event.camera.clone(),
            snapshot: event.snapshot.clone(),
            remark: MISMATCH_REMARK.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Embedding::new(vec![0.25, -0.5, 1.0]);
        assert_eq!(a.euclidean_distance(&a.clone()), 0.0);
    }

    #[test]
    fn test_embedding_json_is_plain_array() {
        let e = Embedding::new(vec![0.5, -1.0]);
        assert_eq!(e.to_json(), "[0.5,-1.0]");
    }

    #[test]
    fn test_rescale_from_half() {
        let b = BoundingBox { x: 10.0, y: 20.0, width: 30.0, height: 40.0 };
        let r = b.rescale_from(0.5);
        assert_eq!(r, BoundingBox { x: 20.0, y: 40.0, width: 60.0, height: 80.0 });
    }

    #[test]
    fn test_attendance_touches_window() {
        let at = |h, m| Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap();
        let rec = AttendanceRecord {
            identity: IdentityId(5),
            check_in: Some(at(9, 5)),
            check_out: None,
        };
        assert!(rec.touches(at(8, 30), at(9, 30)));
        assert!(!rec.touches(at(9, 6), at(10, 0)));
        // Inclusive bounds
        assert!(rec.touches(at(9, 5), at(9, 5)));
    }

    #[test]
    fn test_attendance_checkout_only() {
        let at = |h, m| Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap();
        let rec = AttendanceRecord {
            identity: IdentityId(5),
            check_in: Some(at(7, 0)),
            check_out: Some(at(9, 20)),
        };
        assert!(rec.touches(at(8, 30), at(9, 30)));
    }
}
