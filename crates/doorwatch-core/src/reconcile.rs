//! Door detections vs. attendance ledger.
//!
//! A run is a windowed join over the detections in `[from, to]`, ordered
//! newest first: every detection with no check-in or check-out of the same
//! identity inside `[t - window, t + window]` becomes a mismatch. The output
//! is recomputed from scratch and replaces the previous run wholesale, so two
//! runs must never overlap. Serializing runs is the caller's job.

use crate::ports::{AttendanceLedger, DetectionStore, MismatchSink, ServiceError};
use crate::types::{DetectionEvent, IdentityId, MismatchRecord};
use chrono::{DateTime, TimeDelta, Utc};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_WINDOW_MINS: i64 = 30;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("invalid range: from {from} is after to {to}")]
    InvalidRange {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
    #[error("window of {window} around {at} is out of range")]
    WindowOverflow { at: DateTime<Utc>, window: TimeDelta },
    #[error("reconciliation aborted, previous report kept: {0}")]
    Service(#[from] ServiceError),
}

#[derive(Debug, Clone)]
pub struct ReconcileRequest {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// Restrict to these identities; `None` means everyone.
    pub identities: Option<BTreeSet<IdentityId>>,
}

#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub run_id: Uuid,
    /// Detections examined after range and identity filtering.
    pub examined: usize,
    /// Newest first.
    pub mismatches: Vec<MismatchRecord>,
}

pub struct Reconciler {
    window: TimeDelta,
}

impl Reconciler {
    pub fn new(window: TimeDelta) -> Self {
        Self { window }
    }

    pub fn window(&self) -> TimeDelta {
        self.window
    }

    /// Run one reconciliation and hand the result to `sink`.
    ///
    /// Any store or ledger failure aborts before `sink` is touched.
    pub fn run(
        &self,
        request: &ReconcileRequest,
        store: &dyn DetectionStore,
        ledger: &dyn AttendanceLedger,
        sink: &mut dyn MismatchSink,
    ) -> Result<ReconcileReport, ReconcileError> {
        if request.from > request.to {
            return Err(ReconcileError::InvalidRange {
                from: request.from,
                to: request.to,
            });
        }

        let filter: Option<Vec<IdentityId>> = request
            .identities
            .as_ref()
            .map(|ids| ids.iter().copied().collect());
        let mut events = store.detections_between(request.from, request.to, filter.as_deref())?;

        // The store is trusted for bounds only as far as we can check them.
        events.retain(|e| {
            e.timestamp >= request.from
                && e.timestamp <= request.to
                && request
                    .identities
                    .as_ref()
                    .map_or(true, |ids| ids.contains(&e.identity))
        });
        events.sort_by(newest_first);

        let mut mismatches = Vec::new();
        for event in &events {
            if !self.has_attendance(event, ledger)? {
                mismatches.push(MismatchRecord::from_event(event));
            }
        }

        let run_id = Uuid::new_v4();
        sink.replace_all(run_id, &mismatches)?;

        tracing::info!(
            %run_id,
            from = %request.from,
            to = %request.to,
            examined = events.len(),
            mismatches = mismatches.len(),
            "reconciliation complete"
        );

        Ok(ReconcileReport {
            run_id,
            examined: events.len(),
            mismatches,
        })
    }

    fn has_attendance(
        &self,
        event: &DetectionEvent,
        ledger: &dyn AttendanceLedger,
    ) -> Result<bool, ReconcileError> {
        let overflow = || ReconcileError::WindowOverflow {
            at: event.timestamp,
            window: self.window,
        };
        let start = event
            .timestamp
            .checked_sub_signed(self.window)
            .ok_or_else(overflow)?;
        let end = event
            .timestamp
            .checked_add_signed(self.window)
            .ok_or_else(overflow)?;
        let records = ledger.records_near(event.identity, start, end)?;
        Ok(records
            .iter()
            .any(|r| r.identity == event.identity && r.touches(start, end)))
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(TimeDelta::minutes(DEFAULT_WINDOW_MINS))
    }
}

/// Detection time descending, then identity ascending, then camera.
fn newest_first(a: &DetectionEvent, b: &DetectionEvent) -> Ordering {
    b.timestamp
        .cmp(&a.timestamp)
        .then_with(|| a.identity.cmp(&b.identity))
        .then_with(|| a.camera.cmp(&b.camera))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryEventLog, MemoryLedger, MemoryMismatchSink};
    use crate::types::{AttendanceRecord, MISMATCH_REMARK};
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    fn detection(id: i64, t: DateTime<Utc>) -> DetectionEvent {
        DetectionEvent {
            identity: IdentityId(id),
            identity_name: Some(format!("emp{id}")),
            timestamp: t,
            confidence: 0.82,
            camera: "Main Door".into(),
            snapshot: Some(vec![0xFF, 0xD8]),
        }
    }

    fn whole_day() -> ReconcileRequest {
        ReconcileRequest {
            from: at(0, 0),
            to: at(23, 59),
            identities: None,
        }
    }

    #[test]
    fn test_check_in_inside_window_is_not_a_mismatch() {
        let store = MemoryEventLog::new();
        store.push(detection(5, at(9, 0)));
        let ledger = MemoryLedger::new();
        ledger.push(AttendanceRecord {
            identity: IdentityId(5),
            check_in: Some(at(9, 5)),
            check_out: None,
        });
        let mut sink = MemoryMismatchSink::new();

        let report = Reconciler::default()
            .run(&whole_day(), &store, &ledger, &mut sink)
            .unwrap();
        assert_eq!(report.examined, 1);
        assert!(report.mismatches.is_empty());
        assert!(sink.records.is_empty());
        assert_eq!(sink.writes, 1);
    }

    #[test]
    fn test_no_record_in_window_is_a_mismatch() {
        let store = MemoryEventLog::new();
        store.push(detection(5, at(9, 0)));
        let ledger = MemoryLedger::new();
        // Outside [08:30, 09:30] and a different identity inside it.
        ledger.push(AttendanceRecord {
            identity: IdentityId(5),
            check_in: Some(at(8, 0)),
            check_out: Some(at(10, 0)),
        });
        ledger.push(AttendanceRecord {
            identity: IdentityId(6),
            check_in: Some(at(9, 0)),
            check_out: None,
        });
        let mut sink = MemoryMismatchSink::new();

        let report = Reconciler::default()
            .run(&whole_day(), &store, &ledger, &mut sink)
            .unwrap();
        assert_eq!(report.mismatches.len(), 1);
        let m = &report.mismatches[0];
        assert_eq!(m.identity, IdentityId(5));
        assert_eq!(m.detected_at, at(9, 0));
        assert_eq!(m.remark, MISMATCH_REMARK);
        assert_eq!(m.camera, "Main Door");
        assert_eq!(m.snapshot.as_deref(), Some(&[0xFF, 0xD8][..]));
        assert!((m.confidence - 0.82).abs() < 1e-6);
        assert_eq!(sink.records, report.mismatches);
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let store = MemoryEventLog::new();
        store.push(detection(5, at(9, 0)));
        let ledger = MemoryLedger::new();
        ledger.push(AttendanceRecord {
            identity: IdentityId(5),
            check_in: None,
            check_out: Some(at(9, 30)),
        });
        let mut sink = MemoryMismatchSink::new();

        let report = Reconciler::default()
            .run(&whole_day(), &store, &ledger, &mut sink)
            .unwrap();
        assert!(report.mismatches.is_empty());
    }

    #[test]
    fn test_output_is_newest_first() {
        let store = MemoryEventLog::new();
        store.push(detection(2, at(8, 0)));
        store.push(detection(3, at(17, 0)));
        store.push(detection(1, at(12, 0)));
        store.push(detection(1, at(17, 0)));
        let ledger = MemoryLedger::new();
        let mut sink = MemoryMismatchSink::new();

        let report = Reconciler::default()
            .run(&whole_day(), &store, &ledger, &mut sink)
            .unwrap();
        let order: Vec<_> = report
            .mismatches
            .iter()
            .map(|m| (m.detected_at, m.identity.0))
            .collect();
        assert_eq!(
            order,
            vec![(at(17, 0), 1), (at(17, 0), 3), (at(12, 0), 1), (at(8, 0), 2)]
        );
    }

    #[test]
    fn test_rerun_replaces_previous_output() {
        let store = MemoryEventLog::new();
        store.push(detection(5, at(9, 0)));
        store.push(detection(6, at(10, 0)));
        let ledger = MemoryLedger::new();
        let mut sink = MemoryMismatchSink::new();
        let reconciler = Reconciler::default();

        let first = reconciler.run(&whole_day(), &store, &ledger, &mut sink).unwrap();
        let second = reconciler.run(&whole_day(), &store, &ledger, &mut sink).unwrap();

        assert_eq!(first.mismatches, second.mismatches);
        assert_ne!(first.run_id, second.run_id);
        assert_eq!(sink.run_id, Some(second.run_id));
        assert_eq!(sink.records.len(), 2);
        assert_eq!(sink.writes, 2);
    }

    #[test]
    fn test_identity_filter_and_range() {
        let store = MemoryEventLog::new();
        store.push(detection(5, at(9, 0)));
        store.push(detection(6, at(9, 0)));
        store.push(detection(5, at(20, 0)));
        let ledger = MemoryLedger::new();
        let mut sink = MemoryMismatchSink::new();

        let request = ReconcileRequest {
            from: at(8, 0),
            to: at(12, 0),
            identities: Some([IdentityId(5)].into_iter().collect()),
        };
        let report = Reconciler::default()
            .run(&request, &store, &ledger, &mut sink)
            .unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.mismatches[0].detected_at, at(9, 0));
    }

    #[test]
    fn test_one_ledger_query_per_event() {
        let store = MemoryEventLog::new();
        for h in 8..12 {
            store.push(detection(5, at(h, 0)));
        }
        let ledger = MemoryLedger::new();
        let mut sink = MemoryMismatchSink::new();

        Reconciler::default()
            .run(&whole_day(), &store, &ledger, &mut sink)
            .unwrap();
        assert_eq!(ledger.queries(), 4);
    }

    #[test]
    fn test_ledger_failure_keeps_previous_report() {
        let store = MemoryEventLog::new();
        store.push(detection(5, at(9, 0)));
        let ledger = MemoryLedger::new();
        let mut sink = MemoryMismatchSink::new();
        let reconciler = Reconciler::default();
        let first = reconciler.run(&whole_day(), &store, &ledger, &mut sink).unwrap();

        ledger.set_offline(true);
        let err = reconciler
            .run(&whole_day(), &store, &ledger, &mut sink)
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Service(ref e) if e.is_connectivity()));
        assert_eq!(sink.run_id, Some(first.run_id));
        assert_eq!(sink.records.len(), 1);
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let mut sink = MemoryMismatchSink::new();
        let request = ReconcileRequest {
            from: at(12, 0),
            to: at(8, 0),
            identities: None,
        };
        let err = Reconciler::default()
            .run(&request, &MemoryEventLog::new(), &MemoryLedger::new(), &mut sink)
            .unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidRange { .. }));
        assert_eq!(sink.writes, 0);
    }

    #[test]
    fn test_window_past_calendar_range_is_an_error() {
        let store = MemoryEventLog::new();
        store.push(detection(5, at(9, 0)));
        let mut sink = MemoryMismatchSink::new();
        let window = TimeDelta::try_minutes(200_000_000_000).unwrap();

        let err = Reconciler::new(window)
            .run(&whole_day(), &store, &MemoryLedger::new(), &mut sink)
            .unwrap_err();
        assert!(matches!(err, ReconcileError::WindowOverflow { .. }));
        assert_eq!(sink.writes, 0);
    }

    #[test]
    fn test_empty_range_clears_previous_report() {
        let store = MemoryEventLog::new();
        store.push(detection(5, at(9, 0)));
        let ledger = MemoryLedger::new();
        let mut sink = MemoryMismatchSink::new();
        let reconciler = Reconciler::default();
        reconciler.run(&whole_day(), &store, &ledger, &mut sink).unwrap();

        let quiet = ReconcileRequest {
            from: at(22, 0),
            to: at(23, 0),
            identities: None,
        };
        reconciler.run(&quiet, &store, &ledger, &mut sink).unwrap();
        assert!(sink.records.is_empty());
    }
}
