//! In-memory collaborators.
//!
//! Used by tests and by dry runs that must not touch persistent state.

use crate::ports::{
    AttendanceLedger, DetectionStore, DirectoryEntry, EncodingUpsert, EventLog, IdentityDirectory,
    MismatchSink, ServiceError, SubmitReceipt,
};
use crate::types::{AttendanceRecord, DetectionEvent, IdentityId, MismatchRecord};
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn offline(service: &'static str) -> ServiceError {
    ServiceError::Connectivity {
        service,
        message: "offline".into(),
    }
}

#[derive(Debug, Clone)]
struct DirectoryRow {
    id: IdentityId,
    name: String,
    encoding: Option<String>,
    image: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct DirectoryState {
    rows: Vec<DirectoryRow>,
    offline: bool,
    register_calls: usize,
}

/// Directory holding identities in a vector (duplicates allowed, as a broken server might send).
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    state: Mutex<DirectoryState>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identity without an encoding.
    pub fn add_identity(&self, id: IdentityId, name: &str) {
        self.insert_raw(id, name, None);
    }

    /// Add a row with an arbitrary serialized encoding.
    pub fn insert_raw(&self, id: IdentityId, name: &str, encoding: Option<&str>) {
        lock(&self.state).rows.push(DirectoryRow {
            id,
            name: name.to_string(),
            encoding: encoding.map(str::to_string),
            image: None,
        });
    }

    pub fn set_offline(&self, offline: bool) {
        lock(&self.state).offline = offline;
    }

    pub fn register_calls(&self) -> usize {
        lock(&self.state).register_calls
    }

    /// Reference image stored for `id` by the last registration.
    pub fn image(&self, id: IdentityId) -> Option<Vec<u8>> {
        lock(&self.state)
            .rows
            .iter()
            .find(|r| r.id == id)
            .and_then(|r| r.image.clone())
    }
}

impl IdentityDirectory for MemoryDirectory {
    fn fetch_known_identities(&self) -> Result<Vec<DirectoryEntry>, ServiceError> {
        let state = lock(&self.state);
        if state.offline {
            return Err(offline("directory"));
        }
        Ok(state
            .rows
            .iter()
            .filter(|r| r.encoding.is_some())
            .map(|r| DirectoryEntry {
                id: r.id,
                name: r.name.clone(),
                encoding: r.encoding.clone(),
            })
            .collect())
    }

    fn register(&self, upsert: &EncodingUpsert) -> Result<String, ServiceError> {
        let mut state = lock(&self.state);
        state.register_calls += 1;
        if state.offline {
            return Err(offline("directory"));
        }
        let row = state
            .rows
            .iter_mut()
            .find(|r| r.id == upsert.identity)
            .ok_or_else(|| ServiceError::Rejected {
                service: "directory",
                message: "Employee not found".into(),
            })?;
        row.encoding = Some(upsert.encoding.clone());
        if upsert.image.is_some() {
            row.image = upsert.image.clone();
        }
        Ok(row.name.clone())
    }
}

#[derive(Debug, Default)]
struct EventLogState {
    events: Vec<DetectionEvent>,
    fail_next: usize,
    offline: bool,
    next_id: i64,
}

/// Event log that keeps accepted events; also serves them back as a [`DetectionStore`].
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    state: Mutex<EventLogState>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` submissions with a connectivity error.
    pub fn fail_next(&self, n: usize) {
        lock(&self.state).fail_next = n;
    }

    pub fn set_offline(&self, offline: bool) {
        lock(&self.state).offline = offline;
    }

    /// Store an event directly, bypassing submission.
    pub fn push(&self, event: DetectionEvent) {
        lock(&self.state).events.push(event);
    }

    pub fn events(&self) -> Vec<DetectionEvent> {
        lock(&self.state).events.clone()
    }
}

impl EventLog for MemoryEventLog {
    fn submit(&self, event: &DetectionEvent) -> Result<SubmitReceipt, ServiceError> {
        let mut state = lock(&self.state);
        if state.offline {
            return Err(offline("event log"));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(offline("event log"));
        }
        state.next_id += 1;
        state.events.push(event.clone());
        Ok(SubmitReceipt {
            event_id: state.next_id,
            identity_name: event
                .identity_name
                .clone()
                .unwrap_or_else(|| event.identity.to_string()),
        })
    }
}

impl DetectionStore for MemoryEventLog {
    fn detections_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        identities: Option<&[IdentityId]>,
    ) -> Result<Vec<DetectionEvent>, ServiceError> {
        let state = lock(&self.state);
        if state.offline {
            return Err(offline("event log"));
        }
        Ok(state
            .events
            .iter()
            .filter(|e| e.timestamp >= from && e.timestamp <= to)
            .filter(|e| identities.map_or(true, |ids| ids.contains(&e.identity)))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    records: Vec<AttendanceRecord>,
    offline: bool,
    queries: usize,
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: AttendanceRecord) {
        lock(&self.state).records.push(record);
    }

    pub fn set_offline(&self, offline: bool) {
        lock(&self.state).offline = offline;
    }

    /// Number of `records_near` calls served.
    pub fn queries(&self) -> usize {
        lock(&self.state).queries
    }
}

impl AttendanceLedger for MemoryLedger {
    fn records_near(
        &self,
        identity: IdentityId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AttendanceRecord>, ServiceError> {
        let mut state = lock(&self.state);
        if state.offline {
            return Err(offline("ledger"));
        }
        state.queries += 1;
        Ok(state
            .records
            .iter()
            .filter(|r| r.identity == identity && r.touches(start, end))
            .cloned()
            .collect())
    }
}

/// Mismatch sink that keeps only the latest run in memory.
#[derive(Debug, Default)]
pub struct MemoryMismatchSink {
    pub run_id: Option<Uuid>,
    pub records: Vec<MismatchRecord>,
    pub writes: usize,
}

impl MemoryMismatchSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MismatchSink for MemoryMismatchSink {
    fn replace_all(
        &mut self,
        run_id: Uuid,
        records: &[MismatchRecord],
    ) -> Result<(), ServiceError> {
        self.run_id = Some(run_id);
        self.records = records.to_vec();
        self.writes += 1;
        Ok(())
    }
}
