//! Wire contracts for the attendance server.
//!
//! Every request and response shape is a concrete type. Replies are
//! validated here, at the boundary, and turned into core types or a
//! [`ServiceError`]; nothing loosely typed leaks past this module.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, Utc};
use doorwatch_core::ports::{DirectoryEntry, ServiceError, SubmitReceipt};
use doorwatch_core::{AttendanceRecord, DetectionEvent, IdentityId};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

/// Version stamped on every request this client sends.
pub const CONTRACT_VERSION: u32 = 1;

/// Server-side datetime format (naive, UTC).
const SERVER_DATETIME: &str = "%Y-%m-%d %H:%M:%S";

pub const DIRECTORY: &str = "directory";
pub const EVENT_LOG: &str = "event log";
pub const LEDGER: &str = "ledger";

// --- JSON-RPC envelope ---

#[derive(Debug, Serialize)]
pub struct RpcRequest<'a, P> {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub id: u64,
    pub params: &'a P,
}

impl<'a, P> RpcRequest<'a, P> {
    pub fn call(id: u64, params: &'a P) -> Self {
        Self {
            jsonrpc: "2.0",
            method: "call",
            id,
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RpcResponse<R> {
    pub result: Option<R>,
    pub error: Option<RpcFault>,
}

#[derive(Debug, Deserialize)]
pub struct RpcFault {
    pub message: String,
    pub data: Option<RpcFaultData>,
}

#[derive(Debug, Deserialize)]
pub struct RpcFaultData {
    pub message: Option<String>,
}

impl RpcFault {
    pub fn describe(&self) -> String {
        match self.data.as_ref().and_then(|d| d.message.as_deref()) {
            Some(detail) => format!("{}: {detail}", self.message),
            None => self.message.clone(),
        }
    }
}

impl<R> RpcResponse<R> {
    pub fn into_result(self, service: &'static str) -> Result<R, ServiceError> {
        if let Some(fault) = self.error {
            return Err(ServiceError::Rejected {
                service,
                message: fault.describe(),
            });
        }
        self.result.ok_or(ServiceError::Protocol {
            service,
            message: "response has neither result nor error".into(),
        })
    }
}

// --- Session ---

#[derive(Debug, Serialize)]
pub struct AuthenticateParams<'a> {
    pub db: &'a str,
    pub login: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct AuthenticateResult {
    #[serde(default, deserialize_with = "falsy")]
    pub uid: Option<i64>,
}

// --- Directory ---

#[derive(Debug, Serialize)]
pub struct FetchIdentitiesParams {
    pub contract_version: u32,
}

#[derive(Debug, Deserialize)]
pub struct IdentityRow {
    pub id: i64,
    pub name: String,
    #[serde(default, deserialize_with = "falsy")]
    pub encoding: Option<String>,
}

impl From<IdentityRow> for DirectoryEntry {
    fn from(row: IdentityRow) -> Self {
        DirectoryEntry {
            id: IdentityId(row.id),
            name: row.name,
            encoding: row.encoding,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RegisterParams {
    pub contract_version: u32,
    pub employee_id: i64,
    /// JSON array text.
    pub encoding: String,
    pub face_image_base64: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterReply {
    pub success: bool,
    pub employee_name: Option<String>,
    pub error: Option<String>,
}

impl RegisterReply {
    pub fn into_result(self) -> Result<String, ServiceError> {
        match (self.success, self.employee_name) {
            (true, Some(name)) => Ok(name),
            (true, None) => Err(ServiceError::Protocol {
                service: DIRECTORY,
                message: "success without employee_name".into(),
            }),
            (false, _) => Err(ServiceError::Rejected {
                service: DIRECTORY,
                message: self.error.unwrap_or_else(|| "unspecified error".into()),
            }),
        }
    }
}

// --- Event log ---

#[derive(Debug, Serialize)]
pub struct SubmitDetectionParams {
    pub contract_version: u32,
    pub employee_id: i64,
    /// 0–100 scale, one decimal.
    pub confidence: f64,
    pub snapshot_base64: Option<String>,
    pub camera_name: String,
}

impl SubmitDetectionParams {
    pub fn from_event(event: &DetectionEvent) -> Self {
        Self {
            contract_version: CONTRACT_VERSION,
            employee_id: event.identity.0,
            confidence: to_percent(event.confidence),
            snapshot_base64: event.snapshot.as_ref().map(|s| BASE64.encode(s)),
            camera_name: event.camera.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitDetectionReply {
    pub success: bool,
    #[serde(alias = "id")]
    pub event_id: Option<i64>,
    pub employee_name: Option<String>,
    pub error: Option<String>,
}

impl SubmitDetectionReply {
    pub fn into_receipt(self) -> Result<SubmitReceipt, ServiceError> {
        if !self.success {
            return Err(ServiceError::Rejected {
                service: EVENT_LOG,
                message: self.error.unwrap_or_else(|| "unspecified error".into()),
            });
        }
        let event_id = self.event_id.ok_or(ServiceError::Protocol {
            service: EVENT_LOG,
            message: "success without event id".into(),
        })?;
        Ok(SubmitReceipt {
            event_id,
            identity_name: self.employee_name.unwrap_or_default(),
        })
    }
}

/// [0, 1] → 0–100 rounded to one decimal.
pub fn to_percent(confidence: f32) -> f64 {
    (f64::from(confidence) * 1000.0).round() / 10.0
}

// --- Generic model reads (detections, attendance) ---

#[derive(Debug, Serialize)]
pub struct SearchReadParams<'a> {
    pub model: &'a str,
    pub method: &'static str,
    pub args: Vec<Value>,
    pub kwargs: Value,
}

impl<'a> SearchReadParams<'a> {
    pub fn new(
        model: &'a str,
        domain: Value,
        fields: &[&str],
        order: &str,
        limit: Option<u32>,
    ) -> Self {
        let mut kwargs = json!({
            "fields": fields,
            "order": order,
            "context": { "contract_version": CONTRACT_VERSION },
        });
        if let Some(limit) = limit {
            kwargs["limit"] = json!(limit);
        }
        Self {
            model,
            method: "search_read",
            args: vec![domain],
            kwargs,
        }
    }
}

pub const DETECTION_MODEL: &str = "face.attendance.log";
pub const DETECTION_FIELDS: &[&str] = &[
    "employee_id",
    "detection_time",
    "confidence",
    "camera_name",
    "snapshot",
];

pub const ATTENDANCE_MODEL: &str = "hr.attendance";
pub const ATTENDANCE_FIELDS: &[&str] = &["employee_id", "check_in", "check_out"];

/// Detections with `from <= detection_time <= to`, optionally for some identities only.
pub fn detection_domain(
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    identities: Option<&[IdentityId]>,
) -> Value {
    let mut domain = vec![
        json!(["detection_time", ">=", format_datetime(from)]),
        json!(["detection_time", "<=", format_datetime(to)]),
    ];
    if let Some(ids) = identities {
        let ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
        domain.push(json!(["employee_id", "in", ids]));
    }
    Value::Array(domain)
}

/// Attendance of `identity` with check-in or check-out inside `[start, end]` (prefix notation).
pub fn attendance_domain(identity: IdentityId, start: DateTime<Utc>, end: DateTime<Utc>) -> Value {
    let (start, end) = (format_datetime(start), format_datetime(end));
    json!([
        "&",
        ["employee_id", "=", identity.0],
        "|",
        "&", ["check_in", ">=", start], ["check_in", "<=", end],
        "&", ["check_out", ">=", start], ["check_out", "<=", end]
    ])
}

#[derive(Debug, Deserialize)]
pub struct DetectionRow {
    /// `[id, display_name]`.
    pub employee_id: (i64, String),
    pub detection_time: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, deserialize_with = "falsy")]
    pub camera_name: Option<String>,
    #[serde(default, deserialize_with = "falsy")]
    pub snapshot: Option<String>,
}

impl DetectionRow {
    pub fn into_event(self) -> Result<DetectionEvent, ServiceError> {
        let timestamp = parse_datetime(&self.detection_time, EVENT_LOG)?;
        let snapshot = match self.snapshot {
            Some(b64) => Some(BASE64.decode(b64.trim()).map_err(|e| ServiceError::Protocol {
                service: EVENT_LOG,
                message: format!("snapshot is not base64: {e}"),
            })?),
            None => None,
        };
        Ok(DetectionEvent {
            identity: IdentityId(self.employee_id.0),
            identity_name: Some(self.employee_id.1),
            timestamp,
            confidence: (self.confidence / 100.0) as f32,
            camera: self.camera_name.unwrap_or_default(),
            snapshot,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct AttendanceRow {
    pub employee_id: (i64, String),
    #[serde(default, deserialize_with = "falsy")]
    pub check_in: Option<String>,
    #[serde(default, deserialize_with = "falsy")]
    pub check_out: Option<String>,
}

impl AttendanceRow {
    pub fn into_record(self) -> Result<AttendanceRecord, ServiceError> {
        let parse = |s: Option<String>| s.map(|s| parse_datetime(&s, LEDGER)).transpose();
        Ok(AttendanceRecord {
            identity: IdentityId(self.employee_id.0),
            check_in: parse(self.check_in)?,
            check_out: parse(self.check_out)?,
        })
    }
}

pub fn format_datetime(t: DateTime<Utc>) -> String {
    t.format(SERVER_DATETIME).to_string()
}

pub fn parse_datetime(s: &str, service: &'static str) -> Result<DateTime<Utc>, ServiceError> {
    NaiveDateTime::parse_from_str(s.trim(), SERVER_DATETIME)
        .map(|naive| naive.and_utc())
        .map_err(|e| ServiceError::Protocol {
            service,
            message: format!("bad datetime {s:?}: {e}"),
        })
}

/// The server encodes "no value" as `false`; treat it (and null) as `None`.
fn falsy<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Value::deserialize(deserializer)? {
        Value::Null | Value::Bool(false) => Ok(None),
        other => serde_json::from_value(other).map(Some).map_err(D::Error::custom),
    }
}
