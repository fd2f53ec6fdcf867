//! Session-authenticated JSON-RPC client for the attendance server.
//!
//! One [`OdooClient`] backs the identity directory, the event log and the
//! attendance ledger. It is blocking: create and use it off the async runtime.

use crate::contracts::{
    self, AttendanceRow, AuthenticateParams, AuthenticateResult, DetectionRow,
    FetchIdentitiesParams, IdentityRow, RegisterParams, RegisterReply, RpcRequest, RpcResponse,
    SearchReadParams, SubmitDetectionParams, SubmitDetectionReply, CONTRACT_VERSION,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use doorwatch_core::ports::{DirectoryEntry, EncodingUpsert, SubmitReceipt};
use doorwatch_core::{
    AttendanceLedger, AttendanceRecord, DetectionEvent, DetectionStore, EventLog,
    IdentityDirectory, IdentityId, ServerSettings, ServiceError,
};
use reqwest::blocking::Client;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

const SESSION: &str = "session";

/// Upper bound on attendance rows fetched per detection.
const LEDGER_QUERY_LIMIT: u32 = 16;

pub struct OdooClient {
    base_url: String,
    client: Client,
    uid: i64,
    next_id: AtomicU64,
}

impl OdooClient {
    /// Open a session. Fails if the server is unreachable or refuses the credentials.
    pub fn connect(settings: &ServerSettings) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| ServiceError::Connectivity {
                service: SESSION,
                message: format!("failed to build http client: {e}"),
            })?;

        let mut this = Self {
            base_url: settings.url.trim_end_matches('/').to_string(),
            client,
            uid: 0,
            next_id: AtomicU64::new(1),
        };

        let params = AuthenticateParams {
            db: &settings.database,
            login: &settings.username,
            password: settings.password.expose_secret(),
        };
        let result: AuthenticateResult =
            this.call(SESSION, "/web/session/authenticate", &params)?;
        this.uid = result.uid.ok_or(ServiceError::Rejected {
            service: SESSION,
            message: format!("login refused for {}", settings.username),
        })?;

        tracing::info!(
            url = %this.base_url,
            database = %settings.database,
            uid = this.uid,
            "authenticated with attendance server"
        );
        Ok(this)
    }

    /// POST a JSON-RPC `call` envelope to `route` and unwrap its result.
    fn call<P, R>(&self, service: &'static str, route: &str, params: &P) -> Result<R, ServiceError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let url = format!("{}{route}", self.base_url);
        tracing::debug!(service, route, id, "rpc call");

        let response = self
            .client
            .post(&url)
            .json(&RpcRequest::call(id, params))
            .send()
            .map_err(|e| ServiceError::Connectivity {
                service,
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ServiceError::Connectivity {
                service,
                message: format!("HTTP {status} from {route}"),
            });
        }
        if !status.is_success() {
            return Err(ServiceError::Rejected {
                service,
                message: format!("HTTP {status} from {route}"),
            });
        }

        let envelope: RpcResponse<R> = response.json().map_err(|e| ServiceError::Protocol {
            service,
            message: format!("undecodable response from {route}: {e}"),
        })?;
        envelope.into_result(service)
    }

    fn search_read<R: DeserializeOwned>(
        &self,
        service: &'static str,
        params: &SearchReadParams<'_>,
    ) -> Result<Vec<R>, ServiceError> {
        let route = format!("/web/dataset/call_kw/{}/search_read", params.model);
        self.call(service, &route, params)
    }
}

impl IdentityDirectory for OdooClient {
    fn fetch_known_identities(&self) -> Result<Vec<DirectoryEntry>, ServiceError> {
        let rows: Vec<IdentityRow> = self.call(
            contracts::DIRECTORY,
            "/face_attendance/employees",
            &FetchIdentitiesParams {
                contract_version: CONTRACT_VERSION,
            },
        )?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    fn register(&self, upsert: &EncodingUpsert) -> Result<String, ServiceError> {
        let params = RegisterParams {
            contract_version: CONTRACT_VERSION,
            employee_id: upsert.identity.0,
            encoding: upsert.encoding.clone(),
            face_image_base64: upsert.image.as_ref().map(|img| BASE64.encode(img)),
        };
        let reply: RegisterReply =
            self.call(contracts::DIRECTORY, "/face_attendance/register", &params)?;
        reply.into_result()
    }
}

impl EventLog for OdooClient {
    fn submit(&self, event: &DetectionEvent) -> Result<SubmitReceipt, ServiceError> {
        let params = SubmitDetectionParams::from_event(event);
        let reply: SubmitDetectionReply =
            self.call(contracts::EVENT_LOG, "/face_attendance/log", &params)?;
        reply.into_receipt()
    }
}

impl DetectionStore for OdooClient {
    fn detections_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        identities: Option<&[IdentityId]>,
    ) -> Result<Vec<DetectionEvent>, ServiceError> {
        let params = SearchReadParams::new(
            contracts::DETECTION_MODEL,
            contracts::detection_domain(from, to, identities),
            contracts::DETECTION_FIELDS,
            "detection_time desc",
            None,
        );
        let rows: Vec<DetectionRow> = self.search_read(contracts::EVENT_LOG, &params)?;
        rows.into_iter().map(DetectionRow::into_event).collect()
    }
}

impl AttendanceLedger for OdooClient {
    fn records_near(
        &self,
        identity: IdentityId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AttendanceRecord>, ServiceError> {
        let params = SearchReadParams::new(
            contracts::ATTENDANCE_MODEL,
            contracts::attendance_domain(identity, start, end),
            contracts::ATTENDANCE_FIELDS,
            "check_in desc",
            Some(LEDGER_QUERY_LIMIT),
        );
        let rows: Vec<AttendanceRow> = self.search_read(contracts::LEDGER, &params)?;
        rows.into_iter().map(AttendanceRow::into_record).collect()
    }
}
