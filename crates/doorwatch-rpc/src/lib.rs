//! doorwatch-rpc — Network adapters for the doorwatch ports.
//!
//! [`OdooClient`] speaks session-authenticated JSON-RPC to the attendance
//! server (directory, event log, ledger). [`HttpFaceEncoder`] talks to the
//! face localizer/encoder sidecar. Both use a blocking HTTP client.

pub mod contracts;
pub mod encoder;
pub mod odoo;

pub use contracts::CONTRACT_VERSION;
pub use encoder::HttpFaceEncoder;
pub use odoo::OdooClient;
