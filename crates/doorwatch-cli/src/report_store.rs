//! Local SQLite store holding the latest mismatch report.

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use doorwatch_core::ports::ServiceError;
use doorwatch_core::{IdentityId, MismatchRecord, MismatchSink};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use uuid::Uuid;

const SERVICE: &str = "report store";

pub struct ReportStore {
    conn: Connection,
}

/// The stored report as read back.
#[derive(Debug)]
pub struct StoredReport {
    /// Latest run and when it was stored; `None` before the first run.
    pub run: Option<(Uuid, DateTime<Utc>)>,
    /// Newest first.
    pub lines: Vec<MismatchRecord>,
}

impl ReportStore {
    /// Open (creating if needed) the store at `path`.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open report store {}", path.display()))?;
        Self::create_tables(&conn).context("failed to create report tables")?;
        Ok(Self { conn })
    }

    fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS mismatch_lines (
                id INTEGER PRIMARY KEY,
                run_id TEXT NOT NULL,
                employee_id INTEGER NOT NULL,
                employee_name TEXT,
                detected_at TEXT NOT NULL,
                confidence REAL NOT NULL,
                camera_name TEXT NOT NULL,
                snapshot BLOB,
                remark TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_mismatch_lines_detected
                ON mismatch_lines (detected_at DESC);
            CREATE TABLE IF NOT EXISTS report_run (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                run_id TEXT NOT NULL,
                stored_at TEXT NOT NULL
            );",
        )
    }

    pub fn load(&self) -> rusqlite::Result<StoredReport> {
        let run = self
            .conn
            .query_row("SELECT run_id, stored_at FROM report_run WHERE id = 1", [], |row| {
                let run_id: String = row.get(0)?;
                let stored_at: String = row.get(1)?;
                Ok((
                    Uuid::parse_str(&run_id).map_err(|e| conversion(0, e))?,
                    parse_time(1, &stored_at)?,
                ))
            })
            .optional()?;

        let mut stmt = self.conn.prepare(
            "SELECT employee_id, employee_name, detected_at, confidence,
                    camera_name, snapshot, remark
             FROM mismatch_lines
             ORDER BY detected_at DESC, employee_id ASC, camera_name ASC",
        )?;
        let lines = stmt
            .query_map([], |row| {
                let detected_at: String = row.get(2)?;
                Ok(MismatchRecord {
                    identity: IdentityId(row.get(0)?),
                    identity_name: row.get(1)?,
                    detected_at: parse_time(2, &detected_at)?,
                    confidence: row.get::<_, f64>(3)? as f32,
                    camera: row.get(4)?,
                    snapshot: row.get(5)?,
                    remark: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(StoredReport { run, lines })
    }

    fn write_run(&mut self, run_id: Uuid, records: &[MismatchRecord]) -> rusqlite::Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM mismatch_lines", [])?;
        tx.execute(
            "INSERT OR REPLACE INTO report_run (id, run_id, stored_at) VALUES (1, ?1, ?2)",
            params![run_id.to_string(), format_time(Utc::now())],
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO mismatch_lines
                 (run_id, employee_id, employee_name, detected_at,
                  confidence, camera_name, snapshot, remark)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            let run = run_id.to_string();
            for r in records {
                insert.execute(params![
                    run,
                    r.identity.0,
                    r.identity_name,
                    format_time(r.detected_at),
                    f64::from(r.confidence),
                    r.camera,
                    r.snapshot,
                    r.remark,
                ])?;
            }
        }
        tx.commit()
    }
}

/// Fixed-width UTC text, so string order is time order.
fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(column: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion(column, e))
}

fn conversion<E>(column: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e))
}

impl MismatchSink for ReportStore {
    fn replace_all(
        &mut self,
        run_id: Uuid,
        records: &[MismatchRecord],
    ) -> Result<(), ServiceError> {
        self.write_run(run_id, records).map_err(|e| ServiceError::Rejected {
            service: SERVICE,
            message: e.to_string(),
        })?;
        tracing::debug!(%run_id, lines = records.len(), "mismatch report stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use doorwatch_core::types::MISMATCH_REMARK;
    use tempfile::TempDir;

    fn line(id: i64, hour: u32, camera: &str) -> MismatchRecord {
        MismatchRecord {
            identity: IdentityId(id),
            identity_name: Some(format!("emp{id}")),
            detected_at: Utc.with_ymd_and_hms(2026, 3, 2, hour, 0, 0).unwrap(),
            confidence: 0.75,
            camera: camera.into(),
            snapshot: Some(vec![0xFF, 0xD8, 0x00]),
            remark: MISMATCH_REMARK.into(),
        }
    }

    #[test]
    fn test_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = ReportStore::open(&dir.path().join("nested/report.db")).unwrap();
        let report = store.load().unwrap();
        assert!(report.run.is_none());
        assert!(report.lines.is_empty());
    }

    #[test]
    fn test_replace_all_keeps_only_latest_run() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.db");
        let mut store = ReportStore::open(&path).unwrap();

        let first = Uuid::new_v4();
        store.replace_all(first, &[line(1, 8, "A"), line(2, 9, "A")]).unwrap();
        let second = Uuid::new_v4();
        store.replace_all(second, &[line(3, 10, "B")]).unwrap();

        // Reopen to make sure it was committed.
        drop(store);
        let report = ReportStore::open(&path).unwrap().load().unwrap();
        assert_eq!(report.run.map(|(id, _)| id), Some(second));
        assert_eq!(report.lines, vec![line(3, 10, "B")]);
    }

    #[test]
    fn test_lines_read_back_newest_first() {
        let dir = TempDir::new().unwrap();
        let mut store = ReportStore::open(&dir.path().join("report.db")).unwrap();
        store
            .replace_all(
                Uuid::new_v4(),
                &[line(2, 9, "B"), line(1, 7, "A"), line(1, 9, "A"), line(2, 9, "A")],
            )
            .unwrap();
        let order: Vec<(i64, u32, String)> = store
            .load()
            .unwrap()
            .lines
            .iter()
            .map(|l| (l.identity.0, chrono::Timelike::hour(&l.detected_at), l.camera.clone()))
            .collect();
        assert_eq!(
            order,
            vec![
                (1, 9, "A".to_string()),
                (2, 9, "A".to_string()),
                (2, 9, "B".to_string()),
                (1, 7, "A".to_string()),
            ]
        );
    }

    #[test]
    fn test_empty_run_clears_report() {
        let dir = TempDir::new().unwrap();
        let mut store = ReportStore::open(&dir.path().join("report.db")).unwrap();
        store.replace_all(Uuid::new_v4(), &[line(1, 8, "A")]).unwrap();
        let empty_run = Uuid::new_v4();
        store.replace_all(empty_run, &[]).unwrap();
        let report = store.load().unwrap();
        assert!(report.lines.is_empty());
        assert_eq!(report.run.map(|(id, _)| id), Some(empty_run));
    }
}
