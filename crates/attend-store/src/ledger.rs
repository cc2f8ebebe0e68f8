//! SQLite-backed attendance ledger.
//!
//! Schema is fixed: date, time, id, domain, status. `seq` only preserves
//! insertion order. There is no foreign key to the credential store.

use crate::{ensure_parent_dir, AppendOutcome, AttendanceLedger, StoreError, StoreResult};
use attend_core::record::{DATE_FORMAT, TIME_FORMAT};
use attend_core::{AttendanceRecord, AttendanceStatus, LedgerPolicy};
use chrono::{NaiveDate, NaiveTime};
use rusqlite::params;
use std::path::Path;
use std::time::Duration;
use tokio_rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS attendance (
    seq    INTEGER PRIMARY KEY AUTOINCREMENT,
    date   TEXT NOT NULL,
    time   TEXT NOT NULL,
    id     TEXT NOT NULL,
    domain TEXT NOT NULL,
    status TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS attendance_date_id ON attendance (date, id);
";

type LedgerRow = (String, String, String, String, String);

const SELECT_ROWS: &str = "SELECT date, time, id, domain, status FROM attendance";

#[derive(Clone)]
pub struct SqliteLedger {
    conn: Connection,
}

impl SqliteLedger {
    /// Open (creating if needed) the ledger at `path`.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        ensure_parent_dir(path)?;
        let conn = Connection::open(path).await?;
        conn.call(|c| {
            c.busy_timeout(Duration::from_secs(5))?;
            let _mode: String = c.query_row("PRAGMA journal_mode=WAL", [], |r| r.get(0))?;
            Ok(())
        })
        .await?;
        tracing::debug!(path = %path.display(), "attendance ledger opened");
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> StoreResult<Self> {
        conn.call(|c| {
            c.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    async fn select(&self, date: Option<String>) -> StoreResult<Vec<AttendanceRecord>> {
        let rows = self
            .conn
            .call(move |c| {
                let read = |r: &rusqlite::Row<'_>| -> rusqlite::Result<LedgerRow> {
                    Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
                };
                let rows = match date {
                    Some(date) => {
                        let mut stmt =
                            c.prepare(&format!("{SELECT_ROWS} WHERE date = ?1 ORDER BY seq"))?;
                        let rows = stmt
                            .query_map(params![date], read)?
                            .collect::<rusqlite::Result<Vec<_>>>()?;
                        rows
                    }
                    None => {
                        let mut stmt = c.prepare(&format!("{SELECT_ROWS} ORDER BY seq"))?;
                        let rows = stmt
                            .query_map([], read)?
                            .collect::<rusqlite::Result<Vec<_>>>()?;
                        rows
                    }
                };
                Ok(rows)
            })
            .await?;

        rows.into_iter().map(decode).collect()
    }
}

fn decode(row: LedgerRow) -> StoreResult<AttendanceRecord> {
    let (date, time, id, domain, status) = row;
    let corrupt = |reason: String| StoreError::Corrupt {
        key: format!("{date} {id}"),
        reason,
    };

    let parsed_date = NaiveDate::parse_from_str(&date, DATE_FORMAT)
        .map_err(|e| corrupt(format!("date: {e}")))?;
    let parsed_time = NaiveTime::parse_from_str(&time, TIME_FORMAT)
        .map_err(|e| corrupt(format!("time: {e}")))?;
    let status = status.parse::<AttendanceStatus>().map_err(corrupt)?;

    Ok(AttendanceRecord {
        date: parsed_date,
        time: parsed_time,
        id,
        domain,
        status,
    })
}

impl AttendanceLedger for SqliteLedger {
    async fn append(
        &self,
        record: &AttendanceRecord,
        policy: LedgerPolicy,
    ) -> StoreResult<AppendOutcome> {
        let date = record.date_string();
        let time = record.time_string();
        let id = record.id.clone();
        let domain = record.domain.clone();
        let status = record.status.as_str();

        let outcome = self
            .conn
            .call(move |c| {
                let tx = c.transaction()?;
                if policy == LedgerPolicy::OnePerDay {
                    let seen: bool = tx.query_row(
                        "SELECT EXISTS(SELECT 1 FROM attendance WHERE date = ?1 AND id = ?2)",
                        params![date, id],
                        |r| r.get(0),
                    )?;
                    if seen {
                        return Ok(AppendOutcome::AlreadyRecorded);
                    }
                }
                tx.execute(
                    "INSERT INTO attendance (date, time, id, domain, status)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![date, time, id, domain, status],
                )?;
                tx.commit()?;
                Ok(AppendOutcome::Appended)
            })
            .await?;

        tracing::debug!(id = %record.id, date = %record.date, ?outcome, "ledger append");
        Ok(outcome)
    }

    async fn rows(&self) -> StoreResult<Vec<AttendanceRecord>> {
        self.select(None).await
    }

    async fn rows_on(&self, date: NaiveDate) -> StoreResult<Vec<AttendanceRecord>> {
        self.select(Some(date.format(DATE_FORMAT).to_string())).await
    }
}
