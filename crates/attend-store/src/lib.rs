//! attend-store — Durable state for the attendance service.
//!
//! Two independent stores, each behind its own trait so the flows never
//! see how data is kept:
//!
//! - [`CredentialStore`]: enrolled users keyed by a unique id.
//! - [`AttendanceLedger`]: append-oriented attendance rows.
//!
//! The SQLite implementations each own one `tokio-rusqlite` connection. All
//! calls on a connection run serially on its worker thread, which gives every
//! store its own write lock, and each mutation is a single transaction.

pub mod credentials;
pub mod ledger;

use attend_core::{AttendanceRecord, LedgerPolicy, UserRecord};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use thiserror::Error;

pub use credentials::SqliteCredentialStore;
pub use ledger::SqliteLedger;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("id already exists: {0}")]
    DuplicateId(String),
    #[error("storage: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    #[error("corrupt stored record {key}: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("cannot prepare storage directory: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Full snapshot of enrolled users.
pub type UserSnapshot = BTreeMap<String, UserRecord>;

/// Enrolled-user persistence.
#[trait_variant::make(CredentialStore: Send)]
pub trait LocalCredentialStore {
    /// Read every enrolled user.
    async fn load(&self) -> StoreResult<UserSnapshot>;

    /// Replace the whole store with `users` in one transaction.
    async fn save(&self, users: &UserSnapshot) -> StoreResult<()>;

    async fn exists(&self, id: &str) -> StoreResult<bool>;

    async fn get(&self, id: &str) -> StoreResult<Option<UserRecord>>;

    /// Insert a new user; fails with [`StoreError::DuplicateId`] if the id is taken.
    async fn create(&self, record: &UserRecord) -> StoreResult<()>;

    async fn count(&self) -> StoreResult<usize>;
}

/// What an append did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// `OnePerDay` policy and a row for (date, id) already existed.
    AlreadyRecorded,
}

/// Attendance row persistence.
#[trait_variant::make(AttendanceLedger: Send)]
pub trait LocalAttendanceLedger {
    async fn append(&self, record: &AttendanceRecord, policy: LedgerPolicy)
        -> StoreResult<AppendOutcome>;

    /// Every row, in insertion order.
    async fn rows(&self) -> StoreResult<Vec<AttendanceRecord>>;

    /// Rows for one calendar date, in insertion order.
    async fn rows_on(&self, date: NaiveDate) -> StoreResult<Vec<AttendanceRecord>>;
}

/// Create the parent directory of a database path if needed.
pub(crate) fn ensure_parent_dir(path: &std::path::Path) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
