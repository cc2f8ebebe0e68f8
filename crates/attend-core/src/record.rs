//! Persisted record types: enrolled users and attendance rows.

use crate::types::Embedding;
use chrono::{DateTime, Local, NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Date format used in the ledger's `date` column.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Time-of-day format used in the ledger's `time` column.
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// An enrolled user. Only ever constructed with a complete embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    /// Argon2 PHC string; never the plaintext password.
    pub password_hash: String,
    pub domain: String,
    pub embedding: Embedding,
    pub created_at: DateTime<Local>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(AttendanceStatus::Present),
            other => Err(format!("unknown attendance status: {other}")),
        }
    }
}

/// One ledger row, written after a recognized verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub id: String,
    pub domain: String,
    pub status: AttendanceStatus,
}

impl AttendanceRecord {
    /// A `present` row stamped with the given local time, truncated to whole seconds.
    pub fn present_at(now: DateTime<Local>, id: &str, domain: &str) -> Self {
        let naive = now.naive_local();
        let time = naive.time().with_nanosecond(0).unwrap_or_else(|| naive.time());
        Self {
            date: naive.date(),
            time,
            id: id.to_string(),
            domain: domain.to_string(),
            status: AttendanceStatus::Present,
        }
    }

    pub fn date_string(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }

    pub fn time_string(&self) -> String {
        self.time.format(TIME_FORMAT).to_string()
    }
}

/// Whether the ledger accepts more than one row per (date, id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LedgerPolicy {
    /// Every recognized login produces a row.
    #[default]
    AllowDuplicates,
    /// Only the first recognized login of the day produces a row.
    OnePerDay,
}

impl FromStr for LedgerPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "allow-duplicates" => Ok(LedgerPolicy::AllowDuplicates),
            "one-per-day" => Ok(LedgerPolicy::OnePerDay),
            other => Err(format!("unknown ledger policy: {other}")),
        }
    }
}
