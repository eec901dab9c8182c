//! Attendance ledger: a flat `Name,Timestamp` CSV table, deduplicated per
//! person per calendar day.
//!
//! The whole table is read and rewritten on every change. Rewrites go through
//! a sibling temp file and a rename.

use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Timestamp format stored in the `Timestamp` column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("invalid month {0:?}: expected YYYY-MM")]
    InvalidMonth(String),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed attendance table: {0}")]
    Csv(#[from] csv::Error),
}

/// One check-in: the first recognition of `name` on a given day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(rename = "Name")]
    pub name: String,
    /// `YYYY-MM-DD HH:MM:SS`, local time.
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
}

impl AttendanceRecord {
    pub fn new(name: impl Into<String>, at: NaiveDateTime) -> Self {
        Self {
            name: name.into(),
            timestamp: at.format(TIMESTAMP_FORMAT).to_string(),
        }
    }
}

/// A validated `YYYY-MM` month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Month {
    first_day: NaiveDate,
}

impl Month {
    pub fn parse(s: &str) -> Result<Self, LedgerError> {
        let invalid = || LedgerError::InvalidMonth(s.to_string());
        // Reject forms chrono would otherwise accept, like "2024-5".
        if s.len() != 7 || s.as_bytes()[4] != b'-' {
            return Err(invalid());
        }
        let first_day =
            NaiveDate::parse_from_str(&format!("{s}-01"), DATE_FORMAT).map_err(|_| invalid())?;
        Ok(Self { first_day })
    }

    /// Prefix shared by every timestamp in this month, e.g. `"2024-05-"`.
    fn timestamp_prefix(&self) -> String {
        self.first_day.format("%Y-%m-").to_string()
    }
}

impl std::fmt::Display for Month {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.first_day.format("%Y-%m"))
    }
}

/// One month of records, ready to hand out as `attendance_<YYYY-MM>.csv`.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthExport {
    pub month: Month,
    pub records: Vec<AttendanceRecord>,
}

impl MonthExport {
    pub fn file_name(&self) -> String {
        format!("attendance_{}.csv", self.month)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Render as CSV. The header row is present even with no records.
    pub fn to_csv(&self) -> Result<String, LedgerError> {
        let mut buf = Vec::new();
        write_table(&mut buf, &self.records)?;
        // csv only ever writes what we serialized, which is valid UTF-8.
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// CSV-backed, append-only attendance log.
pub struct AttendanceLedger {
    path: PathBuf,
}

impl AttendanceLedger {
    /// Open the ledger at `path`, creating an empty table if none exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let ledger = Self::at(path);
        ledger.ensure_table()?;
        Ok(ledger)
    }

    /// Handle on a ledger without touching the filesystem.
    ///
    /// Reads of a missing table yield no records.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Create an empty `Name,Timestamp` table if none exists yet.
    /// Returns `true` if the table was created.
    pub fn ensure_table(&self) -> Result<bool, LedgerError> {
        if self.path.exists() {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        self.persist(&[])?;
        tracing::info!(path = %self.path.display(), "created attendance table");
        Ok(true)
    }

    /// Record a check-in for `name` now. Returns `false` if `name` already
    /// checked in today.
    pub fn record(&self, name: &str) -> Result<bool, LedgerError> {
        self.record_at(name, Local::now().naive_local())
    }

    /// Record a check-in for `name` at `when`, unless one exists for that day.
    pub fn record_at(&self, name: &str, when: NaiveDateTime) -> Result<bool, LedgerError> {
        let mut records = self.records()?;
        let day = when.format(DATE_FORMAT).to_string();

        if records
            .iter()
            .any(|r| r.name == name && r.timestamp.starts_with(&day))
        {
            tracing::debug!(name, day = %day, "already checked in today");
            return Ok(false);
        }

        self.ensure_table()?;
        let record = AttendanceRecord::new(name, when);
        tracing::info!(name, timestamp = %record.timestamp, "attendance recorded");
        records.push(record);
        self.persist(&records)?;
        Ok(true)
    }

    /// All records, in stored order. A missing table has no records.
    pub fn records(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_err(e)),
        };

        let mut reader = csv::Reader::from_reader(file);
        let records = reader
            .deserialize()
            .collect::<Result<Vec<AttendanceRecord>, _>>()?;
        Ok(records)
    }

    /// Records whose timestamp falls in `year_month` (`YYYY-MM`), in stored order.
    pub fn query_month(&self, year_month: &str) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let month = Month::parse(year_month)?;
        self.records_in(month)
    }

    /// [`query_month`](Self::query_month) packaged for download.
    pub fn export_month(&self, year_month: &str) -> Result<MonthExport, LedgerError> {
        let month = Month::parse(year_month)?;
        Ok(MonthExport {
            month,
            records: self.records_in(month)?,
        })
    }

    fn records_in(&self, month: Month) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let prefix = month.timestamp_prefix();
        Ok(self
            .records()?
            .into_iter()
            .filter(|r| r.timestamp.starts_with(&prefix))
            .collect())
    }

    fn persist(&self, records: &[AttendanceRecord]) -> Result<(), LedgerError> {
        let mut tmp_name = self.path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = self.path.with_file_name(tmp_name);

        let file = std::fs::File::create(&tmp).map_err(|e| self.io_err(e))?;
        write_table(file, records)?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;
        Ok(())
    }

    fn io_err(&self, source: std::io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Write `records` with a `Name,Timestamp` header, even when empty.
fn write_table<W: std::io::Write>(out: W, records: &[AttendanceRecord]) -> Result<(), LedgerError> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(out);
    writer.write_record(["Name", "Timestamp"])?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush().map_err(csv::Error::from)?;
    Ok(())
}
