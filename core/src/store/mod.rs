//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Components call store methods; they never execute SQL directly.
//!
//! Writes that must land atomically go through a `StoreTx`, which rolls
//! back when dropped without `commit()`.

use crate::{error::PipelineResult, types::RunId};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{types::Type, Connection, Row, Transaction};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

mod forecast;
mod graph;
mod incident;
mod region;
mod run;

pub struct ForecastStore {
    conn: Connection,
}

impl ForecastStore {
    /// Open or create a database file in WAL mode.
    pub fn open(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> PipelineResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> PipelineResult<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> PipelineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        Ok(())
    }

    /// Start a write transaction. Dropping the returned handle without
    /// calling `commit()` rolls everything back.
    pub fn begin(&self) -> PipelineResult<StoreTx<'_>> {
        let tx = self.conn.unchecked_transaction()?;
        Ok(StoreTx { tx })
    }
}

/// An open write transaction on the store.
pub struct StoreTx<'a> {
    tx: Transaction<'a>,
}

impl StoreTx<'_> {
    pub fn commit(self) -> PipelineResult<()> {
        self.tx.commit()?;
        Ok(())
    }
}

// ── Row types ──────────────────────────────────────────────────

/// A quarantined region spelling awaiting manual review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownRegionRow {
    pub raw_name: String,
    pub occurrences: u32,
    pub first_seen_run: RunId,
    pub last_seen_run: RunId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running   => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed    => "failed",
        }
    }
}

impl FromStr for RunStatus {
    type Err = crate::error::PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running"   => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed"    => Ok(RunStatus::Failed),
            other => Err(anyhow::anyhow!("unknown run status '{other}'").into()),
        }
    }
}

/// One row of the regeneration ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRow {
    pub run_id: RunId,
    pub anchor: String,
    pub horizon_months: u32,
    pub window_start: String,
    pub window_end: String,
    pub engine: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub regions: Option<u32>,
    pub forecasts: Option<u32>,
    pub graph_points: Option<u32>,
    pub error: Option<String>,
}

/// Counts recorded when a run finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTotals {
    pub regions: u32,
    pub forecasts: u32,
    pub graph_points: u32,
}

/// The run ledger entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEventEntry {
    pub id: Option<i64>,
    pub run_id: RunId,
    pub event_type: String,
    pub payload: String, // JSON-serialized PipelineEvent
    pub created_at: DateTime<Utc>,
}

/// What the forecast table currently holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationStatus {
    pub total_forecasts: u32,
    pub latest_generated_at: Option<DateTime<Utc>>,
    pub months_covered: u32,
    pub regions_covered: u32,
    pub first_period: Option<String>,
    pub last_period: Option<String>,
}

// ── Column helpers ─────────────────────────────────────────────

pub(crate) fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn optional_timestamp_column(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|at| at.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

/// Read a TEXT column through the type's `FromStr`.
pub(crate) fn parsed_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
