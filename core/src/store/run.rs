//! Regeneration ledger. Written outside the data transaction so a failed
//! run stays on record after its rollback.

use super::{
    optional_timestamp_column, parsed_column, timestamp, timestamp_column, ForecastStore,
    RunEventEntry, RunRow, RunStatus, RunTotals,
};
use crate::{error::PipelineResult, event::PipelineEvent};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const RUN_COLUMNS: &str = "run_id, anchor, horizon_months, window_start, window_end, engine,
     status, started_at, finished_at, regions, forecasts, graph_points, error";

fn map_run_row(row: &Row<'_>) -> rusqlite::Result<RunRow> {
    Ok(RunRow {
        run_id: row.get(0)?,
        anchor: row.get(1)?,
        horizon_months: row.get(2)?,
        window_start: row.get(3)?,
        window_end: row.get(4)?,
        engine: row.get(5)?,
        status: parsed_column::<RunStatus>(row, 6)?,
        started_at: timestamp_column(row, 7)?,
        finished_at: optional_timestamp_column(row, 8)?,
        regions: row.get(9)?,
        forecasts: row.get(10)?,
        graph_points: row.get(11)?,
        error: row.get(12)?,
    })
}

impl ForecastStore {
    pub fn insert_run(&self, run: &RunRow) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO regeneration_run
             (run_id, anchor, horizon_months, window_start, window_end, engine, status, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.run_id,
                run.anchor,
                run.horizon_months,
                run.window_start,
                run.window_end,
                run.engine,
                run.status.as_str(),
                timestamp(&run.started_at),
            ],
        )?;
        Ok(())
    }

    pub fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        finished_at: DateTime<Utc>,
        totals: Option<RunTotals>,
        error: Option<&str>,
    ) -> PipelineResult<()> {
        self.conn.execute(
            "UPDATE regeneration_run
             SET status = ?2, finished_at = ?3, regions = ?4, forecasts = ?5,
                 graph_points = ?6, error = ?7
             WHERE run_id = ?1",
            params![
                run_id,
                status.as_str(),
                timestamp(&finished_at),
                totals.map(|t| t.regions),
                totals.map(|t| t.forecasts),
                totals.map(|t| t.graph_points),
                error,
            ],
        )?;
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> PipelineResult<Option<RunRow>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM regeneration_run WHERE run_id = ?1"),
                params![run_id],
                map_run_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Runs still marked `running` that started at or after `since`.
    pub fn running_since(&self, since: DateTime<Utc>) -> PipelineResult<Vec<RunRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM regeneration_run
             WHERE status = ?1 AND started_at >= ?2
             ORDER BY started_at DESC"
        ))?;
        let rows = stmt
            .query_map(
                params![RunStatus::Running.as_str(), timestamp(&since)],
                map_run_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_runs(&self) -> PipelineResult<Vec<RunRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM regeneration_run ORDER BY started_at ASC, rowid ASC"
        ))?;
        let rows = stmt
            .query_map([], map_run_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Run events ─────────────────────────────────────────────

    pub fn append_run_event(
        &self,
        run_id: &str,
        event: &PipelineEvent,
        at: DateTime<Utc>,
    ) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO run_event (run_id, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                run_id,
                event.event_type(),
                serde_json::to_string(event)?,
                timestamp(&at),
            ],
        )?;
        Ok(())
    }

    pub fn run_events(&self, run_id: &str) -> PipelineResult<Vec<RunEventEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, event_type, payload, created_at
             FROM run_event WHERE run_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id], |row| {
                Ok(RunEventEntry {
                    id: Some(row.get(0)?),
                    run_id: row.get(1)?,
                    event_type: row.get(2)?,
                    payload: row.get(3)?,
                    created_at: timestamp_column(row, 4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
