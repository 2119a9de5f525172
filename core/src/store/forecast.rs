//! Forecast table queries. Writes that belong to a regeneration run are
//! on `StoreTx`; reads and the maintenance sweep are on `ForecastStore`.

use super::{
    optional_timestamp_column, parsed_column, timestamp, timestamp_column, ForecastStore,
    GenerationStatus, StoreTx,
};
use crate::{
    error::PipelineResult,
    forecast_reconciler::ForecastRecord,
    types::{PeriodMonth, PeriodWindow},
};
use rusqlite::{params, Row};

const FORECAST_COLUMNS: &str = "region, period_month, predicted_value, lower_bound, upper_bound,
     risk_level, risk_flag, model_descriptor, generated_at";

fn map_forecast_row(row: &Row<'_>) -> rusqlite::Result<ForecastRecord> {
    Ok(ForecastRecord {
        region: row.get(0)?,
        period: parsed_column(row, 1)?,
        predicted_value: row.get(2)?,
        lower_bound: row.get(3)?,
        upper_bound: row.get(4)?,
        risk_level: parsed_column(row, 5)?,
        risk_flag: row.get::<_, i32>(6)? != 0,
        model_descriptor: row.get(7)?,
        generated_at: timestamp_column(row, 8)?,
    })
}

impl StoreTx<'_> {
    pub fn delete_forecasts_in_window(&self, window: &PeriodWindow) -> PipelineResult<usize> {
        let n = self.tx.execute(
            "DELETE FROM forecast WHERE period_month BETWEEN ?1 AND ?2",
            params![window.start.to_string(), window.end.to_string()],
        )?;
        Ok(n)
    }

    /// Regions holding at least one row inside the window.
    pub fn forecast_regions_in_window(&self, window: &PeriodWindow) -> PipelineResult<Vec<String>> {
        let mut stmt = self.tx.prepare(
            "SELECT DISTINCT region FROM forecast
             WHERE period_month BETWEEN ?1 AND ?2
             ORDER BY region",
        )?;
        let rows = stmt
            .query_map(params![window.start.to_string(), window.end.to_string()], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn upsert_forecast(&self, r: &ForecastRecord) -> PipelineResult<()> {
        self.tx.execute(
            "INSERT INTO forecast
             (region, period_month, predicted_value, lower_bound, upper_bound,
              risk_level, risk_flag, model_descriptor, generated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(region, period_month) DO UPDATE SET
                predicted_value  = excluded.predicted_value,
                lower_bound      = excluded.lower_bound,
                upper_bound      = excluded.upper_bound,
                risk_level       = excluded.risk_level,
                risk_flag        = excluded.risk_flag,
                model_descriptor = excluded.model_descriptor,
                generated_at     = excluded.generated_at",
            params![
                r.region,
                r.period.to_string(),
                r.predicted_value,
                r.lower_bound,
                r.upper_bound,
                r.risk_level.as_str(),
                r.risk_flag as i32,
                r.model_descriptor,
                timestamp(&r.generated_at),
            ],
        )?;
        Ok(())
    }

    pub fn forecast_regions(&self) -> PipelineResult<Vec<String>> {
        let mut stmt = self
            .tx
            .prepare("SELECT DISTINCT region FROM forecast ORDER BY region")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Move rows stored under `from` to `to`. Where both spellings hold the
    /// same period, the row already under `to` is kept.
    /// Returns (dropped, moved).
    pub fn merge_forecast_region(&self, from: &str, to: &str) -> PipelineResult<(usize, usize)> {
        let dropped = self.tx.execute(
            "DELETE FROM forecast
             WHERE region = ?1
               AND period_month IN (SELECT period_month FROM forecast WHERE region = ?2)",
            params![from, to],
        )?;
        let moved = self.tx.execute(
            "UPDATE forecast SET region = ?2 WHERE region = ?1",
            params![from, to],
        )?;
        Ok((dropped, moved))
    }
}

impl ForecastStore {
    /// Forecasts with `start <= period <= end`, ordered by region then period.
    pub fn forecasts_in_range(
        &self,
        start: PeriodMonth,
        end: PeriodMonth,
    ) -> PipelineResult<Vec<ForecastRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {FORECAST_COLUMNS} FROM forecast
             WHERE period_month BETWEEN ?1 AND ?2
             ORDER BY region ASC, period_month ASC"
        ))?;
        let rows = stmt
            .query_map(params![start.to_string(), end.to_string()], map_forecast_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn forecasts_for_region(
        &self,
        region: &str,
        start: PeriodMonth,
        end: PeriodMonth,
    ) -> PipelineResult<Vec<ForecastRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {FORECAST_COLUMNS} FROM forecast
             WHERE region = ?1 AND period_month BETWEEN ?2 AND ?3
             ORDER BY period_month ASC"
        ))?;
        let rows = stmt
            .query_map(
                params![region, start.to_string(), end.to_string()],
                map_forecast_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn all_forecasts(&self) -> PipelineResult<Vec<ForecastRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {FORECAST_COLUMNS} FROM forecast ORDER BY region ASC, period_month ASC"
        ))?;
        let rows = stmt
            .query_map([], map_forecast_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Rows left behind outside `window` by earlier runs.
    pub fn forecasts_outside_window(
        &self,
        window: &PeriodWindow,
    ) -> PipelineResult<Vec<ForecastRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {FORECAST_COLUMNS} FROM forecast
             WHERE period_month < ?1 OR period_month > ?2
             ORDER BY region ASC, period_month ASC"
        ))?;
        let rows = stmt
            .query_map(
                params![window.start.to_string(), window.end.to_string()],
                map_forecast_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete_forecasts_outside_window(&self, window: &PeriodWindow) -> PipelineResult<usize> {
        let n = self.conn.execute(
            "DELETE FROM forecast WHERE period_month < ?1 OR period_month > ?2",
            params![window.start.to_string(), window.end.to_string()],
        )?;
        Ok(n)
    }

    pub fn generation_status(&self) -> PipelineResult<GenerationStatus> {
        let status = self.conn.query_row(
            "SELECT COUNT(*), MAX(generated_at), COUNT(DISTINCT period_month),
                    COUNT(DISTINCT region), MIN(period_month), MAX(period_month)
             FROM forecast",
            [],
            |row| {
                Ok(GenerationStatus {
                    total_forecasts: row.get(0)?,
                    latest_generated_at: optional_timestamp_column(row, 1)?,
                    months_covered: row.get(2)?,
                    regions_covered: row.get(3)?,
                    first_period: row.get(4)?,
                    last_period: row.get(5)?,
                })
            },
        )?;
        Ok(status)
    }
}
