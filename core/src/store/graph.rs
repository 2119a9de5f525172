//! Graph series queries. Dates are stored as `YYYY-MM-01`.

use super::{parsed_column, ForecastStore, StoreTx};
use crate::{
    error::PipelineResult,
    graph_assembler::GraphSeriesPoint,
    types::SeriesKind,
};
use rusqlite::{params, Row};

fn map_point_row(row: &Row<'_>) -> rusqlite::Result<GraphSeriesPoint> {
    Ok(GraphSeriesPoint {
        region: row.get(0)?,
        kind: parsed_column(row, 1)?,
        period: parsed_column(row, 2)?,
        value: row.get(3)?,
    })
}

impl StoreTx<'_> {
    /// Remove every non-`actual` point for one region. Actual points are
    /// only ever upserted.
    pub fn delete_generated_points(&self, region: &str) -> PipelineResult<usize> {
        let n = self.tx.execute(
            "DELETE FROM graph_series_point WHERE region = ?1 AND series_kind <> ?2",
            params![region, SeriesKind::Actual.as_str()],
        )?;
        Ok(n)
    }

    /// Remove every point for one region, `actual` included.
    pub fn delete_region_points(&self, region: &str) -> PipelineResult<usize> {
        let n = self.tx.execute(
            "DELETE FROM graph_series_point WHERE region = ?1",
            params![region],
        )?;
        Ok(n)
    }

    pub fn upsert_graph_point(&self, p: &GraphSeriesPoint) -> PipelineResult<()> {
        self.tx.execute(
            "INSERT INTO graph_series_point (region, series_kind, date, value)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(region, series_kind, date) DO UPDATE SET value = excluded.value",
            params![p.region, p.kind.as_str(), p.period.date_key(), p.value],
        )?;
        Ok(())
    }

    pub fn graph_regions(&self) -> PipelineResult<Vec<String>> {
        let mut stmt = self
            .tx
            .prepare("SELECT DISTINCT region FROM graph_series_point ORDER BY region")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Same rule as `merge_forecast_region`: on (kind, date) conflict the
    /// row already under `to` wins. Returns (dropped, moved).
    pub fn merge_graph_region(&self, from: &str, to: &str) -> PipelineResult<(usize, usize)> {
        let dropped = self.tx.execute(
            "DELETE FROM graph_series_point
             WHERE region = ?1
               AND EXISTS (SELECT 1 FROM graph_series_point g
                           WHERE g.region = ?2
                             AND g.series_kind = graph_series_point.series_kind
                             AND g.date = graph_series_point.date)",
            params![from, to],
        )?;
        let moved = self.tx.execute(
            "UPDATE graph_series_point SET region = ?2 WHERE region = ?1",
            params![from, to],
        )?;
        Ok((dropped, moved))
    }
}

impl ForecastStore {
    pub fn graph_series_for_region(&self, region: &str) -> PipelineResult<Vec<GraphSeriesPoint>> {
        let mut stmt = self.conn.prepare(
            "SELECT region, series_kind, date, value FROM graph_series_point
             WHERE region = ?1
             ORDER BY series_kind ASC, date ASC",
        )?;
        let rows = stmt
            .query_map(params![region], map_point_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn graph_series_all(&self) -> PipelineResult<Vec<GraphSeriesPoint>> {
        let mut stmt = self.conn.prepare(
            "SELECT region, series_kind, date, value FROM graph_series_point
             ORDER BY region ASC, series_kind ASC, date ASC",
        )?;
        let rows = stmt
            .query_map([], map_point_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
