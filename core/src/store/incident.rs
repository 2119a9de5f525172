//! Upstream incident feed. Append-only; region spellings are kept raw and
//! normalized only when series are built.

use super::{timestamp, timestamp_column, ForecastStore};
use crate::{error::PipelineResult, series_builder::IncidentObservation};
use rusqlite::params;

impl ForecastStore {
    /// Bulk import in one transaction.
    pub fn insert_observations(
        &self,
        observations: &[IncidentObservation],
        source: Option<&str>,
    ) -> PipelineResult<usize> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO incident_observation (region_raw, resolved_at, source)
                 VALUES (?1, ?2, ?3)",
            )?;
            for obs in observations {
                stmt.execute(params![obs.region, timestamp(&obs.resolved_at), source])?;
            }
        }
        tx.commit()?;
        Ok(observations.len())
    }

    pub fn load_observations(&self) -> PipelineResult<Vec<IncidentObservation>> {
        let mut stmt = self.conn.prepare(
            "SELECT region_raw, resolved_at FROM incident_observation
             ORDER BY resolved_at ASC, id ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(IncidentObservation {
                    region: row.get(0)?,
                    resolved_at: timestamp_column(row, 1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn observation_count(&self) -> PipelineResult<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM incident_observation", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}
