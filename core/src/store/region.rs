//! Region directory (canonical names + versioned aliases) and the
//! unknown-name quarantine.

use super::{ForecastStore, UnknownRegionRow};
use crate::{
    config::{AliasEntry, RegionDirectoryConfig},
    error::PipelineResult,
};
use rusqlite::params;
use std::collections::BTreeMap;

impl ForecastStore {
    /// Add any canonical names and alias versions not yet stored.
    /// Existing rows are never rewritten.
    pub fn sync_region_directory(&self, directory: &RegionDirectoryConfig) -> PipelineResult<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut added = 0;
        for name in &directory.canonical {
            added += tx.execute(
                "INSERT OR IGNORE INTO canonical_region (name) VALUES (?1)",
                params![name],
            )?;
        }
        for alias in &directory.aliases {
            added += tx.execute(
                "INSERT OR IGNORE INTO region_alias (variant, canonical, version, note)
                 VALUES (?1, ?2, ?3, ?4)",
                params![alias.variant, alias.canonical, alias.version, alias.note],
            )?;
        }
        tx.commit()?;
        Ok(added)
    }

    pub fn add_region_alias(&self, alias: &AliasEntry) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO region_alias (variant, canonical, version, note)
             VALUES (?1, ?2, ?3, ?4)",
            params![alias.variant, alias.canonical, alias.version, alias.note],
        )?;
        Ok(())
    }

    /// Full directory, including superseded alias versions.
    pub fn load_region_directory(&self) -> PipelineResult<RegionDirectoryConfig> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM canonical_region ORDER BY name")?;
        let canonical = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT variant, canonical, version, note FROM region_alias
             ORDER BY variant, version",
        )?;
        let aliases = stmt
            .query_map([], |row| {
                Ok(AliasEntry {
                    variant: row.get(0)?,
                    canonical: row.get(1)?,
                    version: row.get(2)?,
                    note: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RegionDirectoryConfig { canonical, aliases })
    }

    // ── Quarantine ─────────────────────────────────────────────

    pub fn record_unknown_regions(
        &self,
        run_id: &str,
        unknown: &BTreeMap<String, u32>,
    ) -> PipelineResult<()> {
        for (raw_name, occurrences) in unknown {
            self.conn.execute(
                "INSERT INTO unknown_region (raw_name, occurrences, first_seen_run, last_seen_run)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(raw_name) DO UPDATE SET
                    occurrences   = excluded.occurrences,
                    last_seen_run = excluded.last_seen_run",
                params![raw_name, occurrences, run_id],
            )?;
        }
        Ok(())
    }

    pub fn unknown_regions(&self) -> PipelineResult<Vec<UnknownRegionRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT raw_name, occurrences, first_seen_run, last_seen_run
             FROM unknown_region ORDER BY raw_name",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(UnknownRegionRow {
                    raw_name: row.get(0)?,
                    occurrences: row.get(1)?,
                    first_seen_run: row.get(2)?,
                    last_seen_run: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Drop a quarantine entry once an alias or canonical name covers it.
    pub fn clear_unknown_region(&self, raw_name: &str) -> PipelineResult<bool> {
        let n = self
            .conn
            .execute("DELETE FROM unknown_region WHERE raw_name = ?1", params![raw_name])?;
        Ok(n > 0)
    }
}
