//! Forecast reconciler — replaces the forecast rows of one period window.
//!
//! Inside a single transaction: delete every row whose period lies in the
//! window, then upsert the new batch. A failure anywhere rolls the whole
//! window back to the previous generation.
//!
//! Rows outside the window are never touched by a regeneration. They are
//! reported by `stale_forecasts` and removed only by an explicit sweep.

use crate::{
    engine_adapter::EngineForecast,
    error::{PipelineError, PipelineResult},
    identity::{IdentityNormalizer, Resolution},
    risk_classifier::{clamp, risk, RiskLevel},
    store::{ForecastStore, StoreTx},
    types::{PeriodMonth, PeriodWindow, RegionName},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One persisted forecast. Unique on (region, period).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastRecord {
    pub region: RegionName,
    #[serde(rename = "periodMonth")]
    pub period: PeriodMonth,
    pub predicted_value: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub risk_level: RiskLevel,
    pub risk_flag: bool,
    pub model_descriptor: String,
    pub generated_at: DateTime<Utc>,
}

impl ForecastRecord {
    /// Clamp the raw engine values and classify them.
    pub fn from_engine(raw: &EngineForecast, generated_at: DateTime<Utc>) -> Self {
        let c = clamp(raw.predicted_value, raw.lower_bound, raw.upper_bound);
        let (risk_level, risk_flag) = risk(c.predicted, c.upper);
        Self {
            region: raw.region.clone(),
            period: raw.period_month,
            predicted_value: c.predicted,
            lower_bound: c.lower,
            upper_bound: c.upper,
            risk_level,
            risk_flag,
            model_descriptor: raw.model_descriptor.clone(),
            generated_at,
        }
    }
}

/// Build and check the records for one window.
pub fn build_records(
    forecasts: &[EngineForecast],
    window: &PeriodWindow,
    generated_at: DateTime<Utc>,
) -> PipelineResult<Vec<ForecastRecord>> {
    let records: Vec<ForecastRecord> = forecasts
        .iter()
        .map(|f| ForecastRecord::from_engine(f, generated_at))
        .collect();
    check_batch(window, &records)?;
    Ok(records)
}

/// Every record inside the window, no key twice.
pub fn check_batch(window: &PeriodWindow, records: &[ForecastRecord]) -> PipelineResult<()> {
    let mut seen = BTreeSet::new();
    for r in records {
        if !window.contains(&r.period) {
            return Err(PipelineError::OutsideWindow {
                region: r.region.clone(),
                period: r.period.to_string(),
                window: window.to_string(),
            });
        }
        if !seen.insert((r.region.as_str(), r.period)) {
            return Err(PipelineError::DuplicateKey {
                region: r.region.clone(),
                key: r.period.to_string(),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub deleted: usize,
    pub written: usize,
}

/// Delete-then-upsert inside a caller-owned transaction.
pub fn reconcile_in(
    tx: &StoreTx<'_>,
    window: &PeriodWindow,
    records: &[ForecastRecord],
) -> PipelineResult<ReconcileSummary> {
    check_batch(window, records)?;
    let deleted = tx.delete_forecasts_in_window(window)?;
    for r in records {
        tx.upsert_forecast(r)?;
    }
    log::info!(
        "Reconciled window {window}: {deleted} rows replaced by {}",
        records.len()
    );
    Ok(ReconcileSummary {
        deleted,
        written: records.len(),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// (alias spelling, canonical spelling) pairs that were rewritten.
    pub renamed: Vec<(String, RegionName)>,
    pub forecasts_moved: usize,
    pub forecasts_dropped: usize,
    pub graph_points_moved: usize,
    pub graph_points_dropped: usize,
    /// Stored region names that resolve to nothing.
    pub unresolved: Vec<String>,
}

pub struct ForecastReconciler<'a> {
    store: &'a ForecastStore,
}

impl<'a> ForecastReconciler<'a> {
    pub fn new(store: &'a ForecastStore) -> Self {
        Self { store }
    }

    /// Replace the window in its own transaction.
    pub fn reconcile(
        &self,
        window: &PeriodWindow,
        records: &[ForecastRecord],
    ) -> PipelineResult<ReconcileSummary> {
        check_batch(window, records)?;
        let tx = self.store.begin()?;
        let summary = reconcile_in(&tx, window, records)?;
        tx.commit()?;
        Ok(summary)
    }

    // ── Maintenance ────────────────────────────────────────────

    pub fn stale_forecasts(&self, window: &PeriodWindow) -> PipelineResult<Vec<ForecastRecord>> {
        let stale = self.store.forecasts_outside_window(window)?;
        if !stale.is_empty() {
            log::warn!("{} forecast rows lie outside {window}", stale.len());
        }
        Ok(stale)
    }

    pub fn sweep_stale_forecasts(&self, window: &PeriodWindow) -> PipelineResult<usize> {
        let removed = self.store.delete_forecasts_outside_window(window)?;
        log::info!("Swept {removed} forecast rows outside {window}");
        Ok(removed)
    }

    /// Rewrite forecast and graph rows stored under an alias spelling to
    /// the canonical one, in one transaction.
    pub fn merge_alias_rows(&self, normalizer: &IdentityNormalizer) -> PipelineResult<MergeSummary> {
        let tx = self.store.begin()?;
        let mut summary = MergeSummary::default();

        let mut stored: BTreeSet<String> = tx.forecast_regions()?.into_iter().collect();
        stored.extend(tx.graph_regions()?);

        for name in stored {
            match normalizer.normalize(&name) {
                Resolution::Canonical(canonical) if canonical == name => {}
                Resolution::Canonical(canonical) => {
                    let (f_dropped, f_moved) = tx.merge_forecast_region(&name, &canonical)?;
                    let (g_dropped, g_moved) = tx.merge_graph_region(&name, &canonical)?;
                    log::info!(
                        "Merged '{name}' into '{canonical}': {f_moved} forecasts, {g_moved} graph points"
                    );
                    summary.forecasts_moved += f_moved;
                    summary.forecasts_dropped += f_dropped;
                    summary.graph_points_moved += g_moved;
                    summary.graph_points_dropped += g_dropped;
                    summary.renamed.push((name, canonical));
                }
                Resolution::Unknown(_) => {
                    log::warn!("Stored region '{name}' matches no canonical name or alias");
                    summary.unresolved.push(name);
                }
            }
        }

        tx.commit()?;
        Ok(summary)
    }
}
