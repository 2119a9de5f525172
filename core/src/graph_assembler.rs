//! Graph series assembler — one presentational series table per region:
//! actual counts, in-sample fit, forecast, confidence band and a trailing
//! moving average.
//!
//! `actual` points are only ever upserted. Every other kind is replaced
//! wholesale for the regions in a run. The forecast table, not this one, is
//! authoritative for risk.

use crate::{
    engine_adapter::FittedPoint,
    error::PipelineResult,
    forecast_reconciler::ForecastRecord,
    series_builder::{MonthlyCount, RegionSeries},
    store::StoreTx,
    types::{PeriodMonth, RegionName, SeriesKind},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unique on (region, kind, period). Stored with date `YYYY-MM-01`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSeriesPoint {
    pub region: RegionName,
    pub kind: SeriesKind,
    pub period: PeriodMonth,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphSummary {
    pub deleted: usize,
    pub written: usize,
}

pub struct GraphSeriesAssembler {
    moving_avg_window: usize,
}

impl GraphSeriesAssembler {
    pub fn new(moving_avg_window: usize) -> Self {
        Self {
            moving_avg_window: moving_avg_window.max(1),
        }
    }

    /// Build every point for the regions in `series`, ordered by region,
    /// kind, then period. Forecasts and fitted values for other regions
    /// are ignored.
    pub fn assemble(
        &self,
        series: &BTreeMap<RegionName, RegionSeries>,
        forecasts: &[ForecastRecord],
        fitted: &[FittedPoint],
    ) -> Vec<GraphSeriesPoint> {
        let mut points = Vec::new();

        for (region, s) in series {
            let point = |kind, period, value| GraphSeriesPoint {
                region: region.clone(),
                kind,
                period,
                value,
            };

            points.extend(
                s.counts
                    .iter()
                    .map(|c| point(SeriesKind::Actual, c.period, f64::from(c.count))),
            );

            points.extend(
                fitted
                    .iter()
                    .filter(|f| &f.region == region)
                    .map(|f| point(SeriesKind::Fitted, f.period_month, f.fitted_value)),
            );

            let region_forecasts: Vec<&ForecastRecord> =
                forecasts.iter().filter(|f| &f.region == region).collect();
            for f in &region_forecasts {
                points.push(point(SeriesKind::Forecast, f.period, f.predicted_value));
                points.push(point(SeriesKind::CiLower, f.period, f.lower_bound));
                points.push(point(SeriesKind::CiUpper, f.period, f.upper_bound));
            }

            points.extend(
                moving_average(&s.counts, self.moving_avg_window)
                    .into_iter()
                    .map(|(period, value)| point(SeriesKind::MovingAvg, period, value)),
            );
        }

        points.sort_by(|a, b| {
            (&a.region, a.kind, a.period).cmp(&(&b.region, b.kind, b.period))
        });
        points
    }
}

/// Trailing mean over `window` months, defined only from the
/// `window`-th point onward.
pub fn moving_average(counts: &[MonthlyCount], window: usize) -> Vec<(PeriodMonth, f64)> {
    if window == 0 || counts.len() < window {
        return Vec::new();
    }
    counts
        .windows(window)
        .map(|w| {
            let sum: u64 = w.iter().map(|c| u64::from(c.count)).sum();
            (w[window - 1].period, sum as f64 / window as f64)
        })
        .collect()
}

/// Replace the generated kinds for `regions`, then upsert `points`.
/// Runs inside the caller's transaction.
pub fn persist_in<'r>(
    tx: &StoreTx<'_>,
    regions: impl IntoIterator<Item = &'r RegionName>,
    points: &[GraphSeriesPoint],
) -> PipelineResult<GraphSummary> {
    let mut deleted = 0;
    for region in regions {
        deleted += tx.delete_generated_points(region)?;
    }
    for p in points {
        tx.upsert_graph_point(p)?;
    }
    log::info!("Graph series: {deleted} generated points replaced by {}", points.len());
    Ok(GraphSummary {
        deleted,
        written: points.len(),
    })
}

/// Drop the whole graph of regions no longer fed by any observation.
/// Runs inside the caller's transaction.
pub fn retire_in(tx: &StoreTx<'_>, regions: &[RegionName]) -> PipelineResult<usize> {
    let mut deleted = 0;
    for region in regions {
        let n = tx.delete_region_points(region)?;
        log::warn!("Region '{region}' dropped out of the run; removed {n} graph points");
        deleted += n;
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk_classifier::RiskLevel;

    fn p(s: &str) -> PeriodMonth {
        s.parse().unwrap()
    }

    fn region_series(region: &str, start: &str, counts: &[u32]) -> RegionSeries {
        let start = p(start);
        RegionSeries {
            region: region.into(),
            counts: counts
                .iter()
                .enumerate()
                .map(|(i, c)| MonthlyCount {
                    period: start.plus_months(i as i64),
                    count: *c,
                })
                .collect(),
            low_confidence: false,
        }
    }

    fn record(region: &str, period: &str, predicted: f64) -> ForecastRecord {
        ForecastRecord {
            region: region.into(),
            period: p(period),
            predicted_value: predicted,
            lower_bound: predicted / 2.0,
            upper_bound: predicted * 2.0,
            risk_level: RiskLevel::High,
            risk_flag: true,
            model_descriptor: "ARIMA(1,0,0)".into(),
            generated_at: "2025-01-01T00:00:00Z".parse().unwrap(),
        }
    }

    fn count(points: &[GraphSeriesPoint], kind: SeriesKind) -> usize {
        points.iter().filter(|p| p.kind == kind).count()
    }

    #[test]
    fn moving_average_starts_at_the_window_th_month() {
        let s = region_series("Hulo", "2024-01", &[2, 1, 3, 2, 1, 2, 3, 1, 2, 4, 2, 3]);
        let ma = moving_average(&s.counts, 6);
        assert_eq!(ma.len(), 7);
        assert_eq!(ma[0].0, p("2024-06"));
        assert!((ma[0].1 - 11.0 / 6.0).abs() < 1e-12);
        assert_eq!(ma[6].0, p("2024-12"));
        assert!((ma[6].1 - 15.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn short_series_has_no_moving_average() {
        let s = region_series("Hulo", "2024-01", &[1, 2, 3]);
        assert!(moving_average(&s.counts, 6).is_empty());
    }

    #[test]
    fn assemble_emits_every_kind() {
        let series: BTreeMap<_, _> = [region_series("Hulo", "2024-01", &[2, 1, 3, 2, 1, 2, 3, 1, 2, 4, 2, 3])]
            .into_iter()
            .map(|s| (s.region.clone(), s))
            .collect();
        let forecasts = vec![
            record("Hulo", "2025-01", 2.1),
            record("Hulo", "2025-02", 2.3),
            record("Hulo", "2025-03", 2.2),
            record("Malamig", "2025-01", 9.0),
        ];
        let fitted = vec![FittedPoint {
            region: "Hulo".into(),
            period_month: p("2024-03"),
            fitted_value: -0.25,
        }];

        let points = GraphSeriesAssembler::new(6).assemble(&series, &forecasts, &fitted);

        assert_eq!(count(&points, SeriesKind::Actual), 12);
        assert_eq!(count(&points, SeriesKind::Forecast), 3);
        assert_eq!(count(&points, SeriesKind::CiLower), 3);
        assert_eq!(count(&points, SeriesKind::CiUpper), 3);
        assert_eq!(count(&points, SeriesKind::MovingAvg), 7);
        assert_eq!(count(&points, SeriesKind::Fitted), 1);
        assert!(points.iter().all(|p| p.region == "Hulo"));

        let fit = points.iter().find(|p| p.kind == SeriesKind::Fitted).unwrap();
        assert_eq!(fit.value, -0.25, "fitted values pass through unchanged");
    }

    #[test]
    fn assemble_output_is_unique_per_key() {
        let series: BTreeMap<_, _> = [region_series("Hulo", "2024-01", &[1; 8])]
            .into_iter()
            .map(|s| (s.region.clone(), s))
            .collect();
        let points = GraphSeriesAssembler::new(3).assemble(
            &series,
            &[record("Hulo", "2024-09", 1.0)],
            &[],
        );
        let mut keys: Vec<_> = points.iter().map(|p| (p.kind, p.period)).collect();
        let before = keys.len();
        keys.dedup();
        assert_eq!(keys.len(), before);
    }
}
