//! Series builder — turns resolved-incident observations into contiguous,
//! zero-filled monthly counts per canonical region.
//!
//! The forecasting engine assumes an evenly spaced series, so every month
//! between a region's first and last observation is present.

use crate::{
    config::SeriesConfig,
    error::{PipelineError, PipelineResult},
    identity::{comparison_key, IdentityNormalizer, Resolution},
    types::{PeriodMonth, RegionName},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One resolved incident as recorded upstream. Region is the raw spelling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentObservation {
    pub region: String,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyCount {
    pub period: PeriodMonth,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSeries {
    pub region: RegionName,
    pub counts: Vec<MonthlyCount>,
    /// Too little history for a fitted model; the engine falls back.
    pub low_confidence: bool,
}

impl RegionSeries {
    pub fn first_period(&self) -> Option<PeriodMonth> {
        self.counts.first().map(|c| c.period)
    }

    pub fn last_period(&self) -> Option<PeriodMonth> {
        self.counts.last().map(|c| c.period)
    }

    pub fn nonzero_months(&self) -> usize {
        self.counts.iter().filter(|c| c.count > 0).count()
    }
}

/// Output of one build: per-region series plus the names that could not be
/// resolved (raw spelling → occurrences).
#[derive(Debug, Clone, Default)]
pub struct SeriesBatch {
    pub series: BTreeMap<RegionName, RegionSeries>,
    pub unknown: BTreeMap<String, u32>,
}

pub struct SeriesBuilder<'a> {
    normalizer: &'a IdentityNormalizer,
    config: &'a SeriesConfig,
}

impl<'a> SeriesBuilder<'a> {
    pub fn new(normalizer: &'a IdentityNormalizer, config: &'a SeriesConfig) -> Self {
        Self { normalizer, config }
    }

    pub fn build(&self, observations: &[IncidentObservation]) -> SeriesBatch {
        let mut grouped: BTreeMap<RegionName, BTreeMap<PeriodMonth, u32>> = BTreeMap::new();
        let mut unknown: BTreeMap<String, u32> = BTreeMap::new();
        // comparison key → first raw spelling seen
        let mut unknown_spelling: HashMap<String, String> = HashMap::new();

        for obs in observations {
            match self.normalizer.normalize(&obs.region) {
                Resolution::Canonical(region) => {
                    *grouped
                        .entry(region)
                        .or_default()
                        .entry(PeriodMonth::of(&obs.resolved_at))
                        .or_insert(0) += 1;
                }
                Resolution::Unknown(raw) => {
                    let display = unknown_spelling
                        .entry(comparison_key(&raw))
                        .or_insert(raw)
                        .clone();
                    *unknown.entry(display).or_insert(0) += 1;
                }
            }
        }

        let series = grouped
            .into_iter()
            .map(|(region, by_month)| {
                let s = self.fill_gaps(region.clone(), &by_month);
                (region, s)
            })
            .collect();

        SeriesBatch { series, unknown }
    }

    fn fill_gaps(&self, region: RegionName, by_month: &BTreeMap<PeriodMonth, u32>) -> RegionSeries {
        let mut counts = Vec::new();
        if let (Some(first), Some(last)) = (by_month.keys().next(), by_month.keys().next_back()) {
            let mut period = *first;
            while period <= *last {
                counts.push(MonthlyCount {
                    period,
                    count: by_month.get(&period).copied().unwrap_or(0),
                });
                period = period.succ();
            }
        }

        let nonzero = counts.iter().filter(|c| c.count > 0).count();
        let low_confidence = counts.len() < self.config.low_confidence_min_months
            || nonzero < self.config.low_confidence_min_nonzero;
        if low_confidence {
            log::debug!(
                "{region}: low-confidence series ({} months, {nonzero} non-zero)",
                counts.len()
            );
        }

        RegionSeries {
            region,
            counts,
            low_confidence,
        }
    }
}

/// Re-check a series right before it crosses the engine boundary:
/// strictly increasing, one month apart, and not empty.
pub fn validate_contiguous(series: &RegionSeries) -> PipelineResult<()> {
    if series.counts.is_empty() {
        return Err(PipelineError::GappedSeries {
            region: series.region.clone(),
            detail: "no observed months".into(),
        });
    }
    for pair in series.counts.windows(2) {
        let step = pair[0].period.months_until(&pair[1].period);
        if step != 1 {
            return Err(PipelineError::GappedSeries {
                region: series.region.clone(),
                detail: format!("{} followed by {}", pair[0].period, pair[1].period),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn normalizer() -> IdentityNormalizer {
        IdentityNormalizer::new(
            &["Hulo".into(), "Hagdang Bato Itaas".into()],
            &[crate::config::AliasEntry {
                variant: "Hagdan Bato Itaas".into(),
                canonical: "Hagdang Bato Itaas".into(),
                version: 1,
                note: None,
            }],
        )
        .unwrap()
    }

    fn cfg() -> SeriesConfig {
        SeriesConfig {
            low_confidence_min_months: 6,
            low_confidence_min_nonzero: 3,
        }
    }

    fn obs(region: &str, y: i32, m: u32, d: u32) -> IncidentObservation {
        IncidentObservation {
            region: region.into(),
            resolved_at: Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn gaps_are_zero_filled() {
        let n = normalizer();
        let c = cfg();
        let batch = SeriesBuilder::new(&n, &c).build(&[
            obs("Hulo", 2024, 11, 3),
            obs("Hulo", 2024, 11, 20),
            obs("Hulo", 2025, 2, 1),
        ]);
        let s = &batch.series["Hulo"];
        let counts: Vec<(String, u32)> =
            s.counts.iter().map(|c| (c.period.to_string(), c.count)).collect();
        assert_eq!(
            counts,
            vec![
                ("2024-11".into(), 2),
                ("2024-12".into(), 0),
                ("2025-01".into(), 0),
                ("2025-02".into(), 1),
            ]
        );
        validate_contiguous(s).unwrap();
    }

    #[test]
    fn aliases_group_into_one_region() {
        let n = normalizer();
        let c = cfg();
        let batch = SeriesBuilder::new(&n, &c).build(&[
            obs("Hagdan Bato Itaas", 2024, 1, 5),
            obs("Hagdang Bato Itaas", 2024, 1, 9),
        ]);
        assert_eq!(batch.series.len(), 1);
        assert_eq!(batch.series["Hagdang Bato Itaas"].counts[0].count, 2);
    }

    #[test]
    fn unknown_names_are_set_aside() {
        let n = normalizer();
        let c = cfg();
        let batch = SeriesBuilder::new(&n, &c).build(&[
            obs("Atlantis", 2024, 1, 5),
            obs("Atlantis", 2024, 2, 5),
            obs("Hulo", 2024, 1, 5),
        ]);
        assert_eq!(batch.unknown.get("Atlantis"), Some(&2));
        assert!(!batch.series.contains_key("Atlantis"));
    }

    #[test]
    fn unknown_spellings_of_one_name_share_an_entry() {
        let n = normalizer();
        let c = cfg();
        let batch = SeriesBuilder::new(&n, &c).build(&[
            obs("  Lost  City", 2024, 1, 5),
            obs("LOST CITY", 2024, 1, 6),
            obs("lost city ", 2024, 2, 5),
        ]);
        assert_eq!(batch.unknown.len(), 1);
        assert_eq!(batch.unknown.get("Lost  City"), Some(&3), "first spelling is kept for display");
    }

    #[test]
    fn short_history_is_flagged_not_dropped() {
        let n = normalizer();
        let c = cfg();
        let batch = SeriesBuilder::new(&n, &c).build(&[obs("Hulo", 2024, 1, 5)]);
        let s = &batch.series["Hulo"];
        assert!(s.low_confidence);
        assert_eq!(s.counts.len(), 1);
    }

    #[test]
    fn sparse_history_is_flagged() {
        let n = normalizer();
        let c = cfg();
        let batch = SeriesBuilder::new(&n, &c)
            .build(&[obs("Hulo", 2023, 1, 5), obs("Hulo", 2024, 1, 5)]);
        let s = &batch.series["Hulo"];
        assert_eq!(s.counts.len(), 13);
        assert_eq!(s.nonzero_months(), 2);
        assert!(s.low_confidence);
    }

    #[test]
    fn validate_rejects_gaps() {
        let gapped = RegionSeries {
            region: "Hulo".into(),
            counts: vec![
                MonthlyCount { period: "2024-01".parse().unwrap(), count: 1 },
                MonthlyCount { period: "2024-03".parse().unwrap(), count: 1 },
            ],
            low_confidence: true,
        };
        assert!(matches!(
            validate_contiguous(&gapped),
            Err(PipelineError::GappedSeries { .. })
        ));
    }
}
