//! Run ledger events.
//!
//! RULE: Every regeneration records what it did as a sequence of events.
//! Events are buffered during the run and appended after the data
//! transaction has committed or rolled back, so a failed run keeps its log.

use crate::types::RunId;
use serde::{Deserialize, Serialize};

/// Every event a regeneration run can emit.
/// Variants are added over time; never removed or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    RunStarted {
        run_id: RunId,
        anchor: String,
        horizon_months: u32,
        window_start: String,
        window_end: String,
    },
    RegionQuarantined {
        raw_name: String,
        occurrences: u32,
    },
    SeriesBuilt {
        observations: u64,
        regions: u32,
        low_confidence_regions: Vec<String>,
    },
    EngineCompleted {
        engine: String,
        forecasts: u32,
        fitted: u32,
        seconds: f64,
    },
    ForecastsReconciled {
        deleted: u32,
        written: u32,
    },
    GraphAssembled {
        deleted: u32,
        written: u32,
    },
    StaleForecastsDetected {
        count: u32,
    },
    RunCompleted {
        run_id: RunId,
    },
    RunFailed {
        run_id: RunId,
        error: String,
        engine_contract: bool,
    },    RegionsRetired {
        regions: Vec<String>,
        graph_points: u32,
    },
}

impl PipelineEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::RunStarted { .. }             => "run_started",
            PipelineEvent::RegionQuarantined { .. }      => "region_quarantined",
            PipelineEvent::SeriesBuilt { .. }            => "series_built",
            PipelineEvent::EngineCompleted { .. }        => "engine_completed",
            PipelineEvent::ForecastsReconciled { .. }    => "forecasts_reconciled",
            PipelineEvent::GraphAssembled { .. }         => "graph_assembled",
            PipelineEvent::StaleForecastsDetected { .. } => "stale_forecasts_detected",
            PipelineEvent::RunCompleted { .. }           => "run_completed",
            PipelineEvent::RunFailed { .. }              => "run_failed",
            PipelineEvent::RegionsRetired { .. }         => "regions_retired",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_matches_serde_tag() {
        let events = [
            PipelineEvent::RegionQuarantined { raw_name: "Atlantis".into(), occurrences: 2 },
            PipelineEvent::ForecastsReconciled { deleted: 3, written: 3 },
            PipelineEvent::RegionsRetired { regions: vec!["Hulo".into()], graph_points: 40 },
            PipelineEvent::RunFailed {
                run_id: "r".into(),
                error: "boom".into(),
                engine_contract: true,
            },
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.event_type());
            let back: PipelineEvent = serde_json::from_value(json).unwrap();
            assert_eq!(back, event);
        }
    }
}
