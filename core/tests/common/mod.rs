//! Shared fixtures: a migrated in-memory store, observation seeding and a
//! deterministic fake engine.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use forecast_core::{
    engine_adapter::{EngineForecast, EngineRequest, EngineResponse, FittedPoint, ForecastEngine},
    error::PipelineResult,
    series_builder::IncidentObservation,
    store::ForecastStore,
    types::PeriodMonth,
};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

pub fn store() -> ForecastStore {
    let store = ForecastStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store
}

pub fn period(s: &str) -> PeriodMonth {
    s.parse().expect("period")
}

pub fn generated_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 2, 6, 0, 0).unwrap()
}

/// `counts[i]` incidents for `region` in month `start + i`.
pub fn seed_counts(store: &ForecastStore, region: &str, start: &str, counts: &[u32]) {
    let start = period(start);
    let mut observations = Vec::new();
    for (i, n) in counts.iter().enumerate() {
        let p = start.plus_months(i as i64);
        for k in 0..*n {
            observations.push(IncidentObservation {
                region: region.to_string(),
                resolved_at: Utc
                    .with_ymd_and_hms(p.year(), p.month(), 1 + (k % 27), 9, 30, 0)
                    .unwrap(),
            });
        }
    }
    store
        .insert_observations(&observations, Some("test"))
        .expect("seed observations");
}

pub const SCENARIO_COUNTS: [u32; 12] = [2, 1, 3, 2, 1, 2, 3, 1, 2, 4, 2, 3];

/// Forecasts every requested region at its historical mean, with a ±1 band,
/// and fits every historical month at the mean. `tweak` edits the document
/// before it is returned.
pub struct FakeEngine {
    tweak: Box<dyn Fn(&mut EngineResponse)>,
    pub calls: Cell<u32>,
    pub last_request: RefCell<Option<EngineRequest>>,
}

impl FakeEngine {
    pub fn mean() -> Self {
        Self::with_tweak(|_| {})
    }

    pub fn with_tweak(tweak: impl Fn(&mut EngineResponse) + 'static) -> Self {
        Self {
            tweak: Box::new(tweak),
            calls: Cell::new(0),
            last_request: RefCell::new(None),
        }
    }
}

impl ForecastEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake-mean"
    }

    fn batch_forecast(&self, request: &EngineRequest) -> PipelineResult<EngineResponse> {
        self.calls.set(self.calls.get() + 1);
        *self.last_request.borrow_mut() = Some(request.clone());

        let mut history: BTreeMap<&str, Vec<(PeriodMonth, u32)>> = BTreeMap::new();
        for h in &request.historical_data {
            history
                .entry(h.region.as_str())
                .or_default()
                .push((h.period_month, h.incident_count));
        }

        let window = request.window()?;
        let mut response = EngineResponse {
            forecasts: Vec::new(),
            fitted: Vec::new(),
        };
        for (region, points) in &history {
            let mean = points.iter().map(|(_, c)| f64::from(*c)).sum::<f64>() / points.len() as f64;
            for p in window.periods() {
                response.forecasts.push(EngineForecast {
                    region: region.to_string(),
                    period_month: p,
                    predicted_value: mean,
                    lower_bound: mean - 1.0,
                    upper_bound: mean + 1.0,
                    model_descriptor: "MEAN".into(),
                });
            }
            for (p, _) in points {
                response.fitted.push(FittedPoint {
                    region: region.to_string(),
                    period_month: *p,
                    fitted_value: mean,
                });
            }
        }
        (self.tweak)(&mut response);
        Ok(response)
    }
}
