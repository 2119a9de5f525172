//! Forecast reconciler against the real schema.
//!
//! The window is replaced as one unit: a failure partway through the
//! insert phase must leave the previous rows exactly as they were.

mod common;

use common::{generated_at, period, store};
use forecast_core::{
    engine_adapter::EngineForecast,
    error::PipelineError,
    forecast_reconciler::{build_records, reconcile_in, ForecastReconciler, ForecastRecord},
    types::PeriodWindow,
};

fn raw(region: &str, p: &str, predicted: f64) -> EngineForecast {
    EngineForecast {
        region: region.into(),
        period_month: period(p),
        predicted_value: predicted,
        lower_bound: predicted - 0.5,
        upper_bound: predicted + 0.5,
        model_descriptor: "ARIMA(1,1,0)".into(),
    }
}

fn window(anchor: &str, horizon: u32) -> PeriodWindow {
    PeriodWindow::from_anchor(period(anchor), horizon).unwrap()
}

fn batch(w: &PeriodWindow, regions: &[&str], predicted: f64) -> Vec<ForecastRecord> {
    let raws: Vec<EngineForecast> = regions
        .iter()
        .flat_map(|r| w.periods().map(move |p| raw(r, &p.to_string(), predicted)))
        .collect();
    build_records(&raws, w, generated_at()).unwrap()
}

#[test]
fn reconcile_replaces_the_window() {
    let store = store();
    let w = window("2025-01", 3);
    let reconciler = ForecastReconciler::new(&store);

    reconciler.reconcile(&w, &batch(&w, &["Hulo", "Malamig"], 0.7)).unwrap();
    let summary = reconciler.reconcile(&w, &batch(&w, &["Hulo"], 1.4)).unwrap();

    assert_eq!(summary.deleted, 6);
    assert_eq!(summary.written, 3);
    let rows = store.forecasts_in_range(w.start, w.end).unwrap();
    assert_eq!(rows.len(), 3, "a region missing from the new batch has no rows left in the window");
    assert!(rows.iter().all(|r| r.region == "Hulo" && r.predicted_value == 1.4));
}

#[test]
fn rows_outside_the_window_are_untouched() {
    let store = store();
    let reconciler = ForecastReconciler::new(&store);
    let early = window("2024-10", 3);
    let later = window("2025-01", 3);

    reconciler.reconcile(&early, &batch(&early, &["Hulo"], 0.3)).unwrap();
    reconciler.reconcile(&later, &batch(&later, &["Hulo"], 0.9)).unwrap();

    let all = store.all_forecasts().unwrap();
    assert_eq!(all.len(), 6);
    assert_eq!(store.forecasts_outside_window(&later).unwrap().len(), 3);
}

#[test]
fn failure_mid_insert_rolls_back_the_whole_window() {
    let store = store();
    let w = window("2025-01", 3);
    let reconciler = ForecastReconciler::new(&store);
    reconciler.reconcile(&w, &batch(&w, &["Hulo", "Malamig"], 0.7)).unwrap();
    let before = store.all_forecasts().unwrap();

    // Third record violates the table's bound ordering check.
    let mut next = batch(&w, &["Hulo", "Malamig"], 2.5);
    next[2].predicted_value = -1.0;
    let err = reconciler.reconcile(&w, &next).unwrap_err();
    assert!(matches!(err, PipelineError::Database(_)), "{err}");

    assert_eq!(store.all_forecasts().unwrap(), before, "window must be exactly as before");
}

#[test]
fn dropped_transaction_rolls_back() {
    let store = store();
    let w = window("2025-01", 2);
    let reconciler = ForecastReconciler::new(&store);
    reconciler.reconcile(&w, &batch(&w, &["Hulo"], 0.7)).unwrap();

    {
        let tx = store.begin().unwrap();
        reconcile_in(&tx, &w, &batch(&w, &["Hulo"], 5.0)).unwrap();
        // no commit
    }

    let rows = store.all_forecasts().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.predicted_value == 0.7));
}

#[test]
fn duplicate_keys_are_rejected_before_any_write() {
    let store = store();
    let w = window("2025-01", 2);
    let reconciler = ForecastReconciler::new(&store);
    reconciler.reconcile(&w, &batch(&w, &["Hulo"], 0.7)).unwrap();

    let mut dup = batch(&w, &["Hulo"], 1.2);
    dup.push(dup[0].clone());
    let err = reconciler.reconcile(&w, &dup).unwrap_err();
    assert!(matches!(err, PipelineError::DuplicateKey { .. }));
    assert!(store.all_forecasts().unwrap().iter().all(|r| r.predicted_value == 0.7));
}

#[test]
fn out_of_window_record_is_rejected() {
    let store = store();
    let w = window("2025-01", 2);
    let mut records = batch(&w, &["Hulo"], 0.7);
    records[1].period = period("2025-06");
    let err = ForecastReconciler::new(&store).reconcile(&w, &records).unwrap_err();
    assert!(matches!(err, PipelineError::OutsideWindow { .. }));
    assert!(store.all_forecasts().unwrap().is_empty());
}

#[test]
fn clamped_values_are_what_gets_stored() {
    let store = store();
    let w = window("2025-01", 1);
    let records = build_records(
        &[EngineForecast {
            region: "Hulo".into(),
            period_month: period("2025-01"),
            predicted_value: -0.2,
            lower_bound: -0.9,
            upper_bound: -0.1,
            model_descriptor: "ARIMA(0,0,1)".into(),
        }],
        &w,
        generated_at(),
    )
    .unwrap();
    ForecastReconciler::new(&store).reconcile(&w, &records).unwrap();

    let stored = &store.all_forecasts().unwrap()[0];
    assert_eq!(stored.predicted_value, 0.0);
    assert_eq!(stored.lower_bound, 0.0);
    assert_eq!(stored.upper_bound, 0.0);
}

#[test]
fn upsert_within_a_transaction_never_duplicates() {
    let store = store();
    let w = window("2025-01", 2);
    let records = batch(&w, &["Hulo"], 0.7);

    let tx = store.begin().unwrap();
    for r in &records {
        tx.upsert_forecast(r).unwrap();
        tx.upsert_forecast(r).unwrap();
    }
    tx.commit().unwrap();

    assert_eq!(store.all_forecasts().unwrap().len(), 2);
}
