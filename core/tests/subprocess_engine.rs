//! Subprocess transport, driven by small `sh` scripts standing in for the
//! real forecasting engine. The engine is invoked as
//! `sh -c <script> sh <input.json> <output.json>`.

#![cfg(unix)]

mod common;

use common::{period, store, seed_counts, SCENARIO_COUNTS};
use forecast_core::{
    config::{EngineConfig, PipelineConfig},
    engine_adapter::{EngineRequest, ForecastAdapter, ForecastEngine, SubprocessEngine},
    error::PipelineError,
    pipeline::{RegenerationPipeline, RegenerationRequest},
    series_builder::SeriesBuilder,
    identity::IdentityNormalizer,
    types::PeriodWindow,
};
use std::path::Path;
use std::time::Duration;

fn engine_config(script: &str, work_dir: &Path) -> EngineConfig {
    EngineConfig {
        program: "sh".into(),
        args: vec!["-c".into(), script.into(), "sh".into()],
        timeout_secs: 30,
        work_dir: Some(work_dir.to_path_buf()),
        keep_temp_files: false,
    }
}

fn request() -> EngineRequest {
    EngineRequest {
        historical_data: Vec::new(),
        start_year: 2025,
        start_month: 1,
        horizon_months: 1,
        low_confidence_regions: Vec::new(),
    }
}

const ONE_FORECAST: &str = r#"{"forecasts":[{"region":"Addition Hills","periodMonth":"2025-01","predictedValue":1.5,"lowerBound":0.5,"upperBound":2.5,"modelDescriptor":"ARIMA(1,0,0)"}]}"#;

#[test]
fn output_document_is_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let capture = dir.path().join("captured_input.json");
    let script = format!(
        "cp \"$1\" '{}' && printf '%s' '{ONE_FORECAST}' > \"$2\"",
        capture.display()
    );
    let engine = SubprocessEngine::new(&engine_config(&script, dir.path()));

    let response = engine.batch_forecast(&request()).unwrap();
    assert_eq!(response.forecasts.len(), 1);
    assert_eq!(response.forecasts[0].predicted_value, 1.5);
    assert!(response.fitted.is_empty());

    let sent: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&capture).unwrap()).unwrap();
    assert_eq!(sent["startYear"], 2025);
    assert_eq!(sent["horizonMonths"], 1);

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("forecast_"))
        .collect();
    assert!(leftovers.is_empty(), "temp documents are removed by default");
}

#[test]
fn temp_documents_can_be_kept() {
    let dir = tempfile::tempdir().unwrap();
    let script = format!("printf '%s' '{ONE_FORECAST}' > \"$2\"");
    let mut config = engine_config(&script, dir.path());
    config.keep_temp_files = true;

    SubprocessEngine::new(&config).batch_forecast(&request()).unwrap();

    let kept = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("forecast_"))
        .count();
    assert_eq!(kept, 2);
}

#[test]
fn slow_engine_is_killed_at_the_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SubprocessEngine::new(&engine_config("sleep 5", dir.path()))
        .with_timeout(Duration::from_millis(200));

    let started = std::time::Instant::now();
    let err = engine.batch_forecast(&request()).unwrap_err();
    assert!(matches!(err, PipelineError::EngineTimeout { .. }), "{err}");
    assert!(err.is_engine_contract());
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[test]
fn non_zero_exit_is_fatal_and_keeps_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SubprocessEngine::new(&engine_config(
        "echo 'model failed to converge' >&2; exit 3",
        dir.path(),
    ));

    match engine.batch_forecast(&request()).unwrap_err() {
        PipelineError::EngineExit { stderr, .. } => {
            assert!(stderr.contains("model failed to converge"), "stderr was: {stderr}");
        }
        other => panic!("expected EngineExit, got {other:?}"),
    }
}

#[test]
fn malformed_or_missing_output_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    for script in ["printf '{\"forecasts\": [' > \"$2\"", "true"] {
        let engine = SubprocessEngine::new(&engine_config(script, dir.path()));
        let err = engine.batch_forecast(&request()).unwrap_err();
        assert!(
            matches!(err, PipelineError::MalformedEngineOutput { .. }),
            "script {script:?} gave {err}"
        );
    }
}

#[test]
fn adapter_rejects_a_short_document_from_the_subprocess() {
    let dir = tempfile::tempdir().unwrap();
    let store = store();
    seed_counts(&store, "Addition Hills", "2024-01", &SCENARIO_COUNTS);
    let config = PipelineConfig::default_test();
    let normalizer = IdentityNormalizer::from_config(&config.regions).unwrap();
    let batch = SeriesBuilder::new(&normalizer, &config.series)
        .build(&store.load_observations().unwrap());

    // One period returned where two were requested.
    let script = format!("printf '%s' '{ONE_FORECAST}' > \"$2\"");
    let engine = SubprocessEngine::new(&engine_config(&script, dir.path()));
    let window = PeriodWindow::from_anchor(period("2025-01"), 2).unwrap();
    let err = ForecastAdapter::new(&engine)
        .forecast(&batch.series, window)
        .unwrap_err();
    assert!(matches!(err, PipelineError::EnginePeriodMismatch { .. }), "{err}");
}

#[test]
fn failing_subprocess_fails_the_whole_run() {
    let dir = tempfile::tempdir().unwrap();
    let store = store();
    seed_counts(&store, "Addition Hills", "2024-01", &SCENARIO_COUNTS);
    let mut config = PipelineConfig::default_test();
    config.engine = engine_config("exit 1", dir.path());
    let engine = SubprocessEngine::new(&config.engine);

    let err = RegenerationPipeline::new(&store, &engine, &config)
        .regenerate(&RegenerationRequest::new(period("2025-01"), 1))
        .unwrap_err();
    assert!(matches!(err, PipelineError::EngineExit { .. }));
    assert!(store.all_forecasts().unwrap().is_empty());
    assert!(store.graph_series_all().unwrap().is_empty());
}
