//! Forecast engine adapter — serializes the monthly series, invokes the
//! external engine once for all regions, and validates what comes back.
//!
//! The adapter is a pass-through: values are NOT clamped here, so the raw
//! engine output stays auditable. Clamping happens in the reconciler.
//!
//! Contract (hard failures, never truncated or padded):
//!   - every requested region present, no extra regions
//!   - each region's periods == the requested window, no duplicates
//!   - every numeric value finite
//!   - fitted points name a requested region inside its historical span

use crate::{
    config::EngineConfig,
    error::{PipelineError, PipelineResult},
    series_builder::{validate_contiguous, RegionSeries},
    types::{PeriodMonth, PeriodWindow, RegionName},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

// ── Wire documents ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalPoint {
    pub region: RegionName,
    pub period_month: PeriodMonth,
    pub incident_count: u32,
}

/// Input document handed to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineRequest {
    #[serde(rename = "historical_data")]
    pub historical_data: Vec<HistoricalPoint>,
    pub start_year: i32,
    pub start_month: u32,
    pub horizon_months: u32,
    /// Regions the engine should forecast with its fallback method.
    #[serde(default)]
    pub low_confidence_regions: Vec<RegionName>,
}

impl EngineRequest {
    pub fn window(&self) -> PipelineResult<PeriodWindow> {
        PeriodWindow::from_anchor(
            PeriodMonth::new(self.start_year, self.start_month)?,
            self.horizon_months,
        )
    }

    pub fn regions(&self) -> BTreeSet<&str> {
        self.historical_data.iter().map(|h| h.region.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineForecast {
    pub region: RegionName,
    pub period_month: PeriodMonth,
    pub predicted_value: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub model_descriptor: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FittedPoint {
    pub region: RegionName,
    pub period_month: PeriodMonth,
    pub fitted_value: f64,
}

/// Output document produced by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineResponse {
    pub forecasts: Vec<EngineForecast>,
    #[serde(default)]
    pub fitted: Vec<FittedPoint>,
}

impl EngineResponse {
    /// Parse an output document. Anything serde rejects is a contract error.
    pub fn parse(document: &str) -> PipelineResult<Self> {
        serde_json::from_str(document).map_err(|e| PipelineError::MalformedEngineOutput {
            detail: e.to_string(),
        })
    }
}

// ── Engine seam ──────────────────────────────────────────────────────────────

/// The external forecasting engine: one expensive batch call for all regions.
pub trait ForecastEngine {
    fn name(&self) -> &str;

    fn batch_forecast(&self, request: &EngineRequest) -> PipelineResult<EngineResponse>;
}

/// Validated adapter output, ordered by region then period.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdapterOutput {
    pub forecasts: Vec<EngineForecast>,
    pub fitted: Vec<FittedPoint>,
}

pub struct ForecastAdapter<'a> {
    engine: &'a dyn ForecastEngine,
}

impl<'a> ForecastAdapter<'a> {
    pub fn new(engine: &'a dyn ForecastEngine) -> Self {
        Self { engine }
    }

    pub fn build_request(
        series: &BTreeMap<RegionName, RegionSeries>,
        window: PeriodWindow,
    ) -> PipelineResult<EngineRequest> {
        if series.is_empty() {
            return Err(PipelineError::EmptyBatch {
                reason: "no region has observations".into(),
            });
        }
        let mut historical_data = Vec::new();
        let mut low_confidence_regions = Vec::new();
        for s in series.values() {
            validate_contiguous(s)?;
            if s.low_confidence {
                low_confidence_regions.push(s.region.clone());
            }
            historical_data.extend(s.counts.iter().map(|c| HistoricalPoint {
                region: s.region.clone(),
                period_month: c.period,
                incident_count: c.count,
            }));
        }
        Ok(EngineRequest {
            historical_data,
            start_year: window.start.year(),
            start_month: window.start.month(),
            horizon_months: window.len() as u32,
            low_confidence_regions,
        })
    }

    /// Build the request, call the engine once, and validate the result.
    pub fn forecast(
        &self,
        series: &BTreeMap<RegionName, RegionSeries>,
        window: PeriodWindow,
    ) -> PipelineResult<AdapterOutput> {
        let request = Self::build_request(series, window)?;
        log::info!(
            "Invoking forecast engine '{}' for {} regions over {window}",
            self.engine.name(),
            series.len()
        );
        let started = Instant::now();
        let response = self.engine.batch_forecast(&request)?;
        log::info!(
            "Engine '{}' returned {} forecasts, {} fitted points in {:.1}s",
            self.engine.name(),
            response.forecasts.len(),
            response.fitted.len(),
            started.elapsed().as_secs_f64()
        );
        validate_response(series, window, response)
    }
}

/// Check an engine response against what was requested.
pub fn validate_response(
    series: &BTreeMap<RegionName, RegionSeries>,
    window: PeriodWindow,
    response: EngineResponse,
) -> PipelineResult<AdapterOutput> {
    let mut by_region: BTreeMap<RegionName, Vec<EngineForecast>> = BTreeMap::new();
    for f in response.forecasts {
        for (field, value) in [
            ("predictedValue", f.predicted_value),
            ("lowerBound", f.lower_bound),
            ("upperBound", f.upper_bound),
        ] {
            if !value.is_finite() {
                return Err(PipelineError::EngineValue {
                    region: f.region.clone(),
                    period: f.period_month.to_string(),
                    field,
                });
            }
        }
        by_region.entry(f.region.clone()).or_default().push(f);
    }

    let missing: Vec<String> = series
        .keys()
        .filter(|r| !by_region.contains_key(*r))
        .cloned()
        .collect();
    let unexpected: Vec<String> = by_region
        .keys()
        .filter(|r| !series.contains_key(*r))
        .cloned()
        .collect();
    if !missing.is_empty() || !unexpected.is_empty() {
        return Err(PipelineError::EngineRegionMismatch { missing, unexpected });
    }

    let expected: Vec<PeriodMonth> = window.periods().collect();
    let mut forecasts = Vec::with_capacity(expected.len() * by_region.len());
    for (region, mut rows) in by_region {
        rows.sort_by_key(|f| f.period_month);
        let actual: Vec<PeriodMonth> = rows.iter().map(|f| f.period_month).collect();
        if actual != expected {
            return Err(PipelineError::EnginePeriodMismatch {
                region,
                expected: expected.iter().map(ToString::to_string).collect(),
                actual: actual.iter().map(ToString::to_string).collect(),
            });
        }
        forecasts.extend(rows);
    }

    let mut seen = BTreeSet::new();
    let mut fitted = Vec::with_capacity(response.fitted.len());
    for point in response.fitted {
        let Some(s) = series.get(&point.region) else {
            return Err(PipelineError::MalformedEngineOutput {
                detail: format!("fitted value for unrequested region '{}'", point.region),
            });
        };
        let in_span = matches!(
            (s.first_period(), s.last_period()),
            (Some(first), Some(last)) if point.period_month >= first && point.period_month <= last
        );
        if !in_span {
            return Err(PipelineError::MalformedEngineOutput {
                detail: format!(
                    "fitted value for '{}' at {} lies outside its history",
                    point.region, point.period_month
                ),
            });
        }
        if !point.fitted_value.is_finite() {
            return Err(PipelineError::EngineValue {
                region: point.region,
                period: point.period_month.to_string(),
                field: "fittedValue",
            });
        }
        if !seen.insert((point.region.clone(), point.period_month)) {
            return Err(PipelineError::MalformedEngineOutput {
                detail: format!(
                    "duplicate fitted value for '{}' at {}",
                    point.region, point.period_month
                ),
            });
        }
        fitted.push(point);
    }
    fitted.sort_by(|a, b| (&a.region, a.period_month).cmp(&(&b.region, b.period_month)));

    Ok(AdapterOutput { forecasts, fitted })
}

// ── Subprocess transport ─────────────────────────────────────────────────────

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Bytes of stderr kept in the error message.
const STDERR_TAIL: usize = 2_000;

/// Runs `program args… <input.json> <output.json>` and reads the output file.
pub struct SubprocessEngine {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    work_dir: Option<PathBuf>,
    keep_temp_files: bool,
}

impl SubprocessEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            work_dir: config.work_dir.clone(),
            keep_temp_files: config.keep_temp_files,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn run(&self, input: &std::path::Path, output: &std::path::Path) -> PipelineResult<()> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(input)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drain both pipes so a chatty engine never blocks on a full buffer.
        let stdout_reader = child.stdout.take().map(|out| {
            thread::spawn(move || {
                for line in BufReader::new(out).lines().map_while(Result::ok) {
                    log::debug!("[engine] {line}");
                }
            })
        });
        let stderr_reader = child.stderr.take().map(|err| {
            thread::spawn(move || {
                let mut collected = String::new();
                for line in BufReader::new(err).lines().map_while(Result::ok) {
                    log::warn!("[engine] {line}");
                    collected.push_str(&line);
                    collected.push('\n');
                }
                collected
            })
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                // Reader threads are left detached: a grandchild may still
                // hold the pipes open.
                let _ = child.kill();
                let _ = child.wait();
                return Err(PipelineError::EngineTimeout {
                    engine: self.name().to_string(),
                    seconds: self.timeout.as_secs_f64(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        if let Some(handle) = stdout_reader {
            let _ = handle.join();
        }
        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            let start = stderr.len().saturating_sub(STDERR_TAIL);
            let tail = stderr.get(start..).unwrap_or(&stderr).trim().to_string();
            return Err(PipelineError::EngineExit {
                engine: self.name().to_string(),
                status: status.to_string(),
                stderr: tail,
            });
        }
        Ok(())
    }
}

impl ForecastEngine for SubprocessEngine {
    fn name(&self) -> &str {
        &self.program
    }

    fn batch_forecast(&self, request: &EngineRequest) -> PipelineResult<EngineResponse> {
        let dir = match &self.work_dir {
            Some(dir) => dir.clone(),
            None => std::env::temp_dir(),
        };
        std::fs::create_dir_all(&dir)?;

        let input = tempfile::Builder::new()
            .prefix("forecast_input_")
            .suffix(".json")
            .tempfile_in(&dir)?;
        {
            let mut writer = BufWriter::new(input.as_file());
            serde_json::to_writer_pretty(&mut writer, request)?;
            writer.flush()?;
        }
        let output = tempfile::Builder::new()
            .prefix("forecast_output_")
            .suffix(".json")
            .tempfile_in(&dir)?;

        log::debug!(
            "Engine input {} ({} historical points), output {}",
            input.path().display(),
            request.historical_data.len(),
            output.path().display()
        );

        let result = self.run(input.path(), output.path()).and_then(|()| {
            let document = std::fs::read_to_string(output.path())?;
            EngineResponse::parse(&document)
        });

        if self.keep_temp_files {
            let (_, input_path) = input.keep().map_err(|e| e.error)?;
            let (_, output_path) = output.keep().map_err(|e| e.error)?;
            log::info!(
                "Kept engine documents {} and {}",
                input_path.display(),
                output_path.display()
            );
        }
        result
    }
}
