//! The regeneration pipeline — one operator-triggered batch run.
//!
//! EXECUTION ORDER (fixed):
//!   1. Record the run in the ledger (status `running`)
//!   2. Sync the region directory and build the normalizer
//!   3. Load observations, build series, quarantine unknown names
//!   4. One engine call for every region, validated by the adapter
//!   5. Clamp + classify into forecast records
//!   6. ONE transaction: reconcile the forecast window, replace graph series
//!   7. Commit, then mark the run `completed`
//!
//! RULES:
//!   - The window `[anchor, anchor + horizon - 1]` is the only scope a run
//!     touches in the forecast table.
//!   - Any error before commit leaves the previous generation visible and
//!     marks the run `failed`. There is no automatic retry.
//!   - A region with forecast rows in the window that the run no longer
//!     produces is retired: its window rows and its whole graph go together.
//!   - At most one regeneration per database at a time. A run refuses to
//!     start while another run younger than the engine timeout is still
//!     marked `running`; older `running` rows are treated as abandoned.

use crate::{
    config::PipelineConfig,
    engine_adapter::{ForecastAdapter, ForecastEngine},
    error::{PipelineError, PipelineResult},
    event::PipelineEvent,
    forecast_reconciler::{build_records, reconcile_in, ReconcileSummary},
    graph_assembler::{persist_in, retire_in, GraphSeriesAssembler, GraphSummary},
    identity::IdentityNormalizer,
    series_builder::SeriesBuilder,
    store::{ForecastStore, GenerationStatus, RunRow, RunStatus, RunTotals},
    types::{PeriodMonth, PeriodWindow, RegionName, RunId},
};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::collections::BTreeMap;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct RegenerationRequest {
    pub anchor: PeriodMonth,
    pub horizon_months: u32,
    /// Stamped on every record written. Passing the same value makes a
    /// repeated run byte-identical.
    pub generated_at: DateTime<Utc>,
}

impl RegenerationRequest {
    pub fn new(anchor: PeriodMonth, horizon_months: u32) -> Self {
        Self {
            anchor,
            horizon_months,
            generated_at: Utc::now().trunc_subsecs(0),
        }
    }

    pub fn with_generated_at(mut self, generated_at: DateTime<Utc>) -> Self {
        self.generated_at = generated_at;
        self
    }

    pub fn window(&self) -> PipelineResult<PeriodWindow> {
        PeriodWindow::from_anchor(self.anchor, self.horizon_months)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegenerationReport {
    pub run_id: RunId,
    pub window: PeriodWindow,
    pub regions: Vec<RegionName>,
    pub low_confidence_regions: Vec<RegionName>,
    /// Raw spelling → occurrences, excluded from this run.
    pub quarantined: BTreeMap<String, u32>,
    pub forecasts: ReconcileSummary,
    pub graph: GraphSummary,
    /// Regions that held forecasts in the window but were not part of this
    /// run. Their forecast rows and whole graph are gone.
    pub retired_regions: Vec<RegionName>,
    /// Forecast rows outside the window, left for the maintenance sweep.
    pub stale_forecasts: usize,
}

pub struct RegenerationPipeline<'a> {
    store: &'a ForecastStore,
    engine: &'a dyn ForecastEngine,
    config: &'a PipelineConfig,
}

impl<'a> RegenerationPipeline<'a> {
    pub fn new(
        store: &'a ForecastStore,
        engine: &'a dyn ForecastEngine,
        config: &'a PipelineConfig,
    ) -> Self {
        Self {
            store,
            engine,
            config,
        }
    }

    /// Directory from config plus anything operators added to the store.
    pub fn normalizer(&self) -> PipelineResult<IdentityNormalizer> {
        self.store.sync_region_directory(&self.config.regions)?;
        let directory = self.store.load_region_directory()?;
        IdentityNormalizer::from_config(&directory)
    }

    pub fn regenerate(&self, request: &RegenerationRequest) -> PipelineResult<RegenerationReport> {
        let window = request.window()?;

        let cutoff = Utc::now() - Duration::seconds(self.config.engine.timeout_secs as i64);
        if let Some(active) = self.store.running_since(cutoff)?.into_iter().next() {
            log::warn!("Regeneration {} is still running; not starting another", active.run_id);
            return Err(PipelineError::RunInProgress {
                run_id: active.run_id,
                started_at: active.started_at.to_rfc3339(),
            });
        }

        let run_id = uuid::Uuid::new_v4().to_string();

        self.store.insert_run(&RunRow {
            run_id: run_id.clone(),
            anchor: request.anchor.to_string(),
            horizon_months: request.horizon_months,
            window_start: window.start.to_string(),
            window_end: window.end.to_string(),
            engine: self.engine.name().to_string(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            regions: None,
            forecasts: None,
            graph_points: None,
            error: None,
        })?;
        log::info!("Regeneration {run_id} started for window {window}");

        let mut events = vec![PipelineEvent::RunStarted {
            run_id: run_id.clone(),
            anchor: request.anchor.to_string(),
            horizon_months: request.horizon_months,
            window_start: window.start.to_string(),
            window_end: window.end.to_string(),
        }];

        let outcome = self.execute(&run_id, request, window, &mut events);

        let (status, totals, error) = match &outcome {
            Ok(report) => {
                events.push(PipelineEvent::RunCompleted {
                    run_id: run_id.clone(),
                });
                log::info!(
                    "Regeneration {run_id} completed: {} regions, {} forecasts, {} graph points",
                    report.regions.len(),
                    report.forecasts.written,
                    report.graph.written
                );
                let totals = RunTotals {
                    regions: report.regions.len() as u32,
                    forecasts: report.forecasts.written as u32,
                    graph_points: report.graph.written as u32,
                };
                (RunStatus::Completed, Some(totals), None)
            }
            Err(e) => {
                events.push(PipelineEvent::RunFailed {
                    run_id: run_id.clone(),
                    error: e.to_string(),
                    engine_contract: e.is_engine_contract(),
                });
                log::error!("Regeneration {run_id} failed, previous generation kept: {e}");
                (RunStatus::Failed, None, Some(e.to_string()))
            }
        };

        if let Err(ledger) = self.close_run(&run_id, status, totals, error.as_deref(), &events) {
            // The data outcome stands; only the ledger write is lost.
            log::error!("Could not record outcome of run {run_id}: {ledger}");
            if outcome.is_ok() {
                return Err(ledger);
            }
        }
        outcome
    }

    fn execute(
        &self,
        run_id: &str,
        request: &RegenerationRequest,
        window: PeriodWindow,
        events: &mut Vec<PipelineEvent>,
    ) -> PipelineResult<RegenerationReport> {
        let normalizer = self.normalizer()?;

        let observations = self.store.load_observations()?;
        let batch = SeriesBuilder::new(&normalizer, &self.config.series).build(&observations);

        if !batch.unknown.is_empty() {
            self.store.record_unknown_regions(run_id, &batch.unknown)?;
            for (raw_name, occurrences) in &batch.unknown {
                log::warn!("Quarantined unknown region '{raw_name}' ({occurrences} incidents)");
                events.push(PipelineEvent::RegionQuarantined {
                    raw_name: raw_name.clone(),
                    occurrences: *occurrences,
                });
            }
        }

        let regions: Vec<RegionName> = batch.series.keys().cloned().collect();
        let low_confidence_regions: Vec<RegionName> = batch
            .series
            .values()
            .filter(|s| s.low_confidence)
            .map(|s| s.region.clone())
            .collect();
        events.push(PipelineEvent::SeriesBuilt {
            observations: observations.len() as u64,
            regions: regions.len() as u32,
            low_confidence_regions: low_confidence_regions.clone(),
        });
        if batch.series.is_empty() {
            return Err(PipelineError::EmptyBatch {
                reason: format!(
                    "{} observations, none resolved to a canonical region",
                    observations.len()
                ),
            });
        }

        let started = Instant::now();
        let output = ForecastAdapter::new(self.engine).forecast(&batch.series, window)?;
        events.push(PipelineEvent::EngineCompleted {
            engine: self.engine.name().to_string(),
            forecasts: output.forecasts.len() as u32,
            fitted: output.fitted.len() as u32,
            seconds: started.elapsed().as_secs_f64(),
        });

        let records = build_records(&output.forecasts, &window, request.generated_at)?;
        let points = GraphSeriesAssembler::new(self.config.graph.moving_avg_window).assemble(
            &batch.series,
            &records,
            &output.fitted,
        );

        let tx = self.store.begin()?;
        let retired_regions: Vec<RegionName> = tx
            .forecast_regions_in_window(&window)?
            .into_iter()
            .filter(|r| !batch.series.contains_key(r))
            .collect();
        let forecasts = reconcile_in(&tx, &window, &records)?;
        let graph = persist_in(&tx, &regions, &points)?;
        let retired_points = retire_in(&tx, &retired_regions)?;
        tx.commit()?;

        events.push(PipelineEvent::ForecastsReconciled {
            deleted: forecasts.deleted as u32,
            written: forecasts.written as u32,
        });
        events.push(PipelineEvent::GraphAssembled {
            deleted: graph.deleted as u32,
            written: graph.written as u32,
        });
        if !retired_regions.is_empty() {
            events.push(PipelineEvent::RegionsRetired {
                regions: retired_regions.clone(),
                graph_points: retired_points as u32,
            });
        }

        let stale_forecasts = self.store.forecasts_outside_window(&window)?.len();
        if stale_forecasts > 0 {
            log::warn!(
                "{stale_forecasts} forecast rows outside {window} remain; run the stale sweep to remove them"
            );
            events.push(PipelineEvent::StaleForecastsDetected {
                count: stale_forecasts as u32,
            });
        }

        Ok(RegenerationReport {
            run_id: run_id.to_string(),
            window,
            regions,
            low_confidence_regions,
            quarantined: batch.unknown,
            forecasts,
            graph,
            retired_regions,
            stale_forecasts,
        })
    }

    fn close_run(
        &self,
        run_id: &str,
        status: RunStatus,
        totals: Option<RunTotals>,
        error: Option<&str>,
        events: &[PipelineEvent],
    ) -> PipelineResult<()> {
        let now = Utc::now();
        for event in events {
            self.store.append_run_event(run_id, event, now)?;
        }
        self.store.finish_run(run_id, status, now, totals, error)
    }

    pub fn generation_status(&self) -> PipelineResult<GenerationStatus> {
        self.store.generation_status()
    }
}
