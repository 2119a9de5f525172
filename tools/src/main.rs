//! regen-runner: operator trigger for one forecast regeneration run.
//!
//! Usage:
//!   regen-runner --db forecasts.db --anchor 2025-01 --horizon 12
//!   regen-runner --db forecasts.db --import incidents.json
//!   regen-runner --db forecasts.db --anchor 2025-01 --sweep --merge-aliases
//!   regen-runner --db forecasts.db --status

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use forecast_core::{
    config::PipelineConfig,
    engine_adapter::SubprocessEngine,
    forecast_reconciler::ForecastReconciler,
    pipeline::{RegenerationPipeline, RegenerationReport, RegenerationRequest},
    series_builder::IncidentObservation,
    store::ForecastStore,
    types::{PeriodMonth, PeriodWindow},
};
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = flag_value(&args, "--db").unwrap_or("forecasts.db");
    let data_dir = flag_value(&args, "--data-dir").unwrap_or("./data");
    let import = flag_value(&args, "--import");
    let status_only = args.iter().any(|a| a == "--status");
    let sweep = args.iter().any(|a| a == "--sweep");
    let merge_aliases = args.iter().any(|a| a == "--merge-aliases");
    let skip_run = args.iter().any(|a| a == "--no-run");

    let config = PipelineConfig::load(data_dir)?;
    let horizon = parse_arg(&args, "--horizon", config.horizon_months);
    let anchor = match flag_value(&args, "--anchor") {
        Some(raw) => raw
            .parse::<PeriodMonth>()
            .with_context(|| format!("--anchor expects YYYY-MM, got '{raw}'"))?,
        None => PeriodMonth::of(&Utc::now()),
    };

    println!("Incident forecast — regen-runner");
    println!("  db:        {db}");
    println!("  data_dir:  {data_dir}");
    println!("  anchor:    {anchor}");
    println!("  horizon:   {horizon}");
    println!("  engine:    {} {}", config.engine.program, config.engine.args.join(" "));
    println!();

    let store = ForecastStore::open(db)?;
    store.migrate()?;
    log::info!("Store ready at {db} ({} observations)", store.observation_count()?);

    if status_only {
        print_status(&store)?;
        return Ok(());
    }

    if let Some(path) = import {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Cannot read {path}: {e}"))?;
        let observations: Vec<IncidentObservation> = serde_json::from_str(&content)
            .map_err(|e| anyhow!("Cannot parse {path}: {e}"))?;
        let n = store.insert_observations(&observations, Some(path))?;
        println!("Imported {n} observations from {path}");
    }

    let engine = SubprocessEngine::new(&config.engine);
    let pipeline = RegenerationPipeline::new(&store, &engine, &config);
    let reconciler = ForecastReconciler::new(&store);

    if merge_aliases {
        let merged = reconciler.merge_alias_rows(&pipeline.normalizer()?)?;
        for (from, to) in &merged.renamed {
            println!("  merged '{from}' → '{to}'");
        }
        println!(
            "Alias merge: {} forecasts and {} graph points moved, {} unresolved names",
            merged.forecasts_moved,
            merged.graph_points_moved,
            merged.unresolved.len()
        );
    }

    if !skip_run {
        let request = RegenerationRequest::new(anchor, horizon);
        let report = pipeline.regenerate(&request)?;
        print_report(&report);
    }

    if sweep {
        let window = PeriodWindow::from_anchor(anchor, horizon)?;
        let removed = reconciler.sweep_stale_forecasts(&window)?;
        println!("Swept {removed} forecast rows outside {window}");
    }

    println!();
    print_status(&store)?;
    Ok(())
}

fn print_report(report: &RegenerationReport) {
    println!("=== RUN SUMMARY ===");
    println!("  run_id:          {}", report.run_id);
    println!("  window:          {}", report.window);
    println!("  regions:         {}", report.regions.len());
    println!("  low confidence:  {}", report.low_confidence_regions.len());
    println!(
        "  forecasts:       {} written ({} replaced)",
        report.forecasts.written, report.forecasts.deleted
    );
    println!(
        "  graph points:    {} written ({} replaced)",
        report.graph.written, report.graph.deleted
    );
    if !report.retired_regions.is_empty() {
        println!("  retired:         {}", report.retired_regions.join(", "));
    }
    if report.stale_forecasts > 0 {
        println!("  stale rows:      {} (use --sweep)", report.stale_forecasts);
    }
    if !report.quarantined.is_empty() {
        println!();
        println!("=== QUARANTINED REGION NAMES ===");
        for (name, occurrences) in &report.quarantined {
            println!("  {name:<28} {occurrences} incidents");
        }
    }
}

fn print_status(store: &ForecastStore) -> Result<()> {
    let status = store.generation_status()?;
    println!("=== GENERATION STATUS ===");
    println!("  forecasts:       {}", status.total_forecasts);
    println!("  regions:         {}", status.regions_covered);
    println!("  months:          {}", status.months_covered);
    if let (Some(first), Some(last)) = (&status.first_period, &status.last_period) {
        println!("  periods:         {first} .. {last}");
    }
    match status.latest_generated_at {
        Some(at) => println!("  generated at:    {}", at.to_rfc3339()),
        None => println!("  generated at:    (never)"),
    }
    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    flag_value(args, flag)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
