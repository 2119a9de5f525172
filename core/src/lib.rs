//! Incident forecast regeneration pipeline.
//!
//! Resolved incidents → monthly series per canonical region → one batch
//! call to an external forecasting engine → clamped, risk-classified
//! forecasts and a presentational graph series, written atomically to
//! SQLite.

pub mod config;
pub mod engine_adapter;
pub mod error;
pub mod event;
pub mod forecast_reconciler;
pub mod graph_assembler;
pub mod identity;
pub mod pipeline;
pub mod risk_classifier;
pub mod series_builder;
pub mod store;
pub mod types;
