use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── Input errors ───────────────────────────────────────────
    #[error("Invalid period: {value}")]
    InvalidPeriod { value: String },

    #[error("Unknown series kind: {value}")]
    UnknownSeriesKind { value: String },

    #[error("Unknown risk level: {value}")]
    UnknownRiskLevel { value: String },

    #[error("Series for '{region}' is not contiguous: {detail}")]
    GappedSeries { region: String, detail: String },

    #[error("Nothing to forecast: {reason}")]
    EmptyBatch { reason: String },

    #[error("Forecast for '{region}' at {period} lies outside window {window}")]
    OutsideWindow {
        region: String,
        period: String,
        window: String,
    },

    // ── Engine-contract errors ─────────────────────────────────
    #[error("Forecast engine '{engine}' timed out after {seconds:.1}s")]
    EngineTimeout { engine: String, seconds: f64 },

    #[error("Forecast engine '{engine}' exited with {status}: {stderr}")]
    EngineExit {
        engine: String,
        status: String,
        stderr: String,
    },

    #[error("Forecast engine returned periods {actual:?} for '{region}', expected {expected:?}")]
    EnginePeriodMismatch {
        region:   String,
        expected: Vec<String>,
        actual:   Vec<String>,
    },

    #[error("Forecast engine region set mismatch: missing {missing:?}, unexpected {unexpected:?}")]
    EngineRegionMismatch {
        missing:    Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("Forecast engine returned a non-finite {field} for '{region}' at {period}")]
    EngineValue {
        region: String,
        period: String,
        field:  &'static str,
    },

    #[error("Malformed engine output: {detail}")]
    MalformedEngineOutput { detail: String },

    // ── Persistence errors ─────────────────────────────────────
    #[error("Duplicate key ({region}, {key}) in batch")]
    DuplicateKey { region: String, key: String },

    // ── Run errors ─────────────────────────────────────────────
    #[error("Regeneration {run_id} is still running (started {started_at})")]
    RunInProgress { run_id: String, started_at: String },

    // ── Identity errors ────────────────────────────────────────
    #[error("Region names '{first}' and '{second}' collide after normalization")]
    IdentityCollision { first: String, second: String },

    #[error("Alias '{variant}' points to '{canonical}', which is not a canonical region")]
    UnknownCanonical { variant: String, canonical: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// True for failures raised by the external engine or its output document.
    pub fn is_engine_contract(&self) -> bool {
        matches!(
            self,
            PipelineError::EngineTimeout { .. }
                | PipelineError::EngineExit { .. }
                | PipelineError::EnginePeriodMismatch { .. }
                | PipelineError::EngineRegionMismatch { .. }
                | PipelineError::EngineValue { .. }
                | PipelineError::MalformedEngineOutput { .. }
        )
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
