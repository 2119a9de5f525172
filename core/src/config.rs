use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ── Forecast engine ────────────────────────────────────────────────

/// How to launch the external forecasting engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub timeout_secs: u64,
    /// Directory for the input/output documents. System temp dir when absent.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    #[serde(default)]
    pub keep_temp_files: bool,
}

// ── Region directory ───────────────────────────────────────────────

/// One row of the alias table. Entries are append-only; for a given
/// variant the entry with the highest version is current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasEntry {
    pub variant: String,
    pub canonical: String,
    pub version: u32,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionDirectoryConfig {
    pub canonical: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<AliasEntry>,
}

// ── Pipeline ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesConfig {
    /// Regions spanning fewer months than this are flagged low-confidence.
    pub low_confidence_min_months: usize,
    /// Regions with fewer non-zero months than this are flagged low-confidence.
    pub low_confidence_min_nonzero: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Trailing window (months) of the `moving_avg` series.
    pub moving_avg_window: usize,
}

#[derive(Debug, Clone, Deserialize)]
struct PipelineFile {
    horizon_months: u32,
    series: SeriesConfig,
    graph: GraphConfig,
    engine: EngineConfig,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub horizon_months: u32,
    pub series: SeriesConfig,
    pub graph: GraphConfig,
    pub engine: EngineConfig,
    pub regions: RegionDirectoryConfig,
}

impl PipelineConfig {
    /// Load from the data/ directory.
    /// In tests, use PipelineConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/pipeline/pipeline_config.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let file: PipelineFile = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;

        let region_path = format!("{data_dir}/regions/region_directory.json");
        let region_content = std::fs::read_to_string(&region_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {region_path}: {e}"))?;
        let regions: RegionDirectoryConfig = serde_json::from_str(&region_content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {region_path}: {e}"))?;

        if file.horizon_months == 0 {
            anyhow::bail!("{path}: horizon_months must be at least 1");
        }
        if file.graph.moving_avg_window == 0 {
            anyhow::bail!("{path}: graph.moving_avg_window must be at least 1");
        }

        Ok(Self {
            horizon_months: file.horizon_months,
            series: file.series,
            graph: file.graph,
            engine: file.engine,
            regions,
        })
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        Self {
            horizon_months: 12,
            series: SeriesConfig {
                low_confidence_min_months: 6,
                low_confidence_min_nonzero: 3,
            },
            graph: GraphConfig {
                moving_avg_window: 6,
            },
            engine: EngineConfig {
                program: "python3".into(),
                args: vec!["forecasting/forecast_engine.py".into()],
                timeout_secs: 600,
                work_dir: None,
                keep_temp_files: false,
            },
            regions: RegionDirectoryConfig {
                canonical: vec![
                    "Addition Hills".into(),
                    "Bagong Silang".into(),
                    "Hagdang Bato Itaas".into(),
                    "Hagdang Bato Libis".into(),
                    "New Zañiga".into(),
                    "Old Zañiga".into(),
                    "Wack-Wack Greenhills".into(),
                ],
                aliases: vec![
                    AliasEntry {
                        variant: "Hagdan Bato Itaas".into(),
                        canonical: "Hagdang Bato Itaas".into(),
                        version: 1,
                        note: None,
                    },
                    AliasEntry {
                        variant: "Hagdan Bato Libis".into(),
                        canonical: "Hagdang Bato Libis".into(),
                        version: 1,
                        note: None,
                    },
                    AliasEntry {
                        variant: "BagongSilang".into(),
                        canonical: "Bagong Silang".into(),
                        version: 1,
                        note: None,
                    },
                ],
            },
        }
    }
}
