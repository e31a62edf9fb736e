//! Path configuration for one pipeline run. Built once at the entry point
//! and passed by reference into the pipeline.

use std::env;
use std::path::{Path, PathBuf};

pub const PRINTS_FILE: &str = "prints.json";
pub const TAPS_FILE: &str = "taps.json";
pub const PAYS_FILE: &str = "pays.csv";
pub const RESULT_FILE: &str = "result_dataset.csv";

pub const PRINTS_EXPECTATIONS_FILE: &str = "expected_prints.json";
pub const TAPS_EXPECTATIONS_FILE: &str = "expected_taps.json";
pub const PAYS_EXPECTATIONS_FILE: &str = "expected_pays.json";

const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub raw_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub expectations_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_data_dir(DEFAULT_DATA_DIR)
    }
}

impl PipelineConfig {
    /// `raw/`, `processed/` and `expectations/` under one base directory.
    pub fn from_data_dir(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            raw_dir: data_dir.join("raw"),
            processed_dir: data_dir.join("processed"),
            expectations_dir: data_dir.join("expectations"),
        }
    }

    pub fn prints_path(&self) -> PathBuf {
        self.raw_dir.join(PRINTS_FILE)
    }

    pub fn taps_path(&self) -> PathBuf {
        self.raw_dir.join(TAPS_FILE)
    }

    pub fn pays_path(&self) -> PathBuf {
        self.raw_dir.join(PAYS_FILE)
    }

    pub fn result_path(&self) -> PathBuf {
        self.processed_dir.join(RESULT_FILE)
    }

    pub fn prints_expectations_path(&self) -> PathBuf {
        self.expectations_dir.join(PRINTS_EXPECTATIONS_FILE)
    }

    pub fn taps_expectations_path(&self) -> PathBuf {
        self.expectations_dir.join(TAPS_EXPECTATIONS_FILE)
    }

    pub fn pays_expectations_path(&self) -> PathBuf {
        self.expectations_dir.join(PAYS_EXPECTATIONS_FILE)
    }
}

/// Reads `PROPS_ETL_DATA_DIR`, then lets `PROPS_ETL_RAW_DIR`,
/// `PROPS_ETL_PROCESSED_DIR` and `PROPS_ETL_EXPECTATIONS_DIR` override
/// individual directories.
pub fn pipeline_config_from_env() -> PipelineConfig {
    let mut config = match non_empty_var("PROPS_ETL_DATA_DIR") {
        Some(base) => PipelineConfig::from_data_dir(base),
        None => PipelineConfig::default(),
    };

    if let Some(raw_dir) = non_empty_var("PROPS_ETL_RAW_DIR") {
        config.raw_dir = PathBuf::from(raw_dir);
    }
    if let Some(processed_dir) = non_empty_var("PROPS_ETL_PROCESSED_DIR") {
        config.processed_dir = PathBuf::from(processed_dir);
    }
    if let Some(expectations_dir) = non_empty_var("PROPS_ETL_EXPECTATIONS_DIR") {
        config.expectations_dir = PathBuf::from(expectations_dir);
    }

    config
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
