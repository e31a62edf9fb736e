//! Logging setup for the batch binary and the run-level events it emits
//! before the pipeline starts.

use std::env;

use tracing::info;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::EnvFilter;

use crate::config::PipelineConfig;
use crate::features::{FEATURE_SCHEMA_VERSION, LOOKBACK_DAYS};
use crate::load::OUTPUT_TRAILING_DAYS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event, for log shipping.
    Json,
    /// Single-line human-readable output.
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// `PROPS_ETL_LOG_LEVEL` takes any `EnvFilter` directive;
/// `PROPS_ETL_LOG_FORMAT` is `json` or `compact`.
pub fn logging_config_from_env() -> LoggingConfig {
    let mut config = LoggingConfig::default();

    if let Ok(level) = env::var("PROPS_ETL_LOG_LEVEL") {
        let trimmed = level.trim();
        if !trimmed.is_empty() {
            config.level = trimmed.to_string();
        }
    }

    if let Some(format) = env::var("PROPS_ETL_LOG_FORMAT")
        .ok()
        .and_then(|raw| parse_log_format(&raw))
    {
        config.format = format;
    }

    config
}

/// Installs the global subscriber. An unparsable level falls back to `info`.
pub fn init_logging(config: &LoggingConfig) -> Result<(), SetGlobalDefaultError> {
    let env_filter =
        EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);

    match config.format {
        LogFormat::Json => {
            tracing::subscriber::set_global_default(builder.json().with_ansi(false).finish())
        }
        LogFormat::Compact => tracing::subscriber::set_global_default(builder.compact().finish()),
    }
}

pub fn log_app_start(config: &LoggingConfig) {
    info!(
        component = "props_etl",
        event = "app.start",
        version = env!("CARGO_PKG_VERSION"),
        log_level = %config.level,
        log_format = ?config.format,
        lookback_days = LOOKBACK_DAYS,
        output_trailing_days = OUTPUT_TRAILING_DAYS,
        feature_schema_version = FEATURE_SCHEMA_VERSION
    );
}

pub fn log_paths_resolved(config: &PipelineConfig) {
    info!(
        component = "props_etl",
        event = "config.paths",
        raw_dir = %config.raw_dir.display(),
        processed_dir = %config.processed_dir.display(),
        expectations_dir = %config.expectations_dir.display(),
        prints_present = config.prints_path().exists(),
        taps_present = config.taps_path().exists(),
        pays_present = config.pays_path().exists(),
        previous_output = config.result_path().exists()
    );
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "compact" | "text" => Some(LogFormat::Compact),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::with_env_vars;

    #[test]
    fn defaults_when_env_missing() {
        let cfg = with_env_vars(
            &[("PROPS_ETL_LOG_LEVEL", None), ("PROPS_ETL_LOG_FORMAT", None)],
            logging_config_from_env,
        );

        assert_eq!(cfg, LoggingConfig::default());
    }

    #[test]
    fn reads_level_directive_and_json_format() {
        let cfg = with_env_vars(
            &[
                ("PROPS_ETL_LOG_LEVEL", Some("props_etl=debug,warn")),
                ("PROPS_ETL_LOG_FORMAT", Some(" JSON ")),
            ],
            logging_config_from_env,
        );

        assert_eq!(cfg.level, "props_etl=debug,warn");
        assert_eq!(cfg.format, LogFormat::Json);
    }

    #[test]
    fn unknown_format_keeps_compact() {
        let cfg = with_env_vars(
            &[
                ("PROPS_ETL_LOG_LEVEL", Some("  ")),
                ("PROPS_ETL_LOG_FORMAT", Some("pretty")),
            ],
            logging_config_from_env,
        );

        assert_eq!(cfg.level, "info");
        assert_eq!(cfg.format, LogFormat::Compact);
    }
}
