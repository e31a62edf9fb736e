//! Props ETL core crate.
//!
//! Enriches value-proposition impressions ("prints") with trailing-window
//! behavioral features for one batch:
//! - extraction of prints/taps (JSON lines) and payments (CSV)
//! - normalization of nested event details
//! - declarative expectation gate over every source
//! - 20-day view/click and payment aggregates, merged one row per print
//! - trailing-week CSV output

mod config;
mod expectations;
mod extract;
mod features;
mod load;
mod normalize;
mod observability;
mod pipeline;
mod table;

#[cfg(test)]
mod test_support;

pub use config::{
    pipeline_config_from_env, PipelineConfig, PAYS_EXPECTATIONS_FILE, PAYS_FILE,
    PRINTS_EXPECTATIONS_FILE, PRINTS_FILE, RESULT_FILE, TAPS_EXPECTATIONS_FILE, TAPS_FILE,
};
pub use expectations::{
    check_columns_exist, check_no_duplicates, check_no_duplicates_by_column,
    check_no_negative_values, check_no_nulls, CheckFailure, CheckFn, CheckKind, CheckOutcome,
    CheckRegistry, CheckStatus, Expectation, ExpectationSuite, ValidationError, ValidationReport,
    DEFAULT_SOURCE_NAME,
};
pub use extract::{extract_sources, read_csv, read_json_lines, ExtractError, RawSources};
pub use features::{
    assert_schema_compatible, build_feature_schema, enrich_features, join_taps, merge_features,
    payment_aggregates, view_click_aggregates, window_start, AggregateKey, BaseRow, EnrichedRow,
    FeatureColumn, FeatureDType, FeatureSchema, PaymentAggregate, PaymentTable, SchemaError,
    ViewClickAggregate, ViewClickTable, FEATURE_SCHEMA_VERSION, LOOKBACK_DAYS, OUTPUT_COLUMNS,
};
pub use load::{
    check_output_schema, load_enriched, read_output_schema, schema_path_for,
    select_trailing_days, write_enriched_csv, LoadError, LoadReport, OUTPUT_TRAILING_DAYS,
};
pub use normalize::{
    normalize_events, normalized_rows, parse_day, payment_events, NormalizedRow, PaymentEvent,
    TransformError, DAY_FORMAT, NORMALIZED_COLUMNS,
};
pub use observability::{
    init_logging, log_app_start, log_paths_resolved, logging_config_from_env, LogFormat,
    LoggingConfig,
};
pub use pipeline::{
    run_pipeline, Etl, PipelineError, PipelineSummary, PropsEtl, PAYS_SOURCE, PRINTS_SOURCE,
    TAPS_SOURCE,
};
pub use table::{Cell, Table, TableError};
