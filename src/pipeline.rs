//! Extract, validate/transform, load for one batch.
//!
//! The validation gate sits inside `transform`: normalized prints and taps
//! and raw payments must each pass their expectation suite before any
//! aggregation runs. Any stage failure aborts the batch; nothing is written
//! unless every stage before `load` succeeded.

use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::config::PipelineConfig;
use crate::expectations::{CheckRegistry, ExpectationSuite, ValidationError, ValidationReport};
use crate::extract::{extract_sources, ExtractError, RawSources};
use crate::features::{enrich_features, EnrichedRow};
use crate::load::{load_enriched, LoadError, LoadReport};
use crate::normalize::{normalize_events, normalized_rows, payment_events, TransformError};
use crate::table::Table;

pub const PRINTS_SOURCE: &str = "PRINTS";
pub const TAPS_SOURCE: &str = "TAPS";
pub const PAYS_SOURCE: &str = "PAYS";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("extract stage failed: {0}")]
    Extract(#[from] ExtractError),
    #[error("validation gate failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("transform stage failed: {0}")]
    Transform(#[from] TransformError),
    #[error("load stage failed: {0}")]
    Load(#[from] LoadError),
}

impl PipelineError {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Extract(_) => "extract",
            Self::Validation(_) => "validate",
            Self::Transform(_) => "transform",
            Self::Load(_) => "load",
        }
    }
}

pub trait Etl {
    type Extracted;
    type Transformed;

    fn extract(&self) -> Result<Self::Extracted, ExtractError>;

    /// May fail with either a validation or a transform error.
    fn transform(&self, extracted: Self::Extracted) -> Result<Self::Transformed, PipelineError>;

    fn load(&self, transformed: &Self::Transformed) -> Result<LoadReport, LoadError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSummary {
    pub load: LoadReport,
    pub elapsed_ms: u128,
}

pub fn run_pipeline<E: Etl>(etl: &E) -> Result<PipelineSummary, PipelineError> {
    let started = Instant::now();
    info!(component = "pipeline", event = "pipeline.start");

    let result = run_stages(etl);
    let elapsed_ms = started.elapsed().as_millis();

    match result {
        Ok(load) => {
            info!(
                component = "pipeline",
                event = "pipeline.finish",
                rows_written = load.rows_written,
                elapsed_ms = elapsed_ms as u64
            );
            Ok(PipelineSummary { load, elapsed_ms })
        }
        Err(err) => {
            error!(
                component = "pipeline",
                event = "pipeline.failed",
                stage = err.stage(),
                error = %err,
                elapsed_ms = elapsed_ms as u64
            );
            Err(err)
        }
    }
}

fn run_stages<E: Etl>(etl: &E) -> Result<LoadReport, PipelineError> {
    let extracted = etl.extract()?;
    info!(component = "pipeline", event = "pipeline.stage.done", stage = "extract");

    let transformed = etl.transform(extracted)?;
    info!(component = "pipeline", event = "pipeline.stage.done", stage = "transform");

    let report = etl.load(&transformed)?;
    info!(component = "pipeline", event = "pipeline.stage.done", stage = "load");
    Ok(report)
}

/// The impressions/taps/payments pipeline.
pub struct PropsEtl<'a> {
    config: &'a PipelineConfig,
    registry: CheckRegistry,
}

impl<'a> PropsEtl<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self::with_registry(config, CheckRegistry::with_builtin_checks())
    }

    pub fn with_registry(config: &'a PipelineConfig, registry: CheckRegistry) -> Self {
        Self { config, registry }
    }

    fn gate(&self, table: &Table, suite: &ExpectationSuite) -> Result<ValidationReport, ValidationError> {
        self.registry.evaluate_suite(table, suite).into_result()
    }
}

impl Etl for PropsEtl<'_> {
    type Extracted = RawSources;
    type Transformed = Vec<EnrichedRow>;

    fn extract(&self) -> Result<RawSources, ExtractError> {
        extract_sources(self.config)
    }

    fn transform(&self, extracted: RawSources) -> Result<Vec<EnrichedRow>, PipelineError> {
        let prints = normalize_events(&extracted.prints, PRINTS_SOURCE)?;
        let taps = normalize_events(&extracted.taps, TAPS_SOURCE)?;

        let prints_suite = ExpectationSuite::load(&self.config.prints_expectations_path())?;
        let taps_suite = ExpectationSuite::load(&self.config.taps_expectations_path())?;
        let pays_suite = ExpectationSuite::load(&self.config.pays_expectations_path())?;

        self.gate(&prints, &prints_suite)?;
        self.gate(&taps, &taps_suite)?;
        self.gate(&extracted.pays, &pays_suite)?;

        let prints = normalized_rows(&prints, PRINTS_SOURCE)?;
        let taps = normalized_rows(&taps, TAPS_SOURCE)?;
        let pays = payment_events(&extracted.pays, PAYS_SOURCE)?;

        Ok(enrich_features(&prints, &taps, &pays))
    }

    fn load(&self, transformed: &Vec<EnrichedRow>) -> Result<LoadReport, LoadError> {
        load_enriched(transformed, &self.config.result_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct ScriptedEtl {
        fail_extract: bool,
        transform_calls: Cell<u32>,
        load_calls: Cell<u32>,
    }

    impl ScriptedEtl {
        fn new(fail_extract: bool) -> Self {
            Self {
                fail_extract,
                transform_calls: Cell::new(0),
                load_calls: Cell::new(0),
            }
        }
    }

    impl Etl for ScriptedEtl {
        type Extracted = ();
        type Transformed = ();

        fn extract(&self) -> Result<(), ExtractError> {
            if self.fail_extract {
                return Err(ExtractError::NotFound {
                    path: "prints.json".into(),
                });
            }
            Ok(())
        }

        fn transform(&self, _: ()) -> Result<(), PipelineError> {
            self.transform_calls.set(self.transform_calls.get() + 1);
            Err(ValidationError::Failed {
                source_name: PRINTS_SOURCE.to_string(),
                failed_checks: 1,
            }
            .into())
        }

        fn load(&self, _: &()) -> Result<LoadReport, LoadError> {
            self.load_calls.set(self.load_calls.get() + 1);
            unreachable!("load must not run after a failed transform")
        }
    }

    #[test]
    fn extract_failure_stops_before_transform() {
        let etl = ScriptedEtl::new(true);
        let err = run_pipeline(&etl).unwrap_err();
        assert_eq!(err.stage(), "extract");
        assert_eq!(etl.transform_calls.get(), 0);
    }

    #[test]
    fn validation_failure_stops_before_load() {
        let etl = ScriptedEtl::new(false);
        let err = run_pipeline(&etl).unwrap_err();
        assert_eq!(err.stage(), "validate");
        assert!(err.to_string().contains("PRINTS"));
        assert_eq!(etl.load_calls.get(), 0);
    }
}
