//! Declarative data-quality expectations evaluated before a dataset is
//! trusted for aggregation.
//!
//! Check kinds dispatch through a [`CheckRegistry`] that maps each
//! [`CheckKind`] to a pure check function. Every expectation in a suite is
//! evaluated; a suite passes only if each registered check passes.
//! Unknown check kinds are logged and skipped.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::table::{CellKey, Table};

pub const DEFAULT_SOURCE_NAME: &str = "Unknown Source";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    ColumnsExist,
    NoDuplicates,
    NoDuplicatesByColumn,
    NoNulls,
    NoNegativeValues,
}

impl CheckKind {
    pub const ALL: [CheckKind; 5] = [
        Self::ColumnsExist,
        Self::NoDuplicates,
        Self::NoDuplicatesByColumn,
        Self::NoNulls,
        Self::NoNegativeValues,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ColumnsExist => "columns_exist",
            Self::NoDuplicates => "no_duplicates",
            Self::NoDuplicatesByColumn => "no_duplicates_by_column",
            Self::NoNulls => "no_nulls",
            Self::NoNegativeValues => "no_negative_values",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw.trim())
    }
}

/// One entry of an expectation config file. `check` stays textual so that
/// unknown kinds survive parsing and can be skipped at evaluation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expectation {
    pub check: String,
    #[serde(default)]
    pub columns: Vec<String>,
}

impl Expectation {
    pub fn new(kind: CheckKind, columns: &[&str]) -> Self {
        Self {
            check: kind.as_str().to_string(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectationSuite {
    #[serde(default = "default_source_name")]
    pub source_name: String,
    pub expectations: Vec<Expectation>,
}

fn default_source_name() -> String {
    DEFAULT_SOURCE_NAME.to_string()
}

impl ExpectationSuite {
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ValidationError> {
        let raw = fs::read_to_string(path).map_err(|source| ValidationError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw).map_err(|source| ValidationError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("failed to read expectation config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid expectation config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("validation failed for {source_name} data ({failed_checks} failing checks)")]
    Failed {
        source_name: String,
        failed_checks: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CheckFailure {
    MissingColumns(Vec<String>),
    DuplicateKeys {
        columns: Vec<String>,
        duplicate_rows: usize,
    },
    DuplicateValues(Vec<String>),
    NullColumns(Vec<String>),
    NegativeValueColumns(Vec<String>),
}

impl CheckFailure {
    pub fn category(&self) -> &'static str {
        match self {
            Self::MissingColumns(_) => "missing_columns",
            Self::DuplicateKeys { .. } => "duplicate_keys",
            Self::DuplicateValues(_) => "duplicate_values",
            Self::NullColumns(_) => "null_columns",
            Self::NegativeValueColumns(_) => "negative_value_columns",
        }
    }

    pub fn columns(&self) -> &[String] {
        match self {
            Self::MissingColumns(columns)
            | Self::DuplicateValues(columns)
            | Self::NullColumns(columns)
            | Self::NegativeValueColumns(columns)
            | Self::DuplicateKeys { columns, .. } => columns,
        }
    }
}

pub type CheckFn = fn(&Table, &[String]) -> Result<(), CheckFailure>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    Passed,
    Failed(CheckFailure),
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub check: String,
    pub columns: Vec<String>,
    pub status: CheckStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub source_name: String,
    pub outcomes: Vec<CheckOutcome>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.failed_count() == 0
    }

    pub fn failed_count(&self) -> usize {
        self.failures().count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&CheckOutcome, &CheckFailure)> {
        self.outcomes.iter().filter_map(|outcome| match &outcome.status {
            CheckStatus::Failed(failure) => Some((outcome, failure)),
            _ => None,
        })
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == CheckStatus::Skipped)
            .count()
    }

    pub fn into_result(self) -> Result<Self, ValidationError> {
        if self.passed() {
            Ok(self)
        } else {
            Err(ValidationError::Failed {
                failed_checks: self.failed_count(),
                source_name: self.source_name,
            })
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckRegistry {
    checks: HashMap<CheckKind, CheckFn>,
}

impl Default for CheckRegistry {
    fn default() -> Self {
        Self::with_builtin_checks()
    }
}

impl CheckRegistry {
    pub fn empty() -> Self {
        Self {
            checks: HashMap::new(),
        }
    }

    pub fn with_builtin_checks() -> Self {
        let mut registry = Self::empty();
        registry.register(CheckKind::ColumnsExist, check_columns_exist);
        registry.register(CheckKind::NoDuplicates, check_no_duplicates);
        registry.register(CheckKind::NoDuplicatesByColumn, check_no_duplicates_by_column);
        registry.register(CheckKind::NoNulls, check_no_nulls);
        registry.register(CheckKind::NoNegativeValues, check_no_negative_values);
        registry
    }

    /// Returns the previously registered function for `kind`, if any.
    pub fn register(&mut self, kind: CheckKind, check: CheckFn) -> Option<CheckFn> {
        self.checks.insert(kind, check)
    }

    pub fn get(&self, kind: CheckKind) -> Option<CheckFn> {
        self.checks.get(&kind).copied()
    }

    pub fn evaluate(
        &self,
        table: &Table,
        source_name: &str,
        expectations: &[Expectation],
    ) -> ValidationReport {
        let mut outcomes = Vec::with_capacity(expectations.len());

        for expectation in expectations {
            let check = CheckKind::parse(&expectation.check).and_then(|kind| self.get(kind));
            let status = match check {
                Some(check) => match check(table, &expectation.columns) {
                    Ok(()) => CheckStatus::Passed,
                    Err(failure) => {
                        error!(
                            component = "expectations",
                            event = "expectations.check.failed",
                            source_name,
                            check = %expectation.check,
                            category = failure.category(),
                            columns = ?failure.columns()
                        );
                        CheckStatus::Failed(failure)
                    }
                },
                None => {
                    warn!(
                        component = "expectations",
                        event = "expectations.check.unknown",
                        source_name,
                        check = %expectation.check
                    );
                    CheckStatus::Skipped
                }
            };

            outcomes.push(CheckOutcome {
                check: expectation.check.clone(),
                columns: expectation.columns.clone(),
                status,
            });
        }

        let report = ValidationReport {
            source_name: source_name.to_string(),
            outcomes,
        };

        if report.passed() {
            info!(
                component = "expectations",
                event = "expectations.suite.passed",
                source_name,
                rows = table.height(),
                checks = report.outcomes.len(),
                skipped = report.skipped_count()
            );
        } else {
            error!(
                component = "expectations",
                event = "expectations.suite.failed",
                source_name,
                rows = table.height(),
                failed_checks = report.failed_count()
            );
        }

        report
    }

    pub fn evaluate_suite(&self, table: &Table, suite: &ExpectationSuite) -> ValidationReport {
        self.evaluate(table, &suite.source_name, &suite.expectations)
    }
}

fn missing_columns(table: &Table, columns: &[String]) -> Vec<String> {
    columns
        .iter()
        .filter(|column| !table.has_column(column))
        .cloned()
        .collect()
}

fn require_columns(table: &Table, columns: &[String]) -> Result<Vec<usize>, CheckFailure> {
    let missing = missing_columns(table, columns);
    if !missing.is_empty() {
        return Err(CheckFailure::MissingColumns(missing));
    }
    Ok(columns
        .iter()
        .filter_map(|column| table.column_index(column))
        .collect())
}

/// Collects the listed columns for which `offends` holds on any cell.
fn offending_columns(
    table: &Table,
    columns: &[String],
    offends: impl Fn(&Table, usize) -> bool,
) -> Result<Vec<String>, CheckFailure> {
    let indices = require_columns(table, columns)?;
    Ok(columns
        .iter()
        .zip(indices)
        .filter(|(_, idx)| offends(table, *idx))
        .map(|(column, _)| column.clone())
        .collect())
}

pub fn check_columns_exist(table: &Table, columns: &[String]) -> Result<(), CheckFailure> {
    require_columns(table, columns).map(|_| ())
}

/// Composite-key uniqueness over the listed columns taken together.
pub fn check_no_duplicates(table: &Table, columns: &[String]) -> Result<(), CheckFailure> {
    let indices = require_columns(table, columns)?;
    if indices.is_empty() {
        return Ok(());
    }

    let mut seen: HashSet<Vec<CellKey>> = HashSet::with_capacity(table.height());
    let mut duplicate_rows = 0usize;
    for row in table.rows() {
        let key: Vec<CellKey> = indices.iter().map(|idx| CellKey::from(&row[*idx])).collect();
        if !seen.insert(key) {
            duplicate_rows += 1;
        }
    }

    if duplicate_rows > 0 {
        return Err(CheckFailure::DuplicateKeys {
            columns: columns.to_vec(),
            duplicate_rows,
        });
    }
    Ok(())
}

/// Each listed column must be unique on its own.
pub fn check_no_duplicates_by_column(
    table: &Table,
    columns: &[String],
) -> Result<(), CheckFailure> {
    let offending = offending_columns(table, columns, |table, idx| {
        let mut seen = HashSet::with_capacity(table.height());
        table
            .rows()
            .iter()
            .any(|row| !seen.insert(CellKey::from(&row[idx])))
    })?;

    if offending.is_empty() {
        Ok(())
    } else {
        Err(CheckFailure::DuplicateValues(offending))
    }
}

pub fn check_no_nulls(table: &Table, columns: &[String]) -> Result<(), CheckFailure> {
    let offending = offending_columns(table, columns, |table, idx| {
        table.rows().iter().any(|row| row[idx].is_null())
    })?;

    if offending.is_empty() {
        Ok(())
    } else {
        Err(CheckFailure::NullColumns(offending))
    }
}

pub fn check_no_negative_values(table: &Table, columns: &[String]) -> Result<(), CheckFailure> {
    let offending = offending_columns(table, columns, |table, idx| {
        table.rows().iter().any(|row| row[idx].is_negative())
    })?;

    if offending.is_empty() {
        Ok(())
    } else {
        Err(CheckFailure::NegativeValueColumns(offending))
    }
}
