//! Persists the enriched table: trailing-week filter, fixed column
//! projection, atomic CSV write.
//!
//! Every output CSV has a `<stem>.schema.json` sidecar holding the
//! [`FeatureSchema`] it was written with. An existing output is only
//! replaced when its sidecar matches the current schema.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::features::{
    assert_schema_compatible, build_feature_schema, EnrichedRow, FeatureSchema, SchemaError,
    OUTPUT_COLUMNS,
};
use crate::normalize::DAY_FORMAT;

/// Rows within this many days of the latest day (inclusive) are written.
pub const OUTPUT_TRAILING_DAYS: i64 = 7;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("CSV error writing {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error("invalid output path: {0}")]
    InvalidPath(PathBuf),
    #[error("invalid schema file {path}: {source}")]
    SchemaFile {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("existing output at {path} is incompatible: {source}")]
    IncompatibleSchema { path: PathBuf, source: SchemaError },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub path: PathBuf,
    pub rows_written: usize,
    pub first_day: Option<NaiveDate>,
    pub last_day: Option<NaiveDate>,
    pub schema_path: PathBuf,
    pub schema_fingerprint: String,
}

/// `result_dataset.csv` -> `result_dataset.schema.json`
pub fn schema_path_for(path: &Path) -> PathBuf {
    path.with_extension("schema.json")
}

pub fn read_output_schema(schema_path: &Path) -> Result<FeatureSchema, LoadError> {
    let raw = fs::read(schema_path).map_err(|source| LoadError::Io {
        path: schema_path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&raw).map_err(|source| LoadError::SchemaFile {
        path: schema_path.to_path_buf(),
        source,
    })
}

/// Fails if a previous output was written under a different schema. A
/// missing sidecar is treated as a fresh destination.
pub fn check_output_schema(path: &Path, expected: &FeatureSchema) -> Result<(), LoadError> {
    let schema_path = schema_path_for(path);
    if !schema_path.exists() {
        return Ok(());
    }

    let existing = read_output_schema(&schema_path)?;
    assert_schema_compatible(expected, &existing).map_err(|source| {
        error!(
            component = "load",
            event = "load.schema.incompatible",
            path = %schema_path.display(),
            error = %source
        );
        LoadError::IncompatibleSchema {
            path: schema_path.clone(),
            source,
        }
    })
}

/// Rows with `day >= max(day) - 6`, in input order.
pub fn select_trailing_days(rows: &[EnrichedRow]) -> Vec<&EnrichedRow> {
    let Some(max_day) = rows.iter().map(|row| row.day).max() else {
        return Vec::new();
    };
    let cutoff = max_day
        .checked_sub_signed(Duration::days(OUTPUT_TRAILING_DAYS - 1))
        .unwrap_or(NaiveDate::MIN);
    rows.iter().filter(|row| row.day >= cutoff).collect()
}

pub fn write_enriched_csv<W: Write>(rows: &[&EnrichedRow], writer: W) -> Result<(), csv::Error> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(OUTPUT_COLUMNS)?;
    for row in rows {
        out.write_record(output_record(row))?;
    }
    out.flush()?;
    Ok(())
}

pub fn load_enriched(rows: &[EnrichedRow], path: &Path) -> Result<LoadReport, LoadError> {
    let selected = select_trailing_days(rows);
    let schema = build_feature_schema();
    let schema_path = schema_path_for(path);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| LoadError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    let mut buf = Vec::new();
    write_enriched_csv(&selected, &mut buf).map_err(|source| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    })?;
    check_output_schema(path, &schema)?;
    let schema_json = serde_json::to_vec_pretty(&schema).map_err(|source| LoadError::SchemaFile {
        path: schema_path.clone(),
        source,
    })?;

    write_atomic(path, &buf)?;
    write_atomic(&schema_path, &schema_json)?;

    let report = LoadReport {
        path: path.to_path_buf(),
        rows_written: selected.len(),
        first_day: selected.iter().map(|row| row.day).min(),
        last_day: selected.iter().map(|row| row.day).max(),
        schema_path,
        schema_fingerprint: schema.fingerprint,
    };

    info!(
        component = "load",
        event = "load.finish",
        path = %path.display(),
        input_rows = rows.len(),
        rows_written = report.rows_written,
        first_day = ?report.first_day,
        last_day = ?report.last_day,
        schema_version = schema.version,
        schema_fingerprint = %report.schema_fingerprint
    );

    Ok(report)
}

fn output_record(row: &EnrichedRow) -> [String; 9] {
    [
        row.day.format(DAY_FORMAT).to_string(),
        row.position.to_string(),
        row.value_prop.clone(),
        row.user_id.to_string(),
        row.has_clicked.to_string(),
        optional(row.count_viewed_value_prop),
        optional(row.count_clicked_value_prop),
        optional(row.count_total_pays),
        optional(row.sum_total_pays),
    ]
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), LoadError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| LoadError::InvalidPath(path.to_path_buf()))?;
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));
    let io_err = |source| LoadError::Io {
        path: tmp_path.clone(),
        source,
    };

    {
        let mut file = fs::File::create(&tmp_path).map_err(io_err)?;
        file.write_all(bytes).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
    }

    fs::rename(&tmp_path, path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}
