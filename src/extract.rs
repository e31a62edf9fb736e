//! Raw source reading: line-delimited JSON for impressions and taps, CSV
//! for payments.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{error, info};

use crate::config::PipelineConfig;
use crate::table::{Table, TableError};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("source file not found: {path}")]
    NotFound { path: PathBuf },
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}:{line}: invalid JSON: {source}")]
    Json {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },
    #[error("{path}:{line}: expected a JSON object")]
    NotAnObject { path: PathBuf, line: usize },
    #[error("CSV error in {path}: {source}")]
    Csv { path: PathBuf, source: TableError },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawSources {
    pub prints: Table,
    pub taps: Table,
    pub pays: Table,
}

pub fn extract_sources(config: &PipelineConfig) -> Result<RawSources, ExtractError> {
    let sources = RawSources {
        prints: read_json_lines(&config.prints_path())?,
        taps: read_json_lines(&config.taps_path())?,
        pays: read_csv(&config.pays_path())?,
    };

    info!(
        component = "extract",
        event = "extract.finish",
        prints = sources.prints.height(),
        taps = sources.taps.height(),
        pays = sources.pays.height()
    );

    Ok(sources)
}

/// One JSON object per line; blank lines are ignored.
pub fn read_json_lines(path: &Path) -> Result<Table, ExtractError> {
    let file = open(path)?;
    let mut records: Vec<Map<String, Value>> = Vec::new();

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|source| ExtractError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }

        let value: Value = serde_json::from_str(&line).map_err(|source| ExtractError::Json {
            path: path.to_path_buf(),
            line: line_no,
            source,
        })?;
        match value {
            Value::Object(record) => records.push(record),
            _ => {
                return Err(ExtractError::NotAnObject {
                    path: path.to_path_buf(),
                    line: line_no,
                })
            }
        }
    }

    info!(
        component = "extract",
        event = "extract.json.loaded",
        path = %path.display(),
        rows = records.len()
    );

    Ok(Table::from_json_objects(&records))
}

pub fn read_csv(path: &Path) -> Result<Table, ExtractError> {
    let file = open(path)?;
    let table = Table::from_csv_reader(file).map_err(|source| ExtractError::Csv {
        path: path.to_path_buf(),
        source,
    })?;

    info!(
        component = "extract",
        event = "extract.csv.loaded",
        path = %path.display(),
        rows = table.height(),
        columns = ?table.columns()
    );

    Ok(table)
}

fn open(path: &Path) -> Result<fs::File, ExtractError> {
    if !path.exists() {
        error!(
            component = "extract",
            event = "extract.file.missing",
            path = %path.display()
        );
        return Err(ExtractError::NotFound {
            path: path.to_path_buf(),
        });
    }

    fs::File::open(path).map_err(|source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Cell;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn json_lines_skip_blank_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prints.json");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            "{{\"day\":\"2020-11-01\",\"event_data\":{{\"position\":0,\"value_prop\":\"a\"}},\"user_id\":1}}\n"
        )
        .unwrap();
        writeln!(
            file,
            "{{\"day\":\"2020-11-02\",\"event_data\":{{\"position\":1,\"value_prop\":\"b\"}},\"user_id\":2}}"
        )
        .unwrap();
        drop(file);

        let table = read_json_lines(&path).unwrap();
        assert_eq!(table.height(), 2);
        let users: Vec<&Cell> = table.column("user_id").unwrap().collect();
        assert_eq!(users, vec![&Cell::Int(1), &Cell::Int(2)]);
    }

    #[test]
    fn invalid_json_reports_line_number() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("taps.json");
        fs::write(&path, "{\"day\":\"2020-11-01\"}\n{oops\n").unwrap();

        let err = read_json_lines(&path).unwrap_err();
        assert!(matches!(err, ExtractError::Json { line: 2, .. }));
    }

    #[test]
    fn non_object_lines_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("taps.json");
        fs::write(&path, "[1, 2]\n").unwrap();

        let err = read_json_lines(&path).unwrap_err();
        assert!(matches!(err, ExtractError::NotAnObject { line: 1, .. }));
    }

    #[test]
    fn duplicate_csv_header_is_a_csv_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pays.csv");
        fs::write(&path, "pay_date,total,user_id,user_id\n2020-11-01,1.0,1,2\n").unwrap();

        let err = read_csv(&path).unwrap_err();
        assert!(matches!(
            err,
            ExtractError::Csv {
                source: TableError::DuplicateColumn(_),
                ..
            }
        ));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let err = read_csv(&dir.path().join("pays.csv")).unwrap_err();
        assert!(matches!(err, ExtractError::NotFound { .. }));
    }
}
