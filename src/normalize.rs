//! Flattening of nested impression/tap event details and conversion of
//! validated tables into typed rows.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::table::{Cell, Table, TableError};

pub const DAY_FORMAT: &str = "%Y-%m-%d";

pub const DAY_COLUMN: &str = "day";
pub const USER_ID_COLUMN: &str = "user_id";
pub const EVENT_DATA_COLUMN: &str = "event_data";
pub const POSITION_COLUMN: &str = "event_data_position";
pub const VALUE_PROP_COLUMN: &str = "event_data_value_prop";

pub const PAY_DATE_COLUMN: &str = "pay_date";
pub const PAY_VALUE_PROP_COLUMN: &str = "value_prop";
pub const PAY_AMOUNT_COLUMN: &str = "total";

const NESTED_POSITION_FIELD: &str = "position";
const NESTED_VALUE_PROP_FIELD: &str = "value_prop";

pub const NORMALIZED_COLUMNS: [&str; 4] = [
    DAY_COLUMN,
    POSITION_COLUMN,
    VALUE_PROP_COLUMN,
    USER_ID_COLUMN,
];

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("{source_name}: missing column {column}")]
    MissingColumn { source_name: String, column: String },
    #[error("{source_name}: row {row} column {column} has value '{value}', expected YYYY-MM-DD")]
    InvalidDate {
        source_name: String,
        column: String,
        row: usize,
        value: String,
    },
    #[error("{source_name}: row {row} event detail is not an object")]
    NotNested { source_name: String, row: usize },
    #[error("{source_name}: row {row} event detail lacks field {field}")]
    MissingNestedField {
        source_name: String,
        row: usize,
        field: &'static str,
    },
    #[error("{source_name}: row {row} column {column} is null")]
    NullValue {
        source_name: String,
        column: String,
        row: usize,
    },
    #[error("{source_name}: row {row} column {column} is not a valid {expected}")]
    InvalidValue {
        source_name: String,
        column: String,
        row: usize,
        expected: &'static str,
    },
    #[error("table error: {0}")]
    Table(#[from] TableError),
}

/// Canonical projection shared by impressions and taps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NormalizedRow {
    pub day: NaiveDate,
    pub user_id: i64,
    pub value_prop: String,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub user_id: i64,
    pub value_prop: String,
    pub pay_date: NaiveDate,
    pub amount: f64,
}

/// Strict `YYYY-MM-DD`: four-digit year, no sign, no extended years.
pub fn parse_day(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let bytes = raw.as_bytes();
    let well_formed = bytes.len() == 10
        && bytes.iter().enumerate().all(|(idx, b)| match idx {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !well_formed {
        return None;
    }
    NaiveDate::parse_from_str(raw, DAY_FORMAT).ok()
}

/// Flattens `event_data.{position, value_prop}` into top-level columns and
/// parses `day` into a date. Null cells pass through for the validation
/// gate to reject; malformed dates and missing sub-fields fail here.
pub fn normalize_events(raw: &Table, source_name: &str) -> Result<Table, TransformError> {
    let day_idx = require(raw, DAY_COLUMN, source_name)?;
    let user_idx = require(raw, USER_ID_COLUMN, source_name)?;
    let detail_idx = require(raw, EVENT_DATA_COLUMN, source_name)?;

    let mut out = Table::new(NORMALIZED_COLUMNS)?;
    for (row_no, row) in raw.rows().iter().enumerate() {
        let day = date_cell(&row[day_idx], DAY_COLUMN, row_no, source_name)?;
        let detail = match &row[detail_idx] {
            Cell::Nested(Value::Object(detail)) => detail,
            _ => {
                return Err(TransformError::NotNested {
                    source_name: source_name.to_string(),
                    row: row_no,
                })
            }
        };
        let nested = |field: &'static str| {
            detail
                .get(field)
                .map(Cell::from_json)
                .ok_or_else(|| TransformError::MissingNestedField {
                    source_name: source_name.to_string(),
                    row: row_no,
                    field,
                })
        };

        out.push_row(vec![
            day,
            nested(NESTED_POSITION_FIELD)?,
            nested(NESTED_VALUE_PROP_FIELD)?,
            row[user_idx].clone(),
        ])?;
    }

    info!(
        component = "normalize",
        event = "normalize.finish",
        source_name,
        rows = out.height()
    );

    Ok(out)
}

/// Typed view of a normalized impression or tap table.
pub fn normalized_rows(
    table: &Table,
    source_name: &str,
) -> Result<Vec<NormalizedRow>, TransformError> {
    let day_idx = require(table, DAY_COLUMN, source_name)?;
    let user_idx = require(table, USER_ID_COLUMN, source_name)?;
    let position_idx = require(table, POSITION_COLUMN, source_name)?;
    let value_prop_idx = require(table, VALUE_PROP_COLUMN, source_name)?;

    let mut rows = Vec::with_capacity(table.height());
    for (row_no, row) in table.rows().iter().enumerate() {
        let typed = TypedRow {
            row,
            row_no,
            source_name,
        };
        rows.push(NormalizedRow {
            day: typed.date(day_idx, DAY_COLUMN)?,
            user_id: typed.int(user_idx, USER_ID_COLUMN)?,
            value_prop: typed.text(value_prop_idx, VALUE_PROP_COLUMN)?,
            position: typed.int(position_idx, POSITION_COLUMN)?,
        });
    }

    debug!(
        component = "normalize",
        event = "normalize.typed_rows",
        source_name,
        rows = rows.len()
    );
    Ok(rows)
}

/// Typed view of a raw payments table; `pay_date` may still be textual.
pub fn payment_events(
    table: &Table,
    source_name: &str,
) -> Result<Vec<PaymentEvent>, TransformError> {
    let user_idx = require(table, USER_ID_COLUMN, source_name)?;
    let value_prop_idx = require(table, PAY_VALUE_PROP_COLUMN, source_name)?;
    let pay_date_idx = require(table, PAY_DATE_COLUMN, source_name)?;
    let amount_idx = require(table, PAY_AMOUNT_COLUMN, source_name)?;

    let mut events = Vec::with_capacity(table.height());
    for (row_no, row) in table.rows().iter().enumerate() {
        let typed = TypedRow {
            row,
            row_no,
            source_name,
        };
        let pay_date = match date_cell(&row[pay_date_idx], PAY_DATE_COLUMN, row_no, source_name)? {
            Cell::Date(date) => date,
            _ => return Err(typed.null(PAY_DATE_COLUMN)),
        };
        events.push(PaymentEvent {
            user_id: typed.int(user_idx, USER_ID_COLUMN)?,
            value_prop: typed.text(value_prop_idx, PAY_VALUE_PROP_COLUMN)?,
            pay_date,
            amount: typed.float(amount_idx, PAY_AMOUNT_COLUMN)?,
        });
    }

    debug!(
        component = "normalize",
        event = "normalize.payments",
        source_name,
        rows = events.len()
    );
    Ok(events)
}

fn require(table: &Table, column: &str, source_name: &str) -> Result<usize, TransformError> {
    table
        .column_index(column)
        .ok_or_else(|| TransformError::MissingColumn {
            source_name: source_name.to_string(),
            column: column.to_string(),
        })
}

fn date_cell(
    cell: &Cell,
    column: &str,
    row: usize,
    source_name: &str,
) -> Result<Cell, TransformError> {
    match cell {
        Cell::Null => Ok(Cell::Null),
        Cell::Date(date) => Ok(Cell::Date(*date)),
        Cell::Text(raw) => parse_day(raw)
            .map(Cell::Date)
            .ok_or_else(|| TransformError::InvalidDate {
                source_name: source_name.to_string(),
                column: column.to_string(),
                row,
                value: raw.clone(),
            }),
        other => Err(TransformError::InvalidDate {
            source_name: source_name.to_string(),
            column: column.to_string(),
            row,
            value: format!("{other:?}"),
        }),
    }
}

struct TypedRow<'a> {
    row: &'a [Cell],
    row_no: usize,
    source_name: &'a str,
}

impl TypedRow<'_> {
    fn null(&self, column: &str) -> TransformError {
        TransformError::NullValue {
            source_name: self.source_name.to_string(),
            column: column.to_string(),
            row: self.row_no,
        }
    }

    fn invalid(&self, column: &str, expected: &'static str) -> TransformError {
        TransformError::InvalidValue {
            source_name: self.source_name.to_string(),
            column: column.to_string(),
            row: self.row_no,
            expected,
        }
    }

    fn non_null(&self, idx: usize, column: &str) -> Result<&Cell, TransformError> {
        let cell = &self.row[idx];
        if cell.is_null() {
            Err(self.null(column))
        } else {
            Ok(cell)
        }
    }

    fn int(&self, idx: usize, column: &str) -> Result<i64, TransformError> {
        self.non_null(idx, column)?
            .as_i64()
            .ok_or_else(|| self.invalid(column, "integer"))
    }

    fn float(&self, idx: usize, column: &str) -> Result<f64, TransformError> {
        self.non_null(idx, column)?
            .as_f64()
            .ok_or_else(|| self.invalid(column, "number"))
    }

    fn text(&self, idx: usize, column: &str) -> Result<String, TransformError> {
        self.non_null(idx, column)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.invalid(column, "string"))
    }

    fn date(&self, idx: usize, column: &str) -> Result<NaiveDate, TransformError> {
        self.non_null(idx, column)?
            .as_date()
            .ok_or_else(|| self.invalid(column, "date"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn raw_events(records: Vec<Value>) -> Table {
        let records: Vec<Map<String, Value>> = records
            .into_iter()
            .map(|v| match v {
                Value::Object(map) => map,
                _ => panic!("expected object"),
            })
            .collect();
        Table::from_json_objects(&records)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn flattens_nested_detail_and_parses_day() {
        let raw = raw_events(vec![json!({
            "day": "2020-11-01",
            "event_data": {"position": 0, "value_prop": "cellphone_recharge"},
            "user_id": 98702
        })]);

        let normalized = normalize_events(&raw, "PRINTS").unwrap();
        assert_eq!(normalized.columns(), &NORMALIZED_COLUMNS);

        let rows = normalized_rows(&normalized, "PRINTS").unwrap();
        assert_eq!(
            rows,
            vec![NormalizedRow {
                day: date(2020, 11, 1),
                user_id: 98702,
                value_prop: "cellphone_recharge".to_string(),
                position: 0,
            }]
        );
    }

    #[test]
    fn malformed_day_is_a_transform_error() {
        let raw = raw_events(vec![json!({
            "day": "01/11/2020",
            "event_data": {"position": 0, "value_prop": "a"},
            "user_id": 1
        })]);

        let err = normalize_events(&raw, "TAPS").unwrap_err();
        assert!(matches!(err, TransformError::InvalidDate { row: 0, .. }));
    }

    #[test]
    fn parse_day_accepts_only_four_digit_years() {
        assert_eq!(
            parse_day(" 2020-11-01 "),
            NaiveDate::from_ymd_opt(2020, 11, 1)
        );
        assert_eq!(parse_day("-262143-01-05"), None);
        assert_eq!(parse_day("+2020-11-01"), None);
        assert_eq!(parse_day("20201-11-01"), None);
        assert_eq!(parse_day("2020-1-01"), None);
        assert_eq!(parse_day("2020-02-30"), None);
    }

    #[test]
    fn extended_year_is_a_transform_error() {
        let raw = raw_events(vec![json!({
            "day": "-262143-01-05",
            "event_data": {"position": 0, "value_prop": "prepaid"},
            "user_id": 1
        })]);

        let err = normalize_events(&raw, "PRINTS").unwrap_err();
        assert!(matches!(err, TransformError::InvalidDate { row: 0, .. }));
    }

    #[test]
    fn missing_nested_field_is_a_transform_error() {
        let raw = raw_events(vec![json!({
            "day": "2020-11-01",
            "event_data": {"position": 0},
            "user_id": 1
        })]);

        let err = normalize_events(&raw, "PRINTS").unwrap_err();
        assert!(matches!(
            err,
            TransformError::MissingNestedField {
                field: "value_prop",
                ..
            }
        ));
    }

    #[test]
    fn null_user_id_survives_normalization_but_not_typing() {
        let raw = raw_events(vec![json!({
            "day": "2020-11-01",
            "event_data": {"position": 1, "value_prop": "a"},
            "user_id": null
        })]);

        let normalized = normalize_events(&raw, "PRINTS").unwrap();
        assert!(normalized.rows()[0][3].is_null());
        assert!(matches!(
            normalized_rows(&normalized, "PRINTS").unwrap_err(),
            TransformError::NullValue { .. }
        ));
    }

    #[test]
    fn payments_parse_textual_dates_and_integer_totals() {
        let body = "pay_date,total,user_id,value_prop\n2020-11-01,7,35994,link_cobro\n";
        let table = Table::from_csv_reader(body.as_bytes()).unwrap();

        let events = payment_events(&table, "PAYS").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pay_date, date(2020, 11, 1));
        assert_eq!(events[0].amount, 7.0);
        assert_eq!(events[0].value_prop, "link_cobro");
    }
}
