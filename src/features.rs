//! Trailing-window behavioral features for impressions.
//!
//! Every impression is joined with taps on the full
//! `(day, user_id, value_prop, position)` key, then enriched with two
//! aggregate families keyed by `(day, user_id, value_prop)`:
//!
//! - views/clicks over `[day - 20, day)`: the anchor day itself is excluded
//! - payments over `[day - 20, day]`: the anchor day itself is included
//!
//! Aggregates are computed per `(user_id, value_prop)` partition over
//! day-sorted history with binary-searched window bounds. This is equivalent
//! to a bounded self-join evaluated per anchor; same-day duplicates all
//! count, and each duplicate anchor receives the same values. Keys with no
//! in-window history get no aggregate (absent, never zero).

use std::collections::{HashMap, HashSet};

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::normalize::{NormalizedRow, PaymentEvent};

pub const LOOKBACK_DAYS: i64 = 20;

pub const FEATURE_SCHEMA_VERSION: u32 = 1;

pub const OUTPUT_COLUMNS: [&str; 9] = [
    "day",
    "event_data_position",
    "event_data_value_prop",
    "user_id",
    "has_clicked",
    "count_viewed_value_prop",
    "count_clicked_value_prop",
    "count_total_pays",
    "sum_total_pays",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureDType {
    Date,
    Int,
    Text,
    F64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub dtype: FeatureDType,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<FeatureColumn>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },
}

/// Impression after the tap join, with its window start attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseRow {
    pub day: NaiveDate,
    pub user_id: i64,
    pub value_prop: String,
    pub position: i64,
    pub has_clicked: u8,
    pub start_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregateKey {
    pub day: NaiveDate,
    pub user_id: i64,
    pub value_prop: String,
}

impl AggregateKey {
    fn of(row: &BaseRow) -> Self {
        Self {
            day: row.day,
            user_id: row.user_id,
            value_prop: row.value_prop.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewClickAggregate {
    pub count_viewed: u64,
    pub count_clicked: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaymentAggregate {
    pub count_total_pays: u64,
    pub sum_total_pays: f64,
}

/// One output row per input impression. `None` means no in-window
/// activity and is kept distinct from a zero count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRow {
    pub day: NaiveDate,
    pub user_id: i64,
    pub value_prop: String,
    pub position: i64,
    pub has_clicked: u8,
    pub count_viewed_value_prop: Option<u64>,
    pub count_clicked_value_prop: Option<u64>,
    pub count_total_pays: Option<u64>,
    pub sum_total_pays: Option<f64>,
}

pub type ViewClickTable = HashMap<AggregateKey, ViewClickAggregate>;
pub type PaymentTable = HashMap<AggregateKey, PaymentAggregate>;

type PartitionKey<'a> = (i64, &'a str);

/// Saturates at `NaiveDate::MIN` for days near the start of the calendar.
pub fn window_start(day: NaiveDate) -> NaiveDate {
    day.checked_sub_signed(Duration::days(LOOKBACK_DAYS))
        .unwrap_or(NaiveDate::MIN)
}

pub fn build_feature_schema() -> FeatureSchema {
    let columns: Vec<FeatureColumn> = OUTPUT_COLUMNS
        .iter()
        .map(|name| {
            let (dtype, nullable) = match *name {
                "day" => (FeatureDType::Date, false),
                "event_data_value_prop" => (FeatureDType::Text, false),
                "sum_total_pays" => (FeatureDType::F64, true),
                "count_viewed_value_prop" | "count_clicked_value_prop" | "count_total_pays" => {
                    (FeatureDType::Int, true)
                }
                _ => (FeatureDType::Int, false),
            };
            FeatureColumn {
                name: (*name).to_string(),
                dtype,
                nullable,
            }
        })
        .collect();

    let fingerprint = schema_fingerprint(FEATURE_SCHEMA_VERSION, &columns);

    debug!(
        component = "features",
        event = "features.schema.built",
        version = FEATURE_SCHEMA_VERSION,
        column_count = columns.len(),
        fingerprint = %fingerprint
    );

    FeatureSchema {
        version: FEATURE_SCHEMA_VERSION,
        fingerprint,
        columns,
    }
}

/// `actual` is typically read back from a previously written output.
pub fn assert_schema_compatible(
    expected: &FeatureSchema,
    actual: &FeatureSchema,
) -> Result<(), SchemaError> {
    if expected.version != actual.version {
        return Err(SchemaError::VersionMismatch {
            expected: expected.version,
            actual: actual.version,
        });
    }

    if expected.fingerprint != actual.fingerprint {
        return Err(SchemaError::FingerprintMismatch {
            expected: expected.fingerprint.clone(),
            actual: actual.fingerprint.clone(),
        });
    }

    Ok(())
}

/// Left join of impressions with taps on the full four-field key. Taps are
/// treated as a key set, so the output has exactly one row per impression.
pub fn join_taps(impressions: &[NormalizedRow], taps: &[NormalizedRow]) -> Vec<BaseRow> {
    let tapped: HashSet<&NormalizedRow> = taps.iter().collect();

    impressions
        .iter()
        .map(|print| BaseRow {
            day: print.day,
            user_id: print.user_id,
            value_prop: print.value_prop.clone(),
            position: print.position,
            has_clicked: u8::from(tapped.contains(print)),
            start_date: window_start(print.day),
        })
        .collect()
}

/// Prior views and clicks per anchor key over `[start_date, day)`.
pub fn view_click_aggregates(base: &[BaseRow]) -> ViewClickTable {
    let mut partitions: HashMap<PartitionKey<'_>, Vec<(NaiveDate, u8)>> = HashMap::new();
    for row in base {
        partitions
            .entry((row.user_id, row.value_prop.as_str()))
            .or_default()
            .push((row.day, row.has_clicked));
    }
    for history in partitions.values_mut() {
        history.sort_by_key(|(day, _)| *day);
    }

    let mut out = ViewClickTable::new();
    for row in base {
        let key = AggregateKey::of(row);
        if out.contains_key(&key) {
            continue;
        }
        let Some(history) = partitions.get(&(row.user_id, row.value_prop.as_str())) else {
            continue;
        };

        let lo = history.partition_point(|(day, _)| *day < row.start_date);
        let hi = history.partition_point(|(day, _)| *day < row.day);
        if hi <= lo {
            continue;
        }

        let window = &history[lo..hi];
        out.insert(
            key,
            ViewClickAggregate {
                count_viewed: window.len() as u64,
                count_clicked: window.iter().map(|(_, clicked)| u64::from(*clicked)).sum(),
            },
        );
    }

    out
}

/// Payment count and amount per anchor key over `[start_date, day]`.
pub fn payment_aggregates(base: &[BaseRow], payments: &[PaymentEvent]) -> PaymentTable {
    let mut partitions: HashMap<PartitionKey<'_>, Vec<(NaiveDate, f64)>> = HashMap::new();
    for pay in payments {
        partitions
            .entry((pay.user_id, pay.value_prop.as_str()))
            .or_default()
            .push((pay.pay_date, pay.amount));
    }
    for history in partitions.values_mut() {
        history.sort_by_key(|(pay_date, _)| *pay_date);
    }

    let mut out = PaymentTable::new();
    for row in base {
        let key = AggregateKey::of(row);
        if out.contains_key(&key) {
            continue;
        }
        let Some(history) = partitions.get(&(row.user_id, row.value_prop.as_str())) else {
            continue;
        };

        let lo = history.partition_point(|(pay_date, _)| *pay_date < row.start_date);
        let hi = history.partition_point(|(pay_date, _)| *pay_date <= row.day);
        if hi <= lo {
            continue;
        }

        let window = &history[lo..hi];
        out.insert(
            key,
            PaymentAggregate {
                count_total_pays: window.len() as u64,
                sum_total_pays: window.iter().map(|(_, amount)| *amount).sum(),
            },
        );
    }

    out
}

/// Left-joins both aggregate tables onto the base rows, preserving row
/// count and order.
pub fn merge_features(
    base: &[BaseRow],
    view_clicks: &ViewClickTable,
    payments: &PaymentTable,
) -> Vec<EnrichedRow> {
    base.iter()
        .map(|row| {
            let key = AggregateKey::of(row);
            let views = view_clicks.get(&key);
            let pays = payments.get(&key);
            EnrichedRow {
                day: row.day,
                user_id: row.user_id,
                value_prop: row.value_prop.clone(),
                position: row.position,
                has_clicked: row.has_clicked,
                count_viewed_value_prop: views.map(|v| v.count_viewed),
                count_clicked_value_prop: views.map(|v| v.count_clicked),
                count_total_pays: pays.map(|p| p.count_total_pays),
                sum_total_pays: pays.map(|p| p.sum_total_pays),
            }
        })
        .collect()
}

pub fn enrich_features(
    impressions: &[NormalizedRow],
    taps: &[NormalizedRow],
    payments: &[PaymentEvent],
) -> Vec<EnrichedRow> {
    info!(
        component = "features",
        event = "features.enrich.start",
        impressions = impressions.len(),
        taps = taps.len(),
        payments = payments.len(),
        lookback_days = LOOKBACK_DAYS
    );

    let base = join_taps(impressions, taps);
    let view_clicks = view_click_aggregates(&base);
    let pays = payment_aggregates(&base, payments);
    let enriched = merge_features(&base, &view_clicks, &pays);

    info!(
        component = "features",
        event = "features.enrich.finish",
        rows = enriched.len(),
        clicked_rows = base.iter().filter(|row| row.has_clicked == 1).count(),
        view_click_keys = view_clicks.len(),
        payment_keys = pays.len()
    );

    enriched
}

fn schema_fingerprint(version: u32, columns: &[FeatureColumn]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{version};"));
    hasher.update(format!("lookback_days:{LOOKBACK_DAYS};"));
    hasher.update("columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(format!(":{:?}:{};", column.dtype, column.nullable));
    }
    hex::encode(hasher.finalize())
}
