use std::path::Path;

use props_etl::{
    Cell, CheckFailure, CheckKind, CheckRegistry, CheckStatus, Expectation, ExpectationSuite,
    Table, ValidationError, PAYS_EXPECTATIONS_FILE, PRINTS_EXPECTATIONS_FILE,
    TAPS_EXPECTATIONS_FILE,
};

fn pays_table(rows: &[(Option<i64>, &str, f64)]) -> Table {
    let mut table = Table::new(["user_id", "value_prop", "total"]).expect("unique columns");
    for (user_id, value_prop, total) in rows {
        table
            .push_row(vec![
                user_id.map(Cell::Int).unwrap_or(Cell::Null),
                Cell::Text((*value_prop).to_string()),
                Cell::Float(*total),
            ])
            .expect("row arity matches");
    }
    table
}

fn strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| (*n).to_string()).collect()
}

#[test]
fn missing_column_is_reported_alongside_other_failures() {
    let table = pays_table(&[(None, "a", -1.0)]);
    let expectations = vec![
        Expectation::new(CheckKind::ColumnsExist, &["user_id", "pay_date"]),
        Expectation::new(CheckKind::NoNulls, &["user_id"]),
        Expectation::new(CheckKind::NoNegativeValues, &["total"]),
    ];

    let report = CheckRegistry::default().evaluate(&table, "PAYS", &expectations);

    assert!(!report.passed());
    assert_eq!(report.failed_count(), 3);
    assert_eq!(
        report.outcomes[0].status,
        CheckStatus::Failed(CheckFailure::MissingColumns(strings(&["pay_date"])))
    );
    assert_eq!(
        report.outcomes[1].status,
        CheckStatus::Failed(CheckFailure::NullColumns(strings(&["user_id"])))
    );
    assert_eq!(
        report.outcomes[2].status,
        CheckStatus::Failed(CheckFailure::NegativeValueColumns(strings(&["total"])))
    );
}

#[test]
fn composite_duplicates_fail_and_unique_keys_pass() {
    let registry = CheckRegistry::default();
    let expectations = vec![Expectation::new(
        CheckKind::NoDuplicates,
        &["user_id", "value_prop"],
    )];

    let duplicated = pays_table(&[(Some(1), "a", 1.0), (Some(1), "a", 2.0)]);
    assert!(!registry
        .evaluate(&duplicated, "PAYS", &expectations)
        .passed());

    let unique = pays_table(&[(Some(1), "a", 1.0), (Some(1), "b", 2.0), (Some(2), "a", 3.0)]);
    assert!(registry.evaluate(&unique, "PAYS", &expectations).passed());
}

#[test]
fn per_column_uniqueness_is_stricter_than_composite() {
    let table = pays_table(&[(Some(1), "a", 1.0), (Some(1), "b", 2.0)]);
    let report = CheckRegistry::default().evaluate(
        &table,
        "PAYS",
        &[Expectation::new(
            CheckKind::NoDuplicatesByColumn,
            &["user_id", "value_prop"],
        )],
    );

    assert_eq!(
        report.outcomes[0].status,
        CheckStatus::Failed(CheckFailure::DuplicateValues(strings(&["user_id"])))
    );
}

#[test]
fn fixing_a_null_makes_no_nulls_pass() {
    let registry = CheckRegistry::default();
    let expectations = vec![Expectation::new(CheckKind::NoNulls, &["user_id"])];

    let broken = pays_table(&[(Some(1), "a", 1.0), (None, "a", 1.0)]);
    assert!(!registry.evaluate(&broken, "PAYS", &expectations).passed());

    let fixed = pays_table(&[(Some(1), "a", 1.0), (Some(2), "a", 1.0)]);
    assert!(registry.evaluate(&fixed, "PAYS", &expectations).passed());
}

#[test]
fn failed_report_converts_to_validation_error_naming_source() {
    let table = pays_table(&[(Some(1), "a", -5.0)]);
    let suite = ExpectationSuite {
        source_name: "PAYS".to_string(),
        expectations: vec![Expectation::new(CheckKind::NoNegativeValues, &["total"])],
    };

    let err = CheckRegistry::default()
        .evaluate_suite(&table, &suite)
        .into_result()
        .expect_err("negative total must fail");
    match err {
        ValidationError::Failed {
            source_name,
            failed_checks,
        } => {
            assert_eq!(source_name, "PAYS");
            assert_eq!(failed_checks, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn shipped_suites_parse_and_name_their_sources() {
    let dir = Path::new("data/expectations");
    for (file, source) in [
        (PRINTS_EXPECTATIONS_FILE, "PRINTS"),
        (TAPS_EXPECTATIONS_FILE, "TAPS"),
        (PAYS_EXPECTATIONS_FILE, "PAYS"),
    ] {
        let suite = ExpectationSuite::load(&dir.join(file)).expect("shipped suite should load");
        assert_eq!(suite.source_name, source);
        assert!(suite
            .expectations
            .iter()
            .all(|e| CheckKind::parse(&e.check).is_some()));
    }
}

#[test]
fn malformed_suite_is_a_config_error() {
    let dir = tempfile::tempdir().expect("temp dir should be created");
    let path = dir.path().join("expected_pays.json");
    std::fs::write(&path, "{\"source_name\": \"PAYS\"}").expect("write config");

    assert!(matches!(
        ExpectationSuite::load(&path),
        Err(ValidationError::ConfigParse { .. })
    ));
    assert!(matches!(
        ExpectationSuite::load(&dir.path().join("missing.json")),
        Err(ValidationError::ConfigIo { .. })
    ));
}
