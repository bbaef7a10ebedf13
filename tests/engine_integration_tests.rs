//! End-to-end engine tests over Parquet fixtures and in-memory frames.

use arrow::array::{Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType as ArrowDataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use kontra::{
    Contract, DatasetHandle, Engine, ExecutionOptions, ResultSource, RuleDecl, TierMode,
};
use parquet::arrow::ArrowWriter;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Write a three-column Parquet fixture with footer statistics
fn write_fixture(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("orders.parquet");
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", ArrowDataType::Int64, true),
        Field::new("amount", ArrowDataType::Float64, true),
        Field::new("status", ArrowDataType::Utf8, true),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from(vec![
                Some(1),
                Some(2),
                Some(2),
                Some(4),
                Some(5),
            ])),
            Arc::new(Float64Array::from(vec![
                Some(10.0),
                Some(-3.0),
                None,
                Some(99.5),
                Some(20.0),
            ])),
            Arc::new(StringArray::from(vec![
                Some("paid"),
                Some("void"),
                Some("paid"),
                None,
                Some("paid"),
            ])),
        ],
    )
    .unwrap();
    let file = File::create(&path).unwrap();
    let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
    path
}

fn mixed_contract(path: &std::path::Path) -> Contract {
    Contract::new("orders", path.display().to_string())
        .with_rule(
            RuleDecl::new("not_null")
                .with_param("column", "id")
                .with_tally(true),
        )
        .with_rule(
            RuleDecl::new("unique")
                .with_param("column", "id")
                .with_tally(true),
        )
        .with_rule(
            RuleDecl::new("range")
                .with_param("column", "amount")
                .with_param("min", 0)
                .with_param("max", 100)
                .with_tally(true),
        )
        .with_rule(
            RuleDecl::new("allowed_values")
                .with_param("column", "status")
                .with_param("values", serde_json::json!(["paid", "void", "open"]))
                .with_tally(true),
        )
        .with_rule(RuleDecl::new("min_rows").with_param("threshold", 3))
}

fn options(preplan: TierMode, pushdown: TierMode) -> ExecutionOptions {
    ExecutionOptions {
        preplan,
        pushdown,
        ..ExecutionOptions::default()
    }
}

#[test]
fn test_mixed_contract_over_parquet() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(&dir);
    let engine = Engine::with_defaults();
    let result = engine
        .validate(
            &mixed_contract(&path),
            None,
            &options(TierMode::Auto, TierMode::Auto),
        )
        .unwrap();

    assert_eq!(result.total_rules, 5);
    assert_eq!(result.total_rows, Some(5));
    assert!(!result.passed);

    let by_id = |id: &str| result.rules.iter().find(|r| r.rule_id == id).unwrap();

    // id has no NULLs; footer stats prove it
    let not_null = by_id("COL:id:not_null");
    assert!(not_null.passed);
    assert_eq!(not_null.source, ResultSource::Metadata);

    // one duplicate occurrence of id=2
    let unique = by_id("COL:id:unique");
    assert!(!unique.passed);
    assert_eq!(unique.failed_count, 1);
    assert!(unique.failed_count_exact);

    // -3.0 out of range plus one NULL; footer stats prove at least one
    let range = by_id("COL:amount:range");
    assert!(!range.passed);
    if range.failed_count_exact {
        assert_eq!(range.failed_count, 2);
    } else {
        assert_eq!(range.failed_count, 1);
    }

    // one NULL status violates allowed_values
    let allowed = by_id("COL:status:allowed_values");
    assert!(!allowed.passed);
    assert_eq!(allowed.failed_count, 1);

    let min_rows = by_id("DATASET:min_rows");
    assert!(min_rows.passed);
    assert_eq!(min_rows.source, ResultSource::Metadata);
}

/// Footer statistics alone resolve a satisfied range rule
#[test]
fn test_preplan_resolves_range_from_footer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s1.parquet");
    let schema = Arc::new(Schema::new(vec![Field::new(
        "x",
        ArrowDataType::Int64,
        true,
    )]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![Arc::new(Int64Array::from(vec![Some(1), Some(2), Some(3)]))],
    )
    .unwrap();
    let file = File::create(&path).unwrap();
    let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();

    let contract = Contract::new("s1", path.display().to_string()).with_rule(
        RuleDecl::new("range")
            .with_param("column", "x")
            .with_param("min", 0)
            .with_param("max", 10),
    );
    let engine = Engine::with_defaults();
    let result = engine
        .validate(&contract, None, &ExecutionOptions::default())
        .unwrap();

    let rule = &result.rules[0];
    assert_eq!(rule.source, ResultSource::Metadata);
    assert!(rule.passed);
    assert_eq!(rule.failed_count, 0);
    assert!(!rule.failed_count_exact);
}

/// An exotic regex pattern routes to the local tier and matches a
/// local-only run exactly
#[test]
fn test_exotic_regex_runs_locally() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(&dir);
    let contract = Contract::new("s4", path.display().to_string()).with_rule(
        RuleDecl::new("regex")
            .with_param("column", "status")
            .with_param("pattern", "(?P<x>pa.+)")
            .with_tally(true),
    );
    let engine = Engine::with_defaults();

    let hybrid = engine
        .validate(&contract, None, &options(TierMode::Auto, TierMode::Auto))
        .unwrap();
    let local_only = engine
        .validate(&contract, None, &options(TierMode::Off, TierMode::Off))
        .unwrap();

    assert_eq!(hybrid.rules[0].source, ResultSource::Local);
    assert_eq!(hybrid.rules[0].passed, local_only.rules[0].passed);
    assert_eq!(hybrid.rules[0].failed_count, local_only.rules[0].failed_count);
}

/// Hybrid and local-only runs agree on every pass/fail and on every
/// exact count
#[test]
fn test_hybrid_and_local_runs_agree() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(&dir);
    let contract = mixed_contract(&path);
    let engine = Engine::with_defaults();

    let hybrid = engine
        .validate(&contract, None, &options(TierMode::On, TierMode::On))
        .unwrap();
    let reference = engine
        .validate(&contract, None, &options(TierMode::Off, TierMode::Off))
        .unwrap();

    for (h, r) in hybrid.rules.iter().zip(reference.rules.iter()) {
        assert_eq!(h.rule_id, r.rule_id);
        assert_eq!(h.passed, r.passed, "tier disagreement on {}", h.rule_id);
        if h.failed_count_exact && r.failed_count_exact {
            assert_eq!(h.failed_count, r.failed_count, "count mismatch on {}", h.rule_id);
        }
    }
}

/// The per-call budget caps total samples, earlier rules first
#[test]
fn test_sample_budget_caps_totals() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s6.parquet");
    let schema = Arc::new(Schema::new(vec![
        Field::new("a", ArrowDataType::Int64, true),
        Field::new("b", ArrowDataType::Int64, true),
        Field::new("c", ArrowDataType::Int64, true),
        Field::new("d", ArrowDataType::Int64, true),
        Field::new("e", ArrowDataType::Int64, true),
    ]));
    // Every column entirely NULL: every rule fails on every row
    let nulls: Vec<Option<i64>> = (0..100).map(|_| None).collect();
    let batch = RecordBatch::try_new(
        schema.clone(),
        (0..5)
            .map(|_| Arc::new(Int64Array::from(nulls.clone())) as arrow::array::ArrayRef)
            .collect(),
    )
    .unwrap();
    let file = File::create(&path).unwrap();
    let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();

    let mut contract = Contract::new("s6", path.display().to_string());
    for col in ["a", "b", "c", "d", "e"] {
        contract = contract.with_rule(
            RuleDecl::new("not_null")
                .with_param("column", col)
                .with_tally(true)
                .with_sample(5),
        );
    }
    let engine = Engine::with_defaults();
    let opts = ExecutionOptions {
        // All rules must reach the local tier for samples to exist
        preplan: TierMode::Off,
        pushdown: TierMode::Off,
        sample_budget: 12,
        ..ExecutionOptions::default()
    };
    let result = engine.validate(&contract, None, &opts).unwrap();

    let counts: Vec<usize> = result
        .rules
        .iter()
        .map(|r| r.samples.as_ref().map(Vec::len).unwrap_or(0))
        .collect();
    assert_eq!(counts, vec![5, 5, 2, 0, 0]);
    assert_eq!(counts.iter().sum::<usize>(), 12);
    assert_eq!(
        result.rules[3].samples_reason.as_deref(),
        Some("budget_exhausted")
    );
    // Sample rows carry the stable ordinal
    let first = &result.rules[0].samples.as_ref().unwrap()[0];
    assert_eq!(first["_row_index"], 0);
}

/// Boundary behavior: empty dataset
#[test]
fn test_empty_dataset_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.parquet");
    let schema = Arc::new(Schema::new(vec![Field::new(
        "x",
        ArrowDataType::Int64,
        true,
    )]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![Arc::new(Int64Array::from(Vec::<Option<i64>>::new()))],
    )
    .unwrap();
    let file = File::create(&path).unwrap();
    let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();

    let contract = Contract::new("empty", path.display().to_string())
        .with_rule(
            RuleDecl::new("not_null")
                .with_param("column", "x")
                .with_tally(true),
        )
        .with_rule(RuleDecl::new("min_rows").with_param("threshold", 7))
        .with_rule(RuleDecl::new("max_rows").with_param("threshold", 7));
    let engine = Engine::with_defaults();
    let result = engine
        .validate(&contract, None, &options(TierMode::Off, TierMode::Off))
        .unwrap();

    let by_id = |id: &str| result.rules.iter().find(|r| r.rule_id == id).unwrap();
    let not_null = by_id("COL:x:not_null");
    assert!(not_null.passed);
    assert_eq!(not_null.failed_count, 0);

    let min_rows = by_id("DATASET:min_rows");
    assert!(!min_rows.passed);
    assert_eq!(min_rows.failed_count, 7);
    assert!(min_rows.failed_count_exact);

    assert!(by_id("DATASET:max_rows").passed);
}

/// A dataset of exactly the threshold passes both bound rules
#[test]
fn test_threshold_boundary_exact() {
    let mut frame = kontra::ColumnarFrame::with_schema(&[("x".to_string(), kontra::DataType::Int)]);
    for i in 0..4 {
        frame.push_row(vec![kontra::Value::Int(i)]).unwrap();
    }
    let handle = DatasetHandle::from_frame("t", frame);
    let contract = Contract::new("bounds", "frame://t")
        .with_rule(RuleDecl::new("min_rows").with_param("threshold", 4))
        .with_rule(RuleDecl::new("max_rows").with_param("threshold", 4));
    let engine = Engine::with_defaults();
    let result = engine
        .validate(&contract, Some(&handle), &ExecutionOptions::default())
        .unwrap();
    assert!(result.passed);
}

/// Parquet without footer statistics: the preplan stays undecided and
/// every rule still resolves through a later tier
#[test]
fn test_missing_statistics_fall_through() {
    use parquet::file::properties::{EnabledStatistics, WriterProperties};

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nostats.parquet");
    let schema = Arc::new(Schema::new(vec![Field::new(
        "x",
        ArrowDataType::Int64,
        true,
    )]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![Arc::new(Int64Array::from(vec![Some(1), None, Some(3)]))],
    )
    .unwrap();
    let props = WriterProperties::builder()
        .set_statistics_enabled(EnabledStatistics::None)
        .build();
    let file = File::create(&path).unwrap();
    let mut writer = ArrowWriter::try_new(file, schema, Some(props)).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();

    let contract = Contract::new("nostats", path.display().to_string()).with_rule(
        RuleDecl::new("not_null")
            .with_param("column", "x")
            .with_tally(true),
    );
    let engine = Engine::with_defaults();
    let result = engine
        .validate(&contract, None, &ExecutionOptions::default())
        .unwrap();
    let rule = &result.rules[0];
    // Resolved by a later tier, never by metadata
    assert_ne!(rule.source, ResultSource::Metadata);
    assert!(!rule.passed);
    assert_eq!(rule.failed_count, 1);
}

/// Severity weights produce a quality score; info failures keep the
/// call passing
#[test]
fn test_quality_score_and_severity() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(&dir);
    let mut contract = Contract::new("weighted", path.display().to_string())
        .with_rule(
            RuleDecl::new("range")
                .with_param("column", "amount")
                .with_param("min", 0)
                .with_param("max", 100)
                .with_severity(kontra::Severity::Info)
                .with_tally(true),
        );
    contract.severity_weights = Some(kontra::SeverityWeights::default());
    let engine = Engine::with_defaults();
    let result = engine
        .validate(&contract, None, &options(TierMode::Off, TierMode::Off))
        .unwrap();

    // Info-level failure: overall still passes
    assert!(result.passed);
    assert_eq!(result.failed_count, 1);
    let score = result.quality_score.unwrap();
    // 2 violations out of 5 rows: 1 − 2/5 = 0.6
    assert!((score - 0.6).abs() < 1e-9);
}

/// A missing projected column aborts the call with a data error
#[test]
fn test_missing_column_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(&dir);
    let contract = Contract::new("bad", path.display().to_string()).with_rule(
        RuleDecl::new("not_null")
            .with_param("column", "ghost")
            .with_tally(true),
    );
    let engine = Engine::with_defaults();
    let err = engine
        .validate(&contract, None, &options(TierMode::Off, TierMode::Off))
        .unwrap_err();
    assert_eq!(err.taxonomy(), "data");
    assert!(err.hint().unwrap().contains("amount"));
}

/// CSV datasets run through the same pipeline
#[test]
fn test_csv_dataset_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.csv");
    std::fs::write(&path, "id,name\n1,alice\n2,\n3,carol\n").unwrap();

    let contract = Contract::new("csv", path.display().to_string())
        .with_rule(
            RuleDecl::new("not_null")
                .with_param("column", "name")
                .with_tally(true),
        )
        .with_rule(
            RuleDecl::new("dtype")
                .with_param("column", "id")
                .with_param("type", "int"),
        );
    let engine = Engine::with_defaults();
    let result = engine
        .validate(&contract, None, &options(TierMode::Off, TierMode::Off))
        .unwrap();
    assert_eq!(result.rules[0].failed_count, 1);
    assert!(result.rules[1].passed);
}
