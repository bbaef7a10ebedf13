//! Parquet footer statistics and the file-side decision matrix.
//!
//! Row-group `null_count`, `min`, and `max` are combined across all row
//! groups: a pass needs every row group to prove it, a fail needs one
//! row group to prove a violating row exists.

use super::PreplanDecision;
use crate::error::KontraResult;
use crate::frame::arrow_to_data_type;
use crate::value::{DataType, Value};
use parquet::arrow::parquet_to_arrow_schema;
use parquet::basic::{LogicalType, TimeUnit as ParquetTimeUnit};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::file::statistics::Statistics;
use crate::rules::RuleKind;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

/// Per-row-group statistics for one column
#[derive(Debug, Clone, Default)]
pub struct RowGroupColumnStats {
    pub null_count: Option<u64>,
    pub min: Option<Value>,
    pub max: Option<Value>,
}

/// Everything the file-side decision matrix consumes
#[derive(Debug, Default)]
pub struct ParquetStats {
    pub num_rows: u64,
    /// Column name → one stats record per row group
    pub columns: HashMap<String, Vec<RowGroupColumnStats>>,
    /// Declared schema (for dtype resolution)
    pub schema: Vec<(String, DataType)>,
}

/// Read footer statistics without touching row data
pub fn read_stats(path: &Path) -> KontraResult<ParquetStats> {
    let file = File::open(path)?;
    let reader = SerializedFileReader::new(file)?;
    let metadata = reader.metadata();
    let file_meta = metadata.file_metadata();

    let arrow_schema = parquet_to_arrow_schema(file_meta.schema_descr(), None)?;
    let schema: Vec<(String, DataType)> = arrow_schema
        .fields()
        .iter()
        .filter_map(|field| {
            arrow_to_data_type(field.data_type())
                .ok()
                .map(|dt| (field.name().clone(), dt))
        })
        .collect();

    let descr = file_meta.schema_descr();
    let mut columns: HashMap<String, Vec<RowGroupColumnStats>> = HashMap::new();
    for rg in metadata.row_groups() {
        for (idx, col_meta) in rg.columns().iter().enumerate() {
            let name = descr.column(idx).name().to_string();
            let entry = columns.entry(name).or_default();
            let logical = descr.column(idx).logical_type();
            entry.push(match col_meta.statistics() {
                Some(stats) => convert_stats(stats, logical.as_ref()),
                None => RowGroupColumnStats::default(),
            });
        }
    }

    Ok(ParquetStats {
        num_rows: file_meta.num_rows().max(0) as u64,
        columns,
        schema,
    })
}

fn convert_stats(stats: &Statistics, logical: Option<&LogicalType>) -> RowGroupColumnStats {
    let null_count = stats.null_count_opt();
    let (min, max) = match stats {
        Statistics::Int32(s) => (
            s.min_opt().map(|v| Value::Int(*v as i64)),
            s.max_opt().map(|v| Value::Int(*v as i64)),
        ),
        Statistics::Int64(s) => {
            let convert = |v: &i64| match logical {
                Some(LogicalType::Timestamp { unit, .. }) => {
                    Value::Timestamp(to_millis(unit, *v))
                }
                _ => Value::Int(*v),
            };
            (s.min_opt().map(convert), s.max_opt().map(convert))
        }
        Statistics::Float(s) => (
            s.min_opt().map(|v| Value::Float(*v as f64)),
            s.max_opt().map(|v| Value::Float(*v as f64)),
        ),
        Statistics::Double(s) => (
            s.min_opt().map(|v| Value::Float(*v)),
            s.max_opt().map(|v| Value::Float(*v)),
        ),
        Statistics::ByteArray(s) => (
            s.min_opt().and_then(|v| v.as_utf8().ok().map(Value::string)),
            s.max_opt().and_then(|v| v.as_utf8().ok().map(Value::string)),
        ),
        // Boolean and fixed-len stats: null counts are still usable
        _ => (None, None),
    };
    RowGroupColumnStats {
        null_count,
        min,
        max,
    }
}

fn to_millis(unit: &ParquetTimeUnit, v: i64) -> i64 {
    match unit {
        ParquetTimeUnit::MILLIS(_) => v,
        ParquetTimeUnit::MICROS(_) => v / 1000,
        ParquetTimeUnit::NANOS(_) => v / 1_000_000,
    }
}

/// The file-side decision matrix
pub fn resolve(stats: &ParquetStats, rule: &RuleKind) -> PreplanDecision {
    match rule {
        RuleKind::NotNull {
            column,
            include_nan,
        } => {
            let groups = match stats.columns.get(column) {
                Some(groups) => groups,
                None => return PreplanDecision::Undecided,
            };
            if groups
                .iter()
                .any(|g| g.null_count.is_some_and(|n| n >= 1))
            {
                return PreplanDecision::ResolvedFailLowerBound;
            }
            // NaN presence is invisible to footer stats; a pass cannot be
            // proven when NaNs also count as violations
            if *include_nan {
                return PreplanDecision::Undecided;
            }
            if groups.iter().all(|g| g.null_count == Some(0)) {
                PreplanDecision::ResolvedPass
            } else {
                PreplanDecision::Undecided
            }
        }

        RuleKind::Range { column, min, max } => {
            let groups = match stats.columns.get(column) {
                Some(groups) => groups,
                None => return PreplanDecision::Undecided,
            };
            // NULL violates range, so any proven NULL is a proven failure
            if groups
                .iter()
                .any(|g| g.null_count.is_some_and(|n| n >= 1))
            {
                return PreplanDecision::ResolvedFailLowerBound;
            }
            // A row group living entirely outside a bound proves a failure
            let entirely_outside = groups.iter().any(|g| {
                let below = match (min, &g.max) {
                    (Some(bound), Some(rg_max)) => rg_max
                        .partial_cmp_coerced(bound)
                        .is_some_and(|o| o == std::cmp::Ordering::Less),
                    _ => false,
                };
                let above = match (max, &g.min) {
                    (Some(bound), Some(rg_min)) => rg_min
                        .partial_cmp_coerced(bound)
                        .is_some_and(|o| o == std::cmp::Ordering::Greater),
                    _ => false,
                };
                below || above
            });
            if entirely_outside {
                return PreplanDecision::ResolvedFailLowerBound;
            }
            // A pass needs every row group proven inside both bounds with
            // zero NULLs
            let all_inside = groups.iter().all(|g| {
                if g.null_count != Some(0) {
                    return false;
                }
                let min_ok = match (min, &g.min) {
                    (Some(bound), Some(rg_min)) => rg_min
                        .partial_cmp_coerced(bound)
                        .is_some_and(|o| o != std::cmp::Ordering::Less),
                    (None, _) => true,
                    _ => false,
                };
                let max_ok = match (max, &g.max) {
                    (Some(bound), Some(rg_max)) => rg_max
                        .partial_cmp_coerced(bound)
                        .is_some_and(|o| o != std::cmp::Ordering::Greater),
                    (None, _) => true,
                    _ => false,
                };
                min_ok && max_ok
            });
            if all_inside {
                PreplanDecision::ResolvedPass
            } else {
                PreplanDecision::Undecided
            }
        }

        RuleKind::MinRows { threshold } => {
            if stats.num_rows >= *threshold {
                PreplanDecision::ResolvedPass
            } else {
                PreplanDecision::ResolvedFailExact {
                    count: threshold - stats.num_rows,
                }
            }
        }

        RuleKind::MaxRows { threshold } => {
            if stats.num_rows <= *threshold {
                PreplanDecision::ResolvedPass
            } else {
                PreplanDecision::ResolvedFailExact {
                    count: stats.num_rows - threshold,
                }
            }
        }

        RuleKind::Dtype { column, expected } => {
            match stats.schema.iter().find(|(name, _)| name == column) {
                Some((_, actual)) if actual == expected => PreplanDecision::ResolvedPass,
                Some(_) => PreplanDecision::ResolvedFailExact { count: 1 },
                None => PreplanDecision::Undecided,
            }
        }

        _ => PreplanDecision::Undecided,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats_with(groups: Vec<RowGroupColumnStats>) -> ParquetStats {
        let mut columns = HashMap::new();
        columns.insert("x".to_string(), groups);
        ParquetStats {
            num_rows: 100,
            columns,
            schema: vec![("x".to_string(), DataType::Int)],
        }
    }

    fn group(nulls: Option<u64>, min: Option<i64>, max: Option<i64>) -> RowGroupColumnStats {
        RowGroupColumnStats {
            null_count: nulls,
            min: min.map(Value::Int),
            max: max.map(Value::Int),
        }
    }

    fn not_null() -> RuleKind {
        RuleKind::NotNull {
            column: "x".into(),
            include_nan: false,
        }
    }

    fn range(min: i64, max: i64) -> RuleKind {
        RuleKind::Range {
            column: "x".into(),
            min: Some(Value::Int(min)),
            max: Some(Value::Int(max)),
        }
    }

    #[test]
    fn test_not_null_pass_and_fail() {
        let stats = stats_with(vec![group(Some(0), None, None), group(Some(0), None, None)]);
        assert_eq!(resolve(&stats, &not_null()), PreplanDecision::ResolvedPass);

        let stats = stats_with(vec![group(Some(0), None, None), group(Some(3), None, None)]);
        assert_eq!(
            resolve(&stats, &not_null()),
            PreplanDecision::ResolvedFailLowerBound
        );
    }

    #[test]
    fn test_not_null_missing_stats_undecided() {
        let stats = stats_with(vec![group(None, None, None)]);
        assert_eq!(resolve(&stats, &not_null()), PreplanDecision::Undecided);
    }

    #[test]
    fn test_include_nan_blocks_resolved_pass() {
        let stats = stats_with(vec![group(Some(0), Some(1), Some(5))]);
        let rule = RuleKind::NotNull {
            column: "x".into(),
            include_nan: true,
        };
        assert_eq!(resolve(&stats, &rule), PreplanDecision::Undecided);
    }

    #[test]
    fn test_range_all_inside_passes() {
        let stats = stats_with(vec![group(Some(0), Some(1), Some(5)), group(Some(0), Some(2), Some(9))]);
        assert_eq!(resolve(&stats, &range(0, 10)), PreplanDecision::ResolvedPass);
    }

    #[test]
    fn test_range_group_entirely_outside_fails() {
        let stats = stats_with(vec![group(Some(0), Some(50), Some(60))]);
        assert_eq!(
            resolve(&stats, &range(0, 10)),
            PreplanDecision::ResolvedFailLowerBound
        );
    }

    #[test]
    fn test_range_straddling_bound_undecided() {
        let stats = stats_with(vec![group(Some(0), Some(5), Some(15))]);
        assert_eq!(resolve(&stats, &range(0, 10)), PreplanDecision::Undecided);
    }

    #[test]
    fn test_range_null_proves_failure() {
        let stats = stats_with(vec![group(Some(2), Some(1), Some(5))]);
        assert_eq!(
            resolve(&stats, &range(0, 10)),
            PreplanDecision::ResolvedFailLowerBound
        );
    }

    #[test]
    fn test_row_count_rules_exact() {
        let stats = stats_with(vec![]);
        assert_eq!(
            resolve(&stats, &RuleKind::MinRows { threshold: 150 }),
            PreplanDecision::ResolvedFailExact { count: 50 }
        );
        assert_eq!(
            resolve(&stats, &RuleKind::MaxRows { threshold: 150 }),
            PreplanDecision::ResolvedPass
        );
    }

    #[test]
    fn test_dtype_from_schema() {
        let stats = stats_with(vec![]);
        assert_eq!(
            resolve(
                &stats,
                &RuleKind::Dtype {
                    column: "x".into(),
                    expected: DataType::Int
                }
            ),
            PreplanDecision::ResolvedPass
        );
        assert_eq!(
            resolve(
                &stats,
                &RuleKind::Dtype {
                    column: "x".into(),
                    expected: DataType::String
                }
            ),
            PreplanDecision::ResolvedFailExact { count: 1 }
        );
    }

    #[test]
    fn test_other_rules_undecided() {
        let stats = stats_with(vec![group(Some(0), Some(1), Some(5))]);
        assert_eq!(
            resolve(&stats, &RuleKind::Unique { column: "x".into() }),
            PreplanDecision::Undecided
        );
    }
}
