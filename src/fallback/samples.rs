//! Sample collection for failing rules. Samples are the first k failing
//! rows in frame order, so `_row_index` values are stable for a given
//! materialization.

use crate::frame::ColumnarFrame;
use crate::options::SampleColumns;
use crate::result::SampleRow;
use crate::rules::Rule;
use serde_json::Map;

/// Key carrying the stable row ordinal in every sample
pub const ROW_INDEX_KEY: &str = "_row_index";

/// Resolve the column set samples carry for one rule
pub fn resolve_sample_columns(
    spec: &SampleColumns,
    rule: &Rule,
    frame: &ColumnarFrame,
) -> Vec<String> {
    let wanted: Vec<String> = match spec {
        SampleColumns::Relevant => rule.kind.required_columns().into_iter().collect(),
        SampleColumns::Columns(cols) => cols.clone(),
    };
    wanted
        .into_iter()
        .filter(|name| frame.column(name).is_some())
        .collect()
}

/// First `cap` failing rows under the violation mask
pub fn collect_row_samples(
    frame: &ColumnarFrame,
    mask: &[bool],
    cap: usize,
    columns: &[String],
) -> Vec<SampleRow> {
    if cap == 0 {
        return Vec::new();
    }
    mask.iter()
        .enumerate()
        .filter(|(_, &violates)| violates)
        .take(cap)
        .map(|(row, _)| {
            let mut sample = Map::new();
            sample.insert(ROW_INDEX_KEY.to_string(), serde_json::json!(row));
            for (name, value) in frame.row_values(row, columns) {
                sample.insert(name, value.to_json());
            }
            sample
        })
        .collect()
}

/// Duplicate-group samples for `unique`: `{_row_index, value, count}`
/// per duplicated value, ordered by first occurrence
pub fn collect_unique_samples(
    duplicates: &[(usize, crate::value::Value, usize)],
    cap: usize,
) -> Vec<SampleRow> {
    duplicates
        .iter()
        .take(cap)
        .map(|(row, value, count)| {
            let mut sample = Map::new();
            sample.insert(ROW_INDEX_KEY.to_string(), serde_json::json!(row));
            sample.insert("value".to_string(), value.to_json());
            sample.insert("count".to_string(), serde_json::json!(count));
            sample
        })
        .collect()
}
