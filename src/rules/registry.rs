//! # Rule Registry
//!
//! Maps variant name strings to parameter validators/constructors. The
//! registry is populated once with the built-in variants at first use
//! and is immutable afterwards, except for explicit extension
//! registration at process start. Registering a variant declares its
//! full capability surface; the planner never special-cases names.

use super::{CompareOp, RuleKind, RuleScope, WhenClause};
use crate::error::{KontraError, KontraResult};
use crate::value::{value_from_json, DataType, Value};
use parking_lot::RwLock;
use serde_json::Map;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

type ParamMap = Map<String, serde_json::Value>;
type Constructor = Arc<dyn Fn(&ParamMap) -> KontraResult<RuleKind> + Send + Sync>;

/// A registered variant: name, scope, and constructor
#[derive(Clone)]
pub struct VariantSpec {
    pub name: String,
    pub scope: RuleScope,
    pub build: Constructor,
}

/// Process-wide variant table
pub struct Registry {
    variants: RwLock<HashMap<String, VariantSpec>>,
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

impl Registry {
    /// The process-wide registry, populated with built-ins on first use
    pub fn global() -> &'static Registry {
        GLOBAL.get_or_init(|| {
            let registry = Registry {
                variants: RwLock::new(HashMap::new()),
            };
            registry.register_builtins();
            registry
        })
    }

    /// Register an additional variant. Intended for process start; the
    /// planner consumes only the declared capability surface.
    pub fn register(&self, spec: VariantSpec) {
        self.variants.write().insert(spec.name.clone(), spec);
    }

    /// Names of all registered variants, sorted
    pub fn variant_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.variants.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Construct a validated `RuleKind` from a declared name + params
    pub fn build(&self, name: &str, params: &ParamMap) -> KontraResult<RuleKind> {
        let spec = self
            .variants
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| {
                KontraError::config_hint(
                    format!("unknown rule '{name}'"),
                    format!("known rules: {}", self.variant_names().join(", ")),
                )
            })?;
        (spec.build)(params)
    }

    fn register_builtins(&self) {
        let mut table = self.variants.write();
        for (name, scope, build) in builtin_variants() {
            table.insert(
                name.to_string(),
                VariantSpec {
                    name: name.to_string(),
                    scope,
                    build,
                },
            );
        }
    }
}

fn builtin_variants() -> Vec<(&'static str, RuleScope, Constructor)> {
    vec![
        ("not_null", RuleScope::Column, Arc::new(build_not_null) as Constructor),
        ("unique", RuleScope::Column, Arc::new(build_unique)),
        ("allowed_values", RuleScope::Column, Arc::new(build_allowed_values)),
        ("disallowed_values", RuleScope::Column, Arc::new(build_disallowed_values)),
        ("range", RuleScope::Column, Arc::new(build_range)),
        ("length", RuleScope::Column, Arc::new(build_length)),
        ("regex", RuleScope::Column, Arc::new(build_regex)),
        ("contains", RuleScope::Column, Arc::new(build_contains)),
        ("starts_with", RuleScope::Column, Arc::new(build_starts_with)),
        ("ends_with", RuleScope::Column, Arc::new(build_ends_with)),
        ("dtype", RuleScope::Column, Arc::new(build_dtype)),
        ("compare", RuleScope::CrossColumn, Arc::new(build_compare)),
        ("conditional_not_null", RuleScope::CrossColumn, Arc::new(build_conditional_not_null)),
        ("conditional_range", RuleScope::CrossColumn, Arc::new(build_conditional_range)),
        ("min_rows", RuleScope::Dataset, Arc::new(build_min_rows)),
        ("max_rows", RuleScope::Dataset, Arc::new(build_max_rows)),
        ("freshness", RuleScope::Dataset, Arc::new(build_freshness)),
        ("custom_sql_check", RuleScope::Dataset, Arc::new(build_custom_sql_check)),
    ]
}

// ---- parameter extraction helpers ----

fn require_str(params: &ParamMap, key: &str, rule: &str) -> KontraResult<String> {
    match params.get(key) {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(other) => Err(KontraError::config(format!(
            "rule '{rule}': parameter '{key}' must be a non-empty string, got {other}"
        ))),
        None => Err(KontraError::config(format!(
            "rule '{rule}': missing required parameter '{key}'"
        ))),
    }
}

fn opt_bool(params: &ParamMap, key: &str, rule: &str) -> KontraResult<Option<bool>> {
    match params.get(key) {
        None => Ok(None),
        Some(serde_json::Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(KontraError::config(format!(
            "rule '{rule}': parameter '{key}' must be a boolean, got {other}"
        ))),
    }
}

fn opt_scalar(params: &ParamMap, key: &str, rule: &str) -> KontraResult<Option<Value>> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => match value_from_json(v) {
            Some(value) => Ok(Some(value)),
            None => Err(KontraError::config(format!(
                "rule '{rule}': parameter '{key}' must be a scalar, got {v}"
            ))),
        },
    }
}

fn opt_u64(params: &ParamMap, key: &str, rule: &str) -> KontraResult<Option<u64>> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| {
            KontraError::config(format!(
                "rule '{rule}': parameter '{key}' must be a nonnegative integer"
            ))
        }),
        Some(other) => Err(KontraError::config(format!(
            "rule '{rule}': parameter '{key}' must be an integer, got {other}"
        ))),
    }
}

fn require_u64(params: &ParamMap, key: &str, rule: &str) -> KontraResult<u64> {
    opt_u64(params, key, rule)?.ok_or_else(|| {
        KontraError::config(format!("rule '{rule}': missing required parameter '{key}'"))
    })
}

fn require_value_list(params: &ParamMap, key: &str, rule: &str) -> KontraResult<Vec<Value>> {
    let raw = params.get(key).ok_or_else(|| {
        KontraError::config(format!("rule '{rule}': missing required parameter '{key}'"))
    })?;
    let arr = raw.as_array().ok_or_else(|| {
        KontraError::config(format!("rule '{rule}': parameter '{key}' must be a list"))
    })?;
    if arr.is_empty() {
        return Err(KontraError::config(format!(
            "rule '{rule}': parameter '{key}' must not be empty"
        )));
    }
    let mut values = Vec::with_capacity(arr.len());
    for item in arr {
        match value_from_json(item) {
            Some(Value::Null) => {
                return Err(KontraError::config_hint(
                    format!("rule '{rule}': NULL is not allowed in '{key}'"),
                    "NULL handling is fixed per variant; use not_null to constrain NULLs",
                ))
            }
            Some(v) => values.push(v),
            None => {
                return Err(KontraError::config(format!(
                    "rule '{rule}': '{key}' entries must be scalars, got {item}"
                )))
            }
        }
    }
    Ok(values)
}

fn check_bounds(min: &Option<Value>, max: &Option<Value>, rule: &str) -> KontraResult<()> {
    if min.is_none() && max.is_none() {
        return Err(KontraError::config(format!(
            "rule '{rule}': at least one of 'min'/'max' is required"
        )));
    }
    if let (Some(lo), Some(hi)) = (min, max) {
        match lo.partial_cmp_coerced(hi) {
            Some(ord) if ord != std::cmp::Ordering::Greater => Ok(()),
            Some(_) => Err(KontraError::config(format!(
                "rule '{rule}': 'min' ({lo}) exceeds 'max' ({hi})"
            ))),
            None => Err(KontraError::config(format!(
                "rule '{rule}': 'min' and 'max' are not comparable"
            ))),
        }
    } else {
        Ok(())
    }
}

fn require_when(params: &ParamMap, rule: &str) -> KontraResult<WhenClause> {
    let raw = params.get("when").ok_or_else(|| {
        KontraError::config(format!("rule '{rule}': missing required parameter 'when'"))
    })?;
    let obj = raw.as_object().ok_or_else(|| {
        KontraError::config_hint(
            format!("rule '{rule}': 'when' must be an object"),
            "expected {column, op, value}",
        )
    })?;
    let column = require_str(obj, "column", rule)?;
    let op_str = require_str(obj, "op", rule)?;
    let op = CompareOp::parse(&op_str).ok_or_else(|| {
        KontraError::config(format!(
            "rule '{rule}': unknown 'when' operator '{op_str}'"
        ))
    })?;
    let value = opt_scalar(obj, "value", rule)?.ok_or_else(|| {
        KontraError::config(format!(
            "rule '{rule}': 'when' requires a non-null 'value'"
        ))
    })?;
    Ok(WhenClause { column, op, value })
}

// ---- builtin constructors ----

fn build_not_null(params: &ParamMap) -> KontraResult<RuleKind> {
    Ok(RuleKind::NotNull {
        column: require_str(params, "column", "not_null")?,
        include_nan: opt_bool(params, "include_nan", "not_null")?.unwrap_or(false),
    })
}

fn build_unique(params: &ParamMap) -> KontraResult<RuleKind> {
    Ok(RuleKind::Unique {
        column: require_str(params, "column", "unique")?,
    })
}

fn build_allowed_values(params: &ParamMap) -> KontraResult<RuleKind> {
    Ok(RuleKind::AllowedValues {
        column: require_str(params, "column", "allowed_values")?,
        values: require_value_list(params, "values", "allowed_values")?,
    })
}

fn build_disallowed_values(params: &ParamMap) -> KontraResult<RuleKind> {
    Ok(RuleKind::DisallowedValues {
        column: require_str(params, "column", "disallowed_values")?,
        values: require_value_list(params, "values", "disallowed_values")?,
    })
}

fn build_range(params: &ParamMap) -> KontraResult<RuleKind> {
    let min = opt_scalar(params, "min", "range")?;
    let max = opt_scalar(params, "max", "range")?;
    check_bounds(&min, &max, "range")?;
    Ok(RuleKind::Range {
        column: require_str(params, "column", "range")?,
        min,
        max,
    })
}

fn build_length(params: &ParamMap) -> KontraResult<RuleKind> {
    let min = opt_u64(params, "min", "length")?;
    let max = opt_u64(params, "max", "length")?;
    if min.is_none() && max.is_none() {
        return Err(KontraError::config(
            "rule 'length': at least one of 'min'/'max' is required",
        ));
    }
    if let (Some(lo), Some(hi)) = (min, max) {
        if lo > hi {
            return Err(KontraError::config(format!(
                "rule 'length': 'min' ({lo}) exceeds 'max' ({hi})"
            )));
        }
    }
    Ok(RuleKind::Length {
        column: require_str(params, "column", "length")?,
        min,
        max,
    })
}

fn build_regex(params: &ParamMap) -> KontraResult<RuleKind> {
    let pattern = require_str(params, "pattern", "regex")?;
    regex::Regex::new(&pattern).map_err(|e| {
        KontraError::config(format!("rule 'regex': invalid pattern '{pattern}': {e}"))
    })?;
    Ok(RuleKind::Regex {
        column: require_str(params, "column", "regex")?,
        pattern,
    })
}

fn build_contains(params: &ParamMap) -> KontraResult<RuleKind> {
    Ok(RuleKind::Contains {
        column: require_str(params, "column", "contains")?,
        literal: require_str(params, "value", "contains")?,
    })
}

fn build_starts_with(params: &ParamMap) -> KontraResult<RuleKind> {
    Ok(RuleKind::StartsWith {
        column: require_str(params, "column", "starts_with")?,
        literal: require_str(params, "value", "starts_with")?,
    })
}

fn build_ends_with(params: &ParamMap) -> KontraResult<RuleKind> {
    Ok(RuleKind::EndsWith {
        column: require_str(params, "column", "ends_with")?,
        literal: require_str(params, "value", "ends_with")?,
    })
}

fn build_dtype(params: &ParamMap) -> KontraResult<RuleKind> {
    let type_name = require_str(params, "type", "dtype")?;
    let expected = DataType::parse(&type_name).ok_or_else(|| {
        KontraError::config_hint(
            format!("rule 'dtype': unknown type '{type_name}'"),
            "supported types: bool, int, float, string, timestamp",
        )
    })?;
    Ok(RuleKind::Dtype {
        column: require_str(params, "column", "dtype")?,
        expected,
    })
}

fn build_compare(params: &ParamMap) -> KontraResult<RuleKind> {
    let op_str = require_str(params, "op", "compare")?;
    let op = CompareOp::parse(&op_str)
        .ok_or_else(|| KontraError::config(format!("rule 'compare': unknown operator '{op_str}'")))?;
    let left = require_str(params, "left", "compare")?;
    let right = require_str(params, "right", "compare")?;
    if left == right {
        return Err(KontraError::config(
            "rule 'compare': 'left' and 'right' must be different columns",
        ));
    }
    Ok(RuleKind::Compare { left, right, op })
}

fn build_conditional_not_null(params: &ParamMap) -> KontraResult<RuleKind> {
    Ok(RuleKind::ConditionalNotNull {
        column: require_str(params, "column", "conditional_not_null")?,
        when: require_when(params, "conditional_not_null")?,
    })
}

fn build_conditional_range(params: &ParamMap) -> KontraResult<RuleKind> {
    let min = opt_scalar(params, "min", "conditional_range")?;
    let max = opt_scalar(params, "max", "conditional_range")?;
    check_bounds(&min, &max, "conditional_range")?;
    Ok(RuleKind::ConditionalRange {
        column: require_str(params, "column", "conditional_range")?,
        when: require_when(params, "conditional_range")?,
        min,
        max,
    })
}

fn build_min_rows(params: &ParamMap) -> KontraResult<RuleKind> {
    Ok(RuleKind::MinRows {
        threshold: require_u64(params, "threshold", "min_rows")?,
    })
}

fn build_max_rows(params: &ParamMap) -> KontraResult<RuleKind> {
    Ok(RuleKind::MaxRows {
        threshold: require_u64(params, "threshold", "max_rows")?,
    })
}

fn build_freshness(params: &ParamMap) -> KontraResult<RuleKind> {
    let max_age = params.get("max_age").ok_or_else(|| {
        KontraError::config("rule 'freshness': missing required parameter 'max_age'")
    })?;
    let seconds = max_age.as_i64().filter(|s| *s > 0).ok_or_else(|| {
        KontraError::config_hint(
            "rule 'freshness': 'max_age' must be a positive integer",
            "max_age is a duration in seconds",
        )
    })?;
    Ok(RuleKind::Freshness {
        column: require_str(params, "column", "freshness")?,
        max_age_seconds: seconds,
    })
}

fn build_custom_sql_check(params: &ParamMap) -> KontraResult<RuleKind> {
    let sql = require_str(params, "sql", "custom_sql_check")?;
    if !sql.contains("{table}") {
        return Err(KontraError::config_hint(
            "rule 'custom_sql_check': query must reference the {table} placeholder",
            "example: SELECT * FROM {table} WHERE amount < 0",
        ));
    }
    Ok(RuleKind::CustomSqlCheck { sql })
}
