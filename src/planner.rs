//! # Planner
//!
//! Compiles a contract into a typed execution plan: validated rules with
//! stable ids, the minimal column projection, per-rule tier assignments
//! driven purely by capability flags, compiled SQL fragments, and
//! compiled local predicates.
//!
//! Per-rule lifecycle: declared → planned → {resolved_by_metadata |
//! resolved_by_sql | demoted_to_local | evaluated_local | errored}.
//! The planner produces the `planned` state; the engine advances it.

use crate::contract::Contract;
use crate::dataset::{DatasetHandle, Dialect};
use crate::driver::RelationTerm;
use crate::error::{KontraError, KontraResult};
use crate::fallback::predicate::{compile as compile_predicate, CompiledPredicate};
use crate::options::ExecutionOptions;
use crate::rules::{derive_rule_id, detect_collisions, Registry, Rule, RuleKind, Semantics};
use crate::sqlgen::{self, RuleSql};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// The tier a rule is assigned to leave the planner with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignedTier {
    Metadata,
    Sql,
    Local,
}

impl std::fmt::Display for AssignedTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssignedTier::Metadata => write!(f, "metadata"),
            AssignedTier::Sql => write!(f, "sql"),
            AssignedTier::Local => write!(f, "local"),
        }
    }
}

/// Compiled execution plan for one validation call
#[derive(Debug)]
pub struct ExecutionPlan {
    /// Validated rules in declared order
    pub rules: Vec<Rule>,
    /// Tier assignment per rule, parallel to `rules`
    pub assignments: Vec<AssignedTier>,
    /// Union of required columns of all non-dataset rules, sorted.
    /// `None` when projection is disabled (full declared set loads).
    pub projected_columns: Option<Vec<String>>,
    pub dialect: Dialect,
    /// The relation SQL statements run against; `None` for frames
    pub relation: Option<RelationTerm>,
    /// Compiled SQL per sql-assigned rule id
    pub sql_batch: HashMap<String, RuleSql>,
    /// Compiled local predicates per row-level rule id
    pub predicate_batch: HashMap<String, CompiledPredicate>,
    pub dataset_row_count_needed: bool,
}

impl ExecutionPlan {
    pub fn assignment_of(&self, rule_id: &str) -> Option<AssignedTier> {
        self.rules
            .iter()
            .position(|r| r.rule_id == rule_id)
            .map(|i| self.assignments[i])
    }

    /// Rules assigned to a tier, declared order preserved
    pub fn rules_in_tier(&self, tier: AssignedTier) -> Vec<&Rule> {
        self.rules
            .iter()
            .zip(&self.assignments)
            .filter(|(_, a)| **a == tier)
            .map(|(r, _)| r)
            .collect()
    }
}

/// Compile a contract against a handle. Config and Data errors abort
/// here, before any I/O.
pub fn compile_plan(
    contract: &Contract,
    handle: &DatasetHandle,
    options: &ExecutionOptions,
) -> KontraResult<ExecutionPlan> {
    let dialect = handle.dialect();
    let registry = Registry::global();

    // Validate parameters and resolve identity
    let mut rules = Vec::with_capacity(contract.rules.len());
    for decl in &contract.rules {
        let kind = registry.build(&decl.name, &decl.params)?;
        rules.push(Rule {
            rule_id: derive_rule_id(decl.id.as_deref(), &kind),
            kind,
            severity: decl.severity,
            tally: options.resolve_tally(decl.tally),
            sample: options.resolve_sample(decl.sample),
            context: decl.context.clone(),
        });
    }
    detect_collisions(&rules)?;

    // Custom SQL bodies are validated at compile time, and need a
    // SQL-capable handle: arbitrary SQL has no local evaluation
    for rule in &rules {
        if let RuleKind::CustomSqlCheck { sql } = &rule.kind {
            if dialect == Dialect::None {
                return Err(KontraError::config_hint(
                    format!("rule '{}' requires a SQL-capable dataset", rule.rule_id),
                    "custom_sql_check cannot run against in-memory frames",
                ));
            }
            sqlgen::validate_custom_sql(sql)?;
        }
    }

    // Column projection: union of required columns
    let projected_columns = if options.projection {
        let union: BTreeSet<String> = rules
            .iter()
            .flat_map(|r| r.kind.required_columns())
            .collect();
        Some(union.into_iter().collect())
    } else {
        None
    };

    let relation = relation_term(handle);

    // Partition by capability, then compile fragments. An emitter that
    // returns Unsupported reassigns its rule to local.
    let mut assignments = Vec::with_capacity(rules.len());
    let mut sql_batch = HashMap::new();
    let relation_sql_text = match (&relation, dialect) {
        (Some(rel), d) if d != Dialect::None => sqlgen::relation_sql(d, rel).ok(),
        _ => None,
    };

    for rule in &rules {
        let tier = assign_tier(rule, dialect, options);
        // SQL fragments compile for metadata candidates too: an
        // undecided preplan outcome falls through to pushdown
        let wants_sql = matches!(tier, AssignedTier::Sql)
            || (matches!(tier, AssignedTier::Metadata)
                && sql_eligible(rule, dialect, options));
        let tier = if wants_sql {
            let rel = relation_sql_text.as_deref().unwrap_or_default();
            match sqlgen::emit(&rule.kind, dialect, rel, options.in_list_max)? {
                RuleSql::Unsupported(reason) => {
                    debug!(rule = %rule.rule_id, reason, "emitter unsupported; assigning local");
                    if tier == AssignedTier::Sql {
                        AssignedTier::Local
                    } else {
                        tier
                    }
                }
                sql => {
                    sql_batch.insert(rule.rule_id.clone(), sql);
                    tier
                }
            }
        } else {
            tier
        };
        assignments.push(tier);
    }

    // Local predicates compile for every row-level rule: any SQL rule
    // can demote at execution time
    let mut predicate_batch = HashMap::new();
    for rule in &rules {
        if crate::fallback::is_row_level(&rule.kind) {
            predicate_batch.insert(rule.rule_id.clone(), compile_predicate(&rule.kind)?);
        }
    }

    let dataset_row_count_needed = rules.iter().any(|r| {
        matches!(r.kind, RuleKind::MinRows { .. } | RuleKind::MaxRows { .. })
    }) || contract.severity_weights.is_some();

    Ok(ExecutionPlan {
        rules,
        assignments,
        projected_columns,
        dialect,
        relation,
        sql_batch,
        predicate_batch,
        dataset_row_count_needed,
    })
}

fn assign_tier(rule: &Rule, dialect: Dialect, options: &ExecutionOptions) -> AssignedTier {
    if options.preplan.enabled() && rule.kind.supports_metadata(dialect) {
        return AssignedTier::Metadata;
    }
    if sql_eligible(rule, dialect, options) {
        return AssignedTier::Sql;
    }
    AssignedTier::Local
}

fn sql_eligible(rule: &Rule, dialect: Dialect, options: &ExecutionOptions) -> bool {
    options.pushdown.enabled()
        && rule.kind.supports_sql(dialect)
        && (rule.kind.semantics(dialect) == Semantics::Strict || options.approximate_sql)
}

fn relation_term(handle: &DatasetHandle) -> Option<RelationTerm> {
    match handle {
        DatasetHandle::File { path, format } => Some(match format {
            crate::dataset::FileFormat::Parquet => RelationTerm::ParquetFile(path.clone()),
            crate::dataset::FileFormat::Csv => RelationTerm::CsvFile(path.clone()),
        }),
        DatasetHandle::Database { location, .. } => Some(RelationTerm::Table {
            schema: location.schema.clone(),
            table: location.table.clone(),
        }),
        DatasetHandle::Connection { schema, table, .. } => Some(RelationTerm::Table {
            schema: schema.clone(),
            table: table.clone(),
        }),
        DatasetHandle::ObjectStore { .. } | DatasetHandle::Frame { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::RuleDecl;
    use crate::frame::ColumnarFrame;
    use serde_json::json;

    fn parquet_handle() -> DatasetHandle {
        DatasetHandle::parse("/data/orders.parquet").unwrap()
    }

    fn contract(rules: Vec<RuleDecl>) -> Contract {
        let mut contract = Contract::new("c", "/data/orders.parquet");
        contract.rules = rules;
        contract
    }

    #[test]
    fn test_projection_is_union_of_required_columns() {
        let contract = contract(vec![
            RuleDecl::new("not_null").with_param("column", "a"),
            RuleDecl::new("compare")
                .with_param("left", "b")
                .with_param("right", "a")
                .with_param("op", "<="),
            RuleDecl::new("min_rows").with_param("threshold", 1),
        ]);
        let plan =
            compile_plan(&contract, &parquet_handle(), &ExecutionOptions::default()).unwrap();
        assert_eq!(
            plan.projected_columns,
            Some(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_projection_off_loads_full_set() {
        let contract = contract(vec![RuleDecl::new("not_null").with_param("column", "a")]);
        let options = ExecutionOptions {
            projection: false,
            ..ExecutionOptions::default()
        };
        let plan = compile_plan(&contract, &parquet_handle(), &options).unwrap();
        assert_eq!(plan.projected_columns, None);
    }

    #[test]
    fn test_partitioning_by_capability() {
        let contract = contract(vec![
            RuleDecl::new("not_null").with_param("column", "a"), // metadata on parquet
            RuleDecl::new("unique").with_param("column", "b"),   // sql
            RuleDecl::new("regex")
                .with_param("column", "d")
                .with_param("pattern", "^x$"), // sql (strict subset)
            RuleDecl::new("dtype")
                .with_param("column", "a")
                .with_param("type", "int"), // metadata
        ]);
        let plan =
            compile_plan(&contract, &parquet_handle(), &ExecutionOptions::default()).unwrap();
        assert_eq!(plan.assignments[0], AssignedTier::Metadata);
        assert_eq!(plan.assignments[1], AssignedTier::Sql);
        assert_eq!(plan.assignments[2], AssignedTier::Sql);
        assert_eq!(plan.assignments[3], AssignedTier::Metadata);
        assert!(plan.sql_batch.contains_key("COL:b:unique"));
    }

    #[test]
    fn test_tiers_off_route_local() {
        let contract = contract(vec![RuleDecl::new("not_null").with_param("column", "a")]);
        let options = ExecutionOptions {
            preplan: crate::options::TierMode::Off,
            pushdown: crate::options::TierMode::Off,
            ..ExecutionOptions::default()
        };
        let plan = compile_plan(&contract, &parquet_handle(), &options).unwrap();
        assert_eq!(plan.assignments[0], AssignedTier::Local);
        assert!(plan.predicate_batch.contains_key("COL:a:not_null"));
    }

    #[test]
    fn test_exotic_regex_demoted_at_compile() {
        let contract = contract(vec![
            RuleDecl::new("regex")
                .with_param("column", "name")
                .with_param("pattern", "(?P<x>.+)"),
        ]);
        let options = ExecutionOptions {
            preplan: crate::options::TierMode::Off,
            ..ExecutionOptions::default()
        };
        let plan = compile_plan(&contract, &parquet_handle(), &options).unwrap();
        // Approximate semantics without approximate_sql: local
        assert_eq!(plan.assignments[0], AssignedTier::Local);
        assert!(plan.sql_batch.is_empty());
    }

    #[test]
    fn test_duplicate_ids_fatal() {
        let contract = contract(vec![
            RuleDecl::new("not_null").with_param("column", "a"),
            RuleDecl::new("not_null").with_param("column", "a"),
        ]);
        let err =
            compile_plan(&contract, &parquet_handle(), &ExecutionOptions::default()).unwrap_err();
        assert!(err.to_string().contains("COL:a:not_null"));
    }

    #[test]
    fn test_unknown_rule_fails_fast() {
        let contract = contract(vec![RuleDecl::new("nope")]);
        let err =
            compile_plan(&contract, &parquet_handle(), &ExecutionOptions::default()).unwrap_err();
        assert_eq!(err.taxonomy(), "config");
    }

    #[test]
    fn test_custom_sql_rejected_on_frame_handle() {
        let handle = DatasetHandle::from_frame("t", ColumnarFrame::empty());
        let contract = contract(vec![RuleDecl::new("custom_sql_check")
            .with_param("sql", "SELECT * FROM {table} WHERE x < 0")]);
        let err = compile_plan(&contract, &handle, &ExecutionOptions::default()).unwrap_err();
        assert_eq!(err.taxonomy(), "config");
    }

    #[test]
    fn test_malformed_custom_sql_aborts_compile() {
        let contract = contract(vec![RuleDecl::new("custom_sql_check")
            .with_param("sql", "DROP TABLE {table}")]);
        let err =
            compile_plan(&contract, &parquet_handle(), &ExecutionOptions::default()).unwrap_err();
        assert_eq!(err.taxonomy(), "config");
    }

    #[test]
    fn test_row_count_need_detected() {
        let plan = compile_plan(
            &contract(vec![RuleDecl::new("max_rows").with_param("threshold", 10)]),
            &parquet_handle(),
            &ExecutionOptions::default(),
        )
        .unwrap();
        assert!(plan.dataset_row_count_needed);

        let plan = compile_plan(
            &contract(vec![RuleDecl::new("not_null").with_param("column", "a")]),
            &parquet_handle(),
            &ExecutionOptions::default(),
        )
        .unwrap();
        assert!(!plan.dataset_row_count_needed);
    }

    #[test]
    fn test_tally_resolution_applied() {
        let contract = contract(vec![
        RuleDecl::new("not_null")
                .with_param("column", "a")
                .with_tally(true),
            RuleDecl::new("unique").with_param("column", "b"),
        ]);
        let plan =
            compile_plan(&contract, &parquet_handle(), &ExecutionOptions::default()).unwrap();
        assert!(plan.rules[0].tally);
        assert!(!plan.rules[1].tally);

        let options = ExecutionOptions {
            tally_override: Some(false),
            ..ExecutionOptions::default()
        };
        let plan = compile_plan(&contract, &parquet_handle(), &options).unwrap();
        assert!(!plan.rules[0].tally);
    }

    #[test]
    fn test_json_extension_example() {
        // json context flows through untouched
        let contract = contract(vec![RuleDecl::new("not_null")
            .with_param("column", "a")
            .with_context("owner", json!({"team": "data"}))]);
        let plan =
            compile_plan(&contract, &parquet_handle(), &ExecutionOptions::default()).unwrap();
        assert_eq!(plan.rules[0].context["owner"]["team"], "data");
    }
}
