//! # Engine
//!
//! Orchestrates one validation call: plan → preplan → pushdown →
//! fallback → merge. Tiers run sequentially; the first tier to resolve
//! a rule wins and later tiers skip it. The deadline is checked before
//! every I/O boundary.
//!
//! Resource ownership is call-scoped: connections the engine opens from
//! a URI are released when the call finishes, caller-supplied
//! connections are borrowed and never closed, and the staging directory
//! is removed on every exit path.

use crate::config::Config;
use crate::contract::Contract;
use crate::dataset::{DatasetHandle, Dialect};
use crate::deadline::Deadline;
use crate::driver::{DuckDbRunner, MssqlRunner, PostgresRunner, SharedRunner, SqlRunner};
use crate::error::{KontraError, KontraResult};
use crate::fallback;
use crate::materialize::{self, Staging};
use crate::merge::{merge, TierResolution};
use crate::options::ExecutionOptions;
use crate::planner::{compile_plan, AssignedTier, ExecutionPlan};
use crate::preplan::{run_preplan, PreplanDecision};
use crate::pushdown::run_pushdown;
use crate::result::{ExecutionStats, ResultSource, RuleResult, ValidationResult};
use crate::rules::Rule;
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;
use tracing::{debug, info};

/// The validation engine. Cheap to construct; one instance serves any
/// number of sequential calls.
pub struct Engine {
    config: Config,
}

/// Engine-owned or caller-borrowed connection for the duration of one
/// call
enum CallRunner {
    Owned(Box<dyn SqlRunner>),
    Borrowed(SharedRunner),
    None,
}

impl CallRunner {
    fn available(&self) -> bool {
        !matches!(self, CallRunner::None)
    }

    fn with<T>(&mut self, f: impl FnOnce(&mut dyn SqlRunner) -> T) -> Option<T> {
        match self {
            CallRunner::Owned(runner) => Some(f(runner.as_mut())),
            CallRunner::Borrowed(shared) => {
                let mut guard = shared.lock();
                Some(f(guard.as_mut()))
            }
            CallRunner::None => None,
        }
    }
}

impl Engine {
    pub fn new(config: Config) -> Self {
        Engine { config }
    }

    /// Engine with built-in defaults (no config files consulted)
    pub fn with_defaults() -> Self {
        Engine::new(Config::default())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Default per-call options seeded from the configuration
    pub fn default_options(&self) -> ExecutionOptions {
        self.config.execution_options()
    }

    /// Compile the execution plan without running anything
    pub fn plan(
        &self,
        contract: &Contract,
        handle_override: Option<&DatasetHandle>,
        options: &ExecutionOptions,
    ) -> KontraResult<ExecutionPlan> {
        let handle = self.resolve_handle(contract, handle_override)?;
        compile_plan(contract, &handle, options)
    }

    /// Run one validation call
    pub fn validate(
        &self,
        contract: &Contract,
        handle_override: Option<&DatasetHandle>,
        options: &ExecutionOptions,
    ) -> KontraResult<ValidationResult> {
        let call_start = Instant::now();
        let deadline = Deadline::new(options.deadline);
        let mut stats = ExecutionStats::default();

        // Resolve the handle; object-store datasets stage first so the
        // preplan can read the local footer. The staging dir lives until
        // the end of the call.
        let handle = self.resolve_handle(contract, handle_override)?;
        let _staging;
        let handle = match &handle {
            DatasetHandle::ObjectStore { url, format } => {
                deadline.check()?;
                let staging = Staging::create(self.config.storage.staging_dir.as_deref())?;
                let staged = materialize::stage_object_store(url, &staging)?;
                _staging = Some(staging);
                DatasetHandle::File {
                    path: staged,
                    format: *format,
                }
            }
            other => {
                _staging = None;
                other.clone()
            }
        };

        // Plan compile: Config/Data errors abort before any further I/O
        let plan_start = Instant::now();
        let plan = compile_plan(contract, &handle, options)?;
        stats.planning_ms = plan_start.elapsed().as_millis() as u64;
        stats.projected_columns = plan
            .projected_columns
            .as_ref()
            .map(Vec::len)
            .unwrap_or_default();
        for tier in &plan.assignments {
            match tier {
                AssignedTier::Metadata => stats.metadata_candidates += 1,
                AssignedTier::Sql => stats.sql_candidates += 1,
                AssignedTier::Local => stats.fallback_assigned += 1,
            }
        }
        debug!(
            contract = %contract.name,
            source = %handle.describe_source(),
            metadata = stats.metadata_candidates,
            sql = stats.sql_candidates,
            local = stats.fallback_assigned,
            "plan compiled"
        );

        if options.dry_run {
            stats.total_ms = call_start.elapsed().as_millis() as u64;
            return Ok(dry_run_result(contract, &plan, stats));
        }

        let mut runner = self.open_runner(&handle, &plan)?;
        let mut resolutions: HashMap<String, TierResolution> = HashMap::new();
        let mut total_rows: Option<u64> = None;

        // Tier 1: metadata preplan
        let preplan_start = Instant::now();
        if options.preplan.enabled() {
            let candidates = plan.rules_in_tier(AssignedTier::Metadata);
            if !candidates.is_empty() {
                deadline.check()?;
                let report = match &mut runner {
                    CallRunner::None => run_preplan(&handle, &candidates, None),
                    runner => runner
                        .with(|r| run_preplan(&handle, &candidates, Some(r)))
                        .unwrap_or_default(),
                };
                total_rows = total_rows.or(report.row_count);
                for (rule_id, decision) in report.outcomes {
                    let resolution = match decision {
                        PreplanDecision::ResolvedPass => TierResolution {
                            source: ResultSource::Metadata,
                            failed_count: 0,
                            exact: false,
                            details: None,
                            error: None,
                        },
                        PreplanDecision::ResolvedFailLowerBound => TierResolution {
                            source: ResultSource::Metadata,
                            failed_count: 1,
                            exact: false,
                            details: None,
                            error: None,
                        },
                        PreplanDecision::ResolvedFailExact { count } => TierResolution {
                            source: ResultSource::Metadata,
                            failed_count: count,
                            exact: true,
                            details: None,
                            error: None,
                        },
                        PreplanDecision::Undecided => continue,
                    };
                    resolutions.insert(rule_id, resolution);
                }
            }
        }
        stats.preplan_ms = preplan_start.elapsed().as_millis() as u64;

        // Tier 2: SQL pushdown over rules still open with a compiled
        // fragment
        let pushdown_start = Instant::now();
        if options.pushdown.enabled() && runner.available() {
            let candidates: Vec<&Rule> = plan
                .rules
                .iter()
                .filter(|r| {
                    !resolutions.contains_key(&r.rule_id)
                        && plan.sql_batch.contains_key(&r.rule_id)
                })
                .collect();
            if !candidates.is_empty() {
                deadline.check()?;
                if let Some(relation) = &plan.relation {
                    let report = runner
                        .with(|r| {
                            run_pushdown(
                                r,
                                relation,
                                &candidates,
                                &plan.sql_batch,
                                plan.dataset_row_count_needed,
                            )
                        })
                        .unwrap_or_default();
                    total_rows = total_rows.or(report.row_count);
                    for (rule_id, outcome) in report.outcomes {
                        resolutions.insert(
                            rule_id,
                            TierResolution {
                                source: ResultSource::Sql,
                                failed_count: outcome.failed_count,
                                exact: outcome.exact,
                                details: None,
                                error: None,
                            },
                        );
                    }
                    if !report.demoted.is_empty() {
                        info!(
                            demoted = report.demoted.len(),
                            "pushdown failure; rules continue locally"
                        );
                    }
                    stats.demoted_rule_ids = report.demoted;
                }
            }
        }
        stats.pushdown_ms = pushdown_start.elapsed().as_millis() as u64;

        // Tier 3: local fallback for everything still open
        let fallback_start = Instant::now();
        let open: Vec<&Rule> = plan
            .rules
            .iter()
            .filter(|r| !resolutions.contains_key(&r.rule_id))
            .collect();
        let mut collected_samples = HashMap::new();
        if !open.is_empty() {
            deadline.check()?;
            let projection = fallback_projection(&plan, &open);
            let frame = match &mut runner {
                CallRunner::None => materialize::materialize(&handle, projection.as_deref(), None)?,
                runner => runner
                    .with(|r| materialize::materialize(&handle, projection.as_deref(), Some(r)))
                    .unwrap_or_else(|| {
                        materialize::materialize(&handle, projection.as_deref(), None)
                    })?,
            };
            stats.materialized_rows = Some(frame.num_rows() as u64);
            total_rows = total_rows.or(Some(frame.num_rows() as u64));

            let report = fallback::run_fallback(
                &frame,
                &open,
                &plan.predicate_batch,
                &options.sample_columns,
                self.config.execution.num_threads,
            )?;
            collected_samples = report.samples;
            for (rule_id, eval) in report.outcomes {
                let resolution = match eval {
                    fallback::LocalEval::Counted {
                        failed_count,
                        exact,
                        details,
                    } => TierResolution {
                        source: ResultSource::Local,
                        failed_count,
                        exact,
                        details,
                        error: None,
                    },
                    fallback::LocalEval::Errored { message } => TierResolution {
                        source: ResultSource::Local,
                        failed_count: 0,
                        exact: false,
                        details: None,
                        error: Some(message),
                    },
                };
                resolutions.insert(rule_id, resolution);
            }
        }
        stats.fallback_ms = fallback_start.elapsed().as_millis() as u64;
        stats.total_ms = call_start.elapsed().as_millis() as u64;

        let result = merge(
            contract,
            &plan,
            &resolutions,
            &mut collected_samples,
            total_rows,
            options.sample_budget,
            stats,
        )?;
        info!(
            contract = %contract.name,
            passed = result.passed,
            failed_rules = result.failed_count,
            "validation finished"
        );
        Ok(result)
    }

    fn resolve_handle(
        &self,
        contract: &Contract,
        handle_override: Option<&DatasetHandle>,
    ) -> KontraResult<DatasetHandle> {
        match handle_override {
            Some(handle) => Ok(handle.clone()),
            None => DatasetHandle::parse(&contract.datasource),
        }
    }

    /// Open the call's connection when a tier will need one. Owned
    /// connections drop at the end of the call; borrowed ones are only
    /// ever locked.
    fn open_runner(&self, handle: &DatasetHandle, plan: &ExecutionPlan) -> KontraResult<CallRunner> {
        let sql_needed = !plan.sql_batch.is_empty();
        Ok(match handle {
            DatasetHandle::File { .. } => {
                if sql_needed {
                    CallRunner::Owned(Box::new(DuckDbRunner::in_memory()?))
                } else {
                    CallRunner::None
                }
            }
            DatasetHandle::Database { dialect, location } => match dialect {
                Dialect::Postgres => {
                    CallRunner::Owned(Box::new(PostgresRunner::connect(location)?))
                }
                Dialect::Mssql => CallRunner::Owned(Box::new(MssqlRunner::connect(location)?)),
                other => {
                    return Err(KontraError::runtime(format!(
                        "no driver for dialect {other}"
                    )))
                }
            },
            DatasetHandle::Connection { runner, .. } => CallRunner::Borrowed(runner.clone()),
            DatasetHandle::Frame { .. } | DatasetHandle::ObjectStore { .. } => CallRunner::None,
        })
    }
}

/// Projection for the fallback tier: the union of required columns of
/// the rules it actually evaluates (not of the whole contract), unless
/// projection is disabled
fn fallback_projection(plan: &ExecutionPlan, open: &[&Rule]) -> Option<Vec<String>> {
    plan.projected_columns.as_ref()?;
    let union: BTreeSet<String> = open
        .iter()
        .flat_map(|r| r.kind.required_columns())
        .collect();
    Some(union.into_iter().collect())
}

fn dry_run_result(
    contract: &Contract,
    plan: &ExecutionPlan,
    stats: ExecutionStats,
) -> ValidationResult {
    let rules: Vec<RuleResult> = plan
        .rules
        .iter()
        .zip(&plan.assignments)
        .map(|(rule, tier)| RuleResult {
            rule_id: rule.rule_id.clone(),
            name: rule.name().to_string(),
            column: rule.column().map(str::to_string),
            severity: rule.severity,
            source: match tier {
                AssignedTier::Metadata => ResultSource::Metadata,
                AssignedTier::Sql => ResultSource::Sql,
                AssignedTier::Local => ResultSource::Local,
            },
            passed: true,
            failed_count: 0,
            failed_count_exact: false,
            violation_rate: None,
            message: format!("dry run: assigned to {tier}"),
            details: None,
            context: (!rule.context.is_empty()).then(|| rule.context.clone()),
            samples: None,
            samples_source: None,
            samples_reason: Some("dry run".to_string()),
            severity_weight: None,
        })
        .collect();
    ValidationResult {
        contract: contract.name.clone(),
        passed: true,
        total_rows: None,
        total_rules: rules.len(),
        failed_count: 0,
        quality_score: None,
        rules,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::RuleDecl;
    use crate::frame::ColumnarFrame;
    use crate::value::{DataType, Value};

    fn frame_handle() -> DatasetHandle {
        let mut frame = ColumnarFrame::with_schema(&[
            ("id".to_string(), DataType::Int),
            ("email".to_string(), DataType::String),
        ]);
        let rows = vec![
            vec![Value::Int(1), Value::string("a@x.io")],
            vec![Value::Int(2), Value::Null],
            vec![Value::Int(2), Value::string("c@x.io")],
        ];
        for row in rows {
            frame.push_row(row).unwrap();
        }
        DatasetHandle::from_frame("users", frame)
    }

    fn contract() -> Contract {
        Contract::new("users", "frame://users")
            .with_rule(
                RuleDecl::new("not_null")
                    .with_param("column", "email")
                    .with_tally(true),
            )
            .with_rule(RuleDecl::new("unique").with_param("column", "id"))
            .with_rule(RuleDecl::new("min_rows").with_param("threshold", 2))
    }

    #[test]
    fn test_validate_in_memory_frame() {
        let engine = Engine::with_defaults();
        let handle = frame_handle();
        let result = engine
            .validate(&contract(), Some(&handle), &ExecutionOptions::default())
            .unwrap();

        assert_eq!(result.total_rules, 3);
        assert_eq!(result.total_rows, Some(3));
        assert!(!result.passed);

        let not_null = &result.rules[0];
        assert_eq!(not_null.failed_count, 1);
        assert!(not_null.failed_count_exact);
        assert_eq!(not_null.source, ResultSource::Local);

        let unique = &result.rules[1];
        assert_eq!(unique.failed_count, 1);

        let min_rows = &result.rules[2];
        assert!(min_rows.passed);
    }

    #[test]
    fn test_dry_run_performs_no_io() {
        let engine = Engine::with_defaults();
        // Datasource path does not exist; dry run must still succeed
        let contract = Contract::new("c", "/nonexistent/orders.parquet")
            .with_rule(RuleDecl::new("not_null").with_param("column", "a"));
        let options = ExecutionOptions {
            dry_run: true,
            ..ExecutionOptions::default()
        };
        let result = engine.validate(&contract, None, &options).unwrap();
        assert!(result.passed);
        assert!(result.rules[0].message.contains("dry run"));
    }

    #[test]
    fn test_deadline_zero_cancels() {
        let engine = Engine::with_defaults();
        let handle = frame_handle();
        let options = ExecutionOptions {
            deadline: Some(std::time::Duration::from_millis(0)),
            ..ExecutionOptions::default()
        };
        std::thread::sleep(std::time::Duration::from_millis(2));
        let err = engine
            .validate(&contract(), Some(&handle), &options)
            .unwrap_err();
        assert_eq!(err.taxonomy(), "cancelled");
    }

    #[test]
    fn test_bad_datasource_is_data_error() {
        let engine = Engine::with_defaults();
        let contract = Contract::new("c", "gs://nope/x.parquet");
        let err = engine
            .validate(&contract, None, &ExecutionOptions::default())
            .unwrap_err();
        assert_eq!(err.taxonomy(), "data");
    }
}
