//! # Metadata Preplan
//!
//! Resolves rules from cheap metadata before any data is read: Parquet
//! footer statistics for file handles, catalog facts for databases.
//! Every decision is sound: `ResolvedPass` means local evaluation would
//! find zero violations, `ResolvedFailLowerBound` means it would find at
//! least one. Anything uncertain is `Undecided`.
//!
//! Metadata absence, corruption, or staleness produces `Undecided`,
//! never an error; the affected rules simply continue to the next tier.

pub mod mssql_stats;
pub mod parquet_stats;
pub mod pg_stats;

use crate::dataset::{DatasetHandle, Dialect, FileFormat};
use crate::driver::SqlRunner;
use crate::rules::Rule;
use tracing::debug;

/// Outcome of a metadata resolution attempt for one rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreplanDecision {
    /// Proven: zero violations
    ResolvedPass,
    /// Proven: at least one violation; reported as `failed_count=1`,
    /// never exact
    ResolvedFailLowerBound,
    /// Proven failure with an exact count. Only row-count and
    /// declared-type rules take this path: their counts are exact in
    /// every tier, so the lower-bound convention does not apply.
    ResolvedFailExact { count: u64 },
    /// Metadata cannot prove the outcome; the rule stays open
    Undecided,
}

/// Result of the preplan pass over the metadata candidates
#[derive(Debug, Default)]
pub struct PreplanReport {
    /// (rule_id, decision) per attempted rule, in attempt order
    pub outcomes: Vec<(String, PreplanDecision)>,
    /// Exact dataset row count when the metadata source provides one
    pub row_count: Option<u64>,
}

/// Attempt metadata resolution for the candidate rules. Never fails:
/// any metadata error demotes every candidate to `Undecided`.
pub fn run_preplan(
    handle: &DatasetHandle,
    candidates: &[&Rule],
    runner: Option<&mut dyn SqlRunner>,
) -> PreplanReport {
    let mut report = PreplanReport::default();
    if candidates.is_empty() {
        return report;
    }

    match handle {
        DatasetHandle::File {
            path,
            format: FileFormat::Parquet,
        } => match parquet_stats::read_stats(path) {
            Ok(stats) => {
                report.row_count = Some(stats.num_rows);
                for rule in candidates {
                    let decision = parquet_stats::resolve(&stats, &rule.kind);
                    report.outcomes.push((rule.rule_id.clone(), decision));
                }
            }
            Err(e) => {
                debug!(error = %e, "parquet footer unreadable; preplan undecided");
                undecide_all(&mut report, candidates);
            }
        },
        DatasetHandle::Database { dialect, location } => {
            let facts = runner.and_then(|runner| match dialect {
                Dialect::Postgres => {
                    pg_stats::read_facts(runner, &location.schema, &location.table)
                        .map(CatalogFacts::Postgres)
                        .map_err(|e| debug!(error = %e, "pg catalog read failed"))
                        .ok()
                }
                Dialect::Mssql => {
                    mssql_stats::read_facts(runner, &location.schema, &location.table)
                        .map(CatalogFacts::Mssql)
                        .map_err(|e| debug!(error = %e, "mssql catalog read failed"))
                        .ok()
                }
                _ => None,
            });
            resolve_catalog(&mut report, candidates, facts);
        }
        DatasetHandle::Connection {
            dialect,
            schema,
            table,
            ..
        } => {
            let facts = runner.and_then(|runner| match dialect {
                Dialect::Postgres => pg_stats::read_facts(runner, schema, table)
                    .map(CatalogFacts::Postgres)
                    .map_err(|e| debug!(error = %e, "pg catalog read failed"))
                    .ok(),
                Dialect::Mssql => mssql_stats::read_facts(runner, schema, table)
                    .map(CatalogFacts::Mssql)
                    .map_err(|e| debug!(error = %e, "mssql catalog read failed"))
                    .ok(),
                _ => None,
            });
            resolve_catalog(&mut report, candidates, facts);
        }
        // CSV files carry no statistics; frames never reach the preplan
        _ => undecide_all(&mut report, candidates),
    }

    report
}

enum CatalogFacts {
    Postgres(pg_stats::PgCatalogFacts),
    Mssql(mssql_stats::MssqlCatalogFacts),
}

fn resolve_catalog(report: &mut PreplanReport, candidates: &[&Rule], facts: Option<CatalogFacts>) {
    match facts {
        Some(CatalogFacts::Postgres(facts)) => {
            for rule in candidates {
                report
                    .outcomes
                    .push((rule.rule_id.clone(), pg_stats::resolve(&facts, &rule.kind)));
            }
        }
        Some(CatalogFacts::Mssql(facts)) => {
            for rule in candidates {
                report
                    .outcomes
                    .push((rule.rule_id.clone(), mssql_stats::resolve(&facts, &rule.kind)));
            }
        }
        None => undecide_all(report, candidates),
    }
}

fn undecide_all(report: &mut PreplanReport, candidates: &[&Rule]) {
    for rule in candidates {
        report
            .outcomes
            .push((rule.rule_id.clone(), PreplanDecision::Undecided));
    }
}
