//! # Result Merger
//!
//! Assembles one `RuleResult` per declared rule, in declared order,
//! from whichever tier resolved it first. Applies the per-call sample
//! budget in declared order and computes the weighted quality score.

use crate::contract::Contract;
use crate::error::{KontraError, KontraResult};
use crate::fallback::is_row_level;
use crate::planner::ExecutionPlan;
use crate::result::{
    ExecutionStats, ResultSource, RuleResult, SampleRow, ValidationResult,
};
use crate::rules::RuleKind;
use std::collections::HashMap;

/// A rule's resolution from whichever tier won it
#[derive(Debug, Clone)]
pub struct TierResolution {
    pub source: ResultSource,
    pub failed_count: u64,
    pub exact: bool,
    pub details: Option<serde_json::Value>,
    /// Per-rule evaluation error; forces `passed=false, failed_count=0`
    pub error: Option<String>,
}

/// Merge tier outputs into the final result
pub fn merge(
    contract: &Contract,
    plan: &ExecutionPlan,
    resolutions: &HashMap<String, TierResolution>,
    collected_samples: &mut HashMap<String, Vec<SampleRow>>,
    total_rows: Option<u64>,
    sample_budget: usize,
    mut stats: ExecutionStats,
) -> KontraResult<ValidationResult> {
    let weights = contract.severity_weights;
    let mut rules_out = Vec::with_capacity(plan.rules.len());
    let mut budget_left = sample_budget;

    for rule in &plan.rules {
        let resolution = resolutions.get(&rule.rule_id).ok_or_else(|| {
            KontraError::runtime(format!(
                "no tier produced a result for rule '{}'",
                rule.rule_id
            ))
        })?;

        match resolution.source {
            ResultSource::Metadata => stats.resolved_by_metadata += 1,
            ResultSource::Sql => stats.resolved_by_sql += 1,
            ResultSource::Local => stats.evaluated_local += 1,
        }

        let (passed, failed_count, exact, message) = match &resolution.error {
            Some(message) => (false, 0, false, message.clone()),
            None => {
                let failed = resolution.failed_count;
                let message = if failed == 0 {
                    "no violations detected".to_string()
                } else if resolution.exact {
                    format!("{failed} violation(s)")
                } else {
                    "at least 1 violation detected".to_string()
                };
                (failed == 0, failed, resolution.exact, message)
            }
        };

        let row_level = is_row_level(&rule.kind) || matches!(rule.kind, RuleKind::Unique { .. });
        let violation_rate = match (row_level, exact, total_rows) {
            (true, true, Some(rows)) if rows > 0 => {
                Some(failed_count as f64 / rows as f64)
            }
            _ => None,
        };

        let (samples, samples_source, samples_reason) = attach_samples(
            rule.sample,
            passed,
            resolution.source,
            collected_samples.remove(&rule.rule_id),
            sample_budget,
            &mut budget_left,
        );

        rules_out.push(RuleResult {
            rule_id: rule.rule_id.clone(),
            name: rule.name().to_string(),
            column: rule.column().map(str::to_string),
            severity: rule.severity,
            source: resolution.source,
            passed,
            failed_count,
            failed_count_exact: exact,
            violation_rate,
            message,
            details: resolution.details.clone(),
            context: (!rule.context.is_empty()).then(|| rule.context.clone()),
            samples,
            samples_source,
            samples_reason,
            severity_weight: weights.map(|w| w.weight(rule.severity)),
        });
    }

    let passed = rules_out
        .iter()
        .filter(|r| r.severity == crate::contract::Severity::Blocking)
        .all(|r| r.passed);
    let failed_count = rules_out.iter().filter(|r| !r.passed).count();

    // quality_score = 1 − Σ(failed × weight) / (total_rows × Σ weight),
    // over rules that ran against row-level data
    let quality_score = match (weights, total_rows) {
        (Some(weights), Some(rows)) if rows > 0 => {
            let row_level: Vec<&RuleResult> = plan
                .rules
                .iter()
                .zip(&rules_out)
                .filter(|(rule, _)| {
                    is_row_level(&rule.kind) || matches!(rule.kind, RuleKind::Unique { .. })
                })
                .map(|(_, out)| out)
                .collect();
            let weight_sum: f64 = row_level
                .iter()
                .map(|r| weights.weight(r.severity))
                .sum();
            if weight_sum > 0.0 {
                let weighted_failures: f64 = row_level
                    .iter()
                    .map(|r| r.failed_count as f64 * weights.weight(r.severity))
                    .sum();
                Some((1.0 - weighted_failures / (rows as f64 * weight_sum)).clamp(0.0, 1.0))
            } else {
                None
            }
        }
        _ => None,
    };

    Ok(ValidationResult {
        contract: contract.name.clone(),
        passed,
        total_rows,
        total_rules: rules_out.len(),
        failed_count,
        quality_score,
        rules: rules_out,
        stats,
    })
}

type SampleAttachment = (
    Option<Vec<SampleRow>>,
    Option<ResultSource>,
    Option<String>,
);

fn attach_samples(
    sample_cap: usize,
    passed: bool,
    source: ResultSource,
    collected: Option<Vec<SampleRow>>,
    budget: usize,
    budget_left: &mut usize,
) -> SampleAttachment {
    if sample_cap == 0 {
        return (None, None, Some("sampling disabled".to_string()));
    }
    if passed {
        return (None, None, Some("no failing rows".to_string()));
    }
    let mut rows = match collected {
        Some(rows) if !rows.is_empty() => rows,
        _ => {
            // Metadata/SQL resolutions never carry rows
            let reason = match source {
                ResultSource::Local => "no failing rows collected",
                _ => "not collected by this tier",
            };
            return (None, None, Some(reason.to_string()));
        }
    };
    // A zero budget leaves only the per-rule caps in force
    if budget > 0 {
        if *budget_left == 0 {
            return (
                Some(Vec::new()),
                Some(ResultSource::Local),
                Some("budget_exhausted".to_string()),
            );
        }
        if rows.len() > *budget_left {
            rows.truncate(*budget_left);
        }
        *budget_left -= rows.len();
    }
    (Some(rows), Some(ResultSource::Local), None)
}
