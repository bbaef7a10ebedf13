//! Rule Identity
//!
//! Stable rule-id derivation and collision detection. The derived id is
//! a pure function of `{name, column?, explicit-id?}` so it is identical
//! across runs and platforms.

use super::{Rule, RuleKind, RuleScope};
use crate::error::{KontraError, KontraResult};
use std::collections::BTreeMap;

/// Derive the rule id. Explicit ids are used verbatim. Dataset rules
/// derive `DATASET:{name}`; rules exposing a single column derive
/// `COL:{column}:{name}`; other rules derive the bare variant name and
/// therefore need explicit ids when declared more than once.
pub fn derive_rule_id(explicit: Option<&str>, kind: &RuleKind) -> String {
    if let Some(id) = explicit {
        return id.to_string();
    }
    if let Some(column) = kind.column() {
        return format!("COL:{}:{}", column, kind.variant_name());
    }
    if kind.scope() == RuleScope::Dataset {
        return format!("DATASET:{}", kind.variant_name());
    }
    kind.variant_name().to_string()
}

/// Fail with a Config error listing every colliding id. Uniqueness of
/// `rule_id` within a contract is an invariant; collisions are fatal at
/// plan compile time.
pub fn detect_collisions(rules: &[Rule]) -> KontraResult<()> {
    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    for rule in rules {
        *seen.entry(rule.rule_id.as_str()).or_insert(0) += 1;
    }
    let collisions: Vec<String> = seen
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(id, count)| format!("'{id}' ({count} rules)"))
        .collect();
    if collisions.is_empty() {
        Ok(())
    } else {
        Err(KontraError::config_hint(
            format!("duplicate rule ids: {}", collisions.join(", ")),
            "set an explicit 'id' on rules that would otherwise derive the same identifier",
        ))
    }
}
