//! # Contract Model
//!
//! A contract is a named ordered list of rule declarations plus a
//! datasource reference and optional severity weights. The engine accepts
//! already-parsed contract objects; YAML/JSON parsing lives with the
//! consumer.
//!
//! ## Example
//!
//! ```rust
//! use kontra::contract::{Contract, RuleDecl, Severity};
//!
//! let contract = Contract::new("orders", "file:///data/orders.parquet")
//!     .with_rule(RuleDecl::new("not_null").with_param("column", "order_id"))
//!     .with_rule(
//!         RuleDecl::new("range")
//!             .with_param("column", "amount")
//!             .with_param("min", 0)
//!             .with_severity(Severity::Warning),
//!     );
//! assert_eq!(contract.rules.len(), 2);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Map;
use std::fmt;

/// Rule severity. The engine records it and computes weighted scores but
/// never interprets it as pass/fail policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Blocking,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Blocking => write!(f, "blocking"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

/// Optional weights for the quality score the merger computes. Absent
/// weights leave `quality_score` null.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityWeights {
    pub blocking: f64,
    pub warning: f64,
    pub info: f64,
}

impl SeverityWeights {
    pub fn weight(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Blocking => self.blocking,
            Severity::Warning => self.warning,
            Severity::Info => self.info,
        }
    }
}

impl Default for SeverityWeights {
    fn default() -> Self {
        SeverityWeights {
            blocking: 1.0,
            warning: 0.5,
            info: 0.1,
        }
    }
}

/// A declared rule: variant name plus raw parameters. Typed validation
/// happens in the registry at plan compile time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDecl {
    /// Variant name from the closed rule set
    pub name: String,
    /// Raw parameters; validated per variant at plan compile
    #[serde(default)]
    pub params: Map<String, serde_json::Value>,
    /// Explicit rule id; derived when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    /// Exact-count requirement; `None` defers to the call-level default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tally: Option<bool>,
    /// Per-rule sample cap; `None` defers to the call-level default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample: Option<usize>,
    /// Opaque mapping forwarded to consumers, never read by the engine
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, serde_json::Value>,
}

impl RuleDecl {
    pub fn new(name: impl Into<String>) -> Self {
        RuleDecl {
            name: name.into(),
            params: Map::new(),
            id: None,
            severity: Severity::default(),
            tally: None,
            sample: None,
            context: Map::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_tally(mut self, tally: bool) -> Self {
        self.tally = Some(tally);
        self
    }

    pub fn with_sample(mut self, sample: usize) -> Self {
        self.sample = Some(sample);
        self
    }

    pub fn with_context(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Named ordered set of rules plus a dataset reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub name: String,
    /// Dataset URI or named datasource reference, resolved by the caller
    /// or by the handle override on the validation call
    pub datasource: String,
    pub rules: Vec<RuleDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity_weights: Option<SeverityWeights>,
}

impl Contract {
    pub fn new(name: impl Into<String>, datasource: impl Into<String>) -> Self {
        Contract {
            name: name.into(),
            datasource: datasource.into(),
            rules: Vec::new(),
            severity_weights: None,
        }
    }

    pub fn with_rule(mut self, rule: RuleDecl) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_severity_weights(mut self, weights: SeverityWeights) -> Self {
        self.severity_weights = Some(weights);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_preserves_declared_order() {
        let contract = Contract::new("c", "file:///tmp/x.parquet")
            .with_rule(RuleDecl::new("not_null").with_param("column", "a"))
            .with_rule(RuleDecl::new("unique").with_param("column", "b"));
        assert_eq!(contract.rules[0].name, "not_null");
        assert_eq!(contract.rules[1].name, "unique");
    }

    #[test]
    fn test_severity_default_is_blocking() {
        let decl = RuleDecl::new("not_null");
        assert_eq!(decl.severity, Severity::Blocking);
    }

    #[test]
    fn test_contract_serde_round_trip() {
        let contract = Contract::new("c", "postgres://h/db/public.t")
            .with_rule(
                RuleDecl::new("range")
                    .with_param("column", "x")
                    .with_param("min", 0)
                    .with_tally(true)
                    .with_context("owner", "data-eng"),
            )
            .with_severity_weights(SeverityWeights::default());
        let json = serde_json::to_string(&contract).unwrap();
        let back: Contract = serde_json::from_str(&json).unwrap();
        assert_eq!(back.rules.len(), 1);
        assert_eq!(back.rules[0].tally, Some(true));
        assert_eq!(back.rules[0].context["owner"], "data-eng");
    }

    #[test]
    fn test_weights_lookup() {
        let w = SeverityWeights::default();
        assert!(w.weight(Severity::Blocking) > w.weight(Severity::Info));
    }
}
