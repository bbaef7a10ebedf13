//! # Kontra Data-Quality Measurement Engine
//!
//! Kontra measures data quality: given a declarative *contract* (a named
//! set of rules) and a *dataset reference* (file, object-store URI, or
//! database table), it computes a violation count (or a lower-bound
//! indicator) per rule and returns a structured result. Kontra never
//! decides what "failure" means; consumers interpret severities and
//! thresholds.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Contract + DatasetHandle + ExecutionOptions
//!     ↓
//! [Planner]            → typed plan, column projection, tier partition
//!     ↓
//! [Metadata Preplan]   → resolve from footer/catalog stats, no data read
//!     ↓
//! [SQL Pushdown]       → one or two batched statements in the source engine
//!     ↓
//! [Columnar Fallback]  → vectorized local evaluation of residual rules
//!     ↓
//! [Merger]             → one RuleResult per declared rule, declared order
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use kontra::{Contract, Engine, RuleDecl};
//!
//! let contract = Contract::new("orders", "./orders.parquet")
//!     .with_rule(RuleDecl::new("not_null").with_param("column", "order_id"))
//!     .with_rule(
//!         RuleDecl::new("range")
//!             .with_param("column", "amount")
//!             .with_param("min", 0),
//!     );
//!
//! let engine = Engine::with_defaults();
//! let options = engine.default_options();
//! match engine.validate(&contract, None, &options) {
//!     Ok(result) => println!("{} rules, passed={}", result.total_rules, result.passed),
//!     Err(e) => eprintln!("{e}"),
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `rules` | Closed rule taxonomy, capability flags, registry, identity |
//! | `planner` | Contract → typed execution plan |
//! | `preplan` | Metadata resolution (Parquet footers, DB catalogs) |
//! | `sqlgen` | Dialect-aware SQL fragments and batched statements |
//! | `pushdown` | Two-phase SQL execution and result binding |
//! | `fallback` | Columnar local evaluation and sample collection |
//! | `materialize` | Projection-pushing columnar loads |
//! | `merge` | Deterministic result assembly |
//! | `state` | Boundary state store for saved runs |

pub mod config;
pub mod contract;
pub mod dataset;
pub mod deadline;
pub mod driver;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod frame;
pub mod materialize;
pub mod merge;
pub mod options;
pub mod planner;
pub mod preplan;
pub mod pushdown;
pub mod result;
pub mod rules;
pub mod sqlgen;
pub mod state;
pub mod value;

// Re-export the call surface
pub use config::Config;
pub use contract::{Contract, RuleDecl, Severity, SeverityWeights};
pub use dataset::{DatasetHandle, Dialect};
pub use engine::Engine;
pub use error::{KontraError, KontraResult};
pub use frame::{Column, ColumnData, ColumnarFrame};
pub use options::{ExecutionOptions, SampleColumns, TierMode};
pub use result::{ExecutionStats, ResultSource, RuleResult, ValidationResult};
pub use rules::{Rule, RuleKind, RuleScope};
pub use state::StateStore;
pub use value::{DataType, Value};
