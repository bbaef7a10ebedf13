//! # State Store (Boundary)
//!
//! Opaque persistence of validation runs: `save` / `list` / `get` over
//! JSON files under a per-contract directory. The engine never reads
//! state during validation.
//!
//! Annotations are a separate append-only stream the engine stores but
//! never reads.
//!
//! ## Layout
//!
//! ```text
//! {state_dir}/{contract}/runs/{run_id}.json
//! {state_dir}/{contract}/annotations.jsonl
//! ```

use crate::error::{KontraError, KontraResult};
use crate::result::ValidationResult;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Envelope stored per run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRun {
    pub run_id: String,
    pub contract: String,
    pub saved_at: String,
    pub result: ValidationResult,
}

/// Summary returned by `list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub saved_at: String,
    pub passed: bool,
    pub failed_count: usize,
}

/// Append-only annotation record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub created_at: String,
    /// Optional run this annotation refers to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Optional rule this annotation refers to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    /// Free-form body, opaque to the engine
    pub body: serde_json::Value,
}

/// File-backed state store
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        StateStore { root: root.into() }
    }

    /// Persist a validation result; returns the generated run id
    pub fn save(&self, result: &ValidationResult) -> KontraResult<String> {
        let run_id = Uuid::new_v4().to_string();
        let dir = self.runs_dir(&result.contract);
        fs::create_dir_all(&dir)?;
        let stored = StoredRun {
            run_id: run_id.clone(),
            contract: result.contract.clone(),
            saved_at: Utc::now().to_rfc3339(),
            result: result.clone(),
        };
        let path = dir.join(format!("{run_id}.json"));
        fs::write(&path, serde_json::to_vec_pretty(&stored)?)?;
        Ok(run_id)
    }

    /// Saved runs for a contract, most recent first
    pub fn list(&self, contract: &str) -> KontraResult<Vec<RunSummary>> {
        let dir = self.runs_dir(contract);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut summaries = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Ok(stored) = read_run(&path) {
                    summaries.push(RunSummary {
                        run_id: stored.run_id,
                        saved_at: stored.saved_at,
                        passed: stored.result.passed,
                        failed_count: stored.result.failed_count,
                    });
                }
            }
        }
        summaries.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(summaries)
    }

    /// Fetch one run; the most recent when `run_id` is `None`
    pub fn get(&self, contract: &str, run_id: Option<&str>) -> KontraResult<StoredRun> {
        let run_id = match run_id {
            Some(run_id) => run_id.to_string(),
            None => self
                .list(contract)?
                .into_iter()
                .next()
                .map(|s| s.run_id)
                .ok_or_else(|| {
                    KontraError::data(format!("no saved runs for contract '{contract}'"))
                })?,
        };
        let path = self.runs_dir(contract).join(format!("{run_id}.json"));
        read_run(&path)
    }

    /// Append an annotation. The stream is write-only from the engine's
    /// perspective.
    pub fn annotate(&self, contract: &str, annotation: &Annotation) -> KontraResult<()> {
        let dir = self.contract_dir(contract);
        fs::create_dir_all(&dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("annotations.jsonl"))?;
        let mut line = serde_json::to_vec(annotation)?;
        line.push(b'\n');
        file.write_all(&line)?;
        Ok(())
    }

    fn contract_dir(&self, contract: &str) -> PathBuf {
        // Contract names become directory names; keep them path-safe
        let safe: String = contract
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(safe)
    }

    fn runs_dir(&self, contract: &str) -> PathBuf {
        self.contract_dir(contract).join("runs")
    }
}

fn read_run(path: &Path) -> KontraResult<StoredRun> {
    let bytes = fs::read(path)
        .map_err(|e| KontraError::data(format!("cannot read '{}': {e}", path.display())))?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ExecutionStats;

    fn sample_result(contract: &str, passed: bool) -> ValidationResult {
        ValidationResult {
            contract: contract.to_string(),
            passed,
            total_rows: Some(10),
            total_rules: 0,
            failed_count: usize::from(!passed),
            quality_score: None,
            rules: Vec::new(),
            stats: ExecutionStats::default(),
        }
    }

    #[test]
    fn test_save_list_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());

        let first = store.save(&sample_result("orders", true)).unwrap();
        let second = store.save(&sample_result("orders", false)).unwrap();
        assert_ne!(first, second);

        let runs = store.list("orders").unwrap();
        assert_eq!(runs.len(), 2);

        let stored = store.get("orders", Some(&first)).unwrap();
        assert!(stored.result.passed);
        assert_eq!(stored.contract, "orders");
    }

    #[test]
    fn test_get_latest_without_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.save(&sample_result("c", true)).unwrap();
        let stored = store.get("c", None).unwrap();
        assert_eq!(stored.contract, "c");
    }

    #[test]
    fn test_missing_contract_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        assert!(store.list("ghost").unwrap().is_empty());
        assert!(store.get("ghost", None).is_err());
    }

    #[test]
    fn test_annotations_append_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        for i in 0..3 {
            store
                .annotate(
                    "orders",
                    &Annotation {
                        created_at: Utc::now().to_rfc3339(),
                        run_id: None,
                        rule_id: Some("COL:email:not_null".to_string()),
                        body: serde_json::json!({"note": i}),
                    },
                )
                .unwrap();
        }
        let content =
            fs::read_to_string(dir.path().join("orders").join("annotations.jsonl")).unwrap();
        assert_eq!(content.lines().count(), 3);
    }

    #[test]
    fn test_contract_names_path_safe() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.save(&sample_result("a/b: weird", true)).unwrap();
        assert_eq!(store.list("a/b: weird").unwrap().len(), 1);
    }
}
