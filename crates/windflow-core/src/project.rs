//! Project records and name normalization

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{Coordinates, WorkflowStage, WorkflowStatus};

/// Normalize a project name for storage and comparison.
///
/// Lowercases, trims, and collapses every run of non-alphanumeric characters
/// into a single `-`, so "West Texas Wind Farm" and "west-texas-wind-farm "
/// compare equal.
pub fn normalize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;

    for ch in raw.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch);
        } else {
            pending_dash = true;
        }
    }

    out
}

/// Whether a normalized reference fuzzily matches a stored name
pub fn fuzzy_matches(stored: &str, reference: &str) -> bool {
    !reference.is_empty() && (stored.starts_with(reference) || stored.contains(reference))
}

/// A named, durable unit of multi-stage analysis work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Normalized unique name
    pub name: String,

    pub coordinates: Option<Coordinates>,

    pub workflow_status: WorkflowStatus,

    /// Worker-owned artifact identifiers per completed stage
    #[serde(default)]
    pub artifact_refs: BTreeMap<WorkflowStage, Vec<String>>,

    /// Numeric results reported by workers (capacity_mw, turbine_count, ...)
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,

    pub created_at: DateTime<Utc>,

    pub last_accessed_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: &str, coordinates: Option<Coordinates>) -> Self {
        let now = Utc::now();
        Self {
            name: normalize_name(name),
            coordinates,
            workflow_status: WorkflowStatus::default(),
            artifact_refs: BTreeMap::new(),
            metrics: BTreeMap::new(),
            created_at: now,
            last_accessed_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_accessed_at = Utc::now();
    }

    /// Record a completed stage. Re-running a stage overwrites its artifacts.
    pub fn record_stage(
        &mut self,
        stage: WorkflowStage,
        artifact_refs: Vec<String>,
        metrics: &BTreeMap<String, f64>,
    ) {
        self.workflow_status.mark_complete(stage);
        self.artifact_refs.insert(stage, artifact_refs);
        for (key, value) in metrics {
            if value.is_finite() {
                self.metrics.insert(key.clone(), *value);
            }
        }
        self.touch();
    }

    pub fn metric(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("West Texas Wind Farm"), "west-texas-wind-farm");
        assert_eq!(normalize_name("west-texas-wind-farm "), "west-texas-wind-farm");
        assert_eq!(normalize_name("  Site_9 "), "site-9");
        assert_eq!(normalize_name("--Amarillo,  Texas--"), "amarillo-texas");
        assert_eq!(normalize_name("   "), "");
    }

    #[test]
    fn test_fuzzy_matches() {
        assert!(fuzzy_matches("west-texas-wind-farm", "texas"));
        assert!(fuzzy_matches("west-texas-wind-farm", "west"));
        assert!(!fuzzy_matches("west-texas-wind-farm", "oklahoma"));
        assert!(!fuzzy_matches("west-texas-wind-farm", ""));
    }

    #[test]
    fn test_record_stage_is_idempotent() {
        let mut project = Project::new("Site 9", None);
        let metrics = BTreeMap::from([("turbine_count".to_string(), 25.0)]);

        project.record_stage(WorkflowStage::TerrainAnalysis, vec!["a".into()], &metrics);
        project.record_stage(WorkflowStage::TerrainAnalysis, vec!["b".into()], &metrics);

        assert!(project.workflow_status.terrain_analysis);
        assert_eq!(project.artifact_refs[&WorkflowStage::TerrainAnalysis], vec!["b"]);
        assert_eq!(project.metric("turbine_count"), Some(25.0));
        assert_eq!(project.name, "site-9");
    }
}
