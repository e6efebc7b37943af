//! Next-step suggestions after a completed stage

use serde::{Deserialize, Serialize};

use crate::types::{WorkflowStage, WorkflowStatus};

/// A follow-up query the caller can offer as a one-click action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSuggestion {
    pub label: String,
    pub query: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextSteps {
    pub actions: Vec<ActionSuggestion>,
    pub checklist: String,
    pub next_step_text: String,
}

/// (label, query template) pairs; `{project}` is replaced by the project
/// name. The first entry is the primary action.
fn successors(stage: WorkflowStage) -> &'static [(&'static str, &'static str)] {
    match stage {
        WorkflowStage::TerrainAnalysis => &[
            ("Optimize turbine layout", "optimize turbine layout for {project}"),
            ("View project details", "show project details for {project}"),
        ],
        WorkflowStage::LayoutOptimization => &[
            ("Run wake simulation", "run wake simulation for {project}"),
            ("Re-optimize with 30 turbines", "optimize layout for {project} with 30 turbines"),
            ("View project details", "show project details for {project}"),
        ],
        WorkflowStage::WakeSimulation => &[
            ("Generate report", "generate report for {project}"),
            ("Re-run wake simulation", "run wake simulation for {project}"),
            ("View project details", "show project details for {project}"),
        ],
        WorkflowStage::ReportGeneration => &[
            ("View project details", "show project details for {project}"),
            ("Regenerate report", "generate report for {project}"),
        ],
    }
}

/// One line per stage in canonical order, `[x]` when complete
pub fn checklist(status: &WorkflowStatus) -> String {
    WorkflowStage::ALL
        .iter()
        .map(|stage| {
            let marker = if status.is_complete(*stage) { "[x]" } else { "[ ]" };
            format!("{} {}", marker, capitalize(stage.label()))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Sentence naming the earliest incomplete stage
pub fn next_step_text(status: &WorkflowStatus, project_name: &str) -> String {
    match status.earliest_incomplete() {
        Some(stage) => format!("Next step for {}: {}.", project_name, stage.label()),
        None => format!("All workflow stages are complete for {}.", project_name),
    }
}

/// Suggestions after `completed` finished for `project_name`
pub fn suggest(completed: WorkflowStage, status: &WorkflowStatus, project_name: &str) -> NextSteps {
    let actions = successors(completed)
        .iter()
        .enumerate()
        .map(|(i, (label, template))| ActionSuggestion {
            label: label.to_string(),
            query: template.replace("{project}", project_name),
            is_primary: i == 0,
        })
        .collect();

    NextSteps {
        actions,
        checklist: checklist(status),
        next_step_text: next_step_text(status, project_name),
    }
}

/// Upper-case the first character
pub(crate) fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_through(stage: WorkflowStage) -> WorkflowStatus {
        let mut status = WorkflowStatus::default();
        for s in WorkflowStage::ALL.iter().filter(|s| **s <= stage) {
            status.mark_complete(*s);
        }
        status
    }

    #[test]
    fn test_exactly_one_primary_action() {
        for stage in WorkflowStage::ALL {
            let steps = suggest(stage, &status_through(stage), "amarillo-wind-farm");
            assert!((2..=3).contains(&steps.actions.len()), "{:?}", stage);
            assert_eq!(steps.actions.iter().filter(|a| a.is_primary).count(), 1);
            assert!(steps.actions.iter().all(|a| a.query.contains("amarillo-wind-farm")));
        }
    }

    #[test]
    fn test_primary_advances_to_next_stage() {
        let steps = suggest(
            WorkflowStage::TerrainAnalysis,
            &status_through(WorkflowStage::TerrainAnalysis),
            "site-9",
        );
        assert_eq!(steps.actions[0].query, "optimize turbine layout for site-9");
        assert_eq!(steps.next_step_text, "Next step for site-9: layout optimization.");
    }

    #[test]
    fn test_checklist_rendering() {
        let status = status_through(WorkflowStage::LayoutOptimization);
        assert_eq!(
            checklist(&status),
            "[x] Terrain analysis\n[x] Layout optimization\n[ ] Wake simulation\n[ ] Report generation"
        );

        let done = status_through(WorkflowStage::ReportGeneration);
        assert_eq!(
            next_step_text(&done, "site-9"),
            "All workflow stages are complete for site-9."
        );
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("wake simulation"), "Wake simulation");
        assert_eq!(capitalize("éolienne"), "Éolienne");
        assert_eq!(capitalize(""), "");
    }
}
