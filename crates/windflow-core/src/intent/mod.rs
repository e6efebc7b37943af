//! Intent parsing
//!
//! Classification is rule-based and ordered by priority:
//! 1. greetings and help requests
//! 2. questions across all stored projects
//! 3. project listing and detail requests
//! 4. workflow stage phrases
//! 5. a low-confidence fallback
//!
//! Parameters are extracted independently of classification, see [`extract`].

pub mod extract;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::{Coordinates, WorkflowStage};

/// How sure the parser is about a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Aggregate function for cross-project questions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    Average,
    Total,
    Max,
    Min,
    Count,
}

impl Aggregate {
    pub fn label(self) -> &'static str {
        match self {
            Aggregate::Average => "average",
            Aggregate::Total => "total",
            Aggregate::Max => "maximum",
            Aggregate::Min => "minimum",
            Aggregate::Count => "count",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntentKind {
    Stage { stage: WorkflowStage },
    Help,
    ProjectList,
    ProjectDetails,
    CrossProjectQuery {
        aggregate: Aggregate,
        metric: Option<String>,
    },
    Unknown,
}

impl IntentKind {
    /// The workflow stage this intent runs, if any
    pub fn stage(&self) -> Option<WorkflowStage> {
        match self {
            IntentKind::Stage { stage } => Some(*stage),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            IntentKind::Stage { stage } => stage.key(),
            IntentKind::Help => "help",
            IntentKind::ProjectList => "project_list",
            IntentKind::ProjectDetails => "project_details",
            IntentKind::CrossProjectQuery { .. } => "cross_project_query",
            IntentKind::Unknown => "unknown",
        }
    }
}

/// Typed parameters extracted from the query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity_mw: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub turbine_count: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_direction_deg: Option<f64>,

    /// Explicit project reference as written by the user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_ref: Option<String>,
}

impl IntentParams {
    /// Number of parameters that carry analysis input
    pub fn signal_count(&self) -> usize {
        [
            self.coordinates.is_some(),
            self.capacity_mw.is_some(),
            self.turbine_count.is_some(),
            self.wind_direction_deg.is_some(),
            self.project_ref.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    pub kind: IntentKind,
    pub confidence: Confidence,
    pub params: IntentParams,
    pub raw_query: String,
}

impl Intent {
    pub fn unknown(raw_query: &str) -> Self {
        Self {
            kind: IntentKind::Unknown,
            confidence: Confidence::Low,
            params: IntentParams::default(),
            raw_query: raw_query.to_string(),
        }
    }
}

lazy_static! {
    static ref HELP: Regex = Regex::new(
        r"(?i)^\s*(?:hi|hello|hey|help|what can you do|how do i (?:start|use)|how does this work|what is this|getting started)\b[\s!?.]*"
    )
    .unwrap();
    static ref HOW_MANY_PROJECTS: Regex =
        Regex::new(r"(?i)\bhow\s+many\s+(?:wind\s+)?(?:projects|farms|sites)\b").unwrap();
    static ref AGGREGATE: Regex = Regex::new(
        r"(?i)\b(average|avg|mean|total|sum|combined|max(?:imum)?|highest|largest|min(?:imum)?|lowest|smallest)\b"
    )
    .unwrap();
    static ref ALL_PROJECTS: Regex = Regex::new(
        r"(?i)\b(?:all|every|each|across|my)\s+(?:(?:of\s+)?(?:the|my)\s+)?(?:wind\s+)?(?:projects?|farms?|sites?)\b"
    )
    .unwrap();
    static ref PROJECT_LIST: Regex = Regex::new(
        r"(?i)\b(?:list|show|display|what\s+are)\s+(?:me\s+)?(?:all\s+)?(?:of\s+)?(?:my|the|our)?\s*(?:wind\s+)?projects\b|\bmy\s+projects\b|\bproject\s+list\b"
    )
    .unwrap();
    static ref PROJECT_DETAILS: Regex = Regex::new(
        r"(?i)\b(?:project\s+(?:details|status|summary|info)|(?:details|status|summary)\s+(?:of|for|on)\b|show\s+(?:me\s+)?(?:the\s+)?(?:project|details)|where\s+am\s+i|what(?:'s|\s+is)\s+(?:done|complete|the\s+status))"
    )
    .unwrap();
    static ref REPORT: Regex = Regex::new(
        r"(?i)\b(?:report|summary\s+document|executive\s+summary|pdf)\b"
    )
    .unwrap();
    static ref SIMULATION: Regex = Regex::new(
        r"(?i)\b(?:wake|simulat(?:e|ion|ions)|energy\s+(?:yield|production)|aep|annual\s+energy|performance)\b"
    )
    .unwrap();
    static ref LAYOUT: Regex = Regex::new(
        r"(?i)\b(?:layout|optimi[sz]e|optimi[sz]ation|place\s+(?:the\s+)?turbines|turbine\s+placement|arrange)\b"
    )
    .unwrap();
    static ref TERRAIN: Regex = Regex::new(
        r"(?i)\b(?:terrain|site\s+(?:assessment|analysis|suitability)|analy[sz]e\s+(?:the\s+)?(?:site|area|location)|suitability|elevation|slope|land\s+use)\b"
    )
    .unwrap();
}

/// (metric key, pattern) pairs, most specific first
const METRIC_WORDS: &[(&str, &str)] = &[
    ("capacity_factor", "capacity factor"),
    ("wake_loss_pct", "wake loss"),
    ("annual_energy_gwh", "annual energy"),
    ("annual_energy_gwh", "energy"),
    ("annual_energy_gwh", "aep"),
    ("capacity_mw", "capacity"),
    ("turbine_count", "turbine"),
];

/// Rule-based intent parser
#[derive(Debug, Default, Clone, Copy)]
pub struct IntentParser;

impl IntentParser {
    pub fn new() -> Self {
        Self
    }

    /// Classify a query. Never fails; unparseable input is `Unknown`.
    pub fn parse(&self, query: &str) -> Intent {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Intent::unknown(query);
        }

        let params = IntentParams {
            coordinates: extract::coordinates(trimmed),
            capacity_mw: extract::capacity_mw(trimmed),
            turbine_count: extract::turbine_count(trimmed),
            wind_direction_deg: extract::wind_direction_deg(trimmed),
            project_ref: extract::project_reference(trimmed),
        };

        let (kind, confidence) = self.classify(trimmed, &params);
        tracing::debug!(
            intent = kind.name(),
            ?confidence,
            signals = params.signal_count(),
            "Classified query"
        );

        Intent {
            kind,
            confidence,
            params,
            raw_query: query.to_string(),
        }
    }

    fn classify(&self, query: &str, params: &IntentParams) -> (IntentKind, Confidence) {
        if HELP.find(query).map(|m| m.end()) == Some(query.len()) {
            return (IntentKind::Help, Confidence::High);
        }

        if let Some(kind) = cross_project(query) {
            return (kind, Confidence::High);
        }

        if PROJECT_LIST.is_match(query) {
            return (IntentKind::ProjectList, Confidence::High);
        }

        if PROJECT_DETAILS.is_match(query) && stage_phrase(query).is_none() {
            let confidence = if params.project_ref.is_some() {
                Confidence::High
            } else {
                Confidence::Medium
            };
            return (IntentKind::ProjectDetails, confidence);
        }

        if let Some(stage) = stage_phrase(query) {
            let confidence = if params.signal_count() > 0 {
                Confidence::High
            } else {
                Confidence::Medium
            };
            return (IntentKind::Stage { stage }, confidence);
        }

        // Bare coordinates start a site assessment
        if params.coordinates.is_some() {
            return (
                IntentKind::Stage {
                    stage: WorkflowStage::ENTRY,
                },
                Confidence::Low,
            );
        }

        if HELP.is_match(query) {
            return (IntentKind::Help, Confidence::Medium);
        }

        (IntentKind::Unknown, Confidence::Low)
    }
}

/// Later stages win so "report on the wake simulation" is a report request
fn stage_phrase(query: &str) -> Option<WorkflowStage> {
    if REPORT.is_match(query) {
        Some(WorkflowStage::ReportGeneration)
    } else if SIMULATION.is_match(query) {
        Some(WorkflowStage::WakeSimulation)
    } else if LAYOUT.is_match(query) {
        Some(WorkflowStage::LayoutOptimization)
    } else if TERRAIN.is_match(query) {
        Some(WorkflowStage::TerrainAnalysis)
    } else {
        None
    }
}

fn cross_project(query: &str) -> Option<IntentKind> {
    if HOW_MANY_PROJECTS.is_match(query) {
        return Some(IntentKind::CrossProjectQuery {
            aggregate: Aggregate::Count,
            metric: None,
        });
    }

    if !ALL_PROJECTS.is_match(query) {
        return None;
    }
    let word = AGGREGATE.captures(query)?.get(1)?.as_str().to_lowercase();
    let aggregate = match word.as_str() {
        "average" | "avg" | "mean" => Aggregate::Average,
        "total" | "sum" | "combined" => Aggregate::Total,
        "max" | "maximum" | "highest" | "largest" => Aggregate::Max,
        _ => Aggregate::Min,
    };

    let lower = query.to_lowercase();
    let metric = METRIC_WORDS
        .iter()
        .find(|(_, word)| lower.contains(word))
        .map(|(key, _)| key.to_string());

    Some(IntentKind::CrossProjectQuery { aggregate, metric })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(query: &str) -> Intent {
        IntentParser::new().parse(query)
    }

    #[test]
    fn test_terrain_with_coordinates() {
        let intent = parse("analyze terrain at 35.5, -101.4");
        assert_eq!(intent.kind.stage(), Some(WorkflowStage::TerrainAnalysis));
        assert_eq!(intent.confidence, Confidence::High);
        let coords = intent.params.coordinates.unwrap();
        assert_eq!((coords.lat, coords.lon), (35.5, -101.4));
        assert!(intent.params.project_ref.is_none());
    }

    #[test]
    fn test_stage_priority() {
        assert_eq!(
            parse("generate report for site-9").kind.stage(),
            Some(WorkflowStage::ReportGeneration)
        );
        let simulation = parse("run wake simulation on the optimized layout");
        assert_eq!(simulation.kind.stage(), Some(WorkflowStage::WakeSimulation));
        assert!(simulation.params.project_ref.is_none());
        assert_eq!(
            parse("optimize layout for texas").kind.stage(),
            Some(WorkflowStage::LayoutOptimization)
        );
    }

    #[test]
    fn test_sizing_phrase_is_not_a_project_name() {
        let intent = parse("analyze terrain at 35.5, -101.4 for a 150 MW farm");
        assert_eq!(intent.kind.stage(), Some(WorkflowStage::TerrainAnalysis));
        assert!(intent.params.project_ref.is_none());
        assert_eq!(intent.params.capacity_mw, Some(150.0));
    }

    #[test]
    fn test_confidence_rises_with_signals() {
        assert_eq!(parse("optimize the layout").confidence, Confidence::Medium);
        assert_eq!(
            parse("optimize the layout with 40 turbines").confidence,
            Confidence::High
        );
    }

    #[test]
    fn test_capacity_not_read_as_coordinates() {
        let intent = parse("optimize layout with 2.5 MW turbines");
        assert!(intent.params.coordinates.is_none());
        assert_eq!(intent.params.capacity_mw, Some(2.5));
    }

    #[test]
    fn test_help_and_greeting() {
        assert_eq!(parse("hello").kind, IntentKind::Help);
        assert_eq!(parse("What can you do?").kind, IntentKind::Help);
    }

    #[test]
    fn test_cross_project_queries() {
        assert_eq!(
            parse("what is the average capacity of all projects").kind,
            IntentKind::CrossProjectQuery {
                aggregate: Aggregate::Average,
                metric: Some("capacity_mw".to_string())
            }
        );
        assert_eq!(
            parse("how many projects do I have?").kind,
            IntentKind::CrossProjectQuery {
                aggregate: Aggregate::Count,
                metric: None
            }
        );
        assert_eq!(
            parse("total annual energy across all sites").kind,
            IntentKind::CrossProjectQuery {
                aggregate: Aggregate::Total,
                metric: Some("annual_energy_gwh".to_string())
            }
        );
    }

    #[test]
    fn test_project_list_and_details() {
        assert_eq!(parse("list my projects").kind, IntentKind::ProjectList);
        assert_eq!(parse("show project details").kind, IntentKind::ProjectDetails);
        let intent = parse("status of project amarillo-ridge");
        assert_eq!(intent.kind, IntentKind::ProjectDetails);
        assert_eq!(intent.params.project_ref.as_deref(), Some("amarillo-ridge"));
    }

    #[test]
    fn test_bare_coordinates_fall_back_to_entry_stage() {
        let intent = parse("32.77, -96.79");
        assert_eq!(intent.kind.stage(), Some(WorkflowStage::TerrainAnalysis));
        assert_eq!(intent.confidence, Confidence::Low);
    }

    #[test]
    fn test_unknown_never_fails() {
        for query in ["", "   ", "asdf qwerty", "¿¿??", "12, 13"] {
            let intent = parse(query);
            assert_eq!(intent.kind, IntentKind::Unknown, "query: {:?}", query);
            assert_eq!(intent.confidence, Confidence::Low);
        }
        assert_eq!(parse("").params, IntentParams::default());
    }
}
