//! Shared value types: coordinates, workflow stages and request ids

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Geographic position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    /// Build a coordinate pair, rejecting out-of-range values
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        let coords = Self { lat, lon };
        coords.is_valid().then_some(coords)
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    /// Two positions closer than roughly 10m are the same site
    pub fn same_site(&self, other: &Coordinates) -> bool {
        (self.lat - other.lat).abs() < 1e-4 && (self.lon - other.lon).abs() < 1e-4
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}, {:.4}", self.lat, self.lon)
    }
}

/// Ordered steps of the analysis pipeline
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    TerrainAnalysis,
    LayoutOptimization,
    WakeSimulation,
    ReportGeneration,
}

impl WorkflowStage {
    /// All stages in canonical order
    pub const ALL: [WorkflowStage; 4] = [
        WorkflowStage::TerrainAnalysis,
        WorkflowStage::LayoutOptimization,
        WorkflowStage::WakeSimulation,
        WorkflowStage::ReportGeneration,
    ];

    /// The stage that starts a new project
    pub const ENTRY: WorkflowStage = WorkflowStage::TerrainAnalysis;

    pub fn index(self) -> usize {
        match self {
            WorkflowStage::TerrainAnalysis => 0,
            WorkflowStage::LayoutOptimization => 1,
            WorkflowStage::WakeSimulation => 2,
            WorkflowStage::ReportGeneration => 3,
        }
    }

    pub fn is_entry(self) -> bool {
        self == Self::ENTRY
    }

    /// Stages that must be complete before this one can run
    pub fn prerequisites(self) -> &'static [WorkflowStage] {
        &Self::ALL[..self.index()]
    }

    /// Canonical successor, if any
    pub fn next(self) -> Option<WorkflowStage> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// Human-readable name
    pub fn label(self) -> &'static str {
        match self {
            WorkflowStage::TerrainAnalysis => "terrain analysis",
            WorkflowStage::LayoutOptimization => "layout optimization",
            WorkflowStage::WakeSimulation => "wake simulation",
            WorkflowStage::ReportGeneration => "report generation",
        }
    }

    /// Key used in configuration files and environment variables
    pub fn key(self) -> &'static str {
        match self {
            WorkflowStage::TerrainAnalysis => "terrain_analysis",
            WorkflowStage::LayoutOptimization => "layout_optimization",
            WorkflowStage::WakeSimulation => "wake_simulation",
            WorkflowStage::ReportGeneration => "report_generation",
        }
    }
}

impl std::fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Completion flag per workflow stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatus {
    pub terrain_analysis: bool,
    pub layout_optimization: bool,
    pub wake_simulation: bool,
    pub report_generation: bool,
}

impl WorkflowStatus {
    pub fn is_complete(&self, stage: WorkflowStage) -> bool {
        match stage {
            WorkflowStage::TerrainAnalysis => self.terrain_analysis,
            WorkflowStage::LayoutOptimization => self.layout_optimization,
            WorkflowStage::WakeSimulation => self.wake_simulation,
            WorkflowStage::ReportGeneration => self.report_generation,
        }
    }

    pub fn mark_complete(&mut self, stage: WorkflowStage) {
        match stage {
            WorkflowStage::TerrainAnalysis => self.terrain_analysis = true,
            WorkflowStage::LayoutOptimization => self.layout_optimization = true,
            WorkflowStage::WakeSimulation => self.wake_simulation = true,
            WorkflowStage::ReportGeneration => self.report_generation = true,
        }
    }

    /// Earliest stage not yet completed
    pub fn earliest_incomplete(&self) -> Option<WorkflowStage> {
        WorkflowStage::ALL
            .into_iter()
            .find(|stage| !self.is_complete(*stage))
    }

    /// Earliest prerequisite of `stage` that is still incomplete
    pub fn missing_prerequisite(&self, stage: WorkflowStage) -> Option<WorkflowStage> {
        stage
            .prerequisites()
            .iter()
            .copied()
            .find(|prereq| !self.is_complete(*prereq))
    }

    pub fn completed_count(&self) -> usize {
        WorkflowStage::ALL
            .iter()
            .filter(|stage| self.is_complete(**stage))
            .count()
    }

    pub fn is_finished(&self) -> bool {
        self.completed_count() == WorkflowStage::ALL.len()
    }
}

/// Correlation id attached to every response and log line of a request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new() -> Self {
        Self(format!("req:{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
