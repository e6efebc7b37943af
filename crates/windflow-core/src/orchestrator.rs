//! Request orchestration
//!
//! One request runs one linear pass:
//!
//! ```text
//! parse → resolve → (ambiguous | missing prerequisite: stop)
//!       → invoke worker → validate → (failure: categorize, stop)
//!       → persist stage, advise → respond
//! ```
//!
//! Questions that need no worker (help, project listings, cross-project
//! aggregates) are answered from the stores right after parsing. Every path
//! ends in an [`AnalysisResponse`]; nothing below this layer can fail a
//! request abnormally.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::advisor::{self, capitalize, ActionSuggestion};
use crate::categorize::{categorize, CategorizedError, RawError};
use crate::config::WindflowConfig;
use crate::geocoding::Geocoder;
use crate::intent::{Aggregate, Confidence, Intent, IntentKind, IntentParser};
use crate::project::Project;
use crate::resolver::{ProjectResolver, ResolvedOutcome};
use crate::session::SessionCache;
use crate::store::{ProjectStore, SessionStore};
use crate::types::{Coordinates, RequestId, WorkflowStage};
use crate::worker::{Artifact, WorkerInvoker, WorkerRegistry, WorkerResponse};

/// Inbound analysis request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub session_id: String,
    pub user_id: String,
    pub query: String,

    /// Overrides any project reference found in the query
    #[serde(default)]
    pub explicit_project_ref: Option<String>,

    /// Overrides any coordinates found in the query
    #[serde(default)]
    pub explicit_coordinates: Option<Coordinates>,
}

impl AnalysisRequest {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            query: query.into(),
            explicit_project_ref: None,
            explicit_coordinates: None,
        }
    }

    pub fn with_project_ref(mut self, reference: impl Into<String>) -> Self {
        self.explicit_project_ref = Some(reference.into());
        self
    }

    pub fn with_coordinates(mut self, coordinates: Coordinates) -> Self {
        self.explicit_coordinates = Some(coordinates);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseOutcome {
    /// A worker ran the requested stage
    Completed,
    /// Answered without a worker
    Answered,
    Ambiguous,
    MissingPrerequisite,
    Unrecognized,
    Failed,
}

impl ResponseOutcome {
    fn is_success(self) -> bool {
        matches!(self, ResponseOutcome::Completed | ResponseOutcome::Answered)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
    pub parse_ms: u64,
    pub resolve_ms: u64,
    pub worker_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisMetadata {
    pub request_id: String,
    pub timings: Timings,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,

    pub intent: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,

    /// Transport attempts, when a worker was invoked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,

    /// A store was unavailable while handling the request
    pub degraded: bool,
}

/// Response envelope shared by every outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    pub success: bool,
    pub outcome: ResponseOutcome,
    pub message: String,
    pub artifacts: Vec<Artifact>,
    pub actions: Vec<ActionSuggestion>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub checklist: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CategorizedError>,

    /// Project names to choose from when the reference was ambiguous
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remediation: Vec<String>,

    /// Structured answer for questions handled without a worker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    pub metadata: AnalysisMetadata,
}

impl AnalysisResponse {
    fn new(outcome: ResponseOutcome, message: impl Into<String>) -> Self {
        Self {
            success: outcome.is_success(),
            outcome,
            message: message.into(),
            artifacts: Vec::new(),
            actions: Vec::new(),
            checklist: None,
            next_step: None,
            error: None,
            candidates: Vec::new(),
            remediation: Vec::new(),
            data: None,
            metadata: AnalysisMetadata::default(),
        }
    }

    fn with_actions(mut self, actions: Vec<ActionSuggestion>) -> Self {
        self.actions = actions;
        self
    }

    fn with_remediation(mut self, remediation: Vec<String>) -> Self {
        self.remediation = remediation;
        self
    }

    fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn primary_action(&self) -> Option<&ActionSuggestion> {
        self.actions.iter().find(|a| a.is_primary)
    }
}

/// Per-request bookkeeping folded into the response metadata
struct RequestContext {
    request_id: RequestId,
    started: Instant,
    intent: String,
    timings: Timings,
    project_name: Option<String>,
    worker: Option<String>,
    attempts: Option<u32>,
    degraded: bool,
}

impl RequestContext {
    fn seal(self, mut response: AnalysisResponse) -> AnalysisResponse {
        let mut timings = self.timings;
        timings.total_ms = millis(self.started.elapsed());

        response.metadata = AnalysisMetadata {
            request_id: self.request_id.to_string(),
            timings,
            project_name: self.project_name,
            intent: self.intent,
            worker: self.worker,
            attempts: self.attempts,
            degraded: self.degraded,
        };
        response
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

fn action(label: impl Into<String>, query: impl Into<String>, is_primary: bool) -> ActionSuggestion {
    ActionSuggestion {
        label: label.into(),
        query: query.into(),
        is_primary,
    }
}

/// Canonical query that runs `stage` for `project`
fn stage_query(stage: WorkflowStage, project: &str) -> String {
    match stage {
        WorkflowStage::TerrainAnalysis => format!("analyze terrain for {}", project),
        WorkflowStage::LayoutOptimization => format!("optimize turbine layout for {}", project),
        WorkflowStage::WakeSimulation => format!("run wake simulation for {}", project),
        WorkflowStage::ReportGeneration => format!("generate report for {}", project),
    }
}

const EXAMPLE_QUERIES: &[(&str, &str)] = &[
    ("Analyze terrain", "analyze terrain at 35.5, -101.4"),
    ("Optimize a layout", "optimize layout with 40 turbines"),
    ("List projects", "list my projects"),
];

fn example_actions() -> Vec<ActionSuggestion> {
    EXAMPLE_QUERIES
        .iter()
        .enumerate()
        .map(|(i, (label, query))| action(*label, *query, i == 0))
        .collect()
}

fn metric_label(key: &str) -> (&str, &'static str) {
    match key {
        "capacity_mw" => ("capacity", " MW"),
        "turbine_count" => ("turbine count", ""),
        "annual_energy_gwh" => ("annual energy", " GWh"),
        "capacity_factor" => ("capacity factor", ""),
        "wake_loss_pct" => ("wake loss", "%"),
        other => (other, ""),
    }
}

/// Sequences parsing, resolution, invocation and advice for each request
pub struct Orchestrator {
    parser: IntentParser,
    sessions: Arc<SessionCache>,
    projects: Arc<dyn ProjectStore>,
    resolver: ProjectResolver,
    invoker: WorkerInvoker,
    config: WindflowConfig,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("invoker", &self.invoker)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        config: &WindflowConfig,
        registry: Arc<WorkerRegistry>,
        session_store: Arc<dyn SessionStore>,
        project_store: Arc<dyn ProjectStore>,
        geocoder: Arc<dyn Geocoder>,
    ) -> Self {
        let sessions = Arc::new(SessionCache::from_settings(session_store, &config.session));
        let resolver = ProjectResolver::new(sessions.clone(), project_store.clone(), geocoder);

        Self {
            parser: IntentParser::new(),
            sessions,
            projects: project_store,
            resolver,
            invoker: WorkerInvoker::new(registry, &config.invoker),
            config: config.clone(),
        }
    }

    pub fn invoker(&self) -> &WorkerInvoker {
        &self.invoker
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    /// Registry name of the worker for `stage`
    pub fn worker_name(&self, stage: WorkflowStage) -> String {
        self.config
            .workers
            .get(&stage)
            .map(|endpoint| endpoint.name.clone())
            .unwrap_or_else(|| stage.key().replace('_', "-"))
    }

    /// Handle one request. Always returns a well-formed response.
    pub async fn handle(&self, request: AnalysisRequest) -> AnalysisResponse {
        let request_id = RequestId::new();
        let started = Instant::now();

        let intent = self.parse(&request);
        let mut ctx = RequestContext {
            request_id,
            started,
            intent: intent.kind.name().to_string(),
            timings: Timings {
                parse_ms: millis(started.elapsed()),
                ..Timings::default()
            },
            project_name: None,
            worker: None,
            attempts: None,
            degraded: false,
        };

        tracing::info!(
            request_id = %ctx.request_id,
            session_id = %request.session_id,
            intent = %ctx.intent,
            confidence = ?intent.confidence,
            "Handling request"
        );

        let response = match &intent.kind {
            IntentKind::Stage { stage } => self.run_stage(*stage, &intent, &request, &mut ctx).await,
            IntentKind::Help => help(),
            IntentKind::ProjectList => self.list_projects(&request, &mut ctx).await,
            IntentKind::ProjectDetails => self.project_details(&intent, &request, &mut ctx).await,
            IntentKind::CrossProjectQuery { aggregate, metric } => {
                self.cross_project(*aggregate, metric.as_deref(), &mut ctx).await
            }
            IntentKind::Unknown => unrecognized(&request.query),
        };

        ctx.seal(response)
    }

    fn parse(&self, request: &AnalysisRequest) -> Intent {
        let mut intent = self.parser.parse(&request.query);

        if let Some(reference) = &request.explicit_project_ref {
            intent.params.project_ref = Some(reference.clone());
        }
        if let Some(coords) = request.explicit_coordinates.filter(Coordinates::is_valid) {
            intent.params.coordinates = Some(coords);
            if intent.kind == IntentKind::Unknown {
                intent.kind = IntentKind::Stage {
                    stage: WorkflowStage::ENTRY,
                };
                intent.confidence = Confidence::Low;
            }
        }
        intent
    }

    async fn run_stage(
        &self,
        stage: WorkflowStage,
        intent: &Intent,
        request: &AnalysisRequest,
        ctx: &mut RequestContext,
    ) -> AnalysisResponse {
        let resolve_started = Instant::now();
        let resolution = self
            .resolver
            .resolve(intent, &request.session_id, &request.user_id)
            .await;
        ctx.timings.resolve_ms = millis(resolve_started.elapsed());
        ctx.degraded |= resolution.degraded;

        let mut project = match resolution.outcome {
            ResolvedOutcome::Resolved(project) | ResolvedOutcome::Created(project) => project,
            ResolvedOutcome::Ambiguous(candidates) => {
                return ambiguous(stage, intent, candidates, ctx);
            }
            ResolvedOutcome::MissingPrerequisite { project, stage: missing } => {
                return self.missing_prerequisite(stage, project, missing, ctx).await;
            }
        };
        ctx.project_name = Some(project.name.clone());

        let worker_name = self.worker_name(stage);
        ctx.worker = Some(worker_name.clone());
        let payload = build_payload(stage, &project, intent, &ctx.request_id, &request.session_id);

        let invocation = self
            .invoker
            .invoke(&worker_name, payload, self.config.invoker.hard_timeout())
            .await;
        ctx.timings.worker_ms = millis(invocation.duration);
        ctx.attempts = Some(invocation.attempts);

        let response = match invocation.outcome {
            Ok(response) => response,
            Err(failure) => {
                let error = categorize(&RawError::Worker(failure), &ctx.request_id);
                let mut failed = AnalysisResponse::new(ResponseOutcome::Failed, error.message.clone())
                    .with_remediation(error.remediation.clone());
                failed.checklist = Some(advisor::checklist(&project.workflow_status));
                failed.error = Some(error);
                return failed;
            }
        };

        self.record_completion(&mut project, stage, intent, &response, ctx).await;

        let steps = advisor::suggest(stage, &project.workflow_status, &project.name);
        let mut completed = AnalysisResponse::new(ResponseOutcome::Completed, response.message)
            .with_actions(steps.actions);
        completed.artifacts = response.artifacts;
        completed.checklist = Some(steps.checklist);
        completed.next_step = Some(steps.next_step_text);
        completed
    }

    /// Persist the stage result on the project record before responding
    async fn record_completion(
        &self,
        project: &mut Project,
        stage: WorkflowStage,
        intent: &Intent,
        response: &WorkerResponse,
        ctx: &mut RequestContext,
    ) {
        let refs = response
            .artifacts
            .iter()
            .enumerate()
            .map(|(i, artifact)| {
                artifact
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("{}#{}", ctx.request_id, i))
            })
            .collect();

        let mut metrics = response.metadata.metrics.clone();
        if let Some(capacity) = intent.params.capacity_mw {
            metrics.entry("capacity_mw".to_string()).or_insert(capacity);
        }
        if let Some(count) = intent.params.turbine_count {
            metrics.entry("turbine_count".to_string()).or_insert(count as f64);
        }

        // Merge into the stored record; the resolved copy may be a stand-in
        // built while the store was unreachable
        let stored = match self.projects.get(&project.name).await {
            Ok(stored) => Some(stored),
            Err(e) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    project = %project.name,
                    error = %e,
                    "Project store unavailable, stage completion kept in memory only"
                );
                ctx.degraded = true;
                None
            }
        };

        if let Some(Some(current)) = &stored {
            *project = current.clone();
        }
        if project.coordinates.is_none() {
            project.coordinates = intent.params.coordinates;
        }
        project.record_stage(stage, refs, &metrics);

        // Only write after a successful read
        if stored.is_none() {
            return;
        }
        if let Err(e) = self.projects.put(project).await {
            tracing::warn!(
                request_id = %ctx.request_id,
                project = %project.name,
                error = %e,
                "Stage completion not persisted"
            );
            ctx.degraded = true;
        }
    }

    async fn missing_prerequisite(
        &self,
        requested: WorkflowStage,
        project: Option<String>,
        missing: WorkflowStage,
        ctx: &mut RequestContext,
    ) -> AnalysisResponse {
        tracing::info!(
            request_id = %ctx.request_id,
            project = project.as_deref().unwrap_or("-"),
            requested = %requested,
            missing = %missing,
            "Missing workflow prerequisite"
        );

        let Some(name) = project else {
            return AnalysisResponse::new(
                ResponseOutcome::MissingPrerequisite,
                format!(
                    "There is no project to run {} on yet. Start with {} for a site.",
                    requested, missing
                ),
            )
            .with_actions(vec![action(
                "Start terrain analysis",
                "analyze terrain at <latitude>, <longitude>",
                true,
            )])
            .with_remediation(vec![
                "Provide site coordinates, for example \"analyze terrain at 35.5, -101.4\"".to_string(),
                "Or name an existing project, for example \"optimize layout for <project>\"".to_string(),
            ]);
        };

        ctx.project_name = Some(name.clone());
        let mut response = AnalysisResponse::new(
            ResponseOutcome::MissingPrerequisite,
            format!(
                "{} needs {} before {} can run.",
                name, missing, requested
            ),
        )
        .with_actions(vec![action(
            format!("Run {}", missing),
            stage_query(missing, &name),
            true,
        )])
        .with_remediation(vec![format!("Run {} for {} first", missing, name)]);

        match self.projects.get(&name).await {
            Ok(Some(record)) => {
                response.checklist = Some(advisor::checklist(&record.workflow_status));
            }
            Ok(None) => {}
            Err(_) => ctx.degraded = true,
        }
        response.next_step = Some(format!("Next step for {}: {}.", name, missing));
        response
    }

    async fn list_projects(
        &self,
        request: &AnalysisRequest,
        ctx: &mut RequestContext,
    ) -> AnalysisResponse {
        let session = self.sessions.get(&request.session_id, &request.user_id).await;
        let projects = match self.projects.list().await {
            Ok(projects) => projects,
            Err(e) => {
                tracing::warn!(request_id = %ctx.request_id, error = %e, "Project store unavailable, listing session history");
                ctx.degraded = true;
                session
                    .project_history
                    .iter()
                    .map(|name| Project::new(name, None))
                    .collect()
            }
        };

        if projects.is_empty() {
            return AnalysisResponse::new(ResponseOutcome::Answered, "You have no projects yet.")
                .with_actions(example_actions().into_iter().take(1).collect())
                .with_data(json!({ "projects": [] }));
        }

        let active = session.active_project.as_deref();
        let mut lines = vec![format!("You have {} project(s):", projects.len())];
        let mut entries = Vec::with_capacity(projects.len());
        for project in &projects {
            let is_active = active == Some(project.name.as_str());
            lines.push(format!(
                "- {} ({}/{} stages){}",
                project.name,
                project.workflow_status.completed_count(),
                WorkflowStage::ALL.len(),
                if is_active { " [active]" } else { "" }
            ));
            entries.push(json!({
                "name": project.name,
                "completedStages": project.workflow_status.completed_count(),
                "active": is_active,
                "lastAccessedAt": project.last_accessed_at,
            }));
        }

        let focus = active.unwrap_or(projects[0].name.as_str());
        AnalysisResponse::new(ResponseOutcome::Answered, lines.join("\n"))
            .with_actions(vec![action(
                "View project details",
                format!("show project details for {}", focus),
                true,
            )])
            .with_data(json!({ "projects": entries }))
    }

    async fn project_details(
        &self,
        intent: &Intent,
        request: &AnalysisRequest,
        ctx: &mut RequestContext,
    ) -> AnalysisResponse {
        let resolve_started = Instant::now();
        let resolution = self
            .resolver
            .resolve(intent, &request.session_id, &request.user_id)
            .await;
        ctx.timings.resolve_ms = millis(resolve_started.elapsed());
        ctx.degraded |= resolution.degraded;

        let project = match resolution.outcome {
            ResolvedOutcome::Resolved(project) | ResolvedOutcome::Created(project) => project,
            ResolvedOutcome::Ambiguous(candidates) => {
                let mut response = AnalysisResponse::new(
                    ResponseOutcome::Ambiguous,
                    format!("Several projects match: {}. Which one did you mean?", candidates.join(", ")),
                )
                .with_actions(
                    candidates
                        .iter()
                        .enumerate()
                        .map(|(i, name)| {
                            action(
                                format!("Show {}", name),
                                format!("show project details for {}", name),
                                i == 0,
                            )
                        })
                        .collect(),
                )
                .with_remediation(vec!["Use the full project name".to_string()]);
                response.candidates = candidates;
                return response;
            }
            ResolvedOutcome::MissingPrerequisite { project, .. } => {
                let message = match project {
                    Some(name) => format!("No project named '{}' was found.", name),
                    None => "There is no active project in this conversation yet.".to_string(),
                };
                return AnalysisResponse::new(ResponseOutcome::MissingPrerequisite, message)
                    .with_actions(vec![action("List projects", "list my projects", true)])
                    .with_remediation(vec![
                        "List your projects and pick one by name".to_string(),
                        "Or start a new project with a terrain analysis".to_string(),
                    ]);
            }
        };
        ctx.project_name = Some(project.name.clone());

        let status = &project.workflow_status;
        let mut message = format!("Project {}", project.name);
        if let Some(coords) = project.coordinates {
            message.push_str(&format!("\nLocation: {}", coords));
        }
        for (key, value) in &project.metrics {
            let (label, unit) = metric_label(key);
            message.push_str(&format!("\n{}: {:.2}{}", capitalize(label), value, unit));
        }

        let actions = match status.earliest_incomplete() {
            Some(stage) => vec![
                action(format!("Run {}", stage), stage_query(stage, &project.name), true),
                action("List projects", "list my projects", false),
            ],
            None => vec![
                action("Regenerate report", stage_query(WorkflowStage::ReportGeneration, &project.name), true),
                action("List projects", "list my projects", false),
            ],
        };

        let mut response = AnalysisResponse::new(ResponseOutcome::Answered, message)
            .with_actions(actions)
            .with_data(serde_json::to_value(&project).unwrap_or(Value::Null));
        response.checklist = Some(advisor::checklist(status));
        response.next_step = Some(advisor::next_step_text(status, &project.name));
        response
    }

    async fn cross_project(
        &self,
        aggregate: Aggregate,
        metric: Option<&str>,
        ctx: &mut RequestContext,
    ) -> AnalysisResponse {
        let projects = match self.projects.list().await {
            Ok(projects) => projects,
            Err(e) => {
                ctx.degraded = true;
                let error = categorize(&RawError::Text(e.to_string()), &ctx.request_id);
                let mut failed = AnalysisResponse::new(
                    ResponseOutcome::Failed,
                    "Project records are unavailable right now, so this question cannot be answered.",
                )
                .with_remediation(error.remediation.clone());
                failed.error = Some(error);
                return failed;
            }
        };

        let Some(metric) = metric else {
            if aggregate == Aggregate::Count {
                return AnalysisResponse::new(
                    ResponseOutcome::Answered,
                    format!("You have {} project(s).", projects.len()),
                )
                .with_actions(vec![action("List projects", "list my projects", true)])
                .with_data(json!({ "aggregate": "count", "value": projects.len() }));
            }
            return AnalysisResponse::new(
                ResponseOutcome::Unrecognized,
                format!("Which metric should the {} cover?", aggregate.label()),
            )
            .with_actions(vec![action(
                "Average capacity",
                "average capacity of all projects",
                true,
            )])
            .with_remediation(vec![
                "Name a metric: capacity, turbines, annual energy, capacity factor or wake loss"
                    .to_string(),
            ]);
        };

        let values: Vec<f64> = projects.iter().filter_map(|p| p.metric(metric)).collect();
        let (label, unit) = metric_label(metric);
        if values.is_empty() {
            return AnalysisResponse::new(
                ResponseOutcome::Answered,
                format!("None of your {} project(s) has a recorded {} yet.", projects.len(), label),
            )
            .with_data(json!({ "aggregate": aggregate, "metric": metric, "value": null, "projects": 0 }));
        }

        let value = match aggregate {
            Aggregate::Average => values.iter().sum::<f64>() / values.len() as f64,
            Aggregate::Total => values.iter().sum(),
            Aggregate::Max => values.iter().copied().fold(f64::MIN, f64::max),
            Aggregate::Min => values.iter().copied().fold(f64::MAX, f64::min),
            Aggregate::Count => values.len() as f64,
        };

        let message = if aggregate == Aggregate::Count {
            format!("{} of {} project(s) have a recorded {}.", values.len(), projects.len(), label)
        } else {
            format!(
                "The {} {} across {} project(s) is {:.2}{}.",
                aggregate.label(),
                label,
                values.len(),
                value,
                unit
            )
        };

        AnalysisResponse::new(ResponseOutcome::Answered, message)
            .with_actions(vec![action("List projects", "list my projects", true)])
            .with_data(json!({
                "aggregate": aggregate,
                "metric": metric,
                "value": value,
                "projects": values.len(),
            }))
    }
}

fn build_payload(
    stage: WorkflowStage,
    project: &Project,
    intent: &Intent,
    request_id: &RequestId,
    session_id: &str,
) -> Value {
    json!({
        "requestId": request_id.as_str(),
        "sessionId": session_id,
        "projectName": project.name,
        "stage": stage.key(),
        "query": intent.raw_query,
        "coordinates": intent.params.coordinates.or(project.coordinates),
        "parameters": intent.params,
        "priorArtifacts": project.artifact_refs,
    })
}

fn ambiguous(
    stage: WorkflowStage,
    intent: &Intent,
    candidates: Vec<String>,
    ctx: &RequestContext,
) -> AnalysisResponse {
    let reference = intent.params.project_ref.as_deref().unwrap_or("that name");
    tracing::info!(
        request_id = %ctx.request_id,
        %reference,
        candidates = candidates.len(),
        "Ambiguous project reference"
    );

    let actions = candidates
        .iter()
        .enumerate()
        .map(|(i, name)| action(format!("Use {}", name), stage_query(stage, name), i == 0))
        .collect();

    let mut response = AnalysisResponse::new(
        ResponseOutcome::Ambiguous,
        format!(
            "'{}' matches {} projects: {}. Which one did you mean?",
            reference,
            candidates.len(),
            candidates.join(", ")
        ),
    )
    .with_actions(actions)
    .with_remediation(vec![format!(
        "Repeat the request with the full project name, for example \"{}\"",
        stage_query(stage, &candidates[0])
    )]);
    response.candidates = candidates;
    response
}

fn help() -> AnalysisResponse {
    let mut message = String::from(
        "I run wind farm analyses in four stages: terrain analysis, layout optimization, \
         wake simulation and report generation. Try:",
    );
    for (_, query) in EXAMPLE_QUERIES {
        message.push_str(&format!("\n- {}", query));
    }
    AnalysisResponse::new(ResponseOutcome::Answered, message).with_actions(example_actions())
}

fn unrecognized(query: &str) -> AnalysisResponse {
    tracing::debug!(query, "Unrecognized request");
    AnalysisResponse::new(
        ResponseOutcome::Unrecognized,
        "I couldn't tell which analysis you want to run.",
    )
    .with_actions(example_actions())
    .with_remediation(vec![
        "Name a stage: terrain analysis, layout optimization, wake simulation or report".to_string(),
        "Include site coordinates as \"lat, lon\", for example 35.5, -101.4".to_string(),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryProjectStore, MemorySessionStore};
    use crate::testing::{ScriptedWorker, StaticGeocoder};

    fn orchestrator(projects: Vec<Project>) -> (Orchestrator, Arc<MemoryProjectStore>) {
        let config = WindflowConfig::default()
            .with_timeouts(Duration::from_millis(50), Duration::from_millis(200));
        let mut registry = WorkerRegistry::new();
        for stage in WorkflowStage::ALL {
            registry.register(Arc::new(ScriptedWorker::succeeding(stage.key().replace('_', "-"))));
        }
        let store = Arc::new(MemoryProjectStore::with_projects(projects));
        let orchestrator = Orchestrator::new(
            &config,
            Arc::new(registry),
            Arc::new(MemorySessionStore::new()),
            store.clone(),
            Arc::new(StaticGeocoder::new("Amarillo, Texas")),
        );
        (orchestrator, store)
    }

    fn ask(query: &str) -> AnalysisRequest {
        AnalysisRequest::new("s1", "u1", query)
    }

    #[tokio::test]
    async fn test_help_is_answered_locally() {
        let (orchestrator, _) = orchestrator(vec![]);
        let response = orchestrator.handle(ask("help")).await;
        assert_eq!(response.outcome, ResponseOutcome::Answered);
        assert_eq!(response.actions.iter().filter(|a| a.is_primary).count(), 1);
        assert!(response.metadata.request_id.starts_with("req:"));
    }

    #[tokio::test]
    async fn test_unrecognized_query() {
        let (orchestrator, _) = orchestrator(vec![]);
        let response = orchestrator.handle(ask("purple monkey dishwasher")).await;
        assert!(!response.success);
        assert_eq!(response.outcome, ResponseOutcome::Unrecognized);
        assert!(!response.remediation.is_empty());
    }

    #[tokio::test]
    async fn test_stage_run_records_metrics() {
        let (orchestrator, store) = orchestrator(vec![]);
        orchestrator.handle(ask("analyze terrain at 35.5, -101.4")).await;
        let response = orchestrator
            .handle(ask("optimize layout with 40 turbines and 150 MW capacity"))
            .await;
        assert!(response.success, "{:?}", response);

        let project = store.get("amarillo-texas-wind-farm").await.unwrap().unwrap();
        assert!(project.workflow_status.layout_optimization);
        assert_eq!(project.metric("turbine_count"), Some(40.0));
        assert_eq!(project.metric("capacity_mw"), Some(150.0));
    }

    #[tokio::test]
    async fn test_descriptive_phrase_keeps_active_project() {
        let (orchestrator, store) = orchestrator(vec![]);
        orchestrator.handle(ask("analyze terrain at 35.5, -101.4")).await;
        orchestrator.handle(ask("optimize the layout")).await;

        let response = orchestrator
            .handle(ask("run wake simulation on the optimized layout"))
            .await;
        assert_eq!(response.outcome, ResponseOutcome::Completed, "{:?}", response);
        assert_eq!(response.metadata.project_name.as_deref(), Some("amarillo-texas-wind-farm"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_sizing_phrase_does_not_name_project() {
        let (orchestrator, store) = orchestrator(vec![]);
        let response = orchestrator
            .handle(ask("analyze terrain at 35.5, -101.4 for a 150 MW farm"))
            .await;
        assert_eq!(response.outcome, ResponseOutcome::Completed);
        assert_eq!(response.metadata.project_name.as_deref(), Some("amarillo-texas-wind-farm"));

        let project = store.get("amarillo-texas-wind-farm").await.unwrap().unwrap();
        assert_eq!(project.metric("capacity_mw"), Some(150.0));
    }

    #[tokio::test]
    async fn test_explicit_coordinates_override() {
        let (orchestrator, _) = orchestrator(vec![]);
        let request = ask("start here").with_coordinates(Coordinates::new(35.5, -101.4).unwrap());
        let response = orchestrator.handle(request).await;
        assert_eq!(response.outcome, ResponseOutcome::Completed);
        assert_eq!(response.metadata.project_name.as_deref(), Some("amarillo-texas-wind-farm"));
    }

    #[tokio::test]
    async fn test_cross_project_average() {
        let mut a = Project::new("alpha", None);
        a.metrics.insert("capacity_mw".into(), 100.0);
        let mut b = Project::new("beta", None);
        b.metrics.insert("capacity_mw".into(), 200.0);
        let (orchestrator, _) = orchestrator(vec![a, b, Project::new("gamma", None)]);

        let response = orchestrator
            .handle(ask("what is the average capacity of all projects?"))
            .await;
        assert_eq!(response.outcome, ResponseOutcome::Answered);
        assert_eq!(response.data.as_ref().unwrap()["value"], json!(150.0));
        assert!(response.message.contains("150.00 MW"));
    }

    #[tokio::test]
    async fn test_project_list_and_details() {
        let (orchestrator, _) = orchestrator(vec![]);
        orchestrator.handle(ask("analyze terrain at 35.5, -101.4")).await;

        let list = orchestrator.handle(ask("list my projects")).await;
        assert!(list.message.contains("amarillo-texas-wind-farm (1/4 stages) [active]"));

        let details = orchestrator.handle(ask("show project details")).await;
        assert_eq!(details.outcome, ResponseOutcome::Answered);
        assert_eq!(
            details.checklist.as_deref(),
            Some("[x] Terrain analysis\n[ ] Layout optimization\n[ ] Wake simulation\n[ ] Report generation")
        );
        assert_eq!(
            details.primary_action().map(|a| a.query.as_str()),
            Some("optimize turbine layout for amarillo-texas-wind-farm")
        );
    }

    #[tokio::test]
    async fn test_response_serializes_camel_case() {
        let (orchestrator, _) = orchestrator(vec![]);
        let response = orchestrator.handle(ask("optimize the layout")).await;
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["outcome"], "missingPrerequisite");
        assert_eq!(json["success"], false);
        assert!(json["metadata"]["requestId"].is_string());
        assert!(json["metadata"]["timings"]["totalMs"].is_number());
    }
}
