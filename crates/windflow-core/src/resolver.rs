//! Project resolution
//!
//! Turns an intent plus session state into a concrete project, or into one
//! of the non-error outcomes the caller must handle: ambiguity or a missing
//! workflow prerequisite. Storage outages never abort resolution; the
//! resolver continues with whatever it knows and flags the result as
//! degraded.

use std::sync::Arc;

use crate::geocoding::Geocoder;
use crate::intent::Intent;
use crate::project::{fuzzy_matches, normalize_name, Project};
use crate::session::{SessionCache, SessionContext};
use crate::store::ProjectStore;
use crate::types::{Coordinates, WorkflowStage};
use crate::Result;

/// What a request's project reference resolved to
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedOutcome {
    /// An existing project
    Resolved(Project),

    /// A project created for this request
    Created(Project),

    /// Several stored projects match the reference; sorted by name
    Ambiguous(Vec<String>),

    /// The requested stage cannot run yet. `stage` is the earliest stage that
    /// must be completed first.
    MissingPrerequisite {
        project: Option<String>,
        stage: WorkflowStage,
    },
}

impl ResolvedOutcome {
    pub fn project(&self) -> Option<&Project> {
        match self {
            ResolvedOutcome::Resolved(project) | ResolvedOutcome::Created(project) => Some(project),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub outcome: ResolvedOutcome,

    /// Set when a store was unavailable and the outcome rests on partial data
    pub degraded: bool,
}

enum ReferenceMatch {
    One(Project),
    Many(Vec<String>),
    None,
}

/// Resolves intents to projects against the session and project stores
pub struct ProjectResolver {
    sessions: Arc<SessionCache>,
    projects: Arc<dyn ProjectStore>,
    geocoder: Arc<dyn Geocoder>,
}

impl std::fmt::Debug for ProjectResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectResolver")
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

impl ProjectResolver {
    pub fn new(
        sessions: Arc<SessionCache>,
        projects: Arc<dyn ProjectStore>,
        geocoder: Arc<dyn Geocoder>,
    ) -> Self {
        Self {
            sessions,
            projects,
            geocoder,
        }
    }

    pub async fn resolve(&self, intent: &Intent, session_id: &str, user_id: &str) -> Resolution {
        let session = self.sessions.get(session_id, user_id).await;
        let stage = intent.kind.stage();
        let coordinates = intent.params.coordinates;
        let mut degraded = false;

        let reference = intent
            .params
            .project_ref
            .as_deref()
            .map(normalize_name)
            .filter(|r| !r.is_empty());

        if let Some(reference) = reference {
            match self.match_reference(&reference).await {
                Ok(ReferenceMatch::One(project)) => {
                    return self.finish(project, stage, &session, false).await;
                }
                Ok(ReferenceMatch::Many(candidates)) => {
                    tracing::debug!(session_id, %reference, ?candidates, "Ambiguous project reference");
                    return Resolution {
                        outcome: ResolvedOutcome::Ambiguous(candidates),
                        degraded: false,
                    };
                }
                Ok(ReferenceMatch::None) if stage == Some(WorkflowStage::ENTRY) => {
                    return self.create(Some(&reference), coordinates, &session, false).await;
                }
                Ok(ReferenceMatch::None) => {
                    tracing::debug!(session_id, %reference, "No project matches reference");
                    return Resolution {
                        outcome: ResolvedOutcome::MissingPrerequisite {
                            project: Some(reference),
                            stage: WorkflowStage::ENTRY,
                        },
                        degraded: false,
                    };
                }
                Err(e) => {
                    tracing::warn!(session_id, %reference, error = %e, "Project store unavailable, trusting explicit reference");
                    return self
                        .finish(Project::new(&reference, coordinates), None, &session, true)
                        .await;
                }
            }
        }

        // A new site on the entry stage starts a new project rather than
        // reusing the active one.
        let new_site = stage == Some(WorkflowStage::ENTRY) && coordinates.is_some();

        if let Some(active) = session.active_project.clone() {
            match self.projects.get(&active).await {
                Ok(Some(project)) => {
                    let same_site = match (coordinates, project.coordinates) {
                        (Some(requested), Some(existing)) => requested.same_site(&existing),
                        _ => true,
                    };
                    if !new_site || same_site {
                        return self.finish(project, stage, &session, false).await;
                    }
                }
                Ok(None) => {
                    tracing::debug!(session_id, %active, "Active project has no stored record");
                }
                Err(e) if !new_site => {
                    tracing::warn!(session_id, %active, error = %e, "Project store unavailable, using active project");
                    return self
                        .finish(Project::new(&active, coordinates), None, &session, true)
                        .await;
                }
                Err(e) => {
                    tracing::warn!(session_id, %active, error = %e, "Project store unavailable, cannot compare sites");
                    degraded = true;
                }
            }
        }

        if let (Some(WorkflowStage::ENTRY), Some(coords)) = (stage, coordinates) {
            match self.find_by_coordinates(coords).await {
                Ok(Some(project)) => return self.finish(project, stage, &session, false).await,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(session_id, error = %e, "Project store unavailable, creating project locally");
                    degraded = true;
                }
            }
        }

        if stage == Some(WorkflowStage::ENTRY) {
            return self.create(None, coordinates, &session, degraded).await;
        }

        Resolution {
            outcome: ResolvedOutcome::MissingPrerequisite {
                project: None,
                stage: WorkflowStage::ENTRY,
            },
            degraded,
        }
    }

    async fn match_reference(&self, reference: &str) -> Result<ReferenceMatch> {
        if let Some(project) = self.projects.get(reference).await? {
            return Ok(ReferenceMatch::One(project));
        }

        let mut matches: Vec<Project> = self
            .projects
            .list()
            .await?
            .into_iter()
            .filter(|project| fuzzy_matches(&project.name, reference))
            .collect();
        matches.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(match matches.len() {
            0 => ReferenceMatch::None,
            1 => ReferenceMatch::One(matches.remove(0)),
            _ => ReferenceMatch::Many(matches.into_iter().map(|p| p.name).collect()),
        })
    }

    async fn find_by_coordinates(&self, coords: Coordinates) -> Result<Option<Project>> {
        Ok(self
            .projects
            .list()
            .await?
            .into_iter()
            .find(|project| matches!(project.coordinates, Some(c) if c.same_site(&coords))))
    }

    /// Check prerequisites and record the project in the session
    async fn finish(
        &self,
        project: Project,
        stage: Option<WorkflowStage>,
        session: &SessionContext,
        degraded: bool,
    ) -> Resolution {
        self.activate(session, &project.name).await;

        if let Some(missing) = stage.and_then(|s| project.workflow_status.missing_prerequisite(s)) {
            return Resolution {
                outcome: ResolvedOutcome::MissingPrerequisite {
                    project: Some(project.name),
                    stage: missing,
                },
                degraded,
            };
        }

        tracing::debug!(session_id = %session.session_id, project = %project.name, "Resolved project");
        Resolution {
            outcome: ResolvedOutcome::Resolved(project),
            degraded,
        }
    }

    async fn create(
        &self,
        explicit_name: Option<&str>,
        coordinates: Option<Coordinates>,
        session: &SessionContext,
        mut degraded: bool,
    ) -> Resolution {
        let base = match explicit_name {
            Some(name) => name.to_string(),
            None => self.derive_name(coordinates).await,
        };

        let name = match self.unique_name(&base).await {
            Ok(name) => name,
            Err(e) => {
                tracing::warn!(error = %e, "Project store unavailable, name uniqueness unchecked");
                degraded = true;
                base
            }
        };

        let project = Project::new(&name, coordinates);
        if let Err(e) = self.projects.put(&project).await {
            tracing::warn!(project = %project.name, error = %e, "Project record not persisted");
            degraded = true;
        }

        self.activate(session, &project.name).await;
        tracing::info!(
            session_id = %session.session_id,
            project = %project.name,
            coordinates = ?project.coordinates,
            "Created project"
        );

        Resolution {
            outcome: ResolvedOutcome::Created(project),
            degraded,
        }
    }

    async fn activate(&self, session: &SessionContext, name: &str) {
        self.sessions
            .set_active_project(&session.session_id, &session.user_id, name)
            .await;
        self.sessions
            .add_to_history(&session.session_id, &session.user_id, name)
            .await;
    }

    /// Geocoded name when possible, else a name built from the coordinates
    async fn derive_name(&self, coordinates: Option<Coordinates>) -> String {
        let Some(coords) = coordinates else {
            return fallback_name(None);
        };

        match self.geocoder.reverse_geocode(coords).await {
            Some(label) if !normalize_name(&label).is_empty() => {
                format!("{}-wind-farm", normalize_name(&label))
            }
            _ => fallback_name(Some(coords)),
        }
    }

    async fn unique_name(&self, base: &str) -> Result<String> {
        let base = normalize_name(base);
        if self.projects.get(&base).await?.is_none() {
            return Ok(base);
        }
        for suffix in 2..100 {
            let candidate = format!("{}-{}", base, suffix);
            if self.projects.get(&candidate).await?.is_none() {
                return Ok(candidate);
            }
        }
        Ok(fallback_name(None))
    }
}

/// `site-35-50n-101-40w` for coordinates, `project-1a2b3c4d` otherwise
fn fallback_name(coordinates: Option<Coordinates>) -> String {
    match coordinates {
        Some(c) => normalize_name(&format!(
            "site-{:.2}{}-{:.2}{}",
            c.lat.abs(),
            if c.lat >= 0.0 { "n" } else { "s" },
            c.lon.abs(),
            if c.lon >= 0.0 { "e" } else { "w" },
        )),
        None => {
            let id = uuid::Uuid::new_v4().simple().to_string();
            format!("project-{}", &id[..8])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::IntentParser;
    use crate::store::{MemoryProjectStore, MemorySessionStore};
    use crate::testing::StaticGeocoder;
    use std::time::Duration;

    struct Fixture {
        resolver: ProjectResolver,
        sessions: Arc<SessionCache>,
        projects: Arc<MemoryProjectStore>,
    }

    fn fixture(projects: Vec<Project>, geocoder: StaticGeocoder) -> Fixture {
        let sessions = Arc::new(SessionCache::new(
            Arc::new(MemorySessionStore::new()),
            Duration::from_secs(3600),
            Duration::from_secs(300),
            10,
        ));
        let projects = Arc::new(MemoryProjectStore::with_projects(projects));
        Fixture {
            resolver: ProjectResolver::new(sessions.clone(), projects.clone(), Arc::new(geocoder)),
            sessions,
            projects,
        }
    }

    async fn resolve(f: &Fixture, query: &str) -> Resolution {
        let intent = IntentParser::new().parse(query);
        f.resolver.resolve(&intent, "s1", "u1").await
    }

    fn completed(name: &str, through: WorkflowStage) -> Project {
        let mut project = Project::new(name, None);
        for stage in WorkflowStage::ALL.iter().filter(|s| **s <= through) {
            project.workflow_status.mark_complete(*stage);
        }
        project
    }

    #[tokio::test]
    async fn test_entry_stage_creates_geocoded_project_once() {
        let f = fixture(vec![], StaticGeocoder::new("Amarillo, Texas"));

        let first = resolve(&f, "analyze terrain at 35.5, -101.4").await;
        let project = match first.outcome {
            ResolvedOutcome::Created(project) => project,
            other => panic!("expected Created, got {:?}", other),
        };
        assert_eq!(project.name, "amarillo-texas-wind-farm");

        let second = resolve(&f, "analyze terrain at 35.5, -101.4").await;
        assert!(matches!(second.outcome, ResolvedOutcome::Resolved(ref p) if p.name == project.name));
        assert_eq!(f.projects.len(), 1);

        let session = f.sessions.get("s1", "u1").await;
        assert_eq!(session.active_project.as_deref(), Some("amarillo-texas-wind-farm"));
        assert_eq!(session.project_history, vec!["amarillo-texas-wind-farm"]);
    }

    #[tokio::test]
    async fn test_fallback_names() {
        let f = fixture(vec![], StaticGeocoder::unavailable());
        let resolution = resolve(&f, "analyze terrain at 35.5, -101.4").await;
        assert_eq!(
            resolution.outcome.project().map(|p| p.name.as_str()),
            Some("site-35-50n-101-40w")
        );

        let f = fixture(vec![], StaticGeocoder::unavailable());
        let resolution = resolve(&f, "analyze terrain").await;
        let name = &resolution.outcome.project().unwrap().name;
        assert!(name.starts_with("project-") && name.len() == 16, "{}", name);
    }

    #[tokio::test]
    async fn test_geocoded_name_is_deduplicated() {
        let mut existing = Project::new("amarillo-texas-wind-farm", Coordinates::new(35.2, -101.8));
        existing.workflow_status.mark_complete(WorkflowStage::TerrainAnalysis);
        let f = fixture(vec![existing], StaticGeocoder::new("Amarillo, Texas"));

        let resolution = resolve(&f, "analyze terrain at 35.5, -101.4").await;
        assert_eq!(
            resolution.outcome.project().map(|p| p.name.as_str()),
            Some("amarillo-texas-wind-farm-2")
        );
    }

    #[tokio::test]
    async fn test_resolution_is_case_and_whitespace_insensitive() {
        let f = fixture(
            vec![completed("west-texas-wind-farm", WorkflowStage::TerrainAnalysis)],
            StaticGeocoder::unavailable(),
        );
        for query in [
            "optimize layout for \"West Texas Wind Farm\"",
            "optimize layout for \"west-texas-wind-farm \"",
        ] {
            let resolution = resolve(&f, query).await;
            assert!(
                matches!(resolution.outcome, ResolvedOutcome::Resolved(ref p) if p.name == "west-texas-wind-farm"),
                "{}: {:?}",
                query,
                resolution.outcome
            );
        }
    }

    #[tokio::test]
    async fn test_ambiguous_reference_lists_all_sorted() {
        let f = fixture(
            vec![
                completed("west-texas-wind-farm", WorkflowStage::TerrainAnalysis),
                completed("east-texas-wind-farm", WorkflowStage::TerrainAnalysis),
            ],
            StaticGeocoder::unavailable(),
        );
        for _ in 0..2 {
            let resolution = resolve(&f, "optimize layout for texas").await;
            assert_eq!(
                resolution.outcome,
                ResolvedOutcome::Ambiguous(vec![
                    "east-texas-wind-farm".to_string(),
                    "west-texas-wind-farm".to_string()
                ])
            );
        }
        assert!(f.sessions.get("s1", "u1").await.active_project.is_none());
    }

    #[tokio::test]
    async fn test_missing_prerequisite_names_earliest_stage() {
        let f = fixture(
            vec![completed("site-9", WorkflowStage::LayoutOptimization)],
            StaticGeocoder::unavailable(),
        );
        let resolution = resolve(&f, "generate report for site-9").await;
        assert_eq!(
            resolution.outcome,
            ResolvedOutcome::MissingPrerequisite {
                project: Some("site-9".to_string()),
                stage: WorkflowStage::WakeSimulation,
            }
        );
    }

    #[tokio::test]
    async fn test_later_stage_without_project() {
        let f = fixture(vec![], StaticGeocoder::unavailable());
        let resolution = resolve(&f, "optimize the layout").await;
        assert_eq!(
            resolution.outcome,
            ResolvedOutcome::MissingPrerequisite {
                project: None,
                stage: WorkflowStage::TerrainAnalysis,
            }
        );
        assert!(f.projects.is_empty());
    }

    #[tokio::test]
    async fn test_active_project_used_without_reference() {
        let f = fixture(
            vec![completed("site-9", WorkflowStage::TerrainAnalysis)],
            StaticGeocoder::unavailable(),
        );
        f.sessions.set_active_project("s1", "u1", "site-9").await;

        let resolution = resolve(&f, "optimize the layout with 40 turbines").await;
        assert!(matches!(resolution.outcome, ResolvedOutcome::Resolved(ref p) if p.name == "site-9"));
    }

    #[tokio::test]
    async fn test_new_coordinates_start_new_project() {
        let mut existing = completed("site-9", WorkflowStage::TerrainAnalysis);
        existing.coordinates = Coordinates::new(32.0, -100.0);
        let f = fixture(vec![existing], StaticGeocoder::unavailable());
        f.sessions.set_active_project("s1", "u1", "site-9").await;
        f.sessions.add_to_history("s1", "u1", "site-9").await;

        let resolution = resolve(&f, "analyze terrain at 35.5, -101.4").await;
        assert!(matches!(resolution.outcome, ResolvedOutcome::Created(_)));
        let session = f.sessions.get("s1", "u1").await;
        assert_eq!(session.project_history.len(), 2);
    }

    #[tokio::test]
    async fn test_store_outage_degrades() {
        let f = fixture(vec![], StaticGeocoder::unavailable());
        f.sessions.set_active_project("s1", "u1", "site-9").await;
        f.projects.set_unavailable(true);

        let resolution = resolve(&f, "run the wake simulation").await;
        assert!(resolution.degraded);
        assert!(matches!(resolution.outcome, ResolvedOutcome::Resolved(ref p) if p.name == "site-9"));

        let created = resolve(&f, "analyze terrain at 40.1, -88.2").await;
        assert!(created.degraded);
        assert!(matches!(created.outcome, ResolvedOutcome::Created(_)));
    }
}
