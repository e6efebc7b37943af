//! Windflow Core - orchestration for multi-stage wind farm analysis
//!
//! Accepts natural-language analysis requests, resolves which project they
//! concern and routes each one to the compute worker for its workflow stage.
//!
//! # Architecture
//!
//! ```text
//!  query ──► IntentParser ──► ProjectResolver ──► WorkerInvoker ──► Worker
//!                                 │      │              │
//!                          SessionCache  ProjectStore   ├─ ok ──► advisor
//!                                 │                     └─ err ─► categorize
//!                           SessionStore
//! ```
//!
//! - **Intent parsing** (`intent`): rule-based classification and typed
//!   parameter extraction
//! - **Project resolution** (`resolver`): explicit references, active
//!   project, creation, ambiguity and prerequisite checks
//! - **Session state** (`session`): cache-aside adapter over a durable store
//! - **Workers** (`worker`): registry, bounded retrying invocation and
//!   response validation
//! - **Errors** (`categorize`): fixed failure taxonomy with remediation
//! - **Diagnostics** (`diagnostics`): configuration and worker health checks
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use windflow_core::{AnalysisRequest, Orchestrator, WindflowConfig, WorkerRegistry};
//! use windflow_core::geocoding::NoopGeocoder;
//! use windflow_core::store::{MemoryProjectStore, MemorySessionStore};
//!
//! # async fn run() {
//! let orchestrator = Orchestrator::new(
//!     &WindflowConfig::default(),
//!     Arc::new(WorkerRegistry::new()),
//!     Arc::new(MemorySessionStore::new()),
//!     Arc::new(MemoryProjectStore::new()),
//!     Arc::new(NoopGeocoder),
//! );
//!
//! let response = orchestrator
//!     .handle(AnalysisRequest::new("session-1", "user-1", "analyze terrain at 35.5, -101.4"))
//!     .await;
//! println!("{}", response.message);
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, missing_debug_implementations)]

pub mod advisor;
pub mod categorize;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod geocoding;
pub mod intent;
pub mod orchestrator;
pub mod project;
pub mod resolver;
pub mod session;
pub mod store;
pub mod testing;
pub mod types;
pub mod worker;

pub use advisor::{ActionSuggestion, NextSteps};
pub use categorize::{categorize, CategorizedError, ErrorKind, RawError};
pub use config::WindflowConfig;
pub use diagnostics::{DiagnosticResult, Diagnostics};
pub use error::{Result, WindflowError};
pub use intent::{Intent, IntentKind, IntentParser};
pub use orchestrator::{AnalysisRequest, AnalysisResponse, Orchestrator, ResponseOutcome};
pub use project::Project;
pub use resolver::{ProjectResolver, Resolution, ResolvedOutcome};
pub use session::{SessionCache, SessionContext};
pub use types::{Coordinates, RequestId, WorkflowStage, WorkflowStatus};
pub use worker::{Worker, WorkerFailure, WorkerInvocation, WorkerInvoker, WorkerRegistry};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
