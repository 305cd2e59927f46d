pub mod fake;
pub mod helm;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub use fake::FakeOrchestrator;
pub use helm::HelmKubernetesOrchestrator;

use crate::registry::Workspace;

/// Errors an `Orchestrator` implementation can surface.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The release engine reports an in-progress operation on the same
    /// release; the caller should retry.
    #[error("{0}")]
    Conflict(String),

    /// Cluster unreachable or credentials invalid.
    #[error("{0}")]
    Unavailable(String),

    /// Any other orchestrator-side failure.
    #[error("{0}")]
    Failed(String),
}

/// One of the five phases an observed release can be in, after collapsing
/// the release engine's native states through the observation mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservedPhase {
    Running,
    Stopped,
    Pending,
    Stopping,
    Error,
    Unknown,
}

/// The read-time projection of a workspace's live cluster state. Never
/// persisted; attached to a response only.
#[derive(Debug, Clone, Serialize)]
pub struct ObservedStatus {
    pub phase: ObservedPhase,
    pub ready: bool,
    pub message: Option<String>,
    pub pod_ip: Option<String>,
    pub node_name: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl ObservedStatus {
    pub fn unknown() -> Self {
        Self {
            phase: ObservedPhase::Unknown,
            ready: false,
            message: None,
            pod_ip: None,
            node_name: None,
            started_at: None,
        }
    }
}

/// Capability interface consumed by the lifecycle controller.
/// `HelmKubernetesOrchestrator` is the production implementation;
/// `FakeOrchestrator` is the in-memory testing implementation with fault
/// injection for every operation.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Materialize a new release in the workspace's namespace, creating the
    /// namespace if absent. Must be atomic from the controller's
    /// viewpoint: either the release exists and is reachable afterwards, or
    /// this returns an error and leaves no durable cluster state beyond
    /// (optionally) an empty namespace.
    async fn deploy(
        &self,
        workspace: &Workspace,
        secrets: &HashMap<String, String>,
    ) -> Result<(), OrchestratorError>;

    /// Scale the existing release to zero replicas. Idempotent.
    async fn stop(&self, workspace: &Workspace) -> Result<(), OrchestratorError>;

    /// Scale the existing release to one replica. Idempotent.
    async fn start(&self, workspace: &Workspace) -> Result<(), OrchestratorError>;

    /// Uninstall the release and best-effort delete the namespace. MUST
    /// succeed when the release is already absent.
    async fn delete(&self, workspace: &Workspace) -> Result<(), OrchestratorError>;

    /// Project the release's live cluster state.
    async fn get_status(&self, workspace: &Workspace) -> Result<ObservedStatus, OrchestratorError>;
}
