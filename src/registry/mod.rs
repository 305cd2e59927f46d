pub mod memory;
pub mod models;
pub mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;

pub use memory::MemoryRegistry;
pub use models::{EventKind, NewEvent, Workspace, WorkspaceEvent, WorkspaceStatus};
pub use sqlite::SqliteRegistry;

/// Errors a `Registry` implementation can surface. Kept deliberately small:
/// the controller (`ApiError::from`) is the only place that turns these into
/// HTTP-facing classifications.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("workspace id '{0}' already exists")]
    AlreadyExists(String),

    #[error("{0}")]
    Internal(String),
}

/// Durable, transactional store of workspace declarations, secrets, and the
/// event log. A capability the controller depends on, not a concrete
/// driver; see `SqliteRegistry` for the production implementation and
/// `MemoryRegistry` for the in-process testing implementation.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Insert a new workspace. Fails with `AlreadyExists` if `id` collides.
    /// Sets `created_at`/`updated_at` to the current instant, overwriting
    /// whatever the caller supplied.
    async fn create(&self, workspace: Workspace) -> Result<Workspace, RegistryError>;

    /// Returns `None` when no workspace with this id exists. Callers MUST
    /// treat this identically to an explicit not-found signal.
    async fn get(&self, id: &str) -> Result<Option<Workspace>, RegistryError>;

    /// All workspaces, newest-created first. No pagination.
    async fn list(&self) -> Result<Vec<Workspace>, RegistryError>;

    /// Replace mutable fields of an existing workspace; bumps `updated_at`.
    /// `id`, `release_name`, and `namespace` are never updated even if the
    /// caller supplies different values for them.
    async fn update(&self, workspace: Workspace) -> Result<Workspace, RegistryError>;

    /// Remove a workspace, cascading to its secrets and events. Idempotent:
    /// deleting a missing id is not an error.
    async fn delete(&self, id: &str) -> Result<(), RegistryError>;

    /// Upsert a single secret value by `(workspace_id, key)`.
    async fn set_secret(
        &self,
        workspace_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), RegistryError>;

    /// Returns `None`, not an error, when the key is absent; lets the
    /// controller distinguish optional keys from failures.
    async fn get_secret(
        &self,
        workspace_id: &str,
        key: &str,
    ) -> Result<Option<String>, RegistryError>;

    /// All secrets for a workspace, keyed by secret name. Returns an empty
    /// map, not an error, when none are stored.
    async fn get_secrets(&self, workspace_id: &str) -> Result<HashMap<String, String>, RegistryError>;

    /// Removes all secrets for a workspace. Idempotent.
    async fn delete_secrets(&self, workspace_id: &str) -> Result<(), RegistryError>;

    /// Append an event, assigning a monotonic id and the current timestamp.
    async fn log_event(&self, event: NewEvent) -> Result<WorkspaceEvent, RegistryError>;

    /// Newest-first events for a workspace. `limit` is clamped to
    /// `models::MAX_EVENTS_LIMIT` regardless of what the caller requests.
    async fn get_events(
        &self,
        workspace_id: &str,
        limit: i64,
    ) -> Result<Vec<WorkspaceEvent>, RegistryError>;

    /// Release any held resources (connection pool, file handles). Safe to
    /// call once at graceful shutdown.
    async fn close(&self);
}
