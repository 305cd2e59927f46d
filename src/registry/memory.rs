use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::models::{NewEvent, Workspace, WorkspaceEvent, MAX_EVENTS_LIMIT};
use super::{Registry, RegistryError};

#[derive(Default)]
struct Inner {
    workspaces: HashMap<String, Workspace>,
    secrets: HashMap<String, HashMap<String, String>>,
    events: Vec<WorkspaceEvent>,
    next_event_id: i64,
}

/// In-process `Registry` used by controller and HTTP-layer unit tests.
/// Guarded by a single mutex: simplicity over throughput, since tests never
/// contend on it.
#[derive(Default)]
pub struct MemoryRegistry {
    inner: Mutex<Inner>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn create(&self, workspace: Workspace) -> Result<Workspace, RegistryError> {
        let mut inner = self.inner.lock().await;
        if inner.workspaces.contains_key(&workspace.id) {
            return Err(RegistryError::AlreadyExists(workspace.id));
        }
        let now = Utc::now();
        let workspace = Workspace {
            created_at: now,
            updated_at: now,
            ..workspace
        };
        inner.workspaces.insert(workspace.id.clone(), workspace.clone());
        Ok(workspace)
    }

    async fn get(&self, id: &str) -> Result<Option<Workspace>, RegistryError> {
        Ok(self.inner.lock().await.workspaces.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Workspace>, RegistryError> {
        let mut items: Vec<Workspace> = self.inner.lock().await.workspaces.values().cloned().collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(items)
    }

    async fn update(&self, workspace: Workspace) -> Result<Workspace, RegistryError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let workspace = Workspace {
            updated_at: now,
            ..workspace
        };
        inner.workspaces.insert(workspace.id.clone(), workspace.clone());
        Ok(workspace)
    }

    async fn delete(&self, id: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().await;
        inner.workspaces.remove(id);
        inner.secrets.remove(id);
        inner.events.retain(|e| e.workspace_id != id);
        Ok(())
    }

    async fn set_secret(&self, workspace_id: &str, key: &str, value: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().await;
        inner
            .secrets
            .entry(workspace_id.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_secret(&self, workspace_id: &str, key: &str) -> Result<Option<String>, RegistryError> {
        let inner = self.inner.lock().await;
        Ok(inner.secrets.get(workspace_id).and_then(|m| m.get(key).cloned()))
    }

    async fn get_secrets(&self, workspace_id: &str) -> Result<HashMap<String, String>, RegistryError> {
        let inner = self.inner.lock().await;
        Ok(inner.secrets.get(workspace_id).cloned().unwrap_or_default())
    }

    async fn delete_secrets(&self, workspace_id: &str) -> Result<(), RegistryError> {
        self.inner.lock().await.secrets.remove(workspace_id);
        Ok(())
    }

    async fn log_event(&self, event: NewEvent) -> Result<WorkspaceEvent, RegistryError> {
        let mut inner = self.inner.lock().await;
        inner.next_event_id += 1;
        let record = WorkspaceEvent {
            id: inner.next_event_id,
            workspace_id: event.workspace_id,
            kind: event.kind,
            message: event.message,
            metadata: event.metadata,
            created_at: Utc::now(),
        };
        inner.events.push(record.clone());
        Ok(record)
    }

    async fn get_events(&self, workspace_id: &str, limit: i64) -> Result<Vec<WorkspaceEvent>, RegistryError> {
        let limit = limit.clamp(0, MAX_EVENTS_LIMIT) as usize;
        let inner = self.inner.lock().await;
        let mut matching: Vec<WorkspaceEvent> = inner
            .events
            .iter()
            .filter(|e| e.workspace_id == workspace_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.id.cmp(&a.id));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn close(&self) {}
}
