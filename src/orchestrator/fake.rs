use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ObservedPhase, ObservedStatus, Orchestrator, OrchestratorError};
use crate::registry::Workspace;

/// Which call(s) on a given release should fail, and with what error.
#[derive(Clone)]
pub struct FaultInjection {
    pub on_deploy: Option<OrchestratorError>,
    pub on_start: Option<OrchestratorError>,
    pub on_stop: Option<OrchestratorError>,
    pub on_delete: Option<OrchestratorError>,
    pub on_get_status: Option<OrchestratorError>,
}

impl Default for FaultInjection {
    fn default() -> Self {
        Self {
            on_deploy: None,
            on_start: None,
            on_stop: None,
            on_delete: None,
            on_get_status: None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ReleaseState {
    Running,
    Stopped,
}

/// In-memory `Orchestrator` used by controller and HTTP-layer tests, with
/// fault injection for every operation. Faults are keyed by workspace id and
/// consumed once so a test can assert recovery after an injected failure.
#[derive(Default)]
pub struct FakeOrchestrator {
    releases: Mutex<HashMap<String, ReleaseState>>,
    faults: Mutex<HashMap<String, FaultInjection>>,
}

impl FakeOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a one-shot fault for the named workspace id. Each field that
    /// is `Some` is consumed (and cleared) the next time that operation is
    /// invoked for that workspace.
    pub async fn inject(&self, workspace_id: &str, fault: FaultInjection) {
        self.faults.lock().await.insert(workspace_id.to_string(), fault);
    }

    async fn take_fault(
        &self,
        workspace_id: &str,
        pick: impl Fn(&mut FaultInjection) -> Option<OrchestratorError>,
    ) -> Option<OrchestratorError> {
        let mut faults = self.faults.lock().await;
        let fault = faults.get_mut(workspace_id)?;
        pick(fault)
    }

    pub async fn release_exists(&self, workspace_id: &str) -> bool {
        self.releases.lock().await.contains_key(workspace_id)
    }
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn deploy(
        &self,
        workspace: &Workspace,
        _secrets: &HashMap<String, String>,
    ) -> Result<(), OrchestratorError> {
        if let Some(err) = self.take_fault(&workspace.id, |f| f.on_deploy.take()).await {
            return Err(err);
        }
        self.releases
            .lock()
            .await
            .insert(workspace.id.clone(), ReleaseState::Running);
        Ok(())
    }

    async fn start(&self, workspace: &Workspace) -> Result<(), OrchestratorError> {
        if let Some(err) = self.take_fault(&workspace.id, |f| f.on_start.take()).await {
            return Err(err);
        }
        self.releases
            .lock()
            .await
            .insert(workspace.id.clone(), ReleaseState::Running);
        Ok(())
    }

    async fn stop(&self, workspace: &Workspace) -> Result<(), OrchestratorError> {
        if let Some(err) = self.take_fault(&workspace.id, |f| f.on_stop.take()).await {
            return Err(err);
        }
        self.releases
            .lock()
            .await
            .insert(workspace.id.clone(), ReleaseState::Stopped);
        Ok(())
    }

    async fn delete(&self, workspace: &Workspace) -> Result<(), OrchestratorError> {
        if let Some(err) = self.take_fault(&workspace.id, |f| f.on_delete.take()).await {
            return Err(err);
        }
        self.releases.lock().await.remove(&workspace.id);
        self.faults.lock().await.remove(&workspace.id);
        Ok(())
    }

    async fn get_status(&self, workspace: &Workspace) -> Result<ObservedStatus, OrchestratorError> {
        if let Some(err) = self.take_fault(&workspace.id, |f| f.on_get_status.take()).await {
            return Err(err);
        }
        let state = self.releases.lock().await.get(&workspace.id).copied();
        Ok(match state {
            Some(ReleaseState::Running) => ObservedStatus {
                phase: ObservedPhase::Running,
                ready: true,
                message: None,
                pod_ip: Some("10.0.0.5".to_string()),
                node_name: Some("fake-node".to_string()),
                started_at: Some(chrono::Utc::now()),
            },
            Some(ReleaseState::Stopped) => ObservedStatus {
                phase: ObservedPhase::Stopped,
                ready: false,
                message: Some("No pods found".to_string()),
                pod_ip: None,
                node_name: None,
                started_at: None,
            },
            None => ObservedStatus::unknown(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WorkspaceStatus;

    fn workspace(id: &str) -> Workspace {
        Workspace {
            id: id.to_string(),
            name: "demo".to_string(),
            status: WorkspaceStatus::Pending,
            docker_image: "img".to_string(),
            docker_image_tag: "latest".to_string(),
            release_name: format!("hld-{id}"),
            namespace: format!("workspace-{id}"),
            ingress_hostname: None,
            cpu_request: None,
            memory_request: None,
            cpu_limit: None,
            memory_limit: None,
            data_size: None,
            src_size: None,
            git_enabled: false,
            git_user_name: None,
            git_user_email: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn deploy_then_status_reports_running() {
        let orch = FakeOrchestrator::new();
        let ws = workspace("a1b2c3d4");
        orch.deploy(&ws, &HashMap::new()).await.unwrap();
        let status = orch.get_status(&ws).await.unwrap();
        assert_eq!(status.phase, ObservedPhase::Running);
        assert!(status.ready);
    }

    #[tokio::test]
    async fn injected_fault_is_consumed_once() {
        let orch = FakeOrchestrator::new();
        let ws = workspace("a1b2c3d4");
        orch.inject(
            "a1b2c3d4",
            FaultInjection {
                on_deploy: Some(OrchestratorError::Failed("namespace already exists".to_string())),
                ..Default::default()
            },
        )
        .await;

        let first = orch.deploy(&ws, &HashMap::new()).await;
        assert!(first.is_err());
        assert!(!orch.release_exists("a1b2c3d4").await);

        orch.deploy(&ws, &HashMap::new()).await.unwrap();
        assert!(orch.release_exists("a1b2c3d4").await);
    }

    #[tokio::test]
    async fn delete_on_absent_release_succeeds() {
        let orch = FakeOrchestrator::new();
        let ws = workspace("missing");
        orch.delete(&ws).await.unwrap();
    }

    #[tokio::test]
    async fn stop_already_stopped_is_idempotent() {
        let orch = FakeOrchestrator::new();
        let ws = workspace("a1b2c3d4");
        orch.deploy(&ws, &HashMap::new()).await.unwrap();
        orch.stop(&ws).await.unwrap();
        orch.stop(&ws).await.unwrap();
        let status = orch.get_status(&ws).await.unwrap();
        assert_eq!(status.phase, ObservedPhase::Stopped);
    }
}
