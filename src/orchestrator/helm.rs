use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_yaml::{Mapping, Value};
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ObservedPhase, ObservedStatus, Orchestrator, OrchestratorError};
use crate::registry::models::{
    Workspace, SECRET_ANTHROPIC_API_KEY, SECRET_GH_TOKEN, SECRET_HUMANLAYER_API_KEY,
    SECRET_OPENROUTER_API_KEY,
};

const INSTALL_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const UPGRADE_TIMEOUT: Duration = Duration::from_secs(2 * 60);
const UNINSTALL_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// Canonical chart-values names for recognized secrets, placed under a
/// `secrets` sub-map keyed by these names. `gh_token` lives in the `git`
/// block instead, not here.
fn canonical_secret_name(key: &str) -> Option<&'static str> {
    match key {
        SECRET_HUMANLAYER_API_KEY => Some("humanlayerApiKey"),
        SECRET_ANTHROPIC_API_KEY => Some("anthropicApiKey"),
        SECRET_OPENROUTER_API_KEY => Some("openrouterApiKey"),
        _ => None,
    }
}

/// Release-engine adapter implementing the orchestrator port by shelling
/// out to `helm` for install/upgrade/uninstall and using `kube` for
/// namespace management and pod status queries.
pub struct HelmKubernetesOrchestrator {
    chart_path: String,
    client: Client,
}

impl HelmKubernetesOrchestrator {
    /// Resolves cluster connectivity: an explicit configured path wins;
    /// otherwise `Config::infer()` walks the remaining order (env
    /// `KUBECONFIG`, then the per-user default kubeconfig, then in-cluster
    /// configuration).
    pub async fn connect(chart_path: String, kubeconfig: Option<String>) -> anyhow::Result<Self> {
        let config = match kubeconfig {
            Some(path) => {
                let raw = Kubeconfig::read_from(&path)?;
                Config::from_kubeconfig(&raw, &KubeConfigOptions::default()).await?
            }
            None => Config::infer().await?,
        };

        let client = Client::try_from(config)?;
        Ok(Self { chart_path, client })
    }

    fn render_values(workspace: &Workspace, secrets: &HashMap<String, String>, running: bool) -> Mapping {
        let mut root = Mapping::new();

        let mut ws = Mapping::new();
        ws.insert("id".into(), workspace.id.clone().into());
        ws.insert("name".into(), workspace.name.clone().into());
        root.insert("workspace".into(), ws.into());

        let mut image = Mapping::new();
        image.insert("repository".into(), workspace.docker_image.clone().into());
        image.insert("tag".into(), workspace.docker_image_tag.clone().into());
        root.insert("image".into(), image.into());

        let mut state = Mapping::new();
        state.insert("running".into(), running.into());
        root.insert("state".into(), state.into());

        if workspace.cpu_request.is_some()
            || workspace.cpu_limit.is_some()
            || workspace.memory_request.is_some()
            || workspace.memory_limit.is_some()
        {
            let mut resources = Mapping::new();
            if let Some(v) = &workspace.cpu_request {
                resources.insert("cpuRequest".into(), v.clone().into());
            }
            if let Some(v) = &workspace.cpu_limit {
                resources.insert("cpuLimit".into(), v.clone().into());
            }
            if let Some(v) = &workspace.memory_request {
                resources.insert("memoryRequest".into(), v.clone().into());
            }
            if let Some(v) = &workspace.memory_limit {
                resources.insert("memoryLimit".into(), v.clone().into());
            }
            root.insert("resources".into(), resources.into());
        }

        if workspace.data_size.is_some() || workspace.src_size.is_some() {
            let mut storage = Mapping::new();
            if let Some(v) = &workspace.data_size {
                storage.insert("dataSize".into(), v.clone().into());
            }
            if let Some(v) = &workspace.src_size {
                storage.insert("srcSize".into(), v.clone().into());
            }
            root.insert("storage".into(), storage.into());
        }

        if let Some(hostname) = &workspace.ingress_hostname {
            let mut ingress = Mapping::new();
            ingress.insert("hostname".into(), hostname.clone().into());
            root.insert("ingress".into(), ingress.into());
        }

        if workspace.git_enabled {
            let mut git = Mapping::new();
            if let Some(name) = &workspace.git_user_name {
                git.insert("userName".into(), name.clone().into());
            }
            if let Some(email) = &workspace.git_user_email {
                git.insert("userEmail".into(), email.clone().into());
            }
            if let Some(token) = secrets.get(SECRET_GH_TOKEN) {
                git.insert("ghToken".into(), token.clone().into());
            }
            root.insert("git".into(), git.into());
        }

        let mut rendered_secrets = Mapping::new();
        for (key, value) in secrets {
            if key == SECRET_GH_TOKEN {
                continue;
            }
            if let Some(canonical) = canonical_secret_name(key) {
                rendered_secrets.insert(canonical.into(), value.clone().into());
            }
        }
        if !rendered_secrets.is_empty() {
            root.insert("secrets".into(), rendered_secrets.into());
        }

        root
    }

    async fn write_values_file(values: &Mapping) -> Result<NamedTempFile, OrchestratorError> {
        let yaml = serde_yaml::to_string(&Value::Mapping(values.clone()))
            .map_err(|e| OrchestratorError::Failed(format!("failed to render chart values: {e}")))?;

        let mut file = NamedTempFile::new()
            .map_err(|e| OrchestratorError::Failed(format!("failed to create temp values file: {e}")))?;
        tokio::task::block_in_place(|| std::io::Write::write_all(&mut file, yaml.as_bytes()))
            .map_err(|e| OrchestratorError::Failed(format!("failed to write temp values file: {e}")))?;
        Ok(file)
    }

    async fn run_helm_capture(
        &self,
        args: &[&str],
        timeout: Duration,
    ) -> Result<std::process::Output, OrchestratorError> {
        debug!(?args, "invoking helm");
        let mut cmd = Command::new("helm");
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = cmd
            .spawn()
            .map_err(|e| OrchestratorError::Unavailable(format!("failed to spawn helm: {e}")))?;

        tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| OrchestratorError::Failed("helm command timed out".to_string()))?
            .map_err(|e| OrchestratorError::Failed(format!("helm command failed: {e}")))
    }

    async fn run_helm(&self, args: &[&str], timeout: Duration) -> Result<(), OrchestratorError> {
        let output = self.run_helm_capture(args, timeout).await?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.contains("another operation") || stderr.contains("in progress") {
            return Err(OrchestratorError::Conflict(stderr));
        }
        Err(OrchestratorError::Failed(stderr))
    }

    /// Maps the release engine's native status string to the small observed
    /// phase vocabulary.
    fn map_release_phase(status: &str) -> ObservedPhase {
        match status {
            "deployed" => ObservedPhase::Running,
            "failed" => ObservedPhase::Error,
            "pending-install" | "pending-upgrade" | "pending-rollback" => ObservedPhase::Pending,
            "uninstalling" => ObservedPhase::Stopping,
            _ => ObservedPhase::Unknown,
        }
    }

    /// Queries `helm status` for the release and returns its native status
    /// string, or `None` when the release does not exist.
    async fn release_status(&self, workspace: &Workspace) -> Result<Option<String>, OrchestratorError> {
        let output = self
            .run_helm_capture(
                &[
                    "status",
                    &workspace.release_name,
                    "--namespace",
                    &workspace.namespace,
                    "-o",
                    "json",
                ],
                Duration::from_secs(5),
            )
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("release: not found") {
                return Ok(None);
            }
            return Err(OrchestratorError::Failed(stderr.trim().to_string()));
        }

        let body: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| OrchestratorError::Failed(format!("failed to parse helm status: {e}")))?;
        let status = body
            .get("info")
            .and_then(|info| info.get("status"))
            .and_then(|s| s.as_str())
            .unwrap_or("unknown")
            .to_string();
        Ok(Some(status))
    }

    async fn ensure_namespace(&self, namespace: &str) -> Result<(), OrchestratorError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(err)) if err.code == 409 => Ok(()),
            Err(e) => Err(OrchestratorError::Unavailable(format!(
                "failed to create namespace {namespace}: {e}"
            ))),
        }
    }
}

#[async_trait]
impl Orchestrator for HelmKubernetesOrchestrator {
    async fn deploy(
        &self,
        workspace: &Workspace,
        secrets: &HashMap<String, String>,
    ) -> Result<(), OrchestratorError> {
        self.ensure_namespace(&workspace.namespace).await?;

        let values = Self::render_values(workspace, secrets, true);
        let values_file = Self::write_values_file(&values).await?;
        let values_path = values_file.path().to_string_lossy().to_string();

        self.run_helm(
            &[
                "install",
                &workspace.release_name,
                &self.chart_path,
                "--namespace",
                &workspace.namespace,
                "--create-namespace",
                "-f",
                &values_path,
                "--timeout",
                "5m",
            ],
            INSTALL_TIMEOUT,
        )
        .await
    }

    async fn start(&self, workspace: &Workspace) -> Result<(), OrchestratorError> {
        let values = Self::render_values(workspace, &HashMap::new(), true);
        let values_file = Self::write_values_file(&values).await?;
        let values_path = values_file.path().to_string_lossy().to_string();

        self.run_helm(
            &[
                "upgrade",
                &workspace.release_name,
                &self.chart_path,
                "--namespace",
                &workspace.namespace,
                "--reuse-values",
                "-f",
                &values_path,
                "--timeout",
                "2m",
            ],
            UPGRADE_TIMEOUT,
        )
        .await
    }

    async fn stop(&self, workspace: &Workspace) -> Result<(), OrchestratorError> {
        let values = Self::render_values(workspace, &HashMap::new(), false);
        let values_file = Self::write_values_file(&values).await?;
        let values_path = values_file.path().to_string_lossy().to_string();

        self.run_helm(
            &[
                "upgrade",
                &workspace.release_name,
                &self.chart_path,
                "--namespace",
                &workspace.namespace,
                "--reuse-values",
                "-f",
                &values_path,
                "--timeout",
                "2m",
            ],
            UPGRADE_TIMEOUT,
        )
        .await
    }

    async fn delete(&self, workspace: &Workspace) -> Result<(), OrchestratorError> {
        let result = self
            .run_helm(
                &[
                    "uninstall",
                    &workspace.release_name,
                    "--namespace",
                    &workspace.namespace,
                    "--timeout",
                    "2m",
                ],
                UNINSTALL_TIMEOUT,
            )
            .await;

        if let Err(OrchestratorError::Failed(msg)) = &result {
            if !msg.contains("not found") && !msg.contains("release: not found") {
                return Err(OrchestratorError::Failed(msg.clone()));
            }
        } else {
            result?;
        }

        let ns_api: Api<Namespace> = Api::all(self.client.clone());
        if let Err(e) = ns_api.delete(&workspace.namespace, &DeleteParams::default()).await {
            warn!("best-effort namespace delete failed for {}: {}", workspace.namespace, e);
        }

        Ok(())
    }

    async fn get_status(&self, workspace: &Workspace) -> Result<ObservedStatus, OrchestratorError> {
        let Some(release_status) = self.release_status(workspace).await? else {
            return Ok(ObservedStatus::unknown());
        };
        let phase = Self::map_release_phase(&release_status);

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &workspace.namespace);
        let selector = format!("app.kubernetes.io/instance={}", workspace.release_name);
        let list = tokio::time::timeout(
            Duration::from_secs(5),
            pods.list(&ListParams::default().labels(&selector)),
        )
        .await
        .map_err(|_| OrchestratorError::Unavailable("timed out listing pods".to_string()))?
        .map_err(|e| OrchestratorError::Unavailable(format!("failed to list pods: {e}")))?;

        let Some(pod) = list.items.into_iter().next() else {
            return Ok(ObservedStatus {
                phase: ObservedPhase::Stopped,
                ready: false,
                message: Some("No pods found".to_string()),
                pod_ip: None,
                node_name: None,
                started_at: None,
            });
        };

        let status = pod.status.unwrap_or_default();

        let ready = status
            .conditions
            .unwrap_or_default()
            .iter()
            .any(|c| c.type_ == "Ready" && c.status == "True");

        let mut message = None;
        for cs in status.container_statuses.unwrap_or_default() {
            if let Some(state) = cs.state {
                if let Some(waiting) = state.waiting {
                    message = waiting.reason.or(waiting.message);
                    break;
                }
                if let Some(terminated) = state.terminated {
                    message = terminated.reason.or(terminated.message);
                    break;
                }
            }
        }

        Ok(ObservedStatus {
            phase,
            ready,
            message,
            pod_ip: status.pod_ip,
            node_name: pod.spec.and_then(|s| s.node_name),
            started_at: status.start_time.map(|t| t.0),
        })
    }
}
