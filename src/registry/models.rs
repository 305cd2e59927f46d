use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The declared desired state of one tenant environment.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub status: WorkspaceStatus,
    pub docker_image: String,
    pub docker_image_tag: String,
    pub release_name: String,
    pub namespace: String,
    pub ingress_hostname: Option<String>,
    pub cpu_request: Option<String>,
    pub memory_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_limit: Option<String>,
    pub data_size: Option<String>,
    pub src_size: Option<String>,
    pub git_enabled: bool,
    pub git_user_name: Option<String>,
    pub git_user_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The user-visible lifecycle projection held by the registry. Never
/// confused with the *observed* status computed at read time from the
/// orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceStatus {
    Pending,
    Running,
    Stopped,
    Error,
}

impl WorkspaceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceStatus::Pending => "pending",
            WorkspaceStatus::Running => "running",
            WorkspaceStatus::Stopped => "stopped",
            WorkspaceStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(WorkspaceStatus::Pending),
            "running" => Some(WorkspaceStatus::Running),
            "stopped" => Some(WorkspaceStatus::Stopped),
            "error" => Some(WorkspaceStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An append-only audit record for a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceEvent {
    pub id: i64,
    pub workspace_id: String,
    pub kind: EventKind,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A not-yet-persisted event; the registry assigns `id` and `created_at`.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub workspace_id: String,
    pub kind: EventKind,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
}

impl NewEvent {
    pub fn new(workspace_id: impl Into<String>, kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            kind,
            message: message.into(),
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Deployed,
    Started,
    Stopped,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Deployed => "deployed",
            EventKind::Started => "started",
            EventKind::Stopped => "stopped",
            EventKind::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(EventKind::Created),
            "deployed" => Some(EventKind::Deployed),
            "started" => Some(EventKind::Started),
            "stopped" => Some(EventKind::Stopped),
            "error" => Some(EventKind::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hard upper bound the registry clamps `GetEvents` limits to.
pub const MAX_EVENTS_LIMIT: i64 = 100;
/// Default limit applied by the HTTP surface when the client omits one.
pub const DEFAULT_EVENTS_LIMIT: i64 = 50;

/// Recognized secret keys the release-engine adapter consumes.
pub const SECRET_HUMANLAYER_API_KEY: &str = "humanlayer_api_key";
pub const SECRET_ANTHROPIC_API_KEY: &str = "anthropic_api_key";
pub const SECRET_OPENROUTER_API_KEY: &str = "openrouter_api_key";
pub const SECRET_GH_TOKEN: &str = "gh_token";
