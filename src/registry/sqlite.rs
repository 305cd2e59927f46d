use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

use super::models::{EventKind, NewEvent, Workspace, WorkspaceEvent, WorkspaceStatus, MAX_EVENTS_LIMIT};
use super::{Registry, RegistryError};

/// 1:1 mirror of the `workspaces` table. Kept separate from the domain
/// `Workspace` type so the enum/bool conversions live in one place instead
/// of leaking sqlx decode details into the rest of the crate.
#[derive(FromRow)]
struct WorkspaceRow {
    id: String,
    name: String,
    status: String,
    docker_image: String,
    docker_image_tag: String,
    release_name: String,
    namespace: String,
    ingress_hostname: Option<String>,
    cpu_request: Option<String>,
    memory_request: Option<String>,
    cpu_limit: Option<String>,
    memory_limit: Option<String>,
    data_size: Option<String>,
    src_size: Option<String>,
    git_enabled: bool,
    git_user_name: Option<String>,
    git_user_email: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WorkspaceRow {
    fn into_domain(self) -> Result<Workspace, RegistryError> {
        let status = WorkspaceStatus::parse(&self.status).ok_or_else(|| {
            RegistryError::Internal(format!("corrupt status '{}' for workspace {}", self.status, self.id))
        })?;
        Ok(Workspace {
            id: self.id,
            name: self.name,
            status,
            docker_image: self.docker_image,
            docker_image_tag: self.docker_image_tag,
            release_name: self.release_name,
            namespace: self.namespace,
            ingress_hostname: self.ingress_hostname,
            cpu_request: self.cpu_request,
            memory_request: self.memory_request,
            cpu_limit: self.cpu_limit,
            memory_limit: self.memory_limit,
            data_size: self.data_size,
            src_size: self.src_size,
            git_enabled: self.git_enabled,
            git_user_name: self.git_user_name,
            git_user_email: self.git_user_email,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct EventRow {
    id: i64,
    workspace_id: String,
    kind: String,
    message: String,
    metadata: Option<String>,
    created_at: DateTime<Utc>,
}

impl EventRow {
    fn into_domain(self) -> Result<WorkspaceEvent, RegistryError> {
        let kind = EventKind::parse(&self.kind).ok_or_else(|| {
            RegistryError::Internal(format!("corrupt event kind '{}' for event {}", self.kind, self.id))
        })?;
        let metadata = match self.metadata {
            Some(raw) => Some(serde_json::from_str(&raw).map_err(|e| {
                RegistryError::Internal(format!("corrupt event metadata for event {}: {}", self.id, e))
            })?),
            None => None,
        };
        Ok(WorkspaceEvent {
            id: self.id,
            workspace_id: self.workspace_id,
            kind,
            message: self.message,
            metadata,
            created_at: self.created_at,
        })
    }
}

fn internal(err: sqlx::Error) -> RegistryError {
    RegistryError::Internal(err.to_string())
}

/// Production `Registry` implementation, backed by a single-writer,
/// many-reader SQLite pool.
#[derive(Clone)]
pub struct SqliteRegistry {
    pool: SqlitePool,
}

impl SqliteRegistry {
    /// Opens (creating if absent) the database at `path`, creating its
    /// parent directory first, and applies embedded migrations.
    pub async fn connect(path: &str) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl Registry for SqliteRegistry {
    async fn create(&self, workspace: Workspace) -> Result<Workspace, RegistryError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO workspaces (
                id, name, status, docker_image, docker_image_tag,
                release_name, namespace, ingress_hostname,
                cpu_request, memory_request, cpu_limit, memory_limit,
                data_size, src_size, git_enabled, git_user_name, git_user_email,
                created_at, updated_at
            ) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
            "#,
        )
        .bind(&workspace.id)
        .bind(&workspace.name)
        .bind(workspace.status.as_str())
        .bind(&workspace.docker_image)
        .bind(&workspace.docker_image_tag)
        .bind(&workspace.release_name)
        .bind(&workspace.namespace)
        .bind(&workspace.ingress_hostname)
        .bind(&workspace.cpu_request)
        .bind(&workspace.memory_request)
        .bind(&workspace.cpu_limit)
        .bind(&workspace.memory_limit)
        .bind(&workspace.data_size)
        .bind(&workspace.src_size)
        .bind(workspace.git_enabled)
        .bind(&workspace.git_user_name)
        .bind(&workspace.git_user_email)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        if let Err(sqlx::Error::Database(db_err)) = &result {
            if db_err.is_unique_violation() {
                return Err(RegistryError::AlreadyExists(workspace.id));
            }
        }
        result.map_err(internal)?;

        Ok(Workspace {
            created_at: now,
            updated_at: now,
            ..workspace
        })
    }

    async fn get(&self, id: &str) -> Result<Option<Workspace>, RegistryError> {
        let row = sqlx::query_as::<_, WorkspaceRow>("SELECT * FROM workspaces WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;

        row.map(WorkspaceRow::into_domain).transpose()
    }

    async fn list(&self) -> Result<Vec<Workspace>, RegistryError> {
        let rows = sqlx::query_as::<_, WorkspaceRow>(
            "SELECT * FROM workspaces ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;

        rows.into_iter().map(WorkspaceRow::into_domain).collect()
    }

    async fn update(&self, workspace: Workspace) -> Result<Workspace, RegistryError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE workspaces SET
                name = ?, status = ?, docker_image = ?, docker_image_tag = ?,
                ingress_hostname = ?, cpu_request = ?, memory_request = ?,
                cpu_limit = ?, memory_limit = ?, data_size = ?, src_size = ?,
                git_enabled = ?, git_user_name = ?, git_user_email = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&workspace.name)
        .bind(workspace.status.as_str())
        .bind(&workspace.docker_image)
        .bind(&workspace.docker_image_tag)
        .bind(&workspace.ingress_hostname)
        .bind(&workspace.cpu_request)
        .bind(&workspace.memory_request)
        .bind(&workspace.cpu_limit)
        .bind(&workspace.memory_limit)
        .bind(&workspace.data_size)
        .bind(&workspace.src_size)
        .bind(workspace.git_enabled)
        .bind(&workspace.git_user_name)
        .bind(&workspace.git_user_email)
        .bind(now)
        .bind(&workspace.id)
        .execute(&self.pool)
        .await
        .map_err(internal)?;

        Ok(Workspace {
            updated_at: now,
            ..workspace
        })
    }

    async fn delete(&self, id: &str) -> Result<(), RegistryError> {
        sqlx::query("DELETE FROM workspaces WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        Ok(())
    }

    async fn set_secret(&self, workspace_id: &str, key: &str, value: &str) -> Result<(), RegistryError> {
        sqlx::query(
            r#"
            INSERT INTO workspace_secrets (workspace_id, key, value) VALUES (?, ?, ?)
            ON CONFLICT (workspace_id, key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(workspace_id)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        Ok(())
    }

    async fn get_secret(&self, workspace_id: &str, key: &str) -> Result<Option<String>, RegistryError> {
        let value: Option<(String,)> = sqlx::query_as(
            "SELECT value FROM workspace_secrets WHERE workspace_id = ? AND key = ?",
        )
        .bind(workspace_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(internal)?;
        Ok(value.map(|(v,)| v))
    }

    async fn get_secrets(&self, workspace_id: &str) -> Result<HashMap<String, String>, RegistryError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM workspace_secrets WHERE workspace_id = ?")
                .bind(workspace_id)
                .fetch_all(&self.pool)
                .await
                .map_err(internal)?;
        Ok(rows.into_iter().collect())
    }

    async fn delete_secrets(&self, workspace_id: &str) -> Result<(), RegistryError> {
        sqlx::query("DELETE FROM workspace_secrets WHERE workspace_id = ?")
            .bind(workspace_id)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        Ok(())
    }

    async fn log_event(&self, event: NewEvent) -> Result<WorkspaceEvent, RegistryError> {
        let now = Utc::now();
        let metadata_json = event
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RegistryError::Internal(format!("failed to encode event metadata: {}", e)))?;

        let id = sqlx::query(
            r#"
            INSERT INTO workspace_events (workspace_id, kind, message, metadata, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.workspace_id)
        .bind(event.kind.as_str())
        .bind(&event.message)
        .bind(&metadata_json)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(internal)?
        .last_insert_rowid();

        Ok(WorkspaceEvent {
            id,
            workspace_id: event.workspace_id,
            kind: event.kind,
            message: event.message,
            metadata: event.metadata,
            created_at: now,
        })
    }

    async fn get_events(&self, workspace_id: &str, limit: i64) -> Result<Vec<WorkspaceEvent>, RegistryError> {
        let limit = limit.clamp(0, MAX_EVENTS_LIMIT);
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT * FROM workspace_events WHERE workspace_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(workspace_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;

        rows.into_iter().map(EventRow::into_domain).collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::models::{EventKind, WorkspaceStatus};

    async fn test_registry() -> (SqliteRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hld-test.db");
        let registry = SqliteRegistry::connect(path.to_str().unwrap()).await.unwrap();
        (registry, dir)
    }

    fn sample_workspace(id: &str) -> Workspace {
        Workspace {
            id: id.to_string(),
            name: "demo".to_string(),
            status: WorkspaceStatus::Pending,
            docker_image: "ghcr.io/example/demo".to_string(),
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
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_get_round_trip() {
        let (registry, _dir) = test_registry().await;
        let created = registry.create(sample_workspace("a1b2c3d4")).await.unwrap();
        assert_eq!(created.status, WorkspaceStatus::Pending);

        let fetched = registry.get("a1b2c3d4").await.unwrap().unwrap();
        assert_eq!(fetched.id, "a1b2c3d4");
        assert_eq!(fetched.release_name, "hld-a1b2c3d4");
        assert_eq!(fetched.namespace, "workspace-a1b2c3d4");
    }

    #[tokio::test]
    async fn create_rejects_duplicate_id() {
        let (registry, _dir) = test_registry().await;
        registry.create(sample_workspace("a1b2c3d4")).await.unwrap();
        let err = registry.create(sample_workspace("a1b2c3d4")).await.unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists(id) if id == "a1b2c3d4"));
    }

    #[tokio::test]
    async fn get_on_missing_id_returns_none() {
        let (registry, _dir) = test_registry().await;
        assert!(registry.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_bumps_updated_at_but_not_id_or_names() {
        let (registry, _dir) = test_registry().await;
        let created = registry.create(sample_workspace("a1b2c3d4")).await.unwrap();

        let mut changed = created.clone();
        changed.status = WorkspaceStatus::Running;
        changed.id = "ignored".to_string();
        changed.release_name = "ignored".to_string();
        let updated = registry.update(changed).await.unwrap();

        assert_eq!(updated.status, WorkspaceStatus::Running);
        assert!(updated.updated_at >= created.updated_at);

        let fetched = registry.get("a1b2c3d4").await.unwrap().unwrap();
        assert_eq!(fetched.release_name, "hld-a1b2c3d4");
    }

    #[tokio::test]
    async fn delete_cascades_secrets_and_events() {
        let (registry, _dir) = test_registry().await;
        registry.create(sample_workspace("a1b2c3d4")).await.unwrap();
        registry.set_secret("a1b2c3d4", "gh_token", "ghp_x").await.unwrap();
        registry
            .log_event(NewEvent::new("a1b2c3d4", EventKind::Created, "created"))
            .await
            .unwrap();

        registry.delete("a1b2c3d4").await.unwrap();

        assert!(registry.get("a1b2c3d4").await.unwrap().is_none());
        assert!(registry.get_secrets("a1b2c3d4").await.unwrap().is_empty());
        assert!(registry.get_events("a1b2c3d4", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (registry, _dir) = test_registry().await;
        registry.delete("missing").await.unwrap();
        registry.delete("missing").await.unwrap();
    }

    #[tokio::test]
    async fn secret_upsert_overwrites_existing_value() {
        let (registry, _dir) = test_registry().await;
        registry.create(sample_workspace("a1b2c3d4")).await.unwrap();
        registry.set_secret("a1b2c3d4", "gh_token", "first").await.unwrap();
        registry.set_secret("a1b2c3d4", "gh_token", "second").await.unwrap();

        let value = registry.get_secret("a1b2c3d4", "gh_token").await.unwrap();
        assert_eq!(value.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn get_events_clamps_limit_and_orders_newest_first() {
        let (registry, _dir) = test_registry().await;
        registry.create(sample_workspace("a1b2c3d4")).await.unwrap();
        for i in 0..150 {
            registry
                .log_event(NewEvent::new("a1b2c3d4", EventKind::Created, format!("event {i}")))
                .await
                .unwrap();
        }

        let events = registry.get_events("a1b2c3d4", 1000).await.unwrap();
        assert_eq!(events.len(), MAX_EVENTS_LIMIT as usize);
        assert_eq!(events[0].message, "event 149");
    }

    #[tokio::test]
    async fn list_orders_newest_created_first() {
        let (registry, _dir) = test_registry().await;
        registry.create(sample_workspace("a")).await.unwrap();
        registry.create(sample_workspace("b")).await.unwrap();

        let listed = registry.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].created_at >= listed[1].created_at);
    }
}
