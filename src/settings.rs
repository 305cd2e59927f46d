use config::{Config, ConfigError, Environment};
use serde::Deserialize;

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8888
}

fn default_database_path() -> String {
    "./data/hld.db".to_string()
}

fn default_chart_path() -> String {
    "./charts/workspace".to_string()
}

fn default_ingress_host_template() -> String {
    "workspace-{id}.local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_version() -> String {
    "0.1.0".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub kubernetes: KubernetesSettings,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_version")]
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Configuration for the release-engine adapter: where the chart lives, how
/// to reach the cluster, and the template used to derive a workspace's
/// default ingress hostname (the request body never supplies one directly).
#[derive(Debug, Clone, Deserialize)]
pub struct KubernetesSettings {
    #[serde(default)]
    pub kubeconfig: Option<String>,
    #[serde(default = "default_chart_path")]
    pub chart_path: String,
    #[serde(default = "default_ingress_host_template")]
    pub ingress_host_template: String,
}

impl Default for KubernetesSettings {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            chart_path: default_chart_path(),
            ingress_host_template: default_ingress_host_template(),
        }
    }
}

impl Settings {
    /// Load settings purely from the process environment (prefix `HLD`,
    /// `__` as the nesting separator, e.g. `HLD_SERVER__PORT`). No config
    /// files are consulted; configuration is environment-only.
    pub fn new() -> Result<Self, ConfigError> {
        let settings: Settings = Config::builder()
            .add_source(
                Environment::with_prefix("HLD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Self::validate_format_string(
            &settings.kubernetes.ingress_host_template,
            "ingress_host_template",
            "{id}",
        )?;

        Ok(settings)
    }

    fn validate_format_string(
        format_str: &str,
        field_name: &str,
        required_placeholder: &str,
    ) -> Result<(), ConfigError> {
        if !format_str.contains(required_placeholder) {
            return Err(ConfigError::Message(format!(
                "configuration error: '{}' must contain '{}' placeholder. Got: '{}'",
                field_name, required_placeholder, format_str
            )));
        }
        Ok(())
    }
}
