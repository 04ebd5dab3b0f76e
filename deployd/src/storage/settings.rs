//! Settings file management

use serde::{Deserialize, Serialize};

use crate::errors::DeployError;
use crate::logs::LogLevel;

/// Daemon settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Write logs as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Optional directory for a daily rolling log file
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Data directory override (state, records, backups)
    #[serde(default)]
    pub data_dir: Option<String>,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// CI / source host configuration
    #[serde(default)]
    pub github: GithubSettings,

    /// Deployment behaviour
    #[serde(default)]
    pub deploy: DeploySettings,

    /// Webhook verification
    #[serde(default)]
    pub webhook: WebhookSettings,

    /// Scheduled polling
    #[serde(default)]
    pub poller: PollerSettings,

    /// Bearer token required by the admin endpoints; open when unset
    #[serde(default)]
    pub admin_token: Option<String>,
}

impl Settings {
    /// Reject settings the daemon cannot run with
    pub fn validate(&self) -> Result<(), DeployError> {
        let required = [
            ("github.owner", &self.github.owner),
            ("github.repo", &self.github.repo),
            ("github.workflow", &self.github.workflow),
            ("github.token", &self.github.token),
            ("deploy.target_dir", &self.deploy.target_dir),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(DeployError::ConfigError(format!("{} must be set", name)));
            }
        }
        if self.github.branch.trim().is_empty() {
            return Err(DeployError::ConfigError("github.branch must be set".to_string()));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// CI / source host settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubSettings {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default)]
    pub token: String,

    #[serde(default)]
    pub owner: String,

    #[serde(default)]
    pub repo: String,

    #[serde(default = "default_branch")]
    pub branch: String,

    /// Workflow file name or numeric id
    #[serde(default)]
    pub workflow: String,
}

fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

impl Default for GithubSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            token: String::new(),
            owner: String::new(),
            repo: String::new(),
            branch: default_branch(),
            workflow: String::new(),
        }
    }
}

/// Deployment behaviour settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySettings {
    /// Live directory that receives the artifact
    #[serde(default)]
    pub target_dir: String,

    /// Deploy on pushes to the tracked branch
    #[serde(default)]
    pub auto_deploy: bool,

    /// Pushes create pending deployments that need approval
    #[serde(default)]
    pub manual_approval: bool,

    #[serde(default = "default_true")]
    pub create_backups: bool,

    /// Replace the target directory instead of overlaying files
    #[serde(default = "default_true")]
    pub clean_install: bool,

    /// Backups to keep, 0 keeps all
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,

    #[serde(default = "default_build_timeout")]
    pub build_timeout_secs: u64,

    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,
}

fn default_max_backups() -> usize {
    10
}

fn default_build_timeout() -> u64 {
    3600
}

fn default_lock_ttl() -> u64 {
    300
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            target_dir: String::new(),
            auto_deploy: false,
            manual_approval: false,
            create_backups: true,
            clean_install: true,
            max_backups: default_max_backups(),
            build_timeout_secs: default_build_timeout(),
            lock_ttl_secs: default_lock_ttl(),
        }
    }
}

/// Webhook settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookSettings {
    #[serde(default)]
    pub secret: Option<String>,

    /// Accept unsigned deliveries while no secret is configured
    #[serde(default)]
    pub allow_unsigned: bool,
}

/// Poller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_polling_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
}

fn default_polling_interval() -> u64 {
    30
}

fn default_initial_delay() -> u64 {
    5
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_polling_interval(),
            initial_delay_secs: default_initial_delay(),
        }
    }
}
