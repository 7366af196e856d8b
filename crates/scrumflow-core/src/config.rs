//! Configuration management for scrumflow
//!
//! Settings live in `.scrumflow/config.toml` under the project root. Missing
//! sections fall back to defaults, and a few environment variables override
//! the file for deployment.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{Result, ScrumError};

/// Directory holding configuration, checkpoints and the activity log
pub const CONFIG_DIR: &str = ".scrumflow";

/// Project-level scrumflow configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrumConfig {
    /// Reasoning service selection
    #[serde(default)]
    pub models: ModelConfig,

    /// Retry policy for reasoning calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Agent loop limits
    #[serde(default)]
    pub agent: AgentConfig,

    /// Orchestration graph limits
    #[serde(default)]
    pub graph: GraphConfig,

    /// Hierarchical backlog generation
    #[serde(default)]
    pub backlog: BacklogConfig,

    /// Sprint planning defaults
    #[serde(default)]
    pub sprint: SprintConfig,

    /// Remote tool server
    #[serde(default)]
    pub remote_tools: RemoteToolsConfig,
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model used by member agents
    #[serde(default = "default_model")]
    pub default: String,

    /// Model used by the supervisor; falls back to `default`
    #[serde(default)]
    pub supervisor: Option<String>,

    /// OpenAI-compatible endpoint base
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable containing the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-attempt timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// First backoff delay, doubled after each retry
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Reasoning iterations per agent run
    #[serde(default = "default_agent_max_steps")]
    pub max_steps: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Node executions per run
    #[serde(default = "default_graph_max_steps")]
    pub max_steps: usize,

    /// Discard suspended threads older than this; `None` keeps them forever
    #[serde(default)]
    pub suspension_ttl_secs: Option<u64>,

    /// Checkpoints kept per thread; older ones are pruned
    #[serde(default = "default_checkpoint_history")]
    pub checkpoint_history: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacklogConfig {
    /// Children generated per parent item
    #[serde(default = "default_max_children")]
    pub max_children: usize,

    /// Concurrent branch invocations per stage
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

/// How the sprint team builds a plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SprintMode {
    /// Deterministic greedy packing
    #[default]
    Heuristic,
    /// A sprint planning agent with tools
    Agent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SprintConfig {
    #[serde(default = "default_points_per_person_per_week")]
    pub points_per_person_per_week: u32,

    #[serde(default = "default_sprint_weeks")]
    pub default_sprint_weeks: u32,

    #[serde(default = "default_team_size")]
    pub default_team_size: u32,

    #[serde(default)]
    pub mode: SprintMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteToolsConfig {
    /// JSON-RPC tool server endpoint
    #[serde(default)]
    pub url: Option<String>,

    /// Fail sprint/project members when no caller credential is supplied
    #[serde(default)]
    pub require_credential: bool,

    /// Attempts at `tools/list` before continuing without remote tools
    #[serde(default = "default_discovery_attempts")]
    pub discovery_attempts: usize,
}

// Default value providers
fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_agent_max_steps() -> usize {
    25
}

fn default_graph_max_steps() -> usize {
    50
}

fn default_checkpoint_history() -> usize {
    100
}

fn default_discovery_attempts() -> usize {
    3
}

fn default_max_children() -> usize {
    2
}

fn default_concurrency() -> usize {
    4
}

fn default_points_per_person_per_week() -> u32 {
    6
}

fn default_sprint_weeks() -> u32 {
    2
}

fn default_team_size() -> u32 {
    1
}

impl ScrumConfig {
    /// Load configuration from `.scrumflow/config.toml` or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = root.join(CONFIG_DIR).join("config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)
                .map_err(|e| ScrumError::Config(format!("Failed to parse config file: {}", e)))
        } else {
            Ok(Self::default())
        }
    }

    /// Load from disk, then apply environment overrides
    pub fn load(root: &Path) -> Result<Self> {
        let mut config = Self::load_or_default(root)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `SCRUMFLOW_*` overrides using `lookup` to read variables
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup("SCRUMFLOW_MODEL") {
            self.models.default = model;
        }
        if let Some(base_url) = lookup("SCRUMFLOW_BASE_URL") {
            self.models.base_url = base_url;
        }
        if let Some(url) = lookup("SCRUMFLOW_TOOL_SERVER_URL") {
            self.remote_tools.url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Some(ttl) = lookup("SCRUMFLOW_SUSPENSION_TTL_SECS").and_then(|v| v.parse().ok()) {
            self.graph.suspension_ttl_secs = Some(ttl);
        }
    }

    /// Write default configuration to `.scrumflow/config.toml`
    pub fn write_default(root: &Path) -> Result<()> {
        let config_dir = root.join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| ScrumError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    /// Model for the supervisor
    pub fn supervisor_model(&self) -> &str {
        self.models
            .supervisor
            .as_deref()
            .unwrap_or(&self.models.default)
    }
}

impl RetryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

impl GraphConfig {
    pub fn suspension_ttl(&self) -> Option<Duration> {
        self.suspension_ttl_secs.map(Duration::from_secs)
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default: default_model(),
            supervisor: None,
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_agent_max_steps(),
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_steps: default_graph_max_steps(),
            suspension_ttl_secs: None,
            checkpoint_history: default_checkpoint_history(),
        }
    }
}

impl Default for RemoteToolsConfig {
    fn default() -> Self {
        Self {
            url: None,
            require_credential: false,
            discovery_attempts: default_discovery_attempts(),
        }
    }
}

impl Default for BacklogConfig {
    fn default() -> Self {
        Self {
            max_children: default_max_children(),
            concurrency: default_concurrency(),
        }
    }
}

impl Default for SprintConfig {
    fn default() -> Self {
        Self {
            points_per_person_per_week: default_points_per_person_per_week(),
            default_sprint_weeks: default_sprint_weeks(),
            default_team_size: default_team_size(),
            mode: SprintMode::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ScrumConfig::default();
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.timeout(), Duration::from_secs(120));
        assert_eq!(config.backlog.max_children, 2);
        assert_eq!(config.sprint.points_per_person_per_week, 6);
        assert_eq!(config.sprint.mode, SprintMode::Heuristic);
        assert!(config.graph.suspension_ttl().is_none());
        assert_eq!(config.graph.checkpoint_history, 100);
        assert_eq!(config.remote_tools.discovery_attempts, 3);
        assert_eq!(config.supervisor_model(), "gpt-4o");
    }

    #[test]
    fn test_write_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        ScrumConfig::write_default(dir.path()).unwrap();
        let loaded = ScrumConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.graph.max_steps, 50);
        assert_eq!(loaded.models.api_key_env, "OPENAI_API_KEY");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(CONFIG_DIR)).unwrap();
        std::fs::write(
            dir.path().join(CONFIG_DIR).join("config.toml"),
            "[sprint]\nmode = \"agent\"\n\n[backlog]\nmax_children = 3\n",
        )
        .unwrap();
        let config = ScrumConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.sprint.mode, SprintMode::Agent);
        assert_eq!(config.sprint.default_sprint_weeks, 2);
        assert_eq!(config.backlog.max_children, 3);
        assert_eq!(config.backlog.concurrency, 4);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(CONFIG_DIR)).unwrap();
        std::fs::write(dir.path().join(CONFIG_DIR).join("config.toml"), "graph = 5").unwrap();
        assert!(matches!(
            ScrumConfig::load_or_default(dir.path()),
            Err(ScrumError::Config(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ScrumConfig::default();
        config.apply_env(|key| match key {
            "SCRUMFLOW_MODEL" => Some("gpt-4o-mini".to_string()),
            "SCRUMFLOW_TOOL_SERVER_URL" => Some("http://localhost:9000/rpc".to_string()),
            "SCRUMFLOW_SUSPENSION_TTL_SECS" => Some("3600".to_string()),
            _ => None,
        });
        assert_eq!(config.models.default, "gpt-4o-mini");
        assert_eq!(config.remote_tools.url.as_deref(), Some("http://localhost:9000/rpc"));
        assert_eq!(config.graph.suspension_ttl(), Some(Duration::from_secs(3600)));
    }
}
