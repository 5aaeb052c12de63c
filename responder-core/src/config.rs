//! Runtime configuration.
//!
//! Loaded from a TOML file where every section and field is optional, then
//! overlaid with secrets from the environment.

use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_CONFIG_FILE: &str = "responder.toml";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub forum: ForumConfig,
    pub polling: PollingConfig,
    pub knowledge: KnowledgeConfig,
    pub llm: LlmConfig,
    pub sidecar: SidecarConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForumConfig {
    pub cafe_id: u64,
    /// Board whose posts get answered.
    pub board_id: u64,
    /// Identity the bot comments under; used for self-reply detection.
    pub bot_identity: String,
    /// Empty means every trust tier is accepted.
    pub allowed_tiers: BTreeSet<i64>,
    /// `{cafe_id}` and `{article_id}` are substituted.
    pub article_url: String,
    /// `{cafe_id}` and `{article_id}` are substituted.
    pub comment_url: String,
    pub referer: String,
    pub user_agent: String,
    pub session_cookie: String,
    pub start_id: Option<u64>,
    pub connection_test_id: Option<u64>,
    pub request_timeout_secs: u64,
}

impl Default for ForumConfig {
    fn default() -> Self {
        Self {
            cafe_id: 0,
            board_id: 0,
            bot_identity: String::new(),
            allowed_tiers: BTreeSet::new(),
            article_url: "https://article.cafe.naver.com/gw/v4/cafes/{cafe_id}/articles/{article_id}"
                .to_string(),
            comment_url: "https://apis.naver.com/cafe-web/cafe-mobile/CommentPost.json".to_string(),
            referer: "https://cafe.naver.com/".to_string(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) forum-responder/0.1".to_string(),
            session_cookie: String::new(),
            start_id: None,
            connection_test_id: None,
            request_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_secs: u64,
    pub max_scan: u64,
    pub max_consecutive_misses: u32,
    pub probe_delay_ms: u64,
    pub post_delay_ms: u64,
    pub watch_max_checks: u32,
    /// Watches are checked on every N-th polling cycle.
    pub watch_every_cycles: u64,
    pub watch_delay_ms: u64,
    pub state_file: PathBuf,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            max_scan: 100,
            max_consecutive_misses: 50,
            probe_delay_ms: 300,
            post_delay_ms: 3000,
            watch_max_checks: 30,
            watch_every_cycles: 5,
            watch_delay_ms: 3000,
            state_file: PathBuf::from("state.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    pub path: PathBuf,
    pub instruction_file: String,
    pub top_k: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("knowledge"),
            instruction_file: "instruction.md".to_string(),
            top_k: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub max_tokens: u32,
    pub enable_tool_use: bool,
    pub tool_max_context_chars: usize,
    pub enable_thinking: bool,
    pub thinking_budget: u32,
    pub max_comment_chars: usize,
    pub request_timeout_secs: u64,
    pub system_prompt_file: Option<PathBuf>,
    pub mcp: McpConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: "https://api.anthropic.com".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            max_tokens: 4096,
            enable_tool_use: true,
            tool_max_context_chars: 12_000,
            enable_thinking: true,
            thinking_budget: 2048,
            max_comment_chars: 2900,
            request_timeout_secs: 120,
            system_prompt_file: None,
            mcp: McpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    pub enabled: bool,
    pub beta_version: String,
    pub server_name: String,
    /// Falls back to the local sidecar address when empty.
    pub server_url: String,
    pub auth_token: String,
    pub tool_allowlist: Vec<String>,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            beta_version: "mcp-client-2025-04-04".to_string(),
            server_name: "knowledge_mcp".to_string(),
            server_url: String::new(),
            auth_token: String::new(),
            tool_allowlist: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    pub auto_start: bool,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub ready_attempts: u32,
    pub ready_interval_ms: u64,
    pub stop_grace_secs: u64,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            auto_start: true,
            host: "127.0.0.1".to_string(),
            port: 8765,
            path: "/mcp".to_string(),
            ready_attempts: 50,
            ready_interval_ms: 200,
            stop_grace_secs: 3,
        }
    }
}

impl SidecarConfig {
    pub fn url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("http://{}:{}{}", self.host, self.port, path)
    }
}

impl AppConfig {
    /// Reads `path` if it exists, otherwise starts from defaults. An explicitly
    /// requested file that is missing is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|_| ConfigError::FileNotFound {
                path: path.display().to_string(),
            })?;
            info!("Loading configuration from {}", path.display());
            Self::from_toml(&raw)?
        } else if explicit {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        } else {
            debug!("No {} found, using defaults", path.display());
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Overlays secrets and deployment-specific values from the environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| strip_quotes(&v)).filter(|v| !v.is_empty());

        if let Some(cookie) = get("FORUM_COOKIE") {
            self.forum.session_cookie = cookie;
        }
        if let Some(key) = get("ANTHROPIC_API_KEY") {
            self.llm.api_key = key;
        }
        if let Some(model) = get("ANTHROPIC_MODEL") {
            self.llm.model = model;
        }
        if let Some(flag) = get("LLM_ENABLE_THINKING") {
            self.llm.enable_thinking = parse_bool(&flag, self.llm.enable_thinking);
        }
        if let Some(budget) = get("LLM_THINKING_BUDGET").and_then(|v| v.parse().ok()) {
            self.llm.thinking_budget = budget;
        }
        if let Some(flag) = get("MCP_ENABLED") {
            self.llm.mcp.enabled = parse_bool(&flag, self.llm.mcp.enabled);
        }
        if let Some(url) = get("MCP_SERVER_URL") {
            self.llm.mcp.server_url = url;
        }
        if let Some(token) = get("MCP_AUTH_TOKEN") {
            self.llm.mcp.auth_token = token;
        }
    }

    /// URL the model provider should use for the remote reference server.
    pub fn mcp_server_url(&self) -> String {
        if self.llm.mcp.server_url.trim().is_empty() {
            self.sidecar.url()
        } else {
            self.llm.mcp.server_url.trim().to_string()
        }
    }

    pub fn validate(&self, dry_run: bool) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.forum.cafe_id == 0 {
            problems.push("forum.cafe_id must be set".to_string());
        }
        if self.forum.bot_identity.trim().is_empty() {
            problems.push("forum.bot_identity must be set".to_string());
        }
        if self.forum.session_cookie.trim().is_empty() {
            problems.push("FORUM_COOKIE is not set".to_string());
        }
        if self.llm.api_key.trim().is_empty() && !dry_run {
            problems.push("ANTHROPIC_API_KEY is not set".to_string());
        }
        if self.polling.watch_every_cycles == 0 {
            problems.push("polling.watch_every_cycles must be at least 1".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationFailed {
                reason: problems.join("; "),
            })
        }
    }
}

fn strip_quotes(value: &str) -> String {
    value
        .trim()
        .trim_matches('\'')
        .trim_matches('"')
        .to_string()
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => true,
        "0" | "false" | "no" | "n" | "off" => false,
        _ => default,
    }
}
