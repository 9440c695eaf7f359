//! Environment-driven configuration (spec §6.4).

use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub isolated_root_prefix: String,
    pub workflow_cache_ttl: Duration,
    pub max_file_size_bytes: u64,
    pub tree_max_depth: usize,
    pub tree_max_nodes: usize,
    pub search_max_hits: usize,
    pub workspace_grace: Duration,
    pub tool_call_timeout: Duration,
    pub agent_turn_timeout: Duration,
    pub block_timeout: Duration,
    pub execution_timeout: Duration,
    pub internal_service_token: String,
    pub tool_call_semaphore: usize,
    pub stream_ring_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            isolated_root_prefix: "/tmp/orchestration_isolated_".to_string(),
            workflow_cache_ttl: Duration::from_secs(60),
            max_file_size_bytes: 10 * 1024 * 1024,
            tree_max_depth: 10,
            tree_max_nodes: 50_000,
            search_max_hits: 500,
            workspace_grace: Duration::from_secs(1800),
            tool_call_timeout: Duration::from_secs(60),
            agent_turn_timeout: Duration::from_secs(600),
            block_timeout: Duration::from_secs(1800),
            execution_timeout: Duration::from_secs(3600),
            internal_service_token: String::new(),
            tool_call_semaphore: 8,
            stream_ring_buffer: 2000,
        }
    }
}

impl EngineConfig {
    /// Build from the environment, falling back to spec-documented defaults.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            isolated_root_prefix: std::env::var("ISOLATED_ROOT_PREFIX")
                .unwrap_or(default.isolated_root_prefix),
            workflow_cache_ttl: Duration::from_secs(env_or(
                "WORKFLOW_CACHE_TTL_SECONDS",
                default.workflow_cache_ttl.as_secs(),
            )),
            max_file_size_bytes: env_or("MAX_FILE_SIZE_BYTES", default.max_file_size_bytes),
            tree_max_depth: env_or("TREE_MAX_DEPTH", default.tree_max_depth),
            tree_max_nodes: env_or("TREE_MAX_NODES", default.tree_max_nodes),
            search_max_hits: env_or("SEARCH_MAX_HITS", default.search_max_hits),
            workspace_grace: Duration::from_secs(env_or(
                "WORKSPACE_GRACE_SECONDS",
                default.workspace_grace.as_secs(),
            )),
            tool_call_timeout: Duration::from_secs(env_or(
                "TOOL_CALL_TIMEOUT",
                default.tool_call_timeout.as_secs(),
            )),
            agent_turn_timeout: Duration::from_secs(env_or(
                "AGENT_TURN_TIMEOUT",
                default.agent_turn_timeout.as_secs(),
            )),
            block_timeout: Duration::from_secs(env_or(
                "BLOCK_TIMEOUT",
                default.block_timeout.as_secs(),
            )),
            execution_timeout: Duration::from_secs(env_or(
                "EXECUTION_TIMEOUT",
                default.execution_timeout.as_secs(),
            )),
            internal_service_token: std::env::var("INTERNAL_SERVICE_TOKEN").unwrap_or_default(),
            ..default
        }
    }
}
