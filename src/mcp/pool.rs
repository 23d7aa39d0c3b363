//! Provider pool
//!
//! Owns the set of live provider connections plus the locally-implemented
//! tool surface. Initialization is bounded per provider and isolated: one
//! slow or broken provider never takes the pool down unless zero providers
//! survive. Credential rotation for a rate-limited provider class rebuilds
//! only the affected connection and is serialized behind a mutex.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::agent::local::LocalTool;
use crate::config::{ProviderConfig, ProvidersConfig, RotationConfig};
use crate::error::{AgentError, ProviderError};

use super::connection::{ProviderConnection, ProviderTransport};
use super::http::HttpJsonRpcTransport;
use super::spawn::ChildProcessTransport;
use super::types::ToolDescriptor;

const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Pool-level limits.
#[derive(Debug, Clone)]
pub struct PoolLimits {
    /// Per-provider initialization ceiling. Generous because npx-based
    /// providers fetch packages on first run.
    pub init_timeout: Duration,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(120),
        }
    }
}

/// Ordered credential list for a rate-limited provider. The index advances
/// monotonically and never wraps; running off the end is terminal.
#[derive(Debug)]
pub struct QuotaRotationState {
    keys: Vec<String>,
    active_index: usize,
}

impl QuotaRotationState {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys,
            active_index: 0,
        }
    }

    pub fn active_key(&self) -> Option<&str> {
        self.keys.get(self.active_index).map(String::as_str)
    }

    /// Advance to the next key. Returns `None` when the list is exhausted.
    pub fn advance(&mut self) -> Option<&str> {
        if self.active_index + 1 >= self.keys.len() {
            return None;
        }
        self.active_index += 1;
        self.keys.get(self.active_index).map(String::as_str)
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }
}

struct RotationInner {
    config: RotationConfig,
    state: QuotaRotationState,
}

/// The set of live provider connections plus local tools.
pub struct ProviderPool {
    /// Fixed search order (sorted by provider name for determinism).
    connections: RwLock<Vec<Arc<ProviderConnection>>>,
    configs: HashMap<String, ProviderConfig>,
    local_tools: Vec<Arc<dyn LocalTool>>,
    rotation: Mutex<RotationInner>,
    limits: PoolLimits,
}

impl ProviderPool {
    /// Construct one connection per configured provider and initialize each
    /// under an independent timeout. Providers that fail or time out are
    /// dropped and logged; zero survivors fails the pool.
    pub async fn initialize_all(
        providers: &ProvidersConfig,
        rotation: RotationConfig,
        limits: PoolLimits,
        local_tools: Vec<Arc<dyn LocalTool>>,
    ) -> Result<Self, AgentError> {
        let rotation_inner = RotationInner {
            state: QuotaRotationState::new(rotation.keys.clone()),
            config: rotation,
        };

        // HashMap order is nondeterministic; sort so the dispatch search
        // order is stable across runs.
        let mut names: Vec<&String> = providers.providers.keys().collect();
        names.sort();

        let mut candidates = Vec::new();
        for name in names {
            let config = &providers.providers[name];
            let key_override = active_key_override(&rotation_inner, name);
            match build_transport(config, key_override) {
                Ok(transport) => {
                    candidates.push(Arc::new(ProviderConnection::new(name, transport)))
                }
                Err(e) => tracing::error!("Failed to construct provider '{}': {}", name, e),
            }
        }

        let total = candidates.len();
        let init_timeout = limits.init_timeout;
        let results = join_all(candidates.into_iter().map(|conn| async move {
            let outcome = tokio::time::timeout(init_timeout, conn.initialize()).await;
            (conn, outcome)
        }))
        .await;

        let mut connections = Vec::new();
        for (conn, outcome) in results {
            match outcome {
                Ok(Ok(())) => {
                    tracing::info!("Initialized provider: {}", conn.name());
                    connections.push(conn);
                }
                Ok(Err(e)) => {
                    tracing::error!("Provider '{}' failed to initialize: {}, skipping", conn.name(), e)
                }
                Err(_) => tracing::error!(
                    "Provider '{}' initialization timed out ({}s), skipping",
                    conn.name(),
                    init_timeout.as_secs()
                ),
            }
        }

        if connections.is_empty() {
            return Err(AgentError::NoProvidersAvailable);
        }
        tracing::info!("Provider pool ready: {}/{} providers", connections.len(), total);

        let pool = Self {
            connections: RwLock::new(connections),
            configs: providers.providers.clone(),
            local_tools,
            rotation: Mutex::new(rotation_inner),
            limits,
        };
        pool.validate_unique_tool_names().await;
        Ok(pool)
    }

    /// Tool-name uniqueness across providers is a configuration invariant;
    /// duplicates are flagged here instead of being resolved at dispatch
    /// time (first listed provider wins there).
    async fn validate_unique_tool_names(&self) {
        let mut owners: HashMap<String, String> = HashMap::new();
        for tool in &self.local_tools {
            owners.insert(tool.descriptor().name, "local".to_string());
        }

        for conn in self.connections.read().await.iter() {
            let tools = match conn.cached_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    tracing::warn!("Failed to list tools from '{}': {}", conn.name(), e);
                    continue;
                }
            };
            for tool in tools {
                if let Some(owner) = owners.get(&tool.name) {
                    tracing::warn!(
                        "Tool '{}' exposed by both '{}' and '{}'; '{}' wins",
                        tool.name,
                        owner,
                        conn.name(),
                        owner
                    );
                } else {
                    owners.insert(tool.name, conn.name().to_string());
                }
            }
        }
    }

    /// Aggregate catalog: local tools first (they win name ties), then every
    /// live connection's cached list.
    pub async fn get_available_tools(&self) -> Vec<ToolDescriptor> {
        let mut seen: HashMap<String, ()> = HashMap::new();
        let mut all = Vec::new();

        for tool in &self.local_tools {
            let descriptor = tool.descriptor();
            seen.insert(descriptor.name.clone(), ());
            all.push(descriptor);
        }

        for conn in self.connections.read().await.iter() {
            match conn.cached_tools().await {
                Ok(tools) => {
                    for tool in tools {
                        if seen.insert(tool.name.clone(), ()).is_none() {
                            all.push(tool);
                        }
                    }
                }
                Err(e) => tracing::warn!("Failed to list tools from '{}': {}", conn.name(), e),
            }
        }

        all
    }

    /// Find a registered local tool by name.
    pub fn local_tool(&self, name: &str) -> Option<Arc<dyn LocalTool>> {
        self.local_tools
            .iter()
            .find(|t| t.descriptor().name == name)
            .cloned()
    }

    /// Dispatch a tool call to the first connection whose cached catalog
    /// contains the name. Execution failure on that connection does not fall
    /// through to another provider.
    pub async fn execute_tool(&self, tool_name: &str, arguments: Value) -> Result<String, ProviderError> {
        let connections = self.connections.read().await;
        for conn in connections.iter() {
            let has_tool = match conn.cached_tools().await {
                Ok(tools) => tools.iter().any(|t| t.name == tool_name),
                Err(e) => {
                    tracing::warn!("Failed to check tools from '{}': {}", conn.name(), e);
                    false
                }
            };
            if has_tool {
                return conn.execute_tool(tool_name, arguments).await;
            }
        }
        Err(ProviderError::UnknownTool(tool_name.to_string()))
    }

    /// Advance to the next credential and rebuild only the affected
    /// connection. Returns `Ok(false)` when the key list is exhausted.
    /// Concurrent callers serialize; a second request observes the first
    /// rotation's outcome rather than rotating again.
    pub async fn rotate_credential(&self) -> Result<bool, AgentError> {
        let mut rotation = self.rotation.lock().await;
        let provider = rotation.config.provider.clone();
        if provider.is_empty() {
            tracing::warn!("Credential rotation requested but none configured");
            return Ok(false);
        }

        let Some(next_key) = rotation.state.advance().map(str::to_string) else {
            tracing::error!("Credential rotation exhausted: no more keys");
            return Ok(false);
        };
        tracing::info!(
            "Rotating credential for '{}' (key #{})",
            provider,
            rotation.state.active_index() + 1
        );

        let config = self
            .configs
            .get(&provider)
            .ok_or_else(|| anyhow::anyhow!("rotation provider '{}' not configured", provider))?;
        let env_var = rotation.config.env.clone();
        let transport = build_transport(config, Some((env_var.as_str(), next_key.as_str())))?;

        let replacement = Arc::new(ProviderConnection::new(&provider, transport));
        tokio::time::timeout(self.limits.init_timeout, replacement.initialize())
            .await
            .map_err(|_| ProviderError::InitTimeout {
                provider: provider.clone(),
                seconds: self.limits.init_timeout.as_secs(),
            })??;

        let mut connections = self.connections.write().await;
        if let Some(slot) = connections.iter().position(|c| c.name() == provider) {
            connections[slot].cleanup().await;
            connections[slot] = replacement;
        } else {
            connections.push(replacement);
            connections.sort_by(|a, b| a.name().cmp(b.name()));
        }

        Ok(true)
    }

    /// Names of live connections, in dispatch order.
    pub async fn provider_names(&self) -> Vec<String> {
        self.connections
            .read()
            .await
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Release every connection, newest first.
    pub async fn shutdown(&self) {
        let connections = self.connections.read().await;
        for conn in connections.iter().rev() {
            conn.cleanup().await;
        }
    }

    /// Test constructor bypassing transport construction.
    #[cfg(test)]
    pub(crate) fn for_tests(
        connections: Vec<Arc<ProviderConnection>>,
        local_tools: Vec<Arc<dyn LocalTool>>,
        rotation: RotationConfig,
    ) -> Self {
        Self {
            connections: RwLock::new(connections),
            configs: HashMap::new(),
            local_tools,
            rotation: Mutex::new(RotationInner {
                state: QuotaRotationState::new(rotation.keys.clone()),
                config: rotation,
            }),
            limits: PoolLimits::default(),
        }
    }
}

/// Override the rotation env var for the rotation provider so a freshly
/// initialized pool starts on the active key.
fn active_key_override<'a>(rotation: &'a RotationInner, provider: &str) -> Option<(&'a str, &'a str)> {
    if rotation.config.provider == provider {
        rotation
            .state
            .active_key()
            .map(|key| (rotation.config.env.as_str(), key))
    } else {
        None
    }
}

fn build_transport(
    config: &ProviderConfig,
    key_override: Option<(&str, &str)>,
) -> Result<Box<dyn ProviderTransport>, ProviderError> {
    match config {
        ProviderConfig::Http(http) => {
            let transport = HttpJsonRpcTransport::new(&http.url, HTTP_REQUEST_TIMEOUT)
                .map_err(ProviderError::Transport)?;
            Ok(Box::new(transport))
        }
        ProviderConfig::Spawn(spawn) => {
            let mut spawn = spawn.clone();
            if let Some((env_var, key)) = key_override {
                if !env_var.is_empty() {
                    spawn.env.insert(env_var.to_string(), key.to_string());
                }
            }
            Ok(Box::new(ChildProcessTransport::new(spawn)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::local::FnTool;
    use crate::mcp::connection::ProviderTransport;
    use async_trait::async_trait;
    use serde_json::json;

    struct StaticTransport {
        tools: Vec<&'static str>,
        reply: Result<&'static str, ()>,
    }

    #[async_trait]
    impl ProviderTransport for StaticTransport {
        async fn initialize(&self) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ProviderError> {
            Ok(self
                .tools
                .iter()
                .map(|name| ToolDescriptor {
                    provider: String::new(),
                    name: name.to_string(),
                    description: None,
                    input_schema: None,
                })
                .collect())
        }

        async fn call_tool(&self, tool_name: &str, _arguments: Value) -> Result<String, ProviderError> {
            match self.reply {
                Ok(text) => Ok(format!("{}:{}", tool_name, text)),
                Err(()) => Err(ProviderError::Other(anyhow::anyhow!("connection reset"))),
            }
        }

        async fn cleanup(&self) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    async fn ready_connection(name: &str, tools: Vec<&'static str>, reply: Result<&'static str, ()>) -> Arc<ProviderConnection> {
        let conn = Arc::new(ProviderConnection::new(
            name,
            Box::new(StaticTransport { tools, reply }),
        ));
        conn.initialize().await.unwrap();
        conn
    }

    #[tokio::test]
    async fn dispatch_goes_to_first_matching_provider() {
        let pool = ProviderPool::for_tests(
            vec![
                ready_connection("alpha", vec!["web_search"], Ok("from-alpha")).await,
                ready_connection("beta", vec!["web_search", "fetch_page"], Ok("from-beta")).await,
            ],
            vec![],
            RotationConfig::default(),
        );

        let result = pool.execute_tool("web_search", json!({})).await.unwrap();
        assert_eq!(result, "web_search:from-alpha");

        let result = pool.execute_tool("fetch_page", json!({})).await.unwrap();
        assert_eq!(result, "fetch_page:from-beta");
    }

    #[tokio::test]
    async fn failed_execution_does_not_fall_through() {
        let pool = ProviderPool::for_tests(
            vec![
                ready_connection("alpha", vec!["web_search"], Err(())).await,
                ready_connection("beta", vec!["web_search"], Ok("from-beta")).await,
            ],
            vec![],
            RotationConfig::default(),
        );

        // alpha owns the name; its failure is the call's outcome.
        assert!(pool.execute_tool("web_search", json!({})).await.is_err());
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let pool = ProviderPool::for_tests(
            vec![ready_connection("alpha", vec!["web_search"], Ok("x")).await],
            vec![],
            RotationConfig::default(),
        );
        assert!(matches!(
            pool.execute_tool("nope", json!({})).await,
            Err(ProviderError::UnknownTool(_))
        ));
    }

    #[tokio::test]
    async fn catalog_dedupes_with_local_tools_winning() {
        let local: Arc<dyn LocalTool> = Arc::new(FnTool::new(
            "web_search",
            "local override",
            json!({"type": "object", "properties": {}}),
            |_args| Ok("local result".to_string()),
        ));
        let pool = ProviderPool::for_tests(
            vec![ready_connection("alpha", vec!["web_search", "fetch_page"], Ok("x")).await],
            vec![local],
            RotationConfig::default(),
        );

        let tools = pool.get_available_tools().await;
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["web_search", "fetch_page"]);
        assert_eq!(tools[0].provider, "local");
    }

    #[tokio::test]
    async fn provider_names_reflect_dispatch_order() {
        let pool = ProviderPool::for_tests(
            vec![
                ready_connection("alpha", vec!["web_search"], Ok("x")).await,
                ready_connection("beta", vec!["fetch_page"], Ok("x")).await,
            ],
            vec![],
            RotationConfig::default(),
        );
        assert_eq!(pool.provider_names().await, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn rotation_exhaustion_returns_false() {
        let pool = ProviderPool::for_tests(
            vec![ready_connection("web-search", vec!["web_search"], Ok("x")).await],
            vec![],
            RotationConfig {
                provider: "web-search".into(),
                env: "API_KEY".into(),
                keys: vec!["only-key".into()],
            },
        );

        // Single key: there is nothing to rotate to.
        assert!(!pool.rotate_credential().await.unwrap());
    }

    #[test]
    fn rotation_state_advances_monotonically() {
        let mut state = QuotaRotationState::new(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(state.active_key(), Some("a"));
        assert_eq!(state.advance(), Some("b"));
        assert_eq!(state.advance(), Some("c"));
        assert_eq!(state.advance(), None);
        // Exhaustion is terminal: the index never wraps.
        assert_eq!(state.advance(), None);
        assert_eq!(state.active_key(), Some("c"));
    }
}
