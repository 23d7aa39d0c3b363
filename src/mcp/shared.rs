//! Process-wide shared provider pool
//!
//! Long-running deployments initialize the pool once and reuse it across
//! tasks instead of paying provider startup per invocation. The pool itself
//! is `&self`-safe, so sharing is an `Arc`; this module only adds the
//! explicit lifecycle: initialize, is_ready, get, shutdown.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::agent::local::LocalTool;
use crate::config::{ProvidersConfig, RotationConfig};
use crate::error::AgentError;

use super::pool::{PoolLimits, ProviderPool};

static SHARED: Mutex<Option<Arc<ProviderPool>>> = Mutex::const_new(None);

/// Handle to the process-wide pool.
pub struct SharedPool;

impl SharedPool {
    /// Initialize the shared pool. A second call while a pool is live is a
    /// no-op returning the existing instance.
    pub async fn initialize(
        providers: &ProvidersConfig,
        rotation: RotationConfig,
        limits: PoolLimits,
        local_tools: Vec<Arc<dyn LocalTool>>,
    ) -> Result<Arc<ProviderPool>, AgentError> {
        let mut guard = SHARED.lock().await;
        if let Some(pool) = guard.as_ref() {
            tracing::debug!("Shared pool already initialized");
            return Ok(pool.clone());
        }

        let pool = Arc::new(
            ProviderPool::initialize_all(providers, rotation, limits, local_tools).await?,
        );
        *guard = Some(pool.clone());
        tracing::info!("Shared provider pool initialized");
        Ok(pool)
    }

    pub async fn is_ready() -> bool {
        SHARED.lock().await.is_some()
    }

    /// Borrow the shared pool, if initialized.
    pub async fn get() -> Option<Arc<ProviderPool>> {
        SHARED.lock().await.clone()
    }

    /// Tear down the shared pool and release every connection.
    pub async fn shutdown() {
        let pool = SHARED.lock().await.take();
        if let Some(pool) = pool {
            pool.shutdown().await;
            tracing::info!("Shared provider pool shut down");
        }
    }
}
