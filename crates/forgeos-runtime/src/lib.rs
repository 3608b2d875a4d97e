// forgeos-runtime: per-wallet agents that poll a Kaspa node.
// One in-process variant with local timers, one distributed variant that
// coordinates instances through a shared store and reconciles periodically.

pub mod distributed;
pub mod memory;
pub mod metrics;
pub mod queue;
pub mod state;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use forgeos_rpc::KaspaRpc;
use thiserror::Error;

pub use distributed::{DistributedConfig, DistributedRuntime, KeySpace};
pub use memory::InMemoryRuntime;
pub use metrics::RuntimeMetrics;
pub use state::{AgentMode, AgentRuntimeState, StartAgent, TickOutcome};
pub use store::{CoordinationStore, MemoryStore, RedisStore, StoreError};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] queue::QueueError),

    #[error("failed to encode agent state: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("agent state {0} kept changing, write abandoned")]
    Conflict(String),
}

/// Shared contract of both runtime variants.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn get(&self, address: &str) -> Result<Option<AgentRuntimeState>, RuntimeError>;

    /// All known agents, sorted by address.
    async fn list(&self) -> Result<Vec<AgentRuntimeState>, RuntimeError>;

    /// Register or restart an agent and run its first tick before returning.
    async fn start(&self, input: StartAgent) -> Result<AgentRuntimeState, RuntimeError>;

    /// Mark an agent stopped. `None` when the address was never started.
    async fn stop(&self, address: &str) -> Result<Option<AgentRuntimeState>, RuntimeError>;

    async fn shutdown(&self);

    /// Whether agents are coordinated across processes.
    fn is_distributed(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub network:            String,
    /// Coordination store URL; the distributed runtime is used when set.
    pub redis_url:          Option<String>,
    pub namespace:          String,
    pub lock_ttl:           Duration,
    pub reconcile_interval: Duration,
    pub tick_concurrency:   usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        let d = DistributedConfig::default();
        Self {
            network:            d.network,
            redis_url:          None,
            namespace:          d.namespace,
            lock_ttl:           d.lock_ttl,
            reconcile_interval: d.reconcile_interval,
            tick_concurrency:   d.tick_concurrency,
        }
    }
}

/// Pick the runtime variant for `options`.
pub async fn build_runtime(
    rpc: Arc<dyn KaspaRpc>,
    options: RuntimeOptions,
    metrics: Arc<RuntimeMetrics>,
) -> Result<Arc<dyn AgentRuntime>, RuntimeError> {
    let Some(url) = options.redis_url.as_deref() else {
        tracing::warn!("REDIS_URL is not set; using in-memory runtime (single-instance only)");
        return Ok(Arc::new(InMemoryRuntime::new(rpc, metrics, options.network)));
    };

    let store = RedisStore::connect(url).await?;
    tracing::info!(
        network = %options.network,
        namespace = %options.namespace,
        "Using Redis-backed distributed runtime"
    );
    let runtime = DistributedRuntime::new(
        rpc,
        Arc::new(store),
        metrics,
        DistributedConfig {
            namespace:          options.namespace,
            network:            options.network,
            lock_ttl:           options.lock_ttl,
            reconcile_interval: options.reconcile_interval,
            tick_concurrency:   options.tick_concurrency,
        },
    );
    runtime.start_reconciler();
    Ok(Arc::new(runtime))
}
