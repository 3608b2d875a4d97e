//! Agent runtime coordinated through a shared store.
//!
//! Any number of processes may run this runtime against the same store.
//! Agent state lives in the store, keyed by wallet shard; a periodic sweep on
//! every instance ticks each running wallet, and a per-wallet lease
//! guarantees at most one tick per wallet at a time across the cluster.
//!
//! Key layout under `<namespace>`:
//!
//! - `<ns>:state:<network>:<shard>` - JSON `AgentRuntimeState`
//! - `<ns>:known:<network>`         - set of every shard ever started
//! - `<ns>:running:<network>`       - set of shards to tick
//! - `<ns>:lock:<network>:<shard>`  - tick lease, value is the owner token

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use forgeos_protocol::{hash::wallet_shard_key, DEFAULT_NETWORK};
use forgeos_rpc::KaspaRpc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::{
    metrics::RuntimeMetrics,
    queue::TaskQueue,
    state::{AgentRuntimeState, StartAgent, TickOutcome},
    store::{CoordinationStore, ReleaseOutcome, SetOutcome},
    AgentRuntime, RuntimeError,
};

pub const DEFAULT_NAMESPACE: &str = "forgeos:agent";
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_millis(30_000);
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_millis(5_000);
pub const DEFAULT_TICK_CONCURRENCY: usize = 8;

/// Conditional state writes retried from a fresh read before giving up.
const MAX_WRITE_ATTEMPTS: usize = 5;

// ============================================================================
// Configuration and keys
// ============================================================================

#[derive(Debug, Clone)]
pub struct DistributedConfig {
    pub namespace:          String,
    pub network:            String,
    /// Lease TTL of a wallet tick. Must exceed the longest tick.
    pub lock_ttl:           Duration,
    pub reconcile_interval: Duration,
    pub tick_concurrency:   usize,
}

impl Default for DistributedConfig {
    fn default() -> Self {
        Self {
            namespace:          DEFAULT_NAMESPACE.to_owned(),
            network:            DEFAULT_NETWORK.to_owned(),
            lock_ttl:           DEFAULT_LOCK_TTL,
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            tick_concurrency:   DEFAULT_TICK_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    namespace: String,
    network:   String,
}

impl KeySpace {
    pub fn new(namespace: impl Into<String>, network: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), network: network.into() }
    }

    pub fn state(&self, shard: &str) -> String {
        format!("{}:state:{}:{}", self.namespace, self.network, shard)
    }

    pub fn known(&self) -> String {
        format!("{}:known:{}", self.namespace, self.network)
    }

    pub fn running(&self) -> String {
        format!("{}:running:{}", self.namespace, self.network)
    }

    pub fn lock(&self, shard: &str) -> String {
        format!("{}:lock:{}:{}", self.namespace, self.network, shard)
    }
}

fn random_hex(bytes: usize) -> String {
    let buf: Vec<u8> = (0..bytes).map(|_| rand::random::<u8>()).collect();
    hex::encode(buf)
}

// ============================================================================
// Runtime
// ============================================================================

struct Inner {
    rpc:         Arc<dyn KaspaRpc>,
    store:       Arc<dyn CoordinationStore>,
    metrics:     Arc<RuntimeMetrics>,
    keys:        KeySpace,
    network:     String,
    instance_id: String,
    lock_ttl:    Duration,
    queue:       TaskQueue,
}

pub struct DistributedRuntime {
    inner:              Arc<Inner>,
    reconcile_interval: Duration,
    reconciler:         Mutex<Option<JoinHandle<()>>>,
}

impl DistributedRuntime {
    /// Build a runtime over `store`. The sweep is not started; call
    /// `start_reconciler` for that.
    pub fn new(
        rpc: Arc<dyn KaspaRpc>,
        store: Arc<dyn CoordinationStore>,
        metrics: Arc<RuntimeMetrics>,
        config: DistributedConfig,
    ) -> Self {
        let instance_id = format!("{}-{}", std::process::id(), random_hex(8));
        tracing::info!(
            instance_id = %instance_id,
            network = %config.network,
            tick_concurrency = config.tick_concurrency,
            lock_ttl_ms = config.lock_ttl.as_millis() as u64,
            "Distributed agent runtime initialized"
        );
        Self {
            inner: Arc::new(Inner {
                rpc,
                store,
                metrics,
                keys: KeySpace::new(config.namespace, config.network.clone()),
                network: config.network,
                instance_id,
                lock_ttl: config.lock_ttl,
                queue: TaskQueue::new(config.tick_concurrency),
            }),
            reconcile_interval: config.reconcile_interval,
            reconciler: Mutex::new(None),
        }
    }

    pub fn keys(&self) -> &KeySpace {
        &self.inner.keys
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    /// Spawn the periodic sweep. Replaces a sweep started earlier.
    pub fn start_reconciler(&self) {
        let inner = Arc::clone(&self.inner);
        let period = self.reconcile_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                inner.reconcile().await;
            }
        });
        let previous = self
            .reconciler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// One sweep: tick every running wallet through the queue.
    pub async fn reconcile(&self) -> Vec<TickOutcome> {
        self.inner.reconcile().await
    }

    /// Tick the wallet in `shard` under its lease.
    pub async fn tick_wallet(&self, shard: &str) -> Result<TickOutcome, RuntimeError> {
        self.inner.tick_wallet(shard).await
    }

    fn stop_reconciler(&self) {
        let handle = self
            .reconciler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Inner {
    async fn load(&self, state_key: &str) -> Result<Option<AgentRuntimeState>, RuntimeError> {
        let raw = self.store.get(state_key).await?;
        Ok(raw.as_deref().and_then(AgentRuntimeState::from_json))
    }

    async fn enqueue_tick(self: &Arc<Self>, shard: String) -> Result<TickOutcome, RuntimeError> {
        let inner = Arc::clone(self);
        self.queue.run(async move { inner.tick_wallet(&shard).await }).await?
    }

    async fn reconcile(self: &Arc<Self>) -> Vec<TickOutcome> {
        let shards = match self.store.smembers(&self.keys.running()).await {
            Ok(shards) => shards,
            Err(e) => {
                tracing::warn!(error = %e, "Redis runtime reconcile failed");
                return Vec::new();
            }
        };
        if shards.is_empty() {
            return Vec::new();
        }

        let ticks = shards.into_iter().map(|shard| self.enqueue_tick(shard));
        let mut outcomes = Vec::new();
        for result in futures::future::join_all(ticks).await {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::warn!(error = %e, "Redis runtime reconcile failed"),
            }
        }
        outcomes
    }

    async fn tick_wallet(&self, shard: &str) -> Result<TickOutcome, RuntimeError> {
        let lock_key = self.keys.lock(shard);
        let token = format!("{}:{}", self.instance_id, random_hex(16));

        match self.store.set_if_absent(&lock_key, &token, self.lock_ttl).await? {
            SetOutcome::Acquired => {}
            SetOutcome::Exists => {
                self.metrics.inc_lock_contention(&self.network);
                tracing::debug!(shard, "Wallet tick skipped, lock held elsewhere");
                return Ok(TickOutcome::Contended);
            }
        }

        let outcome = self.tick_locked(shard).await;

        match self.store.compare_and_delete(&lock_key, &token).await {
            Ok(ReleaseOutcome::Released) => {}
            Ok(ReleaseOutcome::Noop) => {
                tracing::warn!(shard, "Wallet lock expired before tick finished");
            }
            Err(e) => {
                tracing::warn!(shard, error = %e, "Failed to release wallet lock");
            }
        }

        outcome
    }

    async fn tick_locked(&self, shard: &str) -> Result<TickOutcome, RuntimeError> {
        let state_key = self.keys.state(shard);
        let Some(current) = self.load(&state_key).await?.filter(|s| s.running) else {
            tracing::debug!(shard, "Wallet tick skipped, agent not running");
            return Ok(TickOutcome::Stale);
        };

        let started = Instant::now();
        self.metrics
            .observe_tick_lag(&self.network, current.tick_lag_seconds(Utc::now()));

        let result = futures::try_join!(
            self.rpc.get_balance_by_address(&current.address),
            self.rpc.get_server_info()
        );
        let elapsed = || started.elapsed().as_secs_f64();

        match result {
            Ok((balance, info)) => {
                self.update_state(&state_key, |s| s.apply_tick(balance, &info, Utc::now()))
                    .await?;
                self.metrics.observe_tick_duration(&self.network, "ok", elapsed());
                Ok(TickOutcome::Completed)
            }
            Err(e) => {
                tracing::warn!(address = %current.address, error = %e, "Agent tick failed");
                let message = e.to_string();
                self.update_state(&state_key, |s| s.record_error(message.clone(), Utc::now()))
                    .await?;
                self.metrics.observe_tick_duration(&self.network, "error", elapsed());
                Ok(TickOutcome::Failed)
            }
        }
    }

    /// Applies `update` to the stored state and writes it back only while the
    /// stored value is still the one read, re-reading when another writer got
    /// there first. A state that vanished or no longer parses is left alone.
    async fn update_state(
        &self,
        state_key: &str,
        mut update: impl FnMut(&mut AgentRuntimeState) + Send,
    ) -> Result<(), RuntimeError> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let Some(raw) = self.store.get(state_key).await? else {
                return Ok(());
            };
            let Some(mut state) = AgentRuntimeState::from_json(&raw) else {
                return Ok(());
            };
            update(&mut state);
            if self.store.compare_and_set(state_key, &raw, &state.to_json()?).await? {
                return Ok(());
            }
            tracing::debug!(key = state_key, "Agent state changed during tick, merging again");
        }
        Err(RuntimeError::Conflict(state_key.to_owned()))
    }
}

#[async_trait]
impl AgentRuntime for DistributedRuntime {
    async fn get(&self, address: &str) -> Result<Option<AgentRuntimeState>, RuntimeError> {
        self.inner.load(&self.inner.keys.state(&wallet_shard_key(address))).await
    }

    async fn list(&self) -> Result<Vec<AgentRuntimeState>, RuntimeError> {
        let shards = self.inner.store.smembers(&self.inner.keys.known()).await?;
        if shards.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = shards.iter().map(|s| self.inner.keys.state(s)).collect();
        let mut states: Vec<AgentRuntimeState> = self
            .inner
            .store
            .mget(&keys)
            .await?
            .into_iter()
            .flatten()
            .filter_map(|raw| AgentRuntimeState::from_json(&raw))
            .collect();
        states.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(states)
    }

    async fn start(&self, input: StartAgent) -> Result<AgentRuntimeState, RuntimeError> {
        let shard = wallet_shard_key(&input.address);
        let state_key = self.inner.keys.state(&shard);

        let existing = self.inner.load(&state_key).await?;
        let next = AgentRuntimeState::started(&input, existing.as_ref(), Utc::now());
        self.inner
            .store
            .upsert_wallet(
                &state_key,
                &next.to_json()?,
                &self.inner.keys.known(),
                &self.inner.keys.running(),
                &shard,
            )
            .await?;

        let outcome = self.inner.enqueue_tick(shard).await?;
        tracing::debug!(address = %next.address, ?outcome, "Agent started");

        Ok(self.inner.load(&state_key).await?.unwrap_or(next))
    }

    async fn stop(&self, address: &str) -> Result<Option<AgentRuntimeState>, RuntimeError> {
        let shard = wallet_shard_key(address);
        let state_key = self.inner.keys.state(&shard);
        let running = self.inner.keys.running();

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let Some(raw) = self.inner.store.get(&state_key).await? else {
                return Ok(None);
            };
            let Some(current) = AgentRuntimeState::from_json(&raw) else {
                return Ok(None);
            };
            let next = current.stopped(Utc::now());
            if self
                .inner
                .store
                .stop_wallet(&state_key, &raw, &next.to_json()?, &running, &shard)
                .await?
            {
                return Ok(Some(next));
            }
            tracing::debug!(address, "Agent state changed during stop, retrying");
        }
        Err(RuntimeError::Conflict(state_key))
    }

    async fn shutdown(&self) {
        self.stop_reconciler();
        self.inner.queue.close();
        if let Err(e) = self.inner.store.close().await {
            tracing::warn!(error = %e, "Failed to close coordination store");
        }
    }

    fn is_distributed(&self) -> bool {
        true
    }
}

impl Drop for DistributedRuntime {
    fn drop(&mut self) {
        self.stop_reconciler();
    }
}
