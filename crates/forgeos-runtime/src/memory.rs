//! Single-process agent runtime.
//!
//! Agents live in a map keyed by normalized address and tick on per-wallet
//! tokio timers. Nothing is shared with other processes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use forgeos_protocol::hash::normalize_address;
use forgeos_rpc::KaspaRpc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::{
    metrics::RuntimeMetrics,
    state::{AgentRuntimeState, StartAgent, TickOutcome},
    AgentRuntime, RuntimeError,
};

struct Inner {
    rpc:     Arc<dyn KaspaRpc>,
    metrics: Arc<RuntimeMetrics>,
    network: String,
    states:  RwLock<HashMap<String, AgentRuntimeState>>,
    timers:  Mutex<HashMap<String, JoinHandle<()>>>,
}

pub struct InMemoryRuntime {
    inner: Arc<Inner>,
}

impl InMemoryRuntime {
    pub fn new(rpc: Arc<dyn KaspaRpc>, metrics: Arc<RuntimeMetrics>, network: String) -> Self {
        Self {
            inner: Arc::new(Inner {
                rpc,
                metrics,
                network,
                states: RwLock::new(HashMap::new()),
                timers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Run one tick for `address` right away.
    pub async fn tick(&self, address: &str) -> TickOutcome {
        self.inner.tick(&normalize_address(address)).await
    }
}

impl Inner {
    fn timers(&self) -> std::sync::MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel_timer(&self, key: &str) {
        if let Some(handle) = self.timers().remove(key) {
            handle.abort();
        }
    }

    /// Replace any timer of `key` with one firing every `interval_seconds`,
    /// first one interval from now.
    fn schedule(self: &Arc<Self>, key: &str, interval_seconds: u64) {
        let period = Duration::from_secs(interval_seconds);
        let weak: Weak<Inner> = Arc::downgrade(self);
        let timer_key = key.to_owned();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.tick(&timer_key).await;
            }
        });

        if let Some(previous) = self.timers().insert(key.to_owned(), handle) {
            previous.abort();
        }
    }

    async fn tick(&self, key: &str) -> TickOutcome {
        let current = self.states.read().await.get(key).cloned();
        let Some(current) = current.filter(|s| s.running) else {
            return TickOutcome::Stale;
        };

        let started = Instant::now();
        self.metrics
            .observe_tick_lag(&self.network, current.tick_lag_seconds(Utc::now()));

        let result = futures::try_join!(
            self.rpc.get_balance_by_address(&current.address),
            self.rpc.get_server_info()
        );

        // Results land on the entry as it is now, so a stop issued while the
        // RPC calls were in flight is kept.
        let mut states = self.states.write().await;
        let Some(entry) = states.get_mut(key) else {
            return TickOutcome::Stale;
        };
        let elapsed = started.elapsed().as_secs_f64();
        match result {
            Ok((balance, info)) => {
                entry.apply_tick(balance, &info, Utc::now());
                self.metrics.observe_tick_duration(&self.network, "ok", elapsed);
                TickOutcome::Completed
            }
            Err(e) => {
                tracing::warn!(address = %entry.address, error = %e, "Agent tick failed");
                entry.record_error(e.to_string(), Utc::now());
                self.metrics.observe_tick_duration(&self.network, "error", elapsed);
                TickOutcome::Failed
            }
        }
    }
}

#[async_trait]
impl AgentRuntime for InMemoryRuntime {
    async fn get(&self, address: &str) -> Result<Option<AgentRuntimeState>, RuntimeError> {
        Ok(self.inner.states.read().await.get(&normalize_address(address)).cloned())
    }

    async fn list(&self) -> Result<Vec<AgentRuntimeState>, RuntimeError> {
        let mut states: Vec<AgentRuntimeState> =
            self.inner.states.read().await.values().cloned().collect();
        states.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(states)
    }

    async fn start(&self, input: StartAgent) -> Result<AgentRuntimeState, RuntimeError> {
        let key = normalize_address(&input.address);
        let state = {
            let mut states = self.inner.states.write().await;
            let next = AgentRuntimeState::started(&input, states.get(&key), Utc::now());
            states.insert(key.clone(), next.clone());
            next
        };

        self.inner.schedule(&key, state.interval_seconds);
        let outcome = self.inner.tick(&key).await;
        tracing::debug!(address = %state.address, ?outcome, "Agent started");

        Ok(self.inner.states.read().await.get(&key).cloned().unwrap_or(state))
    }

    async fn stop(&self, address: &str) -> Result<Option<AgentRuntimeState>, RuntimeError> {
        let key = normalize_address(address);
        let mut states = self.inner.states.write().await;
        let Some(entry) = states.get_mut(&key) else {
            return Ok(None);
        };
        self.inner.cancel_timer(&key);
        *entry = entry.stopped(Utc::now());
        Ok(Some(entry.clone()))
    }

    async fn shutdown(&self) {
        for (_, handle) in self.inner.timers().drain() {
            handle.abort();
        }
    }

    fn is_distributed(&self) -> bool {
        false
    }
}

impl Drop for InMemoryRuntime {
    fn drop(&mut self) {
        for (_, handle) in self.inner.timers().drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AgentMode;
    use crate::testing::MockRpc;
    use forgeos_rpc::RpcError;

    fn runtime(rpc: Arc<MockRpc>) -> InMemoryRuntime {
        InMemoryRuntime::new(rpc, Arc::new(RuntimeMetrics::new().unwrap()), "testnet-10".into())
    }

    fn start_input(address: &str, interval: f64) -> StartAgent {
        StartAgent {
            address: address.into(),
            network: "testnet-10".into(),
            mode: AgentMode::Observe,
            interval_seconds: Some(interval),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_ticks_immediately_and_then_on_interval() {
        let rpc = Arc::new(MockRpc::new(123_000_000));
        let rt = runtime(Arc::clone(&rpc));

        let state = rt.start(start_input("kaspatest:qq1", 15.0)).await.unwrap();
        assert!(state.running);
        assert_eq!(state.cycles, 1);
        assert!(state.last_tick_at.is_some());
        assert_eq!(state.last_known_balance_sompi.as_deref(), Some("123000000"));
        assert_eq!(state.last_known_balance_kas.as_deref(), Some("1.23"));
        assert_eq!(state.last_virtual_daa_score.as_deref(), Some("42"));
        assert_eq!(state.node_synced, Some(true));

        tokio::time::sleep(Duration::from_secs(16)).await;
        let state = rt.get("KASPATEST:QQ1").await.unwrap().unwrap();
        assert_eq!(state.cycles, 2);
        assert_eq!(rpc.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_halts_ticks() {
        let rpc = Arc::new(MockRpc::new(1));
        let rt = runtime(Arc::clone(&rpc));
        rt.start(start_input("kaspatest:qq1", 5.0)).await.unwrap();

        let first = rt.stop("kaspatest:qq1").await.unwrap().unwrap();
        let second = rt.stop(" kaspatest:qq1 ").await.unwrap().unwrap();
        assert!(!first.running && !second.running);
        assert_eq!(first.cycles, second.cycles);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(rt.get("kaspatest:qq1").await.unwrap().unwrap().cycles, 1);
        assert_eq!(rpc.calls(), 1);
    }

    #[tokio::test]
    async fn stop_of_unknown_wallet_is_none() {
        let rt = runtime(Arc::new(MockRpc::new(1)));
        assert!(rt.stop("kaspatest:nobody").await.unwrap().is_none());
        assert!(rt.list().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_tick_records_error_and_recovers() {
        let rpc = Arc::new(MockRpc::new(5));
        rpc.fail_with(Some(RpcError::Timeout));
        let rt = runtime(Arc::clone(&rpc));

        let state = rt.start(start_input("kaspatest:qq1", 5.0)).await.unwrap();
        assert!(state.running);
        assert_eq!(state.cycles, 0);
        assert_eq!(state.last_error.as_deref(), Some("Timed out while waiting for Kaspa RPC response"));

        rpc.fail_with(None);
        assert_eq!(rt.tick("kaspatest:qq1").await, TickOutcome::Completed);
        let state = rt.get("kaspatest:qq1").await.unwrap().unwrap();
        assert_eq!(state.cycles, 1);
        assert_eq!(state.last_error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_tick_keeps_last_good_observation() {
        let rpc = Arc::new(MockRpc::new(123_000_000));
        let rt = runtime(Arc::clone(&rpc));
        let good = rt.start(start_input("kaspatest:qq1", 60.0)).await.unwrap();
        assert_eq!(good.cycles, 1);

        rpc.fail_with(Some(RpcError::Stream("connection reset".into())));
        assert_eq!(rt.tick("kaspatest:qq1").await, TickOutcome::Failed);

        let state = rt.get("kaspatest:qq1").await.unwrap().unwrap();
        assert!(state.running);
        assert_eq!(state.cycles, 1);
        assert_eq!(state.last_tick_at, good.last_tick_at);
        assert_eq!(state.last_known_balance_sompi.as_deref(), Some("123000000"));
        assert_eq!(state.last_known_balance_kas.as_deref(), Some("1.23"));
        assert_eq!(state.last_virtual_daa_score.as_deref(), Some("42"));
        assert_eq!(state.node_synced, Some(true));
        assert_eq!(state.last_error.as_deref(), Some("connection reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_keeps_history_and_replaces_timer() {
        let rpc = Arc::new(MockRpc::new(1));
        let rt = runtime(Arc::clone(&rpc));
        rt.start(start_input("kaspatest:qq1", 5.0)).await.unwrap();
        rt.stop("kaspatest:qq1").await.unwrap();

        let state = rt.start(start_input("kaspatest:qq1", 100.0)).await.unwrap();
        assert_eq!(state.cycles, 2);
        assert_eq!(state.interval_seconds, 100);

        // Only the 100 s timer is live.
        tokio::time::sleep(Duration::from_secs(50)).await;
        assert_eq!(rt.get("kaspatest:qq1").await.unwrap().unwrap().cycles, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_tick_is_not_undone() {
        let rpc = Arc::new(MockRpc::slow(9, Duration::from_secs(2)));
        let rt = Arc::new(runtime(Arc::clone(&rpc)));

        let starter = {
            let rt = Arc::clone(&rt);
            tokio::spawn(async move { rt.start(start_input("kaspatest:qq1", 30.0)).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        rt.stop("kaspatest:qq1").await.unwrap().unwrap();

        let state = starter.await.unwrap().unwrap();
        assert!(!state.running);
        assert_eq!(state.cycles, 1);
    }

    #[tokio::test]
    async fn list_is_sorted_by_address() {
        let rt = runtime(Arc::new(MockRpc::new(1)));
        for address in ["kaspatest:zz", "kaspatest:aa", "kaspatest:mm"] {
            rt.start(start_input(address, 300.0)).await.unwrap();
        }
        let addresses: Vec<String> = rt.list().await.unwrap().into_iter().map(|s| s.address).collect();
        assert_eq!(addresses, vec!["kaspatest:aa", "kaspatest:mm", "kaspatest:zz"]);
        rt.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_timers() {
        let rpc = Arc::new(MockRpc::new(1));
        let rt = runtime(Arc::clone(&rpc));
        rt.start(start_input("kaspatest:qq1", 5.0)).await.unwrap();
        rt.shutdown().await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(rpc.calls(), 1);
        assert!(rt.get("kaspatest:qq1").await.unwrap().unwrap().running);
    }
}
