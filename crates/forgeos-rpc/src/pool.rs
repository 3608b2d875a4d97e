//! Multi-endpoint pool with health-ranked failover.
//!
//! Each logical operation ranks the endpoints afresh, then tries them in
//! order until one succeeds or the attempt budget is spent. Attempts are
//! sequential. Endpoint state sits behind a `std::sync::Mutex` that is only
//! held for bookkeeping, never across an await.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::{
    client::EndpointClient,
    error::RpcError,
    health::{rank, EndpointHealth, EndpointState, FailureOutcome, HealthPolicy},
    rpc::{KaspaRpc, NodeInfo},
    transport::{GrpcTransport, TlsOptions},
};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Endpoint addresses, in configuration order.
    pub targets: Vec<String>,
    /// Per-call timeout of each endpoint client.
    pub timeout: Duration,
    /// Upper bound on endpoints tried per operation.
    pub max_attempts: usize,
    pub policy: HealthPolicy,
    pub tls: TlsOptions,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            targets: vec![forgeos_protocol::DEFAULT_RPC_TARGET.to_owned()],
            timeout: Duration::from_millis(forgeos_protocol::DEFAULT_RPC_TIMEOUT_MS),
            max_attempts: 2,
            policy: HealthPolicy::default(),
            tls: TlsOptions::default(),
        }
    }
}

// ============================================================================
// Pool
// ============================================================================

struct Endpoint<C> {
    client: Arc<C>,
    state: Mutex<EndpointState>,
}

impl<C> Endpoint<C> {
    fn state(&self) -> MutexGuard<'_, EndpointState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Decrements the in-flight count when the attempt finishes or is cancelled.
struct InflightGuard<'a, C>(&'a Endpoint<C>);

impl<C> Drop for InflightGuard<'_, C> {
    fn drop(&mut self) {
        self.0.state().end_attempt();
    }
}

pub struct RpcPool<C = EndpointClient<GrpcTransport>> {
    endpoints: Vec<Endpoint<C>>,
    max_attempts: usize,
    policy: HealthPolicy,
}

/// Pool of gRPC endpoint clients.
pub type GrpcPool = RpcPool<EndpointClient<GrpcTransport>>;

impl GrpcPool {
    /// One lazily connected client per configured target.
    pub fn connect(config: &PoolConfig) -> Result<Self, RpcError> {
        let clients = config
            .targets
            .iter()
            .map(|target| {
                EndpointClient::connect(target, config.timeout, &config.tls)
                    .map(|client| (target.clone(), client))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_clients(clients, config.max_attempts, config.policy))
    }
}

impl<C: KaspaRpc> RpcPool<C> {
    /// Builds a pool over ready clients. At least one attempt is always made.
    pub fn from_clients(clients: Vec<(String, C)>, max_attempts: usize, policy: HealthPolicy) -> Self {
        let max_attempts = max_attempts.max(1);
        let endpoints: Vec<Endpoint<C>> = clients
            .into_iter()
            .map(|(target, client)| Endpoint {
                client: Arc::new(client),
                state: Mutex::new(EndpointState::new(target, &policy)),
            })
            .collect();

        let targets: Vec<String> = endpoints.iter().map(|e| e.state().target.clone()).collect();
        tracing::info!(
            rpc_targets = ?targets,
            max_attempts,
            circuit_breaker_failure_threshold = policy.failure_threshold,
            circuit_breaker_cooldown_ms = policy.cooldown.as_millis() as u64,
            "Kaspa RPC client pool initialized"
        );

        Self { endpoints, max_attempts, policy }
    }

    /// Run `operation` against endpoints in rank order until one succeeds.
    ///
    /// Returns the last endpoint error when every attempt fails.
    pub async fn with_failover<T, F, Fut>(&self, operation: F) -> Result<T, RpcError>
    where
        F: Fn(Arc<C>) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let order = {
            let now_ms = Utc::now().timestamp_millis();
            let states: Vec<EndpointState> = self.endpoints.iter().map(|e| e.state().clone()).collect();
            rank(&states, now_ms)
        };
        if order.is_empty() {
            return Err(RpcError::NoEndpoints);
        }

        let attempts = self.max_attempts.min(order.len());
        let mut last_error = RpcError::NoEndpoints;

        for &index in order.iter().take(attempts) {
            let endpoint = &self.endpoints[index];
            endpoint.state().begin_attempt();
            let guard = InflightGuard(endpoint);

            let result = operation(Arc::clone(&endpoint.client)).await;
            drop(guard);

            match result {
                Ok(value) => {
                    self.mark_success(endpoint);
                    return Ok(value);
                }
                Err(e) => {
                    self.mark_failure(endpoint, &e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    fn mark_success(&self, endpoint: &Endpoint<C>) {
        endpoint.state().record_success(&self.policy, Utc::now());
    }

    fn mark_failure(&self, endpoint: &Endpoint<C>, error: &RpcError) {
        let mut state = endpoint.state();
        match state.record_failure(&self.policy, Utc::now(), error.to_string()) {
            FailureOutcome::CircuitOpened { open_until_ms } => {
                tracing::warn!(
                    endpoint = %state.target,
                    score = state.score,
                    circuit_open_until_ms = open_until_ms,
                    error = %error,
                    "Kaspa RPC endpoint circuit opened"
                );
            }
            FailureOutcome::Degraded => {
                tracing::warn!(
                    endpoint = %state.target,
                    score = state.score,
                    consecutive_failures = state.consecutive_failures,
                    error = %error,
                    "Kaspa RPC endpoint request failed"
                );
            }
        }
    }

    /// Per-endpoint health, in configuration order.
    pub fn get_health_status(&self) -> Vec<EndpointHealth> {
        let now_ms = Utc::now().timestamp_millis();
        self.endpoints.iter().map(|e| e.state().snapshot(now_ms)).collect()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[async_trait]
impl<C: KaspaRpc + 'static> KaspaRpc for RpcPool<C> {
    async fn get_balance_by_address(&self, address: &str) -> Result<u64, RpcError> {
        self.with_failover(|client| async move { client.get_balance_by_address(address).await })
            .await
    }

    async fn get_server_info(&self) -> Result<NodeInfo, RpcError> {
        self.with_failover(|client| async move { client.get_server_info().await })
            .await
    }

    fn shutdown(&self) {
        for endpoint in &self.endpoints {
            endpoint.client.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Endpoint double answering balance calls from a script; the last
    /// scripted reply repeats. `None` hangs forever.
    struct ScriptedNode {
        replies: Mutex<VecDeque<Option<Result<u64, RpcError>>>>,
        calls: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    impl ScriptedNode {
        fn new(replies: Vec<Option<Result<u64, RpcError>>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
                shutdowns: AtomicUsize::new(0),
            }
        }

        fn ok(balance: u64) -> Self {
            Self::new(vec![Some(Ok(balance))])
        }

        fn failing(error: RpcError) -> Self {
            Self::new(vec![Some(Err(error))])
        }

        fn hanging() -> Self {
            Self::new(vec![None])
        }

        fn next_reply(&self) -> Option<Result<u64, RpcError>> {
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.pop_front().unwrap()
            } else {
                replies.front().cloned().unwrap()
            }
        }
    }

    #[async_trait]
    impl KaspaRpc for ScriptedNode {
        async fn get_balance_by_address(&self, _address: &str) -> Result<u64, RpcError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.next_reply() {
                Some(reply) => reply,
                None => std::future::pending().await,
            }
        }

        async fn get_server_info(&self) -> Result<NodeInfo, RpcError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(NodeInfo::default())
        }

        fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pool(nodes: Vec<ScriptedNode>, max_attempts: usize) -> RpcPool<ScriptedNode> {
        let clients = nodes
            .into_iter()
            .enumerate()
            .map(|(i, n)| (format!("node-{i}:16110"), n))
            .collect();
        RpcPool::from_clients(clients, max_attempts, HealthPolicy::default())
    }

    fn calls(pool: &RpcPool<ScriptedNode>, index: usize) -> usize {
        pool.endpoints[index].client.calls.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn fails_over_to_second_endpoint() {
        let p = pool(
            vec![ScriptedNode::failing(RpcError::StreamEnded), ScriptedNode::ok(123_000_000)],
            2,
        );

        assert_eq!(p.get_balance_by_address("kaspa:qz").await.unwrap(), 123_000_000);

        let health = p.get_health_status();
        assert_eq!(health[0].score, 80);
        assert_eq!(health[0].consecutive_failures, 1);
        assert_eq!(health[0].last_error.as_deref(), Some("Kaspa RPC stream ended before response"));
        assert!(health[0].last_failure_at.is_some());
        assert_eq!(health[1].score, 105);
        assert_eq!(health[1].consecutive_successes, 1);
        assert!(health[1].last_success_at.is_some());
        assert!(health.iter().all(|h| h.inflight == 0 && h.total_requests == 1));
    }

    #[tokio::test]
    async fn healthier_endpoint_is_tried_first_next_time() {
        let p = pool(
            vec![ScriptedNode::failing(RpcError::StreamEnded), ScriptedNode::ok(5)],
            2,
        );
        p.get_balance_by_address("a").await.unwrap();
        p.get_balance_by_address("a").await.unwrap();

        assert_eq!(calls(&p, 0), 1);
        assert_eq!(calls(&p, 1), 2);
    }

    #[tokio::test]
    async fn returns_last_error_when_all_attempts_fail() {
        let p = pool(
            vec![
                ScriptedNode::failing(RpcError::Timeout),
                ScriptedNode::failing(RpcError::Stream("connection refused".into())),
                ScriptedNode::ok(1),
            ],
            2,
        );
        let err = p.get_balance_by_address("a").await.unwrap_err();

        assert_eq!(err, RpcError::Stream("connection refused".into()));
        assert_eq!((calls(&p, 0), calls(&p, 1), calls(&p, 2)), (1, 1, 0));
    }

    #[tokio::test]
    async fn attempt_budget_is_capped_by_endpoint_count() {
        let p = pool(vec![ScriptedNode::failing(RpcError::Timeout)], 5);
        let err = p.get_balance_by_address("a").await.unwrap_err();
        assert_eq!(err.status(), 504);
        assert_eq!(calls(&p, 0), 1);
    }

    #[tokio::test]
    async fn zero_attempt_budget_still_tries_once() {
        let p = pool(vec![ScriptedNode::ok(9)], 0);
        assert_eq!(p.get_balance_by_address("a").await.unwrap(), 9);
        assert_eq!(calls(&p, 0), 1);
    }

    #[tokio::test]
    async fn empty_pool_reports_no_endpoints() {
        let p = pool(vec![], 2);
        let err = p.get_server_info().await.unwrap_err();
        assert_eq!(err, RpcError::NoEndpoints);
        assert_eq!(err.status(), 503);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn quarantined_single_endpoint_is_still_attempted() {
        let p = pool(vec![ScriptedNode::failing(RpcError::StreamEnded)], 2);
        for _ in 0..3 {
            p.get_balance_by_address("a").await.unwrap_err();
        }

        let health = &p.get_health_status()[0];
        assert!(health.circuit_open_until.is_some());
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.score, 40);

        p.get_balance_by_address("a").await.unwrap_err();
        assert_eq!(calls(&p, 0), 4);
    }

    #[tokio::test]
    async fn quarantined_endpoint_goes_last() {
        let p = pool(
            vec![
                ScriptedNode::new(vec![
                    Some(Err(RpcError::StreamEnded)),
                    Some(Err(RpcError::StreamEnded)),
                    Some(Err(RpcError::StreamEnded)),
                    Some(Ok(1)),
                ]),
                ScriptedNode::ok(2),
            ],
            1,
        );
        // Endpoint 0 ranks first on ties until it drops below endpoint 1.
        p.get_balance_by_address("a").await.unwrap_err();
        {
            let mut state = p.endpoints[0].state();
            state.score = 150;
        }
        p.get_balance_by_address("a").await.unwrap_err();
        {
            let mut state = p.endpoints[0].state();
            state.score = 150;
        }
        p.get_balance_by_address("a").await.unwrap_err();
        assert!(p.get_health_status()[0].circuit_open_until.is_some());

        // Score 130 beats 100, but the open circuit pushes it behind.
        assert_eq!(p.get_balance_by_address("a").await.unwrap(), 2);
        assert_eq!(calls(&p, 0), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_attempt_releases_inflight() {
        let p = pool(vec![ScriptedNode::hanging()], 2);
        let res = tokio::time::timeout(Duration::from_millis(50), p.get_balance_by_address("a")).await;
        assert!(res.is_err());

        let health = &p.get_health_status()[0];
        assert_eq!(health.inflight, 0);
        assert_eq!(health.total_requests, 1);
    }

    #[tokio::test]
    async fn shutdown_reaches_every_endpoint() {
        let p = pool(vec![ScriptedNode::ok(1), ScriptedNode::ok(2)], 2);
        KaspaRpc::shutdown(&p);
        KaspaRpc::shutdown(&p);
        assert!(p
            .endpoints
            .iter()
            .all(|e| e.client.shutdowns.load(Ordering::SeqCst) == 2));
    }

    #[tokio::test]
    async fn health_report_serializes_camel_case() {
        let p = pool(vec![ScriptedNode::ok(1)], 2);
        let json = serde_json::to_value(p.get_health_status()).unwrap();
        assert_eq!(json[0]["target"], "node-0:16110");
        assert_eq!(json[0]["consecutiveFailures"], 0);
        assert_eq!(json[0]["score"], 100);
        assert!(json[0].get("circuitOpenUntil").is_none());
    }
}
