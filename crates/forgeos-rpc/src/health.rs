//! Endpoint health scoring and circuit breaking.
//!
//! Pure state transitions driven by the pool. Timestamps are passed in so the
//! transitions can be exercised without a clock.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

/// Scoring and breaker parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    pub initial_score: u32,
    pub max_score: u32,
    pub success_reward: u32,
    pub failure_penalty: u32,
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long an opened circuit stays open.
    pub cooldown: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            initial_score: 100,
            max_score: 200,
            success_reward: 5,
            failure_penalty: 20,
            failure_threshold: 3,
            cooldown: Duration::from_millis(30_000),
        }
    }
}

/// Result of recording a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Below threshold; the endpoint stays eligible.
    Degraded,
    /// Threshold reached; the endpoint is quarantined until `open_until_ms`.
    CircuitOpened { open_until_ms: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointState {
    pub target: String,
    pub score: u32,
    pub inflight: u32,
    pub total_requests: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Unix millis until which the circuit is open; 0 when closed.
    pub circuit_open_until_ms: i64,
    pub last_error: Option<String>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl EndpointState {
    pub fn new(target: impl Into<String>, policy: &HealthPolicy) -> Self {
        Self {
            target: target.into(),
            score: policy.initial_score,
            inflight: 0,
            total_requests: 0,
            consecutive_failures: 0,
            consecutive_successes: 0,
            circuit_open_until_ms: 0,
            last_error: None,
            last_failure_at: None,
            last_success_at: None,
        }
    }

    pub fn is_quarantined(&self, now_ms: i64) -> bool {
        self.circuit_open_until_ms > now_ms
    }

    pub fn begin_attempt(&mut self) {
        self.inflight += 1;
        self.total_requests += 1;
    }

    pub fn end_attempt(&mut self) {
        self.inflight = self.inflight.saturating_sub(1);
    }

    pub fn record_success(&mut self, policy: &HealthPolicy, now: DateTime<Utc>) {
        self.score = (self.score + policy.success_reward).min(policy.max_score);
        self.consecutive_failures = 0;
        self.consecutive_successes += 1;
        self.last_error = None;
        self.last_success_at = Some(now);
        if self.circuit_open_until_ms > 0 && self.circuit_open_until_ms <= now.timestamp_millis() {
            self.circuit_open_until_ms = 0;
        }
    }

    pub fn record_failure(
        &mut self,
        policy: &HealthPolicy,
        now: DateTime<Utc>,
        error: impl Into<String>,
    ) -> FailureOutcome {
        self.score = self.score.saturating_sub(policy.failure_penalty);
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
        self.last_error = Some(error.into());
        self.last_failure_at = Some(now);

        if self.consecutive_failures >= policy.failure_threshold {
            let cooldown_ms = i64::try_from(policy.cooldown.as_millis()).unwrap_or(i64::MAX);
            let open_until_ms = now.timestamp_millis().saturating_add(cooldown_ms);
            self.circuit_open_until_ms = open_until_ms;
            self.consecutive_failures = 0;
            return FailureOutcome::CircuitOpened { open_until_ms };
        }
        FailureOutcome::Degraded
    }

    /// Read-only view; the open-until time is reported only while it lies in
    /// the future.
    pub fn snapshot(&self, now_ms: i64) -> EndpointHealth {
        EndpointHealth {
            target: self.target.clone(),
            score: self.score,
            inflight: self.inflight,
            total_requests: self.total_requests,
            consecutive_failures: self.consecutive_failures,
            consecutive_successes: self.consecutive_successes,
            circuit_open_until: if self.is_quarantined(now_ms) {
                millis_to_datetime(self.circuit_open_until_ms)
            } else {
                None
            },
            last_error: self.last_error.clone(),
            last_failure_at: self.last_failure_at,
            last_success_at: self.last_success_at,
        }
    }
}

pub(crate) fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Attempt order over `states`, as indices.
///
/// Eligible endpoints come first: higher score, then fewer in-flight, then
/// fewer consecutive failures. Quarantined endpoints follow, soonest to
/// reopen first, so a pool whose circuits are all open still gets tried.
pub fn rank(states: &[EndpointState], now_ms: i64) -> Vec<usize> {
    let (mut open, mut quarantined): (Vec<usize>, Vec<usize>) =
        (0..states.len()).partition(|&i| !states[i].is_quarantined(now_ms));

    open.sort_by(|&l, &r| {
        let (l, r) = (&states[l], &states[r]);
        r.score
            .cmp(&l.score)
            .then(l.inflight.cmp(&r.inflight))
            .then(l.consecutive_failures.cmp(&r.consecutive_failures))
    });
    quarantined.sort_by_key(|&i| states[i].circuit_open_until_ms);

    open.extend(quarantined);
    open
}

/// Serializable per-endpoint health report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointHealth {
    pub target: String,
    pub score: u32,
    pub inflight: u32,
    pub total_requests: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_open_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: i64) -> DateTime<Utc> {
        millis_to_datetime(ms).unwrap()
    }

    const T0: i64 = 1_700_000_000_000;

    #[test]
    fn one_failure_then_one_success() {
        let policy = HealthPolicy::default();
        let mut a = EndpointState::new("a:16110", &policy);
        let mut b = EndpointState::new("b:16110", &policy);

        let outcome = a.record_failure(&policy, at(T0), "Kaspa RPC stream ended before response");
        assert_eq!(outcome, FailureOutcome::Degraded);
        b.record_success(&policy, at(T0));

        assert_eq!(a.score, 80);
        assert_eq!(a.consecutive_failures, 1);
        assert_eq!(b.score, 105);
        assert_eq!(b.consecutive_successes, 1);
        assert!(b.last_error.is_none());
    }

    #[test]
    fn threshold_opens_circuit_and_resets_failures() {
        let policy = HealthPolicy::default();
        let mut e = EndpointState::new("a:16110", &policy);
        e.record_failure(&policy, at(T0), "boom");
        e.record_failure(&policy, at(T0 + 1), "boom");
        let outcome = e.record_failure(&policy, at(T0 + 2), "boom");

        assert_eq!(outcome, FailureOutcome::CircuitOpened { open_until_ms: T0 + 2 + 30_000 });
        assert_eq!(e.consecutive_failures, 0);
        assert_eq!(e.score, 40);
        assert!(e.is_quarantined(T0 + 29_000));
        assert!(!e.is_quarantined(T0 + 2 + 30_000));
    }

    #[test]
    fn huge_cooldown_keeps_circuit_open() {
        let policy = HealthPolicy { cooldown: Duration::from_millis(u64::MAX), ..HealthPolicy::default() };
        let mut e = EndpointState::new("a:16110", &policy);
        e.record_failure(&policy, at(T0), "boom");
        e.record_failure(&policy, at(T0 + 1), "boom");
        let outcome = e.record_failure(&policy, at(T0 + 2), "boom");

        assert_eq!(outcome, FailureOutcome::CircuitOpened { open_until_ms: i64::MAX });
        assert!(e.is_quarantined(T0 + 2));
        assert!(e.is_quarantined(T0 + 86_400_000));
        assert_eq!(rank(&[e], T0 + 3), vec![0]);
    }

    #[test]
    fn success_after_cooldown_closes_circuit() {
        let policy = HealthPolicy::default();
        let mut e = EndpointState::new("a:16110", &policy);
        e.circuit_open_until_ms = T0;

        e.record_success(&policy, at(T0 - 1));
        assert_eq!(e.circuit_open_until_ms, T0);

        e.record_success(&policy, at(T0 + 1));
        assert_eq!(e.circuit_open_until_ms, 0);
    }

    #[test]
    fn score_stays_within_bounds() {
        let policy = HealthPolicy::default();
        let mut e = EndpointState::new("a:16110", &policy);
        for i in 0..40 {
            e.record_success(&policy, at(T0 + i));
        }
        assert_eq!(e.score, 200);
        for i in 0..40 {
            e.record_failure(&policy, at(T0 + 100 + i), "x");
        }
        assert_eq!(e.score, 0);
    }

    #[test]
    fn inflight_never_goes_negative() {
        let policy = HealthPolicy::default();
        let mut e = EndpointState::new("a:16110", &policy);
        e.end_attempt();
        assert_eq!(e.inflight, 0);
        e.begin_attempt();
        e.end_attempt();
        assert_eq!((e.inflight, e.total_requests), (0, 1));
    }

    #[test]
    fn rank_orders_open_then_quarantined() {
        let policy = HealthPolicy::default();
        let mut states: Vec<EndpointState> =
            ["a", "b", "c", "d", "e"].iter().map(|t| EndpointState::new(*t, &policy)).collect();

        states[0].score = 90;
        states[1].score = 120;
        states[2].score = 120;
        states[2].inflight = 2;
        states[3].circuit_open_until_ms = T0 + 5_000;
        states[4].circuit_open_until_ms = T0 + 1_000;
        // Elapsed breaker counts as open.
        states[0].circuit_open_until_ms = T0 - 1;

        assert_eq!(rank(&states, T0), vec![1, 2, 0, 4, 3]);
    }

    #[test]
    fn rank_breaks_score_ties_on_failures() {
        let policy = HealthPolicy::default();
        let mut states = vec![EndpointState::new("a", &policy), EndpointState::new("b", &policy)];
        states[0].consecutive_failures = 2;
        assert_eq!(rank(&states, T0), vec![1, 0]);
    }

    #[test]
    fn snapshot_hides_elapsed_breaker() {
        let policy = HealthPolicy::default();
        let mut e = EndpointState::new("a:16110", &policy);
        e.circuit_open_until_ms = T0 + 10;

        let open = serde_json::to_value(e.snapshot(T0)).unwrap();
        assert!(open.get("circuitOpenUntil").is_some());
        assert_eq!(open["totalRequests"], 0);

        let closed = serde_json::to_value(e.snapshot(T0 + 10)).unwrap();
        assert!(closed.get("circuitOpenUntil").is_none());
    }
}
