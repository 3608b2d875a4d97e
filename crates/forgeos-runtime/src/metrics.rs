//! Prometheus instruments of the agent runtime.
//!
//! Each `RuntimeMetrics` owns its registry so several runtimes (and tests)
//! can coexist in one process. The node exposes `encode()` on `/metrics`.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

const TICK_DURATION_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0];
const TICK_LAG_BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0];

pub struct RuntimeMetrics {
    registry:        Registry,
    lock_contention: IntCounterVec,
    tick_duration:   HistogramVec,
    tick_lag:        HistogramVec,
}

impl RuntimeMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let lock_contention = IntCounterVec::new(
            Opts::new(
                "agent_runtime_lock_contention_total",
                "Total lock contention events while ticking distributed wallet runtimes",
            ),
            &["network"],
        )?;
        let tick_duration = HistogramVec::new(
            HistogramOpts::new(
                "agent_runtime_tick_duration_seconds",
                "Duration of runtime tick execution",
            )
            .buckets(TICK_DURATION_BUCKETS.to_vec()),
            &["network", "result"],
        )?;
        let tick_lag = HistogramVec::new(
            HistogramOpts::new(
                "agent_runtime_tick_lag_seconds",
                "Lag between expected and actual runtime tick time",
            )
            .buckets(TICK_LAG_BUCKETS.to_vec()),
            &["network"],
        )?;

        registry.register(Box::new(lock_contention.clone()))?;
        registry.register(Box::new(tick_duration.clone()))?;
        registry.register(Box::new(tick_lag.clone()))?;

        Ok(Self { registry, lock_contention, tick_duration, tick_lag })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn inc_lock_contention(&self, network: &str) {
        self.lock_contention.with_label_values(&[network]).inc();
    }

    pub fn lock_contention(&self, network: &str) -> u64 {
        self.lock_contention.with_label_values(&[network]).get()
    }

    /// `result` is `ok` or `error`.
    pub fn observe_tick_duration(&self, network: &str, result: &str, seconds: f64) {
        self.tick_duration.with_label_values(&[network, result]).observe(seconds);
    }

    pub fn tick_count(&self, network: &str, result: &str) -> u64 {
        self.tick_duration.with_label_values(&[network, result]).get_sample_count()
    }

    pub fn observe_tick_lag(&self, network: &str, seconds: f64) {
        self.tick_lag.with_label_values(&[network]).observe(seconds);
    }

    /// Text exposition of every registered metric.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_lists_runtime_series() {
        let metrics = RuntimeMetrics::new().unwrap();
        metrics.inc_lock_contention("testnet-10");
        metrics.observe_tick_duration("testnet-10", "ok", 0.2);
        metrics.observe_tick_lag("testnet-10", 1.5);

        let text = metrics.encode().unwrap();
        assert!(text.contains("agent_runtime_lock_contention_total{network=\"testnet-10\"} 1"));
        assert!(text.contains("agent_runtime_tick_duration_seconds_bucket{network=\"testnet-10\",result=\"ok\",le=\"0.25\"} 1"));
        assert!(text.contains("agent_runtime_tick_lag_seconds_bucket{network=\"testnet-10\",le=\"1\"} 0"));
        assert!(text.contains("agent_runtime_tick_lag_seconds_bucket{network=\"testnet-10\",le=\"2\"} 1"));
    }

    #[test]
    fn separate_instances_do_not_share_counts() {
        let a = RuntimeMetrics::new().unwrap();
        let b = RuntimeMetrics::new().unwrap();
        a.inc_lock_contention("mainnet");
        assert_eq!(a.lock_contention("mainnet"), 1);
        assert_eq!(b.lock_contention("mainnet"), 0);
        assert_eq!(a.tick_count("mainnet", "ok"), 0);
    }
}
