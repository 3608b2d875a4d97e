use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use clap::Parser;
use forgeos_protocol::{DEFAULT_NETWORK, DEFAULT_RPC_TARGET, MAX_RPC_TIMEOUT_MS, MIN_RPC_TIMEOUT_MS};
use forgeos_rpc::{HealthPolicy, PoolConfig, TlsOptions};
use forgeos_runtime::RuntimeOptions;

#[derive(Parser, Debug, Clone)]
#[command(name = "forgeos-node", about = "Kaspa wallet backend and agent runtime")]
pub struct Config {
    /// HTTP listen address. Takes precedence over --port.
    #[arg(long, env = "LISTEN")]
    pub listen: Option<SocketAddr>,

    /// HTTP port on all interfaces, used when --listen is absent.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    // ------------------------------------------------------------------------
    // Kaspa RPC pool
    // ------------------------------------------------------------------------

    /// Kaspa node gRPC endpoints, comma separated (host:port or URL).
    #[arg(long, env = "KASPA_RPC_TARGETS", value_delimiter = ',', default_value = DEFAULT_RPC_TARGET)]
    pub rpc_targets: Vec<String>,

    /// Per-call timeout in milliseconds (500..=60000).
    #[arg(long, env = "KASPA_RPC_TIMEOUT_MS", default_value_t = forgeos_protocol::DEFAULT_RPC_TIMEOUT_MS)]
    pub rpc_timeout_ms: u64,

    /// Endpoints tried per logical call.
    #[arg(long, env = "KASPA_RPC_MAX_ATTEMPTS", default_value_t = 2)]
    pub rpc_max_attempts: usize,

    /// Consecutive failures that open an endpoint's circuit.
    #[arg(long, env = "KASPA_RPC_CIRCUIT_BREAKER_FAILURE_THRESHOLD", default_value_t = 3)]
    pub circuit_breaker_failure_threshold: u32,

    #[arg(long, env = "KASPA_RPC_CIRCUIT_BREAKER_COOLDOWN_MS", default_value_t = 30_000)]
    pub circuit_breaker_cooldown_ms: u64,

    #[arg(long, env = "KASPA_RPC_USE_TLS", default_value_t = false)]
    pub rpc_use_tls: bool,

    /// PEM bundle trusted in addition to the native roots when TLS is on.
    #[arg(long, env = "KASPA_RPC_CA_CERT_PATH")]
    pub rpc_ca_cert_path: Option<PathBuf>,

    #[arg(long, env = "KASPA_NETWORK", default_value = DEFAULT_NETWORK)]
    pub network: String,

    // ------------------------------------------------------------------------
    // Agent runtime
    // ------------------------------------------------------------------------

    /// Coordination store. When absent agents run in this process only.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    #[arg(long, env = "AGENT_RUNTIME_NAMESPACE", default_value = forgeos_runtime::distributed::DEFAULT_NAMESPACE)]
    pub runtime_namespace: String,

    /// Wallet tick lease TTL in milliseconds. Must outlast a full tick.
    #[arg(long, env = "AGENT_RUNTIME_LOCK_TTL_MS", default_value_t = 30_000)]
    pub lock_ttl_ms: u64,

    #[arg(long, env = "AGENT_RUNTIME_RECONCILE_INTERVAL_MS", default_value_t = 5_000)]
    pub reconcile_interval_ms: u64,

    /// Ticks run concurrently by one instance.
    #[arg(long, env = "AGENT_RUNTIME_TICK_CONCURRENCY", default_value_t = 8)]
    pub tick_concurrency: usize,
}

impl Config {
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen
            .unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.port))
    }

    /// Non-empty, trimmed RPC targets.
    pub fn targets(&self) -> Vec<String> {
        self.rpc_targets
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
            .collect()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.targets().is_empty() {
            anyhow::bail!("KASPA_RPC_TARGETS must name at least one endpoint");
        }
        if !(MIN_RPC_TIMEOUT_MS..=MAX_RPC_TIMEOUT_MS).contains(&self.rpc_timeout_ms) {
            anyhow::bail!(
                "KASPA_RPC_TIMEOUT_MS must be within {MIN_RPC_TIMEOUT_MS}..={MAX_RPC_TIMEOUT_MS} (got {})",
                self.rpc_timeout_ms
            );
        }
        if self.rpc_max_attempts == 0 {
            anyhow::bail!("KASPA_RPC_MAX_ATTEMPTS must be at least 1");
        }
        if self.circuit_breaker_failure_threshold == 0 {
            anyhow::bail!("KASPA_RPC_CIRCUIT_BREAKER_FAILURE_THRESHOLD must be at least 1");
        }
        if self.network.trim().is_empty() {
            anyhow::bail!("KASPA_NETWORK must not be empty");
        }
        if self.tick_concurrency == 0 {
            anyhow::bail!("AGENT_RUNTIME_TICK_CONCURRENCY must be at least 1");
        }
        if self.reconcile_interval_ms == 0 {
            anyhow::bail!("AGENT_RUNTIME_RECONCILE_INTERVAL_MS must be positive");
        }
        // A tick makes its calls concurrently, each bounded by the pool's
        // attempt budget.
        let longest_tick_ms = self.rpc_timeout_ms * self.rpc_max_attempts as u64;
        if self.lock_ttl_ms <= longest_tick_ms {
            anyhow::bail!(
                "AGENT_RUNTIME_LOCK_TTL_MS ({}) must exceed the longest tick ({longest_tick_ms} ms)",
                self.lock_ttl_ms
            );
        }
        Ok(())
    }

    /// Pool settings. Reads the CA bundle when one is configured.
    pub fn pool_config(&self) -> anyhow::Result<PoolConfig> {
        let ca_cert_pem = match &self.rpc_ca_cert_path {
            Some(path) => Some(
                std::fs::read(path)
                    .map_err(|e| anyhow::anyhow!("cannot read CA cert {}: {e}", path.display()))?,
            ),
            None => None,
        };
        Ok(PoolConfig {
            targets:      self.targets(),
            timeout:      Duration::from_millis(self.rpc_timeout_ms),
            max_attempts: self.rpc_max_attempts,
            policy: HealthPolicy {
                failure_threshold: self.circuit_breaker_failure_threshold,
                cooldown:          Duration::from_millis(self.circuit_breaker_cooldown_ms),
                ..HealthPolicy::default()
            },
            tls: TlsOptions { enabled: self.rpc_use_tls, ca_cert_pem },
        })
    }

    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            network:            self.network.trim().to_owned(),
            redis_url:          self.redis_url.clone().filter(|u| !u.trim().is_empty()),
            namespace:          self.runtime_namespace.clone(),
            lock_ttl:           Duration::from_millis(self.lock_ttl_ms),
            reconcile_interval: Duration::from_millis(self.reconcile_interval_ms),
            tick_concurrency:   self.tick_concurrency,
        }
    }
}
