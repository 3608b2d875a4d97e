//! Per-wallet agent state and its transitions.
//!
//! All mutation goes through `started`, `apply_tick`, `record_error` and
//! `stopped`; both runtime variants share them.

use chrono::{DateTime, Utc};
use forgeos_protocol::units::sompi_to_kas_string;
use forgeos_rpc::NodeInfo;
use serde::{Deserialize, Serialize};

pub const MIN_INTERVAL_SECONDS: u64 = 5;
pub const MAX_INTERVAL_SECONDS: u64 = 300;
pub const DEFAULT_INTERVAL_SECONDS: u64 = 15;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    #[default]
    Observe,
    Accumulate,
}

/// Request to start (or restart) the agent of one wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct StartAgent {
    pub address:          String,
    pub network:          String,
    pub mode:             AgentMode,
    /// Requested tick period; clamped by `normalize_interval_seconds`.
    pub interval_seconds: Option<f64>,
}

/// Outcome of one tick attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// RPC data fetched and persisted.
    Completed,
    /// RPC failed; the error was recorded in `lastError`.
    Failed,
    /// Another instance holds the wallet lock.
    Contended,
    /// No state, unreadable state, or the agent is stopped.
    Stale,
}

/// Clamp a requested interval to `[5, 300]` seconds, flooring fractions.
/// Absent or non-finite values fall back to 15.
pub fn normalize_interval_seconds(value: Option<f64>) -> u64 {
    match value {
        Some(v) if v.is_finite() => {
            v.floor()
                .clamp(MIN_INTERVAL_SECONDS as f64, MAX_INTERVAL_SECONDS as f64) as u64
        }
        _ => DEFAULT_INTERVAL_SECONDS,
    }
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECONDS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRuntimeState {
    pub address: String,
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub mode: AgentMode,
    #[serde(default)]
    pub running: bool,
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    #[serde(default)]
    pub cycles: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_tick_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_known_balance_sompi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_known_balance_kas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_virtual_daa_score: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_synced: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl AgentRuntimeState {
    /// State after `start`. History of a previous run is carried over and any
    /// previous error is cleared.
    pub fn started(input: &StartAgent, existing: Option<&Self>, now: DateTime<Utc>) -> Self {
        Self {
            address:                  input.address.trim().to_owned(),
            network:                  input.network.trim().to_owned(),
            mode:                     input.mode,
            running:                  true,
            interval_seconds:         normalize_interval_seconds(input.interval_seconds),
            cycles:                   existing.map_or(0, |s| s.cycles),
            started_at:               Some(existing.and_then(|s| s.started_at).unwrap_or(now)),
            last_tick_at:             existing.and_then(|s| s.last_tick_at),
            last_known_balance_sompi: existing.and_then(|s| s.last_known_balance_sompi.clone()),
            last_known_balance_kas:   existing.and_then(|s| s.last_known_balance_kas.clone()),
            last_virtual_daa_score:   existing.and_then(|s| s.last_virtual_daa_score.clone()),
            node_synced:              existing.and_then(|s| s.node_synced),
            last_error:               None,
            updated_at:               now,
        }
    }

    pub fn apply_tick(&mut self, balance_sompi: u64, info: &NodeInfo, now: DateTime<Utc>) {
        self.cycles += 1;
        self.last_tick_at = Some(now);
        self.last_known_balance_sompi = Some(balance_sompi.to_string());
        self.last_known_balance_kas = Some(sompi_to_kas_string(balance_sompi));
        self.last_virtual_daa_score = Some(info.virtual_daa_score.clone());
        self.node_synced = Some(info.is_synced);
        self.last_error = None;
        self.updated_at = now;
    }

    pub fn record_error(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.last_error = Some(message.into());
        self.updated_at = now;
    }

    pub fn stopped(&self, now: DateTime<Utc>) -> Self {
        Self {
            running: false,
            updated_at: now,
            ..self.clone()
        }
    }

    /// Seconds the tick at `now` runs behind its expected time, which is one
    /// interval after the last tick (or the start when none happened yet).
    pub fn tick_lag_seconds(&self, now: DateTime<Utc>) -> f64 {
        let Some(reference) = self.last_tick_at.or(self.started_at) else {
            return 0.0;
        };
        let expected_ms = reference.timestamp_millis() + (self.interval_seconds as i64) * 1000;
        ((now.timestamp_millis() - expected_ms) as f64 / 1000.0).max(0.0)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Lenient decode of a stored state. Invalid JSON or a record without an
    /// address reads as absent.
    pub fn from_json(raw: &str) -> Option<Self> {
        let state: Self = serde_json::from_str(raw).ok()?;
        if state.address.is_empty() {
            return None;
        }
        Some(state)
    }
}
