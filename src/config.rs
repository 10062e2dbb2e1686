//! Configuration for hub-client

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::HubError;
use crate::hub::registry::{HubDefinition, HubRegistry};

/// Client configuration, loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Hub server WebSocket URL
    #[serde(default = "default_url")]
    pub url: String,

    /// Per-call timeout in milliseconds
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Delay before reconnecting after an unexpected close (-1 = never reconnect)
    #[serde(default = "default_reconnect_timeout_seconds")]
    pub reconnect_timeout_seconds: i64,

    /// Upper bound for the reconnect delay. When set, the delay doubles after
    /// each failed attempt until it reaches this cap.
    #[serde(default)]
    pub reconnect_max_seconds: Option<u64>,

    /// What happens to in-flight calls when the link drops
    #[serde(default)]
    pub disconnect_policy: DisconnectPolicy,

    /// Wire codec
    #[serde(default)]
    pub codec: CodecKind,

    /// Hub definitions (server methods + client handler slots)
    #[serde(default)]
    pub hubs: Vec<HubConfig>,
}

/// One `[[hubs]]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfig {
    pub name: String,
    #[serde(default)]
    pub server_methods: Vec<String>,
    #[serde(default)]
    pub client_methods: Vec<String>,
}

/// Fate of pending calls on connection loss.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectPolicy {
    /// Leave pending calls alone; each one ends on its own timer.
    #[default]
    WaitForTimeout,
    /// Fail every pending call with `CallError::Disconnected` as soon as the link drops.
    FailFast,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    #[default]
    Json,
    Msgpack,
}

/// Reconnection schedule derived from the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    Disabled,
    Fixed(Duration),
    Backoff { initial: Duration, max: Duration },
}

impl ReconnectPolicy {
    /// Build from the hub protocol's "seconds, -1 disables" convention.
    pub fn from_timeout_seconds(seconds: i64) -> Self {
        if seconds < 0 {
            Self::Disabled
        } else {
            Self::Fixed(Duration::from_secs(seconds as u64))
        }
    }

    /// Delay before reconnect attempt number `attempt` (1-based), or None when disabled.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        match *self {
            Self::Disabled => None,
            Self::Fixed(d) => Some(d),
            Self::Backoff { initial, max } => {
                let shift = attempt.saturating_sub(1).min(16);
                Some(initial.saturating_mul(1 << shift).min(max))
            }
        }
    }
}

fn default_url() -> String {
    "ws://localhost:8888".to_string()
}

fn default_call_timeout_ms() -> u64 {
    5000
}

fn default_reconnect_timeout_seconds() -> i64 {
    5
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            call_timeout_ms: default_call_timeout_ms(),
            reconnect_timeout_seconds: default_reconnect_timeout_seconds(),
            reconnect_max_seconds: None,
            disconnect_policy: DisconnectPolicy::default(),
            codec: CodecKind::default(),
            hubs: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, HubError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| HubError::Config(e.to_string()))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), HubError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| HubError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        match (
            ReconnectPolicy::from_timeout_seconds(self.reconnect_timeout_seconds),
            self.reconnect_max_seconds,
        ) {
            (ReconnectPolicy::Fixed(initial), Some(max)) => ReconnectPolicy::Backoff {
                initial,
                max: Duration::from_secs(max).max(initial),
            },
            (policy, _) => policy,
        }
    }

    /// Build the hub registry described by `hubs`.
    pub fn registry(&self) -> Result<HubRegistry, HubError> {
        let mut builder = HubRegistry::builder();
        for hub in &self.hubs {
            if hub.name.is_empty() {
                return Err(HubError::Config("hub with empty name".into()));
            }
            builder = builder.hub(
                HubDefinition::new(&hub.name)
                    .server_methods(hub.server_methods.iter().cloned())
                    .client_methods(hub.client_methods.iter().cloned()),
            );
        }
        Ok(builder.build())
    }
}
