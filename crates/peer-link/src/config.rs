use std::env;

use uuid::Uuid;

const DEFAULT_CHANNEL_PREFIX: &str = "p2p_";
const DEFAULT_DATA_CHANNEL_LABEL: &str = "peer-link";
const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
const DEFAULT_BANDWIDTH_HINT: &str = "b=AS:30";
const DEFAULT_BANDWIDTH_REPLACEMENT: &str = "b=AS:1638400";
const DEFAULT_DIAGNOSTICS_CAPACITY: usize = 256;

/// Bandwidth line swapped into outgoing session descriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandwidthHint {
    pub hint: String,
    pub replacement: String,
}

impl Default for BandwidthHint {
    fn default() -> Self {
        Self {
            hint: DEFAULT_BANDWIDTH_HINT.to_string(),
            replacement: DEFAULT_BANDWIDTH_REPLACEMENT.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Identifier of this endpoint; also names its personal signaling channel.
    pub local_id: String,
    pub channel_prefix: String,
    pub data_channel_label: String,
    /// Ordered and reliable by default so queued messages arrive in FIFO order.
    pub ordered: bool,
    /// Maximum retransmissions for unreliable data channels
    pub max_retransmits: Option<u16>,
    pub ice_servers: Vec<String>,
    pub bandwidth: Option<BandwidthHint>,
    pub diagnostics_capacity: usize,
}

impl ManagerConfig {
    pub fn from_env() -> Self {
        let local_id = env::var("PEER_LINK_ID")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let channel_prefix = env::var("PEER_LINK_CHANNEL_PREFIX")
            .unwrap_or_else(|_| DEFAULT_CHANNEL_PREFIX.to_string());
        let data_channel_label = env::var("PEER_LINK_DATA_CHANNEL")
            .unwrap_or_else(|_| DEFAULT_DATA_CHANNEL_LABEL.to_string());
        let ordered = env::var("PEER_LINK_ORDERED")
            .map(|value| truthy(&value))
            .unwrap_or(true);
        let max_retransmits = env::var("PEER_LINK_MAX_RETRANSMITS")
            .ok()
            .and_then(|value| value.parse().ok());
        let ice_servers = if env::var("PEER_LINK_LOCALHOST_ONLY").is_ok() {
            Vec::new()
        } else {
            env::var("PEER_LINK_ICE_SERVERS")
                .map(|value| parse_list(&value))
                .unwrap_or_else(|_| vec![DEFAULT_STUN_SERVER.to_string()])
        };
        let rewrite = env::var("PEER_LINK_BANDWIDTH_REWRITE")
            .map(|value| truthy(&value))
            .unwrap_or(true);
        let bandwidth = rewrite.then(|| BandwidthHint {
            hint: env::var("PEER_LINK_BANDWIDTH_HINT")
                .unwrap_or_else(|_| DEFAULT_BANDWIDTH_HINT.to_string()),
            replacement: env::var("PEER_LINK_BANDWIDTH_REPLACEMENT")
                .unwrap_or_else(|_| DEFAULT_BANDWIDTH_REPLACEMENT.to_string()),
        });
        let diagnostics_capacity = env::var("PEER_LINK_DIAGNOSTICS_CAPACITY")
            .ok()
            .and_then(|value| value.parse().ok())
            .filter(|capacity| *capacity > 0)
            .unwrap_or(DEFAULT_DIAGNOSTICS_CAPACITY);

        Self {
            local_id,
            channel_prefix,
            data_channel_label,
            ordered,
            max_retransmits,
            ice_servers,
            bandwidth,
            diagnostics_capacity,
        }
    }

    /// Default configuration for a known endpoint id.
    pub fn new(local_id: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            ..Self::default()
        }
    }

    /// Drops all ICE servers so only host candidates are gathered.
    pub fn localhost(mut self) -> Self {
        self.ice_servers.clear();
        self
    }

    pub fn with_channel_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.channel_prefix = prefix.into();
        self
    }

    pub fn with_data_channel_label(mut self, label: impl Into<String>) -> Self {
        self.data_channel_label = label.into();
        self
    }

    pub fn with_bandwidth(mut self, bandwidth: Option<BandwidthHint>) -> Self {
        self.bandwidth = bandwidth;
        self
    }

    /// Channel on which `peer_id` receives its signaling.
    pub fn channel_for(&self, peer_id: &str) -> String {
        format!("{}{}", self.channel_prefix, peer_id)
    }

    pub fn local_channel(&self) -> String {
        self.channel_for(&self.local_id)
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            local_id: Uuid::new_v4().to_string(),
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
            data_channel_label: DEFAULT_DATA_CHANNEL_LABEL.to_string(),
            ordered: true,
            max_retransmits: None,
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            bandwidth: Some(BandwidthHint::default()),
            diagnostics_capacity: DEFAULT_DIAGNOSTICS_CAPACITY,
        }
    }
}

fn truthy(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "on")
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    // Environment variable tests must not run in parallel
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    const VARS: &[&str] = &[
        "PEER_LINK_ID",
        "PEER_LINK_CHANNEL_PREFIX",
        "PEER_LINK_ICE_SERVERS",
        "PEER_LINK_LOCALHOST_ONLY",
        "PEER_LINK_BANDWIDTH_REWRITE",
        "PEER_LINK_ORDERED",
        "PEER_LINK_MAX_RETRANSMITS",
    ];

    fn clear_env() {
        for var in VARS {
            unsafe {
                env::remove_var(var);
            }
        }
    }

    #[test]
    fn defaults() {
        let config = ManagerConfig::new("alice");
        assert_eq!(config.local_id, "alice");
        assert_eq!(config.local_channel(), "p2p_alice");
        assert_eq!(config.channel_for("bob"), "p2p_bob");
        assert!(config.ordered);
        assert_eq!(config.max_retransmits, None);
        assert_eq!(config.bandwidth, Some(BandwidthHint::default()));
        assert_eq!(config.ice_servers.len(), 1);
    }

    #[test]
    fn builders_override_naming_and_bandwidth() {
        let config = ManagerConfig::new("alice")
            .with_channel_prefix("rtc/")
            .with_data_channel_label("chat")
            .with_bandwidth(None)
            .localhost();
        assert_eq!(config.local_channel(), "rtc/alice");
        assert_eq!(config.channel_for("bob"), "rtc/bob");
        assert_eq!(config.data_channel_label, "chat");
        assert_eq!(config.bandwidth, None);
        assert!(config.ice_servers.is_empty());
    }

    #[test]
    fn from_env_generates_id_when_unset() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let config = ManagerConfig::from_env();
        assert!(Uuid::parse_str(&config.local_id).is_ok());
        assert_eq!(config.channel_prefix, DEFAULT_CHANNEL_PREFIX);
    }

    #[test]
    fn from_env_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("PEER_LINK_ID", "edge-7");
            env::set_var("PEER_LINK_CHANNEL_PREFIX", "rtc.");
            env::set_var("PEER_LINK_ICE_SERVERS", "stun:a.example:3478, stun:b.example:3478,");
            env::set_var("PEER_LINK_BANDWIDTH_REWRITE", "0");
            env::set_var("PEER_LINK_ORDERED", "false");
            env::set_var("PEER_LINK_MAX_RETRANSMITS", "0");
        }
        let config = ManagerConfig::from_env();
        clear_env();

        assert_eq!(config.local_channel(), "rtc.edge-7");
        assert_eq!(
            config.ice_servers,
            vec!["stun:a.example:3478".to_string(), "stun:b.example:3478".to_string()]
        );
        assert_eq!(config.bandwidth, None);
        assert!(!config.ordered);
        assert_eq!(config.max_retransmits, Some(0));
    }

    #[test]
    fn localhost_only_clears_ice_servers() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("PEER_LINK_LOCALHOST_ONLY", "1");
        }
        let config = ManagerConfig::from_env();
        clear_env();
        assert!(config.ice_servers.is_empty());
    }
}
