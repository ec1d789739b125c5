use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::election::ElectionConfig;
use crate::heartbeat::HeartbeatConfig;
use crate::protocol::{PeerId, UNKNOWN_LEADER};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid peer entry '{0}', expected id=host:port")]
    PeerSpec(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node_id: PeerId,
    /// Logical name: answered to heartbeat probes and used by the
    /// orchestrator to restart this process.
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    #[serde(default = "default_election_port")]
    pub election_port: u16,
    #[serde(default = "default_heartbeat_port")]
    pub heartbeat_port: u16,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
    /// Processes probed while this node coordinates.
    #[serde(default)]
    pub watch: Vec<String>,
    #[serde(default)]
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: PeerId,
    pub address: String,
}

/// Protocol timings. Durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub initial_timeout_ms: u64,
    pub max_backoff_ms: u64,
    pub exchange_attempts: u32,
    pub chooser_max_retries: u32,
    pub max_redirects: u32,
    pub member_poll_timeout_ms: u64,
    pub reinvite_interval_ms: u64,
    pub coordinator_idle_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_retries: u32,
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_election_port() -> u16 {
    5000
}

fn default_heartbeat_port() -> u16 {
    5001
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            initial_timeout_ms: 200,
            max_backoff_ms: 10_000,
            exchange_attempts: 3,
            chooser_max_retries: 3,
            max_redirects: 3,
            member_poll_timeout_ms: 500,
            reinvite_interval_ms: 1_000,
            coordinator_idle_timeout_ms: 24 * 60 * 60 * 1_000,
            heartbeat_interval_ms: 100,
            heartbeat_retries: 3,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: 1,
            name: "node_1".to_string(),
            bind_host: default_bind_host(),
            election_port: default_election_port(),
            heartbeat_port: default_heartbeat_port(),
            peers: vec![],
            watch: vec![],
            timing: TimingConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Parses `"1=host:port,2=host:port"`.
    pub fn parse_peers(list: &str) -> Result<Vec<PeerConfig>, ConfigError> {
        list.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (id, address) = entry
                    .split_once('=')
                    .ok_or_else(|| ConfigError::PeerSpec(entry.to_string()))?;
                let id = id
                    .trim()
                    .parse::<PeerId>()
                    .map_err(|_| ConfigError::PeerSpec(entry.to_string()))?;
                let address = address.trim();
                if address.is_empty() {
                    return Err(ConfigError::PeerSpec(entry.to_string()));
                }
                Ok(PeerConfig {
                    id,
                    address: address.to_string(),
                })
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id == UNKNOWN_LEADER {
            return Err(ConfigError::Invalid("node_id must not be 0".into()));
        }
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("name must not be empty".into()));
        }

        let mut seen = HashSet::new();
        for peer in self.peers() {
            if peer.id == UNKNOWN_LEADER {
                return Err(ConfigError::Invalid(format!(
                    "peer '{}' has id 0",
                    peer.address
                )));
            }
            if !seen.insert(peer.id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate peer id {}",
                    peer.id
                )));
            }
        }

        let t = &self.timing;
        if t.exchange_attempts == 0 || t.heartbeat_retries == 0 || t.chooser_max_retries == 0 {
            return Err(ConfigError::Invalid(
                "exchange_attempts, heartbeat_retries and chooser_max_retries must be at least 1"
                    .into(),
            ));
        }
        if t.initial_timeout_ms == 0 || t.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "initial_timeout_ms and heartbeat_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Peers other than this node. A shared cluster-wide list may name us too.
    pub fn peers(&self) -> impl Iterator<Item = &PeerConfig> {
        self.peers.iter().filter(move |p| p.id != self.node_id)
    }

    pub fn election_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.election_port)
    }

    pub fn heartbeat_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.heartbeat_port)
    }

    pub fn election_config(&self) -> ElectionConfig {
        let t = &self.timing;
        ElectionConfig {
            node_id: self.node_id,
            name: self.name.clone(),
            peers: self
                .peers()
                .map(|p| (p.id, p.address.clone()))
                .collect::<BTreeMap<_, _>>(),
            initial_timeout: Duration::from_millis(t.initial_timeout_ms),
            max_backoff: Duration::from_millis(t.max_backoff_ms),
            exchange_attempts: t.exchange_attempts,
            chooser_max_retries: t.chooser_max_retries,
            max_redirects: t.max_redirects,
            member_poll_timeout: Duration::from_millis(t.member_poll_timeout_ms),
            reinvite_interval: Duration::from_millis(t.reinvite_interval_ms),
            coordinator_idle_timeout: Duration::from_millis(t.coordinator_idle_timeout_ms),
        }
    }

    pub fn heartbeat_config(&self) -> HeartbeatConfig {
        let mut config = HeartbeatConfig::new(&self.name, &self.heartbeat_addr());
        config.probe_bind_addr = format!("{}:0", self.bind_host);
        config.watch = self.watch.clone();
        config.interval = Duration::from_millis(self.timing.heartbeat_interval_ms);
        config.retries = self.timing.heartbeat_retries;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn minimal_file_gets_defaults() {
        let file = write_config(r#"{ "node_id": 3, "name": "coordinator_3" }"#);
        let cfg = Config::load(file.path()).unwrap();

        assert_eq!(cfg.node_id, 3);
        assert_eq!(cfg.election_port, 5000);
        assert_eq!(cfg.heartbeat_port, 5001);
        assert!(cfg.peers.is_empty());
        assert_eq!(cfg.timing, TimingConfig::default());
        cfg.validate().unwrap();
    }

    #[test]
    fn full_file_is_honoured() {
        let file = write_config(
            r#"{
                "node_id": 1,
                "name": "coordinator_1",
                "election_port": 7000,
                "peers": [
                    { "id": 1, "address": "coordinator_1:7000" },
                    { "id": 2, "address": "coordinator_2:7000" }
                ],
                "watch": ["filter_1", "joiner_1"],
                "timing": { "heartbeat_interval_ms": 250, "max_redirects": 5 }
            }"#,
        );
        let cfg = Config::load(file.path()).unwrap();
        cfg.validate().unwrap();

        let election = cfg.election_config();
        assert_eq!(election.peers.len(), 1);
        assert_eq!(election.peers[&2], "coordinator_2:7000");
        assert_eq!(election.max_redirects, 5);
        assert_eq!(election.initial_timeout, Duration::from_millis(200));

        let heartbeat = cfg.heartbeat_config();
        assert_eq!(heartbeat.name, "coordinator_1");
        assert_eq!(heartbeat.listen_addr, "0.0.0.0:5001");
        assert_eq!(heartbeat.watch, vec!["filter_1", "joiner_1"]);
        assert_eq!(heartbeat.interval, Duration::from_millis(250));
    }

    #[test]
    fn missing_file_and_bad_json_are_reported() {
        let err = Config::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));

        let file = write_config("{ not json");
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn validation_rejects_bad_ids_and_counts() {
        let mut cfg = Config {
            node_id: 0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());

        cfg.node_id = 1;
        cfg.peers = Config::parse_peers("0=a:1").unwrap();
        assert!(cfg.validate().is_err());

        cfg.peers = Config::parse_peers("2=a:1,2=b:1").unwrap();
        assert!(cfg.validate().is_err());

        cfg.peers = Config::parse_peers("1=self:1,2=a:1").unwrap();
        cfg.validate().unwrap();

        cfg.timing.exchange_attempts = 0;
        assert!(cfg.validate().is_err());

        cfg.timing.exchange_attempts = 1;
        cfg.timing.chooser_max_retries = 0;
        assert!(cfg.validate().is_err());

        cfg.timing.chooser_max_retries = 1;
        cfg.validate().unwrap();
        cfg.name = "  ".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn peer_list_parsing() {
        let peers = Config::parse_peers("1=10.0.0.1:5000, 2=node_2:5000,").unwrap();
        assert_eq!(
            peers,
            vec![
                PeerConfig {
                    id: 1,
                    address: "10.0.0.1:5000".into()
                },
                PeerConfig {
                    id: 2,
                    address: "node_2:5000".into()
                },
            ]
        );

        assert!(matches!(
            Config::parse_peers("x=host:1"),
            Err(ConfigError::PeerSpec(_))
        ));
        assert!(matches!(
            Config::parse_peers("3"),
            Err(ConfigError::PeerSpec(_))
        ));
        assert!(matches!(
            Config::parse_peers("3="),
            Err(ConfigError::PeerSpec(_))
        ));
    }
}
