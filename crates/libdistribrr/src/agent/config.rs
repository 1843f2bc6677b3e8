use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7430
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub token: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            token: String::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub manager: ManagerConfig,
    /// Torrent clients this agent manages, keyed by client name.
    #[serde(default)]
    pub clients: HashMap<String, TorrentClientConfig>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Defaults to the hostname when empty.
    #[serde(default)]
    pub node_name: String,
    /// The address the coordinator should reach this agent on.
    #[serde(default)]
    pub client_addr: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// The coordinator to register with.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ManagerConfig {
    #[serde(default)]
    pub addr: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TorrentClientConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
    #[serde(default)]
    pub basic_user: String,
    #[serde(default)]
    pub basic_pass: String,
    #[serde(default)]
    pub rules: ClientRules,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClientRules {
    #[serde(default)]
    pub torrents: TorrentRules,
    #[serde(default)]
    pub storage: Vec<StorageRule>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TorrentRules {
    #[serde(default)]
    pub max_active_downloads: usize,
}

/// A download path whose disk usage is reported in stats.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StorageRule {
    pub path: String,
}

impl AgentConfig {
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("error reading config file {path:?}"))?;
        serde_yaml::from_str(&content).with_context(|| format!("error parsing {path:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let raw = r#"
http:
  host: 127.0.0.1
  port: 7430
  token: secret
agent:
  node_name: node0
  client_addr: http://127.0.0.1:7430
  labels:
    disktype: ssd
manager:
  addr: http://127.0.0.1:7422
  token: secret
clients:
  qbit01:
    host: http://127.0.0.1:8080
    user: admin
    pass: adminadmin
    rules:
      torrents:
        max_active_downloads: 3
      storage:
        - path: /data/torrents
"#;
        let cfg: AgentConfig = serde_yaml::from_str(raw).unwrap();
        assert_eq!(cfg.agent.node_name, "node0");
        assert_eq!(cfg.agent.labels["disktype"], "ssd");
        let client = &cfg.clients["qbit01"];
        assert_eq!(client.rules.torrents.max_active_downloads, 3);
        assert_eq!(client.rules.storage[0].path, "/data/torrents");
    }

    #[test]
    fn test_defaults() {
        let cfg: AgentConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.http.port, 7430);
        assert!(cfg.clients.is_empty());
        assert!(cfg.manager.addr.is_empty());
    }
}
