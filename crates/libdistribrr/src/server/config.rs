use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::registry::RosterEntry;

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7422
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

/// Coordinator configuration. Doubles as the persisted node roster: after a
/// successful register the whole file is rewritten with the current registry
/// snapshot.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub nodes: Vec<RosterEntry>,
}

impl ServerConfig {
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("error reading config file {path:?}"))?;
        serde_yaml::from_str(&content).with_context(|| format!("error parsing {path:?}"))
    }

    /// Atomic rewrite: serialize to a tempfile next to the target, then
    /// rename over it, so a crash mid-write never leaves a half file.
    pub async fn write_to_file(&self, path: &Path) -> anyhow::Result<()> {
        let serialized = serde_yaml::to_string(self).context("error serializing config")?;
        let tmp_path = path.with_extension("yaml.tmp");
        tokio::fs::write(&tmp_path, serialized.as_bytes())
            .await
            .with_context(|| format!("error writing {tmp_path:?}"))?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .with_context(|| format!("error renaming {tmp_path:?} to {path:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg: ServerConfig = serde_yaml::from_str("http:\n  token: secret\n").unwrap();
        assert_eq!(cfg.http.host, "0.0.0.0");
        assert_eq!(cfg.http.port, 7422);
        assert_eq!(cfg.http.token, "secret");
        assert!(cfg.nodes.is_empty());
    }

    #[test]
    fn test_unknown_keys_are_tolerated() {
        let raw = "http:\n  host: 127.0.0.1\n  port: 9000\n  token: secret\nfuture_section:\n  x: 1\nnodes:\n  - name: node0\n    addr: http://127.0.0.1:7430\n    token: secret\n";
        let cfg: ServerConfig = serde_yaml::from_str(raw).unwrap();
        assert_eq!(cfg.http.port, 9000);
        assert_eq!(cfg.nodes.len(), 1);
        assert_eq!(cfg.nodes[0].name, "node0");
    }

    #[tokio::test]
    async fn test_write_then_load_round_trips_roster() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("distribrr.yaml");
        let cfg = ServerConfig {
            http: HttpConfig {
                host: "127.0.0.1".to_string(),
                port: 7422,
                token: "secret".to_string(),
            },
            nodes: vec![RosterEntry {
                name: "node0".to_string(),
                addr: "http://127.0.0.1:7430".to_string(),
                token: "secret".to_string(),
            }],
        };
        cfg.write_to_file(&path).await.unwrap();
        // No leftover tempfile after the rename.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        let loaded = ServerConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.nodes, cfg.nodes);
        assert_eq!(loaded.http.token, "secret");
    }
}
