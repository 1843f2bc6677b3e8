use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Full capacity snapshot reported by an agent.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Stats {
    #[serde(default)]
    pub mem_stats: MemStats,
    #[serde(default)]
    pub disk_stats: DiskStats,
    #[serde(default)]
    pub disk_path_stats: HashMap<String, DiskStats>,
    #[serde(default)]
    pub cpu_stats: CpuStats,
    #[serde(default)]
    pub load_stats: LoadStats,
    #[serde(default)]
    pub task_count: usize,
    /// One entry per torrent client the agent manages.
    #[serde(default)]
    pub client_stats: HashMap<String, ClientStats>,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct MemStats {
    pub mem_total_kb: u64,
    pub mem_free_kb: u64,
    pub mem_available_kb: u64,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct DiskStats {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_bytes: u64,
}

/// Cumulative jiffies per mode, as read from /proc/stat.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct CpuStats {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct LoadStats {
    pub last1min: f64,
    pub last5min: f64,
    pub last15min: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientStatus {
    Ready,
    #[default]
    NotReady,
}

/// Per-torrent-client capacity as reported by an agent.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClientStats {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub active_downloads_count: usize,
    #[serde(default)]
    pub active_downloads: Vec<ActiveDownload>,
    #[serde(default)]
    pub max_active_downloads_allowed: usize,
    /// True while the client is below its configured download cap.
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub status: ClientStatus,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ActiveDownload {
    #[serde(default)]
    pub name: String,
    /// Completion ratio in 0..1.
    #[serde(default)]
    pub progress: f64,
    /// Estimated seconds until completion.
    #[serde(default)]
    pub eta: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_wire_shape() {
        let raw = r#"{
            "mem_stats": {"mem_total_kb": 16384, "mem_free_kb": 1024, "mem_available_kb": 8192},
            "disk_stats": {"total_bytes": 1000, "free_bytes": 400, "used_bytes": 600},
            "disk_path_stats": {"/data": {"total_bytes": 10, "free_bytes": 5, "used_bytes": 5}},
            "task_count": 2,
            "client_stats": {
                "qbit01": {
                    "name": "qbit01",
                    "active_downloads_count": 1,
                    "active_downloads": [{"name": "iso", "progress": 0.5, "eta": 65}],
                    "max_active_downloads_allowed": 3,
                    "ready": true,
                    "status": "READY"
                }
            }
        }"#;
        let stats: Stats = serde_json::from_str(raw).unwrap();
        assert_eq!(stats.mem_stats.mem_available_kb, 8192);
        assert_eq!(stats.disk_path_stats["/data"].free_bytes, 5);
        let client = &stats.client_stats["qbit01"];
        assert_eq!(client.status, ClientStatus::Ready);
        assert_eq!(client.active_downloads[0].eta, 65);
    }

    #[test]
    fn test_missing_sections_default() {
        let stats: Stats = serde_json::from_str("{}").unwrap();
        assert!(stats.client_stats.is_empty());
        assert_eq!(stats.mem_stats.mem_total_kb, 0);
    }
}
