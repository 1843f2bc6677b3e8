use tracing::error;

use crate::stats::{CpuStats, DiskStats, LoadStats, MemStats, Stats};

/// Snapshot of the host-level sections of [`Stats`]. Client stats and
/// per-path disk stats are filled in by the agent service.
pub fn collect() -> Stats {
    Stats {
        mem_stats: memory(),
        disk_stats: disk("/"),
        cpu_stats: cpu(),
        load_stats: loadavg(),
        ..Default::default()
    }
}

pub fn memory() -> MemStats {
    match std::fs::read_to_string("/proc/meminfo") {
        Ok(content) => parse_meminfo(&content),
        Err(e) => {
            error!("error reading /proc/meminfo: {e:#}");
            MemStats::default()
        }
    }
}

pub fn cpu() -> CpuStats {
    match std::fs::read_to_string("/proc/stat") {
        Ok(content) => parse_cpu(&content),
        Err(e) => {
            error!("error reading /proc/stat: {e:#}");
            CpuStats::default()
        }
    }
}

pub fn loadavg() -> LoadStats {
    match std::fs::read_to_string("/proc/loadavg") {
        Ok(content) => parse_loadavg(&content),
        Err(e) => {
            error!("error reading /proc/loadavg: {e:#}");
            LoadStats::default()
        }
    }
}

#[cfg(unix)]
pub fn disk(path: &str) -> DiskStats {
    match nix::sys::statvfs::statvfs(std::path::Path::new(path)) {
        Ok(vfs) => {
            let fragment = vfs.fragment_size() as u64;
            let total = vfs.blocks() as u64 * fragment;
            let free = vfs.blocks_free() as u64 * fragment;
            DiskStats {
                total_bytes: total,
                // Free as seen by unprivileged users.
                free_bytes: vfs.blocks_available() as u64 * fragment,
                used_bytes: total.saturating_sub(free),
            }
        }
        Err(e) => {
            error!(path, "error reading disk usage: {e:#}");
            DiskStats::default()
        }
    }
}

#[cfg(not(unix))]
pub fn disk(_path: &str) -> DiskStats {
    DiskStats::default()
}

fn parse_meminfo(content: &str) -> MemStats {
    let mut stats = MemStats::default();
    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let value: u64 = value.parse().unwrap_or(0);
        match key {
            "MemTotal:" => stats.mem_total_kb = value,
            "MemFree:" => stats.mem_free_kb = value,
            "MemAvailable:" => stats.mem_available_kb = value,
            _ => {}
        }
    }
    stats
}

fn parse_cpu(content: &str) -> CpuStats {
    // The aggregate line: "cpu  user nice system idle iowait irq softirq steal ..."
    let Some(line) = content
        .lines()
        .find(|line| line.starts_with("cpu "))
    else {
        return CpuStats::default();
    };
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|field| field.parse().unwrap_or(0))
        .collect();
    let field = |idx: usize| fields.get(idx).copied().unwrap_or(0);
    CpuStats {
        user: field(0),
        nice: field(1),
        system: field(2),
        idle: field(3),
        iowait: field(4),
        irq: field(5),
        softirq: field(6),
        steal: field(7),
    }
}

fn parse_loadavg(content: &str) -> LoadStats {
    let mut parts = content.split_whitespace();
    let mut next = || -> f64 { parts.next().and_then(|v| v.parse().ok()).unwrap_or(0.0) };
    LoadStats {
        last1min: next(),
        last5min: next(),
        last15min: next(),
    }
}
