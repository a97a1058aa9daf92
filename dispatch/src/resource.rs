//! Best-effort host resource sampling for heartbeats
//!
//! Everything here degrades to zero on failure; a heartbeat with zeroed
//! usage is still a heartbeat.

use std::path::Path;

/// Hostname of this machine, or "unknown"
pub fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Logical core count
pub fn core_count() -> u32 {
    std::thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(1)
}

/// Total system memory in bytes, from /proc/meminfo
pub fn total_memory() -> u64 {
    read_meminfo_kb(Path::new("/proc/meminfo")).map(|kb| kb * 1024).unwrap_or(0)
}

fn read_meminfo_kb(path: &Path) -> Option<u64> {
    let text = std::fs::read_to_string(path).ok()?;
    let line = text.lines().find(|l| l.starts_with("MemTotal:"))?;
    line.split_whitespace().nth(1)?.parse().ok()
}

/// One-minute load average scaled to a rough cpu percentage
pub fn cpu_usage() -> f64 {
    let Ok(text) = std::fs::read_to_string("/proc/loadavg") else {
        return 0.0;
    };
    let load: f64 = text.split_whitespace().next().and_then(|s| s.parse().ok()).unwrap_or(0.0);
    (load * 100.0 / core_count() as f64).clamp(0.0, 100.0)
}

/// Resident set size of this process in bytes, from /proc/self/statm
pub fn memory_usage() -> u64 {
    let Ok(text) = std::fs::read_to_string("/proc/self/statm") else {
        return 0;
    };
    let rss_pages: u64 = text.split_whitespace().nth(1).and_then(|s| s.parse().ok()).unwrap_or(0);
    rss_pages * 4096
}
