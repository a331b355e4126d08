use crate::collectors::SystemSnapshot;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const CPU_HISTORY_RETENTION: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Default)]
pub struct State {
    pub started_at_unix: i64,
    pub last_collect_timestamp_seconds: i64,
    pub host_name: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub kernel_version: Option<String>,
    pub system_uptime_seconds: u64,
    pub boot_time_unix: u64,
    pub cpu_core_count: u32,
    pub cpu_usage_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub swap_used_bytes: u64,
    pub swap_total_bytes: u64,
    pub disks: Vec<DiskStat>,
    pub net: Vec<NetStat>,
    pub processes: Vec<ProcessStat>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DiskStat {
    pub mount: String,
    pub file_system: String,
    pub used_bytes: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct NetStat {
    pub iface: String,
    pub rx_bytes_total: u64,
    pub tx_bytes_total: u64,
    pub rx_bytes_per_sec: u64,
    pub tx_bytes_per_sec: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ProcessStat {
    pub pid: u32,
    pub name: String,
    pub status: String,
    pub memory_bytes: u64,
    pub cpu_usage_percent: f64,
}

impl State {
    pub fn new(now_unix: i64) -> Self {
        Self {
            started_at_unix: now_unix,
            ..Self::default()
        }
    }

    pub fn update_collected(&mut self, now_unix: i64, snapshot: SystemSnapshot) {
        let prev_ts = self.last_collect_timestamp_seconds;
        let dt = now_unix.saturating_sub(prev_ts).max(1) as u64;
        let prev_net: HashMap<String, (u64, u64)> = self
            .net
            .iter()
            .map(|n| (n.iface.clone(), (n.rx_bytes_total, n.tx_bytes_total)))
            .collect();

        let mut net = snapshot.net;
        for iface in &mut net {
            if let Some((prev_rx, prev_tx)) = prev_net.get(&iface.iface) {
                iface.rx_bytes_per_sec = iface.rx_bytes_total.saturating_sub(*prev_rx) / dt;
                iface.tx_bytes_per_sec = iface.tx_bytes_total.saturating_sub(*prev_tx) / dt;
            } else {
                iface.rx_bytes_per_sec = 0;
                iface.tx_bytes_per_sec = 0;
            }
        }

        self.last_collect_timestamp_seconds = now_unix;
        self.host_name = snapshot.host_name;
        self.os_name = snapshot.os_name;
        self.os_version = snapshot.os_version;
        self.kernel_version = snapshot.kernel_version;
        self.system_uptime_seconds = snapshot.uptime_seconds;
        self.boot_time_unix = snapshot.boot_time_unix;
        self.cpu_core_count = snapshot.cpu_core_count;
        self.cpu_usage_percent = snapshot.cpu_usage_percent;
        self.memory_used_bytes = snapshot.memory_used_bytes;
        self.memory_total_bytes = snapshot.memory_total_bytes;
        self.swap_used_bytes = snapshot.swap_used_bytes;
        self.swap_total_bytes = snapshot.swap_total_bytes;
        self.disks = snapshot.disks;
        self.net = net;
        self.processes = snapshot.processes;
    }
}

#[derive(Debug, Default)]
pub struct CpuLoadHistory {
    samples: Mutex<VecDeque<(Instant, f64)>>,
}

impl CpuLoadHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, usage_percent: f64) {
        self.push_at(Instant::now(), usage_percent);
    }

    pub fn push_at(&self, at: Instant, usage_percent: f64) {
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        samples.push_back((at, usage_percent));
        while let Some((oldest, _)) = samples.front() {
            if at.saturating_duration_since(*oldest) > CPU_HISTORY_RETENTION {
                samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Average over the trailing `window`. Falls back to the newest sample
    /// when the window holds none; `None` only before the first sample.
    pub fn average(&self, window: Duration) -> Option<f64> {
        let now = Instant::now();
        let samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        let (sum, count) = samples
            .iter()
            .filter(|(at, _)| now.saturating_duration_since(*at) <= window)
            .fold((0.0, 0_u32), |(sum, count), (_, v)| (sum + v, count + 1));
        if count > 0 {
            return Some(sum / f64::from(count));
        }
        samples.back().map(|(_, v)| *v)
    }

    pub fn len(&self) -> usize {
        self.samples.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
