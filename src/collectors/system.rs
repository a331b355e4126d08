use crate::collectors::SystemSnapshot;
use crate::state::{DiskStat, NetStat, ProcessStat};
use sysinfo::{
    CpuExt, DiskExt, NetworkExt, NetworksExt, PidExt, ProcessExt, System, SystemExt,
};
use tracing::debug;

pub fn collect_system(system: &mut System) -> SystemSnapshot {
    system.refresh_cpu();
    system.refresh_memory();
    system.refresh_processes();
    system.refresh_disks_list();
    system.refresh_disks();
    system.refresh_networks_list();
    system.refresh_networks();

    let cpu_usage_percent = if system.cpus().is_empty() {
        0.0
    } else {
        let sum: f32 = system.cpus().iter().map(|c| c.cpu_usage()).sum();
        (sum / system.cpus().len() as f32) as f64
    };

    let disks: Vec<DiskStat> = system
        .disks()
        .iter()
        .map(|d| {
            let total = d.total_space();
            DiskStat {
                mount: d.mount_point().to_string_lossy().to_string(),
                file_system: String::from_utf8_lossy(d.file_system()).to_string(),
                used_bytes: total.saturating_sub(d.available_space()),
                total_bytes: total,
            }
        })
        .collect();

    let net: Vec<NetStat> = system
        .networks()
        .iter()
        .map(|(iface, data)| NetStat {
            iface: iface.to_string(),
            rx_bytes_total: data.total_received(),
            tx_bytes_total: data.total_transmitted(),
            rx_bytes_per_sec: 0,
            tx_bytes_per_sec: 0,
        })
        .collect();

    let mut processes: Vec<ProcessStat> = system
        .processes()
        .values()
        .map(|p| ProcessStat {
            pid: p.pid().as_u32(),
            name: p.name().to_string(),
            status: p.status().to_string(),
            memory_bytes: p.memory(),
            cpu_usage_percent: p.cpu_usage() as f64,
        })
        .collect();
    processes.sort_by_key(|p| p.pid);

    debug!(
        cpu = cpu_usage_percent,
        disks = disks.len(),
        ifaces = net.len(),
        processes = processes.len(),
        "system snapshot collected"
    );

    SystemSnapshot {
        host_name: system.host_name(),
        os_name: system.name(),
        os_version: system.os_version(),
        kernel_version: system.kernel_version(),
        uptime_seconds: system.uptime(),
        boot_time_unix: system.boot_time(),
        cpu_core_count: system.cpus().len() as u32,
        cpu_usage_percent,
        memory_used_bytes: system.used_memory(),
        memory_total_bytes: system.total_memory(),
        swap_used_bytes: system.used_swap(),
        swap_total_bytes: system.total_swap(),
        disks,
        net,
        processes,
    }
}
