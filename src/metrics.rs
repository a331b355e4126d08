use crate::checks::CheckState;
use crate::state::State;
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub cpu_usage_percent: Gauge,
    pub memory_used_bytes: Gauge,
    pub memory_total_bytes: Gauge,
    pub swap_used_bytes: Gauge,
    pub swap_total_bytes: Gauge,
    pub disk_used_bytes: GaugeVec,
    pub disk_total_bytes: GaugeVec,
    pub disk_usage_percent: GaugeVec,
    pub net_rx_bytes_per_sec: GaugeVec,
    pub net_tx_bytes_per_sec: GaugeVec,
    pub process_count: Gauge,
    pub system_uptime_seconds: Gauge,
    pub agent_uptime_seconds: Gauge,
    pub scrape_count_total: Counter,
    pub collect_errors_total: CounterVec,
    pub nrpe_requests_total: CounterVec,
    pub check_executions_total: CounterVec,
    pub last_collect_timestamp_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let cpu_usage_percent = Gauge::with_opts(opts!(
            "snclient_cpu_usage_percent",
            "Average CPU usage across cores in percent (0..100)"
        ))?;
        let memory_used_bytes =
            Gauge::with_opts(opts!("snclient_memory_used_bytes", "Used memory in bytes"))?;
        let memory_total_bytes =
            Gauge::with_opts(opts!("snclient_memory_total_bytes", "Total memory in bytes"))?;
        let swap_used_bytes =
            Gauge::with_opts(opts!("snclient_swap_used_bytes", "Used swap in bytes"))?;
        let swap_total_bytes =
            Gauge::with_opts(opts!("snclient_swap_total_bytes", "Total swap in bytes"))?;
        let disk_used_bytes = GaugeVec::new(
            opts!("snclient_disk_used_bytes", "Disk used bytes by mount"),
            &["mount"],
        )?;
        let disk_total_bytes = GaugeVec::new(
            opts!("snclient_disk_total_bytes", "Disk total bytes by mount"),
            &["mount"],
        )?;
        let disk_usage_percent = GaugeVec::new(
            opts!("snclient_disk_usage_percent", "Disk usage in percent by mount"),
            &["mount"],
        )?;
        let net_rx_bytes_per_sec = GaugeVec::new(
            opts!(
                "snclient_net_rx_bytes_per_sec",
                "Receive speed in bytes per second by interface"
            ),
            &["iface"],
        )?;
        let net_tx_bytes_per_sec = GaugeVec::new(
            opts!(
                "snclient_net_tx_bytes_per_sec",
                "Transmit speed in bytes per second by interface"
            ),
            &["iface"],
        )?;
        let process_count =
            Gauge::with_opts(opts!("snclient_process_count", "Number of running processes"))?;
        let system_uptime_seconds = Gauge::with_opts(opts!(
            "snclient_system_uptime_seconds",
            "Host uptime in seconds"
        ))?;
        let agent_uptime_seconds =
            Gauge::with_opts(opts!("snclient_agent_uptime_seconds", "Agent uptime in seconds"))?;
        let scrape_count_total = Counter::with_opts(opts!(
            "snclient_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let collect_errors_total = CounterVec::new(
            opts!(
                "snclient_collect_errors_total",
                "Collector errors total by collector"
            ),
            &["collector"],
        )?;
        let nrpe_requests_total = CounterVec::new(
            opts!(
                "snclient_nrpe_requests_total",
                "NRPE connections handled by result"
            ),
            &["result"],
        )?;
        let check_executions_total = CounterVec::new(
            opts!(
                "snclient_check_executions_total",
                "Check executions by check name and resulting state"
            ),
            &["check", "state"],
        )?;
        let last_collect_timestamp_seconds = Gauge::with_opts(opts!(
            "snclient_last_collect_timestamp_seconds",
            "Unix timestamp of the last collection"
        ))?;

        register(&registry, &cpu_usage_percent)?;
        register(&registry, &memory_used_bytes)?;
        register(&registry, &memory_total_bytes)?;
        register(&registry, &swap_used_bytes)?;
        register(&registry, &swap_total_bytes)?;
        register(&registry, &disk_used_bytes)?;
        register(&registry, &disk_total_bytes)?;
        register(&registry, &disk_usage_percent)?;
        register(&registry, &net_rx_bytes_per_sec)?;
        register(&registry, &net_tx_bytes_per_sec)?;
        register(&registry, &process_count)?;
        register(&registry, &system_uptime_seconds)?;
        register(&registry, &agent_uptime_seconds)?;
        register(&registry, &scrape_count_total)?;
        register(&registry, &collect_errors_total)?;
        register(&registry, &nrpe_requests_total)?;
        register(&registry, &check_executions_total)?;
        register(&registry, &last_collect_timestamp_seconds)?;

        Ok(Arc::new(Self {
            registry,
            cpu_usage_percent,
            memory_used_bytes,
            memory_total_bytes,
            swap_used_bytes,
            swap_total_bytes,
            disk_used_bytes,
            disk_total_bytes,
            disk_usage_percent,
            net_rx_bytes_per_sec,
            net_tx_bytes_per_sec,
            process_count,
            system_uptime_seconds,
            agent_uptime_seconds,
            scrape_count_total,
            collect_errors_total,
            nrpe_requests_total,
            check_executions_total,
            last_collect_timestamp_seconds,
        }))
    }

    pub fn update_from_state(&self, state: &State) {
        self.cpu_usage_percent.set(state.cpu_usage_percent);
        self.memory_used_bytes.set(state.memory_used_bytes as f64);
        self.memory_total_bytes.set(state.memory_total_bytes as f64);
        self.swap_used_bytes.set(state.swap_used_bytes as f64);
        self.swap_total_bytes.set(state.swap_total_bytes as f64);
        self.process_count.set(state.processes.len() as f64);
        self.system_uptime_seconds
            .set(state.system_uptime_seconds as f64);
        self.last_collect_timestamp_seconds
            .set(state.last_collect_timestamp_seconds as f64);

        self.disk_used_bytes.reset();
        self.disk_total_bytes.reset();
        self.disk_usage_percent.reset();
        self.net_rx_bytes_per_sec.reset();
        self.net_tx_bytes_per_sec.reset();

        for d in &state.disks {
            self.disk_used_bytes
                .with_label_values(&[&d.mount])
                .set(d.used_bytes as f64);
            self.disk_total_bytes
                .with_label_values(&[&d.mount])
                .set(d.total_bytes as f64);
            let pct = if d.total_bytes > 0 {
                (d.used_bytes as f64 / d.total_bytes as f64) * 100.0
            } else {
                0.0
            };
            self.disk_usage_percent
                .with_label_values(&[&d.mount])
                .set(pct);
        }

        for n in &state.net {
            self.net_rx_bytes_per_sec
                .with_label_values(&[&n.iface])
                .set(n.rx_bytes_per_sec as f64);
            self.net_tx_bytes_per_sec
                .with_label_values(&[&n.iface])
                .set(n.tx_bytes_per_sec as f64);
        }

        let uptime = now_unix().saturating_sub(state.started_at_unix) as f64;
        self.agent_uptime_seconds.set(uptime);
    }

    pub fn inc_scrape_count(&self) {
        self.scrape_count_total.inc();
    }

    pub fn inc_collect_error(&self, collector: &str) {
        self.collect_errors_total
            .with_label_values(&[collector])
            .inc();
    }

    pub fn inc_nrpe_request(&self, result: &str) {
        self.nrpe_requests_total.with_label_values(&[result]).inc();
    }

    pub fn inc_check_execution(&self, check: &str, state: CheckState) {
        self.check_executions_total
            .with_label_values(&[check, state.as_str()])
            .inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
