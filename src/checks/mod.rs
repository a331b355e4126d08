pub mod args;
pub mod check_cpu;
pub mod check_drivesize;
pub mod check_dummy;
pub mod check_memory;
pub mod check_network;
pub mod check_process;
pub mod check_uptime;
pub mod threshold;

use crate::state::{CpuLoadHistory, State};
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub use args::{parse_args, parse_syntax, Aggregator, Argument, CheckData};
pub use threshold::parse_threshold;

pub type MetricMap = HashMap<String, String>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CheckState {
    #[default]
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl CheckState {
    pub fn code(self) -> u16 {
        match self {
            Self::Ok => 0,
            Self::Warning => 1,
            Self::Critical => 2,
            Self::Unknown => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckState {
    type Err = CheckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "ok" => Ok(Self::Ok),
            "1" | "warn" | "warning" => Ok(Self::Warning),
            "2" | "crit" | "critical" => Ok(Self::Critical),
            "3" | "unknown" => Ok(Self::Unknown),
            _ => Err(CheckError::Argument(format!("unknown state '{s}'"))),
        }
    }
}

impl Serialize for CheckState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("invalid threshold '{raw}': {reason}")]
    Threshold { raw: String, reason: String },
    #[error("invalid argument: {0}")]
    Argument(String),
    #[error("{0}")]
    Collect(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckMetric {
    pub name: String,
    pub unit: String,
    pub value: f64,
    pub warning: Option<f64>,
    pub critical: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl CheckMetric {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            unit: String::new(),
            value,
            warning: None,
            critical: None,
            min: None,
            max: None,
        }
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = unit.to_string();
        self
    }

    pub fn with_min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn with_max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn with_thresholds(mut self, data: &CheckData, keys: &[&str]) -> Self {
        let pick = |t: &threshold::Threshold| {
            if keys.contains(&t.name.as_str()) {
                t.numeric_value()
            } else {
                None
            }
        };
        self.warning = pick(&data.warn_threshold);
        self.critical = pick(&data.crit_threshold);
        self
    }

    pub fn perf_string(&self) -> String {
        let opt = |v: Option<f64>| v.map(format_number).unwrap_or_default();
        format!(
            "'{}'={}{};{};{};{};{}",
            self.name,
            format_number(self.value),
            self.unit,
            opt(self.warning),
            opt(self.critical),
            opt(self.min),
            opt(self.max)
        )
    }
}

impl fmt::Display for CheckMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.perf_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub state: CheckState,
    pub output: String,
    pub metrics: Vec<CheckMetric>,
}

impl CheckResult {
    pub fn new(state: CheckState, output: impl Into<String>) -> Self {
        Self {
            state,
            output: output.into(),
            metrics: Vec::new(),
        }
    }

    pub fn unknown(message: impl fmt::Display) -> Self {
        Self::new(CheckState::Unknown, format!("UNKNOWN - {message}"))
    }

    pub fn with_metrics(mut self, metrics: Vec<CheckMetric>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn perf_data(&self) -> String {
        self.metrics.iter().map(CheckMetric::perf_string).collect()
    }

    pub fn plugin_output(&self) -> String {
        if self.metrics.is_empty() {
            self.output.clone()
        } else {
            format!("{}|{}", self.output, self.perf_data())
        }
    }
}

pub trait CheckHandler: Send + Sync {
    fn check(&self, args: &[String]) -> Result<CheckResult, CheckError>;
}

#[derive(Clone, Default)]
pub struct CheckRegistry {
    entries: BTreeMap<String, Arc<dyn CheckHandler>>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn CheckHandler>) {
        let name = name.into();
        if self.entries.insert(name.clone(), handler).is_some() {
            debug!(check = %name, "check handler replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CheckHandler>> {
        self.entries.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn run(&self, name: &str, args: &[String]) -> CheckResult {
        let Some(handler) = self.get(name) else {
            return CheckResult::unknown(format!("No such check: {name}"));
        };
        match handler.check(args) {
            Ok(result) => result,
            Err(err) => {
                debug!(check = %name, error = %err, "check failed");
                CheckResult::unknown(err)
            }
        }
    }
}

pub async fn run_blocking(
    registry: Arc<CheckRegistry>,
    name: String,
    args: Vec<String>,
) -> CheckResult {
    let command = name.clone();
    match tokio::task::spawn_blocking(move || registry.run(&name, &args)).await {
        Ok(result) => result,
        Err(err) => {
            warn!(check = %command, error = %err, "check task aborted");
            CheckResult::unknown(format!("check {command} aborted: {err}"))
        }
    }
}

pub fn default_registry(state: Arc<RwLock<State>>, cpu: Arc<CpuLoadHistory>) -> CheckRegistry {
    let mut registry = CheckRegistry::new();
    registry.register("check_cpu", Arc::new(check_cpu::CheckCpu::new(cpu)));
    registry.register(
        "check_drivesize",
        Arc::new(check_drivesize::CheckDriveSize::new(state.clone())),
    );
    registry.register("check_dummy", Arc::new(check_dummy::CheckDummy));
    registry.register(
        "check_memory",
        Arc::new(check_memory::CheckMemory::new(state.clone())),
    );
    registry.register(
        "check_network",
        Arc::new(check_network::CheckNetwork::new(state.clone())),
    );
    registry.register(
        "check_process",
        Arc::new(check_process::CheckProcess::new(state.clone())),
    );
    registry.register("check_uptime", Arc::new(check_uptime::CheckUptime::new(state)));
    registry
}

fn ensure_collected(state: &State) -> Result<(), CheckError> {
    if state.last_collect_timestamp_seconds == 0 {
        return Err(CheckError::Collect(
            "host data has not been collected yet".to_string(),
        ));
    }
    Ok(())
}

fn unexpected_argument(arg: &Argument) -> CheckError {
    CheckError::Argument(format!("unexpected argument '{}'", arg.key))
}

pub(crate) fn format_number(value: f64) -> String {
    let rounded = (value * 1000.0).round() / 1000.0;
    if rounded == rounded.trunc() && rounded.abs() < 1e15 {
        format!("{}", rounded as i64)
    } else {
        format!("{rounded}")
    }
}

pub(crate) fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

pub(crate) fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
