use super::{
    ensure_collected, human_bytes, parse_args, parse_threshold, unexpected_argument, Aggregator,
    CheckData, CheckError, CheckHandler, CheckMetric, CheckResult, MetricMap,
};
use crate::state::State;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct CheckProcess {
    state: Arc<RwLock<State>>,
}

impl CheckProcess {
    pub fn new(state: Arc<RwLock<State>>) -> Self {
        Self { state }
    }
}

impl CheckHandler for CheckProcess {
    fn check(&self, args: &[String]) -> Result<CheckResult, CheckError> {
        let mut data = CheckData {
            crit_threshold: parse_threshold("state = stopped")?,
            detail_syntax: "%(process)=%(state)".to_string(),
            ok_syntax: "%(status): all %(count) processes are ok.".to_string(),
            empty_syntax: "%(status): check_process failed to find anything with this filter."
                .to_string(),
            ..CheckData::default()
        };

        let mut wanted = Vec::new();
        for arg in parse_args(args, &mut data)? {
            match arg.key.as_str() {
                "process" => wanted.push(arg.value),
                _ => return Err(unexpected_argument(&arg)),
            }
        }

        let state = self.state.blocking_read();
        ensure_collected(&state)?;

        let mut agg = Aggregator::new();
        let mut metrics = Vec::new();
        if wanted.is_empty() {
            for proc in &state.processes {
                agg.add(&data, &running_item(proc));
            }
            metrics.push(CheckMetric::new("count", state.processes.len() as f64).with_min(0.0));
            return Ok(agg.into_result(&data, metrics));
        }

        for name in &wanted {
            let matching: Vec<_> = state
                .processes
                .iter()
                .filter(|p| p.name.eq_ignore_ascii_case(name))
                .collect();
            if matching.is_empty() {
                let mut item = MetricMap::new();
                item.insert("process".to_string(), name.clone());
                item.insert("state".to_string(), "stopped".to_string());
                item.insert("count".to_string(), "0".to_string());
                agg.add(&data, &item);
            }
            for proc in &matching {
                agg.add(&data, &running_item(proc));
            }
            metrics.push(
                CheckMetric::new(name.clone(), matching.len() as f64)
                    .with_thresholds(&data, &["count"])
                    .with_min(0.0),
            );
        }

        Ok(agg.into_result(&data, metrics))
    }
}

fn running_item(proc: &crate::state::ProcessStat) -> MetricMap {
    let mut item = MetricMap::new();
    item.insert("process".to_string(), proc.name.clone());
    item.insert("pid".to_string(), proc.pid.to_string());
    item.insert("state".to_string(), "started".to_string());
    item.insert("status".to_string(), proc.status.clone());
    item.insert("rss".to_string(), proc.memory_bytes.to_string());
    item.insert("rss_human".to_string(), human_bytes(proc.memory_bytes));
    item.insert("cpu".to_string(), format!("{:.1}", proc.cpu_usage_percent));
    item
}
