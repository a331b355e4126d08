use super::{
    format_number, parse_args, parse_threshold, unexpected_argument, Aggregator, CheckData,
    CheckError, CheckHandler, CheckMetric, CheckResult, MetricMap,
};
use crate::state::CpuLoadHistory;
use std::sync::Arc;

const DEFAULT_WINDOWS: [&str; 3] = ["5m", "1m", "5s"];

pub struct CheckCpu {
    history: Arc<CpuLoadHistory>,
}

impl CheckCpu {
    pub fn new(history: Arc<CpuLoadHistory>) -> Self {
        Self { history }
    }
}

impl CheckHandler for CheckCpu {
    fn check(&self, args: &[String]) -> Result<CheckResult, CheckError> {
        let mut data = CheckData {
            warn_threshold: parse_threshold("load > 80")?,
            crit_threshold: parse_threshold("load > 90")?,
            detail_syntax: "%(time): %(load_rounded)%".to_string(),
            ok_syntax: "%(status): CPU load is ok.".to_string(),
            empty_syntax: "%(status): no cpu samples collected yet".to_string(),
            ..CheckData::default()
        };

        let mut windows = Vec::new();
        for arg in parse_args(args, &mut data)? {
            match arg.key.as_str() {
                "time" => windows.push(arg.value),
                _ => return Err(unexpected_argument(&arg)),
            }
        }
        if windows.is_empty() {
            windows = DEFAULT_WINDOWS.iter().map(|w| w.to_string()).collect();
        }

        let mut agg = Aggregator::new();
        let mut metrics = Vec::new();
        for window in &windows {
            let duration = humantime::parse_duration(window)
                .map_err(|err| CheckError::Argument(format!("time={window}: {err}")))?;
            let Some(load) = self.history.average(duration) else {
                continue;
            };
            let rounded = load.round();

            let mut item = MetricMap::new();
            item.insert("time".to_string(), window.clone());
            item.insert("core".to_string(), "total".to_string());
            item.insert("load".to_string(), format_number(load));
            item.insert("load_pct".to_string(), format_number(load));
            item.insert("load_rounded".to_string(), format_number(rounded));
            agg.add(&data, &item);

            metrics.push(
                CheckMetric::new(format!("total {window}"), rounded)
                    .with_unit("%")
                    .with_thresholds(&data, &["load", "load_pct"])
                    .with_min(0.0)
                    .with_max(100.0),
            );
        }

        Ok(agg.into_result(&data, metrics))
    }
}
