use super::{
    ensure_collected, parse_args, parse_threshold, unexpected_argument, Aggregator, CheckData,
    CheckError, CheckHandler, CheckMetric, CheckResult, MetricMap,
};
use crate::state::State;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub struct CheckUptime {
    state: Arc<RwLock<State>>,
}

impl CheckUptime {
    pub fn new(state: Arc<RwLock<State>>) -> Self {
        Self { state }
    }
}

impl CheckHandler for CheckUptime {
    fn check(&self, args: &[String]) -> Result<CheckResult, CheckError> {
        let mut data = CheckData {
            warn_threshold: parse_threshold("uptime < 180s")?,
            crit_threshold: parse_threshold("uptime < 60s")?,
            detail_syntax: "uptime: %(uptime_human), boot: %(boot)".to_string(),
            top_syntax: "%(status): %(list)".to_string(),
            ok_syntax: "%(status): %(list)".to_string(),
            ..CheckData::default()
        };
        if let Some(arg) = parse_args(args, &mut data)?.first() {
            return Err(unexpected_argument(arg));
        }

        let state = self.state.blocking_read();
        ensure_collected(&state)?;

        let uptime = state.system_uptime_seconds;
        let mut item = MetricMap::new();
        item.insert("uptime".to_string(), uptime.to_string());
        item.insert(
            "uptime_human".to_string(),
            humantime::format_duration(Duration::from_secs(uptime)).to_string(),
        );
        item.insert(
            "boot".to_string(),
            humantime::format_rfc3339_seconds(
                std::time::UNIX_EPOCH + Duration::from_secs(state.boot_time_unix),
            )
            .to_string(),
        );

        let mut agg = Aggregator::new();
        agg.add(&data, &item);
        let metric = CheckMetric::new("uptime", uptime as f64)
            .with_unit("s")
            .with_thresholds(&data, &["uptime"]);
        Ok(agg.into_result(&data, vec![metric]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::CheckState;

    fn check(uptime: u64) -> CheckUptime {
        let mut state = State::new(0);
        state.last_collect_timestamp_seconds = 1;
        state.system_uptime_seconds = uptime;
        state.boot_time_unix = 1_700_000_000;
        CheckUptime::new(Arc::new(RwLock::new(state)))
    }

    #[test]
    fn long_uptime_is_ok() {
        let result = check(90_061).check(&[]).expect("check");
        assert_eq!(result.state, CheckState::Ok);
        assert_eq!(
            result.output,
            "OK: uptime: 1day 1h 1m 1s, boot: 2023-11-14T22:13:20Z"
        );
        assert_eq!(result.perf_data(), "'uptime'=90061s;180;60;;");
    }

    #[test]
    fn fresh_boot_is_critical() {
        let result = check(30).check(&[]).expect("check");
        assert_eq!(result.state, CheckState::Critical);
    }

    #[test]
    fn thresholds_accept_time_units() {
        let result = check(3_000)
            .check(&["warn=uptime < 1h".to_string()])
            .expect("check");
        assert_eq!(result.state, CheckState::Warning);
    }
}
