use super::{
    ensure_collected, format_number, human_bytes, parse_args, parse_threshold, percent,
    unexpected_argument, Aggregator, CheckData, CheckError, CheckHandler, CheckMetric,
    CheckResult, MetricMap,
};
use crate::state::State;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct CheckMemory {
    state: Arc<RwLock<State>>,
}

impl CheckMemory {
    pub fn new(state: Arc<RwLock<State>>) -> Self {
        Self { state }
    }
}

impl CheckHandler for CheckMemory {
    fn check(&self, args: &[String]) -> Result<CheckResult, CheckError> {
        let mut data = CheckData {
            warn_threshold: parse_threshold("used > 80%")?,
            crit_threshold: parse_threshold("used > 90%")?,
            detail_syntax: "%(type) = %(used_human)/%(size_human) (%(used_pct)%)".to_string(),
            ok_syntax: "%(status): %(list)".to_string(),
            ..CheckData::default()
        };

        let mut types = Vec::new();
        for arg in parse_args(args, &mut data)? {
            match arg.key.as_str() {
                "type" => match arg.value.as_str() {
                    "physical" | "committed" => types.push(arg.value),
                    other => {
                        return Err(CheckError::Argument(format!(
                            "unknown memory type '{other}'"
                        )))
                    }
                },
                _ => return Err(unexpected_argument(&arg)),
            }
        }
        if types.is_empty() {
            types = vec!["physical".to_string(), "committed".to_string()];
        }

        let state = self.state.blocking_read();
        ensure_collected(&state)?;

        let mut agg = Aggregator::new();
        let mut metrics = Vec::new();
        for kind in &types {
            let (used, total) = if kind == "physical" {
                (state.memory_used_bytes, state.memory_total_bytes)
            } else {
                (
                    state.memory_used_bytes + state.swap_used_bytes,
                    state.memory_total_bytes + state.swap_total_bytes,
                )
            };
            if total == 0 {
                continue;
            }
            let free = total.saturating_sub(used);
            let used_pct = percent(used, total);

            let mut item = MetricMap::new();
            item.insert("type".to_string(), kind.clone());
            item.insert("used".to_string(), used.to_string());
            item.insert("free".to_string(), free.to_string());
            item.insert("size".to_string(), total.to_string());
            item.insert("used_pct".to_string(), format_number(used_pct));
            item.insert("free_pct".to_string(), format_number(100.0 - used_pct));
            item.insert("used_human".to_string(), human_bytes(used));
            item.insert("free_human".to_string(), human_bytes(free));
            item.insert("size_human".to_string(), human_bytes(total));
            agg.add(&data, &item);

            metrics.push(
                CheckMetric::new(kind.clone(), used as f64)
                    .with_unit("B")
                    .with_thresholds(&data, &["used"])
                    .with_min(0.0)
                    .with_max(total as f64),
            );
            metrics.push(
                CheckMetric::new(format!("{kind} %"), (used_pct * 10.0).round() / 10.0)
                    .with_unit("%")
                    .with_thresholds(&data, &["used_pct"])
                    .with_min(0.0)
                    .with_max(100.0),
            );
        }

        Ok(agg.into_result(&data, metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::CheckState;

    fn state_with(used: u64, total: u64) -> Arc<RwLock<State>> {
        let mut state = State::new(0);
        state.last_collect_timestamp_seconds = 1;
        state.memory_used_bytes = used;
        state.memory_total_bytes = total;
        Arc::new(RwLock::new(state))
    }

    #[test]
    fn physical_memory_usage() {
        let check = CheckMemory::new(state_with(4_000_000_000, 8_000_000_000));
        let result = check.check(&[]).expect("check");
        assert_eq!(result.state, CheckState::Ok);
        assert!(result
            .output
            .starts_with("OK: physical = 4.0 GB/8.0 GB (50%), committed = "));
        assert_eq!(
            result.metrics[0].perf_string(),
            "'physical'=4000000000B;;;0;8000000000"
        );
        assert_eq!(result.metrics[1].perf_string(), "'physical %'=50%;80;90;0;100");
    }

    #[test]
    fn byte_thresholds_apply_to_used() {
        let check = CheckMemory::new(state_with(7_500_000_000, 8_000_000_000));
        let result = check
            .check(&["type=physical".to_string(), "warn=used > 7GB".to_string()])
            .expect("check");
        assert_eq!(result.state, CheckState::Critical);
        assert_eq!(result.metrics[0].warning, Some(7e9));
    }

    #[test]
    fn not_collected_yet_is_an_error() {
        let check = CheckMemory::new(Arc::new(RwLock::new(State::new(0))));
        assert!(check.check(&[]).is_err());
    }
}
