use super::{
    ensure_collected, format_number, human_bytes, parse_args, parse_threshold, percent,
    unexpected_argument, Aggregator, CheckData, CheckError, CheckHandler, CheckMetric,
    CheckResult, MetricMap,
};
use crate::state::State;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct CheckDriveSize {
    state: Arc<RwLock<State>>,
}

impl CheckDriveSize {
    pub fn new(state: Arc<RwLock<State>>) -> Self {
        Self { state }
    }
}

impl CheckHandler for CheckDriveSize {
    fn check(&self, args: &[String]) -> Result<CheckResult, CheckError> {
        let mut data = CheckData {
            warn_threshold: parse_threshold("used > 80%")?,
            crit_threshold: parse_threshold("used > 90%")?,
            detail_syntax: "%(drive) %(used_human)/%(size_human) used (%(used_pct)%)".to_string(),
            ok_syntax: "%(status): All %(count) drive(s) are ok".to_string(),
            empty_syntax: "%(status): No drives found".to_string(),
            ..CheckData::default()
        };

        let mut drives = Vec::new();
        let mut excludes = Vec::new();
        for arg in parse_args(args, &mut data)? {
            match arg.key.as_str() {
                "drive" => drives.push(arg.value),
                "exclude" => excludes.push(arg.value),
                _ => return Err(unexpected_argument(&arg)),
            }
        }
        let all = drives.is_empty() || drives.iter().any(|d| d == "*" || d == "all");

        let state = self.state.blocking_read();
        ensure_collected(&state)?;

        let mut agg = Aggregator::new();
        let mut metrics = Vec::new();
        for disk in &state.disks {
            if excludes.contains(&disk.mount) {
                continue;
            }
            if !all && !drives.contains(&disk.mount) {
                continue;
            }
            let free = disk.total_bytes.saturating_sub(disk.used_bytes);
            let used_pct = percent(disk.used_bytes, disk.total_bytes);

            let mut item = MetricMap::new();
            item.insert("drive".to_string(), disk.mount.clone());
            item.insert("fstype".to_string(), disk.file_system.clone());
            item.insert("used".to_string(), disk.used_bytes.to_string());
            item.insert("free".to_string(), free.to_string());
            item.insert("size".to_string(), disk.total_bytes.to_string());
            item.insert("used_pct".to_string(), format_number(used_pct));
            item.insert("free_pct".to_string(), format_number(100.0 - used_pct));
            item.insert("used_human".to_string(), human_bytes(disk.used_bytes));
            item.insert("free_human".to_string(), human_bytes(free));
            item.insert("size_human".to_string(), human_bytes(disk.total_bytes));
            agg.add(&data, &item);

            metrics.push(
                CheckMetric::new(format!("{} used", disk.mount), disk.used_bytes as f64)
                    .with_unit("B")
                    .with_thresholds(&data, &["used"])
                    .with_min(0.0)
                    .with_max(disk.total_bytes as f64),
            );
            metrics.push(
                CheckMetric::new(
                    format!("{} used %", disk.mount),
                    (used_pct * 10.0).round() / 10.0,
                )
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
    use crate::state::DiskStat;

    fn disk(mount: &str, used: u64, total: u64) -> DiskStat {
        DiskStat {
            mount: mount.to_string(),
            file_system: "ext4".to_string(),
            used_bytes: used,
            total_bytes: total,
        }
    }

    fn check() -> CheckDriveSize {
        let mut state = State::new(0);
        state.last_collect_timestamp_seconds = 1;
        state.disks = vec![
            disk("/", 50_000_000_000, 100_000_000_000),
            disk("/var", 95_000_000_000, 100_000_000_000),
            disk("/boot", 850_000_000, 1_000_000_000),
        ];
        CheckDriveSize::new(Arc::new(RwLock::new(state)))
    }

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn worst_drive_determines_state() {
        let result = check().check(&[]).expect("check");
        assert_eq!(result.state, CheckState::Critical);
        assert_eq!(
            result.output,
            "CRITICAL: /var 95.0 GB/100.0 GB used (95%), /boot 850.0 MB/1.0 GB used (85%)"
        );
        assert_eq!(result.metrics.len(), 6);
    }

    #[test]
    fn drive_filter_and_exclude() {
        let result = check().check(&args(&["drive=/"])).expect("check");
        assert_eq!(result.state, CheckState::Ok);
        assert_eq!(result.output, "OK: All 1 drive(s) are ok");

        let result = check()
            .check(&args(&["exclude=/var", "exclude=/boot"]))
            .expect("check");
        assert_eq!(result.state, CheckState::Ok);
    }

    #[test]
    fn absolute_byte_threshold() {
        let result = check()
            .check(&args(&["drive=/", "warn=free < 60GB", "crit=none"]))
            .expect("check");
        assert_eq!(result.state, CheckState::Warning);
    }

    #[test]
    fn unmatched_filter_uses_empty_state() {
        let result = check()
            .check(&args(&["drive=/srv", "empty-state=ok"]))
            .expect("check");
        assert_eq!(result.state, CheckState::Ok);
        assert_eq!(result.output, "OK: No drives found");
    }
}
