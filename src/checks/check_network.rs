use super::{
    ensure_collected, human_bytes, parse_args, parse_threshold, unexpected_argument, Aggregator,
    CheckData, CheckError, CheckHandler, CheckMetric, CheckResult, MetricMap,
};
use crate::state::State;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct CheckNetwork {
    state: Arc<RwLock<State>>,
}

impl CheckNetwork {
    pub fn new(state: Arc<RwLock<State>>) -> Self {
        Self { state }
    }
}

impl CheckHandler for CheckNetwork {
    fn check(&self, args: &[String]) -> Result<CheckResult, CheckError> {
        let mut data = CheckData {
            warn_threshold: parse_threshold("total > 80MB")?,
            crit_threshold: parse_threshold("total > 100MB")?,
            detail_syntax: "%(name) >%(sent_human)/s <%(received_human)/s".to_string(),
            ok_syntax: "%(status): %(list)".to_string(),
            empty_syntax: "%(status): No network interfaces found".to_string(),
            ..CheckData::default()
        };

        let mut devices = Vec::new();
        let mut excludes = Vec::new();
        for arg in parse_args(args, &mut data)? {
            match arg.key.as_str() {
                "device" => devices.push(arg.value),
                "exclude" => excludes.push(arg.value),
                _ => return Err(unexpected_argument(&arg)),
            }
        }

        let state = self.state.blocking_read();
        ensure_collected(&state)?;

        let mut agg = Aggregator::new();
        let mut metrics = Vec::new();
        for iface in &state.net {
            if excludes.contains(&iface.iface)
                || (!devices.is_empty() && !devices.contains(&iface.iface))
            {
                continue;
            }
            let total = iface.rx_bytes_per_sec.saturating_add(iface.tx_bytes_per_sec);

            let mut item = MetricMap::new();
            item.insert("name".to_string(), iface.iface.clone());
            item.insert("received".to_string(), iface.rx_bytes_per_sec.to_string());
            item.insert("sent".to_string(), iface.tx_bytes_per_sec.to_string());
            item.insert("total".to_string(), total.to_string());
            item.insert("received_total".to_string(), iface.rx_bytes_total.to_string());
            item.insert("sent_total".to_string(), iface.tx_bytes_total.to_string());
            item.insert(
                "received_human".to_string(),
                human_bytes(iface.rx_bytes_per_sec),
            );
            item.insert("sent_human".to_string(), human_bytes(iface.tx_bytes_per_sec));
            agg.add(&data, &item);

            metrics.push(
                CheckMetric::new(
                    format!("{}_traffic_in", iface.iface),
                    iface.rx_bytes_per_sec as f64,
                )
                .with_unit("B")
                .with_thresholds(&data, &["received"])
                .with_min(0.0),
            );
            metrics.push(
                CheckMetric::new(
                    format!("{}_traffic_out", iface.iface),
                    iface.tx_bytes_per_sec as f64,
                )
                .with_unit("B")
                .with_thresholds(&data, &["sent"])
                .with_min(0.0),
            );
            metrics.push(
                CheckMetric::new(format!("{}_traffic_total", iface.iface), total as f64)
                    .with_unit("B")
                    .with_thresholds(&data, &["total"])
                    .with_min(0.0),
            );
        }

        Ok(agg.into_result(&data, metrics))
    }
}
