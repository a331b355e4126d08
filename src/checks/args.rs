use super::threshold::{compare_metrics, parse_threshold, Threshold};
use super::{CheckError, CheckMetric, CheckResult, CheckState, MetricMap};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static SYNTAX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\(([^)]*)\)|\$\{([^}]*)\}|%\(([^)]*)\)|%\{([^}]*)\}").expect("syntax pattern")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct CheckData {
    pub warn_threshold: Threshold,
    pub crit_threshold: Threshold,
    pub detail_syntax: String,
    pub top_syntax: String,
    pub ok_syntax: String,
    pub empty_syntax: String,
    pub empty_state: CheckState,
}

impl Default for CheckData {
    fn default() -> Self {
        Self {
            warn_threshold: Threshold::none(),
            crit_threshold: Threshold::none(),
            detail_syntax: String::new(),
            top_syntax: "%(status): %(problem_list)".to_string(),
            ok_syntax: "%(status): All %(count) item(s) are ok.".to_string(),
            empty_syntax: "%(status): No items found.".to_string(),
            empty_state: CheckState::Unknown,
        }
    }
}

impl CheckData {
    pub fn classify(&self, item: &MetricMap) -> CheckState {
        if compare_metrics(item, &self.crit_threshold) {
            CheckState::Critical
        } else if compare_metrics(item, &self.warn_threshold) {
            CheckState::Warning
        } else {
            CheckState::Ok
        }
    }
}

pub fn parse_args(args: &[String], data: &mut CheckData) -> Result<Vec<Argument>, CheckError> {
    let mut out = Vec::with_capacity(args.len());
    for raw in args {
        let (key, value) = match raw.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (raw.trim(), ""),
        };
        match key {
            "" => continue,
            "warn" | "warning" => data.warn_threshold = parse_threshold(value)?,
            "crit" | "critical" => data.crit_threshold = parse_threshold(value)?,
            "detail-syntax" => data.detail_syntax = value.to_string(),
            "top-syntax" => data.top_syntax = value.to_string(),
            "ok-syntax" => data.ok_syntax = value.to_string(),
            "empty-syntax" => data.empty_syntax = value.to_string(),
            "empty-state" => data.empty_state = value.parse()?,
            _ => out.push(Argument {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }
    Ok(out)
}

/// Substitutes `$(name)`, `${name}`, `%(name)` and `%{name}` markers.
/// Unknown names render as the empty string.
pub fn parse_syntax(template: &str, data: &MetricMap) -> String {
    SYNTAX_RE
        .replace_all(template, |caps: &Captures| {
            let name = (1..=4)
                .find_map(|i| caps.get(i))
                .map(|m| m.as_str().trim())
                .unwrap_or_default();
            data.get(name).cloned().unwrap_or_default()
        })
        .into_owned()
}

#[derive(Debug, Default)]
pub struct Aggregator {
    ok: Vec<String>,
    warn: Vec<String>,
    crit: Vec<String>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, data: &CheckData, item: &MetricMap) -> CheckState {
        let state = data.classify(item);
        let line = parse_syntax(&data.detail_syntax, item);
        match state {
            CheckState::Critical => self.crit.push(line),
            CheckState::Warning => self.warn.push(line),
            _ => self.ok.push(line),
        }
        state
    }

    pub fn count(&self) -> usize {
        self.ok.len() + self.warn.len() + self.crit.len()
    }

    pub fn state(&self) -> CheckState {
        if !self.crit.is_empty() {
            CheckState::Critical
        } else if !self.warn.is_empty() {
            CheckState::Warning
        } else {
            CheckState::Ok
        }
    }

    pub fn finish(self, data: &CheckData) -> (CheckState, String) {
        self.finish_with(data, &MetricMap::new())
    }

    pub fn finish_with(self, data: &CheckData, extra: &MetricMap) -> (CheckState, String) {
        let mut fields = extra.clone();
        if self.count() == 0 {
            fields.insert("status".to_string(), data.empty_state.to_string());
            fields.insert("count".to_string(), "0".to_string());
            return (data.empty_state, parse_syntax(&data.empty_syntax, &fields));
        }

        let state = self.state();
        let problems: Vec<&str> = self
            .crit
            .iter()
            .chain(self.warn.iter())
            .map(String::as_str)
            .collect();
        let all: Vec<&str> = self
            .crit
            .iter()
            .chain(self.warn.iter())
            .chain(self.ok.iter())
            .map(String::as_str)
            .collect();

        fields.insert("status".to_string(), state.to_string());
        fields.insert("count".to_string(), self.count().to_string());
        fields.insert("ok_list".to_string(), self.ok.join(", "));
        fields.insert("warn_list".to_string(), self.warn.join(", "));
        fields.insert("crit_list".to_string(), self.crit.join(", "));
        fields.insert("problem_list".to_string(), problems.join(", "));
        fields.insert("list".to_string(), all.join(", "));

        let template = if state == CheckState::Ok {
            &data.ok_syntax
        } else {
            &data.top_syntax
        };
        (state, parse_syntax(template, &fields))
    }

    pub fn into_result(self, data: &CheckData, metrics: Vec<CheckMetric>) -> CheckResult {
        let (state, output) = self.finish(data);
        CheckResult::new(state, output).with_metrics(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn item(pairs: &[(&str, &str)]) -> MetricMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn control_keys_are_consumed() {
        let mut data = CheckData::default();
        let args = strings(&[
            "warn=used > 80%",
            "critical=used > 90%",
            "drive=c:",
            "detail-syntax=%(drive) is %(used)",
            "top-syntax=top",
            "ok-syntax=fine",
            "drive=d:",
            "query=a=b",
        ]);
        let rest = parse_args(&args, &mut data).expect("parse");
        assert_eq!(data.warn_threshold.name, "used_pct");
        assert_eq!(data.crit_threshold.value, "90");
        assert_eq!(data.detail_syntax, "%(drive) is %(used)");
        assert_eq!(data.top_syntax, "top");
        assert_eq!(data.ok_syntax, "fine");
        assert_eq!(
            rest,
            vec![
                Argument {
                    key: "drive".to_string(),
                    value: "c:".to_string()
                },
                Argument {
                    key: "drive".to_string(),
                    value: "d:".to_string()
                },
                Argument {
                    key: "query".to_string(),
                    value: "a=b".to_string()
                },
            ]
        );
    }

    #[test]
    fn bad_threshold_is_an_error() {
        let mut data = CheckData::default();
        assert!(parse_args(&strings(&["warn=load"]), &mut data).is_err());
        assert!(parse_args(&strings(&["empty-state=maybe"]), &mut data).is_err());
    }

    #[test]
    fn empty_state_accepts_names_and_codes() {
        let mut data = CheckData::default();
        parse_args(&strings(&["empty-state=0"]), &mut data).expect("parse");
        assert_eq!(data.empty_state, CheckState::Ok);
        parse_args(&strings(&["empty-state=critical"]), &mut data).expect("parse");
        assert_eq!(data.empty_state, CheckState::Critical);
    }

    #[test]
    fn syntax_supports_all_marker_styles() {
        let data = item(&[("name", "cpu"), ("value", "5")]);
        assert_eq!(
            parse_syntax("$(name)=${value} %(name)/%{value}", &data),
            "cpu=5 cpu/5"
        );
        assert_eq!(parse_syntax("%(name) %(name) %(name)", &data), "cpu cpu cpu");
        assert_eq!(parse_syntax("[%(missing)]", &data), "[]");
        assert_eq!(parse_syntax("%(Name)", &data), "");
    }

    #[test]
    fn critical_wins_over_warning() {
        let data = CheckData {
            warn_threshold: parse_threshold("load > 10").expect("warn"),
            crit_threshold: parse_threshold("load > 20").expect("crit"),
            detail_syntax: "%(name)".to_string(),
            ..CheckData::default()
        };
        let mut agg = Aggregator::new();
        assert_eq!(
            agg.add(&data, &item(&[("name", "a"), ("load", "50")])),
            CheckState::Critical
        );
        let (state, output) = agg.finish(&data);
        assert_eq!(state, CheckState::Critical);
        assert_eq!(output, "CRITICAL: a");
    }

    #[test]
    fn aggregate_fields_are_rendered() {
        let data = CheckData {
            warn_threshold: parse_threshold("load > 10").expect("warn"),
            crit_threshold: parse_threshold("load > 20").expect("crit"),
            detail_syntax: "%(name)".to_string(),
            top_syntax: "%(status) %(count) [%(crit_list)] [%(warn_list)] [%(ok_list)] [%(list)]"
                .to_string(),
            ..CheckData::default()
        };
        let mut agg = Aggregator::new();
        agg.add(&data, &item(&[("name", "a"), ("load", "1")]));
        agg.add(&data, &item(&[("name", "b"), ("load", "15")]));
        agg.add(&data, &item(&[("name", "c"), ("load", "25")]));
        let (state, output) = agg.finish(&data);
        assert_eq!(state, CheckState::Critical);
        assert_eq!(output, "CRITICAL 3 [c] [b] [a] [c, b, a]");
    }

    #[test]
    fn ok_syntax_used_when_nothing_matches() {
        let data = CheckData {
            warn_threshold: parse_threshold("load > 10").expect("warn"),
            detail_syntax: "%(name)".to_string(),
            ..CheckData::default()
        };
        let mut agg = Aggregator::new();
        agg.add(&data, &item(&[("name", "a"), ("load", "1")]));
        let (state, output) = agg.finish(&data);
        assert_eq!(state, CheckState::Ok);
        assert_eq!(output, "OK: All 1 item(s) are ok.");
    }

    #[test]
    fn empty_set_uses_empty_state() {
        let data = CheckData::default();
        let (state, output) = Aggregator::new().finish(&data);
        assert_eq!(state, CheckState::Unknown);
        assert_eq!(output, "UNKNOWN: No items found.");

        let data = CheckData {
            empty_state: CheckState::Ok,
            empty_syntax: "nothing to see".to_string(),
            ..CheckData::default()
        };
        let (state, output) = Aggregator::new().finish(&data);
        assert_eq!(state, CheckState::Ok);
        assert_eq!(output, "nothing to see");
    }
}
