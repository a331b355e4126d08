use super::{CheckError, MetricMap};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

static THRESHOLD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*([A-Za-z0-9_.\-]+?)\s*(<=|>=|!=|==|<|>|=|\s+not\s+like\b|\s+not\b|\s+is\b|\s+like\b)\s*(.*?)\s*$",
    )
    .expect("threshold pattern")
});

static VALUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(-?(?:\d+(?:\.\d+)?|\.\d+))\s*([A-Za-z%]+)?$").expect("value pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Lower,
    LowerEqual,
    Greater,
    GreaterEqual,
    Equal,
    Unequal,
    Like,
    NotLike,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lower => "<",
            Self::LowerEqual => "<=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::Equal => "=",
            Self::Unequal => "!=",
            Self::Like => "like",
            Self::NotLike => "not like",
        }
    }
}

impl FromStr for Operator {
    type Err = CheckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_ascii_lowercase().as_str() {
            "<" => Ok(Self::Lower),
            "<=" => Ok(Self::LowerEqual),
            ">" => Ok(Self::Greater),
            ">=" => Ok(Self::GreaterEqual),
            "=" | "==" | "is" => Ok(Self::Equal),
            "!=" | "not" => Ok(Self::Unequal),
            "like" => Ok(Self::Like),
            "not like" => Ok(Self::NotLike),
            _ => Err(CheckError::Threshold {
                raw: s.to_string(),
                reason: "unknown operator".to_string(),
            }),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `<name> <operator> <value>[<unit>]` predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub name: String,
    pub operator: Operator,
    pub value: String,
    pub unit: String,
}

impl Threshold {
    pub fn none() -> Self {
        Self {
            name: String::new(),
            operator: Operator::Equal,
            value: "none".to_string(),
            unit: String::new(),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.name.is_empty() || self.value.eq_ignore_ascii_case("none")
    }

    pub fn numeric_value(&self) -> Option<f64> {
        let value: f64 = self.value.parse().ok()?;
        Some(value * unit_multiplier(&self.unit).unwrap_or(1.0))
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_disabled() {
            return f.write_str("none");
        }
        let name = if self.unit == "%" {
            self.name.strip_suffix("_pct").unwrap_or(&self.name)
        } else {
            &self.name
        };
        write!(f, "{} {} {}{}", name, self.operator, self.value, self.unit)
    }
}

fn unit_multiplier(unit: &str) -> Option<f64> {
    match unit {
        "s" => return Some(1.0),
        "m" => return Some(60.0),
        "h" => return Some(3_600.0),
        "d" => return Some(86_400.0),
        "w" => return Some(604_800.0),
        _ => {}
    }
    match unit.to_ascii_uppercase().as_str() {
        "B" => Some(1.0),
        "KB" => Some(1e3),
        "MB" => Some(1e6),
        "GB" => Some(1e9),
        "TB" => Some(1e12),
        "PB" => Some(1e15),
        _ => None,
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['\'', '"'] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

pub fn parse_threshold(raw: &str) -> Result<Threshold, CheckError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
        return Ok(Threshold::none());
    }

    let invalid = |reason: &str| CheckError::Threshold {
        raw: raw.to_string(),
        reason: reason.to_string(),
    };

    let caps = THRESHOLD_RE
        .captures(trimmed)
        .ok_or_else(|| invalid("expected <name> <operator> <value>"))?;
    let mut name = caps[1].to_string();
    let operator: Operator = caps[2].parse()?;
    let raw_value = caps[3].trim();
    if raw_value.is_empty() {
        return Err(invalid("missing value"));
    }

    let ordering = matches!(
        operator,
        Operator::Lower | Operator::LowerEqual | Operator::Greater | Operator::GreaterEqual
    );
    let numeric = VALUE_RE.captures(raw_value).map(|v| {
        (
            v[1].to_string(),
            v.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
        )
    });
    let known_unit = |unit: &str| unit.is_empty() || unit == "%" || unit_multiplier(unit).is_some();
    let (value, unit) = match numeric {
        Some((value, unit)) if known_unit(&unit) => (value, unit),
        Some((_, unit)) if ordering => return Err(invalid(&format!("unknown unit '{unit}'"))),
        _ if ordering => return Err(invalid("value is not numeric")),
        _ => (unquote(raw_value).to_string(), String::new()),
    };
    if unit == "%" {
        name.push_str("_pct");
    }

    Ok(Threshold {
        name,
        operator,
        value,
        unit,
    })
}

pub fn compare_metrics(metrics: &MetricMap, threshold: &Threshold) -> bool {
    if threshold.is_disabled() {
        return false;
    }
    let Some(actual) = metrics.get(&threshold.name) else {
        return false;
    };
    let actual_num = actual.trim().parse::<f64>().ok();

    match threshold.operator {
        Operator::Like => actual.contains(threshold.value.as_str()),
        Operator::NotLike => !actual.contains(threshold.value.as_str()),
        Operator::Equal | Operator::Unequal => {
            let equal = match (actual_num, threshold.numeric_value()) {
                (Some(a), Some(t)) => a == t,
                _ => actual == &threshold.value,
            };
            equal == (threshold.operator == Operator::Equal)
        }
        op => {
            let (Some(a), Some(t)) = (actual_num, threshold.numeric_value()) else {
                return false;
            };
            match op {
                Operator::Lower => a < t,
                Operator::LowerEqual => a <= t,
                Operator::Greater => a > t,
                Operator::GreaterEqual => a >= t,
                _ => false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(pairs: &[(&str, &str)]) -> MetricMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn percent_unit_renames_metric() {
        let t = parse_threshold("load > 95%").expect("parse");
        assert_eq!(t.name, "load_pct");
        assert_eq!(t.operator, Operator::Greater);
        assert_eq!(t.value, "95");
        assert_eq!(t.unit, "%");
        assert!(compare_metrics(&metrics(&[("load_pct", "96")]), &t));
        assert!(!compare_metrics(&metrics(&[("load_pct", "94")]), &t));
        assert!(!compare_metrics(&metrics(&[("load", "96")]), &t));
    }

    #[test]
    fn byte_units_scale_to_bytes() {
        let t = parse_threshold("used > 90GB").expect("parse");
        assert_eq!(t.unit, "GB");
        assert!(compare_metrics(&metrics(&[("used", "90000000001")]), &t));
        assert!(!compare_metrics(&metrics(&[("used", "89999999999")]), &t));
    }

    #[test]
    fn none_never_matches() {
        let disabled = parse_threshold("none").expect("parse");
        assert!(disabled.is_disabled());
        assert!(!compare_metrics(&metrics(&[("", "none")]), &disabled));

        let t = parse_threshold("state = none").expect("parse");
        assert!(t.is_disabled());
        assert!(!compare_metrics(&metrics(&[("state", "none")]), &t));
    }

    #[test]
    fn missing_metric_never_matches() {
        let t = parse_threshold("load >= 1").expect("parse");
        assert!(!compare_metrics(&metrics(&[("other", "5")]), &t));
    }

    #[test]
    fn word_operators_and_strings() {
        let t = parse_threshold("state not like run").expect("parse");
        assert_eq!(t.operator, Operator::NotLike);
        assert!(compare_metrics(&metrics(&[("state", "stopped")]), &t));
        assert!(!compare_metrics(&metrics(&[("state", "running")]), &t));

        let t = parse_threshold("state is 'stopped'").expect("parse");
        assert_eq!(t.operator, Operator::Equal);
        assert_eq!(t.value, "stopped");
        assert!(compare_metrics(&metrics(&[("state", "stopped")]), &t));

        let t = parse_threshold("state != started").expect("parse");
        assert!(compare_metrics(&metrics(&[("state", "stopped")]), &t));

        let t = parse_threshold("state not started").expect("parse");
        assert_eq!(t.operator, Operator::Unequal);
    }

    #[test]
    fn numeric_equality_ignores_formatting() {
        let t = parse_threshold("count = 2").expect("parse");
        assert!(compare_metrics(&metrics(&[("count", "2.0")]), &t));
    }

    #[test]
    fn time_units_scale_to_seconds() {
        let t = parse_threshold("uptime < 2h").expect("parse");
        assert_eq!(t.numeric_value(), Some(7200.0));
        assert!(compare_metrics(&metrics(&[("uptime", "600")]), &t));
    }

    #[test]
    fn ordering_against_text_is_false() {
        let t = parse_threshold("load > 5").expect("parse");
        assert!(!compare_metrics(&metrics(&[("load", "high")]), &t));
    }

    #[test]
    fn malformed_thresholds_are_errors() {
        assert!(parse_threshold("load").is_err());
        assert!(parse_threshold("load >").is_err());
        assert!(parse_threshold("> 5").is_err());
    }

    #[test]
    fn unknown_units_are_rejected() {
        assert!(parse_threshold("used > 10GiB").is_err());
        assert!(parse_threshold("used > 500M").is_err());
        assert!(parse_threshold("uptime < 3 fortnights").is_err());
    }

    #[test]
    fn ordering_needs_a_number() {
        assert!(parse_threshold("load > high").is_err());
        assert!(parse_threshold("load <= 'x'").is_err());

        let t = parse_threshold("load > .5").expect("parse");
        assert_eq!(t.numeric_value(), Some(0.5));
        assert!(compare_metrics(&metrics(&[("load", "0.75")]), &t));
    }

    #[test]
    fn equality_keeps_unit_like_text() {
        let t = parse_threshold("process = 7zip").expect("parse");
        assert_eq!(t.value, "7zip");
        assert!(t.unit.is_empty());
        assert!(compare_metrics(&metrics(&[("process", "7zip")]), &t));
    }

    #[test]
    fn word_operators_need_separating_space() {
        let t = parse_threshold("mount.is = x").expect("parse");
        assert_eq!(t.name, "mount.is");
        assert_eq!(t.operator, Operator::Equal);
        assert_eq!(t.value, "x");

        let t = parse_threshold("dev-not != sda").expect("parse");
        assert_eq!(t.name, "dev-not");
        assert_eq!(t.operator, Operator::Unequal);
        assert_eq!(t.value, "sda");
    }

    #[test]
    fn display_restores_percent_form() {
        let t = parse_threshold("used >= 80%").expect("parse");
        assert_eq!(t.to_string(), "used >= 80%");
    }
}
