//! Pass/fail conditions evaluated against the collected metrics when a load test ends.
//!
//! A threshold rule names a metric, a statistic of that metric, a comparison operator and
//! a limit, written as `{metric}:{statistic}{operator}{limit}`:
//!
//! ```text
//! http_req_duration:p(95)<500
//! errors:rate<0.1
//! http_reqs:count>=100
//! ```
//!
//! Supported statistics depend on the kind of metric:
//!  - counters: `count`, `value`
//!  - rates: `rate`, `value` (both the rate), `count` (values added)
//!  - trends: `avg`, `min`, `max`, `med`, `count`, `p(N)` for any `N` from 0 to 100
//!
//! The load test passes only if every rule passes.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::metrics::{Metric, MetricCollector, MetricKind};
use crate::SkeinError;

lazy_static! {
    static ref EXPRESSION: Regex = Regex::new(
        r"^\s*(?P<stat>avg|min|max|med|count|rate|value|p\(\s*(?P<p>\d+(\.\d+)?)\s*\))\s*(?P<op><=|>=|==|<|>)\s*(?P<limit>-?\d+(\.\d+)?)\s*$"
    )
    .expect("threshold expression regex is valid");
}

/// How a statistic is compared to the limit.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
pub enum ThresholdOperator {
    #[strum(serialize = "<")]
    #[serde(rename = "<")]
    Less,
    #[strum(serialize = "<=")]
    #[serde(rename = "<=")]
    LessOrEqual,
    #[strum(serialize = ">")]
    #[serde(rename = ">")]
    Greater,
    #[strum(serialize = ">=")]
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[strum(serialize = "==")]
    #[serde(rename = "==")]
    Equal,
}
impl ThresholdOperator {
    /// Returns `true` if `observed` satisfies the comparison against `limit`.
    pub fn compare(&self, observed: f64, limit: f64) -> bool {
        match self {
            ThresholdOperator::Less => observed < limit,
            ThresholdOperator::LessOrEqual => observed <= limit,
            ThresholdOperator::Greater => observed > limit,
            ThresholdOperator::GreaterOrEqual => observed >= limit,
            ThresholdOperator::Equal => (observed - limit).abs() < f64::EPSILON,
        }
    }
}

/// Which number is extracted from a metric.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    Value,
    Percentile(f64),
}
impl Statistic {
    /// Returns `true` if this statistic can be extracted from a metric of `kind`.
    pub fn applies_to(&self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Counter => matches!(self, Statistic::Count | Statistic::Value),
            MetricKind::Rate => {
                matches!(self, Statistic::Rate | Statistic::Value | Statistic::Count)
            }
            MetricKind::Trend => matches!(
                self,
                Statistic::Avg
                    | Statistic::Min
                    | Statistic::Max
                    | Statistic::Med
                    | Statistic::Count
                    | Statistic::Percentile(_)
            ),
        }
    }

    /// Extract the statistic from a metric: `Ok(None)` if the metric has no data, and an
    /// error if the statistic doesn't apply to this kind of metric.
    pub fn observe(&self, metric: &Metric) -> Result<Option<f64>, String> {
        if !self.applies_to(metric.kind()) {
            return Err(format!(
                "{} does not apply to a {} metric",
                self,
                metric.kind()
            ));
        }
        if metric.is_empty() {
            return Ok(None);
        }
        let observed = match metric {
            Metric::Counter(counter) => counter.value() as f64,
            Metric::Rate(rate) => match self {
                Statistic::Count => rate.total() as f64,
                _ => rate.rate(),
            },
            Metric::Trend(trend) => {
                let summary = trend.summary();
                match self {
                    Statistic::Avg => summary.avg,
                    Statistic::Min => summary.min,
                    Statistic::Max => summary.max,
                    Statistic::Med => summary.med,
                    Statistic::Count => summary.count as f64,
                    Statistic::Percentile(p) => trend.percentile(*p).unwrap_or(0.0),
                    Statistic::Rate | Statistic::Value => unreachable!("checked by applies_to"),
                }
            }
        };
        Ok(Some(observed))
    }
}
impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statistic::Avg => write!(f, "avg"),
            Statistic::Min => write!(f, "min"),
            Statistic::Max => write!(f, "max"),
            Statistic::Med => write!(f, "med"),
            Statistic::Count => write!(f, "count"),
            Statistic::Rate => write!(f, "rate"),
            Statistic::Value => write!(f, "value"),
            Statistic::Percentile(p) => write!(f, "p({})", p),
        }
    }
}

/// One pass/fail condition on a named metric.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    /// The metric this rule applies to.
    pub metric: String,
    /// What is extracted from the metric.
    pub statistic: Statistic,
    /// How the statistic is compared to the limit.
    pub operator: ThresholdOperator,
    /// The limit.
    pub limit: f64,
}
impl ThresholdRule {
    /// Parse an expression such as `p(95)<500` for the named metric.
    ///
    /// # Example
    /// ```rust
    /// use skein::threshold::{Statistic, ThresholdOperator, ThresholdRule};
    ///
    /// let rule = ThresholdRule::parse("errors", "rate<0.1").unwrap();
    /// assert_eq!(rule.statistic, Statistic::Rate);
    /// assert_eq!(rule.operator, ThresholdOperator::Less);
    /// assert_eq!(rule.limit, 0.1);
    /// ```
    pub fn parse(metric: &str, expression: &str) -> Result<ThresholdRule, SkeinError> {
        let invalid = |detail: &str| SkeinError::InvalidThreshold {
            rule: format!("{}:{}", metric, expression),
            detail: detail.to_string(),
        };

        let metric = metric.trim();
        if metric.is_empty() || metric.chars().any(char::is_whitespace) {
            return Err(invalid("metric name must be a single word"));
        }

        let captures = EXPRESSION.captures(expression).ok_or_else(|| {
            invalid("expected {statistic}{operator}{limit}, for example p(95)<500 or rate<0.1")
        })?;
        let statistic = match &captures["stat"] {
            "avg" => Statistic::Avg,
            "min" => Statistic::Min,
            "max" => Statistic::Max,
            "med" => Statistic::Med,
            "count" => Statistic::Count,
            "rate" => Statistic::Rate,
            "value" => Statistic::Value,
            _ => {
                let p = captures
                    .name("p")
                    .and_then(|p| p.as_str().parse::<f64>().ok())
                    .ok_or_else(|| invalid("invalid percentile"))?;
                if !(0.0..=100.0).contains(&p) {
                    return Err(invalid("percentile must be between 0 and 100"));
                }
                Statistic::Percentile(p)
            }
        };
        let operator = ThresholdOperator::from_str(&captures["op"])
            .map_err(|_| invalid("invalid operator"))?;
        let limit = captures["limit"]
            .parse::<f64>()
            .map_err(|_| invalid("invalid limit"))?;

        Ok(ThresholdRule {
            metric: metric.to_string(),
            statistic,
            operator,
            limit,
        })
    }

    /// The expression without the metric name, for example `p(95)<500`.
    pub fn expression(&self) -> String {
        format!("{}{}{}", self.statistic, self.operator, self.limit)
    }
}

/// Parse `{metric}:{expression}`, for example `http_req_duration:p(95)<500`.
impl FromStr for ThresholdRule {
    type Err = SkeinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((metric, expression)) => ThresholdRule::parse(metric, expression),
            None => Err(SkeinError::InvalidThreshold {
                rule: s.to_string(),
                detail: "expected {metric}:{expression}, for example errors:rate<0.1".to_string(),
            }),
        }
    }
}

impl fmt::Display for ThresholdRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.metric, self.expression())
    }
}

/// What happens when a rule's metric has no data.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MissingDataPolicy {
    /// The rule fails.
    #[default]
    Fail,
    /// The rule is indeterminate, and doesn't affect the overall verdict.
    Skip,
}

/// The verdict of a single rule.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ThresholdVerdict {
    Pass,
    Fail,
    Indeterminate,
}

/// The outcome of evaluating one [`ThresholdRule`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThresholdResult {
    /// The rule, formatted as `{metric}:{expression}`.
    pub rule: String,
    pub metric: String,
    pub expression: String,
    /// The observed statistic, `None` if the metric had no data.
    pub observed: Option<f64>,
    pub verdict: ThresholdVerdict,
    /// Why the rule didn't pass.
    pub detail: Option<String>,
}

/// Evaluates a set of [`ThresholdRule`]s.
#[derive(Clone, Debug, Default)]
pub struct ThresholdEvaluator {
    rules: Vec<ThresholdRule>,
    policy: MissingDataPolicy,
}
impl ThresholdEvaluator {
    pub fn new(rules: Vec<ThresholdRule>, policy: MissingDataPolicy) -> ThresholdEvaluator {
        ThresholdEvaluator { rules, policy }
    }

    /// The configured rules.
    pub fn rules(&self) -> &[ThresholdRule] {
        &self.rules
    }

    /// Confirm every rule on a built-in metric uses a statistic that applies to it.
    ///
    /// Rules on other metrics can only be checked once the metric exists.
    pub fn validate(&self) -> Result<(), SkeinError> {
        for rule in &self.rules {
            if let Some(kind) = MetricCollector::builtin_kind(&rule.metric) {
                if !rule.statistic.applies_to(kind) {
                    return Err(SkeinError::InvalidThreshold {
                        rule: rule.to_string(),
                        detail: format!(
                            "{} does not apply to {}, a {} metric",
                            rule.statistic, rule.metric, kind
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    /// Judge every rule against the final state of the collector.
    pub fn evaluate(&self, collector: &MetricCollector) -> Vec<ThresholdResult> {
        self.rules
            .iter()
            .map(|rule| self.evaluate_rule(rule, collector))
            .collect()
    }

    fn evaluate_rule(&self, rule: &ThresholdRule, collector: &MetricCollector) -> ThresholdResult {
        let observed = match collector.get(&rule.metric) {
            Some(metric) => rule.statistic.observe(&metric),
            None => Ok(None),
        };

        let (observed, verdict, detail) = match observed {
            Ok(Some(value)) => {
                if rule.operator.compare(value, rule.limit) {
                    (Some(value), ThresholdVerdict::Pass, None)
                } else {
                    (
                        Some(value),
                        ThresholdVerdict::Fail,
                        Some(format!("observed {}", value)),
                    )
                }
            }
            Ok(None) => {
                let detail = Some(format!("no samples recorded for {}", rule.metric));
                match self.policy {
                    MissingDataPolicy::Fail => (None, ThresholdVerdict::Fail, detail),
                    MissingDataPolicy::Skip => (None, ThresholdVerdict::Indeterminate, detail),
                }
            }
            Err(detail) => (None, ThresholdVerdict::Fail, Some(detail)),
        };

        match verdict {
            ThresholdVerdict::Pass => debug!("threshold {} passed", rule),
            _ => info!(
                "threshold {} {}: {}",
                rule,
                verdict,
                detail.as_deref().unwrap_or_default()
            ),
        }

        ThresholdResult {
            rule: rule.to_string(),
            metric: rule.metric.to_string(),
            expression: rule.expression(),
            observed,
            verdict,
            detail,
        }
    }
}

/// The overall verdict: `true` unless at least one rule failed.
pub fn passed(results: &[ThresholdResult]) -> bool {
    results
        .iter()
        .all(|result| result.verdict != ThresholdVerdict::Fail)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::metrics::{ERRORS, HTTP_REQS, HTTP_REQ_DURATION};

    #[test]
    fn parse_rules() {
        let rule: ThresholdRule = "http_req_duration:p(95)<500".parse().unwrap();
        assert_eq!(rule.metric, HTTP_REQ_DURATION);
        assert_eq!(rule.statistic, Statistic::Percentile(95.0));
        assert_eq!(rule.operator, ThresholdOperator::Less);
        assert_eq!(rule.limit, 500.0);
        assert_eq!(rule.to_string(), "http_req_duration:p(95)<500");

        let rule: ThresholdRule = "errors: rate <= 0.05".parse().unwrap();
        assert_eq!(rule.statistic, Statistic::Rate);
        assert_eq!(rule.operator, ThresholdOperator::LessOrEqual);
        assert_eq!(rule.limit, 0.05);

        let rule: ThresholdRule = "query_latency_ms:p(99.9)>=1".parse().unwrap();
        assert_eq!(rule.statistic, Statistic::Percentile(99.9));
        assert_eq!(rule.operator, ThresholdOperator::GreaterOrEqual);

        assert!("errors".parse::<ThresholdRule>().is_err());
        assert!(":rate<0.1".parse::<ThresholdRule>().is_err());
        assert!("errors:rate".parse::<ThresholdRule>().is_err());
        assert!("errors:rate<".parse::<ThresholdRule>().is_err());
        assert!("errors:rate=0.1".parse::<ThresholdRule>().is_err());
        assert!("errors:p(101)<1".parse::<ThresholdRule>().is_err());
        assert!("errors:stddev<1".parse::<ThresholdRule>().is_err());
    }

    #[test]
    fn operators() {
        assert!(ThresholdOperator::Less.compare(1.0, 2.0));
        assert!(!ThresholdOperator::Less.compare(2.0, 2.0));
        assert!(ThresholdOperator::LessOrEqual.compare(2.0, 2.0));
        assert!(ThresholdOperator::Greater.compare(3.0, 2.0));
        assert!(!ThresholdOperator::GreaterOrEqual.compare(1.0, 2.0));
        assert!(ThresholdOperator::Equal.compare(0.5, 0.5));
    }

    #[test]
    fn validate_builtin_kinds() {
        let evaluator = ThresholdEvaluator::new(
            vec!["errors:p(95)<1".parse().unwrap()],
            MissingDataPolicy::Fail,
        );
        assert!(evaluator.validate().is_err());

        let evaluator = ThresholdEvaluator::new(
            vec![
                "errors:rate<0.1".parse().unwrap(),
                "http_req_duration:p(95)<500".parse().unwrap(),
                "custom:p(95)<1".parse().unwrap(),
            ],
            MissingDataPolicy::Fail,
        );
        assert!(evaluator.validate().is_ok());
    }

    #[test]
    fn missing_data() {
        let collector = MetricCollector::new();
        let rules = vec![
            "http_req_duration:p(95)<500".parse().unwrap(),
            "unknown:count>0".parse().unwrap(),
        ];

        let results = ThresholdEvaluator::new(rules.clone(), MissingDataPolicy::Fail)
            .evaluate(&collector);
        assert!(results
            .iter()
            .all(|r| r.verdict == ThresholdVerdict::Fail && r.observed.is_none()));
        assert!(!passed(&results));

        let results = ThresholdEvaluator::new(rules, MissingDataPolicy::Skip).evaluate(&collector);
        assert!(results
            .iter()
            .all(|r| r.verdict == ThresholdVerdict::Indeterminate));
        assert!(passed(&results));
    }

    #[test]
    fn evaluate() {
        let collector = MetricCollector::new();
        collector.counter(HTTP_REQS).unwrap().add(10);
        let errors = collector.rate(ERRORS).unwrap();
        for i in 0..10 {
            errors.add(i % 5 == 0);
        }
        let latency = collector.trend(HTTP_REQ_DURATION).unwrap();
        for value in [10.0, 20.0, 30.0, 40.0, 50.0] {
            latency.add(value);
        }

        let evaluator = ThresholdEvaluator::new(
            vec![
                "http_reqs:count>=10".parse().unwrap(),
                "errors:rate<0.1".parse().unwrap(),
                "http_req_duration:p(95)<50".parse().unwrap(),
                "http_req_duration:avg==30".parse().unwrap(),
            ],
            MissingDataPolicy::Fail,
        );
        let results = evaluator.evaluate(&collector);
        let verdicts: Vec<ThresholdVerdict> = results.iter().map(|r| r.verdict).collect();
        assert_eq!(
            verdicts,
            vec![
                ThresholdVerdict::Pass,
                ThresholdVerdict::Fail,
                ThresholdVerdict::Pass,
                ThresholdVerdict::Pass,
            ]
        );
        assert_eq!(results[1].observed, Some(0.2));
        assert!(!passed(&results));
    }

    #[test]
    fn inapplicable_statistic_on_custom_metric_fails() {
        let collector = MetricCollector::new();
        collector.counter("custom").unwrap().add(1);
        let results = ThresholdEvaluator::new(
            vec!["custom:p(95)<1".parse().unwrap()],
            MissingDataPolicy::Skip,
        )
        .evaluate(&collector);
        assert_eq!(results[0].verdict, ThresholdVerdict::Fail);
    }
}
