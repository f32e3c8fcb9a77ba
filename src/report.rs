//! The run report produced at the end of a load test.
//!
//! A [`RunReport`] is returned by
//! [`SkeinAttack::execute`](../struct.SkeinAttack.html#method.execute). Unless disabled
//! with `--no-print-metrics` it is displayed as text tables, and with `--report-file` it
//! is also written as a JSON document.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::metrics::{
    self, MetricCollector, MetricSnapshot, MetricsSnapshot, TrendSummary, ERRORS,
    HTTP_REQ_DURATION, HTTP_REQS, QUERY_LATENCY,
};
use crate::request::FailureKind;
use crate::test_plan::TestPlanHistory;
use crate::threshold::{self, ThresholdResult, ThresholdVerdict};
use crate::util;
use crate::SkeinError;

const SEPARATOR: &str =
    " ------------------------------------------------------------------------------";

/// Everything known about a finished load test.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// When the load test started.
    pub started: DateTime<Utc>,
    /// How long the load test ran, including the drain, in milliseconds.
    pub duration_ms: u64,
    pub total_requests: u64,
    /// Requests per second over the whole load test.
    pub request_rate: f64,
    /// Completed user iterations, always equal to `total_requests`.
    pub iterations: usize,
    /// Users aborted because they didn't exit within the drain timeout.
    pub aborted_users: usize,
    /// Transport latency, `http_req_duration`.
    pub latency: TrendSummary,
    /// Wall-clock latency of each request cycle, `query_latency_ms`.
    pub query_latency: TrendSummary,
    /// Share of failed requests, `errors`.
    pub error_rate: f64,
    /// Failed requests by kind.
    pub failures: BTreeMap<FailureKind, u64>,
    /// Distinct error details, and how often each was seen.
    pub errors: BTreeMap<String, usize>,
    pub thresholds: Vec<ThresholdResult>,
    /// The overall verdict: `false` if any threshold failed.
    pub passed: bool,
    pub history: Vec<TestPlanHistory>,
    /// Every metric, including custom metrics.
    pub metrics: MetricsSnapshot,
}
impl RunReport {
    pub(crate) fn new(
        started: DateTime<Utc>,
        duration: Duration,
        iterations: usize,
        aborted_users: usize,
        collector: &MetricCollector,
        thresholds: Vec<ThresholdResult>,
        history: Vec<TestPlanHistory>,
    ) -> RunReport {
        let metrics = collector.snapshot(duration);

        let total_requests = match metrics.metrics.get(HTTP_REQS) {
            Some(MetricSnapshot::Counter { count, .. }) => *count,
            _ => 0,
        };
        let trend = |name: &str| match metrics.metrics.get(name) {
            Some(MetricSnapshot::Trend(summary)) => *summary,
            _ => TrendSummary::default(),
        };
        let error_rate = match metrics.metrics.get(ERRORS) {
            Some(MetricSnapshot::Rate { rate, .. }) => *rate,
            _ => 0.0,
        };

        RunReport {
            started,
            duration_ms: duration.as_millis() as u64,
            total_requests,
            request_rate: metrics::per_second(total_requests, duration),
            iterations,
            aborted_users,
            latency: trend(HTTP_REQ_DURATION),
            query_latency: trend(QUERY_LATENCY),
            error_rate,
            failures: collector.failure_breakdown(),
            errors: metrics.errors.clone(),
            passed: threshold::passed(&thresholds),
            thresholds,
            history,
            metrics,
        }
    }

    /// The report as a pretty-printed JSON document.
    pub fn to_json(&self) -> Result<String, SkeinError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report as JSON to `path`.
    pub async fn write_json(&self, path: &str) -> Result<(), SkeinError> {
        tokio::fs::write(path, self.to_json()?).await?;
        Ok(())
    }

    fn fmt_overview(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(fmt, "\n === SKEIN LOAD TEST RESULTS ===\n{}", SEPARATOR)?;
        writeln!(
            fmt,
            " Started: {}, duration: {:.1}s",
            self.started.format("%Y-%m-%d %H:%M:%S UTC"),
            self.duration_ms as f64 / 1_000.0
        )?;
        let rate_precision = determine_precision(self.request_rate);
        writeln!(
            fmt,
            " Requests: {} total, {:.rate_p$}/s",
            format_number(self.total_requests),
            self.request_rate,
            rate_p = rate_precision,
        )?;
        writeln!(
            fmt,
            " Iterations: {}, aborted users: {}",
            format_number(self.iterations as u64),
            self.aborted_users
        )?;
        writeln!(fmt, " Errors: {:.2}%", self.error_rate * 100.0)
    }

    fn fmt_latency(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(fmt, "\n === LATENCY (ms) ===\n{}", SEPARATOR)?;
        writeln!(
            fmt,
            " {:<18} | {:>8} | {:>8} | {:>8} | {:>8} | {:>8} | {:>8}",
            "Metric", "Average", "Min", "Max", "Median", "P95", "P99"
        )?;
        writeln!(fmt, "{}", SEPARATOR)?;
        for (name, summary) in [
            (HTTP_REQ_DURATION, &self.latency),
            (QUERY_LATENCY, &self.query_latency),
        ] {
            writeln!(
                fmt,
                " {:<18} | {:>8} | {:>8} | {:>8} | {:>8} | {:>8} | {:>8}",
                util::truncate_string(name, 18),
                format_ms(summary.avg),
                format_ms(summary.min),
                format_ms(summary.max),
                format_ms(summary.med),
                format_ms(summary.p95),
                format_ms(summary.p99),
            )?;
        }
        Ok(())
    }

    fn fmt_failures(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        // If there's nothing to display, exit immediately.
        if self.failures.values().all(|count| *count == 0) {
            return Ok(());
        }

        writeln!(fmt, "\n === FAILURES ===\n{}", SEPARATOR)?;
        writeln!(fmt, " {:<24} | {:>13} | {:>8}", "Kind", "# fails", "%")?;
        writeln!(fmt, "{}", SEPARATOR)?;
        for (kind, count) in &self.failures {
            if *count == 0 {
                continue;
            }
            let percent = if self.total_requests > 0 {
                *count as f64 / self.total_requests as f64 * 100.0
            } else {
                0.0
            };
            writeln!(
                fmt,
                " {:<24} | {:>13} | {:>7.1}%",
                kind,
                format_number(*count),
                percent
            )?;
        }
        Ok(())
    }

    fn fmt_errors(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        // If there's nothing to display, exit immediately.
        if self.errors.is_empty() {
            return Ok(());
        }

        writeln!(fmt, "\n === ERRORS ===\n{}", SEPARATOR)?;
        writeln!(fmt, " {:<11} | Error", "Count")?;
        writeln!(fmt, "{}", SEPARATOR)?;

        // Reverse sort errors to display the error occurring the most first.
        for (occurrences, error) in self
            .errors
            .iter()
            .map(|(error, occurrences)| (*occurrences, error))
            .sorted()
            .rev()
        {
            writeln!(fmt, " {:<12}  {}", format_number(occurrences as u64), error)?;
        }
        writeln!(fmt, "{}", SEPARATOR)
    }

    fn fmt_thresholds(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.thresholds.is_empty() {
            writeln!(fmt, "\n === THRESHOLDS ===\n{}", SEPARATOR)?;
            writeln!(
                fmt,
                " {:<44} | {:>12} | {:>13}",
                "Rule", "Observed", "Result"
            )?;
            writeln!(fmt, "{}", SEPARATOR)?;
            for result in &self.thresholds {
                let observed = match result.observed {
                    Some(observed) => format!("{:.prec$}", observed, prec = determine_precision(observed)),
                    None => "-".to_string(),
                };
                let verdict = match result.verdict {
                    ThresholdVerdict::Pass => "pass".to_string(),
                    ThresholdVerdict::Fail => "FAIL".to_string(),
                    ThresholdVerdict::Indeterminate => "indeterminate".to_string(),
                };
                writeln!(
                    fmt,
                    " {:<44} | {:>12} | {:>13}",
                    util::truncate_string(&result.rule, 44),
                    observed,
                    verdict
                )?;
                if let Some(detail) = result.detail.as_ref() {
                    writeln!(fmt, "   {}", detail)?;
                }
            }
            writeln!(fmt, "{}", SEPARATOR)?;
        }
        writeln!(
            fmt,
            " Overall: {}",
            if self.passed { "PASSED" } else { "FAILED" }
        )
    }
}

/// Implement format trait to allow displaying the report.
impl fmt::Display for RunReport {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        self.fmt_overview(fmt)?;
        self.fmt_latency(fmt)?;
        self.fmt_failures(fmt)?;
        self.fmt_errors(fmt)?;
        self.fmt_thresholds(fmt)
    }
}

fn determine_precision(value: f64) -> usize {
    if value < 1000.0 {
        2
    } else {
        0
    }
}

// Milliseconds with a precision depending on magnitude.
fn format_ms(value: f64) -> String {
    format!("{:.prec$}", value, prec = determine_precision(value))
}

/// Format large number in locale appropriate style.
fn format_number(number: u64) -> String {
    number.to_formatted_string(&Locale::en)
}
