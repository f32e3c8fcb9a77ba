//! Functions and structures related to configuring a Skein load test.
//!
//! Skein can be configured at run time by passing in the options and flags defined by
//! the [`SkeinConfiguration`] structure.
//!
//! Skein can be configured programmatically with [`SkeinDefaultType::set_default`]. A
//! value passed on the command line always takes precedence over a programmatic default,
//! which takes precedence over Skein's built-in default.

use gumdrop::Options;
use simplelog::*;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::logger::SkeinLogFormat;
use crate::test_plan::TestPlan;
use crate::threshold::{MissingDataPolicy, ThresholdRule};
use crate::util;
use crate::{SkeinAttack, SkeinError};

/// Built-in default request path.
pub const DEFAULT_PATH: &str = "/query";
/// Built-in default per-request timeout.
pub const DEFAULT_TIMEOUT: &str = "60s";
/// Built-in default pause between iterations.
pub const DEFAULT_PACING: &str = "100ms";
/// Built-in default scheduler tick.
pub const DEFAULT_TICK: &str = "100ms";
/// Built-in default time allowed for users to finish once the test plan ends.
pub const DEFAULT_DRAIN_TIMEOUT: &str = "10s";

/// Runtime options available when launching a Skein load test.
///
/// Custom defaults can be programmatically set for most of these options using
/// [`SkeinDefaultType::set_default`].
///
/// Skein leverages [`gumdrop`](https://docs.rs/gumdrop/) to derive the help output from
/// the below structure.
#[derive(Options, Debug, Clone, Default)]
#[options(
    help = r#"Skein drives staged load against a service and checks the results against thresholds.

The following runtime options are available when launching a Skein load test:"#
)]
pub struct SkeinConfiguration {
    /// Displays this help
    #[options(short = "h")]
    pub help: bool,
    /// Prints version information
    #[options(short = "V")]
    pub version: bool,
    /// Lists the configured requests and exits
    // Add a blank line and then a 'Target:' header after this option
    #[options(short = "l", help = "Lists the configured requests and exits\n\nTarget:")]
    pub list: bool,

    /// Defines host to load test (ie http://10.21.32.33:8080)
    #[options(short = "H")]
    pub host: String,
    /// Sets the path requests are sent to (default: /query)
    #[options(no_short, meta = "PATH")]
    pub path: String,
    /// Loads request payloads from a file containing a JSON array
    #[options(short = "r", meta = "NAME")]
    pub requests: String,
    /// Seeds random request selection for reproducible runs
    #[options(no_short, meta = "SEED")]
    pub seed: Option<u64>,
    /// Sets per-request timeout (default: 60s)
    #[options(
        no_short,
        meta = "TIME",
        help = "Sets per-request timeout (default: 60s)\n\nSchedule:"
    )]
    pub timeout: String,

    /// Defines stages as "{users},{timespan};{users},{timespan}"
    #[options(short = "t", meta = "\"USERS,TIME\"")]
    pub test_plan: Option<TestPlan>,
    /// Sets pause between iterations of each user (default: 100ms)
    #[options(short = "p", meta = "TIME")]
    pub pacing: String,
    /// Sets how often users are launched or retired (default: 100ms)
    #[options(no_short, meta = "TIME")]
    pub tick: String,
    /// Limits users launched per tick (default: unlimited)
    #[options(no_short, meta = "USERS")]
    pub ramp_step: Option<usize>,
    /// Sets how long users may take to finish when stopping (default: 10s)
    #[options(
        no_short,
        meta = "TIME",
        help = "Sets how long users may take to finish when stopping (default: 10s)\n\nThresholds:"
    )]
    pub drain_timeout: String,

    /// Adds a threshold as "metric:expression", ie "errors:rate<0.1"
    #[options(short = "T", meta = "RULE")]
    pub threshold: Vec<ThresholdRule>,
    /// Treats thresholds without samples as indeterminate instead of failed
    #[options(
        no_short,
        help = "Treats thresholds without samples as indeterminate instead of failed\n\nReports:"
    )]
    pub skip_missing: bool,

    /// Doesn't display the report at end of load test
    #[options(no_short)]
    pub no_print_metrics: bool,
    /// Writes a JSON report to file
    #[options(no_short, meta = "NAME")]
    pub report_file: String,
    /// Sets request log file name
    #[options(short = "R", meta = "NAME")]
    pub request_log: String,
    /// Sets request log format (json, csv, raw)
    #[options(
        no_short,
        meta = "FORMAT",
        help = "Sets request log format (json, csv, raw)\n\nLogging:"
    )]
    pub request_format: Option<SkeinLogFormat>,

    /// Enables Skein log file and sets name
    #[options(short = "G", meta = "NAME")]
    pub log_file: String,
    /// Increases Skein log file level (-g, -gg, etc)
    #[options(short = "g", count)]
    pub log_level: u8,
    /// Decreases Skein verbosity (-q, -qq, etc)
    #[options(count, short = "q")]
    pub quiet: u8,
    /// Increases Skein verbosity (-v, -vv, etc)
    #[options(count, short = "v")]
    pub verbose: u8,
}

/// Optional default values for Skein run-time options.
///
/// These custom defaults can be configured using [`SkeinDefaultType::set_default()`].
#[derive(Clone, Debug, Default)]
pub(crate) struct SkeinDefaults {
    pub host: Option<String>,
    pub path: Option<String>,
    pub requests: Option<String>,
    pub seed: Option<u64>,
    pub timeout: Option<String>,
    pub test_plan: Option<TestPlan>,
    pub pacing: Option<String>,
    pub tick: Option<String>,
    pub ramp_step: Option<usize>,
    pub drain_timeout: Option<String>,
    /// Default thresholds are only used when none are passed on the command line.
    pub thresholds: Vec<ThresholdRule>,
    pub skip_missing: Option<bool>,
    pub no_print_metrics: Option<bool>,
    pub report_file: Option<String>,
    pub request_log: Option<String>,
    pub request_format: Option<SkeinLogFormat>,
    pub log_file: Option<String>,
    pub log_level: Option<u8>,
    pub quiet: Option<u8>,
    pub verbose: Option<u8>,
}

/// Defines all [`SkeinConfiguration`] options that can be programmatically configured with
/// a custom default.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkeinDefault {
    /// The host to load test, `&str`.
    Host,
    /// The path requests are sent to, `&str`.
    Path,
    /// A file containing a JSON array of request payloads, `&str`.
    Requests,
    /// Seed for random request selection, `usize`.
    Seed,
    /// Per-request timeout, `&str` timespan.
    Timeout,
    /// The test plan, `&str` formatted as "{users},{timespan};...".
    TestPlan,
    /// Pause between iterations, `&str` timespan.
    Pacing,
    /// Scheduler tick, `&str` timespan.
    Tick,
    /// Maximum users launched or retired per tick, `usize`.
    RampStep,
    /// Time allowed for users to finish, `&str` timespan.
    DrainTimeout,
    /// Adds a threshold rule, `&str` formatted as "metric:expression".
    Threshold,
    /// Treat thresholds without samples as indeterminate, `bool`.
    SkipMissing,
    /// Don't print the report, `bool`.
    NoPrintMetrics,
    /// JSON report file name, `&str`.
    ReportFile,
    /// Request log file name, `&str`.
    RequestLog,
    /// Request log format, [`SkeinLogFormat`].
    RequestFormat,
    /// Skein log file name, `&str`.
    LogFile,
    /// Skein log file level, `usize`.
    LogLevel,
    /// Quiet level, `usize`.
    Quiet,
    /// Verbosity level, `usize`.
    Verbose,
}
impl SkeinDefault {
    // The type `set_default` expects for this option.
    fn expected_type(&self) -> &'static str {
        match self {
            SkeinDefault::Seed
            | SkeinDefault::RampStep
            | SkeinDefault::LogLevel
            | SkeinDefault::Quiet
            | SkeinDefault::Verbose => "usize",
            SkeinDefault::SkipMissing | SkeinDefault::NoPrintMetrics => "bool",
            SkeinDefault::RequestFormat => "SkeinLogFormat",
            _ => "&str",
        }
    }

    fn wrong_type(&self, value: &dyn fmt::Display, received: &str) -> SkeinError {
        SkeinError::InvalidOption {
            option: format!("SkeinDefault::{:?}", self),
            value: value.to_string(),
            detail: format!(
                "set_default(SkeinDefault::{:?}, {}) expected {} value, received {}",
                self,
                value,
                self.expected_type(),
                received
            ),
        }
    }
}

/// Most run-time options can be programmatically configured with custom defaults.
///
/// The required type of each option is documented on [`SkeinDefault`].
pub trait SkeinDefaultType<T> {
    /// Sets a [`SkeinDefault`] to the provided value.
    ///
    /// # Example
    /// ```rust
    /// use skein::prelude::*;
    ///
    /// fn main() -> Result<(), SkeinError> {
    ///     SkeinAttack::initialize()?
    ///         .set_default(SkeinDefault::Host, "http://localhost:8080")?
    ///         .set_default(SkeinDefault::TestPlan, "10,30s;0,10s")?
    ///         .set_default(SkeinDefault::Threshold, "errors:rate<0.1")?
    ///         .set_default(SkeinDefault::Quiet, 1)?;
    ///
    ///     Ok(())
    /// }
    /// ```
    fn set_default(self, key: SkeinDefault, value: T) -> Result<Box<Self>, SkeinError>;
}
impl SkeinDefaultType<&str> for SkeinAttack {
    fn set_default(mut self, key: SkeinDefault, value: &str) -> Result<Box<Self>, SkeinError> {
        let optional = |value: &str| {
            if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            }
        };
        match key {
            SkeinDefault::Host => self.defaults.host = optional(value),
            SkeinDefault::Path => self.defaults.path = optional(value),
            SkeinDefault::Requests => self.defaults.requests = optional(value),
            SkeinDefault::Timeout => self.defaults.timeout = optional(value),
            SkeinDefault::TestPlan => self.defaults.test_plan = Some(value.parse::<TestPlan>()?),
            SkeinDefault::Pacing => self.defaults.pacing = optional(value),
            SkeinDefault::Tick => self.defaults.tick = optional(value),
            SkeinDefault::DrainTimeout => self.defaults.drain_timeout = optional(value),
            SkeinDefault::Threshold => self
                .defaults
                .thresholds
                .push(value.parse::<ThresholdRule>()?),
            SkeinDefault::ReportFile => self.defaults.report_file = optional(value),
            SkeinDefault::RequestLog => self.defaults.request_log = optional(value),
            SkeinDefault::LogFile => self.defaults.log_file = optional(value),
            _ => return Err(key.wrong_type(&value, "&str")),
        }
        Ok(Box::new(self))
    }
}
impl SkeinDefaultType<usize> for SkeinAttack {
    fn set_default(mut self, key: SkeinDefault, value: usize) -> Result<Box<Self>, SkeinError> {
        match key {
            SkeinDefault::Seed => self.defaults.seed = Some(value as u64),
            SkeinDefault::RampStep => self.defaults.ramp_step = Some(value),
            SkeinDefault::LogLevel => self.defaults.log_level = Some(value as u8),
            SkeinDefault::Quiet => self.defaults.quiet = Some(value as u8),
            SkeinDefault::Verbose => self.defaults.verbose = Some(value as u8),
            _ => return Err(key.wrong_type(&value, "usize")),
        }
        Ok(Box::new(self))
    }
}
impl SkeinDefaultType<bool> for SkeinAttack {
    fn set_default(mut self, key: SkeinDefault, value: bool) -> Result<Box<Self>, SkeinError> {
        match key {
            SkeinDefault::SkipMissing => self.defaults.skip_missing = Some(value),
            SkeinDefault::NoPrintMetrics => self.defaults.no_print_metrics = Some(value),
            _ => return Err(key.wrong_type(&value, "bool")),
        }
        Ok(Box::new(self))
    }
}
impl SkeinDefaultType<SkeinLogFormat> for SkeinAttack {
    fn set_default(
        mut self,
        key: SkeinDefault,
        value: SkeinLogFormat,
    ) -> Result<Box<Self>, SkeinError> {
        match key {
            SkeinDefault::RequestFormat => self.defaults.request_format = Some(value),
            _ => return Err(key.wrong_type(&value, "SkeinLogFormat")),
        }
        Ok(Box::new(self))
    }
}

/// Used internally to configure [`SkeinConfiguration`] values based on precedence rules.
#[derive(Debug, Clone)]
pub(crate) struct SkeinValue<'a, T> {
    /// The optional value to set.
    pub(crate) value: Option<T>,
    /// Skip this value if true.
    pub(crate) filter: bool,
    /// An optional INFO level log message.
    pub(crate) message: &'a str,
}

pub(crate) trait SkeinConfigure<T> {
    /// Returns the first unfiltered [`SkeinValue`].
    fn get_value(&self, values: Vec<SkeinValue<T>>) -> Option<T>;
}
impl<T: fmt::Display> SkeinConfigure<T> for SkeinConfiguration {
    fn get_value(&self, values: Vec<SkeinValue<T>>) -> Option<T> {
        for value in values {
            if let Some(v) = value.value {
                if value.filter {
                    continue;
                }
                if !value.message.is_empty() {
                    info!("{} = {}", value.message, v)
                }
                return Some(v);
            }
        }
        None
    }
}

/// Resolved run-time settings, derived from a validated [`SkeinConfiguration`].
#[derive(Clone, Debug)]
pub(crate) struct RunSettings {
    pub(crate) test_plan: TestPlan,
    pub(crate) timeout: Duration,
    pub(crate) pacing: Duration,
    pub(crate) tick: Duration,
    pub(crate) ramp_step: Option<usize>,
    pub(crate) drain_timeout: Duration,
    pub(crate) missing_data: MissingDataPolicy,
}

// Parse a configured timespan, naming the option in the error.
fn timespan(option: &str, value: &str) -> Result<Duration, SkeinError> {
    util::parse_timespan_ms(value)
        .map(|ms| Duration::from_millis(ms as u64))
        .ok_or_else(|| SkeinError::InvalidOption {
            option: option.to_string(),
            value: value.to_string(),
            detail: format!(
                "{} must be a timespan such as \"30s\", \"1m30s\" or \"100ms\"",
                option
            ),
        })
}

impl SkeinConfiguration {
    // A string option: the command line if set, otherwise the default, otherwise the
    // built-in value.
    fn configure_string(
        &self,
        current: &str,
        default: &Option<String>,
        builtin: &str,
        message: &str,
    ) -> String {
        self.get_value(vec![
            SkeinValue {
                value: Some(current.to_string()),
                filter: current.is_empty(),
                message,
            },
            SkeinValue {
                value: default.clone(),
                filter: default.is_none(),
                message,
            },
            SkeinValue {
                value: Some(builtin.to_string()),
                filter: builtin.is_empty(),
                message: "",
            },
        ])
        .unwrap_or_default()
    }

    // A counted flag: the command line if non-zero, otherwise the default.
    fn configure_count(&self, current: u8, default: Option<u8>) -> u8 {
        self.get_value(vec![
            SkeinValue {
                value: Some(current),
                filter: current == 0,
                message: "",
            },
            SkeinValue {
                value: default,
                filter: default.is_none(),
                message: "",
            },
        ])
        .unwrap_or(0)
    }

    // A boolean flag: the command line if set, otherwise the default.
    fn configure_flag(&self, current: bool, default: Option<bool>, message: &str) -> bool {
        self.get_value(vec![
            SkeinValue {
                value: Some(current),
                filter: !current,
                message,
            },
            SkeinValue {
                value: default,
                filter: default.is_none(),
                message,
            },
        ])
        .unwrap_or(false)
    }

    /// Implement precedence rules for all [`SkeinConfiguration`] values.
    pub(crate) fn configure(&mut self, defaults: &SkeinDefaults) {
        // Configure logging first, so the rest of configuration can be logged.
        self.quiet = self.configure_count(self.quiet, defaults.quiet);
        self.verbose = self.configure_count(self.verbose, defaults.verbose);
        self.log_level = self.configure_count(self.log_level, defaults.log_level);
        self.log_file = self.configure_string(&self.log_file, &defaults.log_file, "", "");
        self.initialize_logger();

        self.host = self.configure_string(&self.host, &defaults.host, "", "host");
        self.path = self.configure_string(&self.path, &defaults.path, DEFAULT_PATH, "path");
        self.requests =
            self.configure_string(&self.requests, &defaults.requests, "", "requests");
        self.timeout =
            self.configure_string(&self.timeout, &defaults.timeout, DEFAULT_TIMEOUT, "timeout");
        self.pacing =
            self.configure_string(&self.pacing, &defaults.pacing, DEFAULT_PACING, "pacing");
        self.tick = self.configure_string(&self.tick, &defaults.tick, DEFAULT_TICK, "tick");
        self.drain_timeout = self.configure_string(
            &self.drain_timeout,
            &defaults.drain_timeout,
            DEFAULT_DRAIN_TIMEOUT,
            "drain_timeout",
        );
        self.report_file =
            self.configure_string(&self.report_file, &defaults.report_file, "", "report_file");
        self.request_log =
            self.configure_string(&self.request_log, &defaults.request_log, "", "request_log");

        self.seed = self.get_value(vec![
            SkeinValue {
                value: self.seed,
                filter: self.seed.is_none(),
                message: "seed",
            },
            SkeinValue {
                value: defaults.seed,
                filter: defaults.seed.is_none(),
                message: "seed",
            },
        ]);

        self.test_plan = self.get_value(vec![
            SkeinValue {
                value: self.test_plan.clone(),
                filter: self.test_plan.is_none(),
                message: "test_plan",
            },
            SkeinValue {
                value: defaults.test_plan.clone(),
                filter: defaults.test_plan.is_none(),
                message: "test_plan",
            },
        ]);

        self.ramp_step = self.get_value(vec![
            SkeinValue {
                value: self.ramp_step,
                filter: self.ramp_step.is_none(),
                message: "ramp_step",
            },
            SkeinValue {
                value: defaults.ramp_step,
                filter: defaults.ramp_step.is_none(),
                message: "ramp_step",
            },
        ]);

        // Thresholds from the command line replace all default thresholds.
        if self.threshold.is_empty() {
            self.threshold = defaults.thresholds.clone();
        }
        for rule in &self.threshold {
            info!("threshold = {}", rule);
        }

        self.skip_missing =
            self.configure_flag(self.skip_missing, defaults.skip_missing, "skip_missing");
        self.no_print_metrics =
            self.configure_flag(self.no_print_metrics, defaults.no_print_metrics, "");

        self.request_format = self.get_value(vec![
            SkeinValue {
                value: self.request_format,
                filter: self.request_format.is_none(),
                message: "request_format",
            },
            SkeinValue {
                value: defaults.request_format,
                filter: defaults.request_format.is_none(),
                message: "request_format",
            },
            SkeinValue {
                value: Some(SkeinLogFormat::Json),
                filter: self.request_log.is_empty(),
                message: "",
            },
        ]);
    }

    /// Validate configured [`SkeinConfiguration`] values.
    pub(crate) fn validate(&self) -> Result<(), SkeinError> {
        // Can't set both --verbose and --quiet.
        if self.verbose > 0 && self.quiet > 0 {
            return Err(SkeinError::InvalidOption {
                option: "`configuration.verbose`".to_string(),
                value: self.verbose.to_string(),
                detail: "`configuration.verbose` can not be set with `configuration.quiet`."
                    .to_string(),
            });
        }

        if self.host.is_empty() {
            return Err(SkeinError::InvalidOption {
                option: "--host".to_string(),
                value: "".to_string(),
                detail: "A host must be defined via the --host option or the SkeinAttack.set_default() function.".to_string(),
            });
        }
        util::is_valid_host(&self.host)?;

        if !self.path.starts_with('/') {
            return Err(SkeinError::InvalidOption {
                option: "--path".to_string(),
                value: self.path.to_string(),
                detail: "--path must start with a /".to_string(),
            });
        }

        match self.test_plan.as_ref() {
            Some(test_plan) => test_plan.validate()?,
            None => {
                return Err(SkeinError::InvalidOption {
                    option: "--test-plan".to_string(),
                    value: "".to_string(),
                    detail: "A test plan must be defined via the --test-plan option or the SkeinAttack.set_default() function.".to_string(),
                })
            }
        }

        if timespan("--timeout", &self.timeout)?.is_zero() {
            return Err(SkeinError::InvalidOption {
                option: "--timeout".to_string(),
                value: self.timeout.to_string(),
                detail: "--timeout must be greater than 0.".to_string(),
            });
        }
        if timespan("--tick", &self.tick)?.is_zero() {
            return Err(SkeinError::InvalidOption {
                option: "--tick".to_string(),
                value: self.tick.to_string(),
                detail: "--tick must be greater than 0.".to_string(),
            });
        }
        timespan("--pacing", &self.pacing)?;
        timespan("--drain-timeout", &self.drain_timeout)?;

        // The request format is only meaningful with a request log.
        if self.request_log.is_empty() && self.request_format.is_some() {
            return Err(SkeinError::InvalidOption {
                option: "--request-format".to_string(),
                value: self.request_format.map(|f| f.to_string()).unwrap_or_default(),
                detail: "--request-format can not be set without --request-log.".to_string(),
            });
        }

        Ok(())
    }

    /// Resolve the validated configuration into the settings used while running.
    pub(crate) fn run_settings(&self) -> Result<RunSettings, SkeinError> {
        let test_plan = self
            .test_plan
            .clone()
            .ok_or_else(|| SkeinError::InvalidOption {
                option: "--test-plan".to_string(),
                value: "".to_string(),
                detail: "A test plan is required.".to_string(),
            })?;
        Ok(RunSettings {
            test_plan,
            timeout: timespan("--timeout", &self.timeout)?,
            pacing: timespan("--pacing", &self.pacing)?,
            tick: timespan("--tick", &self.tick)?,
            ramp_step: self.ramp_step.filter(|step| *step > 0),
            drain_timeout: timespan("--drain-timeout", &self.drain_timeout)?,
            missing_data: if self.skip_missing {
                MissingDataPolicy::Skip
            } else {
                MissingDataPolicy::Fail
            },
        })
    }

    /// Initialize the Skein logger which writes to standard out and optionally to a log
    /// file.
    pub(crate) fn initialize_logger(&self) {
        // Configure console output level.
        let debug_level = match self.verbose {
            0 => match self.quiet {
                0 => LevelFilter::Info,
                1 => LevelFilter::Warn,
                _ => LevelFilter::Error,
            },
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Configure log file level.
        let log_level = match self.log_level {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        let log_file: Option<PathBuf> = if !self.log_file.is_empty() {
            Some(PathBuf::from(&self.log_file))
        } else {
            None
        };

        let mut loggers: Vec<Box<dyn SharedLogger>> =
            vec![SimpleLogger::new(debug_level, Config::default())];
        if let Some(log_to_file) = log_file.as_ref() {
            match std::fs::File::create(log_to_file) {
                Ok(file) => loggers.push(WriteLogger::new(log_level, Config::default(), file)),
                // The logger isn't initialized yet.
                Err(e) => eprintln!(
                    "failed to create log file {}: {}",
                    log_to_file.display(),
                    e
                ),
            }
        }

        // Fails if a logger was already initialized, for example by an earlier load test
        // in the same process.
        if let Err(e) = CombinedLogger::init(loggers) {
            debug!("failed to initialize CombinedLogger: {}", e);
        }

        if let Some(log_to_file) = log_file {
            info!("Writing to log file: {}", log_to_file.display());
        }
        info!("Output verbosity level: {}", debug_level);
        info!("Logfile verbosity level: {}", log_level);
    }
}
