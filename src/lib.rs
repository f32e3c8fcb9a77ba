//! # Skein
//!
//! Skein is a staged load generation harness. It launches and retires virtual users
//! following a test plan, each user repeatedly sending a randomly selected request to
//! the service under test. Every outcome is recorded in a set of named metrics, and at
//! the end of the load test the metrics are checked against threshold rules to produce
//! a pass or fail verdict.
//!
//! ## Test plans
//!
//! A test plan is an ordered list of stages, each holding a target number of users for
//! a period of time: `"10,30s;10,1m;50,30s;50,2m;0,30s"` holds 10 users for a minute and
//! a half, then 50 users for two and a half minutes, then quiesces for 30 seconds. The
//! scheduler adjusts the running population at every tick, launching users when below
//! the target and retiring the most recently launched users when above it.
//!
//! ## Metrics and thresholds
//!
//! Every request updates the built-in metrics:
//!  - `http_reqs` (counter): requests sent;
//!  - `http_req_duration` (trend): transport latency in milliseconds;
//!  - `query_latency_ms` (trend): wall-clock latency of the full request cycle;
//!  - `errors` (rate): the share of failed requests.
//!
//! Thresholds are written as `"metric:expression"`, for example
//! `"http_req_duration:p(95)<500"` or `"errors:rate<0.1"`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use skein::prelude::*;
//!
//! fn main() -> Result<(), SkeinError> {
//!     let report = SkeinAttack::initialize()?
//!         .register_requests(RequestPool::default_queries())
//!         .set_default(SkeinDefault::Host, "http://localhost:8080")?
//!         .set_default(SkeinDefault::TestPlan, "10,30s;10,1m;0,10s")?
//!         .set_default(SkeinDefault::Threshold, "errors:rate<0.1")?
//!         .execute()?;
//!
//!     std::process::exit(if report.passed { 0 } else { 99 });
//! }
//! ```
//!
//! ## License
//!
//! Licensed under the Apache License, Version 2.0.

#[macro_use]
extern crate log;

pub mod config;
pub mod logger;
pub mod metrics;
pub mod prelude;
pub mod report;
pub mod request;
pub mod test_plan;
pub mod threshold;
mod user;
pub mod util;

use chrono::Utc;
use gumdrop::Options;
use lazy_static::lazy_static;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time;
use std::{fmt, io};
use tokio::runtime::Runtime;

use crate::config::{RunSettings, SkeinConfiguration, SkeinDefaults};
use crate::logger::{SkeinLoggerJoinHandle, SkeinLoggerTx};
use crate::metrics::MetricCollector;
use crate::report::RunReport;
use crate::request::{
    HttpTransport, QueryResponseValidator, RequestExecutor, RequestPool, RequestSpec,
    ResponseValidator, Transport,
};
use crate::test_plan::{TestPlanHistory, TestPlanStepAction};
use crate::threshold::ThresholdEvaluator;
use crate::user::{SkeinUser, UserCommand};

lazy_static! {
    /// Set by the ctrl-c handler.
    pub(crate) static ref CANCELED: RwLock<bool> = RwLock::new(false);
}

/// An enumeration of all errors a [`SkeinAttack`] can return.
#[derive(Debug)]
pub enum SkeinError {
    /// Wraps a [`std::io::Error`](https://doc.rust-lang.org/std/io/struct.Error.html).
    Io(io::Error),
    /// Wraps a [`reqwest::Error`](https://docs.rs/reqwest/*/reqwest/struct.Error.html).
    Reqwest(reqwest::Error),
    /// Wraps a [`tokio::task::JoinError`](https://docs.rs/tokio/*/tokio/task/struct.JoinError.html).
    TokioJoin(tokio::task::JoinError),
    /// Wraps a [`serde_json::Error`](https://docs.rs/serde_json/*/serde_json/struct.Error.html).
    Serde(serde_json::Error),
    /// Failed to parse a hostname.
    InvalidHost {
        /// The invalid hostname that caused this error.
        host: String,
        /// An optional explanation of the error.
        detail: String,
        /// Wraps a [`url::ParseError`](https://docs.rs/url/*/url/enum.ParseError.html).
        parse_error: url::ParseError,
    },
    /// Invalid option or value specified, may only be invalid in context.
    InvalidOption {
        /// The invalid option that caused this error, may be only invalid in context.
        option: String,
        /// The invalid value that caused this error, may be only invalid in context.
        value: String,
        /// An optional explanation of the error.
        detail: String,
    },
    /// Invalid test plan.
    InvalidTestPlan {
        /// The stage or plan that failed to parse or validate.
        value: String,
        /// An optional explanation of the error.
        detail: String,
    },
    /// Invalid threshold rule.
    InvalidThreshold {
        /// The rule that caused this error.
        rule: String,
        /// An optional explanation of the error.
        detail: String,
    },
    /// A metric was requested with a kind that doesn't match its registration.
    InvalidMetric {
        /// The metric name.
        name: String,
        /// An optional explanation of the error.
        detail: String,
    },
    /// No requests are registered.
    NoRequests {
        /// An optional explanation of the error.
        detail: String,
    },
}
impl SkeinError {
    fn describe(&self) -> &str {
        match *self {
            SkeinError::Io(_) => "io::Error",
            SkeinError::Reqwest(_) => "reqwest::Error",
            SkeinError::TokioJoin(_) => "tokio::task::JoinError",
            SkeinError::Serde(_) => "serde_json::Error",
            SkeinError::InvalidHost { .. } => "failed to parse hostname",
            SkeinError::InvalidOption { .. } => "invalid option or value specified",
            SkeinError::InvalidTestPlan { .. } => "invalid test plan specified",
            SkeinError::InvalidThreshold { .. } => "invalid threshold specified",
            SkeinError::InvalidMetric { .. } => "invalid metric",
            SkeinError::NoRequests { .. } => "no requests defined",
        }
    }
}

/// Auto-convert SkeinError to a string.
impl fmt::Display for SkeinError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            SkeinError::Io(ref source) => write!(f, "SkeinError: {} ({})", self.describe(), source),
            SkeinError::Reqwest(ref source) => {
                write!(f, "SkeinError: {} ({})", self.describe(), source)
            }
            SkeinError::TokioJoin(ref source) => {
                write!(f, "SkeinError: {} ({})", self.describe(), source)
            }
            SkeinError::Serde(ref source) => {
                write!(f, "SkeinError: {} ({})", self.describe(), source)
            }
            SkeinError::InvalidHost {
                ref host,
                ref parse_error,
                ..
            } => write!(
                f,
                "SkeinError: {} {} ({})",
                self.describe(),
                host,
                parse_error
            ),
            SkeinError::InvalidOption {
                ref option,
                ref detail,
                ..
            } => write!(f, "SkeinError: {} {}: {}", self.describe(), option, detail),
            SkeinError::InvalidTestPlan {
                ref value,
                ref detail,
            } => write!(f, "SkeinError: {} \"{}\": {}", self.describe(), value, detail),
            SkeinError::InvalidThreshold {
                ref rule,
                ref detail,
            } => write!(f, "SkeinError: {} \"{}\": {}", self.describe(), rule, detail),
            SkeinError::InvalidMetric {
                ref name,
                ref detail,
            } => write!(f, "SkeinError: {} {}: {}", self.describe(), name, detail),
            SkeinError::NoRequests { ref detail } => {
                write!(f, "SkeinError: {}: {}", self.describe(), detail)
            }
        }
    }
}

// Define the lower level source of this error, if any.
impl std::error::Error for SkeinError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            SkeinError::Io(ref source) => Some(source),
            SkeinError::Reqwest(ref source) => Some(source),
            SkeinError::TokioJoin(ref source) => Some(source),
            SkeinError::Serde(ref source) => Some(source),
            SkeinError::InvalidHost {
                ref parse_error, ..
            } => Some(parse_error),
            _ => None,
        }
    }
}

/// Auto-convert Reqwest errors.
impl From<reqwest::Error> for SkeinError {
    fn from(err: reqwest::Error) -> SkeinError {
        SkeinError::Reqwest(err)
    }
}

/// Auto-convert IO errors.
impl From<io::Error> for SkeinError {
    fn from(err: io::Error) -> SkeinError {
        SkeinError::Io(err)
    }
}

/// Auto-convert TokioJoin errors.
impl From<tokio::task::JoinError> for SkeinError {
    fn from(err: tokio::task::JoinError) -> SkeinError {
        SkeinError::TokioJoin(err)
    }
}

/// Auto-convert serde_json errors.
impl From<serde_json::Error> for SkeinError {
    fn from(err: serde_json::Error) -> SkeinError {
        SkeinError::Serde(err)
    }
}

/// A [`SkeinAttack`] load test moves through each of the following phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttackPhase {
    /// The load test hasn't started.
    Idle,
    /// Users are being launched toward a higher target.
    Increase,
    /// The running population matches the current target.
    Maintain,
    /// Users are being retired toward a lower target.
    Decrease,
    /// The test plan is complete or canceled, users are stopping.
    Stopping,
    /// Exiting the load test.
    Shutdown,
}

/// Cancels a running [`SkeinAttack`] from another task or thread.
///
/// Metrics recorded before cancellation remain valid and are included in the report.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    canceled: Arc<AtomicBool>,
}
impl CancelHandle {
    /// Stop the load test at the next scheduler tick.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}

// A launched user that hasn't been told to exit.
struct RunningUser {
    number: usize,
    handle: tokio::task::JoinHandle<()>,
    channel: flume::Sender<UserCommand>,
}

/// Internal run state for a load test.
struct SkeinAttackRunState {
    settings: RunSettings,
    executor: RequestExecutor,
    collector: Arc<MetricCollector>,
    /// When the load test started.
    started: time::Instant,
    /// Accounts for time spent adjusting users, subtracted from the time sleeping so
    /// ticks don't drift.
    drift_timer: tokio::time::Instant,
    /// Active users in launch order.
    users: Vec<RunningUser>,
    /// Users told to exit that may still be finishing a request.
    retired: Vec<(usize, tokio::task::JoinHandle<()>)>,
    /// Tracks which user number is launched next.
    user_counter: usize,
    /// Completed iterations across all users.
    iterations: Arc<AtomicUsize>,
    /// Optional request logger task, if enabled.
    logger_handle: SkeinLoggerJoinHandle,
    /// Optional sender from all users to the request logger task, if enabled.
    all_users_logger_tx: SkeinLoggerTx,
    /// The stage running at the previous tick.
    stage: Option<usize>,
}

/// Global internal state for the load test.
pub struct SkeinAttack {
    /// Optional default values for run-time options.
    defaults: SkeinDefaults,
    /// Configuration object holding options set when launching the load test.
    configuration: SkeinConfiguration,
    /// Requests registered programmatically.
    requests: Vec<RequestSpec>,
    /// Overrides the default HTTP transport.
    transport: Option<Arc<dyn Transport>>,
    validator: Arc<dyn ResponseValidator>,
    /// Which phase the load test is currently operating in.
    attack_phase: AttackPhase,
    canceled: CancelHandle,
    /// Every scheduler step, included in the report.
    history: Vec<TestPlanHistory>,
}
impl SkeinAttack {
    /// Load configuration from the command line and initialize a [`SkeinAttack`].
    ///
    /// # Example
    /// ```rust
    /// use skein::prelude::*;
    ///
    /// let mut skein_attack = SkeinAttack::initialize();
    /// ```
    pub fn initialize() -> Result<SkeinAttack, SkeinError> {
        Self::initialize_with_config(SkeinConfiguration::parse_args_default_or_exit())
    }

    /// Initialize a [`SkeinAttack`] with an already loaded configuration.
    ///
    /// This is generally used by tests.
    ///
    /// # Example
    /// ```rust
    /// use skein::prelude::*;
    /// use gumdrop::Options;
    ///
    /// let configuration = SkeinConfiguration::parse_args_default(&["--host", "http://localhost:8080"])
    ///     .expect("failed to parse options");
    /// let mut skein_attack = SkeinAttack::initialize_with_config(configuration);
    /// ```
    pub fn initialize_with_config(
        configuration: SkeinConfiguration,
    ) -> Result<SkeinAttack, SkeinError> {
        Ok(SkeinAttack {
            defaults: SkeinDefaults::default(),
            configuration,
            requests: Vec::new(),
            transport: None,
            validator: Arc::new(QueryResponseValidator),
            attack_phase: AttackPhase::Idle,
            canceled: CancelHandle::default(),
            history: Vec::new(),
        })
    }

    /// Add requests to the pool users select from.
    ///
    /// Requests loaded with `--requests` replace all registered requests.
    pub fn register_requests(mut self, requests: Vec<RequestSpec>) -> Self {
        self.requests.extend(requests);
        self
    }

    /// Add one request to the pool users select from.
    ///
    /// # Example
    /// ```rust
    /// use skein::prelude::*;
    /// use serde_json::json;
    ///
    /// fn main() -> Result<(), SkeinError> {
    ///     SkeinAttack::initialize()?
    ///         .register_request(RequestSpec::named("customers", json!({"query": "SELECT * FROM customers"})));
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn register_request(mut self, request: RequestSpec) -> Self {
        self.requests.push(request);
        self
    }

    /// Replace the default HTTP transport, for example with a stub for testing.
    pub fn set_transport<T: Transport + 'static>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Replace the default [`QueryResponseValidator`].
    pub fn set_validator<V: ResponseValidator + 'static>(mut self, validator: V) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    /// Returns a handle that stops the load test when canceled.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.canceled.clone()
    }

    /// Execute the [`SkeinAttack`] load test, blocking until it completes.
    ///
    /// # Example
    /// ```rust,no_run
    /// use skein::prelude::*;
    ///
    /// fn main() -> Result<(), SkeinError> {
    ///     let report = SkeinAttack::initialize()?
    ///         .register_requests(RequestPool::default_queries())
    ///         .set_default(SkeinDefault::Host, "http://localhost:8080")?
    ///         .set_default(SkeinDefault::TestPlan, "5,10s;0,1s")?
    ///         .execute()?;
    ///     println!("passed: {}", report.passed);
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn execute(self) -> Result<RunReport, SkeinError> {
        // If version flag is set, display package name and version and exit.
        if self.configuration.version {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            std::process::exit(0);
        }

        // Display requests, then exit.
        if self.configuration.list {
            let pool = self.request_pool()?;
            println!("Available requests:");
            for request in pool.specs() {
                println!(" - {}", request.label());
            }
            std::process::exit(0);
        }

        let rt = Runtime::new()?;
        rt.block_on(self.start())
    }

    /// Run the load test on an existing tokio runtime.
    pub async fn start(mut self) -> Result<RunReport, SkeinError> {
        // Configure and validate SkeinConfiguration before any user starts.
        self.configuration.configure(&self.defaults);
        self.configuration.validate()?;
        let settings = self.configuration.run_settings()?;
        let evaluator = ThresholdEvaluator::new(
            self.configuration.threshold.clone(),
            settings.missing_data,
        );
        evaluator.validate()?;
        let pool = self.request_pool()?;
        info!(
            "{} requests, {} thresholds, test plan: {}",
            pool.len(),
            evaluator.rules().len(),
            settings.test_plan
        );

        let transport: Arc<dyn Transport> = match self.transport.clone() {
            Some(transport) => transport,
            None => {
                let transport = HttpTransport::new(
                    &self.configuration.host,
                    &self.configuration.path,
                    settings.timeout,
                )?;
                info!("sending requests to {}", transport.url());
                Arc::new(transport)
            }
        };
        let executor = RequestExecutor::new(pool, transport, self.validator.clone());

        let mut run_state = self.initialize_attack(settings, executor).await?;
        let started_at = Utc::now();

        self.run_test_plan(&mut run_state).await;

        self.set_attack_phase(&mut run_state, AttackPhase::Stopping);
        let aborted_users = self.stop_running_users(&mut run_state).await;
        let duration = run_state.started.elapsed();
        self.history.push(TestPlanHistory::step(
            TestPlanStepAction::Finished,
            duration,
            None,
            0,
            0,
        ));
        self.stop_request_logger(&mut run_state).await;

        let thresholds = evaluator.evaluate(&run_state.collector);
        let report = RunReport::new(
            started_at,
            duration,
            run_state.iterations.load(Ordering::SeqCst),
            aborted_users,
            &run_state.collector,
            thresholds,
            std::mem::take(&mut self.history),
        );
        self.set_attack_phase(&mut run_state, AttackPhase::Shutdown);

        if !self.configuration.no_print_metrics {
            println!("{}", report);
        }
        if !self.configuration.report_file.is_empty() {
            report.write_json(&self.configuration.report_file).await?;
            info!("wrote report to: {}", self.configuration.report_file);
        }

        Ok(report)
    }

    // Requests loaded with --requests, otherwise the registered requests.
    fn request_pool(&self) -> Result<RequestPool, SkeinError> {
        if !self.configuration.requests.is_empty() {
            RequestPool::from_file(&self.configuration.requests)
        } else if let Some(requests) = self.defaults.requests.as_ref() {
            RequestPool::from_file(requests)
        } else {
            RequestPool::new(self.requests.clone())
        }
    }

    fn set_attack_phase(&mut self, run_state: &mut SkeinAttackRunState, phase: AttackPhase) {
        // There's nothing to do if already in the specified phase.
        if self.attack_phase == phase {
            return;
        }

        // The drift timer starts at 0 any time the phase is changed.
        run_state.drift_timer = tokio::time::Instant::now();

        info!("entering SkeinAttack phase: {:?}", &phase);
        self.attack_phase = phase;
    }

    fn is_canceled(&self) -> bool {
        self.canceled.is_canceled() || util::ctrlc_received()
    }

    async fn initialize_attack(
        &mut self,
        settings: RunSettings,
        executor: RequestExecutor,
    ) -> Result<SkeinAttackRunState, SkeinError> {
        trace!("initialize_attack");

        let (logger_handle, all_users_logger_tx) = logger::setup_request_logger(
            &self.configuration.request_log,
            self.configuration.request_format.unwrap_or_default(),
        )
        .await?;

        // Catch ctrl-c to allow clean shutdown to display metrics.
        util::setup_ctrlc_handler();

        self.history.clear();

        Ok(SkeinAttackRunState {
            settings,
            executor,
            collector: Arc::new(MetricCollector::new()),
            started: time::Instant::now(),
            drift_timer: tokio::time::Instant::now(),
            users: Vec::new(),
            retired: Vec::new(),
            user_counter: 0,
            iterations: Arc::new(AtomicUsize::new(0)),
            logger_handle,
            all_users_logger_tx,
            stage: None,
        })
    }

    // Tick until the test plan is complete or the load test is canceled.
    async fn run_test_plan(&mut self, run_state: &mut SkeinAttackRunState) {
        loop {
            let elapsed = run_state.started.elapsed();

            if self.is_canceled() {
                info!("load test canceled after {:?}", elapsed);
                let target = run_state
                    .settings
                    .test_plan
                    .target_at(elapsed)
                    .unwrap_or(0);
                self.history.push(TestPlanHistory::step(
                    TestPlanStepAction::Canceling,
                    elapsed,
                    run_state.stage,
                    target,
                    run_state.users.len(),
                ));
                break;
            }

            let (index, target) = match run_state.settings.test_plan.stage_at(elapsed) {
                Some((index, stage)) => (index, stage.target),
                None => break,
            };
            let stage_changed = run_state.stage != Some(index);
            if stage_changed {
                info!(
                    "entering stage {}: {} users for {:?}",
                    index + 1,
                    target,
                    run_state.settings.test_plan.stages[index].duration()
                );
                run_state.stage = Some(index);
            }

            let before = run_state.users.len();
            self.adjust_users(run_state, target);
            let active = run_state.users.len();

            let (phase, action) = match active.cmp(&before) {
                std::cmp::Ordering::Greater => {
                    (AttackPhase::Increase, TestPlanStepAction::Increasing)
                }
                std::cmp::Ordering::Less => (AttackPhase::Decrease, TestPlanStepAction::Decreasing),
                std::cmp::Ordering::Equal => {
                    (AttackPhase::Maintain, TestPlanStepAction::Maintaining)
                }
            };
            self.set_attack_phase(run_state, phase);
            if stage_changed || active != before {
                self.history.push(TestPlanHistory::step(
                    action,
                    elapsed,
                    Some(index),
                    target,
                    active,
                ));
            }

            // Never sleep past the end of the test plan.
            let remaining = run_state
                .settings
                .test_plan
                .remaining(run_state.started.elapsed());
            let sleep_duration = run_state.settings.tick.min(remaining);
            run_state.drift_timer =
                util::sleep_minus_drift(sleep_duration, run_state.drift_timer).await;
        }
    }

    // Launch users toward the target, at most `ramp_step` per tick. Users above the
    // target are all retired in the same tick, so the target is never exceeded.
    fn adjust_users(&mut self, run_state: &mut SkeinAttackRunState, target: usize) {
        let active = run_state.users.len();
        let limit = run_state.settings.ramp_step.unwrap_or(usize::MAX);

        if active < target {
            for _ in 0..(target - active).min(limit) {
                self.launch_user(run_state);
            }
        } else if active > target {
            for _ in 0..(active - target) {
                // Retire the most recently launched users first.
                if let Some(user) = run_state.users.pop() {
                    if let Err(e) = user.channel.send(UserCommand::Exit) {
                        debug!("failed to tell user {} to exit: {}", user.number, e);
                    }
                    debug!("retiring user {}", user.number);
                    run_state.retired.push((user.number, user.handle));
                }
            }
            // Forget users that already exited.
            run_state.retired.retain(|(_, handle)| !handle.is_finished());
        }
    }

    fn launch_user(&mut self, run_state: &mut SkeinAttackRunState) {
        run_state.user_counter += 1;
        let number = run_state.user_counter;

        let thread_user = SkeinUser {
            number,
            executor: run_state.executor.clone(),
            collector: run_state.collector.clone(),
            rng: SkeinUser::rng(self.configuration.seed, number),
            pacing: run_state.settings.pacing,
            logger: run_state.all_users_logger_tx.clone(),
            started: run_state.started,
            iterations: run_state.iterations.clone(),
        };

        // Create a per-user channel allowing the scheduler to stop the user.
        let (channel, receiver): (flume::Sender<UserCommand>, flume::Receiver<UserCommand>) =
            flume::unbounded();
        let handle = tokio::spawn(user::user_main(thread_user, receiver));
        run_state.users.push(RunningUser {
            number,
            handle,
            channel,
        });
    }

    // Tell all users to exit and wait for them, aborting any still running when the drain
    // timeout expires. Returns how many users were aborted.
    async fn stop_running_users(&mut self, run_state: &mut SkeinAttackRunState) -> usize {
        info!("stopping after {:?}...", run_state.started.elapsed());
        let mut users: Vec<(usize, tokio::task::JoinHandle<()>)> =
            std::mem::take(&mut run_state.retired);
        for user in std::mem::take(&mut run_state.users) {
            match user.channel.send(UserCommand::Exit) {
                Ok(_) => debug!("telling user {} to exit", user.number),
                Err(e) => info!("failed to tell user {} to exit: {}", user.number, e),
            }
            users.push((user.number, user.handle));
        }
        info!("waiting for {} users to exit", users.len());

        let deadline = tokio::time::Instant::now() + run_state.settings.drain_timeout;
        let mut expired = Vec::new();
        for (number, mut handle) in users {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => (),
                Ok(Err(e)) => warn!("user {} failed: {}", number, e),
                Err(_) => {
                    handle.abort();
                    expired.push(handle);
                }
            }
        }

        // An aborted user's in-flight request is discarded.
        let aborted = futures::future::join_all(expired)
            .await
            .iter()
            .filter(|result| matches!(result, Err(e) if e.is_cancelled()))
            .count();
        if aborted > 0 {
            warn!(
                "aborted {} users still running after drain timeout of {:?}",
                aborted, run_state.settings.drain_timeout
            );
        } else {
            debug!("all users exited");
        }
        aborted
    }

    // If the request logger is enabled, tell it to flush and exit.
    async fn stop_request_logger(&mut self, run_state: &mut SkeinAttackRunState) {
        if let Some(logger_tx) = run_state.all_users_logger_tx.take() {
            if let Err(e) = logger_tx.send(None) {
                warn!("unexpected error telling request logger to exit: {}", e);
            }
        }
        if let Some(logger) = run_state.logger_handle.take() {
            match logger.await {
                Ok(Ok(())) => (),
                Ok(Err(e)) => warn!("request logger failed: {}", e),
                Err(e) => warn!("request logger task failed: {}", e),
            }
        }
    }
}
