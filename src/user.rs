use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{self, Duration};

use crate::logger::{RequestLogEntry, SkeinLoggerTx};
use crate::metrics::MetricCollector;
use crate::request::RequestExecutor;

// Never sleep more than 500 milliseconds, so a sleeping user notices quickly that it was
// told to exit.
const MAXIMUM_SLEEP_MS: u64 = 500;

/// Commands sent from the scheduler to a running virtual user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum UserCommand {
    /// Finish the current iteration and exit.
    Exit,
}

/// Everything one virtual user needs to generate load.
pub(crate) struct SkeinUser {
    /// Unique, increasing number assigned when the user is launched.
    pub(crate) number: usize,
    pub(crate) executor: RequestExecutor,
    pub(crate) collector: Arc<MetricCollector>,
    pub(crate) rng: StdRng,
    /// Pause after each iteration.
    pub(crate) pacing: Duration,
    pub(crate) logger: SkeinLoggerTx,
    /// When the load test started, for request log timestamps.
    pub(crate) started: time::Instant,
    /// Completed iterations across all users.
    pub(crate) iterations: Arc<AtomicUsize>,
}
impl SkeinUser {
    /// Seeded users select requests deterministically, each with its own stream.
    pub(crate) fn rng(seed: Option<u64>, number: usize) -> StdRng {
        match seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(number as u64)),
            None => StdRng::from_os_rng(),
        }
    }
}

pub(crate) async fn user_main(mut user: SkeinUser, receiver: flume::Receiver<UserCommand>) {
    debug!("launching user {}...", user.number);

    'iterations: loop {
        if received_exit(&receiver) {
            break 'iterations;
        }

        let outcome = user.executor.execute(&mut user.rng).await;

        // Outcomes are recorded before the next iteration starts, an aborted user never
        // leaves a partial record behind.
        user.collector.record(&outcome);
        user.iterations.fetch_add(1, Ordering::SeqCst);
        if let Some(logger) = user.logger.as_ref() {
            let elapsed = user.started.elapsed().as_millis() as u64;
            if let Err(e) = logger.send(Some(RequestLogEntry::new(elapsed, user.number, &outcome)))
            {
                debug!("user {} failed to send request log entry: {}", user.number, e);
            }
        }

        if received_exit(&receiver) {
            break 'iterations;
        }

        if user.pacing.is_zero() {
            tokio::task::yield_now().await;
            continue;
        }

        let mut wait_time = user.pacing.as_millis() as u64;
        while wait_time > 0 {
            if received_exit(&receiver) {
                break 'iterations;
            }
            let sleep_duration = wait_time.min(MAXIMUM_SLEEP_MS);
            wait_time -= sleep_duration;
            tokio::time::sleep(Duration::from_millis(sleep_duration)).await;
        }
    }

    debug!("exiting user {}...", user.number);
}

// Determine if the scheduler has sent a UserCommand::Exit message. A disconnected channel
// also means the scheduler is gone.
fn received_exit(receiver: &flume::Receiver<UserCommand>) -> bool {
    loop {
        match receiver.try_recv() {
            Ok(UserCommand::Exit) => return true,
            Err(flume::TryRecvError::Disconnected) => return true,
            Err(flume::TryRecvError::Empty) => return false,
        }
    }
}
