//! Test plan structures and functions.
//!
//! Internally, Skein represents every load test as an ordered series of [`Stage`]s, each
//! holding a constant target number of virtual users for a fixed amount of time. The
//! scheduler in [`SkeinAttack`](../struct.SkeinAttack.html) walks the stages in order and
//! launches or retires users until the active population matches the current target.

use chrono::prelude::*;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::util;
use crate::SkeinError;

lazy_static! {
    // Each stage of the test plan must be in the format "{users},{timespan}", white space
    // is ignored.
    static ref STAGE: Regex = Regex::new(r"^\s*(\d+)\s*,\s*([0-9hms]+)\s*$")
        .expect("test plan regex is valid");
}

/// A single step of a [`TestPlan`]: hold `target` users for `duration_ms` milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// How many virtual users should be running during this stage.
    pub target: usize,
    /// How long this stage lasts, in milliseconds.
    pub duration_ms: usize,
}
impl Stage {
    /// Create a new stage.
    ///
    /// # Example
    /// ```rust
    /// use skein::test_plan::Stage;
    /// use std::time::Duration;
    ///
    /// let stage = Stage::new(10, Duration::from_secs(30));
    /// assert_eq!(stage.duration_ms, 30_000);
    /// ```
    pub fn new(target: usize, duration: Duration) -> Stage {
        Stage {
            target,
            duration_ms: duration.as_millis() as usize,
        }
    }

    /// How long this stage lasts.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms as u64)
    }
}

/// An ordered sequence of [`Stage`]s, consumed strictly in order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestPlan {
    /// The stages, in the order they run.
    pub stages: Vec<Stage>,
}

impl TestPlan {
    /// Build a test plan from a list of stages.
    pub fn new(stages: Vec<Stage>) -> TestPlan {
        TestPlan { stages }
    }

    /// A test plan is runnable when it has at least one stage, and every stage lasts
    /// longer than zero milliseconds.
    pub fn validate(&self) -> Result<(), SkeinError> {
        if self.stages.is_empty() {
            return Err(SkeinError::InvalidTestPlan {
                value: self.to_string(),
                detail: "test plan must contain at least one stage".to_string(),
            });
        }
        if let Some((index, _)) = self
            .stages
            .iter()
            .enumerate()
            .find(|(_, stage)| stage.duration_ms == 0)
        {
            return Err(SkeinError::InvalidTestPlan {
                value: self.to_string(),
                detail: format!("stage {} must have a duration greater than zero", index + 1),
            });
        }
        Ok(())
    }

    /// The sum of all stage durations: the load test ends when this much time elapses.
    pub fn total_duration(&self) -> Duration {
        Duration::from_millis(self.stages.iter().map(|s| s.duration_ms as u64).sum())
    }

    /// Returns the index and the stage that is running after `elapsed` time, or `None` once
    /// every stage has finished.
    ///
    /// Stage `n` covers the half-open interval starting where stage `n - 1` ended.
    ///
    /// # Example
    /// ```rust
    /// use skein::test_plan::TestPlan;
    /// use std::time::Duration;
    ///
    /// let test_plan: TestPlan = "10,2s;0,1s;5,2s".parse().unwrap();
    /// assert_eq!(test_plan.stage_at(Duration::from_millis(1_999)).unwrap().0, 0);
    /// assert_eq!(test_plan.stage_at(Duration::from_millis(2_000)).unwrap().0, 1);
    /// assert!(test_plan.stage_at(Duration::from_secs(5)).is_none());
    /// ```
    pub fn stage_at(&self, elapsed: Duration) -> Option<(usize, &Stage)> {
        let elapsed = elapsed.as_millis();
        let mut stage_ends: u128 = 0;
        for (index, stage) in self.stages.iter().enumerate() {
            stage_ends += stage.duration_ms as u128;
            if elapsed < stage_ends {
                return Some((index, stage));
            }
        }
        None
    }

    /// The target number of users after `elapsed` time, `None` once the plan is finished.
    ///
    /// Within a stage the target is constant: there is no interpolation.
    pub fn target_at(&self, elapsed: Duration) -> Option<usize> {
        self.stage_at(elapsed).map(|(_, stage)| stage.target)
    }

    /// The most users any stage asks for.
    pub fn max_target(&self) -> usize {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    /// How long remains in the plan after `elapsed` time.
    pub(crate) fn remaining(&self, elapsed: Duration) -> Duration {
        self.total_duration().saturating_sub(elapsed)
    }
}

/// Implement [`FromStr`] to convert `"users,timespan"` string formatted test plans to
/// Skein's internal representation.
///
/// Users are represented simply as an integer.
///
/// Time span can be specified as an integer, indicating seconds. Or can use integers together
/// with one or more of "h", "m", "s" and "ms", in that order. Valid formats include: 20, 20s,
/// 3m, 2h, 1h20m, 3h30m10s, 500ms, etc.
impl FromStr for TestPlan {
    type Err = SkeinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut stages: Vec<Stage> = Vec::new();
        // A test plan can have multiple stages split by the semicolon ";".
        for line in s.split(';') {
            let parsed = STAGE.captures(line).and_then(|cap| {
                let target = cap[1].parse::<usize>().ok()?;
                let duration_ms = util::parse_timespan_ms(&cap[2])?;
                Some(Stage {
                    target,
                    duration_ms,
                })
            });
            match parsed {
                Some(stage) => stages.push(stage),
                None => {
                    return Err(SkeinError::InvalidTestPlan {
                        value: line.to_string(),
                        detail: "expected format: \"{users},{timespan};{users},{timespan}\", where {timespan} is integer seconds or \"30s\", \"20m\", \"1h30m\", \"500ms\", etc".to_string(),
                    });
                }
            }
        }
        Ok(TestPlan { stages })
    }
}

/// Format test plans the same way they are parsed, with every timespan in milliseconds.
impl fmt::Display for TestPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stages: Vec<String> = self
            .stages
            .iter()
            .map(|stage| format!("{},{}ms", stage.target, stage.duration_ms))
            .collect();
        write!(f, "{}", stages.join(";"))
    }
}

/// What the scheduler was doing when a [`TestPlanHistory`] entry was recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestPlanStepAction {
    /// Launching users toward a higher target.
    Increasing,
    /// The active population matches the target.
    Maintaining,
    /// Retiring users toward a lower target.
    Decreasing,
    /// The load test was canceled before the plan finished.
    Canceling,
    /// The final step indicating that the load test is finished.
    Finished,
}

/// A historical record of a single scheduler step, included in the run report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestPlanHistory {
    /// What action happened in this step.
    pub action: TestPlanStepAction,
    /// A timestamp of when the step started.
    pub timestamp: DateTime<Utc>,
    /// Milliseconds since the load test started.
    pub elapsed: u64,
    /// Which stage was running, or `None` after the plan finished.
    pub stage: Option<usize>,
    /// The target number of users of the running stage.
    pub target: usize,
    /// The number of active users when the step was recorded.
    pub users: usize,
}
impl TestPlanHistory {
    /// A helper to record a new step in the historical record.
    pub(crate) fn step(
        action: TestPlanStepAction,
        elapsed: Duration,
        stage: Option<usize>,
        target: usize,
        users: usize,
    ) -> TestPlanHistory {
        TestPlanHistory {
            action,
            timestamp: Utc::now(),
            elapsed: elapsed.as_millis() as u64,
            stage,
            target,
            users,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse() {
        let test_plan: TestPlan = "10,2s;0,1s;5,2s".parse().unwrap();
        assert_eq!(
            test_plan.stages,
            vec![
                Stage::new(10, Duration::from_secs(2)),
                Stage::new(0, Duration::from_secs(1)),
                Stage::new(5, Duration::from_secs(2)),
            ]
        );
        assert_eq!(test_plan.total_duration(), Duration::from_secs(5));
        assert_eq!(test_plan.max_target(), 10);

        let test_plan: TestPlan = " 3 , 500ms ".parse().unwrap();
        assert_eq!(test_plan.stages, vec![Stage::new(3, Duration::from_millis(500))]);

        assert!("10".parse::<TestPlan>().is_err());
        assert!("10,".parse::<TestPlan>().is_err());
        assert!("-1,10s".parse::<TestPlan>().is_err());
        assert!("10,30s;".parse::<TestPlan>().is_err());
        assert!("10,abc".parse::<TestPlan>().is_err());
    }

    #[test]
    fn display_round_trips() {
        let test_plan: TestPlan = "10,1m30s;0,250ms".parse().unwrap();
        assert_eq!(test_plan.to_string(), "10,90000ms;0,250ms");
        assert_eq!(test_plan.to_string().parse::<TestPlan>().unwrap(), test_plan);
    }

    #[test]
    fn validate() {
        assert!(TestPlan::default().validate().is_err());
        assert!("10,0".parse::<TestPlan>().unwrap().validate().is_err());
        assert!("10,1s;5,0s".parse::<TestPlan>().unwrap().validate().is_err());
        // A stage with zero users quiesces the load test, and is valid.
        assert!("0,1s".parse::<TestPlan>().unwrap().validate().is_ok());
    }

    #[test]
    fn stage_lookup() {
        let test_plan: TestPlan = "10,2s;0,1s;5,2s".parse().unwrap();
        assert_eq!(test_plan.target_at(Duration::ZERO), Some(10));
        assert_eq!(test_plan.target_at(Duration::from_millis(1_999)), Some(10));
        assert_eq!(test_plan.target_at(Duration::from_millis(2_000)), Some(0));
        assert_eq!(test_plan.target_at(Duration::from_millis(2_999)), Some(0));
        assert_eq!(test_plan.target_at(Duration::from_millis(3_000)), Some(5));
        assert_eq!(test_plan.target_at(Duration::from_millis(4_999)), Some(5));
        assert_eq!(test_plan.target_at(Duration::from_millis(5_000)), None);
        assert_eq!(
            test_plan.remaining(Duration::from_millis(4_000)),
            Duration::from_secs(1)
        );
        assert_eq!(test_plan.remaining(Duration::from_secs(9)), Duration::ZERO);
    }
}
