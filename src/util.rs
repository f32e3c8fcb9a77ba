//! Utility functions used by Skein, and available when embedding a load test.

use lazy_static::lazy_static;
use regex::Regex;
use std::str::FromStr;
use url::Url;

use crate::{SkeinError, CANCELED};

lazy_static! {
    static ref TIMESPAN: Regex = Regex::new(
        r"^((?P<hours>\d+)h)?((?P<minutes>\d+)m)?((?P<seconds>\d+)s)?((?P<millis>\d+)ms)?$"
    )
    .expect("timespan regex is valid");
}

/// Parse a string representing a time span and return the number of milliseconds.
///
/// Can be specified as an integer, indicating seconds. Or can use integers
/// together with one or more of "h", "m", "s" and "ms", in that order, indicating
/// "hours", "minutes", "seconds" and "milliseconds".
///
/// Valid formats include: 20, 20s, 3m, 2h, 1h20m, 3h30m10s, 250ms, 1s500ms, etc.
///
/// Returns `None` if the string can't be parsed.
///
/// # Example
/// ```rust
/// use skein::util;
///
/// // 1 hour 2 minutes and 3 seconds is 3,723,000 milliseconds.
/// assert_eq!(util::parse_timespan_ms("1h2m3s"), Some(3_723_000));
///
/// // An integer is a number of seconds.
/// assert_eq!(util::parse_timespan_ms("45"), Some(45_000));
///
/// // Sub-second pacing.
/// assert_eq!(util::parse_timespan_ms("100ms"), Some(100));
///
/// // Invalid value.
/// assert_eq!(util::parse_timespan_ms("foo"), None);
/// ```
pub fn parse_timespan_ms(time_str: &str) -> Option<usize> {
    let time_str = time_str.trim();
    if time_str.is_empty() {
        return None;
    }

    // If an integer is passed in, assume it's seconds.
    if let Ok(seconds) = usize::from_str(time_str) {
        trace!("{} is integer: {} seconds", time_str, seconds);
        return seconds.checked_mul(1_000);
    }

    let captures = TIMESPAN.captures(time_str)?;
    let unit = |name: &str| -> Option<usize> {
        match captures.name(name) {
            Some(value) => usize::from_str(value.as_str()).ok(),
            None => Some(0),
        }
    };
    let hours = unit("hours")?;
    let minutes = unit("minutes")?;
    let seconds = unit("seconds")?;
    let millis = unit("millis")?;

    let total = hours
        .checked_mul(3_600_000)?
        .checked_add(minutes.checked_mul(60_000)?)?
        .checked_add(seconds.checked_mul(1_000)?)?
        .checked_add(millis)?;
    trace!(
        "{} hours {} minutes {} seconds {} milliseconds: {} ms",
        hours,
        minutes,
        seconds,
        millis,
        total
    );
    Some(total)
}

/// Sleep for a specified duration, minus the time spent doing other things.
///
/// Returns a fresh drift timer to pass into the next call.
///
/// # Example
/// ```rust
/// use skein::util;
///
/// async fn loop_with_delay() {
///     let mut drift_timer = tokio::time::Instant::now();
///     loop {
///         // Do other stuff, which takes a variable amount of time.
///
///         // Sleep for 1 second minus the time spent doing other stuff.
///         drift_timer = util::sleep_minus_drift(
///             std::time::Duration::from_secs(1),
///             drift_timer,
///         ).await;
///         break;
///     }
/// }
/// ```
pub async fn sleep_minus_drift(
    duration: std::time::Duration,
    drift: tokio::time::Instant,
) -> tokio::time::Instant {
    match duration.checked_sub(drift.elapsed()) {
        Some(delay) if delay.as_nanos() > 0 => tokio::time::sleep(delay).await,
        _ => debug!("sleep_minus_drift: drift was greater than or equal to duration, not sleeping"),
    };
    tokio::time::Instant::now()
}

/// Truncate strings when they're too long to display.
///
/// If a string is longer than the specified max length, this function removes extra
/// the characters and replaces the last two with a double-period ellipsis.
///
/// # Example
/// ```rust
/// use skein::util;
///
/// assert_eq!(util::truncate_string("this is a long string", 9), "this is..");
/// assert_eq!(util::truncate_string("shorter string", 15), "shorter string");
/// ```
pub fn truncate_string(str_to_truncate: &str, max_length: usize) -> String {
    if max_length < 2 {
        return str_to_truncate.chars().take(max_length).collect();
    }
    if str_to_truncate.char_indices().count() > max_length {
        match str_to_truncate.char_indices().nth(max_length - 2) {
            None => str_to_truncate.to_string(),
            Some((idx, _)) => format!("{}..", &str_to_truncate[..idx]),
        }
    } else {
        str_to_truncate.to_string()
    }
}

/// Helper function to determine if a host can be parsed.
///
/// # Example
/// ```rust
/// use skein::util;
///
/// assert_eq!(util::is_valid_host("http://localhost:8080").is_ok(), true);
/// assert_eq!(util::is_valid_host("http://127.0.0.1").is_ok(), true);
///
/// // Protocol is required.
/// assert_eq!(util::is_valid_host("localhost:8080/").is_ok(), false);
/// ```
pub fn is_valid_host(host: &str) -> Result<Url, SkeinError> {
    let url = Url::parse(host).map_err(|parse_error| SkeinError::InvalidHost {
        host: host.to_string(),
        detail: "Invalid host.".to_string(),
        parse_error,
    })?;
    // `localhost:8080` parses as a url with the scheme `localhost`.
    if !matches!(url.scheme(), "http" | "https") || !url.has_host() {
        return Err(SkeinError::InvalidOption {
            option: "--host".to_string(),
            value: host.to_string(),
            detail: "host must use the http or https scheme".to_string(),
        });
    }
    Ok(url)
}

/// Returns `true` if ctrl-c was caught since the current load test started.
pub(crate) fn ctrlc_received() -> bool {
    CANCELED.read().map(|canceled| *canceled).unwrap_or(false)
}

// Internal helper to configure the control-c handler. Shutdown cleanly on the first
// ctrl-c. Exit abruptly on the second ctrl-c.
pub(crate) fn setup_ctrlc_handler() {
    match ctrlc::set_handler(move || {
        if ctrlc_received() {
            warn!("caught another ctrl-c, exiting immediately...");
            std::process::exit(1);
        } else {
            warn!("caught ctrl-c, stopping...");
            if let Ok(mut canceled) = CANCELED.write() {
                *canceled = true;
            }
        }
    }) {
        Ok(_) => (),
        Err(e) => {
            // Already installed by an earlier load test in this process.
            if let Ok(mut canceled) = CANCELED.write() {
                *canceled = false;
            }
            debug!("reset ctrl-c handler: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time;

    #[test]
    fn timespan() {
        assert_eq!(parse_timespan_ms("0"), Some(0));
        assert_eq!(parse_timespan_ms("foo"), None);
        assert_eq!(parse_timespan_ms(""), None);
        assert_eq!(parse_timespan_ms("1"), Some(1_000));
        assert_eq!(parse_timespan_ms("1s"), Some(1_000));
        assert_eq!(parse_timespan_ms("1m"), Some(60_000));
        assert_eq!(parse_timespan_ms("61"), Some(61_000));
        assert_eq!(parse_timespan_ms("1m1s"), Some(61_000));
        assert_eq!(parse_timespan_ms("1h"), Some(3_600_000));
        assert_eq!(parse_timespan_ms("1h2m3s"), Some(3_723_000));
        assert_eq!(parse_timespan_ms("100ms"), Some(100));
        assert_eq!(parse_timespan_ms("2s500ms"), Some(2_500));
        assert_eq!(parse_timespan_ms("1m30s250ms"), Some(90_250));
        assert_eq!(parse_timespan_ms(" 30s "), Some(30_000));
        // Units must be in order.
        assert_eq!(parse_timespan_ms("3s1m"), None);
        assert_eq!(parse_timespan_ms("1.5s"), None);
    }

    #[test]
    fn truncate() {
        assert_eq!(
            truncate_string("the quick brown fox", 25),
            "the quick brown fox"
        );
        assert_eq!(truncate_string("the quick brown fox", 10), "the quic..");
        assert_eq!(truncate_string("abcde", 5), "abcde");
        assert_eq!(truncate_string("abcde", 4), "ab..");
        assert_eq!(truncate_string("abcde", 1), "a");
    }

    #[tokio::test]
    async fn drift() {
        let drift_timer = tokio::time::Instant::now();
        tokio::time::sleep(time::Duration::from_millis(50)).await;
        let started = time::Instant::now();
        let _ = sleep_minus_drift(time::Duration::from_millis(100), drift_timer).await;
        // Only the remaining ~50ms are slept.
        assert!(started.elapsed() < time::Duration::from_millis(100));
    }

    #[test]
    fn valid_host() {
        assert!(is_valid_host("http://example.com").is_ok());
        assert!(is_valid_host("http://example.com/").is_ok());
        assert!(is_valid_host("https://example.com/foo").is_ok());
        assert!(is_valid_host("http://127.0.0.1:8080").is_ok());
        assert!(is_valid_host("example.com").is_err());
        assert!(is_valid_host("localhost:8080").is_err());
        assert!(is_valid_host("ftp://example.com").is_err());
    }
}
