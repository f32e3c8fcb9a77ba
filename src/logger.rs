//! Optional request log.
//!
//! The request log is enabled with the `--request-log` command-line option, or the
//! [`SkeinDefault::RequestLog`](../config/enum.SkeinDefault.html#variant.RequestLog)
//! default configuration option. When enabled, a logger task is launched and every
//! virtual user sends one [`RequestLogEntry`] per request through an unbounded
//! [`flume`](https://docs.rs/flume/) channel. The logger task writes entries with Tokio's
//! asynchronous [`BufWriter`](https://docs.rs/tokio/*/tokio/io/struct.BufWriter.html),
//! so users never wait on disk io.
//!
//! The format is configured with `--request-format`:
//!  - `json` (default): one JSON object per line;
//!  - `csv`: a header line, then one comma separated line per request;
//!  - `raw`: the Rust debug representation of each entry.

use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::request::{FailureKind, RequestOutcome};
use crate::SkeinError;

/// Handle of the logger task, if enabled.
pub(crate) type SkeinLoggerJoinHandle = Option<tokio::task::JoinHandle<Result<(), SkeinError>>>;
/// Sender used by virtual users to reach the logger task, if enabled. Sending `None`
/// tells the logger task to flush and exit.
pub(crate) type SkeinLoggerTx = Option<flume::Sender<Option<RequestLogEntry>>>;

/// Supported request log formats.
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
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SkeinLogFormat {
    #[default]
    Json,
    Csv,
    Raw,
}

/// One line of the request log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestLogEntry {
    /// Milliseconds since the load test started.
    pub elapsed: u64,
    /// Which virtual user sent the request.
    pub user: usize,
    /// Name of the request.
    pub name: String,
    pub success: bool,
    /// Wall-clock latency in milliseconds.
    pub latency: f64,
    pub failure: Option<FailureKind>,
    pub error: Option<String>,
}
impl RequestLogEntry {
    pub(crate) fn new(elapsed: u64, user: usize, outcome: &RequestOutcome) -> RequestLogEntry {
        RequestLogEntry {
            elapsed,
            user,
            name: outcome.name.to_string(),
            success: outcome.success,
            latency: outcome.latency.as_secs_f64() * 1_000.0,
            failure: outcome.failure,
            error: outcome.error_detail.clone(),
        }
    }

    /// The csv header matching [`RequestLogEntry::format`] with [`SkeinLogFormat::Csv`].
    pub fn csv_header() -> &'static str {
        "elapsed,user,name,success,latency,failure,error"
    }

    /// Format the entry as a single line, without the line feed.
    pub fn format(&self, format: SkeinLogFormat) -> String {
        match format {
            SkeinLogFormat::Json => serde_json::to_string(self).unwrap_or_else(|e| {
                warn!("failed to serialize request log entry: {}", e);
                String::new()
            }),
            SkeinLogFormat::Csv => format!(
                "{},{},{},{},{:.3},{},{}",
                self.elapsed,
                self.user,
                csv_field(&self.name),
                self.success,
                self.latency,
                self.failure.map(|f| f.to_string()).unwrap_or_default(),
                csv_field(self.error.as_deref().unwrap_or_default()),
            ),
            SkeinLogFormat::Raw => format!("{:?}", self),
        }
    }
}

// Quote fields containing separators, quotes or line breaks.
fn csv_field(value: &str) -> String {
    if value.contains(|c| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Open the request log and launch the logger task, if a request log is configured.
pub(crate) async fn setup_request_logger(
    path: &str,
    format: SkeinLogFormat,
) -> Result<(SkeinLoggerJoinHandle, SkeinLoggerTx), SkeinError> {
    if path.is_empty() {
        return Ok((None, None));
    }

    let file = File::create(path)
        .await
        .map_err(|e| SkeinError::InvalidOption {
            option: "--request-log".to_string(),
            value: path.to_string(),
            detail: format!("failed to create request log: {}", e),
        })?;
    info!("writing requests to request_log: {}", path);

    let (all_users_tx, logger_rx): (
        flume::Sender<Option<RequestLogEntry>>,
        flume::Receiver<Option<RequestLogEntry>>,
    ) = flume::unbounded();
    let handle = tokio::spawn(logger_main(
        BufWriter::with_capacity(64 * 1024, file),
        format,
        logger_rx,
    ));
    Ok((Some(handle), Some(all_users_tx)))
}

// Logger task, writes entries until receiving `None` or until every sender is dropped.
async fn logger_main(
    mut file: BufWriter<File>,
    format: SkeinLogFormat,
    receiver: flume::Receiver<Option<RequestLogEntry>>,
) -> Result<(), SkeinError> {
    if format == SkeinLogFormat::Csv {
        file.write_all(format!("{}\n", RequestLogEntry::csv_header()).as_bytes())
            .await?;
    }

    while let Ok(Some(entry)) = receiver.recv_async().await {
        file.write_all(format!("{}\n", entry.format(format)).as_bytes())
            .await?;
    }

    file.flush().await?;
    debug!("request log flushed");
    Ok(())
}
