//! Issue one request, check the response, and describe what happened.
//!
//! A [`RequestExecutor`] ties together three pluggable parts:
//!  - a [`RequestPool`] of opaque JSON payloads, one picked uniformly at random per
//!    request;
//!  - a [`Transport`] which sends a payload to the target service and returns its status
//!    code, body and latency. [`HttpTransport`] POSTs the payload as JSON with
//!    [`reqwest`](https://docs.rs/reqwest/);
//!  - a [`ResponseValidator`] which decides whether a response counts as a success.
//!    [`QueryResponseValidator`] expects a `200 OK` JSON body without an `error` field.
//!
//! Every call to [`RequestExecutor::execute`] produces exactly one [`RequestOutcome`].
//! Failures never propagate: a transport error or a bad response is simply a failed
//! outcome.

use async_trait::async_trait;
use http::StatusCode;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{fmt, fs};
use url::Url;

use crate::util;
use crate::SkeinError;

/// One payload that can be sent to the target service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestSpec {
    /// Optional human readable name, used in request logs.
    pub name: Option<String>,
    /// The JSON body sent to the target.
    pub payload: Value,
}
impl RequestSpec {
    /// An anonymous request.
    pub fn new(payload: Value) -> RequestSpec {
        RequestSpec {
            name: None,
            payload,
        }
    }

    /// A named request.
    pub fn named(name: &str, payload: Value) -> RequestSpec {
        RequestSpec {
            name: Some(name.to_string()),
            payload,
        }
    }

    /// The request name if set, otherwise a truncated copy of the payload.
    pub fn label(&self) -> String {
        match self.name.as_ref() {
            Some(name) => name.to_string(),
            None => util::truncate_string(&self.payload.to_string(), 48),
        }
    }
}

/// A non-empty, immutable pool of [`RequestSpec`]s shared by every virtual user.
#[derive(Clone, Debug)]
pub struct RequestPool {
    specs: Arc<Vec<RequestSpec>>,
}
impl RequestPool {
    /// Build a pool, failing if no requests are provided.
    pub fn new(specs: Vec<RequestSpec>) -> Result<RequestPool, SkeinError> {
        if specs.is_empty() {
            return Err(SkeinError::NoRequests {
                detail: "at least one request must be defined".to_string(),
            });
        }
        Ok(RequestPool {
            specs: Arc::new(specs),
        })
    }

    /// Load a pool from a JSON array, each element is one request payload.
    ///
    /// # Example
    /// ```rust
    /// use skein::request::RequestPool;
    ///
    /// let pool = RequestPool::from_json(r#"[{"sql": "SELECT 1", "args": []}]"#).unwrap();
    /// assert_eq!(pool.len(), 1);
    /// ```
    pub fn from_json(json: &str) -> Result<RequestPool, SkeinError> {
        let payloads: Vec<Value> = serde_json::from_str(json)?;
        RequestPool::new(payloads.into_iter().map(RequestSpec::new).collect())
    }

    /// Load a pool from a file containing a JSON array of payloads.
    pub fn from_file(path: &str) -> Result<RequestPool, SkeinError> {
        let json = fs::read_to_string(path).map_err(|e| SkeinError::InvalidOption {
            option: "--requests".to_string(),
            value: path.to_string(),
            detail: format!("failed to read requests file: {}", e),
        })?;
        RequestPool::from_json(&json).map_err(|e| match e {
            SkeinError::Serde(e) => SkeinError::InvalidOption {
                option: "--requests".to_string(),
                value: path.to_string(),
                detail: format!("requests file must contain a JSON array: {}", e),
            },
            other => other,
        })
    }

    /// The default workload: five read-only SQL queries.
    pub fn default_queries() -> Vec<RequestSpec> {
        vec![
            RequestSpec::named(
                "customers",
                json!({"sql": "SELECT * FROM Customers", "args": []}),
            ),
            RequestSpec::named(
                "products",
                json!({"sql": "SELECT * FROM Products", "args": []}),
            ),
            RequestSpec::named("orders", json!({"sql": "SELECT * FROM Orders", "args": []})),
            RequestSpec::named(
                "customer by id",
                json!({"sql": "SELECT * FROM Customers WHERE ID = ?", "args": [1]}),
            ),
            RequestSpec::named(
                "order count",
                json!({"sql": "SELECT COUNT(*) FROM Orders", "args": []}),
            ),
        ]
    }

    /// Pick one request uniformly at random, with replacement.
    pub fn choose<R: Rng>(&self, rng: &mut R) -> &RequestSpec {
        &self.specs[rng.random_range(0..self.specs.len())]
    }

    /// How many requests are in the pool.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// A pool is never empty, this exists for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// All requests in the pool.
    pub fn specs(&self) -> &[RequestSpec] {
        &self.specs
    }
}

/// What the target returned.
#[derive(Clone, Debug)]
pub struct TransportResponse {
    /// HTTP status code, or the protocol's equivalent.
    pub status: u16,
    /// The full response body.
    pub body: String,
    /// Time between sending the request and receiving the full response, as measured by
    /// the transport.
    pub latency: Duration,
}

/// A request that never produced a response: connection refused, timeout, etc.
#[derive(Clone, Debug)]
pub struct TransportError {
    /// What went wrong.
    pub detail: String,
}
impl TransportError {
    pub fn new(detail: &str) -> TransportError {
        TransportError {
            detail: detail.to_string(),
        }
    }
}
impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "transport error: {}", self.detail)
    }
}
impl std::error::Error for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> TransportError {
        let kind = if err.is_timeout() {
            "timeout"
        } else if err.is_connect() {
            "connect"
        } else if err.is_body() || err.is_decode() {
            "body"
        } else {
            "request"
        };
        TransportError {
            detail: format!("{}: {}", kind, err),
        }
    }
}

/// The request-issuing capability: send one payload, return one response.
///
/// Implementations must not retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &RequestSpec) -> Result<TransportResponse, TransportError>;
}

/// POST each payload as JSON to a single endpoint.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: Url,
}
impl HttpTransport {
    /// Build a transport sending to `host` joined with `path`, for example
    /// `http://localhost:8080` and `/query`.
    pub fn new(host: &str, path: &str, timeout: Duration) -> Result<HttpTransport, SkeinError> {
        let base = util::is_valid_host(host)?;
        let url = base.join(path).map_err(|parse_error| SkeinError::InvalidHost {
            host: format!("{}{}", host, path),
            detail: "Invalid request path.".to_string(),
            parse_error,
        })?;
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(HttpTransport { client, url })
    }

    /// The endpoint every request is sent to.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &RequestSpec) -> Result<TransportResponse, TransportError> {
        let started = Instant::now();
        let response = self
            .client
            .post(self.url.clone())
            .json(&request.payload)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(TransportResponse {
            status,
            body,
            latency: started.elapsed(),
        })
    }
}

/// Why a request failed.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumIter,
    strum_macros::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FailureKind {
    /// No response was received.
    Transport,
    /// The response status code was not acceptable.
    Status,
    /// The response body could not be parsed.
    Parse,
    /// The target reported an error in an otherwise valid response.
    Application,
}

/// A failed validation.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestFailure {
    pub kind: FailureKind,
    pub detail: String,
}
impl RequestFailure {
    pub fn new(kind: FailureKind, detail: String) -> RequestFailure {
        RequestFailure { kind, detail }
    }
}

/// Decides whether a response counts as a success.
pub trait ResponseValidator: Send + Sync {
    fn validate(&self, response: &TransportResponse) -> Result<(), RequestFailure>;
}

/// Accepts `200 OK` responses whose JSON body has no truthy `error` field.
///
/// A body that isn't valid JSON is a failure.
///
/// # Example
/// ```rust
/// use skein::request::{FailureKind, QueryResponseValidator, ResponseValidator, TransportResponse};
/// use std::time::Duration;
///
/// let response = TransportResponse {
///     status: 200,
///     body: r#"{"columns": [], "rows": [], "error": "table not found"}"#.to_string(),
///     latency: Duration::from_millis(5),
/// };
/// let failure = QueryResponseValidator.validate(&response).unwrap_err();
/// assert_eq!(failure.kind, FailureKind::Application);
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct QueryResponseValidator;
impl ResponseValidator for QueryResponseValidator {
    fn validate(&self, response: &TransportResponse) -> Result<(), RequestFailure> {
        if response.status != StatusCode::OK.as_u16() {
            let detail = match StatusCode::from_u16(response.status) {
                Ok(status) => status.to_string(),
                Err(_) => response.status.to_string(),
            };
            return Err(RequestFailure::new(FailureKind::Status, detail));
        }

        let body: Value = serde_json::from_str(&response.body).map_err(|e| {
            RequestFailure::new(FailureKind::Parse, format!("invalid response body: {}", e))
        })?;

        match body.get("error") {
            Some(error) if is_truthy(error) => {
                let message = match error {
                    Value::String(message) => message.to_string(),
                    other => other.to_string(),
                };
                Err(RequestFailure::new(
                    FailureKind::Application,
                    format!("application error: {}", message),
                ))
            }
            _ => Ok(()),
        }
    }
}

// Null, false, zero and the empty string don't indicate an error.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// The result of one request/check cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestOutcome {
    /// Name of the request that was sent.
    pub name: String,
    /// Whether the request succeeded.
    pub success: bool,
    /// Wall-clock time from just before the request was issued until the response or the
    /// failure.
    pub latency: Duration,
    /// Latency reported by the transport, if a response was received.
    pub transport_latency: Option<Duration>,
    /// Why the request failed.
    pub failure: Option<FailureKind>,
    /// Details about the failure.
    pub error_detail: Option<String>,
}
impl RequestOutcome {
    pub(crate) fn success(name: String, latency: Duration, transport_latency: Duration) -> Self {
        RequestOutcome {
            name,
            success: true,
            latency,
            transport_latency: Some(transport_latency),
            failure: None,
            error_detail: None,
        }
    }

    pub(crate) fn failure(
        name: String,
        latency: Duration,
        transport_latency: Option<Duration>,
        failure: RequestFailure,
    ) -> Self {
        RequestOutcome {
            name,
            success: false,
            latency,
            transport_latency,
            failure: Some(failure.kind),
            error_detail: Some(failure.detail),
        }
    }
}

/// Performs one request, validates the response and returns the outcome.
#[derive(Clone)]
pub struct RequestExecutor {
    pool: RequestPool,
    transport: Arc<dyn Transport>,
    validator: Arc<dyn ResponseValidator>,
}
impl RequestExecutor {
    pub fn new(
        pool: RequestPool,
        transport: Arc<dyn Transport>,
        validator: Arc<dyn ResponseValidator>,
    ) -> RequestExecutor {
        RequestExecutor {
            pool,
            transport,
            validator,
        }
    }

    /// Select a request, send it, and check the response.
    pub async fn execute<R: Rng + Send>(&self, rng: &mut R) -> RequestOutcome {
        let request = self.pool.choose(rng);
        let name = request.label();

        let started = Instant::now();
        let result = self.transport.send(request).await;
        let latency = started.elapsed();

        match result {
            Ok(response) => match self.validator.validate(&response) {
                Ok(()) => RequestOutcome::success(name, latency, response.latency),
                Err(failure) => {
                    debug!("{} failed: {}", name, failure.detail);
                    RequestOutcome::failure(name, latency, Some(response.latency), failure)
                }
            },
            Err(e) => {
                debug!("{} failed: {}", name, e);
                RequestOutcome::failure(
                    name,
                    latency,
                    None,
                    RequestFailure::new(FailureKind::Transport, e.to_string()),
                )
            }
        }
    }
}

impl fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("pool", &self.pool)
            .finish()
    }
}
