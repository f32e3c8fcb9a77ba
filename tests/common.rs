use async_trait::async_trait;
use gumdrop::Options;
use httpmock::MockServer;
use std::io::{self, BufRead};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use skein::prelude::*;

/// Not all functions are used by all tests, so we enable allow(dead_code) to avoid
/// compiler warnings during testing.

/// Host used when requests never leave the process.
#[allow(dead_code)]
pub const STUB_HOST: &str = "http://127.0.0.1:8080";

/// The following options are configured by default, if not set to a custom value:
///  --host <mock-server>
///  --test-plan 2,1s
///  --pacing 50ms
///  --drain-timeout 2s
///  --no-print-metrics
#[allow(dead_code)]
pub fn build_configuration(server: &MockServer, custom: Vec<&str>) -> SkeinConfiguration {
    // Declare server_url here no matter what, so its lifetime is sufficient when needed.
    let server_url = server.base_url();
    configuration_with_host(&server_url, custom)
}

/// Build a configuration for load tests using a stub transport.
#[allow(dead_code)]
pub fn build_stub_configuration(custom: Vec<&str>) -> SkeinConfiguration {
    configuration_with_host(STUB_HOST, custom)
}

fn configuration_with_host(host: &str, custom: Vec<&str>) -> SkeinConfiguration {
    // Merge in all custom options first.
    let mut configuration: Vec<&str> = custom;

    if !configuration.contains(&"--host") {
        configuration.extend_from_slice(&["--host", host]);
    }

    // Default to holding 2 users for 1 second if not otherwise configured.
    if !configuration.contains(&"--test-plan") {
        configuration.extend_from_slice(&["--test-plan", "2,1s"]);
    }

    if !configuration.contains(&"--pacing") {
        configuration.extend_from_slice(&["--pacing", "50ms"]);
    }

    if !configuration.contains(&"--drain-timeout") {
        configuration.extend_from_slice(&["--drain-timeout", "2s"]);
    }

    if !configuration.contains(&"--no-print-metrics") {
        configuration.push("--no-print-metrics");
    }

    // Parse these options to generate a SkeinConfiguration.
    SkeinConfiguration::parse_args_default(&configuration)
        .expect("failed to parse options and generate a configuration")
}

/// Create a SkeinAttack from the configuration, using the default query pool.
#[allow(dead_code)]
pub fn build_load_test(configuration: SkeinConfiguration) -> SkeinAttack {
    SkeinAttack::initialize_with_config(configuration)
        .unwrap()
        .register_requests(RequestPool::default_queries())
}

/// Run the actual load test, returning the RunReport.
#[allow(dead_code)]
pub fn run_load_test(skein_attack: SkeinAttack) -> RunReport {
    skein_attack.execute().unwrap()
}

/// Counters shared between a stub transport and the test that installed it.
#[derive(Debug, Default)]
pub struct StubState {
    /// Requests sent.
    pub requests: AtomicUsize,
    in_flight: AtomicUsize,
    /// The most requests ever in flight at the same time.
    pub max_in_flight: AtomicUsize,
}
impl StubState {
    fn begin(&self) -> usize {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        self.requests.fetch_add(1, Ordering::SeqCst)
    }

    fn end(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Answers every request successfully after a fixed latency.
#[derive(Clone, Debug)]
pub struct FixedLatency {
    pub latency: Duration,
    pub state: Arc<StubState>,
}
#[allow(dead_code)]
impl FixedLatency {
    pub fn new(latency: Duration) -> FixedLatency {
        FixedLatency {
            latency,
            state: Arc::new(StubState::default()),
        }
    }
}
#[async_trait]
impl Transport for FixedLatency {
    async fn send(&self, _request: &RequestSpec) -> Result<TransportResponse, TransportError> {
        self.state.begin();
        tokio::time::sleep(self.latency).await;
        self.state.end();
        Ok(TransportResponse {
            status: 200,
            body: r#"{"rows":[]}"#.to_string(),
            latency: self.latency,
        })
    }
}

/// Fails every other request with a server error.
#[derive(Clone, Debug, Default)]
pub struct Alternating {
    pub state: Arc<StubState>,
}
#[async_trait]
impl Transport for Alternating {
    async fn send(&self, _request: &RequestSpec) -> Result<TransportResponse, TransportError> {
        let request = self.state.begin();
        self.state.end();
        let status = if request % 2 == 0 { 200 } else { 500 };
        Ok(TransportResponse {
            status,
            body: r#"{"rows":[]}"#.to_string(),
            latency: Duration::from_millis(1),
        })
    }
}

/// Helper to count the number of lines in a test artifact.
#[allow(dead_code)]
pub fn file_length(file_name: &str) -> usize {
    if let Ok(file) = std::fs::File::open(std::path::Path::new(file_name)) {
        io::BufReader::new(file).lines().count()
    } else {
        0
    }
}

/// Helper to delete test artifacts, if existing.
#[allow(dead_code)]
pub fn cleanup_files(files: Vec<&str>) {
    for file in files {
        if std::path::Path::new(file).exists() {
            std::fs::remove_file(file).expect("failed to remove file");
        }
    }
}
