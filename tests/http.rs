/// Validate requests sent by the default HTTP transport, and how responses are judged.
use httpmock::{Method::POST, Mock, MockServer};
use serde_json::json;
use serial_test::serial;

mod common;

use skein::prelude::*;

// The default request path.
const QUERY_PATH: &str = "/query";

// Every request is a JSON POST to the query path.
fn setup_mock_server_endpoint<'a>(
    server: &'a MockServer,
    path: &str,
    status: u16,
    body: &str,
) -> Mock<'a> {
    server.mock(|when, then| {
        when.method(POST)
            .path(path)
            .header("content-type", "application/json");
        then.status(status)
            .header("content-type", "application/json")
            .body(body);
    })
}

// Run a short load test against the mock server.
fn run_against(server: &MockServer, custom: Vec<&str>) -> RunReport {
    let configuration = common::build_configuration(server, custom);
    common::run_load_test(common::build_load_test(configuration))
}

#[test]
#[serial]
/// Successful queries pass every threshold.
fn successful_queries() {
    let server = MockServer::start();
    let mock_endpoint = setup_mock_server_endpoint(
        &server,
        QUERY_PATH,
        200,
        r#"{"columns": ["id"], "rows": [[1], [2]]}"#,
    );

    let report = run_against(
        &server,
        vec![
            "--threshold",
            "errors:rate<0.1",
            "--threshold",
            "http_req_duration:p(95)<500",
            "--threshold",
            "http_reqs:count>0",
        ],
    );

    assert!(mock_endpoint.hits() > 0);
    assert_eq!(mock_endpoint.hits(), report.total_requests as usize);
    assert_eq!(report.error_rate, 0.0);
    assert!(report.errors.is_empty());
    assert!(report.passed);
}

#[test]
#[serial]
/// The request path is configurable.
fn custom_path() {
    let server = MockServer::start();
    let mock_endpoint = setup_mock_server_endpoint(&server, "/sql", 200, r#"{"rows": []}"#);

    let report = run_against(&server, vec!["--path", "/sql"]);

    assert!(mock_endpoint.hits() > 0);
    assert_eq!(mock_endpoint.hits(), report.total_requests as usize);
    assert_eq!(report.error_rate, 0.0);
}

#[test]
#[serial]
/// Non-200 responses are status failures.
fn server_errors() {
    let server = MockServer::start();
    let mock_endpoint =
        setup_mock_server_endpoint(&server, QUERY_PATH, 500, r#"{"error": "overloaded"}"#);

    let report = run_against(&server, vec!["--threshold", "errors:rate<0.1"]);

    let hits = mock_endpoint.hits() as u64;
    assert!(hits > 0);
    assert_eq!(report.error_rate, 1.0);
    assert_eq!(report.failures.get(&FailureKind::Status), Some(&hits));
    assert_eq!(
        report.errors.get("500 Internal Server Error"),
        Some(&(hits as usize))
    );
    assert!(!report.passed);
}

#[test]
#[serial]
/// A truthy error field in an otherwise valid response is an application failure.
fn application_errors() {
    let server = MockServer::start();
    let mock_endpoint = setup_mock_server_endpoint(
        &server,
        QUERY_PATH,
        200,
        r#"{"columns": [], "rows": [], "error": "Table ORDERS not found"}"#,
    );

    let report = run_against(&server, vec![]);

    let hits = mock_endpoint.hits() as u64;
    assert!(hits > 0);
    assert_eq!(report.failures.get(&FailureKind::Application), Some(&hits));
    assert_eq!(report.failures.get(&FailureKind::Parse), Some(&0));
    assert!(report
        .errors
        .contains_key("application error: Table ORDERS not found"));
    // Without thresholds, the load test passes.
    assert!(report.passed);
}

#[test]
#[serial]
/// A body that isn't JSON is a parse failure, kept apart from application failures.
fn parse_errors() {
    let server = MockServer::start();
    let mock_endpoint = setup_mock_server_endpoint(&server, QUERY_PATH, 200, "<html></html>");

    let report = run_against(&server, vec!["--threshold", "errors:rate<0.1"]);

    let hits = mock_endpoint.hits() as u64;
    assert!(hits > 0);
    assert_eq!(report.failures.get(&FailureKind::Parse), Some(&hits));
    assert_eq!(report.failures.get(&FailureKind::Application), Some(&0));
    assert!(!report.passed);
}

#[test]
#[serial]
/// Requests loaded from a file replace the registered requests.
fn requests_file() {
    const REQUESTS_FILE: &str = "http-requests-file.json";
    const REQUEST_LOG: &str = "http-requests-file.log";
    common::cleanup_files(vec![REQUESTS_FILE, REQUEST_LOG]);
    std::fs::write(
        REQUESTS_FILE,
        json!([{"sql": "SELECT 1", "args": []}]).to_string(),
    )
    .unwrap();

    let server = MockServer::start();
    let mock_endpoint = setup_mock_server_endpoint(&server, QUERY_PATH, 200, r#"{"rows": []}"#);

    let report = run_against(
        &server,
        vec!["--requests", REQUESTS_FILE, "--request-log", REQUEST_LOG],
    );

    let log = std::fs::read_to_string(REQUEST_LOG).unwrap();
    common::cleanup_files(vec![REQUESTS_FILE, REQUEST_LOG]);

    assert!(mock_endpoint.hits() > 0);
    assert!(report.errors.is_empty());
    // Unnamed requests are labeled with their payload.
    assert!(log.contains("SELECT 1"));
    assert!(!log.contains("customers"));
}

#[tokio::test]
/// The HTTP transport reports connection failures as transport errors.
async fn connection_refused() {
    let transport =
        HttpTransport::new("http://127.0.0.1:1", QUERY_PATH, std::time::Duration::from_secs(1))
            .unwrap();
    assert_eq!(transport.url().as_str(), "http://127.0.0.1:1/query");

    let request = RequestSpec::named("ping", json!({"query": "SELECT 1"}));
    let error = transport.send(&request).await.unwrap_err();
    assert!(error.to_string().starts_with("transport error:"));
}
