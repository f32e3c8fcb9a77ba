/// Validate the request log in each format, and the JSON report file.
use serial_test::serial;
use std::fmt;

mod common;

use skein::prelude::*;

// There are multiple test variations in this file.
#[derive(Clone, Copy)]
enum TestType {
    Json,
    Csv,
    Raw,
}

// Implement fmt::Display for TestType to uniquely name the log files generated
// by each test.
impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let printable = match *self {
            TestType::Json => "json",
            TestType::Csv => "csv",
            TestType::Raw => "raw",
        };
        write!(f, "{}", printable)
    }
}

// Run a load test writing a request log in the given format, then validate the log.
fn run_request_log_test(test_type: TestType) {
    let request_log = format!("requests-{}.log", test_type);
    let format = test_type.to_string();
    common::cleanup_files(vec![&request_log]);

    let configuration = common::build_stub_configuration(vec![
        "--request-log",
        &request_log,
        "--request-format",
        &format,
    ]);
    let report = common::run_load_test(
        common::build_load_test(configuration).set_transport(common::Alternating::default()),
    );
    assert!(report.total_requests > 0);

    let log = std::fs::read_to_string(&request_log).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    match test_type {
        TestType::Json => {
            assert_eq!(lines.len(), report.total_requests as usize);
            let mut failures = 0;
            for line in &lines {
                let entry: serde_json::Value = serde_json::from_str(line).unwrap();
                assert!(entry["user"].as_u64().unwrap() >= 1);
                if entry["success"] == false {
                    assert_eq!(entry["failure"], "status");
                    failures += 1;
                }
            }
            assert_eq!(failures, report.failures[&FailureKind::Status]);
        }
        TestType::Csv => {
            // One header line, then one line per request.
            assert_eq!(lines.len(), report.total_requests as usize + 1);
            assert_eq!(lines[0], "elapsed,user,name,success,latency,failure,error");
            assert!(lines[1..].iter().any(|line| line.contains(",false,")
                && line.ends_with(",status,500 Internal Server Error")));
        }
        TestType::Raw => {
            assert_eq!(lines.len(), report.total_requests as usize);
            assert!(lines.iter().all(|line| line.starts_with("RequestLogEntry {")));
        }
    }
    assert_eq!(common::file_length(&request_log), lines.len());

    common::cleanup_files(vec![&request_log]);
}

#[test]
#[serial]
fn request_log_json() {
    run_request_log_test(TestType::Json);
}

#[test]
#[serial]
fn request_log_csv() {
    run_request_log_test(TestType::Csv);
}

#[test]
#[serial]
fn request_log_raw() {
    run_request_log_test(TestType::Raw);
}

#[test]
#[serial]
/// The JSON report holds the same totals as the returned report.
fn report_file() {
    const REPORT_FILE: &str = "report-file.json";
    common::cleanup_files(vec![REPORT_FILE]);

    let configuration = common::build_stub_configuration(vec![
        "--report-file",
        REPORT_FILE,
        "--threshold",
        "errors:rate<0.1",
    ]);
    let report = common::run_load_test(
        common::build_load_test(configuration).set_transport(common::Alternating::default()),
    );

    let json = std::fs::read_to_string(REPORT_FILE).unwrap();
    common::cleanup_files(vec![REPORT_FILE]);
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();

    assert_eq!(value["total_requests"], report.total_requests);
    assert_eq!(value["iterations"], report.iterations);
    assert_eq!(value["passed"], false);
    assert_eq!(value["thresholds"][0]["rule"], "errors:rate<0.1");
    assert_eq!(value["thresholds"][0]["verdict"], "fail");
    assert_eq!(value["history"].as_array().unwrap().len(), report.history.len());
    assert_eq!(
        value["metrics"]["metrics"]["errors"]["type"],
        serde_json::Value::from("rate")
    );
}
