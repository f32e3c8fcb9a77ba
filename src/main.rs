use skein::prelude::*;

// The exit status when the load test ran but a threshold failed.
const THRESHOLDS_FAILED: i32 = 99;

fn main() {
    let result = SkeinAttack::initialize()
        .and_then(|attack| {
            attack
                .register_requests(RequestPool::default_queries())
                .set_default(SkeinDefault::Host, "http://localhost:8080")?
                .set_default(SkeinDefault::TestPlan, "10,30s;10,1m;50,30s;50,2m;0,30s")?
                .set_default(SkeinDefault::Threshold, "http_req_duration:p(95)<500")?
                .set_default(SkeinDefault::Threshold, "errors:rate<0.1")
        })
        .and_then(|attack| attack.execute());

    match result {
        Ok(report) if report.passed => std::process::exit(0),
        Ok(_) => std::process::exit(THRESHOLDS_FAILED),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
