pub use crate::config::{SkeinConfiguration, SkeinDefault, SkeinDefaultType};
pub use crate::logger::SkeinLogFormat;
pub use crate::metrics::{MetricCollector, MetricKind, TrendSummary};
pub use crate::report::RunReport;
pub use crate::request::{
    FailureKind, HttpTransport, QueryResponseValidator, RequestFailure, RequestPool,
    RequestSpec, ResponseValidator, Transport, TransportError, TransportResponse,
};
pub use crate::test_plan::{Stage, TestPlan};
pub use crate::threshold::{MissingDataPolicy, ThresholdRule, ThresholdVerdict};
pub use crate::{CancelHandle, SkeinAttack, SkeinError};
