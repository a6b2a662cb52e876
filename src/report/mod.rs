mod debounce;
mod estimate;
mod reporter;
mod sink;

pub use debounce::Debouncer;
pub use estimate::estimate_occupancy;
pub use reporter::Reporter;
pub use sink::{endpoint_for, HttpReportSink, ReportPayload, ReportSink, REPORT_PATH};
