//! Metrics: outcome/sample aggregation, device sampling, summary statistics,
//! threshold evaluation and the run report.

pub mod aggregator;
pub mod probe;
pub mod report;
pub mod summary;
pub mod thresholds;
