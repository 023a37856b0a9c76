//! Quality-of-service accounting.
//!
//! Collects per-job outcomes during a batch run and derives the session
//! metrics: throughput relative to real time, success rate, average
//! processing time, and word error rate against reference texts.

pub mod metrics;
pub mod wer;

pub use metrics::{JobRecord, MetricsCalculator, QosSummary};
pub use wer::word_error_rate;
