//! Process-level services

pub mod metrics;

pub use metrics::{gather_text, Metrics};
