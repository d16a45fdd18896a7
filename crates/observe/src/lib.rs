//! This crate is intended to contain code that is required to provide or
//! improve the observability of a system. That includes initialization logic
//! for metrics and logging as well as the HTTP endpoint that exposes them.

pub mod metrics;
pub mod tracing;
