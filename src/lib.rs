//! Wordrake - concurrent HTTP content and parameter discovery
//!
//! Builds requests from a template and a set of input providers, dispatches
//! them with a bounded worker pool and reports the responses that survive
//! the matcher/filter pipeline.

pub mod app;
pub mod error;
pub mod fuzzer;
pub mod http;

pub use app::Config;
pub use error::*;
pub use fuzzer::{Engine, JobControl, JobSpec, RunSummary, ValidatedJob};
