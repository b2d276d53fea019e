//! Fuzzing job engine
//!
//! Input providers feed an index-addressable generator; tuples are
//! materialized into requests, dispatched by a worker pool, classified by
//! the matcher/filter pipeline and, when recursion is on, turned into child
//! jobs.

mod calibration;
mod encoding;
mod engine;
mod filters;
mod generator;
mod job;
mod payloads;
mod rate;
mod recursion;
mod results;
mod template;

#[cfg(test)]
mod tests;

pub use calibration::{CalibrationBaseline, CalibrationOptions, CalibrationStrategy, Calibrator};
pub use encoding::{Encoder, EncoderChain};
pub use engine::{Engine, JobControl};
pub use filters::{DecisionPipeline, Rule, RuleMode, RuleSet, TimeBound, ValueRange, Verdict};
pub use generator::{Generator, InputMode, PositionTuple, Total};
pub use job::{DispatchOptions, JobSpec, StopConditions, ValidatedJob, DEFAULT_STOP_THRESHOLD};
pub use payloads::{
    Binding, CommandSource, InputProvider, InputSource, ProviderKind, Wordlist, DEFAULT_KEYWORD,
    EXTENSION_TOKEN,
};
pub use rate::{Delay, RateLimiter};
pub use recursion::{RecursionController, RecursionOptions, RecursionStrategy};
pub use results::{
    ChannelSink, CollectingSink, FuzzResult, JobMeta, JobOutcome, JobState, JobStats, ResultSink,
    RunSummary, SinkEvent, StopReason,
};
pub use template::{canonical_header_key, materialize, RequestTemplate, MARKER};
