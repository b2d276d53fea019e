//! Application layer
//!
//! Loads a run configuration and turns it into a validated job.

mod config;

pub use config::{
    CalibrationConfig, Config, GeneralConfig, HttpConfig, InputConfig, RecursionConfig, RuleConfig,
};
