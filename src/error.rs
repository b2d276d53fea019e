//! Error types for wordrake
//!
//! Configuration and decision-rule problems are collected into a single
//! [`ConfigErrors`] value so a job reports every problem at once instead of
//! failing on the first one. Executor errors are per-request and never fatal
//! to a job on their own.

use std::fmt;

use thiserror::Error;

/// Main error type for wordrake operations
#[derive(Error, Debug)]
pub enum WordrakeError {
    /// Job specification failed validation
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigErrors),

    /// Request execution errors
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single problem found while resolving or validating a job specification
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Input mode {0} not recognized, valid values are: clusterbomb, pitchfork, sniper")]
    InvalidMode(String),

    #[error("A target URL is required")]
    MissingUrl,

    #[error("At least one wordlist or input command is required")]
    NoInputProviders,

    #[error("Sniper mode only supports one wordlist")]
    SniperMultipleWordlists,

    #[error("Sniper mode only supports one input command")]
    SniperMultipleCommands,

    #[error("Sniper mode does not support {kind} keywords ({keyword})")]
    SniperKeyword { kind: String, keyword: String },

    #[error("Keyword {0} defined, but we are using sniper mode")]
    SniperKeywordInTemplate(String),

    #[error("Template marker {0} defined, but not found in headers, method, URL or body")]
    MarkerNotFound(char),

    #[error("Keyword {0} defined, but not found in headers, method, URL or body")]
    KeywordNotFound(String),

    #[error("Keyword {0} is bound by more than one input provider")]
    DuplicateKeyword(String),

    #[error("Input provider {keyword} has no upper bound: {reason}")]
    UnboundedProvider { keyword: String, reason: String },

    #[error("When recursion is enabled the URL must end with the {0} placeholder")]
    RecursionUrl(String),

    #[error("Header {0:?} needs a value, ':' should be used as a separator")]
    InvalidHeader(String),

    #[error("Delay needs to be either a single number: \"0.1\" or a range: \"0.1-0.8\" (got {0:?})")]
    InvalidDelay(String),

    #[error("Bad {field} URL {url:?}: expected one of {expected}")]
    InvalidProxy {
        field: String,
        url: String,
        expected: String,
    },

    #[error("Unknown encoder {0:?}")]
    UnknownEncoder(String),

    #[error("Could not read wordlist {path}: {reason}")]
    Wordlist { path: String, reason: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error(transparent)]
    Decision(#[from] DecisionError),
}

/// Malformed matcher or filter rule
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecisionError {
    #[error("Invalid {rule} rule value {value:?}: {reason}")]
    InvalidRule {
        rule: String,
        value: String,
        reason: String,
    },

    #[error("Invalid regular expression {pattern:?}: {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("Unrecognized value for {set} mode: {value}, valid values are: and, or")]
    InvalidMode { set: String, value: String },
}

/// Request execution errors, distinct from valid non-2xx responses
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to read response body: {0}")]
    Body(String),

    #[error("Request failed: {0}")]
    Other(String),
}

/// Every configuration and decision-rule error found for one job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigErrors {
    errors: Vec<ConfigError>,
}

impl ConfigErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: impl Into<ConfigError>) {
        self.errors.push(error.into());
    }

    pub fn extend(&mut self, other: ConfigErrors) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[ConfigError] {
        &self.errors
    }

    pub fn contains(&self, error: &ConfigError) -> bool {
        self.errors.contains(error)
    }

    /// `Ok(value)` when nothing was collected, otherwise all collected errors
    pub fn into_result<T>(self, value: T) -> Result<T, ConfigErrors> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => write!(f, "no errors"),
            [single] => write!(f, "{}", single),
            many => {
                writeln!(f, "{} errors occurred:", many.len())?;
                for (i, error) in many.iter().enumerate() {
                    writeln!(f, "  {}. {}", i + 1, error)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigErrors {}

impl From<ConfigError> for ConfigErrors {
    fn from(error: ConfigError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

/// Trait for providing user-friendly hints
pub trait UserHint {
    fn user_hint(&self) -> String;
}

impl UserHint for ConfigError {
    fn user_hint(&self) -> String {
        match self {
            ConfigError::MarkerNotFound(marker) => {
                format!("Sniper mode needs at least one {} marker in the request template.", marker)
            }
            ConfigError::KeywordNotFound(keyword) => {
                format!("'{}' is not used anywhere in the request, its wordlist is ignored.", keyword)
            }
            ConfigError::RecursionUrl(placeholder) => {
                format!("Put {} at the very end of the URL to use recursion.", placeholder)
            }
            ConfigError::Wordlist { path, .. } => {
                format!("Could not read '{}'. Check if the file exists and you have read permissions.", path)
            }
            ConfigError::Decision(e) => e.user_hint(),
            _ => self.to_string(),
        }
    }
}

impl UserHint for DecisionError {
    fn user_hint(&self) -> String {
        match self {
            DecisionError::InvalidRule { rule, .. } => {
                format!("{} rules take comma separated numbers or ranges, e.g. 100,200-300.", rule)
            }
            DecisionError::InvalidRegex { pattern, .. } => {
                format!("'{}' is not a valid regular expression.", pattern)
            }
            DecisionError::InvalidMode { .. } => self.to_string(),
        }
    }
}

impl UserHint for ExecutorError {
    fn user_hint(&self) -> String {
        match self {
            ExecutorError::Connection(_) => {
                "Could not connect to the server. Check if it's running and accessible.".into()
            }
            ExecutorError::Timeout(ms) => {
                format!("Request timed out after {}ms. The server may be slow or unresponsive.", ms)
            }
            _ => self.to_string(),
        }
    }
}

impl UserHint for ConfigErrors {
    fn user_hint(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.user_hint())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
