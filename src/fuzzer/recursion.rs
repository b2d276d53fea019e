//! Recursion into discovered paths
//!
//! A qualifying response does not start a nested run. The controller only
//! derives the child job specification; the engine queues it behind the
//! current job, so arbitrarily deep trees stay iterative.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::generator::{InputMode, PositionTuple};
use super::job::JobSpec;
use super::payloads::Binding;
use super::template::MARKER;
use crate::error::ConfigError;
use crate::http::{Request, Response};

const DIRECTORY_REDIRECTS: [u16; 5] = [301, 302, 303, 307, 308];

/// Which accepted responses open a new level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecursionStrategy {
    /// Redirects to the same path plus `/`, and listing-like responses for
    /// paths ending in `/`
    #[default]
    Default,
    /// Every accepted response
    Greedy,
}

impl fmt::Display for RecursionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecursionStrategy::Default => write!(f, "default"),
            RecursionStrategy::Greedy => write!(f, "greedy"),
        }
    }
}

impl FromStr for RecursionStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "default" => Ok(RecursionStrategy::Default),
            "greedy" => Ok(RecursionStrategy::Greedy),
            other => Err(ConfigError::InvalidValue {
                field: "recursion.strategy".to_string(),
                reason: format!("unknown strategy {:?}, expected default or greedy", other),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecursionOptions {
    pub enabled: bool,
    /// Maximum depth, 0 for unbounded
    pub max_depth: usize,
    pub strategy: RecursionStrategy,
    /// Status codes that never qualify
    pub exclude_status: Vec<u16>,
}

/// Decides which responses recurse and derives child specifications
#[derive(Debug, Clone, Default)]
pub struct RecursionController {
    options: RecursionOptions,
}

impl RecursionController {
    pub fn new(options: RecursionOptions) -> Self {
        Self { options }
    }

    pub fn is_enabled(&self) -> bool {
        self.options.enabled
    }

    /// Whether an accepted response from a job at `depth` opens a child job
    pub fn should_recurse(&self, response: &Response, request: &Request, depth: usize) -> bool {
        if !self.options.enabled {
            return false;
        }
        if self.options.max_depth != 0 && depth >= self.options.max_depth {
            return false;
        }
        if self.options.exclude_status.contains(&response.status) {
            return false;
        }

        match self.options.strategy {
            RecursionStrategy::Greedy => true,
            RecursionStrategy::Default => {
                if DIRECTORY_REDIRECTS.contains(&response.status) {
                    let directory = format!("{}/", request.url);
                    response
                        .redirect_location()
                        .and_then(|location| resolve(&request.url, location))
                        .is_some_and(|target| target == directory)
                } else {
                    matches!(response.status, 200 | 403) && request.url.ends_with('/')
                }
            }
        }
    }

    /// Parent specification with the discovered value inserted before the
    /// URL's terminal placeholder. `None` when the tuple did not fill that
    /// placeholder (a sniper tuple aimed at another marker).
    pub fn child_spec(&self, parent: &JobSpec, tuple: &PositionTuple) -> Option<JobSpec> {
        let url = &parent.template.url;

        let (placeholder, value) = match parent.mode {
            InputMode::Sniper => {
                let provider = parent.providers.first()?;
                let Binding::Marker(marker) = provider.binding else {
                    return None;
                };
                // the URL's last marker is the last occurrence before the
                // headers, so count method + URL occurrences
                let terminal = parent.template.method.matches(marker).count()
                    + url.matches(marker).count();
                if !url.ends_with(marker) || tuple.active_marker != Some(terminal.checked_sub(1)?) {
                    return None;
                }
                (marker.to_string(), tuple.values.first()?.clone())
            }
            InputMode::Clusterbomb | InputMode::Pitchfork => parent
                .providers
                .iter()
                .zip(&tuple.values)
                .filter_map(|(provider, value)| {
                    let keyword = provider.keyword()?;
                    url.ends_with(keyword).then(|| (keyword.to_string(), value.clone()))
                })
                .max_by_key(|(keyword, _)| keyword.len())?,
        };

        if value.is_empty() {
            return None;
        }

        let prefix = &url[..url.len() - placeholder.len()];
        let child_url = format!("{}{}/{}", prefix, value.trim_end_matches('/'), placeholder);

        let mut child = parent.clone();
        child.template = parent.template.with_url(child_url);
        child.depth = parent.depth + 1;
        Some(child)
    }

    /// The placeholder recursion requires at the end of the URL
    pub fn expected_placeholder(spec: &JobSpec) -> String {
        match spec.mode {
            InputMode::Sniper => MARKER.to_string(),
            _ => spec
                .providers
                .iter()
                .filter_map(|p| p.keyword())
                .find(|k| spec.template.url.ends_with(k))
                .or_else(|| spec.providers.iter().find_map(|p| p.keyword()))
                .unwrap_or(super::payloads::DEFAULT_KEYWORD)
                .to_string(),
        }
    }
}

fn resolve(base: &str, location: &str) -> Option<String> {
    let base = url::Url::parse(base).ok()?;
    base.join(location).ok().map(|u| u.to_string())
}
