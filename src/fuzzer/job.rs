//! Job specification and validation
//!
//! A [`JobSpec`] is the only structured artifact the engine accepts. It is
//! validated as a whole before anything is dispatched; every problem is
//! collected instead of failing on the first.

use std::collections::HashSet;
use std::time::Duration;

use super::calibration::CalibrationOptions;
use super::filters::RuleSet;
use super::generator::{Generator, InputMode};
use super::payloads::{Binding, InputProvider, ProviderKind, DEFAULT_KEYWORD};
use super::rate::Delay;
use super::recursion::{RecursionController, RecursionOptions};
use super::template::{RequestTemplate, MARKER};
use crate::error::{ConfigError, ConfigErrors};

/// Consecutive threshold used when a stop condition is on without one
pub const DEFAULT_STOP_THRESHOLD: u32 = 50;

/// Early termination heuristics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StopConditions {
    /// Stop after this many consecutive executor failures
    pub on_errors: Option<u32>,
    /// Stop after this many consecutive 403 responses
    pub on_403: Option<u32>,
    /// Enable both of the above and abort the whole run on any stop
    pub on_all: bool,
}

impl StopConditions {
    pub fn errors_threshold(&self) -> Option<u32> {
        self.on_errors
            .or(self.on_all.then_some(DEFAULT_STOP_THRESHOLD))
            .filter(|n| *n > 0)
    }

    pub fn forbidden_threshold(&self) -> Option<u32> {
        self.on_403
            .or(self.on_all.then_some(DEFAULT_STOP_THRESHOLD))
            .filter(|n| *n > 0)
    }
}

/// Concurrency and timing parameters
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOptions {
    /// Worker count
    pub threads: usize,
    pub delay: Delay,
    /// Requests per second across all workers
    pub rate: Option<u32>,
    /// Budget for the whole run
    pub max_time: Option<Duration>,
    /// Budget for each job, recursive children included
    pub max_time_job: Option<Duration>,
    pub stop: StopConditions,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            threads: 40,
            delay: Delay::default(),
            rate: None,
            max_time: None,
            max_time_job: None,
            stop: StopConditions::default(),
        }
    }
}

/// Everything one job needs. Immutable once the job starts.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub template: RequestTemplate,
    pub mode: InputMode,
    pub providers: Vec<InputProvider>,
    pub dispatch: DispatchOptions,
    pub matchers: RuleSet,
    pub filters: RuleSet,
    pub calibration: CalibrationOptions,
    pub recursion: RecursionOptions,
    /// Recursion level, 0 for the root job
    pub depth: usize,
}

impl JobSpec {
    pub fn new(template: RequestTemplate, mode: InputMode, providers: Vec<InputProvider>) -> Self {
        Self {
            template,
            mode,
            providers,
            dispatch: DispatchOptions::default(),
            matchers: RuleSet::default(),
            filters: RuleSet::default(),
            calibration: CalibrationOptions::default(),
            recursion: RecursionOptions::default(),
            depth: 0,
        }
    }

    pub fn with_dispatch(mut self, dispatch: DispatchOptions) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.dispatch.threads = threads;
        self
    }

    pub fn with_matchers(mut self, matchers: RuleSet) -> Self {
        self.matchers = matchers;
        self
    }

    pub fn with_filters(mut self, filters: RuleSet) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_calibration(mut self, calibration: CalibrationOptions) -> Self {
        self.calibration = calibration;
        self
    }

    pub fn with_recursion(mut self, recursion: RecursionOptions) -> Self {
        self.recursion = recursion;
        self
    }

    /// Check the specification. Keywords missing from the template are
    /// warnings and their providers are dropped; everything else is fatal.
    pub fn validate(mut self) -> Result<ValidatedJob, ConfigErrors> {
        let mut errors = ConfigErrors::new();
        let mut warnings = Vec::new();

        if self.template.url.trim().is_empty() {
            errors.push(ConfigError::MissingUrl);
        }
        if self.providers.is_empty() {
            errors.push(ConfigError::NoInputProviders);
        }
        if self.dispatch.threads == 0 {
            errors.push(ConfigError::InvalidValue {
                field: "threads".to_string(),
                reason: "at least one worker is required".to_string(),
            });
        }
        if !self.dispatch.delay.is_valid() {
            errors.push(ConfigError::InvalidDelay(self.dispatch.delay.to_string()));
        }
        if self.calibration.enabled && self.calibration.strategies.is_empty() {
            errors.push(ConfigError::InvalidValue {
                field: "calibration.strategies".to_string(),
                reason: "calibration is enabled without any strategy".to_string(),
            });
        }

        match self.mode {
            InputMode::Sniper => self.check_sniper(&mut errors),
            InputMode::Clusterbomb | InputMode::Pitchfork => {
                self.check_keywords(&mut errors, &mut warnings)
            }
        }

        if self.recursion.enabled && !self.providers.is_empty() {
            let placeholder = RecursionController::expected_placeholder(&self);
            if !self.template.url_ends_with(&placeholder) {
                errors.push(ConfigError::RecursionUrl(placeholder));
            }
        }

        for warning in &warnings {
            tracing::warn!("{}", warning);
        }

        let marker_count = self.template.marker_count(MARKER);
        let job = errors.into_result(ValidatedJob {
            spec: self,
            warnings,
            marker_count,
        })?;

        // Limited commands are read to their end here, so later totals are exact
        // and never wait on a process
        tracing::debug!(
            mode = %job.spec.mode,
            total = %job.generator().total(),
            "Job validated"
        );
        Ok(job)
    }

    fn check_sniper(&self, errors: &mut ConfigErrors) {
        let count = |kind| self.providers.iter().filter(|p| p.kind == kind).count();
        let (wordlists, commands) = (count(ProviderKind::Wordlist), count(ProviderKind::Command));

        if wordlists > 1 {
            errors.push(ConfigError::SniperMultipleWordlists);
        }
        if commands > 1 {
            errors.push(ConfigError::SniperMultipleCommands);
        }
        if wordlists == 1 && commands == 1 {
            errors.push(ConfigError::InvalidValue {
                field: "input".to_string(),
                reason: "sniper mode takes either one wordlist or one input command".to_string(),
            });
        }

        for provider in &self.providers {
            match &provider.binding {
                Binding::Keyword(keyword) => errors.push(ConfigError::SniperKeyword {
                    kind: kind_name(provider.kind).to_string(),
                    keyword: keyword.clone(),
                }),
                Binding::Marker(_) if provider.cardinality().is_none() => {
                    errors.push(ConfigError::UnboundedProvider {
                        keyword: provider.binding.placeholder(),
                        reason: "sniper mode needs a known number of values, set an input limit"
                            .to_string(),
                    })
                }
                Binding::Marker(_) => {}
            }
        }

        if self.template.contains(DEFAULT_KEYWORD) {
            errors.push(ConfigError::SniperKeywordInTemplate(DEFAULT_KEYWORD.to_string()));
        }
        if self.template.marker_count(MARKER) == 0 {
            errors.push(ConfigError::MarkerNotFound(MARKER));
        }
    }

    fn check_keywords(&mut self, errors: &mut ConfigErrors, warnings: &mut Vec<ConfigError>) {
        let mut seen = HashSet::new();
        for provider in &self.providers {
            match &provider.binding {
                Binding::Keyword(keyword) => {
                    if keyword.is_empty() {
                        errors.push(ConfigError::InvalidValue {
                            field: "input".to_string(),
                            reason: "empty keyword".to_string(),
                        });
                    } else if !seen.insert(keyword.clone()) {
                        errors.push(ConfigError::DuplicateKeyword(keyword.clone()));
                    }
                }
                Binding::Marker(marker) => errors.push(ConfigError::InvalidValue {
                    field: "input.mode".to_string(),
                    reason: format!("template marker {} is only valid in sniper mode", marker),
                }),
            }
        }

        let had_providers = !self.providers.is_empty();
        let template = &self.template;
        self.providers.retain(|provider| match provider.keyword() {
            Some(keyword) if !keyword.is_empty() && !template.contains(keyword) => {
                warnings.push(ConfigError::KeywordNotFound(keyword.to_string()));
                false
            }
            _ => true,
        });
        if had_providers && self.providers.is_empty() {
            errors.push(ConfigError::NoInputProviders);
        }

        if self.mode == InputMode::Clusterbomb {
            for provider in self.providers.iter().skip(1) {
                if provider.cardinality().is_none() {
                    errors.push(ConfigError::UnboundedProvider {
                        keyword: provider.binding.placeholder(),
                        reason: "only the first provider of a clusterbomb job may be unbounded"
                            .to_string(),
                    });
                }
            }
        }
    }
}

fn kind_name(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Wordlist => "wordlist",
        ProviderKind::Command => "command",
    }
}

/// A specification that passed validation
#[derive(Debug, Clone)]
pub struct ValidatedJob {
    spec: JobSpec,
    warnings: Vec<ConfigError>,
    marker_count: usize,
}

impl ValidatedJob {
    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    /// Soft problems found during validation
    pub fn warnings(&self) -> &[ConfigError] {
        &self.warnings
    }

    pub fn generator(&self) -> Generator {
        Generator::new(self.spec.mode, self.spec.providers.clone(), self.marker_count)
    }

    pub fn into_spec(self) -> JobSpec {
        self.spec
    }
}
