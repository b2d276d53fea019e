//! Auto-calibration
//!
//! Before the first real request to a host the calibrator probes it with
//! values that should not exist and turns the shape of the answers into
//! filter rules, so "not found" pages served with arbitrary content are
//! suppressed. Baselines are owned by the job and established at most once
//! per key behind a one-time gate.

use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::filters::{Rule, ValueRange};
use super::generator::PositionTuple;
use super::payloads::InputProvider;
use super::template::{materialize, RequestTemplate};
use crate::error::ConfigError;
use crate::http::{Executor, Request, Response};

/// Key used when baselines are shared by every host
const GLOBAL_KEY: &str = "*";

/// How nonce values for probing are produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalibrationStrategy {
    /// Random alphanumeric strings and dotfile/admin-looking names
    Basic,
    /// Basic plus directory and script-extension shaped values
    Advanced,
    /// Caller-provided literal values
    Literal(Vec<String>),
}

impl CalibrationStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            CalibrationStrategy::Basic => "basic",
            CalibrationStrategy::Advanced => "advanced",
            CalibrationStrategy::Literal(_) => "literal",
        }
    }

    /// Probe values for one calibration pass
    pub fn probe_values(&self) -> Vec<String> {
        match self {
            CalibrationStrategy::Basic => vec![
                random_string(16),
                random_string(16),
                format!("admin{}", random_string(8)),
                format!(".htaccess{}", random_string(8)),
            ],
            CalibrationStrategy::Advanced => {
                let mut values = CalibrationStrategy::Basic.probe_values();
                values.push(format!("{}/", random_string(16)));
                values.push(format!("{}.php", random_string(12)));
                values.push(format!("{}.aspx", random_string(12)));
                values.push(format!(".{}", random_string(12)));
                values
            }
            CalibrationStrategy::Literal(values) => values.clone(),
        }
    }
}

impl fmt::Display for CalibrationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for CalibrationStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "basic" => Ok(CalibrationStrategy::Basic),
            "advanced" => Ok(CalibrationStrategy::Advanced),
            other => Err(ConfigError::InvalidValue {
                field: "calibration.strategies".to_string(),
                reason: format!("unknown strategy {:?}, expected basic or advanced", other),
            }),
        }
    }
}

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Calibration settings of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationOptions {
    pub enabled: bool,
    /// One baseline per host instead of one per job
    pub per_host: bool,
    pub strategies: Vec<CalibrationStrategy>,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            per_host: false,
            strategies: vec![CalibrationStrategy::Basic],
        }
    }
}

/// Filter rules derived for one host (or the whole job)
#[derive(Debug, Clone, Default)]
pub struct CalibrationBaseline {
    pub key: String,
    pub rules: Vec<Rule>,
    /// Probe responses that came back
    pub samples: usize,
}

type Gate = Arc<OnceCell<Arc<CalibrationBaseline>>>;

/// Job-owned host to baseline mapping
pub struct Calibrator {
    options: CalibrationOptions,
    template: RequestTemplate,
    providers: Vec<InputProvider>,
    executor: Arc<dyn Executor>,
    baselines: Mutex<HashMap<String, Gate>>,
    probe_sets: AtomicUsize,
}

impl Calibrator {
    pub fn new(
        options: CalibrationOptions,
        template: RequestTemplate,
        providers: Vec<InputProvider>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            options,
            template,
            providers,
            executor,
            baselines: Mutex::new(HashMap::new()),
            probe_sets: AtomicUsize::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.options.enabled
    }

    /// Number of probe sets issued so far
    pub fn probe_sets(&self) -> usize {
        self.probe_sets.load(Ordering::SeqCst)
    }

    /// Baseline for the host `request` targets. The first caller for a key
    /// runs the probes; concurrent callers wait on the same gate.
    pub async fn baseline_for(&self, request: &Request, tuple: &PositionTuple) -> Arc<CalibrationBaseline> {
        let key = if self.options.per_host {
            request.host()
        } else {
            GLOBAL_KEY.to_string()
        };

        let gate = {
            let mut baselines = self.baselines.lock();
            baselines.entry(key.clone()).or_default().clone()
        };

        gate.get_or_init(|| self.calibrate(key, tuple)).await.clone()
    }

    async fn calibrate(&self, key: String, tuple: &PositionTuple) -> Arc<CalibrationBaseline> {
        self.probe_sets.fetch_add(1, Ordering::SeqCst);

        // Keywords in the URL authority keep the tuple's value so probes hit
        // the same host the real request targets
        let authority = self.template.authority();
        let pinned: Vec<bool> = self
            .providers
            .iter()
            .map(|p| p.keyword().is_some_and(|k| authority.contains(k)))
            .collect();

        let mut rules = Vec::new();
        let mut samples = 0;

        for strategy in &self.options.strategies {
            let mut responses = Vec::new();
            for nonce in strategy.probe_values() {
                let values = self
                    .providers
                    .iter()
                    .zip(&tuple.values)
                    .zip(&pinned)
                    .map(|((provider, value), &pin)| {
                        if pin {
                            value.clone()
                        } else {
                            provider.encoder.apply(&nonce)
                        }
                    })
                    .collect();
                let probe = PositionTuple {
                    index: tuple.index,
                    positions: tuple.positions.clone(),
                    values,
                    active_marker: tuple.active_marker,
                };
                let request = materialize(&self.template, &self.providers, &probe);

                match self.executor.send(&request).await {
                    Ok(response) => {
                        tracing::debug!(
                            key = %key,
                            strategy = %strategy,
                            status = response.status,
                            size = response.content_length,
                            "Calibration probe"
                        );
                        responses.push(response);
                    }
                    Err(e) => {
                        tracing::debug!(key = %key, strategy = %strategy, error = %e, "Calibration probe failed");
                    }
                }
            }

            samples += responses.len();
            if let Some(rule) = derive_rule(&responses) {
                tracing::info!(key = %key, strategy = %strategy, rule = %rule, "Calibration filter derived");
                rules.push(rule);
            }
        }

        Arc::new(CalibrationBaseline { key, rules, samples })
    }
}

impl fmt::Debug for Calibrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Calibrator")
            .field("options", &self.options)
            .field("probe_sets", &self.probe_sets())
            .finish()
    }
}

/// The first of size, word count or line count shared by every sample
pub fn derive_rule(responses: &[Response]) -> Option<Rule> {
    let first = responses.first()?;

    if responses.iter().all(|r| r.content_length == first.content_length) {
        return Some(Rule::Size(vec![ValueRange::exact(first.content_length as u64)]));
    }
    if responses.iter().all(|r| r.words == first.words) {
        return Some(Rule::Words(vec![ValueRange::exact(first.words as u64)]));
    }
    if responses.iter().all(|r| r.lines == first.lines) {
        return Some(Rule::Lines(vec![ValueRange::exact(first.lines as u64)]));
    }
    None
}
