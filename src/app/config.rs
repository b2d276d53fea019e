//! Job configuration
//!
//! A TOML document describing one fuzzing run. [`Config::to_job`] resolves
//! it into a validated job; every problem in the document is reported at
//! once.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConfigError, ConfigErrors};
use crate::fuzzer::{
    Binding, CalibrationOptions, CalibrationStrategy, CommandSource, Delay, DispatchOptions,
    EncoderChain, InputMode, InputProvider, JobSpec, RecursionOptions, RecursionStrategy,
    RequestTemplate, Rule, RuleMode, RuleSet, StopConditions, ValidatedJob, Wordlist,
    DEFAULT_KEYWORD, MARKER,
};
use crate::http::HttpOptions;

const PROXY_SCHEMES: &[&str] = &["http", "https", "socks5"];
const REPLAY_PROXY_SCHEMES: &[&str] = &["http", "https", "socks5", "socks5h"];

/// Run configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Concurrency, pacing and stop conditions
    pub general: GeneralConfig,

    /// Request template and transport
    pub http: HttpConfig,

    /// Input providers
    pub input: InputConfig,

    /// Rules a response must satisfy
    pub matcher: RuleConfig,

    /// Rules that veto a response
    pub filter: RuleConfig,

    pub calibration: CalibrationConfig,

    pub recursion: RecursionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Concurrent workers
    pub threads: usize,

    /// Seconds before each request, `"0.1"` or `"0.1-0.8"`
    pub delay: String,

    /// Requests per second, 0 for unlimited
    pub rate: u32,

    /// Run time limit in seconds, 0 for none
    pub max_time: u64,

    /// Per-job time limit in seconds, 0 for none
    pub max_time_job: u64,

    /// Consecutive executor errors before stopping, 0 to disable
    pub stop_on_errors: u32,

    /// Consecutive 403 responses before stopping, 0 to disable
    pub stop_on_403: u32,

    /// Enable every stop condition and abort the run on any of them
    pub stop_on_all: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Target URL
    pub url: String,

    pub method: String,

    /// `Name: value` entries
    pub headers: Vec<String>,

    /// `name=value` entries folded into a Cookie header
    pub cookies: Vec<String>,

    /// Request body; switches a GET to POST
    pub data: String,

    /// Request timeout in seconds
    pub timeout: u64,

    pub follow_redirects: bool,

    /// Upstream proxy for every request
    pub proxy: Option<String>,

    /// Proxy that accepted requests are re-sent through
    pub replay_proxy: Option<String>,

    pub user_agent: String,

    /// Accept invalid TLS certificates
    pub insecure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// clusterbomb, pitchfork or sniper
    pub mode: String,

    /// `path[:KEYWORD]` entries
    pub wordlists: Vec<String>,

    /// `command[:KEYWORD]` entries, one value per output line
    pub commands: Vec<String>,

    /// Values read from each command, 0 for unbounded
    pub input_num: usize,

    /// `KEYWORD:encoder encoder` entries
    pub encoders: Vec<String>,

    /// Skip wordlist lines starting with `#`
    pub ignore_comments: bool,

    /// Extensions appended to FUZZ wordlist entries
    pub extensions: Vec<String>,

    /// Replace `%EXT%` in wordlist entries instead of appending
    pub dirsearch_compat: bool,
}

/// One rule set; empty values are unset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    /// and / or
    pub mode: String,
    pub status: String,
    pub size: String,
    pub words: String,
    pub lines: String,
    /// `>N` or `<N` milliseconds
    pub time: String,
    pub regex: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub enabled: bool,

    /// Calibrate every host separately, implies enabled
    pub per_host: bool,

    /// basic / advanced, implies enabled. Empty means basic.
    pub strategies: Vec<String>,

    /// Literal probe values, run as one more strategy. Implies enabled.
    pub strings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecursionConfig {
    pub enabled: bool,

    /// Maximum depth, 0 for unbounded
    pub depth: usize,

    /// default / greedy
    pub strategy: String,

    /// Status codes that never recurse
    pub exclude_status: Vec<u16>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            threads: 40,
            delay: String::new(),
            rate: 0,
            max_time: 0,
            max_time_job: 0,
            stop_on_errors: 0,
            stop_on_403: 0,
            stop_on_all: false,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        let defaults = HttpOptions::default();
        Self {
            url: String::new(),
            method: "GET".to_string(),
            headers: Vec::new(),
            cookies: Vec::new(),
            data: String::new(),
            timeout: defaults.timeout_secs,
            follow_redirects: defaults.follow_redirects,
            proxy: None,
            replay_proxy: None,
            user_agent: defaults.user_agent,
            insecure: defaults.insecure,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            mode: "clusterbomb".to_string(),
            wordlists: Vec::new(),
            commands: Vec::new(),
            input_num: 0,
            encoders: Vec::new(),
            ignore_comments: false,
            extensions: Vec::new(),
            dirsearch_compat: false,
        }
    }
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            mode: "or".to_string(),
            status: String::new(),
            size: String::new(),
            words: String::new(),
            lines: String::new(),
            time: String::new(),
            regex: String::new(),
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            per_host: false,
            strategies: Vec::new(),
            strings: Vec::new(),
        }
    }
}

impl Default for RecursionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            depth: 0,
            strategy: "default".to_string(),
            exclude_status: Vec::new(),
        }
    }
}

impl RuleConfig {
    /// Parse into a rule set, collecting every malformed rule
    fn to_rule_set(&self, set: &str, errors: &mut ConfigErrors) -> RuleSet {
        let mode = RuleMode::parse(set, &self.mode).unwrap_or_else(|e| {
            errors.push(e);
            RuleMode::default()
        });

        let mut rules = RuleSet::new(mode);
        let entries = [
            ("status", &self.status),
            ("size", &self.size),
            ("words", &self.words),
            ("lines", &self.lines),
            ("time", &self.time),
            ("regex", &self.regex),
        ];
        for (kind, value) in entries {
            if value.trim().is_empty() {
                continue;
            }
            match Rule::parse(kind, value) {
                Ok(rule) => rules.rules.push(rule),
                Err(e) => errors.push(e),
            }
        }
        rules
    }
}

impl Config {
    /// Load configuration from a file, or the default location when `path`
    /// is `None`. A missing default file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if path.is_none() && !config_path.exists() {
            tracing::info!("No configuration file found, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {:?}", config_path))?;
        let config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse configuration file {:?}", config_path))?;

        tracing::info!("Loaded configuration from {:?}", config_path);
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Invalid TOML")
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default configuration file path
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("io", "wordrake", "wordrake")
            .context("Failed to determine config directory")?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get data directory, used for log files
    pub fn data_dir() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("io", "wordrake", "wordrake")
            .context("Failed to determine data directory")?;

        Ok(dirs.data_dir().to_path_buf())
    }

    /// Transport settings for the main executor
    pub fn http_options(&self) -> HttpOptions {
        HttpOptions {
            timeout_secs: self.http.timeout,
            follow_redirects: self.http.follow_redirects,
            proxy: self.http.proxy.clone().filter(|p| !p.is_empty()),
            user_agent: self.http.user_agent.clone(),
            insecure: self.http.insecure,
        }
    }

    /// Transport settings for the replay executor, if one is configured
    pub fn replay_options(&self) -> Option<HttpOptions> {
        let proxy = self.http.replay_proxy.clone().filter(|p| !p.is_empty())?;
        Some(HttpOptions {
            proxy: Some(proxy),
            ..self.http_options()
        })
    }

    /// Resolve the document into a validated job. Parse errors and
    /// validation errors are reported together.
    pub fn to_job(&self) -> Result<ValidatedJob, ConfigErrors> {
        let mut errors = ConfigErrors::new();

        let mode = InputMode::from_str(&self.input.mode).unwrap_or_else(|e| {
            errors.push(e);
            InputMode::default()
        });

        let template = self.template(&mut errors);
        let providers = self.providers(mode, &mut errors);
        let dispatch = self.dispatch(&mut errors);
        let matchers = self.matcher.to_rule_set("matcher", &mut errors);
        let filters = self.filter.to_rule_set("filter", &mut errors);
        let calibration = self.calibration(&mut errors);
        let recursion = self.recursion(&mut errors);

        check_proxy("http.proxy", self.http.proxy.as_deref(), PROXY_SCHEMES, &mut errors);
        check_proxy(
            "http.replay_proxy",
            self.http.replay_proxy.as_deref(),
            REPLAY_PROXY_SCHEMES,
            &mut errors,
        );

        let spec = JobSpec::new(template, mode, providers)
            .with_dispatch(dispatch)
            .with_matchers(matchers)
            .with_filters(filters)
            .with_calibration(calibration)
            .with_recursion(recursion);

        match spec.validate() {
            Ok(job) => errors.into_result(job),
            Err(validation) => {
                errors.extend(validation);
                Err(errors)
            }
        }
    }

    fn template(&self, errors: &mut ConfigErrors) -> RequestTemplate {
        let mut method = self.http.method.trim().to_string();
        if method.is_empty() {
            method = "GET".to_string();
        }
        if !self.http.data.is_empty() && method.eq_ignore_ascii_case("GET") {
            method = "POST".to_string();
        }

        let mut template = RequestTemplate::new(&method, self.http.url.trim()).with_body(&self.http.data);

        for header in &self.http.headers {
            match header.split_once(':') {
                Some((name, value)) if !name.trim().is_empty() => {
                    template = template.with_header(name.trim(), value.trim_start());
                }
                _ => errors.push(ConfigError::InvalidHeader(header.clone())),
            }
        }

        let cookies: Vec<&str> = self
            .http
            .cookies
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect();
        if !cookies.is_empty() {
            template = template.with_header("Cookie", &cookies.join("; "));
        }

        template
    }

    fn providers(&self, mode: InputMode, errors: &mut ConfigErrors) -> Vec<InputProvider> {
        let default_binding = |keyword: Option<&str>| match (keyword, mode) {
            (Some(keyword), _) => Binding::Keyword(keyword.to_string()),
            (None, InputMode::Sniper) => Binding::Marker(MARKER),
            (None, _) => Binding::Keyword(DEFAULT_KEYWORD.to_string()),
        };

        let mut providers = Vec::new();

        for entry in &self.input.wordlists {
            let (path, keyword) = split_keyword(entry);
            let binding = default_binding(keyword);
            let wordlist = match Wordlist::from_file(Path::new(path), self.input.ignore_comments) {
                Ok(wordlist) => wordlist,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            let extends = matches!(&binding, Binding::Marker(_))
                || binding.placeholder() == DEFAULT_KEYWORD;
            let wordlist = if extends {
                wordlist.with_extensions(&self.input.extensions, self.input.dirsearch_compat)
            } else {
                wordlist
            };
            providers.push(InputProvider::wordlist(binding, wordlist));
        }

        let limit = (self.input.input_num > 0).then_some(self.input.input_num);
        for entry in &self.input.commands {
            let (command, keyword) = split_keyword(entry);
            providers.push(InputProvider::command(
                default_binding(keyword),
                CommandSource::new(command, limit),
            ));
        }

        for entry in &self.input.encoders {
            let Some((placeholder, chain)) = entry.split_once(':') else {
                errors.push(ConfigError::InvalidValue {
                    field: "input.encoders".to_string(),
                    reason: format!("{:?} should look like KEYWORD:encoder", entry),
                });
                continue;
            };
            let chain = match EncoderChain::from_str(chain) {
                Ok(chain) => chain,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            let placeholder = placeholder.trim();
            match providers.iter_mut().find(|p| p.binding.placeholder() == placeholder) {
                Some(provider) => provider.encoder = chain,
                None => errors.push(ConfigError::InvalidValue {
                    field: "input.encoders".to_string(),
                    reason: format!("no input provider is bound to {}", placeholder),
                }),
            }
        }

        providers
    }

    fn dispatch(&self, errors: &mut ConfigErrors) -> DispatchOptions {
        let general = &self.general;
        let delay = Delay::from_str(&general.delay).unwrap_or_else(|e| {
            errors.push(e);
            Delay::default()
        });
        let secs = |n: u64| (n > 0).then(|| Duration::from_secs(n));
        let threshold = |n: u32| (n > 0).then_some(n);

        DispatchOptions {
            threads: general.threads,
            delay,
            rate: (general.rate > 0).then_some(general.rate),
            max_time: secs(general.max_time),
            max_time_job: secs(general.max_time_job),
            stop: StopConditions {
                on_errors: threshold(general.stop_on_errors),
                on_403: threshold(general.stop_on_403),
                on_all: general.stop_on_all,
            },
        }
    }

    fn calibration(&self, errors: &mut ConfigErrors) -> CalibrationOptions {
        let mut strategies = Vec::new();
        for name in &self.calibration.strategies {
            match CalibrationStrategy::from_str(name) {
                Ok(strategy) => strategies.push(strategy),
                Err(e) => errors.push(e),
            }
        }
        if !self.calibration.strings.is_empty() {
            strategies.push(CalibrationStrategy::Literal(self.calibration.strings.clone()));
        }

        let section = &self.calibration;
        let enabled = section.enabled
            || section.per_host
            || !section.strategies.is_empty()
            || !section.strings.is_empty();
        if enabled && strategies.is_empty() {
            strategies.push(CalibrationStrategy::Basic);
        }

        CalibrationOptions {
            enabled,
            per_host: section.per_host,
            strategies,
        }
    }

    fn recursion(&self, errors: &mut ConfigErrors) -> RecursionOptions {
        let strategy = RecursionStrategy::from_str(&self.recursion.strategy).unwrap_or_else(|e| {
            errors.push(e);
            RecursionStrategy::default()
        });
        RecursionOptions {
            enabled: self.recursion.enabled,
            max_depth: self.recursion.depth,
            strategy,
            exclude_status: self.recursion.exclude_status.clone(),
        }
    }
}

/// Split `value:KEYWORD`. The suffix only counts as a keyword when it is a
/// plain identifier, so paths and command lines keep their own colons.
fn split_keyword(entry: &str) -> (&str, Option<&str>) {
    match entry.rsplit_once(':') {
        Some((value, keyword))
            if !value.is_empty()
                && !keyword.is_empty()
                && keyword.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') =>
        {
            (value, Some(keyword))
        }
        _ => (entry, None),
    }
}

fn check_proxy(field: &str, proxy: Option<&str>, schemes: &[&str], errors: &mut ConfigErrors) {
    let Some(proxy) = proxy.filter(|p| !p.is_empty()) else {
        return;
    };
    let valid = url::Url::parse(proxy)
        .map(|u| schemes.contains(&u.scheme()))
        .unwrap_or(false);
    if !valid {
        errors.push(ConfigError::InvalidProxy {
            field: field.to_string(),
            url: proxy.to_string(),
            expected: schemes.join(", "),
        });
    }
}
