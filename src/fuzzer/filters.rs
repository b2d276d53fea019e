//! Matcher and filter rules
//!
//! Rules are a closed vocabulary of response predicates. Two rule sets,
//! matchers and filters, are each combined under their own `and`/`or` mode;
//! a response is accepted when the matchers hold and no filter vetoes it.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DecisionError;
use crate::http::Response;

/// How the rules in a set are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleMode {
    And,
    #[default]
    Or,
}

impl RuleMode {
    /// Parse a mode for the named rule set
    pub fn parse(set: &str, value: &str) -> Result<Self, DecisionError> {
        match value.trim().to_lowercase().as_str() {
            "and" => Ok(RuleMode::And),
            "or" => Ok(RuleMode::Or),
            _ => Err(DecisionError::InvalidMode {
                set: set.to_string(),
                value: value.to_string(),
            }),
        }
    }
}

impl fmt::Display for RuleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleMode::And => write!(f, "and"),
            RuleMode::Or => write!(f, "or"),
        }
    }
}

/// Inclusive numeric range; a single value is a range of one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueRange {
    pub min: u64,
    pub max: u64,
}

impl ValueRange {
    pub fn exact(value: u64) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    pub fn contains(&self, value: u64) -> bool {
        self.min <= value && value <= self.max
    }
}

impl FromStr for ValueRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parse = |v: &str| v.trim().parse::<u64>().map_err(|e| format!("{:?}: {}", v, e));

        match s.split_once('-') {
            Some((min, max)) => {
                let (min, max) = (parse(min)?, parse(max)?);
                if min > max {
                    return Err(format!("range {} is reversed", s));
                }
                Ok(Self { min, max })
            }
            None => parse(s).map(Self::exact),
        }
    }
}

impl fmt::Display for ValueRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min == self.max {
            write!(f, "{}", self.min)
        } else {
            write!(f, "{}-{}", self.min, self.max)
        }
    }
}

/// Response time bound in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBound {
    Greater(u64),
    Less(u64),
}

/// One response predicate
#[derive(Debug, Clone)]
pub enum Rule {
    /// Status code membership; `None` means any status
    Status(Option<Vec<ValueRange>>),
    /// Body size in bytes
    Size(Vec<ValueRange>),
    /// Word count
    Words(Vec<ValueRange>),
    /// Line count
    Lines(Vec<ValueRange>),
    /// Response time threshold
    Time(TimeBound),
    /// Regular expression over headers and body
    Regex(Regex),
}

impl Rule {
    /// Parse a rule from its kind (`status`, `size`, `words`, `lines`,
    /// `time`, `regex`) and value
    pub fn parse(kind: &str, value: &str) -> Result<Self, DecisionError> {
        let invalid = |reason: String| DecisionError::InvalidRule {
            rule: kind.to_string(),
            value: value.to_string(),
            reason,
        };

        match kind.trim().to_lowercase().as_str() {
            "status" | "code" => {
                if value.trim().eq_ignore_ascii_case("all") {
                    Ok(Rule::Status(None))
                } else {
                    parse_ranges(value).map(|r| Rule::Status(Some(r))).map_err(invalid)
                }
            }
            "size" => parse_ranges(value).map(Rule::Size).map_err(invalid),
            "words" => parse_ranges(value).map(Rule::Words).map_err(invalid),
            "lines" => parse_ranges(value).map(Rule::Lines).map_err(invalid),
            "time" => {
                let value = value.trim();
                let (bound, millis): (fn(u64) -> TimeBound, &str) =
                    if let Some(rest) = value.strip_prefix('>') {
                        (TimeBound::Greater, rest)
                    } else if let Some(rest) = value.strip_prefix('<') {
                        (TimeBound::Less, rest)
                    } else {
                        return Err(invalid("expected >N or <N milliseconds".to_string()));
                    };
                millis
                    .trim()
                    .parse::<u64>()
                    .map(|ms| Rule::Time(bound(ms)))
                    .map_err(|e| invalid(e.to_string()))
            }
            "regex" | "regexp" => Regex::new(value)
                .map(Rule::Regex)
                .map_err(|e| DecisionError::InvalidRegex {
                    pattern: value.to_string(),
                    reason: e.to_string(),
                }),
            other => Err(DecisionError::InvalidRule {
                rule: other.to_string(),
                value: value.to_string(),
                reason: "unknown rule, expected one of status, size, words, lines, time, regex"
                    .to_string(),
            }),
        }
    }

    /// Evaluate the predicate against a response
    pub fn matches(&self, response: &Response) -> bool {
        match self {
            Rule::Status(None) => true,
            Rule::Status(Some(ranges)) => in_ranges(ranges, response.status as u64),
            Rule::Size(ranges) => in_ranges(ranges, response.content_length as u64),
            Rule::Words(ranges) => in_ranges(ranges, response.words as u64),
            Rule::Lines(ranges) => in_ranges(ranges, response.lines as u64),
            Rule::Time(TimeBound::Greater(ms)) => response.duration_ms > *ms,
            Rule::Time(TimeBound::Less(ms)) => response.duration_ms < *ms,
            Rule::Regex(re) => re.is_match(&response.searchable_text()),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |ranges: &[ValueRange]| {
            ranges.iter().map(|r| r.to_string()).collect::<Vec<_>>().join(",")
        };
        match self {
            Rule::Status(None) => write!(f, "status: all"),
            Rule::Status(Some(r)) => write!(f, "status: {}", join(r)),
            Rule::Size(r) => write!(f, "size: {}", join(r)),
            Rule::Words(r) => write!(f, "words: {}", join(r)),
            Rule::Lines(r) => write!(f, "lines: {}", join(r)),
            Rule::Time(TimeBound::Greater(ms)) => write!(f, "time: >{}", ms),
            Rule::Time(TimeBound::Less(ms)) => write!(f, "time: <{}", ms),
            Rule::Regex(re) => write!(f, "regex: {}", re.as_str()),
        }
    }
}

fn parse_ranges(value: &str) -> Result<Vec<ValueRange>, String> {
    let ranges = value
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(ValueRange::from_str)
        .collect::<Result<Vec<_>, _>>()?;
    if ranges.is_empty() {
        return Err("no values given".to_string());
    }
    Ok(ranges)
}

fn in_ranges(ranges: &[ValueRange], value: u64) -> bool {
    ranges.iter().any(|r| r.contains(value))
}

/// Rules combined under one mode
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub mode: RuleMode,
    pub rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(mode: RuleMode) -> Self {
        Self {
            mode,
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// `None` when the set has no rules
    pub fn evaluate(&self, response: &Response) -> Option<bool> {
        if self.rules.is_empty() {
            return None;
        }
        Some(match self.mode {
            RuleMode::And => self.rules.iter().all(|r| r.matches(response)),
            RuleMode::Or => self.rules.iter().any(|r| r.matches(response)),
        })
    }
}

/// Outcome of running a response through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Matchers hold and no filter vetoes
    Accepted,
    /// Matchers failed
    Unmatched,
    /// Vetoed by a user filter
    Filtered,
    /// Vetoed by a calibration-derived filter
    Calibrated,
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

/// Matchers, user filters, and the rules auto-calibration derived for the
/// response's host
#[derive(Debug, Clone, Default)]
pub struct DecisionPipeline {
    pub matchers: RuleSet,
    pub filters: RuleSet,
}

impl DecisionPipeline {
    pub fn new(matchers: RuleSet, filters: RuleSet) -> Self {
        Self { matchers, filters }
    }

    /// Without matcher rules every completed response matches. Calibration
    /// rules are OR'ed among themselves regardless of the filter mode.
    pub fn decide(&self, response: &Response, calibration: &[Rule]) -> Verdict {
        if !self.matchers.evaluate(response).unwrap_or(true) {
            return Verdict::Unmatched;
        }
        if self.filters.evaluate(response).unwrap_or(false) {
            return Verdict::Filtered;
        }
        if calibration.iter().any(|rule| rule.matches(response)) {
            return Verdict::Calibrated;
        }
        Verdict::Accepted
    }
}
