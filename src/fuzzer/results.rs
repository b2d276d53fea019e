//! Results, job metadata and reporting sinks

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::generator::PositionTuple;
use super::payloads::InputProvider;
use crate::http::{Request, Response};

/// Scheduler state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running,
    Completed,
    StoppedByCondition,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::StoppedByCondition | JobState::Cancelled
        )
    }
}

/// Why a job ended before exhausting its input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Consecutive executor failures
    Errors,
    /// Consecutive 403 responses
    Forbidden,
    /// Several hosts tripped the same stop signature
    All,
    MaxTime,
    MaxTimeJob,
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StopReason::Errors => "errors",
            StopReason::Forbidden => "403",
            StopReason::All => "all",
            StopReason::MaxTime => "maxtime",
            StopReason::MaxTimeJob => "maxtime-job",
            StopReason::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Identity of a job, attached to every result it reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMeta {
    pub job_id: Uuid,
    pub depth: usize,
    /// Template URL of the job
    pub url: String,
    pub started_at: DateTime<Utc>,
}

impl JobMeta {
    pub fn new(url: &str, depth: usize) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            depth,
            url: url.to_string(),
            started_at: Utc::now(),
        }
    }
}

/// Live counters of a job
#[derive(Debug, Default)]
pub struct JobCounters {
    sent: AtomicU64,
    errored: AtomicU64,
    filtered: AtomicU64,
    matched: AtomicU64,
}

impl JobCounters {
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_match(&self) {
        self.matched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> JobStats {
        JobStats {
            sent: self.sent.load(Ordering::Relaxed),
            errored: self.errored.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            matched: self.matched.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`JobCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub sent: u64,
    pub errored: u64,
    pub filtered: u64,
    pub matched: u64,
}

impl std::ops::Add for JobStats {
    type Output = JobStats;

    fn add(self, other: JobStats) -> JobStats {
        JobStats {
            sent: self.sent + other.sent,
            errored: self.errored + other.errored,
            filtered: self.filtered + other.filtered,
            matched: self.matched + other.matched,
        }
    }
}

/// How a job ended
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub meta: JobMeta,
    pub state: JobState,
    pub stop_reason: Option<StopReason>,
    pub stats: JobStats,
    pub elapsed_ms: u64,
}

/// Every job of a run, in execution order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub jobs: Vec<JobOutcome>,
    /// Set when the whole run was cut short
    pub aborted: Option<StopReason>,
}

impl RunSummary {
    pub fn totals(&self) -> JobStats {
        self.jobs.iter().fold(JobStats::default(), |acc, job| acc + job.stats)
    }
}

/// One accepted response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzResult {
    pub job_id: Uuid,
    pub depth: usize,
    /// Generator index, for restoring request order
    pub position: u64,
    /// Placeholder to substituted value
    pub input: BTreeMap<String, String>,
    pub method: String,
    pub url: String,
    pub host: String,
    pub status: u16,
    pub content_length: usize,
    pub words: usize,
    pub lines: usize,
    pub duration_ms: u64,
    pub redirect_location: Option<String>,
    pub content_type: Option<String>,
}

impl FuzzResult {
    pub fn new(
        meta: &JobMeta,
        providers: &[InputProvider],
        tuple: &PositionTuple,
        request: &Request,
        response: &Response,
    ) -> Self {
        let input = providers
            .iter()
            .zip(&tuple.values)
            .map(|(provider, value)| (provider.binding.placeholder(), value.clone()))
            .collect();

        Self {
            job_id: meta.job_id,
            depth: meta.depth,
            position: response.position,
            input,
            method: request.method.clone(),
            url: request.url.clone(),
            host: request.host(),
            status: response.status,
            content_length: response.content_length,
            words: response.words,
            lines: response.lines,
            duration_ms: response.duration_ms,
            redirect_location: response.redirect_location().map(str::to_string),
            content_type: response.header("content-type").map(str::to_string),
        }
    }
}

impl fmt::Display for FuzzResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let input = self
            .input
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ");
        write!(
            f,
            "{:<40} [Status: {}, Size: {}, Words: {}, Lines: {}, Duration: {}ms]",
            input, self.status, self.content_length, self.words, self.lines, self.duration_ms
        )?;
        if let Some(location) = &self.redirect_location {
            write!(f, " -> {}", location)?;
        }
        Ok(())
    }
}

/// Fire-and-forget consumer of results. Implementations must not block the
/// scheduler beyond a bounded enqueue.
pub trait ResultSink: Send + Sync {
    fn report(&self, result: FuzzResult);

    fn job_finished(&self, _outcome: &JobOutcome) {}
}

/// Keeps everything in memory
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    results: Arc<Mutex<Vec<FuzzResult>>>,
    outcomes: Arc<Mutex<Vec<JobOutcome>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Results sorted by depth, job and generator index
    pub fn results(&self) -> Vec<FuzzResult> {
        let mut results = self.results.lock().clone();
        results.sort_by_key(|r| (r.depth, r.job_id, r.position));
        results
    }

    pub fn outcomes(&self) -> Vec<JobOutcome> {
        self.outcomes.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.lock().is_empty()
    }

    pub fn status_distribution(&self) -> HashMap<u16, usize> {
        let mut distribution = HashMap::new();
        for result in self.results.lock().iter() {
            *distribution.entry(result.status).or_insert(0) += 1;
        }
        distribution
    }
}

impl ResultSink for CollectingSink {
    fn report(&self, result: FuzzResult) {
        self.results.lock().push(result);
    }

    fn job_finished(&self, outcome: &JobOutcome) {
        self.outcomes.lock().push(outcome.clone());
    }
}

/// Messages delivered by [`ChannelSink`]
#[derive(Debug, Clone)]
pub enum SinkEvent {
    Result(Box<FuzzResult>),
    JobFinished(Box<JobOutcome>),
}

/// Forwards to a bounded channel; drops and counts when the consumer lags
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<SinkEvent>,
    dropped: AtomicU64,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SinkEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn send(&self, event: SinkEvent) {
        if let Err(e) = self.tx.try_send(event) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(error = %e, dropped, "Result sink is lagging, dropping event");
        }
    }
}

impl ResultSink for ChannelSink {
    fn report(&self, result: FuzzResult) {
        self.send(SinkEvent::Result(Box::new(result)));
    }

    fn job_finished(&self, outcome: &JobOutcome) {
        self.send(SinkEvent::JobFinished(Box::new(outcome.clone())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fuzzer::payloads::{Binding, Wordlist};

    fn result(meta: &JobMeta, position: u64, status: u16) -> FuzzResult {
        let providers = vec![InputProvider::wordlist(
            Binding::Keyword("FUZZ".into()),
            Wordlist::new("w", vec!["admin".into()]),
        )];
        let tuple = PositionTuple {
            index: position,
            positions: vec![0],
            values: vec!["admin".into()],
            active_marker: None,
        };
        let request = Request::new("GET", "http://example.com:8080/admin");
        let response = Response::new(status, HashMap::new(), b"hi".to_vec(), 3).with_position(position);
        FuzzResult::new(meta, &providers, &tuple, &request, &response)
    }

    #[test]
    fn test_result_fields() {
        let meta = JobMeta::new("http://example.com:8080/FUZZ", 0);
        let r = result(&meta, 4, 200);
        assert_eq!(r.input.get("FUZZ").map(String::as_str), Some("admin"));
        assert_eq!(r.host, "example.com:8080");
        assert_eq!(r.position, 4);
        assert_eq!(r.content_length, 2);
        assert!(r.to_string().contains("Status: 200"));
    }

    #[test]
    fn test_collecting_sink_orders_by_position() {
        let sink = CollectingSink::new();
        let meta = JobMeta::new("http://example.com/FUZZ", 0);
        for (position, status) in [(5, 200), (1, 301), (3, 200)] {
            sink.report(result(&meta, position, status));
        }
        let positions: Vec<u64> = sink.results().iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1, 3, 5]);
        assert_eq!(sink.status_distribution().get(&200), Some(&2));
    }

    #[tokio::test]
    async fn test_channel_sink_drops_when_full() {
        let (sink, mut rx) = ChannelSink::new(1);
        let meta = JobMeta::new("http://example.com/FUZZ", 0);
        sink.report(result(&meta, 0, 200));
        sink.report(result(&meta, 1, 200));
        assert_eq!(sink.dropped(), 1);
        assert!(matches!(rx.recv().await, Some(SinkEvent::Result(r)) if r.position == 0));
    }

    #[test]
    fn test_summary_totals() {
        let outcome = |sent| JobOutcome {
            meta: JobMeta::new("http://example.com/FUZZ", 0),
            state: JobState::Completed,
            stop_reason: None,
            stats: JobStats {
                sent,
                errored: 1,
                filtered: 0,
                matched: 2,
            },
            elapsed_ms: 10,
        };
        let summary = RunSummary {
            jobs: vec![outcome(3), outcome(4)],
            aborted: None,
        };
        assert_eq!(summary.totals().sent, 7);
        assert_eq!(summary.totals().matched, 4);
    }
}
