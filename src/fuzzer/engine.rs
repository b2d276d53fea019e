//! Dispatch scheduler
//!
//! A run is a queue of jobs executed one after another. Each job drives a
//! fixed pool of workers sharing one generator cursor. Recursion appends
//! child jobs to the queue instead of nesting runs.

use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::calibration::Calibrator;
use super::filters::DecisionPipeline;
use super::generator::{Generator, PositionTuple};
use super::job::{JobSpec, StopConditions, ValidatedJob};
use super::rate::RateLimiter;
use super::recursion::RecursionController;
use super::results::{
    CollectingSink, FuzzResult, JobCounters, JobMeta, JobOutcome, JobState, JobStats, ResultSink,
    RunSummary, StopReason,
};
use super::template::materialize;
use crate::error::{ConfigErrors, ExecutorError};
use crate::http::{Executor, Request, Response};

/// External control surface: pause, resume and cancel
#[derive(Debug, Default)]
pub struct JobControl {
    paused: AtomicBool,
    resume: Notify,
    cancel: CancellationToken,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Workers finish their current request and claim nothing new until
    /// resumed
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        tracing::info!("Paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resume.notify_waiters();
        tracing::info!("Resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Cancel the run. Queued jobs are not started.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    async fn wait_if_paused(&self, token: &CancellationToken) {
        loop {
            let notified = self.resume.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_paused() {
                return;
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = token.cancelled() => return,
            }
        }
    }
}

/// Serialized claim of the next generator index. Held across the wait for
/// slow providers, so it is an async lock.
struct Cursor {
    generator: Generator,
    state: tokio::sync::Mutex<CursorState>,
    next: AtomicU64,
}

#[derive(Default)]
struct CursorState {
    next: u64,
    exhausted: bool,
}

impl Cursor {
    fn new(generator: Generator) -> Self {
        Self {
            generator,
            state: tokio::sync::Mutex::new(CursorState::default()),
            next: AtomicU64::new(0),
        }
    }

    async fn claim(&self) -> Option<PositionTuple> {
        let mut state = self.state.lock().await;
        if state.exhausted {
            return None;
        }
        self.generator.prepare(state.next).await;
        match self.generator.tuple_at(state.next) {
            Some(tuple) => {
                state.next += 1;
                self.next.store(state.next, Ordering::SeqCst);
                Some(tuple)
            }
            None => {
                state.exhausted = true;
                tracing::trace!(claimed = state.next, "Input exhausted");
                None
            }
        }
    }

    fn position(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

/// Consecutive error and 403 streaks of a job
struct StopTracker {
    errors: Option<u32>,
    forbidden: Option<u32>,
    streaks: Mutex<Streaks>,
}

#[derive(Default)]
struct Streaks {
    errors: u32,
    forbidden: u32,
}

impl StopTracker {
    fn new(conditions: &StopConditions) -> Self {
        Self {
            errors: conditions.errors_threshold(),
            forbidden: conditions.forbidden_threshold(),
            streaks: Mutex::new(Streaks::default()),
        }
    }

    fn on_error(&self) -> Option<StopReason> {
        let threshold = self.errors?;
        let mut streaks = self.streaks.lock();
        streaks.errors += 1;
        (streaks.errors >= threshold).then_some(StopReason::Errors)
    }

    fn on_response(&self, status: u16) -> Option<StopReason> {
        let mut streaks = self.streaks.lock();
        streaks.errors = 0;
        if status != 403 {
            streaks.forbidden = 0;
            return None;
        }
        streaks.forbidden += 1;
        let threshold = self.forbidden?;
        (streaks.forbidden >= threshold).then_some(StopReason::Forbidden)
    }
}

/// Everything the workers of one job share
struct JobContext {
    spec: JobSpec,
    meta: JobMeta,
    cursor: Cursor,
    pipeline: DecisionPipeline,
    calibrator: Calibrator,
    recursion: RecursionController,
    rate: Option<RateLimiter>,
    executor: Arc<dyn Executor>,
    replay: Option<Arc<dyn Executor>>,
    sink: Arc<dyn ResultSink>,
    control: Arc<JobControl>,
    token: CancellationToken,
    counters: JobCounters,
    stops: StopTracker,
    stop_reason: Mutex<Option<StopReason>>,
    children: Mutex<Vec<JobSpec>>,
}

impl JobContext {
    /// First reason wins; stops claiming new work
    fn stop(&self, reason: StopReason) {
        {
            let mut stop_reason = self.stop_reason.lock();
            if stop_reason.is_some() {
                return;
            }
            *stop_reason = Some(reason);
        }
        tracing::warn!(job_id = %self.meta.job_id, reason = %reason, "Stopping job");
        self.token.cancel();
    }

    fn stop_reason(&self) -> Option<StopReason> {
        *self.stop_reason.lock()
    }
}

/// The fuzzing engine
pub struct Engine {
    executor: Arc<dyn Executor>,
    replay: Option<Arc<dyn Executor>>,
    sink: Arc<dyn ResultSink>,
    control: Arc<JobControl>,
    state: RwLock<JobState>,
    current: RwLock<Option<Arc<JobContext>>>,
}

impl Engine {
    /// Engine reporting into an in-memory [`CollectingSink`]
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            replay: None,
            sink: Arc::new(CollectingSink::new()),
            control: Arc::new(JobControl::new()),
            state: RwLock::new(JobState::Idle),
            current: RwLock::new(None),
        }
    }

    /// Re-send accepted requests through a second executor
    pub fn with_replay(mut self, replay: Arc<dyn Executor>) -> Self {
        self.replay = Some(replay);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn control(&self) -> Arc<JobControl> {
        self.control.clone()
    }

    /// State of the job currently (or last) running
    pub fn state(&self) -> JobState {
        *self.state.read()
    }

    /// Counters of the running job
    pub fn stats(&self) -> Option<JobStats> {
        self.current.read().as_ref().map(|ctx| ctx.counters.snapshot())
    }

    /// Next generator index of the running job
    pub fn position(&self) -> Option<u64> {
        self.current.read().as_ref().map(|ctx| ctx.cursor.position())
    }

    /// Validate `spec` and run it with every recursive child it produces
    pub async fn run(&self, spec: JobSpec) -> Result<RunSummary, ConfigErrors> {
        // Validation may read input commands to their end
        let root = match tokio::task::spawn_blocking(move || spec.validate()).await {
            Ok(validated) => validated?,
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        };
        Ok(self.run_validated(root).await)
    }

    /// Run an already validated job and its recursive children
    pub async fn run_validated(&self, root: ValidatedJob) -> RunSummary {
        let stop_on_all = root.spec().dispatch.stop.on_all;
        let max_time = root.spec().dispatch.max_time;

        let run_token = self.control.token().child_token();
        let max_time_hit = Arc::new(AtomicBool::new(false));
        let timer = max_time.map(|limit| {
            let token = run_token.clone();
            let hit = max_time_hit.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(limit) => {
                        tracing::warn!(limit_secs = limit.as_secs_f64(), "Maximum run time reached");
                        hit.store(true, Ordering::SeqCst);
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            })
        });

        let mut summary = RunSummary::default();
        let mut queue = VecDeque::from([root]);

        while let Some(job) = queue.pop_front() {
            if run_token.is_cancelled() {
                tracing::info!(skipped = queue.len() + 1, "Run cancelled, queued jobs not started");
                break;
            }

            let (outcome, children) = self.run_job(job, &run_token, &max_time_hit).await;
            self.sink.job_finished(&outcome);

            let tripped = matches!(
                outcome.stop_reason,
                Some(StopReason::Errors) | Some(StopReason::Forbidden)
            );
            summary.jobs.push(outcome);

            if tripped && stop_on_all {
                tracing::warn!("Stop condition hit with stop-on-all, aborting run");
                summary.aborted = Some(StopReason::All);
                run_token.cancel();
                break;
            }

            for child in children {
                let url = child.template.url.clone();
                match child.validate() {
                    Ok(child) => {
                        tracing::info!(url = %url, depth = child.spec().depth, "Adding a new job to the queue");
                        queue.push_back(child);
                    }
                    Err(e) => tracing::debug!(url = %url, error = %e, "Skipping recursion job"),
                }
            }
        }

        if summary.aborted.is_none() && run_token.is_cancelled() {
            summary.aborted = Some(if max_time_hit.load(Ordering::SeqCst) {
                StopReason::MaxTime
            } else {
                StopReason::Cancelled
            });
        }
        if let Some(timer) = timer {
            timer.abort();
        }

        let totals = summary.totals();
        tracing::info!(
            jobs = summary.jobs.len(),
            sent = totals.sent,
            matched = totals.matched,
            errored = totals.errored,
            "Run finished"
        );
        summary
    }

    async fn run_job(
        &self,
        job: ValidatedJob,
        run_token: &CancellationToken,
        max_time_hit: &AtomicBool,
    ) -> (JobOutcome, Vec<JobSpec>) {
        let generator = job.generator();
        let spec = job.into_spec();
        let meta = JobMeta::new(&spec.template.url, spec.depth);
        let started = Instant::now();

        tracing::info!(
            job_id = %meta.job_id,
            url = %spec.template.url,
            depth = spec.depth,
            mode = %spec.mode,
            total = %generator.total(),
            "Starting job"
        );

        let ctx = Arc::new(JobContext {
            meta: meta.clone(),
            cursor: Cursor::new(generator),
            pipeline: DecisionPipeline::new(spec.matchers.clone(), spec.filters.clone()),
            calibrator: Calibrator::new(
                spec.calibration.clone(),
                spec.template.clone(),
                spec.providers.clone(),
                self.executor.clone(),
            ),
            recursion: RecursionController::new(spec.recursion.clone()),
            rate: spec.dispatch.rate.filter(|r| *r > 0).map(RateLimiter::new),
            executor: self.executor.clone(),
            replay: self.replay.clone(),
            sink: self.sink.clone(),
            control: self.control.clone(),
            token: run_token.child_token(),
            counters: JobCounters::default(),
            stops: StopTracker::new(&spec.dispatch.stop),
            stop_reason: Mutex::new(None),
            children: Mutex::new(Vec::new()),
            spec,
        });

        *self.state.write() = JobState::Running;
        *self.current.write() = Some(ctx.clone());

        let timer = ctx.spec.dispatch.max_time_job.map(|limit| {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(limit) => ctx.stop(StopReason::MaxTimeJob),
                    _ = ctx.token.cancelled() => {}
                }
            })
        });

        let handles: Vec<_> = (0..ctx.spec.dispatch.threads)
            .map(|_| tokio::spawn(worker(ctx.clone())))
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task failed");
            }
        }
        if let Some(timer) = timer {
            timer.abort();
        }

        let (state, stop_reason) = match ctx.stop_reason() {
            Some(reason) => (JobState::StoppedByCondition, Some(reason)),
            None if run_token.is_cancelled() => {
                if max_time_hit.load(Ordering::SeqCst) {
                    (JobState::StoppedByCondition, Some(StopReason::MaxTime))
                } else {
                    (JobState::Cancelled, Some(StopReason::Cancelled))
                }
            }
            None => (JobState::Completed, None),
        };
        ctx.token.cancel();

        *self.state.write() = state;
        *self.current.write() = None;

        let outcome = JobOutcome {
            meta,
            state,
            stop_reason,
            stats: ctx.counters.snapshot(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            job_id = %outcome.meta.job_id,
            state = ?outcome.state,
            sent = outcome.stats.sent,
            matched = outcome.stats.matched,
            filtered = outcome.stats.filtered,
            errored = outcome.stats.errored,
            "Job finished"
        );

        let children = std::mem::take(&mut *ctx.children.lock());
        (outcome, children)
    }

    /// Request a generator index materializes to. Pure: no job state is
    /// touched.
    pub fn request_at(job: &ValidatedJob, index: u64) -> Option<Request> {
        let tuple = job.generator().tuple_at(index)?;
        Some(materialize(&job.spec().template, &job.spec().providers, &tuple))
    }

    /// Send a single position once, outside any running job's cursor and
    /// counters. `None` when the index is past the end of input.
    pub async fn replay_position(
        &self,
        job: &ValidatedJob,
        index: u64,
    ) -> Option<Result<Response, ExecutorError>> {
        job.generator().prepare(index).await;
        let request = Self::request_at(job, index)?;
        tracing::debug!(index, url = %request.url, "Replaying position");
        Some(self.executor.send(&request).await)
    }
}

async fn worker(ctx: Arc<JobContext>) {
    loop {
        if ctx.token.is_cancelled() {
            break;
        }
        ctx.control.wait_if_paused(&ctx.token).await;
        if ctx.token.is_cancelled() {
            break;
        }

        let claimed = tokio::select! {
            claimed = ctx.cursor.claim() => claimed,
            _ = ctx.token.cancelled() => break,
        };
        let Some(tuple) = claimed else {
            break;
        };
        let request = materialize(&ctx.spec.template, &ctx.spec.providers, &tuple);

        let delay = &ctx.spec.dispatch.delay;
        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(delay.sample()) => {}
                _ = ctx.token.cancelled() => break,
            }
        }
        if let Some(rate) = &ctx.rate {
            tokio::select! {
                _ = rate.acquire() => {}
                _ = ctx.token.cancelled() => break,
            }
        }

        let baseline = if ctx.calibrator.is_enabled() {
            Some(ctx.calibrator.baseline_for(&request, &tuple).await)
        } else {
            None
        };

        ctx.counters.record_sent();
        let response = match ctx.executor.send(&request).await {
            Ok(response) => response.with_position(tuple.index),
            Err(e) => {
                ctx.counters.record_error();
                tracing::debug!(position = tuple.index, url = %request.url, error = %e, "Request failed");
                if let Some(reason) = ctx.stops.on_error() {
                    ctx.stop(reason);
                }
                continue;
            }
        };

        let calibration = baseline.as_ref().map(|b| b.rules.as_slice()).unwrap_or(&[]);
        let verdict = ctx.pipeline.decide(&response, calibration);

        if verdict.is_accepted() {
            ctx.counters.record_match();
            ctx.sink.report(FuzzResult::new(
                &ctx.meta,
                &ctx.spec.providers,
                &tuple,
                &request,
                &response,
            ));

            if let Some(replay) = &ctx.replay {
                if let Err(e) = replay.send(&request).await {
                    tracing::debug!(url = %request.url, error = %e, "Replay request failed");
                }
            }

            if ctx.recursion.should_recurse(&response, &request, ctx.spec.depth) {
                if let Some(child) = ctx.recursion.child_spec(&ctx.spec, &tuple) {
                    ctx.children.lock().push(child);
                }
            }
        } else {
            ctx.counters.record_filtered();
        }

        if let Some(reason) = ctx.stops.on_response(response.status) {
            ctx.stop(reason);
        }
    }
}
