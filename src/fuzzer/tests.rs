//! End-to-end scenarios for the job engine
//!
//! Every scenario runs against an in-memory executor so responses, failures
//! and latency are scripted.

#[cfg(test)]
mod scenario_tests {
    use crate::error::{ConfigError, ExecutorError};
    use crate::fuzzer::{
        Binding, CalibrationOptions, CalibrationStrategy, CollectingSink, CommandSource, Delay,
        DispatchOptions, Engine, InputMode, InputProvider, InputSource, JobSpec, JobState,
        ProviderKind, RecursionOptions, RecursionStrategy, RequestTemplate, Rule, RuleMode, RuleSet,
        StopConditions, StopReason, Total, Wordlist, MARKER,
    };
    use crate::http::{Executor, Request, Response};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    /// Answers by URL path; unknown paths get a 404 "not found" page
    #[derive(Default)]
    struct ScriptedExecutor {
        routes: HashMap<String, (u16, String, Option<String>)>,
        fail: bool,
        fallback_status: Option<u16>,
        latency: Option<Duration>,
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        fn new() -> Self {
            Self::default()
        }

        fn route(mut self, path: &str, status: u16, body: &str) -> Self {
            self.routes
                .insert(path.to_string(), (status, body.to_string(), None));
            self
        }

        fn redirect(mut self, path: &str, location: &str) -> Self {
            self.routes.insert(
                path.to_string(),
                (301, String::new(), Some(location.to_string())),
            );
            self
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn always(status: u16) -> Self {
            Self {
                fallback_status: Some(status),
                ..Self::default()
            }
        }

        fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = Some(latency);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Executor for ScriptedExecutor {
        async fn send(&self, request: &Request) -> Result<Response, ExecutorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().push(request.url.clone());
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            if self.fail {
                return Err(ExecutorError::Connection("connection refused".into()));
            }

            let path = url::Url::parse(&request.url)
                .map(|u| u.path().to_string())
                .unwrap_or_default();
            let mut headers = HashMap::new();
            let (status, body) = match self.routes.get(&path) {
                Some((status, body, location)) => {
                    if let Some(location) = location {
                        headers.insert("Location".to_string(), location.clone());
                    }
                    (*status, body.clone())
                }
                None => (self.fallback_status.unwrap_or(404), "not found".to_string()),
            };
            Ok(Response::new(status, headers, body.into_bytes(), 1).with_position(request.position))
        }
    }

    /// Records every index it is asked for
    #[derive(Debug)]
    struct CountingSource {
        values: Vec<String>,
        consulted: Mutex<Vec<usize>>,
    }

    impl CountingSource {
        fn new(size: usize, prefix: &str) -> Arc<Self> {
            Arc::new(Self {
                values: (0..size).map(|i| format!("{}{}", prefix, i)).collect(),
                consulted: Mutex::new(Vec::new()),
            })
        }

        fn max_consulted(&self) -> Option<usize> {
            self.consulted.lock().iter().copied().max()
        }
    }

    impl InputSource for CountingSource {
        fn cardinality(&self) -> Option<usize> {
            Some(self.values.len())
        }

        fn value_at(&self, index: usize) -> Option<String> {
            self.consulted.lock().push(index);
            self.values.get(index).cloned()
        }
    }

    fn words(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn fuzz_provider(values: &[&str]) -> InputProvider {
        InputProvider::wordlist(Binding::Keyword("FUZZ".into()), Wordlist::new("w", words(values)))
    }

    fn numbered(size: usize) -> Vec<String> {
        (0..size).map(|i| format!("word{}", i)).collect()
    }

    fn status_matcher(value: &str) -> RuleSet {
        RuleSet::new(RuleMode::Or).with_rule(Rule::parse("status", value).unwrap())
    }

    // =========================================================================
    // Generator scenarios
    // =========================================================================

    #[tokio::test]
    async fn scenario_clusterbomb_reports_matching_status_only() {
        let executor = Arc::new(
            ScriptedExecutor::new()
                .route("/admin", 200, "admin panel")
                .route("/login", 302, ""),
        );
        let sink = Arc::new(CollectingSink::new());
        let engine = Engine::new(executor.clone()).with_sink(sink.clone());

        let spec = JobSpec::new(
            RequestTemplate::new("GET", "http://target.local/FUZZ"),
            InputMode::Clusterbomb,
            vec![fuzz_provider(&["admin", "login", "xyz123"])],
        )
        .with_threads(3)
        .with_matchers(status_matcher("200"));

        let summary = engine.run(spec).await.unwrap();
        let job = &summary.jobs[0];
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.stats.sent, 3);
        assert_eq!(job.stats.matched, 1);
        assert_eq!(job.stats.filtered, 2);

        let results = sink.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "http://target.local/admin");
        assert_eq!(results[0].position, 0);
        assert_eq!(executor.calls(), 3);
    }

    #[tokio::test]
    async fn scenario_pitchfork_never_reads_past_shortest() {
        let long = CountingSource::new(5, "a");
        let short = CountingSource::new(3, "b");
        let providers = vec![
            InputProvider::from_source(ProviderKind::Wordlist, Binding::Keyword("A".into()), long.clone()),
            InputProvider::from_source(ProviderKind::Wordlist, Binding::Keyword("B".into()), short.clone()),
        ];
        let spec = JobSpec::new(
            RequestTemplate::new("GET", "http://target.local/A/B"),
            InputMode::Pitchfork,
            providers,
        )
        .with_threads(4);

        let job = spec.clone().validate().unwrap();
        assert_eq!(job.generator().total(), Total::Finite(3));

        let executor = Arc::new(ScriptedExecutor::new());
        let summary = Engine::new(executor.clone()).run(spec).await.unwrap();
        assert_eq!(summary.jobs[0].stats.sent, 3);
        assert_eq!(long.max_consulted(), Some(2));
        assert_eq!(short.max_consulted(), Some(2));

        let mut seen = executor.seen.lock().clone();
        seen.sort();
        assert_eq!(
            seen,
            vec![
                "http://target.local/a0/b0",
                "http://target.local/a1/b1",
                "http://target.local/a2/b2",
            ]
        );
    }

    #[test]
    fn scenario_sniper_addresses_second_marker() {
        let spec = JobSpec::new(
            RequestTemplate::new("GET", "http://target.local/§/§"),
            InputMode::Sniper,
            vec![InputProvider::wordlist(
                Binding::Marker(MARKER),
                Wordlist::new("w", words(&["v0", "v1", "v2", "v3"])),
            )],
        );
        let job = spec.validate().unwrap();
        assert_eq!(job.generator().total(), Total::Finite(8));

        let request = Engine::request_at(&job, 5).unwrap();
        assert_eq!(request.url, "http://target.local//v1");
        assert_eq!(request.position, 5);

        let request = Engine::request_at(&job, 2).unwrap();
        assert_eq!(request.url, "http://target.local/v2/");
        assert!(Engine::request_at(&job, 8).is_none());
    }

    #[test]
    fn scenario_materialized_request_locates_its_tuple() {
        let spec = JobSpec::new(
            RequestTemplate::new("POST", "http://target.local/FUZZ").with_body("user=USER"),
            InputMode::Clusterbomb,
            vec![
                fuzz_provider(&["admin", "login", "api"]),
                InputProvider::wordlist(
                    Binding::Keyword("USER".into()),
                    Wordlist::new("u", words(&["root", "guest"])),
                ),
            ],
        );
        let job = spec.validate().unwrap();
        let generator = job.generator();

        for index in 0..6 {
            let request = Engine::request_at(&job, index).unwrap();
            let path = request.url.trim_start_matches("http://target.local/").to_string();
            let user = request.body_text().trim_start_matches("user=").to_string();
            assert_eq!(generator.locate(&[path, user], None), Some(index));
        }
    }

    // =========================================================================
    // Stop conditions and time limits
    // =========================================================================

    #[tokio::test]
    async fn scenario_stop_on_errors() {
        let executor = Arc::new(ScriptedExecutor::failing());
        let spec = JobSpec::new(
            RequestTemplate::new("GET", "http://target.local/FUZZ"),
            InputMode::Clusterbomb,
            vec![InputProvider::wordlist(
                Binding::Keyword("FUZZ".into()),
                Wordlist::new("w", numbered(100)),
            )],
        )
        .with_dispatch(DispatchOptions {
            threads: 1,
            stop: StopConditions {
                on_errors: Some(5),
                ..Default::default()
            },
            ..Default::default()
        });

        let engine = Engine::new(executor.clone());
        let summary = engine.run(spec).await.unwrap();
        let job = &summary.jobs[0];

        assert_eq!(job.state, JobState::StoppedByCondition);
        assert_eq!(job.stop_reason, Some(StopReason::Errors));
        assert_eq!(job.stats.errored, 5);
        assert_eq!(executor.calls(), 5);
        assert_eq!(engine.state(), JobState::StoppedByCondition);
        assert_eq!(summary.aborted, None);
    }

    #[tokio::test]
    async fn scenario_stop_on_all_aborts_queued_jobs() {
        let executor = Arc::new(ScriptedExecutor::always(403));
        let spec = JobSpec::new(
            RequestTemplate::new("GET", "http://target.local/FUZZ"),
            InputMode::Clusterbomb,
            vec![InputProvider::wordlist(
                Binding::Keyword("FUZZ".into()),
                Wordlist::new("w", numbered(200)),
            )],
        )
        .with_dispatch(DispatchOptions {
            threads: 1,
            stop: StopConditions {
                on_all: true,
                ..Default::default()
            },
            ..Default::default()
        })
        .with_recursion(RecursionOptions {
            enabled: true,
            strategy: RecursionStrategy::Greedy,
            ..Default::default()
        });

        let summary = Engine::new(executor.clone()).run(spec).await.unwrap();
        assert_eq!(summary.jobs.len(), 1);
        assert_eq!(summary.jobs[0].stop_reason, Some(StopReason::Forbidden));
        assert_eq!(summary.aborted, Some(StopReason::All));
        assert_eq!(executor.calls(), 50);
    }

    #[tokio::test]
    async fn scenario_max_time_job() {
        let executor = Arc::new(ScriptedExecutor::new().with_latency(Duration::from_millis(20)));
        let spec = JobSpec::new(
            RequestTemplate::new("GET", "http://target.local/FUZZ"),
            InputMode::Clusterbomb,
            vec![InputProvider::wordlist(
                Binding::Keyword("FUZZ".into()),
                Wordlist::new("w", numbered(1000)),
            )],
        )
        .with_dispatch(DispatchOptions {
            threads: 2,
            max_time_job: Some(Duration::from_millis(100)),
            ..Default::default()
        });

        let summary = Engine::new(executor).run(spec).await.unwrap();
        let job = &summary.jobs[0];
        assert_eq!(job.state, JobState::StoppedByCondition);
        assert_eq!(job.stop_reason, Some(StopReason::MaxTimeJob));
        assert!(job.stats.sent < 1000);
    }

    #[tokio::test]
    async fn scenario_max_time_aborts_run() {
        let executor = Arc::new(ScriptedExecutor::new().with_latency(Duration::from_millis(20)));
        let spec = JobSpec::new(
            RequestTemplate::new("GET", "http://target.local/FUZZ"),
            InputMode::Clusterbomb,
            vec![InputProvider::wordlist(
                Binding::Keyword("FUZZ".into()),
                Wordlist::new("w", numbered(1000)),
            )],
        )
        .with_dispatch(DispatchOptions {
            threads: 2,
            max_time: Some(Duration::from_millis(100)),
            ..Default::default()
        });

        let summary = Engine::new(executor).run(spec).await.unwrap();
        assert_eq!(summary.jobs[0].stop_reason, Some(StopReason::MaxTime));
        assert_eq!(summary.aborted, Some(StopReason::MaxTime));
    }

    // =========================================================================
    // Control surface
    // =========================================================================

    #[tokio::test]
    async fn scenario_cancel_before_run_starts_nothing() {
        let executor = Arc::new(ScriptedExecutor::new());
        let engine = Engine::new(executor.clone());
        engine.control().cancel();

        let spec = JobSpec::new(
            RequestTemplate::new("GET", "http://target.local/FUZZ"),
            InputMode::Clusterbomb,
            vec![fuzz_provider(&["a", "b"])],
        );
        let summary = engine.run(spec).await.unwrap();
        assert!(summary.jobs.is_empty());
        assert_eq!(summary.aborted, Some(StopReason::Cancelled));
        assert_eq!(executor.calls(), 0);
    }

    #[tokio::test]
    async fn scenario_pause_and_resume() {
        let executor = Arc::new(ScriptedExecutor::new());
        let engine = Arc::new(Engine::new(executor.clone()));
        engine.control().pause();

        let spec = JobSpec::new(
            RequestTemplate::new("GET", "http://target.local/FUZZ"),
            InputMode::Clusterbomb,
            vec![fuzz_provider(&["a", "b", "c"])],
        )
        .with_threads(2);

        let run = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run(spec).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(executor.calls(), 0);
        assert_eq!(engine.state(), JobState::Running);

        engine.control().resume();
        let summary = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(summary.jobs[0].stats.sent, 3);
    }

    #[tokio::test]
    async fn scenario_replay_position_leaves_job_untouched() {
        let executor = Arc::new(ScriptedExecutor::new().route("/b", 200, "bee"));
        let engine = Engine::new(executor.clone());
        let job = JobSpec::new(
            RequestTemplate::new("GET", "http://target.local/FUZZ"),
            InputMode::Clusterbomb,
            vec![fuzz_provider(&["a", "b", "c"])],
        )
        .validate()
        .unwrap();

        let response = engine.replay_position(&job, 1).await.unwrap().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.position, 1);
        assert!(engine.replay_position(&job, 3).await.is_none());
        assert_eq!(engine.stats(), None);
        assert_eq!(engine.state(), JobState::Idle);
    }

    #[tokio::test]
    async fn scenario_accepted_requests_are_replayed() {
        let executor = Arc::new(ScriptedExecutor::new().route("/b", 200, "bee"));
        let replay = Arc::new(ScriptedExecutor::failing());
        let engine = Engine::new(executor).with_replay(replay.clone());

        let spec = JobSpec::new(
            RequestTemplate::new("GET", "http://target.local/FUZZ"),
            InputMode::Clusterbomb,
            vec![fuzz_provider(&["a", "b", "c"])],
        )
        .with_matchers(status_matcher("200"));

        let summary = engine.run(spec).await.unwrap();
        // replay failures do not count against the job
        assert_eq!(summary.jobs[0].stats.errored, 0);
        assert_eq!(summary.jobs[0].stats.matched, 1);
        assert_eq!(replay.calls(), 1);
        assert_eq!(replay.seen.lock()[0], "http://target.local/b");
    }

    // =========================================================================
    // Decision pipeline and calibration
    // =========================================================================

    #[tokio::test]
    async fn scenario_calibration_gate_under_concurrent_first_contact() {
        let executor = Arc::new(ScriptedExecutor::new().route("/word7", 200, "a real page"));
        let sink = Arc::new(CollectingSink::new());
        let engine = Engine::new(executor.clone()).with_sink(sink.clone());

        let spec = JobSpec::new(
            RequestTemplate::new("GET", "http://target.local/FUZZ"),
            InputMode::Clusterbomb,
            vec![InputProvider::wordlist(
                Binding::Keyword("FUZZ".into()),
                Wordlist::new("w", numbered(50)),
            )],
        )
        .with_threads(50)
        .with_calibration(CalibrationOptions {
            enabled: true,
            per_host: true,
            strategies: vec![CalibrationStrategy::Basic],
        });

        let summary = engine.run(spec).await.unwrap();
        let probes = CalibrationStrategy::Basic.probe_values().len();
        assert_eq!(executor.calls(), 50 + probes);

        // every "not found" page shares the probe signature
        let job = &summary.jobs[0];
        assert_eq!(job.stats.sent, 50);
        assert_eq!(job.stats.matched, 1);
        assert_eq!(sink.results()[0].url, "http://target.local/word7");
    }

    #[tokio::test]
    async fn scenario_calibration_with_literal_strings_and_and_filters() {
        let executor = Arc::new(
            ScriptedExecutor::new()
                .route("/admin", 200, "admin panel")
                .route("/calib", 200, "generic page"),
        );
        let sink = Arc::new(CollectingSink::new());
        let engine = Engine::new(executor).with_sink(sink.clone());

        // an `and` filter that never holds on its own
        let filters = RuleSet::new(RuleMode::And)
            .with_rule(Rule::parse("status", "500").unwrap())
            .with_rule(Rule::parse("size", "9").unwrap());

        let spec = JobSpec::new(
            RequestTemplate::new("GET", "http://target.local/FUZZ"),
            InputMode::Clusterbomb,
            vec![fuzz_provider(&["admin", "missing", "other"])],
        )
        .with_filters(filters)
        .with_calibration(CalibrationOptions {
            enabled: true,
            per_host: false,
            strategies: vec![
                CalibrationStrategy::Literal(words(&["calib"])),
                CalibrationStrategy::Literal(words(&["nope1", "nope2"])),
            ],
        });

        let summary = engine.run(spec).await.unwrap();
        assert_eq!(summary.jobs[0].stats.matched, 1);
        assert_eq!(sink.results()[0].url, "http://target.local/admin");
    }

    // =========================================================================
    // Recursion
    // =========================================================================

    #[tokio::test]
    async fn scenario_recursion_queues_child_job() {
        let executor = Arc::new(
            ScriptedExecutor::new()
                .redirect("/admin", "/admin/")
                .route("/admin/login", 200, "login form"),
        );
        let sink = Arc::new(CollectingSink::new());
        let engine = Engine::new(executor.clone()).with_sink(sink.clone());

        let spec = JobSpec::new(
            RequestTemplate::new("GET", "http://target.local/FUZZ"),
            InputMode::Clusterbomb,
            vec![fuzz_provider(&["admin", "login"])],
        )
        .with_matchers(status_matcher("200,301"))
        .with_recursion(RecursionOptions {
            enabled: true,
            max_depth: 1,
            strategy: RecursionStrategy::Default,
            exclude_status: Vec::new(),
        });

        let summary = engine.run(spec).await.unwrap();
        assert_eq!(summary.jobs.len(), 2);
        assert_eq!(summary.jobs[1].meta.depth, 1);
        assert_eq!(summary.jobs[1].meta.url, "http://target.local/admin/FUZZ");
        assert_eq!(summary.totals().sent, 4);

        let urls: Vec<String> = sink.results().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            vec!["http://target.local/admin", "http://target.local/admin/login"]
        );
        assert_eq!(sink.outcomes().len(), 2);
    }

    #[tokio::test]
    async fn scenario_recursion_respects_depth_limit() {
        // every directory redirects to itself plus a slash
        struct Directories;

        #[async_trait]
        impl Executor for Directories {
            async fn send(&self, request: &Request) -> Result<Response, ExecutorError> {
                let mut headers = HashMap::new();
                headers.insert("Location".to_string(), format!("{}/", request.url));
                Ok(Response::new(301, headers, Vec::new(), 1))
            }
        }

        let spec = JobSpec::new(
            RequestTemplate::new("GET", "http://target.local/FUZZ"),
            InputMode::Clusterbomb,
            vec![fuzz_provider(&["d"])],
        )
        .with_recursion(RecursionOptions {
            enabled: true,
            max_depth: 3,
            ..Default::default()
        });

        let summary = Engine::new(Arc::new(Directories)).run(spec).await.unwrap();
        let depths: Vec<usize> = summary.jobs.iter().map(|j| j.meta.depth).collect();
        assert_eq!(depths, vec![0, 1, 2, 3]);
        assert_eq!(summary.jobs[3].meta.url, "http://target.local/d/d/d/FUZZ");
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[tokio::test]
    async fn scenario_invalid_spec_never_dispatches() {
        let executor = Arc::new(ScriptedExecutor::new());
        let spec = JobSpec::new(
            RequestTemplate::new("GET", "http://target.local/"),
            InputMode::Sniper,
            vec![fuzz_provider(&["a"])],
        );
        let errors = Engine::new(executor.clone()).run(spec).await.unwrap_err();
        assert!(errors.contains(&ConfigError::MarkerNotFound(MARKER)));
        assert!(errors.len() >= 2);
        assert_eq!(executor.calls(), 0);
    }

    // =========================================================================
    // Pacing
    // =========================================================================

    fn paced_spec(size: usize, threads: usize, delay: Delay, rate: Option<u32>) -> JobSpec {
        JobSpec::new(
            RequestTemplate::new("GET", "http://target.local/FUZZ"),
            InputMode::Clusterbomb,
            vec![InputProvider::wordlist(
                Binding::Keyword("FUZZ".into()),
                Wordlist::new("w", numbered(size)),
            )],
        )
        .with_dispatch(DispatchOptions {
            threads,
            delay,
            rate,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn scenario_delay_spaces_requests_of_a_worker() {
        let executor = Arc::new(ScriptedExecutor::new());
        let spec = paced_spec(5, 1, Delay::fixed(Duration::from_millis(20)), None);

        let started = Instant::now();
        let summary = Engine::new(executor.clone()).run(spec).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(summary.jobs[0].stats.sent, 5);
        assert!(elapsed >= Duration::from_millis(100), "{:?}", elapsed);
    }

    #[tokio::test]
    async fn scenario_rate_limits_the_whole_pool() {
        let executor = Arc::new(ScriptedExecutor::new());
        let spec = paced_spec(5, 4, Delay::default(), Some(20));

        let started = Instant::now();
        let summary = Engine::new(executor.clone()).run(spec).await.unwrap();
        let elapsed = started.elapsed();

        // first request is free, the other four wait 50ms each
        assert_eq!(summary.jobs[0].stats.sent, 5);
        assert!(elapsed >= Duration::from_millis(190), "{:?}", elapsed);
    }

    #[tokio::test]
    async fn scenario_delay_and_rate_both_apply() {
        let executor = Arc::new(ScriptedExecutor::new());
        let spec = paced_spec(5, 1, Delay::fixed(Duration::from_millis(30)), Some(20));

        let started = Instant::now();
        let summary = Engine::new(executor.clone()).run(spec).await.unwrap();
        let elapsed = started.elapsed();

        // delay alone takes 150ms and the rate alone 200ms
        assert_eq!(summary.jobs[0].stats.sent, 5);
        assert!(elapsed >= Duration::from_millis(220), "{:?}", elapsed);
        assert_eq!(executor.calls(), 5);
    }

    // =========================================================================
    // Result positions
    // =========================================================================

    #[tokio::test]
    async fn scenario_results_carry_generator_position() {
        // answers without tagging the response with a position
        struct Untagged;

        #[async_trait]
        impl Executor for Untagged {
            async fn send(&self, _request: &Request) -> Result<Response, ExecutorError> {
                Ok(Response::new(200, HashMap::new(), b"ok".to_vec(), 1))
            }
        }

        let sink = Arc::new(CollectingSink::new());
        let engine = Engine::new(Arc::new(Untagged)).with_sink(sink.clone());
        let spec = JobSpec::new(
            RequestTemplate::new("GET", "http://target.local/FUZZ"),
            InputMode::Clusterbomb,
            vec![fuzz_provider(&["a", "b", "c", "d"])],
        )
        .with_threads(2);

        engine.run(spec).await.unwrap();
        let results = sink.results();
        assert_eq!(results.len(), 4);
        for result in results {
            let expected = match result.input["FUZZ"].as_str() {
                "a" => 0,
                "b" => 1,
                "c" => 2,
                _ => 3,
            };
            assert_eq!(result.position, expected, "{}", result.url);
        }
    }

    // =========================================================================
    // Command input
    // =========================================================================

    #[cfg(unix)]
    #[tokio::test]
    async fn scenario_unbounded_command_runs_to_its_end() {
        let executor = Arc::new(ScriptedExecutor::new().route("/3", 200, "three"));
        let sink = Arc::new(CollectingSink::new());
        let engine = Engine::new(executor.clone()).with_sink(sink.clone());

        let spec = JobSpec::new(
            RequestTemplate::new("GET", "http://target.local/FUZZ"),
            InputMode::Clusterbomb,
            vec![InputProvider::command(
                Binding::Keyword("FUZZ".into()),
                CommandSource::new("seq 1 5", None).with_window(2),
            )],
        )
        .with_threads(3)
        .with_matchers(status_matcher("200"));

        let summary = engine.run(spec).await.unwrap();
        assert_eq!(summary.jobs[0].state, JobState::Completed);
        assert_eq!(summary.jobs[0].stats.sent, 5);

        let results = sink.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "http://target.local/3");
        assert_eq!(results[0].position, 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn scenario_limited_command_counts_real_output() {
        let executor = Arc::new(ScriptedExecutor::new());
        let spec = JobSpec::new(
            RequestTemplate::new("GET", "http://target.local/FUZZ/N"),
            InputMode::Clusterbomb,
            vec![
                fuzz_provider(&["a", "b"]),
                InputProvider::command(
                    Binding::Keyword("N".into()),
                    CommandSource::new("printf 'x\\ny\\n'", Some(10)),
                ),
            ],
        )
        .with_threads(2);

        let summary = Engine::new(executor.clone()).run(spec).await.unwrap();
        assert_eq!(summary.jobs[0].state, JobState::Completed);
        assert_eq!(summary.jobs[0].stats.sent, 4);
        assert_eq!(executor.calls(), 4);
    }
}
