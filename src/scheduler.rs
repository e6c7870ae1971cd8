//! The Scheduler and Result Collector: runs `L` self-contained loop iterations over the
//! filtered test set, dispatching work to a worker pool and streaming results back to stdout in
//! deterministic submission order.
//!
//! Generalizes the teacher's `TestPipeline::run` (`Arc<Semaphore>` + `tokio::task::JoinSet`)
//! from "one shot per platform x program" to "one shot per loop iteration over the filtered test
//! set", with a `Collector` task holding a small reorder buffer keyed by scheduling index in
//! place of the teacher's `MultiProgress` bar aggregation.

use crate::{
    compare::{self, ComparatorConfig},
    config::{self, TargetConfig, TargetRole},
    discovery::TestCase,
    filter::TestFilter,
    fixture,
    rpc::{RpcClient, Transport},
    stats::{Statistics, TestMetrics},
};
use color_eyre::{eyre::eyre, owo_colors::OwoColorize, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    io::Write,
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    sync::{mpsc, Semaphore},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;

/// A Test Case selected for execution, extended with the transport name and a monotonically
/// increasing scheduling index assigned at submission time.
#[derive(Debug, Clone)]
struct TestDescriptor {
    test_case: TestCase,
    transport: Transport,
    scheduling_index: u64,
}

/// Success flag, terminal error message (or none), an optional colorized diff blob, and metrics.
#[derive(Debug, Clone)]
struct TestOutcome {
    success: bool,
    error: Option<String>,
    colorized_diff: Option<String>,
    metrics: TestMetrics,
}

/// Configuration governing one scheduler run, threaded in from the CLI.
#[derive(Debug, Clone)]
pub(crate) struct SchedulerConfig {
    /// Number of worker tasks per iteration. `1` for serial mode.
    pub(crate) workers: usize,
    /// Number of loop iterations to run.
    pub(crate) loops: u64,
    /// Pause between submissions within an iteration; rejected at configuration time when
    /// combined with `workers > 1`.
    pub(crate) waiting_time: Option<Duration>,
    /// Trigger global cancellation on the first failed test.
    pub(crate) exit_on_fail: bool,
    /// Only schedule test cases with `global_number >= start_from_test`.
    pub(crate) start_from_test: u64,
    /// The transports to exercise for every scheduled test case.
    pub(crate) transports: Vec<Transport>,
    /// Verbosity: `0` prints successes with a trailing `\r`; `>= 1` terminates every line
    /// normally.
    pub(crate) verbose: u8,
    /// Suppresses successful-test lines entirely; only failures print.
    pub(crate) display_only_fail: bool,
    /// Directory fixture/diff artifacts are written under.
    pub(crate) output_dir: std::path::PathBuf,
    /// Root of the fixture corpus, for resolving `TestCase::path` to an absolute path.
    pub(crate) corpus_root: std::path::PathBuf,
    /// Forwarded to the Fixture Loader's archive reader.
    pub(crate) sanitize_extension: bool,
}

/// Runs the scheduler for `cfg.loops` iterations, returning the aggregate [`Statistics`].
pub(crate) async fn run(
    cfg: &SchedulerConfig,
    test_cases: &[TestCase],
    filter: &TestFilter,
    target_cfg: &TargetConfig,
    rpc: Arc<RpcClient>,
    comparator_cfg: ComparatorConfig,
    cancel: CancellationToken,
) -> Result<Statistics> {
    if cfg.waiting_time.is_some() && cfg.workers > 1 {
        return Err(eyre!("--waiting-time is incompatible with parallel mode"));
    }

    let mut stats = Statistics::default();

    for iteration in 0..cfg.loops {
        if cancel.is_cancelled() {
            break;
        }
        tracing::info!(target: "scheduler", iteration, "starting loop iteration");
        run_iteration(cfg, test_cases, filter, target_cfg, &rpc, &comparator_cfg, &cancel, &mut stats).await?;
    }

    print_summary(&stats);
    Ok(stats)
}

/// Runs a single self-contained iteration: schedule every matching test case, drain all
/// results, then return.
async fn run_iteration(
    cfg: &SchedulerConfig,
    test_cases: &[TestCase],
    filter: &TestFilter,
    target_cfg: &TargetConfig,
    rpc: &Arc<RpcClient>,
    comparator_cfg: &ComparatorConfig,
    cancel: &CancellationToken,
    stats: &mut Statistics,
) -> Result<()> {
    let descriptors = build_descriptors(cfg, test_cases, filter, stats);
    let progress = build_progress_bar(descriptors.len());

    let (test_tx, test_rx) = mpsc::channel::<TestDescriptor>(2000.min(descriptors.len().max(1)));
    let (result_tx, mut result_rx) = mpsc::channel::<(TestDescriptor, TestOutcome)>(2000.min(descriptors.len().max(1)));

    let test_rx = Arc::new(tokio::sync::Mutex::new(test_rx));
    let semaphore = Arc::new(Semaphore::new(cfg.workers.max(1)));
    let mut workers = JoinSet::new();

    for _ in 0..cfg.workers.max(1) {
        let test_rx = test_rx.clone();
        let result_tx = result_tx.clone();
        let semaphore = semaphore.clone();
        let rpc = rpc.clone();
        let comparator_cfg = comparator_cfg.clone();
        let target_cfg = target_cfg.clone();
        let cancel = cancel.clone();
        let output_dir = cfg.output_dir.clone();
        let corpus_root = cfg.corpus_root.clone();
        let sanitize_extension = cfg.sanitize_extension;

        workers.spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                let descriptor = {
                    let mut rx = test_rx.lock().await;
                    rx.recv().await
                };
                let Some(descriptor) = descriptor else {
                    break;
                };

                let outcome = execute(
                    &descriptor,
                    &rpc,
                    &comparator_cfg,
                    &target_cfg,
                    &output_dir,
                    &corpus_root,
                    sanitize_extension,
                    &cancel,
                )
                .await;
                if result_tx.send((descriptor, outcome)).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(result_tx);

    let submit_cancel = cancel.clone();
    let waiting_time = cfg.waiting_time;
    let submitter = tokio::spawn(async move {
        for descriptor in descriptors {
            if submit_cancel.is_cancelled() {
                break;
            }
            if test_tx.send(descriptor).await.is_err() {
                break;
            }
            if let Some(delay) = waiting_time {
                tokio::time::sleep(delay).await;
            }
        }
    });

    collect(cfg, &mut result_rx, cancel, stats, &progress).await;
    progress.finish_and_clear();

    let _ = submitter.await;
    while workers.join_next().await.is_some() {}

    Ok(())
}

/// Builds a live progress bar, drawn to stderr so it never interleaves with the per-test result
/// lines [`print_result`] writes to stdout. Generalizes the teacher's `MultiProgress`
/// aggregation (`pipeline`) to a single bar tracking the iteration's descriptor count.
fn build_progress_bar(total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::with_template("{elapsed_precise} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );
    pb
}

/// Applies Scheduling filters (a)-(d) in order — (d) `start_from_test`, (c) the requested test
/// number (`-t`, gated additionally on [`TestFilter::matches_test_number`] when a positive API
/// filter is active), (a) `is_under_test`, (b) `should_skip` — assigning a monotonic scheduling
/// index to every surviving (test case, transport) pair. Skipped test cases still increment
/// `stats.skipped` and print a skipped line.
fn build_descriptors(
    cfg: &SchedulerConfig,
    test_cases: &[TestCase],
    filter: &TestFilter,
    stats: &mut Statistics,
) -> Vec<TestDescriptor> {
    let mut descriptors = Vec::new();
    let mut scheduling_index = 0u64;
    let request_test_number = filter.request_test_number();

    for test_case in test_cases {
        if test_case.global_number < cfg.start_from_test {
            continue;
        }

        if request_test_number != -1 {
            if test_case.global_number != request_test_number as u64 {
                continue;
            }
            if filter.has_positive_api_filter() {
                let filename = test_case
                    .path
                    .file_name()
                    .map(|f| f.to_string_lossy().to_string())
                    .unwrap_or_default();
                if !TestFilter::matches_test_number(&filename, request_test_number) {
                    continue;
                }
            }
        }

        let path_str = test_case.path.to_string_lossy().to_string();

        if !filter.is_under_test(&test_case.api, &path_str) {
            continue;
        }

        if filter.should_skip(&test_case.api, &path_str, test_case.global_number) {
            stats.record_skipped();
            if cfg.verbose >= 1 {
                println!("{}. {} skipped", test_case.global_number, path_str.yellow());
            }
            continue;
        }

        for &transport in &cfg.transports {
            stats.record_scheduled();
            descriptors.push(TestDescriptor {
                test_case: test_case.clone(),
                transport,
                scheduling_index,
            });
            scheduling_index += 1;
        }
    }

    descriptors
}

/// Loads the fixture, dispatches the request via the RPC client, runs the comparator, and
/// returns the resulting [`TestOutcome`]. Never panics: every failure path is captured as
/// `success: false` plus a descriptive error message.
async fn execute(
    descriptor: &TestDescriptor,
    rpc: &RpcClient,
    comparator_cfg: &ComparatorConfig,
    target_cfg: &TargetConfig,
    output_dir: &Path,
    corpus_root: &Path,
    sanitize_extension: bool,
    cancel: &CancellationToken,
) -> TestOutcome {
    let relative_path = descriptor.test_case.path.clone();
    let fixture_path = corpus_root.join(&relative_path);

    let (command, mut metrics) = match fixture::load(&fixture_path, sanitize_extension) {
        Ok(v) => v,
        Err(e) => {
            return TestOutcome {
                success: false,
                error: Some(e.to_string()),
                colorized_diff: None,
                metrics: TestMetrics::default(),
            }
        }
    };

    let marshal_start = Instant::now();
    let request_bytes = match serde_json::to_vec(&command.request) {
        Ok(b) => b,
        Err(e) => {
            return TestOutcome {
                success: false,
                error: Some(e.to_string()),
                colorized_diff: None,
                metrics,
            }
        }
    };
    metrics.marshalling_time += marshal_start.elapsed();

    let method = command
        .request
        .get("method")
        .and_then(|m| m.as_str())
        .unwrap_or_default();

    let Some(target) = config::resolve_target(target_cfg, TargetRole::DefaultDaemon, method) else {
        return TestOutcome {
            success: false,
            error: Some(format!("no target resolved for method {method}")),
            colorized_diff: None,
            metrics,
        };
    };

    let reference_request_bytes = comparator_cfg
        .compare_against_reference
        .then(|| request_bytes.clone());

    let (actual, call_metrics) = match rpc.call(cancel, &target, descriptor.transport, request_bytes).await {
        Ok(v) => v,
        Err(e) => {
            return TestOutcome {
                success: false,
                error: Some(e.to_string()),
                colorized_diff: None,
                metrics,
            }
        }
    };
    metrics.merge(call_metrics);

    let path_options = command
        .test
        .as_ref()
        .and_then(|t| t.metadata.as_ref())
        .and_then(|m| m.response.as_ref())
        .map(|r| r.path_options.clone())
        .unwrap_or_default();

    // In reference mode every request is dispatched a second time, to the other daemon, and the
    // two live responses are compared against each other instead of against the fixture's
    // recorded expectation.
    if comparator_cfg.compare_against_reference {
        let Some(other_target) = config::resolve_target(target_cfg, TargetRole::OtherDaemon, method) else {
            return TestOutcome {
                success: false,
                error: Some(format!("no reference target resolved for method {method}")),
                colorized_diff: None,
                metrics,
            };
        };

        let reference_request_bytes = reference_request_bytes.expect("set above when compare_against_reference");
        let (reference, reference_call_metrics) = match rpc
            .call(cancel, &other_target, descriptor.transport, reference_request_bytes)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                return TestOutcome {
                    success: false,
                    error: Some(e.to_string()),
                    colorized_diff: None,
                    metrics,
                }
            }
        };
        metrics.merge(reference_call_metrics);

        let response_disambiguator = config::disambiguator(target_cfg, TargetRole::DefaultDaemon, method);
        let exp_response_disambiguator = config::disambiguator(target_cfg, TargetRole::OtherDaemon, method);
        let paths = config::output_paths(
            output_dir,
            &relative_path,
            response_disambiguator.as_deref(),
            exp_response_disambiguator.as_deref(),
        );

        return match compare::process(comparator_cfg, &actual, &reference, &path_options, &paths, cancel).await {
            Ok(outcome) => {
                metrics.merge(outcome.metrics);
                TestOutcome {
                    success: outcome.equal,
                    error: (!outcome.equal).then(|| format!("diff mismatch, see {}", paths.diff.display())),
                    colorized_diff: outcome.colorized_diff,
                    metrics,
                }
            }
            Err(e) => TestOutcome {
                success: false,
                error: Some(e.to_string()),
                colorized_diff: None,
                metrics,
            },
        };
    }

    let Some(expected) = &command.response else {
        return TestOutcome {
            success: true,
            error: None,
            colorized_diff: None,
            metrics,
        };
    };

    let paths = config::output_paths(output_dir, &relative_path, None, None);

    match compare::process(comparator_cfg, &actual, expected, &path_options, &paths, cancel).await {
        Ok(outcome) => {
            metrics.merge(outcome.metrics);
            TestOutcome {
                success: outcome.equal,
                error: (!outcome.equal).then(|| format!("diff mismatch, see {}", paths.diff.display())),
                colorized_diff: outcome.colorized_diff,
                metrics,
            }
        }
        Err(e) => TestOutcome {
            success: false,
            error: Some(e.to_string()),
            colorized_diff: None,
            metrics,
        },
    }
}

/// Reads the result channel, buffering out-of-order completions keyed by scheduling index, and
/// prints each result to stdout strictly in submission order once all lower indices have been
/// printed. On a failing result, triggers cancellation if `exit_on_fail` is set.
async fn collect(
    cfg: &SchedulerConfig,
    result_rx: &mut mpsc::Receiver<(TestDescriptor, TestOutcome)>,
    cancel: &CancellationToken,
    stats: &mut Statistics,
    progress: &ProgressBar,
) {
    let mut reorder_buffer: std::collections::BTreeMap<u64, (TestDescriptor, TestOutcome)> =
        std::collections::BTreeMap::new();
    let mut next_index = 0u64;

    while let Some((descriptor, outcome)) = result_rx.recv().await {
        reorder_buffer.insert(descriptor.scheduling_index, (descriptor, outcome));

        while let Some((descriptor, outcome)) = reorder_buffer.remove(&next_index) {
            stats.record(outcome.success, outcome.metrics);
            progress.inc(1);
            progress.set_message(format!("{} ok / {} failed", stats.success, stats.failure));
            print_result(cfg, &descriptor, &outcome);

            if !outcome.success && cfg.exit_on_fail {
                cancel.cancel();
            }

            next_index += 1;
        }
    }
}

/// Formats and prints a single result line: `NNNN. <transport,15>::<name,60>   OK` or a failure
/// line with the error message and an optional colorized diff underneath.
fn print_result(cfg: &SchedulerConfig, descriptor: &TestDescriptor, outcome: &TestOutcome) {
    let name = descriptor
        .test_case
        .path
        .with_extension("")
        .to_string_lossy()
        .into_owned();

    let line = format!(
        "{:>4}. {:<15}::{:<60}",
        descriptor.test_case.global_number,
        descriptor.transport.name(),
        name
    );

    if outcome.success {
        if cfg.display_only_fail {
            return;
        }
        let status = "OK".green().bold().to_string();
        if cfg.verbose == 0 {
            print!("{line}   {status}\r");
            let _ = std::io::stdout().flush();
        } else {
            println!("{line}   {status}");
        }
        return;
    }

    let error = outcome.error.clone().unwrap_or_else(|| "unknown error".to_string());
    println!("{line}   {} {}", "failed:".red().bold(), error);
    if let Some(diff) = &outcome.colorized_diff {
        println!("{diff}");
    }
}

/// Prints the final run-wide summary after the last iteration.
fn print_summary(stats: &Statistics) {
    println!(
        "\n{} — {} executed ({} {}, {} {}), {} scheduled, {} skipped",
        "Summary".bold(),
        stats.executed(),
        stats.success.to_string().green(),
        "passed",
        stats.failure.to_string().red(),
        "failed",
        stats.scheduled,
        stats.skipped,
    );
    println!(
        "round-trip {:?} · marshal {:?} · unmarshal {:?} · {} comparisons, {} fast-path equal",
        stats.metrics.round_trip_time,
        stats.metrics.marshalling_time,
        stats.metrics.unmarshalling_time,
        stats.metrics.comparison_count,
        stats.metrics.equal_count,
    );
}
