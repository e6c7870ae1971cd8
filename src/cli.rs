//! CLI definition for `rpctestgen`.
//!
//! Generalizes the teacher's `Cli`/`CliSubcommand` shape (`Matrix`/`Test`/`Generate`) to the
//! three actions this harness exposes: `Test` (the full conformance run), `Load` (the
//! load-generation boundary contract), and `Jwt` (the `create-JWT file` utility).

use crate::{
    compare::{ComparatorConfig, DiffBackendSelector},
    config::TargetConfig,
    discovery,
    filter::{TestFilter, TestFilterConfig},
    loadgen::{self, LoadBound, LoadConfig},
    rpc::{jwt, RpcClient, Transport},
    scheduler::{self, SchedulerConfig},
};
use clap::{ArgAction, Args, Parser, Subcommand};
use cli_table::{Cell, Style, Table};
use color_eyre::{
    eyre::{eyre, Context},
    Result,
};
use std::{path::PathBuf, str::FromStr, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::Level;

/// The CLI options for `rpctestgen`.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub(crate) struct Cli {
    /// Verbosity level (0-2+); `0` prints passing tests with a trailing `\r` so later lines
    /// overwrite, `>= 1` terminates every line normally.
    #[arg(long, short, global = true, action = ArgAction::Count)]
    pub v: u8,
    /// The subcommand to run.
    #[clap(subcommand)]
    pub subcommand: CliSubcommand,
}

impl Cli {
    /// Parses the CLI arguments and runs the application, returning the process exit code.
    pub(crate) async fn run(self) -> Result<i32> {
        let cancel = CancellationToken::new();
        let ctrlc_cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                ctrlc_cancel.cancel();
            }
        });

        match self.subcommand {
            CliSubcommand::Test(cfg) => run_test(cfg, self.v, cancel).await,
            CliSubcommand::Load(cfg) => run_load(cfg, cancel).await,
            CliSubcommand::Jwt(cfg) => run_jwt(cfg).await,
        }
    }

    /// Initializes the tracing subscriber.
    pub(crate) fn init_tracing_subscriber(self) -> Result<Self> {
        color_eyre::install()?;

        let subscriber = tracing_subscriber::fmt()
            .with_max_level(match self.v {
                0 => Level::INFO,
                1 => Level::DEBUG,
                _ => Level::TRACE,
            })
            .finish();

        tracing::subscriber::set_global_default(subscriber).map_err(|e| eyre!(e))?;

        Ok(self)
    }
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum CliSubcommand {
    /// Runs the fixture corpus as a conformance test suite.
    Test(TestConfig),
    /// Replays the fixture corpus as a load generator against one endpoint.
    Load(LoadCliConfig),
    /// Generates a new JWT secret file.
    Jwt(JwtConfig),
}

#[derive(Args, Debug, Clone)]
pub(crate) struct TestConfig {
    /// Root of the fixture corpus (`<root>/<api>/test_NN.<ext>`).
    #[clap(long)]
    pub(crate) corpus: PathBuf,
    /// The blockchain/network name used to build `<network>/<api>` keys.
    #[clap(long, default_value = "mainnet")]
    pub(crate) network: String,
    /// Directory under the corpus root that Discovery always skips.
    #[clap(long, default_value = "results")]
    pub(crate) results_dir_name: String,
    /// Directory response/expected-response/diff artifacts are written under.
    #[clap(long, default_value = "results")]
    pub(crate) output_dir: PathBuf,

    /// Host shared by every resolved target.
    #[clap(long, default_value = "127.0.0.1")]
    pub(crate) host: String,
    /// The default daemon's regular JSON-RPC port.
    #[clap(long, default_value_t = 8545)]
    pub(crate) server_port: u16,
    /// The default daemon's engine-API port.
    #[clap(long, default_value_t = 8551)]
    pub(crate) engine_port: u16,
    /// The alternate daemon's regular JSON-RPC port, used in dual-endpoint / reference mode.
    #[clap(long, default_value_t = 51515)]
    pub(crate) daemon_port: u16,
    /// The alternate daemon's engine-API port, used in dual-endpoint / reference mode.
    #[clap(long, default_value_t = 51516)]
    pub(crate) daemon_engine_port: u16,
    /// A pre-configured external provider URL, used verbatim instead of `host:port`.
    #[clap(long)]
    pub(crate) external_provider: Option<String>,
    /// Run every dispatched request against both the default and alternate daemon, comparing the
    /// two live responses instead of against the fixture's recorded expectation.
    #[clap(long)]
    pub(crate) compare_against_reference: bool,

    /// Transports to exercise, comma-separated from `http`, `http_comp`, `https`, `websocket`,
    /// `websocket_comp`.
    #[clap(long, value_delimiter = ',', default_value = "http")]
    pub(crate) transport: Vec<String>,
    /// Path to a JWT secret file (ASCII hex, optionally `0x`-prefixed) used to mint a bearer
    /// token for every request.
    #[clap(long)]
    pub(crate) jwt_secret: Option<PathBuf>,

    /// Run serially (one worker); equivalent to `--workers 1`.
    #[clap(long)]
    pub(crate) serial: bool,
    /// Number of worker tasks per loop iteration. Ignored when `--serial` is set.
    #[clap(long, default_value_t = 4)]
    pub(crate) workers: usize,
    /// Number of self-contained loop iterations to run.
    #[clap(long, default_value_t = 1)]
    pub(crate) loops: u64,
    /// Pause, in milliseconds, between consecutive submissions within an iteration. Incompatible
    /// with more than one worker.
    #[clap(long)]
    pub(crate) waiting_time_ms: Option<u64>,
    /// Trigger global cancellation on the first failed test instead of continuing.
    #[clap(long)]
    pub(crate) exit_on_fail: bool,

    /// Run only the test with this global number.
    #[clap(short = 't', long, default_value_t = -1)]
    pub(crate) test: i64,
    /// Schedule only test cases with `global_number >= K`.
    #[clap(long, default_value_t = 0)]
    pub(crate) start_from_test: u64,
    /// Include only APIs whose name contains one of these comma-separated substrings.
    #[clap(short = 'a', long, value_delimiter = ',')]
    pub(crate) include_with: Vec<String>,
    /// Include only APIs whose name exactly matches one of these comma-separated names.
    #[clap(short = 'A', long, value_delimiter = ',')]
    pub(crate) include_exact: Vec<String>,
    /// Exclude any API or path containing one of these comma-separated substrings.
    #[clap(long, value_delimiter = ',')]
    pub(crate) exclude_api: Vec<String>,
    /// Exclude these exact, comma-separated global test numbers.
    #[clap(long, value_delimiter = ',')]
    pub(crate) exclude_test: Vec<i64>,
    /// Run only tests that depend on the chain head (the curated latest-block list).
    #[clap(long)]
    pub(crate) tests_on_latest_block: bool,
    /// Overrides the compiled-in default-skip list from a file, one `<network>/<api>` entry per
    /// line.
    #[clap(long)]
    pub(crate) skip_list: Option<PathBuf>,
    /// Overrides the compiled-in latest-block list from a file, one `<network>/<path>` entry per
    /// line.
    #[clap(long)]
    pub(crate) latest_block_list: Option<PathBuf>,

    /// Only print failing tests.
    #[clap(long)]
    pub(crate) display_only_fail: bool,
    /// Keep response/expResponse/diff artifacts on disk even when a comparison succeeds.
    #[clap(long)]
    pub(crate) dump_response: bool,
    /// Skip comparison entirely; every dispatched call is treated as a pass.
    #[clap(long)]
    pub(crate) without_compare_results: bool,
    /// Treat differing `error` bodies as equal, ignoring `code`/`message`.
    #[clap(long)]
    pub(crate) do_not_compare_error: bool,
    /// Which diff backend renders the detailed comparison.
    #[clap(long, default_value = "native-structural")]
    pub(crate) diff_backend: String,
    /// Whether a detected-compressed archive is renamed in place with its canonical extension.
    #[clap(long)]
    pub(crate) sanitize_extension: bool,
}

#[derive(Args, Debug, Clone)]
pub(crate) struct LoadCliConfig {
    /// Root of the fixture corpus to replay.
    #[clap(long)]
    pub(crate) corpus: PathBuf,
    /// Directory under the corpus root that Discovery always skips.
    #[clap(long, default_value = "results")]
    pub(crate) results_dir_name: String,
    /// The target endpoint (`host:port`, or a full URL).
    #[clap(long)]
    pub(crate) target: String,
    /// The transport to exercise.
    #[clap(long, default_value = "http")]
    pub(crate) transport: String,
    /// Concurrent in-flight calls.
    #[clap(long, default_value_t = 8)]
    pub(crate) concurrency: usize,
    /// Run for this many seconds. Mutually exclusive with `--iterations`.
    #[clap(long)]
    pub(crate) duration_secs: Option<u64>,
    /// Run for this many total calls. Mutually exclusive with `--duration-secs`.
    #[clap(long)]
    pub(crate) iterations: Option<u64>,
    /// Directory the CSV and JSON summary reports are written to.
    #[clap(long, default_value = "load-results")]
    pub(crate) report_dir: PathBuf,
    /// Path to a JWT secret file used to mint a bearer token for every request.
    #[clap(long)]
    pub(crate) jwt_secret: Option<PathBuf>,
    /// Whether a detected-compressed archive is renamed in place.
    #[clap(long)]
    pub(crate) sanitize_extension: bool,
}

#[derive(Args, Debug, Clone)]
pub(crate) struct JwtConfig {
    /// Path to write the generated secret to.
    #[clap(long)]
    pub(crate) out: PathBuf,
    /// Length, in hex characters, of the generated secret.
    #[clap(long, default_value_t = 64)]
    pub(crate) hex_len: usize,
}

/// Runs the `Test` subcommand: discovers the corpus, applies the filter, and drives the
/// scheduler to completion.
async fn run_test(cfg: TestConfig, verbose: u8, cancel: CancellationToken) -> Result<i32> {
    if cfg.waiting_time_ms.is_some() && !cfg.serial && cfg.workers > 1 {
        return Err(eyre!("--waiting-time-ms is incompatible with parallel mode"));
    }

    let discovery = discovery::discover(&cfg.corpus, &cfg.results_dir_name)
        .wrap_err("fixture discovery failed")?;
    tracing::info!(
        target: "cli",
        apis = discovery.api_count,
        total = discovery.total_tests,
        "discovered fixtures"
    );

    let filter_cfg = TestFilterConfig {
        network: cfg.network.clone(),
        include_apis_exact: cfg.include_exact.clone(),
        include_apis_substring: cfg.include_with.clone(),
        exclude_apis: cfg.exclude_api.clone(),
        exclude_test_numbers: cfg.exclude_test.clone(),
        request_test_number: cfg.test,
        latest_block_only: cfg.tests_on_latest_block,
        default_skip_list: read_list_override(cfg.skip_list.as_deref())?,
        latest_block_list: read_list_override(cfg.latest_block_list.as_deref())?,
    };
    let filter = TestFilter::new(filter_cfg);

    let transports = cfg
        .transport
        .iter()
        .map(|t| Transport::from_str(t).map_err(|e| eyre!(e.to_string())))
        .collect::<Result<Vec<_>>>()
        .wrap_err("invalid --transport value")?;

    let jwt_secret = cfg
        .jwt_secret
        .as_deref()
        .map(jwt::read_secret_file)
        .transpose()?;
    let rpc = Arc::new(RpcClient::new(jwt_secret, verbose >= 2));

    let target_cfg = TargetConfig {
        host: cfg.host.clone(),
        default_rpc_port: cfg.server_port,
        default_engine_port: cfg.engine_port,
        other_rpc_port: cfg.daemon_port,
        other_engine_port: cfg.daemon_engine_port,
        external_provider_url: cfg.external_provider.clone(),
    };

    let comparator_cfg = ComparatorConfig {
        backend: DiffBackendSelector::from_str(&cfg.diff_backend)
            .map_err(|e| eyre!(e.to_string()))?,
        without_compare_results: cfg.without_compare_results,
        do_not_compare_error: cfg.do_not_compare_error,
        force_dump: cfg.dump_response,
        compare_against_reference: cfg.compare_against_reference,
    };

    let scheduler_cfg = SchedulerConfig {
        workers: if cfg.serial { 1 } else { cfg.workers },
        loops: cfg.loops,
        waiting_time: cfg.waiting_time_ms.map(Duration::from_millis),
        exit_on_fail: cfg.exit_on_fail,
        start_from_test: cfg.start_from_test,
        transports,
        verbose,
        display_only_fail: cfg.display_only_fail,
        output_dir: cfg.output_dir,
        corpus_root: cfg.corpus,
        sanitize_extension: cfg.sanitize_extension,
    };

    let stats = scheduler::run(
        &scheduler_cfg,
        &discovery.test_cases,
        &filter,
        &target_cfg,
        rpc,
        comparator_cfg,
        cancel,
    )
    .await?;

    print_summary_table(&scheduler_cfg.transports, &stats);

    Ok(if stats.failure > 0 { 1 } else { 0 })
}

/// Runs the `Load` subcommand: discovers the corpus and replays it against one endpoint.
async fn run_load(cfg: LoadCliConfig, cancel: CancellationToken) -> Result<i32> {
    let discovery = discovery::discover(&cfg.corpus, &cfg.results_dir_name)
        .wrap_err("fixture discovery failed")?;

    let transport = Transport::from_str(&cfg.transport).map_err(|e| eyre!(e.to_string()))?;
    let bound = match (cfg.duration_secs, cfg.iterations) {
        (Some(d), None) => LoadBound::Duration(Duration::from_secs(d)),
        (None, Some(n)) => LoadBound::Iterations(n),
        (None, None) => LoadBound::Iterations(discovery.total_tests as u64),
        (Some(_), Some(_)) => {
            return Err(eyre!("--duration-secs and --iterations are mutually exclusive"))
        }
    };

    let jwt_secret = cfg
        .jwt_secret
        .as_deref()
        .map(jwt::read_secret_file)
        .transpose()?;
    let rpc = Arc::new(RpcClient::new(jwt_secret, false));
    let sanitize_extension = cfg.sanitize_extension;

    let load_cfg = LoadConfig {
        concurrency: cfg.concurrency,
        bound,
        transport,
        target: cfg.target,
        report_dir: cfg.report_dir,
        corpus_root: cfg.corpus,
    };

    let report = loadgen::run(&load_cfg, &discovery.test_cases, rpc, sanitize_extension, cancel).await?;
    tracing::info!(target: "cli", ?report, "load run complete");

    Ok(if report.errors > 0 { 1 } else { 0 })
}

/// Runs the `Jwt` subcommand: generates a fresh secret file.
async fn run_jwt(cfg: JwtConfig) -> Result<i32> {
    jwt::generate_secret_file(&cfg.out, Some(cfg.hex_len))?;
    println!("wrote JWT secret to {}", cfg.out.display());
    Ok(0)
}

/// Reads a newline-delimited list override file, if `path` is set.
fn read_list_override(path: Option<&std::path::Path>) -> Result<Option<Vec<String>>> {
    let Some(path) = path else { return Ok(None) };
    let raw = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read list override {:?}", path))?;
    Ok(Some(
        raw.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect(),
    ))
}

/// Prints the final per-run summary as a `cli-table`, one row per transport exercised.
fn print_summary_table(transports: &[Transport], stats: &crate::stats::Statistics) {
    let rows = transports
        .iter()
        .map(|t| {
            vec![
                t.name().cell(),
                stats.executed().to_string().cell(),
                stats.success.to_string().cell(),
                stats.failure.to_string().cell(),
                stats.skipped.to_string().cell(),
            ]
        })
        .collect::<Vec<_>>();

    let table = rows
        .table()
        .title(vec![
            "Transport".cell(),
            "Executed".cell(),
            "Passed".cell(),
            "Failed".cell(),
            "Skipped".cell(),
        ])
        .bold(true);
    let _ = cli_table::print_stdout(table);
}
