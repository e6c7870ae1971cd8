#![warn(missing_debug_implementations, missing_docs, rustdoc::all)]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! `rpctestgen` — a differential conformance and performance harness for JSON-RPC Ethereum-style
//! servers. Replays a fixture corpus against one or two live endpoints, compares actual vs.
//! expected responses, and reports per-test success, timing, and structured diffs.

use clap::Parser;
use color_eyre::Result;

mod archive;
mod cli;
mod compare;
mod config;
mod discovery;
mod filter;
mod fixture;
mod loadgen;
mod rpc;
mod scheduler;
mod stats;
mod util;

/// Process exit code returned when a subcommand hits a configuration or I/O error before any
/// test could run, per the exit-code contract: `0` all-success, `1` any test failed, `-1`
/// configuration or I/O error.
const CONFIG_OR_IO_ERROR_EXIT_CODE: i32 = -1;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse().init_tracing_subscriber()?;

    let code = match cli.run().await {
        Ok(code) => code,
        Err(report) => {
            tracing::error!(target: "main", error = %report, "run failed");
            CONFIG_OR_IO_ERROR_EXIT_CODE
        }
    };

    std::process::exit(code);
}
