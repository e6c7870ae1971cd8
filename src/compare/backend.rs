//! Pluggable diff backends. Each renders the difference between an actual and expected JSON
//! value to disk and reports whether the two were equal; the "external tool" backends share a
//! timeout/capture helper with the one cancellation-aware subprocess runner in [`crate::util`].

use crate::util::{self, RunError};
use async_trait::async_trait;
use color_eyre::owo_colors::OwoColorize;
use serde_json::Value;
use std::{collections::BTreeMap, path::Path, time::Duration};
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Shared timeout for library calls and external diff-tool invocations.
pub(crate) const DIFF_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised while running a diff backend.
#[derive(Debug, Error)]
pub(crate) enum DiffBackendError {
    /// The backend exceeded [`DIFF_TIMEOUT`].
    #[error("diff backend timed out")]
    Timeout,
    /// The comparison was aborted by cancellation.
    #[error("diff backend cancelled")]
    Cancelled,
    /// An I/O error occurred while running the backend.
    #[error("diff backend I/O error: {0}")]
    Io(String),
}

impl From<RunError> for DiffBackendError {
    fn from(e: RunError) -> Self {
        match e {
            RunError::Timeout(_) => DiffBackendError::Timeout,
            RunError::Cancelled => DiffBackendError::Cancelled,
            RunError::Io(e) => DiffBackendError::Io(e.to_string()),
        }
    }
}

/// The outcome of running a diff backend.
#[derive(Debug, Clone)]
pub(crate) struct DiffOutcome {
    /// Whether the two inputs were equal according to this backend.
    pub(crate) equal: bool,
    /// An ANSI-colored textual rendering, populated for interactive single-test runs.
    pub(crate) colorized: Option<String>,
}

/// The minimal interface for a pluggable structural-diff backend.
#[async_trait]
pub(crate) trait DiffBackend {
    /// Computes the diff between `actual` and `expected`, writing a rendered diff to
    /// `diff_path`. `path_options` carries the fixture's `metadata.response.pathOptions` blob,
    /// consumed only by backends that support per-path relaxation. `cancel` bounds the external-
    /// tool backends' subprocess the same way it bounds every other suspension point.
    async fn diff(
        &self,
        actual: &Value,
        expected: &Value,
        path_options: &BTreeMap<String, Value>,
        diff_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<DiffOutcome, DiffBackendError>;
}

/// A single path-addressed difference (`a.b[0]` -> {old, new}).
#[derive(Debug, Clone, serde::Serialize)]
pub(crate) struct PathDiff {
    /// The value found on the expected side, if any.
    old: Option<Value>,
    /// The value found on the actual side, if any.
    new: Option<Value>,
}

/// A map/array structural diff implemented directly over `serde_json::Value`, with array-order
/// sensitivity configurable; this backend defaults to sorting primitive arrays before diffing.
pub(crate) struct NativeStructural {
    /// Whether primitive (scalar-only) arrays are sorted before comparison.
    pub(crate) sort_primitive_arrays: bool,
}

impl Default for NativeStructural {
    fn default() -> Self {
        Self {
            sort_primitive_arrays: true,
        }
    }
}

#[async_trait]
impl DiffBackend for NativeStructural {
    async fn diff(
        &self,
        actual: &Value,
        expected: &Value,
        _path_options: &BTreeMap<String, Value>,
        diff_path: &Path,
        _cancel: &CancellationToken,
    ) -> Result<DiffOutcome, DiffBackendError> {
        let mut diffs = BTreeMap::new();
        self.walk("", expected, actual, &mut diffs);

        let equal = diffs.is_empty();
        let rendered = serde_json::to_string_pretty(&diffs)
            .map_err(|e| DiffBackendError::Io(e.to_string()))?;
        tokio::fs::write(diff_path, &rendered)
            .await
            .map_err(|e| DiffBackendError::Io(e.to_string()))?;

        let colorized = (!equal).then(|| self.colorize(&diffs));

        Ok(DiffOutcome { equal, colorized })
    }
}

impl NativeStructural {
    /// Recursively compares `expected` against `actual` rooted at `prefix`, recording every
    /// divergent path into `out`.
    fn walk(&self, prefix: &str, expected: &Value, actual: &Value, out: &mut BTreeMap<String, PathDiff>) {
        match (expected, actual) {
            (Value::Object(exp_map), Value::Object(act_map)) => {
                let mut keys: Vec<&String> = exp_map.keys().chain(act_map.keys()).collect();
                keys.sort();
                keys.dedup();
                for key in keys {
                    let path = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{prefix}.{key}")
                    };
                    match (exp_map.get(key), act_map.get(key)) {
                        (Some(e), Some(a)) => self.walk(&path, e, a, out),
                        (Some(e), None) => {
                            out.insert(path, PathDiff { old: Some(e.clone()), new: None });
                        }
                        (None, Some(a)) => {
                            out.insert(path, PathDiff { old: None, new: Some(a.clone()) });
                        }
                        (None, None) => unreachable!("key came from one of the two maps"),
                    }
                }
            }
            (Value::Array(exp_arr), Value::Array(act_arr)) => {
                let (exp_sorted, act_sorted) = if self.sort_primitive_arrays
                    && exp_arr.iter().all(is_scalar)
                    && act_arr.iter().all(is_scalar)
                {
                    let mut e = exp_arr.clone();
                    let mut a = act_arr.clone();
                    e.sort_by(scalar_cmp);
                    a.sort_by(scalar_cmp);
                    (e, a)
                } else {
                    (exp_arr.clone(), act_arr.clone())
                };

                let max_len = exp_sorted.len().max(act_sorted.len());
                for i in 0..max_len {
                    let path = format!("{prefix}[{i}]");
                    match (exp_sorted.get(i), act_sorted.get(i)) {
                        (Some(e), Some(a)) => self.walk(&path, e, a, out),
                        (Some(e), None) => {
                            out.insert(path, PathDiff { old: Some(e.clone()), new: None });
                        }
                        (None, Some(a)) => {
                            out.insert(path, PathDiff { old: None, new: Some(a.clone()) });
                        }
                        (None, None) => unreachable!("i < max_len"),
                    }
                }
            }
            (e, a) if e == a => {}
            (e, a) => {
                out.insert(
                    prefix.to_string(),
                    PathDiff {
                        old: Some(e.clone()),
                        new: Some(a.clone()),
                    },
                );
            }
        }
    }

    /// Renders `diffs` as ANSI-colored text for the single-test interactive path.
    fn colorize(&self, diffs: &BTreeMap<String, PathDiff>) -> String {
        let mut out = String::new();
        for (path, diff) in diffs {
            out.push_str(&format!("{} {}\n", path.bold(), "differs".red()));
            if let Some(old) = &diff.old {
                out.push_str(&format!("  {} {}\n", "-".red(), old));
            }
            if let Some(new) = &diff.new {
                out.push_str(&format!("  {} {}\n", "+".green(), new));
            }
        }
        out
    }
}

/// True for any JSON value that is not an object or array.
fn is_scalar(v: &Value) -> bool {
    !matches!(v, Value::Object(_) | Value::Array(_))
}

/// A total order over scalar JSON values, used only to normalize primitive-array ordering
/// before diffing.
fn scalar_cmp(a: &Value, b: &Value) -> std::cmp::Ordering {
    a.to_string().cmp(&b.to_string())
}

/// Invokes the embedded JSON-diff library. Since no dependency-light `jd`-equivalent crate is
/// pulled into this workspace (see DESIGN.md), this backend is implemented as a call to the
/// `jd` CLI binary under the same timeout/capture helper used by the external backends, with
/// `path_options` best-effort translated into `-p` path-exclusion flags.
pub(crate) struct LibraryJd;

#[async_trait]
impl DiffBackend for LibraryJd {
    async fn diff(
        &self,
        actual: &Value,
        expected: &Value,
        path_options: &BTreeMap<String, Value>,
        diff_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<DiffOutcome, DiffBackendError> {
        let (actual_path, expected_path) = sibling_inputs(diff_path);
        write_json(&actual_path, actual).await?;
        write_json(&expected_path, expected).await?;

        let mut args = vec!["-set".to_string(), "merge".to_string()];
        for ignored_path in path_options.keys() {
            args.push("-p".to_string());
            args.push(ignored_path.clone());
        }
        args.push(expected_path.display().to_string());
        args.push(actual_path.display().to_string());

        let mut cmd = Command::new("jd");
        cmd.args(&args);
        let (stdout, _stderr) = util::run_with_timeout(&mut cmd, DIFF_TIMEOUT, cancel).await?;
        tokio::fs::write(diff_path, &stdout)
            .await
            .map_err(|e| DiffBackendError::Io(e.to_string()))?;

        Ok(DiffOutcome {
            equal: stdout.trim().is_empty(),
            colorized: None,
        })
    }
}

/// Shells out to the `json-diff` binary; if it reports anything on stderr, that is treated as a
/// transient tool failure and a single retry is attempted with plain `diff`.
pub(crate) struct ExternalJsonDiff;

#[async_trait]
impl DiffBackend for ExternalJsonDiff {
    async fn diff(
        &self,
        actual: &Value,
        expected: &Value,
        _path_options: &BTreeMap<String, Value>,
        diff_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<DiffOutcome, DiffBackendError> {
        let (actual_path, expected_path) = sibling_inputs(diff_path);
        write_json(&actual_path, actual).await?;
        write_json(&expected_path, expected).await?;

        let args = [expected_path.display().to_string(), actual_path.display().to_string()];

        let mut cmd = Command::new("json-diff");
        cmd.args(&args);
        let (stdout, stderr) = util::run_with_timeout(&mut cmd, DIFF_TIMEOUT, cancel).await?;

        let stdout = if !stderr.trim().is_empty() {
            let mut fallback = Command::new("diff");
            fallback.args(&args);
            let (stdout, _stderr) = util::run_with_timeout(&mut fallback, DIFF_TIMEOUT, cancel).await?;
            stdout
        } else {
            stdout
        };

        tokio::fs::write(diff_path, &stdout)
            .await
            .map_err(|e| DiffBackendError::Io(e.to_string()))?;

        Ok(DiffOutcome {
            equal: stdout.trim().is_empty(),
            colorized: None,
        })
    }
}

/// Shells out to the plain `diff` binary.
pub(crate) struct ExternalDiff;

#[async_trait]
impl DiffBackend for ExternalDiff {
    async fn diff(
        &self,
        actual: &Value,
        expected: &Value,
        _path_options: &BTreeMap<String, Value>,
        diff_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<DiffOutcome, DiffBackendError> {
        let (actual_path, expected_path) = sibling_inputs(diff_path);
        write_json(&actual_path, actual).await?;
        write_json(&expected_path, expected).await?;

        let args = [expected_path.display().to_string(), actual_path.display().to_string()];
        let mut cmd = Command::new("diff");
        cmd.args(&args);
        let (stdout, _stderr) = util::run_with_timeout(&mut cmd, DIFF_TIMEOUT, cancel).await?;

        tokio::fs::write(diff_path, &stdout)
            .await
            .map_err(|e| DiffBackendError::Io(e.to_string()))?;

        Ok(DiffOutcome {
            equal: stdout.trim().is_empty(),
            colorized: None,
        })
    }
}

/// Writes `value` as pretty-printed JSON to `path`.
async fn write_json(path: &Path, value: &Value) -> Result<(), DiffBackendError> {
    let rendered = serde_json::to_string_pretty(value).map_err(|e| DiffBackendError::Io(e.to_string()))?;
    tokio::fs::write(path, rendered)
        .await
        .map_err(|e| DiffBackendError::Io(e.to_string()))
}

/// Derives sibling `-response.json` / `-expResponse.json` paths for `diff_path`, reusing the
/// naming convention from [`crate::config::output_paths`].
fn sibling_inputs(diff_path: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let actual = diff_path.with_file_name(
        diff_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .replace("-diff.json", "-response.json"),
    );
    let expected = diff_path.with_file_name(
        diff_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .replace("-diff.json", "-expResponse.json"),
    );
    (actual, expected)
}
