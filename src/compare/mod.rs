//! The comparator: decides whether an actual response matches a reference or fixture-recorded
//! expectation, writing diagnostic artifacts to disk along the way.

mod backend;

use crate::config::OutputPaths;
use crate::stats::TestMetrics;
use backend::{DiffBackend, DiffOutcome, ExternalDiff, ExternalJsonDiff, LibraryJd, NativeStructural};
use serde_json::Value;
use std::{collections::BTreeMap, collections::BTreeSet, str::FromStr};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Selects which [`DiffBackend`] implementation renders the detailed diff step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DiffBackendSelector {
    /// A map/array structural diff implemented directly over `serde_json::Value`.
    NativeStructural,
    /// The embedded JSON-diff library path (backed by the `jd` CLI; see module docs).
    LibraryJd,
    /// Shells out to `json-diff`, retrying with plain `diff` if it fails.
    ExternalJsonDiff,
    /// Shells out to plain `diff`.
    ExternalDiff,
}

impl FromStr for DiffBackendSelector {
    type Err = CompareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native-structural" => Ok(Self::NativeStructural),
            "library-jd" => Ok(Self::LibraryJd),
            "external-json-diff" => Ok(Self::ExternalJsonDiff),
            "external-diff" => Ok(Self::ExternalDiff),
            other => Err(CompareError::UnknownBackend(other.to_string())),
        }
    }
}

/// Configuration governing comparator behavior, threaded in from the CLI.
#[derive(Debug, Clone)]
pub(crate) struct ComparatorConfig {
    /// Which detailed-diff backend to use when the fast path doesn't settle the comparison.
    pub(crate) backend: DiffBackendSelector,
    /// Skip comparison entirely: every dispatched call is treated as a pass. Artifacts are still
    /// written when `force_dump` is set.
    pub(crate) without_compare_results: bool,
    /// Treat a non-null `error` field as equal to any other non-null `error` field, ignoring
    /// `code`/`message` differences, rather than requiring them to match exactly.
    pub(crate) do_not_compare_error: bool,
    /// Keep the response/expResponse/diff artifacts on disk even when the comparison succeeds.
    pub(crate) force_dump: bool,
    /// Whether the reference value came from a live second endpoint rather than a fixture
    /// recording, gating tolerance rule (a) below.
    pub(crate) compare_against_reference: bool,
}

/// Errors raised while comparing or persisting diff artifacts.
#[derive(Debug, Error)]
pub(crate) enum CompareError {
    /// The configured backend name did not match a known variant.
    #[error("unknown diff backend: {0}")]
    UnknownBackend(String),
    /// Writing an artifact file failed.
    #[error("failed to write artifact {path}: {source}")]
    Artifact {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// The selected backend failed (timed out, or the subprocess could not be run).
    #[error(transparent)]
    Backend(#[from] backend::DiffBackendError),
}

/// The result of comparing one dispatched call's response against its reference.
#[derive(Debug, Clone)]
pub(crate) struct CompareOutcome {
    /// Whether the actual response was judged equal to the reference/expected value.
    pub(crate) equal: bool,
    /// Metrics delta contributed by this comparison (comparison/equal counts only; timing is
    /// the caller's responsibility).
    pub(crate) metrics: TestMetrics,
    /// An ANSI-colored textual rendering, populated only when the native-structural backend ran
    /// and found a mismatch.
    pub(crate) colorized_diff: Option<String>,
}

/// Compares `actual` against a reference value, in fixture-replay or dual-endpoint mode.
///
/// Decision order:
/// 1. [`ComparatorConfig::without_compare_results`] short-circuits to success.
/// 2. Fast path: exact structural equality (`serde_json::Value`'s `PartialEq` already treats
///    objects as unordered key sets and arrays as ordered sequences, matching this step's
///    definition), incrementing `equal_count` without a detailed diff.
/// 3. Tolerance: three unconditional rules accept without a detailed diff and leave
///    `comparison_count` at zero (they are not "a comparison was run", they are "no comparison
///    was required"): (a) both sides carry a `result` field, the reference's `result` is `null`,
///    and no live reference endpoint was consulted; (b) both sides carry an `error` field and the
///    reference's `error` is `null`; (c) the reference is exactly `{jsonrpc, id}` with neither
///    `result` nor `error` present. Separately, if both sides carry an `error` field and
///    [`ComparatorConfig::do_not_compare_error`] is set, only `result`/`id`/`jsonrpc` are
///    compared, ignoring `error` entirely — this one IS a real comparison.
/// 4. Detailed diff: dispatched to the configured [`DiffBackendSelector`], writing
///    response/expResponse/diff artifacts and incrementing `comparison_count`.
///
/// On success, artifacts written in step 4 are deleted unless `force_dump` is set.
pub(crate) async fn process(
    cfg: &ComparatorConfig,
    actual: &Value,
    reference: &Value,
    path_options: &BTreeMap<String, Value>,
    paths: &OutputPaths,
    cancel: &CancellationToken,
) -> Result<CompareOutcome, CompareError> {
    let mut metrics = TestMetrics::default();

    if cfg.without_compare_results {
        if cfg.force_dump {
            dump_artifacts(paths, actual, reference).await?;
        }
        return Ok(CompareOutcome {
            equal: true,
            metrics,
            colorized_diff: None,
        });
    }

    let comparison_actual = normalize_for_tolerance(cfg, actual, reference);
    let comparison_reference = normalize_for_tolerance(cfg, reference, actual);

    if comparison_actual == comparison_reference {
        metrics.equal_count = 1;
        if cfg.force_dump {
            dump_artifacts(paths, actual, reference).await?;
        }
        return Ok(CompareOutcome {
            equal: true,
            metrics,
            colorized_diff: None,
        });
    }

    if unconditional_tolerance_applies(cfg, actual, reference) {
        if cfg.force_dump {
            dump_artifacts(paths, actual, reference).await?;
        }
        return Ok(CompareOutcome {
            equal: true,
            metrics,
            colorized_diff: None,
        });
    }

    metrics.comparison_count = 1;

    tokio::fs::create_dir_all(&paths.parent)
        .await
        .map_err(|source| CompareError::Artifact {
            path: paths.parent.display().to_string(),
            source,
        })?;

    let outcome = run_backend(
        cfg.backend,
        &comparison_actual,
        &comparison_reference,
        path_options,
        paths,
        cancel,
    )
    .await?;

    write_json_artifact(&paths.response, actual).await?;
    write_json_artifact(&paths.exp_response, reference).await?;

    if outcome.equal {
        metrics.equal_count = 1;
        if !cfg.force_dump {
            remove_artifacts(paths).await;
        }
    }

    Ok(CompareOutcome {
        equal: outcome.equal,
        metrics,
        colorized_diff: outcome.colorized,
    })
}

/// When `do_not_compare_error` is set and both `value` and `counterpart` carry a non-null
/// `error` field, strips `error` from `value` before comparison so that differing error bodies
/// don't fail the test. Otherwise returns `value` unchanged.
fn normalize_for_tolerance(cfg: &ComparatorConfig, value: &Value, counterpart: &Value) -> Value {
    if !cfg.do_not_compare_error {
        return value.clone();
    }

    let both_have_error = has_non_null_error(value) && has_non_null_error(counterpart);
    if !both_have_error {
        return value.clone();
    }

    let mut stripped = value.clone();
    if let Value::Object(map) = &mut stripped {
        map.remove("error");
    }
    stripped
}

/// True if `value` is an object with a present, non-null `error` field.
fn has_non_null_error(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.get("error").map(|e| !e.is_null()).unwrap_or(false))
}

/// Evaluates the three unconditional tolerance rules against `reference` (the expected side).
/// Each accepts the comparison outright without running a detailed diff and without counting as
/// a real comparison.
fn unconditional_tolerance_applies(cfg: &ComparatorConfig, actual: &Value, reference: &Value) -> bool {
    let (Value::Object(actual_map), Value::Object(ref_map)) = (actual, reference) else {
        return false;
    };

    // Rule (a): expected result is explicitly null and no live reference endpoint was consulted.
    if actual_map.contains_key("result")
        && matches!(ref_map.get("result"), Some(Value::Null))
        && !cfg.compare_against_reference
    {
        return true;
    }

    // Rule (b): expected error is explicitly null.
    if actual_map.contains_key("error") && matches!(ref_map.get("error"), Some(Value::Null)) {
        return true;
    }

    // Rule (c): expected carries neither result nor error, only the two mandatory envelope keys.
    if !ref_map.contains_key("result") && !ref_map.contains_key("error") {
        let ref_keys: BTreeSet<&str> = ref_map.keys().map(String::as_str).collect();
        let mandatory: BTreeSet<&str> = ["jsonrpc", "id"].into_iter().collect();
        if ref_keys == mandatory {
            return true;
        }
    }

    false
}

/// Dispatches to the configured backend implementation.
async fn run_backend(
    selector: DiffBackendSelector,
    actual: &Value,
    expected: &Value,
    path_options: &BTreeMap<String, Value>,
    paths: &OutputPaths,
    cancel: &CancellationToken,
) -> Result<DiffOutcome, CompareError> {
    let outcome = match selector {
        DiffBackendSelector::NativeStructural => {
            NativeStructural::default()
                .diff(actual, expected, path_options, &paths.diff, cancel)
                .await?
        }
        DiffBackendSelector::LibraryJd => {
            LibraryJd
                .diff(actual, expected, path_options, &paths.diff, cancel)
                .await?
        }
        DiffBackendSelector::ExternalJsonDiff => {
            ExternalJsonDiff
                .diff(actual, expected, path_options, &paths.diff, cancel)
                .await?
        }
        DiffBackendSelector::ExternalDiff => {
            ExternalDiff
                .diff(actual, expected, path_options, &paths.diff, cancel)
                .await?
        }
    };
    Ok(outcome)
}

/// Writes the response and expected-response artifacts unconditionally (the
/// `without_compare_results` + `force_dump` path, which never runs a backend).
async fn dump_artifacts(paths: &OutputPaths, actual: &Value, reference: &Value) -> Result<(), CompareError> {
    tokio::fs::create_dir_all(&paths.parent)
        .await
        .map_err(|source| CompareError::Artifact {
            path: paths.parent.display().to_string(),
            source,
        })?;
    write_json_artifact(&paths.response, actual).await?;
    write_json_artifact(&paths.exp_response, reference).await?;
    Ok(())
}

/// Writes `value` to `path` as two-space-indented JSON, using a buffer checked out of the
/// process-wide pool instead of a fresh allocation.
async fn write_json_artifact(path: &std::path::Path, value: &Value) -> Result<(), CompareError> {
    let mut buf = crate::util::PooledBuffer::acquire();
    let mut ser = serde_json::Serializer::with_formatter(&mut *buf, serde_json::ser::PrettyFormatter::with_indent(b"  "));
    serde_json::Serialize::serialize(value, &mut ser).expect("serde_json::Value serialization cannot fail");

    tokio::fs::write(path, &*buf)
        .await
        .map_err(|source| CompareError::Artifact {
            path: path.display().to_string(),
            source,
        })
}

/// Deletes the response/expResponse/diff artifacts for a comparison that ultimately succeeded.
async fn remove_artifacts(paths: &OutputPaths) {
    for path in [&paths.response, &paths.exp_response, &paths.diff] {
        let _ = tokio::fs::remove_file(path).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn cfg(backend: DiffBackendSelector) -> ComparatorConfig {
        ComparatorConfig {
            backend,
            without_compare_results: false,
            do_not_compare_error: false,
            force_dump: false,
            compare_against_reference: false,
        }
    }

    fn paths_in(dir: &std::path::Path) -> OutputPaths {
        crate::config::output_paths(dir, std::path::Path::new("eth_call/test_01.json"), None, None)
    }

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn without_compare_results_always_succeeds() {
        let dir = tempdir().unwrap();
        let mut c = cfg(DiffBackendSelector::NativeStructural);
        c.without_compare_results = true;

        let actual = json!({"jsonrpc": "2.0", "id": 1, "result": "0x1"});
        let reference = json!({"jsonrpc": "2.0", "id": 1, "result": "0x2"});
        let outcome = process(&c, &actual, &reference, &BTreeMap::new(), &paths_in(dir.path()), &cancel())
            .await
            .unwrap();
        assert!(outcome.equal);
        assert_eq!(outcome.metrics.comparison_count, 0);
    }

    #[tokio::test]
    async fn fast_path_equal_values_do_not_invoke_backend() {
        let dir = tempdir().unwrap();
        let c = cfg(DiffBackendSelector::NativeStructural);

        let value = json!({"jsonrpc": "2.0", "id": 1, "result": "0x1"});
        let outcome = process(&c, &value, &value, &BTreeMap::new(), &paths_in(dir.path()), &cancel())
            .await
            .unwrap();
        assert!(outcome.equal);
        assert_eq!(outcome.metrics.comparison_count, 0);
        assert_eq!(outcome.metrics.equal_count, 1);
        assert!(!paths_in(dir.path()).diff.exists());
    }

    #[tokio::test]
    async fn mismatch_writes_artifacts_and_reports_unequal() {
        let dir = tempdir().unwrap();
        let c = cfg(DiffBackendSelector::NativeStructural);

        let actual = json!({"jsonrpc": "2.0", "id": 1, "result": "0x1"});
        let reference = json!({"jsonrpc": "2.0", "id": 1, "result": "0x2"});
        let paths = paths_in(dir.path());
        let outcome = process(&c, &actual, &reference, &BTreeMap::new(), &paths, &cancel())
            .await
            .unwrap();

        assert!(!outcome.equal);
        assert_eq!(outcome.metrics.equal_count, 0);
        assert!(paths.diff.exists());
        assert!(paths.response.exists());
        assert!(paths.exp_response.exists());
        assert!(outcome.colorized_diff.is_some());
    }

    #[tokio::test]
    async fn success_removes_artifacts_unless_force_dump() {
        let dir = tempdir().unwrap();
        let c = cfg(DiffBackendSelector::NativeStructural);

        let actual = json!({"jsonrpc": "2.0", "id": 1, "result": ["a", "b"]});
        let reference = json!({"jsonrpc": "2.0", "id": 1, "result": ["b", "a"]});
        let paths = paths_in(dir.path());
        let outcome = process(&c, &actual, &reference, &BTreeMap::new(), &paths, &cancel())
            .await
            .unwrap();

        assert!(outcome.equal);
        assert!(!paths.diff.exists());
        assert!(!paths.response.exists());
    }

    #[tokio::test]
    async fn force_dump_keeps_artifacts_on_success() {
        let dir = tempdir().unwrap();
        let mut c = cfg(DiffBackendSelector::NativeStructural);
        c.force_dump = true;

        let actual = json!({"jsonrpc": "2.0", "id": 1, "result": ["a", "b"]});
        let reference = json!({"jsonrpc": "2.0", "id": 1, "result": ["b", "a"]});
        let paths = paths_in(dir.path());
        let outcome = process(&c, &actual, &reference, &BTreeMap::new(), &paths, &cancel())
            .await
            .unwrap();

        assert!(outcome.equal);
        assert!(paths.diff.exists());
        assert!(paths.response.exists());
        assert!(paths.exp_response.exists());
    }

    #[tokio::test]
    async fn do_not_compare_error_ignores_differing_error_bodies() {
        let dir = tempdir().unwrap();
        let mut c = cfg(DiffBackendSelector::NativeStructural);
        c.do_not_compare_error = true;

        let actual = json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32000, "message": "a"}});
        let reference = json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32000, "message": "b"}});
        let outcome = process(&c, &actual, &reference, &BTreeMap::new(), &paths_in(dir.path()), &cancel())
            .await
            .unwrap();
        assert!(outcome.equal);
    }

    #[tokio::test]
    async fn do_not_compare_error_still_compares_when_one_side_has_no_error() {
        let dir = tempdir().unwrap();
        let mut c = cfg(DiffBackendSelector::NativeStructural);
        c.do_not_compare_error = true;

        let actual = json!({"jsonrpc": "2.0", "id": 1, "result": "0x1"});
        let reference = json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32000, "message": "b"}});
        let outcome = process(&c, &actual, &reference, &BTreeMap::new(), &paths_in(dir.path()), &cancel())
            .await
            .unwrap();
        assert!(!outcome.equal);
    }

    #[tokio::test]
    async fn tolerance_rule_accepts_null_expected_result_without_live_reference() {
        let dir = tempdir().unwrap();
        let c = cfg(DiffBackendSelector::NativeStructural);

        let actual = json!({"jsonrpc": "2.0", "id": 1, "result": "0xabc"});
        let reference = json!({"jsonrpc": "2.0", "id": 1, "result": null});
        let paths = paths_in(dir.path());
        let outcome = process(&c, &actual, &reference, &BTreeMap::new(), &paths, &cancel())
            .await
            .unwrap();

        assert!(outcome.equal);
        assert_eq!(outcome.metrics.comparison_count, 0);
        assert!(!paths.diff.exists());
    }

    #[tokio::test]
    async fn tolerance_rule_a_does_not_apply_against_a_live_reference() {
        let dir = tempdir().unwrap();
        let mut c = cfg(DiffBackendSelector::NativeStructural);
        c.compare_against_reference = true;

        let actual = json!({"jsonrpc": "2.0", "id": 1, "result": "0xabc"});
        let reference = json!({"jsonrpc": "2.0", "id": 1, "result": null});
        let outcome = process(&c, &actual, &reference, &BTreeMap::new(), &paths_in(dir.path()), &cancel())
            .await
            .unwrap();

        assert!(!outcome.equal);
    }

    #[tokio::test]
    async fn tolerance_rule_accepts_null_expected_error() {
        let dir = tempdir().unwrap();
        let c = cfg(DiffBackendSelector::NativeStructural);

        let actual = json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32000, "message": "boom"}});
        let reference = json!({"jsonrpc": "2.0", "id": 1, "error": null});
        let outcome = process(&c, &actual, &reference, &BTreeMap::new(), &paths_in(dir.path()), &cancel())
            .await
            .unwrap();

        assert!(outcome.equal);
        assert_eq!(outcome.metrics.comparison_count, 0);
    }

    #[tokio::test]
    async fn tolerance_rule_accepts_minimal_envelope_expected() {
        let dir = tempdir().unwrap();
        let c = cfg(DiffBackendSelector::NativeStructural);

        let actual = json!({"jsonrpc": "2.0", "id": 1, "result": "0xabc"});
        let reference = json!({"jsonrpc": "2.0", "id": 1});
        let outcome = process(&c, &actual, &reference, &BTreeMap::new(), &paths_in(dir.path()), &cancel())
            .await
            .unwrap();

        assert!(outcome.equal);
        assert_eq!(outcome.metrics.comparison_count, 0);
    }

    #[test]
    fn parses_every_backend_name() {
        assert_eq!(
            DiffBackendSelector::from_str("native-structural").unwrap(),
            DiffBackendSelector::NativeStructural
        );
        assert_eq!(
            DiffBackendSelector::from_str("library-jd").unwrap(),
            DiffBackendSelector::LibraryJd
        );
        assert_eq!(
            DiffBackendSelector::from_str("external-json-diff").unwrap(),
            DiffBackendSelector::ExternalJsonDiff
        );
        assert_eq!(
            DiffBackendSelector::from_str("external-diff").unwrap(),
            DiffBackendSelector::ExternalDiff
        );
        assert!(DiffBackendSelector::from_str("bogus").is_err());
    }
}
