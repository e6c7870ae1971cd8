//! Walks the corpus directory, assigns every fixture a stable global 1-based index, and returns
//! the ordered list plus aggregate counts.

use color_eyre::{eyre::Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// File extensions Discovery accepts as fixtures, in addition to `.json`.
const ACCEPTED_EXTENSIONS: &[&str] = &["json", "tar", "zip", "gzip"];

/// A fixture selected by Discovery, with its path and position made explicit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TestCase {
    /// The API directory the fixture lives under (e.g. `eth_call`).
    pub(crate) api: String,
    /// The fixture's path, relative to the corpus root.
    pub(crate) path: PathBuf,
    /// The fixture's stable global 1-based index.
    pub(crate) global_number: u64,
}

/// The result of a Discovery pass.
#[derive(Debug, Clone, Default)]
pub(crate) struct DiscoveryResult {
    /// All discovered test cases, in stable discovery order.
    pub(crate) test_cases: Vec<TestCase>,
    /// Number of distinct API directories that contributed at least one test case.
    pub(crate) api_count: usize,
    /// Total number of test cases discovered.
    pub(crate) total_tests: usize,
}

/// Discovers every fixture under `corpus_root`, skipping `results_dir_name` and any directory
/// beginning with `.`.
///
/// Subdirectories are visited in byte-wise ascending name order; within a subdirectory, fixture
/// files are sorted by the first run of decimal digits found anywhere in the filename (so
/// `test_2` precedes `test_10`), not lexicographically. The global counter increments once per
/// emitted fixture, across all APIs, in that order — this makes the global number a stable
/// correlation key as long as the corpus contents don't change between runs.
pub(crate) fn discover(corpus_root: &Path, results_dir_name: &str) -> Result<DiscoveryResult> {
    let mut api_dirs = fs::read_dir(corpus_root)
        .wrap_err_with(|| format!("failed to read corpus root {:?}", corpus_root))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            (name != results_dir_name && !name.starts_with('.')).then_some(name)
        })
        .collect::<Vec<_>>();
    api_dirs.sort();

    let mut test_cases = Vec::new();
    let mut global_counter = 0u64;
    let mut api_count = 0usize;

    for api in &api_dirs {
        let api_path = corpus_root.join(api);
        let mut files = fs::read_dir(&api_path)
            .wrap_err_with(|| format!("failed to read API directory {:?}", api_path))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| {
                let name = entry.file_name().to_str()?.to_string();
                is_accepted_fixture(&name).then_some(name)
            })
            .collect::<Vec<_>>();

        if files.is_empty() {
            continue;
        }

        files.sort_by_key(|name| leading_digit_run(name).unwrap_or(0));

        api_count += 1;
        for name in files {
            global_counter += 1;
            test_cases.push(TestCase {
                api: api.clone(),
                path: Path::new(api).join(name),
                global_number: global_counter,
            });
        }
    }

    let total_tests = test_cases.len();
    Ok(DiscoveryResult {
        test_cases,
        api_count,
        total_tests,
    })
}

/// Returns true iff `name` begins with `test_` and has one of the accepted extensions.
fn is_accepted_fixture(name: &str) -> bool {
    if !name.starts_with("test_") {
        return false;
    }
    ACCEPTED_EXTENSIONS
        .iter()
        .any(|ext| name.to_ascii_lowercase().ends_with(&format!(".{ext}")))
}

/// Extracts the first run of decimal digits anywhere in `name`, parsed as a `u64`.
///
/// Used as the sort key for fixtures within an API directory so that `test_2` precedes
/// `test_10` — a numeric, not lexicographic, ordering.
fn leading_digit_run(name: &str) -> Option<u64> {
    let digits: String = name
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self as stdfs, File};
    use tempfile::tempdir;

    fn touch(path: &Path) {
        File::create(path).unwrap();
    }

    #[test]
    fn numeric_sort_orders_test_2_before_test_10() {
        let dir = tempdir().unwrap();
        let api = dir.path().join("eth_call");
        stdfs::create_dir_all(&api).unwrap();
        touch(&api.join("test_10.json"));
        touch(&api.join("test_2.json"));
        touch(&api.join("test_01.json"));

        let result = discover(dir.path(), "results").unwrap();
        let names: Vec<_> = result
            .test_cases
            .iter()
            .map(|t| t.path.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["test_01.json", "test_2.json", "test_10.json"]);
    }

    #[test]
    fn skips_results_dir_and_dotfiles() {
        let dir = tempdir().unwrap();
        stdfs::create_dir_all(dir.path().join("results")).unwrap();
        stdfs::create_dir_all(dir.path().join(".hidden")).unwrap();
        let api = dir.path().join("eth_call");
        stdfs::create_dir_all(&api).unwrap();
        touch(&api.join("test_01.json"));

        let result = discover(dir.path(), "results").unwrap();
        assert_eq!(result.api_count, 1);
        assert_eq!(result.total_tests, 1);
    }

    #[test]
    fn global_numbering_is_stable_across_later_api_dirs() {
        // Scenario 5 from the spec: debug_traceCall (2 tests), eth_call (3 tests).
        let dir = tempdir().unwrap();
        let debug = dir.path().join("debug_traceCall");
        let eth = dir.path().join("eth_call");
        stdfs::create_dir_all(&debug).unwrap();
        stdfs::create_dir_all(&eth).unwrap();
        touch(&debug.join("test_01.json"));
        touch(&debug.join("test_02.json"));
        touch(&eth.join("test_01.json"));
        touch(&eth.join("test_02.json"));
        touch(&eth.join("test_10.json"));

        let result = discover(dir.path(), "results").unwrap();
        let described: Vec<_> = result
            .test_cases
            .iter()
            .map(|t| {
                (
                    format!("{}/{}", t.api, t.path.file_name().unwrap().to_str().unwrap()),
                    t.global_number,
                )
            })
            .collect();

        assert_eq!(
            described,
            vec![
                ("debug_traceCall/test_01.json".to_string(), 1),
                ("debug_traceCall/test_02.json".to_string(), 2),
                ("eth_call/test_01.json".to_string(), 3),
                ("eth_call/test_02.json".to_string(), 4),
                ("eth_call/test_10.json".to_string(), 5),
            ]
        );
    }

    #[test]
    fn adding_a_later_api_dir_does_not_shift_earlier_numbers() {
        let dir = tempdir().unwrap();
        let a_api = dir.path().join("a_api");
        stdfs::create_dir_all(&a_api).unwrap();
        touch(&a_api.join("test_01.json"));

        let before = discover(dir.path(), "results").unwrap();
        let before_number = before.test_cases[0].global_number;

        let z_api = dir.path().join("z_api");
        stdfs::create_dir_all(&z_api).unwrap();
        touch(&z_api.join("test_01.json"));

        let after = discover(dir.path(), "results").unwrap();
        let after_number = after
            .test_cases
            .iter()
            .find(|t| t.api == "a_api")
            .unwrap()
            .global_number;

        assert_eq!(before_number, after_number);
    }

    #[test]
    fn discovery_is_deterministic() {
        let dir = tempdir().unwrap();
        let api = dir.path().join("eth_call");
        stdfs::create_dir_all(&api).unwrap();
        touch(&api.join("test_01.json"));
        touch(&api.join("test_02.tar"));

        let first = discover(dir.path(), "results").unwrap();
        let second = discover(dir.path(), "results").unwrap();
        assert_eq!(first.total_tests, second.total_tests);
        assert_eq!(
            first.test_cases.iter().map(|t| t.global_number).collect::<Vec<_>>(),
            second.test_cases.iter().map(|t| t.global_number).collect::<Vec<_>>(),
        );
    }

    #[test]
    fn ignores_files_without_accepted_extension() {
        let dir = tempdir().unwrap();
        let api = dir.path().join("eth_call");
        stdfs::create_dir_all(&api).unwrap();
        touch(&api.join("test_01.json"));
        touch(&api.join("test_02.txt"));
        touch(&api.join("notatest.json"));

        let result = discover(dir.path(), "results").unwrap();
        assert_eq!(result.total_tests, 1);
    }
}
