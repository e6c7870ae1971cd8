//! A pure predicate over (API name, fixture path, global number) encoding default skip lists,
//! include-by-pattern, include-by-exact, latest-block-only, and a numeric exclude list.

use std::collections::HashSet;

/// The built-in, compiled-in default-skip list asset: `<network>/<api>` prefixes considered
/// uncomparable by default — typically engine-API methods and raw-transaction traces. Loaded
/// from disk at compile time rather than hand-maintained as a Rust literal so it can be edited
/// without touching code; overridable wholesale at runtime via
/// [`TestFilterConfig::default_skip_list`].
const DEFAULT_SKIP_LIST_ASSET: &str = include_str!("../assets/default_skip.txt");

/// The built-in, compiled-in latest-block-list asset: `<network>/<path>` prefixes considered
/// meaningful only against a chain-head-synced node.
const LATEST_BLOCK_LIST_ASSET: &str = include_str!("../assets/latest_block.txt");

/// Parses a built-in list asset: one entry per line, blank lines and `#`-comments ignored.
fn parse_list_asset(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Immutable configuration the filter is constructed from.
#[derive(Debug, Clone, Default)]
pub(crate) struct TestFilterConfig {
    /// The network name, used to build the `<network>/<api>` keys checked against the built-in
    /// lists.
    pub(crate) network: String,
    /// Exact-match API allowlist (`-A`).
    pub(crate) include_apis_exact: Vec<String>,
    /// Substring-match API allowlist (`-a`).
    pub(crate) include_apis_substring: Vec<String>,
    /// Substring-match API denylist.
    pub(crate) exclude_apis: Vec<String>,
    /// Exact excluded global test numbers.
    pub(crate) exclude_test_numbers: Vec<i64>,
    /// A single requested test number (`-t`); `-1` means "no specific test requested".
    pub(crate) request_test_number: i64,
    /// Whether only "tests on latest block" should run.
    pub(crate) latest_block_only: bool,
    /// Override for [`DEFAULT_SKIP_LIST`]; `None` uses the compiled-in default.
    pub(crate) default_skip_list: Option<Vec<String>>,
    /// Override for [`LATEST_BLOCK_LIST`]; `None` uses the compiled-in default.
    pub(crate) latest_block_list: Option<Vec<String>>,
}

/// A constructed, immutable test filter.
#[derive(Debug, Clone)]
pub(crate) struct TestFilter {
    cfg: TestFilterConfig,
    exclude_test_numbers: HashSet<i64>,
    default_skip_list: Vec<String>,
    latest_block_list: Vec<String>,
}

impl TestFilter {
    /// Constructs a filter from `cfg`, pre-splitting comma-delimited lists (already split by the
    /// caller into `Vec<String>`) and building the excluded-number hash set once.
    pub(crate) fn new(cfg: TestFilterConfig) -> Self {
        let exclude_test_numbers = cfg.exclude_test_numbers.iter().copied().collect();
        let default_skip_list = cfg
            .default_skip_list
            .clone()
            .unwrap_or_else(|| parse_list_asset(DEFAULT_SKIP_LIST_ASSET));
        let latest_block_list = cfg
            .latest_block_list
            .clone()
            .unwrap_or_else(|| parse_list_asset(LATEST_BLOCK_LIST_ASSET));

        Self {
            cfg,
            exclude_test_numbers,
            default_skip_list,
            latest_block_list,
        }
    }

    /// Whether any positive selection filter (exact API, substring API, or a specific requested
    /// test number) is active.
    fn has_positive_filter(&self) -> bool {
        !self.cfg.include_apis_exact.is_empty()
            || !self.cfg.include_apis_substring.is_empty()
            || self.cfg.request_test_number != -1
    }

    /// Whether any exclude filter (API denylist or excluded-number set) is active.
    fn has_exclude_filter(&self) -> bool {
        !self.cfg.exclude_apis.is_empty() || !self.exclude_test_numbers.is_empty()
    }

    /// The requested test number (`-t`); `-1` means "no specific test requested".
    pub(crate) fn request_test_number(&self) -> i64 {
        self.cfg.request_test_number
    }

    /// Whether a positive API filter (`-a`/`-A`) is active.
    pub(crate) fn has_positive_api_filter(&self) -> bool {
        !self.cfg.include_apis_exact.is_empty() || !self.cfg.include_apis_substring.is_empty()
    }

    /// Returns true if `(api, path, global_n)` should be skipped.
    ///
    /// The built-in skip list is consulted only when *no* positive filter and *no* exclude
    /// filter is active — an explicit include or exclude always takes precedence over the
    /// curated default, since the caller has made their intent for this run explicit.
    pub(crate) fn should_skip(&self, api: &str, path: &str, global_n: u64) -> bool {
        let network_api = format!("{}/{}", self.cfg.network, api);
        let network_path = format!("{}/{}", self.cfg.network, path);

        if !self.has_positive_filter()
            && !self.has_exclude_filter()
            && self
                .default_skip_list
                .iter()
                .any(|entry| network_api == *entry || network_path.starts_with(entry.as_str()))
        {
            return true;
        }

        if self
            .cfg
            .exclude_apis
            .iter()
            .any(|excl| network_api.contains(excl.as_str()) || network_path.contains(excl.as_str()))
        {
            return true;
        }

        if self.exclude_test_numbers.contains(&(global_n as i64)) {
            return true;
        }

        false
    }

    /// Returns true if `(api, path)` is selected to run under the positive filters.
    pub(crate) fn is_under_test(&self, api: &str, path: &str) -> bool {
        let no_positive = self.cfg.include_apis_substring.is_empty()
            && self.cfg.include_apis_exact.is_empty();

        if no_positive && !self.cfg.latest_block_only {
            return true;
        }

        if !self.cfg.include_apis_substring.is_empty() {
            let matched = self
                .cfg
                .include_apis_substring
                .iter()
                .any(|entry| api.contains(entry.as_str()));
            return matched && self.latest_block_constraint(path);
        }

        if !self.cfg.include_apis_exact.is_empty() {
            let matched = self.cfg.include_apis_exact.iter().any(|entry| api == entry);
            return matched && self.latest_block_constraint(path);
        }

        // No positive API filter, but latest-block-only is set.
        self.latest_block_constraint(path)
    }

    /// When `latest_block_only` is set, requires `<network>/<path>` to match an entry in the
    /// latest-block list; otherwise always satisfied.
    fn latest_block_constraint(&self, path: &str) -> bool {
        if !self.cfg.latest_block_only {
            return true;
        }
        let network_path = format!("{}/{}", self.cfg.network, path);
        self.latest_block_list
            .iter()
            .any(|entry| network_path.starts_with(entry.as_str()))
    }

    /// Returns true if `filename`'s digit run (the run of decimal digits immediately following
    /// the last `_`, stopping at the first non-digit) equals `requested_n`. `requested_n == -1`
    /// always matches. Leading zeros are tolerated (`test_0042` matches `42`).
    pub(crate) fn matches_test_number(filename: &str, requested_n: i64) -> bool {
        if requested_n == -1 {
            return true;
        }

        let Some(last_underscore) = filename.rfind('_') else {
            return false;
        };

        let digits: String = filename[last_underscore + 1..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();

        digits.parse::<i64>().map(|n| n == requested_n).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cfg() -> TestFilterConfig {
        TestFilterConfig {
            network: "mainnet".to_string(),
            request_test_number: -1,
            ..Default::default()
        }
    }

    #[test]
    fn built_in_assets_parse_to_non_empty_lists() {
        let skip = parse_list_asset(DEFAULT_SKIP_LIST_ASSET);
        let latest = parse_list_asset(LATEST_BLOCK_LIST_ASSET);
        assert!(!skip.is_empty());
        assert!(!latest.is_empty());
        assert!(skip.iter().all(|e| !e.starts_with('#') && !e.is_empty()));
    }

    #[test]
    fn number_extraction_matches_spec_examples() {
        assert!(TestFilter::matches_test_number("test_0042.json", 42));
        assert!(!TestFilter::matches_test_number("test_420.json", 42));
    }

    #[test]
    fn requested_minus_one_always_matches() {
        assert!(TestFilter::matches_test_number("test_anything.json", -1));
    }

    #[test]
    fn default_skip_list_applies_with_no_filters_active() {
        let filter = TestFilter::new(base_cfg());
        assert!(filter.should_skip("engine_newPayloadV3", "engine_newPayloadV3/test_01.json", 1));
    }

    #[test]
    fn default_skip_list_suppressed_by_positive_filter() {
        let mut cfg = base_cfg();
        cfg.include_apis_exact = vec!["engine_newPayloadV3".to_string()];
        let filter = TestFilter::new(cfg);
        assert!(!filter.should_skip("engine_newPayloadV3", "engine_newPayloadV3/test_01.json", 1));
    }

    #[test]
    fn default_skip_list_suppressed_by_exclude_filter() {
        let mut cfg = base_cfg();
        cfg.exclude_apis = vec!["something_else".to_string()];
        let filter = TestFilter::new(cfg);
        assert!(!filter.should_skip("engine_newPayloadV3", "engine_newPayloadV3/test_01.json", 1));
    }

    #[test]
    fn default_skip_list_suppressed_by_request_test_number() {
        let mut cfg = base_cfg();
        cfg.request_test_number = 1;
        let filter = TestFilter::new(cfg);
        assert!(!filter.should_skip("engine_newPayloadV3", "engine_newPayloadV3/test_01.json", 1));
    }

    #[test]
    fn exclude_api_substring_skips_regardless_of_default_list() {
        let mut cfg = base_cfg();
        cfg.exclude_apis = vec!["eth_call".to_string()];
        let filter = TestFilter::new(cfg);
        assert!(filter.should_skip("eth_call", "eth_call/test_01.json", 1));
    }

    #[test]
    fn excluded_number_set_skips() {
        let mut cfg = base_cfg();
        cfg.exclude_test_numbers = vec![7];
        let filter = TestFilter::new(cfg);
        assert!(filter.should_skip("eth_call", "eth_call/test_07.json", 7));
        assert!(!filter.should_skip("eth_call", "eth_call/test_08.json", 8));
    }

    #[test]
    fn is_under_test_with_no_filters_is_always_true() {
        let filter = TestFilter::new(base_cfg());
        assert!(filter.is_under_test("eth_call", "eth_call/test_01.json"));
    }

    #[test]
    fn is_under_test_with_substring_filter() {
        let mut cfg = base_cfg();
        cfg.include_apis_substring = vec!["eth_".to_string()];
        let filter = TestFilter::new(cfg);
        assert!(filter.is_under_test("eth_call", "eth_call/test_01.json"));
        assert!(!filter.is_under_test("debug_traceCall", "debug_traceCall/test_01.json"));
    }

    #[test]
    fn is_under_test_with_exact_filter() {
        let mut cfg = base_cfg();
        cfg.include_apis_exact = vec!["eth_call".to_string()];
        let filter = TestFilter::new(cfg);
        assert!(filter.is_under_test("eth_call", "eth_call/test_01.json"));
        assert!(!filter.is_under_test("eth_call2", "eth_call2/test_01.json"));
    }

    #[test]
    fn is_under_test_with_latest_block_only() {
        let mut cfg = base_cfg();
        cfg.latest_block_only = true;
        let filter = TestFilter::new(cfg);
        assert!(filter.is_under_test("eth_call", "eth_call/latest/test_01.json"));
        assert!(!filter.is_under_test("eth_call", "eth_call/historical/test_01.json"));
    }

    #[test]
    fn filter_orthogonality_should_skip_implies_not_under_test_execution() {
        // should_skip and is_under_test can both independently be true; the scheduler treats
        // should_skip as taking precedence (a skipped test is never executed, even if selected).
        let mut cfg = base_cfg();
        cfg.exclude_apis = vec!["eth_call".to_string()];
        cfg.include_apis_exact = vec!["eth_call".to_string()];
        let filter = TestFilter::new(cfg);

        let api = "eth_call";
        let path = "eth_call/test_01.json";
        assert!(filter.is_under_test(api, path));
        assert!(filter.should_skip(api, path, 1));
        // A caller must check should_skip first and treat a true result as terminal.
    }
}
