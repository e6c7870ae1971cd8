//! Resolves an RPC method name plus a daemon role to a `host:port` string, and derives the
//! artifact output paths for a given fixture.

use std::path::{Path, PathBuf};

/// The prefix that routes a method name to the engine-API port instead of the regular
/// JSON-RPC port.
const ENGINE_METHOD_PREFIX: &str = "engine_";

/// The logical identity of an endpoint a method is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TargetRole {
    /// The primary node under test.
    DefaultDaemon,
    /// A secondary node under test, used in dual-endpoint / reference mode.
    OtherDaemon,
    /// A pre-configured external provider URL, used verbatim.
    ExternalProvider,
    /// No endpoint; used for methods that aren't dispatched anywhere (e.g. local-only checks).
    None,
}

impl TargetRole {
    /// The short name used to build a reference-mode artifact disambiguator
    /// (`<port>-<role name>`).
    fn name(&self) -> &'static str {
        match self {
            TargetRole::DefaultDaemon => "default-daemon",
            TargetRole::OtherDaemon => "other-daemon",
            TargetRole::ExternalProvider => "external-provider",
            TargetRole::None => "none",
        }
    }
}

/// Ports and URLs needed to resolve a [`TargetRole`] to a concrete address.
#[derive(Debug, Clone)]
pub(crate) struct TargetConfig {
    /// Host for the default daemon.
    pub(crate) host: String,
    /// Default daemon's regular JSON-RPC port.
    pub(crate) default_rpc_port: u16,
    /// Default daemon's engine-API port.
    pub(crate) default_engine_port: u16,
    /// Other daemon's regular JSON-RPC port.
    pub(crate) other_rpc_port: u16,
    /// Other daemon's engine-API port.
    pub(crate) other_engine_port: u16,
    /// The verbatim URL used for [`TargetRole::ExternalProvider`].
    pub(crate) external_provider_url: Option<String>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            default_rpc_port: 8545,
            default_engine_port: 8551,
            other_rpc_port: 51515,
            other_engine_port: 51516,
            external_provider_url: None,
        }
    }
}

/// Resolves `role` and `method` to a `host:port` (or verbatim URL, for
/// [`TargetRole::ExternalProvider`]) string.
pub(crate) fn resolve_target(cfg: &TargetConfig, role: TargetRole, method: &str) -> Option<String> {
    let is_engine = method.starts_with(ENGINE_METHOD_PREFIX);

    match role {
        TargetRole::ExternalProvider => cfg.external_provider_url.clone(),
        TargetRole::OtherDaemon => {
            let port = if is_engine {
                cfg.other_engine_port
            } else {
                cfg.other_rpc_port
            };
            Some(format!("{}:{}", cfg.host, port))
        }
        TargetRole::DefaultDaemon => {
            let port = if is_engine {
                cfg.default_engine_port
            } else {
                cfg.default_rpc_port
            };
            Some(format!("{}:{}", cfg.host, port))
        }
        TargetRole::None => None,
    }
}

/// Builds the `<port>-<role>` artifact disambiguator used in reference mode to keep the two live
/// endpoints' response/expected-response artifacts apart (see [`output_paths`]).
///
/// Returns `None` for roles that don't resolve to a `host:port` pair (`ExternalProvider`,
/// `None`), since the port isn't meaningful there.
pub(crate) fn disambiguator(cfg: &TargetConfig, role: TargetRole, method: &str) -> Option<String> {
    let is_engine = method.starts_with(ENGINE_METHOD_PREFIX);
    let port = match role {
        TargetRole::DefaultDaemon => {
            if is_engine {
                cfg.default_engine_port
            } else {
                cfg.default_rpc_port
            }
        }
        TargetRole::OtherDaemon => {
            if is_engine {
                cfg.other_engine_port
            } else {
                cfg.other_rpc_port
            }
        }
        TargetRole::ExternalProvider | TargetRole::None => return None,
    };
    Some(format!("{port}-{}", role.name()))
}

/// The set of derived artifact paths for a fixture, rooted at `output_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OutputPaths {
    /// The base file path (extension-stripped fixture path under `output_dir`).
    pub(crate) base: PathBuf,
    /// The parent directory of `base`.
    pub(crate) parent: PathBuf,
    /// `<base>-diff.json`.
    pub(crate) diff: PathBuf,
    /// `<base>-response.json`.
    pub(crate) response: PathBuf,
    /// `<base>-expResponse.json`.
    pub(crate) exp_response: PathBuf,
}

/// Derives [`OutputPaths`] for `fixture_path` (relative to the corpus root) rooted at
/// `output_dir`, stripping the fixture's extension.
///
/// In reference mode every request is dispatched to two live endpoints, so the response and
/// expected-response artifacts need independent disambiguators — each is the target's port and
/// role (e.g. `8545-default-daemon`, `51515-other-daemon`) — appended as
/// `-response-<disambiguator>.json` / `-expResponse-<disambiguator>.json`. Pass `None` for both
/// when comparing against the fixture's recorded expectation instead of a second live endpoint.
pub(crate) fn output_paths(
    output_dir: &Path,
    fixture_path: &Path,
    response_disambiguator: Option<&str>,
    exp_response_disambiguator: Option<&str>,
) -> OutputPaths {
    let stem = fixture_path.with_extension("");
    let base = output_dir.join(&stem);
    let parent = base.parent().unwrap_or(output_dir).to_path_buf();

    let response_suffix = match response_disambiguator {
        Some(d) => format!("-response-{d}.json"),
        None => "-response.json".to_string(),
    };
    let exp_response_suffix = match exp_response_disambiguator {
        Some(d) => format!("-expResponse-{d}.json"),
        None => "-expResponse.json".to_string(),
    };

    OutputPaths {
        diff: with_suffix(&base, "-diff.json"),
        response: with_suffix(&base, &response_suffix),
        exp_response: with_suffix(&base, &exp_response_suffix),
        parent,
        base,
    }
}

/// Appends `suffix` to the final path component of `base`.
fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(suffix);
    base.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_default_daemon_regular_port() {
        let cfg = TargetConfig::default();
        let addr = resolve_target(&cfg, TargetRole::DefaultDaemon, "eth_call").unwrap();
        assert_eq!(addr, "127.0.0.1:8545");
    }

    #[test]
    fn resolves_default_daemon_engine_port() {
        let cfg = TargetConfig::default();
        let addr = resolve_target(&cfg, TargetRole::DefaultDaemon, "engine_newPayloadV3").unwrap();
        assert_eq!(addr, "127.0.0.1:8551");
    }

    #[test]
    fn resolves_other_daemon_ports() {
        let cfg = TargetConfig::default();
        assert_eq!(
            resolve_target(&cfg, TargetRole::OtherDaemon, "eth_call").unwrap(),
            "127.0.0.1:51515"
        );
        assert_eq!(
            resolve_target(&cfg, TargetRole::OtherDaemon, "engine_getPayloadV3").unwrap(),
            "127.0.0.1:51516"
        );
    }

    #[test]
    fn resolves_external_provider_verbatim() {
        let mut cfg = TargetConfig::default();
        cfg.external_provider_url = Some("https://example.com/rpc".to_string());
        assert_eq!(
            resolve_target(&cfg, TargetRole::ExternalProvider, "eth_call").unwrap(),
            "https://example.com/rpc"
        );
    }

    #[test]
    fn none_role_resolves_to_nothing() {
        let cfg = TargetConfig::default();
        assert!(resolve_target(&cfg, TargetRole::None, "eth_call").is_none());
    }

    #[test]
    fn output_paths_strip_extension_and_derive_siblings() {
        let paths = output_paths(
            Path::new("/out"),
            Path::new("eth_call/test_01.json"),
            None,
            None,
        );
        assert_eq!(paths.base, Path::new("/out/eth_call/test_01"));
        assert_eq!(paths.parent, Path::new("/out/eth_call"));
        assert_eq!(paths.diff, Path::new("/out/eth_call/test_01-diff.json"));
        assert_eq!(
            paths.response,
            Path::new("/out/eth_call/test_01-response.json")
        );
        assert_eq!(
            paths.exp_response,
            Path::new("/out/eth_call/test_01-expResponse.json")
        );
    }

    #[test]
    fn output_paths_disambiguate_with_reference_suffix() {
        let paths = output_paths(
            Path::new("/out"),
            Path::new("eth_call/test_01.json"),
            Some("8545-default-daemon"),
            Some("51515-other-daemon"),
        );
        assert_eq!(
            paths.response,
            Path::new("/out/eth_call/test_01-response-8545-default-daemon.json")
        );
        assert_eq!(
            paths.exp_response,
            Path::new("/out/eth_call/test_01-expResponse-51515-other-daemon.json")
        );
    }

    #[test]
    fn disambiguator_names_port_and_role() {
        let cfg = TargetConfig::default();
        assert_eq!(
            disambiguator(&cfg, TargetRole::DefaultDaemon, "eth_call").as_deref(),
            Some("8545-default-daemon")
        );
        assert_eq!(
            disambiguator(&cfg, TargetRole::OtherDaemon, "engine_getPayloadV3").as_deref(),
            Some("51516-other-daemon")
        );
        assert_eq!(disambiguator(&cfg, TargetRole::ExternalProvider, "eth_call"), None);
        assert_eq!(disambiguator(&cfg, TargetRole::None, "eth_call"), None);
    }
}
