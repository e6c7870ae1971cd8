//! Contains the definition of the on-disk fixture format and the loader that turns a fixture
//! path into a decoded list of JSON-RPC command records.

use crate::{archive, stats::TestMetrics};
use color_eyre::{
    eyre::{bail, eyre},
    Result,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    time::Instant,
};
use thiserror::Error;

/// Extensions recognized by the fixture loader as plain, uncompressed JSON.
const JSON_EXTENSION: &str = "json";

/// Buffered reader capacity: eight OS pages, matching the spec's sizing for fixture decode.
fn reader_capacity() -> usize {
    4096 * 8
}

/// A single JSON-RPC command pulled from a fixture file.
///
/// A fixture is a list of exactly one [`Command`]; loading a fixture with zero or more than one
/// command is a load error (see [`FixtureError::WrongCommandCount`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct Command {
    /// The opaque JSON request body, forwarded verbatim to the RPC client.
    pub(crate) request: Value,
    /// The expected reply. Absent when the fixture is run purely against a live reference.
    #[serde(default)]
    pub(crate) response: Option<Value>,
    /// Optional human-facing and diff-relaxation metadata.
    #[serde(default)]
    pub(crate) test: Option<TestMeta>,
}

/// Fixture-level metadata: identifier, description, and diff relaxation options.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub(crate) struct TestMeta {
    /// A short identifier for the test, independent of its on-disk path.
    #[serde(default)]
    pub(crate) id: Option<String>,
    /// A human-readable description of what the test exercises.
    #[serde(default)]
    pub(crate) description: Option<String>,
    /// Response-shaped metadata, currently only `pathOptions`.
    #[serde(default)]
    pub(crate) metadata: Option<TestMetaInner>,
}

/// Nested `metadata` blob inside [`TestMeta`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub(crate) struct TestMetaInner {
    /// Response-shaped metadata, currently only `pathOptions`.
    #[serde(default)]
    pub(crate) response: Option<ResponseMeta>,
}

/// Diff relaxation options attached to the expected response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub(crate) struct ResponseMeta {
    /// A map of JSON-path-ish keys to backend-specific relaxation options.
    #[serde(default, rename = "pathOptions")]
    pub(crate) path_options: BTreeMap<String, Value>,
}

/// A fixture file is a JSON array containing exactly one [`Command`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub(crate) struct FixtureFile {
    /// The commands contained in the fixture. Must contain exactly one entry.
    pub(crate) commands: Vec<Command>,
}

/// Errors raised while loading a single fixture.
#[derive(Debug, Error)]
pub(crate) enum FixtureError {
    /// The fixture path does not exist or could not be opened.
    #[error("fixture not found: {0}")]
    NotFound(PathBuf),
    /// The archive backing the fixture could not be read.
    #[error("archive error for {path}: {source}")]
    Archive {
        /// The fixture path.
        path: PathBuf,
        /// The underlying archive error.
        #[source]
        source: archive::ArchiveError,
    },
    /// The fixture content failed to parse as JSON.
    #[error("failed to parse fixture {path}: {source}")]
    Parse {
        /// The fixture path.
        path: PathBuf,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },
    /// A fixture must contain exactly one command.
    #[error("fixture {path} has {count} commands, expected exactly 1")]
    WrongCommandCount {
        /// The fixture path.
        path: PathBuf,
        /// The number of commands found.
        count: usize,
    },
}

/// Loads a fixture from `path`, returning its single [`Command`] and the decode-time delta to
/// fold into the caller's [`TestMetrics`].
///
/// `path` may point at a `.json` file, read directly, or any archive extension recognized by
/// [`archive::read_single_file`]. `sanitize_extension` is forwarded to the archive reader as the
/// rename-if-compressed flag.
pub(crate) fn load(path: &Path, sanitize_extension: bool) -> Result<(Command, TestMetrics)> {
    if !path.exists() {
        bail!(FixtureError::NotFound(path.to_path_buf()));
    }

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(JSON_EXTENSION))
        .unwrap_or(false);

    let start = Instant::now();
    let fixture: FixtureFile = if is_json {
        let file = File::open(path).map_err(|_| FixtureError::NotFound(path.to_path_buf()))?;
        let reader = BufReader::with_capacity(reader_capacity(), file);
        serde_json::from_reader(reader).map_err(|source| FixtureError::Parse {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        let mut decoded = None;
        archive::read_single_file(path, sanitize_extension, |mut entry| {
            let reader = BufReader::with_capacity(reader_capacity(), &mut entry);
            decoded = Some(serde_json::from_reader(reader).map_err(|source| {
                FixtureError::Parse {
                    path: path.to_path_buf(),
                    source,
                }
            })?);
            Ok(())
        })
        .map_err(|source| FixtureError::Archive {
            path: path.to_path_buf(),
            source,
        })?;
        decoded.ok_or_else(|| eyre!("archive reader did not invoke callback for {:?}", path))?
    };
    let elapsed = start.elapsed();

    if fixture.commands.len() != 1 {
        bail!(FixtureError::WrongCommandCount {
            path: path.to_path_buf(),
            count: fixture.commands.len(),
        });
    }

    let mut metrics = TestMetrics::default();
    metrics.unmarshalling_time += elapsed;

    Ok((
        fixture
            .commands
            .into_iter()
            .next()
            .expect("checked len == 1 above"),
        metrics,
    ))
}
