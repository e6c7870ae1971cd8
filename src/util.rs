//! Shared helpers: a pooled byte buffer for JSON artifact serialization, and the
//! subprocess timeout/capture helper used by the external diff backends.
//!
//! Generalizes the teacher's `util.rs::run_cmd` (spawn, stream to stdio, await) into a
//! capturing, cancellable, timeout-bounded variant.

use color_eyre::Result;
use once_cell::sync::Lazy;
use std::{sync::Mutex, time::Duration};
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// A process-wide pool of reusable byte buffers for JSON artifact serialization, avoiding a
/// fresh heap allocation per comparison on the hot path.
static BUFFER_POOL: Lazy<Mutex<Vec<Vec<u8>>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// A buffer checked out of [`BUFFER_POOL`]; returned to the pool (cleared) on drop.
pub(crate) struct PooledBuffer {
    buf: Option<Vec<u8>>,
}

impl PooledBuffer {
    /// Checks out a buffer from the pool, allocating a new one if the pool is empty.
    pub(crate) fn acquire() -> Self {
        let buf = BUFFER_POOL.lock().unwrap().pop().unwrap_or_default();
        Self { buf: Some(buf) }
    }
}

impl std::ops::Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        self.buf.as_ref().expect("buffer taken only on drop")
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buf.as_mut().expect("buffer taken only on drop")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(mut buf) = self.buf.take() {
            buf.clear();
            BUFFER_POOL.lock().unwrap().push(buf);
        }
    }
}

/// Errors raised while running a timeout-bounded subprocess.
#[derive(Debug, Error)]
pub(crate) enum RunError {
    /// The process exceeded the configured timeout.
    #[error("process timed out after {0:?}")]
    Timeout(Duration),
    /// The run was aborted by cancellation.
    #[error("process run cancelled")]
    Cancelled,
    /// The process could not be spawned or its output could not be read.
    #[error("process I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs `cmd`, capturing stdout and stderr separately, bounded by `timeout` and cancellable via
/// `cancel`. Shared by every external-tool diff backend.
pub(crate) async fn run_with_timeout(
    cmd: &mut Command,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(String, String), RunError> {
    let output = tokio::select! {
        result = tokio::time::timeout(timeout, cmd.output()) => {
            result.map_err(|_| RunError::Timeout(timeout))??
        }
        _ = cancel.cancelled() => return Err(RunError::Cancelled),
    };

    Ok((
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    ))
}
