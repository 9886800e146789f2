// src/errors.rs
//
// =============================================================================
// CPUSETISO: ERROR KINDS
// =============================================================================
//
// The typed error surface of the library. The binary wraps these in anyhow
// with context; the engine workers pass them back to callers verbatim.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CpusetError>;

#[derive(Debug, Error)]
pub enum CpusetError {
    /// The kernel cpuset controller is not mounted at the expected root.
    #[error("cpuset cgroup subsystem does not exist at {0:?}")]
    Unavailable(PathBuf),

    /// A named cpuset group is absent.
    #[error("cpuset group '{0}' does not exist")]
    NotFound(String),

    /// `create_group` hit an existing directory.
    #[error("cpuset group '{0}' already exists")]
    AlreadyExists(String),

    /// Lifecycle call for a container id with no prior record.
    #[error("unknown container '{0}'")]
    UnknownContainer(String),

    /// Malformed cpuset list, bucket JSON, or parameter value.
    #[error("parse error: {0}")]
    Parse(String),

    /// The selector could not place a non-zero request.
    #[error("unable to allocate {requested} core(s), selected {selected}")]
    Exhausted { requested: usize, selected: usize },

    /// Underlying filesystem failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Underlying key-value store failure.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// The engine worker behind a handle has shut down.
    #[error("engine worker has terminated")]
    Terminated,
}

impl From<serde_json::Error> for CpusetError {
    fn from(e: serde_json::Error) -> Self {
        CpusetError::Parse(e.to_string())
    }
}
