//! Error handling for the Anvil engine
//!
//! Analysis problems are reported as [`Diagnostic`](crate::diagnostics::Diagnostic)s
//! and runtime problems as [`RuntimeFault`]s; this type covers what is left
//! for the host: reading files and refusing to run.

use std::path::PathBuf;

use thiserror::Error;

use crate::engine::RuntimeFault;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Host-facing engine error
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file path is empty")]
    EmptyPath,

    #[error("evaluation rejected: {errors} error(s) reported during analysis")]
    Rejected { errors: usize },

    #[error("runtime fault: {0}")]
    Fault(#[from] RuntimeFault),
}
