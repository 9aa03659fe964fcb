//! Errors raised while setting up a library

use std::path::PathBuf;
use thiserror::Error;

/// Failure to construct a library.
///
/// Errors raised by library functions at script run time are
/// [`HostError`](core_types::HostError)s instead.
#[derive(Debug, Error)]
pub enum LibraryError {
    /// The root of a restricted file system is not a directory
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    /// The root could not be inspected
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A file name pattern failed to compile
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}
