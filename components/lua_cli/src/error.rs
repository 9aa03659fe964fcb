//! Error types for the CLI

use builtins::LibraryError;
use core_types::LuaError;
use thiserror::Error;

/// CLI-specific errors
#[derive(Debug, Error)]
pub enum CliError {
    /// Script compilation or execution error
    #[error("{0}")]
    Lua(#[from] LuaError),

    /// File I/O error
    #[error("File error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration file or flag combination
    #[error("Config error: {0}")]
    Config(String),

    /// A host library could not be set up
    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    /// REPL error
    #[error("REPL error: {0}")]
    Repl(String),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Lua(_) => 1,
            CliError::Io(_) | CliError::Repl(_) => 2,
            CliError::Config(_) | CliError::Library(_) => 3,
        }
    }
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;
