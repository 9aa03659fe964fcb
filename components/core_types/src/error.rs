//! Error taxonomy for the host/interpreter boundary.
//!
//! Errors flow in two directions:
//!
//! - Host callbacks return [`HostError`]: either an [`HostError::Abort`], which
//!   becomes an ordinary script error, or a [`HostException`], which is parked
//!   in the instance's pending slot and surfaces unchanged to whoever started
//!   the protected call.
//! - Bridge operations return [`LuaError`], which classifies interpreter
//!   status codes and carries host exceptions back out.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Status code returned by a protected call into the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Success
    Ok,
    /// Coroutine yielded
    Yield,
    /// Runtime error
    Runtime,
    /// Syntax error while compiling a chunk
    Syntax,
    /// Memory allocation failure
    Memory,
    /// Error while running the message handler
    MessageHandler,
    /// A code this bridge does not know about
    Unknown(i32),
}

impl Status {
    /// Converts a raw interpreter status code.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Status::Ok,
            1 => Status::Yield,
            2 => Status::Runtime,
            3 => Status::Syntax,
            4 => Status::Memory,
            5 => Status::MessageHandler,
            other => Status::Unknown(other),
        }
    }

    /// The raw interpreter status code.
    pub fn code(self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::Yield => 1,
            Status::Runtime => 2,
            Status::Syntax => 3,
            Status::Memory => 4,
            Status::MessageHandler => 5,
            Status::Unknown(code) => code,
        }
    }

    /// Returns whether this status signals success.
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => f.write_str("ok"),
            Status::Yield => f.write_str("yield"),
            Status::Runtime => f.write_str("runtime error"),
            Status::Syntax => f.write_str("syntax error"),
            Status::Memory => f.write_str("memory error"),
            Status::MessageHandler => f.write_str("message handler error"),
            Status::Unknown(code) => write!(f, "unknown status {}", code),
        }
    }
}

/// An error the interpreter raised, classified by status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    /// Status the protected call returned
    pub status: Status,
    /// Error message; a placeholder when the error object was not a string
    pub message: String,
}

impl ScriptError {
    /// Creates a script error.
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        ScriptError {
            status,
            message: message.into(),
        }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl StdError for ScriptError {}

/// A host-side failure that must cross the interpreter without being turned
/// into a string.
#[derive(Debug, Error)]
pub enum HostException {
    /// The host asked for the running script to stop
    #[error("script interrupted")]
    Interrupted,
    /// An arbitrary host error; recover the concrete type with
    /// [`HostException::downcast_ref`]
    #[error("{0}")]
    Error(Box<dyn StdError + Send + Sync>),
    /// A panic caught while running host code under the interpreter
    #[error("host callback panicked: {}", panic_message(.0.as_ref()))]
    Panic(Box<dyn Any + Send>),
    /// The bridge could not allocate while reporting another failure
    #[error("out of memory: {0}")]
    OutOfMemory(String),
}

impl HostException {
    /// Wraps an arbitrary error.
    pub fn error(error: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        HostException::Error(error.into())
    }

    /// Returns the wrapped error as `E` if that is its concrete type.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            HostException::Error(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Returns whether this is an interruption request.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, HostException::Interrupted)
    }

    /// Returns whether this carries a caught panic.
    pub fn is_panic(&self) -> bool {
        matches!(self, HostException::Panic(_))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string payload>"
    }
}

/// What a host callback returns on failure.
///
/// # Examples
///
/// ```
/// use core_types::HostError;
///
/// let abort = HostError::abort("bad input");
/// assert!(abort.is_abort());
/// assert_eq!(abort.to_string(), "bad input");
///
/// let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
/// let failure = HostError::exception(io);
/// assert!(!failure.is_abort());
/// ```
#[derive(Debug, Error)]
pub enum HostError {
    /// Abort the running script with this exact message
    #[error("{0}")]
    Abort(String),
    /// Propagate a host exception to the caller of the protected call
    #[error(transparent)]
    Exception(#[from] HostException),
}

impl HostError {
    /// Creates the script-abort kind.
    pub fn abort(message: impl Into<String>) -> Self {
        HostError::Abort(message.into())
    }

    /// Wraps an arbitrary error as a host exception.
    pub fn exception(error: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        HostError::Exception(HostException::error(error))
    }

    /// Returns whether this is the script-abort kind.
    pub fn is_abort(&self) -> bool {
        matches!(self, HostError::Abort(_))
    }
}

impl From<std::io::Error> for HostError {
    fn from(error: std::io::Error) -> Self {
        HostError::exception(error)
    }
}

/// Failure to populate the reference cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttachError {
    /// A required host type could not be resolved
    #[error("host type not found: {0}")]
    MissingType(String),
    /// A required method could not be resolved on a cached type
    #[error("method not found: {owner}.{name}{signature}")]
    MissingMethod {
        /// Type the method was looked up on
        owner: String,
        /// Method name
        name: String,
        /// Method signature
        signature: String,
    },
}

/// Errors returned by bridge and engine operations.
///
/// # Examples
///
/// ```
/// use core_types::{LuaError, Status};
///
/// let err = LuaError::from_status(Status::Syntax, "unexpected symbol".to_string());
/// assert!(matches!(err, LuaError::Syntax(_)));
/// assert_eq!(err.to_string(), "syntax error: unexpected symbol");
/// ```
#[derive(Debug, Error)]
pub enum LuaError {
    /// The script raised an error at run time
    #[error("runtime error: {0}")]
    Runtime(String),
    /// The chunk failed to compile
    #[error("syntax error: {0}")]
    Syntax(String),
    /// The interpreter ran out of memory
    #[error("not enough memory")]
    Memory,
    /// The message handler itself failed
    #[error("error in message handler")]
    MessageHandler,
    /// A host exception crossed the interpreter unchanged
    #[error("host exception: {0}")]
    Host(#[from] HostException),
    /// An argument was rejected before reaching the interpreter
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The interpreter stack could not grow
    #[error("stack overflow")]
    StackOverflow,
    /// An operation needed more stack values than were present
    #[error("stack underflow")]
    StackUnderflow,
    /// The bridge could not allocate its own bookkeeping
    #[error("out of memory")]
    OutOfMemory,
    /// The reference cache could not be populated
    #[error("attach failed: {0}")]
    Attach(#[from] AttachError),
    /// The operation is not valid in the instance's current state
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl LuaError {
    /// Classifies an error message by the status that produced it.
    pub fn from_status(status: Status, message: String) -> Self {
        match status {
            Status::Syntax => LuaError::Syntax(message),
            Status::Memory => LuaError::Memory,
            Status::MessageHandler => LuaError::MessageHandler,
            Status::Ok | Status::Yield | Status::Runtime | Status::Unknown(_) => {
                LuaError::Runtime(message)
            }
        }
    }

    /// Returns the host exception this error carries, if any.
    pub fn host_exception(&self) -> Option<&HostException> {
        match self {
            LuaError::Host(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the interpreter's message for runtime and syntax errors.
    pub fn script_message(&self) -> Option<&str> {
        match self {
            LuaError::Runtime(m) | LuaError::Syntax(m) => Some(m),
            _ => None,
        }
    }
}

impl From<ScriptError> for LuaError {
    fn from(error: ScriptError) -> Self {
        LuaError::from_status(error.status, error.message)
    }
}

/// Result alias for bridge operations.
pub type LuaResult<T> = Result<T, LuaError>;
