//! Host libraries exposed to scripts as global tables
//!
//! This crate provides the libraries a host typically adds to a
//! [`LuaEngine`](lua_bridge::LuaEngine):
//! - `sys`: wall-clock time and an interruptible sleep
//! - `fs`: a flat, sandboxed file system rooted at one directory
//!
//! # Example
//!
//! ```
//! use builtins::SystemFunctions;
//! use lua_bridge::{EngineConfig, LuaEngine};
//!
//! let mut engine = LuaEngine::new(EngineConfig::default()).unwrap();
//! let interrupt = engine.interrupt_handle();
//! engine
//!     .add_library(Box::new(SystemFunctions::with_interrupt(interrupt)))
//!     .unwrap();
//!
//! let results = engine.eval_string("return math.type(sys.time())", "=doc").unwrap();
//! assert_eq!(results[0].as_str(), Some("float"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod filesystem;
pub mod system;

// Re-export main types for convenience
pub use error::LibraryError;
pub use filesystem::RestrictedFileSystem;
pub use system::SystemFunctions;
