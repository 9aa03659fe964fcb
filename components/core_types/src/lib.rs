//! Core value types and error handling shared by the Lua bridge.
//!
//! This crate holds everything that crosses the boundary between the host
//! (Rust) and the embedded Lua interpreter without touching the interpreter
//! itself:
//!
//! - [`Value`] - marshalled representation of a Lua stack value
//! - [`LuaType`] - the interpreter's type tags
//! - [`Status`] - status codes returned by protected calls
//! - [`LuaError`], [`HostError`], [`HostException`] - the error taxonomy
//! - [`ArgCheck`] - type-check and coercion rules for callback arguments
//! - [`StdLib`], [`StdLibSet`] - standard library selection
//! - [`HookEvent`], [`HookMask`] - execution hook events and granularity
//!
//! # Examples
//!
//! ```
//! use core_types::{HostError, LuaError, Status, Value};
//!
//! let value = Value::from(vec![Value::from(1.5), Value::from("two")]);
//! assert_eq!(value.type_name(), "table");
//!
//! let error = LuaError::from_status(Status::Runtime, "boom".to_string());
//! assert_eq!(error.to_string(), "runtime error: boom");
//!
//! let abort = HostError::abort("stop here");
//! assert!(abort.is_abort());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod args;
mod error;
mod hook;
mod stdlib;
mod value;

pub use args::{ArgCheck, CheckType};
pub use error::{
    AttachError, HostError, HostException, LuaError, LuaResult, ScriptError, Status,
};
pub use hook::{HookEvent, HookMask};
pub use stdlib::{StdLib, StdLibSet};
pub use value::{LuaType, Value};
