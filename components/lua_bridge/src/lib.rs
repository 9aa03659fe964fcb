//! Bridge between a Rust host and an embedded Lua 5.4 interpreter
//!
//! The interpreter reports errors by `longjmp`, which must never cross a
//! Rust frame that owns values with destructors. This crate provides:
//! - A bounded allocator per instance (via `memory_manager`)
//! - A reference cache resolving host types once per process
//! - A protected-call gateway returning a three-way [`Outcome`]
//! - Value marshalling in both directions, including nested tables
//! - Host functions exposed to scripts by integer id
//! - Execution hooks and a `print` replacement that can stop a script
//! - [`LuaEngine`], a facade with host libraries and interruption
//!
//! # Example
//!
//! ```
//! use core_types::{HostError, Value};
//! use lua_bridge::{EngineConfig, LuaEngine};
//!
//! let mut engine = LuaEngine::new(EngineConfig::default()).unwrap();
//! engine
//!     .add_global_function("fail", |_| Err(HostError::abort("nope")), &[])
//!     .unwrap();
//!
//! let results = engine
//!     .eval_string("local ok, err = pcall(fail) return ok, err", "=example")
//!     .unwrap();
//! assert_eq!(results, vec![Value::Boolean(false), Value::from("nope")]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod cache;
pub mod context;
pub mod dispatch;
pub mod engine;
pub mod gateway;
pub mod interceptor;
pub mod library;
pub mod marshal;

// Re-export main types at crate root
pub use bridge::Bridge;
pub use cache::{attach, attachment_count, Attachment, HostRuntime, NativeRuntime, ReferenceCache};
pub use context::{registered_instances, BridgeContext};
pub use dispatch::{CallFrame, FunctionDispatcher};
pub use engine::{EngineConfig, InterruptHandle, LuaEngine};
pub use gateway::{protect, Outcome};
pub use interceptor::{
    continue_while, shared_hook, ExecutionHook, PrintSink, SharedHook, StdoutSink,
};
pub use library::{LibraryFunction, LuaFunction, LuaLibrary};
pub use marshal::to_value;
pub use memory_manager::MemoryStats;
pub use mlua_sys as ffi;
