//! Contract tests for builtins component
//!
//! These tests drive each library through a `LuaEngine` the way a script
//! sees it.

mod system_tests;
