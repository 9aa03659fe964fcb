//! Host libraries exposed to scripts as global tables.

use core_types::{ArgCheck, HostError, Value};
use std::fmt;
use std::rc::Rc;

/// A host function callable from scripts.
///
/// Arguments arrive already checked and coerced by the function's
/// [`ArgCheck`] list; the returned values become the script-visible results.
pub trait LuaFunction {
    /// Runs the function.
    fn call(&self, args: Vec<Value>) -> Result<Vec<Value>, HostError>;
}

impl<F> LuaFunction for F
where
    F: Fn(Vec<Value>) -> Result<Vec<Value>, HostError>,
{
    fn call(&self, args: Vec<Value>) -> Result<Vec<Value>, HostError> {
        self(args)
    }
}

/// One function of a [`LuaLibrary`].
#[derive(Clone)]
pub struct LibraryFunction {
    /// Field name in the library table
    pub name: String,
    /// Argument rules
    pub checks: Vec<ArgCheck>,
    /// Implementation
    pub function: Rc<dyn LuaFunction>,
}

impl LibraryFunction {
    /// Creates a library function.
    pub fn new(
        name: impl Into<String>,
        checks: &[ArgCheck],
        function: impl Fn(Vec<Value>) -> Result<Vec<Value>, HostError> + 'static,
    ) -> Self {
        LibraryFunction {
            name: name.into(),
            checks: checks.to_vec(),
            function: Rc::new(function),
        }
    }
}

impl fmt::Debug for LibraryFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryFunction")
            .field("name", &self.name)
            .field("checks", &self.checks)
            .finish_non_exhaustive()
    }
}

/// A set of host functions registered under one global table.
///
/// Libraries added to a [`LuaEngine`](crate::LuaEngine) are closed in
/// reverse order of registration when the engine is dropped.
pub trait LuaLibrary {
    /// Global table name.
    fn name(&self) -> &str;

    /// Functions to register in the table.
    fn functions(&self) -> Vec<LibraryFunction>;

    /// Constant fields to set in the table.
    fn variables(&self) -> Vec<(String, Value)> {
        Vec::new()
    }

    /// Releases whatever the library holds.
    fn close(&mut self) {}
}
