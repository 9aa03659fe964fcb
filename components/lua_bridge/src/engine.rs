//! High-level engine facade.
//!
//! [`LuaEngine`] wraps a [`Bridge`] with a function table, an interruptible
//! instruction hook and host libraries. Any failed operation leaves the
//! stack empty.

use crate::bridge::Bridge;
use crate::dispatch::{CallFrame, FunctionDispatcher};
use crate::interceptor::{ExecutionHook, PrintSink, SharedHook};
use crate::library::{LuaFunction, LuaLibrary};
use core_types::{
    ArgCheck, HookEvent, HookMask, HostError, HostException, LuaError, LuaResult, LuaType, StdLib,
    StdLibSet, Value,
};
use memory_manager::MemoryStats;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::ffi::c_int;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Default interpreter memory limit (16 MiB).
pub const DEFAULT_MEMORY_LIMIT: usize = 16 * 1024 * 1024;

/// Default number of instructions between interrupt checks.
pub const DEFAULT_HOOK_INSTRUCTION_COUNT: u32 = 1000;

/// Engine configuration.
///
/// # Examples
///
/// ```
/// use core_types::StdLibSet;
/// use lua_bridge::EngineConfig;
///
/// let config = EngineConfig::default()
///     .with_memory_limit(1 << 20)
///     .with_std_libs(StdLibSet::all());
/// assert_eq!(config.memory_limit, 1 << 20);
///
/// let parsed = EngineConfig::from_json(r#"{"memory_limit": 65536}"#).unwrap();
/// assert_eq!(parsed.memory_limit, 65536);
/// assert_eq!(parsed.hook_instruction_count, 1000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bytes the interpreter may allocate
    pub memory_limit: usize,
    /// Instructions between interrupt checks; 0 disables the hook
    pub hook_instruction_count: u32,
    /// Standard libraries opened at creation
    pub std_libs: StdLibSet,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            memory_limit: DEFAULT_MEMORY_LIMIT,
            hook_instruction_count: DEFAULT_HOOK_INSTRUCTION_COUNT,
            std_libs: StdLibSet::default_set(),
        }
    }
}

impl EngineConfig {
    /// Sets the memory limit.
    pub fn with_memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = limit;
        self
    }

    /// Sets the interrupt check interval.
    pub fn with_hook_instruction_count(mut self, count: u32) -> Self {
        self.hook_instruction_count = count;
        self
    }

    /// Sets the standard libraries.
    pub fn with_std_libs(mut self, libs: StdLibSet) -> Self {
        self.std_libs = libs;
        self
    }

    /// Parses a JSON configuration; missing fields keep their defaults.
    pub fn from_json(text: &str) -> LuaResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| LuaError::InvalidArgument(format!("invalid engine config: {}", e)))
    }
}

/// Requests that the running script stop.
///
/// Settable from any thread; observed by the engine's instruction hook and
/// by interruptible host functions. The request is consumed by whoever
/// observes it.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    /// Creates a handle with no request pending.
    pub fn new() -> Self {
        InterruptHandle::default()
    }

    /// Requests an interrupt.
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns whether an interrupt is requested, without consuming it.
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Consumes a pending request.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    /// Returns [`HostException::Interrupted`] if a request was pending.
    pub fn check(&self) -> Result<(), HostException> {
        if self.take() {
            return Err(HostException::Interrupted);
        }
        Ok(())
    }
}

struct Entry {
    name: String,
    function: Rc<dyn LuaFunction>,
    checks: Vec<ArgCheck>,
}

/// Dispatcher routing proxy ids to registered host functions.
#[derive(Default)]
struct FunctionTable {
    entries: RefCell<Vec<Entry>>,
}

impl FunctionTable {
    fn register(&self, name: &str, function: Rc<dyn LuaFunction>, checks: &[ArgCheck]) -> LuaResult<i32> {
        let mut entries = self.entries.borrow_mut();
        let id = i32::try_from(entries.len())
            .map_err(|_| LuaError::InvalidState("function table is full".to_string()))?;
        entries.push(Entry {
            name: name.to_string(),
            function,
            checks: checks.to_vec(),
        });
        Ok(id)
    }

    fn len(&self) -> usize {
        self.entries.borrow().len()
    }
}

impl FunctionDispatcher for FunctionTable {
    fn call(&self, id: i32, frame: &mut CallFrame<'_>) -> Result<c_int, HostError> {
        let (function, checks) = {
            let entries = self.entries.borrow();
            let entry = usize::try_from(id)
                .ok()
                .and_then(|index| entries.get(index))
                .ok_or_else(|| HostError::abort(format!("unknown host function id {}", id)))?;
            tracing::trace!(id, name = %entry.name, "host function called");
            (Rc::clone(&entry.function), entry.checks.clone())
        };
        let args = if ArgCheck::is_pass_through(&checks) {
            frame.values()
        } else {
            frame.checked_values(&checks)?
        };
        let results = function.call(args)?;
        frame.clear();
        frame.push(&results)
    }
}

/// Instruction hook of every engine: an optional per-call hook, then the
/// interrupt check.
struct EngineHook {
    interrupt: InterruptHandle,
    user: Option<Box<dyn ExecutionHook>>,
}

impl ExecutionHook for EngineHook {
    fn on_event(&mut self, event: HookEvent, line: i32) -> Result<(), HostError> {
        if let Some(user) = self.user.as_mut() {
            user.on_event(event, line)?;
        }
        self.interrupt.check()?;
        Ok(())
    }
}

/// A sandboxed interpreter with host functions and libraries.
///
/// # Examples
///
/// ```
/// use core_types::{ArgCheck, Value};
/// use lua_bridge::{EngineConfig, LuaEngine};
///
/// let mut engine = LuaEngine::new(EngineConfig::default()).unwrap();
/// engine
///     .add_global_function(
///         "add",
///         |args: Vec<Value>| {
///             let sum = args.iter().filter_map(Value::as_integer).sum::<i64>();
///             Ok(vec![Value::Integer(sum)])
///         },
///         &[ArgCheck::Long, ArgCheck::Long],
///     )
///     .unwrap();
/// let results = engine.eval_string("return add(2, '40')", "=doc").unwrap();
/// assert_eq!(results, vec![Value::Number(42.0)]);
/// ```
pub struct LuaEngine {
    bridge: Bridge,
    functions: Rc<FunctionTable>,
    hook: Rc<RefCell<EngineHook>>,
    libraries: Vec<Box<dyn LuaLibrary>>,
    interrupt: InterruptHandle,
    config: EngineConfig,
}

impl LuaEngine {
    /// Creates an engine and opens `config.std_libs`.
    pub fn new(config: EngineConfig) -> LuaResult<Self> {
        let mut bridge = Bridge::new(config.memory_limit)?;
        let functions = Rc::new(FunctionTable::default());
        let interrupt = InterruptHandle::new();
        let hook = Rc::new(RefCell::new(EngineHook {
            interrupt: interrupt.clone(),
            user: None,
        }));

        bridge.set_dispatcher(Some(Rc::clone(&functions) as Rc<dyn FunctionDispatcher>));
        bridge.set_hook(Some(Rc::clone(&hook) as SharedHook));
        bridge.set_hook_mask(HookMask::every(config.hook_instruction_count));

        let mut engine = LuaEngine {
            bridge,
            functions,
            hook,
            libraries: Vec::new(),
            interrupt,
            config,
        };
        engine.open_std_libs(engine.config.std_libs)?;
        Ok(engine)
    }

    /// The configuration the engine was created with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The underlying bridge.
    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// The underlying bridge, for direct stack access.
    pub fn bridge_mut(&mut self) -> &mut Bridge {
        &mut self.bridge
    }

    /// Handle that stops the running script from another thread.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Number of registered host functions.
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    fn guard<T>(&mut self, op: impl FnOnce(&mut Bridge) -> LuaResult<T>) -> LuaResult<T> {
        let result = op(&mut self.bridge);
        if result.is_err() {
            let _ = self.bridge.set_top(0);
        }
        result
    }

    /// Opens standard libraries. Opening the base library also routes
    /// `print` through the print sink.
    pub fn open_std_libs(&mut self, libs: StdLibSet) -> LuaResult<()> {
        self.guard(|bridge| {
            bridge.open_libs(libs)?;
            if libs.contains(StdLib::Base) {
                bridge.replace_print()?;
            }
            Ok(())
        })
    }

    /// Sends `print` output to `sink`.
    pub fn set_print_function(&mut self, sink: Rc<dyn PrintSink>) {
        self.bridge.set_print_sink(Some(sink));
    }

    /// Creates an empty global table `name`.
    pub fn add_lib_table(&mut self, name: &str) -> LuaResult<()> {
        self.guard(|bridge| {
            bridge.push_new_table(0, 0)?;
            bridge.set_global(name)
        })
    }

    /// Reads the global `name`. Tables and functions come back opaque.
    pub fn get_global_variable(&mut self, name: &str) -> LuaResult<Value> {
        self.guard(|bridge| {
            bridge.get_global(name)?;
            let value = bridge.value(-1);
            bridge.pop(1)?;
            Ok(value)
        })
    }

    /// Sets the global `name`.
    pub fn add_global_variable(&mut self, name: &str, value: &Value) -> LuaResult<()> {
        self.guard(|bridge| {
            bridge.push_value(value)?;
            bridge.set_global(name)
        })
    }

    /// Sets `lib.name`; `lib` must be an existing global table.
    pub fn add_lib_variable(&mut self, lib: &str, name: &str, value: &Value) -> LuaResult<()> {
        self.guard(|bridge| {
            push_lib_table(bridge, lib)?;
            bridge.push_value(value)?;
            bridge.set_table_field(name)?;
            bridge.pop(1)
        })
    }

    /// Registers `function` as the global `name`; returns its callback id.
    ///
    /// `checks` must have `ArgCheck::Any` only first and var-args rules only
    /// last.
    pub fn add_global_function(
        &mut self,
        name: &str,
        function: impl Fn(Vec<Value>) -> Result<Vec<Value>, HostError> + 'static,
        checks: &[ArgCheck],
    ) -> LuaResult<i32> {
        self.add_global_rc(name, Rc::new(function), checks)
    }

    fn add_global_rc(
        &mut self,
        name: &str,
        function: Rc<dyn LuaFunction>,
        checks: &[ArgCheck],
    ) -> LuaResult<i32> {
        ArgCheck::validate_list(checks)?;
        let functions = Rc::clone(&self.functions);
        self.guard(|bridge| {
            let id = functions.register(name, function, checks)?;
            bridge.push_proxy_function(id)?;
            bridge.set_global(name)?;
            Ok(id)
        })
    }

    /// Registers `function` as `lib.name`; returns its callback id.
    pub fn add_lib_function(
        &mut self,
        lib: &str,
        name: &str,
        function: impl Fn(Vec<Value>) -> Result<Vec<Value>, HostError> + 'static,
        checks: &[ArgCheck],
    ) -> LuaResult<i32> {
        self.add_lib_rc(lib, name, Rc::new(function), checks)
    }

    fn add_lib_rc(
        &mut self,
        lib: &str,
        name: &str,
        function: Rc<dyn LuaFunction>,
        checks: &[ArgCheck],
    ) -> LuaResult<i32> {
        ArgCheck::validate_list(checks)?;
        let qualified = format!("{}.{}", lib, name);
        let functions = Rc::clone(&self.functions);
        self.guard(|bridge| {
            push_lib_table(bridge, lib)?;
            let id = functions.register(&qualified, function, checks)?;
            bridge.push_proxy_function(id)?;
            bridge.set_table_field(name)?;
            bridge.pop(1)?;
            Ok(id)
        })
    }

    /// Registers every function and variable of `library` under its table
    /// and keeps the library until the engine is dropped.
    pub fn add_library(&mut self, library: Box<dyn LuaLibrary>) -> LuaResult<()> {
        let name = library.name().to_string();
        self.add_lib_table(&name)?;
        for function in library.functions() {
            self.add_lib_rc(&name, &function.name, function.function, &function.checks)?;
        }
        for (field, value) in library.variables() {
            self.add_lib_variable(&name, &field, &value)?;
        }
        tracing::debug!(instance = self.bridge.id(), library = %name, "library added");
        self.libraries.push(library);
        Ok(())
    }

    /// Runs `source` as chunk `chunk_name`, discarding its results.
    ///
    /// `hook`, if given, sees every instruction-count event of this run
    /// only.
    pub fn exec_string(
        &mut self,
        hook: Option<Box<dyn ExecutionHook>>,
        source: &str,
        chunk_name: &str,
    ) -> LuaResult<()> {
        self.guard(|bridge| bridge.load_string(source, chunk_name))?;
        self.run(hook, 0, 0)
    }

    /// Runs `source` and returns its results.
    pub fn eval_string(&mut self, source: &str, chunk_name: &str) -> LuaResult<Vec<Value>> {
        let base = self.bridge.top();
        self.guard(|bridge| bridge.load_string(source, chunk_name))?;
        self.run(None, 0, mlua_sys::LUA_MULTRET)?;
        self.take_results(base)
    }

    /// Calls the global function `name` with `params` and returns its
    /// results. The stack must be empty.
    pub fn call_global_function(
        &mut self,
        hook: Option<Box<dyn ExecutionHook>>,
        name: &str,
        params: &[Value],
    ) -> LuaResult<Vec<Value>> {
        if self.bridge.top() != 0 {
            return Err(LuaError::InvalidState("stack not empty".to_string()));
        }
        let nargs = c_int::try_from(params.len())
            .map_err(|_| LuaError::InvalidArgument("too many parameters".to_string()))?;
        self.guard(|bridge| {
            if bridge.get_global(name)? != LuaType::Function {
                return Err(LuaError::Runtime(format!("{} is not a function", name)));
            }
            for param in params {
                bridge.push_value(param)?;
            }
            Ok(())
        })?;
        self.run(hook, nargs, mlua_sys::LUA_MULTRET)?;
        self.take_results(0)
    }

    fn run(
        &mut self,
        hook: Option<Box<dyn ExecutionHook>>,
        nargs: c_int,
        nresults: c_int,
    ) -> LuaResult<()> {
        self.hook.borrow_mut().user = hook;
        let outcome = self.bridge.pcall(nargs, nresults, 0);
        self.hook.borrow_mut().user = None;
        if !outcome.is_ok() {
            let _ = self.bridge.set_top(0);
        }
        outcome.into_result()
    }

    fn take_results(&mut self, base: c_int) -> LuaResult<Vec<Value>> {
        let top = self.bridge.top();
        let results = ((base + 1)..=top).map(|index| self.bridge.value(index)).collect();
        self.bridge.set_top(base)?;
        Ok(results)
    }

    /// Describes the stack, one value per line.
    pub fn dump_stack(&self) -> String {
        self.bridge.dump_stack()
    }

    /// Allocation statistics.
    pub fn memory_stats(&self) -> MemoryStats {
        self.bridge.memory_stats()
    }

    /// Bytes the interpreter may still allocate.
    pub fn memory_remaining(&self) -> usize {
        self.bridge.memory_remaining()
    }

    /// Bytes the interpreter currently holds.
    pub fn memory_in_use(&self) -> usize {
        self.bridge.memory_in_use()
    }
}

fn push_lib_table(bridge: &mut Bridge, lib: &str) -> LuaResult<()> {
    if bridge.get_global(lib)? != LuaType::Table {
        bridge.pop(1)?;
        return Err(LuaError::InvalidArgument(format!("{} is not a table", lib)));
    }
    Ok(())
}

impl Drop for LuaEngine {
    fn drop(&mut self) {
        for library in self.libraries.iter_mut().rev() {
            tracing::debug!(library = library.name(), "closing library");
            library.close();
        }
    }
}

impl fmt::Debug for LuaEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LuaEngine")
            .field("bridge", &self.bridge)
            .field("functions", &self.functions.len())
            .field("libraries", &self.libraries.len())
            .field("config", &self.config)
            .finish()
    }
}
