//! Per-instance bridge API.
//!
//! A [`Bridge`] owns exactly one interpreter and its [`BridgeContext`]. All
//! operations that can raise inside the interpreter go through the
//! protected-call gateway, so every failure comes back as a value.

use crate::cache::{self, Attachment};
use crate::context::{self, BridgeContext};
use crate::dispatch::{self, FunctionDispatcher};
use crate::gateway::{self, Outcome};
use crate::interceptor::{self, PrintSink, SharedHook};
use crate::marshal;
use core_types::{
    ArgCheck, HookMask, LuaError, LuaResult, LuaType, ScriptError, Status, StdLib, StdLibSet, Value,
};
use memory_manager::{lua_alloc, BoundedAllocator, MemoryStats};
use mlua_sys as ffi;
use std::any::Any;
use std::ffi::{c_int, c_void, CStr, CString};
use std::fmt::Write;
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// One embedded interpreter instance.
///
/// Not thread-safe: every operation must be serialized by the caller, which
/// `Bridge` enforces by being neither `Send` nor `Sync`.
///
/// # Examples
///
/// ```
/// use core_types::{StdLibSet, Value};
/// use lua_bridge::Bridge;
///
/// let mut bridge = Bridge::new(1 << 20).unwrap();
/// bridge.open_libs(StdLibSet::default_set()).unwrap();
/// bridge.load_string("return 1 + 1", "=example").unwrap();
/// assert!(bridge.pcall(0, 1, 0).is_ok());
/// assert_eq!(bridge.values(), vec![Value::Number(2.0)]);
/// ```
pub struct Bridge {
    state: NonNull<ffi::lua_State>,
    context: NonNull<BridgeContext>,
    _attachment: Attachment,
}

impl Bridge {
    /// Creates an interpreter whose allocations are bounded by
    /// `memory_limit` bytes.
    ///
    /// Attaches to the process reference cache first; fails with
    /// [`LuaError::Attach`] if it cannot be populated, and with
    /// [`LuaError::OutOfMemory`] if the interpreter cannot be created within
    /// the limit.
    pub fn new(memory_limit: usize) -> LuaResult<Self> {
        let attachment = cache::attach()?;
        let id = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
        let context = NonNull::from(Box::leak(Box::new(BridgeContext::new(id, memory_limit))));

        // SAFETY: the allocator lives inside the boxed context, which is
        // freed only after the interpreter is closed.
        let state = unsafe {
            let allocator: *const BoundedAllocator = context.as_ref().allocator();
            ffi::lua_newstate(lua_alloc, allocator as *mut c_void)
        };
        let Some(state) = NonNull::new(state) else {
            // SAFETY: the context was leaked above and never shared.
            drop(unsafe { Box::from_raw(context.as_ptr()) });
            tracing::debug!(instance = id, memory_limit, "interpreter creation refused");
            return Err(LuaError::OutOfMemory);
        };

        // SAFETY: `state` is a fresh main thread; the context outlives it.
        unsafe {
            ffi::lua_atpanic(state.as_ptr(), context::panic_handler);
            context::register(state.as_ptr(), context);
        }
        tracing::debug!(instance = id, memory_limit, "interpreter created");

        Ok(Bridge {
            state,
            context,
            _attachment: attachment,
        })
    }

    fn state(&self) -> *mut ffi::lua_State {
        self.state.as_ptr()
    }

    /// The instance's context.
    pub fn context(&self) -> &BridgeContext {
        // SAFETY: the context lives as long as `self`.
        unsafe { self.context.as_ref() }
    }

    /// Instance id, unique within the process.
    pub fn id(&self) -> u64 {
        self.context().id()
    }

    /// Raw interpreter handle, for callers that drive the C API directly.
    ///
    /// Anything that can raise must still go through
    /// [`protect`](crate::protect).
    pub fn as_ptr(&self) -> *mut ffi::lua_State {
        self.state()
    }

    // ---- registration ----

    /// Installs (or with `None` removes) the execution hook, releasing the
    /// previous one. Events are selected with [`Bridge::set_hook_mask`].
    pub fn set_hook(&mut self, hook: Option<SharedHook>) {
        drop(self.context().replace_hook(hook));
    }

    /// Selects which events reach the execution hook.
    pub fn set_hook_mask(&mut self, mask: HookMask) {
        let (raw, count) = mask.to_raw();
        let hook: Option<ffi::lua_Hook> = if mask.is_empty() {
            None
        } else {
            Some(interceptor::hook_callback)
        };
        // SAFETY: setting a hook never raises.
        unsafe { ffi::lua_sethook(self.state(), hook, raw, count) };
    }

    /// Installs (or removes) the sink behind the replaced `print`.
    pub fn set_print_sink(&mut self, sink: Option<Rc<dyn PrintSink>>) {
        drop(self.context().replace_print_sink(sink));
    }

    /// Installs (or removes) the dispatcher behind every proxy function.
    pub fn set_dispatcher(&mut self, dispatcher: Option<Rc<dyn FunctionDispatcher>>) {
        drop(self.context().replace_dispatcher(dispatcher));
    }

    // ---- libraries ----

    /// Opens the selected standard libraries.
    pub fn open_libs(&mut self, libs: StdLibSet) -> LuaResult<()> {
        for lib in libs.iter() {
            let (name, open) = opener(lib);
            // SAFETY: live state; the closure holds no destructors.
            unsafe {
                gateway::protect(self.state(), 0, 0, |s| {
                    ffi::luaL_requiref(s, name.as_ptr(), open, 1);
                })
            }
            .into_result()?;
            tracing::trace!(instance = self.id(), %lib, "library opened");
        }
        Ok(())
    }

    /// Replaces the global `print` with one that writes to the print sink
    /// (standard output while none is set).
    pub fn replace_print(&mut self) -> LuaResult<()> {
        // SAFETY: live state; the closure holds no destructors.
        unsafe {
            gateway::protect(self.state(), 0, 0, |s| {
                ffi::lua_pushcfunction(s, interceptor::print_callback);
                ffi::lua_setglobal(s, c"print".as_ptr());
            })
        }
        .into_result()
    }

    // ---- execution ----

    /// Compiles `source` as a text chunk named `chunk_name` and pushes the
    /// resulting function.
    pub fn load_string(&mut self, source: &str, chunk_name: &str) -> LuaResult<()> {
        let name = c_name(chunk_name)?;
        // SAFETY: loading is itself protected and never raises.
        unsafe {
            gateway::ensure_stack(self.state(), 1)?;
            let status = ffi::luaL_loadbufferx(
                self.state(),
                source.as_ptr().cast(),
                source.len(),
                name.as_ptr(),
                c"t".as_ptr(),
            );
            if status != ffi::LUA_OK {
                let message = gateway::error_message(self.state(), -1);
                ffi::lua_settop(self.state(), -2);
                return Err(LuaError::from_status(Status::from_code(status), message));
            }
        }
        Ok(())
    }

    /// Calls the function below the top `nargs` values.
    ///
    /// The three-way result keeps a host exception raised by a callback
    /// apart from an ordinary script error. On failure the function and its
    /// arguments are gone from the stack.
    pub fn pcall(&mut self, nargs: c_int, nresults: c_int, msgh: c_int) -> Outcome<()> {
        if nargs < 0 || self.top() <= nargs {
            return Outcome::ScriptError(ScriptError::new(
                Status::Runtime,
                "not enough values on the stack for the call",
            ));
        }
        // SAFETY: a function and `nargs` arguments are on the stack.
        unsafe { gateway::raw_pcall(self.state(), nargs, nresults, msgh) }
    }

    // ---- stack ----

    /// Number of values on the stack.
    pub fn top(&self) -> c_int {
        // SAFETY: reading the top never raises.
        unsafe { ffi::lua_gettop(self.state()) }
    }

    /// Sets the stack top. Growing fills with nil; a negative index counts
    /// from the top.
    pub fn set_top(&mut self, index: c_int) -> LuaResult<()> {
        let top = self.top();
        if index < 0 && -index > top + 1 {
            return Err(LuaError::StackUnderflow);
        }
        // SAFETY: the index was validated and room reserved below.
        unsafe {
            if index > top {
                gateway::ensure_stack(self.state(), index - top)?;
            }
            ffi::lua_settop(self.state(), index);
        }
        Ok(())
    }

    /// Pops `n` values.
    pub fn pop(&mut self, n: c_int) -> LuaResult<()> {
        if n < 0 || n > self.top() {
            return Err(LuaError::StackUnderflow);
        }
        self.set_top(-n - 1)
    }

    /// Converts host values through the reference cache and pushes them in
    /// order.
    ///
    /// Every value is converted before anything is pushed, so an unsupported
    /// value anywhere leaves the stack untouched.
    pub fn push_values(&mut self, values: &[&dyn Any]) -> LuaResult<()> {
        let values = values
            .iter()
            .map(|value| marshal::to_value(*value))
            .collect::<LuaResult<Vec<_>>>()?;
        for value in &values {
            marshal::check_depth(value)?;
        }
        // SAFETY: live state.
        unsafe { marshal::push_all(self.state(), &values) }.into_result()
    }

    /// Pushes one value.
    pub fn push_value(&mut self, value: &Value) -> LuaResult<()> {
        marshal::check_depth(value)?;
        // SAFETY: live state.
        unsafe { marshal::push_all(self.state(), std::slice::from_ref(value)) }.into_result()
    }

    /// Reads the value at `index`.
    pub fn value(&self, index: c_int) -> Value {
        if !self.is_valid_index(index) {
            return Value::Nil;
        }
        // SAFETY: the index is within the stack.
        unsafe { marshal::read_value(self.state(), index) }
    }

    /// Reads every value on the stack, bottom first.
    pub fn values(&self) -> Vec<Value> {
        // SAFETY: live state.
        unsafe { marshal::read_all(self.state()) }
    }

    /// Reads the whole stack as an argument list, type-checked and coerced.
    ///
    /// On a mismatch the stack is cleared and the error reads
    /// `bad argument #n`.
    pub fn checked_values(&mut self, checks: &[ArgCheck]) -> LuaResult<Vec<Value>> {
        ArgCheck::validate_list(checks)?;
        // SAFETY: live state.
        unsafe { marshal::read_checked(self.state(), checks) }.into_result()
    }

    /// Pushes a new table with preallocated array and hash parts.
    pub fn push_new_table(&mut self, narr: c_int, nrec: c_int) -> LuaResult<()> {
        // SAFETY: live state.
        unsafe {
            gateway::protect(self.state(), 0, 1, |s| {
                ffi::lua_createtable(s, narr.max(0), nrec.max(0));
            })
        }
        .into_result()
    }

    /// `t[key] = v` where `t` is just below the top and `v` on top. Pops
    /// `v`; `t` stays.
    pub fn set_table_field(&mut self, key: &str) -> LuaResult<()> {
        if self.top() < 2 {
            return Err(LuaError::StackUnderflow);
        }
        let key = c_name(key)?;
        // SAFETY: two values on the stack; the closure only borrows `key`.
        unsafe {
            gateway::protect(self.state(), 2, 1, |s| {
                ffi::lua_setfield(s, 1, key.as_ptr());
            })
        }
        .into_result()
    }

    /// Reads the sequence part of the table at `index`, recursively.
    pub fn table_array(&self, index: c_int) -> LuaResult<Vec<Value>> {
        if !self.is_valid_index(index) {
            return Err(LuaError::InvalidArgument(format!(
                "invalid stack index {}",
                index
            )));
        }
        // SAFETY: the index is within the stack.
        unsafe { marshal::read_array(self.state(), index, 0) }
    }

    /// Pushes the global `name` and returns its type.
    pub fn get_global(&mut self, name: &str) -> LuaResult<LuaType> {
        let name = c_name(name)?;
        // SAFETY: live state; the closure only borrows `name`.
        unsafe {
            gateway::protect(self.state(), 0, 1, |s| ffi::lua_getglobal(s, name.as_ptr()))
        }
        .into_result()
        .map(LuaType::from_raw)
    }

    /// Pops the top value into the global `name`.
    pub fn set_global(&mut self, name: &str) -> LuaResult<()> {
        if self.top() < 1 {
            return Err(LuaError::StackUnderflow);
        }
        let name = c_name(name)?;
        // SAFETY: one value on the stack; the closure only borrows `name`.
        unsafe {
            gateway::protect(self.state(), 1, 0, |s| {
                ffi::lua_setglobal(s, name.as_ptr());
            })
        }
        .into_result()
    }

    /// Pushes a function that calls the dispatcher with `id`.
    pub fn push_proxy_function(&mut self, id: i32) -> LuaResult<()> {
        // SAFETY: live state.
        unsafe {
            gateway::protect(self.state(), 0, 1, |s| {
                ffi::lua_pushinteger(s, ffi::lua_Integer::from(id));
                ffi::lua_pushcclosure(s, dispatch::proxy_function, 1);
            })
        }
        .into_result()
    }

    /// Describes every stack value, one per line.
    pub fn dump_stack(&self) -> String {
        let top = self.top();
        let mut out = format!("Stack: {}\n", top);
        for index in 1..=top {
            let value = self.value(index);
            let _ = writeln!(out, "{}: type={}, {}", index, value.type_name(), value);
        }
        out
    }

    // ---- memory ----

    /// Bytes the interpreter may still allocate.
    pub fn memory_remaining(&self) -> usize {
        self.context().allocator().remaining()
    }

    /// Bytes the interpreter currently holds.
    pub fn memory_in_use(&self) -> usize {
        self.context().allocator().in_use()
    }

    /// Allocation statistics.
    pub fn memory_stats(&self) -> MemoryStats {
        self.context().allocator().stats()
    }

    fn is_valid_index(&self, index: c_int) -> bool {
        let top = self.top();
        match index {
            0 => false,
            i if i > 0 => i <= top,
            i => -i <= top,
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        let id = self.id();
        // SAFETY: the interpreter is closed exactly once, while its context
        // is still registered so finalizers can reach the callbacks. The
        // context, and every handle it holds, goes last.
        unsafe {
            ffi::lua_close(self.state());
            if !context::unregister(self.state(), self.context) {
                tracing::debug!(instance = id, "side-table entry already taken by a newer instance");
            }
            drop(Box::from_raw(self.context.as_ptr()));
        }
        tracing::debug!(instance = id, "interpreter closed");
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("context", self.context())
            .field("top", &self.top())
            .finish()
    }
}

/// Converts a name for the C API. An empty name is valid; an interior NUL
/// is not.
fn c_name(name: &str) -> LuaResult<CString> {
    CString::new(name).map_err(|_| {
        LuaError::InvalidArgument(format!("name contains a NUL byte: {:?}", name))
    })
}

fn opener(lib: StdLib) -> (&'static CStr, ffi::lua_CFunction) {
    match lib {
        StdLib::Base => (c"_G", ffi::luaopen_base),
        StdLib::Package => (c"package", ffi::luaopen_package),
        StdLib::Coroutine => (c"coroutine", ffi::luaopen_coroutine),
        StdLib::Table => (c"table", ffi::luaopen_table),
        StdLib::Io => (c"io", ffi::luaopen_io),
        StdLib::Os => (c"os", ffi::luaopen_os),
        StdLib::String => (c"string", ffi::luaopen_string),
        StdLib::Math => (c"math", ffi::luaopen_math),
        StdLib::Utf8 => (c"utf8", ffi::luaopen_utf8),
        StdLib::Debug => (c"debug", ffi::luaopen_debug),
    }
}
