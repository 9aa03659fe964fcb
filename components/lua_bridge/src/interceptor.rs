//! Event interceptors: the execution hook and the `print` replacement.
//!
//! Both run synchronously inside the interpreter. A host failure becomes an
//! interpreter error that unwinds to the nearest protected call: an abort
//! as a plain script error, anything else as the pending host exception.

use crate::context;
use crate::gateway;
use crate::marshal;
use core_types::{HookEvent, HostError};
use mlua_sys as ffi;
use std::cell::RefCell;
use std::ffi::{c_int, CStr};
use std::io::Write;
use std::ptr;
use std::rc::Rc;

/// Observer invoked by the interpreter at the granularity set with
/// [`Bridge::set_hook_mask`](crate::Bridge::set_hook_mask).
///
/// Returning [`HostError::Abort`] stops the running script with a script
/// error; any other error is handed back to the host unchanged.
pub trait ExecutionHook {
    /// Called for each selected event. `line` is the current line, or `-1`
    /// when the interpreter does not know it.
    fn on_event(&mut self, event: HookEvent, line: i32) -> Result<(), HostError>;
}

impl<F> ExecutionHook for F
where
    F: FnMut(HookEvent, i32) -> Result<(), HostError>,
{
    fn on_event(&mut self, event: HookEvent, line: i32) -> Result<(), HostError> {
        self(event, line)
    }
}

/// Hook handle as stored on an instance.
pub type SharedHook = Rc<RefCell<dyn ExecutionHook>>;

/// Wraps a hook for [`Bridge::set_hook`](crate::Bridge::set_hook).
pub fn shared_hook(hook: impl ExecutionHook + 'static) -> SharedHook {
    Rc::new(RefCell::new(hook))
}

/// Message of the script error raised when a [`continue_while`] hook stops.
pub const HOOK_ABORT_MESSAGE: &str = "execution aborted by hook";

/// Boolean form of a hook: execution continues while `predicate` returns
/// `true`.
///
/// # Examples
///
/// ```
/// use core_types::HookEvent;
/// use lua_bridge::{continue_while, ExecutionHook};
///
/// let mut calls = 0;
/// let mut hook = continue_while(move |_, _| {
///     calls += 1;
///     calls < 2
/// });
/// assert!(hook.on_event(HookEvent::Count, -1).is_ok());
/// assert!(hook.on_event(HookEvent::Count, -1).unwrap_err().is_abort());
/// ```
pub fn continue_while<P>(mut predicate: P) -> impl ExecutionHook
where
    P: FnMut(HookEvent, i32) -> bool,
{
    move |event: HookEvent, line: i32| {
        if predicate(event, line) {
            Ok(())
        } else {
            Err(HostError::abort(HOOK_ABORT_MESSAGE))
        }
    }
}

pub(crate) unsafe extern "C-unwind" fn hook_callback(
    state: *mut ffi::lua_State,
    ar: *mut ffi::lua_Debug,
) {
    if !run_hook(state, ar) {
        ffi::lua_error(state);
    }
}

/// Returns `false` with the error value on top when the script must stop.
unsafe fn run_hook(state: *mut ffi::lua_State, ar: *mut ffi::lua_Debug) -> bool {
    let Some(context) = context::lookup(state) else {
        return unknown_interpreter(state, UNKNOWN_HOOK_MESSAGE);
    };
    if context.has_pending() {
        gateway::push_sentinel(state);
        return false;
    }
    let Some(event) = ar.as_ref().and_then(|ar| HookEvent::from_raw(ar.event)) else {
        return true;
    };
    let Some(hook) = context.hook() else {
        return true;
    };
    let line = current_line(state, ar, event);

    let result = gateway::catch_host(|| match hook.try_borrow_mut() {
        Ok(mut hook) => hook.on_event(event, line),
        // The hook itself re-entered the interpreter.
        Err(_) => Ok(()),
    });
    drop(hook);
    match result {
        Ok(()) => true,
        Err(error) => {
            tracing::trace!(instance = context.id(), ?event, line, %error, "hook stopped execution");
            gateway::stage_error(state, context, error);
            false
        }
    }
}

const UNKNOWN_HOOK_MESSAGE: &CStr = c"hook called on an unknown interpreter";
const UNKNOWN_PRINT_MESSAGE: &CStr = c"print called on an unknown interpreter";

/// Without its context the bridge cannot honour the host's hook or sink, so
/// the script is stopped instead of running unobserved.
unsafe fn unknown_interpreter(state: *mut ffi::lua_State, message: &'static CStr) -> bool {
    tracing::warn!(state = ?state, message = ?message, "no bridge context for interpreter");
    ffi::lua_pushstring(state, message.as_ptr());
    false
}

unsafe fn current_line(state: *mut ffi::lua_State, ar: *mut ffi::lua_Debug, event: HookEvent) -> i32 {
    if event != HookEvent::Line && ffi::lua_getinfo(state, c"l".as_ptr(), ar) == 0 {
        return -1;
    }
    (*ar).currentline
}

/// Receiver for the output of the script-visible `print`.
///
/// `print(a, b)` becomes `write_string(a)`, `write_string("\t")`,
/// `write_string(b)`, `write_line()`.
pub trait PrintSink {
    /// Writes one piece of a line.
    fn write_string(&self, text: &str) -> Result<(), HostError>;

    /// Ends the line.
    fn write_line(&self) -> Result<(), HostError>;
}

/// Writes to the process's standard output. Used when no sink is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl PrintSink for StdoutSink {
    fn write_string(&self, text: &str) -> Result<(), HostError> {
        std::io::stdout().write_all(text.as_bytes())?;
        Ok(())
    }

    fn write_line(&self) -> Result<(), HostError> {
        let mut out = std::io::stdout().lock();
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }
}

/// Message raised when an argument cannot be turned into a string.
const TOSTRING_MESSAGE: &str = "'tostring' must return a string to 'print'";

pub(crate) unsafe extern "C-unwind" fn print_callback(state: *mut ffi::lua_State) -> c_int {
    if run_print(state) {
        0
    } else {
        ffi::lua_error(state)
    }
}

unsafe fn run_print(state: *mut ffi::lua_State) -> bool {
    let Some(context) = context::lookup(state) else {
        return unknown_interpreter(state, UNKNOWN_PRINT_MESSAGE);
    };
    if context.has_pending() {
        gateway::push_sentinel(state);
        return false;
    }
    let sink = context
        .print_sink()
        .unwrap_or_else(|| Rc::new(StdoutSink) as Rc<dyn PrintSink>);
    let result = write_arguments(state, &*sink);
    drop(sink);
    match result {
        Ok(()) => true,
        Err(error) => {
            gateway::stage_error(state, context, error);
            false
        }
    }
}

unsafe fn write_arguments(state: *mut ffi::lua_State, sink: &dyn PrintSink) -> Result<(), HostError> {
    let nargs = ffi::lua_gettop(state);
    for index in 1..=nargs {
        let text = stringify(state, index)?;
        if index > 1 {
            gateway::catch_host(|| sink.write_string("\t"))?;
        }
        gateway::catch_host(|| sink.write_string(&text))?;
    }
    gateway::catch_host(|| sink.write_line())
}

/// Converts the argument at `index` with the interpreter's own `tostring`
/// rules, protected since `__tostring` may raise.
unsafe fn stringify(state: *mut ffi::lua_State, index: c_int) -> Result<String, HostError> {
    if ffi::lua_checkstack(state, 3) == 0 {
        return Err(HostError::abort("stack overflow"));
    }
    ffi::lua_pushvalue(state, index);
    gateway::protect(state, 1, 1, |s| {
        ffi::luaL_tolstring(s, 1, ptr::null_mut());
        ffi::lua_replace(s, 1);
    })
    .into_host_result()?;
    let text = marshal::string_at(state, -1);
    ffi::lua_settop(state, -2);
    text.ok_or_else(|| HostError::abort(TOSTRING_MESSAGE))
}
