//! Protected-call gateway.
//!
//! The interpreter reports errors by `longjmp`ing to the nearest protected
//! call. A jump across a Rust frame that still owns values with destructors
//! is undefined behaviour, so every stack operation that can raise runs as a
//! closure inside the interpreter's own `lua_pcall`, through [`protect`]. The
//! jump then always lands inside a frame this module controls.
//!
//! A protected call has two independent failure channels:
//!
//! 1. the interpreter status code, with an error value on the stack;
//! 2. the instance's pending host exception slot, filled by a host callback
//!    somewhere below the call.
//!
//! The pending slot is checked first and is authoritative. When it is set,
//! the interpreter's error value is discarded and the host exception comes
//! back unchanged.
//!
//! Closures passed to [`protect`] must not hold values with destructors
//! across an interpreter call that can raise.

use crate::context::{self, BridgeContext};
use crate::marshal;
use core_types::{HostError, HostException, LuaError, LuaResult, LuaType, ScriptError, Status, Value};
use mlua_sys as ffi;
use std::any::Any;
use std::ffi::{c_int, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

/// Result of a protected call.
#[derive(Debug)]
pub enum Outcome<T> {
    /// The closure ran to completion
    Ok(T),
    /// The interpreter raised an error
    ScriptError(ScriptError),
    /// A host exception or panic surfaced through the call
    HostException(HostException),
}

impl<T> Outcome<T> {
    /// Returns whether the call succeeded.
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    /// Converts into a bridge result.
    ///
    /// A captured panic is resumed here, so it reaches the host intact.
    pub fn into_result(self) -> LuaResult<T> {
        match self {
            Outcome::Ok(value) => Ok(value),
            Outcome::ScriptError(error) => Err(error.into()),
            Outcome::HostException(HostException::Panic(payload)) => {
                panic::resume_unwind(payload)
            }
            Outcome::HostException(exception) => Err(LuaError::Host(exception)),
        }
    }

    /// Converts into the result type host callbacks return.
    ///
    /// Script errors become [`HostError::Abort`] with the interpreter's
    /// message; host exceptions (panics included) are passed through so the
    /// callback's caller can park them again.
    pub fn into_host_result(self) -> Result<T, HostError> {
        match self {
            Outcome::Ok(value) => Ok(value),
            Outcome::ScriptError(error) => Err(HostError::Abort(error.message)),
            Outcome::HostException(exception) => Err(HostError::Exception(exception)),
        }
    }
}

static SENTINEL: u8 = 0;

/// Pushes the opaque error value that stands for "a host exception is
/// pending".
pub(crate) unsafe fn push_sentinel(state: *mut ffi::lua_State) {
    ffi::lua_pushlightuserdata(state, ptr::addr_of!(SENTINEL) as *mut c_void);
}

/// Returns whether the value at `index` is the pending-exception sentinel.
pub(crate) unsafe fn is_sentinel(state: *mut ffi::lua_State, index: c_int) -> bool {
    ffi::lua_type(state, index) == ffi::LUA_TLIGHTUSERDATA
        && ffi::lua_touserdata(state, index) as *const u8 == ptr::addr_of!(SENTINEL)
}

struct Call<F, R> {
    f: Option<F>,
    result: Option<R>,
    panic: Option<Box<dyn Any + Send>>,
}

unsafe extern "C-unwind" fn trampoline<F, R>(state: *mut ffi::lua_State) -> c_int
where
    F: FnOnce(*mut ffi::lua_State) -> R,
{
    let call = ffi::lua_touserdata(state, -1).cast::<Call<F, R>>();
    ffi::lua_settop(state, -2);
    if run_call(state, call) {
        ffi::lua_gettop(state)
    } else {
        push_sentinel(state);
        ffi::lua_error(state)
    }
}

unsafe fn run_call<F, R>(state: *mut ffi::lua_State, call: *mut Call<F, R>) -> bool
where
    F: FnOnce(*mut ffi::lua_State) -> R,
{
    let Some(call) = call.as_mut() else {
        return false;
    };
    let Some(f) = call.f.take() else {
        return false;
    };
    match panic::catch_unwind(AssertUnwindSafe(|| f(state))) {
        Ok(result) => {
            call.result = Some(result);
            true
        }
        Err(payload) => {
            call.panic = Some(payload);
            false
        }
    }
}

/// Runs `f` inside a protected call.
///
/// The top `nargs` stack values become the closure's frame; whatever the
/// closure leaves on its frame are its results, adjusted to `nresults`
/// (`LUA_MULTRET` keeps them all). On failure the arguments are consumed and
/// the stack is left as it was below them.
///
/// # Safety
///
/// `state` must be a live interpreter thread with at least `nargs` values on
/// its stack. `f` must not hold values with destructors across calls that
/// can raise.
pub unsafe fn protect<F, R>(
    state: *mut ffi::lua_State,
    nargs: c_int,
    nresults: c_int,
    f: F,
) -> Outcome<R>
where
    F: FnOnce(*mut ffi::lua_State) -> R,
{
    let base = ffi::lua_gettop(state) - nargs;
    if ffi::lua_checkstack(state, 2) == 0 {
        return Outcome::ScriptError(ScriptError::new(Status::Runtime, "stack overflow"));
    }

    let mut call = Call {
        f: Some(f),
        result: None,
        panic: None,
    };
    ffi::lua_pushcfunction(state, trampoline::<F, R>);
    ffi::lua_rotate(state, base + 1, 1);
    ffi::lua_pushlightuserdata(state, ptr::addr_of_mut!(call).cast());
    let status = ffi::lua_pcall(state, nargs + 1, nresults, 0);

    settle(state, base, status, call.result.take(), call.panic.take())
}

/// Calls the function below the top `nargs` values, classifying failures
/// the same way as [`protect`].
///
/// # Safety
///
/// `state` must be a live interpreter thread with a function and `nargs`
/// arguments on top of its stack.
pub unsafe fn raw_pcall(
    state: *mut ffi::lua_State,
    nargs: c_int,
    nresults: c_int,
    msgh: c_int,
) -> Outcome<()> {
    let base = ffi::lua_gettop(state) - nargs - 1;
    let status = ffi::lua_pcall(state, nargs, nresults, msgh);
    settle(state, base, status, Some(()), None)
}

unsafe fn settle<R>(
    state: *mut ffi::lua_State,
    base: c_int,
    status: c_int,
    result: Option<R>,
    panic: Option<Box<dyn Any + Send>>,
) -> Outcome<R> {
    if let Some(exception) = context::lookup(state).and_then(BridgeContext::take_pending) {
        ffi::lua_settop(state, base);
        return Outcome::HostException(exception);
    }
    if let Some(payload) = panic {
        ffi::lua_settop(state, base);
        return Outcome::HostException(HostException::Panic(payload));
    }
    if status != ffi::LUA_OK {
        let message = error_message(state, -1);
        ffi::lua_settop(state, base);
        return Outcome::ScriptError(ScriptError::new(Status::from_code(status), message));
    }
    match result {
        Some(result) => Outcome::Ok(result),
        None => Outcome::ScriptError(ScriptError::new(
            Status::Runtime,
            "protected call produced no result",
        )),
    }
}

/// Describes the error value at `index` without calling into the
/// interpreter in a way that could raise.
pub(crate) unsafe fn error_message(state: *mut ffi::lua_State, index: c_int) -> String {
    match ffi::lua_type(state, index) {
        ffi::LUA_TSTRING => marshal::string_at(state, index).unwrap_or_default(),
        ffi::LUA_TNUMBER if ffi::lua_isinteger(state, index) != 0 => {
            ffi::lua_tointegerx(state, index, ptr::null_mut()).to_string()
        }
        ffi::LUA_TNUMBER => Value::Number(ffi::lua_tonumberx(state, index, ptr::null_mut())).to_string(),
        ffi::LUA_TNONE => "(no error object)".to_string(),
        _ if is_sentinel(state, index) => "(host exception)".to_string(),
        tag => format!("(error object is a {} value)", LuaType::from_raw(tag).name()),
    }
}

/// Pushes `message` as a string, protected.
///
/// Fails only when the interpreter cannot allocate the string, in which case
/// the message comes back inside a host exception.
pub(crate) unsafe fn push_message(
    state: *mut ffi::lua_State,
    message: &str,
) -> Result<(), HostException> {
    let outcome = protect(state, 0, 1, |s| {
        ffi::lua_pushlstring(s, message.as_ptr().cast(), message.len());
    });
    match outcome {
        Outcome::Ok(()) => Ok(()),
        Outcome::ScriptError(_) => Err(HostException::OutOfMemory(message.to_string())),
        Outcome::HostException(exception) => Err(exception),
    }
}

/// Leaves the error value for a failed host callback on top of the stack.
///
/// Aborts become their message; everything else is parked in `context` and
/// replaced by the sentinel. The caller raises right after this returns.
pub(crate) unsafe fn stage_error(
    state: *mut ffi::lua_State,
    context: &BridgeContext,
    error: HostError,
) {
    let exception = match error {
        HostError::Abort(message) => match push_message(state, &message) {
            Ok(()) => return,
            Err(exception) => exception,
        },
        HostError::Exception(exception) => exception,
    };
    context.park(exception);
    push_sentinel(state);
}

/// Runs host code, turning a panic into a host exception.
pub(crate) fn catch_host<R>(f: impl FnOnce() -> Result<R, HostError>) -> Result<R, HostError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(HostError::Exception(HostException::Panic(payload))),
    }
}

/// Ensures room for `extra` more stack slots.
///
/// # Safety
///
/// `state` must be a live interpreter thread.
pub unsafe fn ensure_stack(state: *mut ffi::lua_State, extra: c_int) -> LuaResult<()> {
    if ffi::lua_checkstack(state, extra) == 0 {
        return Err(LuaError::StackOverflow);
    }
    Ok(())
}
