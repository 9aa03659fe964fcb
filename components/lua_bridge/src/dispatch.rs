//! Callback dispatcher: host functions exposed to scripts by small integer id.
//!
//! [`Bridge::push_proxy_function`](crate::Bridge::push_proxy_function) pushes
//! a C closure whose only upvalue is the id. Calling it from a script routes
//! to the instance's [`FunctionDispatcher`]:
//!
//! - `Ok(n)` returns the top `n` stack values to the script;
//! - `Err(HostError::Abort(msg))` raises a script error whose message is
//!   exactly `msg`;
//! - any other error, or a panic, is parked as the pending host exception
//!   and unwinds to the nearest gateway, which hands it back unchanged.

use crate::context::{self, BridgeContext};
use crate::gateway;
use crate::marshal;
use core_types::{ArgCheck, HostError, Value};
use mlua_sys as ffi;
use std::any::Any;
use std::ffi::{c_int, CStr};
use std::marker::PhantomData;
use std::ptr;

/// Host side of every proxy function registered on an instance.
pub trait FunctionDispatcher {
    /// Handles a script call to the proxy registered under `id`.
    ///
    /// Returns how many values on top of the frame are results.
    fn call(&self, id: i32, frame: &mut CallFrame<'_>) -> Result<c_int, HostError>;
}

/// The stack frame of one proxy function invocation.
///
/// Every operation is a nested protected call, so a failure comes back as a
/// [`HostError`] instead of unwinding through the dispatcher.
pub struct CallFrame<'a> {
    state: *mut ffi::lua_State,
    _frame: PhantomData<&'a mut ffi::lua_State>,
}

impl<'a> CallFrame<'a> {
    pub(crate) fn new(state: *mut ffi::lua_State) -> Self {
        CallFrame {
            state,
            _frame: PhantomData,
        }
    }

    /// Number of values currently on the frame.
    pub fn arg_count(&self) -> usize {
        // SAFETY: the frame only exists while its interpreter call is running.
        let top = unsafe { ffi::lua_gettop(self.state) };
        usize::try_from(top).unwrap_or(0)
    }

    /// Reads every argument unchecked.
    pub fn values(&self) -> Vec<Value> {
        // SAFETY: see `arg_count`.
        unsafe { marshal::read_all(self.state) }
    }

    /// Reads the arguments, type-checked and coerced by `checks`.
    ///
    /// A mismatch is an [`HostError::Abort`] reading `bad argument #n`.
    pub fn checked_values(&mut self, checks: &[ArgCheck]) -> Result<Vec<Value>, HostError> {
        // SAFETY: see `arg_count`.
        unsafe { marshal::read_checked(self.state, checks) }.into_host_result()
    }

    /// Pushes `values` as results and returns their count.
    pub fn push(&mut self, values: &[Value]) -> Result<c_int, HostError> {
        for value in values {
            marshal::check_depth(value).map_err(|e| HostError::abort(e.to_string()))?;
        }
        let count = c_int::try_from(values.len())
            .map_err(|_| HostError::abort("too many results"))?;
        // SAFETY: see `arg_count`.
        unsafe { marshal::push_all(self.state, values) }.into_host_result()?;
        Ok(count)
    }

    /// Converts host values through the reference cache and pushes them.
    pub fn push_host(&mut self, values: &[&dyn Any]) -> Result<c_int, HostError> {
        let values = values
            .iter()
            .map(|value| marshal::to_value(*value))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| HostError::abort(e.to_string()))?;
        self.push(&values)
    }

    /// Drops every value on the frame.
    pub fn clear(&mut self) {
        // SAFETY: shrinking the stack never raises.
        unsafe { ffi::lua_settop(self.state, 0) }
    }
}

/// The interpreter-visible proxy. Upvalue 1 holds the callback id.
pub(crate) unsafe extern "C-unwind" fn proxy_function(state: *mut ffi::lua_State) -> c_int {
    match call_dispatcher(state) {
        Some(results) => results,
        None => ffi::lua_error(state),
    }
}

/// Runs the dispatcher. `None` means an error value is on top, ready to be
/// raised; nothing with a destructor is alive once this returns.
unsafe fn call_dispatcher(state: *mut ffi::lua_State) -> Option<c_int> {
    let Some(context) = context::lookup(state) else {
        push_static(state, c"host function called on an unknown interpreter");
        return None;
    };
    if context.has_pending() {
        gateway::push_sentinel(state);
        return None;
    }
    // Validated before the dispatcher is cloned: pushing a message can
    // raise, and a raise must not skip the clone's drop.
    let id = ffi::lua_tointegerx(state, ffi::lua_upvalueindex(1), ptr::null_mut());
    let Ok(id) = i32::try_from(id) else {
        push_static(state, c"invalid callback id");
        return None;
    };
    let Some(dispatcher) = context.dispatcher() else {
        push_static(state, c"no function dispatcher registered");
        return None;
    };
    let result = gateway::catch_host(|| {
        let mut frame = CallFrame::new(state);
        dispatcher.call(id, &mut frame)
    });
    drop(dispatcher);
    settle_call(state, context, result)
}

unsafe fn settle_call(
    state: *mut ffi::lua_State,
    context: &BridgeContext,
    result: Result<c_int, HostError>,
) -> Option<c_int> {
    let error = match result {
        Ok(n) if (0..=ffi::lua_gettop(state)).contains(&n) => return Some(n),
        Ok(n) => HostError::abort(format!("invalid result count {}", n)),
        Err(error) => error,
    };
    gateway::stage_error(state, context, error);
    None
}

unsafe fn push_static(state: *mut ffi::lua_State, message: &'static CStr) {
    ffi::lua_pushstring(state, message.as_ptr());
}
