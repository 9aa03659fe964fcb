//! Value marshalling between host values and the interpreter stack.
//!
//! Host values are resolved to a [`Value`] through the reference cache before
//! the interpreter is touched, so an unsupported type fails without pushing
//! anything. Pushing runs inside [`protect`](crate::gateway::protect) since
//! every push can allocate. Reading never calls an interpreter routine that
//! can raise: numbers are formatted on the host side and only values that
//! already are strings are read as strings.

use crate::cache::{self, Conversion, ReferenceCache};
use crate::gateway::{self, Outcome};
use core_types::{ArgCheck, CheckType, LuaError, LuaResult, LuaType, Value};
use mlua_sys as ffi;
use std::any::Any;
use std::ffi::c_int;
use std::ptr;

/// Deepest nesting of sequences accepted in either direction.
pub const MAX_DEPTH: usize = 64;

/// Converts a host value through the process reference cache.
///
/// Fails with [`LuaError::InvalidArgument`] on the first unsupported value,
/// at any depth.
pub fn to_value(value: &dyn Any) -> LuaResult<Value> {
    cache::with_process_cache(|cache| convert(cache, value, 0)).ok_or_else(|| {
        LuaError::InvalidState("reference cache is not attached".to_string())
    })?
}

/// Converts a host value through `cache`.
pub fn convert(cache: &ReferenceCache, value: &dyn Any, depth: usize) -> LuaResult<Value> {
    if depth > MAX_DEPTH {
        return Err(LuaError::InvalidArgument(
            "host value nested too deeply".to_string(),
        ));
    }
    let method = cache
        .conversion_for(value.type_id())
        .ok_or_else(|| LuaError::InvalidArgument("unsupported host value type".to_string()))?;
    let mismatch =
        || LuaError::InvalidArgument(format!("value does not match cached type {}", method.owner));

    match method.conversion {
        Conversion::Nil => Ok(Value::Nil),
        Conversion::Boolean(f) => f(value).map(Value::Boolean).ok_or_else(mismatch),
        Conversion::Integer(f) => f(value).ok_or_else(mismatch),
        Conversion::Number(f) => f(value).map(Value::Number).ok_or_else(mismatch),
        Conversion::String(f) => f(value).map(Value::from).ok_or_else(mismatch),
        Conversion::Sequence(f) => f(value)
            .ok_or_else(mismatch)?
            .into_iter()
            .map(|item| convert(cache, item, depth + 1))
            .collect::<LuaResult<Vec<_>>>()
            .map(Value::Array),
        Conversion::Value(f) => f(value).ok_or_else(mismatch),
    }
}

/// Rejects values nested deeper than [`MAX_DEPTH`].
pub fn check_depth(value: &Value) -> LuaResult<()> {
    fn depth(value: &Value) -> usize {
        match value {
            Value::Array(items) => 1 + items.iter().map(depth).max().unwrap_or(0),
            _ => 0,
        }
    }
    if depth(value) > MAX_DEPTH {
        return Err(LuaError::InvalidArgument(format!(
            "value nested deeper than {} levels",
            MAX_DEPTH
        )));
    }
    Ok(())
}

/// Pushes `value`. Arrays become fresh tables keyed from 1.
///
/// Host numbers, integers included, go through `f64` and reach scripts as
/// floats. Opaque identities stay integers.
///
/// # Safety
///
/// Must run inside a protected call: allocation failure raises. The depth
/// must have been checked with [`check_depth`].
pub(crate) unsafe fn push_raw(state: *mut ffi::lua_State, value: &Value) {
    match value {
        Value::Nil => ffi::lua_pushnil(state),
        Value::Boolean(b) => ffi::lua_pushboolean(state, c_int::from(*b)),
        Value::Integer(n) => ffi::lua_pushnumber(state, *n as ffi::lua_Number),
        Value::Number(n) => ffi::lua_pushnumber(state, *n),
        Value::String(s) => {
            ffi::lua_pushlstring(state, s.as_ptr().cast(), s.len());
        }
        Value::Opaque { address, .. } => ffi::lua_pushinteger(state, *address as ffi::lua_Integer),
        Value::Array(items) => {
            ffi::luaL_checkstack(state, 2, ptr::null());
            let narr = c_int::try_from(items.len()).unwrap_or(c_int::MAX);
            ffi::lua_createtable(state, narr, 0);
            for (i, item) in items.iter().enumerate() {
                push_raw(state, item);
                ffi::lua_seti(state, -2, i as ffi::lua_Integer + 1);
            }
        }
    }
}

/// Pushes every value in order, protected.
///
/// # Safety
///
/// `state` must be a live interpreter thread.
pub(crate) unsafe fn push_all(state: *mut ffi::lua_State, values: &[Value]) -> Outcome<()> {
    gateway::protect(state, 0, ffi::LUA_MULTRET, |s| {
        for value in values {
            ffi::luaL_checkstack(s, 1, ptr::null());
            push_raw(s, value);
        }
    })
}

/// Copies the string at `index`, if the value there is a string.
///
/// Invalid UTF-8 is replaced rather than rejected.
pub(crate) unsafe fn string_at(state: *mut ffi::lua_State, index: c_int) -> Option<String> {
    if ffi::lua_type(state, index) != ffi::LUA_TSTRING {
        return None;
    }
    let mut len = 0usize;
    let data = ffi::lua_tolstring(state, index, &mut len);
    if data.is_null() {
        return None;
    }
    let bytes = std::slice::from_raw_parts(data.cast::<u8>(), len);
    Some(String::from_utf8_lossy(bytes).into_owned())
}

/// Reads the value at `index`.
///
/// Tables, functions, userdata and threads come back as their address.
///
/// # Safety
///
/// `index` must be an acceptable index of a live interpreter thread.
pub(crate) unsafe fn read_value(state: *mut ffi::lua_State, index: c_int) -> Value {
    match ffi::lua_type(state, index) {
        ffi::LUA_TNONE | ffi::LUA_TNIL => Value::Nil,
        ffi::LUA_TBOOLEAN => Value::Boolean(ffi::lua_toboolean(state, index) != 0),
        ffi::LUA_TNUMBER => Value::Number(ffi::lua_tonumberx(state, index, ptr::null_mut())),
        ffi::LUA_TSTRING => Value::String(string_at(state, index).unwrap_or_default()),
        tag => Value::Opaque {
            kind: LuaType::from_raw(tag),
            address: ffi::lua_topointer(state, index) as usize,
        },
    }
}

/// Reads every value on the stack, bottom first.
pub(crate) unsafe fn read_all(state: *mut ffi::lua_State) -> Vec<Value> {
    (1..=ffi::lua_gettop(state))
        .map(|index| read_value(state, index))
        .collect()
}

/// Reads the sequence part (`1..=#t`, raw) of the table at `index`.
///
/// Nested tables are read recursively up to [`MAX_DEPTH`].
///
/// # Safety
///
/// `index` must be a valid index of a live interpreter thread.
pub(crate) unsafe fn read_array(
    state: *mut ffi::lua_State,
    index: c_int,
    depth: usize,
) -> LuaResult<Vec<Value>> {
    if ffi::lua_type(state, index) != ffi::LUA_TTABLE {
        return Err(LuaError::InvalidArgument(format!(
            "expected a table at index {}",
            index
        )));
    }
    if depth > MAX_DEPTH {
        return Err(LuaError::InvalidArgument(format!(
            "table nested deeper than {} levels",
            MAX_DEPTH
        )));
    }
    gateway::ensure_stack(state, 1)?;

    let table = ffi::lua_absindex(state, index);
    let len = ffi::lua_rawlen(state, table);
    let mut items = Vec::with_capacity(len);
    for key in 1..=len {
        ffi::lua_rawgeti(state, table, key as ffi::lua_Integer);
        let item = if ffi::lua_type(state, -1) == ffi::LUA_TTABLE {
            read_array(state, -1, depth + 1).map(Value::Array)
        } else {
            Ok(read_value(state, -1))
        };
        ffi::lua_settop(state, -2);
        items.push(item?);
    }
    Ok(items)
}

/// Type-checks and coerces every stack value against `checks`.
///
/// The whole stack is treated as the argument list. On success the
/// converted values come back; on failure the stack is cleared and the
/// script error reads `bad argument #n`.
///
/// # Safety
///
/// `state` must be a live interpreter thread.
pub(crate) unsafe fn read_checked(
    state: *mut ffi::lua_State,
    checks: &[ArgCheck],
) -> Outcome<Vec<Value>> {
    if ArgCheck::is_pass_through(checks) {
        return Outcome::Ok(read_all(state));
    }
    let nargs = ffi::lua_gettop(state);
    let outcome = gateway::protect(state, nargs, ffi::LUA_MULTRET, |s| coerce_arguments(s, checks));
    match outcome {
        Outcome::Ok(_) => Outcome::Ok(read_coerced(state, checks)),
        Outcome::ScriptError(error) => Outcome::ScriptError(error),
        Outcome::HostException(exception) => Outcome::HostException(exception),
    }
}

unsafe fn coerce_arguments(state: *mut ffi::lua_State, checks: &[ArgCheck]) -> c_int {
    match first_bad_argument(state, checks) {
        None => 0,
        Some(index) => {
            ffi::lua_pushfstring(state, c"bad argument #%d".as_ptr(), index);
            ffi::lua_error(state)
        }
    }
}

/// Walks the argument positions `checks` covers, calling `visit` with the
/// stack index, the target type and whether nil is allowed.
fn positions(checks: &[ArgCheck], top: c_int, mut visit: impl FnMut(c_int, CheckType, bool) -> bool) {
    let mut index: c_int = 1;
    for check in checks {
        let Some(kind) = check.check_type() else {
            continue;
        };
        if check.is_var_args() {
            while index <= top {
                if !visit(index, kind, false) {
                    return;
                }
                index += 1;
            }
            return;
        }
        if !visit(index, kind, check.is_nullable()) {
            return;
        }
        index += 1;
    }
}

unsafe fn first_bad_argument(state: *mut ffi::lua_State, checks: &[ArgCheck]) -> Option<c_int> {
    let top = ffi::lua_gettop(state);
    let mut bad = None;
    positions(checks, top, |index, kind, nullable| {
        if coerce_one(state, index, top, kind, nullable) {
            true
        } else {
            bad = Some(index);
            false
        }
    });
    bad
}

unsafe fn coerce_one(
    state: *mut ffi::lua_State,
    index: c_int,
    top: c_int,
    kind: CheckType,
    nullable: bool,
) -> bool {
    if index > top || ffi::lua_type(state, index) == ffi::LUA_TNIL {
        return nullable;
    }
    let mut ok: c_int = 0;
    match kind {
        CheckType::Boolean => true,
        CheckType::Integer => {
            ffi::lua_tointegerx(state, index, &mut ok);
            ok != 0
        }
        CheckType::Number => {
            ffi::lua_tonumberx(state, index, &mut ok);
            ok != 0
        }
        CheckType::String => match ffi::lua_type(state, index) {
            ffi::LUA_TSTRING => true,
            ffi::LUA_TNUMBER => {
                // Converts the slot in place; may raise on allocation failure.
                ffi::lua_tolstring(state, index, ptr::null_mut());
                true
            }
            _ => false,
        },
    }
}

unsafe fn read_coerced(state: *mut ffi::lua_State, checks: &[ArgCheck]) -> Vec<Value> {
    let top = ffi::lua_gettop(state);
    let mut values = Vec::new();
    positions(checks, top, |index, kind, _| {
        values.push(read_as(state, index, top, kind));
        true
    });
    values
}

unsafe fn read_as(state: *mut ffi::lua_State, index: c_int, top: c_int, kind: CheckType) -> Value {
    if index > top || ffi::lua_type(state, index) == ffi::LUA_TNIL {
        return Value::Nil;
    }
    match kind {
        CheckType::Boolean => Value::Boolean(ffi::lua_toboolean(state, index) != 0),
        CheckType::Integer => Value::Integer(ffi::lua_tointegerx(state, index, ptr::null_mut())),
        CheckType::Number => Value::Number(ffi::lua_tonumberx(state, index, ptr::null_mut())),
        CheckType::String => Value::String(string_at(state, index).unwrap_or_default()),
    }
}
