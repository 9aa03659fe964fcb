//! Tests for the protected-call gateway

use core_types::{HostError, HostException, LuaError, Status};
use lua_bridge::{ffi, gateway, protect, Bridge, Outcome};
use std::panic::{self, AssertUnwindSafe};

fn bridge() -> Bridge {
    Bridge::new(1 << 20).unwrap()
}

#[test]
fn test_protect_returns_closure_result_and_values() {
    let bridge = bridge();
    let state = bridge.as_ptr();
    let outcome = unsafe {
        protect(state, 0, 1, |s| {
            ffi::lua_pushinteger(s, 5);
            7
        })
    };
    assert!(matches!(outcome, Outcome::Ok(7)));
    assert_eq!(bridge.top(), 1);
    assert_eq!(bridge.value(1).as_integer(), Some(5));
}

#[test]
fn test_protect_passes_arguments() {
    let bridge = bridge();
    let state = bridge.as_ptr();
    unsafe {
        ffi::lua_pushinteger(state, 2);
        ffi::lua_pushinteger(state, 40);
        let outcome = protect(state, 2, 1, |s| ffi::lua_arith(s, ffi::LUA_OPADD));
        assert!(outcome.is_ok());
    }
    assert_eq!(bridge.top(), 1);
    assert_eq!(bridge.value(1).as_integer(), Some(42));
}

#[test]
fn test_raised_error_becomes_script_error() {
    let bridge = bridge();
    let state = bridge.as_ptr();
    unsafe {
        ffi::lua_pushboolean(state, 1);
        let outcome = protect::<_, ()>(state, 0, 0, |s| {
            ffi::lua_pushstring(s, c"boom".as_ptr());
            ffi::lua_error(s);
        });
        match outcome {
            Outcome::ScriptError(error) => {
                assert_eq!(error.status, Status::Runtime);
                assert_eq!(error.message, "boom");
            }
            other => panic!("expected a script error, got {:?}", other),
        }
    }
    // Values below the call are untouched.
    assert_eq!(bridge.top(), 1);
}

#[test]
fn test_failed_call_consumes_its_arguments() {
    let bridge = bridge();
    let state = bridge.as_ptr();
    unsafe {
        ffi::lua_pushinteger(state, 1);
        ffi::lua_pushinteger(state, 2);
        let outcome = protect::<_, ()>(state, 1, 1, |s| {
            ffi::lua_pushstring(s, c"no".as_ptr());
            ffi::lua_error(s);
        });
        assert!(!outcome.is_ok());
    }
    assert_eq!(bridge.top(), 1);
}

#[test]
fn test_non_string_error_objects_are_described() {
    let bridge = bridge();
    let state = bridge.as_ptr();
    let table = unsafe {
        protect::<_, ()>(state, 0, 0, |s| {
            ffi::lua_createtable(s, 0, 0);
            ffi::lua_error(s);
        })
    };
    match table {
        Outcome::ScriptError(error) => assert_eq!(error.message, "(error object is a table value)"),
        other => panic!("unexpected {:?}", other),
    }

    let integer = unsafe {
        protect::<_, ()>(state, 0, 0, |s| {
            ffi::lua_pushinteger(s, 42);
            ffi::lua_error(s);
        })
    };
    match integer {
        Outcome::ScriptError(error) => assert_eq!(error.message, "42"),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_panic_is_captured_and_resumed() {
    let bridge = bridge();
    let state = bridge.as_ptr();
    let outcome = unsafe { protect(state, 0, 0, |_s| -> () { panic!("kaboom") }) };
    match &outcome {
        Outcome::HostException(exception) => {
            assert!(exception.is_panic());
            assert_eq!(exception.to_string(), "host callback panicked: kaboom");
        }
        other => panic!("expected a host exception, got {:?}", other),
    }
    assert!(!bridge.context().has_pending());

    let resumed = panic::catch_unwind(AssertUnwindSafe(|| outcome.into_result()));
    assert!(resumed.is_err());
}

#[test]
fn test_into_host_result_keeps_kinds_apart() {
    let script: Outcome<()> = Outcome::ScriptError(core_types::ScriptError::new(Status::Runtime, "m"));
    assert!(matches!(script.into_host_result(), Err(HostError::Abort(m)) if m == "m"));

    let host: Outcome<()> = Outcome::HostException(HostException::Interrupted);
    assert!(matches!(
        host.into_host_result(),
        Err(HostError::Exception(HostException::Interrupted))
    ));

    let host: Outcome<()> = Outcome::HostException(HostException::Interrupted);
    assert!(matches!(
        host.into_result(),
        Err(LuaError::Host(HostException::Interrupted))
    ));
}

#[test]
fn test_ensure_stack_refuses_absurd_growth() {
    let bridge = bridge();
    unsafe {
        assert!(gateway::ensure_stack(bridge.as_ptr(), 16).is_ok());
        assert!(matches!(
            gateway::ensure_stack(bridge.as_ptr(), 10_000_000),
            Err(LuaError::StackOverflow)
        ));
    }
}

#[test]
fn test_pcall_with_too_few_values() {
    let mut bridge = bridge();
    assert!(matches!(bridge.pcall(0, 0, 0), Outcome::ScriptError(_)));
}
