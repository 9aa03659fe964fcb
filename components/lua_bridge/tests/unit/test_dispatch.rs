//! Tests for proxy functions and the callback dispatcher

use core_types::{ArgCheck, HostError, StdLib, StdLibSet, Value};
use lua_bridge::{ffi, Bridge, CallFrame, FunctionDispatcher, Outcome};
use std::cell::Cell;
use std::ffi::c_int;
use std::io;
use std::rc::Rc;

fn dispatcher<F>(f: F) -> Rc<dyn FunctionDispatcher>
where
    F: Fn(i32, &mut CallFrame<'_>) -> Result<c_int, HostError> + 'static,
{
    struct Dispatch<F>(F);

    impl<F> FunctionDispatcher for Dispatch<F>
    where
        F: Fn(i32, &mut CallFrame<'_>) -> Result<c_int, HostError>,
    {
        fn call(&self, id: i32, frame: &mut CallFrame<'_>) -> Result<c_int, HostError> {
            (self.0)(id, frame)
        }
    }

    Rc::new(Dispatch(f))
}

fn bridge_with(dispatch: Option<Rc<dyn FunctionDispatcher>>, functions: &[(i32, &str)]) -> Bridge {
    let mut bridge = Bridge::new(1 << 20).unwrap();
    bridge.open_libs(StdLibSet::default_set()).unwrap();
    bridge.set_dispatcher(dispatch);
    for (id, name) in functions {
        bridge.push_proxy_function(*id).unwrap();
        bridge.set_global(name).unwrap();
    }
    bridge
}

fn run(bridge: &mut Bridge, source: &str) -> Outcome<()> {
    bridge.load_string(source, "=test").unwrap();
    bridge.pcall(0, ffi::LUA_MULTRET, 0)
}

#[test]
fn test_results_are_returned() {
    let d = dispatcher(|id, frame| {
        let count = frame.arg_count() as i64;
        frame.push(&[Value::Integer(i64::from(id)), Value::Integer(count)])
    });
    let mut bridge = bridge_with(Some(d), &[(3, "f")]);
    assert!(run(&mut bridge, "return f(1, 2, 3)").is_ok());
    assert_eq!(bridge.values(), vec![Value::Number(3.0), Value::Number(3.0)]);
}

#[test]
fn test_each_proxy_carries_its_own_id() {
    let d = dispatcher(|id, frame| frame.push(&[Value::Integer(i64::from(id))]));
    let mut bridge = bridge_with(Some(d), &[(1, "one"), (2, "two")]);
    assert!(run(&mut bridge, "return one(), two()").is_ok());
    assert_eq!(bridge.values(), vec![Value::Number(1.0), Value::Number(2.0)]);
}

#[test]
fn test_abort_message_is_exact() {
    let d = dispatcher(|_, _| Err(HostError::abort("exact message")));
    let mut bridge = bridge_with(Some(d), &[(1, "f")]);

    assert!(run(&mut bridge, "local ok, err = pcall(f) return ok, err").is_ok());
    assert_eq!(
        bridge.values(),
        vec![Value::Boolean(false), Value::from("exact message")]
    );

    bridge.set_top(0).unwrap();
    match run(&mut bridge, "f()") {
        Outcome::ScriptError(error) => assert_eq!(error.message, "exact message"),
        other => panic!("expected a script error, got {:?}", other),
    }
}

#[test]
fn test_host_exception_stays_pending_and_intact() {
    let d = dispatcher(|_, _| {
        Err(HostError::exception(io::Error::new(io::ErrorKind::Other, "disk on fire")))
    });
    let mut bridge = bridge_with(Some(d), &[(7, "f")]);
    match run(&mut bridge, "f()") {
        Outcome::HostException(exception) => {
            let original = exception.downcast_ref::<io::Error>().unwrap();
            assert_eq!(original.kind(), io::ErrorKind::Other);
            assert_eq!(original.to_string(), "disk on fire");
        }
        other => panic!("expected a host exception, got {:?}", other),
    }
    assert!(!bridge.context().has_pending());
    assert_eq!(bridge.top(), 0);
}

#[test]
fn test_script_pcall_cannot_swallow_host_exception() {
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let d = dispatcher(move |_, _| {
        counter.set(counter.get() + 1);
        Err(HostError::exception(io::Error::new(io::ErrorKind::Other, "first")))
    });
    let mut bridge = bridge_with(Some(d), &[(1, "f")]);
    let outcome = run(&mut bridge, "pcall(f) pcall(f) return 1");
    match outcome {
        Outcome::HostException(exception) => assert_eq!(exception.to_string(), "first"),
        other => panic!("expected a host exception, got {:?}", other),
    }
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_panic_in_dispatcher_surfaces_as_panic() {
    let d = dispatcher(|_, _| panic!("dispatcher panicked"));
    let mut bridge = bridge_with(Some(d), &[(1, "f")]);
    match run(&mut bridge, "f()") {
        Outcome::HostException(exception) => assert!(exception.is_panic()),
        other => panic!("expected a panic, got {:?}", other),
    }
    assert!(run(&mut bridge, "return 1").is_ok());
}

#[test]
fn test_invalid_result_count_is_a_script_error() {
    let d = dispatcher(|_, _| Ok(5));
    let mut bridge = bridge_with(Some(d), &[(1, "f")]);
    match run(&mut bridge, "f()") {
        Outcome::ScriptError(error) => assert_eq!(error.message, "invalid result count 5"),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_checked_arguments_inside_callback() {
    let d = dispatcher(|_, frame| {
        let args = frame.checked_values(&[ArgCheck::Long, ArgCheck::StringOrNil])?;
        frame.clear();
        frame.push(&args)
    });
    let mut bridge = bridge_with(Some(d), &[(1, "f")]);
    assert!(run(&mut bridge, "return f('12')").is_ok());
    assert_eq!(bridge.values(), vec![Value::Number(12.0), Value::Nil]);

    bridge.set_top(0).unwrap();
    assert!(run(&mut bridge, "return pcall(f, 'abc')").is_ok());
    assert_eq!(
        bridge.values(),
        vec![Value::Boolean(false), Value::from("bad argument #1")]
    );
}

#[test]
fn test_proxy_runs_inside_coroutines() {
    let d = dispatcher(|_, frame| frame.push(&[Value::Integer(42)]));
    let mut bridge = bridge_with(Some(d), &[(1, "f")]);
    assert!(run(&mut bridge, "return coroutine.wrap(function() return f() end)()").is_ok());
    assert_eq!(bridge.values(), vec![Value::Number(42.0)]);
}

#[test]
fn test_missing_dispatcher_is_a_script_error() {
    let mut bridge = bridge_with(None, &[(1, "f")]);
    match run(&mut bridge, "f()") {
        Outcome::ScriptError(error) => {
            assert_eq!(error.message, "no function dispatcher registered")
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_unsupported_host_result_aborts() {
    struct Opaque;
    let d = dispatcher(|_, frame| frame.push_host(&[&1i64, &Opaque]));
    let mut bridge = bridge_with(Some(d), &[(1, "f")]);
    match run(&mut bridge, "f()") {
        Outcome::ScriptError(error) => assert!(error.message.contains("unsupported")),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_replacing_dispatcher_releases_the_old_one() {
    let first = dispatcher(|_, _| Ok(0));
    let weak = Rc::downgrade(&first);
    let mut bridge = bridge_with(Some(first), &[]);
    assert!(weak.upgrade().is_some());
    bridge.set_dispatcher(Some(dispatcher(|_, _| Ok(0))));
    assert!(weak.upgrade().is_none());
}

#[test]
fn test_interpreter_closes_before_handles_are_released() {
    struct Recorder {
        finalized: Rc<Cell<bool>>,
        finalized_at_drop: Rc<Cell<Option<bool>>>,
    }

    impl FunctionDispatcher for Recorder {
        fn call(&self, _id: i32, _frame: &mut CallFrame<'_>) -> Result<c_int, HostError> {
            self.finalized.set(true);
            Ok(0)
        }
    }

    impl Drop for Recorder {
        fn drop(&mut self) {
            self.finalized_at_drop.set(Some(self.finalized.get()));
        }
    }

    let finalized = Rc::new(Cell::new(false));
    let finalized_at_drop = Rc::new(Cell::new(None));
    let recorder: Rc<dyn FunctionDispatcher> = Rc::new(Recorder {
        finalized: Rc::clone(&finalized),
        finalized_at_drop: Rc::clone(&finalized_at_drop),
    });

    let mut bridge = bridge_with(Some(recorder), &[(1, "on_close")]);
    assert!(run(
        &mut bridge,
        "keep = setmetatable({}, {__gc = function() on_close() end})"
    )
    .is_ok());
    assert!(!finalized.get());

    drop(bridge);
    // The finalizer ran during lua_close and could still reach the
    // dispatcher, which was released only afterwards.
    assert!(finalized.get());
    assert_eq!(finalized_at_drop.get(), Some(true));
}

#[test]
fn test_corrupted_callback_id_never_reaches_the_dispatcher() {
    let calls = Rc::new(Cell::new(0));
    let seen = Rc::clone(&calls);
    let d = dispatcher(move |_, _| {
        seen.set(seen.get() + 1);
        Ok(0)
    });
    let held = Rc::clone(&d);
    let mut bridge = bridge_with(Some(d), &[(1, "f")]);
    bridge
        .open_libs([StdLib::Debug].into_iter().collect::<StdLibSet>())
        .unwrap();

    assert!(run(
        &mut bridge,
        "debug.setupvalue(f, 1, 2^40) local ok, err = pcall(f) return ok, err"
    )
    .is_ok());
    assert_eq!(
        bridge.values(),
        vec![Value::Boolean(false), Value::from("invalid callback id")]
    );
    assert_eq!(calls.get(), 0);
    // Held here and by the bridge, nothing else.
    assert_eq!(Rc::strong_count(&held), 2);
}
