//! Contract tests for SystemFunctions

use builtins::SystemFunctions;
use core_types::{HostException, LuaError, Value};
use lua_bridge::{EngineConfig, LuaEngine};
use std::thread;
use std::time::{Duration, Instant};

fn engine() -> LuaEngine {
    let mut engine = LuaEngine::new(EngineConfig::default()).unwrap();
    let interrupt = engine.interrupt_handle();
    engine
        .add_library(Box::new(SystemFunctions::with_interrupt(interrupt)))
        .unwrap();
    engine
}

#[test]
fn test_time_is_epoch_millis() {
    let mut engine = engine();
    let before = chrono::Utc::now().timestamp_millis();
    engine.exec_string(None, "t = sys.time()", "=time").unwrap();
    let after = chrono::Utc::now().timestamp_millis();

    let t = engine.get_global_variable("t").unwrap().as_integer().unwrap();
    assert!(before <= t && t <= after);
}

#[test]
fn test_sleep_blocks_for_the_duration() {
    let mut engine = engine();
    let start = Instant::now();
    engine.exec_string(None, "sys.sleep(50)", "=sleep").unwrap();
    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[test]
fn test_sleep_rejects_negative_and_non_integer_times() {
    let mut engine = engine();
    match engine.exec_string(None, "sys.sleep(-1)", "=sleep") {
        Err(LuaError::Runtime(message)) => assert_eq!(message, "Invalid sleep time: -1"),
        other => panic!("unexpected {:?}", other),
    }
    match engine.exec_string(None, "sys.sleep('soon')", "=sleep") {
        Err(LuaError::Runtime(message)) => assert!(message.contains("bad argument #1")),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_sleep_is_interruptible() {
    let mut engine = engine();
    let interrupt = engine.interrupt_handle();
    let waker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        interrupt.interrupt();
    });

    let start = Instant::now();
    let result = engine.exec_string(None, "sys.sleep(10000)", "=sleep");
    waker.join().unwrap();

    assert!(matches!(result, Err(LuaError::Host(HostException::Interrupted))));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(
        engine.eval_string("return 1", "=after").unwrap(),
        vec![Value::Number(1.0)]
    );
}
