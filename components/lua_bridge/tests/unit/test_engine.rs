//! Tests for the engine facade

use core_types::{ArgCheck, HookEvent, HostError, HostException, LuaError, StdLibSet, Value};
use lua_bridge::{EngineConfig, LibraryFunction, LuaEngine, LuaLibrary};
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

fn engine() -> LuaEngine {
    LuaEngine::new(EngineConfig::default()).unwrap()
}

#[test]
fn test_eval_returns_results() {
    let mut engine = engine();
    let results = engine.eval_string("return 1, 'two', {3}", "=eval").unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0], Value::Number(1.0));
    assert_eq!(results[1], Value::from("two"));
    assert_eq!(results[2].type_name(), "table");
    assert_eq!(engine.bridge().top(), 0);
}

#[test]
fn test_exec_errors_reset_the_stack() {
    let mut engine = engine();
    match engine.exec_string(None, "error('broken')", "=exec") {
        Err(LuaError::Runtime(message)) => assert_eq!(message, "exec:1: broken"),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(engine.bridge().top(), 0);

    assert!(matches!(
        engine.exec_string(None, "x = ", "=exec"),
        Err(LuaError::Syntax(_))
    ));
    assert_eq!(engine.bridge().top(), 0);
}

#[test]
fn test_call_global_function() {
    let mut engine = engine();
    engine
        .exec_string(None, "function add(a, b) return a + b, 'done' end", "=def")
        .unwrap();
    let results = engine
        .call_global_function(None, "add", &[Value::from(1), Value::from(2.5)])
        .unwrap();
    assert_eq!(results, vec![Value::Number(3.5), Value::from("done")]);

    assert!(matches!(
        engine.call_global_function(None, "missing", &[]),
        Err(LuaError::Runtime(_))
    ));
    assert_eq!(engine.bridge().top(), 0);
}

#[test]
fn test_call_requires_an_empty_stack() {
    let mut engine = engine();
    engine.exec_string(None, "function f() end", "=def").unwrap();
    engine.bridge_mut().push_value(&Value::from(1)).unwrap();
    assert!(matches!(
        engine.call_global_function(None, "f", &[]),
        Err(LuaError::InvalidState(_))
    ));
}

#[test]
fn test_global_variables() {
    let mut engine = engine();
    engine
        .add_global_variable("greeting", &Value::from("hi"))
        .unwrap();
    engine
        .add_global_variable("list", &Value::Array(vec![Value::from(1), Value::from("x")]))
        .unwrap();
    assert_eq!(engine.get_global_variable("greeting").unwrap(), Value::from("hi"));
    let results = engine.eval_string("return #list, list[2]", "=vars").unwrap();
    assert_eq!(results, vec![Value::Number(2.0), Value::from("x")]);
}

#[test]
fn test_integer_variables_are_floats_to_scripts() {
    let mut engine = engine();
    engine.add_global_variable("x", &Value::Integer(7)).unwrap();
    let results = engine.eval_string("return math.type(x), x // 2", "=ints").unwrap();
    assert_eq!(results, vec![Value::from("float"), Value::Number(3.0)]);
}

#[test]
fn test_global_function_with_checks() {
    let mut engine = engine();
    engine
        .add_global_function(
            "repeat_str",
            |args: Vec<Value>| {
                let text = args[0].as_str().unwrap_or_default().to_string();
                let times = args[1].as_integer().unwrap_or(1) as usize;
                Ok(vec![Value::from(text.repeat(times))])
            },
            &[ArgCheck::String, ArgCheck::LongOrNil],
        )
        .unwrap();
    let results = engine
        .eval_string("return repeat_str('ab', 3), repeat_str(7)", "=fn")
        .unwrap();
    assert_eq!(results, vec![Value::from("ababab"), Value::from("7")]);

    match engine.eval_string("return repeat_str({})", "=fn") {
        Err(LuaError::Runtime(message)) => assert_eq!(message, "bad argument #1"),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_invalid_rule_lists_are_rejected() {
    let mut engine = engine();
    let result = engine.add_global_function(
        "f",
        |_: Vec<Value>| Ok(Vec::new()),
        &[ArgCheck::Long, ArgCheck::Any],
    );
    assert!(matches!(result, Err(LuaError::InvalidArgument(_))));
    assert_eq!(engine.function_count(), 0);
}

#[test]
fn test_lib_functions_and_tables() {
    let mut engine = engine();
    engine.add_lib_table("util").unwrap();
    engine
        .add_lib_function(
            "util",
            "count",
            |args: Vec<Value>| Ok(vec![Value::from(args.len() as i64)]),
            &[ArgCheck::Any],
        )
        .unwrap();
    let results = engine.eval_string("return util.count(1, nil, 3)", "=lib").unwrap();
    assert_eq!(results, vec![Value::Number(3.0)]);

    assert!(engine
        .add_lib_function("nope", "f", |_: Vec<Value>| Ok(Vec::new()), &[])
        .is_err());
    assert_eq!(engine.function_count(), 1);
}

struct Recording {
    name: &'static str,
    closed: Rc<RefCell<Vec<&'static str>>>,
}

impl LuaLibrary for Recording {
    fn name(&self) -> &str {
        self.name
    }

    fn functions(&self) -> Vec<LibraryFunction> {
        let name = self.name;
        vec![LibraryFunction::new("whoami", &[], move |_: Vec<Value>| {
            Ok(vec![Value::from(name)])
        })]
    }

    fn variables(&self) -> Vec<(String, Value)> {
        vec![("version".to_string(), Value::from(2))]
    }

    fn close(&mut self) {
        self.closed.borrow_mut().push(self.name);
    }
}

#[test]
fn test_libraries_register_and_close_in_reverse_order() {
    let closed = Rc::new(RefCell::new(Vec::new()));
    {
        let mut engine = engine();
        for name in ["first", "second"] {
            engine
                .add_library(Box::new(Recording {
                    name,
                    closed: Rc::clone(&closed),
                }))
                .unwrap();
        }
        let results = engine
            .eval_string("return first.whoami(), second.whoami(), second.version", "=libs")
            .unwrap();
        assert_eq!(
            results,
            vec![Value::from("first"), Value::from("second"), Value::Number(2.0)]
        );
        assert!(closed.borrow().is_empty());
    }
    assert_eq!(*closed.borrow(), vec!["second", "first"]);
}

#[test]
fn test_interrupt_from_another_thread() {
    let mut engine =
        LuaEngine::new(EngineConfig::default().with_hook_instruction_count(100)).unwrap();
    let handle = engine.interrupt_handle();
    let interrupter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        handle.interrupt();
    });
    let result = engine.exec_string(None, "while true do end", "=spin");
    interrupter.join().unwrap();
    assert!(matches!(result, Err(LuaError::Host(HostException::Interrupted))));
    assert_eq!(engine.bridge().top(), 0);

    // The request was consumed.
    assert!(engine.exec_string(None, "for i = 1, 1000 do end", "=after").is_ok());
}

#[test]
fn test_per_call_hook_is_scoped_to_the_call() {
    let mut engine = engine();
    let events = Rc::new(Cell::new(0u32));
    let counter = Rc::clone(&events);
    let hook = move |_: HookEvent, _: i32| -> Result<(), HostError> {
        counter.set(counter.get() + 1);
        Ok(())
    };
    engine
        .exec_string(Some(Box::new(hook)), "for i = 1, 10000 do end", "=hooked")
        .unwrap();
    let seen = events.get();
    assert!(seen > 0);

    engine
        .exec_string(None, "for i = 1, 10000 do end", "=plain")
        .unwrap();
    assert_eq!(events.get(), seen);
}

#[test]
fn test_per_call_hook_abort() {
    let mut engine = engine();
    let hook = |_: HookEvent, _: i32| -> Result<(), HostError> { Err(HostError::abort("stop")) };
    match engine.exec_string(Some(Box::new(hook)), "while true do end", "=loop") {
        Err(LuaError::Runtime(message)) => assert_eq!(message, "stop"),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_memory_limit_is_enforced() {
    let mut engine = LuaEngine::new(
        EngineConfig::default()
            .with_memory_limit(256 * 1024)
            .with_std_libs(StdLibSet::default_set()),
    )
    .unwrap();
    let result = engine.exec_string(None, "local t = {} for i = 1, 1e7 do t[i] = i end", "=hog");
    assert!(matches!(result, Err(LuaError::Memory)));
    assert!(engine.memory_in_use() <= 256 * 1024);
    assert_eq!(engine.memory_stats().limit, 256 * 1024);

    // Still usable once the garbage is collected.
    assert!(engine.eval_string("collectgarbage() return 1", "=after").is_ok());
}

#[test]
fn test_panicking_function_resumes_on_the_host() {
    let mut engine = engine();
    engine
        .add_global_function("boom", |_: Vec<Value>| panic!("host bug"), &[])
        .unwrap();
    let result = panic::catch_unwind(AssertUnwindSafe(|| engine.eval_string("boom()", "=p")));
    assert!(result.is_err());
    assert_eq!(engine.bridge().top(), 0);
    assert_eq!(engine.eval_string("return 1", "=ok").unwrap(), vec![Value::Number(1.0)]);
}

#[test]
fn test_dump_stack() {
    let mut engine = engine();
    engine.bridge_mut().push_value(&Value::from(1.5)).unwrap();
    assert_eq!(engine.dump_stack(), "Stack: 1\n1: type=number, 1.5\n");
}
