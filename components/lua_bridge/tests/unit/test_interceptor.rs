//! Tests for the execution hook and the print replacement

use core_types::{HookEvent, HookMask, HostError, StdLibSet};
use lua_bridge::interceptor::HOOK_ABORT_MESSAGE;
use lua_bridge::{continue_while, ffi, shared_hook, Bridge, Outcome, PrintSink};
use std::cell::{Cell, RefCell};
use std::io;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Text(String),
    Line,
}

#[derive(Default)]
struct Recorder {
    events: RefCell<Vec<Event>>,
    fail_after: Option<usize>,
    abort: bool,
}

impl PrintSink for Recorder {
    fn write_string(&self, text: &str) -> Result<(), HostError> {
        let mut events = self.events.borrow_mut();
        if self.fail_after == Some(events.len()) {
            return Err(if self.abort {
                HostError::abort("sink closed")
            } else {
                HostError::exception(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"))
            });
        }
        events.push(Event::Text(text.to_string()));
        Ok(())
    }

    fn write_line(&self) -> Result<(), HostError> {
        self.events.borrow_mut().push(Event::Line);
        Ok(())
    }
}

fn bridge() -> Bridge {
    let mut bridge = Bridge::new(1 << 20).unwrap();
    bridge.open_libs(StdLibSet::default_set()).unwrap();
    bridge
}

fn printing_bridge(recorder: &Rc<Recorder>) -> Bridge {
    let mut bridge = bridge();
    bridge.replace_print().unwrap();
    bridge.set_print_sink(Some(Rc::clone(recorder) as Rc<dyn PrintSink>));
    bridge
}

fn run(bridge: &mut Bridge, source: &str) -> Outcome<()> {
    bridge.load_string(source, "=test").unwrap();
    bridge.pcall(0, 0, 0)
}

fn text(s: &str) -> Event {
    Event::Text(s.to_string())
}

#[test]
fn test_print_forwards_pieces_and_tab_separately() {
    let recorder = Rc::new(Recorder::default());
    let mut bridge = printing_bridge(&recorder);
    assert!(run(&mut bridge, "print('hello', 'world')").is_ok());
    assert_eq!(
        *recorder.events.borrow(),
        vec![text("hello"), text("\t"), text("world"), Event::Line]
    );
}

#[test]
fn test_print_uses_interpreter_tostring() {
    let recorder = Rc::new(Recorder::default());
    let mut bridge = printing_bridge(&recorder);
    let source = "print(1, 1.5, nil, true, setmetatable({}, {__tostring = function() return 'obj' end}))";
    assert!(run(&mut bridge, source).is_ok());
    let events = recorder.events.borrow();
    let pieces: Vec<&Event> = events.iter().filter(|e| **e != text("\t")).collect();
    assert_eq!(
        pieces,
        vec![&text("1"), &text("1.5"), &text("nil"), &text("true"), &text("obj"), &Event::Line]
    );
}

#[test]
fn test_print_without_arguments_ends_the_line() {
    let recorder = Rc::new(Recorder::default());
    let mut bridge = printing_bridge(&recorder);
    assert!(run(&mut bridge, "print()").is_ok());
    assert_eq!(*recorder.events.borrow(), vec![Event::Line]);
}

#[test]
fn test_faulting_tostring_is_a_script_error() {
    let recorder = Rc::new(Recorder::default());
    let mut bridge = printing_bridge(&recorder);
    let source = "print(setmetatable({}, {__tostring = function() return {} end}))";
    match run(&mut bridge, source) {
        Outcome::ScriptError(error) => assert!(error.message.contains("__tostring")),
        other => panic!("unexpected {:?}", other),
    }
    assert!(recorder.events.borrow().is_empty());
}

#[test]
fn test_sink_abort_stops_output() {
    let recorder = Rc::new(Recorder {
        fail_after: Some(1),
        abort: true,
        ..Recorder::default()
    });
    let mut bridge = printing_bridge(&recorder);
    match run(&mut bridge, "print('a', 'b')") {
        Outcome::ScriptError(error) => assert_eq!(error.message, "sink closed"),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(*recorder.events.borrow(), vec![text("a")]);
}

#[test]
fn test_sink_exception_stays_pending() {
    let recorder = Rc::new(Recorder {
        fail_after: Some(0),
        ..Recorder::default()
    });
    let mut bridge = printing_bridge(&recorder);
    match run(&mut bridge, "pcall(print, 'a') return 1") {
        Outcome::HostException(exception) => {
            let error = exception.downcast_ref::<io::Error>().unwrap();
            assert_eq!(error.kind(), io::ErrorKind::BrokenPipe);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_hook_abort_on_third_invocation() {
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let mut bridge = bridge();
    bridge.set_hook(Some(shared_hook(continue_while(move |_, _| {
        counter.set(counter.get() + 1);
        counter.get() < 3
    }))));
    bridge.set_hook_mask(HookMask::every(1));

    match run(&mut bridge, "local x = 0 for i = 1, 100 do x = x + i end") {
        Outcome::ScriptError(error) => assert_eq!(error.message, HOOK_ABORT_MESSAGE),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(calls.get(), 3);
}

#[test]
fn test_line_and_call_events() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let mut bridge = bridge();
    bridge.set_hook(Some(shared_hook(move |event: HookEvent, line: i32| -> Result<(), HostError> {
        sink.borrow_mut().push((event, line));
        Ok(())
    })));
    bridge.set_hook_mask(HookMask::none().with_line().with_call());

    assert!(run(&mut bridge, "local function f() end\nf()\nlocal y = 2").is_ok());
    let seen = seen.borrow();
    let lines: Vec<i32> = seen
        .iter()
        .filter(|(event, _)| *event == HookEvent::Line)
        .map(|(_, line)| *line)
        .collect();
    assert!(lines.contains(&1));
    assert!(lines.contains(&2));
    assert!(lines.contains(&3));
    assert!(seen.iter().any(|(event, _)| *event == HookEvent::Call));
}

#[test]
fn test_hook_exception_stays_pending() {
    let mut bridge = bridge();
    bridge.set_hook(Some(shared_hook(|_: HookEvent, _: i32| -> Result<(), HostError> {
        Err(HostError::exception(io::Error::new(io::ErrorKind::Other, "hook failed")))
    })));
    bridge.set_hook_mask(HookMask::every(1));
    match run(&mut bridge, "local x = 1") {
        Outcome::HostException(exception) => assert_eq!(exception.to_string(), "hook failed"),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_empty_mask_disables_hook() {
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let mut bridge = bridge();
    bridge.set_hook(Some(shared_hook(move |_: HookEvent, _: i32| -> Result<(), HostError> {
        counter.set(counter.get() + 1);
        Ok(())
    })));
    bridge.set_hook_mask(HookMask::every(1));
    bridge.set_hook_mask(HookMask::none());
    assert!(run(&mut bridge, "for i = 1, 10 do end").is_ok());
    assert_eq!(calls.get(), 0);
}

#[test]
fn test_default_print_goes_to_stdout() {
    let mut bridge = bridge();
    bridge.replace_print().unwrap();
    assert!(run(&mut bridge, "print('to stdout')").is_ok());
    assert_eq!(unsafe { ffi::lua_gettop(bridge.as_ptr()) }, 0);
}
