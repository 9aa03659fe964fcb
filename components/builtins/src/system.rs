//! The `sys` library: time and sleep

use chrono::Utc;
use core_types::{ArgCheck, HostError, HostException, Value};
use lua_bridge::{InterruptHandle, LibraryFunction, LuaLibrary};
use std::thread;
use std::time::{Duration, Instant};

/// Longest single wait between two interrupt checks.
const SLEEP_SLICE: Duration = Duration::from_millis(5);

/// `sys.time()` and `sys.sleep(ms)`.
///
/// `sys.time()` returns the milliseconds since the Unix epoch as an integer.
/// `sys.sleep(ms)` blocks the calling script; when built with an
/// [`InterruptHandle`], an interrupt request ends the sleep early and stops
/// the script with [`HostException::Interrupted`].
#[derive(Debug, Clone, Default)]
pub struct SystemFunctions {
    interrupt: Option<InterruptHandle>,
}

impl SystemFunctions {
    /// Creates the library with an uninterruptible sleep.
    pub fn new() -> Self {
        SystemFunctions::default()
    }

    /// Creates the library whose sleep observes `interrupt`.
    pub fn with_interrupt(interrupt: InterruptHandle) -> Self {
        SystemFunctions {
            interrupt: Some(interrupt),
        }
    }
}

impl LuaLibrary for SystemFunctions {
    fn name(&self) -> &str {
        "sys"
    }

    fn functions(&self) -> Vec<LibraryFunction> {
        let interrupt = self.interrupt.clone();
        vec![
            LibraryFunction::new("time", &[], |_| Ok(vec![Value::Integer(now_millis())])),
            LibraryFunction::new("sleep", &[ArgCheck::Long], move |args| {
                let millis = args.first().and_then(Value::as_integer).unwrap_or(0);
                let millis = u64::try_from(millis)
                    .map_err(|_| HostError::abort(format!("Invalid sleep time: {}", millis)))?;
                sleep(Duration::from_millis(millis), interrupt.as_ref())?;
                Ok(Vec::new())
            }),
        ]
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Sleeps for `duration`, waking every [`SLEEP_SLICE`] to look for an
/// interrupt request.
pub fn sleep(duration: Duration, interrupt: Option<&InterruptHandle>) -> Result<(), HostException> {
    let Some(interrupt) = interrupt else {
        thread::sleep(duration);
        return Ok(());
    };
    let deadline = Instant::now() + duration;
    loop {
        interrupt.check()?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}
