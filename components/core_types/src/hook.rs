//! Execution hook events and granularity.

/// Interpreter event delivered to an execution hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    /// A function is about to be called
    Call,
    /// A function is about to return
    Return,
    /// The interpreter is about to start a new line
    Line,
    /// The instruction counter fired
    Count,
    /// A tail call replaced the current frame
    TailCall,
}

impl HookEvent {
    /// Converts the interpreter's raw event code.
    pub fn from_raw(code: i32) -> Option<Self> {
        match code {
            0 => Some(HookEvent::Call),
            1 => Some(HookEvent::Return),
            2 => Some(HookEvent::Line),
            3 => Some(HookEvent::Count),
            4 => Some(HookEvent::TailCall),
            _ => None,
        }
    }
}

/// Which events a hook receives.
///
/// `count == 0` disables the instruction counter.
///
/// # Examples
///
/// ```
/// use core_types::HookMask;
///
/// assert_eq!(HookMask::none().to_raw(), (0, 0));
/// assert_eq!(HookMask::every(1000).to_raw(), (8, 1000));
/// assert_eq!(HookMask::none().with_call().with_line().to_raw(), (1 | 4, 0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HookMask {
    /// Deliver [`HookEvent::Call`] and [`HookEvent::TailCall`]
    pub call: bool,
    /// Deliver [`HookEvent::Return`]
    pub ret: bool,
    /// Deliver [`HookEvent::Line`]
    pub line: bool,
    /// Deliver [`HookEvent::Count`] every `count` instructions
    pub count: u32,
}

const MASK_CALL: i32 = 1;
const MASK_RET: i32 = 1 << 1;
const MASK_LINE: i32 = 1 << 2;
const MASK_COUNT: i32 = 1 << 3;

impl HookMask {
    /// No events.
    pub fn none() -> Self {
        HookMask::default()
    }

    /// Only the instruction counter, every `count` instructions.
    pub fn every(count: u32) -> Self {
        HookMask {
            count,
            ..HookMask::default()
        }
    }

    /// Adds call events.
    pub fn with_call(mut self) -> Self {
        self.call = true;
        self
    }

    /// Adds return events.
    pub fn with_return(mut self) -> Self {
        self.ret = true;
        self
    }

    /// Adds line events.
    pub fn with_line(mut self) -> Self {
        self.line = true;
        self
    }

    /// Sets the instruction counter.
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    /// Raw `(mask, count)` pair for the interpreter's `sethook`.
    pub fn to_raw(self) -> (i32, i32) {
        let mut mask = 0;
        if self.call {
            mask |= MASK_CALL;
        }
        if self.ret {
            mask |= MASK_RET;
        }
        if self.line {
            mask |= MASK_LINE;
        }
        if self.count > 0 {
            mask |= MASK_COUNT;
        }
        let count = i32::try_from(self.count).unwrap_or(i32::MAX);
        (mask, count)
    }

    /// Returns whether no event is selected.
    pub fn is_empty(self) -> bool {
        self.to_raw().0 == 0
    }
}
