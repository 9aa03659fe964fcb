//! Marshalled Lua value representation.
//!
//! A [`Value`] is what a Lua stack slot looks like once it has crossed into
//! the host. Scalars are copied; tables, functions, userdata and threads only
//! cross as an opaque identity (their address), never as a live reference.

use serde::ser::{Serialize, SerializeSeq, Serializer};
use std::fmt;

/// Type tag of a Lua value, as reported by the interpreter.
///
/// The discriminants match the interpreter's own tag numbering so a raw tag
/// can be converted without a lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LuaType {
    /// No value at the requested stack index
    None = -1,
    /// `nil`
    Nil = 0,
    /// `true` / `false`
    Boolean = 1,
    /// Light userdata (a bare pointer)
    LightUserData = 2,
    /// Integer or float number
    Number = 3,
    /// Byte string
    String = 4,
    /// Table
    Table = 5,
    /// Lua or C function
    Function = 6,
    /// Full userdata
    UserData = 7,
    /// Coroutine
    Thread = 8,
}

impl LuaType {
    /// Converts a raw interpreter type tag.
    ///
    /// Unknown tags map to `None`.
    pub fn from_raw(tag: i32) -> Self {
        match tag {
            0 => LuaType::Nil,
            1 => LuaType::Boolean,
            2 => LuaType::LightUserData,
            3 => LuaType::Number,
            4 => LuaType::String,
            5 => LuaType::Table,
            6 => LuaType::Function,
            7 => LuaType::UserData,
            8 => LuaType::Thread,
            _ => LuaType::None,
        }
    }

    /// The name the interpreter's `type()` function would report.
    pub fn name(self) -> &'static str {
        match self {
            LuaType::None => "no value",
            LuaType::Nil => "nil",
            LuaType::Boolean => "boolean",
            LuaType::LightUserData | LuaType::UserData => "userdata",
            LuaType::Number => "number",
            LuaType::String => "string",
            LuaType::Table => "table",
            LuaType::Function => "function",
            LuaType::Thread => "thread",
        }
    }

    /// Whether values of this type can only cross the boundary as an opaque
    /// identity.
    pub fn is_opaque(self) -> bool {
        matches!(
            self,
            LuaType::LightUserData
                | LuaType::Table
                | LuaType::Function
                | LuaType::UserData
                | LuaType::Thread
        )
    }
}

impl fmt::Display for LuaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value read from, or to be pushed onto, the interpreter stack.
///
/// # Examples
///
/// ```
/// use core_types::{LuaType, Value};
///
/// assert_eq!(Value::from(3.0).to_string(), "3.0");
/// assert_eq!(Value::from(7i64).to_string(), "7");
/// assert!(!Value::Nil.is_truthy());
/// assert!(Value::from(0.0).is_truthy());
///
/// let table = Value::Opaque { kind: LuaType::Table, address: 0x10 };
/// assert_eq!(table.type_name(), "table");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `nil`
    Nil,
    /// Boolean
    Boolean(bool),
    /// Integer; produced by integer argument coercion. Pushed through `f64`
    /// like every other host number
    Integer(i64),
    /// Float; every number read from the stack arrives as this variant
    Number(f64),
    /// Copied byte string, decoded as UTF-8 with invalid sequences replaced
    String(String),
    /// A table, function, userdata or thread, identified by address only
    Opaque {
        /// Interpreter type of the referenced value
        kind: LuaType,
        /// Address of the value inside the interpreter; stable for the
        /// lifetime of the value but meaningless across instances
        address: usize,
    },
    /// Sequence; pushed as a fresh table with keys starting at 1
    Array(Vec<Value>),
}

impl Value {
    /// Interpreter type this value has (or will have once pushed).
    pub fn lua_type(&self) -> LuaType {
        match self {
            Value::Nil => LuaType::Nil,
            Value::Boolean(_) => LuaType::Boolean,
            Value::Integer(_) | Value::Number(_) => LuaType::Number,
            Value::String(_) => LuaType::String,
            Value::Opaque { kind, .. } => *kind,
            Value::Array(_) => LuaType::Table,
        }
    }

    /// Name of the interpreter type, as `type()` would report it.
    pub fn type_name(&self) -> &'static str {
        self.lua_type().name()
    }

    /// Returns whether this is `nil`.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Lua truthiness: only `nil` and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    /// Returns the boolean payload, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the numeric payload as a float, if any.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the numeric payload as an integer if it has an exact integer
    /// representation.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 9.223_372_036_854_775_807e18 => {
                Some(*n as i64)
            }
            _ => None,
        }
    }

    /// Returns the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the elements of an array value, if any.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }
}

/// Formats a float the way the interpreter's `tostring` does (`%.14g`, with
/// a trailing `.0` for integral values).
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        return if n.is_sign_negative() { "-nan" } else { "nan" }.to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let scientific = format!("{:.13e}", n);
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((&scientific, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);

    let text = if !(-4..14).contains(&exponent) {
        format!(
            "{}e{}{:02}",
            trim_fraction(mantissa),
            if exponent < 0 { '-' } else { '+' },
            exponent.abs()
        )
    } else {
        let decimals = (13 - exponent).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, n)).to_string()
    };

    if text.contains(['.', 'e']) {
        text
    } else {
        format!("{}.0", text)
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Renders the value like the interpreter's `tostring`.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(n) => write!(f, "{}", n),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::String(s) => f.write_str(s),
            Value::Opaque { kind, address } => write!(f, "{}: {:#x}", kind, address),
            Value::Array(items) => {
                f.write_str("{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match item {
                        Value::String(s) => write!(f, "{:?}", s)?,
                        other => write!(f, "{}", other)?,
                    }
                }
                f.write_str("}")
            }
        }
    }
}

/// JSON-friendly encoding used by the CLI's `--json` output.
///
/// Opaque values become their `tostring` text since they cannot be
/// reconstructed anyway.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Nil => serializer.serialize_unit(),
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::Integer(n) => serializer.serialize_i64(*n),
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::String(s) => serializer.serialize_str(s),
            Value::Opaque { .. } => serializer.serialize_str(&self.to_string()),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n.into())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Nil, Into::into)
    }
}
