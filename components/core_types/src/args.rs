//! Type-check and coercion rules for callback arguments.

use crate::error::LuaError;

/// Target type of an argument coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckType {
    /// Lua truthiness; accepts any value
    Boolean,
    /// Integer, accepting numbers and numeric strings with an exact
    /// integer representation
    Integer,
    /// Float, accepting numbers and numeric strings
    Number,
    /// String, accepting strings and numbers
    String,
}

/// How one callback argument is checked and converted before the host
/// function sees it.
///
/// The `*OrNil` variants also accept `nil` or a missing argument. The
/// `*VarArgs` variants are only valid last and match zero or more trailing
/// arguments of that type.
///
/// # Examples
///
/// ```
/// use core_types::{ArgCheck, CheckType};
///
/// assert_eq!(ArgCheck::LongOrNil.check_type(), Some(CheckType::Integer));
/// assert!(ArgCheck::LongOrNil.is_nullable());
/// assert!(ArgCheck::validate_list(&[ArgCheck::Long, ArgCheck::StringVarArgs]).is_ok());
/// assert!(ArgCheck::validate_list(&[ArgCheck::StringVarArgs, ArgCheck::Long]).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgCheck {
    /// No check; the function receives every argument as read
    Any,
    /// Boolean
    Boolean,
    /// Boolean or nil
    BooleanOrNil,
    /// Zero or more booleans
    BooleanVarArgs,
    /// Integer
    Long,
    /// Integer or nil
    LongOrNil,
    /// Zero or more integers
    LongVarArgs,
    /// Float
    Double,
    /// Float or nil
    DoubleOrNil,
    /// Zero or more floats
    DoubleVarArgs,
    /// String
    String,
    /// String or nil
    StringOrNil,
    /// Zero or more strings
    StringVarArgs,
}

impl ArgCheck {
    /// The coercion target, or `None` for [`ArgCheck::Any`].
    pub fn check_type(self) -> Option<CheckType> {
        use ArgCheck::*;
        match self {
            Any => None,
            Boolean | BooleanOrNil | BooleanVarArgs => Some(CheckType::Boolean),
            Long | LongOrNil | LongVarArgs => Some(CheckType::Integer),
            Double | DoubleOrNil | DoubleVarArgs => Some(CheckType::Number),
            String | StringOrNil | StringVarArgs => Some(CheckType::String),
        }
    }

    /// Whether `nil` (or a missing argument) is accepted.
    pub fn is_nullable(self) -> bool {
        matches!(
            self,
            ArgCheck::BooleanOrNil | ArgCheck::LongOrNil | ArgCheck::DoubleOrNil | ArgCheck::StringOrNil
        )
    }

    /// Whether this is the pass-through rule.
    pub fn is_any(self) -> bool {
        self == ArgCheck::Any
    }

    /// Whether this rule matches a variable number of trailing arguments.
    pub fn is_var_args(self) -> bool {
        matches!(
            self,
            ArgCheck::BooleanVarArgs
                | ArgCheck::LongVarArgs
                | ArgCheck::DoubleVarArgs
                | ArgCheck::StringVarArgs
        )
    }

    /// Validates a rule list for a host function.
    ///
    /// `Any` may only appear first and var-args rules may only appear last.
    pub fn validate_list(checks: &[ArgCheck]) -> Result<(), LuaError> {
        for (i, check) in checks.iter().enumerate() {
            if check.is_any() && i != 0 {
                return Err(LuaError::InvalidArgument(format!(
                    "ArgCheck::Any is only allowed as the first rule (found at {})",
                    i
                )));
            }
            if check.is_var_args() && i + 1 != checks.len() {
                return Err(LuaError::InvalidArgument(format!(
                    "{:?} is only allowed as the last rule (found at {})",
                    check, i
                )));
            }
        }
        Ok(())
    }

    /// Returns whether the list passes every argument through unchecked.
    pub fn is_pass_through(checks: &[ArgCheck]) -> bool {
        checks.first().is_some_and(|c| c.is_any())
    }
}
