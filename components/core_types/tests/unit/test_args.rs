//! Unit tests for ArgCheck rules

use core_types::{ArgCheck, CheckType, LuaError};

#[cfg(test)]
mod arg_check_tests {
    use super::*;

    #[test]
    fn test_check_types() {
        assert_eq!(ArgCheck::Any.check_type(), None);
        assert_eq!(ArgCheck::BooleanVarArgs.check_type(), Some(CheckType::Boolean));
        assert_eq!(ArgCheck::DoubleOrNil.check_type(), Some(CheckType::Number));
        assert_eq!(ArgCheck::String.check_type(), Some(CheckType::String));
    }

    #[test]
    fn test_nullable_flags() {
        assert!(ArgCheck::StringOrNil.is_nullable());
        assert!(!ArgCheck::String.is_nullable());
        assert!(!ArgCheck::Any.is_nullable());
    }

    #[test]
    fn test_validate_rejects_misplaced_var_args() {
        let err = ArgCheck::validate_list(&[ArgCheck::LongVarArgs, ArgCheck::Long]).unwrap_err();
        assert!(matches!(err, LuaError::InvalidArgument(_)));
    }

    #[test]
    fn test_validate_accepts_empty() {
        assert!(ArgCheck::validate_list(&[]).is_ok());
    }
}
