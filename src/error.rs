//! Error taxonomy for guest execution.
//!
//! `SandboxError` is what the interpreter and the guard hooks produce.
//! Only `Raised` errors behave like guest exceptions (catchable by
//! `try/except`); guard denials and resource exhaustion always unwind to
//! the driver.

use std::fmt;

use thiserror::Error;

/// The dynamic operation a guard hook was asked to authorize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOp {
    AttributeRead,
    ItemRead,
    ItemWrite,
    Iterate,
    InplaceOp,
    Import,
}

impl fmt::Display for GuardOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GuardOp::AttributeRead => "attribute read",
            GuardOp::ItemRead => "item read",
            GuardOp::ItemWrite => "item write",
            GuardOp::Iterate => "iteration",
            GuardOp::InplaceOp => "in-place operator",
            GuardOp::Import => "import",
        };
        f.write_str(name)
    }
}

/// A security decision: the guard refused an operation.
///
/// Always names the operation, the kind of value involved and the
/// key, attribute or module name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("GuardDenied: {operation} of '{key}' denied on {kind}")]
pub struct GuardDenied {
    pub operation: GuardOp,
    pub kind: String,
    pub key: String,
}

impl GuardDenied {
    pub fn new(operation: GuardOp, kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            operation,
            kind: kind.into(),
            key: key.into(),
        }
    }
}

/// Guest-visible exception classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Exception,
    ValueError,
    TypeError,
    KeyError,
    IndexError,
    LookupError,
    AttributeError,
    NameError,
    ZeroDivisionError,
    ImportError,
    RuntimeError,
    AssertionError,
    OverflowError,
}

impl ErrorClass {
    pub const ALL: [ErrorClass; 13] = [
        ErrorClass::Exception,
        ErrorClass::ValueError,
        ErrorClass::TypeError,
        ErrorClass::KeyError,
        ErrorClass::IndexError,
        ErrorClass::LookupError,
        ErrorClass::AttributeError,
        ErrorClass::NameError,
        ErrorClass::ZeroDivisionError,
        ErrorClass::ImportError,
        ErrorClass::RuntimeError,
        ErrorClass::AssertionError,
        ErrorClass::OverflowError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ErrorClass::Exception => "Exception",
            ErrorClass::ValueError => "ValueError",
            ErrorClass::TypeError => "TypeError",
            ErrorClass::KeyError => "KeyError",
            ErrorClass::IndexError => "IndexError",
            ErrorClass::LookupError => "LookupError",
            ErrorClass::AttributeError => "AttributeError",
            ErrorClass::NameError => "NameError",
            ErrorClass::ZeroDivisionError => "ZeroDivisionError",
            ErrorClass::ImportError => "ImportError",
            ErrorClass::RuntimeError => "RuntimeError",
            ErrorClass::AssertionError => "AssertionError",
            ErrorClass::OverflowError => "OverflowError",
        }
    }

    /// Whether an `except self:` clause catches an error of class `other`.
    pub fn catches(self, other: ErrorClass) -> bool {
        match self {
            ErrorClass::Exception => true,
            ErrorClass::LookupError => matches!(
                other,
                ErrorClass::LookupError | ErrorClass::KeyError | ErrorClass::IndexError
            ),
            _ => self == other,
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SandboxError {
    #[error("line {line}: {message}")]
    Compile { line: usize, message: String },

    #[error(transparent)]
    Guard(#[from] GuardDenied),

    #[error("{class}: {message}")]
    Raised { class: ErrorClass, message: String },

    #[error("ContractViolation: {0}")]
    Contract(String),

    #[error("StepBudgetExceeded: guest code ran more than {0} steps")]
    StepBudget(u64),

    #[error("DeadlineExceeded: guest code ran longer than {0} ms")]
    Deadline(u64),
}

impl SandboxError {
    pub fn compile(line: usize, message: impl Into<String>) -> Self {
        SandboxError::Compile {
            line,
            message: message.into(),
        }
    }

    pub fn raised(class: ErrorClass, message: impl Into<String>) -> Self {
        SandboxError::Raised {
            class,
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::raised(ErrorClass::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::raised(ErrorClass::ValueError, message)
    }

    pub fn key_error(message: impl Into<String>) -> Self {
        Self::raised(ErrorClass::KeyError, message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::raised(ErrorClass::IndexError, message)
    }

    pub fn attribute_error(message: impl Into<String>) -> Self {
        Self::raised(ErrorClass::AttributeError, message)
    }

    pub fn name_error(message: impl Into<String>) -> Self {
        Self::raised(ErrorClass::NameError, message)
    }

    pub fn runtime_error(message: impl Into<String>) -> Self {
        Self::raised(ErrorClass::RuntimeError, message)
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::raised(ErrorClass::ZeroDivisionError, message)
    }

    pub fn overflow() -> Self {
        Self::raised(ErrorClass::OverflowError, "integer result out of range")
    }

    /// Guest `try/except` may only intercept raised exceptions.
    pub fn is_catchable(&self) -> bool {
        matches!(self, SandboxError::Raised { .. })
    }

    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            SandboxError::Raised { class, .. } => Some(*class),
            _ => None,
        }
    }

    /// Prefix the message of a raised error, keeping its class.
    /// Non-catchable errors pass through untouched.
    pub fn with_context(self, context: &str) -> Self {
        match self {
            SandboxError::Raised { class, message } => SandboxError::Raised {
                class,
                message: format!("{context}: {message}"),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_denied_names_operation_kind_and_key() {
        let err = GuardDenied::new(GuardOp::AttributeRead, "dict", "_secret");
        let text = err.to_string();
        assert!(text.contains("attribute read"));
        assert!(text.contains("dict"));
        assert!(text.contains("_secret"));
    }

    #[test]
    fn test_only_raised_errors_are_catchable() {
        assert!(SandboxError::value_error("x").is_catchable());
        let denied: SandboxError = GuardDenied::new(GuardOp::Import, "module", "os").into();
        assert!(!denied.is_catchable());
        assert!(!SandboxError::StepBudget(10).is_catchable());
        assert!(!SandboxError::Deadline(10).is_catchable());
    }

    #[test]
    fn test_exception_hierarchy() {
        assert!(ErrorClass::Exception.catches(ErrorClass::KeyError));
        assert!(ErrorClass::LookupError.catches(ErrorClass::IndexError));
        assert!(!ErrorClass::LookupError.catches(ErrorClass::ValueError));
        assert!(!ErrorClass::KeyError.catches(ErrorClass::IndexError));
    }

    #[test]
    fn test_with_context_keeps_class() {
        let err = SandboxError::key_error("'x'").with_context("_getitem_ guard");
        assert_eq!(err.class(), Some(ErrorClass::KeyError));
        assert_eq!(err.to_string(), "KeyError: _getitem_ guard: 'x'");
    }
}
