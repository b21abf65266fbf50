//! Runtime error model.
//!
//! Errors are a single tagged record, not a class hierarchy: a closed
//! [`ErrorKind`] label, a message, the thrown payload (for user `throw`), the
//! captured stack, and an optional cause for wrapped foreign failures.
//! `catch` matches by kind label when the user asks for one and binds
//! unconditionally otherwise.

use std::{borrow::Cow, fmt};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::object::Object;

/// Result alias for operations that can raise a runtime error.
pub(crate) type RunResult<T> = Result<T, RunError>;

/// The closed set of error tags.
///
/// The string form matches the variant name exactly, which is what
/// `catch (e: TypeError)` compares against.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
pub enum ErrorKind {
    /// Runtime variant mismatch or arity mismatch.
    TypeError,
    /// Lookup miss in the environment chain.
    UndefinedName,
    /// Container access out of range.
    IndexError,
    /// Dict lookup with a missing key.
    KeyError,
    /// Integer overflow, underflow, or `INT_MIN` negation.
    ArithmeticError,
    /// Integer `/` or `%` with a zero divisor.
    DivisionByZero,
    /// Unresolved type parameter, or `let` without initializer or annotation.
    TypeInferenceError,
    /// Structural cycle in a struct definition.
    TypeCycleError,
    /// Member or index access on `null`.
    NullAccess,
    /// Evaluator call depth exceeded.
    StackOverflow,
    /// Input cap, container cap, regex cap, or FFI payload cap exceeded.
    ResourceLimit,
    /// Foreign execution failure.
    PolyglotError,
    /// Foreign execution exceeded its deadline.
    PolyglotTimeout,
    /// File open/read/write failure.
    IOError,
    /// Traversal attempt, null byte, or disallowed directory.
    PathSecurityError,
    /// Raised at load time by the external parser; propagates from the loader.
    ParseError,
    /// The loader could not resolve a `use` target.
    ModuleNotFound,
    /// Pattern rejected by the regex safety analyzer.
    RegexComplexity,
    /// Value thrown by user code via `throw`; carries the value verbatim.
    UserError,
    /// `break`/`continue` escaped a loop at runtime (defensive; the parser
    /// rejects this earlier).
    ControlFlowError,
}

/// One captured call-stack entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub function_name: String,
    pub file_path: String,
    pub line: u32,
    pub column: u32,
}

impl Frame {
    #[must_use]
    pub fn new(function_name: impl Into<String>, file_path: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            function_name: function_name.into(),
            file_path: file_path.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "at {} ({}:{}:{})",
            self.function_name, self.file_path, self.line, self.column
        )
    }
}

/// A runtime error: the public record that `catch` observes and that uncaught
/// failures print at the program root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    /// The thrown value, present for `UserError`.
    payload: Option<Object>,
    /// Captured stack, innermost frame first.
    frames: Vec<Frame>,
    /// Wrapped foreign failure, for errors crossing the FFI boundary.
    cause: Option<Box<Error>>,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            payload: None,
            frames: Vec::new(),
            cause: None,
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Object) -> Self {
        self.payload = Some(payload);
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: Error) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    #[must_use]
    pub fn with_frames(mut self, frames: Vec<Frame>) -> Self {
        self.frames = frames;
        self
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn payload(&self) -> Option<&Object> {
        self.payload.as_ref()
    }

    #[must_use]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    #[must_use]
    pub fn cause(&self) -> Option<&Error> {
        self.cause.as_deref()
    }

    /// Stack trace lines, most recent call first. Sanitization is applied by
    /// the caller (the root reporter consults the configured sanitizer mode).
    #[must_use]
    pub fn trace_lines(&self) -> Vec<String> {
        self.frames.iter().map(Frame::to_string).collect()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}

/// Internal error channel used while evaluating.
///
/// `Exc` is a catchable runtime error; `Internal` indicates a bug in the core
/// itself (never catchable, surfaces as a `TypeError`-free hard failure).
#[derive(Debug)]
pub(crate) enum RunError {
    Internal(Cow<'static, str>),
    Exc(Box<Error>),
}

impl RunError {
    pub fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn err(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Exc(Box::new(Error::new(kind, message)))
    }

    /// Converts into the public error record. Internal errors surface with a
    /// fixed prefix so bug reports are distinguishable from user failures.
    pub fn into_error(self) -> Error {
        match self {
            Self::Exc(err) => *err,
            Self::Internal(msg) => Error::new(ErrorKind::TypeError, format!("internal error in naab core: {msg}")),
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Exc(err) => Some(err.kind()),
            Self::Internal(_) => None,
        }
    }
}

impl From<Error> for RunError {
    fn from(err: Error) -> Self {
        Self::Exc(Box::new(err))
    }
}

/// Shorthand for raising a runtime error from evaluator code.
pub(crate) fn raise<T>(kind: ErrorKind, message: impl Into<String>) -> RunResult<T> {
    Err(RunError::err(kind, message))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn kind_labels_round_trip() {
        assert_eq!(ErrorKind::TypeError.to_string(), "TypeError");
        assert_eq!(ErrorKind::from_str("PathSecurityError").unwrap(), ErrorKind::PathSecurityError);
        assert!(ErrorKind::from_str("NoSuchKind").is_err());
    }

    #[test]
    fn trace_lines_are_innermost_first() {
        let err = Error::new(ErrorKind::UserError, "boom").with_frames(vec![
            Frame::new("inner", "a.naab", 3, 1),
            Frame::new("main", "a.naab", 9, 1),
        ]);
        let lines = err.trace_lines();
        assert!(lines[0].contains("inner"));
        assert!(lines[1].contains("main"));
    }
}
