//! Error taxonomy for loading and running scripts.
//!
//! Every variant here is caught at the narrowest boundary (one file, one
//! task) and demoted to a log record. Nothing in this module is allowed to
//! end a cycle, let alone the process.

use std::path::PathBuf;

use thiserror::Error;

/// A syntax error with the position it was detected at (1-based).
#[derive(Debug, Clone, PartialEq, Error)]
#[error("parse error at line {line}, column {column}: {message}")]
pub struct ParseError {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl ParseError {
    pub fn new(line: u32, column: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

/// The sanitized tree could not be turned into a loaded unit.
///
/// Covers static validation of the tree as well as faults raised while the
/// module body runs to seed the namespace.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("compile error at line {line}: {message}")]
pub struct CompileError {
    pub line: u32,
    pub message: String,
}

/// Why a script file produced no unit this cycle.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// A runtime fault raised inside the interpreter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    #[error("NameError: name '{0}' is not defined")]
    Name(String),

    #[error("TypeError: {0}")]
    Type(String),

    #[error("ValueError: {0}")]
    Value(String),

    #[error("ZeroDivisionError: division by zero")]
    ZeroDivision,

    #[error("AttributeError: {0}")]
    Attribute(String),

    #[error("IndexError: {0}")]
    Index(String),

    #[error("KeyError: {0}")]
    Key(String),

    #[error("ImportError: no module named '{0}'")]
    Import(String),

    #[error("RecursionError: maximum call depth of {0} exceeded")]
    Recursion(usize),

    #[error("OSError: {0}")]
    Os(String),

    /// A value raised by the script itself with `raise`.
    #[error("{0}")]
    Raised(String),

    #[error("line {line}: {source}")]
    At {
        line: u32,
        #[source]
        source: Box<ScriptError>,
    },
}

impl ScriptError {
    /// Attaches a line number unless the error already carries one.
    pub fn at_line(self, line: u32) -> Self {
        match self {
            ScriptError::At { .. } => self,
            other => ScriptError::At {
                line,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, without line information.
    pub fn root(&self) -> &ScriptError {
        match self {
            ScriptError::At { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn line(&self) -> Option<u32> {
        match self {
            ScriptError::At { line, .. } => Some(*line),
            _ => None,
        }
    }
}

/// Why an entry-point invocation produced no value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EntryPointError {
    #[error("unit '{unit}' has no entry point '{entry}'")]
    Missing { unit: String, entry: String },

    #[error("'{entry}' in unit '{unit}' is not callable")]
    NotCallable { unit: String, entry: String },

    #[error("{0}")]
    Failed(#[from] ScriptError),

    #[error("entry point panicked: {0}")]
    Panicked(String),
}

/// A failure crossing the host bridge. Always logged and swallowed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    #[error("host value '{0}' is not exported")]
    UnknownValue(String),

    #[error("host object '{object}' has no method '{method}'")]
    UnknownMethod { object: String, method: String },

    #[error("host call rejected: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_line_wraps_once() {
        let err = ScriptError::Name("x".into()).at_line(3).at_line(9);
        assert_eq!(err.line(), Some(3));
        assert_eq!(err.root(), &ScriptError::Name("x".into()));
        assert_eq!(err.to_string(), "line 3: NameError: name 'x' is not defined");
    }

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::new(2, 5, "unexpected token");
        assert_eq!(
            err.to_string(),
            "parse error at line 2, column 5: unexpected token"
        );
    }

    #[test]
    fn test_load_error_is_transparent_for_compile() {
        let err: LoadError = CompileError {
            line: 4,
            message: "'return' outside function".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "compile error at line 4: 'return' outside function"
        );
    }
}
