//! Error types for command execution
//!
//! Every failure the engine can report is an [`Error`] variant. Errors are:
//! - **Structured**: variants carry the command or argument that failed
//! - **Cloneable**: responses carry them across threads
//! - **Classified**: [`Error::kind`] gives the coarse category callers branch on
//!
//! | Kind | Raised by | Severity |
//! |------|-----------|----------|
//! | `InvalidArgument` | translator, tokenizer, request validation | user |
//! | `Unsupported` | translators and drivers without the capability | user |
//! | `NotConnected` / `NotAuthenticated` | connection wrapper, driver | user |
//! | `UnknownCommand` / `WrongArity` | command registry | user |
//! | `Interrupted` | scripts and scans | none (early termination) |
//! | `NativeFailure` | the wrapped backend library | fatal |
//! | `Io` | history, backup, export, config files | fatal |

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed key, value or request
    InvalidArgument,
    /// Operation has no meaning for this backend
    Unsupported,
    /// No open connection
    NotConnected,
    /// Connection is open but not authenticated
    NotAuthenticated,
    /// No descriptor matches the command name
    UnknownCommand,
    /// Argument count outside the descriptor's bounds
    WrongArity,
    /// Cooperative cancellation
    Interrupted,
    /// The backend library reported an error
    NativeFailure,
    /// Local file I/O failed
    Io,
}

/// Engine errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum Error {
    /// Malformed input
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong
        reason: String,
    },

    /// Operation not available on this backend
    #[error("{reason}")]
    Unsupported {
        /// Human-readable explanation
        reason: String,
    },

    /// Connection required
    #[error("Not connected")]
    NotConnected,

    /// Authentication required
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Command name not present in the registry
    #[error("Unknown sequence: '{input}'")]
    UnknownCommand {
        /// The command line as typed
        input: String,
    },

    /// Argument count out of range
    #[error(
        "Invalid input argument for command: '{command}', passed {passed} arguments, must be in range {min} - {}",
        .max.map(|m| m.to_string()).unwrap_or_else(|| "inf".to_string())
    )]
    WrongArity {
        /// Descriptor name
        command: String,
        /// Arguments supplied
        passed: usize,
        /// Minimum accepted
        min: usize,
        /// Maximum accepted, `None` when unbounded
        max: Option<usize>,
    },

    /// Cancelled at a checkpoint
    #[error("Interrupted exec.")]
    Interrupted,

    /// Backend-specific failure
    #[error("{message}")]
    NativeFailure {
        /// Opaque backend message
        message: String,
    },

    /// Local file operation failed
    #[error("I/O error: {reason}")]
    Io {
        /// Underlying error text
        reason: String,
    },
}

impl Error {
    /// Build an [`Error::InvalidArgument`].
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Error::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Build an [`Error::Unsupported`].
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Error::Unsupported {
            reason: reason.into(),
        }
    }

    /// The reply for a verb a backend does not implement.
    pub fn unsupported_verb(backend: impl std::fmt::Display, verb: &str) -> Self {
        Error::unsupported(format!(
            "Sorry, but now {} not supported {} command.",
            backend, verb
        ))
    }

    /// Build an [`Error::NativeFailure`].
    pub fn native(message: impl Into<String>) -> Self {
        Error::NativeFailure {
            message: message.into(),
        }
    }

    /// Build an [`Error::UnknownCommand`].
    pub fn unknown_command(input: impl Into<String>) -> Self {
        Error::UnknownCommand {
            input: input.into(),
        }
    }

    /// Coarse category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Error::Unsupported { .. } => ErrorKind::Unsupported,
            Error::NotConnected => ErrorKind::NotConnected,
            Error::NotAuthenticated => ErrorKind::NotAuthenticated,
            Error::UnknownCommand { .. } => ErrorKind::UnknownCommand,
            Error::WrongArity { .. } => ErrorKind::WrongArity,
            Error::Interrupted => ErrorKind::Interrupted,
            Error::NativeFailure { .. } => ErrorKind::NativeFailure,
            Error::Io { .. } => ErrorKind::Io,
        }
    }

    /// Whether the connection or local state may be damaged.
    ///
    /// User-input errors and interruption are not fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::NativeFailure { .. } | Error::Io { .. })
    }

    /// Check if this is a cooperative cancellation
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_command_message() {
        let err = Error::unknown_command("SET k v");
        assert_eq!(err.to_string(), "Unknown sequence: 'SET k v'");
        assert_eq!(err.kind(), ErrorKind::UnknownCommand);
    }

    #[test]
    fn test_wrong_arity_message_bounded() {
        let err = Error::WrongArity {
            command: "GET".into(),
            passed: 0,
            min: 1,
            max: Some(1),
        };
        assert_eq!(
            err.to_string(),
            "Invalid input argument for command: 'GET', passed 0 arguments, must be in range 1 - 1"
        );
    }

    #[test]
    fn test_wrong_arity_message_unbounded() {
        let err = Error::WrongArity {
            command: "DEL".into(),
            passed: 0,
            min: 1,
            max: None,
        };
        assert!(err.to_string().ends_with("range 1 - inf"));
    }

    #[test]
    fn test_unsupported_verb_message() {
        let err = Error::unsupported_verb("redb", "ShutDown");
        assert_eq!(
            err.to_string(),
            "Sorry, but now redb not supported ShutDown command."
        );
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_severity() {
        assert!(Error::native("boom").is_fatal());
        assert!(!Error::Interrupted.is_fatal());
        assert!(Error::Interrupted.is_interrupted());
        assert!(!Error::NotConnected.is_fatal());
    }

    #[test]
    fn test_from_io_error() {
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("gone"));
    }
}
