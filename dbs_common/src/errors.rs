//! Error-handling code.
//!
//! We propagate `anyhow::Error` everywhere, and attach a [`DbsError`] as
//! context wherever we know what *kind* of failure we're looking at. The
//! outermost `DbsError` in a chain decides the kind reported to callers.

use serde::Serialize;
use std::{error, fmt};

use anyhow::Error;

/// Broad classes of failure. Each has a stable numeric code which is
/// reported to clients.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The payload could not be decoded.
    Decode,
    /// A required field was missing or malformed.
    Validation,
    /// A required reference does not exist.
    NotFound,
    /// A uniqueness constraint was violated.
    Conflict,
    /// We could not begin or commit a transaction.
    Transaction,
    /// Any other backend failure.
    Storage,
}

impl ErrorKind {
    /// The numeric code for this kind of error.
    pub fn code(self) -> u16 {
        match self {
            ErrorKind::Decode => 101,
            ErrorKind::Validation => 102,
            ErrorKind::NotFound => 103,
            ErrorKind::Conflict => 104,
            ErrorKind::Transaction => 105,
            ErrorKind::Storage => 106,
        }
    }

    /// Find the kind of `err`. Errors which were never classified are
    /// storage errors.
    pub fn of(err: &Error) -> ErrorKind {
        err.downcast_ref::<DbsError>()
            .map(|dbs_err| dbs_err.kind)
            .unwrap_or(ErrorKind::Storage)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            ErrorKind::Decode => "decode",
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Transaction => "transaction",
            ErrorKind::Storage => "storage",
        };
        s.fmt(f)
    }
}

/// A classified error, with a human-readable message and the name of the
/// operation which raised it (for example, `dbs.datasets.insert`).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DbsError {
    /// What kind of error is this?
    pub kind: ErrorKind,
    /// A human-readable message. May be empty.
    pub message: String,
    /// Where did this error come from?
    pub origin: &'static str,
}

impl DbsError {
    /// Create a new error.
    pub fn new<M: Into<String>>(
        kind: ErrorKind,
        message: M,
        origin: &'static str,
    ) -> DbsError {
        DbsError {
            kind,
            message: message.into(),
            origin,
        }
    }

    /// Create a new `ErrorKind::Decode` error.
    pub fn decode<M: Into<String>>(message: M, origin: &'static str) -> DbsError {
        DbsError::new(ErrorKind::Decode, message, origin)
    }

    /// Create a new `ErrorKind::Validation` error.
    pub fn validation<M: Into<String>>(message: M, origin: &'static str) -> DbsError {
        DbsError::new(ErrorKind::Validation, message, origin)
    }

    /// Create a new `ErrorKind::NotFound` error.
    pub fn not_found<M: Into<String>>(message: M, origin: &'static str) -> DbsError {
        DbsError::new(ErrorKind::NotFound, message, origin)
    }

    /// Create a new `ErrorKind::Conflict` error.
    pub fn conflict<M: Into<String>>(message: M, origin: &'static str) -> DbsError {
        DbsError::new(ErrorKind::Conflict, message, origin)
    }

    /// Create a new `ErrorKind::Storage` error.
    pub fn storage<M: Into<String>>(message: M, origin: &'static str) -> DbsError {
        DbsError::new(ErrorKind::Storage, message, origin)
    }
}

impl fmt::Display for DbsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{} error in {}", self.kind, self.origin)
        } else {
            write!(f, "{} error in {}: {}", self.kind, self.origin, self.message)
        }
    }
}

impl error::Error for DbsError {}

/// Wrap `err` with a new message and origin, keeping whatever kind it
/// already had.
pub fn rewrap<M: Into<String>>(err: Error, message: M, origin: &'static str) -> Error {
    let kind = ErrorKind::of(&err);
    err.context(DbsError::new(kind, message, origin))
}

/// Support for displaying an error with a complete list of causes, and an
/// optional backtrace.
pub trait DisplayCausesAndBacktraceExt {
    /// Display the error and its causes, plus a backtrace (if available).
    fn display_causes_and_backtrace(&self) -> DisplayCauses<'_>;

    /// Display the error and its causes.
    fn display_causes_without_backtrace(&self) -> DisplayCauses<'_>;
}

impl DisplayCausesAndBacktraceExt for Error {
    fn display_causes_and_backtrace(&self) -> DisplayCauses<'_> {
        DisplayCauses {
            err: self,
            show_backtrace: true,
        }
    }

    fn display_causes_without_backtrace(&self) -> DisplayCauses<'_> {
        DisplayCauses {
            err: self,
            show_backtrace: false,
        }
    }
}

/// Helper type used to display errors.
pub struct DisplayCauses<'a> {
    /// The error to display.
    err: &'a Error,

    /// Should we show the backtrace?
    show_backtrace: bool,
}

impl fmt::Display for DisplayCauses<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.err)?;
        for cause in self.err.chain().skip(1) {
            writeln!(f, "  caused by: {}", cause)?;
        }

        if self.show_backtrace {
            write!(f, "{}", self.err.backtrace())?;
        }
        Ok(())
    }
}

/// Generate a `main` function which calls the specified function. If the
/// function returns `Result::Err(_)`, then `main` will print the error and exit
/// with a non-zero status code.
#[macro_export]
macro_rules! quick_main {
    ($wrapped:ident) => {
        fn main() {
            if let Err(err) = $wrapped() {
                use ::std::io::Write;
                use $crate::errors::DisplayCausesAndBacktraceExt;
                let stderr = ::std::io::stderr();
                write!(&mut stderr.lock(), "{}", err.display_causes_and_backtrace())
                    .expect("Error occurred while trying to display error");
                ::std::process::exit(1);
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[test]
    fn unclassified_errors_are_storage_errors() {
        let err = anyhow::format_err!("disk on fire");
        assert_eq!(ErrorKind::of(&err), ErrorKind::Storage);
    }

    #[test]
    fn kind_survives_plain_context() {
        let err: Error = DbsError::not_found("no osinfo is provided", "dbs.test").into();
        let err = err.context("while inserting");
        assert_eq!(ErrorKind::of(&err), ErrorKind::NotFound);
    }

    #[test]
    fn outermost_kind_wins() {
        let res: Result<(), Error> = Err(DbsError::validation("missing did", "inner").into());
        let err = res
            .context(DbsError::conflict("dup", "outer"))
            .unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::Conflict);
    }

    #[test]
    fn rewrap_keeps_kind() {
        let err: Error = DbsError::validation("missing create_by", "dbs.datasets.validate").into();
        let err = rewrap(err, "fail to insert parts of dataset", "dbs.datasets.insert");
        assert_eq!(ErrorKind::of(&err), ErrorKind::Validation);
        let outer = err.downcast_ref::<DbsError>().unwrap();
        assert_eq!(outer.origin, "dbs.datasets.insert");
        let text = format!("{}", err.display_causes_without_backtrace());
        assert!(text.contains("missing create_by"));
    }
}
