#[cfg(test)]
use std::backtrace::Backtrace;

use derive_more::*;

#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The module header has a bad magic number or version.
    #[display(fmt = "malformed header")]
    MalformedHeader,
    /// An instruction overruns the word stream, or an ID is not below
    /// the module's bound.
    #[display(fmt = "out of range")]
    OutOfRange,
    /// The ID exists but holds a different kind of entity.
    #[display(fmt = "wrong entity kind")]
    WrongEntityKind,
    /// The module uses an instruction or a control-flow shape that
    /// this library cannot represent.
    #[display(fmt = "unsupported construct")]
    UnsupportedConstruct,
    /// A lookup by name found nothing.
    #[display(fmt = "not found")]
    NotFound,
}

#[cfg(not(test))]
#[derive(Debug, Display)]
#[display(fmt = "{}: {}", kind, message)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

#[cfg(test)]
#[derive(Debug, Display)]
#[display(fmt = "{}: {}\n{}", kind, message, backtrace)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    backtrace: Backtrace,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::error::Error for Error {}

impl Error {
    #[cfg(test)]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            backtrace: Backtrace::capture(),
        }
    }

    #[cfg(not(test))]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Self::new(
            ErrorKind::UnsupportedConstruct,
            "string literal is not UTF-8",
        )
    }
}

/// Builds an `Error` from a kind and a format string.
macro_rules! err {
    ($kind:ident, $($arg:tt)*) => {
        crate::Error::new(crate::ErrorKind::$kind, format!($($arg)*))
    }
}

/// Returns early with an `Error` built from a kind and a format string.
macro_rules! bail {
    ($kind:ident, $($arg:tt)*) => {
        return Err(err!($kind, $($arg)*))
    }
}
