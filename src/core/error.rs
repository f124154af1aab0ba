use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Parse,
    NotFound,
    InvalidState,
    /// Malformed input shape or argument (nested match targets, non-numeric boost, ...)
    BadParameter,
    /// Query shape the engine refuses to execute (self-referencing search clause)
    NotImplemented,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
}

impl Error {
    pub fn new(kind: ErrorKind, context: String) -> Self {
        Error { kind, context }
    }

    pub fn bad_parameter(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::BadParameter, context.into())
    }

    pub fn not_implemented(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::NotImplemented, context.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.context)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            kind: ErrorKind::Io,
            context: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            kind: ErrorKind::Parse,
            context: err.to_string(),
        }
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error {
            kind: ErrorKind::BadParameter,
            context: format!("Invalid pattern: {}", err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
