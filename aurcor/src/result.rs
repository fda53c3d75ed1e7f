use std::fmt::{self, Display};

/// Failure codes for profile and config operations.
///
/// Variants are declared in increasing severity so that the derived
/// ordering can be used to combine the outcomes of several sub-steps.
/// A successful outcome sits below all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Error {
    Full,
    NotFound,
    OutOfRange,
    ParseError,
    IoError,
}

pub type Result<T = ()> = std::result::Result<T, Error>;

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Error::Full => "full",
            Error::NotFound => "not found",
            Error::OutOfRange => "out of range",
            Error::ParseError => "parse error",
            Error::IoError => "I/O error",
        };
        f.write_str(text)
    }
}

impl std::error::Error for Error {}

/// Keeps the most severe outcome seen across a sequence of operations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Worst {
    worst: Option<Error>,
}

impl Worst {
    pub fn new() -> Self {
        Worst { worst: None }
    }

    /// Records `result` and hands it back unchanged so callers can still
    /// branch on the individual outcome.
    pub fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.worst = self.worst.max(Some(*err));
        }
        result
    }

    pub fn result(&self) -> Result {
        match self.worst {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
