pub mod command;
pub mod decoder;
pub mod frame;
pub mod reader;
pub mod transport;

use crate::error::EngineError;

/// Outcome of one cooperative step. `Incomplete` asks the caller to come
/// back on a later tick.
#[derive(Clone, Debug, PartialEq)]
pub enum Progress<T> {
    Incomplete,
    Success(T),
    Fail(EngineError),
}

impl<T> Progress<T> {
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Incomplete)
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Progress<U> {
        match self {
            Self::Incomplete => Progress::Incomplete,
            Self::Success(v) => Progress::Success(f(v)),
            Self::Fail(e) => Progress::Fail(e),
        }
    }
}

impl<T> From<Result<T, EngineError>> for Progress<T> {
    fn from(result: Result<T, EngineError>) -> Self {
        match result {
            Ok(v) => Self::Success(v),
            Err(e) => Self::Fail(e),
        }
    }
}
