use thiserror::Error;

use tonvm_core::VmError;

/// An interpreter error with an optional `file:line: word:` location
/// attached by the outer loop.
#[derive(Error, Debug, Clone)]
pub struct FiftError {
    pub msg: String,
    pub location: Option<String>,
}

impl std::fmt::Display for FiftError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{location}: {}", self.msg),
            None => write!(f, "{}", self.msg),
        }
    }
}

pub type FiftResult<T> = Result<T, FiftError>;

impl FiftError {
    pub fn new(msg: impl Into<String>) -> Self {
        FiftError {
            msg: msg.into(),
            location: None,
        }
    }

    pub fn at(mut self, location: String) -> Self {
        if self.location.is_none() {
            self.location = Some(location);
        }
        self
    }
}

impl From<VmError> for FiftError {
    fn from(err: VmError) -> Self {
        FiftError::new(err.to_string())
    }
}

impl From<tonvm_core::cell::CellError> for FiftError {
    fn from(err: tonvm_core::cell::CellError) -> Self {
        FiftError::new(err.to_string())
    }
}

impl From<std::io::Error> for FiftError {
    fn from(err: std::io::Error) -> Self {
        FiftError::new(err.to_string())
    }
}
