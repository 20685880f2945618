use object::Value;
use thiserror::Error;

use crate::env::FrameId;

/// A guest-visible failure, propagated with `?` up to whichever frame
/// handles it.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Argument(String),
    #[error("{0}")]
    Type(String),
    #[error("{0}")]
    Range(String),
    #[error("divided by 0")]
    ZeroDivision,
    #[error("{0}")]
    LocalJump(String),
    #[error("interrupted")]
    Interrupt,
    /// Non-local exit from a block, unwinding to the frame that passed it.
    #[error("break from proc-closure")]
    Break { frame: FrameId, value: Value },
}

pub type VmResult<T> = Result<T, Error>;

impl Error {
    pub fn argument(message: impl Into<String>) -> Self {
        Self::Argument(message.into())
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            Self::Argument(_) => "ArgumentError",
            Self::Type(_) => "TypeError",
            Self::Range(_) => "RangeError",
            Self::ZeroDivision => "ZeroDivisionError",
            Self::LocalJump(_) | Self::Break { .. } => "LocalJumpError",
            Self::Interrupt => "Interrupt",
        }
    }
}
