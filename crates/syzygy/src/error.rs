//! Umbrella error type: wraps whichever stage actually failed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Macro(#[from] syzygy_macro::Error),

    #[error(transparent)]
    BasicBlock(#[from] syzygy_bb::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
