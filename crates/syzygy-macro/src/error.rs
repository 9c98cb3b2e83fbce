//! Fatal macro-decomposition failures: input inconsistent enough that
//! decomposition cannot produce a sensible graph at all.

use syzygy_address::RelativeAddress;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("fixup at {0} has a reference type the block graph cannot represent")]
    UnknownFixupType(RelativeAddress),

    #[error("symbol at {0} does not fall within any known section")]
    SymbolOutsideSection(RelativeAddress),

    #[error("block at {0} partially overlaps an existing block without containing it")]
    OverlapNotContainment(RelativeAddress),

    #[error(transparent)]
    BlockGraph(#[from] syzygy_block_graph::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
