//! Errors returned by `BlockGraph` and `Block` operations.

use crate::ids::{BlockId, SectionId};
use crate::Offset;
use thiserror::Error;

/// Failure modes for block-graph mutation and query operations.
///
/// Grounded on the `bool`-returning validity checks scattered through
/// `block_graph.cc` (`SetReference`, `InsertOrRemoveData`,
/// `TransferReferrers`, ...); each `false` return there becomes a distinct
/// variant here so callers can `match` on what went wrong instead of
/// re-deriving it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("block {0} does not exist in this graph")]
    NoSuchBlock(BlockId),

    #[error("section {0} does not exist in this graph")]
    NoSuchSection(SectionId),

    #[error("reference at offset {offset} of block {from} is invalid: base/size violates the target block's bounds")]
    InvalidReference { from: BlockId, offset: Offset },

    #[error("reference at offset {offset} of block {from} overlaps an existing reference")]
    ReferenceOverlap { from: BlockId, offset: Offset },

    #[error("offset {offset} is out of range for block {block} (size {size})")]
    OffsetOutOfRange {
        block: BlockId,
        offset: Offset,
        size: u32,
    },

    #[error("operation requires a {expected:?} block but {block} is a {actual:?} block")]
    KindMismatch {
        block: BlockId,
        expected: crate::block::BlockKind,
        actual: crate::block::BlockKind,
    },

    #[error("cannot remove block {0}: it still has {1} outgoing reference(s)")]
    HasReferences(BlockId, usize),

    #[error("cannot remove block {0}: it is still the target of {1} referrer(s)")]
    HasReferrers(BlockId, usize),

    #[error("cannot remove data range at offset {offset} of block {block}: it is covered by a reference")]
    DataRangeHasReference { block: BlockId, offset: Offset },

    #[error("label at offset {offset} of block {block} has invalid attributes")]
    InvalidLabelAttributes { block: BlockId, offset: Offset },

    #[error("a label already exists at offset {offset} of block {block}")]
    DuplicateLabel { block: BlockId, offset: Offset },

    #[error("address range for block {0} overlaps an existing block in its section")]
    AddressRangeOverlap(BlockId),
}

pub type Result<T> = std::result::Result<T, Error>;
