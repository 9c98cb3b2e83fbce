//! The block graph: the primary data model of the Syzygy core.
//!
//! A `BlockGraph` owns a set of `Section`s and `Block`s. Each block carries
//! typed `Label`s, an outgoing map of `Reference`s at specific offsets, and
//! a derived set of incoming referrers. Blocks are addressed from other
//! blocks by `BlockId` handle (see `syzygy-entity`), never by pointer: the
//! mutual referencing a block graph needs is expressed as a
//! `BTreeSet<(BlockId, Offset)>` of referrers plus a `HashMap<BlockId,
//! Block>` owned by the graph (see `DESIGN.md` for why a `HashMap` is used
//! in place of `syzygy-entity`'s dense `PrimaryMap`: blocks must be
//! removable without invalidating the ids of their neighbors).

mod attributes;
mod block;
mod error;
mod graph;
mod ids;
mod interner;
mod label;
mod reference;
mod section;
mod source_ranges;

pub use attributes::{BlockAttributes, LabelAttributes};
pub use block::{Block, BlockData, BlockKind};
pub use error::Error;
pub use graph::BlockGraph;
pub use ids::{BlockId, SectionId};
pub use interner::InternedString;
pub use label::Label;
pub use reference::{Reference, ReferenceType, Referrer};
pub use section::Section;
pub use source_ranges::SourceRanges;

/// Offset of a byte within a block's data, or of a reference's target
/// within its referenced block. Signed so that intermediate arithmetic
/// (shifting by a negative delta during `remove_data`) never needs to be
/// special-cased.
pub type Offset = i32;

pub use syzygy_address::RelativeAddress;
