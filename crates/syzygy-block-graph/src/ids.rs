//! Entity-reference handle types for blocks and sections.

use syzygy_entity::entity_impl;

/// A reference to a `Block` owned by a `BlockGraph`. Monotonically assigned
/// at `add_block` time; never reused after `remove_block`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockId(u32);
entity_impl!(BlockId, "block");

/// A reference to a `Section` owned by a `BlockGraph`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SectionId(u32);
entity_impl!(SectionId, "sec");
