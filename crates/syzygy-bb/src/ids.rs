//! The basic-block handle type.

use syzygy_entity::entity_impl;

/// A reference to a `BasicBlock` owned by a `BasicBlockSubGraph`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BasicBlockId(u32);
entity_impl!(BasicBlockId, "bb");
