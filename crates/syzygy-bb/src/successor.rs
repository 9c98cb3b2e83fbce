//! Typed edges between basic blocks.

use syzygy_block_graph::Reference;

use crate::ids::BasicBlockId;

/// Which way a `Successor` is taken.
///
/// The underlying `InstructionDecoder` (`syzygy_disasm::FlowControl`)
/// only distinguishes *whether* a branch is conditional, not which of
/// the sixteen x86 condition codes it encodes; `Branch`/`Inverse` stand
/// in for "the condition as decoded" and "the synthesized opposite edge"
/// without naming a specific `Jcc` (see `DESIGN.md`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Condition {
    /// An unconditional edge: a `jmp`, a `call`'s return continuation, or
    /// a plain fall-through with no competing branch.
    Always,
    /// The edge taken when a conditional branch's condition holds.
    Branch,
    /// The synthesized fall-through edge for when it doesn't.
    Inverse,
}

/// Where a `Successor` leads.
#[derive(Clone, Debug)]
pub enum SuccessorTarget {
    /// Another basic block in the same sub-graph.
    Resolved(BasicBlockId),
    /// A target outside the decomposed block, carried as the
    /// block-graph-level reference the macro decomposer already
    /// installed at this offset.
    External(Reference),
    /// A computed/indirect target the walk couldn't resolve.
    Unresolved,
}

/// One outgoing edge from a basic block, anchored at the branch
/// instruction that produced it (or synthesized for a fall-through).
#[derive(Clone, Debug)]
pub struct Successor {
    pub condition: Condition,
    pub target: SuccessorTarget,
    /// Offset of the originating branch instruction within the block,
    /// or of the instruction it falls through from for a synthesized edge.
    pub branch_offset: u32,
    pub branch_size: u8,
}

impl Successor {
    pub fn new(condition: Condition, target: SuccessorTarget, branch_offset: u32, branch_size: u8) -> Self {
        Successor {
            condition,
            target,
            branch_offset,
            branch_size,
        }
    }
}
