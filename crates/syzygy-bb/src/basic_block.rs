//! `BasicBlock`: the basic-block sub-graph's primary entity.

use syzygy_block_graph::{BlockId, Offset, Reference};
use syzygy_disasm::DecodedInstruction;

use crate::ids::BasicBlockId;
use crate::successor::Successor;

/// A basic block's content kind: a straight-line instruction run, an
/// inferred data span, or filler between the two.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BasicBlockKind {
    Code,
    Data,
    Padding,
}

/// One decoded instruction, anchored at its offset within the owning
/// block (not the sub-graph's owning `BasicBlock`, so offsets stay
/// comparable across passes that haven't carved basic blocks yet).
#[derive(Clone, Debug)]
pub struct Instruction {
    pub offset: u32,
    pub decoded: DecodedInstruction,
}

/// A maximal run of bytes within a decomposed code block that is either
/// a straight-line instruction sequence, an inferred data run, or filler
/// between the two.
#[derive(Clone, Debug)]
pub struct BasicBlock {
    id: BasicBlockId,
    kind: BasicBlockKind,
    offset: u32,
    size: u32,
    data: Vec<u8>,
    instructions: Vec<Instruction>,
    successors: Vec<Successor>,
    /// Outgoing block-graph references whose source offset falls within
    /// this basic block but that aren't control-flow successors (e.g. a
    /// data pointer embedded in a `CodeBB`'s jump table), propagated from
    /// the owning block.
    outgoing_references: Vec<(Offset, Reference)>,
    /// Incoming block-graph referrers whose target offset falls within
    /// this basic block, propagated the same way.
    incoming_referrers: Vec<(BlockId, Offset)>,
}

impl BasicBlock {
    pub(crate) fn new(id: BasicBlockId, kind: BasicBlockKind, offset: u32, data: Vec<u8>) -> Self {
        BasicBlock {
            id,
            kind,
            offset,
            size: data.len() as u32,
            data,
            instructions: Vec::new(),
            successors: Vec::new(),
            outgoing_references: Vec::new(),
            incoming_referrers: Vec::new(),
        }
    }

    pub fn id(&self) -> BasicBlockId {
        self.id
    }

    pub fn kind(&self) -> BasicBlockKind {
        self.kind
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub(crate) fn push_instruction(&mut self, inst: Instruction) {
        self.instructions.push(inst);
    }

    pub fn successors(&self) -> &[Successor] {
        &self.successors
    }

    pub(crate) fn set_successors(&mut self, successors: Vec<Successor>) {
        self.successors = successors;
    }

    pub fn outgoing_references(&self) -> &[(Offset, Reference)] {
        &self.outgoing_references
    }

    pub(crate) fn push_outgoing_reference(&mut self, offset: Offset, reference: Reference) {
        self.outgoing_references.push((offset, reference));
    }

    pub fn incoming_referrers(&self) -> &[(BlockId, Offset)] {
        &self.incoming_referrers
    }

    pub(crate) fn push_incoming_referrer(&mut self, referrer: (BlockId, Offset)) {
        self.incoming_referrers.push(referrer);
    }
}
