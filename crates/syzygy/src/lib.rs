//! Syzygy: a PE-binary post-link decomposition toolchain core.
//!
//! This crate is a thin façade over the workspace's lower-level crates,
//! wiring the macro decomposer (image bytes + symbols -> block graph)
//! and the basic-block decomposer (one code block -> basic-block
//! sub-graph) behind a single pair of entry points.

mod error;
mod options;

pub use error::{Error, Result};
pub use options::Options;

pub use syzygy_address::{AbsoluteAddress, AddressRange, AddressSpace, FileOffset, RelativeAddress};
pub use syzygy_block_graph::{
    Block, BlockAttributes, BlockData, BlockGraph, BlockId, BlockKind, InternedString, Label,
    LabelAttributes, Offset, Reference, ReferenceType, Referrer, Section, SectionId, SourceRanges,
};
pub use syzygy_disasm::{
    DecodeError, DecodedInstruction, Diagnostic, FlowControl, InstructionDecoder, OpcodeClass,
    Operand, OperandType, Severity,
};
pub use syzygy_macro::{
    DataSymbol, Fixup, FunctionSymbol, ImageSource, NamedAddress, SectionContribution,
    SectionHeader, SymbolSource, ThunkSymbol,
};
pub use syzygy_bb::{
    BasicBlock, BasicBlockId, BasicBlockKind, BasicBlockSubGraph, Condition, Instruction,
    Successor, SuccessorTarget,
};

/// Run the macro decomposer: turn `image`/`symbols` into a populated
/// `BlockGraph`.
pub fn decompose(
    image: &dyn ImageSource,
    symbols: &dyn SymbolSource,
    decoder: &dyn InstructionDecoder,
    options: &Options,
) -> Result<(BlockGraph, Vec<Diagnostic>)> {
    syzygy_macro::decompose(image, symbols, decoder, &options.macro_options).map_err(Error::from)
}

/// Run the basic-block decomposer over one already-placed code block.
pub fn decompose_to_basic_blocks(
    graph: &BlockGraph,
    block: BlockId,
    decoder: &dyn InstructionDecoder,
    options: &Options,
) -> Result<(BasicBlockSubGraph, Vec<Diagnostic>)> {
    syzygy_bb::decompose_basic_blocks(graph, block, decoder, &options.bb_options).map_err(Error::from)
}
