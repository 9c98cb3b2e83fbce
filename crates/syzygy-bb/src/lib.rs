//! Basic-block decomposition: re-disassembles one already-placed code
//! block (from `syzygy_block_graph`) into a typed sub-graph of `Code`,
//! `Data`, and `Padding` basic blocks with resolved successor edges.

mod basic_block;
mod decompose;
mod error;
mod ids;
mod options;
mod subgraph;
mod successor;

pub use basic_block::{BasicBlock, BasicBlockKind, Instruction};
pub use decompose::decompose_basic_blocks;
pub use error::{Error, Result};
pub use ids::BasicBlockId;
pub use options::Options;
pub use subgraph::BasicBlockSubGraph;
pub use successor::{Condition, Successor, SuccessorTarget};
