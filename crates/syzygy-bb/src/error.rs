//! Basic-block decomposition failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("block has no address; it must be placed before basic-block decomposition")]
    UnplacedBlock,

    #[error("only code blocks can be decomposed into basic blocks")]
    NotCodeBlock,

    #[error("{0} bytes at offset {1} are covered by neither an instruction, a data run, nor padding")]
    CoverageGap(u32, u32),

    #[error("jump target at offset {0} does not fall on a basic-block boundary")]
    JumpTargetNotBasicBlockStart(u32),

    #[error("successor at offset {0} could not be resolved to a basic block or an external reference")]
    UnresolvedSuccessor(u32),

    #[error(transparent)]
    BlockGraph(#[from] syzygy_block_graph::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
