//! The decoder collaborator interface and the instruction model it
//! produces.

use syzygy_block_graph::Offset;
use thiserror::Error;

/// A coarse classification of an opcode, used to group instructions for
/// logging and for the static-initializer/non-returning heuristics; not
/// consulted by the walk loop itself, which only looks at `flow_control`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OpcodeClass {
    General,
    Arithmetic,
    Logical,
    Shift,
    StringOp,
    Fpu,
    Simd,
    System,
    Other,
}

/// How control flow proceeds after an instruction executes. Drives every
/// branch of the main walk loop.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FlowControl {
    /// Falls through to the next instruction.
    None,
    /// `call`-class: falls through, but the target is also a reference.
    Call,
    /// A conditional move; behaves like `None` for flow purposes.
    Cmov,
    /// Unconditional jump; does not fall through.
    UnconditionalBranch,
    /// Conditional jump; falls through *and* may branch.
    ConditionalBranch,
    /// `ret`-class; terminates the walk path.
    Return,
    /// `syscall`/`sysenter`-class; terminates the walk path.
    Syscall,
    /// `int3`/`int n`; control continues past it, since it may appear
    /// inline in otherwise straight-line code.
    Interrupt,
}

/// The kind of value an operand holds.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OperandType {
    None,
    Register,
    Immediate,
    /// A PC-relative immediate operand.
    PcRelative,
    Memory,
}

/// One decoded operand slot. `DecodedInstruction` always carries exactly
/// four, unused trailing slots are `OperandType::None`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Operand {
    pub op_type: OperandType,
    pub size: u8,
    pub register: u16,
    pub immediate: i64,
    /// For `OperandType::PcRelative`, the signed displacement used to
    /// compute the branch target (`addr + instruction.size + displacement`);
    /// shares `syzygy_block_graph::Offset`'s width and signedness since both
    /// ultimately feed `Reference::offset`/`base` once resolved to a block.
    pub displacement: Offset,
}

impl Operand {
    pub const NONE: Operand = Operand {
        op_type: OperandType::None,
        size: 0,
        register: 0,
        immediate: 0,
        displacement: 0,
    };
}

/// One decoded instruction.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedInstruction {
    pub size: u8,
    pub opcode_class: OpcodeClass,
    pub flow_control: FlowControl,
    pub operands: [Operand; 4],
}

impl DecodedInstruction {
    /// True iff operand 0 is a PC-relative immediate — the condition that
    /// gates reference emission for a branch instruction.
    pub fn operand0_is_pc_relative(&self) -> bool {
        self.operands[0].op_type == OperandType::PcRelative
    }

    /// The raw PC-relative displacement carried by operand 0, if any.
    pub fn pc_relative_displacement(&self) -> Option<Offset> {
        if self.operand0_is_pc_relative() {
            Some(self.operands[0].displacement)
        } else {
            None
        }
    }
}

/// Why `InstructionDecoder::decode` failed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("no valid instruction encoding at the given address")]
    InvalidEncoding,
    #[error("instruction would read past the end of the supplied buffer")]
    BufferTooShort,
}

/// The decoder collaborator: decodes one instruction at a time from a
/// byte buffer. Implementations wrap a concrete x86 decoder (distorm,
/// zydis, or a hand-rolled subset decoder for tests); the walker is
/// generic over this trait and never assumes a specific backend.
pub trait InstructionDecoder {
    /// Decode one instruction from `buf`, which begins at relative
    /// address `addr`. `buf` may extend beyond the instruction; `addr` is
    /// informational only (needed by decoders whose encoding depends on
    /// position, e.g. to report the PC-relative target precomputed).
    fn decode(&self, buf: &[u8], addr: u32) -> Result<DecodedInstruction, DecodeError>;
}
