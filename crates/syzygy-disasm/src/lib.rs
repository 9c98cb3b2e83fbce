//! A recursive-descent x86 code walker, generic over an
//! `InstructionDecoder` collaborator, shared by the macro decomposer
//! (which disassembles whole code blocks) and the basic-block decomposer
//! (which re-walks a single block seeded from its known entry points).
//!
//! The walker exposes its progress through a directive-returning
//! callback, letting specialized consumers reuse it without recasting it
//! into an iterator.

mod decoder;
mod diagnostic;
mod walker;

pub use decoder::{
    DecodeError, DecodedInstruction, FlowControl, InstructionDecoder, Operand, OpcodeClass,
    OperandType,
};
pub use diagnostic::{Diagnostic, Severity};
pub use walker::{walk, ControlFlow, Directive, WalkObserver, WalkResult};
