//! The recursive-descent code walker shared by the macro and
//! basic-block decomposers.

use std::collections::{HashSet, VecDeque};

use log::{trace, warn};
use syzygy_address::{AddressRange, AddressSpace};

use crate::decoder::{DecodedInstruction, FlowControl, InstructionDecoder};

/// A directive returned from `WalkObserver::on_instruction`, letting a
/// caller cheaply steer or stop a walk without signaling an error.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Directive {
    /// Keep walking normally.
    Continue,
    /// Stop decoding along the current instruction run, as if the last
    /// instruction had terminated flow; other pending entry points are
    /// still processed.
    TerminatePath,
    /// Like `TerminatePath`, but additionally discard any successors this
    /// instruction would otherwise have scheduled (branch targets,
    /// fall-through) — used by callers matching a specific instruction
    /// pattern they want to cut off rather than follow.
    TerminatePattern,
    /// Stop the entire walk immediately; no further entry points are
    /// processed. The walk reports `WalkResult::Terminated`.
    TerminateAll,
    /// Treat this as a fatal error; the walk reports `WalkResult::WalkError`.
    Abort,
}

/// Whether an instruction run ended because flow terminated (return,
/// unconditional branch, ...) or because the walker chose to stop early
/// at a pre-registered boundary.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControlFlow {
    Terminates,
    Continues,
}

/// The outcome of a complete walk.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WalkResult {
    /// Every reachable branch was resolved and every byte of the code
    /// range was covered.
    Success,
    /// One or more computed/indirect branch targets could not be
    /// resolved, or some bytes were never covered.
    Incomplete,
    /// A `TerminateAll` directive stopped the walk early.
    Terminated,
    /// A decode failure or an instruction-range overlap was encountered.
    WalkError,
}

/// Event hooks fired during a walk. Default implementations make every
/// hook optional; a consumer overrides only the ones it cares about.
pub trait WalkObserver {
    fn on_start_instruction_run(&mut self, _addr: u32) {}

    /// Called once per decoded instruction. The returned `Directive`
    /// steers the remainder of the walk.
    fn on_instruction(&mut self, _addr: u32, _inst: &DecodedInstruction) -> Directive {
        Directive::Continue
    }

    /// Called for every branch with a resolvable PC-relative target,
    /// before the target is scheduled.
    fn on_branch_instruction(&mut self, _addr: u32, _inst: &DecodedInstruction, _dest: u32) {}

    /// Called whenever an instruction run ends, whether by flow
    /// termination or by hitting a pre-registered boundary.
    fn on_end_instruction_run(
        &mut self,
        _run_start: u32,
        _last_inst: Option<&DecodedInstruction>,
        _control_flow: ControlFlow,
    ) {
    }

    fn on_disassembly_complete(&mut self) {}
}

/// FIFO-with-dedup queue of addresses still to be walked. A `VecDeque`
/// preserves processing order (useful for deterministic test output)
/// while `pending` gives O(1) membership checks for whether an address
/// is already scheduled.
struct PendingSet {
    queue: VecDeque<u32>,
    pending: HashSet<u32>,
}

impl PendingSet {
    fn new() -> Self {
        PendingSet {
            queue: VecDeque::new(),
            pending: HashSet::new(),
        }
    }

    fn push(&mut self, addr: u32) {
        if self.pending.insert(addr) {
            self.queue.push_back(addr);
        }
    }

    fn pop(&mut self) -> Option<u32> {
        let addr = self.queue.pop_front()?;
        self.pending.remove(&addr);
        Some(addr)
    }

    fn contains(&self, addr: u32) -> bool {
        self.pending.contains(&addr)
    }
}

/// Run a recursive-descent walk over `code` (which begins at relative
/// address `code_base`), seeding the work list with `seeds`.
pub fn walk(
    decoder: &dyn InstructionDecoder,
    code: &[u8],
    code_base: u32,
    seeds: impl IntoIterator<Item = u32>,
    observer: &mut dyn WalkObserver,
) -> WalkResult {
    let code_end = code_base + code.len() as u32;
    let mut unvisited = PendingSet::new();
    for seed in seeds {
        unvisited.push(seed);
    }
    let mut visited: AddressSpace<u32, u8> = AddressSpace::new();
    let mut incomplete = false;
    let mut terminated_early = false;

    while !terminated_early {
        let run_start = match unvisited.pop() {
            Some(addr) => addr,
            None => break,
        };
        if visited.get_at(run_start).is_some() {
            continue;
        }

        observer.on_start_instruction_run(run_start);
        let mut current = run_start;
        let mut last_inst: Option<DecodedInstruction> = None;
        let mut control_flow = ControlFlow::Terminates;

        loop {
            if current < code_base || current >= code_end {
                control_flow = ControlFlow::Terminates;
                break;
            }

            let offset = (current - code_base) as usize;
            let inst = match decoder.decode(&code[offset..], current) {
                Ok(inst) => inst,
                Err(e) => {
                    warn!("decode failed at {:#x}: {}", current, e);
                    return WalkResult::WalkError;
                }
            };

            if let Some(&existing_size) = visited.get_at(current) {
                if existing_size as u32 != inst.size as u32 {
                    warn!("instruction-range overlap at {:#x}", current);
                    return WalkResult::WalkError;
                }
                control_flow = ControlFlow::Terminates;
                break;
            }
            visited.insert(AddressRange::new(current, inst.size as u32), inst.size);
            trace!("decoded instruction at {:#x}, size {}", current, inst.size);

            let directive = observer.on_instruction(current, &inst);
            last_inst = Some(inst);
            let inst = last_inst.as_ref().unwrap();

            match directive {
                Directive::Abort => return WalkResult::WalkError,
                Directive::TerminateAll => {
                    terminated_early = true;
                    control_flow = ControlFlow::Terminates;
                    break;
                }
                Directive::TerminatePath | Directive::TerminatePattern => {
                    control_flow = ControlFlow::Terminates;
                    break;
                }
                Directive::Continue => {}
            }

            match inst.flow_control {
                FlowControl::None | FlowControl::Call | FlowControl::Cmov | FlowControl::Interrupt => {
                    current += inst.size as u32;
                }
                FlowControl::Return | FlowControl::Syscall => {
                    control_flow = ControlFlow::Terminates;
                    break;
                }
                FlowControl::ConditionalBranch | FlowControl::UnconditionalBranch => {
                    if inst.flow_control == FlowControl::ConditionalBranch {
                        let fallthrough = current + inst.size as u32;
                        if fallthrough < code_end {
                            unvisited.push(fallthrough);
                        }
                    }
                    if let Some(disp) = inst.pc_relative_displacement() {
                        let dest = (current as i64 + inst.size as i64 + disp as i64) as u32;
                        observer.on_branch_instruction(current, inst, dest);
                        if dest >= code_base && dest < code_end {
                            unvisited.push(dest);
                        }
                    } else {
                        incomplete = true;
                    }
                    control_flow = ControlFlow::Terminates;
                    break;
                }
            }

            if unvisited.contains(current) {
                control_flow = ControlFlow::Continues;
                break;
            }
        }

        observer.on_end_instruction_run(run_start, last_inst.as_ref(), control_flow);
    }

    observer.on_disassembly_complete();

    if terminated_early {
        return WalkResult::Terminated;
    }
    let covered: u32 = visited.iter().map(|(r, _)| r.size()).sum();
    if incomplete || covered != code.len() as u32 {
        WalkResult::Incomplete
    } else {
        WalkResult::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{DecodeError, Operand, OperandType, OpcodeClass};

    /// A tiny fixed-width test decoder: every byte is a one-byte `nop`
    /// except `0xC3` (`ret`) and `0xEB <rel8>` (`jmp short`).
    struct ToyDecoder;

    impl InstructionDecoder for ToyDecoder {
        fn decode(&self, buf: &[u8], _addr: u32) -> Result<DecodedInstruction, DecodeError> {
            if buf.is_empty() {
                return Err(DecodeError::BufferTooShort);
            }
            match buf[0] {
                0xC3 => Ok(DecodedInstruction {
                    size: 1,
                    opcode_class: OpcodeClass::General,
                    flow_control: FlowControl::Return,
                    operands: [Operand::NONE; 4],
                }),
                0xEB => {
                    if buf.len() < 2 {
                        return Err(DecodeError::BufferTooShort);
                    }
                    let mut operands = [Operand::NONE; 4];
                    operands[0] = Operand {
                        op_type: OperandType::PcRelative,
                        size: 1,
                        register: 0,
                        immediate: 0,
                        displacement: buf[1] as i8 as i32,
                    };
                    Ok(DecodedInstruction {
                        size: 2,
                        opcode_class: OpcodeClass::General,
                        flow_control: FlowControl::UnconditionalBranch,
                        operands,
                    })
                }
                _ => Ok(DecodedInstruction {
                    size: 1,
                    opcode_class: OpcodeClass::General,
                    flow_control: FlowControl::None,
                    operands: [Operand::NONE; 4],
                }),
            }
        }
    }

    struct Recorder {
        instructions: Vec<u32>,
    }

    impl WalkObserver for Recorder {
        fn on_instruction(&mut self, addr: u32, _inst: &DecodedInstruction) -> Directive {
            self.instructions.push(addr);
            Directive::Continue
        }
    }

    #[test]
    fn straight_line_walk_succeeds() {
        let code = [0x90, 0x90, 0xC3];
        let mut rec = Recorder { instructions: vec![] };
        let result = walk(&ToyDecoder, &code, 0, vec![0], &mut rec);
        assert_eq!(result, WalkResult::Success);
        assert_eq!(rec.instructions, vec![0, 1, 2]);
    }

    #[test]
    fn short_backward_jump_revisits_and_terminates() {
        // nop; jmp short -2 (back to the nop) -- infinite loop in theory,
        // but revisiting an already-visited address is a no-op.
        let code = [0x90, 0xEB, 0xFC];
        let mut rec = Recorder { instructions: vec![] };
        let result = walk(&ToyDecoder, &code, 0, vec![0], &mut rec);
        assert_eq!(result, WalkResult::Success);
        assert_eq!(rec.instructions, vec![0, 1]);
    }

    #[test]
    fn decode_failure_reports_walk_error() {
        struct FailingDecoder;
        impl InstructionDecoder for FailingDecoder {
            fn decode(&self, _buf: &[u8], _addr: u32) -> Result<DecodedInstruction, DecodeError> {
                Err(DecodeError::InvalidEncoding)
            }
        }
        let code = [0x00];
        let mut rec = Recorder { instructions: vec![] };
        let result = walk(&FailingDecoder, &code, 0, vec![0], &mut rec);
        assert_eq!(result, WalkResult::WalkError);
    }

    #[test]
    fn terminate_all_stops_remaining_entry_points() {
        struct Stopper;
        impl WalkObserver for Stopper {
            fn on_instruction(&mut self, _addr: u32, _inst: &DecodedInstruction) -> Directive {
                Directive::TerminateAll
            }
        }
        let code = [0x90, 0x90, 0x90];
        let mut obs = Stopper;
        let result = walk(&ToyDecoder, &code, 0, vec![0, 1, 2], &mut obs);
        assert_eq!(result, WalkResult::Terminated);
    }

    #[test]
    fn unresolved_indirect_branch_is_incomplete() {
        struct IndirectDecoder;
        impl InstructionDecoder for IndirectDecoder {
            fn decode(&self, _buf: &[u8], _addr: u32) -> Result<DecodedInstruction, DecodeError> {
                Ok(DecodedInstruction {
                    size: 1,
                    opcode_class: OpcodeClass::General,
                    flow_control: FlowControl::UnconditionalBranch,
                    operands: [Operand::NONE; 4],
                })
            }
        }
        let code = [0xFF];
        let mut rec = Recorder { instructions: vec![] };
        let result = walk(&IndirectDecoder, &code, 0, vec![0], &mut rec);
        assert_eq!(result, WalkResult::Incomplete);
    }
}
