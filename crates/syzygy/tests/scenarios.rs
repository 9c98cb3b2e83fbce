//! End-to-end scenario fixtures, driven against the real
//! `BlockGraph`/macro/basic-block APIs with a minimal x86-subset decoder
//! standing in for a production disassembler backend.

use syzygy::{
    AddressRange, BlockGraph, BlockKind, DecodeError, DecodedInstruction, FlowControl,
    InstructionDecoder, Label, LabelAttributes, Offset, Operand, OperandType, OpcodeClass,
    Reference, ReferenceType, RelativeAddress, SuccessorTarget,
};
use syzygy_bb::{decompose_basic_blocks, BasicBlockKind, Condition, Options as BbOptions};

/// Decodes the handful of x86 encodings the scenario fixtures use:
/// `push ebp` (0x55), `mov ebp,esp` (0x8B 0xEC), `pop ebp` (0x5D),
/// `ret` (0xC3), `nop` (0x90), `xor eax,eax` (0x33 0xC0), `jnz rel8`
/// (0x75 <rel8>), a generic 3-byte filler (0xAA ...), and a 1-byte
/// filler (0xBB).
struct ToyDecoder;

fn simple(size: u8, flow_control: FlowControl) -> DecodedInstruction {
    DecodedInstruction {
        size,
        opcode_class: OpcodeClass::General,
        flow_control,
        operands: [Operand::NONE; 4],
    }
}

impl InstructionDecoder for ToyDecoder {
    fn decode(&self, buf: &[u8], _addr: u32) -> Result<DecodedInstruction, DecodeError> {
        if buf.is_empty() {
            return Err(DecodeError::BufferTooShort);
        }
        match buf[0] {
            0x55 | 0x5D | 0x90 | 0xBB => Ok(simple(1, FlowControl::None)),
            0xC3 => Ok(simple(1, FlowControl::Return)),
            0x8B if buf.get(1) == Some(&0xEC) => Ok(simple(2, FlowControl::None)),
            0x33 if buf.get(1) == Some(&0xC0) => Ok(simple(2, FlowControl::None)),
            0x75 => {
                if buf.len() < 2 {
                    return Err(DecodeError::BufferTooShort);
                }
                let mut operands = [Operand::NONE; 4];
                operands[0] = Operand {
                    op_type: OperandType::PcRelative,
                    size: 1,
                    register: 0,
                    immediate: 0,
                    displacement: buf[1] as i8 as Offset,
                };
                Ok(DecodedInstruction {
                    size: 2,
                    opcode_class: OpcodeClass::General,
                    flow_control: FlowControl::ConditionalBranch,
                    operands,
                })
            }
            0xAA => {
                if buf.len() < 3 {
                    return Err(DecodeError::BufferTooShort);
                }
                Ok(simple(3, FlowControl::None))
            }
            _ => Err(DecodeError::InvalidEncoding),
        }
    }
}

fn place_code_block(graph: &mut BlockGraph, addr: u32, code: &[u8]) -> syzygy::BlockId {
    let section = graph.add_section(".text", 0x0000_0020);
    let block = graph.add_block(BlockKind::Code, code.len() as u32, "fn");
    graph
        .set_block_address(block, RelativeAddress::new(addr), section)
        .unwrap();
    graph.get_block_by_id_mut(block).unwrap().set_data(code).unwrap();
    block
}

/// Single straight-line function: `push ebp; mov ebp,esp; pop ebp;
/// ret; nop`. Expect one CodeBB covering the four instructions and one
/// PaddingBB for the trailing nop.
#[test]
fn single_straight_line_function() {
    let mut graph = BlockGraph::new();
    let code = [0x55, 0x8B, 0xEC, 0x5D, 0xC3, 0x90];
    let block_id = place_code_block(&mut graph, 0, &code);

    let (sub, diagnostics) =
        decompose_basic_blocks(&graph, block_id, &ToyDecoder, &BbOptions::new()).unwrap();

    assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    let blocks: Vec<_> = sub.basic_blocks().collect();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].kind(), BasicBlockKind::Code);
    assert_eq!((blocks[0].offset(), blocks[0].size()), (0, 5));
    assert_eq!(blocks[0].instructions().len(), 4);
    assert_eq!(blocks[1].kind(), BasicBlockKind::Padding);
    assert_eq!((blocks[1].offset(), blocks[1].size()), (5, 1));
}

/// Conditional branch with self-target: `xor eax,eax; jnz -4; ret`
/// at address 0x1000 — the `jnz` (offset 2, size 2) targets offset
/// `2 + 2 - 4 = 0`, the start of the `xor`.
#[test]
fn conditional_branch_self_target() {
    let mut graph = BlockGraph::new();
    let code = [0x33, 0xC0, 0x75, 0xFC, 0xC3];
    let block_id = place_code_block(&mut graph, 0x1000, &code);

    let (sub, diagnostics) =
        decompose_basic_blocks(&graph, block_id, &ToyDecoder, &BbOptions::new()).unwrap();

    assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    let blocks: Vec<_> = sub.basic_blocks().collect();
    assert_eq!(blocks.len(), 3);
    assert_eq!((blocks[0].offset(), blocks[0].size()), (0, 2));
    assert_eq!((blocks[1].offset(), blocks[1].size()), (2, 2));
    assert_eq!((blocks[2].offset(), blocks[2].size()), (4, 1));

    let bb1_successors = blocks[1].successors();
    assert_eq!(bb1_successors.len(), 2);
    assert!(bb1_successors.iter().any(|s| s.condition == Condition::Branch
        && matches!(s.target, SuccessorTarget::Resolved(id) if id == blocks[0].id())));
    assert!(bb1_successors.iter().any(|s| s.condition == Condition::Inverse
        && matches!(s.target, SuccessorTarget::Resolved(id) if id == blocks[2].id())));
}

/// Reference from data block to code: a data block's outgoing
/// absolute reference into the middle of a code block, with symmetric
/// referrer bookkeeping.
#[test]
fn reference_from_data_to_code() {
    let mut graph = BlockGraph::new();
    let section = graph.add_section(".text", 0x0000_0020);
    let code_block = graph.add_block(BlockKind::Code, 16, "c");
    graph.set_block_address(code_block, RelativeAddress::new(0), section).unwrap();

    let data_block = graph.add_block(BlockKind::Data, 4, "d");
    graph.set_block_address(data_block, RelativeAddress::new(16), section).unwrap();

    let reference = Reference::new(ReferenceType::Absolute, 4, code_block, 0, 8);
    graph.set_reference(data_block, 0, reference).unwrap();

    let d = graph.get_block_by_id(data_block).unwrap();
    let (offset, r) = d.references().next().unwrap();
    assert_eq!(offset, 0);
    assert_eq!(r.referenced(), code_block);
    assert_eq!(r.base(), 8);

    let c = graph.get_block_by_id(code_block).unwrap();
    assert!(c.referrers().any(|&(b, o)| b == data_block && o == 0));
}

/// Merge of three adjacent blocks, where the merged range is wider
/// than the union of the three blocks and the merge anchors at the
/// lowest source block's start.
#[test]
fn merge_of_three_adjacent_blocks() {
    let mut graph = BlockGraph::new();
    let section = graph.add_section(".text", 0x0000_0020);

    let a = graph.add_block(BlockKind::Code, 10, "a");
    graph.set_block_address(a, RelativeAddress::new(0), section).unwrap();
    let b = graph.add_block(BlockKind::Code, 10, "b");
    graph.set_block_address(b, RelativeAddress::new(10), section).unwrap();
    let c = graph.add_block(BlockKind::Code, 5, "c");
    graph.set_block_address(c, RelativeAddress::new(25), section).unwrap();

    let reference = Reference::new(ReferenceType::PcRelative, 4, c, 6, 0);
    graph.set_reference(a, 6, reference).unwrap();

    let merged = graph
        .merge_intersecting_blocks(AddressRange::new(RelativeAddress::new(5), 25))
        .unwrap()
        .unwrap();

    assert!(graph.get_block_by_id(a).is_none());
    assert!(graph.get_block_by_id(b).is_none());
    assert!(graph.get_block_by_id(c).is_none());

    let m = graph.get_block_by_id(merged).unwrap();
    assert_eq!(m.addr(), Some(RelativeAddress::new(0)));
    assert_eq!(m.size(), 30);

    let (offset, r) = m.references().find(|(o, _)| *o == 6).unwrap();
    assert_eq!(offset, 6);
    assert_eq!(r.referenced(), merged);
}

/// An inbound reference to offset 6 forces a basic-block split
/// there even though no label marks it: four straight-line instructions
/// (sizes 3,3,3,1) with no branches at all, but a reference from a
/// separate block targets offset 6 mid-run.
#[test]
fn inbound_reference_forces_split_with_no_label() {
    let mut graph = BlockGraph::new();
    let code = [0xAA, 0x00, 0x00, 0xAA, 0x00, 0x00, 0xAA, 0x00, 0x00, 0x90];
    let block_id = place_code_block(&mut graph, 0, &code);

    let referrer = graph.add_block(BlockKind::Data, 4, "r");
    let section = graph.add_section(".data", 0);
    graph.set_block_address(referrer, RelativeAddress::new(1000), section).unwrap();
    let reference = Reference::new(ReferenceType::Absolute, 4, block_id, 0, 6);
    graph.set_reference(referrer, 0, reference).unwrap();

    let (sub, diagnostics) =
        decompose_basic_blocks(&graph, block_id, &ToyDecoder, &BbOptions::new()).unwrap();

    assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    let blocks: Vec<_> = sub.basic_blocks().collect();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].kind(), BasicBlockKind::Code);
    assert_eq!((blocks[0].offset(), blocks[0].size()), (0, 6));
    assert_eq!(blocks[0].instructions().len(), 2);
    assert_eq!(blocks[1].kind(), BasicBlockKind::Code);
    assert_eq!((blocks[1].offset(), blocks[1].size()), (6, 4));
    assert_eq!(blocks[1].instructions().len(), 2);

    assert!(blocks[1]
        .incoming_referrers()
        .iter()
        .any(|&(b, o)| b == referrer && o == 0));
}

/// Reference shift through `insert_data`.
#[test]
fn reference_shift_through_insert() {
    let mut graph = BlockGraph::new();
    let section = graph.add_section(".data", 0);

    let target = graph.add_block(BlockKind::Data, 1, "t");
    graph.set_block_address(target, RelativeAddress::new(0), section).unwrap();

    let block = graph.add_block(BlockKind::Data, 20, "b");
    graph.set_block_address(block, RelativeAddress::new(100), section).unwrap();

    let label = Label::new(graph.intern("x"), LabelAttributes::DATA).unwrap();
    graph.get_block_by_id_mut(block).unwrap().set_label(10, label).unwrap();

    let reference = Reference::new(ReferenceType::Relative, 4, target, 12, 0);
    graph.set_reference(block, 12, reference).unwrap();

    let r_block = graph.add_block(BlockKind::Data, 8, "r");
    graph.set_block_address(r_block, RelativeAddress::new(200), section).unwrap();
    let referrer_reference = Reference::new(ReferenceType::Relative, 4, block, 4, 10);
    graph.set_reference(r_block, 4, referrer_reference).unwrap();

    graph.insert_data(block, 8, 4, true).unwrap();

    let b = graph.get_block_by_id(block).unwrap();
    assert_eq!(b.size(), 24);
    assert!(b.has_label(14));
    assert!(!b.has_label(10));
    assert_eq!(b.get_reference(16).unwrap().offset(), 16);

    let r = graph.get_block_by_id(r_block).unwrap();
    assert_eq!(r.get_reference(4).unwrap().base(), 14);
}
