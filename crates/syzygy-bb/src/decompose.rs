//! The basic-block decomposition pipeline: re-disassembles one
//! already-placed code block into a typed `BasicBlockSubGraph`.
//!
//! Basic-block boundaries are computed with the classic leader
//! algorithm rather than threaded incrementally through the walk: a
//! leader is offset 0, the end of the block, every code/data label
//! offset, every resolvable branch target, and the instruction
//! immediately following any branch or return. Carving runs between
//! consecutive leaders and classifying each run (data span, tiled
//! exactly by instructions, or neither) folds the disassemble, carve-
//! data, fill-gaps, and split-at-jump-targets passes into a single pass
//! over the boundary list; propagating references onto the resulting
//! blocks and building successors remain separate passes.

use std::collections::{BTreeMap, BTreeSet};

use syzygy_block_graph::{Block, BlockGraph, BlockId, BlockKind, Offset, Reference};
use syzygy_disasm::{
    walk, DecodedInstruction, Diagnostic, Directive, FlowControl, InstructionDecoder, WalkObserver,
    WalkResult,
};

use crate::basic_block::{BasicBlock, BasicBlockKind, Instruction};
use crate::error::{Error, Result};
use crate::ids::BasicBlockId;
use crate::options::Options;
use crate::subgraph::BasicBlockSubGraph;
use crate::successor::{Condition, Successor, SuccessorTarget};

struct Edge {
    offset: u32,
    size: u8,
    disp_size: u8,
    dest: u32,
    conditional: bool,
}

struct DiscoverObserver {
    instructions: BTreeMap<u32, DecodedInstruction>,
    edges: Vec<Edge>,
    indirect: Vec<u32>,
}

impl WalkObserver for DiscoverObserver {
    fn on_instruction(&mut self, addr: u32, inst: &DecodedInstruction) -> Directive {
        self.instructions.insert(addr, inst.clone());
        if matches!(
            inst.flow_control,
            FlowControl::ConditionalBranch | FlowControl::UnconditionalBranch
        ) && inst.pc_relative_displacement().is_none()
        {
            self.indirect.push(addr);
        }
        Directive::Continue
    }

    fn on_branch_instruction(&mut self, addr: u32, inst: &DecodedInstruction, dest: u32) {
        let disp_size = inst.operands[0].size.max(1);
        self.edges.push(Edge {
            offset: addr,
            size: inst.size,
            disp_size,
            dest,
            conditional: inst.flow_control == FlowControl::ConditionalBranch,
        });
    }
}

/// Decompose the code block `block_id` (already placed in `graph`) into a
/// basic-block sub-graph.
pub fn decompose_basic_blocks(
    graph: &BlockGraph,
    block_id: BlockId,
    decoder: &dyn InstructionDecoder,
    options: &Options,
) -> Result<(BasicBlockSubGraph, Vec<Diagnostic>)> {
    let block = graph.get_block_by_id(block_id).ok_or(Error::UnplacedBlock)?;
    if block.kind() != BlockKind::Code {
        return Err(Error::NotCodeBlock);
    }
    let addr = block.addr().ok_or(Error::UnplacedBlock)?;
    let size = block.size();

    let mut sub = BasicBlockSubGraph::new(block_id);
    let mut diagnostics = Vec::new();

    if size == 0 {
        return Ok((sub, diagnostics));
    }

    let mut code = block.data().map(|d| d.to_vec()).unwrap_or_default();
    code.resize(size as usize, 0);

    let code_labels: Vec<u32> = block
        .labels()
        .filter(|(_, l)| l.is_code())
        .map(|(o, _)| o as u32)
        .collect();
    let data_labels: Vec<u32> = block
        .labels()
        .filter(|(_, l)| l.is_data())
        .map(|(o, _)| o as u32)
        .collect();
    let mut all_label_offsets: Vec<u32> = block.labels().map(|(o, _)| o as u32).collect();
    all_label_offsets.sort();
    all_label_offsets.dedup();

    let seeds: Vec<u32> = if code_labels.is_empty() {
        vec![0]
    } else {
        code_labels.clone()
    };

    let mut observer = DiscoverObserver {
        instructions: BTreeMap::new(),
        edges: Vec::new(),
        indirect: Vec::new(),
    };
    let result = walk(decoder, &code, 0, seeds, &mut observer);
    match result {
        WalkResult::Success | WalkResult::Terminated => {}
        WalkResult::Incomplete => diagnostics.push(Diagnostic::warning(
            "incomplete basic-block disassembly",
            Some(addr.value()),
        )),
        WalkResult::WalkError => diagnostics.push(Diagnostic::error(
            "basic-block disassembly error",
            Some(addr.value()),
        )),
    }
    for &offset in &observer.indirect {
        diagnostics.push(Diagnostic::warning(
            "indirect branch has no resolvable target",
            Some(addr.value().wrapping_add(offset)),
        ));
    }

    // Data spans run from a DATA label to the next label of either kind,
    // or to the end of the block.
    let mut data_spans: Vec<(u32, u32)> = Vec::new();
    for &start in &data_labels {
        let end = all_label_offsets.iter().copied().find(|&o| o > start).unwrap_or(size);
        let overlaps_instructions = observer.instructions.range(start..end).next().is_some();
        if overlaps_instructions {
            diagnostics.push(Diagnostic::warning(
                "data label range overlaps decoded instructions; ignoring",
                Some(addr.value().wrapping_add(start)),
            ));
            continue;
        }
        data_spans.push((start, end));
    }
    data_spans.sort();

    // An inbound referrer can target any offset in this block (another
    // block jumping or calling into the middle of it), not just a
    // labeled one; such an offset is a leader too.
    let referrer_target_offsets: Vec<u32> = block
        .referrers()
        .filter_map(|&(source_block, source_offset)| {
            graph
                .get_block_by_id(source_block)
                .and_then(|b| b.get_reference(source_offset))
                .map(|r| r.base())
        })
        .filter(|&o| o >= 0)
        .map(|o| o as u32)
        .collect();

    // Leaders: positions that must start a new basic block.
    let mut leaders: BTreeSet<u32> = BTreeSet::new();
    leaders.insert(0);
    leaders.insert(size);
    for &o in &code_labels {
        leaders.insert(o);
    }
    for &o in &referrer_target_offsets {
        if o < size {
            leaders.insert(o);
        }
    }
    for &(start, end) in &data_spans {
        leaders.insert(start);
        leaders.insert(end);
    }
    for edge in &observer.edges {
        if edge.dest < size {
            leaders.insert(edge.dest);
        }
        let after = edge.offset + edge.size as u32;
        if after < size {
            leaders.insert(after);
        }
    }
    for (&offset, inst) in &observer.instructions {
        if matches!(inst.flow_control, FlowControl::Return | FlowControl::Syscall) {
            let after = offset + inst.size as u32;
            if after < size {
                leaders.insert(after);
            }
        }
    }

    let boundaries: Vec<u32> = leaders.into_iter().collect();

    // Carve a basic-block span between each pair of consecutive leaders.
    let mut spans: Vec<(u32, u32, BasicBlockKind)> = Vec::new();
    for window in boundaries.windows(2) {
        let (start, end) = (window[0], window[1]);
        if start == end {
            continue;
        }
        if data_spans.iter().any(|&(ds, de)| ds == start && de == end) {
            spans.push((start, end, BasicBlockKind::Data));
            continue;
        }

        let mut cursor = start;
        let mut any = false;
        while cursor < end {
            match observer.instructions.get(&cursor) {
                Some(inst) => {
                    cursor += inst.size as u32;
                    any = true;
                }
                None => break,
            }
        }
        if any && cursor == end {
            spans.push((start, end, BasicBlockKind::Code));
        } else if any {
            diagnostics.push(Diagnostic::warning(
                "instruction run does not exactly tile its basic block",
                Some(addr.value().wrapping_add(start)),
            ));
            spans.push((start, cursor, BasicBlockKind::Code));
            spans.push((cursor, end, BasicBlockKind::Padding));
        } else {
            spans.push((start, end, BasicBlockKind::Padding));
        }
    }

    let mut bb_by_offset: BTreeMap<u32, BasicBlockId> = BTreeMap::new();
    for &(start, end, kind) in &spans {
        let id = sub.next_id();
        let bytes = code[start as usize..end as usize].to_vec();
        let mut bb = BasicBlock::new(id, kind, start, bytes);
        if kind == BasicBlockKind::Code {
            let mut cursor = start;
            while cursor < end {
                if let Some(inst) = observer.instructions.get(&cursor) {
                    bb.push_instruction(Instruction {
                        offset: cursor,
                        decoded: inst.clone(),
                    });
                    cursor += inst.size as u32;
                } else {
                    break;
                }
            }
        }
        sub.add_basic_block(bb);
        bb_by_offset.insert(start, id);
    }

    for &(start, end, kind) in &spans {
        if kind != BasicBlockKind::Code {
            continue;
        }
        let id = bb_by_offset[&start];
        let (last_offset, last) = match observer.instructions.range(start..end).next_back() {
            Some((&o, inst)) => (o, inst),
            None => continue,
        };
        let successors = build_successors(
            block,
            &observer.edges,
            last_offset,
            last,
            end,
            size,
            &sub,
            &bb_by_offset,
            &mut diagnostics,
        );
        sub.get_mut(id).unwrap().set_successors(successors);
    }

    // Propagate references/referrers onto whichever basic block covers
    // their offset.
    for (offset, reference) in block.references() {
        if let Some(id) = find_bb_for_offset(&sub, &bb_by_offset, offset as u32) {
            sub.get_mut(id).unwrap().push_outgoing_reference(offset, *reference);
        }
    }
    for &(source_block, source_offset) in block.referrers() {
        let target_offset = graph
            .get_block_by_id(source_block)
            .and_then(|b| b.get_reference(source_offset))
            .map(|r| r.base());
        if let Some(target_offset) = target_offset {
            if let Some(id) = find_bb_for_offset(&sub, &bb_by_offset, target_offset as u32) {
                sub.get_mut(id)
                    .unwrap()
                    .push_incoming_referrer((source_block, source_offset));
            }
        }
    }

    if options.check_decomposition_results {
        validate_subgraph(&sub, block, size, &mut diagnostics);
    }

    Ok((sub, diagnostics))
}

fn find_bb_for_offset(
    sub: &BasicBlockSubGraph,
    bb_by_offset: &BTreeMap<u32, BasicBlockId>,
    offset: u32,
) -> Option<BasicBlockId> {
    bb_by_offset
        .range(..=offset)
        .next_back()
        .map(|(_, &id)| id)
        .filter(|&id| {
            let bb = sub.get(id).unwrap();
            offset < bb.offset() + bb.size()
        })
}

#[allow(clippy::too_many_arguments)]
fn build_successors(
    block: &Block,
    edges: &[Edge],
    last_offset: u32,
    last: &DecodedInstruction,
    run_end: u32,
    block_size: u32,
    sub: &BasicBlockSubGraph,
    bb_by_offset: &BTreeMap<u32, BasicBlockId>,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<Successor> {
    let mut out = Vec::new();
    match last.flow_control {
        FlowControl::Return | FlowControl::Syscall => {}

        FlowControl::UnconditionalBranch | FlowControl::ConditionalBranch => {
            match edges.iter().find(|e| e.offset == last_offset) {
                Some(edge) => {
                    let target = resolve_branch_target(block, edge, block_size, sub, bb_by_offset, diagnostics);
                    let condition = if edge.conditional { Condition::Branch } else { Condition::Always };
                    out.push(Successor::new(condition, target, edge.offset, edge.size));

                    if edge.conditional {
                        let fallthrough_offset = edge.offset + edge.size as u32;
                        let target = if fallthrough_offset < block_size {
                            match find_bb_for_offset(sub, bb_by_offset, fallthrough_offset) {
                                Some(id) => SuccessorTarget::Resolved(id),
                                None => SuccessorTarget::Unresolved,
                            }
                        } else {
                            SuccessorTarget::Unresolved
                        };
                        out.push(Successor::new(Condition::Inverse, target, fallthrough_offset, 0));
                    }
                }
                None => {
                    out.push(Successor::new(
                        Condition::Always,
                        SuccessorTarget::Unresolved,
                        last_offset,
                        last.size,
                    ));
                }
            }
        }

        FlowControl::None | FlowControl::Call | FlowControl::Cmov | FlowControl::Interrupt => {
            // The run ends here without the instruction itself
            // terminating flow control; normally prevented by the macro
            // decomposer's fall-through merge pass, handled defensively
            // in case basic-block decomposition runs standalone.
            let target = if run_end < block_size {
                match find_bb_for_offset(sub, bb_by_offset, run_end) {
                    Some(id) => SuccessorTarget::Resolved(id),
                    None => SuccessorTarget::Unresolved,
                }
            } else {
                SuccessorTarget::Unresolved
            };
            out.push(Successor::new(Condition::Always, target, last_offset, last.size));
        }
    }
    out
}

fn resolve_branch_target(
    block: &Block,
    edge: &Edge,
    block_size: u32,
    sub: &BasicBlockSubGraph,
    bb_by_offset: &BTreeMap<u32, BasicBlockId>,
    diagnostics: &mut Vec<Diagnostic>,
) -> SuccessorTarget {
    if edge.dest < block_size {
        match find_bb_for_offset(sub, bb_by_offset, edge.dest) {
            Some(id) => SuccessorTarget::Resolved(id),
            None => {
                diagnostics.push(Diagnostic::warning(
                    "branch target does not land on a basic-block boundary",
                    Some(edge.dest),
                ));
                SuccessorTarget::Unresolved
            }
        }
    } else {
        let source_offset = (edge.offset + edge.size as u32 - edge.disp_size as u32) as Offset;
        match block.get_reference(source_offset) {
            Some(r) => SuccessorTarget::External(*r),
            None => SuccessorTarget::Unresolved,
        }
    }
}

fn validate_subgraph(sub: &BasicBlockSubGraph, block: &Block, size: u32, diagnostics: &mut Vec<Diagnostic>) {
    let mut covered = 0u32;
    let mut starts: Vec<u32> = Vec::new();
    for bb in sub.basic_blocks() {
        covered += bb.size();
        starts.push(bb.offset());
    }
    if covered != size {
        diagnostics.push(Diagnostic::error(
            format!("basic-block coverage gap: {} of {} bytes covered", covered, size),
            None,
        ));
    }
    starts.sort();
    for (offset, label) in block.labels() {
        if (label.is_code() || label.is_data()) && starts.binary_search(&(offset as u32)).is_err() {
            diagnostics.push(Diagnostic::error(
                "label offset is not preserved as a basic-block boundary",
                Some(offset as u32),
            ));
        }
    }
    for bb in sub.basic_blocks() {
        for successor in bb.successors() {
            if let SuccessorTarget::Resolved(target) = &successor.target {
                if sub.get(*target).is_none() {
                    diagnostics.push(Diagnostic::error(
                        "successor resolves to a basic block that doesn't exist",
                        Some(bb.offset()),
                    ));
                }
            }
        }
    }
}
