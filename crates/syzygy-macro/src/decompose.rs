//! The macro decomposition pipeline: turns image bytes and symbol
//! information into a populated `BlockGraph`.
//!
//! `decompose` sequences a fixed series of private helpers: sections,
//! then function/thunk/data/contribution blocks, then gap filling,
//! global labels, fixup-derived references, disassembly, padding
//! detection, static-initializer grouping, and non-returning overrides.
//! Anything the pipeline can recover from (an unresolved branch target,
//! a fixup with no enclosing block) is reported as a `Diagnostic` rather
//! than aborting; only the three conditions `error::Error` enumerates
//! make the output meaningless enough to bail out on entirely.

use std::collections::HashSet;

use log::trace;
use syzygy_address::{AddressRange, RelativeAddress};
use syzygy_block_graph::{
    Block, BlockAttributes, BlockGraph, BlockId, BlockKind, InternedString, Label,
    LabelAttributes, Offset, Reference, ReferenceType, SectionId,
};
use syzygy_disasm::{
    walk, ControlFlow, DecodedInstruction, Diagnostic, Directive, FlowControl, InstructionDecoder,
    WalkObserver, WalkResult,
};

use crate::collaborators::{ImageSource, SymbolSource};
use crate::error::{Error, Result};
use crate::options::Options;

const IMAGE_SCN_CNT_CODE: u32 = 0x0000_0020;

fn section_kind(characteristics: u32) -> BlockKind {
    if characteristics & IMAGE_SCN_CNT_CODE != 0 {
        BlockKind::Code
    } else {
        BlockKind::Data
    }
}

fn default_size_for(ref_type: ReferenceType) -> u8 {
    match ref_type {
        ReferenceType::PcRelative => 4,
        ReferenceType::Absolute | ReferenceType::Relative | ReferenceType::FileOffset => 4,
        ReferenceType::SectionRef => 2,
        ReferenceType::SectionOffsetRef => 4,
    }
}

/// Decompose `image`/`symbols` into a populated block graph. Returns the
/// graph plus any non-fatal diagnostics raised along the way.
pub fn decompose(
    image: &dyn ImageSource,
    symbols: &dyn SymbolSource,
    decoder: &dyn InstructionDecoder,
    options: &Options,
) -> Result<(BlockGraph, Vec<Diagnostic>)> {
    let mut graph = BlockGraph::new();
    let mut diagnostics = Vec::new();

    let section_ids = create_sections(&mut graph, image);

    // Header blocks (step 2) are the image source's responsibility: this
    // core has no PE-layout knowledge of its own to parse them with.
    trace!("skipping header-block creation; out of this core's scope");

    create_function_and_thunk_blocks(&mut graph, image, symbols, &section_ids, &mut diagnostics)?;
    create_data_blocks(&mut graph, image, symbols, &section_ids, &mut diagnostics)?;
    create_contribution_blocks(&mut graph, image, symbols, &section_ids, &mut diagnostics)?;
    fill_gap_blocks(&mut graph, image, &section_ids);
    populate_block_data(&mut graph, image);
    create_global_labels(&mut graph, symbols, &mut diagnostics);

    let visited = create_references_from_fixups(&mut graph, symbols, &mut diagnostics)?;
    validate_relocations_covered(image, symbols, &visited, &mut diagnostics);

    disassemble_code_blocks(&mut graph, decoder, &mut diagnostics);
    mark_padding_blocks(&mut graph);

    group_static_initializers(&mut graph, symbols, options, &mut diagnostics);
    apply_non_returning_overrides(&mut graph, options);

    Ok((graph, diagnostics))
}

fn create_sections(graph: &mut BlockGraph, image: &dyn ImageSource) -> Vec<SectionId> {
    image
        .sections()
        .iter()
        .map(|s| graph.add_section(&s.name, s.characteristics))
        .collect()
}

fn section_index_for(image: &dyn ImageSource, addr: RelativeAddress) -> Option<usize> {
    image.sections().iter().position(|s| {
        s.vsize > 0 && addr.value() >= s.vaddr.value() && addr.value() < s.vaddr.value() + s.vsize
    })
}

/// Place a named symbol as a new block, or attach it as a label on the
/// block that already covers its range. A range overlapping an existing
/// block without being contained by it indicates inconsistent debug
/// information and is a hard error.
fn place_or_label_symbol(
    graph: &mut BlockGraph,
    image: &dyn ImageSource,
    section_ids: &[SectionId],
    addr: RelativeAddress,
    size: u32,
    name: &str,
    kind: BlockKind,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<Option<BlockId>> {
    let section_index = match section_index_for(image, addr) {
        Some(index) => index,
        None => return Err(Error::SymbolOutsideSection(addr)),
    };

    if size == 0 {
        if let Some(existing) = graph.find_block_containing(addr) {
            attach_named_label(graph, existing, addr, name, kind)?;
        } else {
            diagnostics.push(Diagnostic::warning(
                format!("zero-size symbol '{}' has no enclosing block", name),
                Some(addr.value()),
            ));
        }
        return Ok(None);
    }

    let range = AddressRange::new(addr, size);
    let hits = graph.find_blocks_intersecting(range);

    if hits.is_empty() {
        let id = graph.add_block(kind, size, name);
        graph.set_block_address(id, addr, section_ids[section_index])?;
        let interned = graph.intern(name);
        let attrs = if kind == BlockKind::Code {
            LabelAttributes::CODE
        } else {
            LabelAttributes::DATA
        };
        if let Some(label) = Label::new(interned, attrs) {
            let _ = graph.set_label(id, 0, label);
        }
        return Ok(Some(id));
    }

    if hits.len() == 1 {
        let existing = hits[0];
        let existing_range = {
            let b = graph.get_block_by_id(existing).unwrap();
            AddressRange::new(b.addr().unwrap(), b.size().max(1))
        };
        if existing_range.contains(&range) {
            attach_named_label(graph, existing, addr, name, kind)?;
            return Ok(Some(existing));
        }
    }

    Err(Error::OverlapNotContainment(addr))
}

fn attach_named_label(
    graph: &mut BlockGraph,
    block: BlockId,
    addr: RelativeAddress,
    name: &str,
    kind: BlockKind,
) -> Result<()> {
    let block_addr = graph.get_block_by_id(block).unwrap().addr().unwrap();
    let offset = (addr - block_addr) as Offset;
    if graph.get_block_by_id(block).unwrap().has_label(offset) {
        return Ok(());
    }
    let interned = graph.intern(name);
    let attrs = if kind == BlockKind::Code {
        LabelAttributes::CODE
    } else {
        LabelAttributes::DATA
    };
    if let Some(label) = Label::new(interned, attrs) {
        graph.set_label(block, offset, label)?;
    }
    Ok(())
}

fn create_function_and_thunk_blocks(
    graph: &mut BlockGraph,
    image: &dyn ImageSource,
    symbols: &dyn SymbolSource,
    section_ids: &[SectionId],
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<()> {
    for f in symbols.functions() {
        let id = place_or_label_symbol(
            graph,
            image,
            section_ids,
            f.addr,
            f.size,
            &f.name,
            BlockKind::Code,
            diagnostics,
        )?;
        if let Some(id) = id {
            if f.non_returning {
                graph
                    .get_block_by_id_mut(id)
                    .unwrap()
                    .insert_attributes(BlockAttributes::NON_RETURNING_FUNCTION);
            }
        }
        for label in symbols.labels_in(f.addr) {
            if let Some(block) = graph.find_block_containing(label.addr) {
                attach_named_label(graph, block, label.addr, &label.name, BlockKind::Code)?;
            }
        }
    }

    for t in symbols.thunks() {
        let id = place_or_label_symbol(
            graph,
            image,
            section_ids,
            t.addr,
            t.size,
            &t.name,
            BlockKind::Code,
            diagnostics,
        )?;
        if let Some(id) = id {
            graph
                .get_block_by_id_mut(id)
                .unwrap()
                .insert_attributes(BlockAttributes::THUNK);
        }
    }
    Ok(())
}

fn create_data_blocks(
    graph: &mut BlockGraph,
    image: &dyn ImageSource,
    symbols: &dyn SymbolSource,
    section_ids: &[SectionId],
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<()> {
    for d in symbols.data_symbols() {
        place_or_label_symbol(
            graph,
            image,
            section_ids,
            d.addr,
            d.size,
            &d.name,
            BlockKind::Data,
            diagnostics,
        )?;
    }
    Ok(())
}

fn create_contribution_blocks(
    graph: &mut BlockGraph,
    image: &dyn ImageSource,
    symbols: &dyn SymbolSource,
    section_ids: &[SectionId],
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<()> {
    for c in symbols.section_contributions() {
        let header = match image.sections().get(c.section_index) {
            Some(header) => header,
            None => {
                diagnostics.push(Diagnostic::warning(
                    format!(
                        "section contribution references unknown section {}",
                        c.section_index
                    ),
                    Some(c.addr.value()),
                ));
                continue;
            }
        };
        let section_id = match section_ids.get(c.section_index) {
            Some(&id) => id,
            None => continue,
        };
        if c.size == 0 {
            continue;
        }
        let range = AddressRange::new(c.addr, c.size);
        if !graph.find_blocks_intersecting(range).is_empty() {
            continue;
        }
        let kind = section_kind(header.characteristics);
        let id = graph.add_block(kind, c.size, "");
        graph.set_block_address(id, c.addr, section_id)?;
        graph
            .get_block_by_id_mut(id)
            .unwrap()
            .insert_attributes(BlockAttributes::SECTION_CONTRIBUTION);
    }
    Ok(())
}

fn fill_gap_blocks(graph: &mut BlockGraph, image: &dyn ImageSource, section_ids: &[SectionId]) {
    for (index, header) in image.sections().iter().enumerate() {
        if header.vsize == 0 {
            continue;
        }
        let section_id = section_ids[index];
        let section_range = AddressRange::new(header.vaddr, header.vsize);

        let mut covered: Vec<AddressRange<RelativeAddress>> = graph
            .find_blocks_intersecting(section_range)
            .into_iter()
            .filter_map(|id| {
                let b = graph.get_block_by_id(id).unwrap();
                let addr = b.addr()?;
                if b.size() == 0 {
                    None
                } else {
                    Some(AddressRange::new(addr, b.size()))
                }
            })
            .collect();
        covered.sort();

        let kind = section_kind(header.characteristics);
        let mut cursor = header.vaddr;
        for range in &covered {
            if range.start() > cursor {
                let gap_size = (range.start() - cursor) as u32;
                add_gap_block(graph, cursor, gap_size, section_id, kind);
            }
            if range.end() > cursor {
                cursor = range.end();
            }
        }
        if section_range.end() > cursor {
            let gap_size = (section_range.end() - cursor) as u32;
            add_gap_block(graph, cursor, gap_size, section_id, kind);
        }
    }
}

fn add_gap_block(
    graph: &mut BlockGraph,
    addr: RelativeAddress,
    size: u32,
    section_id: SectionId,
    kind: BlockKind,
) {
    if size == 0 {
        return;
    }
    let id = graph.add_block(kind, size, "");
    if graph.set_block_address(id, addr, section_id).is_ok() {
        graph
            .get_block_by_id_mut(id)
            .unwrap()
            .insert_attributes(BlockAttributes::GAP_BLOCK);
    }
}

/// Copy each addressed block's bytes out of the image and into the block
/// graph, so disassembly and provenance tracking operate on real data
/// rather than the zero-filled default.
fn populate_block_data(graph: &mut BlockGraph, image: &dyn ImageSource) {
    let ids: Vec<BlockId> = graph
        .blocks()
        .filter(|b| b.addr().is_some() && b.size() > 0)
        .map(Block::id)
        .collect();
    for id in ids {
        let (addr, size) = {
            let b = graph.get_block_by_id(id).unwrap();
            (b.addr().unwrap(), b.size())
        };
        if let Some(bytes) = image.bytes_at(addr, size) {
            let _ = graph.get_block_by_id_mut(id).unwrap().set_data(bytes);
        }
    }
}

fn create_global_labels(
    graph: &mut BlockGraph,
    symbols: &dyn SymbolSource,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for label in symbols.global_labels() {
        match graph.find_block_containing(label.addr) {
            Some(block) => {
                let kind = graph.get_block_by_id(block).unwrap().kind();
                let _ = attach_named_label(graph, block, label.addr, &label.name, kind);
            }
            None => diagnostics.push(Diagnostic::warning(
                format!("global label '{}' has no enclosing block", label.name),
                Some(label.addr.value()),
            )),
        }
    }

    // Public symbols only get a synthesized label when nothing already
    // marks the offset; merging PUBLIC_SYMBOL onto an existing label
    // would need a label-attribute setter `Block` doesn't expose, since
    // labels are otherwise immutable once placed.
    for p in symbols.public_symbols() {
        if let Some(block) = graph.find_block_containing(p.addr) {
            let (block_addr, kind, already_labeled) = {
                let b = graph.get_block_by_id(block).unwrap();
                let addr = b.addr().unwrap();
                let offset = (p.addr - addr) as Offset;
                (addr, b.kind(), b.has_label(offset))
            };
            if !already_labeled {
                let offset = (p.addr - block_addr) as Offset;
                let interned = graph.intern(&p.name);
                let base = if kind == BlockKind::Code {
                    LabelAttributes::CODE
                } else {
                    LabelAttributes::DATA
                };
                if let Some(label) = Label::new(interned, base | LabelAttributes::PUBLIC_SYMBOL) {
                    let _ = graph.set_label(block, offset, label);
                }
            }
        }
    }
}

fn translate_through_omap(
    omap: Option<&[(RelativeAddress, RelativeAddress)]>,
    addr: RelativeAddress,
) -> RelativeAddress {
    let omap = match omap {
        Some(omap) => omap,
        None => return addr,
    };
    let mut best: Option<(RelativeAddress, RelativeAddress)> = None;
    for &(src, dst) in omap {
        if src <= addr && best.map_or(true, |(best_src, _)| src >= best_src) {
            best = Some((src, dst));
        }
    }
    match best {
        Some((src, dst)) => {
            let delta = dst.value() as i64 - src.value() as i64;
            RelativeAddress::new((addr.value() as i64 + delta) as u32)
        }
        None => addr,
    }
}

/// Create references (and code labels at their targets) from every fixup,
/// returning the set of fixup locations successfully installed. Fixups
/// are the authoritative list of references, already resolved to a
/// target relative address by the collaborator, so installing one is a
/// matter of finding the source and target blocks and delegating to
/// `BlockGraph::set_reference`.
fn create_references_from_fixups(
    graph: &mut BlockGraph,
    symbols: &dyn SymbolSource,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<HashSet<RelativeAddress>> {
    let omap = symbols.omap();
    let mut visited = HashSet::new();

    for fixup in symbols.fixups() {
        let location = translate_through_omap(omap, fixup.location);
        let target = translate_through_omap(omap, fixup.base);

        let source = match graph.find_block_containing(location) {
            Some(block) => block,
            None => {
                diagnostics.push(Diagnostic::warning(
                    "fixup has no enclosing source block",
                    Some(location.value()),
                ));
                continue;
            }
        };
        let target_block = match graph.find_block_containing(target) {
            Some(block) => block,
            None => {
                diagnostics.push(Diagnostic::warning(
                    "fixup targets an address with no enclosing block",
                    Some(location.value()),
                ));
                continue;
            }
        };

        let size = default_size_for(fixup.ref_type);
        if !fixup.ref_type.size_allowed(size) {
            // Defensive: every `ReferenceType` variant has a representable
            // default width above, so this can't actually trigger today.
            return Err(Error::UnknownFixupType(fixup.location));
        }

        let (source_addr, target_addr) = {
            let s = graph.get_block_by_id(source).unwrap().addr().unwrap();
            let t = graph.get_block_by_id(target_block).unwrap().addr().unwrap();
            (s, t)
        };
        let local_offset = (location - source_addr) as Offset;
        let target_offset = (target - target_addr) as Offset;

        let reference = Reference::new(fixup.ref_type, size, target_block, target_offset, target_offset)
            .with_from_relocation(true);

        match graph.set_reference(source, local_offset, reference) {
            Ok(_) => {
                visited.insert(fixup.location);
            }
            Err(e) => diagnostics.push(Diagnostic::warning(
                format!("fixup could not be installed as a reference: {}", e),
                Some(location.value()),
            )),
        }

        if fixup.refers_to_code {
            let already_labeled = graph
                .get_block_by_id(target_block)
                .unwrap()
                .has_label(target_offset);
            if !already_labeled {
                if let Some(label) = Label::new(InternedString::empty(), LabelAttributes::CODE) {
                    let _ = graph.set_label(target_block, target_offset, label);
                }
            }
        }
    }

    Ok(visited)
}

fn validate_relocations_covered(
    image: &dyn ImageSource,
    symbols: &dyn SymbolSource,
    visited: &HashSet<RelativeAddress>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let fixup_locations: HashSet<RelativeAddress> =
        symbols.fixups().iter().map(|f| f.location).collect();
    for &(location, _) in image.relocs() {
        if !fixup_locations.contains(&location) {
            diagnostics.push(Diagnostic::warning(
                "relocation has no corresponding fixup",
                Some(location.value()),
            ));
        }
    }
    for fixup in symbols.fixups() {
        if !visited.contains(&fixup.location) {
            diagnostics.push(Diagnostic::warning(
                "fixup was never installed as a reference",
                Some(fixup.location.value()),
            ));
        }
    }
}

/// Observes a single code block's walk, installing branch references and
/// code labels as it goes, and flagging candidates for cross-block
/// merges: short (single-byte-displacement) branches, and control flow
/// that runs off the end of its block.
struct MacroObserver<'g> {
    graph: &'g mut BlockGraph,
    block: BlockId,
    block_addr: RelativeAddress,
    diagnostics: Vec<Diagnostic>,
    last_addr: Option<u32>,
    merge_candidates: Vec<(RelativeAddress, RelativeAddress)>,
    fell_off_end: bool,
}

impl<'g> WalkObserver for MacroObserver<'g> {
    fn on_instruction(&mut self, addr: u32, _inst: &DecodedInstruction) -> Directive {
        self.last_addr = Some(addr);
        Directive::Continue
    }

    fn on_branch_instruction(&mut self, addr: u32, inst: &DecodedInstruction, dest: u32) {
        let dest_addr = RelativeAddress::new(dest);
        let target_block = match self.graph.find_block_containing(dest_addr) {
            Some(block) => block,
            None => {
                self.diagnostics.push(Diagnostic::warning(
                    "branch target has no enclosing block",
                    Some(addr),
                ));
                return;
            }
        };
        let target_block_addr = self.graph.get_block_by_id(target_block).unwrap().addr().unwrap();
        let target_offset = (dest_addr - target_block_addr) as Offset;
        let disp_size = inst.operands[0].size.max(1);
        let source_offset = (addr + inst.size as u32 - disp_size as u32 - self.block_addr.value()) as Offset;

        let existing = self.graph.get_reference(self.block, source_offset).copied();
        match existing {
            Some(r) if r.referenced() == target_block && r.offset() == target_offset => {}
            Some(_) => {
                self.diagnostics.push(Diagnostic::warning(
                    "branch disagrees with a fixup-derived reference at the same offset",
                    Some(addr),
                ));
            }
            None => {
                let reference =
                    Reference::new(ReferenceType::PcRelative, disp_size, target_block, target_offset, target_offset);
                if let Err(e) = self.graph.set_reference(self.block, source_offset, reference) {
                    self.diagnostics.push(Diagnostic::warning(
                        format!("could not install branch reference: {}", e),
                        Some(addr),
                    ));
                }
            }
        }

        if target_block != self.block {
            let is_code = self.graph.get_block_by_id(target_block).unwrap().kind() == BlockKind::Code;
            let already_labeled = self.graph.get_block_by_id(target_block).unwrap().has_label(target_offset);
            if is_code && !already_labeled {
                let label_name = format!("from_{:#x}", addr);
                let interned = self.graph.intern(&label_name);
                if let Some(label) = Label::new(interned, LabelAttributes::CODE) {
                    let _ = self.graph.set_label(target_block, target_offset, label);
                }
            }
            if disp_size == 1 {
                self.merge_candidates.push((self.block_addr, target_block_addr));
            }
        }
    }

    fn on_end_instruction_run(
        &mut self,
        _run_start: u32,
        last_inst: Option<&DecodedInstruction>,
        control_flow: ControlFlow,
    ) {
        if control_flow != ControlFlow::Terminates {
            return;
        }
        let (inst, last_addr) = match (last_inst, self.last_addr) {
            (Some(inst), Some(addr)) => (inst, addr),
            _ => return,
        };
        let ran_off_end = matches!(
            inst.flow_control,
            FlowControl::None | FlowControl::Call | FlowControl::Cmov | FlowControl::Interrupt
        );
        if !ran_off_end {
            return;
        }
        let end = last_addr + inst.size as u32;
        let block_size = self.graph.get_block_by_id(self.block).unwrap().size();
        if end >= self.block_addr.value() + block_size {
            self.fell_off_end = true;
        }
    }
}

fn disassemble_code_blocks(
    graph: &mut BlockGraph,
    decoder: &dyn InstructionDecoder,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let code_block_ids: Vec<BlockId> = graph
        .blocks()
        .filter(|b| b.kind() == BlockKind::Code && b.size() > 0 && b.addr().is_some())
        .map(Block::id)
        .collect();

    let mut merge_candidates: Vec<(RelativeAddress, RelativeAddress)> = Vec::new();

    for block_id in code_block_ids {
        let (addr, size) = {
            let b = graph.get_block_by_id(block_id).unwrap();
            (b.addr().unwrap(), b.size())
        };
        let mut code = graph
            .get_block_by_id(block_id)
            .unwrap()
            .data()
            .map(|d| d.to_vec())
            .unwrap_or_default();
        code.resize(size as usize, 0);

        let result;
        let fell_off_end;
        {
            let mut observer = MacroObserver {
                graph,
                block: block_id,
                block_addr: addr,
                diagnostics: Vec::new(),
                last_addr: None,
                merge_candidates: Vec::new(),
                fell_off_end: false,
            };
            result = walk(decoder, &code, addr.value(), vec![addr.value()], &mut observer);
            diagnostics.append(&mut observer.diagnostics);
            merge_candidates.append(&mut observer.merge_candidates);
            fell_off_end = observer.fell_off_end;
        }

        match result {
            WalkResult::Success | WalkResult::Terminated => {}
            WalkResult::Incomplete => {
                graph
                    .get_block_by_id_mut(block_id)
                    .unwrap()
                    .insert_attributes(BlockAttributes::INCOMPLETE_DISASSEMBLY);
                diagnostics.push(Diagnostic::warning(
                    "incomplete disassembly",
                    Some(addr.value()),
                ));
            }
            WalkResult::WalkError => {
                graph
                    .get_block_by_id_mut(block_id)
                    .unwrap()
                    .insert_attributes(BlockAttributes::ERRORED_DISASSEMBLY);
                diagnostics.push(Diagnostic::error("disassembly error", Some(addr.value())));
            }
        }

        if fell_off_end {
            graph
                .get_block_by_id_mut(block_id)
                .unwrap()
                .insert_attributes(BlockAttributes::DISASSEMBLED_PAST_END);
            if let Some(next) = graph.find_block_containing(addr + size) {
                let next_addr = graph.get_block_by_id(next).unwrap().addr().unwrap();
                merge_candidates.push((addr, next_addr));
            }
        }
    }

    perform_scheduled_merges(graph, merge_candidates);
}

fn perform_scheduled_merges(graph: &mut BlockGraph, candidates: Vec<(RelativeAddress, RelativeAddress)>) {
    for (a, b) in candidates {
        let (block_a, block_b) = match (graph.find_block_containing(a), graph.find_block_containing(b)) {
            (Some(a), Some(b)) => (a, b),
            _ => continue,
        };
        if block_a == block_b {
            continue;
        }
        let (addr_a, size_a) = {
            let ba = graph.get_block_by_id(block_a).unwrap();
            (ba.addr().unwrap(), ba.size())
        };
        let (addr_b, size_b) = {
            let bb = graph.get_block_by_id(block_b).unwrap();
            (bb.addr().unwrap(), bb.size())
        };
        let start = addr_a.min(addr_b);
        let end = (addr_a + size_a).max(addr_b + size_b);
        let span = (end - start) as u32;
        if span == 0 {
            continue;
        }
        let _ = graph.merge_intersecting_blocks(AddressRange::new(start, span));
    }
}

fn mark_padding_blocks(graph: &mut BlockGraph) {
    let gap_ids: Vec<BlockId> = graph
        .blocks()
        .filter(|b| b.attributes().contains(BlockAttributes::GAP_BLOCK))
        .map(Block::id)
        .collect();
    for id in gap_ids {
        let uniform = {
            let b = graph.get_block_by_id(id).unwrap();
            match b.data() {
                Some(data) if !data.is_empty() => {
                    let first = data[0];
                    (first == 0x00 || first == 0xCC) && data.iter().all(|&byte| byte == first)
                }
                _ => true,
            }
        };
        if uniform {
            graph
                .get_block_by_id_mut(id)
                .unwrap()
                .insert_attributes(BlockAttributes::PADDING_BLOCK);
        }
    }
}

/// Group each `(begin, end)` static-initializer bracket pair into a
/// single merged block spanning every symbol between them. The bracket
/// symbols are public symbols (e.g. `__xi_a`/`__xi_z`), never block names.
fn group_static_initializers(
    graph: &mut BlockGraph,
    symbols: &dyn SymbolSource,
    options: &Options,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for (begin_re, end_re) in options.compiled_static_initializer_patterns() {
        let mut begins: Vec<RelativeAddress> = Vec::new();
        let mut ends: Vec<(RelativeAddress, BlockId)> = Vec::new();
        for p in symbols.public_symbols() {
            let block = match graph.find_block_containing(p.addr) {
                Some(block) => block,
                None => continue,
            };
            if begin_re.is_match(&p.name) {
                begins.push(p.addr);
            }
            if end_re.is_match(&p.name) {
                ends.push((p.addr, block));
            }
        }
        begins.sort();
        ends.sort_by_key(|&(addr, _)| addr);

        for begin_addr in begins {
            let end_entry = ends.iter().find(|&&(addr, _)| addr > begin_addr).copied();
            let (end_addr, end_id) = match end_entry {
                Some(entry) => entry,
                None => {
                    diagnostics.push(Diagnostic::warning(
                        "static-initializer begin symbol has no matching end symbol",
                        Some(begin_addr.value()),
                    ));
                    continue;
                }
            };
            let end_size = graph.get_block_by_id(end_id).unwrap().size();
            let span = (end_addr + end_size - begin_addr) as u32;
            if span == 0 {
                continue;
            }
            match graph.merge_intersecting_blocks(AddressRange::new(begin_addr, span)) {
                Ok(Some(merged)) => {
                    graph
                        .get_block_by_id_mut(merged)
                        .unwrap()
                        .insert_attributes(BlockAttributes::COFF_STATIC_INITIALIZER);
                }
                Ok(None) => {}
                Err(e) => diagnostics.push(Diagnostic::warning(
                    format!("could not merge static-initializer range: {}", e),
                    Some(begin_addr.value()),
                )),
            }
        }
    }
}

/// Apply `Options`-supplied non-returning overrides. Import thunks are
/// matched on function name alone since `ThunkSymbol`
/// doesn't carry a module name to match against `(module, function)`
/// pairs; see `DESIGN.md`.
fn apply_non_returning_overrides(graph: &mut BlockGraph, options: &Options) {
    let block_ids: Vec<BlockId> = graph.blocks().map(Block::id).collect();
    for id in block_ids {
        let name = graph.get_block_by_id(id).unwrap().name().to_string();
        let matches_function = options.extra_non_returning_functions.contains(&name);
        let matches_import = options
            .extra_non_returning_imports
            .iter()
            .any(|(_, function)| function == &name);
        if matches_function || matches_import {
            graph
                .get_block_by_id_mut(id)
                .unwrap()
                .insert_attributes(BlockAttributes::NON_RETURNING_FUNCTION);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        DataSymbol, FunctionSymbol, NamedAddress, SectionContribution, SectionHeader, ThunkSymbol,
    };
    use syzygy_address::{AbsoluteAddress, FileOffset};
    use syzygy_disasm::{DecodeError, Operand, OpcodeClass};

    struct ToyDecoder;

    impl InstructionDecoder for ToyDecoder {
        fn decode(&self, buf: &[u8], _addr: u32) -> std::result::Result<DecodedInstruction, DecodeError> {
            if buf.is_empty() {
                return Err(DecodeError::BufferTooShort);
            }
            let flow_control = if buf[0] == 0xC3 {
                FlowControl::Return
            } else {
                FlowControl::None
            };
            Ok(DecodedInstruction {
                size: 1,
                opcode_class: OpcodeClass::General,
                flow_control,
                operands: [Operand::NONE; 4],
            })
        }
    }

    struct Fixture {
        sections: Vec<SectionHeader>,
        bytes: Vec<(RelativeAddress, Vec<u8>)>,
        functions: Vec<FunctionSymbol>,
        data_symbols: Vec<DataSymbol>,
        fixups: Vec<crate::collaborators::Fixup>,
        public_symbols: Vec<NamedAddress>,
    }

    impl ImageSource for Fixture {
        fn sections(&self) -> &[SectionHeader] {
            &self.sections
        }

        fn bytes_at(&self, rel: RelativeAddress, len: u32) -> Option<&[u8]> {
            for (base, bytes) in &self.bytes {
                let end = base.value() + bytes.len() as u32;
                if rel.value() >= base.value() && rel.value() + len <= end {
                    let start = (rel.value() - base.value()) as usize;
                    return Some(&bytes[start..start + len as usize]);
                }
            }
            None
        }

        fn translate_abs(&self, _abs: AbsoluteAddress) -> Option<RelativeAddress> {
            None
        }

        fn translate_file(&self, _off: FileOffset) -> Option<RelativeAddress> {
            None
        }

        fn relocs(&self) -> &[(RelativeAddress, RelativeAddress)] {
            &[]
        }

        fn image_base(&self) -> u32 {
            0x1000_0000
        }
    }

    impl SymbolSource for Fixture {
        fn functions(&self) -> &[FunctionSymbol] {
            &self.functions
        }
        fn thunks(&self) -> &[ThunkSymbol] {
            &[]
        }
        fn labels_in(&self, _function_addr: RelativeAddress) -> Vec<NamedAddress> {
            Vec::new()
        }
        fn global_labels(&self) -> &[NamedAddress] {
            &[]
        }
        fn data_symbols(&self) -> &[DataSymbol] {
            &self.data_symbols
        }
        fn public_symbols(&self) -> &[NamedAddress] {
            &self.public_symbols
        }
        fn section_contributions(&self) -> &[SectionContribution] {
            &[]
        }
        fn fixups(&self) -> &[crate::collaborators::Fixup] {
            &self.fixups
        }
        fn omap(&self) -> Option<&[(RelativeAddress, RelativeAddress)]> {
            None
        }
    }

    fn fixture() -> Fixture {
        Fixture {
            sections: vec![
                SectionHeader {
                    vaddr: RelativeAddress::new(0),
                    vsize: 16,
                    raw_size: 16,
                    characteristics: IMAGE_SCN_CNT_CODE,
                    name: ".text".into(),
                },
                SectionHeader {
                    vaddr: RelativeAddress::new(100),
                    vsize: 8,
                    raw_size: 8,
                    characteristics: 0,
                    name: ".data".into(),
                },
            ],
            bytes: vec![
                (RelativeAddress::new(0), vec![0x90, 0x90, 0x90, 0x90, 0xC3]),
                (RelativeAddress::new(100), vec![0u8; 8]),
            ],
            functions: vec![FunctionSymbol {
                addr: RelativeAddress::new(0),
                size: 5,
                name: "main".into(),
                non_returning: false,
            }],
            data_symbols: vec![DataSymbol {
                addr: RelativeAddress::new(100),
                size: 4,
                name: "counter".into(),
            }],
            fixups: vec![crate::collaborators::Fixup {
                location: RelativeAddress::new(0),
                ref_type: ReferenceType::Absolute,
                base: RelativeAddress::new(100),
                refers_to_code: false,
                is_data: true,
            }],
            public_symbols: Vec::new(),
        }
    }

    #[test]
    fn places_function_and_data_blocks_with_reference() {
        let f = fixture();
        let (graph, diagnostics) = decompose(&f, &f, &ToyDecoder, &Options::new()).unwrap();
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);

        let main_id = graph.find_block_containing(RelativeAddress::new(0)).unwrap();
        let main = graph.get_block_by_id(main_id).unwrap();
        assert_eq!(main.kind(), BlockKind::Code);
        assert_eq!(main.name(), "main");
        assert_eq!(main.data(), Some(&[0x90, 0x90, 0x90, 0x90, 0xC3][..]));

        let counter_id = graph.find_block_containing(RelativeAddress::new(100)).unwrap();
        let counter = graph.get_block_by_id(counter_id).unwrap();
        assert_eq!(counter.name(), "counter");

        let r = graph.get_reference(main_id, 0).unwrap();
        assert_eq!(r.referenced(), counter_id);
        assert_eq!(r.base(), 0);
    }

    #[test]
    fn non_returning_override_marks_matching_block() {
        let f = fixture();
        let options = Options::new().with_non_returning_function("main");
        let (graph, _) = decompose(&f, &f, &ToyDecoder, &options).unwrap();
        let main_id = graph.find_block_containing(RelativeAddress::new(0)).unwrap();
        let main = graph.get_block_by_id(main_id).unwrap();
        assert!(main.attributes().contains(BlockAttributes::NON_RETURNING_FUNCTION));
    }

    #[test]
    fn symbol_overlapping_block_without_containment_is_an_error() {
        let mut f = fixture();
        f.functions.push(FunctionSymbol {
            addr: RelativeAddress::new(3),
            size: 5,
            name: "overlap".into(),
            non_returning: false,
        });
        let err = decompose(&f, &f, &ToyDecoder, &Options::new()).unwrap_err();
        assert!(matches!(err, Error::OverlapNotContainment(_)));
    }

    #[test]
    fn static_initializer_brackets_are_matched_against_public_symbols() {
        let mut f = fixture();
        f.data_symbols.push(DataSymbol {
            addr: RelativeAddress::new(104),
            size: 4,
            name: "extra".into(),
        });
        f.public_symbols.push(NamedAddress {
            addr: RelativeAddress::new(100),
            name: "__xi_a".into(),
        });
        f.public_symbols.push(NamedAddress {
            addr: RelativeAddress::new(104),
            name: "__xi_z".into(),
        });
        let options = Options::new().with_static_initializer_pattern("^__xi_a$", "^__xi_z$");
        let (graph, diagnostics) = decompose(&f, &f, &ToyDecoder, &options).unwrap();
        assert!(
            diagnostics.iter().all(|d| !d.message.contains("static-initializer")),
            "{:?}",
            diagnostics
        );

        let merged_id = graph.find_block_containing(RelativeAddress::new(100)).unwrap();
        let merged = graph.get_block_by_id(merged_id).unwrap();
        assert_eq!(merged.size(), 8);
        assert!(merged.attributes().contains(BlockAttributes::COFF_STATIC_INITIALIZER));
    }
}
