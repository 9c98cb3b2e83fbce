//! `BlockGraph`: owns all sections and blocks, and enforces the
//! cross-block invariants (address-space non-overlap, reference/referrer
//! symmetry, reference validity) across every mutation.
//!
//! Blocks live in a `HashMap<BlockId, Block>` owned by the graph and are
//! referenced by handle rather than by pointer, which sidesteps the
//! shared-ownership and lifetime problems a mutually-referential pointer
//! graph would otherwise create in a borrow-checked language.

use std::collections::HashMap;

use syzygy_address::{AddressRange, AddressSpace, RelativeAddress};
use syzygy_entity::EntityRef;

use crate::attributes::BlockAttributes;
use crate::block::{Block, BlockKind};
use crate::error::{Error, Result};
use crate::ids::{BlockId, SectionId};
use crate::interner::{InternedString, Interner};
use crate::label::Label;
use crate::reference::Reference;
use crate::section::Section;
use crate::Offset;

/// Whether `transfer_referrers` should redirect a referrer that points at
/// the block being transferred from *itself* (an internal self-reference).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferFlags {
    IncludeInternal,
    SkipInternal,
}

/// Owns the set of blocks and sections that make up a decomposed image,
/// and exposes the mutation primitives that keep reference/referrer
/// symmetry and address-space non-overlap intact.
pub struct BlockGraph {
    sections: HashMap<SectionId, Section>,
    blocks: HashMap<BlockId, Block>,
    next_section_id: u32,
    next_block_id: u32,
    address_space: AddressSpace<RelativeAddress, BlockId>,
    interner: Interner,
}

impl BlockGraph {
    pub fn new() -> Self {
        BlockGraph {
            sections: HashMap::new(),
            blocks: HashMap::new(),
            next_section_id: 0,
            next_block_id: 0,
            address_space: AddressSpace::new(),
            interner: Interner::new(),
        }
    }

    /// Intern a string into this graph's string table.
    pub fn intern(&mut self, s: &str) -> InternedString {
        self.interner.intern(s)
    }

    // -- Sections ----------------------------------------------------------

    pub fn add_section(&mut self, name: &str, characteristics: u32) -> SectionId {
        let id = SectionId::new(self.next_section_id as usize);
        self.next_section_id += 1;
        let interned = self.interner.intern(name);
        self.sections.insert(id, Section::new(id, interned, characteristics));
        id
    }

    pub fn find_section(&self, name: &str) -> Option<SectionId> {
        self.sections
            .values()
            .find(|s| s.name() == name)
            .map(|s| s.id())
    }

    pub fn find_or_add_section(&mut self, name: &str, characteristics: u32) -> SectionId {
        self.find_section(name)
            .unwrap_or_else(|| self.add_section(name, characteristics))
    }

    pub fn remove_section(&mut self, id: SectionId) -> Result<()> {
        if !self.sections.contains_key(&id) {
            return Err(Error::NoSuchSection(id));
        }
        self.sections.remove(&id);
        Ok(())
    }

    pub fn get_section_by_id(&self, id: SectionId) -> Option<&Section> {
        self.sections.get(&id)
    }

    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.values()
    }

    // -- Blocks --------------------------------------------------------------

    /// Create a new, unplaced block of `kind` and `size`, named `name`.
    pub fn add_block(&mut self, kind: BlockKind, size: u32, name: &str) -> BlockId {
        let id = BlockId::new(self.next_block_id as usize);
        self.next_block_id += 1;
        let interned = self.interner.intern(name);
        self.blocks.insert(id, Block::new(id, kind, size, interned));
        id
    }

    /// Remove `id` from the graph. Fails if the block has any outgoing
    /// references or incoming referrers still attached.
    pub fn remove_block(&mut self, id: BlockId) -> Result<()> {
        let block = self.blocks.get(&id).ok_or(Error::NoSuchBlock(id))?;
        if block.reference_count() != 0 {
            return Err(Error::HasReferences(id, block.reference_count()));
        }
        if block.referrer_count() != 0 {
            return Err(Error::HasReferrers(id, block.referrer_count()));
        }
        if let Some(addr) = block.addr() {
            if block.size() > 0 {
                self.address_space.remove_exact(AddressRange::new(addr, block.size()));
            }
        }
        self.blocks.remove(&id);
        Ok(())
    }

    pub fn get_block_by_id(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    pub fn get_block_by_id_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(&id)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    /// Place `id` at `addr` within `section_id`'s address space. Fails if
    /// the range overlaps an already-placed block.
    pub fn set_block_address(
        &mut self,
        id: BlockId,
        addr: RelativeAddress,
        section_id: SectionId,
    ) -> Result<()> {
        let size = {
            let block = self.blocks.get(&id).ok_or(Error::NoSuchBlock(id))?;
            block.size()
        };
        if size > 0 {
            if !self.address_space.insert(AddressRange::new(addr, size), id) {
                return Err(Error::AddressRangeOverlap(id));
            }
        }
        let block = self.blocks.get_mut(&id).unwrap();
        block.set_addr(Some(addr));
        block.set_section_id(Some(section_id));
        Ok(())
    }

    pub fn block_at(&self, addr: RelativeAddress) -> Option<BlockId> {
        self.address_space.get_at(addr).copied()
    }

    pub fn find_block_containing(&self, addr: RelativeAddress) -> Option<BlockId> {
        self.address_space
            .find_containing(AddressRange::new(addr, 1))
            .map(|(_, &id)| id)
    }

    /// Every block whose address-space extent intersects `range`, in
    /// address order. Used by the macro decomposer to decide whether a
    /// symbol's range is unclaimed, exactly covered, contained within, or
    /// overlapping-without-containment an existing block.
    pub fn find_blocks_intersecting(&self, range: AddressRange<RelativeAddress>) -> Vec<BlockId> {
        self.address_space
            .find_intersecting(range)
            .into_iter()
            .map(|(_, &id)| id)
            .collect()
    }

    // -- References ----------------------------------------------------------

    /// Install `reference` at `offset` in block `from`. Returns `true` iff
    /// this created a brand new reference (as opposed to replacing one at
    /// the same offset). Always rejects an overlapping reference as a hard
    /// error; see `DESIGN.md`.
    pub fn set_reference(&mut self, from: BlockId, offset: Offset, reference: Reference) -> Result<bool> {
        let referenced = reference.referenced();
        let referenced_size = self
            .blocks
            .get(&referenced)
            .ok_or(Error::NoSuchBlock(referenced))?
            .size();
        if !reference.is_valid(referenced_size) {
            return Err(Error::InvalidReference { from, offset });
        }

        {
            let from_block = self.blocks.get(&from).ok_or(Error::NoSuchBlock(from))?;
            if from_block.overlaps_existing_reference(offset, reference.size()) {
                return Err(Error::ReferenceOverlap { from, offset });
            }
            if self
                .blocks
                .get(&referenced)
                .map(|b| b.kind())
                == Some(BlockKind::Code)
                && offset + reference.size() as Offset > from_block.size() as Offset
            {
                return Err(Error::InvalidReference { from, offset });
            }
        }

        let previous = {
            let from_block = self.blocks.get_mut(&from).unwrap();
            from_block.insert_reference_local(offset, reference)
        };

        if let Some(old) = &previous {
            if let Some(old_target) = self.blocks.get_mut(&old.referenced()) {
                old_target.referrers_mut().remove(&(from, offset));
            }
        }

        if let Some(target) = self.blocks.get_mut(&referenced) {
            target.referrers_mut().insert((from, offset));
        }

        Ok(previous.is_none())
    }

    pub fn get_reference(&self, from: BlockId, offset: Offset) -> Option<&Reference> {
        self.blocks.get(&from).and_then(|b| b.get_reference(offset))
    }

    pub fn remove_reference(&mut self, from: BlockId, offset: Offset) -> Result<bool> {
        let removed = {
            let block = self.blocks.get_mut(&from).ok_or(Error::NoSuchBlock(from))?;
            block.remove_reference_local(offset)
        };
        match removed {
            Some(r) => {
                if let Some(target) = self.blocks.get_mut(&r.referenced()) {
                    target.referrers_mut().remove(&(from, offset));
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn remove_all_references(&mut self, from: BlockId) -> Result<()> {
        let refs = {
            let block = self.blocks.get_mut(&from).ok_or(Error::NoSuchBlock(from))?;
            block.take_all_references()
        };
        for (offset, r) in refs {
            if let Some(target) = self.blocks.get_mut(&r.referenced()) {
                target.referrers_mut().remove(&(from, offset));
            }
        }
        Ok(())
    }

    /// Redirect every referrer of `source` to `new_block`, shifting the
    /// referring reference's `offset`/`base` by `offset_delta`. On
    /// failure (a shifted offset falls outside `new_block`'s extent when
    /// `new_block` is a code block) the graph is left unchanged.
    pub fn transfer_referrers(
        &mut self,
        source: BlockId,
        new_block: BlockId,
        offset_delta: Offset,
        flags: TransferFlags,
    ) -> Result<()> {
        let new_size = self.blocks.get(&new_block).ok_or(Error::NoSuchBlock(new_block))?.size();
        let new_kind = self.blocks.get(&new_block).unwrap().kind();

        let referrers: Vec<(BlockId, Offset)> = self
            .blocks
            .get(&source)
            .ok_or(Error::NoSuchBlock(source))?
            .referrers()
            .copied()
            .collect();

        // `base` always lives in `source`'s (soon `new_block`'s) coordinate
        // space and shifts regardless of which block holds the reference.
        // `offset` lives in the *referrer's own* space and only moves when
        // the referrer is `source` itself (a self-referrer being carried
        // along under `TransferFlags::IncludeInternal`).
        //
        // Validate before mutating anything.
        for &(referrer_block, referrer_offset) in &referrers {
            if flags == TransferFlags::SkipInternal && referrer_block == source {
                continue;
            }
            let r = self
                .blocks
                .get(&referrer_block)
                .and_then(|b| b.get_reference(referrer_offset))
                .ok_or(Error::NoSuchBlock(referrer_block))?;
            let new_base = r.base() + offset_delta;
            if new_kind == BlockKind::Code && (new_base < 0 || new_base as u32 > new_size) {
                return Err(Error::InvalidReference {
                    from: referrer_block,
                    offset: referrer_offset,
                });
            }
        }

        for (referrer_block, referrer_offset) in referrers {
            if flags == TransferFlags::SkipInternal && referrer_block == source {
                continue;
            }
            let r = *self
                .blocks
                .get(&referrer_block)
                .unwrap()
                .get_reference(referrer_offset)
                .unwrap();
            let new_offset = if referrer_block == source {
                r.offset() + offset_delta
            } else {
                r.offset()
            };
            let new_base = r.base() + offset_delta;
            let new_ref = Reference::new(r.ref_type(), r.size(), new_block, new_offset, new_base)
                .with_from_relocation(r.from_relocation());

            let referrer = self.blocks.get_mut(&referrer_block).unwrap();
            if new_offset != referrer_offset {
                referrer.remove_reference_local(referrer_offset);
            }
            referrer.insert_reference_local(new_offset, new_ref);
            if let Some(target) = self.blocks.get_mut(&new_block) {
                target.referrers_mut().insert((referrer_block, new_offset));
            }
        }

        if let Some(source_block) = self.blocks.get_mut(&source) {
            if flags == TransferFlags::SkipInternal {
                source_block.referrers_mut().retain(|&(b, _)| b == source);
            } else {
                source_block.referrers_mut().clear();
            }
        }

        Ok(())
    }

    // -- Labels ----------------------------------------------------------

    pub fn set_label(&mut self, block: BlockId, offset: Offset, label: Label) -> Result<()> {
        self.blocks
            .get_mut(&block)
            .ok_or(Error::NoSuchBlock(block))?
            .set_label(offset, label)
    }

    // -- Data --------------------------------------------------------------

    /// Grow `block` by `size` bytes at `offset`, shifting the block's own
    /// labels/references/referrers (delegated to `Block::insert_data`),
    /// and additionally rewriting every *other* block's forward reference
    /// into `block` whose target offset lies at or beyond `offset` — the
    /// half of the shift `Block::insert_data` cannot perform on its own
    /// since it can't see the referring blocks.
    pub fn insert_data(&mut self, block: BlockId, offset: Offset, size: u32, allocate_data: bool) -> Result<()> {
        let referrers: Vec<(BlockId, Offset)> = self
            .blocks
            .get(&block)
            .ok_or(Error::NoSuchBlock(block))?
            .referrers()
            .copied()
            .collect();

        self.blocks.get_mut(&block).unwrap().insert_data(offset, size, allocate_data)?;

        for (referrer_block, referrer_offset) in referrers {
            if referrer_block == block {
                continue;
            }
            if let Some(r) = self
                .blocks
                .get(&referrer_block)
                .and_then(|b| b.get_reference(referrer_offset))
                .copied()
            {
                // `r.offset()` is a coordinate in `referrer_block`'s own
                // space and never moves here; only `base`, a coordinate
                // in `block`'s space, can need shifting.
                if r.base() >= offset {
                    let shifted = r.with_offsets(r.offset(), r.base() + size as Offset);
                    self.blocks
                        .get_mut(&referrer_block)
                        .unwrap()
                        .insert_reference_local(referrer_offset, shifted);
                }
            }
        }
        Ok(())
    }

    /// The mirror of `insert_data`.
    pub fn remove_data(&mut self, block: BlockId, offset: Offset, size: u32) -> Result<()> {
        let end = offset + size as Offset;
        let referrers: Vec<(BlockId, Offset)> = self
            .blocks
            .get(&block)
            .ok_or(Error::NoSuchBlock(block))?
            .referrers()
            .copied()
            .collect();
        for &(referrer_block, referrer_offset) in &referrers {
            if let Some(r) = self
                .blocks
                .get(&referrer_block)
                .and_then(|b| b.get_reference(referrer_offset))
            {
                if r.base() >= offset && (r.base() as Offset) < end {
                    return Err(Error::DataRangeHasReference { block, offset });
                }
            }
        }

        self.blocks.get_mut(&block).unwrap().remove_data(offset, size)?;

        for (referrer_block, referrer_offset) in referrers {
            if referrer_block == block {
                continue;
            }
            if let Some(r) = self
                .blocks
                .get(&referrer_block)
                .and_then(|b| b.get_reference(referrer_offset))
                .copied()
            {
                if r.base() >= end {
                    let shifted = r.with_offsets(r.offset(), r.base() - size as Offset);
                    self.blocks
                        .get_mut(&referrer_block)
                        .unwrap()
                        .insert_reference_local(referrer_offset, shifted);
                }
            }
        }
        Ok(())
    }

    pub fn insert_or_remove_data(
        &mut self,
        block: BlockId,
        offset: Offset,
        current_size: u32,
        new_size: u32,
        allocate_data: bool,
    ) -> Result<()> {
        if new_size > current_size {
            self.insert_data(block, offset + current_size as Offset, new_size - current_size, allocate_data)
        } else if new_size < current_size {
            self.remove_data(block, offset + new_size as Offset, current_size - new_size)
        } else {
            Ok(())
        }
    }

    // -- Merge -----------------------------------------------------------

    /// Merge every block intersecting `range` (within `section_id`'s
    /// address space) into a single new block. Returns the new block's
    /// id, or `None` if no block intersects `range`. If exactly one block
    /// intersects, returns it unchanged.
    pub fn merge_intersecting_blocks(&mut self, range: AddressRange<RelativeAddress>) -> Result<Option<BlockId>> {
        let hits = self.address_space.find_intersecting(range);
        let ids: Vec<BlockId> = hits.iter().map(|(_, &id)| id).collect();

        if ids.is_empty() {
            return Ok(None);
        }
        if ids.len() == 1 {
            return Ok(Some(ids[0]));
        }

        let kind = self.blocks[&ids[0]].kind();
        let section_id = self.blocks[&ids[0]].section_id();
        for &id in &ids {
            let b = &self.blocks[&id];
            if b.kind() != kind || b.section_id() != section_id {
                return Err(Error::KindMismatch {
                    block: id,
                    expected: kind,
                    actual: b.kind(),
                });
            }
        }

        let starts: Vec<RelativeAddress> = ids.iter().map(|id| self.blocks[id].addr().unwrap()).collect();
        let min_start = *starts.iter().min().unwrap();
        let max_end = ids
            .iter()
            .map(|id| {
                let b = &self.blocks[id];
                b.addr().unwrap() + b.size()
            })
            .max()
            .unwrap();
        let merged_size = (max_end - min_start) as u32;

        let first = &self.blocks[&ids[0]];
        let name = first.name().to_string();
        let alignment = first.alignment();

        let mut uniform_attrs = BlockAttributes::all();
        let mut other_attrs = BlockAttributes::empty();
        let mut merged_data = vec![0u8; merged_size as usize];
        let mut has_data = false;

        for id in &ids {
            let b = &self.blocks[id];
            uniform_attrs &= b.attributes() & BlockAttributes::UNIFORM | !BlockAttributes::UNIFORM;
            other_attrs |= b.attributes() & !BlockAttributes::UNIFORM;
            let shift = (b.addr().unwrap() - min_start) as usize;
            if let Some(data) = b.data() {
                has_data = true;
                merged_data[shift..shift + data.len()].copy_from_slice(data);
            }
        }
        let merged_attrs = (uniform_attrs & BlockAttributes::UNIFORM) | other_attrs;

        // Remove source blocks from the address space (but not from the
        // block map yet; we still need their labels/refs/data below).
        for id in &ids {
            let b = &self.blocks[id];
            if b.size() > 0 {
                self.address_space.remove_exact(AddressRange::new(b.addr().unwrap(), b.size()));
            }
        }

        let interned_name = self.interner.intern(&name);
        let new_id = BlockId::new(self.next_block_id as usize);
        self.next_block_id += 1;
        let mut new_block = Block::new(new_id, kind, merged_size, interned_name);
        new_block.set_alignment(alignment);
        new_block.set_attributes(merged_attrs);
        if has_data {
            new_block.set_data_raw(Some(merged_data));
        }
        self.blocks.insert(new_id, new_block);
        if merged_size > 0 {
            self.address_space.insert(AddressRange::new(min_start, merged_size), new_id);
        }
        if let Some(sec) = section_id {
            self.blocks.get_mut(&new_id).unwrap().set_section_id(Some(sec));
        }
        self.blocks.get_mut(&new_id).unwrap().set_addr(Some(min_start));

        // Each merged-away block's own shift into `new_id`'s coordinate
        // space, needed to redirect any outgoing reference that targets
        // another block in this same merge: such a reference becomes
        // internal to the merged block.
        let shifts: HashMap<BlockId, Offset> = ids
            .iter()
            .map(|&id| (id, (self.blocks[&id].addr().unwrap() - min_start) as Offset))
            .collect();

        for id in ids {
            let shift = shifts[&id];

            if kind != BlockKind::Code && !self.blocks[&id].name().is_empty() {
                let source_name = self.interner.intern(self.blocks[&id].name());
                if let Some(label) = Label::new(source_name, crate::attributes::LabelAttributes::DATA) {
                    let _ = self.blocks.get_mut(&new_id).unwrap().set_label(shift, label);
                }
            }

            let labels: Vec<(Offset, Label)> = self.blocks[&id]
                .labels()
                .map(|(o, l)| (o, l.clone()))
                .collect();
            for (o, l) in labels {
                let _ = self.blocks.get_mut(&new_id).unwrap().set_label(o + shift, l);
            }

            let refs: Vec<(Offset, Reference)> = self.blocks[&id].references().map(|(o, r)| (o, *r)).collect();
            for (o, r) in refs {
                self.remove_reference(id, o)?;
                // `offset` is local to `id`'s own bytes and always moves by
                // this block's shift. `base` lives in the *referenced*
                // block's space: if that block is also part of this merge
                // it moves by its own shift and `referenced` is redirected
                // to `new_id`; otherwise both are untouched.
                let shifted = match shifts.get(&r.referenced()) {
                    Some(&target_shift) => {
                        Reference::new(r.ref_type(), r.size(), new_id, r.offset() + shift, r.base() + target_shift)
                            .with_from_relocation(r.from_relocation())
                    }
                    None => r.with_offsets(r.offset() + shift, r.base()),
                };
                self.set_reference(new_id, o + shift, shifted)?;
            }

            self.transfer_referrers(id, new_id, shift, TransferFlags::IncludeInternal)?;

            let translated = self.blocks[&id].source_ranges().translated(shift);
            self.blocks.get_mut(&new_id).unwrap().source_ranges_mut().extend(translated);

            self.blocks.remove(&id);
        }

        Ok(Some(new_id))
    }
}

impl Default for BlockGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::LabelAttributes;
    use crate::reference::ReferenceType;

    #[test]
    fn add_and_remove_block_round_trip() {
        let mut g = BlockGraph::new();
        let b = g.add_block(BlockKind::Code, 16, "foo");
        assert_eq!(g.get_block_by_id(b).unwrap().name(), "foo");
        assert!(g.remove_block(b).is_ok());
        assert!(g.get_block_by_id(b).is_none());
    }

    #[test]
    fn remove_block_with_referrers_fails() {
        let mut g = BlockGraph::new();
        let a = g.add_block(BlockKind::Code, 16, "a");
        let target = g.add_block(BlockKind::Code, 16, "target");
        g.set_reference(a, 0, Reference::new(ReferenceType::PcRelative, 4, target, 0, 0))
            .unwrap();
        assert!(g.remove_block(target).is_err());
    }

    #[test]
    fn set_reference_rejects_overlap() {
        let mut g = BlockGraph::new();
        let a = g.add_block(BlockKind::Code, 16, "a");
        let t1 = g.add_block(BlockKind::Data, 16, "t1");
        let t2 = g.add_block(BlockKind::Data, 16, "t2");
        g.set_reference(a, 0, Reference::new(ReferenceType::Absolute, 4, t1, 0, 0)).unwrap();
        assert!(g
            .set_reference(a, 2, Reference::new(ReferenceType::Absolute, 4, t2, 0, 0))
            .is_err());
    }

    #[test]
    fn set_reference_updates_referrers_and_replaces_old() {
        let mut g = BlockGraph::new();
        let a = g.add_block(BlockKind::Code, 16, "a");
        let t1 = g.add_block(BlockKind::Data, 16, "t1");
        let t2 = g.add_block(BlockKind::Data, 16, "t2");
        g.set_reference(a, 0, Reference::new(ReferenceType::Absolute, 4, t1, 0, 0)).unwrap();
        assert_eq!(g.get_block_by_id(t1).unwrap().referrer_count(), 1);
        g.set_reference(a, 0, Reference::new(ReferenceType::Absolute, 4, t2, 0, 0)).unwrap();
        assert_eq!(g.get_block_by_id(t1).unwrap().referrer_count(), 0);
        assert_eq!(g.get_block_by_id(t2).unwrap().referrer_count(), 1);
    }

    #[test]
    fn merge_adjacent_blocks_combines_data_and_references() {
        let mut g = BlockGraph::new();
        let sec = g.add_section(".text", 0);
        let a = g.add_block(BlockKind::Code, 10, "a");
        let b = g.add_block(BlockKind::Code, 10, "b");
        let c = g.add_block(BlockKind::Code, 5, "c");
        g.set_block_address(a, RelativeAddress::new(0), sec).unwrap();
        g.set_block_address(b, RelativeAddress::new(10), sec).unwrap();
        g.set_block_address(c, RelativeAddress::new(25), sec).unwrap();
        g.set_reference(a, 6, Reference::new(ReferenceType::PcRelative, 4, c, 0, 0)).unwrap();

        let merged = g
            .merge_intersecting_blocks(AddressRange::new(RelativeAddress::new(5), 25))
            .unwrap()
            .unwrap();
        assert_eq!(g.get_block_by_id(merged).unwrap().size(), 30);
        assert!(g.get_block_by_id(a).is_none());
        assert!(g.get_block_by_id(b).is_none());
        assert!(g.get_block_by_id(c).is_none());
        let r = g.get_reference(merged, 6).unwrap();
        assert_eq!(r.referenced(), merged);
    }

    #[test]
    fn label_validity_enforced_through_graph() {
        let mut g = BlockGraph::new();
        let a = g.add_block(BlockKind::Code, 16, "a");
        let name = g.intern("entry");
        let label = Label::new(name, LabelAttributes::CODE).unwrap();
        assert!(g.set_label(a, 0, label).is_ok());
    }
}
