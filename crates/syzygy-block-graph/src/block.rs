//! `Block`: the block graph's primary entity.

use std::collections::BTreeMap;
use std::collections::HashSet;

use syzygy_address::RelativeAddress;

use crate::attributes::BlockAttributes;
use crate::error::{Error, Result};
use crate::ids::{BlockId, SectionId};
use crate::interner::InternedString;
use crate::label::Label;
use crate::reference::Reference;
use crate::source_ranges::SourceRanges;
use crate::Offset;

/// A block's fundamental content kind. Set at creation and only ever
/// changed by an explicit caller request.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Code,
    Data,
}

/// A block's byte contents. `None` models a block with no initialized
/// data at all (e.g. a BSS-like gap block); `Some` holds an owned prefix
/// of at most `size` bytes, with any bytes beyond the end of the prefix
/// implicitly zero.
pub type BlockData = Option<Vec<u8>>;

/// The primary block-graph entity: a named, typed, sized span of image
/// content, carrying labels, outgoing references, and a derived set of
/// incoming referrers.
#[derive(Clone, Debug)]
pub struct Block {
    id: BlockId,
    kind: BlockKind,
    size: u32,
    alignment: u32,
    name: InternedString,
    compiland_name: InternedString,
    addr: Option<RelativeAddress>,
    section_id: Option<SectionId>,
    attributes: BlockAttributes,
    data: BlockData,
    source_ranges: SourceRanges,
    labels: BTreeMap<Offset, Label>,
    references: BTreeMap<Offset, Reference>,
    referrers: HashSet<(BlockId, Offset)>,
}

impl Block {
    pub(crate) fn new(id: BlockId, kind: BlockKind, size: u32, name: InternedString) -> Self {
        Block {
            id,
            kind,
            size,
            alignment: 1,
            name,
            compiland_name: InternedString::empty(),
            addr: None,
            section_id: None,
            attributes: BlockAttributes::empty(),
            data: None,
            source_ranges: SourceRanges::new(),
            labels: BTreeMap::new(),
            references: BTreeMap::new(),
            referrers: HashSet::new(),
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: BlockKind) {
        self.kind = kind;
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn alignment(&self) -> u32 {
        self.alignment
    }

    pub fn set_alignment(&mut self, alignment: u32) {
        debug_assert!(alignment.is_power_of_two());
        self.alignment = alignment;
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn set_name(&mut self, name: InternedString) {
        self.name = name;
    }

    pub fn compiland_name(&self) -> &str {
        self.compiland_name.as_str()
    }

    pub fn set_compiland_name(&mut self, name: InternedString) {
        self.compiland_name = name;
    }

    pub fn addr(&self) -> Option<RelativeAddress> {
        self.addr
    }

    pub(crate) fn set_addr(&mut self, addr: Option<RelativeAddress>) {
        self.addr = addr;
    }

    pub fn section_id(&self) -> Option<SectionId> {
        self.section_id
    }

    pub(crate) fn set_section_id(&mut self, section_id: Option<SectionId>) {
        self.section_id = section_id;
    }

    pub fn attributes(&self) -> BlockAttributes {
        self.attributes
    }

    pub fn set_attributes(&mut self, attributes: BlockAttributes) {
        self.attributes = attributes;
    }

    pub fn insert_attributes(&mut self, attributes: BlockAttributes) {
        self.attributes.insert(attributes);
    }

    pub fn remove_attributes(&mut self, attributes: BlockAttributes) {
        self.attributes.remove(attributes);
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub fn source_ranges(&self) -> &SourceRanges {
        &self.source_ranges
    }

    pub fn source_ranges_mut(&mut self) -> &mut SourceRanges {
        &mut self.source_ranges
    }

    pub fn labels(&self) -> impl Iterator<Item = (Offset, &Label)> {
        self.labels.iter().map(|(&o, l)| (o, l))
    }

    pub fn references(&self) -> impl Iterator<Item = (Offset, &Reference)> {
        self.references.iter().map(|(&o, r)| (o, r))
    }

    pub fn referrers(&self) -> impl Iterator<Item = &(BlockId, Offset)> {
        self.referrers.iter()
    }

    pub fn referrer_count(&self) -> usize {
        self.referrers.len()
    }

    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    pub fn get_reference(&self, offset: Offset) -> Option<&Reference> {
        self.references.get(&offset)
    }

    /// True iff some stored reference other than one exactly at `offset`
    /// overlaps `[offset, offset+size)`. `BlockGraph::set_reference` uses
    /// this to enforce a no-overlap precondition before installing a new
    /// reference (overlap is always a hard error; see `DESIGN.md`).
    pub(crate) fn overlaps_existing_reference(&self, offset: Offset, size: u8) -> bool {
        let end = offset + size as Offset;
        self.references.iter().any(|(&o, r)| {
            if o == offset {
                return false;
            }
            let other_end = o + r.size() as Offset;
            o < end && offset < other_end
        })
    }

    /// Install `reference` at `offset`, returning whatever reference
    /// previously occupied that offset, if any. Purely a local map
    /// mutation; does not touch the referrer set on the target block —
    /// `BlockGraph::set_reference` handles that side.
    pub(crate) fn insert_reference_local(&mut self, offset: Offset, reference: Reference) -> Option<Reference> {
        self.references.insert(offset, reference)
    }

    pub(crate) fn remove_reference_local(&mut self, offset: Offset) -> Option<Reference> {
        self.references.remove(&offset)
    }

    pub(crate) fn take_all_references(&mut self) -> BTreeMap<Offset, Reference> {
        std::mem::take(&mut self.references)
    }

    // -- Labels ----------------------------------------------------------

    /// Insert `label` at `offset`. Fails if `offset` is out of range, the
    /// label's own attributes are invalid, or another label already
    /// occupies `offset` — labels at the same offset are never merged.
    pub fn set_label(&mut self, offset: Offset, label: Label) -> Result<()> {
        if offset < 0 || offset as u32 > self.size {
            return Err(Error::OffsetOutOfRange {
                block: self.id,
                offset,
                size: self.size,
            });
        }
        if self.labels.contains_key(&offset) {
            return Err(Error::DuplicateLabel {
                block: self.id,
                offset,
            });
        }
        self.labels.insert(offset, label);
        Ok(())
    }

    pub fn get_label(&self, offset: Offset) -> Option<&Label> {
        self.labels.get(&offset)
    }

    pub fn has_label(&self, offset: Offset) -> bool {
        self.labels.contains_key(&offset)
    }

    pub fn remove_label(&mut self, offset: Offset) -> bool {
        self.labels.remove(&offset).is_some()
    }

    // -- Data --------------------------------------------------------------

    /// Replace the owned data prefix wholesale with an owned copy of
    /// `bytes`. `bytes.len()` must not exceed `size`.
    pub fn set_data(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() as u64 > self.size as u64 {
            return Err(Error::OffsetOutOfRange {
                block: self.id,
                offset: bytes.len() as Offset,
                size: self.size,
            });
        }
        self.data = Some(bytes.to_vec());
        Ok(())
    }

    /// Allocate (and zero-fill) an owned data prefix of `len` bytes.
    pub fn allocate_data(&mut self, len: u32) -> Result<()> {
        if len > self.size {
            return Err(Error::OffsetOutOfRange {
                block: self.id,
                offset: len as Offset,
                size: self.size,
            });
        }
        self.data = Some(vec![0u8; len as usize]);
        Ok(())
    }

    /// Grow or shrink the owned data buffer in place, without touching
    /// `size`, labels, references, or referrers. Zero-fills on grow,
    /// truncates on shrink.
    pub fn resize_data(&mut self, new_len: u32) -> Result<()> {
        if new_len > self.size {
            return Err(Error::OffsetOutOfRange {
                block: self.id,
                offset: new_len as Offset,
                size: self.size,
            });
        }
        let mut data = self.data.take().unwrap_or_default();
        data.resize(new_len as usize, 0);
        self.data = Some(data);
        Ok(())
    }

    /// Grow the block by `size` bytes at `offset`, shifting labels,
    /// outgoing references, and referrer target-offsets at or beyond
    /// `offset`, and patching `source_ranges` with an unmapped span. Does
    /// not by itself fix up other blocks' forward `Reference`s that
    /// target this block — that is `BlockGraph`'s job, since it alone can
    /// see the referring blocks.
    pub fn insert_data(&mut self, offset: Offset, size: u32, allocate_data: bool) -> Result<()> {
        if offset < 0 || offset as u32 > self.size {
            return Err(Error::OffsetOutOfRange {
                block: self.id,
                offset,
                size: self.size,
            });
        }
        self.size += size;

        let shifted_labels: Vec<(Offset, Label)> = std::mem::take(&mut self.labels)
            .into_iter()
            .map(|(o, l)| if o >= offset { (o + size as Offset, l) } else { (o, l) })
            .collect();
        self.labels = shifted_labels.into_iter().collect();

        let shifted_refs: Vec<(Offset, Reference)> = std::mem::take(&mut self.references)
            .into_iter()
            .map(|(o, r)| {
                if o >= offset {
                    let new_offset = o + size as Offset;
                    // `base` only shifts for a self-reference: it names an
                    // offset in `r.referenced()`, which only coincides
                    // with this block's own offset space when the
                    // reference targets itself.
                    let new_base = if r.referenced() == self.id { r.base() + size as Offset } else { r.base() };
                    (new_offset, r.with_offsets(new_offset, new_base))
                } else {
                    (o, r)
                }
            })
            .collect();
        self.references = shifted_refs.into_iter().collect();

        // `referrers` entries are `(source_block, source_offset)`:
        // `source_offset` is local to `source_block`, never to `self`, so
        // this block's own insertion never shifts it. `BlockGraph` is the
        // only owner of the cross-block `base` coordinate that does move.

        self.source_ranges.insert_unmapped_range(offset, size);

        if allocate_data {
            let mut data = self.data.take().unwrap_or_default();
            if offset as usize <= data.len() {
                let tail = data.split_off(offset as usize);
                data.extend(std::iter::repeat(0u8).take(size as usize));
                data.extend(tail);
            }
            self.data = Some(data);
        }
        Ok(())
    }

    /// The mirror of `insert_data`: fails if any label, reference, or
    /// referrer falls strictly inside `[offset, offset+size)`.
    pub fn remove_data(&mut self, offset: Offset, size: u32) -> Result<()> {
        let end = offset + size as Offset;
        if self.labels.keys().any(|&o| o >= offset && o < end) {
            return Err(Error::DataRangeHasReference {
                block: self.id,
                offset,
            });
        }
        if self.references.keys().any(|&o| o >= offset && o < end) {
            return Err(Error::DataRangeHasReference {
                block: self.id,
                offset,
            });
        }
        // `referrers`' offsets are local to the referring block, not to
        // `self`, so they carry no information about whether `[offset, end)`
        // is safe to remove from `self` and are not checked here.

        self.size -= size;

        let shifted_labels: Vec<(Offset, Label)> = std::mem::take(&mut self.labels)
            .into_iter()
            .map(|(o, l)| if o >= end { (o - size as Offset, l) } else { (o, l) })
            .collect();
        self.labels = shifted_labels.into_iter().collect();

        let shifted_refs: Vec<(Offset, Reference)> = std::mem::take(&mut self.references)
            .into_iter()
            .map(|(o, r)| {
                if o >= end {
                    let new_offset = o - size as Offset;
                    let new_base = if r.referenced() == self.id { r.base() - size as Offset } else { r.base() };
                    (new_offset, r.with_offsets(new_offset, new_base))
                } else {
                    (o, r)
                }
            })
            .collect();
        self.references = shifted_refs.into_iter().collect();

        self.source_ranges.remove_mapped_range(offset, size);

        if let Some(data) = &mut self.data {
            let data_end = (end as usize).min(data.len());
            let data_start = (offset as usize).min(data_end);
            data.drain(data_start..data_end);
        }
        Ok(())
    }

    /// Convenience dispatch between `insert_data`/`remove_data` based on
    /// whether `new_size > current_size`.
    pub fn insert_or_remove_data(
        &mut self,
        offset: Offset,
        current_size: u32,
        new_size: u32,
        allocate_data: bool,
    ) -> Result<()> {
        if new_size > current_size {
            self.insert_data(offset + current_size as Offset, new_size - current_size, allocate_data)
        } else if new_size < current_size {
            self.remove_data(offset + new_size as Offset, current_size - new_size)
        } else {
            Ok(())
        }
    }

    // -- internal accessors used by BlockGraph ----------------------------

    pub(crate) fn references_mut(&mut self) -> &mut BTreeMap<Offset, Reference> {
        &mut self.references
    }

    pub(crate) fn referrers_mut(&mut self) -> &mut HashSet<(BlockId, Offset)> {
        &mut self.referrers
    }

    pub(crate) fn labels_mut(&mut self) -> &mut BTreeMap<Offset, Label> {
        &mut self.labels
    }

    pub(crate) fn set_data_raw(&mut self, data: BlockData) {
        self.data = data;
    }

    pub(crate) fn set_size_raw(&mut self, size: u32) {
        self.size = size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::LabelAttributes;
    use syzygy_entity::EntityRef;

    fn test_block() -> Block {
        Block::new(BlockId::new(0), BlockKind::Code, 16, InternedString::empty())
    }

    #[test]
    fn set_label_rejects_duplicate_offset() {
        let mut b = test_block();
        let l1 = Label::new(InternedString::empty(), LabelAttributes::CODE).unwrap();
        let l2 = Label::new(InternedString::empty(), LabelAttributes::CODE).unwrap();
        assert!(b.set_label(4, l1).is_ok());
        assert!(b.set_label(4, l2).is_err());
    }

    #[test]
    fn set_label_rejects_out_of_range_offset() {
        let mut b = test_block();
        let l = Label::new(InternedString::empty(), LabelAttributes::CODE).unwrap();
        assert!(b.set_label(17, l).is_err());
    }

    #[test]
    fn insert_data_shifts_labels_past_offset() {
        let mut b = test_block();
        let l = Label::new(InternedString::empty(), LabelAttributes::CODE).unwrap();
        b.set_label(8, l).unwrap();
        b.insert_data(4, 2, false).unwrap();
        assert_eq!(b.size(), 18);
        assert!(b.get_label(10).is_some());
        assert!(b.get_label(8).is_none());
    }

    #[test]
    fn remove_data_fails_when_label_inside_range() {
        let mut b = test_block();
        let l = Label::new(InternedString::empty(), LabelAttributes::CODE).unwrap();
        b.set_label(5, l).unwrap();
        assert!(b.remove_data(4, 4).is_err());
    }

    #[test]
    fn remove_data_shrinks_and_shifts_trailing_labels() {
        let mut b = test_block();
        let l = Label::new(InternedString::empty(), LabelAttributes::CODE).unwrap();
        b.set_label(10, l).unwrap();
        b.remove_data(4, 2).unwrap();
        assert_eq!(b.size(), 14);
        assert!(b.get_label(8).is_some());
    }
}
