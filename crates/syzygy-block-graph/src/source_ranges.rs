//! Provenance tracking: mapping a block's current bytes back to the
//! original image offsets they came from.
//!
//! An order-preserving, gap-tolerant piecewise map from `[data_offset,
//! data_offset+size)` spans of a block's *current* data onto
//! `(source_block-relative-address, size)` spans of the original image.
//! Bytes introduced after decomposition (inserted padding, instrumentation)
//! have no entry and are reported as unmapped.

use crate::Offset;
use syzygy_address::RelativeAddress;

/// One `(current span) -> (original span)` pairing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SourceRange {
    /// Offset of this span within the block's current data.
    pub data_offset: Offset,
    /// Length, in bytes, of this span.
    pub size: u32,
    /// Where these bytes originally lived in the image, if known.
    pub source: Option<(RelativeAddress, u32)>,
}

/// The ordered list of spans for one block. Kept sorted and
/// non-overlapping by `data_offset`.
#[derive(Clone, Debug, Default)]
pub struct SourceRanges {
    spans: Vec<SourceRange>,
}

impl SourceRanges {
    pub fn new() -> Self {
        SourceRanges { spans: Vec::new() }
    }

    /// All spans, in ascending `data_offset` order.
    pub fn spans(&self) -> &[SourceRange] {
        &self.spans
    }

    /// Record that `[data_offset, data_offset+size)` of the current block
    /// maps to `source` (or to nothing, for freshly-introduced bytes).
    /// Pushed spans must be in increasing, non-overlapping `data_offset`
    /// order, matching how a block's contents are always walked left to
    /// right when these are recorded.
    pub fn push(&mut self, data_offset: Offset, size: u32, source: Option<(RelativeAddress, u32)>) -> bool {
        if let Some(last) = self.spans.last() {
            if data_offset < last.data_offset + last.size as Offset {
                return false;
            }
        }
        self.spans.push(SourceRange {
            data_offset,
            size,
            source,
        });
        true
    }

    /// Look up the original provenance of a single current-data offset.
    pub fn find(&self, data_offset: Offset) -> Option<&SourceRange> {
        self.spans
            .iter()
            .find(|s| data_offset >= s.data_offset && data_offset < s.data_offset + s.size as Offset)
    }

    /// Shift every span at or beyond `offset` by `size`, splitting the one
    /// span that straddles `offset` (if any) into an unchanged before-piece
    /// and a shifted after-piece, then insert an unmapped span of `size`
    /// bytes at `offset` — the bookkeeping `Block::insert_data` needs to
    /// keep provenance information in sync with a growing block.
    pub fn insert_unmapped_range(&mut self, offset: Offset, size: u32) {
        if let Some(i) = self
            .spans
            .iter()
            .position(|s| s.data_offset < offset && offset < s.data_offset + s.size as Offset)
        {
            let span = self.spans[i];
            let before_size = (offset - span.data_offset) as u32;
            let after_size = span.size - before_size;
            let after_source = span.source.map(|(addr, len)| {
                (addr + before_size, len.saturating_sub(before_size))
            });
            self.spans[i] = SourceRange {
                data_offset: span.data_offset,
                size: before_size,
                source: span.source.map(|(addr, _)| (addr, before_size)),
            };
            self.spans.insert(
                i + 1,
                SourceRange {
                    data_offset: offset,
                    size: after_size,
                    source: after_source,
                },
            );
        }

        for span in &mut self.spans {
            if span.data_offset >= offset {
                span.data_offset += size as Offset;
            }
        }
        let pos = self
            .spans
            .iter()
            .position(|s| s.data_offset >= offset + size as Offset)
            .unwrap_or(self.spans.len());
        self.spans.insert(
            pos,
            SourceRange {
                data_offset: offset,
                size,
                source: None,
            },
        );
    }

    /// The mirror of `insert_unmapped_range`: drop any spans that fall
    /// entirely within `[offset, offset+size)`, splitting the (at most two)
    /// spans that straddle `offset` or `end` into their surviving pieces,
    /// then shift the rest left.
    pub fn remove_mapped_range(&mut self, offset: Offset, size: u32) {
        let end = offset + size as Offset;
        let mut result = Vec::with_capacity(self.spans.len());
        for span in self.spans.drain(..) {
            let span_end = span.data_offset + span.size as Offset;
            if span_end <= offset || span.data_offset >= end {
                result.push(span);
                continue;
            }
            if span.data_offset < offset {
                let before_size = (offset - span.data_offset) as u32;
                result.push(SourceRange {
                    data_offset: span.data_offset,
                    size: before_size,
                    source: span.source.map(|(addr, _)| (addr, before_size)),
                });
            }
            if span_end > end {
                let removed_before_end = (end - span.data_offset) as u32;
                let after_size = span.size - removed_before_end;
                result.push(SourceRange {
                    data_offset: end,
                    size: after_size,
                    source: span.source.map(|(addr, _)| (addr + removed_before_end, after_size)),
                });
            }
            // A span entirely inside [offset, end) contributes nothing.
        }
        for span in &mut result {
            if span.data_offset >= end {
                span.data_offset -= size as Offset;
            }
        }
        self.spans = result;
    }

    /// Translate every span through a uniform shift, used when folding a
    /// source block's ranges into a freshly merged block
    /// (`merge_intersecting_blocks`).
    pub fn translated(&self, shift: Offset) -> SourceRanges {
        SourceRanges {
            spans: self
                .spans
                .iter()
                .map(|s| SourceRange {
                    data_offset: s.data_offset + shift,
                    size: s.size,
                    source: s.source,
                })
                .collect(),
        }
    }

    /// Merge `other`'s spans (already translated into this block's
    /// coordinate space) into this one, preserving sorted order.
    pub fn extend(&mut self, other: SourceRanges) {
        self.spans.extend(other.spans);
        self.spans.sort_by_key(|s| s.data_offset);
    }
}
