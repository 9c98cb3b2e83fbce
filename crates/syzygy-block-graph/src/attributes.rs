//! Block and label attribute bitsets.

use bitflags::bitflags;

bitflags! {
    /// Attributes carried by a `Block`.
    #[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct BlockAttributes: u32 {
        /// The block is a function that never returns to its caller.
        const NON_RETURNING_FUNCTION   = 1 << 0;
        /// Inferred to fill a gap in section coverage; not named by any symbol.
        const GAP_BLOCK                = 1 << 1;
        /// Parsed directly from the PE header/directories; never coalesced.
        const PE_PARSED                = 1 << 2;
        /// Carved from a section-contribution entry rather than a symbol.
        const SECTION_CONTRIBUTION     = 1 << 3;
        /// A gap block whose bytes are uniform `0x00` or `0xCC`.
        const PADDING_BLOCK            = 1 << 4;
        /// Contains inline assembly the compiler didn't generate from source.
        const HAS_INLINE_ASSEMBLY      = 1 << 5;
        /// Built by a compiler whose idioms this toolchain doesn't model.
        const BUILT_BY_UNSUPPORTED_COMPILER = 1 << 6;
        /// Produced by a prior Syzygy transform pass, not the original compiler.
        const BUILT_BY_SYZYGY          = 1 << 7;
        /// Disassembly did not account for every byte in the block.
        const INCOMPLETE_DISASSEMBLY   = 1 << 8;
        /// Disassembly hit a decode error somewhere in the block.
        const ERRORED_DISASSEMBLY      = 1 << 9;
        /// The block participates in SEH/C++ exception handling.
        const HAS_EXCEPTION_HANDLING   = 1 << 10;
        /// The walk ran past the end of the block's nominal extent.
        const DISASSEMBLED_PAST_END    = 1 << 11;
        /// A compiler-synthesized redirection stub (e.g. an import jump).
        const THUNK                    = 1 << 12;
        /// Originates from a COFF group section (`.CRT$XCA`-style ranges).
        const COFF_GROUP               = 1 << 13;
        /// A COFF static-initializer table entry block.
        const COFF_STATIC_INITIALIZER  = 1 << 14;
        /// A COFF export thunk.
        const COFF_EXPORT              = 1 << 15;
        /// A COFF import-address-table slot.
        const COFF_IAT                 = 1 << 16;
        /// A COFF COMDAT-folded block.
        const COFF_COMDAT              = 1 << 17;
    }
}

impl BlockAttributes {
    /// Attributes that propagate through a merge only when *every* merged
    /// block carries them.
    pub const UNIFORM: BlockAttributes = BlockAttributes {
        bits: BlockAttributes::GAP_BLOCK.bits
            | BlockAttributes::PADDING_BLOCK.bits
            | BlockAttributes::BUILT_BY_SYZYGY.bits,
    };
}

bitflags! {
    /// Attributes carried by a `Label`.
    #[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct LabelAttributes: u32 {
        /// Marks the start of executable code (a function or basic block entry).
        const CODE           = 1 << 0;
        /// Start of a debug-info source range.
        const DEBUG_START    = 1 << 1;
        /// End of a debug-info source range.
        const DEBUG_END      = 1 << 2;
        /// Start of a lexical scope.
        const SCOPE_START    = 1 << 3;
        /// End of a lexical scope.
        const SCOPE_END      = 1 << 4;
        /// The site of a `call` instruction, for call-graph recovery.
        const CALL_SITE      = 1 << 5;
        /// The start of a compiler-generated jump table.
        const JUMP_TABLE     = 1 << 6;
        /// The start of a compiler-generated switch case table.
        const CASE_TABLE     = 1 << 7;
        /// Marks a run of data (as opposed to code).
        const DATA           = 1 << 8;
        /// Exported under a public symbol name.
        const PUBLIC_SYMBOL  = 1 << 9;
    }
}

impl LabelAttributes {
    /// Validate the attribute combination rules:
    ///
    /// - at least one attribute must be set;
    /// - `JumpTable`/`CaseTable` each imply `Data`, and only `JumpTable` may
    ///   additionally carry `DebugEnd`;
    /// - `Data` combined with anything other than a table attribute is invalid;
    /// - `Code` may coexist with the debug/scope attributes;
    /// - `CallSite` and `PublicSymbol` may coexist with anything.
    pub fn is_valid(self) -> bool {
        if self.is_empty() {
            return false;
        }

        // CallSite/PublicSymbol are universal riders; strip them before
        // applying the remaining combination rules.
        let core = self & !(LabelAttributes::CALL_SITE | LabelAttributes::PUBLIC_SYMBOL);
        if core.is_empty() {
            return true;
        }

        let is_table =
            core.intersects(LabelAttributes::JUMP_TABLE | LabelAttributes::CASE_TABLE);
        if is_table {
            if core.contains(LabelAttributes::JUMP_TABLE) && core.contains(LabelAttributes::CASE_TABLE) {
                return false;
            }
            if !core.contains(LabelAttributes::DATA) {
                return false;
            }
            if core.contains(LabelAttributes::CASE_TABLE) && core.contains(LabelAttributes::DEBUG_END) {
                return false;
            }
            let allowed = LabelAttributes::DATA
                | LabelAttributes::JUMP_TABLE
                | LabelAttributes::CASE_TABLE
                | LabelAttributes::DEBUG_END;
            return (core & !allowed).is_empty();
        }

        if core.contains(LabelAttributes::DATA) {
            return core == LabelAttributes::DATA;
        }

        if core.contains(LabelAttributes::CODE) {
            let allowed = LabelAttributes::CODE
                | LabelAttributes::DEBUG_START
                | LabelAttributes::DEBUG_END
                | LabelAttributes::SCOPE_START
                | LabelAttributes::SCOPE_END;
            return (core & !allowed).is_empty();
        }

        // Bare debug/scope attributes with no Code or Data are left
        // unconstrained; any combination of them is valid.
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_invalid() {
        assert!(!LabelAttributes::empty().is_valid());
    }

    #[test]
    fn jump_table_implies_data_and_allows_debug_end() {
        assert!((LabelAttributes::JUMP_TABLE | LabelAttributes::DATA).is_valid());
        assert!(
            (LabelAttributes::JUMP_TABLE | LabelAttributes::DATA | LabelAttributes::DEBUG_END)
                .is_valid()
        );
        assert!(!LabelAttributes::JUMP_TABLE.is_valid()); // missing Data
    }

    #[test]
    fn case_table_rejects_debug_end() {
        assert!((LabelAttributes::CASE_TABLE | LabelAttributes::DATA).is_valid());
        assert!(
            !(LabelAttributes::CASE_TABLE | LabelAttributes::DATA | LabelAttributes::DEBUG_END)
                .is_valid()
        );
    }

    #[test]
    fn data_alone_or_with_table_only() {
        assert!(LabelAttributes::DATA.is_valid());
        assert!(!(LabelAttributes::DATA | LabelAttributes::CODE).is_valid());
    }

    #[test]
    fn code_coexists_with_debug_and_scope() {
        assert!(
            (LabelAttributes::CODE | LabelAttributes::DEBUG_START | LabelAttributes::SCOPE_START)
                .is_valid()
        );
        assert!(!(LabelAttributes::CODE | LabelAttributes::DATA).is_valid());
    }

    #[test]
    fn call_site_and_public_symbol_coexist_with_anything() {
        assert!((LabelAttributes::CALL_SITE | LabelAttributes::DATA).is_valid());
        assert!(
            (LabelAttributes::PUBLIC_SYMBOL | LabelAttributes::CODE | LabelAttributes::CALL_SITE)
                .is_valid()
        );
    }

    #[test]
    fn uniform_attributes_mask() {
        assert!(BlockAttributes::UNIFORM.contains(BlockAttributes::GAP_BLOCK));
        assert!(!BlockAttributes::UNIFORM.contains(BlockAttributes::THUNK));
    }
}
