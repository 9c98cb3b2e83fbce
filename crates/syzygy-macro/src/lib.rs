//! The macro decomposer: turns raw image bytes plus symbol information
//! (debug info, import/export tables, relocations) into a populated
//! `syzygy_block_graph::BlockGraph`, one function/thunk/data-symbol/
//! section-contribution at a time.
//!
//! Image parsing and debug-info parsing are out of scope here; callers
//! supply them through the `ImageSource` and `SymbolSource` collaborator
//! traits instead.

mod collaborators;
mod decompose;
mod error;
mod options;

pub use collaborators::{
    DataSymbol, Fixup, FunctionSymbol, ImageSource, NamedAddress, SectionContribution,
    SectionHeader, SymbolSource, ThunkSymbol,
};
pub use decompose::decompose;
pub use error::Error;
pub use options::Options;
