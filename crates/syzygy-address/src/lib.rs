//! Address types and the generic non-overlapping interval map built on them.
//!
//! Three distinct 32-bit address spaces occur in a PE image: relative
//! (stable across relocation), absolute (a runtime pointer value), and file
//! offset (a byte position on disk). Each variant is its own newtype so the
//! compiler rejects mixing them instead of relying on callers to keep track.

mod address;
mod range;
mod space;

pub use address::{AbsoluteAddress, FileOffset, RelativeAddress};
pub use range::AddressRange;
pub use space::AddressSpace;
