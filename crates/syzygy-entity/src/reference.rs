//! The `EntityRef` trait and the `entity_impl!` macro for defining handle types.

/// A type wrapping a small integer index, used as the key for an entity map.
///
/// This trait doesn't depend on the specific entity types, just their
/// integer indexes.
pub trait EntityRef: Copy + Eq {
    /// Create a new entity reference from a small integer.
    ///
    /// This should crash if the requested index is not representable.
    fn new(index: usize) -> Self;

    /// Get the index of this reference.
    fn index(self) -> usize;
}

/// Generate a new entity reference type with the given name and short
/// display prefix.
///
/// The type is a thin, `Copy`, 32-bit wrapper implementing `EntityRef`,
/// `Debug`, and `Display` in a way that matches Syzygy's debug-dump format
/// (`block12`, `sec3`, ...).
#[macro_export]
macro_rules! entity_impl {
    ($entity:ident, $prefix:expr) => {
        impl $crate::EntityRef for $entity {
            fn new(index: usize) -> Self {
                debug_assert!(index < (::core::u32::MAX as usize));
                $entity(index as u32)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl ::core::fmt::Display for $entity {
            fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }

        impl ::core::fmt::Debug for $entity {
            fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
                (self as &dyn ::core::fmt::Display).fmt(f)
            }
        }
    };

    ($entity:ident) => {
        $crate::entity_impl!($entity, "");
    };
}
