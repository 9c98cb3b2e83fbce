//! A tiny string interner owned by the `BlockGraph`.
//!
//! Block and label names are frequently repeated (the same compiland name
//! across hundreds of blocks, the same synthesized `"From 0x1234"` label
//! prefix), so label and block names resolve to interned strings that
//! live as long as the graph does. A `Rc<str>` is already a cheap,
//! reference-counted, graph-lifetime-bound handle, so the interner here
//! is simply a dedup table mapping `&str -> Rc<str>`.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// An interned string: cheap to clone, compares by pointer-equal content.
#[derive(Clone, Eq)]
pub struct InternedString(Rc<str>);

impl InternedString {
    /// The empty string, uninterned. Used as the default name for blocks
    /// and labels that are never given one; since it's never compared for
    /// pointer identity against the interner's table, not routing it
    /// through `Interner::intern` is harmless.
    pub fn empty() -> Self {
        InternedString(Rc::from(""))
    }

    /// Borrow the underlying string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True iff this is the empty string (an unnamed block or label).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for InternedString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl std::hash::Hash for InternedString {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl fmt::Display for InternedString {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for InternedString {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// The graph-owned interning table.
#[derive(Default)]
pub struct Interner {
    table: HashMap<Rc<str>, ()>,
}

impl Interner {
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// Intern `s`, returning a handle shared with any prior interning of an
    /// equal string.
    pub fn intern(&mut self, s: &str) -> InternedString {
        if let Some((key, _)) = self.table.get_key_value(s) {
            return InternedString(key.clone());
        }
        let rc: Rc<str> = Rc::from(s);
        self.table.insert(rc.clone(), ());
        InternedString(rc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_dedups() {
        let mut interner = Interner::new();
        let a = interner.intern("foo");
        let b = interner.intern("foo");
        assert_eq!(a, b);
        assert!(Rc::ptr_eq(&a.0, &b.0));
    }
}
