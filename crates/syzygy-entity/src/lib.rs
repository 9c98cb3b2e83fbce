//! Densely numbered entity references used as handles throughout Syzygy.
//!
//! The core decomposition subsystem never hands out a raw pointer to a
//! `Block` or `Section`: every cross-reference between graph objects is a
//! small `Copy` handle wrapping a `u32` index into the owning container.
//! This sidesteps any shared-ownership or weak-pointer machinery a
//! mutually-referential block graph would otherwise need, at the cost of
//! one indirection through the graph on every dereference.
//!
//! An `EntityRef` trait identifies the handle types, a `PrimaryMap` owns
//! a dense `Vec<V>` and mints fresh keys, and a `SecondaryMap` holds
//! auxiliary per-entity data (visited-bits, generation counters) that
//! doesn't own the entities.

mod iter;
mod keys;
mod map;
mod primary_map;
mod reference;

pub use iter::{Iter, IterMut};
pub use keys::Keys;
pub use map::SecondaryMap;
pub use primary_map::PrimaryMap;
pub use reference::EntityRef;
