//! This library provides an ordered map that can be shared between threads
//! and whose cursors stay usable across mutation, including erasure of the
//! very entry a cursor points at.
//!
//! The map is an AVL tree behind a single reader-writer lock. Erasing an
//! entry splices its node out of the tree but only tombstones it while any
//! cursor still points there, so the cursor keeps its key and value
//! readable and, when advanced, lands on the nearest surviving key in map
//! order (see [`Cursor`]). Lookups hand back guards that borrow the value
//! under the lock (see [`StableMap::get`]), and [`StableMap::iter`] walks
//! clones of the entries in key order.

mod cursor;
mod error;
mod map;
mod node;
mod tree;

pub use cursor::{Cursor, Iter};
pub use error::{Error, Result};
pub use map::{StableMap, ValueMut, ValueRef};
