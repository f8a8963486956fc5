//! The map facade: one reader-writer lock around the tree engine.

use std::borrow::Borrow;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

use crate::cursor::{Cursor, Iter};
use crate::error::{Error, Result};
use crate::node::NodePtr;
use crate::tree::Tree;

/// Tree state shared between the map and every cursor handed out of it.
/// Kept alive until the last of them goes away, so a cursor may outlive
/// the map and still read its entry.
pub(crate) struct Shared<K, V> {
    pub(crate) tree: RwLock<Tree<K, V>>,
}

impl<K, V> Drop for Shared<K, V> {
    fn drop(&mut self) {
        // No cursor can exist any more, so whatever is still linked into
        // the tree is freed wholesale.
        self.tree.get_mut().destroy_all();
    }
}

/// An ordered map that can be used from many threads at once and whose
/// cursors survive erasure of their entry.
///
/// Reads run in parallel under a shared lock; mutations take the lock
/// exclusively, perform one descent plus the local splice and the
/// logarithmic rebalance, and release it. Erased entries are tombstoned
/// rather than dropped while any cursor still points at them, which is
/// what keeps a [`Cursor`] usable across arbitrary mutation (see the
/// cursor docs for the advance rules).
///
/// A long-parked cursor pins its tombstone, and through retained links
/// possibly a chain of earlier tombstones, until it moves on or is
/// dropped. That memory is reclaimed all at once when the pin goes away.
pub struct StableMap<K, V> {
    shared: Arc<Shared<K, V>>,
}

unsafe impl<K, V> Send for StableMap<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
}

unsafe impl<K, V> Sync for StableMap<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
}

impl<K, V> StableMap<K, V>
where
    K: Ord,
{
    pub fn new() -> Self {
        StableMap {
            shared: Arc::new(Shared {
                tree: RwLock::new(Tree::new()),
            }),
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.shared.tree.read().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cursor over the entry with this key, or the end cursor.
    pub fn find<Q>(&self, key: &Q) -> Cursor<K, V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let tree = self.shared.tree.read();
        let (_, node) = tree.locate(key);
        self.make_cursor(node)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let tree = self.shared.tree.read();
        let (_, node) = tree.locate(key);
        !node.is_null()
    }

    /// Number of entries with this key: 0 or 1, keys being unique.
    pub fn count<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.contains_key(key) as usize
    }

    /// Shared borrow of the value under this key. The returned guard holds
    /// the read lock for as long as it lives.
    pub fn get<Q>(&self, key: &Q) -> Option<ValueRef<'_, K, V>>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let tree = self.shared.tree.read();
        let (_, node) = tree.locate(key);
        if node.is_null() {
            None
        } else {
            Some(ValueRef { _guard: tree, node })
        }
    }

    /// Like [`StableMap::get`], but a missing key is an error.
    pub fn at<Q>(&self, key: &Q) -> Result<ValueRef<'_, K, V>>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.get(key).ok_or(Error::KeyNotFound)
    }

    /// Insert a new entry. If the key is already present the map is left
    /// untouched and the supplied value is dropped.
    ///
    /// Returns a cursor over the entry with this key, live whichever way
    /// the insertion went, and whether a new entry was created.
    pub fn insert(&self, key: K, value: V) -> (Cursor<K, V>, bool) {
        let mut tree = self.shared.tree.write();
        let (parent, existing) = tree.locate(&key);
        if !existing.is_null() {
            return (self.make_cursor(existing), false);
        }
        let node = NodePtr::alloc(key, value);
        tree.insert_node(parent, node);
        trace!(size = tree.size, "entry inserted");
        (self.make_cursor(node), true)
    }

    /// Insert the value produced by `make` under this key, unless the key
    /// is already present.
    ///
    /// `make` runs with no lock held; the insertion slot is re-probed
    /// afterwards, and if another writer got there first the freshly built
    /// value is dropped (outside the lock) and the existing entry wins.
    pub fn get_or_insert_with<F>(&self, key: K, make: F) -> (Cursor<K, V>, bool)
    where
        F: FnOnce() -> V,
    {
        {
            let tree = self.shared.tree.read();
            let (_, existing) = tree.locate(&key);
            if !existing.is_null() {
                return (self.make_cursor(existing), false);
            }
        }
        let value = make();
        let mut tree = self.shared.tree.write();
        let (parent, existing) = tree.locate(&key);
        if !existing.is_null() {
            return (self.make_cursor(existing), false);
        }
        let node = NodePtr::alloc(key, value);
        tree.insert_node(parent, node);
        trace!(size = tree.size, "entry inserted");
        (self.make_cursor(node), true)
    }

    /// Exclusive borrow of the value under this key, inserting a default
    /// value first if the key is missing. The returned guard holds the
    /// write lock for as long as it lives.
    pub fn get_or_default(&self, key: K) -> ValueMut<'_, K, V>
    where
        V: Default,
    {
        let value = V::default();
        let mut tree = self.shared.tree.write();
        let (parent, existing) = tree.locate(&key);
        let node = if existing.is_null() {
            let node = NodePtr::alloc(key, value);
            tree.insert_node(parent, node);
            trace!(size = tree.size, "entry inserted");
            node
        } else {
            existing
        };
        ValueMut { _guard: tree, node }
    }

    /// Update the value under this key in place. Returns whether the key
    /// was present. `f` runs under the write lock and must not touch the
    /// map itself.
    pub fn update<Q, F>(&self, key: &Q, f: F) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
        F: FnOnce(&mut V),
    {
        let tree = self.shared.tree.write();
        let (_, node) = tree.locate(key);
        if node.is_null() {
            return false;
        }
        f(node.value_mut());
        true
    }

    /// Erase the entry with this key. Returns whether it was present.
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut tree = self.shared.tree.write();
        let (_, node) = tree.locate(key);
        if node.is_null() {
            return false;
        }
        tree.erase_node(node);
        trace!(size = tree.size, "entry removed");
        true
    }

    /// Erase the entry under the cursor, returning a cursor over its
    /// in-order successor. If the entry was already erased (or the cursor
    /// is at end) nothing happens and the end cursor is returned.
    ///
    /// The successor is captured under the read lock, then the removal
    /// itself re-checks under the write lock. A mutation slipping in
    /// between can tombstone the captured successor, in which case the
    /// returned cursor heals itself on its next advance like any other
    /// cursor parked on a tombstone.
    ///
    /// # Panics
    ///
    /// Panics if the cursor was obtained from a different map.
    pub fn remove_at(&self, cursor: &Cursor<K, V>) -> Cursor<K, V> {
        use crate::node::NodeRef;

        assert!(
            Arc::ptr_eq(&self.shared, cursor.shared()),
            "cursor belongs to a different map"
        );

        let successor = {
            let _tree = self.shared.tree.read();
            let target = cursor.node();
            if target.is_null() || target.is_deleted() {
                return self.make_cursor(NodePtr::null());
            }
            NodeRef::acquire(target.next())
        };

        let mut tree = self.shared.tree.write();
        let target = cursor.node();
        let out = if target.is_deleted() {
            self.make_cursor(NodePtr::null())
        } else {
            tree.erase_node(target);
            trace!(size = tree.size, "entry removed through a cursor");
            self.make_cursor(successor.ptr())
        };
        // The pin on the successor is dropped while the lock is still held.
        drop(successor);
        out
    }

    /// Cursor over the smallest key, or the end cursor on an empty map.
    pub fn cursor_front(&self) -> Cursor<K, V> {
        let tree = self.shared.tree.read();
        self.make_cursor(tree.first())
    }

    /// Cursor over the greatest key, or the end cursor on an empty map.
    pub fn cursor_back(&self) -> Cursor<K, V> {
        let tree = self.shared.tree.read();
        self.make_cursor(tree.last())
    }

    /// Iterator over clones of the entries, in key order.
    pub fn iter(&self) -> Iter<K, V>
    where
        K: Clone,
        V: Clone,
    {
        Iter::new(self.cursor_front())
    }

    /// Erase every entry, through the same path as [`StableMap::remove`]
    /// so that parked cursors observe tombstones and converge to the end
    /// position, never a stale view of the old tree.
    pub fn clear(&self) {
        let mut tree = self.shared.tree.write();
        let removed = tree.size;
        while !tree.root.is_null() {
            let victim = tree.first();
            tree.erase_node(victim);
        }
        debug!(removed, "map cleared");
    }

    /// Caller must hold the tree lock in either mode.
    fn make_cursor(&self, node: NodePtr<K, V>) -> Cursor<K, V> {
        Cursor::new(Arc::clone(&self.shared), node)
    }
}

/// Shared borrow of a single value, holding the map's read lock.
pub struct ValueRef<'a, K, V> {
    _guard: RwLockReadGuard<'a, Tree<K, V>>,
    node: NodePtr<K, V>,
}

impl<'a, K, V> Deref for ValueRef<'a, K, V> {
    type Target = V;

    fn deref(&self) -> &V {
        self.node.value()
    }
}

/// Exclusive borrow of a single value, holding the map's write lock.
pub struct ValueMut<'a, K, V> {
    _guard: RwLockWriteGuard<'a, Tree<K, V>>,
    node: NodePtr<K, V>,
}

impl<'a, K, V> Deref for ValueMut<'a, K, V> {
    type Target = V;

    fn deref(&self) -> &V {
        self.node.value()
    }
}

impl<'a, K, V> DerefMut for ValueMut<'a, K, V> {
    fn deref_mut(&mut self) -> &mut V {
        self.node.value_mut()
    }
}

#[cfg(test)]
impl<K, V> StableMap<K, V>
where
    K: Ord,
{
    /// Assert the structural invariants, and the count ledger when the
    /// caller knows no cursor is alive.
    pub(crate) fn verify(&self, quiescent: bool) {
        let tree = self.shared.tree.read();
        tree.verify();
        if quiescent {
            tree.verify_counts();
        }
    }
}
