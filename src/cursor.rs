//! Cursors: map positions that survive structural mutation.

use std::sync::Arc;

use crate::map::Shared;
use crate::node::{NodePtr, NodeRef};

/// A position in a [`crate::StableMap`], or the end position.
///
/// A cursor stays usable across any mutation of the map, including erasure
/// of the very entry it points at: the entry's key and value remain
/// readable, and advancing the cursor lands on the nearest surviving key
/// in map order. Every operation except [`Cursor::key`] briefly takes the
/// map's shared lock, as does dropping or cloning the cursor.
pub struct Cursor<K, V> {
    shared: Arc<Shared<K, V>>,
    node: NodeRef<K, V>,
}

impl<K, V> Cursor<K, V>
where
    K: Ord,
{
    /// Caller must hold the map's lock in either mode.
    pub(crate) fn new(shared: Arc<Shared<K, V>>, node: NodePtr<K, V>) -> Self {
        Cursor {
            shared,
            node: NodeRef::acquire(node),
        }
    }

    pub(crate) fn node(&self) -> NodePtr<K, V> {
        self.node.ptr()
    }

    pub(crate) fn shared(&self) -> &Arc<Shared<K, V>> {
        &self.shared
    }

    pub fn is_end(&self) -> bool {
        self.node.ptr().is_null()
    }

    /// Key of the entry under the cursor. No lock is needed: the key never
    /// changes after insertion and the cursor itself keeps the entry alive.
    pub fn key(&self) -> Option<&K> {
        let node = self.node.ptr();
        if node.is_null() {
            None
        } else {
            Some(node.key())
        }
    }

    /// Clone of the value under the cursor. Readable even after the entry
    /// has been erased from the map.
    pub fn value(&self) -> Option<V>
    where
        V: Clone,
    {
        let _tree = self.shared.tree.read();
        let node = self.node.ptr();
        if node.is_null() {
            None
        } else {
            Some(node.value().clone())
        }
    }

    /// Clones of the entry under the cursor.
    pub fn pair(&self) -> Option<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        let _tree = self.shared.tree.read();
        let node = self.node.ptr();
        if node.is_null() {
            None
        } else {
            Some((node.key().clone(), node.value().clone()))
        }
    }

    /// Advance to the next key in map order. From an erased entry this is
    /// the smallest live key strictly greater than the entry's key, looked
    /// up from the current root. Returns false once the cursor is at end;
    /// advancing the end cursor keeps it there.
    pub fn move_next(&mut self) -> bool {
        let tree = self.shared.tree.read();
        let node = self.node.ptr();
        if node.is_null() {
            return false;
        }
        let next = if node.is_deleted() {
            tree.right_bound(node.key())
        } else {
            node.next()
        };
        self.node.reset(next);
        !next.is_null()
    }

    /// Step back to the previous key in map order, with the mirror-image
    /// rules of [`Cursor::move_next`]. Stepping back from the end position
    /// lands on the greatest live key.
    pub fn move_prev(&mut self) -> bool {
        let tree = self.shared.tree.read();
        let node = self.node.ptr();
        let prev = if node.is_null() {
            tree.last()
        } else if node.is_deleted() {
            tree.left_bound(node.key())
        } else {
            node.prev()
        };
        self.node.reset(prev);
        !prev.is_null()
    }
}

impl<K, V> Clone for Cursor<K, V> {
    fn clone(&self) -> Self {
        let _tree = self.shared.tree.read();
        Cursor {
            shared: Arc::clone(&self.shared),
            node: self.node.clone(),
        }
    }
}

impl<K, V> Drop for Cursor<K, V> {
    fn drop(&mut self) {
        let _tree = self.shared.tree.read();
        self.node.reset(NodePtr::null());
    }
}

/// Two cursors are equal when they sit on the same entry; all end cursors
/// are equal to each other.
impl<K, V> PartialEq for Cursor<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.node.ptr() == other.node.ptr()
    }
}

impl<K, V> Eq for Cursor<K, V> {}

impl<K, V> std::fmt::Debug for Cursor<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("node", &self.node.ptr())
            .finish()
    }
}

unsafe impl<K, V> Send for Cursor<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
}

unsafe impl<K, V> Sync for Cursor<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
}

/// Iterator over clones of the entries, in key order.
///
/// Backed by a [`Cursor`], so it is as tolerant as one: entries erased
/// ahead of the position are skipped, entries inserted ahead of it are
/// picked up, and the entry already under the cursor is still yielded even
/// if it was just erased.
pub struct Iter<K, V> {
    cursor: Cursor<K, V>,
}

impl<K, V> Iter<K, V> {
    pub(crate) fn new(cursor: Cursor<K, V>) -> Self {
        Iter { cursor }
    }
}

impl<K, V> Iterator for Iter<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        let pair = self.cursor.pair()?;
        self.cursor.move_next();
        Some(pair)
    }
}

#[cfg(test)]
mod tests {
    use crate::StableMap;

    fn filled(n: i32) -> StableMap<i32, i32> {
        let map = StableMap::new();
        for key in 1..=n {
            map.insert(key, key * 100);
        }
        map
    }

    #[test]
    fn cursor_walks_keys_in_order() {
        let map = filled(7);
        let mut cursor = map.cursor_front();
        let mut seen = Vec::new();
        while let Some(&key) = cursor.key() {
            seen.push(key);
            cursor.move_next();
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5, 6, 7]);
        assert!(cursor.is_end());
        assert!(!cursor.move_next());
    }

    #[test]
    fn cursor_walks_keys_backwards() {
        let map = filled(5);
        let mut cursor = map.cursor_back();
        let mut seen = Vec::new();
        while let Some(&key) = cursor.key() {
            seen.push(key);
            cursor.move_prev();
        }
        assert_eq!(seen, vec![5, 4, 3, 2, 1]);
    }

    #[test]
    fn erased_entry_stays_readable_through_the_cursor() {
        let map = filled(5);
        let cursor = map.find(&3);

        assert!(map.remove(&3));
        assert!(!map.contains_key(&3));
        assert_eq!(cursor.key(), Some(&3));
        assert_eq!(cursor.value(), Some(300));
    }

    #[test]
    fn advancing_over_an_erased_entry_reaches_the_next_live_key() {
        let map = filled(5);
        let mut cursor = map.find(&3);

        map.remove(&3);
        assert!(cursor.move_next());
        assert_eq!(cursor.key(), Some(&4));

        let mut back = map.find(&4);
        map.remove(&4);
        assert!(back.move_prev());
        assert_eq!(back.key(), Some(&2));
    }

    #[test]
    fn chained_erasures_collapse_to_the_surviving_key() {
        // Erase 1, 2, 3 through cursors held the whole time; a fourth
        // cursor still parked on 1 must jump straight to 4, the smallest
        // key left alive.
        let map = filled(9);
        let it1 = map.find(&1);
        let it2 = map.find(&2);
        let it3 = map.find(&3);
        let mut walker = it1.clone();

        map.remove_at(&it1);
        map.remove_at(&it2);
        map.remove_at(&it3);

        assert_eq!(walker.key(), Some(&1));
        assert!(walker.move_next());
        assert_eq!(walker.key(), Some(&4));
    }

    #[test]
    fn stepping_between_erasures_visits_each_next_survivor() {
        let map = filled(9);
        let it1 = map.find(&1);
        let it2 = map.find(&2);
        let it3 = map.find(&3);
        let mut walker = it1.clone();

        map.remove_at(&it1);
        assert_eq!(walker.key(), Some(&1));
        assert!(walker.move_next());
        assert_eq!(walker.key(), Some(&2));

        map.remove_at(&it2);
        assert!(walker.move_next());
        assert_eq!(walker.key(), Some(&3));

        map.remove_at(&it3);
        assert!(walker.move_next());
        assert_eq!(walker.key(), Some(&4));
    }

    #[test]
    fn erasing_the_maximum_sends_cursors_past_the_end() {
        let map = filled(10);
        let mut it2 = map.find(&9);
        let mut it1 = map.find(&10);

        let after = map.remove_at(&it1);
        assert!(after.is_end());

        // 9 is still live but its successor is gone.
        assert!(!it2.move_next());
        assert!(it2.is_end());

        // Backing off the tombstoned maximum lands on its live predecessor.
        assert!(it1.move_prev());
        assert_eq!(it1.key(), Some(&9));
    }

    #[test]
    fn cleared_map_turns_every_cursor_into_end() {
        let map = StableMap::new();
        let mut cursors = Vec::new();
        for key in 0..1_000 {
            let (cursor, inserted) = map.insert(key, key);
            assert!(inserted);
            cursors.push(cursor);
        }

        map.clear();
        assert!(map.is_empty());

        for (key, cursor) in cursors.into_iter().enumerate() {
            let mut forward = cursor.clone();
            assert!(!forward.move_next());
            assert!(forward.is_end());

            let mut backward = cursor.clone();
            assert!(!backward.move_prev());
            assert!(backward.is_end());

            // The erased entries themselves remain readable.
            assert_eq!(cursor.key(), Some(&(key as i32)));
        }
    }

    #[test]
    fn cursors_compare_by_position() {
        let map = filled(3);
        assert_eq!(map.find(&2), map.find(&2));
        assert_ne!(map.find(&1), map.find(&2));
        assert_eq!(map.find(&99), map.find(&98));
        assert!(map.find(&99).is_end());
    }

    #[test]
    fn iterator_yields_cloned_pairs_in_order() {
        let map = filled(4);
        let pairs: Vec<(i32, i32)> = map.iter().collect();
        assert_eq!(pairs, vec![(1, 100), (2, 200), (3, 300), (4, 400)]);
    }

    #[test]
    fn iterator_skips_entries_erased_ahead_of_it() {
        let map = filled(6);
        let mut iter = map.iter();
        assert_eq!(iter.next(), Some((1, 100)));
        assert_eq!(iter.next(), Some((2, 200)));

        // The iterator already sits on 3; erasing both 3 and 4 still
        // yields 3 (the entry under the cursor outlives its erasure) and
        // then jumps over 4 to the next live key.
        map.remove(&3);
        map.remove(&4);
        assert_eq!(iter.next(), Some((3, 300)));
        assert_eq!(iter.next(), Some((5, 500)));
        assert_eq!(iter.next(), Some((6, 600)));
        assert_eq!(iter.next(), None);
    }
}
