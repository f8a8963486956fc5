//! Single-threaded AVL engine.
//!
//! This is the structural half of the map: lookup, insertion, erasure with
//! in-order successor splicing, and height-driven rebalancing. It knows
//! nothing about locking; the facade serialises access to it. Every link
//! assignment goes through the counted setters below, so the reference
//! counts on the nodes always mirror the links actually installed.

use std::borrow::Borrow;
use std::cmp;
use std::cmp::Ordering;

use crate::node::{release_unreferenced, NodePtr};

pub(crate) struct Tree<K, V> {
    pub root: NodePtr<K, V>,
    pub size: usize,
}

impl<K, V> Tree<K, V> {
    pub fn new() -> Self {
        Tree {
            root: NodePtr::null(),
            size: 0,
        }
    }

    /// Leftmost live node, or null when the map is empty.
    pub fn first(&self) -> NodePtr<K, V> {
        if self.root.is_null() {
            NodePtr::null()
        } else {
            self.root.min_node()
        }
    }

    /// Rightmost live node, or null when the map is empty.
    pub fn last(&self) -> NodePtr<K, V> {
        if self.root.is_null() {
            NodePtr::null()
        } else {
            self.root.max_node()
        }
    }

    /// Free every node still linked into the tree. Only sound once no
    /// cursor can be holding onto any of them.
    pub fn destroy_all(&mut self) {
        let mut pending = Vec::new();
        if !self.root.is_null() {
            pending.push(self.root);
        }
        while let Some(node) = pending.pop() {
            if !node.left().is_null() {
                pending.push(node.left());
            }
            if !node.right().is_null() {
                pending.push(node.right());
            }
            node.free();
        }
        self.root = NodePtr::null();
        self.size = 0;
    }
}

impl<K, V> Tree<K, V>
where
    K: Ord,
{
    /// Walk from the root towards `key`. Returns `(parent, node)`: the node
    /// holding the key and its parent, or, on a miss, the node whose empty
    /// child slot the key would occupy and null.
    pub fn locate<Q>(&self, key: &Q) -> (NodePtr<K, V>, NodePtr<K, V>)
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut parent = NodePtr::null();
        let mut node = self.root;
        while !node.is_null() {
            match key.cmp(node.key().borrow()) {
                Ordering::Equal => break,
                Ordering::Less => {
                    parent = node;
                    node = node.left();
                }
                Ordering::Greater => {
                    parent = node;
                    node = node.right();
                }
            }
        }
        (parent, node)
    }

    /// Smallest live key strictly greater than `key`, by descent from the
    /// current root. Works whether or not `key` is still present.
    pub fn right_bound<Q>(&self, key: &Q) -> NodePtr<K, V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut node = self.root;
        let mut bound = NodePtr::null();
        while !node.is_null() {
            if key < node.key().borrow() {
                bound = node;
                node = node.left();
            } else {
                node = node.right();
            }
        }
        bound
    }

    /// Largest live key strictly less than `key`.
    pub fn left_bound<Q>(&self, key: &Q) -> NodePtr<K, V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut node = self.root;
        let mut bound = NodePtr::null();
        while !node.is_null() {
            if key > node.key().borrow() {
                bound = node;
                node = node.right();
            } else {
                node = node.left();
            }
        }
        bound
    }

    /// Install a freshly allocated node under the parent slot produced by
    /// [`Tree::locate`], then rebalance the path above it.
    pub fn insert_node(&mut self, parent: NodePtr<K, V>, node: NodePtr<K, V>) {
        self.size += 1;
        if self.root.is_null() {
            self.root = node;
            node.inc_ref();
            return;
        }
        set_parent(node, parent);
        if node.key() < parent.key() {
            set_left_child(parent, node);
        } else {
            set_right_child(parent, node);
        }
        update_height(parent);
        self.rebalance_path(parent);
    }

    /// Splice a live node out of the tree and tombstone it.
    ///
    /// With at most one child the child is rewired straight into the parent
    /// slot. With two children the in-order successor `s = min(right)`
    /// takes the node's place; when `s` is not the right child itself, its
    /// own right subtree first moves up into `s`'s old parent. The spliced
    /// node keeps its outgoing links (still counted) so cursors parked on
    /// it remain anchored; it is freed here only if no cursor holds it.
    pub fn erase_node(&mut self, node: NodePtr<K, V>) {
        let parent = node.parent();
        let replacement;
        let mut for_rebalance;
        if node.left().is_null() || node.right().is_null() {
            replacement = if !node.left().is_null() {
                node.left()
            } else {
                node.right()
            };
            if !replacement.is_null() {
                set_parent(replacement, parent);
            }
            update_at_parent(parent, node, replacement);
            for_rebalance = parent;
        } else {
            replacement = node.right().min_node();
            let replacement_parent = replacement.parent();
            set_left_child(replacement, node.left());
            set_parent(node.left(), replacement);
            update_at_parent(parent, node, replacement);
            for_rebalance = replacement;
            if node.right() != replacement {
                if !replacement.right().is_null() {
                    set_parent(replacement.right(), replacement_parent);
                }
                set_left_child(replacement_parent, replacement.right());
                set_right_child(replacement, node.right());
                set_parent(node.right(), replacement);
                for_rebalance = replacement_parent;
            }
            set_parent(replacement, parent);
        }
        node.mark_deleted();
        if node == self.root {
            self.update_root(replacement);
        }
        self.size -= 1;
        update_height(for_rebalance);
        self.rebalance_path(for_rebalance);
        if node.ref_count() == 0 {
            release_unreferenced(node);
        }
    }

    /// Rebalance every node on the path from `node` up to and including the
    /// root, relinking each (possibly new) subtree root into its parent on
    /// the side it came from.
    fn rebalance_path(&mut self, node: NodePtr<K, V>) {
        if node.is_null() {
            return;
        }
        let mut node = node;
        while node != self.root {
            let was_left = node.is_left_child();
            node = rebalance(node);
            if was_left {
                set_left_child(node.parent(), node);
            } else {
                set_right_child(node.parent(), node);
            }
            node = node.parent();
        }
        let new_root = rebalance(self.root);
        self.update_root(new_root);
    }

    fn update_root(&mut self, new_root: NodePtr<K, V>) {
        if self.root == new_root {
            return;
        }
        self.root.dec_ref();
        self.root = new_root;
        self.root.inc_ref();
    }
}

/// Point `node.parent` at `parent`, moving the count from the old target
/// to the new one. Like the other counted setters this never frees: a
/// count that transiently reaches zero mid-splice is picked back up by a
/// later link, and the erase path reaps the spliced node at the end.
fn set_parent<K, V>(node: NodePtr<K, V>, parent: NodePtr<K, V>) {
    node.parent().dec_ref();
    node.set_parent(parent);
    parent.inc_ref();
}

fn set_left_child<K, V>(parent: NodePtr<K, V>, node: NodePtr<K, V>) {
    parent.left().dec_ref();
    parent.set_left(node);
    node.inc_ref();
}

fn set_right_child<K, V>(parent: NodePtr<K, V>, node: NodePtr<K, V>) {
    parent.right().dec_ref();
    parent.set_right(node);
    node.inc_ref();
}

/// Replace `old_node` with `new_node` in the parent's child slot. A null
/// parent means `old_node` was the root; the caller fixes the root link.
fn update_at_parent<K, V>(parent: NodePtr<K, V>, old_node: NodePtr<K, V>, new_node: NodePtr<K, V>) {
    if parent.is_null() {
        return;
    }
    if old_node.is_left_child() {
        set_left_child(parent, new_node);
    } else {
        set_right_child(parent, new_node);
    }
}

fn update_height<K, V>(node: NodePtr<K, V>) {
    if !node.is_null() {
        node.set_height(1 + cmp::max(node.left().height(), node.right().height()));
    }
}

fn balance_factor<K, V>(node: NodePtr<K, V>) -> isize {
    if node.is_null() {
        0
    } else {
        node.left().height() as isize - node.right().height() as isize
    }
}

fn rotate_left<K, V>(node: NodePtr<K, V>) -> NodePtr<K, V> {
    let right_child = node.right();
    let moved = right_child.left();
    set_right_child(node, moved);
    if !moved.is_null() {
        set_parent(moved, node);
    }
    set_left_child(right_child, node);
    set_parent(right_child, node.parent());
    set_parent(node, right_child);
    update_height(node);
    update_height(right_child);
    right_child
}

fn rotate_right<K, V>(node: NodePtr<K, V>) -> NodePtr<K, V> {
    let left_child = node.left();
    let moved = left_child.right();
    set_left_child(node, moved);
    if !moved.is_null() {
        set_parent(moved, node);
    }
    set_right_child(left_child, node);
    set_parent(left_child, node.parent());
    set_parent(node, left_child);
    update_height(node);
    update_height(left_child);
    left_child
}

/// Restore the AVL shape at `node`, returning the subtree's (possibly new)
/// root with its height refreshed. The caller relinks it into the parent.
fn rebalance<K, V>(node: NodePtr<K, V>) -> NodePtr<K, V> {
    let bf = balance_factor(node);
    let mut node = node;
    if bf == 2 {
        if balance_factor(node.left()) == -1 {
            set_left_child(node, rotate_left(node.left()));
        }
        node = rotate_right(node);
    } else if bf == -2 {
        if balance_factor(node.right()) == 1 {
            set_right_child(node, rotate_right(node.right()));
        }
        node = rotate_left(node);
    }
    update_height(node);
    node
}

#[cfg(test)]
impl<K, V> Tree<K, V>
where
    K: Ord,
{
    /// Assert every structural invariant over the live tree: link
    /// consistency, AVL balance on real subtree heights, stored heights,
    /// in-order key ordering and the size counter.
    pub(crate) fn verify(&self) {
        assert!(self.root.is_null() || self.root.parent().is_null());
        self.verify_subtree(self.root);

        let mut count = 0;
        let mut node = self.first();
        let mut prev = NodePtr::null();
        while !node.is_null() {
            if !prev.is_null() {
                assert!(prev.key() < node.key());
            }
            count += 1;
            prev = node;
            node = node.next();
        }
        assert_eq!(count, self.size);
    }

    fn verify_subtree(&self, node: NodePtr<K, V>) -> isize {
        if node.is_null() {
            return 0;
        }
        assert!(!node.is_deleted());
        if !node.left().is_null() {
            assert_eq!(node.left().parent(), node);
        }
        if !node.right().is_null() {
            assert_eq!(node.right().parent(), node);
        }
        let lheight = self.verify_subtree(node.left());
        let rheight = self.verify_subtree(node.right());
        let bf = lheight - rheight;
        assert!((-1..=1).contains(&bf));
        let height = 1 + cmp::max(lheight, rheight);
        assert_eq!(node.height() as isize, height);
        height
    }

    /// Assert the quiescent count ledger: with no cursors alive, every live
    /// node is held by exactly its incoming child slot (or the root link)
    /// plus one back-reference per child.
    pub(crate) fn verify_counts(&self) {
        let mut node = self.first();
        while !node.is_null() {
            let mut expected = 1;
            if !node.left().is_null() {
                expected += 1;
            }
            if !node.right().is_null() {
                expected += 1;
            }
            assert_eq!(node.ref_count(), expected);
            node = node.next();
        }
    }
}
