//! Concurrent B-link tree.
//!
//! The tree owns the root pointer and nothing else. All coordination happens
//! through the per-node latches; the tree latch (an `RwLock` around the root
//! pointer) is taken exclusively only to plant the first root and to swap in
//! a new root after the old one splits.
//!
//! # Latch order
//!
//! Lower levels before higher levels, and left before right within a level.
//! Descent holds one latch at a time. Split propagation holds the child while
//! latching its parent. Both orders are consistent, so inserts cannot
//! deadlock.

use std::cmp;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::btree::node::{LatchedNode, Node, NodeRef, Payload, Scan, SplitResult};

/// Fanout bound used by [`BLinkTree::new`].
pub const DEFAULT_ORDER: usize = 2;

/// Smallest accepted fanout bound.
pub const MIN_ORDER: usize = 2;

/// An in-memory B-link tree shared between threads by reference.
pub struct BLinkTree<K, V> {
    /// Tree latch. Guards planting and replacing the root.
    root: RwLock<Option<NodeRef<K, V>>>,
    order: usize,
    len: AtomicUsize,
}

impl<K: Ord + Clone, V> BLinkTree<K, V> {
    /// Create an empty tree with [`DEFAULT_ORDER`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            root: RwLock::new(None),
            order: DEFAULT_ORDER,
            len: AtomicUsize::new(0),
        }
    }

    /// Create an empty tree whose non-root nodes hold `order..=2*order` keys.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::InvalidOrder`] if `order` is below [`MIN_ORDER`].
    pub const fn with_order(order: usize) -> Result<Self, TreeError> {
        if order < MIN_ORDER {
            return Err(TreeError::InvalidOrder(order));
        }
        Ok(Self {
            root: RwLock::new(None),
            order,
            len: AtomicUsize::new(0),
        })
    }

    #[must_use]
    pub const fn order(&self) -> usize {
        self.order
    }

    /// Number of keys stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of levels, 0 for an empty tree.
    #[must_use]
    pub fn height(&self) -> usize {
        self.root_snapshot()
            .map_or(0, |root| root.lock().level() + 1)
    }

    /// Current root, read under the tree latch and released immediately.
    pub(crate) fn root_snapshot(&self) -> Option<NodeRef<K, V>> {
        self.root.read().as_ref().map(Arc::clone)
    }

    /// Insert `key` with `value`.
    ///
    /// Returns `false` and leaves the tree untouched if the key is already
    /// present.
    pub fn insert(&self, key: K, value: V) -> bool {
        let root = if let Some(root) = self.root_snapshot() {
            root
        } else {
            let mut slot = self.root.write();
            if let Some(root) = slot.as_ref() {
                // Another thread planted the root first
                Arc::clone(root)
            } else {
                *slot = Some(Node::new_root_leaf(self.order, key, value));
                drop(slot);
                self.len.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(order = self.order, "planted root leaf");
                return true;
            }
        };

        let mut ancestors = Vec::new();
        let leaf = Self::find_leaf(root, &key, Some(&mut ancestors));
        let leaf = Node::move_right(&leaf, &key);

        if leaf.contains(&key) {
            let level = leaf.level();
            drop(leaf);
            tracing::debug!(level, "rejected duplicate key");
            return false;
        }

        self.insert_or_split(leaf, key, Payload::Value(value), ancestors);
        self.len.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Look up the value stored under `key`.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let root = self.root_snapshot()?;
        let leaf = Node::move_right(&Self::find_leaf(root, key, None), key);
        leaf.get(key).cloned()
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        let Some(root) = self.root_snapshot() else {
            return false;
        };
        Node::move_right(&Self::find_leaf(root, key, None), key).contains(key)
    }

    /// Walk from `root` to the leaf level without holding more than one latch.
    ///
    /// Only true parent-to-child moves are recorded in `ancestors`; nodes
    /// left behind by a right-link move are not parents of anything below.
    fn find_leaf(
        root: NodeRef<K, V>,
        key: &K,
        mut ancestors: Option<&mut Vec<NodeRef<K, V>>>,
    ) -> NodeRef<K, V> {
        let mut current = root;
        loop {
            let scan = {
                let node = current.lock();
                if node.is_leaf() {
                    break;
                }
                node.scan(key)
            };
            match scan {
                Scan::Child(child) => {
                    if let Some(stack) = ancestors.as_deref_mut() {
                        stack.push(current);
                    }
                    current = child;
                }
                Scan::Sibling(sibling) => current = sibling,
                Scan::Slot(_) => unreachable!("internal node scanned to a value slot"),
            }
        }
        current
    }

    /// Insert into the latched node, splitting and climbing as needed.
    ///
    /// # Pre-conditions
    /// - `current` is latched and covers `key`
    /// - `key` is not present in `current`
    ///
    /// # Post-conditions
    /// - `key` is stored; the caller accounts for it
    /// - Every latch taken here has been released
    fn insert_or_split(
        &self,
        mut current: LatchedNode<K, V>,
        mut key: K,
        mut payload: Payload<K, V>,
        mut ancestors: Vec<NodeRef<K, V>>,
    ) {
        loop {
            if current.has_room() {
                let inserted = current.insert_safe(key, payload);
                debug_assert!(inserted, "key already present in its target node");
                return;
            }

            current.insert_entry(key, payload);
            let SplitResult {
                right,
                promoted,
                new_root,
                ..
            } = Node::split(&mut current);

            if let Some(new_root) = new_root {
                self.install_root(&mut current, new_root);
                return;
            }

            let parent = ancestors
                .pop()
                .unwrap_or_else(|| self.find_parent(current.level(), &promoted));
            // The parent may have split since it was pushed; latch the one
            // covering the separator before letting go of the child.
            current = Node::move_right(&parent, &promoted);
            key = promoted;
            payload = Payload::Child(right);
        }
    }

    /// Swap in the root produced by splitting `old_root`.
    fn install_root(&self, old_root: &mut LatchedNode<K, V>, new_root: NodeRef<K, V>) {
        let mut root = self.root.write();
        old_root.set_root(false);
        *root = Some(new_root);
        drop(root);
        tracing::debug!(height = old_root.level() + 2, "installed new root");
    }

    /// Find the node one level above `child_level` that covers `key`,
    /// starting from the current root.
    ///
    /// Needed when this thread's ancestor stack ends below the current root:
    /// the tree grew taller after the thread took its root snapshot.
    ///
    /// # Panics
    ///
    /// Panics if no level above `child_level` exists. The node being split
    /// is not the root, so the tree is corrupt.
    fn find_parent(&self, child_level: usize, key: &K) -> NodeRef<K, V> {
        let parent_level = child_level + 1;
        let Some(mut current) = self.root_snapshot() else {
            unreachable!("tree lost its root while propagating a split");
        };

        loop {
            let scan = {
                let node = current.lock();
                match node.level().cmp(&parent_level) {
                    cmp::Ordering::Less => {
                        panic!("no level above {child_level} while propagating a split")
                    }
                    cmp::Ordering::Equal => break,
                    cmp::Ordering::Greater => node.scan(key),
                }
            };
            current = match scan {
                Scan::Child(next) | Scan::Sibling(next) => next,
                Scan::Slot(_) => unreachable!("internal node scanned to a value slot"),
            };
        }

        tracing::trace!(level = parent_level, "re-located parent from the root");
        current
    }
}

impl<K: Ord + Clone, V> Default for BLinkTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors returned when constructing a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// The fanout bound is below [`MIN_ORDER`].
    InvalidOrder(usize),
}

impl std::fmt::Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidOrder(order) => {
                write!(f, "invalid order {order}: must be at least {MIN_ORDER}")
            }
        }
    }
}

impl std::error::Error for TreeError {}
