//! B-link tree nodes.
//!
//! A node is the unit of storage and of latching. Every node lives behind its
//! own [`parking_lot::Mutex`] (its latch) and is shared through an [`Arc`]:
//! - Internal nodes: N separator keys and N+1 child nodes
//! - Leaf nodes: N keys paired one-to-one with N values
//!
//! Nodes on the same level are chained left to right through weak right
//! links. A node that has been split remembers the separator it gave away as
//! its high key; any search key above the high key now lives to the right.
//! That is how a thread holding a stale pointer recovers (see
//! [`Node::move_right`]).
//!
//! # Invariants
//!
//! - `keys` is strictly increasing
//! - leaves: `values.len() == keys.len()`
//! - internal nodes: `children.len() == keys.len() + 1`
//! - `high_key` is `Some` iff `right_link` is `Some`
//! - a leaf's high key, when present, is its last key

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

/// Owning, shareable handle to a latched node.
pub type NodeRef<K, V> = Arc<Mutex<Node<K, V>>>;

/// Non-owning handle used for right links.
type NodeLink<K, V> = Weak<Mutex<Node<K, V>>>;

/// A node whose latch is held by the current thread.
///
/// The latch is released when the guard is dropped, on every exit path.
pub type LatchedNode<K, V> = ArcMutexGuard<RawMutex, Node<K, V>>;

/// Children of a node: terminal values for leaves, subtrees otherwise.
enum Children<K, V> {
    Values(Vec<V>),
    Nodes(Vec<NodeRef<K, V>>),
}

/// What gets inserted next to a key.
///
/// Leaves take values. Internal nodes take the right half produced by a
/// child split, placed immediately after the child that was split.
pub enum Payload<K, V> {
    Value(V),
    Child(NodeRef<K, V>),
}

/// Outcome of [`Node::scan`].
pub enum Scan<K, V> {
    /// The key lies beyond this node's high key; continue on the right sibling.
    Sibling(NodeRef<K, V>),
    /// The subtree that covers the key.
    Child(NodeRef<K, V>),
    /// Position of the key (or its insertion point) in a leaf.
    Slot(usize),
}

/// Result of splitting a node.
#[must_use]
pub struct SplitResult<K, V> {
    /// The node that was split; it keeps the low half.
    pub left: NodeRef<K, V>,
    /// The new right sibling holding the high half.
    ///
    /// Until the parent adopts it this is its only owning reference.
    pub right: NodeRef<K, V>,
    /// Separator to hand to the parent: the last key of the low half.
    pub promoted: K,
    /// Replacement root, present only when the split node was the root.
    pub new_root: Option<NodeRef<K, V>>,
}

/// A B-link tree node.
pub struct Node<K, V> {
    /// Minimum fanout bound; a non-root node holds `order..=2*order` keys.
    order: usize,
    /// 0 for leaves, parent level is child level + 1.
    level: usize,
    is_root: bool,
    keys: Vec<K>,
    /// Upper bound (inclusive) of the keys this node covers.
    high_key: Option<K>,
    children: Children<K, V>,
    right_link: Option<NodeLink<K, V>>,
}

impl<K: Ord + Clone, V> Node<K, V> {
    const fn with_children(
        order: usize,
        level: usize,
        keys: Vec<K>,
        children: Children<K, V>,
    ) -> Self {
        Self {
            order,
            level,
            is_root: false,
            keys,
            high_key: None,
            children,
            right_link: None,
        }
    }

    /// Create the first root of an empty tree: a leaf holding one entry.
    pub(crate) fn new_root_leaf(order: usize, key: K, value: V) -> NodeRef<K, V> {
        let mut node = Self::with_children(order, 0, vec![key], Children::Values(vec![value]));
        node.is_root = true;
        Arc::new(Mutex::new(node))
    }

    /// Create a root one level above `left` and `right`, separated by `key`.
    fn new_root(
        order: usize,
        level: usize,
        key: K,
        left: NodeRef<K, V>,
        right: NodeRef<K, V>,
    ) -> NodeRef<K, V> {
        let mut node =
            Self::with_children(order, level, vec![key], Children::Nodes(vec![left, right]));
        node.is_root = true;
        Arc::new(Mutex::new(node))
    }

    #[must_use]
    pub const fn order(&self) -> usize {
        self.order
    }

    #[must_use]
    pub const fn level(&self) -> usize {
        self.level
    }

    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        matches!(self.children, Children::Values(_))
    }

    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.is_root
    }

    /// Set or clear the root flag. Only the tree calls this, while swapping
    /// its root pointer.
    pub(crate) const fn set_root(&mut self, is_root: bool) {
        self.is_root = is_root;
    }

    #[must_use]
    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    #[must_use]
    pub const fn high_key(&self) -> Option<&K> {
        self.high_key.as_ref()
    }

    /// Child nodes of an internal node, `None` for leaves.
    pub(crate) fn child_nodes(&self) -> Option<&[NodeRef<K, V>]> {
        match &self.children {
            Children::Values(_) => None,
            Children::Nodes(children) => Some(children),
        }
    }

    /// Number of children (values for leaves).
    #[must_use]
    pub const fn child_count(&self) -> usize {
        match &self.children {
            Children::Values(values) => values.len(),
            Children::Nodes(children) => children.len(),
        }
    }

    /// The right sibling, if this node has ever been split.
    ///
    /// # Panics
    ///
    /// Panics if the link dangles. Nodes are never freed while reachable, so
    /// a dangling link means the tree is corrupt.
    #[must_use]
    pub fn right_sibling(&self) -> Option<NodeRef<K, V>> {
        self.right_link.as_ref().map(|link| {
            link.upgrade()
                .unwrap_or_else(|| unreachable!("right link outlived its sibling"))
        })
    }

    /// Index of the first key `>= key`, or `keys.len()` if `key` is larger
    /// than every key.
    #[must_use]
    pub fn find_index(&self, key: &K) -> usize {
        match self.keys.binary_search(key) {
            Ok(i) | Err(i) => i,
        }
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        let index = self.find_index(key);
        index < self.keys.len() && self.keys[index] == *key
    }

    /// Value stored under `key`, for leaves.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        let Children::Values(values) = &self.children else {
            return None;
        };
        let index = self.find_index(key);
        (index < self.keys.len() && self.keys[index] == *key).then(|| &values[index])
    }

    /// Decide where a search for `key` continues.
    ///
    /// Returns the right sibling when `key` lies above this node's high key
    /// (for a leaf: above its last key), which happens when a concurrent
    /// split moved the key's range away after the caller read the parent.
    /// Otherwise returns `children[find_index(key)]`.
    #[must_use]
    pub fn scan(&self, key: &K) -> Scan<K, V> {
        if let Some(sibling) = self.sibling_for(key) {
            return Scan::Sibling(sibling);
        }

        let index = self.find_index(key);
        match &self.children {
            Children::Values(_) => Scan::Slot(index),
            Children::Nodes(children) => Scan::Child(Arc::clone(&children[index])),
        }
    }

    fn sibling_for(&self, key: &K) -> Option<NodeRef<K, V>> {
        let high_key = self.high_key.as_ref()?;
        if key <= high_key {
            return None;
        }
        self.right_sibling()
    }

    /// Strictly between the minimum and the maximum number of keys.
    ///
    /// Inserts do not split on this bound; [`Self::has_room`] is the split
    /// trigger, so a node below the minimum still absorbs keys until full.
    #[must_use]
    pub const fn is_safe(&self) -> bool {
        self.order < self.keys.len() && self.keys.len() < 2 * self.order
    }

    /// One more key fits without exceeding `2 * order`.
    #[must_use]
    pub const fn has_room(&self) -> bool {
        self.keys.len() < 2 * self.order
    }

    /// Insert `key` at its sorted position if the node has room and does not
    /// already hold the key.
    ///
    /// Returns `false` without touching the node otherwise; the payload is
    /// dropped in that case. Callers check [`Self::has_room`] and
    /// [`Self::contains`] under the latch first.
    pub fn insert_safe(&mut self, key: K, payload: Payload<K, V>) -> bool {
        if !self.has_room() || self.contains(&key) {
            return false;
        }
        self.insert_entry(key, payload);
        true
    }

    /// Insert without the capacity check. The node may transiently hold
    /// `2 * order + 1` keys; the caller splits it right after.
    ///
    /// # Panics
    ///
    /// Panics if the payload kind does not match the node kind.
    pub(crate) fn insert_entry(&mut self, key: K, payload: Payload<K, V>) {
        let index = self.find_index(&key);
        match (&mut self.children, payload) {
            (Children::Values(values), Payload::Value(value)) => {
                values.insert(index, value);
            }
            (Children::Nodes(children), Payload::Child(child)) => {
                // The split child sits at `index`; its new right half follows it.
                children.insert(index + 1, child);
            }
            _ => unreachable!("payload kind does not match node kind"),
        }
        self.keys.insert(index, key);
    }

    /// Split a latched node in half.
    ///
    /// The node keeps the low `ceil(len / 2)` keys; the last of them is the
    /// promoted separator and becomes the node's high key. For internal nodes
    /// the separator leaves the key array so both halves keep N+1 children.
    ///
    /// # Pre-conditions
    /// - The caller holds the node's latch (enforced by the guard type)
    /// - The node holds at least two keys
    ///
    /// # Post-conditions
    /// - The new sibling takes over the old right link and old high key
    /// - The node's right link points at the new sibling
    /// - If the node was the root, a new root is returned. The node's own
    ///   root flag is left set; the tree clears it while swapping roots.
    pub fn split(latched: &mut LatchedNode<K, V>) -> SplitResult<K, V> {
        let left = Arc::clone(ArcMutexGuard::mutex(latched));
        let node: &mut Self = latched;

        let len = node.keys.len();
        assert!(len >= 2, "cannot split a node holding {len} keys");
        let mid = len.div_ceil(2);

        let right_keys = node.keys.split_off(mid);
        let right_children = match &mut node.children {
            Children::Values(values) => Children::Values(values.split_off(mid)),
            Children::Nodes(children) => Children::Nodes(children.split_off(mid)),
        };

        let promoted = if node.is_leaf() {
            node.keys.last().cloned()
        } else {
            node.keys.pop()
        };
        let Some(promoted) = promoted else {
            unreachable!("low half of a split is never empty");
        };

        let mut sibling = Self::with_children(node.order, node.level, right_keys, right_children);
        sibling.high_key = node.high_key.replace(promoted.clone());
        sibling.right_link = node.right_link.take();
        let right = Arc::new(Mutex::new(sibling));
        node.right_link = Some(Arc::downgrade(&right));

        let new_root = node.is_root.then(|| {
            Self::new_root(
                node.order,
                node.level + 1,
                promoted.clone(),
                Arc::clone(&left),
                Arc::clone(&right),
            )
        });

        tracing::debug!(
            level = node.level,
            left_keys = node.keys.len(),
            right_keys = len - mid,
            root = node.is_root,
            "split node"
        );

        SplitResult {
            left,
            right,
            promoted,
            new_root,
        }
    }

    /// Latch `node` and walk right until reaching the node whose range covers
    /// `key`.
    ///
    /// Each hop latches the sibling before releasing the current node, so no
    /// other thread can slip between them.
    ///
    /// # Post-conditions
    /// - The returned node is latched; dropping the guard releases it
    /// - `key` is not above the returned node's high key
    pub fn move_right(node: &NodeRef<K, V>, key: &K) -> LatchedNode<K, V> {
        let mut current = node.lock_arc();
        while let Some(sibling) = current.sibling_for(key) {
            tracing::trace!(level = current.level, "moving right past a concurrent split");
            current = sibling.lock_arc();
        }
        current
    }
}

impl<K, V> fmt::Debug for Node<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("leaf", &matches!(self.children, Children::Values(_)))
            .field("root", &self.is_root)
            .field("order", &self.order)
            .field("level", &self.level)
            .field("keys", &self.keys.len())
            .field("split", &self.right_link.is_some())
            .finish_non_exhaustive()
    }
}
