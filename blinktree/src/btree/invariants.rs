//! Structural validation of a quiescent tree.
//!
//! [`BLinkTree::validate`] walks the tree level by level, left to right, and
//! checks every invariant the insert path relies on. It latches one node at a
//! time, so it is safe to call while other threads are inserting, but the
//! result is only meaningful when no insert is in flight.

use std::sync::Arc;

use crate::btree::node::NodeRef;
use crate::btree::tree::BLinkTree;

/// Shape of a tree that passed validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Number of levels (0 for an empty tree).
    pub height: usize,
    /// Total number of nodes.
    pub nodes: usize,
    /// Number of leaf nodes.
    pub leaves: usize,
    /// Number of keys stored in leaves.
    pub keys: usize,
}

/// A broken invariant, located by level and by position within the level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Keys are not strictly increasing.
    UnsortedKeys { level: usize, position: usize },
    /// A key lies outside the range its parent assigns to the node.
    KeyOutOfRange { level: usize, position: usize },
    /// Wrong number of children (values for leaves) for the number of keys.
    ChildCount {
        level: usize,
        position: usize,
        keys: usize,
        children: usize,
    },
    /// A non-root node holds fewer than `order` or more than `2*order` keys.
    Fanout {
        level: usize,
        position: usize,
        keys: usize,
        order: usize,
    },
    /// The root is not flagged as root, or another node is.
    RootFlag { level: usize, position: usize },
    /// A node's level does not match its depth, or a leaf is not at level 0.
    LevelMismatch {
        expected: usize,
        found: usize,
        position: usize,
    },
    /// A node's high key differs from the separator its parent holds for it.
    HighKey { level: usize, position: usize },
    /// A right link does not point at the next node on the level.
    SiblingChain { level: usize, position: usize },
    /// The stored key count differs from the keys found in leaves.
    Length { expected: usize, found: usize },
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsortedKeys { level, position } => {
                write!(f, "keys not strictly increasing at level {level}, node {position}")
            }
            Self::KeyOutOfRange { level, position } => {
                write!(f, "key out of parent range at level {level}, node {position}")
            }
            Self::ChildCount {
                level,
                position,
                keys,
                children,
            } => write!(
                f,
                "node {position} at level {level} has {keys} keys but {children} children"
            ),
            Self::Fanout {
                level,
                position,
                keys,
                order,
            } => write!(
                f,
                "node {position} at level {level} holds {keys} keys, outside {order}..={}",
                2 * order
            ),
            Self::RootFlag { level, position } => {
                write!(f, "wrong root flag at level {level}, node {position}")
            }
            Self::LevelMismatch {
                expected,
                found,
                position,
            } => write!(
                f,
                "node {position} reports level {found}, expected {expected}"
            ),
            Self::HighKey { level, position } => {
                write!(f, "high key disagrees with parent at level {level}, node {position}")
            }
            Self::SiblingChain { level, position } => {
                write!(f, "right link broken at level {level}, node {position}")
            }
            Self::Length { expected, found } => {
                write!(f, "tree reports {expected} keys but leaves hold {found}")
            }
        }
    }
}

impl std::error::Error for InvariantViolation {}

/// A node scheduled for checking, with the key range its parent assigns to
/// it: `lower < key <= upper`, unbounded where `None`.
struct Pending<K, V> {
    node: NodeRef<K, V>,
    lower: Option<K>,
    upper: Option<K>,
}

impl<K: Ord + Clone, V> BLinkTree<K, V> {
    /// Check every structural invariant and report the tree's shape.
    ///
    /// # Errors
    ///
    /// Returns the first [`InvariantViolation`] found, scanning from the root
    /// level down and left to right within a level.
    pub fn validate(&self) -> Result<TreeStats, InvariantViolation> {
        let mut stats = TreeStats::default();
        let Some(root) = self.root_snapshot() else {
            return check_length(self.len(), 0).map(|()| stats);
        };

        let root_level = root.lock().level();
        stats.height = root_level + 1;

        let mut level_nodes = vec![Pending {
            node: root,
            lower: None,
            upper: None,
        }];

        for depth in 0..=root_level {
            let level = root_level - depth;
            let mut next_level = Vec::new();

            for (position, pending) in level_nodes.iter().enumerate() {
                let successor = level_nodes.get(position + 1).map(|p| &p.node);
                self.check_node(level, position, pending, successor, &mut next_level, &mut stats)?;
            }

            level_nodes = next_level;
        }

        check_length(self.len(), stats.keys)?;
        Ok(stats)
    }

    fn check_node(
        &self,
        level: usize,
        position: usize,
        pending: &Pending<K, V>,
        successor: Option<&NodeRef<K, V>>,
        next_level: &mut Vec<Pending<K, V>>,
        stats: &mut TreeStats,
    ) -> Result<(), InvariantViolation> {
        let node = pending.node.lock();
        let keys = node.keys();
        let is_top = level + 1 == stats.height;

        if node.level() != level {
            return Err(InvariantViolation::LevelMismatch {
                expected: level,
                found: node.level(),
                position,
            });
        }
        if node.is_leaf() != (level == 0) {
            return Err(InvariantViolation::LevelMismatch {
                expected: 0,
                found: level,
                position,
            });
        }
        if node.is_root() != is_top {
            return Err(InvariantViolation::RootFlag { level, position });
        }
        if keys.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(InvariantViolation::UnsortedKeys { level, position });
        }

        let in_range = |key: &K| {
            pending.lower.as_ref().is_none_or(|lower| key > lower)
                && pending.upper.as_ref().is_none_or(|upper| key <= upper)
        };
        if !keys.iter().all(in_range) {
            return Err(InvariantViolation::KeyOutOfRange { level, position });
        }

        if !is_top && !(self.order()..=2 * self.order()).contains(&keys.len()) {
            return Err(InvariantViolation::Fanout {
                level,
                position,
                keys: keys.len(),
                order: self.order(),
            });
        }

        let expected_children = if node.is_leaf() {
            keys.len()
        } else {
            keys.len() + 1
        };
        if node.child_count() != expected_children {
            return Err(InvariantViolation::ChildCount {
                level,
                position,
                keys: keys.len(),
                children: node.child_count(),
            });
        }

        if node.high_key() != pending.upper.as_ref()
            || (node.is_leaf() && node.high_key().is_some_and(|high| keys.last() != Some(high)))
        {
            return Err(InvariantViolation::HighKey { level, position });
        }

        let linked = match (node.right_sibling(), successor) {
            (None, None) => true,
            (Some(sibling), Some(expected)) => Arc::ptr_eq(&sibling, expected),
            _ => false,
        };
        if !linked {
            return Err(InvariantViolation::SiblingChain { level, position });
        }

        stats.nodes += 1;
        if let Some(children) = node.child_nodes() {
            for (i, child) in children.iter().enumerate() {
                next_level.push(Pending {
                    node: Arc::clone(child),
                    lower: if i == 0 {
                        pending.lower.clone()
                    } else {
                        Some(keys[i - 1].clone())
                    },
                    upper: keys.get(i).cloned().or_else(|| pending.upper.clone()),
                });
            }
        } else {
            stats.leaves += 1;
            stats.keys += keys.len();
        }
        drop(node);

        Ok(())
    }
}

const fn check_length(expected: usize, found: usize) -> Result<(), InvariantViolation> {
    if expected == found {
        Ok(())
    } else {
        Err(InvariantViolation::Length { expected, found })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_empty_tree() {
        let tree: BLinkTree<u32, ()> = BLinkTree::new();
        assert_eq!(tree.validate(), Ok(TreeStats::default()));
    }

    #[test]
    fn test_validate_single_leaf() {
        let tree = BLinkTree::new();
        for key in [3u32, 1, 2] {
            tree.insert(key, ());
        }

        let stats = tree.validate().expect("valid tree");
        assert_eq!(
            stats,
            TreeStats {
                height: 1,
                nodes: 1,
                leaves: 1,
                keys: 3,
            }
        );
    }

    #[test]
    fn test_validate_after_many_splits() {
        for order in [2, 3, 5] {
            let tree = BLinkTree::with_order(order).expect("valid order");
            for key in 0..3000u32 {
                // Interleave both ends to split leaves on either side
                let key = if key % 2 == 0 { key } else { 100_000 - key };
                assert!(tree.insert(key, key));
            }

            let stats = tree.validate().expect("valid tree");
            assert_eq!(stats.keys, 3000);
            assert_eq!(stats.height, tree.height());
            assert!(stats.leaves > 1);
            assert!(stats.nodes > stats.leaves);
        }
    }

    #[test]
    fn test_validate_detects_stray_root_flag() {
        let tree = BLinkTree::with_order(2).expect("valid order");
        for key in 0..10u32 {
            tree.insert(key, key);
        }

        let root = tree.root_snapshot().expect("tree has a root");
        let child = Arc::clone(&root.lock().child_nodes().expect("internal root")[0]);
        child.lock().set_root(true);

        assert_eq!(
            tree.validate(),
            Err(InvariantViolation::RootFlag {
                level: 0,
                position: 0
            })
        );
    }

    #[test]
    fn test_violation_display() {
        let violation = InvariantViolation::Fanout {
            level: 0,
            position: 3,
            keys: 9,
            order: 2,
        };
        assert_eq!(
            violation.to_string(),
            "node 3 at level 0 holds 9 keys, outside 2..=4"
        );
        assert_eq!(
            InvariantViolation::Length {
                expected: 2,
                found: 1
            }
            .to_string(),
            "tree reports 2 keys but leaves hold 1"
        );
    }
}
