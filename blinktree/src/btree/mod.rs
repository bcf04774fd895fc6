//! In-memory B-link tree.
//!
//! A B+-tree where every node also links to its right sibling (Lehman & Yao),
//! so inserts can run concurrently under per-node latches.
//!
//! # Structure
//!
//! The tree consists of:
//! - Internal nodes: store separator keys and child nodes
//! - Leaf nodes: store key-value pairs
//! - Right links: chain the nodes of each level left to right
//!
//! # Usage
//!
//! ```
//! use blinktree::btree::BLinkTree;
//!
//! let tree = BLinkTree::with_order(2).expect("order 2 is valid");
//! assert!(tree.insert(7, "seven"));
//! assert!(!tree.insert(7, "again"));
//!
//! assert_eq!(tree.get(&7), Some("seven"));
//! assert!(tree.validate().is_ok());
//! ```

mod invariants;
mod node;
mod tree;

pub use invariants::{InvariantViolation, TreeStats};
pub use node::{LatchedNode, Node, NodeRef, Payload, Scan, SplitResult};
pub use tree::{BLinkTree, DEFAULT_ORDER, MIN_ORDER, TreeError};
