// Life of an insert:
// 1. Snapshot the root (plant a leaf root if the tree is empty)
// 2. Descend, latching one node at a time, remembering true parents
// 3. Move right at the leaf level and keep the covering leaf latched
// 4. Insert, or split and hand the separator to the revalidated parent
//    until some node absorbs it or the root splits
//
// System components:
//  - Node: keys, children, high key, right link, latch
//  - Tree: root pointer, descent, split propagation
//  - Invariant checker for quiescent trees

pub mod btree;
pub mod config;

#[cfg(test)]
mod stress_tests;

pub use btree::{BLinkTree, InvariantViolation, TreeError, TreeStats};
