//! Graph module for managing filter chains.
//!
//! A filter graph is a forest of chains: every node has at most one
//! "previous" node it reads from, and several chains may read from the same
//! shared head.

pub mod structure;
pub mod topology;

// Re-export commonly used types
pub use structure::{ChangeNotification, FilterGraph, GraphNode, GraphStats};
pub use topology::TopologyAnalyzer;
