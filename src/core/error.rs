//! Error types for Lucida.
//!
//! Uses thiserror for structured errors with context. The pipeline itself is
//! forgiving: evaluation never returns an error to the consumer (a failing
//! filter degrades to pass-through), so these types mostly surface from
//! graph editing, parameter assignment and configuration loading.

use crate::core::types::ParamType;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a node in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random node ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a node ID from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Top-level error type for Lucida.
#[derive(Error, Debug)]
pub enum LucidaError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Parameter error: {0}")]
    Parameter(#[from] ParameterError),

    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("View {0} does not exist")]
    InvalidView(usize),
}

/// Errors related to graph structure and re-wiring.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    #[error("Linking {node} to {upstream} would create a cycle")]
    CycleDetected { node: NodeId, upstream: NodeId },

    #[error("Cannot remove node {node}: {dependents} node(s) still read from it")]
    NodeInUse { node: NodeId, dependents: usize },

    #[error("Unknown filter kind '{0}'")]
    UnknownKind(String),
}

/// Errors from assigning a value to a node parameter.
///
/// Every filter kind carries a fixed parameter schema; these errors are the
/// result of checking a value against it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("Filter '{kind}' has no parameter '{name}'")]
    Unknown { kind: String, name: String },

    #[error("Parameter '{name}' expects {expected}, got {got}")]
    TypeMismatch {
        name: String,
        expected: ParamType,
        got: ParamType,
    },

    #[error("Parameter '{name}' rejected: {reason}")]
    ConstraintViolation { name: String, reason: String },
}

/// Errors raised inside a single filter's computation.
#[derive(Error, Debug, Clone)]
pub enum FilterError {
    #[error("Node {node_id} failed: {error}")]
    Computation { node_id: NodeId, error: String },

    #[error("Node {node_id} is misconfigured: {reason}")]
    Unsupported { node_id: NodeId, reason: String },

    #[error("Image buffer error: {0}")]
    Buffer(String),
}

/// Errors from loading a pipeline configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

impl FilterError {
    /// Get the node ID that caused this error, if applicable.
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            FilterError::Computation { node_id, .. } | FilterError::Unsupported { node_id, .. } => {
                Some(*node_id)
            }
            FilterError::Buffer(_) => None,
        }
    }
}

/// Result type alias for Lucida operations.
pub type LucidaResult<T> = Result<T, LucidaError>;

/// Result type alias for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

/// Result type alias for parameter assignment.
pub type ParameterResult<T> = Result<T, ParameterError>;

/// Result type alias for filter computations.
pub type FilterResult<T> = Result<T, FilterError>;
