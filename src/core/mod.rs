//! Core types and traits for the Lucida preview pipeline.
//!
//! This module contains the foundational types:
//! - Image buffers and geometry
//! - Parameter values, schemas and colour spaces
//! - The `Filter` trait and node metadata
//! - Error types
//! - Filter and pipeline contexts

pub mod color;
pub mod context;
pub mod error;
pub mod geometry;
pub mod image;
pub mod node;
pub mod param;
pub mod types;

// Re-export commonly used types
pub use color::{ColorSpace, ColorSpaceRef, ColorSpaceRegistry};
pub use context::{CancelToken, FilterContext, PipelineContext, Upstream};
pub use error::{FilterError, GraphError, LucidaError, NodeId, ParameterError};
pub use geometry::{CropRect, Rect, Size};
pub use image::{Image16, Image8, ImageBuffer};
pub use node::{Category, Filter, NodeMetadata, RoiSupport};
pub use param::{Constraint, ParameterDefinition};
pub use types::{DevelopSettings, ParamType, Profile, ProfileKind, Value};
