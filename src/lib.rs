//! # Lucida - Incremental RAW Preview Pipeline
//!
//! Lucida renders the on-screen previews of a RAW photo editor: one or two
//! canvas views of the same photo, a magnifying loupe and a navigator
//! thumbnail. Each surface is a linear chain of filters reading from one
//! shared, decoded source.
//!
//! ## Features
//!
//! - **Filter chains**: every stage reads from a single "previous" stage;
//!   parameters can be pushed down a whole chain at once
//! - **Incremental**: caches at chosen points memoize results, and parameter
//!   changes invalidate only what is downstream of them
//! - **Two-pass rendering**: dirty areas are painted from a quick render first
//!   and refined at full quality afterwards
//! - **Region tracking**: partial source updates are mapped through the
//!   chain and repaint only the affected canvas area
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lucida::prelude::*;
//!
//! let mut preview = PreviewPipeline::new(PipelineConfig::default())?;
//! preview.set_canvas_size(Size::new(1024, 768))?;
//! preview.set_photo(Some(photo))?;
//!
//! let mut events: Vec<PaintEvent> = Vec::new();
//! preview.render(&mut events);
//! ```
//!
//! ## Architecture
//!
//! - [`core`]: image buffers, geometry, parameter values, the `Filter` trait
//! - [`graph`]: the filter graph, re-wiring and change notification
//! - [`execution`]: requests, responses, evaluation and result caches
//! - [`filters`]: filter registry and the built-in stages
//! - [`render`]: surface chains, canvas layout and the preview pipeline
//! - [`config`]: TOML configuration

#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod execution;
pub mod filters;
pub mod graph;
pub mod render;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use lucida::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use crate::core::geometry::{CropRect, Rect, Size};
    pub use crate::core::image::{Image16, Image8, ImageBuffer};
    pub use crate::core::types::{DevelopSettings, ParamType, Profile, ProfileKind, Value};

    // Filters
    pub use crate::core::node::{Category, Filter, NodeMetadata, RoiSupport};
    pub use crate::core::param::{Constraint, ParameterDefinition};
    pub use crate::filters::registry::{FilterRegistry, RegistryEntry};

    // Contexts
    pub use crate::core::context::{CancelToken, FilterContext, PipelineContext};

    // Errors
    pub use crate::core::error::{
        ConfigError, FilterError, GraphError, LucidaError, LucidaResult, NodeId, ParameterError,
    };

    // Graph
    pub use crate::graph::{ChangeNotification, FilterGraph, GraphNode, TopologyAnalyzer};

    // Execution
    pub use crate::execution::cache::{CachePolicy, CacheStats};
    pub use crate::execution::engine::EvaluationEngine;
    pub use crate::execution::request::{ChangedMask, FilterRequest, FilterResponse, Quality};

    // Rendering
    pub use crate::config::PipelineConfig;
    pub use crate::render::{
        DirtyRegion, PaintEvent, PaintSink, PixelProbe, PreviewPipeline, Snapshot, SourceProvider,
        SplitDirection,
    };
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
