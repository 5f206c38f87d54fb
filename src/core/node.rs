//! Filter trait and node metadata.
//!
//! A [`Filter`] is one stage of a preview chain. It is pulled by the
//! evaluation engine: when asked for an image it may ask its upstream (through
//! the [`FilterContext`]) for whatever region and quality it needs, then
//! transform the result.

use crate::core::context::FilterContext;
use crate::core::error::FilterResult;
use crate::core::geometry::{Rect, Size};
use crate::core::param::ParameterDefinition;
use crate::core::types::Value;
use crate::execution::cache::CacheStats;
use crate::execution::request::{ChangedMask, FilterResponse};
use indexmap::IndexMap;

/// Category for organizing filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Category {
    /// Source stages
    Input,
    /// Geometric stages (rotate, crop, resample, lens)
    Geometry,
    /// Colour stages (transforms, profiles, masks)
    Color,
    /// Detail stages (denoise)
    Detail,
    /// Memoization stages
    Cache,
    /// Utility stages
    #[default]
    Utility,
}

impl Category {
    /// Get the display name for this category.
    pub fn display_name(&self) -> &'static str {
        match self {
            Category::Input => "Input",
            Category::Geometry => "Geometry",
            Category::Color => "Color",
            Category::Detail => "Detail",
            Category::Cache => "Cache",
            Category::Utility => "Utility",
        }
    }
}

/// How a filter relates output pixels to input pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoiSupport {
    /// Each output pixel depends on the same input pixel only
    PerPixel,
    /// Each output pixel depends on a neighbourhood of the input
    Kernel,
    /// Output depends on the whole frame; full frame is always computed
    Global,
}

/// Metadata describing a filter kind.
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    /// Unique identifier for this filter kind (e.g. `"crop"`)
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Category for organization
    pub category: Category,
    /// Detailed description
    pub description: String,
    /// Parameter schema
    pub parameters: Vec<ParameterDefinition>,
    /// Region-of-interest behaviour
    pub roi: RoiSupport,
    /// Whether this kind produces images without an upstream
    pub source: bool,
}

impl NodeMetadata {
    /// Create a new metadata builder.
    pub fn builder(id: impl Into<String>, name: impl Into<String>) -> NodeMetadataBuilder {
        NodeMetadataBuilder::new(id, name)
    }

    /// Find a parameter by name.
    pub fn get_parameter(&self, name: &str) -> Option<&ParameterDefinition> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Get all parameter names.
    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }
}

/// Builder for NodeMetadata.
pub struct NodeMetadataBuilder {
    id: String,
    name: String,
    category: Category,
    description: String,
    parameters: Vec<ParameterDefinition>,
    roi: RoiSupport,
    source: bool,
}

impl NodeMetadataBuilder {
    /// Create a new builder with required fields.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: Category::Utility,
            description: String::new(),
            parameters: Vec::new(),
            roi: RoiSupport::PerPixel,
            source: false,
        }
    }

    /// Set the category.
    pub fn category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    /// Set the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a parameter.
    pub fn parameter(mut self, param: ParameterDefinition) -> Self {
        self.parameters.push(param);
        self
    }

    /// Set the region-of-interest behaviour.
    pub fn roi(mut self, roi: RoiSupport) -> Self {
        self.roi = roi;
        self
    }

    /// Mark as a source stage.
    pub fn source(mut self) -> Self {
        self.source = true;
        self
    }

    /// Build the metadata.
    pub fn build(self) -> NodeMetadata {
        NodeMetadata {
            id: self.id,
            name: self.name,
            category: self.category,
            description: self.description,
            parameters: self.parameters,
            roi: self.roi,
            source: self.source,
        }
    }
}

/// The core trait for pipeline stages.
///
/// # Contract
///
/// - `get_image` is called with the request already clamped to the output
///   bounds reported by `get_size`. The returned images must cover at least
///   the requested region; the engine trims anything larger.
/// - A response without an image means "not available yet". It is never an
///   error, and caches never store it.
/// - Errors are contained: the engine logs them and passes the upstream
///   result through unchanged.
///
/// # Thread Safety
///
/// `Send + Sync` bounds allow a graph to be moved to a render thread. Filters
/// holding mutable state (caches) guard it behind their own lock.
pub trait Filter: Send + Sync {
    /// Get the metadata for this filter kind.
    fn metadata(&self) -> NodeMetadata;

    /// Produce the output for `ctx.request()`.
    fn get_image(&self, ctx: &FilterContext<'_>) -> FilterResult<FilterResponse>;

    /// Output size for the given request. Defaults to the upstream size.
    fn get_size(&self, ctx: &FilterContext<'_>) -> Option<Size> {
        ctx.upstream_size(ctx.request())
    }

    /// Region of the output affected by a change to `region` of the input.
    ///
    /// `None` means the whole output may have changed.
    fn map_region(&self, _params: &IndexMap<String, Value>, region: Rect) -> Option<Rect> {
        Some(region)
    }

    /// Request parameters this stage reads, given its own parameters.
    fn request_params(&self, _params: &IndexMap<String, Value>) -> Vec<&'static str> {
        Vec::new()
    }

    /// Drop memoized state after an upstream change.
    fn invalidate(&self, _mask: ChangedMask) {}

    /// Statistics for memoizing stages.
    fn cache_stats(&self) -> Option<CacheStats> {
        None
    }

    /// Clone this filter into a boxed trait object.
    ///
    /// Memoized state is not carried over.
    fn clone_box(&self) -> Box<dyn Filter>;
}

impl Clone for Box<dyn Filter> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ParamType;

    #[test]
    fn test_metadata_builder() {
        let metadata = NodeMetadata::builder("crop", "Crop")
            .category(Category::Geometry)
            .description("Cuts out a rectangle")
            .parameter(ParameterDefinition::new("rectangle", ParamType::Rect, Value::None).optional())
            .build();

        assert_eq!(metadata.id, "crop");
        assert_eq!(metadata.category, Category::Geometry);
        assert_eq!(metadata.roi, RoiSupport::PerPixel);
        assert!(!metadata.source);
        assert!(metadata.get_parameter("rectangle").is_some());
        assert_eq!(metadata.parameter_names(), vec!["rectangle"]);
    }

    #[test]
    fn test_category_display() {
        assert_eq!(Category::Geometry.display_name(), "Geometry");
        assert_eq!(Category::default(), Category::Utility);
    }
}
