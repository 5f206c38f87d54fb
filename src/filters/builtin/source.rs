//! Source stage: hands out the decoded photo.

use crate::core::context::FilterContext;
use crate::core::error::FilterResult;
use crate::core::geometry::Size;
use crate::core::node::{Category, Filter, NodeMetadata};
use crate::core::param::ParameterDefinition;
use crate::core::types::{ParamType, Value};
use crate::execution::request::{ChangedMask, FilterResponse};
use crate::filters::registry::FilterRegistry;

/// Register the source filter.
pub fn register(registry: &mut FilterRegistry) {
    registry.register(|| Box::new(Source));
}

/// Head of every chain. Holds the decoded image as a parameter, so swapping
/// the photo is an ordinary parameter change that reaches every reader.
#[derive(Debug, Clone)]
pub struct Source;

impl Filter for Source {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder("source", "Source")
            .description("Decoded photo feeding the preview chains")
            .category(Category::Input)
            .parameter(
                ParameterDefinition::new("image", ParamType::Image, Value::None)
                    .optional()
                    .with_description("Decoded 16-bit linear image; none while loading")
                    .affects(ChangedMask::DIMENSION | ChangedMask::PIXELS),
            )
            .source()
            .build()
    }

    fn get_image(&self, ctx: &FilterContext<'_>) -> FilterResult<FilterResponse> {
        // Nothing loaded yet is not an error
        Ok(ctx
            .get_image("image")
            .map(FilterResponse::from_image)
            .unwrap_or_default())
    }

    fn get_size(&self, ctx: &FilterContext<'_>) -> Option<Size> {
        ctx.get("image").and_then(Value::as_image).map(|img| img.size())
    }

    fn clone_box(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }
}
