//! Exposure mask: paints clipped highlights red and crushed shadows blue.

use crate::core::context::FilterContext;
use crate::core::error::FilterResult;
use crate::core::node::{Category, Filter, NodeMetadata, RoiSupport};
use crate::core::param::ParameterDefinition;
use crate::core::types::{ParamType, Value};
use crate::execution::request::FilterResponse;
use crate::filters::registry::FilterRegistry;

/// Register the exposure mask filter.
pub fn register(registry: &mut FilterRegistry) {
    registry.register(|| Box::new(ExposureMask));
}

/// Samples at or above this are clipped.
pub const CLIP_HIGH: u16 = 0xfff0;
/// Pixels with every sample at or below this are crushed.
pub const CLIP_LOW: u16 = 0x0010;

#[derive(Debug, Clone)]
pub struct ExposureMask;

impl Filter for ExposureMask {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder("exposure_mask", "Exposure Mask")
            .description("Highlight clipped and crushed pixels")
            .category(Category::Color)
            .parameter(
                ParameterDefinition::new("exposure-mask", ParamType::Boolean, Value::Boolean(false))
                    .with_description("Show the mask"),
            )
            .roi(RoiSupport::PerPixel)
            .build()
    }

    fn get_image(&self, ctx: &FilterContext<'_>) -> FilterResult<FilterResponse> {
        let upstream = ctx.upstream_image(ctx.request());
        if !ctx.get_bool("exposure-mask").unwrap_or(false) {
            return Ok(upstream);
        }
        let Some(image) = upstream.image() else {
            return Ok(upstream);
        };

        let masked = image.map_pixels(|src, dst| {
            dst.copy_from_slice(src);
            let rgb = &src[..3];
            if rgb.iter().any(|&v| v >= CLIP_HIGH) {
                dst[..3].copy_from_slice(&[u16::MAX, 0, 0]);
            } else if rgb.iter().all(|&v| v <= CLIP_LOW) {
                dst[..3].copy_from_slice(&[0, 0, u16::MAX]);
            }
        });

        let mut response = upstream.clone();
        response.set_image(Some(masked));
        response.set_image8(None);
        Ok(response)
    }

    fn clone_box(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }
}
