//! Crop stage.

use crate::core::context::FilterContext;
use crate::core::error::FilterResult;
use crate::core::geometry::{Rect, Size};
use crate::core::node::{Category, Filter, NodeMetadata, RoiSupport};
use crate::core::param::ParameterDefinition;
use crate::core::types::{ParamType, Value};
use crate::execution::request::{ChangedMask, FilterResponse};
use crate::filters::registry::FilterRegistry;
use indexmap::IndexMap;

/// Register the crop filter.
pub fn register(registry: &mut FilterRegistry) {
    registry.register(|| Box::new(Crop));
}

/// Cuts a rectangle out of its upstream.
///
/// Output coordinates start at the rectangle's top-left corner, so a request
/// ROI is simply translated into upstream space. No rectangle means
/// pass-through.
#[derive(Debug, Clone)]
pub struct Crop;

impl Crop {
    /// The crop rectangle clipped to the upstream frame.
    fn effective_rect(ctx: &FilterContext<'_>) -> Option<Rect> {
        let rect = ctx.get_rect("rectangle")?.to_rect();
        let upstream = ctx.upstream_size(&ctx.request().with_roi(None))?;
        Some(rect.intersect(&upstream.bounds()).unwrap_or_default())
    }
}

impl Filter for Crop {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder("crop", "Crop")
            .description("Cut out a rectangle of the photo")
            .category(Category::Geometry)
            .parameter(
                ParameterDefinition::new("rectangle", ParamType::Rect, Value::None)
                    .optional()
                    .with_description("Crop rectangle in upstream coordinates, x2/y2 exclusive")
                    .affects(ChangedMask::DIMENSION | ChangedMask::PIXELS),
            )
            .roi(RoiSupport::PerPixel)
            .build()
    }

    fn get_image(&self, ctx: &FilterContext<'_>) -> FilterResult<FilterResponse> {
        let request = ctx.request();
        let Some(rect) = Self::effective_rect(ctx) else {
            return Ok(ctx.upstream_image(request));
        };
        if rect.is_empty() {
            return Ok(FilterResponse::empty());
        }

        let roi = request.roi().unwrap_or_else(|| rect.size().bounds());
        let upstream_roi = roi.translate(rect.x, rect.y);
        let response = ctx.upstream_image(&request.with_roi(Some(upstream_roi)));
        if !response.has_image() {
            return Ok(response);
        }

        let frame = ctx
            .upstream_size(&request.with_roi(None))
            .unwrap_or_else(|| rect.size());
        let mut out = response.crop_to(upstream_roi, frame);
        out.set_region(Some(roi));
        Ok(out)
    }

    fn get_size(&self, ctx: &FilterContext<'_>) -> Option<Size> {
        match Self::effective_rect(ctx) {
            Some(rect) => Some(rect.size()),
            None => ctx.upstream_size(ctx.request()),
        }
    }

    fn map_region(&self, params: &IndexMap<String, Value>, region: Rect) -> Option<Rect> {
        match params.get("rectangle").and_then(Value::as_rect) {
            Some(rect) => {
                let rect = rect.normalized();
                Some(region.translate(-rect.x1, -rect.y1))
            }
            None => Some(region),
        }
    }

    fn clone_box(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }
}
