//! Resample stage: scales its upstream to a target size.

use crate::core::context::FilterContext;
use crate::core::error::{FilterError, FilterResult};
use crate::core::geometry::{Rect, Size};
use crate::core::image::Image16;
use crate::core::node::{Category, Filter, NodeMetadata, RoiSupport};
use crate::core::param::{Constraint, ParameterDefinition};
use crate::core::types::{ParamType, Value};
use crate::execution::request::{ChangedMask, FilterRequest, FilterResponse, Quality};
use crate::filters::registry::FilterRegistry;
use image::imageops::FilterType;
use indexmap::IndexMap;

/// Register the resample filter.
pub fn register(registry: &mut FilterRegistry) {
    registry.register(|| Box::new(Resample));
}

/// Scales its upstream.
///
/// The target comes from the `width`/`height` parameters when both are set,
/// otherwise from the request's size hint. With the bounding-box attribute
/// the upstream is fitted inside the target keeping its aspect ratio and is
/// never enlarged. Without any target the stage is a pass-through.
#[derive(Debug, Clone)]
pub struct Resample;

impl Resample {
    fn target(ctx: &FilterContext<'_>) -> Option<Size> {
        let width = ctx.get_integer("width").unwrap_or(0);
        let height = ctx.get_integer("height").unwrap_or(0);
        if width > 0 && height > 0 {
            return Some(Size::new(width as u32, height as u32));
        }
        ctx.request().size().filter(|s| !s.is_empty())
    }

    fn output_size(ctx: &FilterContext<'_>, upstream: Size) -> Size {
        match Self::target(ctx) {
            None => upstream,
            Some(target) if ctx.bounding_box() => {
                if upstream.width <= target.width && upstream.height <= target.height {
                    upstream
                } else {
                    upstream.fit_within(target)
                }
            }
            Some(target) => target,
        }
    }

    /// The request handed upstream: the size hint is consumed here.
    fn upstream_request(request: &FilterRequest, roi: Option<Rect>) -> FilterRequest {
        let mut upstream = request.with_roi(roi);
        upstream.set_size(None);
        upstream
    }
}

impl Filter for Resample {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder("resample", "Resample")
            .description("Scale the image to a target size")
            .category(Category::Geometry)
            .parameter(
                ParameterDefinition::new("width", ParamType::Integer, Value::Integer(0))
                    .with_description("Target width, 0 to follow the request")
                    .with_constraint(Constraint::NonNegative)
                    .affects(ChangedMask::DIMENSION | ChangedMask::PIXELS),
            )
            .parameter(
                ParameterDefinition::new("height", ParamType::Integer, Value::Integer(0))
                    .with_description("Target height, 0 to follow the request")
                    .with_constraint(Constraint::NonNegative)
                    .affects(ChangedMask::DIMENSION | ChangedMask::PIXELS),
            )
            .parameter(
                ParameterDefinition::new("never-quick", ParamType::Boolean, Value::Boolean(false))
                    .with_description("Always use the high quality kernel"),
            )
            .roi(RoiSupport::Global)
            .build()
    }

    fn get_image(&self, ctx: &FilterContext<'_>) -> FilterResult<FilterResponse> {
        let request = ctx.request();
        let Some(upstream_size) = ctx.upstream_size(&Self::upstream_request(request, None)) else {
            return Ok(ctx.upstream_image(&Self::upstream_request(request, request.roi())));
        };
        let target = Self::output_size(ctx, upstream_size);
        if target == upstream_size {
            return Ok(ctx.upstream_image(&Self::upstream_request(request, request.roi())));
        }
        if target.is_empty() {
            return Ok(FilterResponse::empty());
        }

        let upstream = ctx.upstream_image(&Self::upstream_request(request, None));
        let Some(input) = upstream.image() else {
            return Ok(upstream);
        };

        let quick = request.is_quick() && !ctx.get_bool("never-quick").unwrap_or(false);
        let filter = if quick {
            FilterType::Triangle
        } else {
            FilterType::Lanczos3
        };
        let resized = input.to_dynamic().resize_exact(target.width, target.height, filter);
        let resized = Image16::from_dynamic(resized).map_err(|e| FilterError::Computation {
            node_id: ctx.node_id,
            error: e.to_string(),
        })?;

        let mut response = upstream.clone();
        response.set_image(Some(resized));
        response.set_image8(None);
        response.set_region(None);
        if quick {
            response.set_quality(Quality::Quick);
        }
        Ok(response)
    }

    fn get_size(&self, ctx: &FilterContext<'_>) -> Option<Size> {
        let upstream = ctx.upstream_size(&Self::upstream_request(ctx.request(), None))?;
        Some(Self::output_size(ctx, upstream))
    }

    fn map_region(&self, _params: &IndexMap<String, Value>, _region: Rect) -> Option<Rect> {
        // Scale factor depends on the request
        None
    }

    fn clone_box(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }
}
