//! Denoise stage.

use crate::core::context::FilterContext;
use crate::core::error::{FilterError, FilterResult};
use crate::core::geometry::Rect;
use crate::core::image::Image16;
use crate::core::node::{Category, Filter, NodeMetadata, RoiSupport};
use crate::core::param::ParameterDefinition;
use crate::core::types::{ParamType, Value};
use crate::execution::request::{FilterResponse, Quality};
use crate::filters::registry::FilterRegistry;
use image::DynamicImage;
use indexmap::IndexMap;

/// Register the denoise filter.
pub fn register(registry: &mut FilterRegistry) {
    registry.register(|| Box::new(Denoise));
}

/// Largest blur radius, reached at luma strength 100.
const MAX_SIGMA: f32 = 3.0;

/// Smooths noise with a Gaussian whose width follows the snapshot's luma
/// noise reduction strength.
///
/// Skipped for quick requests; the response is then marked quick so the
/// consumer refines it later.
#[derive(Debug, Clone)]
pub struct Denoise;

impl Denoise {
    fn sigma(ctx: &FilterContext<'_>) -> Option<f32> {
        let settings = ctx.get_settings("settings")?;
        let sigma = (settings.denoise_luma.clamp(0.0, 100.0) as f32 / 100.0) * MAX_SIGMA;
        (sigma >= 0.1).then_some(sigma)
    }

    /// Pixels of context needed on each side for `sigma`.
    fn margin(sigma: f32) -> u32 {
        (sigma * 3.0).ceil() as u32
    }
}

fn blur(image: &Image16, sigma: f32) -> FilterResult<Image16> {
    let blurred = if image.channels() == 4 {
        let rgba = image.to_dynamic().into_rgba16();
        DynamicImage::ImageRgba16(imageproc::filter::gaussian_blur_f32(&rgba, sigma))
    } else {
        let rgb = image.to_dynamic().into_rgb16();
        DynamicImage::ImageRgb16(imageproc::filter::gaussian_blur_f32(&rgb, sigma))
    };
    Image16::from_dynamic(blurred)
}

impl Filter for Denoise {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder("denoise", "Denoise")
            .description("Reduce luma noise")
            .category(Category::Detail)
            .parameter(
                ParameterDefinition::new("settings", ParamType::Settings, Value::None)
                    .optional()
                    .with_description("Development settings carrying the noise reduction strength"),
            )
            .roi(RoiSupport::Kernel)
            .build()
    }

    fn get_image(&self, ctx: &FilterContext<'_>) -> FilterResult<FilterResponse> {
        let request = ctx.request();
        let Some(sigma) = Self::sigma(ctx) else {
            return Ok(ctx.upstream_image(request));
        };
        if request.is_quick() {
            return Ok(ctx.upstream_image(request).with_quality(Quality::Quick));
        }

        // Ask for the ROI plus the kernel's reach
        let frame = ctx.upstream_size(&request.with_roi(None)).unwrap_or_default();
        let wanted = request
            .roi()
            .map(|roi| roi.expand(Self::margin(sigma)))
            .and_then(|r| r.intersect(&frame.bounds()));
        let upstream = ctx.upstream_image(&request.with_roi(wanted));
        let Some(input) = upstream.image() else {
            return Ok(upstream);
        };

        let blurred = blur(input, sigma).map_err(|e| FilterError::Computation {
            node_id: ctx.node_id,
            error: e.to_string(),
        })?;
        let mut response = upstream.clone();
        response.set_image(Some(blurred));
        response.set_image8(None);
        Ok(response)
    }

    fn map_region(&self, params: &IndexMap<String, Value>, region: Rect) -> Option<Rect> {
        let margin = params
            .get("settings")
            .and_then(Value::as_settings)
            .map(|s| Self::margin((s.denoise_luma.clamp(0.0, 100.0) as f32 / 100.0) * MAX_SIGMA))
            .unwrap_or(0);
        Some(region.expand(margin))
    }

    fn clone_box(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::Size;
    use crate::core::types::DevelopSettings;
    use crate::execution::engine::EvaluationEngine;
    use crate::execution::request::FilterRequest;
    use crate::filters::builtin::testing::{fed_chain, flat};
    use crate::graph::FilterGraph;
    use std::sync::Arc;

    fn noisy(width: u32, height: u32) -> Image16 {
        Image16::from_fn(width, height, 3, |x, y, px| {
            px.fill(if (x + y) % 2 == 0 { 10000 } else { 30000 });
        })
    }

    fn strength(luma: f64) -> Value {
        Value::Settings(Arc::new(DevelopSettings {
            denoise_luma: luma,
            ..DevelopSettings::default()
        }))
    }

    #[test]
    fn test_smooths_checkerboard() {
        let mut graph = FilterGraph::new();
        let ids = fed_chain(&mut graph, &noisy(32, 32), &["denoise"]);
        graph.set_parameter(ids[1], "settings", strength(50.0)).unwrap();

        let engine = EvaluationEngine::default();
        let response = engine.get_image(&graph, ids[1], &FilterRequest::new());
        let centre = response.image().unwrap().pixel(16, 16)[0];
        assert!(centre > 15000 && centre < 25000);
        assert!(!response.is_quick());
    }

    #[test]
    fn test_quick_skips_and_marks() {
        let mut graph = FilterGraph::new();
        let source = noisy(16, 16);
        let ids = fed_chain(&mut graph, &source, &["denoise"]);
        graph.set_parameter(ids[1], "settings", strength(80.0)).unwrap();

        let engine = EvaluationEngine::default();
        let mut request = FilterRequest::new();
        request.set_quick(true);
        let response = engine.get_image(&graph, ids[1], &request);
        assert!(response.is_quick());
        assert!(response.image().unwrap().ptr_eq(&source));
    }

    #[test]
    fn test_no_strength_is_full_quality_pass_through() {
        let mut graph = FilterGraph::new();
        let ids = fed_chain(&mut graph, &flat(8, 8, 5), &["denoise"]);
        let engine = EvaluationEngine::default();
        let mut request = FilterRequest::new();
        request.set_quick(true);
        assert!(!engine.get_image(&graph, ids[1], &request).is_quick());
    }

    #[test]
    fn test_roi_result_is_exact() {
        let mut graph = FilterGraph::new();
        let ids = fed_chain(&mut graph, &noisy(40, 40), &["denoise"]);
        graph.set_parameter(ids[1], "settings", strength(30.0)).unwrap();

        let engine = EvaluationEngine::default();
        let roi = Rect::new(10, 12, 8, 6);
        let part = engine.get_image(&graph, ids[1], &FilterRequest::new().with_roi(Some(roi)));
        let whole = engine.get_image(&graph, ids[1], &FilterRequest::new());
        let part_image = part.image().unwrap();
        assert_eq!(part_image.size(), Size::new(8, 6));
        assert_eq!(part.region(), Some(roi));
        assert_eq!(part_image.pixel(3, 3), whole.image().unwrap().pixel(13, 15));
    }
}
