//! Lens correction: radial distortion remap.

use crate::core::context::FilterContext;
use crate::core::error::FilterResult;
use crate::core::geometry::{CropRect, Rect, Size};
use crate::core::image::Image16;
use crate::core::node::{Category, Filter, NodeMetadata, RoiSupport};
use crate::core::param::ParameterDefinition;
use crate::core::types::{ParamType, Value};
use crate::execution::request::{FilterResponse, Quality};
use crate::filters::builtin::rotate::set_proposed_crop;
use crate::filters::registry::FilterRegistry;
use indexmap::IndexMap;

/// Register the lens correction filter.
pub fn register(registry: &mut FilterRegistry) {
    registry.register(|| Box::new(LensCorrection));
}

/// Corrects barrel/pincushion distortion with a single radial coefficient.
///
/// A source point at normalised radius `r` (1.0 = half diagonal) is moved to
/// `r * (1 + k1 * r^2)`. Disabled, or with `k1 == 0`, the stage is a
/// pass-through.
///
/// A positive `k1` samples beyond the frame near the corners; the response
/// then proposes the largest centred crop whose samples all stay inside.
#[derive(Debug, Clone)]
pub struct LensCorrection;

impl LensCorrection {
    fn coefficient(enabled: Option<bool>, k1: Option<f64>) -> Option<f32> {
        let k1 = k1.unwrap_or(0.0);
        (enabled.unwrap_or(false) && k1.abs() > f64::EPSILON).then_some(k1 as f32)
    }
}

fn bilinear(image: &Image16, x: f32, y: f32, out: &mut [u16]) {
    let x0 = x.floor();
    let y0 = y.floor();
    let (fx, fy) = (x - x0, y - y0);
    let (x0, y0) = (x0 as i64, y0 as i64);
    let p00 = image.pixel_clamped(x0, y0);
    let p10 = image.pixel_clamped(x0 + 1, y0);
    let p01 = image.pixel_clamped(x0, y0 + 1);
    let p11 = image.pixel_clamped(x0 + 1, y0 + 1);
    for (c, dst) in out.iter_mut().enumerate() {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        *dst = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 65535.0) as u16;
    }
}

/// Largest centred rectangle, with the frame's aspect, that samples only
/// inside the frame. `None` when the whole frame is valid.
fn valid_area(size: Size, k1: f32) -> Option<CropRect> {
    if k1 <= 0.0 || size.width == 0 || size.height == 0 {
        return None;
    }
    // the corner at relative extent s samples at s * (1 + k1 * s^2)
    let k1 = k1 as f64;
    let (mut lo, mut hi) = (0.0f64, 1.0f64);
    for _ in 0..40 {
        let mid = (lo + hi) / 2.0;
        if mid * (1.0 + k1 * mid * mid) <= 1.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    let cx = (size.width as f64 - 1.0) / 2.0;
    let cy = (size.height as f64 - 1.0) / 2.0;
    let x1 = (cx - lo * cx - 1e-6).ceil() as i32;
    let y1 = (cy - lo * cy - 1e-6).ceil() as i32;
    let x2 = (cx + lo * cx + 1e-6).floor() as i32 + 1;
    let y2 = (cy + lo * cy + 1e-6).floor() as i32 + 1;
    Some(CropRect::new(
        x1.max(0),
        y1.max(0),
        x2.min(size.width as i32),
        y2.min(size.height as i32),
    ))
}

/// Remap `image` through the radial model.
fn undistort(image: &Image16, k1: f32, quick: bool) -> Image16 {
    let cx = (image.width() as f32 - 1.0) / 2.0;
    let cy = (image.height() as f32 - 1.0) / 2.0;
    let norm = (cx * cx + cy * cy).sqrt().max(1.0);
    Image16::from_fn(image.width(), image.height(), image.channels(), |x, y, px| {
        let dx = (x as f32 - cx) / norm;
        let dy = (y as f32 - cy) / norm;
        let scale = 1.0 + k1 * (dx * dx + dy * dy);
        let sx = cx + dx * scale * norm;
        let sy = cy + dy * scale * norm;
        if quick {
            px.copy_from_slice(image.pixel_clamped(sx.round() as i64, sy.round() as i64));
        } else {
            bilinear(image, sx, sy, px);
        }
    })
}

impl Filter for LensCorrection {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder("lens_correction", "Lens Correction")
            .description("Correct radial lens distortion")
            .category(Category::Geometry)
            .parameter(
                ParameterDefinition::new("distortion-enabled", ParamType::Boolean, Value::Boolean(false))
                    .with_description("Apply distortion correction"),
            )
            .parameter(
                ParameterDefinition::new("k1", ParamType::Float, Value::Float(0.0))
                    .with_description("Radial distortion coefficient")
                    .with_range(-1.0, 1.0),
            )
            .roi(RoiSupport::Global)
            .build()
    }

    fn get_image(&self, ctx: &FilterContext<'_>) -> FilterResult<FilterResponse> {
        let request = ctx.request();
        let Some(k1) = Self::coefficient(ctx.get_bool("distortion-enabled"), ctx.get_float("k1")) else {
            return Ok(ctx.upstream_image(request));
        };

        let upstream = ctx.upstream_image(&request.with_roi(None));
        let Some(input) = upstream.image() else {
            return Ok(upstream);
        };
        let corrected = undistort(input, k1, request.is_quick());
        let valid = valid_area(input.size(), k1);

        let mut response = upstream.clone();
        if let Some(valid) = valid {
            set_proposed_crop(&mut response, valid);
        }
        response.set_image(Some(corrected));
        response.set_image8(None);
        response.set_region(None);
        if request.is_quick() {
            response.set_quality(Quality::Quick);
        }
        Ok(response)
    }

    fn map_region(&self, params: &IndexMap<String, Value>, region: Rect) -> Option<Rect> {
        let enabled = params.get("distortion-enabled").and_then(Value::as_bool);
        let k1 = params.get("k1").and_then(Value::as_float);
        match Self::coefficient(enabled, k1) {
            Some(_) => None,
            None => Some(region),
        }
    }

    fn clone_box(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::engine::EvaluationEngine;
    use crate::execution::request::FilterRequest;
    use crate::filters::builtin::testing::{fed_chain, flat, gradient};
    use crate::graph::FilterGraph;

    #[test]
    fn test_disabled_is_pass_through() {
        let mut graph = FilterGraph::new();
        let source = gradient(20, 20);
        let ids = fed_chain(&mut graph, &source, &["lens_correction"]);
        graph.set_parameter(ids[1], "k1", Value::Float(0.2)).unwrap();

        let engine = EvaluationEngine::default();
        let response = engine.get_image(&graph, ids[1], &FilterRequest::new());
        assert!(response.image().unwrap().ptr_eq(&source));
    }

    #[test]
    fn test_centre_is_fixed_point() {
        let source = gradient(21, 21);
        let out = undistort(&source, 0.3, false);
        assert_eq!(out.pixel(10, 10), source.pixel(10, 10));
        // barrel correction pulls corners from further out
        assert_ne!(out.pixel(1, 1), source.pixel(1, 1));
    }

    #[test]
    fn test_quick_mode_marks_response() {
        let mut graph = FilterGraph::new();
        let ids = fed_chain(&mut graph, &flat(16, 16, 1234), &["lens_correction"]);
        graph.set_parameter(ids[1], "distortion-enabled", Value::Boolean(true)).unwrap();
        graph.set_parameter(ids[1], "k1", Value::Float(-0.1)).unwrap();

        let engine = EvaluationEngine::default();
        let mut request = FilterRequest::new();
        request.set_quick(true);
        let response = engine.get_image(&graph, ids[1], &request);
        assert!(response.is_quick());
        assert_eq!(response.image().unwrap().pixel(8, 8), &[1234, 1234, 1234]);
    }

    #[test]
    fn test_valid_area_stays_inside_samples() {
        let size = Size::new(101, 61);
        assert_eq!(valid_area(size, -0.2), None);
        assert_eq!(valid_area(size, 0.0), None);

        let crop = valid_area(size, 0.2).unwrap();
        assert!(crop.x1 > 0 && crop.y1 > 0);
        assert!(crop.x2 < 101 && crop.y2 < 61);
        // centred
        assert_eq!(crop.x1, 101 - crop.x2);
        assert_eq!(crop.y1, 61 - crop.y2);

        // the corner of the proposal samples inside the frame
        let (cx, cy) = (50.0f64, 30.0f64);
        let norm = (cx * cx + cy * cy).sqrt();
        let (dx, dy) = ((crop.x1 as f64 - cx) / norm, (crop.y1 as f64 - cy) / norm);
        let scale = 1.0 + 0.2 * (dx * dx + dy * dy);
        assert!(cx + dx * scale * norm >= -1e-6);
        assert!(cy + dy * scale * norm >= -1e-6);
    }

    #[test]
    fn test_pincushion_response_proposes_crop() {
        let mut graph = FilterGraph::new();
        let ids = fed_chain(&mut graph, &gradient(40, 30), &["lens_correction"]);
        graph.set_parameter(ids[1], "distortion-enabled", Value::Boolean(true)).unwrap();
        graph.set_parameter(ids[1], "k1", Value::Float(0.3)).unwrap();

        let engine = EvaluationEngine::default();
        let response = engine.get_image(&graph, ids[1], &FilterRequest::new());
        let crop = crate::filters::builtin::rotate::proposed_crop(&response).unwrap();
        assert_eq!(Some(crop), valid_area(Size::new(40, 30), 0.3));
        assert!(crop.x2 - crop.x1 < 40);
    }
}
