//! Rotate stage: orientation (quarter turns and mirroring) plus a free angle.
//!
//! Orientation follows the camera convention used by the photo model:
//! bits 0-1 count clockwise quarter turns, bit 2 mirrors horizontally before
//! turning. The free angle rotates clockwise about the centre into an
//! expanded canvas that holds the whole rotated frame.
//!
//! A rotated response carries the largest axis-aligned rectangle that lies
//! entirely inside the rotated photo, as the auxiliary integers
//! `proposed-crop-x1`, `-y1`, `-x2`, `-y2` (output coordinates). Without a
//! free angle, a proposal made upstream (by lens correction) is oriented
//! into output coordinates instead.

use crate::core::context::FilterContext;
use crate::core::error::{FilterError, FilterResult};
use crate::core::geometry::{CropRect, Rect, Size};
use crate::core::image::Image16;
use crate::core::node::{Category, Filter, NodeMetadata, RoiSupport};
use crate::core::param::ParameterDefinition;
use crate::core::types::{ParamType, Value};
use crate::execution::request::{ChangedMask, FilterResponse, Quality};
use crate::filters::registry::FilterRegistry;
use image::{DynamicImage, Rgba};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use indexmap::IndexMap;

/// Register the rotate filter.
pub fn register(registry: &mut FilterRegistry) {
    registry.register(|| Box::new(Rotate));
}

pub const AUX_PROPOSED_X1: &str = "proposed-crop-x1";
pub const AUX_PROPOSED_Y1: &str = "proposed-crop-y1";
pub const AUX_PROPOSED_X2: &str = "proposed-crop-x2";
pub const AUX_PROPOSED_Y2: &str = "proposed-crop-y2";

/// Angles closer to zero than this are treated as no rotation.
const ANGLE_EPSILON: f64 = 1e-6;

/// Rotates its upstream.
#[derive(Debug, Clone)]
pub struct Rotate;

/// Parameters of one invocation.
#[derive(Debug, Clone, Copy)]
struct Turn {
    angle: f64,
    quarter_turns: u8,
    mirror: bool,
}

impl Turn {
    fn from_params(angle: Option<f64>, orientation: Option<i64>) -> Self {
        let orientation = orientation.unwrap_or(0).clamp(0, 7) as u8;
        Self {
            angle: angle.unwrap_or(0.0) % 360.0,
            quarter_turns: orientation & 3,
            mirror: orientation & 4 != 0,
        }
    }

    fn from_ctx(ctx: &FilterContext<'_>) -> Self {
        Self::from_params(ctx.get_float("angle"), ctx.get_integer("orientation"))
    }

    fn has_angle(&self) -> bool {
        self.angle.abs() > ANGLE_EPSILON
    }

    fn is_noop(&self) -> bool {
        !self.has_angle() && self.quarter_turns == 0 && !self.mirror
    }

    /// Size after orientation only.
    fn oriented(&self, size: Size) -> Size {
        if self.quarter_turns % 2 == 1 {
            Size::new(size.height, size.width)
        } else {
            size
        }
    }

    /// Size of the canvas holding the rotated frame.
    fn output(&self, size: Size) -> Size {
        let size = self.oriented(size);
        if !self.has_angle() {
            return size;
        }
        let (sin, cos) = self.angle.to_radians().sin_cos();
        let (w, h) = (size.width as f64, size.height as f64);
        // trig noise must not add a pixel at exact quarter angles
        let extent = |v: f64| (v - 1e-6).ceil().max(1.0) as u32;
        Size::new(
            extent(w * cos.abs() + h * sin.abs()),
            extent(w * sin.abs() + h * cos.abs()),
        )
    }

    /// Largest axis-aligned rectangle inside the rotated frame, centred on
    /// the output canvas.
    fn proposed_crop(&self, size: Size) -> CropRect {
        let oriented = self.oriented(size);
        let canvas = self.output(size);
        let (w, h) = (oriented.width as f64, oriented.height as f64);
        let (crop_w, crop_h) = if !self.has_angle() || w <= 0.0 || h <= 0.0 {
            (w, h)
        } else {
            let (sin, cos) = self.angle.to_radians().sin_cos();
            let (sin, cos) = (sin.abs(), cos.abs());
            let (long, short) = if w >= h { (w, h) } else { (h, w) };
            if short <= 2.0 * sin * cos * long || (sin - cos).abs() < 1e-10 {
                // Half-constrained: two corners touch the longer side
                let x = 0.5 * short;
                if w >= h {
                    (x / sin, x / cos)
                } else {
                    (x / cos, x / sin)
                }
            } else {
                let cos_2a = cos * cos - sin * sin;
                ((w * cos - h * sin) / cos_2a, (h * cos - w * sin) / cos_2a)
            }
        };
        let x1 = ((canvas.width as f64 - crop_w) / 2.0).ceil() as i32;
        let y1 = ((canvas.height as f64 - crop_h) / 2.0).ceil() as i32;
        CropRect::new(
            x1.max(0),
            y1.max(0),
            (x1 + crop_w.floor() as i32).min(canvas.width as i32),
            (y1 + crop_h.floor() as i32).min(canvas.height as i32),
        )
    }
}

/// Map a rectangle of an unoriented frame of `size` through `orientation`.
pub fn orient_rect(rect: CropRect, orientation: u8, size: Size) -> CropRect {
    let turn = Turn::from_params(None, Some(orientation as i64));
    let mut rect = if turn.mirror { mirror_rect(rect, size) } else { rect };
    let mut size = size;
    for _ in 0..turn.quarter_turns {
        // clockwise: (x, y) -> (h - y, x)
        rect = CropRect::new(
            size.height as i32 - rect.y2,
            rect.x1,
            size.height as i32 - rect.y1,
            rect.x2,
        );
        size = Size::new(size.height, size.width);
    }
    rect
}

/// Inverse of [`orient_rect`]: map a rectangle of the oriented frame back
/// onto the unoriented frame of `size`.
pub fn unorient_rect(rect: CropRect, orientation: u8, size: Size) -> CropRect {
    let turn = Turn::from_params(None, Some(orientation as i64));
    let mut rect = rect;
    let mut frame = turn.oriented(size);
    for _ in 0..turn.quarter_turns {
        // counter-clockwise: (x, y) -> (y, w - x)
        rect = CropRect::new(
            rect.y1,
            frame.width as i32 - rect.x2,
            rect.y2,
            frame.width as i32 - rect.x1,
        );
        frame = Size::new(frame.height, frame.width);
    }
    if turn.mirror {
        mirror_rect(rect, size)
    } else {
        rect
    }
}

fn mirror_rect(rect: CropRect, size: Size) -> CropRect {
    CropRect::new(size.width as i32 - rect.x2, rect.y1, size.width as i32 - rect.x1, rect.y2)
}

pub(crate) fn set_proposed_crop(response: &mut FilterResponse, rect: CropRect) {
    response.set_aux(AUX_PROPOSED_X1, Value::Integer(rect.x1 as i64));
    response.set_aux(AUX_PROPOSED_Y1, Value::Integer(rect.y1 as i64));
    response.set_aux(AUX_PROPOSED_X2, Value::Integer(rect.x2 as i64));
    response.set_aux(AUX_PROPOSED_Y2, Value::Integer(rect.y2 as i64));
}

/// Read a proposed crop back from a response.
pub fn proposed_crop(response: &FilterResponse) -> Option<CropRect> {
    Some(CropRect::new(
        response.aux_integer(AUX_PROPOSED_X1)? as i32,
        response.aux_integer(AUX_PROPOSED_Y1)? as i32,
        response.aux_integer(AUX_PROPOSED_X2)? as i32,
        response.aux_integer(AUX_PROPOSED_Y2)? as i32,
    ))
}

fn orient(image: DynamicImage, turn: &Turn) -> DynamicImage {
    let image = if turn.mirror { image.fliph() } else { image };
    match turn.quarter_turns {
        1 => image.rotate90(),
        2 => image.rotate180(),
        3 => image.rotate270(),
        _ => image,
    }
}

fn rotate_free(image: DynamicImage, turn: &Turn, canvas: Size, quick: bool) -> DynamicImage {
    let src = image.into_rgba16();
    let mut padded = image::ImageBuffer::from_pixel(canvas.width, canvas.height, Rgba([0u16, 0, 0, 0]));
    let dx = (canvas.width as i64 - src.width() as i64) / 2;
    let dy = (canvas.height as i64 - src.height() as i64) / 2;
    image::imageops::overlay(&mut padded, &src, dx, dy);

    let interpolation = if quick {
        Interpolation::Nearest
    } else {
        Interpolation::Bilinear
    };
    let rotated = rotate_about_center(
        &padded,
        turn.angle.to_radians() as f32,
        interpolation,
        Rgba([0u16, 0, 0, 0]),
    );
    DynamicImage::ImageRgba16(rotated)
}

impl Filter for Rotate {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder("rotate", "Rotate")
            .description("Apply orientation and a free rotation angle")
            .category(Category::Geometry)
            .parameter(
                ParameterDefinition::new("angle", ParamType::Float, Value::Float(0.0))
                    .with_description("Clockwise rotation in degrees")
                    .with_range(-360.0, 360.0)
                    .affects(ChangedMask::DIMENSION | ChangedMask::PIXELS),
            )
            .parameter(
                ParameterDefinition::new("orientation", ParamType::Integer, Value::Integer(0))
                    .with_description("Quarter turns in bits 0-1, horizontal mirror in bit 2")
                    .with_range(0.0, 7.0)
                    .affects(ChangedMask::DIMENSION | ChangedMask::PIXELS),
            )
            .roi(RoiSupport::Global)
            .build()
    }

    fn get_image(&self, ctx: &FilterContext<'_>) -> FilterResult<FilterResponse> {
        let request = ctx.request();
        let turn = Turn::from_ctx(ctx);

        if turn.is_noop() {
            return Ok(ctx.upstream_image(request));
        }

        // Every output pixel may come from anywhere in the input
        let upstream = ctx.upstream_image(&request.with_roi(None));
        let Some(input) = upstream.image() else {
            return Ok(upstream);
        };
        let channels = input.channels();
        let input_size = input.size();

        let mut image = orient(input.to_dynamic(), &turn);
        let mut quality = upstream.quality();
        if turn.has_angle() {
            image = rotate_free(image, &turn, turn.output(input_size), request.is_quick());
            if request.is_quick() {
                quality = Quality::Quick;
            }
        }
        let image = if channels == 3 {
            DynamicImage::ImageRgb16(image.into_rgb16())
        } else {
            image
        };
        let rotated = Image16::from_dynamic(image).map_err(|e| FilterError::Computation {
            node_id: ctx.node_id,
            error: e.to_string(),
        })?;

        let mut response = upstream.clone();
        response.set_image(Some(rotated));
        response.set_image8(None);
        response.set_region(None);
        response.set_quality(quality);
        if turn.has_angle() {
            set_proposed_crop(&mut response, turn.proposed_crop(input_size));
        } else if let Some(upstream_crop) = proposed_crop(&upstream) {
            let orientation = turn.quarter_turns | if turn.mirror { 4 } else { 0 };
            set_proposed_crop(&mut response, orient_rect(upstream_crop, orientation, input_size));
        }
        Ok(response)
    }

    fn get_size(&self, ctx: &FilterContext<'_>) -> Option<Size> {
        let upstream = ctx.upstream_size(ctx.request())?;
        Some(Turn::from_ctx(ctx).output(upstream))
    }

    fn map_region(&self, params: &IndexMap<String, Value>, region: Rect) -> Option<Rect> {
        let turn = Turn::from_params(
            params.get("angle").and_then(Value::as_float),
            params.get("orientation").and_then(Value::as_integer),
        );
        if turn.is_noop() {
            Some(region)
        } else {
            None
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
    fn test_quarter_turn_swaps_size() {
        let mut graph = FilterGraph::new();
        let source = gradient(40, 20);
        let ids = fed_chain(&mut graph, &source, &["rotate"]);
        graph.set_parameter(ids[1], "orientation", Value::Integer(1)).unwrap();

        let engine = EvaluationEngine::default();
        let request = FilterRequest::new();
        assert_eq!(engine.get_size(&graph, ids[1], &request), Some(Size::new(20, 40)));
        let response = engine.get_image(&graph, ids[1], &request);
        let image = response.image().unwrap();
        assert_eq!(image.size(), Size::new(20, 40));
        // clockwise: the bottom-left source pixel lands top-left
        assert_eq!(image.pixel(0, 0), source.pixel(0, 19));
    }

    #[test]
    fn test_mirror_bit() {
        let mut graph = FilterGraph::new();
        let source = gradient(10, 4);
        let ids = fed_chain(&mut graph, &source, &["rotate"]);
        graph.set_parameter(ids[1], "orientation", Value::Integer(4)).unwrap();

        let engine = EvaluationEngine::default();
        let response = engine.get_image(&graph, ids[1], &FilterRequest::new());
        assert_eq!(response.image().unwrap().pixel(0, 0), source.pixel(9, 0));
    }

    #[test]
    fn test_free_angle_expands_canvas() {
        let turn = Turn::from_params(Some(90.0), Some(0));
        assert_eq!(turn.output(Size::new(40, 20)), Size::new(20, 40));

        let turn = Turn::from_params(Some(45.0), Some(0));
        let out = turn.output(Size::new(100, 100));
        assert_eq!(out, Size::new(142, 142));
    }

    #[test]
    fn test_free_angle_renders_and_marks_quick() {
        let mut graph = FilterGraph::new();
        let ids = fed_chain(&mut graph, &flat(30, 20, 40000), &["rotate"]);
        graph.set_parameter(ids[1], "angle", Value::Float(10.0)).unwrap();

        let engine = EvaluationEngine::default();
        let mut request = FilterRequest::new();
        let full = engine.get_image(&graph, ids[1], &request);
        let expected = engine.get_size(&graph, ids[1], &request).unwrap();
        assert_eq!(full.image().unwrap().size(), expected);
        assert_eq!(full.quality(), Quality::Full);
        // centre stays inside the photo
        let centre = full.image().unwrap().pixel(expected.width / 2, expected.height / 2)[0];
        assert!(centre > 39000);

        request.set_quick(true);
        let quick = engine.get_image(&graph, ids[1], &request);
        assert!(quick.is_quick());
    }

    #[test]
    fn test_proposed_crop_identity() {
        let turn = Turn::from_params(Some(0.0), Some(0));
        assert_eq!(turn.proposed_crop(Size::new(300, 200)), CropRect::new(0, 0, 300, 200));

        let turn = Turn::from_params(Some(0.0), Some(1));
        assert_eq!(turn.proposed_crop(Size::new(300, 200)), CropRect::new(0, 0, 200, 300));
    }

    #[test]
    fn test_proposed_crop_inside_rotated_frame() {
        let turn = Turn::from_params(Some(5.0), Some(0));
        let size = Size::new(300, 200);
        let canvas = turn.output(size);
        let crop = turn.proposed_crop(size);
        assert!(crop.x1 > 0 && crop.y1 > 0);
        assert!(crop.x2 < canvas.width as i32 && crop.y2 < canvas.height as i32);
        assert!(crop.x2 - crop.x1 < 300 && crop.y2 - crop.y1 < 200);
        assert!(crop.x2 - crop.x1 > 250);
    }

    #[test]
    fn test_proposed_crop_reaches_response() {
        let mut graph = FilterGraph::new();
        let ids = fed_chain(&mut graph, &gradient(64, 48), &["rotate", "identity"]);
        let engine = EvaluationEngine::default();
        let response = engine.get_image(&graph, ids[2], &FilterRequest::new());
        // nothing shrinks a straight, uncorrected frame
        assert_eq!(proposed_crop(&response), None);

        graph.set_parameter(ids[1], "angle", Value::Float(3.0)).unwrap();
        let response = engine.get_image(&graph, ids[2], &FilterRequest::new());
        let crop = proposed_crop(&response).unwrap();
        assert!(crop.x1 > 0 && crop.y1 > 0);
    }

    #[test]
    fn test_orient_rect_matches_pixels() {
        // top-left source pixel lands top-right after a clockwise turn
        let size = Size::new(40, 20);
        let rect = CropRect::new(0, 0, 10, 5);
        assert_eq!(orient_rect(rect, 1, size), CropRect::new(15, 0, 20, 10));
        assert_eq!(orient_rect(rect, 2, size), CropRect::new(30, 15, 40, 20));
        assert_eq!(orient_rect(rect, 4, size), CropRect::new(30, 0, 40, 5));
    }

    #[test]
    fn test_unorient_rect_inverts_every_orientation() {
        let size = Size::new(40, 20);
        let rect = CropRect::new(3, 2, 17, 11);
        for orientation in 0..8u8 {
            let oriented = orient_rect(rect, orientation, size);
            assert_eq!(unorient_rect(oriented, orientation, size), rect, "orientation {}", orientation);
        }
    }

    #[test]
    fn test_upstream_proposal_is_oriented() {
        let mut graph = FilterGraph::new();
        let ids = fed_chain(&mut graph, &gradient(40, 20), &["lens_correction", "rotate"]);
        graph.set_parameter(ids[1], "distortion-enabled", Value::Boolean(true)).unwrap();
        graph.set_parameter(ids[1], "k1", Value::Float(0.2)).unwrap();
        graph.set_parameter(ids[2], "orientation", Value::Integer(1)).unwrap();

        let engine = EvaluationEngine::default();
        let lens = proposed_crop(&engine.get_image(&graph, ids[1], &FilterRequest::new())).unwrap();
        let rotated = proposed_crop(&engine.get_image(&graph, ids[2], &FilterRequest::new())).unwrap();
        assert_eq!(rotated, orient_rect(lens, 1, Size::new(40, 20)));
        assert_eq!(unorient_rect(rotated, 1, Size::new(40, 20)), lens);
    }

    #[test]
    fn test_map_region_only_without_rotation() {
        let mut params = IndexMap::new();
        params.insert("angle".to_string(), Value::Float(0.0));
        params.insert("orientation".to_string(), Value::Integer(0));
        let region = Rect::new(1, 2, 3, 4);
        assert_eq!(Rotate.map_region(&params, region), Some(region));
        params.insert("orientation".to_string(), Value::Integer(2));
        assert_eq!(Rotate.map_region(&params, region), None);
    }
}
