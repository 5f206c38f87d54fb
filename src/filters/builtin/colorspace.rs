//! Colour space transform stage.
//!
//! Converts linear RGB between two colour spaces known to the pipeline's
//! colour management context. Samples stay 16-bit linear; display encoding
//! happens once, when an 8-bit image is asked for.

use crate::core::color::{apply, is_identity, ColorSpaceRef};
use crate::core::context::FilterContext;
use crate::core::error::FilterResult;
use crate::core::image::Sample;
use crate::core::node::{Category, Filter, NodeMetadata, RoiSupport};
use crate::core::param::ParameterDefinition;
use crate::core::types::{ParamType, Value};
use crate::execution::request::{FilterResponse, PARAM_COLORSPACE};
use crate::filters::registry::FilterRegistry;
use indexmap::IndexMap;
use log::debug;

/// Register the colour space transform filter.
pub fn register(registry: &mut FilterRegistry) {
    registry.register(|| Box::new(ColorSpaceTransform));
}

/// Converts between colour spaces.
///
/// An empty `output-colorspace` follows the colour space attached to the
/// request, which is how display chains track the monitor profile.
/// Unknown identifiers make the stage a pass-through.
#[derive(Debug, Clone)]
pub struct ColorSpaceTransform;

impl ColorSpaceTransform {
    fn spaces(ctx: &FilterContext<'_>) -> Option<(ColorSpaceRef, ColorSpaceRef)> {
        let pipeline = ctx.pipeline();
        let input = pipeline.color_space(ctx.get_string("input-colorspace")?)?;
        let output = match ctx.get_string("output-colorspace") {
            Some(id) if !id.is_empty() => pipeline.color_space(id)?,
            _ => ctx.request().color_space()?.clone(),
        };
        Some((input, output))
    }
}

impl Filter for ColorSpaceTransform {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder("colorspace_transform", "Colour Space Transform")
            .description("Convert linear RGB between colour spaces")
            .category(Category::Color)
            .parameter(
                ParameterDefinition::new("input-colorspace", ParamType::String, Value::String(String::new()))
                    .with_description("Colour space of the incoming samples"),
            )
            .parameter(
                ParameterDefinition::new("output-colorspace", ParamType::String, Value::String(String::new()))
                    .with_description("Target colour space; empty follows the request"),
            )
            .roi(RoiSupport::PerPixel)
            .build()
    }

    fn request_params(&self, params: &IndexMap<String, Value>) -> Vec<&'static str> {
        match params.get("output-colorspace").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => Vec::new(),
            _ => vec![PARAM_COLORSPACE],
        }
    }

    fn get_image(&self, ctx: &FilterContext<'_>) -> FilterResult<FilterResponse> {
        let upstream = ctx.upstream_image(ctx.request());
        let Some((input, output)) = Self::spaces(ctx) else {
            return Ok(upstream);
        };
        let matrix = input.matrix_to(&output);
        let Some(image) = upstream.image() else {
            return Ok(upstream);
        };
        if is_identity(&matrix) {
            return Ok(upstream);
        }
        debug!("{} -> {} on {}x{}", input.id(), output.id(), image.width(), image.height());

        let converted = image.map_pixels(|src, dst| {
            let rgb = apply(&matrix, [src[0].to_unit(), src[1].to_unit(), src[2].to_unit()]);
            for c in 0..3 {
                dst[c] = u16::from_unit(rgb[c]);
            }
            if src.len() == 4 {
                dst[3] = src[3];
            }
        });

        let mut response = upstream.clone();
        response.set_image(Some(converted));
        response.set_image8(None);
        Ok(response)
    }

    fn clone_box(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }
}
