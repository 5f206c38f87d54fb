//! Profile application: camera profile base tone plus snapshot development
//! settings (exposure, white balance, saturation, contrast).

use crate::core::context::FilterContext;
use crate::core::error::FilterResult;
use crate::core::image::Sample;
use crate::core::node::{Category, Filter, NodeMetadata, RoiSupport};
use crate::core::param::ParameterDefinition;
use crate::core::types::{DevelopSettings, ParamType, ProfileKind, Value};
use crate::execution::request::FilterResponse;
use crate::filters::registry::FilterRegistry;
use log::warn;

/// Register the profile filter.
pub fn register(registry: &mut FilterRegistry) {
    registry.register(|| Box::new(ProfileApply));
}

/// Mid grey contrast pivots around, in linear light.
const PIVOT: f32 = 0.18;

/// Strength of the camera profile's base tone lift.
const BASE_TONE: f32 = 0.12;

/// Applies a DCP camera profile and the snapshot settings.
///
/// The profile payload is opaque to the pipeline; its presence enables a
/// gentle base tone lift. An ICC profile is the display transform's
/// business and is ignored here.
#[derive(Debug, Clone)]
pub struct ProfileApply;

/// Per-pixel operation resolved from the parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Development {
    gain: [f32; 3],
    saturation: f32,
    contrast: f32,
    base_tone: bool,
}

impl Development {
    fn new(settings: &DevelopSettings, base_tone: bool) -> Self {
        let exposure = 2f32.powf(settings.exposure as f32);
        let warmth = settings.warmth.clamp(-1.0, 1.0) as f32 * 0.2;
        let tint = settings.tint.clamp(-1.0, 1.0) as f32 * 0.2;
        Self {
            gain: [
                exposure * (1.0 + warmth),
                exposure * (1.0 - tint),
                exposure * (1.0 - warmth),
            ],
            saturation: settings.saturation.max(0.0) as f32,
            contrast: settings.contrast.max(0.0) as f32,
            base_tone,
        }
    }

    fn is_noop(&self) -> bool {
        !self.base_tone
            && self.gain.iter().all(|g| (g - 1.0).abs() < 1e-6)
            && (self.saturation - 1.0).abs() < 1e-6
            && (self.contrast - 1.0).abs() < 1e-6
    }

    fn apply(&self, rgb: [f32; 3]) -> [f32; 3] {
        let mut rgb = [rgb[0] * self.gain[0], rgb[1] * self.gain[1], rgb[2] * self.gain[2]];
        if self.base_tone {
            for v in rgb.iter_mut() {
                let x = v.clamp(0.0, 1.0);
                *v = x + BASE_TONE * x * (1.0 - x);
            }
        }
        let luma = 0.2126 * rgb[0] + 0.7152 * rgb[1] + 0.0722 * rgb[2];
        for v in rgb.iter_mut() {
            *v = luma + (*v - luma) * self.saturation;
            *v = PIVOT + (*v - PIVOT) * self.contrast;
        }
        rgb
    }
}

impl Filter for ProfileApply {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder("profile_apply", "Profile")
            .description("Apply the camera profile and snapshot settings")
            .category(Category::Color)
            .parameter(
                ParameterDefinition::new("profile", ParamType::Profile, Value::None)
                    .optional()
                    .with_description("DCP camera profile"),
            )
            .parameter(
                ParameterDefinition::new("use-profile", ParamType::Boolean, Value::Boolean(true))
                    .with_description("Apply the camera profile"),
            )
            .parameter(
                ParameterDefinition::new("settings", ParamType::Settings, Value::None)
                    .optional()
                    .with_description("Development settings of the active snapshot"),
            )
            .roi(RoiSupport::PerPixel)
            .build()
    }

    fn get_image(&self, ctx: &FilterContext<'_>) -> FilterResult<FilterResponse> {
        let upstream = ctx.upstream_image(ctx.request());
        let Some(image) = upstream.image() else {
            return Ok(upstream);
        };

        let use_profile = ctx.get_bool("use-profile").unwrap_or(true);
        let base_tone = match ctx.get_profile("profile") {
            Some(profile) if use_profile && profile.kind == ProfileKind::Dcp => true,
            Some(profile) if use_profile => {
                warn!(
                    "Profile '{}' on {} is not a camera profile, ignoring it",
                    profile.id, ctx.node_id
                );
                false
            }
            _ => false,
        };
        let settings = ctx.get_settings("settings").unwrap_or_default();
        let development = Development::new(&settings, base_tone);
        if development.is_noop() {
            return Ok(upstream);
        }

        let developed = image.map_pixels(|src, dst| {
            let rgb = development.apply([src[0].to_unit(), src[1].to_unit(), src[2].to_unit()]);
            for c in 0..3 {
                dst[c] = u16::from_unit(rgb[c]);
            }
            if src.len() == 4 {
                dst[3] = src[3];
            }
        });

        let mut response = upstream.clone();
        response.set_image(Some(developed));
        response.set_image8(None);
        Ok(response)
    }

    fn clone_box(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Profile;
    use crate::execution::engine::EvaluationEngine;
    use crate::execution::request::FilterRequest;
    use crate::filters::builtin::testing::{fed_chain, flat};
    use crate::graph::FilterGraph;
    use std::sync::Arc;

    fn settings(f: impl FnOnce(&mut DevelopSettings)) -> Value {
        let mut s = DevelopSettings::default();
        f(&mut s);
        Value::Settings(Arc::new(s))
    }

    #[test]
    fn test_defaults_are_pass_through() {
        let mut graph = FilterGraph::new();
        let source = flat(4, 4, 12345);
        let ids = fed_chain(&mut graph, &source, &["profile_apply"]);
        graph
            .set_parameter(ids[1], "settings", Value::Settings(Arc::new(DevelopSettings::default())))
            .unwrap();
        let engine = EvaluationEngine::default();
        let response = engine.get_image(&graph, ids[1], &FilterRequest::new());
        assert!(response.image().unwrap().ptr_eq(&source));
    }

    #[test]
    fn test_exposure_doubles() {
        let mut graph = FilterGraph::new();
        let ids = fed_chain(&mut graph, &flat(4, 4, 10000), &["profile_apply"]);
        graph
            .set_parameter(ids[1], "settings", settings(|s| s.exposure = 1.0))
            .unwrap();
        let engine = EvaluationEngine::default();
        let response = engine.get_image(&graph, ids[1], &FilterRequest::new());
        assert_eq!(response.image().unwrap().pixel(0, 0), &[20000, 20000, 20000]);
    }

    #[test]
    fn test_warmth_shifts_red_and_blue() {
        let development = Development::new(
            &DevelopSettings {
                warmth: 0.5,
                ..DevelopSettings::default()
            },
            false,
        );
        let rgb = development.apply([0.2, 0.2, 0.2]);
        assert!(rgb[0] > rgb[1] && rgb[1] > rgb[2]);
    }

    #[test]
    fn test_zero_saturation_is_grey() {
        let development = Development::new(
            &DevelopSettings {
                saturation: 0.0,
                ..DevelopSettings::default()
            },
            false,
        );
        let rgb = development.apply([0.6, 0.2, 0.1]);
        assert!((rgb[0] - rgb[1]).abs() < 1e-6 && (rgb[1] - rgb[2]).abs() < 1e-6);
    }

    #[test]
    fn test_dcp_lifts_and_icc_is_ignored() {
        let mut graph = FilterGraph::new();
        let ids = fed_chain(&mut graph, &flat(2, 2, 20000), &["profile_apply"]);
        let engine = EvaluationEngine::default();

        let dcp = Arc::new(Profile::new("camera", ProfileKind::Dcp));
        graph.set_parameter(ids[1], "profile", Value::Profile(dcp)).unwrap();
        let lifted = engine.get_image(&graph, ids[1], &FilterRequest::new());
        assert!(lifted.image().unwrap().pixel(0, 0)[0] > 20000);

        graph.set_parameter(ids[1], "use-profile", Value::Boolean(false)).unwrap();
        let plain = engine.get_image(&graph, ids[1], &FilterRequest::new());
        assert_eq!(plain.image().unwrap().pixel(0, 0)[0], 20000);

        let icc = Arc::new(Profile::new("monitor", ProfileKind::Icc));
        graph.set_parameter(ids[1], "use-profile", Value::Boolean(true)).unwrap();
        graph.set_parameter(ids[1], "profile", Value::Profile(icc)).unwrap();
        let ignored = engine.get_image(&graph, ids[1], &FilterRequest::new());
        assert_eq!(ignored.image().unwrap().pixel(0, 0)[0], 20000);
    }
}
