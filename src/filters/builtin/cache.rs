//! Cache stage: memoizes the output of everything upstream of it.
//!
//! The key is a fingerprint of the upstream chain's parameter state and the
//! request shape (size hint, ROI, colour space), paired with the quality the
//! entry was rendered at. Caches are emptied whenever the graph reports a
//! change upstream, and never store a response without an image.

use crate::core::context::FilterContext;
use crate::core::error::FilterResult;
use crate::core::node::{Category, Filter, NodeMetadata, RoiSupport};
use crate::core::param::{Constraint, ParameterDefinition};
use crate::core::types::{ParamType, Value};
use crate::execution::cache::{CacheKey, CachePolicy, CacheStats, ResultCache};
use crate::execution::request::{ChangedMask, FilterResponse, Quality};
use crate::filters::registry::FilterRegistry;
use log::debug;
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::time::{Duration, Instant};

/// Register the cache filter with the default single-slot policy.
pub fn register(registry: &mut FilterRegistry) {
    registry.register(|| Box::new(CacheFilter::default()));
}

/// Memoizing stage.
///
/// Parameters:
/// - `ignore-roi`: always render the full frame upstream and serve any ROI
///   from it.
/// - `latency`: millisecond budget. A quick request is answered at full
///   quality when the last full computation here fit within the budget, so
///   cheap stages deep in a chain do not go through quick-then-full
///   refinement at all.
pub struct CacheFilter {
    cache: ResultCache,
}

impl CacheFilter {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            cache: ResultCache::new(policy),
        }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    fn effective_quality(&self, requested: Quality, latency_ms: i64) -> Quality {
        if requested == Quality::Quick && latency_ms > 0 {
            if let Some(last) = self.cache.last_full_time() {
                if last <= Duration::from_millis(latency_ms as u64) {
                    return Quality::Full;
                }
            }
        }
        requested
    }
}

impl Default for CacheFilter {
    fn default() -> Self {
        Self::new(CachePolicy::SingleSlot)
    }
}

impl Filter for CacheFilter {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder("cache", "Cache")
            .description("Memoize the upstream result")
            .category(Category::Cache)
            .parameter(
                ParameterDefinition::new("ignore-roi", ParamType::Boolean, Value::Boolean(false))
                    .with_description("Always render and keep the full frame")
                    .affects(ChangedMask::NONE),
            )
            .parameter(
                ParameterDefinition::new("latency", ParamType::Integer, Value::Integer(0))
                    .with_description("Budget in ms under which quick requests are served at full quality")
                    .with_constraint(Constraint::NonNegative)
                    .affects(ChangedMask::NONE),
            )
            .roi(RoiSupport::PerPixel)
            .build()
    }

    fn get_image(&self, ctx: &FilterContext<'_>) -> FilterResult<FilterResponse> {
        let request = ctx.request();
        let ignore_roi = ctx.get_bool("ignore-roi").unwrap_or(false);
        let quality = self.effective_quality(request.quality(), ctx.get_integer("latency").unwrap_or(0));

        let roi = if ignore_roi { None } else { request.roi() };
        let upstream_request = request.with_roi(roi).with_quality(quality);

        // only what the chain above reads may split entries
        let consumed = ctx.upstream_request_params();
        let mut hasher = DefaultHasher::new();
        hasher.write_u64(ctx.upstream_fingerprint());
        upstream_request.hash_selected_into(&mut hasher, true, |key| {
            consumed.iter().any(|name| *name == key)
        });
        let fingerprint = hasher.finish();

        if let Some(hit) = self.cache.get(fingerprint, quality) {
            debug!("Cache {} hit {:016x} ({:?})", ctx.node_id, fingerprint, hit.quality());
            return Ok(hit);
        }

        let start = Instant::now();
        let response = ctx.upstream_image(&upstream_request);
        let elapsed = start.elapsed();
        // The chain may have degraded below what was asked for
        let key = CacheKey::new(fingerprint, response.quality().min(quality));
        if self.cache.put(key, response.clone(), elapsed) {
            debug!(
                "Cache {} stored {:016x} ({:?}, {:?})",
                ctx.node_id, fingerprint, key.quality, elapsed
            );
        }
        Ok(response)
    }

    fn invalidate(&self, mask: ChangedMask) {
        if mask.is_empty() {
            return;
        }
        let dropped = self.cache.invalidate();
        if dropped > 0 {
            debug!("Cache invalidated ({:?}), dropped {}", mask, dropped);
        }
    }

    fn cache_stats(&self) -> Option<CacheStats> {
        Some(self.cache.stats())
    }

    fn clone_box(&self) -> Box<dyn Filter> {
        Box::new(CacheFilter::new(self.cache.policy()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::NodeId;
    use crate::core::geometry::{CropRect, Rect, Size};
    use crate::execution::engine::EvaluationEngine;
    use crate::execution::request::{FilterRequest, PARAM_COLORSPACE};
    use crate::filters::builtin::testing::{fed_chain, flat, gradient};
    use crate::filters::registry::FilterRegistry;
    use crate::graph::FilterGraph;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn quick() -> FilterRequest {
        let mut request = FilterRequest::new();
        request.set_quick(true);
        request
    }

    fn stats(graph: &FilterGraph, id: NodeId) -> CacheStats {
        graph.get_node(id).unwrap().filter.cache_stats().unwrap()
    }

    #[test]
    fn test_second_call_is_served_from_cache() {
        init();
        let mut graph = FilterGraph::new();
        let source = gradient(200, 150);
        let ids = fed_chain(&mut graph, &source, &["crop", "cache"]);
        graph
            .set_parameter(ids[1], "rectangle", Value::Rect(CropRect::new(10, 10, 110, 110)))
            .unwrap();

        let engine = EvaluationEngine::default();
        let request = FilterRequest::new().with_roi(Some(Rect::new(0, 0, 50, 50)));
        let first = engine.get_image(&graph, ids[2], &request);
        let second = engine.get_image(&graph, ids[2], &request);

        assert_eq!(engine.evaluation_count(ids[1]), 1);
        assert_eq!(first.image().unwrap().to_packed(), second.image().unwrap().to_packed());
        assert_eq!(second.image().unwrap().pixel(0, 0), source.pixel(10, 10));
        let s = stats(&graph, ids[2]);
        assert_eq!((s.hits, s.misses), (1, 1));
    }

    #[test]
    fn test_unread_request_params_keep_hits() {
        let engine = EvaluationEngine::default();
        let srgb = engine.context().color_space("srgb").unwrap();
        let linear = engine.context().color_space("linear").unwrap();
        let display = |space| FilterRequest::new().with_param(PARAM_COLORSPACE, Value::ColorSpace(space));

        let mut graph = FilterGraph::new();
        let ids = fed_chain(&mut graph, &gradient(40, 30), &["crop", "cache"]);
        engine.get_image(&graph, ids[2], &display(srgb.clone()));
        engine.get_image(&graph, ids[2], &display(linear.clone()));
        // nothing above the cache reads the display colour space
        assert_eq!(engine.evaluation_count(ids[1]), 1);
        assert_eq!(stats(&graph, ids[2]).hits, 1);

        let mut graph = FilterGraph::new();
        let ids = fed_chain(&mut graph, &flat(8, 8, 30000), &["colorspace_transform", "cache"]);
        graph
            .set_parameter(ids[1], "input-colorspace", Value::String("prophoto".into()))
            .unwrap();
        assert_eq!(graph.request_params(ids[2]), vec![PARAM_COLORSPACE]);
        engine.get_image(&graph, ids[2], &display(srgb));
        engine.get_image(&graph, ids[2], &display(linear));
        assert_eq!(engine.evaluation_count(ids[1]), 2);
        assert_eq!(stats(&graph, ids[2]).hits, 0);
    }

    #[test]
    fn test_parameter_change_is_never_stale() {
        let mut graph = FilterGraph::new();
        let ids = fed_chain(&mut graph, &gradient(50, 50), &["crop", "cache"]);
        let engine = EvaluationEngine::default();

        let before = engine.get_image(&graph, ids[2], &FilterRequest::new());
        graph
            .set_parameter(ids[1], "rectangle", Value::Rect(CropRect::new(5, 5, 25, 25)))
            .unwrap();
        let after = engine.get_image(&graph, ids[2], &FilterRequest::new());

        assert_eq!(before.image().unwrap().size(), Size::new(50, 50));
        assert_eq!(after.image().unwrap().size(), Size::new(20, 20));
        assert_eq!(engine.evaluation_count(ids[1]), 2);
    }

    #[test]
    fn test_empty_result_is_not_memoized() {
        let mut graph = FilterGraph::new();
        let registry = FilterRegistry::with_builtins();
        let source = graph.add_filter(registry.create("source").unwrap());
        let cache = graph.add_filter(registry.create("cache").unwrap());
        graph.set_previous(cache, Some(source)).unwrap();

        let engine = EvaluationEngine::default();
        assert!(!engine.get_image(&graph, cache, &FilterRequest::new()).has_image());
        assert!(!engine.get_image(&graph, cache, &FilterRequest::new()).has_image());
        // both calls reached the source
        assert_eq!(engine.evaluation_count(source), 2);
        assert_eq!(stats(&graph, cache).misses, 2);
    }

    #[test]
    fn test_ignore_roi_serves_any_region() {
        let mut graph = FilterGraph::new();
        let source = gradient(64, 64);
        let ids = fed_chain(&mut graph, &source, &["identity", "cache"]);
        graph.set_parameter(ids[2], "ignore-roi", Value::Boolean(true)).unwrap();

        let engine = EvaluationEngine::default();
        let a = engine.get_image(&graph, ids[2], &FilterRequest::new().with_roi(Some(Rect::new(0, 0, 8, 8))));
        let b = engine.get_image(&graph, ids[2], &FilterRequest::new().with_roi(Some(Rect::new(30, 40, 8, 8))));

        assert_eq!(engine.evaluation_count(ids[1]), 1);
        assert_eq!(a.image().unwrap().pixel(0, 0), source.pixel(0, 0));
        assert_eq!(b.image().unwrap().pixel(0, 0), source.pixel(30, 40));
        assert_eq!(b.region(), Some(Rect::new(30, 40, 8, 8)));
    }

    #[test]
    fn test_ignore_roi_still_sees_pixel_changes() {
        let mut graph = FilterGraph::new();
        let ids = fed_chain(&mut graph, &flat(16, 16, 10), &["cache"]);
        graph.set_parameter(ids[1], "ignore-roi", Value::Boolean(true)).unwrap();
        let engine = EvaluationEngine::default();
        let request = FilterRequest::new().with_roi(Some(Rect::new(0, 0, 4, 4)));

        assert_eq!(engine.get_image(&graph, ids[1], &request).image().unwrap().pixel(0, 0)[0], 10);
        graph.set_parameter(ids[0], "image", Value::Image(flat(16, 16, 20))).unwrap();
        let response = engine.get_image(&graph, ids[1], &request);
        assert_eq!(response.image().unwrap().pixel(0, 0)[0], 20);
        assert!(response.changed().contains(ChangedMask::PIXELS));
    }

    #[test]
    fn test_quick_entry_never_answers_full_request() {
        let mut graph = FilterGraph::new();
        let ids = fed_chain(&mut graph, &gradient(64, 64), &["resample", "cache"]);
        graph.set_parameter(ids[1], "width", Value::Integer(32)).unwrap();
        graph.set_parameter(ids[1], "height", Value::Integer(32)).unwrap();
        let engine = EvaluationEngine::default();

        assert!(engine.get_image(&graph, ids[2], &quick()).is_quick());
        let full = engine.get_image(&graph, ids[2], &FilterRequest::new());
        assert!(!full.is_quick());
        assert_eq!(engine.evaluation_count(ids[1]), 2);

        // and a later quick request is happy with the full entry
        assert!(!engine.get_image(&graph, ids[2], &quick()).is_quick());
        assert_eq!(engine.evaluation_count(ids[1]), 2);
    }

    #[test]
    fn test_latency_upgrades_quick_requests() {
        let mut graph = FilterGraph::new();
        let ids = fed_chain(&mut graph, &gradient(32, 32), &["resample", "cache"]);
        graph.set_parameter(ids[1], "width", Value::Integer(16)).unwrap();
        graph.set_parameter(ids[1], "height", Value::Integer(16)).unwrap();
        graph.set_parameter(ids[2], "latency", Value::Integer(60_000)).unwrap();
        let engine = EvaluationEngine::default();

        // nothing measured yet: quick stays quick
        assert!(engine.get_image(&graph, ids[2], &quick()).is_quick());
        engine.get_image(&graph, ids[2], &FilterRequest::new());

        graph.set_parameter(ids[1], "width", Value::Integer(8)).unwrap();
        let upgraded = engine.get_image(&graph, ids[2], &quick());
        assert!(!upgraded.is_quick());
    }

    #[test]
    fn test_lru_policy_keeps_several_shapes() {
        let registry = FilterRegistry::with_builtins().with_cache_policy(CachePolicy::Lru { capacity: 4 });
        let mut graph = FilterGraph::new();
        let source = graph.add_filter(registry.create("source").unwrap());
        let identity = graph.add_filter(registry.create("identity").unwrap());
        let cache = graph.add_filter(registry.create("cache").unwrap());
        graph.set_previous(identity, Some(source)).unwrap();
        graph.set_previous(cache, Some(identity)).unwrap();
        graph.set_parameter(source, "image", Value::Image(gradient(32, 32))).unwrap();

        let engine = EvaluationEngine::default();
        let a = FilterRequest::new().with_roi(Some(Rect::new(0, 0, 4, 4)));
        let b = FilterRequest::new().with_roi(Some(Rect::new(8, 8, 4, 4)));
        for request in [&a, &b, &a, &b] {
            engine.get_image(&graph, cache, request);
        }
        assert_eq!(engine.evaluation_count(identity), 2);
    }

    #[test]
    fn test_clone_starts_empty() {
        let filter = CacheFilter::new(CachePolicy::SingleSlot);
        filter.cache().put(
            CacheKey::new(1, Quality::Full),
            FilterResponse::from_image(flat(2, 2, 1)),
            Duration::ZERO,
        );
        assert_eq!(filter.cache().len(), 1);
        let clone = filter.clone_box();
        assert_eq!(clone.cache_stats().unwrap().hits, 0);
        assert_eq!(clone.metadata().id, "cache");
    }
}
