//! Evaluation engine implementation.
//!
//! The engine answers `get_image` for any node of a [`FilterGraph`] by
//! walking upstream recursively. Each filter pulls its input through an
//! [`Upstream`] handle, so a stage decides itself which region and quality it
//! needs from the previous one, and caches can answer without touching their
//! upstream at all.
//!
//! Guarantees made to callers:
//! - A request ROI is clamped to the node's output bounds before the filter
//!   runs; a zero-area intersection yields an empty response.
//! - The returned images cover exactly the clamped ROI (or the full frame).
//! - A failing filter never aborts the request: it is logged and the node
//!   passes its upstream result through.

use crate::core::color::encode_image8;
use crate::core::context::{FilterContext, PipelineContext, Upstream};
use crate::core::error::NodeId;
use crate::core::geometry::{Rect, Size};
use crate::execution::request::{ChangedMask, FilterRequest, FilterResponse, Quality};
use crate::graph::structure::FilterGraph;
use log::{trace, warn};
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::Hasher;
use std::time::{Duration, Instant};

/// Evaluation statistics.
#[derive(Debug, Clone, Default)]
pub struct EvaluationStats {
    /// Number of filter invocations per node.
    pub evaluations: HashMap<NodeId, u64>,
    /// Number of top-level requests served.
    pub requests: u64,
    /// Filters that failed and were passed through.
    pub failures: u64,
    /// Requests whose ROI missed the output bounds.
    pub empty_rois: u64,
    /// Total time spent in top-level requests.
    pub total_duration: Duration,
}

impl EvaluationStats {
    /// Filter invocations of one node.
    pub fn evaluations_of(&self, id: NodeId) -> u64 {
        self.evaluations.get(&id).copied().unwrap_or(0)
    }
}

/// What a node produced the last time it was asked at top level.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OutputSignature {
    size: Option<Size>,
    fingerprint: u64,
    roi: Option<Rect>,
}

/// The evaluation engine.
pub struct EvaluationEngine {
    context: PipelineContext,
    stats: Mutex<EvaluationStats>,
    signatures: Mutex<HashMap<NodeId, OutputSignature>>,
}

impl EvaluationEngine {
    /// Create a new engine sharing the given collaborators.
    pub fn new(context: PipelineContext) -> Self {
        Self {
            context,
            stats: Mutex::new(EvaluationStats::default()),
            signatures: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    /// Evaluate `node` for `request`.
    ///
    /// The response's `changed` mask compares this output with the previous
    /// top-level output of the same node.
    pub fn get_image(&self, graph: &FilterGraph, node: NodeId, request: &FilterRequest) -> FilterResponse {
        let start = Instant::now();
        let mut response = self.evaluate(graph, node, request);

        let frame = self.get_size(graph, node, &request.with_roi(None));
        let mut hasher = DefaultHasher::new();
        hasher.write_u64(graph.fingerprint(node));
        request.hash_into(&mut hasher, false);
        let signature = OutputSignature {
            size: frame,
            fingerprint: hasher.finish(),
            roi: request.roi(),
        };
        response.set_changed(self.record_signature(node, signature));

        let mut stats = self.stats.lock();
        stats.requests += 1;
        stats.total_duration += start.elapsed();
        response
    }

    /// Evaluate `node` and make sure the response carries an 8-bit image.
    ///
    /// When the chain did not produce one, the 16-bit result is encoded with
    /// the request's colour space (sRGB when none is attached).
    pub fn get_image8(&self, graph: &FilterGraph, node: NodeId, request: &FilterRequest) -> FilterResponse {
        let mut response = self.get_image(graph, node, request);
        if response.image8().is_none() {
            let space = request
                .color_space()
                .cloned()
                .or_else(|| self.context.color_space("srgb"));
            let encoded = match (response.image(), space) {
                (Some(image), Some(space)) => Some(encode_image8(image, &space)),
                _ => None,
            };
            if encoded.is_some() {
                response.set_image8(encoded);
            }
        }
        response
    }

    /// Output size of `node` for `request`, `None` when nothing is available.
    pub fn get_size(&self, graph: &FilterGraph, node: NodeId, request: &FilterRequest) -> Option<Size> {
        let graph_node = graph.get_node(node).ok()?;
        let upstream = graph_node.upstream().map(|id| UpstreamHandle {
            engine: self,
            graph,
            id,
        });
        if !graph_node.is_enabled() {
            return upstream.and_then(|up| up.get_size(request));
        }
        let ctx = FilterContext::new(node, request, graph_node.params(), &self.context)
            .with_upstream(upstream.as_ref().map(|u| u as &dyn Upstream))
            .with_bounding_box(graph_node.bounding_box());
        graph_node.filter.get_size(&ctx)
    }

    /// Get a copy of the statistics.
    pub fn stats(&self) -> EvaluationStats {
        self.stats.lock().clone()
    }

    /// Filter invocations of one node since the last reset.
    pub fn evaluation_count(&self, node: NodeId) -> u64 {
        self.stats.lock().evaluations_of(node)
    }

    pub fn reset_stats(&self) {
        *self.stats.lock() = EvaluationStats::default();
    }

    /// Forget the last output of `node`; its next response reports `ALL`.
    pub fn forget(&self, node: NodeId) {
        self.signatures.lock().remove(&node);
    }

    fn record_signature(&self, node: NodeId, signature: OutputSignature) -> ChangedMask {
        let mut signatures = self.signatures.lock();
        let mask = match signatures.get(&node) {
            None => ChangedMask::ALL,
            Some(previous) => {
                let mut mask = ChangedMask::NONE;
                if previous.size != signature.size {
                    mask |= ChangedMask::DIMENSION | ChangedMask::PIXELS;
                }
                if previous.fingerprint != signature.fingerprint {
                    mask |= ChangedMask::PIXELS;
                }
                if previous.roi != signature.roi {
                    mask |= ChangedMask::REGION;
                }
                mask
            }
        };
        signatures.insert(node, signature);
        mask
    }

    /// Recursive evaluation of one node.
    fn evaluate(&self, graph: &FilterGraph, id: NodeId, request: &FilterRequest) -> FilterResponse {
        let node = match graph.get_node(id) {
            Ok(node) => node,
            Err(e) => {
                warn!("{}", e);
                return FilterResponse::empty();
            }
        };
        let upstream = node.upstream().map(|up| UpstreamHandle {
            engine: self,
            graph,
            id: up,
        });
        let upstream_ref = upstream.as_ref().map(|u| u as &dyn Upstream);

        if !node.is_enabled() {
            return upstream_ref
                .map(|up| up.get_image(request))
                .unwrap_or_default();
        }

        let ctx = FilterContext::new(id, request, node.params(), &self.context)
            .with_upstream(upstream_ref)
            .with_bounding_box(node.bounding_box());

        // Clamp the ROI to what this node can produce
        let frame = node.filter.get_size(&ctx.for_request(&request.with_roi(None)));
        let clamped = match (request.roi(), frame) {
            (Some(roi), Some(size)) => match roi.intersect(&size.bounds()) {
                Some(inside) => Some(inside),
                None => {
                    trace!("ROI {} misses {} output {}", roi, node.kind(), size);
                    self.stats.lock().empty_rois += 1;
                    return FilterResponse::empty();
                }
            },
            (roi, _) => roi,
        };
        let request = request.with_roi(clamped);
        let ctx = ctx.for_request(&request);

        {
            let mut stats = self.stats.lock();
            *stats.evaluations.entry(id).or_insert(0) += 1;
        }
        trace!(
            "Evaluating {} ({}) roi={:?} quality={:?}",
            node.display_name(),
            id,
            request.roi(),
            request.quality()
        );

        match node.filter.get_image(&ctx) {
            Ok(response) => normalize(response, clamped, frame),
            Err(e) => {
                warn!("{} ({}) passes through after error: {}", node.display_name(), id, e);
                self.stats.lock().failures += 1;
                upstream_ref
                    .map(|up| up.get_image(&request))
                    .unwrap_or_default()
            }
        }
    }
}

impl Default for EvaluationEngine {
    fn default() -> Self {
        Self::new(PipelineContext::default())
    }
}

/// Trim a filter's response to exactly the requested region.
fn normalize(response: FilterResponse, roi: Option<Rect>, frame: Option<Size>) -> FilterResponse {
    let (Some(roi), true) = (roi, response.has_image()) else {
        return response;
    };
    if response.region() == Some(roi) {
        return response;
    }
    let frame = frame
        .or_else(|| response.image().map(|img| img.size()))
        .or_else(|| response.image8().map(|img| img.size()))
        .unwrap_or_default();
    response.crop_to(roi, frame)
}

/// Upstream access handed to filters: evaluates the previous node.
struct UpstreamHandle<'e> {
    engine: &'e EvaluationEngine,
    graph: &'e FilterGraph,
    id: NodeId,
}

impl Upstream for UpstreamHandle<'_> {
    fn get_image(&self, request: &FilterRequest) -> FilterResponse {
        self.engine.evaluate(self.graph, self.id, request)
    }

    fn get_size(&self, request: &FilterRequest) -> Option<Size> {
        self.engine.get_size(self.graph, self.id, request)
    }

    fn fingerprint(&self) -> u64 {
        self.graph.fingerprint(self.id)
    }

    fn request_params(&self) -> Vec<&'static str> {
        self.graph.request_params(self.id)
    }
}

/// Combine the quality a filter worked at with what it received.
pub fn combine_quality(upstream: Quality, own: Quality) -> Quality {
    upstream.min(own)
}
