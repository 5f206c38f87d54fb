//! Contexts passed to filters.
//!
//! [`PipelineContext`] carries the process-wide collaborators (colour
//! management, load cancellation) explicitly instead of through globals.
//! [`FilterContext`] is built by the engine for every filter invocation and
//! gives access to the request, the node's parameters and its upstream.

use crate::core::color::{ColorSpaceRef, ColorSpaceRegistry};
use crate::core::error::NodeId;
use crate::core::geometry::{CropRect, Size};
use crate::core::image::Image16;
use crate::core::types::{ProfileRef, SettingsRef, Value};
use crate::execution::request::{FilterRequest, FilterResponse};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag signalling that the current source load was cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Collaborators shared by every filter of a pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    color_spaces: Arc<ColorSpaceRegistry>,
    cancel: CancelToken,
}

impl PipelineContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_color_spaces(mut self, registry: Arc<ColorSpaceRegistry>) -> Self {
        self.color_spaces = registry;
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn color_spaces(&self) -> &ColorSpaceRegistry {
        &self.color_spaces
    }

    pub fn color_space(&self, id: &str) -> Option<ColorSpaceRef> {
        self.color_spaces.get(id)
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

/// Access to the stage feeding the current filter.
pub trait Upstream {
    /// Evaluate the upstream stage.
    fn get_image(&self, request: &FilterRequest) -> FilterResponse;

    /// Output size of the upstream stage.
    fn get_size(&self, request: &FilterRequest) -> Option<Size>;

    /// Fingerprint of the upstream chain's parameter state.
    fn fingerprint(&self) -> u64;

    /// Request parameters the upstream chain reads.
    fn request_params(&self) -> Vec<&'static str> {
        Vec::new()
    }
}

/// Everything a filter sees during one invocation.
pub struct FilterContext<'a> {
    /// ID of the node being evaluated.
    pub node_id: NodeId,
    request: &'a FilterRequest,
    params: &'a IndexMap<String, Value>,
    bounding_box: bool,
    upstream: Option<&'a dyn Upstream>,
    pipeline: &'a PipelineContext,
}

impl<'a> FilterContext<'a> {
    /// Create a context. `params` must already have schema defaults applied.
    pub fn new(
        node_id: NodeId,
        request: &'a FilterRequest,
        params: &'a IndexMap<String, Value>,
        pipeline: &'a PipelineContext,
    ) -> Self {
        Self {
            node_id,
            request,
            params,
            bounding_box: false,
            upstream: None,
            pipeline,
        }
    }

    pub fn with_upstream(mut self, upstream: Option<&'a dyn Upstream>) -> Self {
        self.upstream = upstream;
        self
    }

    pub fn with_bounding_box(mut self, bounding_box: bool) -> Self {
        self.bounding_box = bounding_box;
        self
    }

    /// Same node and parameters, different request.
    pub fn for_request<'b>(&'b self, request: &'b FilterRequest) -> FilterContext<'b>
    where
        'a: 'b,
    {
        FilterContext {
            node_id: self.node_id,
            request,
            params: self.params,
            bounding_box: self.bounding_box,
            upstream: self.upstream,
            pipeline: self.pipeline,
        }
    }

    pub fn request(&self) -> &FilterRequest {
        self.request
    }

    pub fn pipeline(&self) -> &PipelineContext {
        self.pipeline
    }

    /// Whether the node reports its natural size inside the requested box.
    pub fn bounding_box(&self) -> bool {
        self.bounding_box
    }

    // ========================================================================
    // Parameter Getters
    // ========================================================================

    /// Get a parameter value by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn get_integer(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_integer)
    }

    pub fn get_float(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_float)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_rect(&self, name: &str) -> Option<CropRect> {
        self.get(name).and_then(Value::as_rect)
    }

    pub fn get_color_space(&self, name: &str) -> Option<ColorSpaceRef> {
        self.get(name).and_then(Value::as_color_space).cloned()
    }

    pub fn get_profile(&self, name: &str) -> Option<ProfileRef> {
        self.get(name).and_then(Value::as_profile).cloned()
    }

    pub fn get_settings(&self, name: &str) -> Option<SettingsRef> {
        self.get(name).and_then(Value::as_settings).cloned()
    }

    pub fn get_image(&self, name: &str) -> Option<Image16> {
        self.get(name).and_then(Value::as_image).cloned()
    }

    // ========================================================================
    // Upstream Access
    // ========================================================================

    pub fn has_upstream(&self) -> bool {
        self.upstream.is_some()
    }

    /// Evaluate the upstream stage; empty when there is none.
    pub fn upstream_image(&self, request: &FilterRequest) -> FilterResponse {
        match self.upstream {
            Some(up) => up.get_image(request),
            None => FilterResponse::empty(),
        }
    }

    pub fn upstream_size(&self, request: &FilterRequest) -> Option<Size> {
        self.upstream.and_then(|up| up.get_size(request))
    }

    /// Fingerprint of the upstream chain, 0 when there is none.
    pub fn upstream_fingerprint(&self) -> u64 {
        self.upstream.map(|up| up.fingerprint()).unwrap_or(0)
    }

    /// Request parameters read anywhere upstream.
    pub fn upstream_request_params(&self) -> Vec<&'static str> {
        self.upstream.map(|up| up.request_params()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!clone.is_cancelled());
    }

    #[test]
    fn test_parameter_getters() {
        let mut params = IndexMap::new();
        params.insert("angle".to_string(), Value::Float(12.0));
        params.insert("orientation".to_string(), Value::Integer(2));
        let request = FilterRequest::new();
        let pipeline = PipelineContext::new();
        let ctx = FilterContext::new(NodeId::new(), &request, &params, &pipeline);

        assert_eq!(ctx.get_float("angle"), Some(12.0));
        assert_eq!(ctx.get_float("orientation"), Some(2.0));
        assert_eq!(ctx.get_bool("angle"), None);
        assert!(!ctx.has_upstream());
        assert!(!ctx.upstream_image(&request).has_image());
        assert_eq!(ctx.upstream_fingerprint(), 0);
    }

    #[test]
    fn test_pipeline_context_colorspaces() {
        let ctx = PipelineContext::new();
        assert!(ctx.color_space("srgb").is_some());
        assert!(!ctx.cancel_token().is_cancelled());
    }
}
