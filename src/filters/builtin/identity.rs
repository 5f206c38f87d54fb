//! Pass-through stage.

use crate::core::context::FilterContext;
use crate::core::error::FilterResult;
use crate::core::node::{Category, Filter, NodeMetadata};
use crate::execution::request::FilterResponse;
use crate::filters::registry::FilterRegistry;

/// Register the identity filter.
pub fn register(registry: &mut FilterRegistry) {
    registry.register(|| Box::new(IdentityFilter));
}

/// Forwards its upstream unchanged.
#[derive(Debug, Clone)]
pub struct IdentityFilter;

impl Filter for IdentityFilter {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder("identity", "Identity")
            .description("Pass the upstream image through unchanged")
            .category(Category::Utility)
            .build()
    }

    fn get_image(&self, ctx: &FilterContext<'_>) -> FilterResult<FilterResponse> {
        Ok(ctx.upstream_image(ctx.request()))
    }

    fn clone_box(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::Rect;
    use crate::execution::engine::EvaluationEngine;
    use crate::execution::request::FilterRequest;
    use crate::filters::builtin::testing::{fed_chain, gradient};
    use crate::graph::FilterGraph;

    #[test]
    fn test_identity_forwards_roi() {
        let mut graph = FilterGraph::new();
        let source = gradient(40, 30);
        let ids = fed_chain(&mut graph, &source, &["identity", "identity"]);

        let engine = EvaluationEngine::default();
        let request = FilterRequest::new().with_roi(Some(Rect::new(5, 6, 10, 10)));
        let response = engine.get_image(&graph, ids[2], &request);
        let image = response.image().unwrap();
        assert_eq!(image.width(), 10);
        assert_eq!(image.pixel(0, 0), source.pixel(5, 6));
    }
}
