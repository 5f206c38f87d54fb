//! The filter chains behind each surface.
//!
//! Every chain is a private tail segment of the graph. View and navigator
//! chains read from the shared source node; the loupe chain is re-wired onto
//! the first cache of whichever view it magnifies.

use crate::config::PipelineConfig;
use crate::core::error::{LucidaResult, NodeId};
use crate::core::types::Value;
use crate::filters::registry::FilterRegistry;
use crate::graph::structure::{GraphNode, ATTR_BOUNDING_BOX};
use crate::graph::FilterGraph;

/// Colour space the development stages work in.
pub const WORKING_COLORSPACE: &str = "prophoto";

/// Create `kinds` as one chain reading from `head` and return their IDs.
fn link(
    graph: &mut FilterGraph,
    registry: &FilterRegistry,
    prefix: &str,
    head: Option<NodeId>,
    kinds: &[(&str, &str)],
) -> LucidaResult<Vec<NodeId>> {
    let mut ids = Vec::with_capacity(kinds.len());
    let mut previous = head;
    for (kind, name) in kinds {
        let node = GraphNode::new(registry.create(kind)?).with_label(format!("{}/{}", prefix, name));
        let id = graph.add_node(node);
        graph.set_previous(id, previous)?;
        previous = Some(id);
        ids.push(id);
    }
    Ok(ids)
}

fn set_colorspaces(graph: &mut FilterGraph, node: NodeId, input: &str, output: &str) -> LucidaResult<()> {
    graph.set_parameter(node, "input-colorspace", Value::String(input.to_string()))?;
    graph.set_parameter(node, "output-colorspace", Value::String(output.to_string()))?;
    Ok(())
}

/// Chain of one canvas view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewChain {
    pub lens: NodeId,
    pub rotate: NodeId,
    pub crop: NodeId,
    /// Full resolution, geometry applied. The loupe reads from here.
    pub cache0: NodeId,
    pub resample: NodeId,
    /// Display scale, before any colour work. Pixel probes read from here.
    pub cache1: NodeId,
    pub transform_input: NodeId,
    pub profile: NodeId,
    pub cache2: NodeId,
    pub denoise: NodeId,
    pub transform_display: NodeId,
    /// Display encoded, before the exposure mask.
    pub cache3: NodeId,
    pub mask: NodeId,
}

impl ViewChain {
    pub fn build(
        graph: &mut FilterGraph,
        registry: &FilterRegistry,
        source: NodeId,
        view: usize,
        config: &PipelineConfig,
    ) -> LucidaResult<Self> {
        let ids = link(
            graph,
            registry,
            &format!("view-{}", view),
            Some(source),
            &[
                ("lens_correction", "lens"),
                ("rotate", "rotate"),
                ("crop", "crop"),
                ("cache", "cache0"),
                ("resample", "resample"),
                ("cache", "cache1"),
                ("colorspace_transform", "transform-input"),
                ("profile_apply", "profile"),
                ("cache", "cache2"),
                ("denoise", "denoise"),
                ("colorspace_transform", "transform-display"),
                ("cache", "cache3"),
                ("exposure_mask", "mask"),
            ],
        )?;
        let chain = Self {
            lens: ids[0],
            rotate: ids[1],
            crop: ids[2],
            cache0: ids[3],
            resample: ids[4],
            cache1: ids[5],
            transform_input: ids[6],
            profile: ids[7],
            cache2: ids[8],
            denoise: ids[9],
            transform_display: ids[10],
            cache3: ids[11],
            mask: ids[12],
        };

        set_colorspaces(graph, chain.transform_input, &config.input_colorspace, WORKING_COLORSPACE)?;
        // empty output: follow the colour space attached to the request
        set_colorspaces(graph, chain.transform_display, WORKING_COLORSPACE, "")?;
        graph.set_parameter(
            chain.cache3,
            "latency",
            Value::Integer(config.display_cache_latency_ms as i64),
        )?;
        graph.set_recursive(chain.end(), ATTR_BOUNDING_BOX, Value::Boolean(true))?;
        graph.listen(chain.end())?;
        Ok(chain)
    }

    pub fn end(&self) -> NodeId {
        self.mask
    }

    pub fn nodes(&self) -> [NodeId; 13] {
        [
            self.lens,
            self.rotate,
            self.crop,
            self.cache0,
            self.resample,
            self.cache1,
            self.transform_input,
            self.profile,
            self.cache2,
            self.denoise,
            self.transform_display,
            self.cache3,
            self.mask,
        ]
    }
}

/// Chain of the magnifier.
///
/// Starts detached; [`LoupeChain::attach`] connects it to a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoupeChain {
    pub transform_input: NodeId,
    pub profile: NodeId,
    pub cache: NodeId,
    pub denoise: NodeId,
    pub transform_display: NodeId,
}

impl LoupeChain {
    pub fn build(graph: &mut FilterGraph, registry: &FilterRegistry, config: &PipelineConfig) -> LucidaResult<Self> {
        let ids = link(
            graph,
            registry,
            "loupe",
            None,
            &[
                ("colorspace_transform", "transform-input"),
                ("profile_apply", "profile"),
                ("cache", "cache"),
                ("denoise", "denoise"),
                ("colorspace_transform", "transform-display"),
            ],
        )?;
        let chain = Self {
            transform_input: ids[0],
            profile: ids[1],
            cache: ids[2],
            denoise: ids[3],
            transform_display: ids[4],
        };
        set_colorspaces(graph, chain.transform_input, &config.input_colorspace, WORKING_COLORSPACE)?;
        set_colorspaces(graph, chain.transform_display, WORKING_COLORSPACE, "")?;
        graph.set_parameter(chain.cache, "ignore-roi", Value::Boolean(true))?;
        graph.listen(chain.end())?;
        Ok(chain)
    }

    pub fn start(&self) -> NodeId {
        self.transform_input
    }

    pub fn end(&self) -> NodeId {
        self.transform_display
    }

    /// Read from `view`'s full resolution cache.
    pub fn attach(&self, graph: &mut FilterGraph, view: &ViewChain) -> LucidaResult<()> {
        graph.set_previous(self.start(), Some(view.cache0))?;
        Ok(())
    }

    pub fn is_attached_to(&self, graph: &FilterGraph, view: &ViewChain) -> bool {
        matches!(graph.upstream(self.start()), Ok(Some(id)) if id == view.cache0)
    }
}

/// Chain of the navigator thumbnail.
///
/// The source is scaled down first, to twice the thumbnail size, so the
/// geometry stages run on a small image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigatorChain {
    pub scale: NodeId,
    pub cache: NodeId,
    pub transform_input: NodeId,
    pub rotate: NodeId,
    pub crop: NodeId,
    pub scale2: NodeId,
    pub cache2: NodeId,
    pub profile: NodeId,
    pub cache3: NodeId,
    pub transform_display: NodeId,
}

impl NavigatorChain {
    pub fn build(
        graph: &mut FilterGraph,
        registry: &FilterRegistry,
        source: NodeId,
        config: &PipelineConfig,
    ) -> LucidaResult<Self> {
        let ids = link(
            graph,
            registry,
            "navigator",
            Some(source),
            &[
                ("resample", "scale"),
                ("cache", "cache"),
                ("colorspace_transform", "transform-input"),
                ("rotate", "rotate"),
                ("crop", "crop"),
                ("resample", "scale2"),
                ("cache", "cache2"),
                ("profile_apply", "profile"),
                ("cache", "cache3"),
                ("colorspace_transform", "transform-display"),
            ],
        )?;
        let chain = Self {
            scale: ids[0],
            cache: ids[1],
            transform_input: ids[2],
            rotate: ids[3],
            crop: ids[4],
            scale2: ids[5],
            cache2: ids[6],
            profile: ids[7],
            cache3: ids[8],
            transform_display: ids[9],
        };

        let size = config.navigator_size;
        graph.set_parameter(chain.scale, ATTR_BOUNDING_BOX, Value::Boolean(true))?;
        graph.set_parameter(chain.scale, "width", Value::Integer(size.width as i64 * 2))?;
        graph.set_parameter(chain.scale, "height", Value::Integer(size.height as i64 * 2))?;
        graph.set_parameter(chain.scale2, ATTR_BOUNDING_BOX, Value::Boolean(true))?;
        graph.set_parameter(chain.scale2, "width", Value::Integer(size.width as i64))?;
        graph.set_parameter(chain.scale2, "height", Value::Integer(size.height as i64))?;
        graph.set_parameter(chain.scale2, "never-quick", Value::Boolean(true))?;
        for cache in [chain.cache, chain.cache2, chain.cache3] {
            graph.set_parameter(cache, "ignore-roi", Value::Boolean(true))?;
        }
        set_colorspaces(graph, chain.transform_input, &config.input_colorspace, WORKING_COLORSPACE)?;
        set_colorspaces(graph, chain.transform_display, WORKING_COLORSPACE, "")?;
        graph.listen(chain.end())?;
        Ok(chain)
    }

    pub fn end(&self) -> NodeId {
        self.transform_display
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TopologyAnalyzer;

    fn source(graph: &mut FilterGraph, registry: &FilterRegistry) -> NodeId {
        graph.add_node(GraphNode::new(registry.create("source").unwrap()).shared())
    }

    #[test]
    fn test_view_chain_wiring() {
        let registry = FilterRegistry::with_builtins();
        let mut graph = FilterGraph::new();
        let head = source(&mut graph, &registry);
        let chain = ViewChain::build(&mut graph, &registry, head, 0, &PipelineConfig::default()).unwrap();

        let upstream = TopologyAnalyzer::new(&graph).upstream_chain(chain.end()).unwrap();
        let mut expected: Vec<NodeId> = chain.nodes().iter().rev().copied().collect();
        expected.push(head);
        assert_eq!(upstream, expected);

        let kinds: Vec<&str> = chain
            .nodes()
            .iter()
            .map(|id| graph.get_node(*id).unwrap().kind())
            .collect();
        assert_eq!(kinds.iter().filter(|k| **k == "cache").count(), 4);
        assert_eq!(graph.get_node(chain.cache3).unwrap().get_parameter("latency"), Some(&Value::Integer(1)));
        assert!(graph.get_node(chain.resample).unwrap().bounding_box());
        // the broadcast stopped at the shared source
        assert!(!graph.get_node(head).unwrap().bounding_box());
        assert!(graph.is_listening(chain.end()));
        assert_eq!(graph.get_node(chain.cache1).unwrap().display_name(), "view-0/cache1");
    }

    #[test]
    fn test_loupe_attaches_to_view() {
        let registry = FilterRegistry::with_builtins();
        let mut graph = FilterGraph::new();
        let head = source(&mut graph, &registry);
        let config = PipelineConfig::default();
        let view0 = ViewChain::build(&mut graph, &registry, head, 0, &config).unwrap();
        let view1 = ViewChain::build(&mut graph, &registry, head, 1, &config).unwrap();
        let loupe = LoupeChain::build(&mut graph, &registry, &config).unwrap();

        assert!(graph.upstream(loupe.start()).unwrap().is_none());
        loupe.attach(&mut graph, &view1).unwrap();
        assert!(loupe.is_attached_to(&graph, &view1));
        assert!(!loupe.is_attached_to(&graph, &view0));
        assert_eq!(
            graph.get_node(loupe.cache).unwrap().get_parameter("ignore-roi"),
            Some(&Value::Boolean(true))
        );
    }

    #[test]
    fn test_navigator_sizes() {
        let registry = FilterRegistry::with_builtins();
        let mut graph = FilterGraph::new();
        let head = source(&mut graph, &registry);
        let navigator = NavigatorChain::build(&mut graph, &registry, head, &PipelineConfig::default()).unwrap();

        let scale = graph.get_node(navigator.scale).unwrap();
        assert_eq!(scale.get_parameter("width"), Some(&Value::Integer(500)));
        let scale2 = graph.get_node(navigator.scale2).unwrap();
        assert_eq!(scale2.get_parameter("height"), Some(&Value::Integer(250)));
        assert_eq!(scale2.get_parameter("never-quick"), Some(&Value::Boolean(true)));
        assert_eq!(graph.upstream(navigator.scale).unwrap(), Some(head));
    }
}
