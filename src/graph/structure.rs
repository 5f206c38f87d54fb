//! Graph structure and node management.
//!
//! The FilterGraph owns every node of every chain. Chains are formed by each
//! node's single "previous" link, so the graph is a forest of upstream
//! pointers that may share heads (the raw input feeds several chains).
//!
//! All mutation goes through the graph so that it can:
//! - validate parameters against the node's schema
//! - invalidate caches positioned downstream of the change
//! - queue change notifications for the listened chain tails

use crate::core::error::{GraphError, GraphResult, LucidaResult, NodeId, ParameterError};
use crate::core::geometry::Rect;
use crate::core::node::{Filter, NodeMetadata};
use crate::core::types::Value;
use crate::execution::cache::CacheStats;
use crate::execution::request::ChangedMask;
use crate::graph::topology::TopologyAnalyzer;
use indexmap::IndexMap;
use log::debug;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Node attribute accepted by every kind: report natural size inside the
/// requested box.
pub const ATTR_BOUNDING_BOX: &str = "bounding-box";

/// Node attribute accepted by every kind: enable or bypass the node.
pub const ATTR_ENABLED: &str = "enabled";

/// A node instance in the graph.
///
/// Contains the filter implementation, its parameter values and its link to
/// the previous stage.
#[derive(Clone)]
pub struct GraphNode {
    /// Unique identifier
    pub id: NodeId,
    /// The filter implementation
    pub filter: Box<dyn Filter>,
    metadata: NodeMetadata,
    params: IndexMap<String, Value>,
    upstream: Option<NodeId>,
    /// Optional display name override
    pub label: Option<String>,
    enabled: bool,
    bounding_box: bool,
    shared: bool,
}

impl std::fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphNode")
            .field("id", &self.id)
            .field("kind", &self.metadata.id)
            .field("params", &self.params)
            .field("upstream", &self.upstream)
            .field("label", &self.label)
            .field("enabled", &self.enabled)
            .field("bounding_box", &self.bounding_box)
            .field("shared", &self.shared)
            .finish()
    }
}

impl GraphNode {
    /// Create a new graph node with a filter. Parameters start at their
    /// schema defaults.
    pub fn new(filter: Box<dyn Filter>) -> Self {
        let metadata = filter.metadata();
        let params = metadata
            .parameters
            .iter()
            .map(|p| (p.name.clone(), p.default_value.clone()))
            .collect();
        Self {
            id: NodeId::new(),
            filter,
            metadata,
            params,
            upstream: None,
            label: None,
            enabled: true,
            bounding_box: false,
            shared: false,
        }
    }

    /// Create with a specific ID.
    pub fn with_id(mut self, id: NodeId) -> Self {
        self.id = id;
        self
    }

    /// Set the display label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Mark as shared between chains; recursive broadcasts stop here.
    pub fn shared(mut self) -> Self {
        self.shared = true;
        self
    }

    /// Kind identifier of the filter (e.g. `"crop"`).
    pub fn kind(&self) -> &str {
        &self.metadata.id
    }

    pub fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    /// Get the display name (label or filter name).
    pub fn display_name(&self) -> String {
        self.label.clone().unwrap_or_else(|| self.metadata.name.clone())
    }

    /// Get a parameter value.
    pub fn get_parameter(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// All parameter values, defaults included.
    pub fn params(&self) -> &IndexMap<String, Value> {
        &self.params
    }

    /// The previous stage, `None` for a chain head.
    pub fn upstream(&self) -> Option<NodeId> {
        self.upstream
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn bounding_box(&self) -> bool {
        self.bounding_box
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// Whether `name` is a schema parameter or a node attribute.
    pub fn accepts(&self, name: &str) -> bool {
        name == ATTR_BOUNDING_BOX || name == ATTR_ENABLED || self.metadata.get_parameter(name).is_some()
    }

    fn hash_into<H: Hasher>(&self, hasher: &mut H) {
        self.id.hash(hasher);
        self.metadata.id.hash(hasher);
        self.enabled.hash(hasher);
        self.bounding_box.hash(hasher);
        let mut names: Vec<&String> = self.params.keys().collect();
        names.sort();
        for name in names {
            name.hash(hasher);
            if let Some(value) = self.params.get(name) {
                value.hash_into(hasher);
            }
        }
    }
}

/// A change queued for a listened chain tail.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeNotification {
    /// The listened tail whose output changed.
    pub tail: NodeId,
    /// Which aspects changed.
    pub mask: ChangedMask,
    /// Affected area in the tail's output space; `None` means everything.
    pub region: Option<Rect>,
}

impl ChangeNotification {
    fn merge(&mut self, mask: ChangedMask, region: Option<Rect>) {
        self.mask |= mask;
        self.region = match (self.region, region) {
            (Some(a), Some(b)) => Some(a.union(&b)),
            _ => None,
        };
    }
}

/// Counts describing the graph.
#[derive(Debug, Clone, Default)]
pub struct GraphStats {
    pub nodes: usize,
    pub chains: usize,
    pub listeners: usize,
    pub pending_notifications: usize,
}

/// The filter graph.
#[derive(Default)]
pub struct FilterGraph {
    nodes: IndexMap<NodeId, GraphNode>,
    listeners: Vec<NodeId>,
    notifications: Vec<ChangeNotification>,
}

impl FilterGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Node Management
    // ========================================================================

    /// Add a node to the graph.
    pub fn add_node(&mut self, node: GraphNode) -> NodeId {
        let id = node.id;
        self.nodes.insert(id, node);
        id
    }

    /// Add a filter as a new node.
    pub fn add_filter(&mut self, filter: Box<dyn Filter>) -> NodeId {
        self.add_node(GraphNode::new(filter))
    }

    /// Remove a node. Fails while another node still reads from it.
    pub fn remove_node(&mut self, id: NodeId) -> GraphResult<GraphNode> {
        if !self.nodes.contains_key(&id) {
            return Err(GraphError::NodeNotFound(id));
        }
        let dependents = self.nodes.values().filter(|n| n.upstream == Some(id)).count();
        if dependents > 0 {
            return Err(GraphError::NodeInUse { node: id, dependents });
        }
        self.listeners.retain(|l| *l != id);
        self.notifications.retain(|n| n.tail != id);
        self.nodes
            .shift_remove(&id)
            .ok_or(GraphError::NodeNotFound(id))
    }

    /// Get a node by ID.
    pub fn get_node(&self, id: NodeId) -> GraphResult<&GraphNode> {
        self.nodes.get(&id).ok_or(GraphError::NodeNotFound(id))
    }

    fn get_node_mut(&mut self, id: NodeId) -> GraphResult<&mut GraphNode> {
        self.nodes.get_mut(&id).ok_or(GraphError::NodeNotFound(id))
    }

    /// Check if a node exists.
    pub fn has_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Get all nodes.
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    /// Get all node IDs.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Get the number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The previous stage of `id`.
    pub fn upstream(&self, id: NodeId) -> GraphResult<Option<NodeId>> {
        Ok(self.get_node(id)?.upstream)
    }

    pub fn set_label(&mut self, id: NodeId, label: impl Into<String>) -> GraphResult<()> {
        self.get_node_mut(id)?.label = Some(label.into());
        Ok(())
    }

    pub fn set_shared(&mut self, id: NodeId, shared: bool) -> GraphResult<()> {
        self.get_node_mut(id)?.shared = shared;
        Ok(())
    }

    // ========================================================================
    // Re-wiring
    // ========================================================================

    /// Swap the input of `id`.
    ///
    /// Every cache downstream of `id` (itself included) is invalidated and
    /// listened tails reading through it are notified. Chains that do not
    /// pass through `id` are untouched.
    pub fn set_previous(&mut self, id: NodeId, previous: Option<NodeId>) -> GraphResult<()> {
        if let Some(prev) = previous {
            self.get_node(prev)?;
            if TopologyAnalyzer::new(self).would_cycle(id, prev) {
                return Err(GraphError::CycleDetected { node: id, upstream: prev });
            }
        }
        let node = self.get_node_mut(id)?;
        if node.upstream == previous {
            return Ok(());
        }
        node.upstream = previous;
        debug!(
            "Re-wired {} onto {}",
            id,
            previous.map(|p| p.to_string()).unwrap_or_else(|| "nothing".into())
        );
        self.propagate(id, ChangedMask::DIMENSION | ChangedMask::PIXELS, None);
        Ok(())
    }

    // ========================================================================
    // Parameters
    // ========================================================================

    /// Set one parameter (or node attribute) on one node.
    ///
    /// The value is checked against the node's schema. Setting a value equal
    /// to the current one is a no-op and emits no notification.
    pub fn set_parameter(&mut self, id: NodeId, name: &str, value: Value) -> LucidaResult<()> {
        let node = self.get_node(id)?;
        match name {
            ATTR_ENABLED => {
                let enabled = attribute_bool(name, &value)?;
                self.set_enabled(id, enabled)?;
            }
            ATTR_BOUNDING_BOX => {
                let bounding_box = attribute_bool(name, &value)?;
                if node.bounding_box != bounding_box {
                    self.get_node_mut(id)?.bounding_box = bounding_box;
                    self.propagate(id, ChangedMask::DIMENSION | ChangedMask::PIXELS, None);
                }
            }
            _ => {
                let def = node.metadata.get_parameter(name).ok_or_else(|| ParameterError::Unknown {
                    kind: node.metadata.id.clone(),
                    name: name.to_string(),
                })?;
                def.validate(&value)?;
                let value = def.coerce(value);
                let affects = def.affects;
                if node.params.get(name) == Some(&value) {
                    return Ok(());
                }
                self.get_node_mut(id)?.params.insert(name.to_string(), value);
                self.propagate(id, affects, None);
            }
        }
        Ok(())
    }

    /// Set a parameter on `id` and every node upstream of it.
    ///
    /// The walk stops at (does not enter) nodes marked shared, other than
    /// `id` itself. Nodes whose schema lacks `name` are skipped. The value is
    /// validated against every accepting node before any is changed.
    /// Returns the number of accepting nodes.
    pub fn set_recursive(&mut self, id: NodeId, name: &str, value: Value) -> LucidaResult<usize> {
        let mut targets = Vec::new();
        for node_id in TopologyAnalyzer::new(self).upstream_chain(id)? {
            let node = self.get_node(node_id)?;
            if node.shared && node_id != id {
                break;
            }
            if !node.accepts(name) {
                continue;
            }
            if let Some(def) = node.metadata.get_parameter(name) {
                def.validate(&value)?;
            } else {
                attribute_bool(name, &value)?;
            }
            targets.push(node_id);
        }

        for &target in &targets {
            self.set_parameter(target, name, value.clone())?;
        }
        Ok(targets.len())
    }

    /// Enable or bypass a node.
    pub fn set_enabled(&mut self, id: NodeId, enabled: bool) -> GraphResult<()> {
        let node = self.get_node_mut(id)?;
        if node.enabled != enabled {
            node.enabled = enabled;
            self.propagate(id, ChangedMask::DIMENSION | ChangedMask::PIXELS, None);
        }
        Ok(())
    }

    /// Report an externally caused change of `id`'s output.
    pub fn mark_changed(&mut self, id: NodeId, mask: ChangedMask) -> GraphResult<()> {
        self.get_node(id)?;
        self.propagate(id, mask, None);
        Ok(())
    }

    /// Report that only `region` of `id`'s output changed.
    pub fn mark_region_changed(&mut self, id: NodeId, region: Rect) -> GraphResult<()> {
        self.get_node(id)?;
        self.propagate(id, ChangedMask::REGION, Some(region));
        Ok(())
    }

    // ========================================================================
    // Fingerprints
    // ========================================================================

    /// Hash of the full parameter state of `id` and everything upstream.
    ///
    /// Any parameter, attribute or wiring change on the chain changes the
    /// fingerprint.
    pub fn fingerprint(&self, id: NodeId) -> u64 {
        let mut hasher = DefaultHasher::new();
        let mut current = Some(id);
        let mut steps = 0;
        while let Some(node_id) = current {
            let Some(node) = self.nodes.get(&node_id) else {
                break;
            };
            node.hash_into(&mut hasher);
            current = node.upstream;
            steps += 1;
            if steps > self.nodes.len() {
                break;
            }
        }
        hasher.finish()
    }

    /// Request parameters read by `id` or any enabled stage above it.
    pub fn request_params(&self, id: NodeId) -> Vec<&'static str> {
        let mut names = Vec::new();
        let mut current = Some(id);
        let mut steps = 0;
        while let Some(node_id) = current {
            let Some(node) = self.nodes.get(&node_id) else {
                break;
            };
            if node.enabled {
                for name in node.filter.request_params(&node.params) {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
            current = node.upstream;
            steps += 1;
            if steps > self.nodes.len() {
                break;
            }
        }
        names
    }

    // ========================================================================
    // Change Notifications
    // ========================================================================

    /// Queue notifications for changes reaching `tail`.
    pub fn listen(&mut self, tail: NodeId) -> GraphResult<()> {
        self.get_node(tail)?;
        if !self.listeners.contains(&tail) {
            self.listeners.push(tail);
        }
        Ok(())
    }

    pub fn unlisten(&mut self, tail: NodeId) {
        self.listeners.retain(|l| *l != tail);
        self.notifications.retain(|n| n.tail != tail);
    }

    pub fn is_listening(&self, tail: NodeId) -> bool {
        self.listeners.contains(&tail)
    }

    /// Drain the queued notifications, at most one per tail.
    pub fn take_notifications(&mut self) -> Vec<ChangeNotification> {
        std::mem::take(&mut self.notifications)
    }

    pub fn has_notifications(&self) -> bool {
        !self.notifications.is_empty()
    }

    /// Invalidate caches downstream of `origin` and notify listened tails.
    fn propagate(&mut self, origin: NodeId, mask: ChangedMask, region: Option<Rect>) {
        if mask.is_empty() {
            return;
        }

        // origin first, then breadth-first towards the tails
        let mut affected = vec![origin];
        affected.extend(TopologyAnalyzer::new(self).downstream_of(origin));

        let mut regions: IndexMap<NodeId, Option<Rect>> = IndexMap::new();
        regions.insert(origin, region);
        for &node_id in &affected {
            let Some(node) = self.nodes.get(&node_id) else {
                continue;
            };
            node.filter.invalidate(mask);

            if node_id != origin {
                let input_region = node
                    .upstream
                    .and_then(|up| regions.get(&up).copied())
                    .flatten();
                let output_region = match input_region {
                    Some(r) if node.enabled => node.filter.map_region(&node.params, r),
                    other => other,
                };
                regions.insert(node_id, output_region);
            }

            if self.listeners.contains(&node_id) {
                let region = regions.get(&node_id).copied().flatten();
                match self.notifications.iter_mut().find(|n| n.tail == node_id) {
                    Some(pending) => pending.merge(mask, region),
                    None => self.notifications.push(ChangeNotification {
                        tail: node_id,
                        mask,
                        region,
                    }),
                }
            }
        }
        debug!("Change {:?} at {} reached {} node(s)", mask, origin, affected.len());
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Cache statistics of every memoizing node.
    pub fn cache_stats(&self) -> Vec<(NodeId, String, CacheStats)> {
        self.nodes
            .values()
            .filter_map(|n| n.filter.cache_stats().map(|s| (n.id, n.display_name(), s)))
            .collect()
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            nodes: self.nodes.len(),
            chains: TopologyAnalyzer::new(self).tails().len(),
            listeners: self.listeners.len(),
            pending_notifications: self.notifications.len(),
        }
    }

    /// Clear the graph.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.listeners.clear();
        self.notifications.clear();
    }
}

fn attribute_bool(name: &str, value: &Value) -> Result<bool, ParameterError> {
    value.as_bool().ok_or_else(|| ParameterError::TypeMismatch {
        name: name.to_string(),
        expected: crate::core::types::ParamType::Boolean,
        got: value.get_type(),
    })
}
