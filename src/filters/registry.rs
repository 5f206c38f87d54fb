//! Filter registry: factories for every filter kind by identifier.

use crate::core::error::{GraphError, GraphResult};
use crate::core::node::{Category, Filter, NodeMetadata};
use crate::execution::cache::CachePolicy;
use crate::filters::builtin::cache::CacheFilter;
use indexmap::IndexMap;
use std::sync::Arc;

/// Factory function for creating filter instances.
pub type FilterFactory = Arc<dyn Fn() -> Box<dyn Filter> + Send + Sync>;

/// Registry entry containing metadata and factory.
#[derive(Clone)]
pub struct RegistryEntry {
    /// Factory function to create instances.
    pub factory: FilterFactory,
    /// Cached metadata (avoids creating an instance just to read it).
    pub metadata: NodeMetadata,
}

/// Registry for all available filter kinds.
///
/// Chains are assembled from kind identifiers (`"crop"`, `"cache"`, ...);
/// the registry turns an identifier into a fresh filter instance.
pub struct FilterRegistry {
    /// Filters indexed by their unique ID.
    filters: IndexMap<String, RegistryEntry>,
    /// Filters grouped by category.
    categories: IndexMap<Category, Vec<String>>,
}

impl FilterRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            filters: IndexMap::new(),
            categories: IndexMap::new(),
        }
    }

    /// Create a registry pre-populated with built-in filters.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::filters::builtin::register_all(&mut registry);
        registry
    }

    /// Make `"cache"` nodes use the given storage policy.
    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.register(move || Box::new(CacheFilter::new(policy)));
        self
    }

    /// Register a filter kind. A kind registered twice keeps the latest factory.
    pub fn register<F>(&mut self, factory: F)
    where
        F: Fn() -> Box<dyn Filter> + Send + Sync + 'static,
    {
        let metadata = factory().metadata();
        let id = metadata.id.clone();
        let category = metadata.category;

        let entry = RegistryEntry {
            factory: Arc::new(factory),
            metadata,
        };

        if self.filters.insert(id.clone(), entry).is_none() {
            self.categories.entry(category).or_default().push(id);
        }
    }

    /// Create a new instance of a filter kind.
    pub fn create(&self, id: &str) -> GraphResult<Box<dyn Filter>> {
        self.filters
            .get(id)
            .map(|e| (e.factory)())
            .ok_or_else(|| GraphError::UnknownKind(id.to_string()))
    }

    /// Get metadata for a filter kind without creating an instance.
    pub fn get_metadata(&self, id: &str) -> Option<&NodeMetadata> {
        self.filters.get(id).map(|e| &e.metadata)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.filters.contains_key(id)
    }

    /// Get all registered kind IDs, in registration order.
    pub fn filter_ids(&self) -> impl Iterator<Item = &str> {
        self.filters.keys().map(|s| s.as_str())
    }

    /// Get kinds by category.
    pub fn filters_by_category(&self, category: Category) -> Vec<&str> {
        self.categories
            .get(&category)
            .map(|ids| ids.iter().map(|s| s.as_str()).collect())
            .unwrap_or_default()
    }

    /// Get all categories.
    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.categories.keys()
    }

    /// Search kinds by id, name or description.
    pub fn search(&self, query: &str) -> Vec<&str> {
        let query = query.to_lowercase();
        self.filters
            .iter()
            .filter(|(_, entry)| {
                entry.metadata.id.to_lowercase().contains(&query)
                    || entry.metadata.name.to_lowercase().contains(&query)
                    || entry.metadata.description.to_lowercase().contains(&query)
            })
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
