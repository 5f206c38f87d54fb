//! Pipeline configuration.
//!
//! Every field has a default, so an empty document is a valid
//! configuration. Out-of-range values are clamped rather than rejected;
//! only unreadable or unparsable TOML is an error.

use crate::core::error::ConfigError;
use crate::core::geometry::Size;
use crate::execution::cache::CachePolicy;
use crate::render::layout::SplitDirection;
use log::warn;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Most views shown side by side.
pub const MAX_VIEWS: usize = 2;

/// Configuration of a [`PreviewPipeline`](crate::render::PreviewPipeline).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of views on the canvas, 1 or 2.
    pub views: usize,
    /// How the canvas is divided when more than one view is shown.
    pub split: SplitDirection,
    /// Gap between two views, in canvas pixels.
    pub splitter_width: u32,
    /// Margin around each view in zoom-to-fit mode.
    pub padding: u32,
    /// Colour space of the monitor.
    pub display_colorspace: String,
    /// Colour space used while the exposure mask is shown.
    pub exposure_colorspace: String,
    /// Colour space of the decoded source samples.
    pub input_colorspace: String,
    /// Eviction policy of every cache node.
    pub cache_policy: CachePolicy,
    /// Latency budget of the last cache of each view chain.
    pub display_cache_latency_ms: u64,
    /// Edge length of the square loupe.
    pub loupe_size: u32,
    /// Bounding box of the navigator thumbnail.
    pub navigator_size: Size,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            views: 1,
            split: SplitDirection::Vertical,
            splitter_width: 4,
            padding: 8,
            display_colorspace: "srgb".to_string(),
            exposure_colorspace: "srgb".to_string(),
            input_colorspace: "prophoto".to_string(),
            cache_policy: CachePolicy::SingleSlot,
            display_cache_latency_ms: 1,
            loupe_size: 200,
            navigator_size: Size::new(250, 250),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(contents)?;
        Ok(config.sanitize())
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn with_views(mut self, views: usize) -> Self {
        self.views = views;
        self.sanitize()
    }

    pub fn with_split(mut self, split: SplitDirection) -> Self {
        self.split = split;
        self
    }

    pub fn with_display_colorspace(mut self, id: impl Into<String>) -> Self {
        self.display_colorspace = id.into();
        self
    }

    pub fn with_input_colorspace(mut self, id: impl Into<String>) -> Self {
        self.input_colorspace = id.into();
        self
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self.sanitize()
    }

    pub fn with_loupe_size(mut self, size: u32) -> Self {
        self.loupe_size = size;
        self.sanitize()
    }

    pub fn with_navigator_size(mut self, size: Size) -> Self {
        self.navigator_size = size;
        self.sanitize()
    }

    /// Clamp every field into its usable range.
    pub fn sanitize(mut self) -> Self {
        let views = self.views.clamp(1, MAX_VIEWS);
        if views != self.views {
            warn!("views = {} out of range, using {}", self.views, views);
            self.views = views;
        }
        if let CachePolicy::Lru { capacity } = self.cache_policy {
            if capacity == 0 {
                warn!("LRU cache capacity 0, using 1");
                self.cache_policy = CachePolicy::Lru { capacity: 1 };
            }
        }
        self.loupe_size = self.loupe_size.max(1);
        self.navigator_size = Size::new(self.navigator_size.width.max(1), self.navigator_size.height.max(1));
        self
    }
}
