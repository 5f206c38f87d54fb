//! Built-in filter implementations.
//!
//! This module contains the stages preview chains are assembled from.

pub mod cache;
pub mod colorspace;
pub mod crop;
pub mod denoise;
pub mod exposure_mask;
pub mod identity;
pub mod lens;
pub mod profile;
pub mod resample;
pub mod rotate;
pub mod source;

use crate::filters::registry::FilterRegistry;

/// Register all built-in filters.
pub fn register_all(registry: &mut FilterRegistry) {
    source::register(registry);
    identity::register(registry);
    lens::register(registry);
    rotate::register(registry);
    crop::register(registry);
    resample::register(registry);
    colorspace::register(registry);
    profile::register(registry);
    denoise::register(registry);
    exposure_mask::register(registry);
    cache::register(registry);
}

// Re-export for direct access
pub use cache::CacheFilter;
pub use colorspace::ColorSpaceTransform;
pub use crop::Crop;
pub use denoise::Denoise;
pub use exposure_mask::ExposureMask;
pub use identity::IdentityFilter;
pub use lens::LensCorrection;
pub use profile::ProfileApply;
pub use resample::Resample;
pub use rotate::Rotate;
pub use source::Source;
