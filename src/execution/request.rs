//! Requests handed down a filter chain and the responses bubbling back.

use crate::core::color::ColorSpaceRef;
use crate::core::geometry::{Rect, Size};
use crate::core::image::{Image16, Image8};
use crate::core::types::Value;
use indexmap::IndexMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{BitOr, BitOrAssign};

/// Name of the request parameter carrying the target colour space.
pub const PARAM_COLORSPACE: &str = "colorspace";

/// Bitmask describing which aspects of a filter's output changed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChangedMask(u8);

impl ChangedMask {
    pub const NONE: ChangedMask = ChangedMask(0);
    /// Output dimensions changed
    pub const DIMENSION: ChangedMask = ChangedMask(1);
    /// Pixel data changed
    pub const PIXELS: ChangedMask = ChangedMask(1 << 1);
    /// A specific region changed
    pub const REGION: ChangedMask = ChangedMask(1 << 2);
    pub const ALL: ChangedMask = ChangedMask(0b111);

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, other: ChangedMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(&self, other: ChangedMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: ChangedMask) {
        self.0 |= other.0;
    }
}

impl BitOr for ChangedMask {
    type Output = ChangedMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        ChangedMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for ChangedMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for ChangedMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.contains(ChangedMask::DIMENSION) {
            parts.push("DIMENSION");
        }
        if self.contains(ChangedMask::PIXELS) {
            parts.push("PIXELS");
        }
        if self.contains(ChangedMask::REGION) {
            parts.push("REGION");
        }
        if parts.is_empty() {
            write!(f, "ChangedMask(NONE)")
        } else {
            write!(f, "ChangedMask({})", parts.join(" | "))
        }
    }
}

/// Render quality.
///
/// Ordered so that `Quick < Full`: combining qualities along a chain takes
/// the minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Quality {
    /// Fast approximation, stages may skip or simplify work
    Quick,
    /// Full quality
    #[default]
    Full,
}

/// Descriptor of one render call.
///
/// Filters never mutate a request they receive; the `with_*` methods return
/// a modified copy to pass further upstream.
#[derive(Debug, Clone, Default)]
pub struct FilterRequest {
    roi: Option<Rect>,
    quality: Quality,
    size: Option<Size>,
    params: IndexMap<String, Value>,
}

impl FilterRequest {
    /// Full-frame, full-quality request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Region of interest in the output space of the filter being asked.
    pub fn roi(&self) -> Option<Rect> {
        self.roi
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    pub fn is_quick(&self) -> bool {
        self.quality == Quality::Quick
    }

    /// Target size hint for scaling stages.
    pub fn size(&self) -> Option<Size> {
        self.size
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// Target colour space, if one was attached.
    pub fn color_space(&self) -> Option<&ColorSpaceRef> {
        self.param(PARAM_COLORSPACE).and_then(Value::as_color_space)
    }

    pub fn set_roi(&mut self, roi: Option<Rect>) {
        self.roi = roi;
    }

    pub fn set_quality(&mut self, quality: Quality) {
        self.quality = quality;
    }

    pub fn set_quick(&mut self, quick: bool) {
        self.quality = if quick { Quality::Quick } else { Quality::Full };
    }

    pub fn set_size(&mut self, size: Option<Size>) {
        self.size = size;
    }

    pub fn set_param(&mut self, name: impl Into<String>, value: Value) {
        self.params.insert(name.into(), value);
    }

    /// Copy with a different region of interest.
    pub fn with_roi(&self, roi: Option<Rect>) -> FilterRequest {
        let mut next = self.clone();
        next.roi = roi;
        next
    }

    /// Copy with a different quality.
    pub fn with_quality(&self, quality: Quality) -> FilterRequest {
        let mut next = self.clone();
        next.quality = quality;
        next
    }

    /// Copy with an extra parameter.
    pub fn with_param(&self, name: impl Into<String>, value: Value) -> FilterRequest {
        let mut next = self.clone();
        next.params.insert(name.into(), value);
        next
    }

    /// Hash the parts of the request that shape a filter's output.
    ///
    /// Quality is left out; caches key on it separately.
    pub fn hash_into<H: Hasher>(&self, hasher: &mut H, include_roi: bool) {
        self.hash_selected_into(hasher, include_roi, |_| true);
    }

    /// Like [`hash_into`](Self::hash_into), with only the parameters
    /// accepted by `select`.
    pub fn hash_selected_into<H: Hasher>(
        &self,
        hasher: &mut H,
        include_roi: bool,
        select: impl Fn(&str) -> bool,
    ) {
        if include_roi {
            self.roi.hash(hasher);
        }
        self.size.hash(hasher);
        let mut keys: Vec<&String> = self.params.keys().filter(|key| select(key.as_str())).collect();
        keys.sort();
        for key in keys {
            key.hash(hasher);
            if let Some(value) = self.params.get(key) {
                value.hash_into(hasher);
            }
        }
    }
}

/// Result of evaluating a filter.
#[derive(Debug, Clone, Default)]
pub struct FilterResponse {
    image: Option<Image16>,
    image8: Option<Image8>,
    region: Option<Rect>,
    quality: Quality,
    changed: ChangedMask,
    aux: IndexMap<String, Value>,
}

impl FilterResponse {
    /// A response without an image: source not available or nothing to render.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_image(image: Image16) -> Self {
        Self {
            image: Some(image),
            ..Self::default()
        }
    }

    pub fn from_image8(image8: Image8) -> Self {
        Self {
            image8: Some(image8),
            ..Self::default()
        }
    }

    pub fn image(&self) -> Option<&Image16> {
        self.image.as_ref()
    }

    pub fn image8(&self) -> Option<&Image8> {
        self.image8.as_ref()
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some() || self.image8.is_some()
    }

    /// Output-space rectangle covered by the images; `None` means full frame.
    pub fn region(&self) -> Option<Rect> {
        self.region
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    pub fn is_quick(&self) -> bool {
        self.quality == Quality::Quick
    }

    pub fn changed(&self) -> ChangedMask {
        self.changed
    }

    /// Auxiliary value computed as a side effect (e.g. a proposed crop).
    pub fn aux(&self, name: &str) -> Option<&Value> {
        self.aux.get(name)
    }

    pub fn aux_integer(&self, name: &str) -> Option<i64> {
        self.aux(name).and_then(Value::as_integer)
    }

    pub fn set_image(&mut self, image: Option<Image16>) {
        self.image = image;
    }

    pub fn set_image8(&mut self, image8: Option<Image8>) {
        self.image8 = image8;
    }

    pub fn set_region(&mut self, region: Option<Rect>) {
        self.region = region;
    }

    pub fn set_quality(&mut self, quality: Quality) {
        self.quality = quality;
    }

    pub fn set_changed(&mut self, changed: ChangedMask) {
        self.changed = changed;
    }

    pub fn set_aux(&mut self, name: impl Into<String>, value: Value) {
        self.aux.insert(name.into(), value);
    }

    pub fn with_region(mut self, region: Option<Rect>) -> Self {
        self.region = region;
        self
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    /// Keep only the part of the images inside `target`.
    ///
    /// `frame` is the full output size of the filter that produced this
    /// response, used when the response covers the full frame.
    pub fn crop_to(&self, target: Rect, frame: Size) -> FilterResponse {
        let covered = self.region.unwrap_or_else(|| frame.bounds());
        if covered == target {
            return self.clone();
        }
        let local = target.translate(-covered.x, -covered.y);
        let mut out = self.clone();
        out.image = self.image.as_ref().and_then(|img| img.region(local));
        out.image8 = self.image8.as_ref().and_then(|img| img.region(local));
        out.region = Some(target);
        out
    }
}
