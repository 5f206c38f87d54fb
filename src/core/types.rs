//! Parameter values carried by filter nodes.
//!
//! Every filter kind declares a fixed schema of typed parameters (see
//! [`crate::core::param`]); the values stored on nodes are [`Value`]s. The
//! enum is closed so that fingerprinting and schema checks are exhaustive.

use crate::core::color::ColorSpaceRef;
use crate::core::geometry::CropRect;
use crate::core::image::Image16;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A typed parameter value.
#[derive(Debug, Clone)]
pub enum Value {
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit floating point number
    Float(f64),
    /// Boolean flag
    Boolean(bool),
    /// UTF-8 string
    String(String),
    /// Crop rectangle in photo coordinates
    Rect(CropRect),
    /// Colour space handed out by the colour management context
    ColorSpace(ColorSpaceRef),
    /// Opaque camera or ICC profile
    Profile(ProfileRef),
    /// Development settings of one snapshot
    Settings(SettingsRef),
    /// Source raster
    Image(Image16),
    /// Absence of a value (only accepted by optional parameters)
    None,
}

/// Parameter types used by schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    Integer,
    Float,
    Boolean,
    String,
    Rect,
    ColorSpace,
    Profile,
    Settings,
    Image,
    None,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamType::Integer => "Integer",
            ParamType::Float => "Float",
            ParamType::Boolean => "Boolean",
            ParamType::String => "String",
            ParamType::Rect => "Rect",
            ParamType::ColorSpace => "ColorSpace",
            ParamType::Profile => "Profile",
            ParamType::Settings => "Settings",
            ParamType::Image => "Image",
            ParamType::None => "None",
        };
        write!(f, "{}", name)
    }
}

impl ParamType {
    /// Whether a value of type `other` can be stored in a parameter of this type.
    ///
    /// Integers widen to floats; nothing else converts.
    pub fn accepts(&self, other: ParamType) -> bool {
        *self == other || (*self == ParamType::Float && other == ParamType::Integer)
    }
}

impl Value {
    /// Get the parameter type of this value.
    pub fn get_type(&self) -> ParamType {
        match self {
            Value::Integer(_) => ParamType::Integer,
            Value::Float(_) => ParamType::Float,
            Value::Boolean(_) => ParamType::Boolean,
            Value::String(_) => ParamType::String,
            Value::Rect(_) => ParamType::Rect,
            Value::ColorSpace(_) => ParamType::ColorSpace,
            Value::Profile(_) => ParamType::Profile,
            Value::Settings(_) => ParamType::Settings,
            Value::Image(_) => ParamType::Image,
            Value::None => ParamType::None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers are accepted where floats are expected.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_rect(&self) -> Option<CropRect> {
        match self {
            Value::Rect(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_color_space(&self) -> Option<&ColorSpaceRef> {
        match self {
            Value::ColorSpace(cs) => Some(cs),
            _ => None,
        }
    }

    pub fn as_profile(&self) -> Option<&ProfileRef> {
        match self {
            Value::Profile(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_settings(&self) -> Option<&SettingsRef> {
        match self {
            Value::Settings(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_image(&self) -> Option<&Image16> {
        match self {
            Value::Image(img) => Some(img),
            _ => None,
        }
    }

    /// Feed everything that can influence a filter's output into `hasher`.
    ///
    /// Shared objects hash by identity: a colour space or profile by its id,
    /// an image by the id of its pixel storage.
    pub fn hash_into<H: Hasher>(&self, hasher: &mut H) {
        std::mem::discriminant(self).hash(hasher);
        match self {
            Value::Integer(i) => i.hash(hasher),
            Value::Float(f) => f.to_bits().hash(hasher),
            Value::Boolean(b) => b.hash(hasher),
            Value::String(s) => s.hash(hasher),
            Value::Rect(r) => r.hash(hasher),
            Value::ColorSpace(cs) => cs.id().hash(hasher),
            Value::Profile(p) => {
                p.id.hash(hasher);
                p.kind.hash(hasher);
            }
            Value::Settings(s) => s.hash_into(hasher),
            Value::Image(img) => img.id().hash(hasher),
            Value::None => {}
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Rect(a), Value::Rect(b)) => a == b,
            (Value::ColorSpace(a), Value::ColorSpace(b)) => a.id() == b.id(),
            (Value::Profile(a), Value::Profile(b)) => a.id == b.id && a.kind == b.kind,
            (Value::Settings(a), Value::Settings(b)) => a == b,
            (Value::Image(a), Value::Image(b)) => a.id() == b.id(),
            (Value::None, Value::None) => true,
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<CropRect> for Value {
    fn from(v: CropRect) -> Self {
        Value::Rect(v)
    }
}

impl From<Option<CropRect>> for Value {
    fn from(v: Option<CropRect>) -> Self {
        v.map(Value::Rect).unwrap_or(Value::None)
    }
}

impl From<Image16> for Value {
    fn from(v: Image16) -> Self {
        Value::Image(v)
    }
}

// ============================================================================
// Profiles and settings
// ============================================================================

/// Kind of an externally supplied profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileKind {
    /// Camera profile (DNG camera profile)
    Dcp,
    /// ICC profile
    Icc,
}

/// An opaque profile from the profile repository.
///
/// The pipeline never parses the payload; it only routes the profile to the
/// stage that understands its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub id: String,
    pub kind: ProfileKind,
    pub payload: Arc<[u8]>,
}

impl Profile {
    pub fn new(id: impl Into<String>, kind: ProfileKind) -> Self {
        Self {
            id: id.into(),
            kind,
            payload: Arc::from(Vec::new()),
        }
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload.into();
        self
    }
}

/// Shared handle to a profile.
pub type ProfileRef = Arc<Profile>;

/// Development settings stored per snapshot by the photo model.
#[derive(Debug, Clone, PartialEq)]
pub struct DevelopSettings {
    /// Exposure compensation in EV
    pub exposure: f64,
    /// Saturation multiplier (1.0 = unchanged)
    pub saturation: f64,
    /// Contrast multiplier around mid grey (1.0 = unchanged)
    pub contrast: f64,
    /// White balance warmth, -1.0..=1.0
    pub warmth: f64,
    /// White balance tint, -1.0..=1.0
    pub tint: f64,
    /// Luma noise reduction strength, 0..=100
    pub denoise_luma: f64,
    /// Chroma noise reduction strength, 0..=100
    pub denoise_chroma: f64,
}

impl Default for DevelopSettings {
    fn default() -> Self {
        Self {
            exposure: 0.0,
            saturation: 1.0,
            contrast: 1.0,
            warmth: 0.0,
            tint: 0.0,
            denoise_luma: 0.0,
            denoise_chroma: 0.0,
        }
    }
}

impl DevelopSettings {
    fn hash_into<H: Hasher>(&self, hasher: &mut H) {
        for v in [
            self.exposure,
            self.saturation,
            self.contrast,
            self.warmth,
            self.tint,
            self.denoise_luma,
            self.denoise_chroma,
        ] {
            v.to_bits().hash(hasher);
        }
    }
}

/// Shared handle to snapshot settings.
pub type SettingsRef = Arc<DevelopSettings>;
