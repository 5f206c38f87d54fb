//! Colour spaces handed out by the colour management context.
//!
//! Colour spaces are looked up by identifier string. The built-in set is
//! constructed lazily, once per registry, and shared read-only afterwards.

use crate::core::image::{Image16, Image8, Sample};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};

/// 3x3 row-major matrix.
pub type Matrix3 = [[f32; 3]; 3];

/// Transfer curve used when encoding for display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransferCurve {
    /// Linear light, no encoding
    Linear,
    /// Piecewise sRGB curve
    Srgb,
    /// Pure power curve with the given gamma
    Gamma(f32),
}

impl TransferCurve {
    /// Encode a linear value in `0.0..=1.0`.
    pub fn encode(&self, v: f32) -> f32 {
        let v = v.clamp(0.0, 1.0);
        match self {
            TransferCurve::Linear => v,
            TransferCurve::Srgb => {
                if v <= 0.003_130_8 {
                    v * 12.92
                } else {
                    1.055 * v.powf(1.0 / 2.4) - 0.055
                }
            }
            TransferCurve::Gamma(g) => v.powf(1.0 / g),
        }
    }
}

/// A named RGB colour space.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorSpace {
    id: String,
    name: String,
    to_xyz: Matrix3,
    curve: TransferCurve,
}

/// Shared handle to a colour space.
pub type ColorSpaceRef = Arc<ColorSpace>;

impl ColorSpace {
    pub fn new(id: impl Into<String>, name: impl Into<String>, to_xyz: Matrix3, curve: TransferCurve) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            to_xyz,
            curve,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn curve(&self) -> TransferCurve {
        self.curve
    }

    /// Matrix converting linear RGB in `self` to linear RGB in `target`.
    pub fn matrix_to(&self, target: &ColorSpace) -> Matrix3 {
        if self.id == target.id {
            return IDENTITY;
        }
        match invert(&target.to_xyz) {
            Some(from_xyz) => multiply(&from_xyz, &self.to_xyz),
            None => IDENTITY,
        }
    }
}

/// Encode a linear 16-bit image into 8-bit display samples using the
/// transfer curve of `space`. Alpha is carried over linearly.
pub fn encode_image8(image: &Image16, space: &ColorSpace) -> Image8 {
    let curve = space.curve();
    let channels = image.channels();
    // 16-bit -> 8-bit through a lookup table, one entry per 16-bit value / 16
    let lut: Vec<u8> = (0..4096u32)
        .map(|i| u8::from_unit(curve.encode(i as f32 / 4095.0)))
        .collect();
    Image8::from_fn(image.width(), image.height(), channels, |x, y, px| {
        let src = image.pixel(x, y);
        for c in 0..3 {
            px[c] = lut[(src[c] >> 4) as usize];
        }
        if channels == 4 {
            px[3] = (src[3] >> 8) as u8;
        }
    })
}

pub const IDENTITY: Matrix3 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// Multiply two 3x3 matrices.
pub fn multiply(a: &Matrix3, b: &Matrix3) -> Matrix3 {
    let mut out = [[0.0; 3]; 3];
    for (r, row) in out.iter_mut().enumerate() {
        for (c, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[r][k] * b[k][c]).sum();
        }
    }
    out
}

/// Whether `m` is the identity within float noise.
pub fn is_identity(m: &Matrix3) -> bool {
    m.iter()
        .flatten()
        .zip(IDENTITY.iter().flatten())
        .all(|(a, b)| (a - b).abs() < 1e-5)
}

/// Apply a matrix to an RGB triple.
pub fn apply(m: &Matrix3, rgb: [f32; 3]) -> [f32; 3] {
    [
        m[0][0] * rgb[0] + m[0][1] * rgb[1] + m[0][2] * rgb[2],
        m[1][0] * rgb[0] + m[1][1] * rgb[1] + m[1][2] * rgb[2],
        m[2][0] * rgb[0] + m[2][1] * rgb[1] + m[2][2] * rgb[2],
    ]
}

fn invert(m: &Matrix3) -> Option<Matrix3> {
    let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
    if det.abs() < 1e-9 {
        return None;
    }
    let inv = 1.0 / det;
    Some([
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv,
        ],
    ])
}

fn builtin_spaces() -> Vec<ColorSpace> {
    vec![
        ColorSpace::new(
            "srgb",
            "sRGB",
            [
                [0.4124, 0.3576, 0.1805],
                [0.2126, 0.7152, 0.0722],
                [0.0193, 0.1192, 0.9505],
            ],
            TransferCurve::Srgb,
        ),
        ColorSpace::new(
            "linear",
            "Linear sRGB",
            [
                [0.4124, 0.3576, 0.1805],
                [0.2126, 0.7152, 0.0722],
                [0.0193, 0.1192, 0.9505],
            ],
            TransferCurve::Linear,
        ),
        ColorSpace::new(
            "adobergb",
            "Adobe RGB (1998)",
            [
                [0.5767, 0.1856, 0.1882],
                [0.2974, 0.6273, 0.0753],
                [0.0270, 0.0707, 0.9911],
            ],
            TransferCurve::Gamma(2.2),
        ),
        ColorSpace::new(
            "prophoto",
            "ProPhoto RGB",
            [
                [0.7977, 0.1352, 0.0313],
                [0.2880, 0.7119, 0.0001],
                [0.0000, 0.0000, 0.8249],
            ],
            TransferCurve::Gamma(1.8),
        ),
    ]
}

/// Colour management provider: colour spaces by identifier.
#[derive(Debug, Default)]
pub struct ColorSpaceRegistry {
    builtins: OnceLock<IndexMap<String, ColorSpaceRef>>,
    custom: RwLock<IndexMap<String, ColorSpaceRef>>,
}

impl ColorSpaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn builtins(&self) -> &IndexMap<String, ColorSpaceRef> {
        self.builtins.get_or_init(|| {
            builtin_spaces()
                .into_iter()
                .map(|cs| (cs.id.clone(), Arc::new(cs)))
                .collect()
        })
    }

    /// Look up a colour space. Custom registrations shadow built-ins.
    pub fn get(&self, id: &str) -> Option<ColorSpaceRef> {
        if let Some(cs) = self.custom.read().get(id) {
            return Some(cs.clone());
        }
        self.builtins().get(id).cloned()
    }

    /// Register an additional colour space.
    pub fn register(&self, space: ColorSpace) -> ColorSpaceRef {
        let space = Arc::new(space);
        self.custom.write().insert(space.id.clone(), space.clone());
        space
    }

    /// All known identifiers, built-ins first.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.builtins().keys().cloned().collect();
        for id in self.custom.read().keys() {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }
}
