//! Integer geometry shared by requests, filters and surfaces.

use serde::Deserialize;
use std::fmt;

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// The rectangle at the origin covering this size.
    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    /// Largest size with this aspect ratio that fits inside `bounds`.
    pub fn fit_within(&self, bounds: Size) -> Size {
        if self.is_empty() || bounds.is_empty() {
            return Size::default();
        }
        let scale = (bounds.width as f64 / self.width as f64)
            .min(bounds.height as f64 / self.height as f64);
        Size::new(
            ((self.width as f64 * scale).round() as u32).clamp(1, bounds.width),
            ((self.height as f64 * scale).round() as u32).clamp(1, bounds.height),
        )
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// An axis-aligned rectangle with signed origin.
///
/// Canvas placements may start at negative offsets when scrolled, so the
/// origin is signed while the extent is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Overlap of two rectangles, `None` when the overlap has zero area.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x1 = (self.x as i64).max(other.x as i64);
        let y1 = (self.y as i64).max(other.y as i64);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(Rect::new(x1 as i32, y1 as i32, (x2 - x1) as u32, (y2 - y1) as u32))
    }

    /// Whether the rectangles overlap or share an edge.
    pub fn touches(&self, other: &Rect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x as i64 <= other.right()
            && other.x as i64 <= self.right()
            && self.y as i64 <= other.bottom()
            && other.y as i64 <= self.bottom()
    }

    /// Smallest rectangle covering both. Empty rectangles are ignored.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x1 = (self.x as i64).min(other.x as i64);
        let y1 = (self.y as i64).min(other.y as i64);
        let x2 = self.right().max(other.right());
        let y2 = self.bottom().max(other.bottom());
        Rect::new(x1 as i32, y1 as i32, (x2 - x1) as u32, (y2 - y1) as u32)
    }

    /// Whether `other` lies entirely inside this rectangle.
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x && y >= self.y && (x as i64) < self.right() && (y as i64) < self.bottom()
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Grow on every side by `amount` pixels.
    pub fn expand(&self, amount: u32) -> Rect {
        let a = amount as i32;
        Rect::new(
            self.x - a,
            self.y - a,
            self.width + 2 * amount,
            self.height + 2 * amount,
        )
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// Crop rectangle in photo coordinates, `x2`/`y2` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CropRect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl CropRect {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Swap coordinates so that `x1 <= x2` and `y1 <= y2`.
    pub fn normalized(&self) -> CropRect {
        CropRect::new(
            self.x1.min(self.x2),
            self.y1.min(self.y2),
            self.x1.max(self.x2),
            self.y1.max(self.y2),
        )
    }

    pub fn to_rect(&self) -> Rect {
        let n = self.normalized();
        Rect::new(n.x1, n.y1, (n.x2 - n.x1) as u32, (n.y2 - n.y1) as u32)
    }
}

impl From<Rect> for CropRect {
    fn from(rect: Rect) -> Self {
        CropRect::new(
            rect.x,
            rect.y,
            rect.right() as i32,
            rect.bottom() as i32,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_intersect_disjoint() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(10, 0, 10, 10);
        assert_eq!(a.intersect(&b), None);
    }

    #[test]
    fn test_intersect_negative_origin() {
        let placement = Rect::new(-30, -10, 100, 50);
        let canvas = Rect::new(0, 0, 60, 60);
        assert_eq!(placement.intersect(&canvas), Some(Rect::new(0, 0, 60, 40)));
    }

    #[test]
    fn test_touches_includes_shared_edges() {
        let a = Rect::new(0, 0, 10, 10);
        assert!(a.touches(&Rect::new(5, 5, 10, 10)));
        assert!(a.touches(&Rect::new(10, 0, 5, 10)));
        assert!(!a.touches(&Rect::new(11, 0, 5, 10)));
        assert!(!a.touches(&Rect::new(0, 0, 0, 0)));
    }

    #[test]
    fn test_fit_within_keeps_aspect() {
        let fitted = Size::new(4000, 3000).fit_within(Size::new(800, 800));
        assert_eq!(fitted, Size::new(800, 600));
        assert!(Size::new(0, 10).fit_within(Size::new(5, 5)).is_empty());
    }

    #[test]
    fn test_crop_rect_round_trip() {
        let crop = CropRect::new(110, 110, 10, 10);
        assert_eq!(crop.to_rect(), Rect::new(10, 10, 100, 100));
    }

    fn rect_strategy() -> impl Strategy<Value = Rect> {
        (-200i32..200, -200i32..200, 0u32..300, 0u32..300)
            .prop_map(|(x, y, w, h)| Rect::new(x, y, w, h))
    }

    proptest! {
        #[test]
        fn intersection_is_contained_in_both(a in rect_strategy(), b in rect_strategy()) {
            if let Some(i) = a.intersect(&b) {
                prop_assert!(!i.is_empty());
                prop_assert!(a.contains_rect(&i));
                prop_assert!(b.contains_rect(&i));
            }
        }

        #[test]
        fn union_covers_both(a in rect_strategy(), b in rect_strategy()) {
            let u = a.union(&b);
            if !a.is_empty() {
                prop_assert!(u.contains_rect(&a));
            }
            if !b.is_empty() {
                prop_assert!(u.contains_rect(&b));
            }
        }
    }
}
