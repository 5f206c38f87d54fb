//! Canvas layout: where each view sits and which canvas area needs a repaint.

use crate::core::geometry::{Rect, Size};
use serde::Deserialize;

/// How the canvas is divided between views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SplitDirection {
    /// Views side by side
    #[default]
    Vertical,
    /// Views stacked
    Horizontal,
}

/// Geometry of the canvas and its views.
///
/// With a single view the whole canvas belongs to it. With more, the canvas
/// is cut along `split` into equal cells separated by a splitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    canvas: Size,
    views: usize,
    split: SplitDirection,
    splitter_width: u32,
    padding: u32,
}

impl Layout {
    pub fn new(canvas: Size, views: usize, split: SplitDirection, splitter_width: u32, padding: u32) -> Self {
        Self {
            canvas,
            views: views.max(1),
            split,
            splitter_width,
            padding,
        }
    }

    pub fn canvas(&self) -> Size {
        self.canvas
    }

    pub fn views(&self) -> usize {
        self.views
    }

    pub fn split(&self) -> SplitDirection {
        self.split
    }

    pub fn set_canvas(&mut self, canvas: Size) {
        self.canvas = canvas;
    }

    pub fn set_views(&mut self, views: usize) {
        self.views = views.max(1);
    }

    pub fn set_split(&mut self, split: SplitDirection) {
        self.split = split;
    }

    fn splitters(&self) -> u32 {
        (self.views as u32).saturating_sub(1) * self.splitter_width
    }

    /// Largest image a view shows in zoom-to-fit mode.
    pub fn max_size(&self) -> Size {
        let views = self.views as u32;
        let pad = self.padding * 2;
        let mut width = self.canvas.width.saturating_sub(pad);
        let mut height = self.canvas.height.saturating_sub(pad);
        if views > 1 {
            match self.split {
                SplitDirection::Vertical => {
                    width = (self.canvas.width.saturating_sub(self.splitters()) / views).saturating_sub(pad)
                }
                SplitDirection::Horizontal => {
                    height = (self.canvas.height.saturating_sub(self.splitters()) / views).saturating_sub(pad)
                }
            }
        }
        Size::new(width, height)
    }

    /// Canvas area owned by `view`.
    pub fn cell(&self, view: usize) -> Rect {
        let views = self.views as u32;
        let index = view.min(self.views - 1) as u32;
        if views == 1 {
            return self.canvas.bounds();
        }
        let Size { width, height } = self.canvas;
        match self.split {
            SplitDirection::Vertical => {
                let cell = width.saturating_sub(self.splitters()) / views;
                let x = index * (cell + self.splitter_width);
                Rect::new(x as i32, 0, cell, height)
            }
            SplitDirection::Horizontal => {
                let cell = height.saturating_sub(self.splitters()) / views;
                let y = index * (cell + self.splitter_width);
                Rect::new(0, y as i32, width, cell)
            }
        }
    }

    /// Where an image of `image` size is drawn for `view`: centred in its
    /// cell.
    pub fn placement(&self, view: usize, image: Size) -> Rect {
        let cell = self.cell(view);
        Rect::new(
            cell.x + (cell.width as i32 - image.width as i32) / 2,
            cell.y + (cell.height as i32 - image.height as i32) / 2,
            image.width,
            image.height,
        )
    }

    /// Placement at 100% zoom: centred when the image fits, otherwise
    /// shifted by the scroll offset.
    pub fn scrolled_placement(&self, image: Size, scroll: (i32, i32)) -> Rect {
        let x = if image.width > self.canvas.width {
            -scroll.0
        } else {
            (self.canvas.width - image.width) as i32 / 2
        };
        let y = if image.height > self.canvas.height {
            -scroll.1
        } else {
            (self.canvas.height - image.height) as i32 / 2
        };
        Rect::new(x, y, image.width, image.height)
    }

    /// The view under a canvas coordinate.
    pub fn view_at(&self, x: i32, y: i32) -> usize {
        if self.views == 1 {
            return 0;
        }
        let (pos, extent) = match self.split {
            SplitDirection::Vertical => (x, self.canvas.width),
            SplitDirection::Horizontal => (y, self.canvas.height),
        };
        if extent == 0 || pos < 0 {
            return 0;
        }
        ((self.views as i64 * pos as i64 / extent as i64) as usize).min(self.views - 1)
    }
}

/// Canvas area awaiting a repaint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirtyRegion {
    /// Nothing to repaint
    #[default]
    Clean,
    /// The union of the rectangles marked so far
    Area(Rect),
    /// The whole canvas
    Full,
}

impl DirtyRegion {
    pub fn is_clean(&self) -> bool {
        matches!(self, DirtyRegion::Clean)
    }

    /// Add a rectangle; empty rectangles are ignored.
    pub fn add(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        *self = match *self {
            DirtyRegion::Clean => DirtyRegion::Area(rect),
            DirtyRegion::Area(area) => DirtyRegion::Area(area.union(&rect)),
            DirtyRegion::Full => DirtyRegion::Full,
        };
    }

    pub fn add_full(&mut self) {
        *self = DirtyRegion::Full;
    }

    /// The dirty rectangle clipped to `canvas`.
    pub fn resolve(&self, canvas: Size) -> Option<Rect> {
        match self {
            DirtyRegion::Clean => None,
            DirtyRegion::Area(area) => area.intersect(&canvas.bounds()),
            DirtyRegion::Full => Some(canvas.bounds()).filter(|r| !r.is_empty()),
        }
    }

    /// Take the region, leaving it clean.
    pub fn take(&mut self) -> DirtyRegion {
        std::mem::take(self)
    }
}
