//! Preview rendering.
//!
//! Builds the per-surface chains over one shared source, lays views out on
//! the canvas and drives the two-pass (quick, then full) repaint of dirty
//! areas.

pub mod chains;
pub mod layout;
pub mod preview;
pub mod scheduler;

pub use chains::{LoupeChain, NavigatorChain, ViewChain, WORKING_COLORSPACE};
pub use layout::{DirtyRegion, Layout, SplitDirection};
pub use preview::{PixelProbe, PreviewPipeline, Snapshot, SourceProvider, ViewBinding};
pub use scheduler::{PaintEvent, PaintSink, RefineScheduler, RefineState, RenderTask};
