//! The preview pipeline.
//!
//! [`PreviewPipeline`] owns one filter graph holding the shared source node
//! and the private chains of every surface: up to two canvas views, the
//! loupe and the navigator. Callers drive it from a single thread:
//!
//! 1. Photo and user events go in through the mutators (`set_photo`,
//!    `photo_spatial_changed`, `set_snapshot`, `set_split`, ...). These only
//!    edit node parameters; the graph turns them into change notifications
//!    on the listened chain tails.
//! 2. [`PreviewPipeline::render`] converts pending notifications into dirty
//!    canvas areas, renders each area at the view's current quality and
//!    hands the pixels to a [`PaintSink`]. Areas first painted from a quick
//!    render are refined at full quality on a later pass.

use crate::config::{PipelineConfig, MAX_VIEWS};
use crate::core::color::ColorSpaceRef;
use crate::core::context::{CancelToken, PipelineContext};
use crate::core::error::{LucidaError, LucidaResult, NodeId};
use crate::core::geometry::{CropRect, Rect, Size};
use crate::core::image::{Image16, Image8};
use crate::core::node::Filter;
use crate::core::types::{ProfileKind, ProfileRef, SettingsRef, Value};
use crate::execution::cache::CacheStats;
use crate::execution::engine::EvaluationEngine;
use crate::execution::request::{ChangedMask, FilterRequest, FilterResponse, Quality, PARAM_COLORSPACE};
use crate::filters::builtin::rotate;
use crate::filters::registry::FilterRegistry;
use crate::graph::structure::GraphNode;
use crate::graph::FilterGraph;
use crate::render::chains::{LoupeChain, NavigatorChain, ViewChain};
use crate::render::layout::{DirtyRegion, Layout};
use crate::render::scheduler::{PaintEvent, PaintSink, RefineScheduler, RefineState, RenderTask};
use log::{debug, warn};
use std::sync::Arc;

/// Angles below this count as "not rotated" when adopting a proposed crop.
const STRAIGHT_ANGLE: f64 = 0.001;

// ============================================================================
// Photo model interface
// ============================================================================

/// One of the three development presets stored with a photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Snapshot {
    #[default]
    A,
    B,
    C,
}

impl Snapshot {
    pub const ALL: [Snapshot; 3] = [Snapshot::A, Snapshot::B, Snapshot::C];

    pub fn index(&self) -> usize {
        match self {
            Snapshot::A => 0,
            Snapshot::B => 1,
            Snapshot::C => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Snapshot> {
        Self::ALL.get(index).copied()
    }

    pub fn label(&self) -> &'static str {
        match self {
            Snapshot::A => "A",
            Snapshot::B => "B",
            Snapshot::C => "C",
        }
    }
}

/// The loaded photo, as seen by the pipeline.
///
/// Read only. When the photo changes, the owner calls the matching
/// notification method of the pipeline (`photo_spatial_changed`,
/// `profile_changed`, `settings_changed`, `lens_changed`).
pub trait SourceProvider: Send + Sync {
    /// Decoded 16-bit linear image, `None` while decoding.
    fn image(&self) -> Option<Image16>;

    /// Crop rectangle in rotated photo coordinates.
    fn crop(&self) -> Option<CropRect>;

    /// Free rotation in degrees.
    fn angle(&self) -> f64;

    /// Quarter turns in bits 0-1, horizontal mirror in bit 2.
    fn orientation(&self) -> u8;

    /// Development settings of one snapshot.
    fn settings(&self, snapshot: Snapshot) -> SettingsRef;

    /// Camera or ICC profile chosen for the photo.
    fn profile(&self) -> Option<ProfileRef> {
        None
    }

    /// Radial distortion coefficient of the lens, when known.
    fn lens_distortion(&self) -> Option<f64> {
        None
    }
}

// ============================================================================
// Views
// ============================================================================

/// State of one canvas view.
#[derive(Debug, Clone)]
pub struct ViewBinding {
    chain: ViewChain,
    snapshot: Snapshot,
    request: FilterRequest,
    last_roi: Option<Rect>,
    changed: ChangedMask,
}

impl ViewBinding {
    fn new(chain: ViewChain, snapshot: Snapshot) -> Self {
        let mut request = FilterRequest::new();
        request.set_quick(true);
        Self {
            chain,
            snapshot,
            request,
            last_roi: None,
            changed: ChangedMask::NONE,
        }
    }

    pub fn chain(&self) -> &ViewChain {
        &self.chain
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot
    }

    /// Request used for the next first paint.
    pub fn request(&self) -> &FilterRequest {
        &self.request
    }

    /// Last rendered ROI, in the view's output coordinates.
    pub fn last_roi(&self) -> Option<Rect> {
        self.last_roi
    }
}

/// Colour picker data for one canvas coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelProbe {
    pub view: usize,
    /// Coordinates in the view's output image.
    pub x: i32,
    pub y: i32,
    /// Linear sample before colour management.
    pub pixel: [u16; 3],
    /// 3x3 average of the linear samples, 0.0..=1.0.
    pub average: [f32; 3],
    /// Displayed value.
    pub pixel8: [u8; 3],
}

// ============================================================================
// Pipeline
// ============================================================================

/// Canvas views, loupe and navigator over one source.
pub struct PreviewPipeline {
    config: PipelineConfig,
    graph: FilterGraph,
    engine: EvaluationEngine,
    source: NodeId,
    bindings: Vec<ViewBinding>,
    loupe: LoupeChain,
    loupe_view: Option<usize>,
    navigator: NavigatorChain,
    layout: Layout,
    scheduler: RefineScheduler,
    dirty: DirtyRegion,
    photo: Option<Arc<dyn SourceProvider>>,
    blanked: bool,
    zoom_to_fit: bool,
    keep_quick: bool,
    exposure_mask: bool,
    scroll: (i32, i32),
    proposed: Option<CropRect>,
    loupe_dirty: bool,
    navigator_dirty: bool,
}

impl PreviewPipeline {
    pub fn new(config: PipelineConfig) -> LucidaResult<Self> {
        Self::with_context(config, PipelineContext::default())
    }

    /// Build every chain up front; views beyond `config.views` stay idle
    /// until the canvas is split.
    pub fn with_context(config: PipelineConfig, context: PipelineContext) -> LucidaResult<Self> {
        let config = config.sanitize();
        let registry = FilterRegistry::with_builtins().with_cache_policy(config.cache_policy);
        let mut graph = FilterGraph::new();
        let source = graph.add_node(GraphNode::new(registry.create("source")?).with_label("source").shared());

        let mut bindings = Vec::with_capacity(MAX_VIEWS);
        for view in 0..MAX_VIEWS {
            let chain = ViewChain::build(&mut graph, &registry, source, view, &config)?;
            let snapshot = Snapshot::from_index(view).unwrap_or_default();
            bindings.push(ViewBinding::new(chain, snapshot));
        }
        let loupe = LoupeChain::build(&mut graph, &registry, &config)?;
        let navigator = NavigatorChain::build(&mut graph, &registry, source, &config)?;
        // construction noise
        graph.take_notifications();

        let layout = Layout::new(
            Size::default(),
            config.views,
            config.split,
            config.splitter_width,
            config.padding,
        );
        let mut pipeline = Self {
            config,
            graph,
            engine: EvaluationEngine::new(context),
            source,
            bindings,
            loupe,
            loupe_view: None,
            navigator,
            layout,
            scheduler: RefineScheduler::new(),
            dirty: DirtyRegion::Clean,
            photo: None,
            blanked: false,
            zoom_to_fit: true,
            keep_quick: false,
            exposure_mask: false,
            scroll: (0, 0),
            proposed: None,
            loupe_dirty: false,
            navigator_dirty: false,
        };
        pipeline.update_display_colorspace();
        Ok(pipeline)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn graph(&self) -> &FilterGraph {
        &self.graph
    }

    pub fn engine(&self) -> &EvaluationEngine {
        &self.engine
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Number of views on the canvas.
    pub fn views(&self) -> usize {
        self.layout.views()
    }

    pub fn binding(&self, view: usize) -> Option<&ViewBinding> {
        self.bindings.get(view)
    }

    pub fn view_chain(&self, view: usize) -> Option<&ViewChain> {
        self.bindings.get(view).map(|b| &b.chain)
    }

    pub fn view_request(&self, view: usize) -> Option<&FilterRequest> {
        self.bindings.get(view).map(|b| &b.request)
    }

    pub fn snapshot(&self, view: usize) -> Option<Snapshot> {
        self.bindings.get(view).map(|b| b.snapshot)
    }

    pub fn loupe_chain(&self) -> &LoupeChain {
        &self.loupe
    }

    pub fn navigator_chain(&self) -> &NavigatorChain {
        &self.navigator
    }

    pub fn source_node(&self) -> NodeId {
        self.source
    }

    pub fn zoom_to_fit(&self) -> bool {
        self.zoom_to_fit
    }

    pub fn keep_quick(&self) -> bool {
        self.keep_quick
    }

    pub fn exposure_mask(&self) -> bool {
        self.exposure_mask
    }

    pub fn is_blanked(&self) -> bool {
        self.blanked
    }

    pub fn loupe_view(&self) -> Option<usize> {
        self.loupe_view
    }

    pub fn dirty_region(&self) -> DirtyRegion {
        self.dirty
    }

    /// Crop suggested for an uncropped, straight photo whose lens correction
    /// leaves the frame corners empty, in unrotated photo coordinates.
    pub fn proposed_crop(&self) -> Option<CropRect> {
        self.proposed
    }

    /// Token the loader sets to abandon pending refinements.
    pub fn cancel_token(&self) -> CancelToken {
        self.engine.context().cancel_token().clone()
    }

    pub fn dropped_refinements(&self) -> u64 {
        self.scheduler.dropped()
    }

    pub fn pending_tasks(&self) -> usize {
        self.scheduler.len()
    }

    pub fn loupe_needs_redraw(&self) -> bool {
        self.loupe_dirty
    }

    pub fn navigator_needs_redraw(&self) -> bool {
        self.navigator_dirty
    }

    /// Aspects of `view`'s output that changed since the last call.
    pub fn take_changed(&mut self, view: usize) -> ChangedMask {
        self.bindings
            .get_mut(view)
            .map(|b| std::mem::replace(&mut b.changed, ChangedMask::NONE))
            .unwrap_or(ChangedMask::NONE)
    }

    /// Statistics of every cache node, labelled by surface.
    pub fn cache_stats(&self) -> Vec<(NodeId, String, CacheStats)> {
        self.graph.cache_stats()
    }

    fn chains(&self) -> Vec<ViewChain> {
        self.bindings.iter().map(|b| b.chain).collect()
    }

    fn profile_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.bindings.iter().map(|b| b.chain.profile).collect();
        nodes.push(self.loupe.profile);
        nodes.push(self.navigator.profile);
        nodes
    }

    // ========================================================================
    // Input
    // ========================================================================

    /// Add a shared stage reading from `previous`, or from the decoded
    /// source. Wire it in with [`set_input`](Self::set_input).
    pub fn add_input_stage(
        &mut self,
        filter: Box<dyn Filter>,
        previous: Option<NodeId>,
    ) -> LucidaResult<NodeId> {
        let id = self.graph.add_node(GraphNode::new(filter).shared());
        self.graph.set_previous(id, Some(previous.unwrap_or(self.source)))?;
        Ok(id)
    }

    /// Feed every view from `input` and the navigator from `fast_input`,
    /// or from `input` when there is no cheaper alternative. Passing the
    /// source node restores the initial wiring.
    pub fn set_input(&mut self, input: NodeId, fast_input: Option<NodeId>) -> LucidaResult<()> {
        let fast_input = fast_input.unwrap_or(input);
        for id in [input, fast_input] {
            self.graph.get_node(id)?;
            self.graph.set_shared(id, true)?;
        }
        for chain in self.chains() {
            self.graph.set_previous(chain.lens, Some(input))?;
        }
        self.graph.set_previous(self.navigator.scale, Some(fast_input))?;
        debug!("Views read from {}, navigator from {}", input, fast_input);
        self.dirty.add_full();
        self.navigator_dirty = true;
        Ok(())
    }

    // ========================================================================
    // Photo
    // ========================================================================

    /// Show another photo, or none.
    pub fn set_photo(&mut self, photo: Option<Arc<dyn SourceProvider>>) -> LucidaResult<()> {
        self.photo = photo;
        self.blanked = false;
        self.proposed = None;
        self.scheduler.clear();
        self.engine.context().cancel_token().reset();
        self.apply_photo()
    }

    pub fn photo(&self) -> Option<&Arc<dyn SourceProvider>> {
        self.photo.as_ref()
    }

    fn apply_photo(&mut self) -> LucidaResult<()> {
        let image = self.photo.as_ref().and_then(|p| p.image());
        self.set_source_image(image)?;
        self.photo_spatial_changed()?;
        self.profile_changed()?;
        self.lens_changed()?;
        for binding in &mut self.bindings {
            binding.request.set_quick(true);
        }
        self.dirty.add_full();
        Ok(())
    }

    /// Replace the decoded image, e.g. when decoding finishes.
    ///
    /// The navigator crop is rescaled, since it depends on the decoded size.
    pub fn set_source_image(&mut self, image: Option<Image16>) -> LucidaResult<()> {
        let value = image.map(Value::Image).unwrap_or(Value::None);
        self.graph.set_parameter(self.source, "image", value)?;
        let crop = self.photo.as_ref().and_then(|p| p.crop());
        let scaled = self.navigator_crop(crop);
        self.graph.set_recursive(self.navigator.end(), "rectangle", scaled)?;
        Ok(())
    }

    /// Report that part of the decoded image changed in place.
    pub fn source_region_changed(&mut self, region: Rect) -> LucidaResult<()> {
        self.graph.mark_region_changed(self.source, region)?;
        Ok(())
    }

    /// Re-read crop, angle and orientation from the photo.
    pub fn photo_spatial_changed(&mut self) -> LucidaResult<()> {
        let (crop, angle, orientation) = match &self.photo {
            Some(photo) => (photo.crop(), photo.angle(), photo.orientation()),
            None => (None, 0.0, 0),
        };
        let orientation = Value::Integer((orientation & 7) as i64);
        for chain in self.chains() {
            let end = chain.end();
            self.graph.set_recursive(end, "rectangle", Value::from(crop))?;
            self.graph.set_recursive(end, "angle", Value::Float(angle))?;
            self.graph.set_recursive(end, "orientation", orientation.clone())?;
        }

        let navigator = self.navigator.end();
        self.graph.set_recursive(navigator, "angle", Value::Float(angle))?;
        self.graph.set_recursive(navigator, "orientation", orientation)?;
        let scaled = self.navigator_crop(crop);
        self.graph.set_recursive(navigator, "rectangle", scaled)?;
        Ok(())
    }

    /// The crop rectangle in the navigator's downscaled coordinates.
    fn navigator_crop(&self, crop: Option<CropRect>) -> Value {
        let Some(crop) = crop else {
            return Value::None;
        };
        let request = FilterRequest::new();
        let full = self.engine.get_size(&self.graph, self.source, &request);
        let scaled = self.engine.get_size(&self.graph, self.navigator.scale, &request);
        match (full, scaled) {
            (Some(full), Some(scaled)) if full.width > 0 => {
                let factor = scaled.width as f64 / full.width as f64;
                let s = |v: i32| (v as f64 * factor).round() as i32;
                Value::Rect(CropRect::new(s(crop.x1), s(crop.y1), s(crop.x2), s(crop.y2)))
            }
            _ => Value::Rect(crop),
        }
    }

    /// Route the photo's profile to the profile stages.
    ///
    /// Camera profiles are applied by the profile stages; an ICC profile or
    /// none switches them off. Snapshot settings are re-sent afterwards.
    pub fn profile_changed(&mut self) -> LucidaResult<()> {
        let profile = self.photo.as_ref().and_then(|p| p.profile());
        for node in self.profile_nodes() {
            match &profile {
                Some(p) if p.kind == ProfileKind::Dcp => {
                    self.graph.set_parameter(node, "profile", Value::Profile(p.clone()))?;
                    self.graph.set_parameter(node, "use-profile", Value::Boolean(true))?;
                }
                _ => self.graph.set_parameter(node, "use-profile", Value::Boolean(false))?,
            }
        }
        if let Some(p) = &profile {
            debug!("Profile '{}' ({:?}) routed to {} stage(s)", p.id, p.kind, self.profile_nodes().len());
        }
        self.settings_changed()
    }

    /// Re-send snapshot settings to every chain.
    ///
    /// Unchanged settings are no-ops, so views whose snapshot did not change
    /// keep their caches.
    pub fn settings_changed(&mut self) -> LucidaResult<()> {
        let Some(photo) = self.photo.clone() else {
            return Ok(());
        };
        for view in 0..self.bindings.len() {
            let (end, snapshot) = (self.bindings[view].chain.end(), self.bindings[view].snapshot);
            self.graph
                .set_recursive(end, "settings", Value::Settings(photo.settings(snapshot)))?;
        }
        self.graph.set_recursive(
            self.navigator.end(),
            "settings",
            Value::Settings(photo.settings(Snapshot::A)),
        )?;
        self.update_loupe_settings()
    }

    fn update_loupe_settings(&mut self) -> LucidaResult<()> {
        let (Some(photo), Some(view)) = (self.photo.clone(), self.loupe_view) else {
            return Ok(());
        };
        let snapshot = self.bindings[view].snapshot;
        self.graph
            .set_recursive(self.loupe.end(), "settings", Value::Settings(photo.settings(snapshot)))?;
        Ok(())
    }

    /// Enable distortion correction with the photo's lens coefficient.
    pub fn lens_changed(&mut self) -> LucidaResult<()> {
        let k1 = self.photo.as_ref().and_then(|p| p.lens_distortion()).unwrap_or(0.0);
        for chain in self.chains() {
            self.graph
                .set_parameter(chain.lens, "distortion-enabled", Value::Boolean(true))?;
            self.graph.set_parameter(chain.lens, "k1", Value::Float(k1))?;
        }
        Ok(())
    }

    /// Detach the photo's pixels without tearing the chains down.
    pub fn blank(&mut self) -> LucidaResult<()> {
        if self.blanked {
            return Ok(());
        }
        self.blanked = true;
        self.scheduler.clear();
        self.set_source_image(None)?;
        self.dirty.add_full();
        Ok(())
    }

    pub fn unblank(&mut self) -> LucidaResult<()> {
        if !self.blanked {
            return Ok(());
        }
        self.blanked = false;
        let image = self.photo.as_ref().and_then(|p| p.image());
        self.set_source_image(image)?;
        for binding in &mut self.bindings {
            binding.request.set_quick(true);
        }
        self.dirty.add_full();
        Ok(())
    }

    // ========================================================================
    // Views and layout
    // ========================================================================

    /// Show another snapshot in `view`.
    pub fn set_snapshot(&mut self, view: usize, snapshot: Snapshot) -> LucidaResult<()> {
        let binding = self.bindings.get_mut(view).ok_or(LucidaError::InvalidView(view))?;
        if binding.snapshot == snapshot {
            return Ok(());
        }
        binding.snapshot = snapshot;
        let end = binding.chain.end();
        debug!("View {} shows snapshot {}", view, snapshot.label());

        if let Some(photo) = self.photo.clone() {
            self.graph
                .set_recursive(end, "settings", Value::Settings(photo.settings(snapshot)))?;
        }
        if self.loupe_view == Some(view) {
            self.update_loupe_settings()?;
        }
        Ok(())
    }

    /// Split the canvas into `MAX_VIEWS` views, or back to one.
    ///
    /// Splitting always returns to zoom-to-fit.
    pub fn set_split(&mut self, split: bool) -> LucidaResult<()> {
        let views = if split { MAX_VIEWS } else { 1 };
        self.layout.set_views(views);
        self.scheduler.retain_views(views);
        if self.loupe_view.is_some_and(|v| v >= views) {
            self.set_loupe(None)?;
        }
        if !self.zoom_to_fit {
            self.apply_zoom(true)?;
        }
        self.broadcast_size()?;
        self.dirty.add_full();
        Ok(())
    }

    /// Size of the canvas all views share.
    pub fn set_canvas_size(&mut self, canvas: Size) -> LucidaResult<()> {
        if canvas == self.layout.canvas() {
            return Ok(());
        }
        self.layout.set_canvas(canvas);
        self.broadcast_size()?;
        self.dirty.add_full();
        Ok(())
    }

    /// Tell every view's resample stage how much room its cell has.
    fn broadcast_size(&mut self) -> LucidaResult<()> {
        let max = self.layout.max_size();
        for chain in self.chains() {
            self.graph
                .set_recursive(chain.end(), "width", Value::Integer(max.width as i64))?;
            self.graph
                .set_recursive(chain.end(), "height", Value::Integer(max.height as i64))?;
        }
        Ok(())
    }

    /// Switch between zoom-to-fit and 100%.
    ///
    /// 100% shows a single view and no loupe.
    pub fn set_zoom_to_fit(&mut self, zoom: bool) -> LucidaResult<()> {
        if zoom == self.zoom_to_fit {
            return Ok(());
        }
        if !zoom {
            if self.layout.views() > 1 {
                self.layout.set_views(1);
                self.scheduler.retain_views(1);
                self.broadcast_size()?;
            }
            self.set_loupe(None)?;
        }
        self.apply_zoom(zoom)
    }

    fn apply_zoom(&mut self, zoom: bool) -> LucidaResult<()> {
        self.zoom_to_fit = zoom;
        for chain in self.chains() {
            self.graph.set_enabled(chain.resample, zoom)?;
        }
        self.scroll = (0, 0);
        self.dirty.add_full();
        Ok(())
    }

    /// Scroll offset at 100%.
    pub fn set_scroll(&mut self, x: i32, y: i32) {
        if self.scroll != (x, y) {
            self.scroll = (x, y);
            self.dirty.add_full();
        }
    }

    /// Show or hide clipped highlights and shadows.
    pub fn set_exposure_mask(&mut self, enabled: bool) -> LucidaResult<()> {
        for chain in self.chains() {
            self.graph
                .set_parameter(chain.mask, "exposure-mask", Value::Boolean(enabled))?;
        }
        self.exposure_mask = enabled;
        self.update_display_colorspace();
        Ok(())
    }

    /// Colour space of the monitor.
    pub fn set_display_colorspace(&mut self, id: impl Into<String>) {
        self.config.display_colorspace = id.into();
        self.update_display_colorspace();
        self.loupe_dirty = true;
        self.navigator_dirty = true;
    }

    fn color_space_or_srgb(&self, id: &str) -> Option<ColorSpaceRef> {
        let context = self.engine.context();
        context.color_space(id).or_else(|| {
            warn!("Unknown colour space '{}', using sRGB", id);
            context.color_space("srgb")
        })
    }

    fn update_display_colorspace(&mut self) {
        let id = if self.exposure_mask {
            &self.config.exposure_colorspace
        } else {
            &self.config.display_colorspace
        };
        if let Some(space) = self.color_space_or_srgb(id) {
            for binding in &mut self.bindings {
                binding
                    .request
                    .set_param(PARAM_COLORSPACE, Value::ColorSpace(space.clone()));
            }
        }
        self.dirty.add_full();
    }

    /// Request of the loupe and navigator: full quality, monitor colours.
    fn surface_request(&self) -> FilterRequest {
        let mut request = FilterRequest::new();
        if let Some(space) = self.color_space_or_srgb(&self.config.display_colorspace) {
            request.set_param(PARAM_COLORSPACE, Value::ColorSpace(space));
        }
        request
    }

    /// Render quick from now on. With `keep_quick`, quick paints are not
    /// refined until [`PreviewPipeline::quick_end`].
    pub fn quick_start(&mut self, keep_quick: bool) {
        for binding in &mut self.bindings {
            binding.request.set_quick(true);
        }
        self.keep_quick = keep_quick;
    }

    pub fn quick_end(&mut self) {
        self.keep_quick = false;
        self.dirty.add_full();
    }

    /// Mark a canvas area, or the whole canvas, for repaint.
    pub fn invalidate(&mut self, area: Option<Rect>) {
        match area {
            Some(area) => self.dirty.add(area),
            None => self.dirty.add_full(),
        }
    }

    /// Where `view`'s image sits on the canvas, `None` when there is nothing
    /// to show.
    pub fn placement(&self, view: usize) -> Option<Rect> {
        if view >= self.layout.views() {
            return None;
        }
        let binding = self.bindings.get(view)?;
        let size = self
            .engine
            .get_size(&self.graph, binding.chain.end(), &binding.request.with_roi(None))?;
        if size.is_empty() {
            return None;
        }
        Some(if self.zoom_to_fit {
            self.layout.placement(view, size)
        } else {
            self.layout.scrolled_placement(size, self.scroll)
        })
    }

    // ========================================================================
    // Change handling and rendering
    // ========================================================================

    /// Turn pending graph notifications into dirty canvas areas.
    pub fn handle_changes(&mut self) {
        for note in self.graph.take_notifications() {
            if note.tail == self.loupe.end() {
                self.loupe_dirty = true;
                continue;
            }
            if note.tail == self.navigator.end() {
                self.navigator_dirty = true;
                continue;
            }
            let Some(view) = self.bindings.iter().position(|b| b.chain.end() == note.tail) else {
                continue;
            };
            if view >= self.layout.views() {
                continue;
            }
            self.bindings[view].request.set_quick(true);

            if note.mask.contains(ChangedMask::DIMENSION) {
                self.dirty.add_full();
                continue;
            }
            match (self.placement(view), note.region) {
                (Some(placement), Some(region)) => {
                    if let Some(area) = region.translate(placement.x, placement.y).intersect(&placement) {
                        self.dirty.add(area);
                    }
                }
                (Some(placement), None) => self.dirty.add(placement),
                (None, _) => self.dirty.add(self.layout.cell(view)),
            }
        }
    }

    /// Whether nothing is left to paint.
    pub fn is_idle(&self) -> bool {
        self.dirty.is_clean() && self.scheduler.is_empty() && !self.graph.has_notifications()
    }

    /// One round: schedule the dirty region, then run the tasks queued at
    /// the start of the round. Refinements scheduled during the round run
    /// in the next one. Returns the number of paint events.
    pub fn render_pass(&mut self, sink: &mut dyn PaintSink) -> usize {
        self.handle_changes();
        let mut painted = 0;

        let dirty = self.dirty.take();
        if let Some(area) = dirty.resolve(self.layout.canvas()) {
            sink.paint(PaintEvent::Background { area });
            painted += 1;
            if self.photo.is_some() && !self.blanked {
                for view in 0..self.layout.views() {
                    let cell = self.layout.cell(view);
                    let part = self
                        .placement(view)
                        .and_then(|p| p.intersect(&area))
                        .and_then(|p| p.intersect(&cell));
                    if let Some(part) = part {
                        self.scheduler.schedule(view, part);
                    }
                }
            }
        }

        let cancel = self.cancel_token();
        for _ in 0..self.scheduler.len() {
            let Some(task) = self.scheduler.next(&cancel) else {
                break;
            };
            painted += self.run_task(task, &cancel, sink);
        }
        painted
    }

    /// Render until nothing is left. Returns the number of paint events.
    pub fn render(&mut self, sink: &mut dyn PaintSink) -> usize {
        let mut painted = 0;
        loop {
            painted += self.render_pass(sink);
            if self.is_idle() {
                return painted;
            }
        }
    }

    fn run_task(&mut self, task: RenderTask, cancel: &CancelToken, sink: &mut dyn PaintSink) -> usize {
        let view = task.view;
        let Some(placement) = self.placement(view) else {
            return 0;
        };
        let Some(area) = task.area.intersect(&placement) else {
            return 0;
        };
        let roi = area.translate(-placement.x, -placement.y);

        let zoom_to_fit = self.zoom_to_fit;
        let Some(binding) = self.bindings.get_mut(view) else {
            return 0;
        };
        let mut request = binding.request.clone();
        if task.state == RefineState::Refine {
            request.set_quality(Quality::Full);
        }
        request.set_roi(if zoom_to_fit { None } else { Some(roi) });
        binding.last_roi = Some(roi);
        let end = binding.chain.end();

        let response = self.engine.get_image8(&self.graph, end, &request);
        let image = response.image8().and_then(|image| {
            let covered = response.region().unwrap_or_else(|| image.bounds());
            image.region(roi.translate(-covered.x, -covered.y))
        });
        match image {
            Some(image) => sink.paint(PaintEvent::Image {
                view,
                area,
                image,
                quality: response.quality(),
            }),
            None => sink.paint(PaintEvent::Background { area }),
        }

        let binding = &mut self.bindings[view];
        binding.changed |= response.changed();
        if request.is_quick() && !self.keep_quick {
            binding.request.set_quality(Quality::Full);
            if response.is_quick() {
                self.scheduler.schedule_refine(view, area, cancel);
            }
        }
        if response.has_image() && !response.is_quick() {
            self.adopt_proposed_crop(&response);
        }
        1
    }

    fn adopt_proposed_crop(&mut self, response: &FilterResponse) {
        if self.proposed.is_some() {
            return;
        }
        let Some(photo) = &self.photo else {
            return;
        };
        if photo.crop().is_some() || photo.angle().abs() >= STRAIGHT_ANGLE {
            return;
        }
        let orientation = photo.orientation() & 7;
        let Some(crop) = rotate::proposed_crop(response) else {
            return;
        };
        let crop = if orientation != 0 {
            match self.engine.get_size(&self.graph, self.source, &FilterRequest::new()) {
                Some(size) => rotate::unorient_rect(crop, orientation, size),
                None => return,
            }
        } else {
            crop
        };
        debug!("Adopting proposed crop {:?}", crop);
        self.proposed = Some(crop);
    }

    // ========================================================================
    // Loupe, navigator and probes
    // ========================================================================

    /// Magnify `view`, or switch the loupe off.
    ///
    /// Only available in zoom-to-fit mode; elsewhere the call is ignored.
    pub fn set_loupe(&mut self, view: Option<usize>) -> LucidaResult<()> {
        match view {
            Some(view) => {
                if view >= self.layout.views() {
                    return Err(LucidaError::InvalidView(view));
                }
                if !self.zoom_to_fit {
                    debug!("Loupe needs zoom-to-fit, ignoring");
                    return Ok(());
                }
                let chain = self.bindings[view].chain;
                self.loupe.attach(&mut self.graph, &chain)?;
                self.loupe_view = Some(view);
                self.loupe_dirty = true;
                self.update_loupe_settings()
            }
            None => {
                self.graph.set_previous(self.loupe.start(), None)?;
                self.loupe_view = None;
                Ok(())
            }
        }
    }

    /// Full resolution square around canvas point (`x`, `y`).
    pub fn render_loupe(&mut self, x: i32, y: i32) -> Option<Image8> {
        let view = self.loupe_view?;
        let placement = self.placement(view)?;
        let cache0 = self.bindings.get(view)?.chain.cache0;
        let real = self
            .engine
            .get_size(&self.graph, cache0, &FilterRequest::new())?;
        let shown = placement.size();
        if shown.is_empty() || real.is_empty() {
            return None;
        }

        let rx = ((x - placement.x) as f64 * real.width as f64 / shown.width as f64).round() as i64;
        let ry = ((y - placement.y) as f64 * real.height as f64 / shown.height as f64).round() as i64;
        let side = self.config.loupe_size as i64;
        let x0 = (rx - side / 2).clamp(0, (real.width as i64 - side).max(0));
        let y0 = (ry - side / 2).clamp(0, (real.height as i64 - side).max(0));
        let roi = Rect::new(x0 as i32, y0 as i32, self.config.loupe_size, self.config.loupe_size);

        let request = self.surface_request().with_roi(Some(roi));
        let response = self.engine.get_image8(&self.graph, self.loupe.end(), &request);
        self.loupe_dirty = false;
        response.image8().cloned()
    }

    /// Thumbnail of the whole photo.
    pub fn render_navigator(&mut self) -> Option<Image8> {
        let request = self.surface_request();
        let response = self
            .engine
            .get_image8(&self.graph, self.navigator.end(), &request);
        self.navigator_dirty = false;
        response.image8().cloned()
    }

    /// Colour picker data under canvas point (`x`, `y`).
    ///
    /// Served from the view's caches with a quick request.
    pub fn pixel_probe(&self, x: i32, y: i32) -> Option<PixelProbe> {
        let view = self.layout.view_at(x, y);
        let placement = self.placement(view)?;
        if !placement.contains_point(x, y) {
            return None;
        }
        let (lx, ly) = (x - placement.x, y - placement.y);
        let binding = self.bindings.get(view)?;

        let mut request = binding.request.with_quality(Quality::Quick);
        request.set_roi(if self.zoom_to_fit {
            None
        } else {
            Some(Rect::new(lx - 1, ly - 1, 3, 3))
        });

        let response = self
            .engine
            .get_image(&self.graph, binding.chain.cache1, &request);
        let image = response.image()?;
        let origin = response.region().unwrap_or_else(|| image.bounds());
        let (ix, iy) = ((lx - origin.x) as i64, (ly - origin.y) as i64);
        let center = image.pixel_clamped(ix, iy);
        let pixel = [center[0], center[1], center[2]];
        let mut sum = [0f32; 3];
        for dy in -1..=1 {
            for dx in -1..=1 {
                let px = image.pixel_clamped(ix + dx, iy + dy);
                for c in 0..3 {
                    sum[c] += px[c] as f32;
                }
            }
        }
        let average = sum.map(|s| s / 9.0 / u16::MAX as f32);

        let mut display = request;
        if let Some(space) = self.color_space_or_srgb(&self.config.exposure_colorspace) {
            display.set_param(PARAM_COLORSPACE, Value::ColorSpace(space));
        }
        let response8 = self
            .engine
            .get_image8(&self.graph, binding.chain.cache3, &display);
        let pixel8 = response8
            .image8()
            .map(|image| {
                let origin = response8.region().unwrap_or_else(|| image.bounds());
                let px = image.pixel_clamped((lx - origin.x) as i64, (ly - origin.y) as i64);
                [px[0], px[1], px[2]]
            })
            .unwrap_or_default();

        Some(PixelProbe {
            view,
            x: lx,
            y: ly,
            pixel,
            average,
            pixel8,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DevelopSettings, Profile};
    use crate::filters::builtin::testing::{flat, gradient};

    struct TestPhoto {
        image: Image16,
        crop: Option<CropRect>,
        angle: f64,
        orientation: u8,
        lens: Option<f64>,
        settings: [SettingsRef; 3],
        profile: Option<ProfileRef>,
    }

    impl TestPhoto {
        fn new(image: Image16) -> Self {
            Self {
                image,
                crop: None,
                angle: 0.0,
                orientation: 0,
                lens: None,
                settings: std::array::from_fn(|_| Arc::new(DevelopSettings::default())),
                profile: None,
            }
        }
    }

    impl SourceProvider for TestPhoto {
        fn image(&self) -> Option<Image16> {
            Some(self.image.clone())
        }

        fn crop(&self) -> Option<CropRect> {
            self.crop
        }

        fn angle(&self) -> f64 {
            self.angle
        }

        fn orientation(&self) -> u8 {
            self.orientation
        }

        fn settings(&self, snapshot: Snapshot) -> SettingsRef {
            self.settings[snapshot.index()].clone()
        }

        fn profile(&self) -> Option<ProfileRef> {
            self.profile.clone()
        }

        fn lens_distortion(&self) -> Option<f64> {
            self.lens
        }
    }

    fn pipeline(config: PipelineConfig, canvas: Size) -> PreviewPipeline {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut pipeline = PreviewPipeline::new(config).unwrap();
        pipeline.set_canvas_size(canvas).unwrap();
        pipeline
    }

    fn qualities(events: &[PaintEvent], view: usize) -> Vec<Quality> {
        events
            .iter()
            .filter_map(|e| match e {
                PaintEvent::Image { view: v, quality, .. } if *v == view => Some(*quality),
                _ => None,
            })
            .collect()
    }

    fn last_image(events: &[PaintEvent], view: usize) -> Image8 {
        events
            .iter()
            .rev()
            .find_map(|e| match e {
                PaintEvent::Image { view: v, image, .. } if *v == view => Some(image.clone()),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_two_pass_quick_then_full() {
        let mut p = pipeline(PipelineConfig::default(), Size::new(216, 166));
        p.set_photo(Some(Arc::new(TestPhoto::new(gradient(400, 300))))).unwrap();

        let mut events: Vec<PaintEvent> = Vec::new();
        p.render(&mut events);
        assert!(matches!(events[0], PaintEvent::Background { area } if area == Rect::new(0, 0, 216, 166)));
        assert_eq!(qualities(&events, 0), vec![Quality::Quick, Quality::Full]);
        for event in &events[1..] {
            assert_eq!(event.area(), Rect::new(8, 8, 200, 150));
        }
        assert_eq!(last_image(&events, 0).size(), Size::new(200, 150));
        assert_eq!(p.binding(0).unwrap().last_roi(), Some(Rect::new(0, 0, 200, 150)));

        let mut again: Vec<PaintEvent> = Vec::new();
        assert_eq!(p.render(&mut again), 0);
        assert!(again.is_empty());
    }

    #[test]
    fn test_keep_quick_suppresses_refine() {
        let mut p = pipeline(PipelineConfig::default(), Size::new(216, 166));
        p.quick_start(true);
        p.set_photo(Some(Arc::new(TestPhoto::new(gradient(400, 300))))).unwrap();

        let mut events: Vec<PaintEvent> = Vec::new();
        p.render(&mut events);
        assert_eq!(qualities(&events, 0), vec![Quality::Quick]);
        assert!(p.is_idle());

        p.quick_end();
        let mut events: Vec<PaintEvent> = Vec::new();
        p.render(&mut events);
        assert_eq!(qualities(&events, 0), vec![Quality::Quick, Quality::Full]);
    }

    #[test]
    fn test_cancellation_drops_refine() {
        let mut p = pipeline(PipelineConfig::default(), Size::new(216, 166));
        p.set_photo(Some(Arc::new(TestPhoto::new(gradient(400, 300))))).unwrap();
        p.cancel_token().cancel();

        let mut events: Vec<PaintEvent> = Vec::new();
        p.render(&mut events);
        assert_eq!(qualities(&events, 0), vec![Quality::Quick]);
        assert_eq!(p.dropped_refinements(), 1);

        // a new photo starts uncancelled
        p.set_photo(Some(Arc::new(TestPhoto::new(gradient(400, 300))))).unwrap();
        assert!(!p.cancel_token().is_cancelled());
    }

    #[test]
    fn test_views_are_independent() {
        let mut p = pipeline(PipelineConfig::default().with_views(2), Size::new(820, 316));
        let mut photo = TestPhoto::new(gradient(400, 300));
        photo.settings[1] = Arc::new(DevelopSettings {
            exposure: 1.0,
            ..Default::default()
        });
        photo.settings[2] = Arc::new(DevelopSettings {
            contrast: 1.5,
            ..Default::default()
        });
        p.set_photo(Some(Arc::new(photo))).unwrap();
        assert_eq!(p.snapshot(1), Some(Snapshot::B));

        let mut first: Vec<PaintEvent> = Vec::new();
        p.render(&mut first);
        let view0 = *p.view_chain(0).unwrap();
        let view1 = *p.view_chain(1).unwrap();
        let before = last_image(&first, 1);
        let evaluated0 = p.engine().evaluation_count(view0.profile);
        let evaluated1 = p.engine().evaluation_count(view1.profile);

        p.set_snapshot(0, Snapshot::C).unwrap();
        p.handle_changes();
        match p.dirty_region() {
            DirtyRegion::Area(area) => assert!(p.layout().cell(0).contains_rect(&area)),
            other => panic!("expected view 0 only, got {:?}", other),
        }

        p.invalidate(None);
        let mut second: Vec<PaintEvent> = Vec::new();
        p.render(&mut second);
        assert_eq!(p.engine().evaluation_count(view1.profile), evaluated1);
        assert!(p.engine().evaluation_count(view0.profile) > evaluated0);
        assert_eq!(last_image(&second, 1).to_packed(), before.to_packed());
    }

    #[test]
    fn test_source_swap_reaches_both_views() {
        let mut p = pipeline(PipelineConfig::default().with_views(2), Size::new(820, 316));
        p.set_photo(Some(Arc::new(TestPhoto::new(gradient(400, 300))))).unwrap();
        p.render(&mut Vec::<PaintEvent>::new());
        p.take_changed(0);
        p.take_changed(1);
        let crops: Vec<NodeId> = (0..2).map(|v| p.view_chain(v).unwrap().crop).collect();
        let before: Vec<u64> = crops.iter().map(|id| p.engine().evaluation_count(*id)).collect();

        p.set_source_image(Some(flat(400, 300, 5000))).unwrap();
        let mut events: Vec<PaintEvent> = Vec::new();
        p.render(&mut events);

        for view in 0..2 {
            assert!(p.take_changed(view).contains(ChangedMask::PIXELS));
            assert!(p.engine().evaluation_count(crops[view]) > before[view]);
            assert!(!qualities(&events, view).is_empty());
        }
    }

    #[test]
    fn test_region_change_is_translated_to_canvas() {
        let mut p = pipeline(PipelineConfig::default(), Size::new(400, 300));
        p.set_photo(Some(Arc::new(TestPhoto::new(gradient(100, 80))))).unwrap();
        p.set_zoom_to_fit(false).unwrap();
        p.render(&mut Vec::<PaintEvent>::new());
        assert_eq!(p.placement(0), Some(Rect::new(150, 110, 100, 80)));

        p.source_region_changed(Rect::new(10, 10, 5, 5)).unwrap();
        p.handle_changes();
        assert_eq!(p.dirty_region(), DirtyRegion::Area(Rect::new(160, 120, 5, 5)));

        let mut events: Vec<PaintEvent> = Vec::new();
        p.render(&mut events);
        let image = last_image(&events, 0);
        assert_eq!(image.size(), Size::new(5, 5));
        assert_eq!(p.binding(0).unwrap().last_roi(), Some(Rect::new(10, 10, 5, 5)));
    }

    #[test]
    fn test_proposed_crop_adoption() {
        let mut p = pipeline(PipelineConfig::default(), Size::new(216, 166));
        p.set_photo(Some(Arc::new(TestPhoto::new(gradient(400, 300))))).unwrap();
        p.render(&mut Vec::<PaintEvent>::new());
        // a straight frame without lens correction has nothing to trim
        assert_eq!(p.proposed_crop(), None);

        let mut corrected = TestPhoto::new(gradient(400, 300));
        corrected.lens = Some(0.2);
        corrected.orientation = 1;
        p.set_photo(Some(Arc::new(corrected))).unwrap();
        assert_eq!(p.proposed_crop(), None);
        p.render(&mut Vec::<PaintEvent>::new());
        let crop = p.proposed_crop().unwrap();
        // stored unrotated: landscape although the view shows a portrait frame
        assert!(crop.x2 - crop.x1 > crop.y2 - crop.y1);
        assert!(crop.x1 > 0 && crop.y1 > 0 && crop.x2 < 400 && crop.y2 < 300);
        assert_eq!(crop.x1, 400 - crop.x2);
        assert_eq!(crop.y1, 300 - crop.y2);

        let mut cropped = TestPhoto::new(gradient(400, 300));
        cropped.lens = Some(0.2);
        cropped.crop = Some(CropRect::new(0, 0, 200, 200));
        p.set_photo(Some(Arc::new(cropped))).unwrap();
        p.render(&mut Vec::<PaintEvent>::new());
        assert_eq!(p.proposed_crop(), None);
    }

    #[test]
    fn test_pixel_probe() {
        let p = {
            let mut p = pipeline(PipelineConfig::default(), Size::new(216, 166));
            p.set_photo(Some(Arc::new(TestPhoto::new(flat(400, 300, 20000))))).unwrap();
            p
        };
        let probe = p.pixel_probe(18, 28).unwrap();
        assert_eq!((probe.view, probe.x, probe.y), (0, 10, 20));
        for c in 0..3 {
            assert!((probe.pixel[c] as i32 - 20000).abs() <= 2);
            assert!((probe.average[c] - 20000.0 / 65535.0).abs() < 1e-3);
        }
        assert!(probe.pixel8.iter().any(|&v| v > 0));

        // inside the padding
        assert!(p.pixel_probe(2, 2).is_none());
    }

    #[test]
    fn test_loupe_and_navigator() {
        let mut p = pipeline(PipelineConfig::default().with_loupe_size(64), Size::new(216, 166));
        p.set_photo(Some(Arc::new(TestPhoto::new(gradient(400, 300))))).unwrap();

        p.set_loupe(Some(0)).unwrap();
        let view0 = *p.view_chain(0).unwrap();
        assert!(p.loupe_chain().is_attached_to(p.graph(), &view0));
        let loupe = p.render_loupe(108, 83).unwrap();
        assert_eq!(loupe.size(), Size::new(64, 64));
        assert!(!p.loupe_needs_redraw());

        let navigator = p.render_navigator().unwrap();
        assert_eq!(navigator.width(), 250);
        assert!(navigator.height() <= 250);

        p.set_zoom_to_fit(false).unwrap();
        assert_eq!(p.loupe_view(), None);
        assert!(p.render_loupe(108, 83).is_none());
        assert!(matches!(p.set_loupe(Some(1)), Err(LucidaError::InvalidView(1))));
    }

    #[test]
    fn test_set_input_rewires_views_and_navigator() {
        let mut p = pipeline(PipelineConfig::default(), Size::new(216, 166));
        p.set_photo(Some(Arc::new(TestPhoto::new(gradient(400, 300))))).unwrap();
        p.render(&mut Vec::<PaintEvent>::new());
        assert!(p.is_idle());

        let registry = FilterRegistry::with_builtins();
        let stage = p.add_input_stage(registry.create("identity").unwrap(), None).unwrap();
        let fast = p.add_input_stage(registry.create("identity").unwrap(), None).unwrap();
        p.set_input(stage, Some(fast)).unwrap();
        for view in 0..MAX_VIEWS {
            let lens = p.view_chain(view).unwrap().lens;
            assert_eq!(p.graph().upstream(lens).unwrap(), Some(stage));
        }
        let scale = p.navigator_chain().scale;
        assert_eq!(p.graph().upstream(scale).unwrap(), Some(fast));
        assert!(p.graph().get_node(stage).unwrap().is_shared());
        assert!(p.navigator_needs_redraw());

        assert!(!p.is_idle());
        let mut events: Vec<PaintEvent> = Vec::new();
        p.render(&mut events);
        assert_eq!(qualities(&events, 0).last(), Some(&Quality::Full));

        let source = p.source_node();
        p.set_input(source, None).unwrap();
        let lens = p.view_chain(0).unwrap().lens;
        assert_eq!(p.graph().upstream(lens).unwrap(), Some(source));
        assert_eq!(p.graph().upstream(scale).unwrap(), Some(source));
    }

    /// A photo whose pixels arrive after it is shown.
    struct LatePhoto {
        inner: TestPhoto,
    }

    impl SourceProvider for LatePhoto {
        fn image(&self) -> Option<Image16> {
            None
        }

        fn crop(&self) -> Option<CropRect> {
            self.inner.crop()
        }

        fn angle(&self) -> f64 {
            self.inner.angle()
        }

        fn orientation(&self) -> u8 {
            self.inner.orientation()
        }

        fn settings(&self, snapshot: Snapshot) -> SettingsRef {
            self.inner.settings(snapshot)
        }
    }

    #[test]
    fn test_late_decode_rescales_navigator_crop() {
        let crop = Some(CropRect::new(100, 100, 300, 300));
        let mut eager = TestPhoto::new(gradient(1000, 800));
        eager.crop = crop;
        let mut p = pipeline(PipelineConfig::default(), Size::new(216, 166));
        p.set_photo(Some(Arc::new(eager))).unwrap();
        let navigator_crop = p.navigator_chain().crop;
        let expected = p.graph().get_node(navigator_crop).unwrap().get_parameter("rectangle").cloned();
        assert_eq!(expected, Some(Value::Rect(CropRect::new(50, 50, 150, 150))));
        let expected_size = p.render_navigator().unwrap().size();

        let mut inner = TestPhoto::new(gradient(1000, 800));
        inner.crop = crop;
        let mut late = pipeline(PipelineConfig::default(), Size::new(216, 166));
        late.set_photo(Some(Arc::new(LatePhoto { inner }))).unwrap();
        late.set_source_image(Some(gradient(1000, 800))).unwrap();
        let navigator_crop = late.navigator_chain().crop;
        let rectangle = late.graph().get_node(navigator_crop).unwrap().get_parameter("rectangle").cloned();
        assert_eq!(rectangle, expected);
        assert_eq!(late.render_navigator().unwrap().size(), expected_size);
    }

    #[test]
    fn test_blank_paints_background() {
        let mut p = pipeline(PipelineConfig::default(), Size::new(216, 166));
        p.set_photo(Some(Arc::new(TestPhoto::new(gradient(400, 300))))).unwrap();
        p.render(&mut Vec::<PaintEvent>::new());

        p.blank().unwrap();
        let mut events: Vec<PaintEvent> = Vec::new();
        p.render(&mut events);
        assert!(!events.is_empty());
        assert!(events.iter().all(|e| matches!(e, PaintEvent::Background { .. })));

        p.unblank().unwrap();
        let mut events: Vec<PaintEvent> = Vec::new();
        p.render(&mut events);
        assert!(!qualities(&events, 0).is_empty());
    }

    #[test]
    fn test_split_and_zoom() {
        let mut p = pipeline(PipelineConfig::default(), Size::new(808, 600));
        p.set_split(true).unwrap();
        assert_eq!(p.views(), 2);
        for view in 0..2 {
            let resample = p.view_chain(view).unwrap().resample;
            let node = p.graph().get_node(resample).unwrap();
            assert_eq!(node.get_parameter("width"), Some(&Value::Integer(386)));
            assert_eq!(node.get_parameter("height"), Some(&Value::Integer(584)));
        }

        p.set_zoom_to_fit(false).unwrap();
        assert_eq!(p.views(), 1);
        let resample = p.view_chain(0).unwrap().resample;
        assert!(!p.graph().get_node(resample).unwrap().is_enabled());

        p.set_split(true).unwrap();
        assert!(p.zoom_to_fit());
        assert!(p.graph().get_node(resample).unwrap().is_enabled());
        assert!(matches!(p.set_snapshot(5, Snapshot::A), Err(LucidaError::InvalidView(5))));
    }

    #[test]
    fn test_colorspace_follows_mask() {
        let config = PipelineConfig {
            exposure_colorspace: "linear".into(),
            ..Default::default()
        };
        let mut p = pipeline(config, Size::new(216, 166));
        let id = |p: &PreviewPipeline| p.view_request(0).unwrap().color_space().unwrap().id().to_string();
        assert_eq!(id(&p), "srgb");

        p.set_display_colorspace("adobergb");
        assert_eq!(id(&p), "adobergb");
        p.set_exposure_mask(true).unwrap();
        assert_eq!(id(&p), "linear");
        let mask = p.view_chain(0).unwrap().mask;
        assert_eq!(
            p.graph().get_node(mask).unwrap().get_parameter("exposure-mask"),
            Some(&Value::Boolean(true))
        );
        p.set_exposure_mask(false).unwrap();
        assert_eq!(id(&p), "adobergb");
    }

    #[test]
    fn test_profile_routing() {
        let mut p = pipeline(PipelineConfig::default(), Size::new(216, 166));
        let mut photo = TestPhoto::new(gradient(40, 30));
        photo.profile = Some(Arc::new(Profile::new("camera", ProfileKind::Dcp)));
        p.set_photo(Some(Arc::new(photo))).unwrap();

        let profile = p.view_chain(0).unwrap().profile;
        let node = p.graph().get_node(profile).unwrap();
        assert_eq!(node.get_parameter("use-profile"), Some(&Value::Boolean(true)));
        assert!(matches!(node.get_parameter("profile"), Some(Value::Profile(p)) if p.id == "camera"));

        let mut photo = TestPhoto::new(gradient(40, 30));
        photo.profile = Some(Arc::new(Profile::new("monitor", ProfileKind::Icc)));
        p.set_photo(Some(Arc::new(photo))).unwrap();
        let node = p.graph().get_node(profile).unwrap();
        assert_eq!(node.get_parameter("use-profile"), Some(&Value::Boolean(false)));
        let navigator = p.graph().get_node(p.navigator_chain().profile).unwrap();
        assert_eq!(navigator.get_parameter("use-profile"), Some(&Value::Boolean(false)));
    }
}
