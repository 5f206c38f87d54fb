//! Quick/full refinement scheduling.
//!
//! Every dirty canvas area becomes a [`RenderTask`]. A task is first painted
//! at whatever quality its view currently asks for; when that paint came
//! from a quick render, a refine task for the same area is queued behind
//! everything already waiting, so other areas get their first paint before
//! any area gets its second.

use crate::core::context::CancelToken;
use crate::core::geometry::Rect;
use crate::core::image::Image8;
use crate::execution::request::Quality;
use log::debug;
use std::collections::VecDeque;

/// Where a task is in its two-pass life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefineState {
    /// Not painted yet; render at the view's current quality
    Pending,
    /// Painted from a quick render; render again at full quality
    Refine,
}

/// One area of one view to paint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTask {
    pub view: usize,
    /// Canvas coordinates.
    pub area: Rect,
    pub state: RefineState,
}

/// Something handed to the consumer.
#[derive(Debug, Clone)]
pub enum PaintEvent {
    /// Pixels for `area` (canvas coordinates) of `view`.
    Image {
        view: usize,
        area: Rect,
        image: Image8,
        quality: Quality,
    },
    /// Nothing to show in `area`: no photo, or the source is not ready yet.
    Background { area: Rect },
}

impl PaintEvent {
    pub fn area(&self) -> Rect {
        match self {
            PaintEvent::Image { area, .. } | PaintEvent::Background { area } => *area,
        }
    }

    pub fn quality(&self) -> Option<Quality> {
        match self {
            PaintEvent::Image { quality, .. } => Some(*quality),
            PaintEvent::Background { .. } => None,
        }
    }
}

/// Receiver of paint events, implemented by the canvas.
pub trait PaintSink {
    fn paint(&mut self, event: PaintEvent);
}

impl PaintSink for Vec<PaintEvent> {
    fn paint(&mut self, event: PaintEvent) {
        self.push(event);
    }
}

/// FIFO of render tasks.
///
/// A task whose area overlaps or borders a queued task of the same view and
/// state is merged into it; distant areas stay separate tasks.
#[derive(Debug, Default)]
pub struct RefineScheduler {
    queue: VecDeque<RenderTask>,
    dropped: u64,
}

impl RefineScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn enqueue(&mut self, view: usize, area: Rect, state: RefineState) {
        if area.is_empty() {
            return;
        }
        match self
            .queue
            .iter_mut()
            .find(|t| t.view == view && t.state == state && t.area.touches(&area))
        {
            Some(task) => task.area = task.area.union(&area),
            None => self.queue.push_back(RenderTask { view, area, state }),
        }
    }

    /// Queue a first paint of `area`.
    pub fn schedule(&mut self, view: usize, area: Rect) {
        self.enqueue(view, area, RefineState::Pending);
    }

    /// Queue the full-quality pass after a quick paint.
    ///
    /// Nothing is queued once `cancel` is set. Returns whether the refine
    /// was queued.
    pub fn schedule_refine(&mut self, view: usize, area: Rect, cancel: &CancelToken) -> bool {
        if cancel.is_cancelled() {
            debug!("Load cancelled, dropping refinement of view {} {}", view, area);
            self.dropped += 1;
            return false;
        }
        debug!("Refinement of view {} {} scheduled", view, area);
        self.enqueue(view, area, RefineState::Refine);
        true
    }

    /// Next task to run.
    ///
    /// Refine tasks are discarded silently while `cancel` is set.
    pub fn next(&mut self, cancel: &CancelToken) -> Option<RenderTask> {
        while let Some(task) = self.queue.pop_front() {
            if task.state == RefineState::Refine && cancel.is_cancelled() {
                debug!("Load cancelled, dropping refinement of view {} {}", task.view, task.area);
                self.dropped += 1;
                continue;
            }
            return Some(task);
        }
        None
    }

    /// Drop every queued refinement. Returns how many were dropped.
    pub fn cancel_refinements(&mut self) -> usize {
        let before = self.queue.len();
        self.queue.retain(|t| t.state != RefineState::Refine);
        let dropped = before - self.queue.len();
        self.dropped += dropped as u64;
        dropped
    }

    /// Forget tasks of views beyond `views`.
    pub fn retain_views(&mut self, views: usize) {
        self.queue.retain(|t| t.view < views);
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queued tasks, next first.
    pub fn tasks(&self) -> impl Iterator<Item = &RenderTask> {
        self.queue.iter()
    }

    /// Refinements abandoned because of cancellation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_and_merge() {
        let cancel = CancelToken::new();
        let mut scheduler = RefineScheduler::new();
        scheduler.schedule(0, Rect::new(0, 0, 10, 10));
        scheduler.schedule(1, Rect::new(50, 0, 10, 10));
        scheduler.schedule(0, Rect::new(5, 0, 10, 10));
        scheduler.schedule(0, Rect::new(15, 0, 5, 10));
        scheduler.schedule(0, Rect::new(0, 0, 0, 0));
        assert_eq!(scheduler.len(), 2);

        let first = scheduler.next(&cancel).unwrap();
        assert_eq!(first.view, 0);
        assert_eq!(first.area, Rect::new(0, 0, 20, 10));
        assert_eq!(scheduler.next(&cancel).unwrap().view, 1);
        assert!(scheduler.next(&cancel).is_none());
    }

    #[test]
    fn test_distant_areas_stay_separate() {
        let cancel = CancelToken::new();
        let mut scheduler = RefineScheduler::new();
        scheduler.schedule(0, Rect::new(0, 0, 10, 10));
        scheduler.schedule(0, Rect::new(500, 400, 10, 10));
        assert_eq!(scheduler.len(), 2);

        let areas: Vec<Rect> = std::iter::from_fn(|| scheduler.next(&cancel)).map(|t| t.area).collect();
        assert_eq!(areas, vec![Rect::new(0, 0, 10, 10), Rect::new(500, 400, 10, 10)]);
        let painted: u64 = areas.iter().map(|a| a.width as u64 * a.height as u64).sum();
        assert_eq!(painted, 200);
    }

    #[test]
    fn test_refine_queues_behind_pending() {
        let cancel = CancelToken::new();
        let mut scheduler = RefineScheduler::new();
        scheduler.schedule(0, Rect::new(0, 0, 10, 10));
        scheduler.schedule(1, Rect::new(20, 0, 10, 10));

        let task = scheduler.next(&cancel).unwrap();
        assert!(scheduler.schedule_refine(task.view, task.area, &cancel));
        assert_eq!(scheduler.next(&cancel).unwrap().state, RefineState::Pending);
        let refine = scheduler.next(&cancel).unwrap();
        assert_eq!((refine.view, refine.state), (0, RefineState::Refine));
    }

    #[test]
    fn test_cancellation_drops_refinements() {
        let cancel = CancelToken::new();
        let mut scheduler = RefineScheduler::new();
        assert!(scheduler.schedule_refine(0, Rect::new(0, 0, 5, 5), &cancel));
        scheduler.schedule(1, Rect::new(0, 0, 5, 5));

        cancel.cancel();
        assert!(!scheduler.schedule_refine(1, Rect::new(0, 0, 5, 5), &cancel));
        let task = scheduler.next(&cancel).unwrap();
        assert_eq!((task.view, task.state), (1, RefineState::Pending));
        assert!(scheduler.next(&cancel).is_none());
        assert_eq!(scheduler.dropped(), 2);
    }

    #[test]
    fn test_cancel_refinements_keeps_first_paints() {
        let cancel = CancelToken::new();
        let mut scheduler = RefineScheduler::new();
        scheduler.schedule(0, Rect::new(0, 0, 5, 5));
        scheduler.schedule_refine(1, Rect::new(0, 0, 5, 5), &cancel);
        assert_eq!(scheduler.cancel_refinements(), 1);
        assert_eq!(scheduler.len(), 1);
        scheduler.retain_views(0);
        assert!(scheduler.is_empty());
    }
}
