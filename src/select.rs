//! Smart-select lifecycle: mask selection, bounded undo/redo history, and
//! the hook points for async polygon derivation.
//!
//! History mutations are synchronous — undo/redo reflect the call
//! immediately, there is never an async gap between the user action and the
//! history state. Polygon extraction, by contrast, runs on a background
//! thread and commits through [`SmartSelect::commit_polygon`] only after the
//! app has checked its generation token.

use crate::mask::MaskCandidate;
use crate::polygon::PolygonData;
use crate::prompts::{BoxPrompt, PointPrompt};

/// Ring bound on selection history.
pub const HISTORY_CAP: usize = 20;

/// Lifecycle of a mask selection.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SelectPhase {
    Idle,
    Initial,
    Refining,
    Confirmed,
}

/// Point-in-time snapshot pushed whenever a new mask is set.
#[derive(Clone)]
pub struct HistoryEntry {
    pub mask: MaskCandidate,
    pub points: Vec<PointPrompt>,
    pub boxes: Vec<BoxPrompt>,
    pub polygon: Option<PolygonData>,
    pub timestamp: f64,
}

pub struct SmartSelect {
    phase: SelectPhase,
    mask: Option<MaskCandidate>,
    polygon: Option<PolygonData>,
    history: Vec<HistoryEntry>,
    cursor: Option<usize>,
    /// Bumped on every change to the active mask; the canvas overlay and the
    /// polygon-extraction scheduler key off it.
    mask_revision: u64,
}

impl Default for SmartSelect {
    fn default() -> Self {
        Self::new()
    }
}

impl SmartSelect {
    pub fn new() -> Self {
        Self {
            phase: SelectPhase::Idle,
            mask: None,
            polygon: None,
            history: Vec::new(),
            cursor: None,
            mask_revision: 0,
        }
    }

    pub fn phase(&self) -> SelectPhase {
        self.phase
    }

    pub fn mask(&self) -> Option<&MaskCandidate> {
        self.mask.as_ref()
    }

    pub fn polygon(&self) -> Option<&PolygonData> {
        self.polygon.as_ref()
    }

    pub fn mask_revision(&self) -> u64 {
        self.mask_revision
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn can_undo(&self) -> bool {
        matches!(self.cursor, Some(c) if c > 0)
    }

    pub fn can_redo(&self) -> bool {
        matches!(self.cursor, Some(c) if c + 1 < self.history.len())
    }

    /// Install a new active mask together with the prompts that produced it.
    /// Idle → Initial on the first call, anything else → Refining. Always
    /// pushes a history entry; any redo branch is discarded.
    pub fn set_mask(
        &mut self,
        mask: MaskCandidate,
        points: Vec<PointPrompt>,
        boxes: Vec<BoxPrompt>,
        timestamp: f64,
    ) {
        self.phase = if self.phase == SelectPhase::Idle {
            SelectPhase::Initial
        } else {
            SelectPhase::Refining
        };

        if let Some(c) = self.cursor {
            self.history.truncate(c + 1);
        } else {
            self.history.clear();
        }
        self.history.push(HistoryEntry {
            mask: mask.clone(),
            points,
            boxes,
            polygon: None,
            timestamp,
        });
        while self.history.len() > HISTORY_CAP {
            self.history.remove(0);
        }
        self.cursor = Some(self.history.len() - 1);

        self.mask = Some(mask);
        self.polygon = None;
        self.mask_revision += 1;
    }

    /// Commit an asynchronously derived polygon for the current mask and
    /// backfill the current history entry. The caller is responsible for
    /// discarding stale results before calling this.
    pub fn commit_polygon(&mut self, polygon: Option<PolygonData>) {
        self.polygon = polygon.clone();
        if let Some(c) = self.cursor
            && let Some(entry) = self.history.get_mut(c)
        {
            entry.polygon = polygon;
        }
    }

    /// Drop the derived polygon (output mode left "polygon").
    pub fn clear_polygon(&mut self) {
        self.polygon = None;
    }

    /// Step back one history entry. Returns the restored snapshot so the
    /// caller can also restore the prompt set. No-op at the oldest entry.
    pub fn undo(&mut self) -> Option<HistoryEntry> {
        let c = self.cursor?;
        if c == 0 {
            return None;
        }
        self.cursor = Some(c - 1);
        self.restore_current()
    }

    /// Step forward one history entry. No-op at the newest entry.
    pub fn redo(&mut self) -> Option<HistoryEntry> {
        let c = self.cursor?;
        if c + 1 >= self.history.len() {
            return None;
        }
        self.cursor = Some(c + 1);
        self.restore_current()
    }

    fn restore_current(&mut self) -> Option<HistoryEntry> {
        let entry = self.history.get(self.cursor?)?.clone();
        self.mask = Some(entry.mask.clone());
        self.polygon = entry.polygon.clone();
        self.phase = SelectPhase::Refining;
        self.mask_revision += 1;
        Some(entry)
    }

    /// Confirm the selection. Requires an active mask; returns it together
    /// with the derived polygon (when one exists) for the caller's
    /// finish handler.
    pub fn finish(&mut self) -> Option<(MaskCandidate, Option<PolygonData>)> {
        let mask = self.mask.clone()?;
        self.phase = SelectPhase::Confirmed;
        Some((mask, self.polygon.clone()))
    }

    /// Clear the active mask and polygon, back to Idle. History survives so
    /// an undo can still resurrect earlier selections.
    pub fn delete_selection(&mut self) {
        self.mask = None;
        self.polygon = None;
        self.phase = SelectPhase::Idle;
        self.mask_revision += 1;
    }

    /// Full wipe including history (document switch).
    pub fn reset(&mut self) {
        self.mask = None;
        self.polygon = None;
        self.history.clear();
        self.cursor = None;
        self.phase = SelectPhase::Idle;
        self.mask_revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GrayImage;

    fn candidate(iou: f32) -> MaskCandidate {
        let mut m = GrayImage::new(4, 4);
        m.put_pixel(1, 1, image::Luma([255]));
        MaskCandidate::new(m, iou, None, None)
    }

    fn set(sel: &mut SmartSelect, iou: f32, t: f64) {
        sel.set_mask(candidate(iou), Vec::new(), Vec::new(), t);
    }

    #[test]
    fn phase_walks_idle_initial_refining() {
        let mut sel = SmartSelect::new();
        assert_eq!(sel.phase(), SelectPhase::Idle);
        set(&mut sel, 0.9, 1.0);
        assert_eq!(sel.phase(), SelectPhase::Initial);
        set(&mut sel, 0.95, 2.0);
        assert_eq!(sel.phase(), SelectPhase::Refining);
    }

    #[test]
    fn confirmed_returns_to_refining_on_new_mask() {
        let mut sel = SmartSelect::new();
        set(&mut sel, 0.9, 1.0);
        sel.finish().unwrap();
        assert_eq!(sel.phase(), SelectPhase::Confirmed);
        set(&mut sel, 0.92, 2.0);
        assert_eq!(sel.phase(), SelectPhase::Refining);
    }

    #[test]
    fn history_is_ring_bounded() {
        let mut sel = SmartSelect::new();
        for i in 0..25 {
            set(&mut sel, i as f32 / 100.0, i as f64);
        }
        assert_eq!(sel.history_len(), HISTORY_CAP);
        // the oldest five were dropped: undoing all the way lands on entry 5
        while sel.can_undo() {
            sel.undo();
        }
        assert!((sel.mask().unwrap().iou_score - 0.05).abs() < 1e-6);
    }

    #[test]
    fn undo_redo_round_trips() {
        let mut sel = SmartSelect::new();
        set(&mut sel, 0.5, 1.0);
        set(&mut sel, 0.8, 2.0);
        let before = sel.mask().unwrap().iou_score;
        sel.undo().unwrap();
        assert!((sel.mask().unwrap().iou_score - 0.5).abs() < 1e-6);
        assert_eq!(sel.phase(), SelectPhase::Refining);
        sel.redo().unwrap();
        assert!((sel.mask().unwrap().iou_score - before).abs() < 1e-6);
    }

    #[test]
    fn push_after_undo_discards_redo_branch() {
        let mut sel = SmartSelect::new();
        set(&mut sel, 0.5, 1.0);
        set(&mut sel, 0.6, 2.0);
        set(&mut sel, 0.7, 3.0);
        sel.undo().unwrap();
        sel.undo().unwrap();
        assert!(sel.can_redo());
        set(&mut sel, 0.9, 4.0);
        assert!(!sel.can_redo());
        assert!(sel.redo().is_none());
        assert_eq!(sel.history_len(), 2);
    }

    #[test]
    fn undo_at_oldest_and_redo_at_newest_are_noops() {
        let mut sel = SmartSelect::new();
        assert!(sel.undo().is_none());
        assert!(sel.redo().is_none());
        set(&mut sel, 0.5, 1.0);
        assert!(sel.undo().is_none());
        assert!(sel.redo().is_none());
    }

    #[test]
    fn finish_requires_mask() {
        let mut sel = SmartSelect::new();
        assert!(sel.finish().is_none());
        assert_eq!(sel.phase(), SelectPhase::Idle);
    }

    #[test]
    fn delete_keeps_history_reset_wipes_it() {
        let mut sel = SmartSelect::new();
        set(&mut sel, 0.5, 1.0);
        set(&mut sel, 0.6, 2.0);
        sel.delete_selection();
        assert_eq!(sel.phase(), SelectPhase::Idle);
        assert!(sel.mask().is_none());
        assert_eq!(sel.history_len(), 2);
        sel.reset();
        assert_eq!(sel.history_len(), 0);
        assert!(sel.undo().is_none());
    }

    #[test]
    fn new_mask_invalidates_polygon_until_commit() {
        let mut sel = SmartSelect::new();
        set(&mut sel, 0.5, 1.0);
        let poly = crate::polygon::extract_polygons(&sel.mask().unwrap().mask, 1.0);
        assert!(poly.is_some());
        sel.commit_polygon(poly.clone());
        assert!(sel.polygon().is_some());
        set(&mut sel, 0.6, 2.0);
        assert!(sel.polygon().is_none());
        // undo restores the entry together with its backfilled polygon
        sel.undo().unwrap();
        assert!(sel.polygon().is_some());
    }
}
