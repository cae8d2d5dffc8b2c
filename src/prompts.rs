//! Point and box prompts placed by the user in image pixel space.
//!
//! Every mutation bumps a revision counter; the app layer watches it to drop
//! stale mask candidates and reschedule inference, so a mask is never shown
//! against a prompt set it was not computed from.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Binary inclusion/exclusion signal for a click prompt.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum PointLabel {
    Positive,
    Negative,
}

impl PointLabel {
    /// Wire encoding: 1 = include, 0 = exclude.
    pub fn as_i32(self) -> i32 {
        match self {
            PointLabel::Positive => 1,
            PointLabel::Negative => 0,
        }
    }
}

/// A click prompt. Immutable once placed; removed by id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PointPrompt {
    pub id: Uuid,
    pub x: f32,
    pub y: f32,
    pub label: PointLabel,
}

/// A rectangle prompt. Corners are normalized so `x1 < x2` and `y1 < y2`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BoxPrompt {
    pub id: Uuid,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoxPrompt {
    /// Build from any two opposite corners.
    pub fn from_corners(ax: f32, ay: f32, bx: f32, by: f32) -> Self {
        Self {
            id: Uuid::new_v4(),
            x1: ax.min(bx),
            y1: ay.min(by),
            x2: ax.max(bx),
            y2: ay.max(by),
        }
    }

    pub fn as_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

/// Whether drawing a new box replaces the previous one or accumulates.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum BoxMode {
    Single,
    Multi,
}

/// The accumulated prompt set for the active document.
#[derive(Clone, Debug)]
pub struct PromptSet {
    points: Vec<PointPrompt>,
    boxes: Vec<BoxPrompt>,
    pub box_mode: BoxMode,
    max_boxes: usize,
    revision: u64,
}

impl PromptSet {
    pub fn new(max_boxes: usize) -> Self {
        Self {
            points: Vec::new(),
            boxes: Vec::new(),
            box_mode: BoxMode::Single,
            max_boxes: max_boxes.max(1),
            revision: 0,
        }
    }

    /// Monotonic counter, bumped by every mutation of the set.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn points(&self) -> &[PointPrompt] {
        &self.points
    }

    pub fn boxes(&self) -> &[BoxPrompt] {
        &self.boxes
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.boxes.is_empty()
    }

    pub fn add_point(&mut self, x: f32, y: f32, label: PointLabel) -> Uuid {
        let p = PointPrompt {
            id: Uuid::new_v4(),
            x,
            y,
            label,
        };
        let id = p.id;
        self.points.push(p);
        self.revision += 1;
        id
    }

    pub fn remove_point(&mut self, id: Uuid) -> bool {
        let before = self.points.len();
        self.points.retain(|p| p.id != id);
        if self.points.len() != before {
            self.revision += 1;
            true
        } else {
            false
        }
    }

    pub fn clear_points(&mut self) {
        if !self.points.is_empty() {
            self.points.clear();
            self.revision += 1;
        }
    }

    /// Add a box. In `Single` mode the new box replaces the list; in `Multi`
    /// mode boxes accumulate up to the configured cap (oldest dropped).
    pub fn add_box(&mut self, b: BoxPrompt) -> Uuid {
        let id = b.id;
        match self.box_mode {
            BoxMode::Single => {
                self.boxes.clear();
                self.boxes.push(b);
            }
            BoxMode::Multi => {
                self.boxes.push(b);
                while self.boxes.len() > self.max_boxes {
                    self.boxes.remove(0);
                }
            }
        }
        self.revision += 1;
        id
    }

    pub fn remove_box(&mut self, id: Uuid) -> bool {
        let before = self.boxes.len();
        self.boxes.retain(|b| b.id != id);
        if self.boxes.len() != before {
            self.revision += 1;
            true
        } else {
            false
        }
    }

    pub fn clear_boxes(&mut self) {
        if !self.boxes.is_empty() {
            self.boxes.clear();
            self.revision += 1;
        }
    }

    /// Wipe everything (mode reset / document switch).
    pub fn clear_all(&mut self) {
        if !self.is_empty() {
            self.points.clear();
            self.boxes.clear();
            self.revision += 1;
        }
    }

    /// Replace contents from a persisted snapshot without disturbing the
    /// revision semantics (hydration still counts as a change).
    pub fn hydrate(&mut self, points: Vec<PointPrompt>, boxes: Vec<BoxPrompt>, mode: BoxMode) {
        self.points = points;
        self.boxes = boxes;
        self.box_mode = mode;
        self.revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_corners_normalize() {
        let b = BoxPrompt::from_corners(50.0, 80.0, 10.0, 20.0);
        assert_eq!((b.x1, b.y1, b.x2, b.y2), (10.0, 20.0, 50.0, 80.0));
    }

    #[test]
    fn single_mode_replaces_box() {
        let mut set = PromptSet::new(16);
        set.add_box(BoxPrompt::from_corners(0.0, 0.0, 10.0, 10.0));
        let second = set.add_box(BoxPrompt::from_corners(5.0, 5.0, 20.0, 20.0));
        assert_eq!(set.boxes().len(), 1);
        assert_eq!(set.boxes()[0].id, second);
    }

    #[test]
    fn multi_mode_accumulates_up_to_cap() {
        let mut set = PromptSet::new(2);
        set.box_mode = BoxMode::Multi;
        set.add_box(BoxPrompt::from_corners(0.0, 0.0, 1.0, 1.0));
        set.add_box(BoxPrompt::from_corners(1.0, 1.0, 2.0, 2.0));
        assert_eq!(set.boxes().len(), 2);
        // cap drops the oldest
        let third = set.add_box(BoxPrompt::from_corners(2.0, 2.0, 3.0, 3.0));
        assert_eq!(set.boxes().len(), 2);
        assert_eq!(set.boxes()[1].id, third);
    }

    #[test]
    fn every_mutation_bumps_revision() {
        let mut set = PromptSet::new(16);
        let r0 = set.revision();
        let id = set.add_point(1.0, 2.0, PointLabel::Positive);
        assert!(set.revision() > r0);
        let r1 = set.revision();
        assert!(set.remove_point(id));
        assert!(set.revision() > r1);
        // removing a missing id is not a mutation
        let r2 = set.revision();
        assert!(!set.remove_point(id));
        assert_eq!(set.revision(), r2);
        // clearing an already-empty set is not a mutation either
        set.clear_points();
        assert_eq!(set.revision(), r2);
    }

    #[test]
    fn negative_label_wire_encoding() {
        assert_eq!(PointLabel::Positive.as_i32(), 1);
        assert_eq!(PointLabel::Negative.as_i32(), 0);
    }
}
