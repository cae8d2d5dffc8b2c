//! Per-document playground state: the live, constructor-injected container
//! the view operates on, and the reduced snapshot form that goes to disk.
//!
//! The snapshot type deliberately has no field that could hold mask or logit
//! bytes — candidates are ephemeral and are regenerated by re-running
//! inference from the saved prompts.

use serde::{Deserialize, Serialize};

use crate::mask::MaskCandidate;
use crate::prompts::{BoxMode, BoxPrompt, PointPrompt, PromptSet};
use crate::select::SmartSelect;

/// Current persisted-snapshot schema. Anything else loads as "no state".
pub const SCHEMA_VERSION: u32 = 1;

/// How the user is currently prompting.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum InputMode {
    #[default]
    Point,
    Box,
    Text,
}

/// What the confirmed selection is exported as.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum OutputMode {
    #[default]
    Pixel,
    Polygon,
}

/// One completed interactive run, kept for the results list. Masks are not
/// retained — only the prompts needed to reproduce them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunRecord {
    pub timestamp: f64,
    pub points: Vec<PointPrompt>,
    pub boxes: Vec<BoxPrompt>,
    pub candidate_count: usize,
    pub best_iou: f32,
    pub processing_time_ms: f32,
}

/// Reduced, binary-free form of the playground written to disk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlaygroundSnapshot {
    #[serde(default)]
    pub schema_version: u32,
    /// Unix seconds. Required: a payload without it is treated as absent.
    pub saved_at: f64,
    #[serde(default)]
    pub input_mode: InputMode,
    #[serde(default)]
    pub output_mode: OutputMode,
    #[serde(default = "default_box_mode")]
    pub box_mode: BoxMode,
    #[serde(default = "default_confidence")]
    pub confidence_threshold: f32,
    #[serde(default = "default_complexity")]
    pub polygon_complexity: f32,
    #[serde(default = "default_text_prompts")]
    pub text_prompts: Vec<String>,
    #[serde(default)]
    pub point_prompts: Vec<PointPrompt>,
    #[serde(default)]
    pub box_prompts: Vec<BoxPrompt>,
    #[serde(default)]
    pub results: Vec<RunRecord>,
}

fn default_box_mode() -> BoxMode {
    BoxMode::Single
}

fn default_confidence() -> f32 {
    0.3
}

fn default_complexity() -> f32 {
    1.0
}

fn default_text_prompts() -> Vec<String> {
    vec![String::new()]
}

impl PlaygroundSnapshot {
    /// A snapshot with nothing worth writing.
    pub fn has_content(&self) -> bool {
        !self.results.is_empty()
            || !self.point_prompts.is_empty()
            || !self.box_prompts.is_empty()
            || self.text_prompts.iter().any(|p| !p.trim().is_empty())
    }
}

/// Live state for the active document. One instance per document view;
/// rebuilt (and re-hydrated) on every document switch so nothing ambient
/// leaks across documents.
pub struct Playground {
    pub doc_id: String,
    pub prompts: PromptSet,
    pub select: SmartSelect,
    pub input_mode: InputMode,
    pub output_mode: OutputMode,
    pub confidence_threshold: f32,
    pub polygon_complexity: f32,
    pub text_prompts: Vec<String>,
    pub results: Vec<RunRecord>,
    /// Ranked candidates from the most recent run; never persisted.
    pub candidates: Vec<MaskCandidate>,
    pub selected_candidate: Option<usize>,
    /// Prompt revision the current candidates were computed from. When the
    /// set moves past it the candidates are stale and must be dropped.
    candidates_revision: u64,
}

impl Playground {
    pub fn new(doc_id: String, max_boxes: usize) -> Self {
        Self {
            doc_id,
            prompts: PromptSet::new(max_boxes),
            select: SmartSelect::new(),
            input_mode: InputMode::default(),
            output_mode: OutputMode::default(),
            confidence_threshold: default_confidence(),
            polygon_complexity: default_complexity(),
            text_prompts: default_text_prompts(),
            results: Vec::new(),
            candidates: Vec::new(),
            selected_candidate: None,
            candidates_revision: 0,
        }
    }

    /// Restore persisted state into a fresh container.
    pub fn hydrate(&mut self, snap: PlaygroundSnapshot) {
        self.input_mode = snap.input_mode;
        self.output_mode = snap.output_mode;
        self.confidence_threshold = snap.confidence_threshold.clamp(0.0, 1.0);
        self.polygon_complexity = snap.polygon_complexity.clamp(0.0, 1.0);
        self.text_prompts = if snap.text_prompts.is_empty() {
            default_text_prompts()
        } else {
            snap.text_prompts
        };
        self.results = snap.results;
        self.prompts
            .hydrate(snap.point_prompts, snap.box_prompts, snap.box_mode);
    }

    /// Build the reduced snapshot for persistence. Candidates, mask bytes,
    /// and logits never cross this boundary.
    pub fn snapshot(&self, saved_at: f64) -> PlaygroundSnapshot {
        PlaygroundSnapshot {
            schema_version: SCHEMA_VERSION,
            saved_at,
            input_mode: self.input_mode,
            output_mode: self.output_mode,
            box_mode: self.prompts.box_mode,
            confidence_threshold: self.confidence_threshold,
            polygon_complexity: self.polygon_complexity,
            text_prompts: self.text_prompts.clone(),
            point_prompts: self.prompts.points().to_vec(),
            box_prompts: self.prompts.boxes().to_vec(),
            results: self.results.clone(),
        }
    }

    /// Install a fresh candidate list (already ranked best-first) computed
    /// at the given prompt revision.
    pub fn set_candidates(&mut self, candidates: Vec<MaskCandidate>, revision: u64) {
        self.selected_candidate = if candidates.is_empty() { None } else { Some(0) };
        self.candidates = candidates;
        self.candidates_revision = revision;
    }

    /// Stale masks must never be shown against changed prompts: call after
    /// every prompt mutation.
    pub fn invalidate_candidates_if_stale(&mut self) {
        if self.candidates_revision != self.prompts.revision() && !self.candidates.is_empty() {
            self.candidates.clear();
            self.selected_candidate = None;
        }
    }

    pub fn active_candidate(&self) -> Option<&MaskCandidate> {
        self.candidates.get(self.selected_candidate?)
    }

    pub fn record_run(
        &mut self,
        timestamp: f64,
        candidate_count: usize,
        best_iou: f32,
        processing_time_ms: f32,
    ) {
        self.results.push(RunRecord {
            timestamp,
            points: self.prompts.points().to_vec(),
            boxes: self.prompts.boxes().to_vec(),
            candidate_count,
            best_iou,
            processing_time_ms,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::PointLabel;
    use image::GrayImage;

    fn candidate_with_payload() -> MaskCandidate {
        let mut m = GrayImage::new(4, 4);
        m.put_pixel(1, 1, image::Luma([255]));
        MaskCandidate::new(
            m,
            0.92,
            None,
            Some("TElNSVRTLU1BUktFUg==".to_string()), // logits payload marker
        )
    }

    #[test]
    fn fresh_playground_matches_documented_defaults() {
        let pg = Playground::new("doc-1".into(), 16);
        assert_eq!(pg.text_prompts, vec![String::new()]);
        assert!((pg.confidence_threshold - 0.3).abs() < 1e-6);
        assert!((pg.polygon_complexity - 1.0).abs() < 1e-6);
        assert_eq!(pg.input_mode, InputMode::Point);
        assert_eq!(pg.output_mode, OutputMode::Pixel);
    }

    #[test]
    fn empty_snapshot_has_no_content() {
        let pg = Playground::new("doc-1".into(), 16);
        assert!(!pg.snapshot(123.0).has_content());
    }

    #[test]
    fn snapshot_with_prompt_has_content() {
        let mut pg = Playground::new("doc-1".into(), 16);
        pg.prompts.add_point(120.0, 80.0, PointLabel::Positive);
        let snap = pg.snapshot(123.0);
        assert!(snap.has_content());
        assert_eq!(snap.point_prompts.len(), 1);
        assert_eq!(snap.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn blank_text_prompts_do_not_count_as_content() {
        let mut pg = Playground::new("doc-1".into(), 16);
        pg.text_prompts = vec!["  ".into(), String::new()];
        assert!(!pg.snapshot(1.0).has_content());
        pg.text_prompts = vec!["title block".into()];
        assert!(pg.snapshot(1.0).has_content());
    }

    #[test]
    fn serialized_snapshot_never_carries_mask_payloads() {
        let mut pg = Playground::new("doc-1".into(), 16);
        pg.prompts.add_point(120.0, 80.0, PointLabel::Positive);
        pg.set_candidates(vec![candidate_with_payload()], pg.prompts.revision());
        pg.record_run(10.0, 1, 0.92, 45.0);
        let json = serde_json::to_string(&pg.snapshot(11.0)).unwrap();
        assert!(!json.contains("TElNSVRTLU1BUktFUg=="));
        assert!(!json.contains("mask_base64"));
        assert!(!json.contains("logits"));
    }

    #[test]
    fn prompt_mutation_invalidates_candidates() {
        let mut pg = Playground::new("doc-1".into(), 16);
        pg.prompts.add_point(10.0, 10.0, PointLabel::Positive);
        pg.set_candidates(vec![candidate_with_payload()], pg.prompts.revision());
        assert!(pg.active_candidate().is_some());
        pg.prompts.add_point(20.0, 20.0, PointLabel::Negative);
        pg.invalidate_candidates_if_stale();
        assert!(pg.candidates.is_empty());
        assert!(pg.active_candidate().is_none());
    }

    #[test]
    fn hydrate_clamps_and_backfills() {
        let mut pg = Playground::new("doc-1".into(), 16);
        let snap = PlaygroundSnapshot {
            schema_version: SCHEMA_VERSION,
            saved_at: 5.0,
            input_mode: InputMode::Text,
            output_mode: OutputMode::Polygon,
            box_mode: BoxMode::Multi,
            confidence_threshold: 7.0,
            polygon_complexity: -1.0,
            text_prompts: Vec::new(),
            point_prompts: Vec::new(),
            box_prompts: Vec::new(),
            results: Vec::new(),
        };
        pg.hydrate(snap);
        assert!((pg.confidence_threshold - 1.0).abs() < 1e-6);
        assert!((pg.polygon_complexity - 0.0).abs() < 1e-6);
        assert_eq!(pg.text_prompts, vec![String::new()]);
        assert_eq!(pg.prompts.box_mode, BoxMode::Multi);
    }
}
