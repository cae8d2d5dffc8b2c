use eframe::egui;
use egui::{Color32, RichText, TextureHandle, TextureOptions};
use std::sync::mpsc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::canvas::{CanvasEvent, CanvasFrame, CanvasView, mask_overlay_image};
use crate::config::AppConfig;
use crate::gateway::{
    self, DocumentMetadata, FindSimilarRequest, Gateway, GatewayEvent, HealthResponse,
    InteractiveSegmentRequest, SegmentRequest, SimilarRegion, ZoneResult,
};
use crate::mask::MaskCandidate;
use crate::persist::{PlaygroundStore, SAVE_DEBOUNCE, SaveDebouncer};
use crate::playground::{InputMode, OutputMode, Playground};
use crate::polygon::PolygonData;
use crate::prompts::{BoxMode, BoxPrompt};
use crate::select::SelectPhase;
use crate::{log_err, log_info, log_warn};

/// Trailing debounce before an auto-run fires after a prompt change.
const AUTO_RUN_DEBOUNCE: f64 = 0.5;
/// Trailing debounce for polygon extraction after mask/complexity changes.
const POLYGON_DEBOUNCE: f64 = 0.25;
/// Accent used for prompt boxes, mask overlays, and polygon outlines.
const ACCENT: Color32 = Color32::from_rgb(66, 133, 244);

// ============================================================================
// ASYNC POLYGON PIPELINE — background extraction with token completion
// ============================================================================

/// Result delivered from a background polygon-extraction thread. Results
/// whose token no longer matches the app's current one are discarded.
struct PolygonResult {
    token: u64,
    polygon: Option<PolygonData>,
}

pub struct PlaygroundApp {
    config: AppConfig,
    gateway: Gateway,
    events_rx: mpsc::Receiver<GatewayEvent>,
    polygon_tx: mpsc::Sender<PolygonResult>,
    polygon_rx: mpsc::Receiver<PolygonResult>,
    store: PlaygroundStore,
    canvas: CanvasView,

    // Documents
    documents: Vec<DocumentMetadata>,
    docs_token: u64,
    docs_loading: bool,
    active_doc: Option<String>,
    playground: Option<Playground>,

    // Active page image
    page_texture: Option<TextureHandle>,
    page_size: Option<(u32, u32)>,
    page_b64: Option<String>,
    page_loading: bool,
    fit_on_next_frame: bool,

    // Mask overlay texture cache, keyed by the selection's mask revision
    mask_texture: Option<TextureHandle>,
    mask_texture_rev: u64,

    // Async generations: bumping a token orphans any in-flight response
    segment_token: u64,
    segment_dispatched_revision: u64,
    text_token: u64,
    similar_token: u64,
    polygon_token: u64,
    running_interactive: bool,
    running_text: bool,
    running_similar: bool,
    last_processing_ms: Option<f32>,

    // Polygon extraction scheduling
    polygon_pending_key: Option<(u64, u32)>,
    polygon_dispatched_key: Option<(u64, u32)>,
    polygon_deadline: Option<f64>,

    // Debounced state persistence
    save: SaveDebouncer,

    // Text-prompt zones and find-similar results (ephemeral)
    zones: Vec<ZoneResult>,
    similar_regions: Vec<SimilarRegion>,
    similar_max_results: usize,

    // Auto-run
    autorun_deadline: Option<f64>,

    // Backend health
    health: Option<HealthResponse>,
    health_error: bool,
    last_health_poll: Option<Instant>,

    /// Short inline error shown near the run controls; cleared on next run.
    error: Option<String>,
    /// One-line confirmation summary after finish().
    confirm_summary: Option<String>,
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn complexity_key(c: f32) -> u32 {
    (c.clamp(0.0, 1.0) * 1000.0).round() as u32
}

impl PlaygroundApp {
    pub fn new(_cc: &eframe::CreationContext<'_>) -> Self {
        let config = AppConfig::load();
        let (events_tx, events_rx) = mpsc::channel();
        let (polygon_tx, polygon_rx) = mpsc::channel();
        let gateway = Gateway::new(&config.backend_url, config.request_timeout_secs, events_tx);
        let store = PlaygroundStore::default_location(config.storage_budget_bytes);

        log_info!("backend: {}", gateway.base_url());

        let mut app = Self {
            config,
            gateway,
            events_rx,
            polygon_tx,
            polygon_rx,
            store,
            canvas: CanvasView::default(),
            documents: Vec::new(),
            docs_token: 0,
            docs_loading: false,
            active_doc: None,
            playground: None,
            page_texture: None,
            page_size: None,
            page_b64: None,
            page_loading: false,
            fit_on_next_frame: false,
            mask_texture: None,
            mask_texture_rev: u64::MAX,
            segment_token: 0,
            segment_dispatched_revision: 0,
            text_token: 0,
            similar_token: 0,
            polygon_token: 0,
            running_interactive: false,
            running_text: false,
            running_similar: false,
            last_processing_ms: None,
            polygon_pending_key: None,
            polygon_dispatched_key: None,
            polygon_deadline: None,
            save: SaveDebouncer::new(SAVE_DEBOUNCE),
            zones: Vec::new(),
            similar_regions: Vec::new(),
            similar_max_results: 10,
            autorun_deadline: None,
            health: None,
            health_error: false,
            last_health_poll: None,
            error: None,
            confirm_summary: None,
        };
        app.refresh_documents();
        app.gateway.poll_health();
        app.last_health_poll = Some(Instant::now());
        app
    }

    fn refresh_documents(&mut self) {
        self.docs_token += 1;
        self.docs_loading = true;
        self.gateway.fetch_documents(self.docs_token);
    }

    // ------------------------------------------------------------------
    // Document switching
    // ------------------------------------------------------------------

    fn switch_document(&mut self, doc_id: &str) {
        if self.active_doc.as_deref() == Some(doc_id) {
            return;
        }
        self.flush_pending_save();

        // Orphan every in-flight completion for the outgoing document.
        self.segment_token += 1;
        self.text_token += 1;
        self.similar_token += 1;
        self.polygon_token += 1;
        self.running_interactive = false;
        self.running_text = false;
        self.running_similar = false;

        let mut pg = Playground::new(doc_id.to_string(), self.config.max_boxes);
        match self.store.load(doc_id) {
            Some(snap) => {
                log_info!("hydrating playground for {}", doc_id);
                pg.hydrate(snap);
            }
            None => {
                log_info!("no saved playground for {}, starting fresh", doc_id);
            }
        }
        self.playground = Some(pg);
        self.active_doc = Some(doc_id.to_string());

        self.page_texture = None;
        self.page_size = None;
        self.page_b64 = None;
        self.page_loading = true;
        self.gateway.fetch_page_image(doc_id.to_string());

        self.canvas.viewport.reset_zoom();
        self.mask_texture = None;
        self.mask_texture_rev = u64::MAX;
        self.zones.clear();
        self.similar_regions.clear();
        self.polygon_pending_key = None;
        self.polygon_dispatched_key = None;
        self.polygon_deadline = None;
        self.autorun_deadline = None;
        self.last_processing_ms = None;
        self.error = None;
        self.confirm_summary = None;
    }

    /// Write the outgoing document's state immediately if a save is pending.
    fn flush_pending_save(&mut self) {
        if self.save.take_pending()
            && let (Some(doc), Some(pg)) = (self.active_doc.as_ref(), self.playground.as_ref())
        {
            self.store.save(doc, &pg.snapshot(unix_now()));
        }
    }

    // ------------------------------------------------------------------
    // Prompt mutations
    // ------------------------------------------------------------------

    /// Shared tail of every prompt mutation: drop stale candidates, orphan
    /// in-flight inference, schedule persistence, maybe schedule a run.
    fn on_prompts_changed(&mut self, now: f64, refine_click: bool) {
        self.segment_token += 1; // a changed prompt set orphans any in-flight run
        let auto_run = self.config.auto_run;
        let Some(pg) = self.playground.as_mut() else {
            return;
        };
        pg.invalidate_candidates_if_stale();
        self.save.mark_changed(now);
        self.error = None;

        if pg.input_mode == InputMode::Text {
            return; // text mode runs strictly on demand
        }
        if refine_click && pg.select.mask().is_some() {
            // click-to-refine: immediately re-run carrying the mask forward
            self.run_interactive();
        } else if auto_run {
            self.autorun_deadline = Some(now + AUTO_RUN_DEBOUNCE);
        }
    }

    fn apply_canvas_events(&mut self, events: Vec<CanvasEvent>, now: f64) {
        for event in events {
            match event {
                CanvasEvent::PointAdded { x, y, label } => {
                    if let Some(pg) = self.playground.as_mut() {
                        pg.prompts.add_point(x, y, label);
                    }
                    self.on_prompts_changed(now, true);
                }
                CanvasEvent::PointRemoved(id) => {
                    if let Some(pg) = self.playground.as_mut() {
                        pg.prompts.remove_point(id);
                    }
                    self.on_prompts_changed(now, false);
                }
                CanvasEvent::BoxDrawn { ax, ay, bx, by } => {
                    if let Some(pg) = self.playground.as_mut() {
                        pg.prompts.add_box(BoxPrompt::from_corners(ax, ay, bx, by));
                    }
                    self.on_prompts_changed(now, false);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Inference dispatch
    // ------------------------------------------------------------------

    fn run_interactive(&mut self) {
        let Some(page_b64) = self.page_b64.clone() else {
            self.error = Some("Page image is still loading".to_string());
            return;
        };
        let doc_id = self.active_doc.clone();
        let Some(pg) = self.playground.as_ref() else {
            return;
        };
        if pg.prompts.is_empty() {
            self.error = Some("Add points or draw a box".to_string());
            return;
        }
        let req = InteractiveSegmentRequest::from_prompts(
            page_b64,
            pg.prompts.points(),
            pg.prompts.boxes(),
            pg.select.mask(),
            doc_id,
        );
        self.segment_token += 1;
        self.segment_dispatched_revision = pg.prompts.revision();
        self.running_interactive = true;
        self.error = None;
        self.autorun_deadline = None;
        self.gateway.segment_interactive(self.segment_token, req);
    }

    fn run_text_segment(&mut self) {
        let Some(page_b64) = self.page_b64.clone() else {
            self.error = Some("Page image is still loading".to_string());
            return;
        };
        let Some(pg) = self.playground.as_ref() else {
            return;
        };
        let prompts: Vec<String> = pg
            .text_prompts
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if prompts.is_empty() {
            self.error = Some("Enter at least one prompt".to_string());
            return;
        }
        let req = SegmentRequest {
            image_base64: page_b64,
            prompts,
            return_masks: true,
            return_crops: false,
            confidence_threshold: pg.confidence_threshold,
        };
        self.text_token += 1;
        self.running_text = true;
        self.error = None;
        self.gateway.segment_text(self.text_token, req);
    }

    fn run_find_similar(&mut self) {
        let Some(page_b64) = self.page_b64.clone() else {
            return;
        };
        let doc_id = self.active_doc.clone();
        let Some(pg) = self.playground.as_ref() else {
            return;
        };
        let Some(exemplar) = pg.select.mask() else {
            self.error = Some("Confirm a selection to use as the exemplar".to_string());
            return;
        };
        let mask_b64 = match crate::mask::encode_mask_png(&exemplar.mask) {
            Ok(b) => b,
            Err(e) => {
                self.error = Some(format!("Could not encode exemplar: {}", e));
                return;
            }
        };
        let req = FindSimilarRequest {
            image_base64: page_b64,
            exemplar_mask_base64: mask_b64,
            exemplar_bbox: Some(exemplar.bbox),
            max_results: self.similar_max_results,
            similarity_threshold: 0.5,
            doc_id,
        };
        self.similar_token += 1;
        self.running_similar = true;
        self.error = None;
        self.gateway.find_similar(self.similar_token, req);
    }

    // ------------------------------------------------------------------
    // Selection helpers
    // ------------------------------------------------------------------

    fn select_candidate(&mut self, index: usize, now: f64) {
        let Some(pg) = self.playground.as_mut() else {
            return;
        };
        let Some(candidate) = pg.candidates.get(index).cloned() else {
            return;
        };
        pg.selected_candidate = Some(index);
        let points = pg.prompts.points().to_vec();
        let boxes = pg.prompts.boxes().to_vec();
        pg.select.set_mask(candidate, points, boxes, unix_now());
        self.save.mark_changed(now);
    }

    fn adopt_similar_region(&mut self, region: &SimilarRegion, now: f64) {
        let decoded = match crate::mask::decode_mask_png(&region.mask_base64) {
            Ok(m) => m,
            Err(e) => {
                self.error = Some(format!("Bad region mask: {}", e));
                return;
            }
        };
        let Some(pg) = self.playground.as_mut() else {
            return;
        };
        let candidate = MaskCandidate::new(
            decoded,
            region.iou_score.unwrap_or(region.similarity_score),
            Some(region.bbox),
            region.low_res_logits_base64.clone(),
        );
        pg.candidates.clear();
        pg.selected_candidate = None;
        pg.select.set_mask(candidate, Vec::new(), Vec::new(), unix_now());
        self.save.mark_changed(now);
    }

    fn undo(&mut self, now: f64) {
        self.segment_token += 1;
        let Some(pg) = self.playground.as_mut() else {
            return;
        };
        if let Some(entry) = pg.select.undo() {
            let mode = pg.prompts.box_mode;
            pg.prompts.hydrate(entry.points, entry.boxes, mode);
            pg.candidates.clear();
            pg.selected_candidate = None;
            self.save.mark_changed(now);
        }
    }

    fn redo(&mut self, now: f64) {
        self.segment_token += 1;
        let Some(pg) = self.playground.as_mut() else {
            return;
        };
        if let Some(entry) = pg.select.redo() {
            let mode = pg.prompts.box_mode;
            pg.prompts.hydrate(entry.points, entry.boxes, mode);
            pg.candidates.clear();
            pg.selected_candidate = None;
            self.save.mark_changed(now);
        }
    }

    fn finish_selection(&mut self) {
        let Some(pg) = self.playground.as_mut() else {
            return;
        };
        let Some((mask, polygon)) = pg.select.finish() else {
            self.error = Some("Nothing selected to confirm".to_string());
            return;
        };
        let area = crate::mask::mask_area(&mask.mask);
        self.confirm_summary = Some(match (pg.output_mode, polygon) {
            (OutputMode::Polygon, Some(poly)) => format!(
                "Confirmed polygon: {} vertices, {} regions, {:.0} px²",
                poly.points.len(),
                poly.all_contours.len(),
                poly.total_area
            ),
            _ => format!("Confirmed mask: {} px, IoU {:.2}", area, mask.iou_score),
        });
        log_info!("selection confirmed ({} px)", area);
    }

    fn delete_selection(&mut self, now: f64) {
        self.polygon_token += 1;
        if let Some(pg) = self.playground.as_mut() {
            pg.select.delete_selection();
            pg.candidates.clear();
            pg.selected_candidate = None;
            self.save.mark_changed(now);
        }
        self.confirm_summary = None;
    }

    // ------------------------------------------------------------------
    // Event drains + timers
    // ------------------------------------------------------------------

    fn drain_events(&mut self, ctx: &egui::Context, now: f64) {
        while let Ok(result) = self.polygon_rx.try_recv() {
            if result.token != self.polygon_token {
                continue; // superseded while extracting — discard silently
            }
            if let Some(pg) = self.playground.as_mut()
                && pg.output_mode == OutputMode::Polygon
            {
                pg.select.commit_polygon(result.polygon);
            }
        }

        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                GatewayEvent::Health(result) => match result {
                    Ok(h) => {
                        self.health_error = false;
                        self.health = Some(h);
                    }
                    Err(e) => {
                        log_warn!("health poll failed: {}", e);
                        self.health_error = true;
                    }
                },
                GatewayEvent::Documents { token, result } => {
                    if token != self.docs_token {
                        continue;
                    }
                    self.docs_loading = false;
                    match result {
                        Ok(docs) => self.documents = docs,
                        Err(e) => {
                            log_err!("document listing failed: {}", e);
                            self.error = Some(format!("Could not list documents: {}", e));
                        }
                    }
                }
                GatewayEvent::PageImage { doc_id, result } => {
                    if self.active_doc.as_deref() != Some(doc_id.as_str()) {
                        continue; // user already moved on
                    }
                    self.page_loading = false;
                    match result {
                        Ok(payload) => {
                            let (w, h) = payload.image.dimensions();
                            let color = egui::ColorImage::from_rgba_unmultiplied(
                                [w as usize, h as usize],
                                payload.image.as_raw(),
                            );
                            self.page_texture = Some(ctx.load_texture(
                                "page_image",
                                color,
                                TextureOptions::LINEAR,
                            ));
                            self.page_size = Some((w, h));
                            self.page_b64 = Some(payload.image_base64);
                            self.fit_on_next_frame = true;
                        }
                        Err(e) => {
                            self.error = Some(format!("Could not load page image: {}", e));
                        }
                    }
                }
                GatewayEvent::Interactive { token, result } => {
                    if token != self.segment_token {
                        log_info!("discarding stale segmentation response");
                        continue;
                    }
                    self.running_interactive = false; // reset on every path
                    match result {
                        Ok(resp) => {
                            self.last_processing_ms = Some(resp.processing_time_ms);
                            match gateway::decode_candidates(resp.masks) {
                                Ok(candidates) if !candidates.is_empty() => {
                                    let revision = self.segment_dispatched_revision;
                                    if let Some(pg) = self.playground.as_mut() {
                                        pg.record_run(
                                            unix_now(),
                                            candidates.len(),
                                            candidates[0].iou_score,
                                            resp.processing_time_ms,
                                        );
                                        pg.set_candidates(candidates, revision);
                                    }
                                    self.select_candidate(0, now);
                                    self.save.mark_changed(now);
                                }
                                Ok(_) => {
                                    self.error = Some("No mask candidates returned".to_string());
                                }
                                Err(e) => {
                                    self.error = Some(format!("Bad mask payload: {}", e));
                                }
                            }
                        }
                        Err(e) => {
                            self.error = Some(format!("Segmentation failed: {}", e));
                        }
                    }
                }
                GatewayEvent::TextSegment { token, result } => {
                    if token != self.text_token {
                        continue;
                    }
                    self.running_text = false;
                    match result {
                        Ok(resp) => {
                            self.last_processing_ms = Some(resp.processing_time_ms);
                            if resp.zones.is_empty() {
                                self.error = Some("No zones matched the prompts".to_string());
                            }
                            self.zones = resp.zones;
                        }
                        Err(e) => {
                            self.error = Some(format!("Segmentation failed: {}", e));
                        }
                    }
                }
                GatewayEvent::FindSimilar { token, result } => {
                    if token != self.similar_token {
                        continue;
                    }
                    self.running_similar = false;
                    match result {
                        Ok(resp) => {
                            self.last_processing_ms = Some(resp.processing_time_ms);
                            self.similar_regions = resp.regions;
                        }
                        Err(e) => {
                            self.error = Some(format!("Find similar failed: {}", e));
                        }
                    }
                }
            }
        }
    }

    fn tick_timers(&mut self, now: f64) {
        // Debounced auto-run
        if let Some(deadline) = self.autorun_deadline
            && now >= deadline
        {
            self.autorun_deadline = None;
            let has_prompts = self
                .playground
                .as_ref()
                .is_some_and(|pg| !pg.prompts.is_empty() && pg.input_mode != InputMode::Text);
            if has_prompts {
                self.run_interactive();
            }
        }

        // Debounced persistence
        if self.save.take_due(now)
            && let (Some(doc), Some(pg)) = (self.active_doc.as_ref(), self.playground.as_ref())
        {
            self.store.save(doc, &pg.snapshot(unix_now()));
        }

        // Health poll
        let poll_interval = Duration::from_secs(self.config.health_poll_secs);
        let due = self
            .last_health_poll
            .is_none_or(|t| t.elapsed() >= poll_interval);
        if due {
            self.gateway.poll_health();
            self.last_health_poll = Some(Instant::now());
        }

        self.tick_polygon(now);
    }

    /// Schedule polygon extraction whenever the (mask revision, complexity)
    /// pair moved past the last dispatched job, with a trailing debounce so
    /// slider scrubbing coalesces into a single extraction.
    fn tick_polygon(&mut self, now: f64) {
        let Some(pg) = self.playground.as_ref() else {
            return;
        };
        if pg.output_mode != OutputMode::Polygon {
            return;
        }
        let Some(mc) = pg.select.mask() else {
            return;
        };
        let key = (pg.select.mask_revision(), complexity_key(pg.polygon_complexity));
        if self.polygon_dispatched_key == Some(key) {
            return;
        }
        if self.polygon_pending_key != Some(key) {
            self.polygon_pending_key = Some(key);
            self.polygon_deadline = Some(now + POLYGON_DEBOUNCE);
        }
        if let Some(deadline) = self.polygon_deadline
            && now >= deadline
        {
            self.polygon_deadline = None;
            self.polygon_dispatched_key = Some(key);
            self.polygon_token += 1;
            let token = self.polygon_token;
            let mask = mc.mask.clone();
            let complexity = pg.polygon_complexity;
            let tx = self.polygon_tx.clone();
            rayon::spawn(move || {
                let polygon = crate::polygon::extract_polygons(&mask, complexity);
                let _ = tx.send(PolygonResult { token, polygon });
            });
        }
    }

    fn set_output_mode(&mut self, mode: OutputMode, now: f64) {
        let Some(pg) = self.playground.as_mut() else {
            return;
        };
        if pg.output_mode == mode {
            return;
        }
        pg.output_mode = mode;
        if mode != OutputMode::Polygon {
            // leaving polygon output invalidates the derivation entirely
            pg.select.clear_polygon();
            self.polygon_token += 1;
            self.polygon_pending_key = None;
            self.polygon_dispatched_key = None;
            self.polygon_deadline = None;
        } else {
            // re-entering recomputes from the current mask
            self.polygon_dispatched_key = None;
        }
        self.save.mark_changed(now);
    }

    /// Rebuild the mask overlay texture when the selection's mask changed.
    fn refresh_mask_texture(&mut self, ctx: &egui::Context) {
        let Some(pg) = self.playground.as_ref() else {
            if self.mask_texture.is_some() {
                self.mask_texture = None;
                self.mask_texture_rev = u64::MAX;
            }
            return;
        };
        let rev = pg.select.mask_revision();
        if rev == self.mask_texture_rev {
            return;
        }
        self.mask_texture_rev = rev;
        self.mask_texture = pg.select.mask().map(|mc| {
            ctx.load_texture(
                "mask_overlay",
                mask_overlay_image(&mc.mask, ACCENT),
                TextureOptions::NEAREST,
            )
        });
    }

    fn degraded(&self) -> bool {
        self.health_error || self.health.as_ref().is_some_and(|h| !h.model_loaded)
    }

    // ------------------------------------------------------------------
    // Panels
    // ------------------------------------------------------------------

    fn show_toolbar(&mut self, ui: &mut egui::Ui, now: f64) {
        ui.horizontal_wrapped(|ui| {
            let Some(pg) = self.playground.as_mut() else {
                ui.weak("Select a document to start");
                return;
            };

            ui.label("Prompt:");
            let before_input = pg.input_mode;
            ui.selectable_value(&mut pg.input_mode, InputMode::Point, "Point");
            ui.selectable_value(&mut pg.input_mode, InputMode::Box, "Box");
            ui.selectable_value(&mut pg.input_mode, InputMode::Text, "Text");
            if pg.input_mode != before_input {
                self.save.mark_changed(now);
            }

            let Some(pg) = self.playground.as_mut() else {
            return;
        };
            if pg.input_mode == InputMode::Box {
                ui.separator();
                let before_mode = pg.prompts.box_mode;
                ui.selectable_value(&mut pg.prompts.box_mode, BoxMode::Single, "Single");
                ui.selectable_value(&mut pg.prompts.box_mode, BoxMode::Multi, "Multi");
                if pg.prompts.box_mode != before_mode {
                    self.save.mark_changed(now);
                }
            }

            ui.separator();
            ui.label("Output:");
            let Some(pg) = self.playground.as_mut() else {
            return;
        };
            let mut out = pg.output_mode;
            ui.selectable_value(&mut out, OutputMode::Pixel, "Pixel");
            ui.selectable_value(&mut out, OutputMode::Polygon, "Polygon");
            self.set_output_mode(out, now);

            let Some(pg) = self.playground.as_mut() else {
            return;
        };
            if pg.output_mode == OutputMode::Polygon {
                let mut c = pg.polygon_complexity;
                let resp = ui.add(
                    egui::Slider::new(&mut c, 0.0..=1.0)
                        .text("detail")
                        .fixed_decimals(2),
                );
                if resp.changed() {
                    pg.polygon_complexity = c;
                    self.save.mark_changed(now);
                }
            }

            ui.separator();
            let mut auto = self.config.auto_run;
            if ui.checkbox(&mut auto, "Auto-run").changed() {
                self.config.auto_run = auto;
                self.config.save();
            }

            let Some(pg) = self.playground.as_ref() else {
            return;
        };
            let can_run = !pg.prompts.is_empty() && pg.input_mode != InputMode::Text;
            if ui
                .add_enabled(can_run && !self.running_interactive, egui::Button::new("▶ Run"))
                .clicked()
            {
                self.run_interactive();
            }
            if self.running_interactive || self.running_text || self.running_similar {
                ui.spinner();
            }

            ui.separator();
            let Some(pg) = self.playground.as_ref() else {
            return;
        };
            let can_undo = pg.select.can_undo();
            let can_redo = pg.select.can_redo();
            if ui.add_enabled(can_undo, egui::Button::new("↶ Undo")).clicked() {
                self.undo(now);
            }
            if ui.add_enabled(can_redo, egui::Button::new("↷ Redo")).clicked() {
                self.redo(now);
            }

            let Some(pg) = self.playground.as_ref() else {
            return;
        };
            let has_mask = pg.select.mask().is_some();
            if ui
                .add_enabled(has_mask, egui::Button::new("✓ Finish"))
                .clicked()
            {
                self.finish_selection();
            }
            if ui
                .add_enabled(has_mask, egui::Button::new("🗑 Delete"))
                .clicked()
            {
                self.delete_selection(now);
            }

            ui.separator();
            if ui.button("Clear prompts").clicked() {
                if let Some(pg) = self.playground.as_mut() {
                    pg.prompts.clear_all();
                }
                self.on_prompts_changed(now, false);
            }

            ui.separator();
            if ui.button("＋").on_hover_text("Zoom in").clicked() {
                self.canvas.viewport.zoom_in();
            }
            if ui.button("－").on_hover_text("Zoom out").clicked() {
                self.canvas.viewport.zoom_out();
            }
            if ui.button("Fit page").clicked()
                && let (Some(rect), Some((w, h))) = (self.canvas.last_canvas_rect, self.page_size)
            {
                self.canvas.viewport.fit_to_page(rect, w, h);
            }
            if ui.button("Fit width").clicked()
                && let (Some(rect), Some((w, h))) = (self.canvas.last_canvas_rect, self.page_size)
            {
                self.canvas.viewport.fit_to_width(rect, w, h);
            }
            if ui.button("1:1").clicked() {
                self.canvas.viewport.reset_zoom();
            }
        });
    }

    fn show_documents_panel(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.heading("Documents");
            if ui.button("⟳").on_hover_text("Refresh").clicked() {
                self.refresh_documents();
            }
        });
        ui.separator();
        if self.docs_loading {
            ui.spinner();
            return;
        }
        if self.documents.is_empty() {
            ui.weak("No documents on the backend");
            return;
        }
        let mut clicked: Option<String> = None;
        egui::ScrollArea::vertical().show(ui, |ui| {
            for doc in &self.documents {
                let selected = self.active_doc.as_deref() == Some(doc.doc_id.as_str());
                let name = doc
                    .original_filename
                    .as_deref()
                    .unwrap_or(doc.filename.as_str());
                let label = if self.store.has(&doc.doc_id) {
                    format!("● {}", name) // has saved playground state
                } else {
                    name.to_string()
                };
                if ui.selectable_label(selected, label).clicked() && !selected {
                    clicked = Some(doc.doc_id.clone());
                }
            }
        });
        if let Some(doc_id) = clicked {
            self.switch_document(&doc_id);
        }
    }

    fn show_inspector_panel(&mut self, ui: &mut egui::Ui, now: f64) {
        let Some(pg) = self.playground.as_ref() else {
            ui.weak("No document selected");
            return;
        };

        if let Some(err) = &self.error {
            ui.colored_label(Color32::from_rgb(217, 48, 37), err);
            ui.separator();
        }
        if let Some(summary) = &self.confirm_summary {
            ui.colored_label(Color32::from_rgb(52, 168, 83), summary);
            ui.separator();
        }

        // -- Selection status ------------------------------------------------
        let phase = match pg.select.phase() {
            SelectPhase::Idle => "idle",
            SelectPhase::Initial => "initial",
            SelectPhase::Refining => "refining",
            SelectPhase::Confirmed => "confirmed",
        };
        ui.label(format!(
            "Selection: {}  ({} history)",
            phase,
            pg.select.history_len()
        ));
        ui.separator();

        // -- Candidates ------------------------------------------------------
        if !pg.candidates.is_empty() {
            ui.heading("Candidates");
            let mut pick: Option<usize> = None;
            for (i, c) in pg.candidates.iter().enumerate() {
                let selected = pg.selected_candidate == Some(i);
                let label = format!("Candidate {} — IoU {:.2}", i + 1, c.iou_score);
                if ui.selectable_label(selected, label).clicked() && !selected {
                    pick = Some(i);
                }
            }
            if let Some(i) = pick {
                self.select_candidate(i, now);
            }
            ui.separator();
        }

        // -- Text prompts ----------------------------------------------------
        let Some(pg) = self.playground.as_mut() else {
            return;
        };
        if pg.input_mode == InputMode::Text {
            ui.heading("Text prompts");
            let mut remove: Option<usize> = None;
            let mut changed = false;
            for (i, prompt) in pg.text_prompts.iter_mut().enumerate() {
                ui.horizontal(|ui| {
                    if ui.text_edit_singleline(prompt).changed() {
                        changed = true;
                    }
                    if ui.small_button("✖").clicked() {
                        remove = Some(i);
                    }
                });
            }
            if let Some(i) = remove {
                pg.text_prompts.remove(i);
                if pg.text_prompts.is_empty() {
                    pg.text_prompts.push(String::new());
                }
                changed = true;
            }
            if ui.small_button("＋ prompt").clicked() {
                pg.text_prompts.push(String::new());
                changed = true;
            }
            let mut threshold = pg.confidence_threshold;
            if ui
                .add(
                    egui::Slider::new(&mut threshold, 0.0..=1.0)
                        .text("confidence")
                        .fixed_decimals(2),
                )
                .changed()
            {
                pg.confidence_threshold = threshold;
                changed = true;
            }
            if changed {
                self.save.mark_changed(now);
            }
            if ui
                .add_enabled(!self.running_text, egui::Button::new("Segment"))
                .clicked()
            {
                self.run_text_segment();
            }

            if !self.zones.is_empty() {
                ui.separator();
                ui.heading(format!("Zones ({})", self.zones.len()));
                egui::ScrollArea::vertical()
                    .id_source("zones")
                    .max_height(160.0)
                    .show(ui, |ui| {
                        for z in &self.zones {
                            ui.label(format!(
                                "{} — {:.0}%  [{}]",
                                z.zone_type,
                                z.confidence * 100.0,
                                z.prompt_matched
                            ));
                        }
                    });
            }
            ui.separator();
        }

        // -- Find similar ----------------------------------------------------
        let Some(pg) = self.playground.as_ref() else {
            return;
        };
        if pg.select.phase() == SelectPhase::Confirmed {
            ui.heading("Find similar");
            ui.horizontal(|ui| {
                ui.label("Max results:");
                ui.add(egui::DragValue::new(&mut self.similar_max_results).clamp_range(1..=50));
            });
            if ui
                .add_enabled(!self.running_similar, egui::Button::new("Search"))
                .clicked()
            {
                self.run_find_similar();
            }
            if !self.similar_regions.is_empty() {
                let mut adopt: Option<SimilarRegion> = None;
                egui::ScrollArea::vertical()
                    .id_source("similar")
                    .max_height(160.0)
                    .show(ui, |ui| {
                        for r in &self.similar_regions {
                            let label =
                                format!("{} — {:.0}%", r.region_id, r.similarity_score * 100.0);
                            if ui.selectable_label(false, label).clicked() {
                                adopt = Some(r.clone());
                            }
                        }
                    });
                if let Some(region) = adopt {
                    self.adopt_similar_region(&region, now);
                }
            }
            ui.separator();
        }

        // -- Run history -----------------------------------------------------
        let Some(pg) = self.playground.as_ref() else {
            return;
        };
        if !pg.results.is_empty() {
            ui.heading(format!("Runs ({})", pg.results.len()));
            egui::ScrollArea::vertical()
                .id_source("runs")
                .max_height(160.0)
                .show(ui, |ui| {
                    for r in pg.results.iter().rev() {
                        ui.label(format!(
                            "{} pts, {} boxes → {} masks, best {:.2} ({:.0} ms)",
                            r.points.len(),
                            r.boxes.len(),
                            r.candidate_count,
                            r.best_iou,
                            r.processing_time_ms
                        ));
                    }
                });
        }
    }

    fn show_status_bar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            if self.degraded() {
                ui.colored_label(
                    Color32::from_rgb(217, 48, 37),
                    RichText::new("⚠ Backend degraded — model not loaded").strong(),
                );
            } else if let Some(h) = &self.health {
                let gpu = match (&h.gpu_available, &h.gpu_name) {
                    (true, Some(name)) => format!("GPU: {}", name),
                    (true, None) => "GPU".to_string(),
                    _ => "CPU".to_string(),
                };
                ui.weak(format!("{} · {}", h.model, gpu));
            } else {
                ui.weak("Connecting to backend…");
            }

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                ui.weak(format!("{:.0}%", self.canvas.viewport.zoom * 100.0));
                if let Some(ms) = self.last_processing_ms {
                    ui.weak(format!("{:.0} ms", ms));
                }
                if self.page_loading {
                    ui.spinner();
                }
            });
        });
    }
}

impl eframe::App for PlaygroundApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = ctx.input(|i| i.time);

        self.drain_events(ctx, now);
        self.tick_timers(now);
        self.refresh_mask_texture(ctx);

        // Keyboard: undo/redo mirror the toolbar buttons
        let (undo_pressed, redo_pressed) = ctx.input_mut(|i| {
            (
                i.consume_key(egui::Modifiers::COMMAND, egui::Key::Z),
                i.consume_key(egui::Modifiers::COMMAND, egui::Key::Y),
            )
        });
        if undo_pressed {
            self.undo(now);
        }
        if redo_pressed {
            self.redo(now);
        }

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            self.show_toolbar(ui, now);
        });
        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            self.show_status_bar(ui);
        });
        egui::SidePanel::left("documents")
            .default_width(220.0)
            .show(ctx, |ui| {
                self.show_documents_panel(ui);
            });
        egui::SidePanel::right("inspector")
            .default_width(280.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| {
                    self.show_inspector_panel(ui, now);
                });
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            if self.fit_on_next_frame
                && let (Some(rect), Some((w, h))) = (self.canvas.last_canvas_rect, self.page_size)
            {
                self.canvas.viewport.fit_to_page(rect, w, h);
                self.fit_on_next_frame = false;
            }

            let events = {
                let pg = self.playground.as_ref();
                let frame = CanvasFrame {
                    page: self.page_texture.as_ref(),
                    image_size: self.page_size,
                    points: pg.map_or(&[], |p| p.prompts.points()),
                    boxes: pg.map_or(&[], |p| p.prompts.boxes()),
                    mask_overlay: self.mask_texture.as_ref(),
                    polygon: pg.and_then(|p| {
                        if p.output_mode == OutputMode::Polygon {
                            p.select.polygon()
                        } else {
                            None
                        }
                    }),
                    input_mode: pg.map_or(InputMode::Point, |p| p.input_mode),
                    accent: ACCENT,
                };
                self.canvas.show(ui, &frame)
            };
            self.apply_canvas_events(events, now);
        });

        // Keep ticking while anything is pending: debounces, jobs, polls.
        let busy = self.running_interactive
            || self.running_text
            || self.running_similar
            || self.page_loading
            || self.save.is_pending()
            || self.autorun_deadline.is_some()
            || self.polygon_deadline.is_some();
        if busy {
            ctx.request_repaint_after(Duration::from_millis(50));
        } else {
            ctx.request_repaint_after(Duration::from_secs(1));
        }
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.flush_pending_save();
    }
}
