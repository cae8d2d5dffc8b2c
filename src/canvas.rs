//! The document canvas: zoom/pan viewport math and the interactive view
//! that turns pointer events into image-space prompt events.
//!
//! The viewport keeps the image centered at `canvas_rect.center() + pan`,
//! scaled by `zoom`. All conversions between screen and image space go
//! through [`Viewport::image_rect`] so there is exactly one place where the
//! transform lives.

use eframe::egui;
use egui::{Color32, ColorImage, Pos2, Rect, Stroke, TextureHandle, Vec2};
use image::GrayImage;
use uuid::Uuid;

use crate::playground::InputMode;
use crate::polygon::PolygonData;
use crate::prompts::{BoxPrompt, PointLabel, PointPrompt};

pub const ZOOM_MIN: f32 = 0.1;
pub const ZOOM_MAX: f32 = 4.0;
/// Ten wheel steps double the zoom: 2^(1/10).
pub const ZOOM_STEP: f32 = 1.071_773_5;
/// Pixels of scroll that count as one wheel step.
const WHEEL_STEP_PIXELS: f32 = 50.0;
/// Fixed padding subtracted from the container when fitting.
const FIT_PADDING: f32 = 16.0;
/// Trailing pan throttle: apply at most once per ~frame, keep only the
/// latest requested position.
const PAN_MIN_INTERVAL: f64 = 0.016;
/// Resize-observer refit debounce and the pixel change that arms it.
const REFIT_DEBOUNCE: f64 = 0.1;
const REFIT_TOLERANCE: f32 = 5.0;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum FitKind {
    Page,
    Width,
}

#[derive(Clone, Copy)]
struct FitState {
    kind: FitKind,
    container: Vec2,
}

/// Zoom factor, pan offset, and the interaction bookkeeping around them.
pub struct Viewport {
    pub zoom: f32,
    pan_offset: Vec2,
    /// True while a middle-button pan drag is engaged.
    pub panning: bool,
    last_pan_apply: f64,
    pending_pan: Option<Vec2>,
    fitted: Option<FitState>,
    refit_deadline: Option<f64>,
    /// Container size seen by the last `observe_container` call, so the
    /// debounce only re-arms while the size is actually still changing.
    last_observed: Option<Vec2>,
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new()
    }
}

impl Viewport {
    pub fn new() -> Self {
        Self {
            zoom: 1.0,
            pan_offset: Vec2::ZERO,
            panning: false,
            last_pan_apply: f64::NEG_INFINITY,
            pending_pan: None,
            fitted: None,
            refit_deadline: None,
            last_observed: None,
        }
    }

    pub fn pan_offset(&self) -> Vec2 {
        self.pan_offset
    }

    /// Toolbar zoom-in: a larger jump than one wheel notch.
    pub fn zoom_in(&mut self) {
        self.zoom = (self.zoom * ZOOM_STEP.powi(3)).clamp(ZOOM_MIN, ZOOM_MAX);
        self.fitted = None;
    }

    pub fn zoom_out(&mut self) {
        self.zoom = (self.zoom / ZOOM_STEP.powi(3)).clamp(ZOOM_MIN, ZOOM_MAX);
        self.fitted = None;
    }

    pub fn reset_zoom(&mut self) {
        self.zoom = 1.0;
        self.pan_offset = Vec2::ZERO;
        self.fitted = None;
    }

    /// Zoom by `factor` while keeping the screen-space `anchor` fixed.
    /// Solves the pan so the image point under the anchor stays put:
    /// the image center offset from the anchor scales by the realized factor.
    pub fn zoom_around(&mut self, factor: f32, anchor: Pos2, canvas_rect: Rect) {
        let old_zoom = self.zoom;
        self.zoom = (self.zoom * factor).clamp(ZOOM_MIN, ZOOM_MAX);
        let actual = self.zoom / old_zoom;
        let old_center = canvas_rect.center() + self.pan_offset;
        let new_center = Pos2::new(
            anchor.x + (old_center.x - anchor.x) * actual,
            anchor.y + (old_center.y - anchor.y) * actual,
        );
        self.pan_offset = new_center - canvas_rect.center();
        self.fitted = None;
    }

    /// Wheel input in pixels; ten accumulated steps double the zoom.
    pub fn wheel_zoom(&mut self, scroll_y: f32, anchor: Pos2, canvas_rect: Rect) {
        let steps = scroll_y / WHEEL_STEP_PIXELS;
        self.zoom_around(ZOOM_STEP.powf(steps), anchor, canvas_rect);
    }

    /// Immediate (unthrottled) pan, used for ctrl+scroll trackpad panning.
    pub fn pan_by(&mut self, delta: Vec2) {
        self.pan_offset += delta;
        self.fitted = None;
    }

    /// Throttled pan toward an absolute target offset. Applies immediately
    /// when a frame interval has passed since the last applied pan, else
    /// stashes the value — only the most recent target ever lands.
    pub fn request_pan(&mut self, target: Vec2, now: f64) {
        if now - self.last_pan_apply >= PAN_MIN_INTERVAL {
            self.pan_offset = target;
            self.last_pan_apply = now;
            self.pending_pan = None;
            self.fitted = None;
        } else {
            self.pending_pan = Some(target);
        }
    }

    /// Flush a queued pan once the throttle interval has elapsed.
    pub fn tick_pan(&mut self, now: f64) {
        if let Some(target) = self.pending_pan
            && now - self.last_pan_apply >= PAN_MIN_INTERVAL
        {
            self.pan_offset = target;
            self.last_pan_apply = now;
            self.pending_pan = None;
            self.fitted = None;
        }
    }

    /// Scale the image to fully fit the container (never upscaling past 1:1),
    /// with fixed padding, and reset the pan.
    pub fn fit_to_page(&mut self, container: Rect, img_w: u32, img_h: u32) {
        let Some((aw, ah)) = Self::available(container) else {
            return;
        };
        if img_w == 0 || img_h == 0 {
            return;
        }
        let scale = (aw / img_w as f32)
            .min(ah / img_h as f32)
            .min(1.0)
            .clamp(ZOOM_MIN, ZOOM_MAX);
        self.zoom = scale;
        self.pan_offset = Vec2::ZERO;
        self.fitted = Some(FitState {
            kind: FitKind::Page,
            container: container.size(),
        });
        self.refit_deadline = None;
        self.last_observed = None;
    }

    /// Scale so the image width fills the container width. Unlike
    /// fit-to-page this may upscale beyond 1:1.
    pub fn fit_to_width(&mut self, container: Rect, img_w: u32, _img_h: u32) {
        let Some((aw, _)) = Self::available(container) else {
            return;
        };
        if img_w == 0 {
            return;
        }
        self.zoom = (aw / img_w as f32).clamp(ZOOM_MIN, ZOOM_MAX);
        self.pan_offset = Vec2::ZERO;
        self.fitted = Some(FitState {
            kind: FitKind::Width,
            container: container.size(),
        });
        self.refit_deadline = None;
        self.last_observed = None;
    }

    fn available(container: Rect) -> Option<(f32, f32)> {
        let aw = container.width() - 2.0 * FIT_PADDING;
        let ah = container.height() - 2.0 * FIT_PADDING;
        if aw <= 0.0 || ah <= 0.0 {
            return None;
        }
        Some((aw, ah))
    }

    /// Resize observer: when a fit is active and the container moved past
    /// the tolerance, arm a debounced re-fit. The deadline is only pushed
    /// while the size is still changing, so a finished resize settles and
    /// fires exactly once.
    pub fn observe_container(&mut self, container: Rect, now: f64) {
        let Some(fit) = self.fitted else {
            return;
        };
        let size = container.size();
        let needs_refit = (size.x - fit.container.x).abs() > REFIT_TOLERANCE
            || (size.y - fit.container.y).abs() > REFIT_TOLERANCE;
        if !needs_refit {
            self.refit_deadline = None;
            self.last_observed = None;
            return;
        }
        if self.last_observed != Some(size) {
            self.last_observed = Some(size);
            self.refit_deadline = Some(now + REFIT_DEBOUNCE);
        }
    }

    /// Run the debounced re-fit once its deadline passes.
    pub fn tick_refit(&mut self, container: Rect, img: Option<(u32, u32)>, now: f64) {
        let Some(deadline) = self.refit_deadline else {
            return;
        };
        if now < deadline {
            return;
        }
        self.refit_deadline = None;
        let (Some(fit), Some((w, h))) = (self.fitted, img) else {
            return;
        };
        match fit.kind {
            FitKind::Page => self.fit_to_page(container, w, h),
            FitKind::Width => self.fit_to_width(container, w, h),
        }
    }

    /// Screen rect the image occupies at the current zoom/pan.
    pub fn image_rect(&self, canvas_rect: Rect, img_w: u32, img_h: u32) -> Rect {
        let size = Vec2::new(img_w as f32 * self.zoom, img_h as f32 * self.zoom);
        Rect::from_center_size(canvas_rect.center() + self.pan_offset, size)
    }

    /// Convert a screen position to image pixel coordinates (unclamped).
    pub fn screen_to_image(
        &self,
        pos: Pos2,
        canvas_rect: Rect,
        img_w: u32,
        img_h: u32,
    ) -> (f32, f32) {
        let rect = self.image_rect(canvas_rect, img_w, img_h);
        (
            (pos.x - rect.min.x) / self.zoom,
            (pos.y - rect.min.y) / self.zoom,
        )
    }

    /// Convert an image pixel coordinate to screen space.
    pub fn image_to_screen(
        &self,
        x: f32,
        y: f32,
        canvas_rect: Rect,
        img_w: u32,
        img_h: u32,
    ) -> Pos2 {
        let rect = self.image_rect(canvas_rect, img_w, img_h);
        Pos2::new(rect.min.x + x * self.zoom, rect.min.y + y * self.zoom)
    }
}

// ============================================================================
// CANVAS VIEW — rendering + pointer interaction
// ============================================================================

/// Events produced by one frame of canvas interaction, consumed by the app.
pub enum CanvasEvent {
    PointAdded { x: f32, y: f32, label: PointLabel },
    BoxDrawn { ax: f32, ay: f32, bx: f32, by: f32 },
    PointRemoved(Uuid),
}

/// Borrowed state the canvas needs for one frame.
pub struct CanvasFrame<'a> {
    pub page: Option<&'a TextureHandle>,
    pub image_size: Option<(u32, u32)>,
    pub points: &'a [PointPrompt],
    pub boxes: &'a [BoxPrompt],
    pub mask_overlay: Option<&'a TextureHandle>,
    pub polygon: Option<&'a PolygonData>,
    pub input_mode: InputMode,
    pub accent: Color32,
}

pub struct CanvasView {
    pub viewport: Viewport,
    pub last_canvas_rect: Option<Rect>,
    /// Screen position where an in-progress box drag started.
    box_drag_start: Option<Pos2>,
    /// (pointer position, pan offset) at middle-drag start.
    pan_anchor: Option<(Pos2, Vec2)>,
}

impl Default for CanvasView {
    fn default() -> Self {
        Self {
            viewport: Viewport::new(),
            last_canvas_rect: None,
            box_drag_start: None,
            pan_anchor: None,
        }
    }
}

impl CanvasView {
    /// Render the canvas and translate pointer input into prompt events.
    pub fn show(&mut self, ui: &mut egui::Ui, frame: &CanvasFrame<'_>) -> Vec<CanvasEvent> {
        let mut events = Vec::new();
        let now = ui.input(|i| i.time);

        let available = ui.available_size();
        let sense = egui::Sense::click_and_drag().union(egui::Sense::hover());
        let (response, painter) = ui.allocate_painter(available, sense);
        let canvas_rect = response.rect;
        self.last_canvas_rect = Some(canvas_rect);

        self.viewport.tick_pan(now);
        self.viewport.observe_container(canvas_rect, now);
        self.viewport.tick_refit(canvas_rect, frame.image_size, now);

        painter.rect_filled(canvas_rect, 0.0, ui.visuals().extreme_bg_color);

        let Some((img_w, img_h)) = frame.image_size else {
            painter.text(
                canvas_rect.center(),
                egui::Align2::CENTER_CENTER,
                "No document loaded",
                egui::FontId::proportional(16.0),
                ui.visuals().weak_text_color(),
            );
            return events;
        };

        let image_rect = self.viewport.image_rect(canvas_rect, img_w, img_h);
        let uv = Rect::from_min_max(Pos2::new(0.0, 0.0), Pos2::new(1.0, 1.0));

        if let Some(tex) = frame.page {
            painter.image(tex.id(), image_rect, uv, Color32::WHITE);
        }
        if let Some(tex) = frame.mask_overlay {
            painter.image(tex.id(), image_rect, uv, Color32::WHITE);
        }

        self.draw_polygon(&painter, frame, canvas_rect, img_w, img_h);
        self.draw_boxes(&painter, frame, canvas_rect, img_w, img_h);
        self.draw_points(&painter, frame, canvas_rect, img_w, img_h);

        // -- Middle-button pan (throttled, latest-position-wins) ------------
        let middle_down = ui.input(|i| i.pointer.middle_down());
        if middle_down && response.hovered() {
            if let Some(pos) = ui.input(|i| i.pointer.hover_pos()) {
                match self.pan_anchor {
                    None => {
                        self.pan_anchor = Some((pos, self.viewport.pan_offset()));
                        self.viewport.panning = true;
                    }
                    Some((anchor_pos, anchor_pan)) => {
                        let target = anchor_pan + (pos - anchor_pos);
                        self.viewport.request_pan(target, now);
                    }
                }
            }
        } else if self.pan_anchor.is_some() {
            self.pan_anchor = None;
            self.viewport.panning = false;
        }

        // -- Wheel: plain scroll zooms around the cursor, ctrl/cmd pans -----
        if response.hovered() {
            let (scroll, modifiers) = ui.input_mut(|i| {
                let s = i.scroll_delta;
                if s != Vec2::ZERO {
                    i.scroll_delta = Vec2::ZERO;
                }
                (s, i.modifiers)
            });
            if scroll != Vec2::ZERO {
                if modifiers.ctrl || modifiers.command {
                    self.viewport.pan_by(scroll);
                } else if let Some(pos) = ui.input(|i| i.pointer.hover_pos())
                    && scroll.y.abs() > 0.1
                {
                    self.viewport.wheel_zoom(scroll.y, pos, canvas_rect);
                }
            }
        }

        if response.double_clicked() {
            self.viewport.fit_to_page(canvas_rect, img_w, img_h);
        }

        match frame.input_mode {
            InputMode::Point => {
                self.handle_point_input(ui, &response, frame, canvas_rect, img_w, img_h, &mut events);
            }
            InputMode::Box => {
                self.handle_box_input(ui, &response, &painter, frame, canvas_rect, img_w, img_h, &mut events);
            }
            InputMode::Text => {
                // text prompts come from the side panel, not the canvas
            }
        }

        events
    }

    fn handle_point_input(
        &mut self,
        ui: &egui::Ui,
        response: &egui::Response,
        frame: &CanvasFrame<'_>,
        canvas_rect: Rect,
        img_w: u32,
        img_h: u32,
        events: &mut Vec<CanvasEvent>,
    ) {
        if response.double_clicked() {
            return; // second click of a fit-to-page double-click
        }
        let clicked = response.clicked();
        let right_clicked = response.secondary_clicked();
        if !clicked && !right_clicked {
            return;
        }
        let Some(pos) = ui.input(|i| i.pointer.interact_pos()) else {
            return;
        };
        let (x, y) = self.viewport.screen_to_image(pos, canvas_rect, img_w, img_h);
        if x < 0.0 || y < 0.0 || x >= img_w as f32 || y >= img_h as f32 {
            return;
        }

        // Clicking an existing marker removes it instead of stacking a twin.
        let hit_radius_img = 6.0 / self.viewport.zoom.max(ZOOM_MIN);
        if let Some(hit) = frame
            .points
            .iter()
            .find(|p| ((p.x - x).powi(2) + (p.y - y).powi(2)).sqrt() < hit_radius_img)
        {
            events.push(CanvasEvent::PointRemoved(hit.id));
            return;
        }

        let label = if right_clicked {
            PointLabel::Negative
        } else {
            PointLabel::Positive
        };
        events.push(CanvasEvent::PointAdded { x, y, label });
    }

    fn handle_box_input(
        &mut self,
        ui: &egui::Ui,
        response: &egui::Response,
        painter: &egui::Painter,
        frame: &CanvasFrame<'_>,
        canvas_rect: Rect,
        img_w: u32,
        img_h: u32,
        events: &mut Vec<CanvasEvent>,
    ) {
        let primary_down = ui.input(|i| i.pointer.primary_down());
        let pointer = ui.input(|i| i.pointer.hover_pos());

        if response.drag_started() && primary_down {
            self.box_drag_start = ui.input(|i| i.pointer.interact_pos());
        }

        if let Some(start) = self.box_drag_start {
            if primary_down {
                // live preview while dragging
                if let Some(pos) = pointer {
                    let preview = Rect::from_two_pos(start, pos);
                    painter.rect_stroke(preview, 0.0, Stroke::new(1.5, frame.accent));
                }
            } else {
                self.box_drag_start = None;
                if let Some(pos) = pointer {
                    let (ax, ay) = self.viewport.screen_to_image(start, canvas_rect, img_w, img_h);
                    let (bx, by) = self.viewport.screen_to_image(pos, canvas_rect, img_w, img_h);
                    let ax = ax.clamp(0.0, img_w as f32);
                    let ay = ay.clamp(0.0, img_h as f32);
                    let bx = bx.clamp(0.0, img_w as f32);
                    let by = by.clamp(0.0, img_h as f32);
                    // ignore degenerate drags
                    if (ax - bx).abs() >= 3.0 && (ay - by).abs() >= 3.0 {
                        events.push(CanvasEvent::BoxDrawn { ax, ay, bx, by });
                    }
                }
            }
        }
    }

    fn draw_points(
        &self,
        painter: &egui::Painter,
        frame: &CanvasFrame<'_>,
        canvas_rect: Rect,
        img_w: u32,
        img_h: u32,
    ) {
        for p in frame.points {
            let pos = self
                .viewport
                .image_to_screen(p.x, p.y, canvas_rect, img_w, img_h);
            let fill = match p.label {
                PointLabel::Positive => Color32::from_rgb(52, 168, 83),
                PointLabel::Negative => Color32::from_rgb(217, 48, 37),
            };
            painter.circle_filled(pos, 5.0, fill);
            painter.circle_stroke(pos, 5.0, Stroke::new(1.5, Color32::WHITE));
        }
    }

    fn draw_boxes(
        &self,
        painter: &egui::Painter,
        frame: &CanvasFrame<'_>,
        canvas_rect: Rect,
        img_w: u32,
        img_h: u32,
    ) {
        for b in frame.boxes {
            let min = self
                .viewport
                .image_to_screen(b.x1, b.y1, canvas_rect, img_w, img_h);
            let max = self
                .viewport
                .image_to_screen(b.x2, b.y2, canvas_rect, img_w, img_h);
            painter.rect_stroke(
                Rect::from_min_max(min, max),
                0.0,
                Stroke::new(2.0, frame.accent),
            );
        }
    }

    fn draw_polygon(
        &self,
        painter: &egui::Painter,
        frame: &CanvasFrame<'_>,
        canvas_rect: Rect,
        img_w: u32,
        img_h: u32,
    ) {
        let Some(poly) = frame.polygon else {
            return;
        };
        for contour in &poly.all_contours {
            let points: Vec<Pos2> = contour
                .points
                .iter()
                .map(|p| {
                    self.viewport
                        .image_to_screen(p[0], p[1], canvas_rect, img_w, img_h)
                })
                .collect();
            if points.len() >= 3 {
                painter.add(egui::Shape::closed_line(
                    points,
                    Stroke::new(2.0, frame.accent),
                ));
            }
        }
    }
}

/// Tint a grayscale mask into a translucent RGBA overlay for the canvas.
pub fn mask_overlay_image(mask: &GrayImage, accent: Color32) -> ColorImage {
    let (w, h) = mask.dimensions();
    let mut pixels = Vec::with_capacity((w * h) as usize);
    for p in mask.pixels() {
        if p.0[0] > 127 {
            pixels.push(Color32::from_rgba_unmultiplied(
                accent.r(),
                accent.g(),
                accent.b(),
                90,
            ));
        } else {
            pixels.push(Color32::TRANSPARENT);
        }
    }
    ColorImage {
        size: [w as usize, h as usize],
        pixels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canvas() -> Rect {
        Rect::from_min_size(Pos2::new(0.0, 0.0), Vec2::new(800.0, 600.0))
    }

    #[test]
    fn zoom_in_then_out_round_trips() {
        let mut vp = Viewport::new();
        vp.zoom = 1.3;
        vp.zoom_in();
        vp.zoom_out();
        assert!((vp.zoom - 1.3).abs() < 1e-4);
    }

    #[test]
    fn zoom_stays_clamped() {
        let mut vp = Viewport::new();
        for _ in 0..200 {
            vp.zoom_in();
        }
        assert!(vp.zoom <= ZOOM_MAX);
        for _ in 0..200 {
            vp.zoom_out();
        }
        assert!(vp.zoom >= ZOOM_MIN);
        assert!(vp.zoom.is_finite());
    }

    #[test]
    fn wheel_zoom_keeps_cursor_point_fixed() {
        let mut vp = Viewport::new();
        vp.pan_offset = Vec2::new(37.0, -12.0);
        vp.zoom = 0.8;
        let rect = canvas();
        let anchor = Pos2::new(300.0, 220.0);
        let (ix, iy) = vp.screen_to_image(anchor, rect, 1000, 800);
        vp.wheel_zoom(120.0, anchor, rect);
        let back = vp.image_to_screen(ix, iy, rect, 1000, 800);
        assert!((back.x - anchor.x).abs() < 1e-2);
        assert!((back.y - anchor.y).abs() < 1e-2);
    }

    #[test]
    fn ten_wheel_steps_double_the_zoom() {
        let mut vp = Viewport::new();
        let rect = canvas();
        let anchor = rect.center();
        for _ in 0..10 {
            vp.wheel_zoom(WHEEL_STEP_PIXELS, anchor, rect);
        }
        assert!((vp.zoom - 2.0).abs() < 1e-3);
    }

    #[test]
    fn fit_to_page_uses_min_ratio_with_padding() {
        let mut vp = Viewport::new();
        vp.pan_offset = Vec2::new(50.0, 50.0);
        let rect = Rect::from_min_size(Pos2::new(0.0, 0.0), Vec2::new(532.0, 432.0));
        // available: 500x400; image 1000x800 -> scale 0.5 on both axes
        vp.fit_to_page(rect, 1000, 800);
        assert!((vp.zoom - 0.5).abs() < 1e-6);
        assert_eq!(vp.pan_offset(), Vec2::ZERO);
    }

    #[test]
    fn fit_to_page_never_upscales() {
        let mut vp = Viewport::new();
        let rect = canvas();
        vp.fit_to_page(rect, 100, 100);
        assert!((vp.zoom - 1.0).abs() < 1e-6);
    }

    #[test]
    fn fit_to_width_may_upscale() {
        let mut vp = Viewport::new();
        let rect = Rect::from_min_size(Pos2::new(0.0, 0.0), Vec2::new(232.0, 432.0));
        // available width 200, image width 100 -> 2x
        vp.fit_to_width(rect, 100, 1000);
        assert!((vp.zoom - 2.0).abs() < 1e-6);
    }

    #[test]
    fn fit_with_no_room_is_noop() {
        let mut vp = Viewport::new();
        vp.zoom = 1.7;
        let rect = Rect::from_min_size(Pos2::new(0.0, 0.0), Vec2::new(10.0, 10.0));
        vp.fit_to_page(rect, 100, 100);
        assert!((vp.zoom - 1.7).abs() < 1e-6);
        vp.fit_to_page(canvas(), 0, 100);
        assert!((vp.zoom - 1.7).abs() < 1e-6);
    }

    #[test]
    fn pan_throttle_keeps_only_latest() {
        let mut vp = Viewport::new();
        vp.request_pan(Vec2::new(10.0, 0.0), 0.0);
        assert_eq!(vp.pan_offset(), Vec2::new(10.0, 0.0));
        // within the frame interval: queued, not applied
        vp.request_pan(Vec2::new(20.0, 0.0), 0.005);
        vp.request_pan(Vec2::new(30.0, 0.0), 0.010);
        assert_eq!(vp.pan_offset(), Vec2::new(10.0, 0.0));
        // next frame: only the most recent target lands
        vp.tick_pan(0.020);
        assert_eq!(vp.pan_offset(), Vec2::new(30.0, 0.0));
    }

    #[test]
    fn resize_refit_is_debounced_and_tolerant() {
        let mut vp = Viewport::new();
        let rect = Rect::from_min_size(Pos2::new(0.0, 0.0), Vec2::new(532.0, 432.0));
        vp.fit_to_page(rect, 1000, 800);
        assert!((vp.zoom - 0.5).abs() < 1e-6);

        // small jitter below tolerance never arms a refit
        let jitter = Rect::from_min_size(Pos2::new(0.0, 0.0), Vec2::new(534.0, 432.0));
        vp.observe_container(jitter, 1.0);
        vp.tick_refit(jitter, Some((1000, 800)), 2.0);
        assert!((vp.zoom - 0.5).abs() < 1e-6);

        // real growth: refit only after the debounce window
        let grown = Rect::from_min_size(Pos2::new(0.0, 0.0), Vec2::new(1032.0, 832.0));
        vp.observe_container(grown, 3.0);
        vp.tick_refit(grown, Some((1000, 800)), 3.05);
        assert!((vp.zoom - 0.5).abs() < 1e-6); // still inside the window
        // a stable size across later frames must not keep pushing the deadline
        vp.observe_container(grown, 3.06);
        vp.observe_container(grown, 3.08);
        vp.tick_refit(grown, Some((1000, 800)), 3.2);
        assert!((vp.zoom - 1.0).abs() < 1e-6); // 1000/1000 capped at 1.0
    }

    #[test]
    fn screen_image_round_trip() {
        let mut vp = Viewport::new();
        vp.zoom = 1.37;
        vp.pan_offset = Vec2::new(-40.0, 22.0);
        let rect = canvas();
        let p = vp.image_to_screen(123.0, 456.0, rect, 2000, 1600);
        let (x, y) = vp.screen_to_image(p, rect, 2000, 1600);
        assert!((x - 123.0).abs() < 1e-3);
        assert!((y - 456.0).abs() < 1e-3);
    }
}
