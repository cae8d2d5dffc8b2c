//! HTTP gateway to the segmentation backend.
//!
//! All calls run on background threads (`rayon::spawn`) and report back
//! through an `mpsc` channel the app drains each frame. Requests that can be
//! superseded carry a caller-chosen token; the app compares it against its
//! current token and discards stale completions — responses are never
//! ordered, so the token check is what keeps a slow early reply from
//! clobbering a fresh one.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::mpsc;
use std::time::Duration;

use crate::mask::{self, MaskCandidate};
use crate::prompts::{BoxPrompt, PointPrompt};

/// Errors surfaced to the user as short inline strings.
#[derive(Debug)]
pub enum GatewayError {
    /// Transport-level failure (connection refused, timeout, DNS).
    Http(String),
    /// The backend answered with a non-2xx status.
    Backend(u16, String),
    /// The response body did not parse.
    Decode(String),
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Http(e) => write!(f, "request failed: {}", e),
            GatewayError::Backend(code, body) => {
                if body.is_empty() {
                    write!(f, "backend error {}", code)
                } else {
                    write!(f, "backend error {}: {}", code, body)
                }
            }
            GatewayError::Decode(e) => write!(f, "invalid response: {}", e),
        }
    }
}

impl std::error::Error for GatewayError {}

// ============================================================================
// WIRE TYPES — mirror the backend's request/response schemas
// ============================================================================

#[derive(Clone, Debug, Serialize)]
pub struct PointDto {
    pub x: f32,
    pub y: f32,
    /// 1 = positive (include), 0 = negative (exclude).
    pub label: i32,
}

#[derive(Clone, Debug, Serialize)]
pub struct InteractiveSegmentRequest {
    pub image_base64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<PointDto>>,
    /// Single-box mode.
    #[serde(rename = "box", skip_serializing_if = "Option::is_none")]
    pub box_prompt: Option<[f32; 4]>,
    /// Multi-box mode; masks are merged backend-side.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boxes: Option<Vec<[f32; 4]>>,
    /// Binarized refinement mask (legacy fallback).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_input_base64: Option<String>,
    /// Low-res logits from a previous response; preferred for refinement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_logits_base64: Option<String>,
    pub multimask_output: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
}

impl InteractiveSegmentRequest {
    /// Assemble a request from the accumulated prompts. When `refine` is the
    /// currently selected candidate, its low-res logits are carried forward
    /// (preferred), falling back to the binarized mask.
    pub fn from_prompts(
        image_base64: String,
        points: &[PointPrompt],
        boxes: &[BoxPrompt],
        refine: Option<&MaskCandidate>,
        doc_id: Option<String>,
    ) -> Self {
        let points_dto = if points.is_empty() {
            None
        } else {
            Some(
                points
                    .iter()
                    .map(|p| PointDto {
                        x: p.x,
                        y: p.y,
                        label: p.label.as_i32(),
                    })
                    .collect(),
            )
        };
        let (box_prompt, boxes_dto) = match boxes.len() {
            0 => (None, None),
            1 => (Some(boxes[0].as_array()), None),
            _ => (None, Some(boxes.iter().map(|b| b.as_array()).collect())),
        };
        let (mask_logits_base64, mask_input_base64) = match refine {
            Some(c) => match &c.low_res_logits_b64 {
                Some(logits) => (Some(logits.clone()), None),
                None => (None, mask::encode_mask_png(&c.mask).ok()),
            },
            None => (None, None),
        };
        Self {
            image_base64,
            points: points_dto,
            box_prompt,
            boxes: boxes_dto,
            mask_input_base64,
            mask_logits_base64,
            multimask_output: true,
            doc_id,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct MaskCandidateDto {
    pub mask_base64: String,
    pub iou_score: f32,
    pub bbox: [f32; 4],
    #[serde(default)]
    pub low_res_logits_base64: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InteractiveSegmentResponse {
    pub masks: Vec<MaskCandidateDto>,
    pub image_size: [u32; 2],
    pub processing_time_ms: f32,
}

/// Decode wire candidates into display form, re-asserting best-first order
/// so index 0 is always the default pick even if the backend misbehaves.
pub fn decode_candidates(
    dtos: Vec<MaskCandidateDto>,
) -> Result<Vec<MaskCandidate>, mask::MaskError> {
    let mut out = Vec::with_capacity(dtos.len());
    for dto in dtos {
        let decoded = mask::decode_mask_png(&dto.mask_base64)?;
        out.push(MaskCandidate::new(
            decoded,
            dto.iou_score,
            Some(dto.bbox),
            dto.low_res_logits_base64,
        ));
    }
    out.sort_by(|a, b| b.iou_score.total_cmp(&a.iou_score));
    Ok(out)
}

#[derive(Clone, Debug, Serialize)]
pub struct SegmentRequest {
    pub image_base64: String,
    pub prompts: Vec<String>,
    pub return_masks: bool,
    pub return_crops: bool,
    pub confidence_threshold: f32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ZoneResult {
    pub zone_id: String,
    pub zone_type: String,
    pub prompt_matched: String,
    pub confidence: f32,
    pub bbox: Vec<f32>,
    #[serde(default)]
    pub bbox_normalized: Option<Vec<f32>>,
    #[serde(default)]
    pub area_ratio: Option<f32>,
    #[serde(default)]
    pub mask_base64: Option<String>,
    #[serde(default)]
    pub crop_base64: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SegmentResponse {
    #[serde(default)]
    pub zones: Vec<ZoneResult>,
    pub image_size: [u32; 2],
    pub processing_time_ms: f32,
    #[serde(default)]
    pub model_version: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct FindSimilarRequest {
    pub image_base64: String,
    pub exemplar_mask_base64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exemplar_bbox: Option<[f32; 4]>,
    pub max_results: usize,
    pub similarity_threshold: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SimilarRegion {
    pub region_id: String,
    pub mask_base64: String,
    pub bbox: [f32; 4],
    pub similarity_score: f32,
    #[serde(default)]
    pub iou_score: Option<f32>,
    #[serde(default)]
    pub low_res_logits_base64: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FindSimilarResponse {
    #[serde(default)]
    pub regions: Vec<SimilarRegion>,
    pub exemplar_bbox: [f32; 4],
    pub image_size: [u32; 2],
    pub processing_time_ms: f32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub model: String,
    pub model_loaded: bool,
    #[serde(default)]
    pub gpu_available: bool,
    #[serde(default)]
    pub gpu_name: Option<String>,
    #[serde(default)]
    pub gpu_memory_used_mb: Option<u64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DocumentMetadata {
    pub doc_id: String,
    pub filename: String,
    #[serde(default)]
    pub original_filename: Option<String>,
    #[serde(default)]
    pub upload_date: String,
    #[serde(default)]
    pub file_size_bytes: Option<u64>,
    #[serde(default)]
    pub image_width: Option<u32>,
    #[serde(default)]
    pub image_height: Option<u32>,
    #[serde(default)]
    pub file_format: Option<String>,
    #[serde(default = "default_total_pages")]
    pub total_pages: u32,
}

fn default_total_pages() -> u32 {
    1
}

#[derive(Clone, Debug, Deserialize)]
struct DocumentListResponse {
    #[serde(default)]
    documents: Vec<DocumentMetadata>,
}

// ============================================================================
// EVENTS + CLIENT
// ============================================================================

/// A fetched page image: decoded pixels for display plus the original
/// encoded bytes, re-used verbatim as `image_base64` in inference requests.
pub struct PageImagePayload {
    pub image: image::RgbaImage,
    pub image_base64: String,
}

/// Completion delivered from a background request thread.
pub enum GatewayEvent {
    Health(Result<HealthResponse, GatewayError>),
    Documents {
        token: u64,
        result: Result<Vec<DocumentMetadata>, GatewayError>,
    },
    PageImage {
        doc_id: String,
        result: Result<PageImagePayload, GatewayError>,
    },
    Interactive {
        token: u64,
        result: Result<InteractiveSegmentResponse, GatewayError>,
    },
    TextSegment {
        token: u64,
        result: Result<SegmentResponse, GatewayError>,
    },
    FindSimilar {
        token: u64,
        result: Result<FindSimilarResponse, GatewayError>,
    },
}

/// Thin, cloneable handle around the HTTP agent. Every method returns
/// immediately; the matching [`GatewayEvent`] arrives on the channel.
#[derive(Clone)]
pub struct Gateway {
    base_url: String,
    agent: ureq::Agent,
    sender: mpsc::Sender<GatewayEvent>,
}

impl Gateway {
    pub fn new(base_url: &str, timeout_secs: u64, sender: mpsc::Sender<GatewayEvent>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent,
            sender,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn poll_health(&self) {
        let this = self.clone();
        rayon::spawn(move || {
            let result = this.get_json::<HealthResponse>("/health");
            let _ = this.sender.send(GatewayEvent::Health(result));
        });
    }

    pub fn fetch_documents(&self, token: u64) {
        let this = self.clone();
        rayon::spawn(move || {
            let result = this
                .get_json::<DocumentListResponse>("/documents")
                .map(|r| r.documents);
            let _ = this.sender.send(GatewayEvent::Documents { token, result });
        });
    }

    /// Fetch and decode a document's page image.
    pub fn fetch_page_image(&self, doc_id: String) {
        let this = self.clone();
        rayon::spawn(move || {
            let result = this.get_image(&format!("/documents/{}/image", doc_id));
            let _ = this.sender.send(GatewayEvent::PageImage { doc_id, result });
        });
    }

    pub fn segment_interactive(&self, token: u64, req: InteractiveSegmentRequest) {
        let this = self.clone();
        rayon::spawn(move || {
            let result = this.post_json::<_, InteractiveSegmentResponse>("/segment/interactive", &req);
            let _ = this.sender.send(GatewayEvent::Interactive { token, result });
        });
    }

    pub fn segment_text(&self, token: u64, req: SegmentRequest) {
        let this = self.clone();
        rayon::spawn(move || {
            let result = this.post_json::<_, SegmentResponse>("/segment", &req);
            let _ = this.sender.send(GatewayEvent::TextSegment { token, result });
        });
    }

    pub fn find_similar(&self, token: u64, req: FindSimilarRequest) {
        let this = self.clone();
        rayon::spawn(move || {
            let result = this.post_json::<_, FindSimilarResponse>("/segment/find-similar", &req);
            let _ = this.sender.send(GatewayEvent::FindSimilar { token, result });
        });
    }

    fn get_json<Resp: DeserializeOwned>(&self, path: &str) -> Result<Resp, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.agent.get(&url).call().map_err(map_ureq_error)?;
        resp.into_json::<Resp>()
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    fn post_json<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        req: &Req,
    ) -> Result<Resp, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .agent
            .post(&url)
            .send_json(req)
            .map_err(map_ureq_error)?;
        resp.into_json::<Resp>()
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    fn get_image(&self, path: &str) -> Result<PageImagePayload, GatewayError> {
        use base64::Engine;
        let url = format!("{}{}", self.base_url, path);
        let resp = self.agent.get(&url).call().map_err(map_ureq_error)?;
        let mut bytes: Vec<u8> = Vec::new();
        use std::io::Read;
        resp.into_reader()
            .take(128 * 1024 * 1024)
            .read_to_end(&mut bytes)
            .map_err(|e| GatewayError::Http(e.to_string()))?;
        let img = image::load_from_memory(&bytes)
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        Ok(PageImagePayload {
            image: img.into_rgba8(),
            image_base64: base64::engine::general_purpose::STANDARD.encode(&bytes),
        })
    }
}

fn map_ureq_error(e: ureq::Error) -> GatewayError {
    match e {
        ureq::Error::Status(code, resp) => {
            let mut body = resp.into_string().unwrap_or_default();
            body.truncate(200);
            GatewayError::Backend(code, body)
        }
        ureq::Error::Transport(t) => GatewayError::Http(t.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::{BoxPrompt, PointLabel, PromptSet};
    use image::GrayImage;

    fn tiny_mask_b64() -> String {
        let mut m = GrayImage::new(4, 4);
        m.put_pixel(1, 1, image::Luma([255]));
        mask::encode_mask_png(&m).unwrap()
    }

    #[test]
    fn single_box_serializes_as_box_field() {
        let mut set = PromptSet::new(16);
        set.add_box(BoxPrompt::from_corners(1.0, 2.0, 3.0, 4.0));
        let req = InteractiveSegmentRequest::from_prompts(
            "imgdata".into(),
            set.points(),
            set.boxes(),
            None,
            None,
        );
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["box"], serde_json::json!([1.0, 2.0, 3.0, 4.0]));
        assert!(v.get("boxes").is_none());
        assert!(v.get("points").is_none());
        assert!(v.get("mask_input_base64").is_none());
        assert!(v.get("mask_logits_base64").is_none());
    }

    #[test]
    fn multiple_boxes_serialize_as_boxes_field() {
        let mut set = PromptSet::new(16);
        set.box_mode = crate::prompts::BoxMode::Multi;
        set.add_box(BoxPrompt::from_corners(0.0, 0.0, 1.0, 1.0));
        set.add_box(BoxPrompt::from_corners(2.0, 2.0, 3.0, 3.0));
        let req = InteractiveSegmentRequest::from_prompts(
            "imgdata".into(),
            set.points(),
            set.boxes(),
            None,
            None,
        );
        let v = serde_json::to_value(&req).unwrap();
        assert!(v.get("box").is_none());
        assert_eq!(v["boxes"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn point_labels_reach_the_wire_as_integers() {
        let mut set = PromptSet::new(16);
        set.add_point(120.0, 80.0, PointLabel::Positive);
        set.add_point(10.0, 20.0, PointLabel::Negative);
        let req = InteractiveSegmentRequest::from_prompts(
            "imgdata".into(),
            set.points(),
            set.boxes(),
            None,
            None,
        );
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["points"][0]["label"], 1);
        assert_eq!(v["points"][1]["label"], 0);
        assert_eq!(v["points"][0]["x"], 120.0);
    }

    #[test]
    fn refinement_prefers_logits_over_binarized_mask() {
        let m = GrayImage::new(4, 4);
        let with_logits = MaskCandidate::new(m.clone(), 0.9, None, Some("LOGITS".into()));
        let req = InteractiveSegmentRequest::from_prompts(
            "img".into(),
            &[],
            &[],
            Some(&with_logits),
            None,
        );
        assert_eq!(req.mask_logits_base64.as_deref(), Some("LOGITS"));
        assert!(req.mask_input_base64.is_none());

        let without_logits = MaskCandidate::new(m, 0.9, None, None);
        let req = InteractiveSegmentRequest::from_prompts(
            "img".into(),
            &[],
            &[],
            Some(&without_logits),
            None,
        );
        assert!(req.mask_logits_base64.is_none());
        assert!(req.mask_input_base64.is_some());
    }

    #[test]
    fn candidates_decode_ranked_best_first() {
        let dtos = vec![
            MaskCandidateDto {
                mask_base64: tiny_mask_b64(),
                iou_score: 0.81,
                bbox: [0.0, 0.0, 2.0, 2.0],
                low_res_logits_base64: None,
            },
            MaskCandidateDto {
                mask_base64: tiny_mask_b64(),
                iou_score: 0.92,
                bbox: [0.0, 0.0, 2.0, 2.0],
                low_res_logits_base64: Some("L".into()),
            },
        ];
        let candidates = decode_candidates(dtos).unwrap();
        assert!((candidates[0].iou_score - 0.92).abs() < 1e-6);
        assert!((candidates[1].iou_score - 0.81).abs() < 1e-6);
    }

    #[test]
    fn interactive_response_parses_backend_shape() {
        let json = format!(
            "{{\"masks\":[{{\"mask_base64\":\"{}\",\"iou_score\":0.92,\
             \"bbox\":[10.0,20.0,30.0,40.0],\"low_res_logits_base64\":null}}],\
             \"image_size\":[1000,800],\"processing_time_ms\":41.5}}",
            tiny_mask_b64()
        );
        let resp: InteractiveSegmentResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(resp.masks.len(), 1);
        assert_eq!(resp.image_size, [1000, 800]);
    }

    #[test]
    fn health_parses_degraded_backend() {
        let resp: HealthResponse =
            serde_json::from_str("{\"status\":\"ok\",\"model_loaded\":false}").unwrap();
        assert!(!resp.model_loaded);
        assert!(!resp.gpu_available);
    }

    #[test]
    fn document_listing_tolerates_missing_optionals() {
        let resp: DocumentListResponse = serde_json::from_str(
            "{\"documents\":[{\"doc_id\":\"d1\",\"filename\":\"a.png\"}],\"total_count\":1}",
        )
        .unwrap();
        assert_eq!(resp.documents[0].doc_id, "d1");
        assert_eq!(resp.documents[0].total_pages, 1);
    }
}
