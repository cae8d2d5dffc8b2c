//! Raster mask payloads: base64 PNG decode/encode, bounding boxes, and the
//! runtime form of an inference mask candidate.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use image::GrayImage;

/// Errors raised while decoding or encoding mask payloads.
#[derive(Debug)]
pub enum MaskError {
    Base64(String),
    Image(String),
    Encode(String),
}

impl std::fmt::Display for MaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MaskError::Base64(e) => write!(f, "invalid base64 mask payload: {}", e),
            MaskError::Image(e) => write!(f, "invalid mask image: {}", e),
            MaskError::Encode(e) => write!(f, "failed to encode mask: {}", e),
        }
    }
}

impl std::error::Error for MaskError {}

/// Decode a base64 PNG into a grayscale mask (0 = background, 255 = mask).
pub fn decode_mask_png(b64: &str) -> Result<GrayImage, MaskError> {
    let bytes = B64
        .decode(b64.as_bytes())
        .map_err(|e| MaskError::Base64(e.to_string()))?;
    let img = image::load_from_memory(&bytes).map_err(|e| MaskError::Image(e.to_string()))?;
    Ok(img.into_luma8())
}

/// Encode a grayscale mask as a base64 PNG (for exemplar / refine payloads).
pub fn encode_mask_png(mask: &GrayImage) -> Result<String, MaskError> {
    let mut bytes: Vec<u8> = Vec::new();
    let dyn_img = image::DynamicImage::ImageLuma8(mask.clone());
    dyn_img
        .write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageOutputFormat::Png,
        )
        .map_err(|e| MaskError::Encode(e.to_string()))?;
    Ok(B64.encode(&bytes))
}

/// Tight bounding box `[x1, y1, x2, y2]` of all mask pixels > 127, with the
/// max edge exclusive. `None` for an empty mask.
pub fn bbox_of(mask: &GrayImage) -> Option<[f32; 4]> {
    let (w, h) = mask.dimensions();
    let mut min_x = w;
    let mut min_y = h;
    let mut max_x = 0u32;
    let mut max_y = 0u32;
    let mut any = false;
    for (x, y, p) in mask.enumerate_pixels() {
        if p.0[0] > 127 {
            any = true;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }
    if any {
        Some([
            min_x as f32,
            min_y as f32,
            (max_x + 1) as f32,
            (max_y + 1) as f32,
        ])
    } else {
        None
    }
}

/// Number of mask pixels > 127.
pub fn mask_area(mask: &GrayImage) -> u64 {
    mask.pixels().filter(|p| p.0[0] > 127).count() as u64
}

/// A ranked mask returned by inference, decoded for display and refinement.
///
/// The low-res logits stay opaque (base64 `.npy`): the client never inspects
/// them, it only forwards them on the next refinement call.
#[derive(Clone)]
pub struct MaskCandidate {
    pub mask: GrayImage,
    pub iou_score: f32,
    pub bbox: [f32; 4],
    pub low_res_logits_b64: Option<String>,
}

impl MaskCandidate {
    pub fn new(
        mask: GrayImage,
        iou_score: f32,
        bbox: Option<[f32; 4]>,
        low_res_logits_b64: Option<String>,
    ) -> Self {
        let bbox = bbox
            .or_else(|| bbox_of(&mask))
            .unwrap_or([0.0, 0.0, 0.0, 0.0]);
        Self {
            mask,
            iou_score,
            bbox,
            low_res_logits_b64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob_mask(w: u32, h: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> GrayImage {
        let mut m = GrayImage::new(w, h);
        for y in y0..y1 {
            for x in x0..x1 {
                m.put_pixel(x, y, image::Luma([255]));
            }
        }
        m
    }

    #[test]
    fn bbox_covers_lit_pixels_exclusively() {
        let m = blob_mask(20, 10, 3, 2, 8, 6);
        assert_eq!(bbox_of(&m), Some([3.0, 2.0, 8.0, 6.0]));
        assert_eq!(mask_area(&m), 5 * 4);
    }

    #[test]
    fn empty_mask_has_no_bbox() {
        let m = GrayImage::new(4, 4);
        assert_eq!(bbox_of(&m), None);
        assert_eq!(mask_area(&m), 0);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_mask_png("!!!not-base64!!!").is_err());
        // valid base64, invalid image
        let junk = base64::engine::general_purpose::STANDARD.encode(b"hello");
        assert!(decode_mask_png(&junk).is_err());
    }

    #[test]
    fn encoded_mask_decodes_to_same_pixels() {
        let m = blob_mask(6, 6, 1, 1, 4, 5);
        let b64 = encode_mask_png(&m).unwrap();
        let back = decode_mask_png(&b64).unwrap();
        assert_eq!(m, back);
    }

    #[test]
    fn candidate_falls_back_to_computed_bbox() {
        let m = blob_mask(10, 10, 2, 3, 5, 7);
        let c = MaskCandidate::new(m, 0.9, None, None);
        assert_eq!(c.bbox, [2.0, 3.0, 5.0, 7.0]);
    }
}
