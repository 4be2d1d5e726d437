//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes an RGB frame into the 640×640 model input, decodes the three
//! anchor-free stride heads, and merges overlapping candidates with NMS.

use crate::frame::Frame;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: usize = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("unexpected detector outputs: {0}")]
    BadOutputs(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// One face candidate in frame coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceCandidate {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
    /// Left eye, right eye, nose, left mouth corner, right mouth corner.
    pub landmarks: [(f32, f32); 5],
}

impl FaceCandidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &FaceCandidate) -> f32 {
        let iw = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let ih = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = iw * ih;
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Scale and padding applied when fitting the frame into the model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((INPUT_SIZE as f32 - new_w) / 2.0).floor(),
            pad_y: ((INPUT_SIZE as f32 - new_h) / 2.0).floor(),
        }
    }

    /// Map a point from model-input space back to frame space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output slots (score, bbox, kps) for one stride.
type StrideSlots = (usize, usize, usize);

pub struct FaceDetector {
    session: Session,
    slots: [StrideSlots; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if names.len() < 9 {
            return Err(DetectorError::BadOutputs(format!(
                "expected 9 outputs with keypoints, got {}",
                names.len()
            )));
        }

        let slots = output_slots(&names);
        tracing::info!(path = %model_path.display(), ?slots, "loaded SCRFD detector");

        Ok(Self { session, slots })
    }

    /// Detect faces, returned in descending score order.
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceCandidate>, DetectorError> {
        let (input, letterbox) = preprocess(frame);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in STRIDES.iter().enumerate() {
            let (score_i, bbox_i, kps_i) = self.slots[pos];
            let extract = |i: usize, what: &str| {
                outputs[i]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data.to_vec())
                    .map_err(|e| DetectorError::BadOutputs(format!("{what} stride {stride}: {e}")))
            };
            let scores = extract(score_i, "scores")?;
            let boxes = extract(bbox_i, "boxes")?;
            let kps = extract(kps_i, "keypoints")?;
            decode_stride(&scores, &boxes, &kps, stride, &letterbox, &mut candidates);
        }

        Ok(non_max_suppression(candidates, NMS_IOU_THRESHOLD))
    }
}

/// Map output names to per-stride slots, preferring `score_8`-style names
/// and falling back to the standard positional layout.
fn output_slots(names: &[String]) -> [StrideSlots; 3] {
    let find = |prefix: &str, stride: usize| {
        let wanted = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == wanted)
    };
    let named: Option<Vec<StrideSlots>> = STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?, find("kps", s)?)))
        .collect();
    match named {
        Some(v) => [v[0], v[1], v[2]],
        None => [(0, 3, 6), (1, 4, 7), (2, 5, 8)],
    }
}

/// Letterbox the RGB frame into a normalized NCHW tensor.
fn preprocess(frame: &Frame) -> (Array4<f32>, Letterbox) {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let lb = Letterbox::fit(w, h);
    let new_w = (w as f32 * lb.scale).round() as usize;
    let new_h = (h as f32 * lb.scale).round() as usize;
    let (ox, oy) = (lb.pad_x as usize, lb.pad_y as usize);

    // Padding is zero after normalization.
    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
    let inv = 1.0 / lb.scale;

    for y in 0..new_h.min(INPUT_SIZE - oy) {
        let sy = ((y as f32 + 0.5) * inv - 0.5).clamp(0.0, (h - 1) as f32);
        let y0 = sy.floor() as usize;
        let y1 = (y0 + 1).min(h - 1);
        let fy = sy - y0 as f32;

        for x in 0..new_w.min(INPUT_SIZE - ox) {
            let sx = ((x as f32 + 0.5) * inv - 0.5).clamp(0.0, (w - 1) as f32);
            let x0 = sx.floor() as usize;
            let x1 = (x0 + 1).min(w - 1);
            let fx = sx - x0 as f32;

            let (tl, tr) = (frame.pixel(x0, y0), frame.pixel(x1, y0));
            let (bl, br) = (frame.pixel(x0, y1), frame.pixel(x1, y1));
            for c in 0..3 {
                let top = f32::from(tl[c]) * (1.0 - fx) + f32::from(tr[c]) * fx;
                let bottom = f32::from(bl[c]) * (1.0 - fx) + f32::from(br[c]) * fx;
                let v = top * (1.0 - fy) + bottom * fy;
                tensor[[0, c, y + oy, x + ox]] = (v - PIXEL_MEAN) / PIXEL_STD;
            }
        }
    }

    (tensor, lb)
}

fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    stride: usize,
    lb: &Letterbox,
    out: &mut Vec<FaceCandidate>,
) {
    let grid = INPUT_SIZE / stride;
    let anchors = grid * grid * ANCHORS_PER_CELL;
    let s = stride as f32;

    for idx in 0..anchors.min(scores.len()) {
        let score = scores[idx];
        if score <= SCORE_THRESHOLD {
            continue;
        }
        let (Some(b), Some(k)) = (boxes.get(idx * 4..idx * 4 + 4), kps.get(idx * 10..idx * 10 + 10))
        else {
            continue;
        };

        let cell = idx / ANCHORS_PER_CELL;
        let cx = (cell % grid) as f32 * s;
        let cy = (cell / grid) as f32 * s;

        let (x1, y1) = lb.unmap(cx - b[0] * s, cy - b[1] * s);
        let (x2, y2) = lb.unmap(cx + b[2] * s, cy + b[3] * s);
        let landmarks = std::array::from_fn(|i| lb.unmap(cx + k[i * 2] * s, cy + k[i * 2 + 1] * s));

        out.push(FaceCandidate {
            x1,
            y1,
            x2,
            y2,
            score,
            landmarks,
        });
    }
}

fn non_max_suppression(mut candidates: Vec<FaceCandidate>, iou_threshold: f32) -> Vec<FaceCandidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<FaceCandidate> = Vec::with_capacity(candidates.len());
    for c in candidates {
        if kept.iter().all(|k| k.iou(&c) <= iou_threshold) {
            kept.push(c);
        }
    }
    kept
}
