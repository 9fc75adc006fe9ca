/// ONNX YOLOv8 inference for UI element detection.
///
/// Loads a YOLOv8 ONNX model and runs detection on screenshots, producing
/// pixel-space boxes for the label grounding layer. Falls back gracefully
/// if the model file is missing.
use crate::errors::{PinpointError, PinpointResult};
use crate::geometry::BoundingBox;
use crate::vision::traits::ObjectDetector;
use crate::vision::types::Detection;

use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

/// Holds the ONNX Runtime session and inference configuration.
pub struct YoloDetector {
    session: Session,
    input_size: u32,
    conf_threshold: f32,
    iou_threshold: f32,
}

impl YoloDetector {
    /// Try to construct a detector.  Returns `None` if the model file does not exist.
    pub fn try_new(model_path: &str, conf_threshold: f32, iou_threshold: f32) -> Option<Self> {
        if !Path::new(model_path).exists() {
            tracing::warn!(path = %model_path, "YOLO model not found — label grounding disabled");
            return None;
        }
        match Self::build(model_path, conf_threshold, iou_threshold) {
            Ok(det) => {
                tracing::info!(path = %model_path, "YOLO detector loaded");
                Some(det)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to load YOLO model");
                None
            }
        }
    }

    fn build(model_path: &str, conf_threshold: f32, iou_threshold: f32) -> PinpointResult<Self> {
        let session = Session::builder()
            .map_err(|e| PinpointError::Perception(format!("ort session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| PinpointError::Perception(format!("ort opt-level: {e}")))?
            .commit_from_file(model_path)
            .map_err(|e| PinpointError::Perception(format!("ort load model: {e}")))?;

        Ok(Self {
            session,
            input_size: 640,
            conf_threshold,
            iou_threshold,
        })
    }

    // ── Pre-processing ──────────────────────────────────────────────────────

    /// Resize + letterbox + normalise → NCHW f32 tensor.
    fn preprocess(
        &self,
        img: &image::DynamicImage,
    ) -> PinpointResult<(Array4<f32>, f32, f32, f32)> {
        let sz = self.input_size;
        let (ow, oh) = (img.width() as f32, img.height() as f32);
        let scale = (sz as f32 / ow).min(sz as f32 / oh);
        let nw = (ow * scale).round() as u32;
        let nh = (oh * scale).round() as u32;
        let pad_x = (sz - nw) as f32 / 2.0;
        let pad_y = (sz - nh) as f32 / 2.0;

        let resized = img.resize_exact(nw, nh, image::imageops::FilterType::CatmullRom);
        let rgb = resized.to_rgb8();

        // Grey‐fill canvas
        let mut canvas = image::RgbImage::from_pixel(sz, sz, image::Rgb([114, 114, 114]));
        image::imageops::overlay(&mut canvas, &rgb, pad_x.round() as i64, pad_y.round() as i64);

        // HWC → NCHW normalised [0, 1]
        let mut tensor = Array4::<f32>::zeros((1, 3, sz as usize, sz as usize));
        for y in 0..sz {
            for x in 0..sz {
                let p = canvas.get_pixel(x, y);
                tensor[[0, 0, y as usize, x as usize]] = p[0] as f32 / 255.0;
                tensor[[0, 1, y as usize, x as usize]] = p[1] as f32 / 255.0;
                tensor[[0, 2, y as usize, x as usize]] = p[2] as f32 / 255.0;
            }
        }

        Ok((tensor, pad_x, pad_y, scale))
    }

    // ── Post-processing ─────────────────────────────────────────────────────

    fn postprocess(
        &self,
        output: &ndarray::ArrayViewD<f32>,
        orig_w: u32,
        orig_h: u32,
        pad_x: f32,
        pad_y: f32,
        scale: f32,
    ) -> PinpointResult<Vec<Detection>> {
        // YOLOv8 output: [1, 4+num_classes, num_proposals]
        let shape = output.shape();
        if shape.len() < 3 {
            return Err(PinpointError::Perception(format!(
                "unexpected output shape: {:?}",
                shape
            )));
        }
        let num_classes = shape[1] - 4;
        let num_preds = shape[2];

        let mut detections: Vec<Detection> = Vec::new();

        for i in 0..num_preds {
            let cx = output[[0, 0, i]];
            let cy = output[[0, 1, i]];
            let w = output[[0, 2, i]];
            let h = output[[0, 3, i]];

            // Best class score — the UI detector is effectively single-class,
            // class identity is not carried forward.
            let mut max_score = 0.0f32;
            for c in 0..num_classes {
                let s = output[[0, 4 + c, i]];
                if s > max_score {
                    max_score = s;
                }
            }
            if max_score < self.conf_threshold {
                continue;
            }

            // Undo letterbox → original pixel space, clamped to image bounds
            let x1 = (((cx - w / 2.0) - pad_x) / scale).clamp(0.0, orig_w as f32);
            let y1 = (((cy - h / 2.0) - pad_y) / scale).clamp(0.0, orig_h as f32);
            let x2 = (((cx + w / 2.0) - pad_x) / scale).clamp(0.0, orig_w as f32);
            let y2 = (((cy + h / 2.0) - pad_y) / scale).clamp(0.0, orig_h as f32);

            detections.push(Detection {
                bbox: BoundingBox::new(x1, y1, x2, y2),
                confidence: max_score,
            });
        }

        // NMS over all surviving proposals
        let kept = self.nms(&detections);
        Ok(kept.into_iter().map(|i| detections[i].clone()).collect())
    }

    /// Greedy NMS.
    fn nms(&self, dets: &[Detection]) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..dets.len()).collect();
        indices.sort_by(|&a, &b| {
            dets[b]
                .confidence
                .partial_cmp(&dets[a].confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut keep = Vec::new();
        let mut suppressed = vec![false; dets.len()];

        for &i in &indices {
            if suppressed[i] {
                continue;
            }
            keep.push(i);
            for &j in &indices {
                if suppressed[j] || i == j {
                    continue;
                }
                if iou(&dets[i].bbox, &dets[j].bbox) > self.iou_threshold {
                    suppressed[j] = true;
                }
            }
        }
        keep
    }
}

impl ObjectDetector for YoloDetector {
    /// Run one inference pass.
    fn detect(&mut self, image: &image::DynamicImage) -> PinpointResult<Vec<Detection>> {
        let (orig_w, orig_h) = (image.width(), image.height());

        let (input_tensor, pad_x, pad_y, scale) = self.preprocess(image)?;

        let input_value = Tensor::from_array(input_tensor)
            .map_err(|e| PinpointError::Perception(format!("ort tensor: {e}")))?;

        let output_owned = {
            let outputs = self
                .session
                .run(ort::inputs![input_value])
                .map_err(|e| PinpointError::Perception(format!("ort run: {e}")))?;

            outputs[0]
                .try_extract_array::<f32>()
                .map_err(|e| PinpointError::Perception(format!("extract tensor: {e}")))?
                .to_owned()
            // `outputs` (and the mutable borrow on session) is dropped here
        };

        self.postprocess(&output_owned.view(), orig_w, orig_h, pad_x, pad_y, scale)
    }
}

// ── Utilities ────────────────────────────────────────────────────────────────

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let ix1 = a.x1.max(b.x1);
    let iy1 = a.y1.max(b.y1);
    let ix2 = a.x2.min(b.x2);
    let iy2 = a.y2.min(b.y2);

    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    let union = area_a + area_b - inter;

    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}
