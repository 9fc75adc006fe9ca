/// Label grounding: run the object detector over a screenshot, suppress
/// overlapping boxes, and hand the model an annotated image where every
/// clickable element carries a short `~N` label.
///
/// The label→box mapping lives for one decision cycle only; once the action
/// has executed the mapping is thrown away, because a fresh screenshot gets
/// a fresh set of labels.
use std::collections::HashMap;

use crate::config::GroundingConfig;
use crate::errors::{PinpointError, PinpointResult};
use crate::geometry::{is_overlapping, BoundingBox, PercentPoint};
use crate::grounding::artifacts;
use crate::vision::draw;
use crate::vision::traits::ObjectDetector;

/// Label ID (`"~0"`, `"~1"`, …) → pixel bounding box, for one screenshot.
pub type LabelMap = HashMap<String, BoundingBox>;

/// Output of one label-grounding pass.
pub struct LabeledScreen {
    /// Annotated PNG shown to the model: accepted boxes with `~N` markers.
    pub image_bytes: Vec<u8>,
    pub image_base64: String,
    pub labels: LabelMap,
}

/// Run detection and assign labels.
///
/// Detections are visited in detector order. A detection is accepted only if
/// its box overlaps none of the already-accepted boxes (first claim wins,
/// touching edges count as overlap); accepted boxes get contiguous IDs
/// starting at `~0`. Suppressed detections are still drawn on a separate
/// debug image with a `D_N` marker so nothing disappears silently.
pub fn add_labels(
    image_bytes: &[u8],
    detector: &mut dyn ObjectDetector,
    cfg: &GroundingConfig,
) -> PinpointResult<LabeledScreen> {
    let img = image::load_from_memory(image_bytes)
        .map_err(|e| PinpointError::Perception(format!("label load: {e}")))?;
    let mut labeled = img.to_rgba8();
    // Pristine copy, re-encoded as PNG for the artifact trail — the input
    // bytes may be JPEG.
    let original = labeled.clone();
    let mut debug = labeled.clone();
    let (w, _h) = labeled.dimensions();

    let detections = detector.detect(&img)?;
    tracing::debug!(count = detections.len(), "raw detections");

    let scale = draw::label_scale(w);
    let label_h = draw::label_height(scale);

    let mut labels: LabelMap = HashMap::new();
    let mut accepted: Vec<BoundingBox> = Vec::new();
    let mut counter = 0usize;

    for (i, det) in detections.iter().enumerate() {
        let b = det.bbox;
        let (x1, y1, x2, y2) = (
            b.x1.round() as i32,
            b.y1.round() as i32,
            b.x2.round() as i32,
            b.y2.round() as i32,
        );

        // Every raw detection lands on the debug image.
        draw::draw_rect(&mut debug, x1, y1, x2, y2, draw::DEBUG_COLOUR, 1);
        draw::draw_label(&mut debug, x1, y1 - label_h, &format!("D_{i}"), draw::DEBUG_COLOUR, scale);

        let overlap = accepted.iter().any(|prev| is_overlapping(&b, prev));
        if overlap {
            continue;
        }

        let label = format!("~{counter}");
        draw::draw_rect(&mut labeled, x1, y1, x2, y2, draw::ACCEPT_COLOUR, 1);
        draw::draw_label(&mut labeled, x1, y1 - label_h, &label, draw::ACCEPT_COLOUR, scale);

        accepted.push(b);
        labels.insert(label, b);
        counter += 1;
    }

    tracing::info!(
        accepted = labels.len(),
        suppressed = detections.len() - labels.len(),
        "labels assigned"
    );

    let labeled_png = draw::encode_png(&labeled)?;

    let ts = artifacts::timestamp();
    artifacts::persist(cfg, &format!("img_{ts}_labeled.png"), &labeled_png);
    if let Ok(debug_png) = draw::encode_png(&debug) {
        artifacts::persist(cfg, &format!("img_{ts}_debug.png"), &debug_png);
    }
    if let Ok(original_png) = draw::encode_png(&original) {
        artifacts::persist(cfg, &format!("img_{ts}_original.png"), &original_png);
    }

    let image_base64 = draw::to_base64(&labeled_png);
    Ok(LabeledScreen {
        image_bytes: labeled_png,
        image_base64,
        labels,
    })
}

/// Look up the box for a label the model named, e.g. `"~1"`.
pub fn resolve_label<'a>(label: &str, labels: &'a LabelMap) -> Option<&'a BoundingBox> {
    labels.get(label)
}

/// Centre of the labelled element as percent coordinates, or `None` if the
/// label does not exist in this cycle's mapping.
pub fn click_position(label: &str, labels: &LabelMap, image_size: (u32, u32)) -> Option<PercentPoint> {
    resolve_label(label, labels).map(|b| b.center_percent(image_size))
}

/// Start and end percent coordinates for a drag between two labelled
/// elements. Fails as a unit: if either label is absent there is no
/// half-usable result.
pub fn drag_positions(
    start_label: &str,
    end_label: &str,
    labels: &LabelMap,
    image_size: (u32, u32),
) -> Option<(PercentPoint, PercentPoint)> {
    let start = resolve_label(start_label, labels)?;
    let end = resolve_label(end_label, labels)?;
    Some((start.center_percent(image_size), end.center_percent(image_size)))
}
