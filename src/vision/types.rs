use serde::{Deserialize, Serialize};

use crate::geometry::{BoundingBox, Quad};

/// One detector hit: a pixel-space box with no associated text. Label IDs
/// are assigned later by the grounding layer, not by the detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// One OCR hit: a quadrilateral of 4 corner points plus the recognized text.
/// Spans are addressed by their position in the result sequence; that index
/// is only meaningful within the grounding call that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrSpan {
    pub quad: Quad,
    pub text: String,
}

impl OcrSpan {
    pub fn bbox(&self) -> BoundingBox {
        BoundingBox::from_quad(&self.quad)
    }
}
