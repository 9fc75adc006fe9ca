use crate::errors::PinpointResult;
use crate::vision::types::{Detection, OcrSpan};

/// UI element detector seam. One inference per screenshot; detections come
/// back in the detector's own order, which the label grounding layer relies
/// on for first-come suppression.
pub trait ObjectDetector: Send {
    fn detect(&mut self, image: &image::DynamicImage) -> PinpointResult<Vec<Detection>>;
}

/// OCR engine seam: every recognized text region on the screenshot, with its
/// quadrilateral box, in the engine's result order.
pub trait OcrEngine: Send {
    fn recognize(&mut self, image: &image::DynamicImage) -> PinpointResult<Vec<OcrSpan>>;
}
