pub mod draw;
pub mod traits;
pub mod types;
pub mod yolo_detector;

pub use traits::{ObjectDetector, OcrEngine};
pub use types::{Detection, OcrSpan};
pub use yolo_detector::YoloDetector;
