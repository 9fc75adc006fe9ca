pub mod artifacts;
pub mod disambiguate;
pub mod label;
pub mod ocr;

pub use label::{add_labels, click_position, drag_positions, resolve_label, LabelMap, LabeledScreen};
pub use ocr::{
    find_drag_text, find_text, ground_drag_text, ground_text, span_center, DragMatch, Resolution,
    TextMatch,
};
