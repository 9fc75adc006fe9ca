//! Pinpoint — UI-element grounding for vision-driven desktop agents.
//!
//! Given a screenshot and a symbolic target (a `~N` label from object
//! detection, or a search text matched against OCR spans), resolve it to a
//! resolution-independent percent coordinate that an input-injection layer
//! can act on. Ambiguous or missing text targets are settled by an LLM
//! disambiguation protocol with bounded retries.

pub mod config;
pub mod errors;
pub mod geometry;
pub mod grounding;
pub mod llm;
pub mod vision;

pub use config::{AppConfig, GroundingConfig, LlmClientConfig};
pub use errors::{PinpointError, PinpointResult};
pub use geometry::{BoundingBox, PercentPoint, Quad};
pub use grounding::{
    add_labels, click_position, drag_positions, find_drag_text, find_text, ground_drag_text,
    ground_text, resolve_label, span_center, DragMatch, LabelMap, LabeledScreen, Resolution,
    TextMatch,
};
pub use llm::{LlmClient, OpenAiCompatibleClient};
pub use vision::{Detection, ObjectDetector, OcrEngine, OcrSpan, YoloDetector};

/// Install the global tracing subscriber, honouring `RUST_LOG` and
/// defaulting to `debug`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .init();
}
