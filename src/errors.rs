use thiserror::Error;

#[derive(Debug, Error)]
pub enum PinpointError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("Perception error: {0}")]
    Perception(String),

    #[error("Target not found: {0}")]
    NotFound(String),

    #[error("Index {index} out of range for {len} OCR spans")]
    InvalidIndex { index: usize, len: usize },

    #[error("Disambiguation failed: {0}")]
    Disambiguation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

impl serde::Serialize for PinpointError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type PinpointResult<T> = Result<T, PinpointError>;
