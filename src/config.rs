use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{PinpointError, PinpointResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub grounding: GroundingConfig,
    pub llm: LlmClientConfig,
}

/// Tuning for the grounding subsystem itself. Threaded explicitly into each
/// component — there is no process-global flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundingConfig {
    /// Persist annotated / debug / original PNGs for each grounding call.
    #[serde(default = "default_true")]
    pub save_artifacts: bool,
    /// Directory for the timestamped PNG audit trail.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    /// Attempts per LLM disambiguation call before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Detector confidence cut-off.
    #[serde(default = "default_conf_threshold")]
    pub conf_threshold: f32,
    /// Detector NMS IoU cut-off.
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            save_artifacts: true,
            artifact_dir: default_artifact_dir(),
            max_retries: default_max_retries(),
            conf_threshold: default_conf_threshold(),
            iou_threshold: default_iou_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmClientConfig {
    pub api_base: String,
    /// Model name sent to the API (a vision-capable model).
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Short constrained replies only: an index or "NONE".
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Optional API key stored in config.toml (falls back to env var PINPOINT_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
}

impl LlmClientConfig {
    /// Key from config.toml, else the PINPOINT_API_KEY environment variable.
    pub fn resolve_api_key(&self) -> PinpointResult<String> {
        if let Some(key) = &self.api_key {
            if !key.is_empty() {
                return Ok(key.clone());
            }
        }
        std::env::var("PINPOINT_API_KEY").map_err(|_| {
            PinpointError::Config(
                "no API key in config.toml and PINPOINT_API_KEY is unset".into(),
            )
        })
    }
}

fn default_true() -> bool {
    true
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("grounding_artifacts")
}

fn default_max_retries() -> u32 {
    3
}

fn default_conf_threshold() -> f32 {
    0.25
}

fn default_iou_threshold() -> f32 {
    0.45
}

fn default_temperature() -> f64 {
    0.1
}

fn default_max_tokens() -> u32 {
    10
}

fn resolve_config_path() -> PinpointResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(PinpointError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn load_config() -> PinpointResult<AppConfig> {
    // Load .env if present so PINPOINT_API_KEY can live there.
    let _ = dotenvy::dotenv();

    let path = resolve_config_path()?;
    let content = std::fs::read_to_string(&path)?;
    let config: AppConfig = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), model = %config.llm.model, "config loaded");
    Ok(config)
}
