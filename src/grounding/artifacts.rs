/// On-disk audit trail for grounding calls: timestamped PNG copies of the
/// annotated / debug / original images. This is a logging concern — a write
/// failure is warned about and otherwise ignored, and the whole trail can be
/// switched off in config.
use std::path::Path;

use crate::config::GroundingConfig;

/// Filename timestamp, second granularity. Two calls within the same second
/// overwrite each other — acceptable for a debug trail.
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d-%H%M%S").to_string()
}

/// Write `png_bytes` under the artifact directory, creating it if needed.
pub fn persist(cfg: &GroundingConfig, file_name: &str, png_bytes: &[u8]) {
    if !cfg.save_artifacts {
        return;
    }
    if let Err(e) = write_artifact(&cfg.artifact_dir, file_name, png_bytes) {
        tracing::warn!(file = %file_name, error = %e, "failed to persist grounding artifact");
    } else {
        tracing::debug!(
            path = %cfg.artifact_dir.join(file_name).display(),
            "grounding artifact saved"
        );
    }
}

fn write_artifact(dir: &Path, file_name: &str, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join(file_name), bytes)
}
