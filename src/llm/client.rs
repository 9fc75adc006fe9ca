use async_trait::async_trait;

use crate::errors::PinpointResult;

/// Unified multimodal completion seam used by the disambiguation protocol.
/// A transport failure surfaces as an `Err` and is treated as transient by
/// the retry loop.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Returns the client's identifier (for logging).
    fn name(&self) -> &str;

    /// Single blocking completion: system prompt, user prompt, and an
    /// optional base64-encoded PNG the model should look at.
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        image_base64: Option<&str>,
    ) -> PinpointResult<String>;
}
