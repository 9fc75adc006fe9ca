use async_trait::async_trait;

use crate::config::LlmClientConfig;
use crate::errors::{PinpointError, PinpointResult};
use crate::llm::client::LlmClient;
use crate::llm::types::ChatMessage;

/// Non-streaming client for any OpenAI-compatible chat-completions endpoint.
/// Disambiguation replies are a handful of tokens, so SSE streaming buys
/// nothing here.
pub struct OpenAiCompatibleClient {
    api_base: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAiCompatibleClient {
    pub fn from_config(cfg: &LlmClientConfig) -> PinpointResult<Self> {
        Ok(Self {
            api_base: cfg.api_base.clone(),
            api_key: cfg.resolve_api_key()?,
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        image_base64: Option<&str>,
    ) -> PinpointResult<String> {
        let messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(user_prompt, image_base64),
        ];

        let body = serde_json::json!({
            "model": self.model,
            "messages": &messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        tracing::debug!(
            model = %self.model,
            has_image = image_base64.is_some(),
            "sending LLM request"
        );
        tracing::debug!(
            body = %{
                // Clone body and sanitize only for logging so the actual request
                // still contains the real image payload.
                let mut log_body = body.clone();
                if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
                    for msg in msgs {
                        if let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) {
                            for part in parts {
                                if part.get("type").and_then(|t| t.as_str()) == Some("image_url") {
                                    if let Some(url) = part
                                        .get_mut("image_url")
                                        .and_then(|iu| iu.get_mut("url"))
                                    {
                                        *url = serde_json::Value::String(
                                            "<omitted_base64_image>".to_string(),
                                        );
                                    }
                                }
                            }
                        }
                    }
                }
                serde_json::to_string(&log_body).unwrap_or_default()
            },
            "request body (sanitized, base64 omitted)"
        );

        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(PinpointError::LlmProvider(format!("{}: {}", status, err_body)));
        }

        let json: serde_json::Value = response.json().await?;
        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .trim()
            .to_string();

        tracing::info!(content_len = content.len(), "LLM response received");
        Ok(content)
    }
}
