/// LLM disambiguation protocol for OCR text grounding.
///
/// When substring matching alone cannot pin down a single span, the model
/// is shown the annotated screenshot (every span boxed and index-labelled)
/// plus a `#i: <text>` enumeration, and asked for a terse, parseable
/// answer. All three variants share the same retry loop: up to
/// `cfg.max_retries` sequential attempts with exponential backoff
/// (2s, 4s, …) between them.
use std::time::Duration;

use crate::config::GroundingConfig;
use crate::errors::{PinpointError, PinpointResult};
use crate::llm::client::LlmClient;
use crate::vision::types::OcrSpan;

const IDENTIFY_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that identifies UI elements in screenshots.";

const BEST_MATCH_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that identifies UI elements in screenshots. \
     You only respond with a number or NONE.";

/// `#i: <text>` line per span, in result order.
fn enumerate_spans(spans: &[OcrSpan]) -> String {
    spans
        .iter()
        .enumerate()
        .map(|(i, s)| format!("#{}: {}", i, s.text))
        .collect::<Vec<_>>()
        .join("\n")
}

fn exact_index_prompt(spans: &[OcrSpan], query: &str) -> String {
    format!(
        "I need to identify the correct text element to interact with on this screen.\n\
         \n\
         I'm looking for: \"{query}\"\n\
         \n\
         Here are all the text elements detected on the screen (with their indices):\n\
         {elements}\n\
         \n\
         Look at the annotated image where each text element is marked with its index.\n\
         Which index number (just the number) contains the text I'm looking for?\n\
         If there are multiple matches, choose the one that appears to be the most \
         relevant UI element (like a button, link, or menu item).\n\
         \n\
         Return ONLY the index number, nothing else.",
        elements = enumerate_spans(spans),
    )
}

fn best_match_prompt(spans: &[OcrSpan], query: &str) -> String {
    format!(
        "I need to find the best matching text element on this screen.\n\
         \n\
         I was looking for: \"{query}\" but couldn't find an exact match.\n\
         \n\
         Here are all the text elements detected on the screen (with their indices):\n\
         {elements}\n\
         \n\
         Look at the annotated image where each text element is marked with its index.\n\
         Which index number (just the number) contains text that best matches what \
         I'm looking for?\n\
         \n\
         Consider semantic similarity, partial matches, or UI elements that might \
         serve the same purpose.\n\
         \n\
         If you don't see ANY reasonable match, respond with \"NONE\".\n\
         Otherwise, return ONLY the index number of the best match.",
        elements = enumerate_spans(spans),
    )
}

fn drag_indices_prompt(spans: &[OcrSpan], start_query: &str, end_query: &str) -> String {
    format!(
        "I need to identify the correct text elements for a drag and drop operation \
         on this screen.\n\
         \n\
         I need to drag from: \"{start_query}\"\n\
         And drop onto: \"{end_query}\"\n\
         \n\
         Here are all the text elements detected on the screen (with their indices):\n\
         {elements}\n\
         \n\
         Look at the annotated image where each text element is marked with its index.\n\
         Which index number contains the starting text, and which index number \
         contains the ending text?\n\
         \n\
         Return ONLY the two index numbers separated by a comma, like this: \"3,7\"",
        elements = enumerate_spans(spans),
    )
}

/// Keep only ASCII digits, then parse. Tolerates minor formatting noise
/// (`"#3"`, `"index 3."`) but not a digit-free reply.
fn strip_to_index(reply: &str) -> PinpointResult<usize> {
    let digits: String = reply.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Err(PinpointError::Disambiguation(format!(
            "no index digits in reply: {reply:?}"
        )));
    }
    digits
        .parse::<usize>()
        .map_err(|e| PinpointError::Disambiguation(format!("index parse: {e}")))
}

/// Exact-index variant: among spans that already contain the query, ask the
/// model which index is the right one.
///
/// Returns the model's raw index; range and containment validation is the
/// caller's job, and a validation failure there falls back to the first
/// textual match instead of retrying here. Exhausting the retry budget is
/// an error — an exact match is known to exist among the candidates.
pub async fn pick_exact_index(
    client: &dyn LlmClient,
    spans: &[OcrSpan],
    query: &str,
    image_base64: &str,
    cfg: &GroundingConfig,
) -> PinpointResult<usize> {
    tracing::debug!(client = %client.name(), query, "exact-index disambiguation");
    let prompt = exact_index_prompt(spans, query);
    let mut retries = 0u32;

    loop {
        let attempt = async {
            let reply = client
                .complete(IDENTIFY_SYSTEM_PROMPT, &prompt, Some(image_base64))
                .await?;
            strip_to_index(&reply)
        }
        .await;

        match attempt {
            Ok(index) => {
                tracing::debug!(index, query, "exact-index disambiguation reply");
                return Ok(index);
            }
            Err(e) => {
                retries += 1;
                tracing::warn!(attempt = retries, error = %e, "exact-index attempt failed");
                if retries >= cfg.max_retries {
                    return Err(PinpointError::Disambiguation(format!(
                        "exact-index selection failed after {} attempts: {e}",
                        cfg.max_retries
                    )));
                }
                backoff(retries).await;
            }
        }
    }
}

/// Best-match variant: no span contains the query at all, ask the model for
/// the closest alternative.
///
/// `Ok(None)` means the model answered `NONE` — or the retry budget ran out,
/// which is reported the same way because a best-effort search may
/// legitimately have nothing to offer. An out-of-range index counts as a
/// failed attempt, never silently clamped.
pub async fn pick_best_match(
    client: &dyn LlmClient,
    spans: &[OcrSpan],
    query: &str,
    image_base64: &str,
    cfg: &GroundingConfig,
) -> PinpointResult<Option<usize>> {
    tracing::debug!(client = %client.name(), query, "best-match disambiguation");
    let prompt = best_match_prompt(spans, query);
    let mut retries = 0u32;

    loop {
        let attempt = async {
            let reply = client
                .complete(BEST_MATCH_SYSTEM_PROMPT, &prompt, Some(image_base64))
                .await?;

            if reply.trim().eq_ignore_ascii_case("NONE") {
                return Ok(None);
            }

            let index = strip_to_index(&reply)?;
            if index >= spans.len() {
                return Err(PinpointError::Disambiguation(format!(
                    "best-match index {index} out of range for {} spans",
                    spans.len()
                )));
            }
            Ok(Some(index))
        }
        .await;

        match attempt {
            Ok(None) => {
                tracing::info!(query, "LLM found no suitable match");
                return Ok(None);
            }
            Ok(Some(index)) => {
                tracing::debug!(index, text = %spans[index].text, "best-match selection");
                return Ok(Some(index));
            }
            Err(e) => {
                retries += 1;
                tracing::warn!(attempt = retries, error = %e, "best-match attempt failed");
                if retries >= cfg.max_retries {
                    tracing::warn!(query, "best-match retries exhausted, treating as no match");
                    return Ok(None);
                }
                backoff(retries).await;
            }
        }
    }
}

/// Drag variant: one call resolves both sides. Expects `"i,j"`; each side is
/// digit-stripped independently. Validation (range + containment, falling
/// back to first matches) is the caller's job.
pub async fn pick_drag_indices(
    client: &dyn LlmClient,
    spans: &[OcrSpan],
    start_query: &str,
    end_query: &str,
    image_base64: &str,
    cfg: &GroundingConfig,
) -> PinpointResult<(usize, usize)> {
    tracing::debug!(client = %client.name(), start_query, end_query, "drag disambiguation");
    let prompt = drag_indices_prompt(spans, start_query, end_query);
    let mut retries = 0u32;

    loop {
        let attempt = async {
            let reply = client
                .complete(IDENTIFY_SYSTEM_PROMPT, &prompt, Some(image_base64))
                .await?;

            let parts: Vec<&str> = reply.split(',').collect();
            if parts.len() != 2 {
                return Err(PinpointError::Disambiguation(format!(
                    "expected two comma-separated indices, got: {reply:?}"
                )));
            }
            Ok((strip_to_index(parts[0])?, strip_to_index(parts[1])?))
        }
        .await;

        match attempt {
            Ok((start, end)) => {
                tracing::debug!(start, end, "drag disambiguation reply");
                return Ok((start, end));
            }
            Err(e) => {
                retries += 1;
                tracing::warn!(attempt = retries, error = %e, "drag-indices attempt failed");
                if retries >= cfg.max_retries {
                    return Err(PinpointError::Disambiguation(format!(
                        "drag-index selection failed after {} attempts: {e}",
                        cfg.max_retries
                    )));
                }
                backoff(retries).await;
            }
        }
    }
}

/// 2^n seconds: 2s after the first failure, 4s after the second.
async fn backoff(retries: u32) {
    let delay = Duration::from_secs(2u64.pow(retries));
    tracing::debug!(?delay, "backing off before retry");
    tokio::time::sleep(delay).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays a scripted sequence of replies; `Err` entries simulate
    /// transport failures.
    struct ScriptedClient {
        replies: Mutex<VecDeque<Result<String, String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Result<&str, &str>>) -> Self {
            Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|r| r.map(String::from).map_err(String::from))
                        .collect(),
                ),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _system_prompt: &str,
            _user_prompt: &str,
            _image_base64: Option<&str>,
        ) -> PinpointResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("scripted client ran out of replies");
            next.map_err(PinpointError::LlmProvider)
        }
    }

    fn spans(texts: &[&str]) -> Vec<OcrSpan> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| OcrSpan {
                quad: [
                    [10.0, 10.0 + i as f32 * 30.0],
                    [90.0, 10.0 + i as f32 * 30.0],
                    [90.0, 30.0 + i as f32 * 30.0],
                    [10.0, 30.0 + i as f32 * 30.0],
                ],
                text: t.to_string(),
            })
            .collect()
    }

    fn cfg() -> GroundingConfig {
        GroundingConfig {
            save_artifacts: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn exact_index_strips_formatting_noise() {
        let client = ScriptedClient::new(vec![Ok("#2.")]);
        let result = pick_exact_index(&client, &spans(&["a", "b", "c"]), "b", "img", &cfg())
            .await
            .unwrap();
        assert_eq!(result, 2);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_back_off_then_succeed() {
        let client = ScriptedClient::new(vec![Err("timeout"), Err("timeout"), Ok("1")]);
        let started = tokio::time::Instant::now();

        let result = pick_exact_index(&client, &spans(&["a", "b"]), "b", "img", &cfg())
            .await
            .unwrap();

        assert_eq!(result, 1);
        assert_eq!(client.calls(), 3);
        // 2s after the first failure, 4s after the second.
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn exact_index_exhaustion_is_an_error() {
        let client = ScriptedClient::new(vec![Err("down"), Err("down"), Err("down")]);

        let result = pick_exact_index(&client, &spans(&["a"]), "a", "img", &cfg()).await;

        assert!(matches!(result, Err(PinpointError::Disambiguation(_))));
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_digit_reply_counts_as_transient_failure() {
        let client = ScriptedClient::new(vec![Ok("sorry, unclear"), Ok("0")]);

        let result = pick_exact_index(&client, &spans(&["a"]), "a", "img", &cfg())
            .await
            .unwrap();
        assert_eq!(result, 0);
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn best_match_none_is_not_an_error() {
        let client = ScriptedClient::new(vec![Ok("none")]);
        let result = pick_best_match(&client, &spans(&["a", "b"]), "z", "img", &cfg())
            .await
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test(start_paused = true)]
    async fn best_match_out_of_range_counts_toward_retry_budget() {
        let client = ScriptedClient::new(vec![Ok("9"), Ok("1")]);
        let result = pick_best_match(&client, &spans(&["a", "b"]), "z", "img", &cfg())
            .await
            .unwrap();
        assert_eq!(result, Some(1));
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn best_match_exhaustion_returns_no_match() {
        let client = ScriptedClient::new(vec![Err("down"), Err("down"), Err("down")]);
        let result = pick_best_match(&client, &spans(&["a"]), "z", "img", &cfg())
            .await
            .unwrap();
        assert_eq!(result, None);
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn drag_indices_parse_comma_separated_pair() {
        let client = ScriptedClient::new(vec![Ok("3, 7")]);
        let result =
            pick_drag_indices(&client, &spans(&["a"]), "from", "to", "img", &cfg())
                .await
                .unwrap();
        assert_eq!(result, (3, 7));
    }

    #[tokio::test(start_paused = true)]
    async fn drag_indices_retry_on_malformed_reply() {
        let client = ScriptedClient::new(vec![Ok("3"), Ok("3,7")]);
        let result =
            pick_drag_indices(&client, &spans(&["a"]), "from", "to", "img", &cfg())
                .await
                .unwrap();
        assert_eq!(result, (3, 7));
        assert_eq!(client.calls(), 2);
    }
}
