/// OCR grounding: resolve a search text to a span index in the OCR result
/// sequence, pulling in the LLM disambiguation protocol when substring
/// matching is absent or ambiguous.
///
/// Indices are positions in the freshly computed result sequence, valid only
/// within the grounding call that produced them — never cache them across
/// screenshots.
use crate::config::GroundingConfig;
use crate::errors::{PinpointError, PinpointResult};
use crate::geometry::PercentPoint;
use crate::grounding::{artifacts, disambiguate};
use crate::llm::client::LlmClient;
use crate::vision::draw;
use crate::vision::traits::OcrEngine;
use crate::vision::types::OcrSpan;

/// Which path produced the chosen index. Not an error in any case, but
/// callers relying on precision can branch or log on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Exactly one substring match, no LLM involved.
    Unique,
    /// Multiple matches and no client: deterministic first-in-result-order pick.
    FirstOfMany,
    /// Multiple matches, the LLM picked one and it validated.
    Disambiguated,
    /// The LLM path failed or produced an invalid answer: first match used.
    FallbackFirst,
    /// No substring match at all; the LLM proposed an approximate alternative.
    BestMatch,
}

/// A resolved span index plus how it was arrived at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextMatch {
    pub index: usize,
    pub resolution: Resolution,
}

/// Resolved start and end indices for a drag between two text elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DragMatch {
    pub start: TextMatch,
    pub end: TextMatch,
}

/// Annotated copy of the screenshot used as disambiguation input.
pub struct AnnotatedSpans {
    pub image_bytes: Vec<u8>,
    pub image_base64: String,
}

/// Draw every span's box and `#i: <text>` marker on a copy of the image;
/// spans containing any of `highlights` get a thicker highlight outline.
/// One timestamped PNG lands in the artifact trail.
pub fn annotate_spans(
    image: &image::DynamicImage,
    spans: &[OcrSpan],
    highlights: &[&str],
    cfg: &GroundingConfig,
) -> PinpointResult<AnnotatedSpans> {
    let mut canvas = image.to_rgba8();
    let (w, _h) = canvas.dimensions();
    let scale = draw::label_scale(w);
    let label_h = draw::label_height(scale);

    for (index, span) in spans.iter().enumerate() {
        let b = span.bbox();
        let (x1, y1, x2, y2) = (
            b.x1.round() as i32,
            b.y1.round() as i32,
            b.x2.round() as i32,
            b.y2.round() as i32,
        );

        draw::draw_rect(&mut canvas, x1, y1, x2, y2, draw::DEBUG_COLOUR, 2);

        let preview: String = span.text.chars().take(20).collect();
        draw::draw_label(
            &mut canvas,
            x1,
            y1 - label_h,
            &format!("#{index}: {preview}"),
            draw::DEBUG_COLOUR,
            scale,
        );

        let highlighted = highlights
            .iter()
            .any(|q| !q.is_empty() && span.text.contains(q));
        if highlighted {
            draw::draw_rect(&mut canvas, x1, y1, x2, y2, draw::HIGHLIGHT_COLOUR, 3);
        }
    }

    let png = draw::encode_png(&canvas)?;
    let ts = artifacts::timestamp();
    artifacts::persist(cfg, &format!("ocr_annotated_{ts}.png"), &png);

    let image_base64 = draw::to_base64(&png);
    Ok(AnnotatedSpans {
        image_bytes: png,
        image_base64,
    })
}

/// All span indices whose text contains `query` as a substring, in result order.
fn matching_indices(spans: &[OcrSpan], query: &str) -> Vec<usize> {
    spans
        .iter()
        .enumerate()
        .filter(|(_, s)| s.text.contains(query))
        .map(|(i, _)| i)
        .collect()
}

/// Resolve `query` to a span index.
///
/// One match returns directly (no LLM cost). Multiple matches consult the
/// LLM when a client is available, falling back to the first match on any
/// protocol failure — an ambiguous query must still yield a usable
/// coordinate. Zero matches enter the approximate-match protocol, or fail
/// NotFound without a client.
pub async fn find_text(
    spans: &[OcrSpan],
    query: &str,
    image: &image::DynamicImage,
    client: Option<&dyn LlmClient>,
    cfg: &GroundingConfig,
) -> PinpointResult<TextMatch> {
    let matches = matching_indices(spans, query);
    tracing::debug!(query, matches = matches.len(), "substring scan");

    if let Some(&first) = matches.first() {
        if matches.len() == 1 {
            return Ok(TextMatch {
                index: first,
                resolution: Resolution::Unique,
            });
        }
        let Some(client) = client else {
            tracing::debug!(query, index = first, "ambiguous match, no client: first in result order");
            return Ok(TextMatch {
                index: first,
                resolution: Resolution::FirstOfMany,
            });
        };

        return Ok(disambiguate_exact(spans, query, first, image, client, cfg).await);
    }

    // No substring match at all.
    let Some(client) = client else {
        return Err(PinpointError::NotFound(format!(
            "text element '{query}' was not found in the image"
        )));
    };

    let annotated = annotate_spans(image, spans, &[], cfg).map_err(|e| {
        PinpointError::NotFound(format!("text element '{query}' was not found in the image: {e}"))
    })?;

    match disambiguate::pick_best_match(client, spans, query, &annotated.image_base64, cfg).await? {
        Some(index) => {
            tracing::info!(query, index, text = %spans[index].text, "approximate match accepted");
            Ok(TextMatch {
                index,
                resolution: Resolution::BestMatch,
            })
        }
        None => Err(PinpointError::NotFound(format!(
            "text element '{query}' was not found in the image and no suitable \
             alternative could be identified"
        ))),
    }
}

/// Exact-disambiguation wrapper: any failure — annotation, transport,
/// retry exhaustion, or an answer that fails range/containment validation —
/// collapses to the first textual match.
async fn disambiguate_exact(
    spans: &[OcrSpan],
    query: &str,
    first_match: usize,
    image: &image::DynamicImage,
    client: &dyn LlmClient,
    cfg: &GroundingConfig,
) -> TextMatch {
    let annotated = match annotate_spans(image, spans, &[query], cfg) {
        Ok(a) => a,
        Err(e) => {
            tracing::warn!(error = %e, "annotation failed, falling back to first match");
            return TextMatch {
                index: first_match,
                resolution: Resolution::FallbackFirst,
            };
        }
    };

    match disambiguate::pick_exact_index(client, spans, query, &annotated.image_base64, cfg).await {
        Ok(index) => {
            if index >= spans.len() {
                tracing::warn!(index, "LLM picked out-of-range index, falling back to first match");
                return TextMatch {
                    index: first_match,
                    resolution: Resolution::FallbackFirst,
                };
            }
            if !spans[index].text.contains(query) {
                tracing::warn!(
                    index,
                    text = %spans[index].text,
                    query,
                    "LLM picked span not containing query, falling back to first match"
                );
                return TextMatch {
                    index: first_match,
                    resolution: Resolution::FallbackFirst,
                };
            }
            TextMatch {
                index,
                resolution: Resolution::Disambiguated,
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, index = first_match, "disambiguation failed, falling back to first match");
            TextMatch {
                index: first_match,
                resolution: Resolution::FallbackFirst,
            }
        }
    }
}

/// Resolve a drag between two search texts to a pair of span indices.
///
/// Each side is matched independently; a single LLM call disambiguates both
/// sides when either is ambiguous, and any validation failure reverts both
/// sides to their own first match.
pub async fn find_drag_text(
    spans: &[OcrSpan],
    start_query: &str,
    end_query: &str,
    image: &image::DynamicImage,
    client: Option<&dyn LlmClient>,
    cfg: &GroundingConfig,
) -> PinpointResult<DragMatch> {
    let start_matches = matching_indices(spans, start_query);
    let end_matches = matching_indices(spans, end_query);

    let Some(&start_first) = start_matches.first() else {
        return Err(PinpointError::NotFound(format!(
            "could not find start text element: '{start_query}'"
        )));
    };
    let Some(&end_first) = end_matches.first() else {
        return Err(PinpointError::NotFound(format!(
            "could not find end text element: '{end_query}'"
        )));
    };

    let unique = |m: &[usize], index: usize| TextMatch {
        index,
        resolution: if m.len() == 1 {
            Resolution::Unique
        } else {
            Resolution::FirstOfMany
        },
    };
    let mut start = unique(&start_matches, start_first);
    let mut end = unique(&end_matches, end_first);

    let ambiguous = start_matches.len() > 1 || end_matches.len() > 1;
    if let (true, Some(client)) = (ambiguous, client) {
        match resolve_drag_ambiguity(spans, start_query, end_query, image, client, cfg).await {
            Some((s, e)) => {
                start = TextMatch {
                    index: s,
                    resolution: Resolution::Disambiguated,
                };
                end = TextMatch {
                    index: e,
                    resolution: Resolution::Disambiguated,
                };
            }
            None => {
                start.resolution = Resolution::FallbackFirst;
                end.resolution = Resolution::FallbackFirst;
            }
        }
    }

    tracing::debug!(
        start = start.index,
        end = end.index,
        start_resolution = ?start.resolution,
        end_resolution = ?end.resolution,
        "drag text resolved"
    );
    Ok(DragMatch { start, end })
}

/// One LLM call for both drag endpoints. `None` on any failure, including
/// an answer that fails range or containment checks for either side.
async fn resolve_drag_ambiguity(
    spans: &[OcrSpan],
    start_query: &str,
    end_query: &str,
    image: &image::DynamicImage,
    client: &dyn LlmClient,
    cfg: &GroundingConfig,
) -> Option<(usize, usize)> {
    let annotated = match annotate_spans(image, spans, &[start_query, end_query], cfg) {
        Ok(a) => a,
        Err(e) => {
            tracing::warn!(error = %e, "drag annotation failed, falling back to first matches");
            return None;
        }
    };

    let (s, e) = match disambiguate::pick_drag_indices(
        client,
        spans,
        start_query,
        end_query,
        &annotated.image_base64,
        cfg,
    )
    .await
    {
        Ok(pair) => pair,
        Err(err) => {
            tracing::warn!(error = %err, "drag disambiguation failed, falling back to first matches");
            return None;
        }
    };

    if s >= spans.len() || e >= spans.len() {
        tracing::warn!(s, e, "LLM picked out-of-range drag indices, falling back to first matches");
        return None;
    }
    if !spans[s].text.contains(start_query) || !spans[e].text.contains(end_query) {
        tracing::warn!(s, e, "LLM drag picks don't contain the search texts, falling back to first matches");
        return None;
    }
    Some((s, e))
}

/// One-shot text grounding: run OCR on the screenshot, resolve `query`, and
/// return the chosen span's centre as percent coordinates (plus which path
/// resolved it).
pub async fn ground_text(
    image: &image::DynamicImage,
    engine: &mut dyn OcrEngine,
    query: &str,
    client: Option<&dyn LlmClient>,
    cfg: &GroundingConfig,
) -> PinpointResult<(PercentPoint, TextMatch)> {
    let spans = engine.recognize(image)?;
    tracing::debug!(spans = spans.len(), query, "OCR pass complete");

    let m = find_text(&spans, query, image, client, cfg).await?;
    let point = span_center(&spans, m.index, (image.width(), image.height()))?;
    Ok((point, m))
}

/// One-shot drag grounding: OCR once, resolve both endpoint texts, return
/// start and end percent coordinates.
pub async fn ground_drag_text(
    image: &image::DynamicImage,
    engine: &mut dyn OcrEngine,
    start_query: &str,
    end_query: &str,
    client: Option<&dyn LlmClient>,
    cfg: &GroundingConfig,
) -> PinpointResult<(PercentPoint, PercentPoint, DragMatch)> {
    let spans = engine.recognize(image)?;
    tracing::debug!(spans = spans.len(), start_query, end_query, "OCR pass complete");

    let m = find_drag_text(&spans, start_query, end_query, image, client, cfg).await?;
    let size = (image.width(), image.height());
    let start = span_center(&spans, m.start.index, size)?;
    let end = span_center(&spans, m.end.index, size)?;
    Ok((start, end, m))
}

/// Centre of the span at `index` as percent coordinates. An out-of-range
/// index is a programming error on the caller's side: immediate
/// `InvalidIndex`, never retried.
pub fn span_center(
    spans: &[OcrSpan],
    index: usize,
    image_size: (u32, u32),
) -> PinpointResult<PercentPoint> {
    let span = spans.get(index).ok_or(PinpointError::InvalidIndex {
        index,
        len: spans.len(),
    })?;
    Ok(span.bbox().center_percent(image_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns the same reply on every call and counts invocations.
    struct FixedClient {
        reply: Result<&'static str, &'static str>,
        calls: AtomicUsize,
    }

    impl FixedClient {
        fn new(reply: Result<&'static str, &'static str>) -> Self {
            Self {
                reply,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for FixedClient {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(
            &self,
            _system_prompt: &str,
            _user_prompt: &str,
            _image_base64: Option<&str>,
        ) -> PinpointResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply
                .map(String::from)
                .map_err(|e| PinpointError::LlmProvider(e.to_string()))
        }
    }

    fn spans(texts: &[&str]) -> Vec<OcrSpan> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| OcrSpan {
                quad: [
                    [10.0, 10.0 + i as f32 * 40.0],
                    [110.0, 10.0 + i as f32 * 40.0],
                    [110.0, 30.0 + i as f32 * 40.0],
                    [10.0, 30.0 + i as f32 * 40.0],
                ],
                text: t.to_string(),
            })
            .collect()
    }

    fn test_image() -> image::DynamicImage {
        image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            240,
            200,
            image::Rgba([250, 250, 250, 255]),
        ))
    }

    fn cfg() -> GroundingConfig {
        GroundingConfig {
            save_artifacts: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn single_match_skips_the_llm() {
        let client = FixedClient::new(Ok("1"));
        let result = find_text(
            &spans(&["Submit", "Cancel"]),
            "Submit",
            &test_image(),
            Some(&client),
            &cfg(),
        )
        .await
        .unwrap();

        assert_eq!(result.index, 0);
        assert_eq!(result.resolution, Resolution::Unique);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn substring_match_is_case_sensitive() {
        let result = find_text(&spans(&["submit"]), "Submit", &test_image(), None, &cfg()).await;
        assert!(matches!(result, Err(PinpointError::NotFound(_))));
    }

    #[tokio::test]
    async fn multiple_matches_without_client_take_first_in_result_order() {
        let result = find_text(
            &spans(&["Save", "Save As"]),
            "Save",
            &test_image(),
            None,
            &cfg(),
        )
        .await
        .unwrap();

        assert_eq!(result.index, 0);
        assert_eq!(result.resolution, Resolution::FirstOfMany);
    }

    #[tokio::test]
    async fn ambiguous_match_uses_llm_pick() {
        let client = FixedClient::new(Ok("1"));
        let result = find_text(
            &spans(&["Save", "Save As"]),
            "Save",
            &test_image(),
            Some(&client),
            &cfg(),
        )
        .await
        .unwrap();

        assert_eq!(result.index, 1);
        assert_eq!(result.resolution, Resolution::Disambiguated);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn out_of_range_llm_pick_falls_back_to_first_match() {
        let client = FixedClient::new(Ok("9"));
        let result = find_text(
            &spans(&["Save", "Save As"]),
            "Save",
            &test_image(),
            Some(&client),
            &cfg(),
        )
        .await
        .unwrap();

        assert_eq!(result.index, 0);
        assert_eq!(result.resolution, Resolution::FallbackFirst);
    }

    #[tokio::test]
    async fn non_containing_llm_pick_falls_back_to_first_match() {
        // Index 2 exists but does not contain the query.
        let client = FixedClient::new(Ok("2"));
        let result = find_text(
            &spans(&["Save", "Save As", "Cancel"]),
            "Save",
            &test_image(),
            Some(&client),
            &cfg(),
        )
        .await
        .unwrap();

        assert_eq!(result.index, 0);
        assert_eq!(result.resolution, Resolution::FallbackFirst);
    }

    #[tokio::test(start_paused = true)]
    async fn llm_transport_failure_falls_back_to_first_match() {
        let client = FixedClient::new(Err("connection reset"));
        let result = find_text(
            &spans(&["Save", "Save As"]),
            "Save",
            &test_image(),
            Some(&client),
            &cfg(),
        )
        .await
        .unwrap();

        assert_eq!(result.index, 0);
        assert_eq!(result.resolution, Resolution::FallbackFirst);
        // Retried to exhaustion before the fallback.
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn no_match_without_client_is_not_found() {
        let result = find_text(&spans(&["Open", "Close"]), "Quit", &test_image(), None, &cfg()).await;
        assert!(matches!(result, Err(PinpointError::NotFound(_))));
    }

    #[tokio::test]
    async fn no_match_with_client_uses_best_match() {
        let client = FixedClient::new(Ok("1"));
        let result = find_text(
            &spans(&["Open", "Close"]),
            "Exit",
            &test_image(),
            Some(&client),
            &cfg(),
        )
        .await
        .unwrap();

        assert_eq!(result.index, 1);
        assert_eq!(result.resolution, Resolution::BestMatch);
    }

    #[tokio::test]
    async fn best_match_none_reply_is_not_found() {
        let client = FixedClient::new(Ok("NONE"));
        let result = find_text(
            &spans(&["Open", "Close"]),
            "Exit",
            &test_image(),
            Some(&client),
            &cfg(),
        )
        .await;
        assert!(matches!(result, Err(PinpointError::NotFound(_))));
    }

    #[tokio::test]
    async fn drag_with_unique_sides_skips_the_llm() {
        let client = FixedClient::new(Ok("0,1"));
        let result = find_drag_text(
            &spans(&["File A", "Trash"]),
            "File A",
            "Trash",
            &test_image(),
            Some(&client),
            &cfg(),
        )
        .await
        .unwrap();

        assert_eq!(result.start.index, 0);
        assert_eq!(result.end.index, 1);
        assert_eq!(result.start.resolution, Resolution::Unique);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn drag_missing_side_is_not_found() {
        let result = find_drag_text(
            &spans(&["File A", "Trash"]),
            "File B",
            "Trash",
            &test_image(),
            None,
            &cfg(),
        )
        .await;
        assert!(matches!(result, Err(PinpointError::NotFound(_))));
    }

    #[tokio::test]
    async fn drag_ambiguous_side_resolves_both_in_one_call() {
        let client = FixedClient::new(Ok("1,2"));
        let result = find_drag_text(
            &spans(&["File", "File 2", "Trash"]),
            "File",
            "Trash",
            &test_image(),
            Some(&client),
            &cfg(),
        )
        .await
        .unwrap();

        assert_eq!(result.start.index, 1);
        assert_eq!(result.end.index, 2);
        assert_eq!(result.start.resolution, Resolution::Disambiguated);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn drag_invalid_llm_answer_reverts_both_sides_to_first_matches() {
        // End index 0 does not contain "Trash" — both sides revert.
        let client = FixedClient::new(Ok("1,0"));
        let result = find_drag_text(
            &spans(&["File", "File 2", "Trash"]),
            "File",
            "Trash",
            &test_image(),
            Some(&client),
            &cfg(),
        )
        .await
        .unwrap();

        assert_eq!(result.start.index, 0);
        assert_eq!(result.end.index, 2);
        assert_eq!(result.start.resolution, Resolution::FallbackFirst);
        assert_eq!(result.end.resolution, Resolution::FallbackFirst);
    }

    struct FixedOcr {
        spans: Vec<OcrSpan>,
    }

    impl OcrEngine for FixedOcr {
        fn recognize(&mut self, _image: &image::DynamicImage) -> PinpointResult<Vec<OcrSpan>> {
            Ok(self.spans.clone())
        }
    }

    #[tokio::test]
    async fn ground_text_returns_span_center_percent() {
        let mut engine = FixedOcr {
            spans: spans(&["Submit", "Cancel"]),
        };
        let (point, m) = ground_text(&test_image(), &mut engine, "Cancel", None, &cfg())
            .await
            .unwrap();

        assert_eq!(m.index, 1);
        assert_eq!(m.resolution, Resolution::Unique);
        // Second span: x 10..110, y 50..70 on a 240×200 image.
        assert!((point.x - 60.0 / 240.0).abs() < 1e-6);
        assert!((point.y - 60.0 / 200.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn ground_drag_text_returns_both_centers() {
        let mut engine = FixedOcr {
            spans: spans(&["File A", "Trash"]),
        };
        let (start, end, m) =
            ground_drag_text(&test_image(), &mut engine, "File A", "Trash", None, &cfg())
                .await
                .unwrap();

        assert_eq!((m.start.index, m.end.index), (0, 1));
        assert!((start.y - 20.0 / 200.0).abs() < 1e-6);
        assert!((end.y - 60.0 / 200.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn span_center_averages_quad_corners() {
        let s = spans(&["Submit"]);
        let p = span_center(&s, 0, (240, 200)).unwrap();
        assert!((p.x - 60.0 / 240.0).abs() < 1e-6);
        assert!((p.y - 20.0 / 200.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn span_center_rejects_out_of_range_index() {
        let s = spans(&["Submit"]);
        let result = span_center(&s, 5, (240, 200));
        assert!(matches!(
            result,
            Err(PinpointError::InvalidIndex { index: 5, len: 1 })
        ));
    }
}
