//! Vision-model transcription of rasterised pages.
//!
//! A page image is encoded as a lossless PNG, attached to a chat request and
//! sent to the configured [`LLMProvider`]. All prompt text lives in
//! [`crate::prompts`].
//!
//! ## Retry Strategy
//!
//! Transient provider errors (429, 503) are retried with exponential
//! backoff: `retry_backoff_ms * 2^(attempt-1)`. Each attempt is also bounded
//! by `api_timeout_secs` so a hung connection cannot hold a page forever.

use crate::config::ConversionConfig;
use crate::prompts::{ocr_page_instruction, OCR_SYSTEM_PROMPT};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use image::DynamicImage;
use std::io::Cursor;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Encode a rasterised page as a base64 PNG ready for the provider.
///
/// `detail: "high"` keeps fine print and small tables legible to tiling
/// vision models.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded page image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Transcribe one page image to Markdown.
///
/// Returns the raw model output; the caller cleans and splits it. The error
/// string is the last failure seen once all retries are spent.
pub async fn transcribe_page(
    provider: &Arc<dyn LLMProvider>,
    page_num: u32,
    total_pages: u32,
    image: ImageData,
    config: &ConversionConfig,
) -> Result<String, String> {
    let messages = vec![
        ChatMessage::system(OCR_SYSTEM_PROMPT),
        ChatMessage::user_with_images(ocr_page_instruction(page_num, total_pages), vec![image]),
    ];
    chat_with_retries(provider, &format!("Page {page_num}"), &messages, config).await
}

/// Send `messages`, retrying transient failures with exponential backoff.
///
/// `label` prefixes log lines ("Page 3", "Validation").
pub async fn chat_with_retries(
    provider: &Arc<dyn LLMProvider>,
    label: &str,
    messages: &[ChatMessage],
    config: &ConversionConfig,
) -> Result<String, String> {
    let options = build_options(config);
    let per_call = Duration::from_secs(config.api_timeout_secs.max(1));

    let mut last_err: Option<String> = None;
    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = backoff_ms(config.retry_backoff_ms, attempt);
            warn!(
                "{}: retry {}/{} after {}ms",
                label, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match timeout(per_call, provider.chat(messages, Some(&options))).await {
            Ok(Ok(response)) => {
                debug!(
                    "{}: {} input tokens, {} output tokens",
                    label, response.prompt_tokens, response.completion_tokens
                );
                return Ok(response.content);
            }
            Ok(Err(e)) => {
                warn!("{}: attempt {} failed: {}", label, attempt + 1, e);
                last_err = Some(e.to_string());
            }
            Err(_) => {
                warn!(
                    "{}: attempt {} timed out after {}s",
                    label,
                    attempt + 1,
                    per_call.as_secs()
                );
                last_err = Some(format!("request timed out after {}s", per_call.as_secs()));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| "Unknown error".to_string()))
}

fn build_options(config: &ConversionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Delay before retry `attempt` (1-based). Saturates instead of overflowing.
fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let data = encode_page(&img).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(&decoded[1..4], b"PNG");
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        assert_eq!(backoff_ms(500, 1), 500);
        assert_eq!(backoff_ms(500, 2), 1000);
        assert_eq!(backoff_ms(500, 4), 4000);
        assert_eq!(backoff_ms(500, 64), u64::MAX);
        assert_eq!(backoff_ms(500, u32::MAX), u64::MAX);
        assert_eq!(backoff_ms(0, 200), 0);
    }

    #[test]
    fn options_follow_config() {
        let config = ConversionConfig::default();
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(4096));
    }
}
