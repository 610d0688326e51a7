//! Vision-model PDF extraction engine.
//!
//! Each page is rasterised and handed to a vision LLM, which reads it the
//! way a person would. Layouts that defeat text-layer extractors (columns,
//! formulae, tables in images) come out as structured Markdown.
//!
//! ```text
//! render ──▶ encode ──▶ llm ──▶ postprocess ──▶ assemble
//! (pdfium)   (PNG/b64)  (VLM)   (clean-up)      (separators, metadata)
//! ```
//!
//! 1. [`render`] loads the PDF and rasterises every page on the blocking pool.
//! 2. [`encode`] wraps each page as base64 PNG `ImageData`.
//! 3. [`llm`] transcribes pages concurrently with retry and backoff.
//! 4. [`postprocess`] repairs VLM formatting quirks.

pub mod encode;
pub mod llm;
pub mod postprocess;
pub mod render;

use crate::config::ExtractionConfig;
use crate::convert::{BundleImage, ExtractedDocument, PdfExtractor};
use crate::error::ConversionError;
use async_trait::async_trait;
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use llm::PageTranscript;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Model used with a named provider when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// [`PdfExtractor`] backed by pdfium + a vision LLM.
///
/// The provider is resolved on first use, so a server without API keys
/// still starts and only PDF jobs fail.
pub struct VisionExtractor {
    config: ExtractionConfig,
    provider: OnceCell<Arc<dyn LLMProvider>>,
}

impl VisionExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self {
            config,
            provider: OnceCell::new(),
        }
    }

    async fn provider(&self) -> Result<&Arc<dyn LLMProvider>, ConversionError> {
        self.provider
            .get_or_try_init(|| async { resolve_provider(&self.config) })
            .await
    }
}

#[async_trait]
impl PdfExtractor for VisionExtractor {
    async fn extract(&self, pdf: &Path) -> Result<ExtractedDocument, ConversionError> {
        let start = Instant::now();
        let provider = Arc::clone(self.provider().await?);

        let render_opts = render::RenderOptions {
            dpi: self.config.dpi,
            max_rendered_pixels: self.config.max_rendered_pixels,
            pdfium_lib_path: self.config.pdfium_lib_path.clone(),
        };
        let rendered = render::render_document(pdf, &render_opts).await?;
        if rendered.pages.is_empty() {
            return Err(ConversionError::ExtractionFailed("PDF has no pages".into()));
        }

        let mut images = Vec::with_capacity(rendered.pages.len());
        let mut pngs = Vec::with_capacity(rendered.pages.len());
        for (idx, img) in &rendered.pages {
            let page = encode::encode_page(img)
                .map_err(|e| ConversionError::ExtractionFailed(format!("Page {} failed to encode: {e}", idx + 1)))?;
            images.push((idx + 1, page.image));
            pngs.push((idx + 1, page.png));
        }
        drop(rendered.pages);

        let llm_start = Instant::now();
        let config = Arc::new(self.config.clone());
        let transcripts: Vec<PageTranscript> = stream::iter(images.into_iter().map(|(page_num, image)| {
            let provider = Arc::clone(&provider);
            let config = Arc::clone(&config);
            async move { llm::transcribe_page(&provider, page_num, image, &config).await }
        }))
        .buffered(config.concurrency)
        .collect()
        .await;
        debug!("VLM pass took {}ms", llm_start.elapsed().as_millis());

        let mut metadata = rendered.metadata;
        metadata.input_tokens = transcripts.iter().map(|t| t.input_tokens as u64).sum();
        metadata.output_tokens = transcripts.iter().map(|t| t.output_tokens as u64).sum();

        let (markdown, failed_pages) = assemble_pages(&transcripts, &config)?;
        metadata.failed_pages = failed_pages;

        let images = if config.keep_page_images {
            pngs.into_iter()
                .map(|(page_num, bytes)| BundleImage {
                    name: encode::page_image_name(page_num),
                    bytes,
                })
                .collect()
        } else {
            Vec::new()
        };

        info!(
            "Extracted {}/{} pages in {}ms ({} in / {} out tokens)",
            transcripts.len() - metadata.failed_pages.len(),
            transcripts.len(),
            start.elapsed().as_millis(),
            metadata.input_tokens,
            metadata.output_tokens
        );
        Ok(ExtractedDocument {
            markdown,
            images,
            metadata,
        })
    }
}

/// Join cleaned page transcripts in page order.
///
/// Failed pages are skipped and reported; a document where every page
/// failed is an error.
fn assemble_pages(
    transcripts: &[PageTranscript],
    config: &ExtractionConfig,
) -> Result<(String, Vec<usize>), ConversionError> {
    let mut ordered: Vec<&PageTranscript> = transcripts.iter().collect();
    ordered.sort_by_key(|t| t.page_num);

    let mut failed = Vec::new();
    let mut markdown = String::new();
    let mut first_error = None;
    for t in ordered {
        if let Some(ref e) = t.error {
            warn!("Page {} omitted: {}", t.page_num, e);
            failed.push(t.page_num);
            first_error.get_or_insert_with(|| format!("page {}: {e}", t.page_num));
            continue;
        }
        let page = postprocess::clean_markdown(&t.markdown);
        if !markdown.is_empty() {
            markdown.truncate(markdown.trim_end().len());
            markdown.push_str(&config.page_separator.render(t.page_num));
        }
        markdown.push_str(&page);
    }

    if failed.len() == transcripts.len() {
        return Err(ConversionError::ExtractionFailed(format!(
            "All {} pages failed after {} retries; first error: {}",
            transcripts.len(),
            config.max_retries,
            first_error.unwrap_or_default()
        )));
    }
    Ok((markdown, failed))
}

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ConversionError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| ConversionError::ProviderNotConfigured {
        provider: name.to_string(),
        hint: e.to_string(),
    })
}

/// Pick the vision provider, most specific source first:
///
/// 1. a pre-built provider in the config;
/// 2. a named provider (+ model, default [`DEFAULT_MODEL`]);
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set;
/// 4. OpenAI when `OPENAI_API_KEY` is set;
/// 5. whatever `ProviderFactory::from_env` detects.
fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, ConversionError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
    if let Some(ref name) = config.provider_name {
        return create_provider(name, model);
    }

    if let (Ok(name), Ok(env_model)) = (std::env::var("EDGEQUAKE_LLM_PROVIDER"), std::env::var("EDGEQUAKE_MODEL")) {
        if !name.is_empty() && !env_model.is_empty() {
            return create_provider(&name, &env_model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return create_provider("openai", model);
    }

    let (provider, _embedding) = ProviderFactory::from_env().map_err(|e| ConversionError::ProviderNotConfigured {
        provider: "auto".into(),
        hint: format!(
            "No vision provider could be detected from the environment.\n\
             Set OPENAI_API_KEY or ANTHROPIC_API_KEY, or pass --provider/--model.\n\
             Error: {e}"
        ),
    })?;
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PageSeparator;

    fn ok(page_num: usize, md: &str) -> PageTranscript {
        PageTranscript {
            page_num,
            markdown: md.into(),
            ..Default::default()
        }
    }

    fn failed(page_num: usize) -> PageTranscript {
        PageTranscript {
            page_num,
            error: Some("HTTP 503".into()),
            ..Default::default()
        }
    }

    #[test]
    fn pages_joined_in_order_with_separator() {
        let config = ExtractionConfig::builder()
            .page_separator(PageSeparator::Comment)
            .build()
            .unwrap();
        let (md, failed_pages) = assemble_pages(&[ok(2, "Second"), ok(1, "# First")], &config).unwrap();
        assert_eq!(md, "# First\n\n<!-- page 2 -->\n\nSecond\n");
        assert!(failed_pages.is_empty());
    }

    #[test]
    fn failed_pages_are_skipped_and_reported() {
        let config = ExtractionConfig::default();
        let (md, failed_pages) = assemble_pages(&[ok(1, "One"), failed(2), ok(3, "Three")], &config).unwrap();
        assert_eq!(md, "One\n\nThree\n");
        assert_eq!(failed_pages, vec![2]);
    }

    #[test]
    fn extractor_is_usable_as_shared_trait_object() {
        fn assert_send<T: Send>(_: &T) {}
        let extractor: Arc<dyn PdfExtractor> = Arc::new(VisionExtractor::new(ExtractionConfig::default()));
        assert_send(&extractor.extract(Path::new("unused.pdf")));
    }

    #[test]
    fn all_pages_failed_is_an_error() {
        let config = ExtractionConfig::default();
        let err = assemble_pages(&[failed(1), failed(2)], &config).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("All 2 pages failed"), "got: {msg}");
        assert!(msg.contains("HTTP 503"));
    }
}
