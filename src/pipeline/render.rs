//! PDF rasterisation via pdfium.
//!
//! pdfium keeps thread-local state and blocks on CPU-heavy rendering, so the
//! whole load-render-close cycle happens inside one `spawn_blocking` call.
//! Metadata is read from the same open document to avoid parsing twice.
//!
//! Page size is bounded twice: the requested DPI sets the natural width, and
//! `max_rendered_pixels` caps the longest edge so an A0 poster cannot
//! allocate a 12k × 17k bitmap.

use crate::convert::DocumentMetadata;
use crate::error::ConversionError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A loaded document: metadata plus one image per page, in page order.
pub struct RenderedDocument {
    pub metadata: DocumentMetadata,
    /// `(0-based page index, image)`.
    pub pages: Vec<(usize, DynamicImage)>,
}

/// Rendering knobs copied out of the extraction config.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub dpi: u32,
    pub max_rendered_pixels: u32,
    pub pdfium_lib_path: Option<PathBuf>,
}

/// Load `pdf_path` and rasterise every page.
pub async fn render_document(pdf_path: &Path, opts: &RenderOptions) -> Result<RenderedDocument, ConversionError> {
    let path = pdf_path.to_path_buf();
    let opts = opts.clone();
    tokio::task::spawn_blocking(move || render_blocking(&path, &opts))
        .await
        .map_err(|e| ConversionError::Internal(format!("Render task panicked: {e}")))?
}

fn bind_pdfium(lib_path: Option<&Path>) -> Result<Pdfium, ConversionError> {
    let bindings = match lib_path {
        Some(path) => Pdfium::bind_to_library(path),
        None => Pdfium::bind_to_system_library(),
    };
    bindings.map(Pdfium::new).map_err(|e| {
        ConversionError::ExtractionFailed(format!(
            "Could not load the pdfium library ({e:?}).\n\
             Install libpdfium or point --pdfium-lib at the shared library."
        ))
    })
}

fn render_blocking(pdf_path: &Path, opts: &RenderOptions) -> Result<RenderedDocument, ConversionError> {
    let pdfium = bind_pdfium(opts.pdfium_lib_path.as_deref())?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| ConversionError::ExtractionFailed(format!("Cannot open '{}': {e:?}", pdf_path.display())))?;

    let metadata = read_metadata(&document);
    info!("PDF loaded: {} pages", metadata.page_count);

    let max = opts.max_rendered_pixels as f32;
    let mut pages = Vec::with_capacity(metadata.page_count);
    for (idx, page) in document.pages().iter().enumerate() {
        // Points are 1/72 inch.
        let natural = page.width().value * opts.dpi as f32 / 72.0;
        let config = PdfRenderConfig::new()
            .set_target_width(natural.min(max).max(1.0) as i32)
            .set_maximum_height(max as i32);

        let image = page
            .render_with_config(&config)
            .map_err(|e| ConversionError::ExtractionFailed(format!("Page {} failed to render: {e:?}", idx + 1)))?
            .as_image();
        debug!("Rendered page {} → {}x{} px", idx + 1, image.width(), image.height());
        pages.push((idx, image));
    }

    Ok(RenderedDocument { metadata, pages })
}

fn read_metadata(document: &PdfDocument<'_>) -> DocumentMetadata {
    let tags = document.metadata();
    let tag = |kind: PdfDocumentMetadataTagType| {
        tags.get(kind)
            .map(|t| t.value().trim().to_string())
            .filter(|v| !v.is_empty())
    };

    DocumentMetadata {
        title: tag(PdfDocumentMetadataTagType::Title),
        author: tag(PdfDocumentMetadataTagType::Author),
        subject: tag(PdfDocumentMetadataTagType::Subject),
        creator: tag(PdfDocumentMetadataTagType::Creator),
        producer: tag(PdfDocumentMetadataTagType::Producer),
        creation_date: tag(PdfDocumentMetadataTagType::CreationDate),
        modification_date: tag(PdfDocumentMetadataTagType::ModificationDate),
        page_count: document.pages().len() as usize,
        pdf_version: format!("{:?}", document.version()),
        ..Default::default()
    }
}
