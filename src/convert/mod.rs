//! Conversion backends.
//!
//! A [`Converter`] turns one fetched source document into a Markdown bundle
//! directory. The orchestrator only sees this trait; it never knows whether
//! a bundle came from a vision model or a LaTeX toolchain.
//!
//! ```text
//! identity ──▶ source_url ──▶ fetch ──▶ convert ──▶ <bundle dir>
//!                             (Downloader)  (PdfExtractor | ToolInvoker)
//! ```
//!
//! Converters must leave `destination` meaningful only on `Ok`; the caller
//! packs and publishes it after a successful return and discards it
//! otherwise, so no partial bundle ever reaches the artifact store.

pub mod arxiv;
pub mod pdf;

use crate::config::{ExtractionConfig, ServiceConfig};
use crate::download::{Downloader, HttpDownloader};
use crate::error::ConversionError;
use crate::pipeline::VisionExtractor;
use crate::request::RequestKind;
use crate::tools::ProcessInvoker;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

pub use arxiv::{find_main_tex, ArxivConverter};
pub use pdf::{BundleImage, DocumentMetadata, ExtractedDocument, PdfConverter, PdfExtractor};

/// One conversion backend.
#[async_trait]
pub trait Converter: Send + Sync {
    /// The request kind this converter serves.
    fn kind(&self) -> RequestKind;

    /// Where the source document for `identity` is downloaded from.
    fn source_url(&self, identity: &str) -> String;

    /// File extension (with dot) for the downloaded source.
    fn source_extension(&self) -> &'static str;

    /// Download the source for `identity` into `dest`.
    async fn fetch(&self, identity: &str, dest: &Path) -> Result<u64, ConversionError>;

    /// Convert the source at `source` into a bundle directory at `destination`.
    async fn convert(&self, source: &Path, destination: &Path) -> Result<(), ConversionError>;
}

/// The converter for each request kind.
#[derive(Clone)]
pub struct ConverterSet {
    pdf: Arc<dyn Converter>,
    arxiv: Arc<dyn Converter>,
}

impl ConverterSet {
    pub fn new(pdf: Arc<dyn Converter>, arxiv: Arc<dyn Converter>) -> Self {
        Self { pdf, arxiv }
    }

    /// Production wiring: HTTP downloads, the vision extractor for PDFs and
    /// the LaTeXML/pandoc toolchain for arXiv sources.
    pub fn standard(service: &ServiceConfig, extraction: ExtractionConfig) -> Result<Self, ConversionError> {
        let downloader: Arc<dyn Downloader> = Arc::new(HttpDownloader::new(service.download_timeout_secs)?);
        let pdf = PdfConverter::new(Arc::clone(&downloader), Arc::new(VisionExtractor::new(extraction)));
        let arxiv = ArxivConverter::new(
            downloader,
            Arc::new(ProcessInvoker::with_timeout_secs(service.tool_timeout_secs)),
            service.arxiv_base_url.clone(),
            service.tools.clone(),
        );
        Ok(Self::new(Arc::new(pdf), Arc::new(arxiv)))
    }

    /// Converter responsible for `kind`.
    pub fn select(&self, kind: RequestKind) -> Arc<dyn Converter> {
        match kind {
            RequestKind::Pdf => Arc::clone(&self.pdf),
            RequestKind::Arxiv => Arc::clone(&self.arxiv),
        }
    }
}

impl std::fmt::Debug for ConverterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverterSet")
            .field("pdf", &self.pdf.kind())
            .field("arxiv", &self.arxiv.kind())
            .finish()
    }
}

/// Copy every regular file and subdirectory of `src` into `dst`.
pub(crate) async fn copy_tree(src: &Path, dst: &Path) -> Result<u64, ConversionError> {
    let src = src.to_path_buf();
    let dst = dst.to_path_buf();
    tokio::task::spawn_blocking(move || copy_tree_blocking(&src, &dst))
        .await
        .map_err(|e| ConversionError::Internal(format!("Copy task panicked: {e}")))?
}

fn copy_tree_blocking(src: &Path, dst: &Path) -> Result<u64, ConversionError> {
    std::fs::create_dir_all(dst)
        .map_err(|e| ConversionError::io(format!("Failed to create '{}'", dst.display()), e))?;
    let entries = std::fs::read_dir(src)
        .map_err(|e| ConversionError::io(format!("Failed to list '{}'", src.display()), e))?;

    let mut copied = 0;
    for entry in entries {
        let entry = entry.map_err(|e| ConversionError::io(format!("Failed to list '{}'", src.display()), e))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|e| ConversionError::io(format!("Failed to stat '{}'", from.display()), e))?;
        if file_type.is_dir() {
            copied += copy_tree_blocking(&from, &to)?;
        } else if file_type.is_file() {
            std::fs::copy(&from, &to)
                .map_err(|e| ConversionError::io(format!("Failed to copy '{}'", from.display()), e))?;
            copied += 1;
        }
    }
    Ok(copied)
}
