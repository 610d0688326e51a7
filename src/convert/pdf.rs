//! PDF conversion.
//!
//! The heavy lifting is delegated to a [`PdfExtractor`]; this module checks
//! the download really is a PDF and lays the extracted document out as a
//! bundle:
//!
//! ```text
//! <bundle>/
//!   <stem>.md          assembled Markdown
//!   <stem>_meta.json   document metadata (pretty JSON)
//!   <image files>      page renders or figures, if any
//! ```

use crate::convert::Converter;
use crate::download::Downloader;
use crate::error::ConversionError;
use crate::request::RequestKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

/// One image shipped inside the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleImage {
    /// File name inside the bundle (no directories).
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Document-level metadata written as `<stem>_meta.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modification_date: Option<String>,
    pub page_count: usize,
    #[serde(default)]
    pub pdf_version: String,
    /// 1-indexed pages whose transcription failed and were left out.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_pages: Vec<usize>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// What a [`PdfExtractor`] yields for one document.
#[derive(Debug, Clone, Default)]
pub struct ExtractedDocument {
    pub markdown: String,
    pub images: Vec<BundleImage>,
    pub metadata: DocumentMetadata,
}

/// PDF content-extraction engine.
#[async_trait]
pub trait PdfExtractor: Send + Sync {
    async fn extract(&self, pdf: &Path) -> Result<ExtractedDocument, ConversionError>;
}

/// Converter for `{"type": "pdf"}` requests.
pub struct PdfConverter {
    downloader: Arc<dyn Downloader>,
    extractor: Arc<dyn PdfExtractor>,
}

impl PdfConverter {
    pub fn new(downloader: Arc<dyn Downloader>, extractor: Arc<dyn PdfExtractor>) -> Self {
        Self { downloader, extractor }
    }
}

#[async_trait]
impl Converter for PdfConverter {
    fn kind(&self) -> RequestKind {
        RequestKind::Pdf
    }

    fn source_url(&self, identity: &str) -> String {
        identity.to_string()
    }

    fn source_extension(&self) -> &'static str {
        ".pdf"
    }

    async fn fetch(&self, identity: &str, dest: &Path) -> Result<u64, ConversionError> {
        self.downloader.download(&self.source_url(identity), dest).await
    }

    async fn convert(&self, source: &Path, destination: &Path) -> Result<(), ConversionError> {
        check_pdf_magic(source).await?;

        let doc = self.extractor.extract(source).await?;
        info!(
            "Extracted {} pages ({} chars, {} images)",
            doc.metadata.page_count,
            doc.markdown.len(),
            doc.images.len()
        );

        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "document".to_string());
        write_bundle(destination, &stem, &doc).await
    }
}

/// Fail with [`ConversionError::NotAPdf`] unless the file starts with `%PDF`.
pub(crate) async fn check_pdf_magic(path: &Path) -> Result<(), ConversionError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ConversionError::io(format!("Failed to open '{}'", path.display()), e))?;
    let mut magic = [0u8; 4];
    let mut filled = 0;
    while filled < magic.len() {
        let n = file
            .read(&mut magic[filled..])
            .await
            .map_err(|e| ConversionError::io(format!("Failed to read '{}'", path.display()), e))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    if &magic != b"%PDF" {
        return Err(ConversionError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

async fn write_bundle(dir: &Path, stem: &str, doc: &ExtractedDocument) -> Result<(), ConversionError> {
    let write = |path: std::path::PathBuf, bytes: Vec<u8>| async move {
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ConversionError::io(format!("Failed to write '{}'", path.display()), e))
    };

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ConversionError::io(format!("Failed to create '{}'", dir.display()), e))?;

    write(dir.join(format!("{stem}.md")), doc.markdown.clone().into_bytes()).await?;

    let meta = serde_json::to_vec_pretty(&doc.metadata)
        .map_err(|e| ConversionError::Internal(format!("Failed to serialise metadata: {e}")))?;
    write(dir.join(format!("{stem}_meta.json")), meta).await?;

    for image in &doc.images {
        // Only the final component: an extractor must not write outside the bundle.
        let Some(name) = Path::new(&image.name).file_name() else {
            warn!("Skipping image with unusable name '{}'", image.name);
            continue;
        };
        write(dir.join(name), image.bytes.clone()).await?;
    }

    debug!("Bundle written to {}", dir.display());
    Ok(())
}
