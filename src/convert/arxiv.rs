//! arXiv e-print conversion through the LaTeXML toolchain.
//!
//! The e-print is unpacked into a scratch directory, the main `.tex` file
//! is located, and three external stages run with the extracted tree as
//! working directory (so `\input` and `\includegraphics` resolve):
//!
//! ```text
//! latexml      <main>.tex        → __cvt/output.xml   (structural parse)
//! latexmlpost  __cvt/output.xml  → __cvt/output.html  (semantic render)
//! pandoc       __cvt/output.html → __cvt/output.md    (markdown render)
//! ```
//!
//! The conversion directory, with the tidied `output.md` and whatever
//! assets `latexmlpost` emitted, becomes the bundle.

use crate::config::ToolPrograms;
use crate::convert::{copy_tree, Converter};
use crate::download::Downloader;
use crate::error::ConversionError;
use crate::pipeline::postprocess;
use crate::request::RequestKind;
use crate::tools::{ToolCommand, ToolInvoker};
use async_trait::async_trait;
use bundle_tar::SourceLayout;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Conventional main-file names, in preference order.
const PREFERRED_MAIN_FILES: [&str; 4] = ["main.tex", "paper.tex", "ms.tex", "article.tex"];

/// Working directory for toolchain output inside the extracted tree.
const CONVERSION_DIR: &str = "__cvt";

/// Locate the main LaTeX document at the top level of `dir`.
///
/// Tries [`PREFERRED_MAIN_FILES`] in order, then falls back to the first
/// `*.tex` file by name. Names are sorted because `read_dir` order is
/// platform dependent; the fallback is the same on every filesystem.
pub fn find_main_tex(dir: &Path) -> Result<PathBuf, ConversionError> {
    let entries =
        std::fs::read_dir(dir).map_err(|e| ConversionError::io(format!("Failed to list '{}'", dir.display()), e))?;

    let mut tex_files: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| name.ends_with(".tex"))
        .collect();
    tex_files.sort();

    let chosen = PREFERRED_MAIN_FILES
        .iter()
        .find(|preferred| tex_files.iter().any(|f| f == *preferred))
        .map(|s| s.to_string())
        .or_else(|| tex_files.into_iter().next());

    match chosen {
        Some(name) => Ok(dir.join(name)),
        None => Err(ConversionError::NoDocumentFound {
            dir: dir.to_path_buf(),
        }),
    }
}

/// Converter for `{"type": "arxiv"}` requests.
pub struct ArxivConverter {
    downloader: Arc<dyn Downloader>,
    invoker: Arc<dyn ToolInvoker>,
    base_url: String,
    programs: ToolPrograms,
}

impl ArxivConverter {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        invoker: Arc<dyn ToolInvoker>,
        base_url: impl Into<String>,
        programs: ToolPrograms,
    ) -> Self {
        Self {
            downloader,
            invoker,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            programs,
        }
    }

    /// The three toolchain stages for `main` with output under `cvt`.
    fn stages(&self, main: &Path, cvt: &Path) -> [ToolCommand; 3] {
        let xml = cvt.join("output.xml");
        let html = cvt.join("output.html");
        let md = cvt.join("output.md");
        let work_dir = main.parent().unwrap_or(cvt);
        let main_name = main
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        [
            ToolCommand::new(&self.programs.latexml)
                .arg(main_name)
                .arg(format!("--destination={}", xml.display()))
                .current_dir(work_dir),
            ToolCommand::new(&self.programs.latexmlpost)
                .arg(xml.display().to_string())
                .arg(format!("--destination={}", html.display()))
                .current_dir(work_dir),
            ToolCommand::new(&self.programs.pandoc)
                .args(["-f", "html", "-t", "markdown_strict"])
                .arg(html.display().to_string())
                .arg("-o")
                .arg(md.display().to_string())
                .current_dir(work_dir),
        ]
    }
}

#[async_trait]
impl Converter for ArxivConverter {
    fn kind(&self) -> RequestKind {
        RequestKind::Arxiv
    }

    fn source_url(&self, identity: &str) -> String {
        format!("{}/e-print/{}", self.base_url, identity)
    }

    fn source_extension(&self) -> &'static str {
        ".tar.gz"
    }

    async fn fetch(&self, identity: &str, dest: &Path) -> Result<u64, ConversionError> {
        self.downloader.download(&self.source_url(identity), dest).await
    }

    async fn convert(&self, source: &Path, destination: &Path) -> Result<(), ConversionError> {
        let scratch = tempfile::tempdir().map_err(|e| ConversionError::io("Failed to create scratch directory", e))?;
        let src_dir = scratch.path().to_path_buf();

        let archive = source.to_path_buf();
        let unpack_dir = src_dir.clone();
        let layout = tokio::task::spawn_blocking(move || bundle_tar::unpack_source(&archive, &unpack_dir))
            .await
            .map_err(|e| ConversionError::Internal(format!("Unpack task panicked: {e}")))??;
        match layout {
            SourceLayout::Tree { entries } => debug!("Unpacked {} entries", entries),
            SourceLayout::SingleFile(ref p) => debug!("Single-file e-print written to {}", p.display()),
        }

        let main = find_main_tex(&src_dir)?;
        info!("Main LaTeX document: {}", main.display());

        let cvt = src_dir.join(CONVERSION_DIR);
        tokio::fs::create_dir_all(&cvt)
            .await
            .map_err(|e| ConversionError::io(format!("Failed to create '{}'", cvt.display()), e))?;

        for stage in self.stages(&main, &cvt) {
            self.invoker.invoke(&stage).await?;
        }

        let md_path = cvt.join("output.md");
        let raw = tokio::fs::read_to_string(&md_path)
            .await
            .map_err(|e| ConversionError::io(format!("Toolchain produced no '{}'", md_path.display()), e))?;
        tokio::fs::write(&md_path, postprocess::tidy_markdown(&raw))
            .await
            .map_err(|e| ConversionError::io(format!("Failed to write '{}'", md_path.display()), e))?;

        let copied = copy_tree(&cvt, destination).await?;
        debug!("Bundle holds {} files", copied);
        Ok(())
    }
}
