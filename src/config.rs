//! Configuration types for the conversion service.
//!
//! Two structs split the knobs by owner:
//!
//! * [`ServiceConfig`]: where artifacts live, how sources are fetched, which
//!   external LaTeX tools run, and how many jobs may run at once.
//! * [`ExtractionConfig`]: how the PDF extraction engine rasterises and
//!   transcribes pages.
//!
//! Both are built through builders that validate ranges, mirroring how the
//! CLI maps flags onto them.

use crate::error::Doc2MdError;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Service-level configuration.
///
/// # Example
/// ```rust
/// use edgequake_doc2md::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .data_dir("/var/lib/doc2md")
///     .max_concurrent_jobs(4)
///     .build()
///     .unwrap();
/// assert!(config.converted_dir().ends_with("converted_files"));
/// ```
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Root directory for persisted files. Default: current directory.
    pub data_dir: PathBuf,

    /// Download timeout for source documents in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Base URL for arXiv e-print downloads. Default: `https://arxiv.org`.
    ///
    /// Sources are fetched from `<base>/e-print/<id>`. Pointing this at a
    /// mirror is mostly useful for tests and air-gapped deployments.
    pub arxiv_base_url: String,

    /// Program names of the three LaTeX toolchain stages.
    pub tools: ToolPrograms,

    /// Per-stage timeout for external tools in seconds. Default: unset.
    ///
    /// LaTeXML on a large paper can legitimately run for many minutes, so no
    /// limit is applied unless the operator asks for one.
    pub tool_timeout_secs: Option<u64>,

    /// Cap on concurrently running background jobs. Default: unset (unbounded).
    ///
    /// Submissions are always accepted; jobs beyond the cap wait for a
    /// permit before downloading anything.
    pub max_concurrent_jobs: Option<usize>,

    /// Keep downloaded sources under `<data_dir>/original_files`. Default: true.
    pub retain_sources: bool,
}

/// External programs for the arXiv toolchain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPrograms {
    /// Structural parse: LaTeX → XML. Default: `latexml`.
    pub latexml: String,
    /// Semantic render: XML → HTML. Default: `latexmlpost`.
    pub latexmlpost: String,
    /// Markdown render: HTML → Markdown. Default: `pandoc`.
    pub pandoc: String,
}

impl Default for ToolPrograms {
    fn default() -> Self {
        Self {
            latexml: "latexml".into(),
            latexmlpost: "latexmlpost".into(),
            pandoc: "pandoc".into(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            download_timeout_secs: 120,
            arxiv_base_url: "https://arxiv.org".into(),
            tools: ToolPrograms::default(),
            tool_timeout_secs: None,
            max_concurrent_jobs: None,
            retain_sources: true,
        }
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Directory holding published `<key>.tar.gz` artifacts.
    pub fn converted_dir(&self) -> PathBuf {
        self.data_dir.join("converted_files")
    }

    /// Directory holding retained source downloads.
    pub fn original_dir(&self) -> PathBuf {
        self.data_dir.join("original_files")
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn arxiv_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.arxiv_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn tools(mut self, tools: ToolPrograms) -> Self {
        self.config.tools = tools;
        self
    }

    pub fn tool_timeout_secs(mut self, secs: u64) -> Self {
        self.config.tool_timeout_secs = Some(secs);
        self
    }

    pub fn max_concurrent_jobs(mut self, n: usize) -> Self {
        self.config.max_concurrent_jobs = Some(n);
        self
    }

    pub fn retain_sources(mut self, v: bool) -> Self {
        self.config.retain_sources = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, Doc2MdError> {
        let c = &self.config;
        if c.download_timeout_secs == 0 {
            return Err(Doc2MdError::InvalidConfig(
                "Download timeout must be ≥ 1s".into(),
            ));
        }
        if c.tool_timeout_secs == Some(0) {
            return Err(Doc2MdError::InvalidConfig(
                "Tool timeout must be ≥ 1s when set".into(),
            ));
        }
        if c.max_concurrent_jobs == Some(0) {
            return Err(Doc2MdError::InvalidConfig(
                "Max concurrent jobs must be ≥ 1 when set".into(),
            ));
        }
        if !(c.arxiv_base_url.starts_with("http://") || c.arxiv_base_url.starts_with("https://")) {
            return Err(Doc2MdError::InvalidConfig(format!(
                "arXiv base URL must be http(s), got '{}'",
                c.arxiv_base_url
            )));
        }
        let tools = &c.tools;
        if [&tools.latexml, &tools.latexmlpost, &tools.pandoc]
            .iter()
            .any(|p| p.trim().is_empty())
        {
            return Err(Doc2MdError::InvalidConfig(
                "Tool program names must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Configuration for the vision-based PDF extraction engine.
///
/// # Example
/// ```rust
/// use edgequake_doc2md::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .dpi(150)
///     .concurrency(4)
///     .model("gpt-4.1-nano")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Rendering DPI. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Cap on the longest rendered edge in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Concurrent VLM calls per document. Default: 10.
    pub concurrency: usize,

    /// LLM model identifier. If None, uses `gpt-4.1-nano` for named providers.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens generated per page. Default: 4096.
    pub max_tokens: usize,

    /// Retries per page on a transient VLM failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Custom system prompt. If None, uses the built-in prompt.
    pub system_prompt: Option<String>,

    /// Separator between pages in the assembled Markdown. Default: none.
    pub page_separator: PageSeparator,

    /// Store each rendered page as `page-NNN.png` in the bundle. Default: false.
    pub keep_page_images: bool,

    /// Per-VLM-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Explicit pdfium shared library. If None, the system library is used.
    pub pdfium_lib_path: Option<PathBuf>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 2000,
            concurrency: 10,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            system_prompt: None,
            page_separator: PageSeparator::default(),
            keep_page_images: false,
            api_timeout_secs: 60,
            pdfium_lib_path: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("page_separator", &self.page_separator)
            .field("keep_page_images", &self.keep_page_images)
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn keep_page_images(mut self, v: bool) -> Self {
        self.config.keep_page_images = v;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, Doc2MdError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(Doc2MdError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.max_tokens == 0 {
            return Err(Doc2MdError::InvalidConfig("Max tokens must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(Doc2MdError::InvalidConfig(
                "API timeout must be ≥ 1s".into(),
            ));
        }
        Ok(self.config)
    }
}

/// How to separate pages in the assembled Markdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSeparator {
    /// Pages joined with a blank line. (default)
    #[default]
    None,
    /// Horizontal rule between pages.
    HorizontalRule,
    /// HTML comment carrying the page number: `<!-- page N -->`.
    Comment,
}

impl PageSeparator {
    /// Text inserted before page `page_num` (1-indexed, never the first page).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::None => "\n\n".to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n\n<!-- page {page_num} -->\n\n"),
        }
    }

    /// Parse the CLI spelling (`none`, `hr`, `comment`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" => Some(PageSeparator::None),
            "hr" | "---" => Some(PageSeparator::HorizontalRule),
            "comment" => Some(PageSeparator::Comment),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_defaults() {
        let c = ServiceConfig::default();
        assert_eq!(c.download_timeout_secs, 120);
        assert_eq!(c.arxiv_base_url, "https://arxiv.org");
        assert!(c.max_concurrent_jobs.is_none());
        assert!(c.tool_timeout_secs.is_none());
        assert_eq!(c.tools.pandoc, "pandoc");
        assert!(c.retain_sources);
    }

    #[test]
    fn service_dirs_hang_off_data_dir() {
        let c = ServiceConfig::builder().data_dir("/srv/d").build().unwrap();
        assert_eq!(c.converted_dir(), PathBuf::from("/srv/d/converted_files"));
        assert_eq!(c.original_dir(), PathBuf::from("/srv/d/original_files"));
    }

    #[test]
    fn service_rejects_zero_limits() {
        assert!(ServiceConfig::builder().max_concurrent_jobs(0).build().is_err());
        assert!(ServiceConfig::builder().tool_timeout_secs(0).build().is_err());
        assert!(ServiceConfig::builder().download_timeout_secs(0).build().is_err());
    }

    #[test]
    fn arxiv_base_url_trailing_slash_trimmed() {
        let c = ServiceConfig::builder()
            .arxiv_base_url("http://127.0.0.1:9000/")
            .build()
            .unwrap();
        assert_eq!(c.arxiv_base_url, "http://127.0.0.1:9000");
    }

    #[test]
    fn arxiv_base_url_must_be_http() {
        let err = ServiceConfig::builder()
            .arxiv_base_url("ftp://arxiv.org")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("ftp://arxiv.org"));
    }

    #[test]
    fn extraction_builder_clamps() {
        let c = ExtractionConfig::builder()
            .dpi(1000)
            .concurrency(0)
            .temperature(9.0)
            .build()
            .unwrap();
        assert_eq!(c.dpi, 400);
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn separator_render_and_parse() {
        assert_eq!(PageSeparator::None.render(2), "\n\n");
        assert_eq!(PageSeparator::Comment.render(3), "\n\n<!-- page 3 -->\n\n");
        assert_eq!(PageSeparator::parse("HR"), Some(PageSeparator::HorizontalRule));
        assert_eq!(PageSeparator::parse("bogus"), None);
    }
}
