//! HTTP server binary for edgequake-doc2md.
//!
//! Maps CLI flags onto `ServiceConfig` / `ExtractionConfig`, wires the
//! orchestrator and serves the router until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_doc2md::{http, ExtractionConfig, Orchestrator, PageSeparator, ServiceConfig, ToolPrograms};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"API:
  POST /convert                {"type": "pdf",   "data": {"uri": "https://…/paper.pdf"}}
                               {"type": "arxiv", "data": {"arxiv_id": "1706.03762"}}
  GET  /status/{task_id}       poll a pending conversion
  GET  /download/{file_name}   fetch the <key>.tar.gz bundle
  GET  /health

EXAMPLES:
  # Serve on the default address, storing bundles under ./converted_files
  doc2md-server

  # Bounded worker pool and per-stage LaTeX timeout
  doc2md-server --max-jobs 4 --tool-timeout 900 --data-dir /var/lib/doc2md

  # Submit and poll
  curl -s localhost:8000/convert -H 'content-type: application/json' \
       -d '{"type":"arxiv","data":{"arxiv_id":"1706.03762"}}'
  curl -s localhost:8000/status/<task_id>

EXTERNAL TOOLS:
  arXiv conversion needs latexml, latexmlpost and pandoc on PATH.
  PDF conversion needs libpdfium and a vision LLM provider.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  RUST_LOG                Log filter, overrides -v / -q
"#;

/// Serve PDF and arXiv to Markdown bundle conversions over HTTP.
#[derive(Parser, Debug)]
#[command(
    name = "doc2md-server",
    version,
    about = "Asynchronous PDF / arXiv to Markdown conversion service",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "DOC2MD_BIND", default_value = "127.0.0.1:8000")]
    bind: SocketAddr,

    /// Root for converted_files/ and original_files/.
    #[arg(long, env = "DOC2MD_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    /// Cap on concurrently running conversions (unbounded if unset).
    #[arg(long, env = "DOC2MD_MAX_JOBS")]
    max_jobs: Option<usize>,

    /// Per-stage timeout for latexml / latexmlpost / pandoc, in seconds.
    #[arg(long, env = "DOC2MD_TOOL_TIMEOUT")]
    tool_timeout: Option<u64>,

    /// Source download timeout in seconds.
    #[arg(long, env = "DOC2MD_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Base URL for arXiv e-print downloads.
    #[arg(long, env = "DOC2MD_ARXIV_BASE_URL", default_value = "https://arxiv.org")]
    arxiv_base_url: String,

    /// Do not keep downloaded sources under <data-dir>/original_files.
    #[arg(long, env = "DOC2MD_DISCARD_SOURCES")]
    discard_sources: bool,

    /// LaTeX → XML program.
    #[arg(long, env = "DOC2MD_LATEXML", default_value = "latexml")]
    latexml: String,

    /// XML → HTML program.
    #[arg(long, env = "DOC2MD_LATEXMLPOST", default_value = "latexmlpost")]
    latexmlpost: String,

    /// HTML → Markdown program.
    #[arg(long, env = "DOC2MD_PANDOC", default_value = "pandoc")]
    pandoc: String,

    /// Vision LLM model ID (default: gpt-4.1-nano).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Vision LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// PDF rendering DPI (72–400).
    #[arg(long, env = "DOC2MD_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Concurrent VLM calls per PDF.
    #[arg(short, long, env = "DOC2MD_CONCURRENCY", default_value_t = 10)]
    concurrency: usize,

    /// Retries per page on VLM failure.
    #[arg(long, env = "DOC2MD_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-page VLM call timeout in seconds.
    #[arg(long, env = "DOC2MD_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Page separator in PDF bundles: none, hr, comment.
    #[arg(long, env = "DOC2MD_SEPARATOR", default_value = "none")]
    separator: String,

    /// Text file with a custom transcription prompt.
    #[arg(long, env = "DOC2MD_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Ship each rendered page as page-NNN.png in PDF bundles.
    #[arg(long, env = "DOC2MD_KEEP_PAGE_IMAGES")]
    keep_page_images: bool,

    /// Path to the pdfium shared library (system library if unset).
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOC2MD_VERBOSE")]
    verbose: bool,

    /// Only log errors.
    #[arg(short, long, env = "DOC2MD_QUIET", conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn service_config(&self) -> Result<ServiceConfig> {
        let mut builder = ServiceConfig::builder()
            .data_dir(&self.data_dir)
            .download_timeout_secs(self.download_timeout)
            .arxiv_base_url(&self.arxiv_base_url)
            .retain_sources(!self.discard_sources)
            .tools(ToolPrograms {
                latexml: self.latexml.clone(),
                latexmlpost: self.latexmlpost.clone(),
                pandoc: self.pandoc.clone(),
            });
        if let Some(n) = self.max_jobs {
            builder = builder.max_concurrent_jobs(n);
        }
        if let Some(secs) = self.tool_timeout {
            builder = builder.tool_timeout_secs(secs);
        }
        Ok(builder.build()?)
    }

    fn extraction_config(&self) -> Result<ExtractionConfig> {
        let separator = PageSeparator::parse(&self.separator)
            .with_context(|| format!("Unknown page separator '{}' (expected none, hr or comment)", self.separator))?;

        let mut builder = ExtractionConfig::builder()
            .dpi(self.dpi)
            .concurrency(self.concurrency)
            .max_retries(self.max_retries)
            .api_timeout_secs(self.api_timeout)
            .page_separator(separator)
            .keep_page_images(self.keep_page_images);
        if let Some(ref model) = self.model {
            builder = builder.model(model);
        }
        if let Some(ref provider) = self.provider {
            builder = builder.provider_name(provider);
        }
        if let Some(ref path) = self.system_prompt {
            let prompt = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read system prompt from {}", path.display()))?;
            builder = builder.system_prompt(prompt);
        }
        if let Some(ref lib) = self.pdfium_lib {
            builder = builder.pdfium_lib_path(lib);
        }
        Ok(builder.build()?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let service = cli.service_config().context("Invalid service configuration")?;
    let extraction = cli.extraction_config().context("Invalid extraction configuration")?;

    let orchestrator = Orchestrator::from_config(&service, extraction)
        .with_context(|| format!("Failed to initialise data directory {}", service.data_dir.display()))?;
    let app = http::router(Arc::new(orchestrator));

    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;
    info!(
        "Listening on http://{} (bundles in {})",
        listener.local_addr().unwrap_or(cli.bind),
        service.converted_dir().display()
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Ctrl-C handler unavailable: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Ctrl-C received, draining in-flight requests");
}
