//! # edgequake-doc2md
//!
//! Asynchronous conversion of PDF documents and arXiv papers into Markdown
//! bundles, with content-addressed caching.
//!
//! ## How it works
//!
//! A request names a document by identity: a PDF URI or an arXiv id. The
//! identity hashes to a cache key; if `<key>.tar.gz` is already in the
//! artifact store the request completes immediately. Otherwise a task is
//! registered and a background job downloads the source, converts it and
//! publishes the bundle atomically. Clients poll the task and then download
//! the bundle by file name.
//!
//! ```text
//! POST /convert ─▶ Orchestrator::submit ─▶ cache hit? ─▶ completed, no task_id
//!                                            │
//!                                            └─▶ pending task ─▶ job: fetch ─▶ convert ─▶ publish
//! GET /status/{id}      ─▶ Orchestrator::poll_status
//! GET /download/{file}  ─▶ Orchestrator::open_artifact
//! ```
//!
//! Two converters are built in:
//!
//! * **PDF**: pages are rasterised with pdfium and transcribed by a vision
//!   LLM ([`pipeline::VisionExtractor`]).
//! * **arXiv**: the LaTeX e-print runs through `latexml`, `latexmlpost` and
//!   `pandoc` ([`convert::ArxivConverter`]).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_doc2md::{http, ExtractionConfig, Orchestrator, ServiceConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = ServiceConfig::builder().data_dir("/var/lib/doc2md").build()?;
//!     let orchestrator = Orchestrator::from_config(&service, ExtractionConfig::default())?;
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//!     axum::serve(listener, http::router(Arc::new(orchestrator))).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doc2md-server` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache_key;
pub mod config;
pub mod convert;
pub mod download;
pub mod error;
pub mod http;
pub mod orchestrator;
pub mod pipeline;
pub mod prompts;
pub mod request;
pub mod store;
pub mod task;
pub mod tools;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache_key::{derive_cache_key, CacheKey};
pub use config::{ExtractionConfig, PageSeparator, ServiceConfig, ToolPrograms};
pub use convert::{Converter, ConverterSet};
pub use error::{ConversionError, Doc2MdError};
pub use orchestrator::Orchestrator;
pub use request::{parse_request, ConversionRequest, RawConversionRequest, RequestKind};
pub use store::ArtifactStore;
pub use task::{ConversionTask, TaskId, TaskRegistry, TaskStatus};
