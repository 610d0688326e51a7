//! Shared fakes for the integration tests: no network, no subprocesses,
//! no vision model.

#![allow(dead_code)]

use async_trait::async_trait;
use edgequake_doc2md::convert::{
    ArxivConverter, BundleImage, DocumentMetadata, ExtractedDocument, PdfConverter, PdfExtractor,
};
use edgequake_doc2md::download::Downloader;
use edgequake_doc2md::tools::{ToolCommand, ToolInvoker, ToolOutput};
use edgequake_doc2md::{
    ArtifactStore, ConversionError, ConversionTask, ConverterSet, Orchestrator, ServiceConfig, TaskId,
    TaskRegistry, ToolPrograms,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

pub const ARXIV_BASE: &str = "https://arxiv.test";
pub const PDF_BYTES: &[u8] = b"%PDF-1.7\n1 0 obj\n<<>>\nendobj\n%%EOF\n";

/// Serves canned bodies by URL; unknown URLs fail like a 404.
#[derive(Default)]
pub struct FakeDownloader {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    calls: AtomicUsize,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeDownloader {
    pub fn serve(&self, url: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.bodies.lock().unwrap().insert(url.into(), body.into());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Block every download until the returned handle is notified.
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, ConversionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let body = self.bodies.lock().unwrap().get(url).cloned();
        match body {
            Some(bytes) => {
                std::fs::write(dest, &bytes).unwrap();
                Ok(bytes.len() as u64)
            }
            None => Err(ConversionError::DownloadFailed {
                url: url.to_string(),
                reason: "HTTP 404 Not Found".into(),
            }),
        }
    }
}

/// Pretends to be the LaTeX toolchain; optionally fails one program.
#[derive(Default)]
pub struct FakeInvoker {
    pub fail_program: Option<String>,
    pub seen: Mutex<Vec<String>>,
}

#[async_trait]
impl ToolInvoker for FakeInvoker {
    async fn invoke(&self, command: &ToolCommand) -> Result<ToolOutput, ConversionError> {
        self.seen.lock().unwrap().push(command.program.clone());
        if self.fail_program.as_deref() == Some(command.program.as_str()) {
            return Err(ConversionError::ToolFailure {
                command: command.to_string(),
                exit: "exit status: 1\nStderr: fatal error".into(),
            });
        }
        if command.program == "pandoc" {
            let out = command.args.iter().skip_while(|a| *a != "-o").nth(1).unwrap();
            std::fs::write(out, "# Attention Is All You Need\n\nThe dominant sequence models...\n").unwrap();
        }
        Ok(ToolOutput::default())
    }
}

/// Returns a fixed document, or panics when asked to.
#[derive(Default)]
pub struct FakeExtractor {
    pub panic: bool,
}

#[async_trait]
impl PdfExtractor for FakeExtractor {
    async fn extract(&self, _pdf: &Path) -> Result<ExtractedDocument, ConversionError> {
        if self.panic {
            panic!("extractor blew up");
        }
        Ok(ExtractedDocument {
            markdown: "# A Paper\n\nAbstract.\n".into(),
            images: vec![BundleImage {
                name: "page-001.png".into(),
                bytes: vec![0x89, b'P', b'N', b'G'],
            }],
            metadata: DocumentMetadata {
                title: Some("A Paper".into()),
                page_count: 1,
                pdf_version: "Pdf1_7".into(),
                ..Default::default()
            },
        })
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub orch: Arc<Orchestrator>,
    pub downloader: Arc<FakeDownloader>,
    pub invoker: Arc<FakeInvoker>,
}

#[derive(Default)]
pub struct HarnessOptions {
    pub fail_program: Option<String>,
    pub panic_extractor: bool,
    pub retain_sources: bool,
    pub max_jobs: Option<usize>,
}

pub fn harness() -> Harness {
    harness_with(HarnessOptions::default())
}

/// Route library logs to the test writer; `RUST_LOG=debug` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn harness_with(opts: HarnessOptions) -> Harness {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut builder = ServiceConfig::builder()
        .data_dir(dir.path())
        .arxiv_base_url(ARXIV_BASE)
        .retain_sources(opts.retain_sources);
    if let Some(n) = opts.max_jobs {
        builder = builder.max_concurrent_jobs(n);
    }
    let config = builder.build().unwrap();

    let downloader = Arc::new(FakeDownloader::default());
    let invoker = Arc::new(FakeInvoker {
        fail_program: opts.fail_program,
        ..Default::default()
    });
    let extractor = Arc::new(FakeExtractor {
        panic: opts.panic_extractor,
    });

    let pdf = PdfConverter::new(downloader.clone(), extractor);
    let arxiv = ArxivConverter::new(downloader.clone(), invoker.clone(), ARXIV_BASE, ToolPrograms::default());
    let converters = ConverterSet::new(Arc::new(pdf), Arc::new(arxiv));

    let store = ArtifactStore::open(config.converted_dir()).unwrap();
    let orch = Orchestrator::new(store, Arc::new(TaskRegistry::new()), converters, &config);

    Harness {
        dir,
        orch: Arc::new(orch),
        downloader,
        invoker,
    }
}

/// A gzip tar e-print with `main.tex` at the top level.
pub fn arxiv_eprint() -> Vec<u8> {
    let tree = tempfile::tempdir().unwrap();
    std::fs::write(
        tree.path().join("main.tex"),
        "\\documentclass{article}\\begin{document}Hi\\end{document}",
    )
    .unwrap();
    std::fs::write(tree.path().join("refs.bib"), "").unwrap();
    bundle_tar::pack_dir(tree.path(), ".", Vec::new()).unwrap()
}

/// Poll until the task leaves `pending`, or panic after five seconds.
pub async fn wait_terminal(orch: &Orchestrator, task_id: &TaskId) -> ConversionTask {
    for _ in 0..500 {
        let task = orch.poll_status(task_id).unwrap();
        if task.status.is_terminal() {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} did not finish in time");
}
