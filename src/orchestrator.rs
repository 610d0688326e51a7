//! Submission, background execution and lookup of conversions.
//!
//! ## Lifecycle
//!
//! ```text
//! submit ──▶ derive key ──▶ artifact exists? ──yes──▶ completed (no task_id)
//!                                 │
//!                                 no
//!                                 ▼
//!                        registry.create (pending) ──▶ tokio::spawn(job)
//!                                                          │
//!          fetch ──▶ convert ──▶ publish ──▶ mark_completed │ any error ──▶ mark_failed
//! ```
//!
//! `submit` never waits for a job and never fails once the request is
//! valid. Every job ends in exactly one terminal transition, including jobs
//! that panic: the job body runs in its own task and the supervisor records
//! a join error as a failure.
//!
//! Two submissions for the same key that race both run to completion; the
//! store's atomic publish makes the last one win with a complete artifact.

use crate::cache_key::{derive_cache_key, CacheKey};
use crate::config::{ExtractionConfig, ServiceConfig};
use crate::convert::{Converter, ConverterSet};
use crate::error::{ConversionError, Doc2MdError};
use crate::request::ConversionRequest;
use crate::store::ArtifactStore;
use crate::task::{ConversionTask, TaskId, TaskRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Coordinates the cache, the task registry and the converters.
#[derive(Debug)]
pub struct Orchestrator {
    store: ArtifactStore,
    registry: Arc<TaskRegistry>,
    converters: ConverterSet,
    /// Where fetched sources are kept, when retention is on.
    original_dir: Option<PathBuf>,
    permits: Option<Arc<Semaphore>>,
}

impl Orchestrator {
    pub fn new(store: ArtifactStore, registry: Arc<TaskRegistry>, converters: ConverterSet, config: &ServiceConfig) -> Self {
        Self {
            store,
            registry,
            converters,
            original_dir: config.retain_sources.then(|| config.original_dir()),
            permits: config.max_concurrent_jobs.map(|n| Arc::new(Semaphore::new(n))),
        }
    }

    /// Production wiring from configuration.
    pub fn from_config(config: &ServiceConfig, extraction: ExtractionConfig) -> Result<Self, Doc2MdError> {
        let store = ArtifactStore::open(config.converted_dir())?;
        let converters =
            ConverterSet::standard(config, extraction).map_err(|e| Doc2MdError::InvalidConfig(e.to_string()))?;
        if config.retain_sources {
            let dir = config.original_dir();
            std::fs::create_dir_all(&dir).map_err(|e| Doc2MdError::Io { path: dir, source: e })?;
        }
        Ok(Self::new(store, Arc::new(TaskRegistry::new()), converters, config))
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Accept a validated request.
    ///
    /// Returns a completed task without `task_id` when the artifact already
    /// exists, otherwise a fresh pending task whose job has been spawned.
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, request: ConversionRequest) -> ConversionTask {
        let key = derive_cache_key(request.identity());
        let file_name = key.artifact_file_name();

        if self.store.exists(&key) {
            info!("Cache hit for {} {} → {}", request.kind(), request.identity(), file_name);
            return ConversionTask::cache_hit(file_name);
        }

        let task = self.registry.create(file_name);
        let Some(task_id) = task.task_id.clone() else {
            // `create` always mints an id.
            return task;
        };
        info!("Accepted {} {} as task {}", request.kind(), request.identity(), task_id);

        let job = Job {
            task_id,
            key,
            identity: request.identity().to_string(),
            converter: self.converters.select(request.kind()),
            store: self.store.clone(),
            original_dir: self.original_dir.clone(),
        };
        let registry = Arc::clone(&self.registry);
        let permits = self.permits.clone();
        tokio::spawn(supervise(job, registry, permits));

        task
    }

    /// Current state of a task.
    pub fn poll_status(&self, task_id: &TaskId) -> Result<ConversionTask, Doc2MdError> {
        self.registry.get(task_id)
    }

    /// Whole artifact by file name (`<key>.tar.gz`).
    pub async fn fetch_artifact(&self, file_name: &str) -> Result<Vec<u8>, Doc2MdError> {
        self.store.read(&artifact_key(file_name)?).await
    }

    /// Artifact by file name, opened for streaming.
    pub async fn open_artifact(&self, file_name: &str) -> Result<tokio::fs::File, Doc2MdError> {
        self.store.open_read(&artifact_key(file_name)?).await
    }
}

fn artifact_key(file_name: &str) -> Result<CacheKey, Doc2MdError> {
    CacheKey::from_file_name(file_name).ok_or_else(|| Doc2MdError::ArtifactNotFound {
        name: file_name.to_string(),
    })
}

/// Everything one background job needs, detached from the orchestrator.
struct Job {
    task_id: TaskId,
    key: CacheKey,
    identity: String,
    converter: Arc<dyn Converter>,
    store: ArtifactStore,
    original_dir: Option<PathBuf>,
}

/// Run `job` to a terminal registry transition, whatever happens.
async fn supervise(job: Job, registry: Arc<TaskRegistry>, permits: Option<Arc<Semaphore>>) {
    let task_id = job.task_id.clone();

    // Held for the whole job; `None` when unbounded.
    let _permit = match permits {
        Some(sem) => match sem.acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(_) => {
                finish(&registry, &task_id, Err(ConversionError::Internal("Job pool closed".into())));
                return;
            }
        },
        None => None,
    };

    let start = Instant::now();
    let outcome = match tokio::spawn(job.run()).await {
        Ok(result) => result,
        Err(join_err) => Err(ConversionError::Internal(format!("Conversion job panicked: {join_err}"))),
    };
    debug!("Task {} ran for {}ms", task_id, start.elapsed().as_millis());
    finish(&registry, &task_id, outcome);
}

fn finish(registry: &TaskRegistry, task_id: &TaskId, outcome: Result<String, ConversionError>) {
    let recorded = match outcome {
        Ok(file_name) => {
            info!("Task {} completed: {}", task_id, file_name);
            registry.mark_completed(task_id, file_name)
        }
        Err(e) => {
            error!("Task {} failed: {}", task_id, e);
            registry.mark_failed(task_id, e.to_string())
        }
    };
    if let Err(e) = recorded {
        warn!("Could not record outcome of task {}: {}", task_id, e);
    }
}

impl Job {
    async fn run(self) -> Result<String, ConversionError> {
        let work = tempfile::tempdir().map_err(|e| ConversionError::io("Failed to create job directory", e))?;
        let source = work
            .path()
            .join(format!("{}{}", self.key, self.converter.source_extension()));

        let bytes = self.converter.fetch(&self.identity, &source).await?;
        info!("Task {}: fetched {} bytes from {}", self.task_id, bytes, self.converter.source_url(&self.identity));

        if let Some(ref dir) = self.original_dir {
            self.retain_source(&source, dir).await;
        }

        let bundle = work.path().join("bundle");
        self.converter.convert(&source, &bundle).await?;

        self.store
            .publish_dir(&self.key, &bundle)
            .await
            .map_err(ConversionError::Publish)?;
        Ok(self.key.artifact_file_name())
    }

    /// Best effort: a failed copy is logged, not fatal.
    async fn retain_source(&self, source: &std::path::Path, dir: &std::path::Path) {
        let Some(name) = source.file_name() else { return };
        let dest = dir.join(name);
        let copied = match tokio::fs::create_dir_all(dir).await {
            Ok(()) => tokio::fs::copy(source, &dest).await,
            Err(e) => Err(e),
        };
        match copied {
            Ok(_) => debug!("Retained source at {}", dest.display()),
            Err(e) => warn!("Could not retain source at {}: {}", dest.display(), e),
        }
    }
}
