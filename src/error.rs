//! Error types for the edgequake-doc2md library.
//!
//! Two distinct error types reflect two distinct failure boundaries:
//!
//! * [`Doc2MdError`]: **Synchronous**: returned directly to whoever called
//!   the orchestrator (bad request payload, unknown task id, unpublished
//!   artifact, invalid configuration). The transport maps these to HTTP
//!   status codes.
//!
//! * [`ConversionError`]: **Background**: raised while a job downloads,
//!   converts or publishes a document. These never cross the submission
//!   boundary; the orchestrator records their message on the task
//!   (`status = failed`) and the client observes them by polling.

use std::path::PathBuf;
use thiserror::Error;

use crate::task::TaskStatus;

/// Errors surfaced synchronously by the orchestrator and its stores.
#[derive(Debug, Error)]
pub enum Doc2MdError {
    // ── Request errors ────────────────────────────────────────────────────
    /// The conversion payload is malformed or names an unknown type.
    #[error("{0}")]
    BadRequest(String),

    // ── Lookup errors ─────────────────────────────────────────────────────
    /// No task with this id was ever created in this process.
    #[error("Task not found: '{task_id}'")]
    TaskNotFound { task_id: String },

    /// No artifact is published under this name.
    #[error("Artifact not found: '{name}'")]
    ArtifactNotFound { name: String },

    /// A terminal transition was attempted on a task that already finished.
    #[error("Task '{task_id}' already finished with status '{status}'")]
    TaskAlreadyFinished { task_id: String, status: TaskStatus },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// A store directory could not be created or read.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Doc2MdError {
    /// `true` for lookups that missed (unknown task id or artifact name).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Doc2MdError::TaskNotFound { .. } | Doc2MdError::ArtifactNotFound { .. }
        )
    }
}

/// Failure of one background conversion job.
///
/// The `Display` text is what clients see in the task's `error` field, so
/// every variant renders a complete, human-readable cause.
#[derive(Debug, Error)]
pub enum ConversionError {
    // ── Download errors ───────────────────────────────────────────────────
    /// Transport error or non-2xx response while fetching the source.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Source errors ─────────────────────────────────────────────────────
    /// The downloaded file is not a PDF.
    #[error("Downloaded file is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// The arXiv source tree has no recognisable main LaTeX document.
    #[error("No .tex files found in the directory '{dir}'")]
    NoDocumentFound { dir: PathBuf },

    // ── Toolchain errors ──────────────────────────────────────────────────
    /// An external conversion stage exited with failure (or could not start).
    #[error("Command failed: {command}\n{exit}")]
    ToolFailure { command: String, exit: String },

    /// An external conversion stage exceeded the configured per-stage timeout.
    #[error("Command timed out after {secs}s: {command}")]
    ToolTimeout { command: String, secs: u64 },

    // ── PDF extraction errors ─────────────────────────────────────────────
    /// The PDF extraction engine could not produce any content.
    #[error("PDF extraction failed: {0}")]
    ExtractionFailed(String),

    /// The vision LLM provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Packaging errors ──────────────────────────────────────────────────
    /// Unpacking the source or packing the bundle failed.
    #[error(transparent)]
    Archive(#[from] bundle_tar::ArchiveError),

    /// A filesystem step of the job failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Publishing the bundle into the artifact store failed.
    #[error("Failed to publish artifact: {0}")]
    Publish(#[source] Doc2MdError),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (including a panicked job).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConversionError {
    /// Wrap an I/O error with a short description of the step that failed.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ConversionError::Io {
            context: context.into(),
            source,
        }
    }
}
