//! Orchestrator scenarios against in-process fakes.

mod common;

use common::*;
use edgequake_doc2md::{derive_cache_key, ConversionRequest, Doc2MdError, TaskId, TaskStatus};
use tokio_test::{assert_err, assert_ok};

const PDF_URI: &str = "https://example.com/a.pdf";

#[tokio::test]
async fn cache_hit_short_circuits() {
    let h = harness();
    let key = derive_cache_key(PDF_URI);
    assert_ok!(h.orch.store().publish_bytes(&key, b"already converted".to_vec()).await);

    let task = h.orch.submit(ConversionRequest::pdf(PDF_URI));

    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.task_id.is_none());
    assert_eq!(task.file_name.as_deref(), Some(key.artifact_file_name().as_str()));
    assert!(h.orch.registry().is_empty());
    assert_eq!(h.downloader.calls(), 0);
}

#[tokio::test]
async fn pdf_end_to_end() {
    let h = harness();
    h.downloader.serve(PDF_URI, PDF_BYTES);

    let task = h.orch.submit(ConversionRequest::pdf(PDF_URI));
    assert_eq!(task.status, TaskStatus::Pending);
    let task_id = task.task_id.clone().expect("fresh submissions carry a task id");

    let done = wait_terminal(&h.orch, &task_id).await;
    assert_eq!(done.status, TaskStatus::Completed, "error: {:?}", done.error);
    let key = derive_cache_key(PDF_URI);
    let file_name = key.artifact_file_name();
    assert_eq!(done.file_name.as_deref(), Some(file_name.as_str()));
    assert!(done.error.is_none());

    let bytes = h.orch.fetch_artifact(&file_name).await.unwrap();
    let entries = bundle_tar::list_entries(&bytes).unwrap();
    for expected in [format!("{key}/{key}.md"), format!("{key}/{key}_meta.json"), format!("{key}/page-001.png")] {
        assert!(entries.contains(&expected), "missing {expected} in {entries:?}");
    }

    // Second submission is now a cache hit.
    let again = h.orch.submit(ConversionRequest::pdf(PDF_URI));
    assert_eq!(again.status, TaskStatus::Completed);
    assert!(again.task_id.is_none());
    assert_eq!(h.orch.registry().len(), 1);
    assert_eq!(h.downloader.calls(), 1);
}

#[tokio::test]
async fn arxiv_end_to_end() {
    let h = harness();
    h.downloader.serve(format!("{ARXIV_BASE}/e-print/1706.03762"), arxiv_eprint());

    let task = h.orch.submit(ConversionRequest::arxiv("1706.03762"));
    let done = wait_terminal(&h.orch, task.task_id.as_ref().unwrap()).await;
    assert_eq!(done.status, TaskStatus::Completed, "error: {:?}", done.error);

    let key = derive_cache_key("1706.03762");
    let bytes = h.orch.fetch_artifact(&key.artifact_file_name()).await.unwrap();
    let out = tempfile::tempdir().unwrap();
    bundle_tar::unpack_tar_gz(&bytes, out.path()).unwrap();
    let md = std::fs::read_to_string(out.path().join(key.as_str()).join("output.md")).unwrap();
    assert!(md.starts_with("# Attention Is All You Need"));

    assert_eq!(*h.invoker.seen.lock().unwrap(), ["latexml", "latexmlpost", "pandoc"]);
}

#[tokio::test]
async fn tool_failure_is_isolated() {
    let h = harness_with(HarnessOptions {
        fail_program: Some("latexmlpost".into()),
        ..Default::default()
    });
    h.downloader.serve(format!("{ARXIV_BASE}/e-print/2401.00001"), arxiv_eprint());

    let task = h.orch.submit(ConversionRequest::arxiv("2401.00001"));
    let done = wait_terminal(&h.orch, task.task_id.as_ref().unwrap()).await;

    assert_eq!(done.status, TaskStatus::Failed);
    let error = done.error.expect("failed tasks carry an error");
    assert!(error.starts_with("Command failed: latexmlpost"), "got: {error}");
    assert!(!h.orch.store().exists(&derive_cache_key("2401.00001")));
    assert_eq!(*h.invoker.seen.lock().unwrap(), ["latexml", "latexmlpost"]);

    // Nothing was published, so a resubmission schedules a new attempt.
    let retry = h.orch.submit(ConversionRequest::arxiv("2401.00001"));
    assert_eq!(retry.status, TaskStatus::Pending);
    assert_ne!(retry.task_id, task.task_id);
}

#[tokio::test]
async fn missing_main_document_fails_task() {
    let h = harness();
    let tree = tempfile::tempdir().unwrap();
    std::fs::write(tree.path().join("README"), "no latex here").unwrap();
    let eprint = bundle_tar::pack_dir(tree.path(), ".", Vec::new()).unwrap();
    h.downloader.serve(format!("{ARXIV_BASE}/e-print/0000.00000"), eprint);

    let task = h.orch.submit(ConversionRequest::arxiv("0000.00000"));
    let done = wait_terminal(&h.orch, task.task_id.as_ref().unwrap()).await;
    assert_eq!(done.status, TaskStatus::Failed);
    assert!(done.error.unwrap().contains("No .tex files found"));
    assert!(h.invoker.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn download_failure_is_recorded() {
    let h = harness();
    let task = h.orch.submit(ConversionRequest::pdf("https://example.com/missing.pdf"));
    let done = wait_terminal(&h.orch, task.task_id.as_ref().unwrap()).await;

    assert_eq!(done.status, TaskStatus::Failed);
    let error = done.error.unwrap();
    assert!(error.contains("HTTP 404"), "got: {error}");
}

#[tokio::test]
async fn non_pdf_download_is_rejected() {
    let h = harness();
    h.downloader.serve(PDF_URI, "<html>not a pdf</html>");
    let task = h.orch.submit(ConversionRequest::pdf(PDF_URI));
    let done = wait_terminal(&h.orch, task.task_id.as_ref().unwrap()).await;
    assert_eq!(done.status, TaskStatus::Failed);
    assert!(done.error.unwrap().contains("not a valid PDF"));
}

#[tokio::test]
async fn publish_failure_is_recorded() {
    let h = harness();
    h.downloader.serve(PDF_URI, PDF_BYTES);
    let store_root = h.dir.path().join("converted_files");
    std::fs::remove_dir_all(&store_root).unwrap();
    std::fs::write(&store_root, "not a directory").unwrap();

    let task = h.orch.submit(ConversionRequest::pdf(PDF_URI));
    assert_eq!(task.status, TaskStatus::Pending);
    let done = wait_terminal(&h.orch, task.task_id.as_ref().unwrap()).await;

    assert_eq!(done.status, TaskStatus::Failed);
    let error = done.error.unwrap();
    assert!(error.starts_with("Failed to publish artifact"), "got: {error}");
    assert!(!h.orch.store().exists(&derive_cache_key(PDF_URI)));
}

#[tokio::test]
async fn panicking_job_is_recorded_as_failure() {
    let h = harness_with(HarnessOptions {
        panic_extractor: true,
        ..Default::default()
    });
    h.downloader.serve(PDF_URI, PDF_BYTES);

    let task = h.orch.submit(ConversionRequest::pdf(PDF_URI));
    let done = wait_terminal(&h.orch, task.task_id.as_ref().unwrap()).await;
    assert_eq!(done.status, TaskStatus::Failed);
    assert!(done.error.unwrap().contains("panicked"));
}

#[tokio::test]
async fn status_is_monotonic() {
    let h = harness();
    h.downloader.serve(PDF_URI, PDF_BYTES);
    let gate = h.downloader.hold();

    let task = h.orch.submit(ConversionRequest::pdf(PDF_URI));
    let task_id = task.task_id.unwrap();
    for _ in 0..20 {
        assert_eq!(h.orch.poll_status(&task_id).unwrap().status, TaskStatus::Pending);
        tokio::task::yield_now().await;
    }

    gate.notify_one();
    let done = wait_terminal(&h.orch, &task_id).await;
    assert_eq!(done.status, TaskStatus::Completed);
    for _ in 0..20 {
        assert_eq!(h.orch.poll_status(&task_id).unwrap().status, TaskStatus::Completed);
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn racing_submissions_for_one_key_both_complete() {
    let h = harness();
    h.downloader.serve(PDF_URI, PDF_BYTES);

    let a = h.orch.submit(ConversionRequest::pdf(PDF_URI));
    let b = h.orch.submit(ConversionRequest::pdf(PDF_URI));
    assert_ne!(a.task_id, b.task_id);

    let da = wait_terminal(&h.orch, a.task_id.as_ref().unwrap()).await;
    let db = wait_terminal(&h.orch, b.task_id.as_ref().unwrap()).await;
    assert_eq!(da.status, TaskStatus::Completed);
    assert_eq!(db.status, TaskStatus::Completed);

    let bytes = h.orch.fetch_artifact(&da.file_name.unwrap()).await.unwrap();
    assert!(bundle_tar::list_entries(&bytes).is_ok());
}

#[tokio::test]
async fn concurrency_cap_queues_jobs() {
    let h = harness_with(HarnessOptions {
        max_jobs: Some(1),
        ..Default::default()
    });
    h.downloader.serve(PDF_URI, PDF_BYTES);
    h.downloader.serve("https://example.com/b.pdf", PDF_BYTES);
    let gate = h.downloader.hold();

    let a = h.orch.submit(ConversionRequest::pdf(PDF_URI));
    let b = h.orch.submit(ConversionRequest::pdf("https://example.com/b.pdf"));
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    // Only the first job holds a permit and reached the downloader.
    assert_eq!(h.downloader.calls(), 1);

    gate.notify_one();
    wait_terminal(&h.orch, a.task_id.as_ref().unwrap()).await;
    gate.notify_one();
    let done = wait_terminal(&h.orch, b.task_id.as_ref().unwrap()).await;
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(h.downloader.calls(), 2);
}

#[tokio::test]
async fn retained_sources_land_in_original_files() {
    let h = harness_with(HarnessOptions {
        retain_sources: true,
        ..Default::default()
    });
    h.downloader.serve(PDF_URI, PDF_BYTES);
    let task = h.orch.submit(ConversionRequest::pdf(PDF_URI));
    wait_terminal(&h.orch, task.task_id.as_ref().unwrap()).await;

    let kept = h
        .dir
        .path()
        .join("original_files")
        .join(format!("{}.pdf", derive_cache_key(PDF_URI)));
    assert_eq!(std::fs::read(kept).unwrap(), PDF_BYTES);
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let h = harness();
    let err = assert_err!(h.orch.poll_status(&TaskId::from("never-created")));
    assert!(matches!(err, Doc2MdError::TaskNotFound { .. }));

    let missing = derive_cache_key("never-published").artifact_file_name();
    let err = assert_err!(h.orch.fetch_artifact(&missing).await);
    assert!(matches!(err, Doc2MdError::ArtifactNotFound { .. }));
    for bogus in ["../etc/passwd", "abc.tar.gz", ""] {
        assert!(assert_err!(h.orch.fetch_artifact(bogus).await).is_not_found());
    }
}
