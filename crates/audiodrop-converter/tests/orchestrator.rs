//! File conversion lifecycle against fake collaborators.

mod common;

use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Duration;

use audiodrop_converter::{ConversionError, ConversionRequest, DedupLocks};
use audiodrop_core::job::JobStatus;
use audiodrop_core::types::{Quality, TrimError};
use audiodrop_worker::Maintenance;

use common::{AUDIO, FakeTranscoder, OTHER_VIDEO, VIDEO, build, harness, harness_with, metadata};

async fn run_next(h: &common::Harness) {
    let job = h.queue.get_next_job().unwrap().expect("a pending job");
    h.orchestrator.process_job(job).await.unwrap();
}

fn lock_holder(h: &common::Harness, source_id: &str) -> Option<String> {
    DedupLocks::new(h.queue.store().clone(), std::time::Duration::from_secs(60))
        .holder(source_id)
        .map(|r| r.job_id)
}

#[tokio::test]
async fn duplicate_submissions_share_one_job() {
    let h = harness(5);
    let first = h.orchestrator.create_job(ConversionRequest::new(VIDEO)).unwrap();
    let second = h
        .orchestrator
        .create_job(ConversionRequest::new("https://m.youtube.com/watch?v=dQw4w9WgXcQ&t=30").with_quality("320k"))
        .unwrap();
    let other = h.orchestrator.create_job(ConversionRequest::new(OTHER_VIDEO)).unwrap();

    assert!(!first.existing);
    assert!(second.existing);
    assert_eq!(first.job_id, second.job_id);
    assert_ne!(first.job_id, other.job_id);
    assert_eq!(h.queue.get_queue_length().unwrap(), 2);
}

#[tokio::test]
async fn rejects_invalid_submissions() {
    let h = harness(5);
    let o = &h.orchestrator;

    assert!(matches!(
        o.create_job(ConversionRequest::new("https://vimeo.com/123")),
        Err(ConversionError::InvalidSource(_))
    ));
    assert!(matches!(
        o.create_job(ConversionRequest::new(VIDEO).with_quality("999k")),
        Err(ConversionError::InvalidQuality(_))
    ));
    assert!(matches!(
        o.create_job(ConversionRequest::new(VIDEO).with_trim(Some("1:70"), None)),
        Err(ConversionError::InvalidTrim(TrimError::Malformed(_)))
    ));
    assert!(matches!(
        o.create_job(ConversionRequest::new(VIDEO).with_trim(Some("2:00"), Some("1:00"))),
        Err(ConversionError::InvalidTrim(TrimError::EmptyRange { .. }))
    ));
    assert!(matches!(
        o.create_job(ConversionRequest::new("")),
        Err(ConversionError::Validation(_))
    ));
    assert_eq!(h.queue.get_stats().unwrap().total_created, 0);
}

#[tokio::test]
async fn successful_conversion_produces_artifact() {
    let h = harness(5);
    let sub = h.orchestrator.create_job(ConversionRequest::new(VIDEO)).unwrap();
    run_next(&h).await;

    let job = h.queue.get_job(&sub.job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.progress, 100);
    assert_eq!(job.title.as_deref(), Some("Rick Astley - Never Gonna Give You Up"));
    let result = job.result.unwrap();
    assert_eq!(result.reference, format!("/api/download/{}", sub.job_id));
    assert_eq!(result.quality, Quality::K192);
    assert_eq!(std::fs::read(&result.path).unwrap(), AUDIO);

    let artifact = h.orchestrator.artifact(&sub.job_id).await.unwrap();
    assert_eq!(artifact.filename, "Rick Astley - Never Gonna Give You Up.mp3");
    assert_eq!(artifact.size_bytes, AUDIO.len() as u64);

    assert!(lock_holder(&h, "youtube:dQw4w9WgXcQ").is_none());
    let again = h.orchestrator.create_job(ConversionRequest::new(VIDEO)).unwrap();
    assert!(again.existing);
    assert_eq!(again.job_id, sub.job_id);
    let louder = h
        .orchestrator
        .create_job(ConversionRequest::new(VIDEO).with_quality("320k"))
        .unwrap();
    assert!(!louder.existing);
    assert_ne!(louder.job_id, sub.job_id);

    let stats = h.orchestrator.get_stats().await.unwrap();
    assert_eq!(stats.conversions.succeeded, 1);
    assert_eq!(stats.artifact_count, 1);
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let h = harness(5);
    h.resolver
        .push(Err(ConversionError::NotFound("Private video".into())));
    let sub = h.orchestrator.create_job(ConversionRequest::new(VIDEO)).unwrap();
    run_next(&h).await;

    let job = h.queue.get_job(&sub.job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 1);
    assert_eq!(
        job.error_message.as_deref(),
        Some("This YouTube video is unavailable or private. Please try a different video.")
    );
    assert!(job.expires_at.is_some());
    assert!(lock_holder(&h, "youtube:dQw4w9WgXcQ").is_none());
    assert_eq!(h.orchestrator.metrics().snapshot().failed, 1);
}

#[tokio::test]
async fn transient_failure_requeues_and_keeps_lock() {
    let h = harness(5);
    h.resolver
        .push(Err(ConversionError::Upstream("connection reset".into())));
    let sub = h.orchestrator.create_job(ConversionRequest::new(VIDEO)).unwrap();
    run_next(&h).await;

    let job = h.queue.get_job(&sub.job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.priority, h.queue.config().retry_priority_penalty);
    assert_eq!(lock_holder(&h, "youtube:dQw4w9WgXcQ"), Some(sub.job_id.clone()));

    let dup = h.orchestrator.create_job(ConversionRequest::new(VIDEO)).unwrap();
    assert!(dup.existing);
    assert_eq!(dup.job_id, sub.job_id);

    run_next(&h).await;
    let job = h.queue.get_job(&sub.job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(h.orchestrator.metrics().snapshot().retried, 1);
}

#[tokio::test]
async fn retries_stop_at_max_attempts() {
    let h = harness(5);
    let max = h.queue.config().max_attempts;
    for _ in 0..max {
        h.transcoder.fail_next(ConversionError::TranscodeFailed {
            code: Some(1),
            stderr: "boom".into(),
        });
    }
    let sub = h.orchestrator.create_job(ConversionRequest::new(VIDEO)).unwrap();
    for _ in 0..max {
        run_next(&h).await;
    }

    let job = h.queue.get_job(&sub.job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, max);
    assert_eq!(job.error_message.as_deref(), Some("File processing error. Please try again."));
    let partial = Path::new(&h.dir.path().join("downloads")).join(format!("{}.mp3", sub.job_id));
    assert!(!partial.exists());
}

#[tokio::test]
async fn long_sources_are_capped() {
    let h = harness_with(5, metadata("Lecture", 4 * 3600));
    let sub = h
        .orchestrator
        .create_job(ConversionRequest::new(VIDEO).with_quality("320k"))
        .unwrap();
    run_next(&h).await;

    let job = h.queue.get_job(&sub.job_id).unwrap().unwrap();
    assert_eq!(job.result.unwrap().quality, Quality::K128);
    assert!(job.quality_notice.unwrap().contains("128k"));
    assert_eq!(h.transcoder.requests.lock()[0].quality, Quality::K128);
    assert_eq!(h.orchestrator.metrics().snapshot().quality_overrides, 1);
}

#[tokio::test]
async fn trim_is_checked_against_resolved_duration() {
    let h = harness_with(5, metadata("Short clip", 120));
    let sub = h
        .orchestrator
        .create_job(ConversionRequest::new(VIDEO).with_trim(Some("00:10"), Some("10:00")))
        .unwrap();
    run_next(&h).await;

    let job = h.queue.get_job(&sub.job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 1);
    assert!(h.transcoder.requests.lock().is_empty());
}

#[tokio::test]
async fn trimmed_output_length_reported() {
    let h = harness_with(5, metadata("Album", 600));
    let sub = h
        .orchestrator
        .create_job(ConversionRequest::new(VIDEO).with_trim(Some("01:00"), Some("03:30")))
        .unwrap();
    run_next(&h).await;

    let request = h.transcoder.requests.lock()[0].clone();
    let trim = request.trim.unwrap();
    assert_eq!(trim.start_seconds, 60);
    assert_eq!(trim.duration_seconds, Some(150));
    let job = h.queue.get_job(&sub.job_id).unwrap().unwrap();
    assert_eq!(job.result.unwrap().duration_seconds, 150);
}

#[tokio::test]
async fn purge_removes_expired_jobs_and_artifacts() {
    let h = harness(5);
    let sub = h.orchestrator.create_job(ConversionRequest::new(VIDEO)).unwrap();
    run_next(&h).await;
    let path = h.queue.get_job(&sub.job_id).unwrap().unwrap().result.unwrap().path;
    assert!(Path::new(&path).exists());

    assert_eq!(h.orchestrator.purge_expired().await.unwrap(), 0);
    h.clock.advance(chrono::Duration::minutes(31));
    assert_eq!(h.orchestrator.purge_expired().await.unwrap(), 1);

    assert!(h.queue.get_job(&sub.job_id).unwrap().is_none());
    assert!(!Path::new(&path).exists());
    assert!(matches!(
        h.orchestrator.artifact(&sub.job_id).await,
        Err(ConversionError::NotFound(_))
    ));

    let fresh = h.orchestrator.create_job(ConversionRequest::new(VIDEO)).unwrap();
    assert!(!fresh.existing);
}

#[tokio::test]
async fn cleanup_removes_old_terminal_jobs() {
    let h = harness(5);
    h.resolver
        .push(Err(ConversionError::Restricted(audiodrop_converter::Restriction::Age)));
    let failed = h.orchestrator.create_job(ConversionRequest::new(VIDEO)).unwrap();
    run_next(&h).await;

    h.clock.advance(chrono::Duration::hours(25));
    let pending = h.orchestrator.create_job(ConversionRequest::new(OTHER_VIDEO)).unwrap();

    assert_eq!(h.orchestrator.cleanup_old(24).await.unwrap(), 1);
    assert!(h.queue.get_job(&failed.job_id).unwrap().is_none());
    assert!(h.queue.get_job(&pending.job_id).unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn queued_job_keeps_its_lock_past_the_orphan_timeout() {
    let h = harness(1);
    h.orchestrator
        .create_job(ConversionRequest::new(OTHER_VIDEO))
        .unwrap();
    h.queue.get_next_job().unwrap().expect("admitted");
    let first = h.orchestrator.create_job(ConversionRequest::new(VIDEO)).unwrap();

    tokio::time::advance(Duration::from_secs(6 * 60)).await;

    let second = h.orchestrator.create_job(ConversionRequest::new(VIDEO)).unwrap();
    assert!(second.existing);
    assert_eq!(second.job_id, first.job_id);
    assert_eq!(h.queue.get_queue_length().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn retried_job_keeps_its_lock_past_the_orphan_timeout() {
    let h = harness(5);
    h.resolver
        .push(Err(ConversionError::Upstream("connection reset".into())));
    let sub = h.orchestrator.create_job(ConversionRequest::new(VIDEO)).unwrap();
    run_next(&h).await;
    assert_eq!(
        h.queue.get_job(&sub.job_id).unwrap().unwrap().status,
        JobStatus::Pending
    );

    tokio::time::advance(Duration::from_secs(6 * 60)).await;

    let dup = h.orchestrator.create_job(ConversionRequest::new(VIDEO)).unwrap();
    assert!(dup.existing);
    assert_eq!(dup.job_id, sub.job_id);
    assert_eq!(lock_holder(&h, "youtube:dQw4w9WgXcQ"), Some(sub.job_id));
}

#[tokio::test(start_paused = true)]
async fn running_job_keeps_its_lock_through_a_long_transcode() {
    let transcoder = FakeTranscoder::with_file_delay(Duration::from_secs(20 * 60));
    let h = build(5, metadata("Podcast", 212), transcoder, |_| {});
    let sub = h.orchestrator.create_job(ConversionRequest::new(VIDEO)).unwrap();
    let job = h.queue.get_next_job().unwrap().expect("admitted");

    let orchestrator = h.orchestrator.clone();
    let running = tokio::spawn(async move { orchestrator.process_job(job).await });

    for _ in 0..10 {
        tokio::time::advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;
    }
    assert_eq!(
        h.queue.get_job(&sub.job_id).unwrap().unwrap().status,
        JobStatus::Processing
    );
    let dup = h.orchestrator.create_job(ConversionRequest::new(VIDEO)).unwrap();
    assert!(dup.existing);
    assert_eq!(dup.job_id, sub.job_id);

    running.await.unwrap().unwrap();
    assert_eq!(
        h.queue.get_job(&sub.job_id).unwrap().unwrap().status,
        JobStatus::Done
    );
    assert!(lock_holder(&h, "youtube:dQw4w9WgXcQ").is_none());
}

#[tokio::test]
async fn resolved_metadata_is_reused() {
    let h = build(5, metadata("Cached", 212), FakeTranscoder::new(), |config| {
        config.metadata_cache_ttl_seconds = 3600;
    });

    let first = h.orchestrator.probe(VIDEO, None).await.unwrap();
    let second = h.orchestrator.probe("dQw4w9WgXcQ", Some("128k")).await.unwrap();
    assert_eq!(first.metadata.title, "Cached");
    assert_eq!(second.decision.effective, Quality::K128);

    let sub = h.orchestrator.create_job(ConversionRequest::new(VIDEO)).unwrap();
    run_next(&h).await;
    assert_eq!(
        h.queue.get_job(&sub.job_id).unwrap().unwrap().status,
        JobStatus::Done
    );
    assert_eq!(h.resolver.calls.load(Ordering::SeqCst), 1);

    h.orchestrator.probe(OTHER_VIDEO, None).await.unwrap();
    assert_eq!(h.resolver.calls.load(Ordering::SeqCst), 2);
}
