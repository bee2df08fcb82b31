//! Streaming sessions: admission, delivery, cancellation, abandonment.

mod common;

use std::time::Duration;

use audiodrop_converter::{ConversionError, ConversionRequest, Restriction, StreamSession, StreamStart};
use audiodrop_core::job::JobStatus;
use tokio_util::sync::CancellationToken;

use common::{AUDIO, FakeTranscoder, OTHER_VIDEO, VIDEO, build, harness, metadata};

async fn ready(h: &common::Harness, url: &str) -> StreamSession {
    match h
        .orchestrator
        .prepare_stream(ConversionRequest::new(url))
        .await
        .unwrap()
    {
        StreamStart::Ready(session) => session,
        StreamStart::InFlight { job_id } => panic!("unexpected in-flight job {job_id}"),
    }
}

#[tokio::test]
async fn stream_writes_audio_and_completes_job() {
    let h = harness(5);
    let session = ready(&h, VIDEO).await;
    let job_id = session.job_id().to_string();
    assert_eq!(session.filename(), "Rick Astley - Never Gonna Give You Up.mp3");
    assert_eq!(session.estimated_size(), 192_000 / 8 * 212);
    assert_eq!(h.queue.get_processing_count().unwrap(), 1);

    let mut sink = Vec::new();
    let written = session.run(&mut sink, CancellationToken::new()).await.unwrap();

    assert_eq!(written, (AUDIO.len() * 3) as u64);
    assert_eq!(sink.len() as u64, written);
    let job = h.queue.get_job(&job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert!(job.result.unwrap().path.is_empty());
    assert_eq!(h.queue.get_processing_count().unwrap(), 0);

    let snap = h.orchestrator.metrics().snapshot();
    assert_eq!(snap.streams_started, 1);
    assert_eq!(snap.succeeded, 1);
    assert_eq!(snap.cancelled, 0);
}

#[tokio::test]
async fn stream_refused_at_capacity() {
    let h = harness(1);
    h.orchestrator
        .create_job(ConversionRequest::new(VIDEO))
        .unwrap();
    h.queue.get_next_job().unwrap().expect("admitted");

    let err = h
        .orchestrator
        .prepare_stream(ConversionRequest::new(OTHER_VIDEO))
        .await
        .unwrap_err();
    assert!(matches!(err, ConversionError::AtCapacity { max_slots: 1 }));

    // The refused stream left no job or lock behind.
    assert_eq!(h.queue.get_stats().unwrap().total_created, 1);
    assert!(
        h.orchestrator
            .create_job(ConversionRequest::new(OTHER_VIDEO))
            .map(|s| !s.existing)
            .unwrap()
    );
}

#[tokio::test]
async fn stream_reports_in_flight_job() {
    let h = harness(5);
    let sub = h
        .orchestrator
        .create_job(ConversionRequest::new(VIDEO))
        .unwrap();

    match h
        .orchestrator
        .prepare_stream(ConversionRequest::new("https://youtu.be/dQw4w9WgXcQ"))
        .await
        .unwrap()
    {
        StreamStart::InFlight { job_id } => assert_eq!(job_id, sub.job_id),
        StreamStart::Ready(_) => panic!("expected the pending job"),
    }
}

#[tokio::test]
async fn cancelled_stream_fails_job() {
    let h = harness(5);
    let session = ready(&h, VIDEO).await;
    let job_id = session.job_id().to_string();

    assert!(h.orchestrator.cancel_stream(&job_id));
    let mut sink = Vec::new();
    let err = session.run(&mut sink, CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, ConversionError::Cancelled));
    let job = h.queue.get_job(&job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some("The conversion was cancelled."));
    assert_eq!(job.attempts, 1);
    assert!(!h.orchestrator.cancel_stream(&job_id));
    assert_eq!(h.orchestrator.metrics().snapshot().cancelled, 1);
}

#[tokio::test]
async fn caller_token_cancels_stream() {
    let h = harness(5);
    let session = ready(&h, VIDEO).await;
    let job_id = session.job_id().to_string();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut sink = Vec::new();
    let err = session.run(&mut sink, cancel).await.unwrap_err();

    assert!(matches!(err, ConversionError::Cancelled));
    assert!(sink.is_empty());
    let job = h.queue.get_job(&job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
}

#[tokio::test]
async fn abandoned_session_frees_slot_and_source() {
    let h = harness(1);
    let session = ready(&h, VIDEO).await;
    let job_id = session.job_id().to_string();
    drop(session);

    let job = h.queue.get_job(&job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(h.queue.get_processing_count().unwrap(), 0);
    assert_eq!(h.orchestrator.metrics().snapshot().cancelled, 1);

    let again = ready(&h, VIDEO).await;
    assert_ne!(again.job_id(), job_id);
}

#[tokio::test]
async fn resolution_failure_is_terminal_for_streams() {
    let h = harness(5);
    h.resolver
        .push(Err(ConversionError::Upstream("connection reset".into())));

    let err = h
        .orchestrator
        .prepare_stream(ConversionRequest::new(VIDEO))
        .await
        .unwrap_err();
    assert!(matches!(err, ConversionError::Upstream(_)));

    let stats = h.queue.get_stats().unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.processing, 0);

    h.resolver
        .push(Err(ConversionError::Restricted(Restriction::Region)));
    let err = h
        .orchestrator
        .prepare_stream(ConversionRequest::new(VIDEO))
        .await
        .unwrap_err();
    assert_eq!(err.user_message(), "This video is not available in your region.");
}

async fn advance_minutes(minutes: u64) {
    for _ in 0..minutes {
        tokio::time::advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn prepared_stream_keeps_its_lock_past_the_orphan_timeout() {
    let h = harness(5);
    let session = ready(&h, VIDEO).await;

    advance_minutes(6).await;

    let sub = h.orchestrator.create_job(ConversionRequest::new(VIDEO)).unwrap();
    assert!(sub.existing);
    assert_eq!(sub.job_id, session.job_id());
    assert_eq!(h.queue.get_stats().unwrap().total_created, 1);
}

#[tokio::test(start_paused = true)]
async fn slow_stream_keeps_its_lock_while_running() {
    let transcoder = FakeTranscoder::with_chunk_delay(Duration::from_secs(4 * 60));
    let h = build(5, metadata("Concert", 212), transcoder, |_| {});
    let session = ready(&h, VIDEO).await;
    let job_id = session.job_id().to_string();

    let running = tokio::spawn(async move {
        let mut sink = Vec::new();
        session.run(&mut sink, CancellationToken::new()).await
    });

    advance_minutes(9).await;
    assert_eq!(
        h.queue.get_job(&job_id).unwrap().unwrap().status,
        JobStatus::Processing
    );
    let sub = h.orchestrator.create_job(ConversionRequest::new(VIDEO)).unwrap();
    assert!(sub.existing);
    assert_eq!(sub.job_id, job_id);

    assert_eq!(running.await.unwrap().unwrap(), (AUDIO.len() * 3) as u64);
    assert_eq!(
        h.queue.get_job(&job_id).unwrap().unwrap().status,
        JobStatus::Done
    );
}
