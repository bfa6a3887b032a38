//! End-to-end download tests against a local HLS fixture server.
//!
//! Every test goes through the real `reqwest` transport. Checks cover output
//! ordering for several worker counts, AES-128 decryption with a shared key,
//! fatal HTTP errors, cooperative stop and header forwarding.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rstest::rstest;

use hlsdl::{
    Controller, HlsError, HlsSettings, MemorySink, NoopObserver, PipelineOutcome, SegmentProgress,
    WriterSink,
};
use hlsdl_tests::{HlsFixture, KEY_PATH, PLAYLIST_PATH};

mod setup;

fn controller(workers: usize) -> Controller {
    let settings = HlsSettings::new()
        .workers(workers)
        .request_timeout(Duration::from_secs(5))
        .retry_delay(Duration::from_millis(50));
    Controller::new(settings).expect("failed to build controller")
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(4)]
#[case(16)]
fn clear_segments_arrive_in_playlist_order(#[case] workers: usize) {
    setup::SERVER_RT.block_on(async {
        // Later segments answer faster, so completion order is roughly reversed.
        let mut fixture = HlsFixture::new(12);
        for i in 0..12 {
            fixture = fixture.segment_delay(i, Duration::from_millis(5 * (12 - i as u64)));
        }
        let url = fixture.start().await;

        let mut sink = MemorySink::new();
        let outcome = controller(workers)
            .download(&url, &mut sink, &NoopObserver)
            .await
            .unwrap();

        assert!(!outcome.is_stopped());
        assert_eq!(outcome.report().segments_written, 12);
        assert_eq!(sink.sequences(), (0..12).collect::<Vec<u64>>());
        assert_eq!(sink.bytes(), fixture.expected_output());
        assert!(sink.is_closed());
        assert_eq!(fixture.segment_requests(), 12);
    });
}

#[rstest]
#[case(1, 0)]
#[case(3, 0)]
#[case(3, 1000)]
#[case(8, 42)]
fn encrypted_segments_are_decrypted_with_one_key_fetch(
    #[case] workers: usize,
    #[case] media_sequence: u64,
) {
    setup::SERVER_RT.block_on(async {
        let fixture = HlsFixture::new(10)
            .encrypted(true)
            .media_sequence(media_sequence)
            .uniform_delay(Duration::from_millis(10));
        let url = fixture.start().await;

        let mut sink = MemorySink::new();
        let outcome = controller(workers)
            .download(&url, &mut sink, &NoopObserver)
            .await
            .unwrap();

        assert_eq!(outcome.report().segments_written, 10);
        assert_eq!(
            sink.sequences(),
            (media_sequence..media_sequence + 10).collect::<Vec<u64>>()
        );
        assert_eq!(sink.bytes(), fixture.expected_output());
        assert_eq!(fixture.request_count(KEY_PATH), 1);
    });
}

#[test]
fn missing_segment_fails_the_run() {
    setup::SERVER_RT.block_on(async {
        let fixture = HlsFixture::new(20)
            .segment_status(5, 404)
            .uniform_delay(Duration::from_millis(20));
        let url = fixture.start().await;

        let mut sink = MemorySink::new();
        let started = Instant::now();
        let err = controller(2)
            .download(&url, &mut sink, &NoopObserver)
            .await
            .unwrap_err();

        match err {
            HlsError::HttpStatus { status, url } => {
                assert_eq!(status, 404);
                assert!(url.ends_with("seg/5.ts"), "unexpected url {url}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(3));

        // 404 is not retried, and the tail of the playlist is never requested.
        assert_eq!(fixture.request_count(&HlsFixture::segment_path(5)), 1);
        assert_eq!(fixture.request_count(&HlsFixture::segment_path(19)), 0);

        let written = sink.sequences();
        assert!(written.len() <= 5);
        assert_eq!(written, (0..written.len() as u64).collect::<Vec<u64>>());
        assert!(sink.is_closed());
    });
}

#[test]
fn missing_playlist_is_reported_with_context() {
    setup::SERVER_RT.block_on(async {
        let fixture = HlsFixture::new(1);
        let url = fixture.start().await;
        let url = url.join("nope.m3u8").unwrap();

        let mut sink = MemorySink::new();
        let err = controller(1)
            .download(&url, &mut sink, &NoopObserver)
            .await
            .unwrap_err();
        assert!(
            matches!(&err, HlsError::Context { source, .. } if matches!(**source, HlsError::HttpStatus { status: 404, .. })),
            "unexpected error: {err:?}"
        );
        assert_eq!(fixture.segment_requests(), 0);
    });
}

#[test]
fn stop_keeps_a_contiguous_prefix() {
    setup::SERVER_RT.block_on(async {
        let fixture = HlsFixture::new(100)
            .encrypted(true)
            .uniform_delay(Duration::from_millis(30));
        let url = fixture.start().await;

        let controller = Arc::new(controller(4));
        let stopper = controller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            stopper.stop();
        });

        let mut sink = MemorySink::new();
        let outcome = controller
            .download(&url, &mut sink, &NoopObserver)
            .await
            .unwrap();

        let PipelineOutcome::Stopped(report) = outcome else {
            panic!("expected a stopped run, got {outcome:?}");
        };
        let written = sink.sequences();
        assert!(written.len() < 100);
        assert_eq!(written.len(), report.segments_written);
        assert_eq!(written, (0..written.len() as u64).collect::<Vec<u64>>());

        let expected = fixture.expected_output();
        assert_eq!(sink.bytes(), expected[..sink.bytes().len()].to_vec());
        assert!(sink.is_closed());
        assert!(fixture.segment_requests() < 100);
    });
}

#[test]
fn background_run_reports_progress_and_writes_a_file() {
    setup::SERVER_RT.block_on(async {
        let fixture = HlsFixture::new(6).encrypted(true);
        let url = fixture.start().await;

        let controller = controller(3);
        let segments = controller.resolve(&url).await.unwrap();
        assert_eq!(segments.len(), 6);

        let path = std::env::temp_dir().join(format!("hlsdl-tests-{}.ts", std::process::id()));
        let file = tokio::fs::File::create(&path).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let observer = {
            let seen = seen.clone();
            move |p: SegmentProgress| seen.lock().unwrap().push((p.completed, p.total))
        };

        let handle = controller
            .start(segments, WriterSink::new(file), Arc::new(observer))
            .unwrap();
        let outcome = handle.wait().await.unwrap();
        assert!(matches!(outcome, PipelineOutcome::Completed(_)));
        assert_eq!(outcome.report().bytes_written as usize, fixture.expected_output().len());

        let progress = seen.lock().unwrap().clone();
        assert_eq!(progress, (1..=6).map(|i| (i, 6)).collect::<Vec<_>>());

        let on_disk = tokio::fs::read(&path).await.unwrap();
        let _ = tokio::fs::remove_file(&path).await;
        assert_eq!(on_disk, fixture.expected_output());
    });
}

#[test]
fn configured_headers_reach_every_request_kind() {
    setup::SERVER_RT.block_on(async {
        let fixture = HlsFixture::new(3).encrypted(true);
        let url = fixture.start().await;

        let mut common = HashMap::new();
        common.insert("Referer".to_string(), "http://player.test/".to_string());
        let mut key_only = HashMap::new();
        key_only.insert("Authorization".to_string(), "Bearer k".to_string());

        let settings = HlsSettings::new()
            .workers(2)
            .headers(common)
            .key_request_headers(Some(key_only));
        let controller = Controller::new(settings).unwrap();

        let mut sink = MemorySink::new();
        controller
            .download(&url, &mut sink, &NoopObserver)
            .await
            .unwrap();

        let playlist = fixture.last_headers(PLAYLIST_PATH).unwrap();
        assert_eq!(playlist.get("referer").unwrap(), "http://player.test/");

        let segment = fixture.last_headers(&HlsFixture::segment_path(2)).unwrap();
        assert_eq!(segment.get("referer").unwrap(), "http://player.test/");
        assert!(segment.get("authorization").is_none());

        let key = fixture.last_headers(KEY_PATH).unwrap();
        assert_eq!(key.get("authorization").unwrap(), "Bearer k");
        assert!(key.get("referer").is_none());
    });
}

#[test]
fn key_query_params_extend_the_key_url() {
    setup::SERVER_RT.block_on(async {
        let fixture = HlsFixture::new(4).encrypted(true);
        let url = fixture.start().await;

        let mut params = HashMap::new();
        params.insert("token".to_string(), "abc".to_string());
        let settings = HlsSettings::new().workers(2).key_query_params(Some(params));
        let controller = Controller::new(settings).unwrap();

        let mut sink = MemorySink::new();
        controller
            .download(&url, &mut sink, &NoopObserver)
            .await
            .unwrap();

        // The fixture routes on the path only, so the query string is transparent to it.
        assert_eq!(fixture.request_count(KEY_PATH), 1);
        assert_eq!(sink.bytes(), fixture.expected_output());

        let cached = url.join(&format!("{KEY_PATH}?token=abc")).unwrap();
        assert!(controller.key_cache().contains(cached.as_str()));
    });
}
