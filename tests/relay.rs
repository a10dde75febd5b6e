//! Relaying transcoder output into HTTP bodies and files.
#![cfg(unix)]

mod common;

use std::time::Duration;

use bytes::Bytes;
use common::{sh, transcoder, wait_until_gone};
use futures::StreamExt;
use rbtv_dl::{
    ffmpeg::TranscodeError,
    relay::{self, RelayError, RelayOutcome},
};
use tokio::process::Command;

#[tokio::test]
async fn body_stream_prepends_first_chunk() {
    let session = transcoder().spawn(sh("printf ' world'")).unwrap();
    let chunks: Vec<_> = relay::body_stream(session, Some(Bytes::from_static(b"hello")))
        .collect()
        .await;

    let body: Vec<u8> = chunks
        .into_iter()
        .flat_map(|c| c.unwrap().to_vec())
        .collect();
    assert_eq!(body, b"hello world");
}

#[tokio::test]
async fn body_stream_ends_quietly_on_process_failure() {
    let session = transcoder()
        .spawn(sh("printf partial; echo 'muxer error' >&2; exit 1"))
        .unwrap();
    let chunks: Vec<_> = relay::body_stream(session, None).collect().await;

    assert!(chunks.iter().all(Result::is_ok));
    let body: Vec<u8> = chunks
        .into_iter()
        .flat_map(|c| c.unwrap().to_vec())
        .collect();
    assert_eq!(body, b"partial");
}

#[tokio::test]
async fn dropping_body_stream_stops_the_process() {
    let session = transcoder()
        .spawn(sh("printf x; exec sleep 30"))
        .unwrap();
    let pid = session.id().unwrap();

    let mut body = Box::pin(relay::body_stream(session, None));
    let first = body.next().await.unwrap().unwrap();
    assert_eq!(first, Bytes::from_static(b"x"));

    // client disconnect: the response body is dropped mid stream
    drop(body);
    assert!(wait_until_gone(pid, Duration::from_secs(5)).await);
}

#[tokio::test]
async fn saves_whole_output_with_progress() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("video.mp4");
    let mut session = transcoder()
        .spawn(sh("head -c 20000 /dev/zero"))
        .unwrap();

    let mut reported = Vec::new();
    let outcome = relay::save_to_file(&mut session, &path, |bytes| reported.push(bytes))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        RelayOutcome {
            bytes: 20000,
            interrupted: false
        }
    );
    assert!(reported.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(reported.last(), Some(&20000));
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 20000);
}

#[tokio::test]
async fn interruption_keeps_partial_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.mp4");
    let mut session = transcoder().spawn(Command::new("yes")).unwrap();
    let token = session.cancel_token();

    let outcome = relay::save_to_file(&mut session, &path, |_| token.cancel())
        .await
        .unwrap();

    assert!(outcome.interrupted);
    assert!(outcome.bytes > 0);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), outcome.bytes);
    assert!(session.exit_status().is_some());
}

#[tokio::test]
async fn transcode_failure_keeps_what_was_written() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.mp4");
    let mut session = transcoder().spawn(sh("printf partial; exit 3")).unwrap();

    let err = relay::save_to_file(&mut session, &path, |_| {})
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RelayError::Transcode(TranscodeError::ProcessFailure { .. })
    ));
    assert_eq!(std::fs::read(&path).unwrap(), b"partial");
}

#[tokio::test]
async fn unwritable_path_is_a_write_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing-dir").join("x.mp4");
    let mut session = transcoder().spawn(sh("printf data")).unwrap();

    let err = relay::save_to_file(&mut session, &path, |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::Write { .. }));
}

#[tokio::test]
async fn failure_before_output_leaves_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("never.mp4");
    let mut session = transcoder()
        .spawn(sh("echo 'Server returned 403 Forbidden' >&2; exit 1"))
        .unwrap();

    let err = relay::save_to_file(&mut session, &path, |_| {})
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RelayError::Transcode(TranscodeError::ProcessFailure { .. })
    ));
    assert!(!path.exists());
}

#[tokio::test]
async fn clean_empty_output_still_saves_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.mp4");
    let mut session = transcoder().spawn(sh("exit 0")).unwrap();

    let outcome = relay::save_to_file(&mut session, &path, |_| {})
        .await
        .unwrap();

    assert_eq!(outcome.bytes, 0);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
}
