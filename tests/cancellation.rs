// tests/cancellation.rs

#![cfg(unix)]

use std::error::Error;
use std::time::{Duration, Instant};

use fraglet::errors::FragletError;
use fraglet::runner::{Backend, InvocationRequest, LocalBackend, Runner};
use fraglet_test_utils::sink::SharedSink;
use fraglet_test_utils::{init_tracing, with_timeout};
use tokio_util::sync::CancellationToken;

type TestResult = Result<(), Box<dyn Error>>;

fn cancel_after(cancel: &CancellationToken, delay: Duration) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        cancel.cancel();
    });
}

#[tokio::test]
async fn cancelling_mid_run_kills_the_process() -> TestResult {
    init_tracing();
    let cancel = CancellationToken::new();
    cancel_after(&cancel, Duration::from_millis(200));

    let start = Instant::now();
    let err = with_timeout(Runner::default().run(&cancel, InvocationRequest::shell("exec sleep 10")))
        .await
        .unwrap_err();

    assert!(err.is_cancelled(), "got {err:?}");
    assert!(start.elapsed() < Duration::from_secs(4));
    Ok(())
}

#[tokio::test]
async fn cancelled_run_keeps_partial_output() -> TestResult {
    init_tracing();
    let cancel = CancellationToken::new();
    cancel_after(&cancel, Duration::from_millis(300));

    let req = InvocationRequest::shell("echo started; exec sleep 10");
    let err = with_timeout(Runner::default().run(&cancel, req)).await.unwrap_err();

    assert!(err.is_cancelled());
    let partial = err.partial().expect("partial result");
    assert_eq!(partial.stdout, "started\n");
    assert_eq!(partial.exit_code, -1);
    Ok(())
}

#[tokio::test]
async fn token_cancelled_before_start_stops_immediately() -> TestResult {
    init_tracing();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let start = Instant::now();
    let err = with_timeout(Runner::default().run(&cancel, InvocationRequest::shell("exec sleep 10")))
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(start.elapsed() < Duration::from_secs(4));
    Ok(())
}

#[tokio::test]
async fn streaming_completion_reports_cancellation() -> TestResult {
    init_tracing();
    let cancel = CancellationToken::new();
    let handle = LocalBackend
        .run_streaming(cancel.clone(), InvocationRequest::shell("exec sleep 10"))
        .await?;

    cancel.cancel();

    let outcome = with_timeout(handle.done).await?;
    assert!(matches!(outcome, Err(FragletError::Cancelled)), "got {outcome:?}");
    assert_eq!(with_timeout(handle.exit_code).await?, -1);
    Ok(())
}

#[tokio::test]
async fn cancelling_one_run_leaves_others_alone() -> TestResult {
    init_tracing();
    let runner = Runner::default();
    let doomed = CancellationToken::new();
    let kept = CancellationToken::new();
    cancel_after(&doomed, Duration::from_millis(100));

    let (a, b) = with_timeout(async {
        tokio::join!(
            runner.run(&doomed, InvocationRequest::shell("exec sleep 10")),
            runner.run(&kept, InvocationRequest::shell("sleep 0.3; echo survived")),
        )
    })
    .await;

    assert!(a.unwrap_err().is_cancelled());
    assert_eq!(b?.stdout, "survived\n");
    Ok(())
}

#[tokio::test]
async fn buffered_sink_is_flushed_on_cancellation() -> TestResult {
    init_tracing();
    let cancel = CancellationToken::new();
    cancel_after(&cancel, Duration::from_millis(300));

    let out = SharedSink::new();
    let buffered = tokio::io::BufWriter::new(out.clone());
    let req = InvocationRequest::shell("echo started; exec sleep 10").with_stdout(Box::new(buffered));

    let err = with_timeout(Runner::default().run(&cancel, req)).await.unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(out.contents(), "started\n");
    Ok(())
}
