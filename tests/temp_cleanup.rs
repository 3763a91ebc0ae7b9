// tests/temp_cleanup.rs
//
// Kept to a single test: it inspects the shared temp directory, so nothing
// else in this binary may create scripts concurrently.

#![cfg(unix)]

use std::collections::BTreeSet;
use std::error::Error;
use std::time::Duration;

use fraglet::runner::{InvocationRequest, Runner};
use fraglet_test_utils::{init_tracing, leftover_scripts, with_timeout};
use tokio_util::sync::CancellationToken;

type TestResult = Result<(), Box<dyn Error>>;

fn new_scripts(before: &BTreeSet<String>) -> Vec<String> {
    leftover_scripts()
        .into_iter()
        .filter(|name| !before.contains(name))
        .collect()
}

#[tokio::test]
async fn scripts_are_removed_on_every_path() -> TestResult {
    init_tracing();
    let before: BTreeSet<String> = leftover_scripts().into_iter().collect();
    let runner = Runner::default();

    // Shebang command, normal exit.
    let cancel = CancellationToken::new();
    let res = with_timeout(runner.run(&cancel, InvocationRequest::shell("#!/bin/sh\necho ok"))).await?;
    assert_eq!(res.stdout, "ok\n");
    assert!(new_scripts(&before).is_empty(), "after shebang run");

    // Entry point plus script, non-zero exit.
    let req = InvocationRequest::shell("exit 2").with_entrypoint("sh");
    let res = with_timeout(runner.run(&cancel, req)).await?;
    assert_eq!(res.exit_code, 2);
    assert!(new_scripts(&before).is_empty(), "after entrypoint run");

    // Interpreter that does not exist: the start fails.
    let req = InvocationRequest::shell("print(1)").with_entrypoint("/no/such/interpreter");
    let err = with_timeout(runner.run(&cancel, req)).await.unwrap_err();
    assert!(!err.is_cancelled());
    assert!(new_scripts(&before).is_empty(), "after spawn failure");

    // Cancelled mid-run.
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });
    let req = InvocationRequest::shell("#!/bin/sh\nexec sleep 10");
    let err = with_timeout(runner.run(&cancel, req)).await.unwrap_err();
    assert!(err.is_cancelled(), "got {err:?}");
    assert!(new_scripts(&before).is_empty(), "after cancellation");

    Ok(())
}
