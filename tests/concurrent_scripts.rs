// tests/concurrent_scripts.rs
//
// Kept to a single test: it inspects the shared temp directory, so nothing
// else in this binary may create scripts concurrently.

#![cfg(unix)]

use std::collections::BTreeSet;
use std::error::Error;

use fraglet::runner::{InvocationRequest, Runner};
use fraglet_test_utils::{init_tracing, leftover_scripts, with_timeout};
use tokio_util::sync::CancellationToken;

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_script_runs_do_not_cross_talk() -> TestResult {
    init_tracing();
    let before: BTreeSet<String> = leftover_scripts().into_iter().collect();
    let runner = Runner::default();
    let cancel = CancellationToken::new();

    let runs: Vec<_> = (0..12)
        .map(|i| {
            let runner = runner.clone();
            let cancel = cancel.clone();
            // Alternate entry point + script and shebang commands.
            let req = if i % 2 == 0 {
                InvocationRequest::shell(format!("echo \"script-{i} $1\"; exit {i}"))
                    .with_entrypoint("sh")
                    .with_args([format!("arg-{i}")])
            } else {
                InvocationRequest::shell(format!("#!/bin/sh\necho \"script-{i} $1\"; exit {i}"))
                    .with_args([format!("arg-{i}")])
            };
            tokio::spawn(async move { runner.run(&cancel, req).await })
        })
        .collect();

    for (i, run) in runs.into_iter().enumerate() {
        let res = with_timeout(run).await??;
        assert_eq!(res.stdout, format!("script-{i} arg-{i}\n"));
        assert_eq!(res.stderr, "");
        assert_eq!(res.exit_code, i as i32);
    }

    let leftover: Vec<String> = leftover_scripts()
        .into_iter()
        .filter(|name| !before.contains(name))
        .collect();
    assert!(leftover.is_empty(), "left behind: {leftover:?}");
    Ok(())
}
