use std::time::Duration;

use anyhow::Result;

use super::*;

#[tokio::test]
async fn barrier_waits_for_every_signal() -> Result<()> {
    let mut barrier = StartupBarrier::new();
    let signals: Vec<_> = ["A", "B", "C"].iter().map(|stage| barrier.register(*stage)).collect();
    assert_eq!(barrier.len(), 3, "expected 3 registered stages, got {}", barrier.len());

    let handle = tokio::spawn(barrier.wait());
    let mut signals = signals.into_iter();
    for signal in signals.by_ref().take(2) {
        signal.fire();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished(), "expected barrier to block until the last stage is ready");

    if let Some(last) = signals.next() {
        last.fire();
    }
    let res = tokio::time::timeout(Duration::from_secs(1), handle).await??;
    assert!(res.is_ok(), "expected barrier to complete, got {:?}", res);
    Ok(())
}

#[tokio::test]
async fn empty_barrier_completes_immediately() -> Result<()> {
    let barrier = StartupBarrier::new();
    tokio::time::timeout(Duration::from_secs(1), barrier.wait()).await??;
    Ok(())
}

#[tokio::test]
async fn dropped_signal_fails_barrier() -> Result<()> {
    let mut barrier = StartupBarrier::new();
    let ready = barrier.register("A");
    let failed = barrier.register("B");
    ready.fire();
    drop(failed);

    let res = tokio::time::timeout(Duration::from_secs(1), barrier.wait()).await?;

    assert!(
        matches!(res, Err(StageError::NeverReady { ref stage }) if stage == "B"),
        "expected never ready error for B, got {:?}",
        res
    );
    Ok(())
}

#[tokio::test]
async fn dropped_signal_fails_barrier_without_waiting_on_others() -> Result<()> {
    let mut barrier = StartupBarrier::new();
    let _pending = barrier.register("A");
    let failed = barrier.register("B");
    drop(failed);

    let res = tokio::time::timeout(Duration::from_secs(1), barrier.wait()).await?;

    assert!(res.is_err(), "expected barrier to fail while A is still pending");
    Ok(())
}
