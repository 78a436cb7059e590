use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;

use super::*;
use crate::broker::MemoryBroker;
use crate::fixtures::{collect_transform, next_collected, square_transform};

/// Start the given stage on its own task, waiting for it to become ready.
async fn start_stage(stage: Stage, broker: &MemoryBroker) -> Result<tokio::task::JoinHandle<Result<(), StageError>>> {
    let mut barrier = StartupBarrier::new();
    let ready = barrier.register(stage.id());
    let handle = tokio::spawn(stage.start(Arc::new(broker.clone()), ready));
    tokio::time::timeout(Duration::from_secs(1), barrier.wait()).await??;
    Ok(handle)
}

/// Build a `square` stage on `numbers` which routes to a collecting stage on `squares`.
fn square_pair() -> Result<(Stage, Stage, tokio::sync::mpsc::UnboundedReceiver<Bytes>)> {
    let (collect, rx) = collect_transform();
    let sink = Stage::builder("sink", "memory://", "squares").transform(collect).build()?;
    let mut square = Stage::builder("square", "memory://", "numbers").transform(square_transform("squares")).build()?;
    square.route("squares", sink.publisher());
    Ok((square, sink, rx))
}

#[test]
fn build_without_transform_fails() -> Result<()> {
    let res = Stage::builder("A", "memory://", "year").build();

    assert!(
        matches!(res, Err(StageError::MissingTransform { ref stage }) if stage == "A"),
        "expected missing transform error"
    );
    Ok(())
}

#[test]
fn build_performs_no_io() -> Result<()> {
    let (collect, _rx) = collect_transform();
    let stage = Stage::builder("A", "amqp://unreachable:1/", "year").transform(collect).build()?;

    assert_eq!(stage.id(), "A");
    assert_eq!(stage.address(), "amqp://unreachable:1/");
    assert_eq!(stage.listen_topic(), "year");
    assert_eq!(stage.routes().count(), 0, "expected no routes on a fresh stage");
    Ok(())
}

#[tokio::test]
async fn publish_before_start_fails() -> Result<()> {
    let (collect, _rx) = collect_transform();
    let stage = Stage::builder("A", "memory://", "year").transform(collect).build()?;

    let res = stage.publisher().publish("year", "1990").await;

    assert!(
        matches!(res, Err(StageError::NotConnected { ref stage }) if stage == "A"),
        "expected not connected error, got {:?}",
        res
    );
    Ok(())
}

#[tokio::test]
async fn stage_transforms_and_routes_messages() -> Result<()> {
    let broker = MemoryBroker::default();
    let (square, sink, mut rx) = square_pair()?;
    let entry = square.publisher();
    let _sink = start_stage(sink, &broker).await?;
    let _square = start_stage(square, &broker).await?;

    entry.publish("numbers", "9").await?;

    let output = next_collected(&mut rx).await?;
    assert_eq!(output, "81", "expected 81, got {}", output);
    Ok(())
}

#[tokio::test]
async fn stage_survives_failing_transform() -> Result<()> {
    let broker = MemoryBroker::default();
    let (square, sink, mut rx) = square_pair()?;
    let entry = square.publisher();
    let _sink = start_stage(sink, &broker).await?;
    let square = start_stage(square, &broker).await?;

    entry.publish("numbers", "not a number").await?;
    entry.publish("numbers", "9").await?;

    let output = next_collected(&mut rx).await?;
    assert_eq!(output, "81", "expected the bad message to be dropped and 81 to follow, got {}", output);
    assert!(!square.is_finished(), "expected stage to keep consuming after a transform failure");
    Ok(())
}

#[tokio::test]
async fn stage_survives_panicking_transform() -> Result<()> {
    let broker = MemoryBroker::default();
    let (collect, mut rx) = collect_transform();
    let sink = Stage::builder("sink", "memory://", "out").transform(collect).build()?;
    let mut stage = Stage::builder("panicky", "memory://", "in")
        .transform(transform_fn(|payload: Bytes| async move {
            if payload == "boom" {
                panic!("transform exploded");
            }
            Ok::<_, anyhow::Error>(vec![Message::new("out", payload)])
        }))
        .build()?;
    stage.route("out", sink.publisher());
    let entry = stage.publisher();
    let _sink = start_stage(sink, &broker).await?;
    let handle = start_stage(stage, &broker).await?;

    entry.publish("in", "boom").await?;
    entry.publish("in", "fine").await?;

    let output = next_collected(&mut rx).await?;
    assert_eq!(output, "fine", "expected payload after panic to be processed, got {}", output);
    assert!(!handle.is_finished(), "expected stage to survive a panicking transform");
    Ok(())
}

#[tokio::test]
async fn stage_skips_empty_payloads() -> Result<()> {
    let broker = MemoryBroker::default();
    let (collect, mut rx) = collect_transform();
    let stage = Stage::builder("sink", "memory://", "in").transform(collect).build()?;
    let entry = stage.publisher();
    let _handle = start_stage(stage, &broker).await?;

    entry.publish("in", Bytes::new()).await?;
    entry.publish("in", "after").await?;

    let output = next_collected(&mut rx).await?;
    assert_eq!(output, "after", "expected the empty payload to never reach the transform, got {:?}", output);
    Ok(())
}

#[tokio::test]
async fn stage_drops_output_without_route() -> Result<()> {
    let broker = MemoryBroker::default();
    let stage = Stage::builder("square", "memory://", "numbers").transform(square_transform("squares")).build()?;
    let entry = stage.publisher();
    let handle = start_stage(stage, &broker).await?;

    entry.publish("numbers", "3").await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(broker.published(), 1, "expected only the input publication, got {}", broker.published());
    assert!(!handle.is_finished(), "expected stage to keep consuming");
    Ok(())
}

#[tokio::test]
async fn stage_start_fails_when_broker_unreachable() -> Result<()> {
    let broker = MemoryBroker::default();
    broker.set_offline(true);
    let (collect, _rx) = collect_transform();
    let stage = Stage::builder("A", "memory://", "year").transform(collect).build()?;
    let mut barrier = StartupBarrier::new();
    let ready = barrier.register("A");

    let res = stage.start(Arc::new(broker.clone()), ready).await;

    assert!(matches!(res, Err(StageError::Connect { .. })), "expected connect error, got {:?}", res);
    let barrier_res = barrier.wait().await;
    assert!(matches!(barrier_res, Err(StageError::NeverReady { .. })), "expected barrier to report never ready");
    Ok(())
}

#[tokio::test]
async fn stage_fails_when_connection_is_lost() -> Result<()> {
    let broker = MemoryBroker::default();
    let (collect, _rx) = collect_transform();
    let stage = Stage::builder("A", "memory://", "year").transform(collect).build()?;
    let handle = start_stage(stage, &broker).await?;

    broker.disconnect_all();

    let res = tokio::time::timeout(Duration::from_secs(1), handle).await?.context("error joining stage")?;
    assert!(
        matches!(res, Err(StageError::ConnectionLost { ref stage, .. }) if stage == "A"),
        "expected connection lost error, got {:?}",
        res
    );
    Ok(())
}
