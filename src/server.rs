//! The ingestion front door.

use anyhow::{Context, Result};
use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::ApiError;
use crate::relay::RelayQueue;

/// Shared state of the submission handlers.
#[derive(Clone)]
pub struct AppState {
    /// The relay queue feeding the orchestrator.
    pub relay: RelayQueue,
}

/// Build the submission router.
///
/// - `GET /submit/{year}` submits a year to the pipeline.
pub fn router(state: AppState) -> Router {
    Router::new().route("/submit/{year}", get(submit)).with_state(state)
}

/// Bind the submission listener on the given port and spawn it.
pub async fn spawn_server(port: u16, state: AppState, mut shutdown: broadcast::Receiver<()>) -> Result<JoinHandle<Result<()>>> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("error binding submission listener to port {}", port))?;
    tracing::info!("starting listening on :{}/submit/{{year}}", port);
    let server = axum::serve(listener, router(state)).with_graceful_shutdown(async move {
        let _res = shutdown.recv().await;
    });
    Ok(tokio::spawn(async move { server.await.context("error from submission server") }))
}

/// Handle a new year submission.
///
/// The response is sent as soon as the orchestrator has taken the year, without waiting on any
/// pipeline processing. A path segment which can not be extracted at all is treated the same as
/// one which is not an integer.
#[tracing::instrument(level = "debug", skip_all)]
async fn submit(State(state): State<AppState>, segment: Result<Path<String>, PathRejection>) -> Result<(StatusCode, String), ApiError> {
    let Path(segment) = segment.map_err(|_| ApiError::InvalidYear)?;
    let year: i64 = segment.parse().map_err(|_| ApiError::InvalidYear)?;
    state.relay.submit(year).await?;
    tracing::info!(year, "new request");
    Ok((
        StatusCode::ACCEPTED,
        format!("Ok - going to search for movies in {}... Check logs for results.\n", segment),
    ))
}
