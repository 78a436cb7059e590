//! Hart error abstractions.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Errors produced by a broker or one of its connections.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker at the given address could not be reached.
    #[error("unable to connect to broker at {addr}: {reason}")]
    Dial { addr: String, reason: String },
    /// The given address does not use a supported broker scheme.
    #[error("unsupported broker address {0}, expected one of amqp://, amqps:// or memory://")]
    UnsupportedAddress(String),
    /// The given topic could not be declared.
    #[error("unable to declare topic {topic}: {reason}")]
    Declare { topic: String, reason: String },
    /// A consumer could not be registered on the given topic.
    #[error("unable to register a consumer on topic {topic}: {reason}")]
    Consume { topic: String, reason: String },
    /// The broker rejected a publication.
    #[error("unable to publish to topic {topic}: {reason}")]
    Publish { topic: String, reason: String },
    /// An error was observed on an established delivery stream.
    #[error("delivery stream failure: {0}")]
    Delivery(String),
    /// The connection has been closed.
    #[error("broker connection closed")]
    Closed,
}

/// Errors produced by a pipeline stage.
///
/// Everything other than `Publish` & `NotConnected` is fatal to the stage which produced it.
/// Whether that is fatal to the process is decided by the application layer.
#[derive(Debug, Error)]
pub enum StageError {
    /// The stage was built without a transform.
    #[error("stage {stage} has no transform assigned")]
    MissingTransform { stage: String },
    /// The stage could not connect to its broker.
    #[error("stage {stage} unable to connect to broker: {source}")]
    Connect { stage: String, source: BrokerError },
    /// The stage could not declare its listen topic.
    #[error("stage {stage} unable to declare listen topic: {source}")]
    Declare { stage: String, source: BrokerError },
    /// The stage could not register its consumer.
    #[error("stage {stage} unable to register consumer: {source}")]
    Consume { stage: String, source: BrokerError },
    /// The stage's delivery stream ended or failed.
    #[error("stage {stage} lost its broker connection: {source}")]
    ConnectionLost { stage: String, source: BrokerError },
    /// A publication was attempted before the stage connected.
    #[error("stage {stage} is not connected to a broker")]
    NotConnected { stage: String },
    /// A publication was rejected.
    #[error("stage {stage} failed to publish: {source}")]
    Publish { stage: String, source: BrokerError },
    /// The task running the stage panicked or was cancelled.
    #[error("stage task terminated abnormally: {0}")]
    Aborted(String),
    /// The stage terminated before signalling readiness.
    #[error("stage {stage} terminated before signalling readiness")]
    NeverReady { stage: String },
}

/// Errors produced while validating a pipeline topology.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    /// The topology has no stages.
    #[error("a pipeline topology requires at least one stage")]
    Empty,
    /// Two stages share an id.
    #[error("duplicate stage id {0}")]
    DuplicateStage(String),
    /// Two stages listen on the same topic.
    #[error("topic {topic} is consumed by both {first} and {second}, competing consumers are not supported")]
    DuplicateTopic { topic: String, first: String, second: String },
    /// A stage emits to a topic which no stage consumes.
    #[error("stage {stage} emits to topic {topic} which no stage consumes")]
    UnknownTopic { stage: String, topic: String },
}

/// The error type used to indicate that a system shutdown is required.
#[derive(Debug, Error)]
#[error("fatal error: {0}")]
pub struct ShutdownError(#[from] pub anyhow::Error);

/// Errors surfaced to HTTP clients of the ingestion front door.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The submitted year was not an integer.
    #[error("year must be an integer")]
    InvalidYear,
    /// The relay queue has no consumer left.
    #[error("the pipeline is not accepting submissions")]
    RelayClosed,
}

/// JSON error response body.
#[derive(Debug, Clone, Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidYear => StatusCode::BAD_REQUEST,
            Self::RelayClosed => {
                tracing::error!("submission rejected, relay queue is closed");
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}
