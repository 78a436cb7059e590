use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::StreamExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::SignalStream;
use tokio_stream::StreamMap;

use crate::broker::{Broker, SchemeBroker};
use crate::catalog::{Catalog, TmdbCatalog};
use crate::config::Config;
use crate::error::ShutdownError;
use crate::orchestrator::Orchestrator;
use crate::pipeline::{canonical_topology, Pipeline, RunningPipeline};
use crate::relay::relay_queue;
use crate::server::{spawn_server, AppState};

/// The application object, owning every long-lived task.
pub struct App {
    /// The application's runtime config.
    _config: Arc<Config>,

    /// The live pipeline stages.
    pipeline: RunningPipeline,
    /// The join handle of the orchestrator loop.
    orchestrator: JoinHandle<()>,
    /// The join handle of the submission server.
    server: JoinHandle<Result<()>>,

    /// A channel used for triggering graceful shutdown of the server.
    shutdown_tx: broadcast::Sender<()>,
}

impl App {
    /// Create a new instance.
    ///
    /// Every stage is consuming by the time this returns, and only then are the orchestrator &
    /// the submission server started.
    pub async fn new(config: Arc<Config>) -> Result<Self> {
        let catalog: Arc<dyn Catalog> = Arc::new(TmdbCatalog::new(&config)?);
        let broker: Arc<dyn Broker> = Arc::new(SchemeBroker::default());
        Self::with_parts(config, broker, catalog).await
    }

    /// Create a new instance using the given broker & catalog.
    pub async fn with_parts(config: Arc<Config>, broker: Arc<dyn Broker>, catalog: Arc<dyn Catalog>) -> Result<Self> {
        let topology = canonical_topology(&config, catalog).context("error building pipeline topology")?;
        let pipeline = Pipeline::wire(&topology)
            .context("error wiring pipeline")?
            .start(broker)
            .await
            .context("error starting pipeline stages")?;

        let (relay, relay_rx) = relay_queue();
        let orchestrator = Orchestrator::new(relay_rx, pipeline.entry(), pipeline.entry_topic(), config.idle_timeout).spawn();

        let (shutdown_tx, _) = broadcast::channel(1);
        let server = spawn_server(config.port, AppState { relay }, shutdown_tx.subscribe())
            .await
            .context("error setting up submission server")?;

        Ok(Self {
            _config: config,
            pipeline,
            orchestrator,
            server,
            shutdown_tx,
        })
    }

    pub fn spawn(self) -> JoinHandle<Result<(), ShutdownError>> {
        tokio::spawn(self.run())
    }

    /// Run until a shutdown signal is received or any stage fails.
    ///
    /// A failed stage is fatal, as the pipeline can not function without every one of its stages.
    async fn run(mut self) -> Result<(), ShutdownError> {
        let mut signals = StreamMap::new();
        signals.insert("sigterm", SignalStream::new(signal(SignalKind::terminate()).context("error building signal stream")?));
        signals.insert("sigint", SignalStream::new(signal(SignalKind::interrupt()).context("error building signal stream")?));

        let res = tokio::select! {
            Some((_, sig)) = signals.next() => {
                tracing::debug!(signal = ?sig, "signal received, beginning shutdown");
                Ok(())
            }
            res = self.pipeline.join() => {
                let err = match res {
                    Ok(()) => anyhow::anyhow!("all pipeline stages have stopped"),
                    Err(err) => anyhow::Error::from(err),
                };
                tracing::error!(error = ?err, "pipeline stage failed");
                Err(ShutdownError(err))
            }
            res = &mut self.server => {
                let err = match res {
                    Ok(Ok(())) => anyhow::anyhow!("submission server stopped"),
                    Ok(Err(err)) => err,
                    Err(err) => anyhow::Error::from(err),
                };
                Err(ShutdownError(err))
            }
        };

        // Begin shutdown routine.
        tracing::debug!("hart is shutting down");
        let _ = self.shutdown_tx.send(());
        self.orchestrator.abort();
        if !self.server.is_finished() {
            if let Err(err) = (&mut self.server).await.context("error joining submission server handle").and_then(|res| res) {
                tracing::error!(error = ?err, "error shutting down submission server");
            }
        }
        tracing::debug!("hart shutdown complete");
        res
    }
}
