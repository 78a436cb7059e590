//! Hart, a year → movies → cast enrichment pipeline relayed over a message broker.

mod app;
mod broker;
mod catalog;
mod config;
mod error;
#[cfg(test)]
mod fixtures;
mod models;
mod orchestrator;
mod pipeline;
mod relay;
mod server;
mod stage;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Arc::new(Config::new()?);

    // Setup tracing/logging system.
    let filter = if cfg.verbose {
        EnvFilter::new("debug")
    } else {
        // Filter spans based on the RUST_LOG env var, defaulting to info.
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        // Send a copy of all spans to stdout in compact form.
        .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true).with_ansi(true))
        // Install this registry as the global tracing registry.
        .try_init()
        .context("error initializing logging/tracing system")?;

    tracing::info!(
        port = %cfg.port,
        rabbitmq_url_1 = %cfg.rabbitmq_url_1,
        rabbitmq_url_2 = %cfg.rabbitmq_url_2,
        rabbitmq_url_3 = %cfg.rabbitmq_url_3,
        catalog_url = %cfg.catalog_url,
        api_key_set = !cfg.api_key.is_empty(),
        idle_timeout = ?cfg.idle_timeout,
        "starting hart",
    );
    let res = match App::new(cfg).await {
        Ok(app) => app.spawn().await.context("error joining application task")?.map_err(anyhow::Error::from),
        Err(err) => Err(err),
    };
    if let Err(err) = &res {
        tracing::error!(error = ?err);
    }

    // Ensure any pending output is flushed.
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    res
}
