//! The canonical year → movie → cast pipeline.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::TopologyError;
use crate::models::{CompiledResult, Movie};
use crate::pipeline::{StageDef, Topology};
use crate::stage::{Message, Transform};

/// The entry topic, carrying a year as decimal text.
pub const TOPIC_YEAR: &str = "year";
/// The topic carrying one JSON encoded movie per message.
pub const TOPIC_MOVIE: &str = "movie";
/// The terminal topic, carrying JSON encoded compiled results.
pub const TOPIC_CAST: &str = "cast";

/// Build the canonical three stage topology.
///
/// - `A` listens on `year` and emits one `movie` message per movie released that year.
/// - `B` listens on `movie` and emits the movie's compiled cast to `cast`.
/// - `C` listens on `cast` and logs the compiled result.
pub fn canonical_topology(config: &Config, catalog: Arc<dyn Catalog>) -> Result<Topology, TopologyError> {
    Topology::builder()
        .stage(StageDef::new("A", config.rabbitmq_url_1.as_str(), TOPIC_YEAR, Arc::new(YearTransform::new(catalog.clone()))).emits(TOPIC_MOVIE))
        .stage(StageDef::new("B", config.rabbitmq_url_2.as_str(), TOPIC_MOVIE, Arc::new(MovieTransform::new(catalog))).emits(TOPIC_CAST))
        .stage(StageDef::new("C", config.rabbitmq_url_3.as_str(), TOPIC_CAST, Arc::new(CastTransform)))
        .build()
}

/// Expands a year into the movies released in it.
pub struct YearTransform {
    catalog: Arc<dyn Catalog>,
}

impl YearTransform {
    /// Create a new instance.
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Transform for YearTransform {
    #[tracing::instrument(level = "debug", skip(self, payload))]
    async fn transform(&self, payload: Bytes) -> Result<Vec<Message>> {
        let year: i64 = std::str::from_utf8(&payload)
            .ok()
            .and_then(|text| text.trim().parse().ok())
            .with_context(|| format!("unable to read year from {:?}", String::from_utf8_lossy(&payload)))?;
        let movies = self.catalog.movies(year).await.context("unable to fetch movies")?;
        tracing::info!(year, movies = movies.len(), "found movies");

        movies
            .iter()
            .map(|movie| {
                let data = serde_json::to_vec(movie).context("unable to marshal movie information")?;
                Ok(Message::new(TOPIC_MOVIE, data))
            })
            .collect()
    }
}

/// Compiles the cast of a movie.
pub struct MovieTransform {
    catalog: Arc<dyn Catalog>,
}

impl MovieTransform {
    /// Create a new instance.
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Transform for MovieTransform {
    #[tracing::instrument(level = "debug", skip(self, payload))]
    async fn transform(&self, payload: Bytes) -> Result<Vec<Message>> {
        let movie: Movie = serde_json::from_slice(&payload).context("unable to unmarshal movie")?;
        let cast = self.catalog.cast(movie.id).await.context("unable to fetch cast")?;

        let compiled = CompiledResult {
            movie_title: movie.title,
            release_date: movie.release_date,
            cast: cast.into_iter().map(|member| member.name).collect(),
        };
        let data = serde_json::to_vec(&compiled).context("unable to marshal compiled movie info")?;
        Ok(vec![Message::new(TOPIC_CAST, data)])
    }
}

/// Logs a compiled result. Emits nothing.
pub struct CastTransform;

#[async_trait]
impl Transform for CastTransform {
    async fn transform(&self, payload: Bytes) -> Result<Vec<Message>> {
        let compiled: CompiledResult = serde_json::from_slice(&payload).context("unable to unmarshal movie cast")?;
        tracing::info!(
            "Movie Info: {} ({}) - {} cast members",
            compiled.movie_title,
            compiled.release_date,
            compiled.cast.len()
        );
        Ok(vec![])
    }
}
