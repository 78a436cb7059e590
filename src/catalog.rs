//! Movie catalog client.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::config::Config;
use crate::models::{CastMember, CastSearchResult, Movie, MovieSearchResult};

/// The timeout applied to every catalog request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A provider of movie & cast data.
#[async_trait]
pub trait Catalog: Send + Sync + 'static {
    /// Fetch the movies released in the given year.
    async fn movies(&self, year: i64) -> Result<Vec<Movie>>;

    /// Fetch the cast of the given movie.
    async fn cast(&self, movie_id: i64) -> Result<Vec<CastMember>>;
}

/// A catalog backed by the TMDB v3 HTTP API.
#[derive(Clone)]
pub struct TmdbCatalog {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl TmdbCatalog {
    /// Create a new instance.
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("error building catalog HTTP client")?;
        Ok(Self {
            client,
            base_url: config.catalog_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    /// Build the request used to discover the movies of the given year.
    fn movies_request(&self, year: i64) -> reqwest::RequestBuilder {
        self.client.get(format!("{}/discover/movie", self.base_url)).query(&[
            ("primary_release_year", year.to_string().as_str()),
            ("sort_by", "vote_average.desc"),
            ("api_key", self.api_key.as_str()),
        ])
    }

    /// Build the request used to fetch the credits of the given movie.
    fn cast_request(&self, movie_id: i64) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}/movie/{}/credits", self.base_url, movie_id))
            .query(&[("api_key", self.api_key.as_str())])
    }
}

#[async_trait]
impl Catalog for TmdbCatalog {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn movies(&self, year: i64) -> Result<Vec<Movie>> {
        let res: MovieSearchResult = self
            .movies_request(year)
            .send()
            .await
            .context("unable to get movie results")?
            .error_for_status()
            .context("movie search rejected")?
            .json()
            .await
            .context("unable to decode movie search")?;
        tracing::debug!(year, total_results = res.total_results, "movie search complete");
        Ok(res.results)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn cast(&self, movie_id: i64) -> Result<Vec<CastMember>> {
        let res: CastSearchResult = self
            .cast_request(movie_id)
            .send()
            .await
            .context("unable to get cast results")?
            .error_for_status()
            .context("cast search rejected")?
            .json()
            .await
            .context("unable to decode cast search")?;
        Ok(res.cast)
    }
}
