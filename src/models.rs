//! Data models exchanged between stages & returned by the movie catalog.

use serde::{Deserialize, Serialize};

/// A page of movie search results.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct MovieSearchResult {
    #[serde(default)]
    pub results: Vec<Movie>,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub total_results: u32,
}

/// A single movie.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Movie {
    #[serde(default)]
    pub adult: bool,
    pub id: i64,
    #[serde(default)]
    pub release_date: String,
    #[serde(default)]
    pub title: String,
}

/// The credits of a single movie.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct CastSearchResult {
    #[serde(default)]
    pub cast: Vec<CastMember>,
}

/// A single cast member of a movie.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct CastMember {
    #[serde(default)]
    pub cast_id: i64,
    #[serde(default)]
    pub character: String,
    #[serde(default)]
    pub credit_id: String,
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub profile_path: Option<String>,
}

/// The compiled result of a movie & its cast, as logged by the terminal stage.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct CompiledResult {
    pub movie_title: String,
    pub release_date: String,
    pub cast: Vec<String>,
}
