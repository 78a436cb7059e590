use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing_subscriber::fmt::MakeWriter;

use crate::broker::{Broker, BrokerConnection, MemoryBroker};
use crate::catalog::Catalog;
use crate::error::BrokerError;
use crate::models::{CastMember, Movie};
use crate::stage::{transform_fn, Message, Transform};

/// A catalog serving canned data.
#[derive(Default)]
pub struct FakeCatalog {
    pub movies: HashMap<i64, Vec<Movie>>,
    pub cast: HashMap<i64, Vec<CastMember>>,
    /// Years for which the catalog responds with an error.
    pub failing_years: Vec<i64>,
    pub movie_calls: AtomicUsize,
}

impl FakeCatalog {
    /// A catalog with two movies in 1994, each with a small cast.
    pub fn new_test() -> Self {
        let mut catalog = Self::default();
        catalog.movies.insert(
            1994,
            vec![
                Movie {
                    adult: false,
                    id: 278,
                    release_date: "1994-09-23".into(),
                    title: "The Shawshank Redemption".into(),
                },
                Movie {
                    adult: false,
                    id: 680,
                    release_date: "1994-09-10".into(),
                    title: "Pulp Fiction".into(),
                },
            ],
        );
        catalog.cast.insert(278, vec![cast_member(1, "Tim Robbins"), cast_member(2, "Morgan Freeman")]);
        catalog.cast.insert(680, vec![cast_member(3, "John Travolta"), cast_member(4, "Samuel L. Jackson"), cast_member(5, "Uma Thurman")]);
        catalog
    }
}

#[async_trait]
impl Catalog for FakeCatalog {
    async fn movies(&self, year: i64) -> Result<Vec<Movie>> {
        self.movie_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_years.contains(&year) {
            anyhow::bail!("catalog unavailable for {}", year);
        }
        Ok(self.movies.get(&year).cloned().unwrap_or_default())
    }

    async fn cast(&self, movie_id: i64) -> Result<Vec<CastMember>> {
        self.cast.get(&movie_id).cloned().with_context(|| format!("no such movie {}", movie_id))
    }
}

/// Build a cast member with the given id & name.
pub fn cast_member(id: i64, name: &str) -> CastMember {
    CastMember {
        cast_id: id,
        character: format!("character {}", id),
        credit_id: format!("credit-{}", id),
        id,
        name: name.into(),
        profile_path: None,
    }
}

/// A transform which parses an integer, failing on anything else, and emits its square.
pub fn square_transform(topic: &'static str) -> Arc<dyn Transform> {
    transform_fn(move |payload: Bytes| async move {
        let n: i64 = std::str::from_utf8(&payload)?.parse()?;
        Ok::<_, anyhow::Error>(vec![Message::new(topic, (n * n).to_string())])
    })
}

/// A transform which forwards every payload it receives to the returned channel.
pub fn collect_transform() -> (Arc<dyn Transform>, mpsc::UnboundedReceiver<Bytes>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let transform = transform_fn(move |payload: Bytes| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(payload);
            Ok::<_, anyhow::Error>(vec![])
        }
    });
    (transform, rx)
}

/// Receive the next collected payload as a string, waiting at most one second.
pub async fn next_collected(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Result<String> {
    let payload = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .context("timeout while waiting for collected payload")?
        .context("collector channel closed")?;
    Ok(String::from_utf8(payload.to_vec())?)
}

/// A broker which delays each connection attempt, by a longer delay for each successive attempt.
pub struct SlowBroker {
    pub inner: MemoryBroker,
    pub step: Duration,
    attempts: Mutex<u32>,
}

impl SlowBroker {
    pub fn new(inner: MemoryBroker, step: Duration) -> Self {
        Self {
            inner,
            step,
            attempts: Mutex::new(0),
        }
    }
}

#[async_trait]
impl Broker for SlowBroker {
    async fn connect(&self, addr: &str) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            *attempts += 1;
            *attempts
        };
        tokio::time::sleep(self.step * attempt).await;
        self.inner.connect(addr).await
    }
}

/// An in-memory sink for formatted log output.
#[derive(Clone, Default)]
pub struct LogCapture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// A subscriber writing plain info-level output into this capture.
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
        tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish()
    }

    /// Everything captured so far.
    pub fn contents(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
