//! Pipeline topology & wiring.
//!
//! The shape of a pipeline is described by a `Topology`: a set of stage definitions, each naming
//! the topic it consumes and the topics it emits. Edges of the topology are resolved once, when
//! the topology is wired into a `Pipeline`, by routing each emitted topic to the publisher of the
//! stage which consumes it.

mod canonical;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::broker::Broker;
use crate::error::{StageError, TopologyError};
use crate::stage::{Publisher, Stage, StartupBarrier, Transform};

pub use canonical::canonical_topology;

/// The definition of a single pipeline stage.
#[derive(Clone)]
pub struct StageDef {
    /// The unique id of this stage.
    pub id: String,
    /// The address of the broker hosting this stage's listen topic.
    pub address: String,
    /// The topic this stage consumes.
    pub listen_topic: String,
    /// The topics this stage may emit derived messages to.
    pub emits: BTreeSet<String>,
    /// The transform applied to each consumed message.
    pub transform: Arc<dyn Transform>,
}

impl StageDef {
    /// Create a new stage definition which emits nothing.
    pub fn new(id: impl Into<String>, address: impl Into<String>, listen_topic: impl Into<String>, transform: Arc<dyn Transform>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            listen_topic: listen_topic.into(),
            emits: Default::default(),
            transform,
        }
    }

    /// Declare that this stage emits to the given topic.
    pub fn emits(mut self, topic: impl Into<String>) -> Self {
        self.emits.insert(topic.into());
        self
    }
}

/// A directed edge of a pipeline topology.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Edge {
    /// The id of the emitting stage.
    pub source: String,
    /// The topic carrying the edge.
    pub topic: String,
    /// The id of the stage consuming the topic.
    pub destination: String,
}

/// A validated pipeline topology.
#[derive(Clone)]
pub struct Topology {
    stages: Vec<StageDef>,
    edges: Vec<Edge>,
}

/// A builder of `Topology` instances.
#[derive(Default)]
pub struct TopologyBuilder {
    stages: Vec<StageDef>,
}

impl TopologyBuilder {
    /// Add a stage to this topology. The first stage added is the entry stage.
    pub fn stage(mut self, stage: StageDef) -> Self {
        self.stages.push(stage);
        self
    }

    /// Validate the topology and resolve its edges.
    pub fn build(self) -> Result<Topology, TopologyError> {
        if self.stages.is_empty() {
            return Err(TopologyError::Empty);
        }

        let mut ids = BTreeSet::new();
        let mut consumers: BTreeMap<&str, &str> = BTreeMap::new();
        for stage in self.stages.iter() {
            if !ids.insert(stage.id.as_str()) {
                return Err(TopologyError::DuplicateStage(stage.id.clone()));
            }
            if let Some(first) = consumers.insert(stage.listen_topic.as_str(), stage.id.as_str()) {
                return Err(TopologyError::DuplicateTopic {
                    topic: stage.listen_topic.clone(),
                    first: first.into(),
                    second: stage.id.clone(),
                });
            }
        }

        let mut edges = BTreeSet::new();
        for stage in self.stages.iter() {
            for topic in stage.emits.iter() {
                let destination = consumers.get(topic.as_str()).ok_or_else(|| TopologyError::UnknownTopic {
                    stage: stage.id.clone(),
                    topic: topic.clone(),
                })?;
                edges.insert(Edge {
                    source: stage.id.clone(),
                    topic: topic.clone(),
                    destination: (*destination).into(),
                });
            }
        }

        Ok(Topology {
            edges: edges.into_iter().collect(),
            stages: self.stages,
        })
    }
}

impl Topology {
    /// Begin building a new topology.
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::default()
    }

    /// All edges of this topology, sorted.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// All stage definitions of this topology, in the order they were added.
    pub fn stages(&self) -> &[StageDef] {
        &self.stages
    }
}

/// A pipeline whose stages have been built & routed, but not yet started.
pub struct Pipeline {
    stages: Vec<Stage>,
    entry: Publisher,
    entry_topic: String,
}

impl Pipeline {
    /// Build one stage per definition of the given topology & route each stage's edges.
    pub fn wire(topology: &Topology) -> Result<Self, StageError> {
        let mut stages = topology
            .stages()
            .iter()
            .map(|def| {
                Stage::builder(def.id.as_str(), def.address.as_str(), def.listen_topic.as_str())
                    .transform(def.transform.clone())
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()?;

        let publishers: BTreeMap<String, Publisher> = stages.iter().map(|stage| (stage.id().to_string(), stage.publisher())).collect();
        for edge in topology.edges() {
            // Edges only ever reference validated stage ids.
            let (Some(stage), Some(publisher)) = (stages.iter_mut().find(|stage| stage.id() == edge.source), publishers.get(&edge.destination)) else {
                continue;
            };
            stage.route(edge.topic.as_str(), publisher.clone());
        }

        // Topologies always hold at least one stage, the first being the entry.
        let (entry, entry_topic) = (stages[0].publisher(), stages[0].listen_topic().to_string());
        Ok(Self { stages, entry, entry_topic })
    }

    /// The stages of this pipeline.
    #[cfg(test)]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Start every stage of this pipeline, returning once all of them are consuming.
    ///
    /// Nothing is published into the pipeline by this call.
    #[tracing::instrument(level = "debug", skip(self, broker))]
    pub async fn start(self, broker: Arc<dyn Broker>) -> Result<RunningPipeline, StageError> {
        let mut barrier = StartupBarrier::new();
        let mut tasks = JoinSet::new();
        for stage in self.stages {
            let ready = barrier.register(stage.id());
            tasks.spawn(stage.start(broker.clone(), ready));
        }
        tracing::info!(stages = barrier.len(), "waiting for all stages to become ready");
        if let Err(err) = barrier.wait().await {
            // Prefer the error of the stage which actually failed.
            return Err(match tasks.join_next().await {
                Some(Ok(Err(stage_err))) => stage_err,
                _ => err,
            });
        }
        tracing::info!("all stages are ready");

        Ok(RunningPipeline {
            entry: self.entry,
            entry_topic: self.entry_topic,
            tasks,
        })
    }
}

/// A pipeline whose stages are all live.
pub struct RunningPipeline {
    entry: Publisher,
    entry_topic: String,
    tasks: JoinSet<Result<(), StageError>>,
}

impl RunningPipeline {
    /// The publisher of the entry stage.
    pub fn entry(&self) -> Publisher {
        self.entry.clone()
    }

    /// The topic consumed by the entry stage.
    pub fn entry_topic(&self) -> &str {
        &self.entry_topic
    }

    /// Wait for the first stage to terminate, which is always a failure.
    pub async fn join(&mut self) -> Result<(), StageError> {
        match self.tasks.join_next().await {
            Some(Ok(res)) => res,
            Some(Err(err)) => Err(StageError::Aborted(err.to_string())),
            None => Ok(()),
        }
    }
}
