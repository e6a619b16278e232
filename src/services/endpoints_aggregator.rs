use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Locality {
    pub region: String,
    pub zone: String,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Endpoint {
    pub address: String,
    pub port: i32,
    pub locality: Locality,
}

/// Endpoints of one cluster across every source, grouped by locality.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ClusterEndpoints {
    pub cluster_name: String,
    pub localities: BTreeMap<Locality, BTreeSet<Endpoint>>,
}

impl ClusterEndpoints {
    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.localities.values().flatten()
    }
}

pub type AggregatedEndpoints = Arc<BTreeMap<String, ClusterEndpoints>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndpointsUpdate {
    /// Replaces what `source` knows about `cluster_name`.
    Upsert { source: String, cluster_name: String, endpoints: Vec<Endpoint> },
    RemoveCluster { source: String, cluster_name: String },
    SourceRemoved { source: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregatorError {
    #[error("Endpoints aggregator is no longer running")]
    Closed,
}

/// Cloneable handle used by endpoint sources and consumers.
#[derive(Clone, Debug)]
pub struct EndpointsAggregatorHandle {
    update_sender: mpsc::Sender<EndpointsUpdate>,
    aggregate_receiver: watch::Receiver<AggregatedEndpoints>,
}

impl EndpointsAggregatorHandle {
    pub async fn update(&self, update: EndpointsUpdate) -> Result<(), AggregatorError> {
        self.update_sender.send(update).await.map_err(|_| AggregatorError::Closed)
    }

    pub fn current(&self) -> AggregatedEndpoints {
        Arc::clone(&self.aggregate_receiver.borrow())
    }

    /// Stream of full aggregates, starting with the current one. It ends once the
    /// aggregator task has exited.
    pub fn subscribe(&self) -> WatchStream<AggregatedEndpoints> {
        WatchStream::new(self.aggregate_receiver.clone())
    }
}

/// Single owner of the per-source endpoint maps. Each update recomputes the whole
/// aggregate and publishes it when it changed.
#[derive(TypedBuilder)]
pub struct EndpointsAggregatorService {
    update_receiver: mpsc::Receiver<EndpointsUpdate>,
    aggregate_sender: watch::Sender<AggregatedEndpoints>,
    #[builder(default)]
    sources: BTreeMap<String, BTreeMap<String, Vec<Endpoint>>>,
}

impl EndpointsAggregatorService {
    pub fn channel(buffer: usize) -> (Self, EndpointsAggregatorHandle) {
        let (update_sender, update_receiver) = mpsc::channel(buffer);
        let (aggregate_sender, aggregate_receiver) = watch::channel(AggregatedEndpoints::default());
        let service = Self::builder().update_receiver(update_receiver).aggregate_sender(aggregate_sender).build();
        (service, EndpointsAggregatorHandle { update_sender, aggregate_receiver })
    }

    pub async fn start(mut self) -> crate::Result<()> {
        info!("Endpoints aggregator started");
        loop {
            tokio::select! {
                Some(update) = self.update_receiver.recv() => {
                    self.apply(update);
                    self.publish();
                },
                else => {
                    warn!("All endpoint sources are closed...exiting");
                    return Ok(());
                }
            }
        }
    }

    fn apply(&mut self, update: EndpointsUpdate) {
        match update {
            EndpointsUpdate::Upsert { source, cluster_name, endpoints } => {
                debug!("Source {source} reports {} endpoints for {cluster_name}", endpoints.len());
                self.sources.entry(source).or_default().insert(cluster_name, endpoints);
            },
            EndpointsUpdate::RemoveCluster { source, cluster_name } => {
                debug!("Source {source} removed {cluster_name}");
                if let Some(clusters) = self.sources.get_mut(&source) {
                    clusters.remove(&cluster_name);
                    if clusters.is_empty() {
                        self.sources.remove(&source);
                    }
                }
            },
            EndpointsUpdate::SourceRemoved { source } => {
                info!("Source {source} removed");
                self.sources.remove(&source);
            },
        }
    }

    fn aggregate(&self) -> BTreeMap<String, ClusterEndpoints> {
        let mut aggregate: BTreeMap<String, ClusterEndpoints> = BTreeMap::new();
        for (cluster_name, endpoints) in self.sources.values().flatten() {
            let cluster = aggregate
                .entry(cluster_name.clone())
                .or_insert_with(|| ClusterEndpoints { cluster_name: cluster_name.clone(), localities: BTreeMap::new() });
            for endpoint in endpoints {
                cluster.localities.entry(endpoint.locality.clone()).or_default().insert(endpoint.clone());
            }
        }
        aggregate.retain(|_, cluster| cluster.endpoints().next().is_some());
        aggregate
    }

    fn publish(&self) {
        let aggregate = self.aggregate();
        self.aggregate_sender.send_if_modified(|current| {
            if **current == aggregate {
                false
            } else {
                debug!("Publishing endpoints for {} clusters", aggregate.len());
                *current = Arc::new(aggregate);
                true
            }
        });
    }
}
