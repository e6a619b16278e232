mod endpoints_aggregator;

pub use endpoints_aggregator::{
    AggregatedEndpoints, AggregatorError, ClusterEndpoints, Endpoint, EndpointsAggregatorHandle, EndpointsAggregatorService, EndpointsUpdate,
    Locality,
};
