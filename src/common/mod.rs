pub mod api;
mod backend;
pub mod configuration;
mod errors;
mod listener;
mod matcher;
mod resource_key;

pub use backend::{BackendMap, BackendObject, DestinationKind};
pub use errors::ResolveError;
pub use listener::{Listener, ListenerConfig, ListenerData, ListenerError, ListenerOrigin, ProtocolType, TlsType};
pub use matcher::{NormalizedMatch, PathMatch, ValueMatch, DEFAULT_PATH};
pub use resource_key::{
    core_if_empty, BackendRefKey, ResourceKey, RouteRefKey, CORE_GROUP_NAME, DEFAULT_GROUP_NAME, DEFAULT_KIND_NAME,
    DEFAULT_NAMESPACE_NAME, EXPERIMENTAL_GROUP_NAME, HTTP_ROUTE_KIND_NAME, KUBVERNOR_GROUP_NAME, LISTENER_SET_KIND_NAME,
    SECRET_KIND_NAME, SERVICE_KIND_NAME, TCP_ROUTE_KIND_NAME, UPSTREAM_KIND_NAME,
};

pub const DEFAULT_ROUTE_HOSTNAME: &str = "*";
pub const WILDCARD_NAMESPACE: &str = "*";
pub const WILDCARD_ROUTE_NAME: &str = "*";
pub const INHERIT_PARENT_MATCHER_ANNOTATION: &str = "delegation.kubvernor.io/inherit-parent-matcher";
pub const BLACKHOLE_CLUSTER_NAME: &str = "blackhole_cluster";
pub const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";
