mod gateway;
mod http_route;
mod listener_set;
mod reference_grant;
mod tcp_route;
mod upstream;

pub use gateway::{
    AllowedListeners, AllowedRoutes, FromNamespaces, Gateway, GatewayListener, GatewaySpec, GatewayStatus, GatewayTlsConfig,
    ListenerNamespaces, ListenerStatus, RouteGroupKind, RouteNamespaces, SecretObjectReference, TlsMode,
};
pub use http_route::{
    HTTPBackendRef, HTTPHeaderMatch, HTTPMethod, HTTPPathMatch, HTTPQueryParamMatch, HTTPRoute, HTTPRouteMatch, HTTPRouteRule,
    HTTPRouteSpec, HTTPRouteStatus, ParentReference, PathMatchType, RouteParentStatus, StringMatchType,
};
pub use listener_set::{ListenerEntryStatus, ListenerSet, ListenerSetSpec, ListenerSetStatus, ParentGatewayReference};
pub use reference_grant::{ReferenceGrant, ReferenceGrantFrom, ReferenceGrantSpec, ReferenceGrantTo};
pub use tcp_route::{TCPRoute, TCPRouteRule, TCPRouteSpec, TCPRouteStatus};
pub use upstream::{Upstream, UpstreamHost, UpstreamSpec};
