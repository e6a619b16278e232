use std::fmt::Display;

use k8s_openapi::api::core::v1::{Secret, Service};
use kube::{Resource, ResourceExt};

use super::api::{Gateway, HTTPBackendRef, HTTPRoute, ListenerSet, ParentGatewayReference, ParentReference, TCPRoute, Upstream};

pub const DEFAULT_GROUP_NAME: &str = "gateway.networking.k8s.io";
pub const EXPERIMENTAL_GROUP_NAME: &str = "gateway.networking.x-k8s.io";
pub const KUBVERNOR_GROUP_NAME: &str = "kubvernor.io";
pub const CORE_GROUP_NAME: &str = "core";

pub const DEFAULT_NAMESPACE_NAME: &str = "default";
pub const DEFAULT_KIND_NAME: &str = "Gateway";
pub const HTTP_ROUTE_KIND_NAME: &str = "HTTPRoute";
pub const TCP_ROUTE_KIND_NAME: &str = "TCPRoute";
pub const LISTENER_SET_KIND_NAME: &str = "XListenerSet";
pub const SERVICE_KIND_NAME: &str = "Service";
pub const SECRET_KIND_NAME: &str = "Secret";
pub const UPSTREAM_KIND_NAME: &str = "Upstream";

/// Empty groups and the literal `core` group name the same thing.
pub fn core_if_empty(group: &str) -> &str {
    if group.is_empty() {
        CORE_GROUP_NAME
    } else {
        group
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ResourceKey {
    pub group: String,
    pub namespace: String,
    pub name: String,
    pub kind: String,
}

impl ResourceKey {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_owned(), ..Default::default() }
    }

    pub fn namespaced(name: &str, namespace: &str) -> Self {
        Self { name: name.to_owned(), namespace: namespace.to_owned(), ..Default::default() }
    }

    pub fn http_route(name: &str, namespace: &str) -> Self {
        Self { kind: HTTP_ROUTE_KIND_NAME.to_owned(), ..Self::namespaced(name, namespace) }
    }

    pub fn tcp_route(name: &str, namespace: &str) -> Self {
        Self { kind: TCP_ROUTE_KIND_NAME.to_owned(), ..Self::namespaced(name, namespace) }
    }
}

impl Default for ResourceKey {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP_NAME.to_owned(),
            namespace: DEFAULT_NAMESPACE_NAME.to_owned(),
            name: String::default(),
            kind: DEFAULT_KIND_NAME.to_owned(),
        }
    }
}

impl Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", create_id(&self.name, &self.namespace))
    }
}

fn create_id(name: &str, namespace: &str) -> String {
    namespace.to_owned() + "." + name
}

fn namespace_of<R: Resource>(resource: &R) -> String {
    resource.meta().namespace.clone().unwrap_or(DEFAULT_NAMESPACE_NAME.to_owned())
}

impl From<&Gateway> for ResourceKey {
    fn from(value: &Gateway) -> Self {
        Self { group: DEFAULT_GROUP_NAME.to_owned(), namespace: namespace_of(value), name: value.name_any(), kind: DEFAULT_KIND_NAME.to_owned() }
    }
}

impl From<&ListenerSet> for ResourceKey {
    fn from(value: &ListenerSet) -> Self {
        Self {
            group: EXPERIMENTAL_GROUP_NAME.to_owned(),
            namespace: namespace_of(value),
            name: value.name_any(),
            kind: LISTENER_SET_KIND_NAME.to_owned(),
        }
    }
}

impl From<&HTTPRoute> for ResourceKey {
    fn from(value: &HTTPRoute) -> Self {
        Self::http_route(&value.name_any(), &namespace_of(value))
    }
}

impl From<&TCPRoute> for ResourceKey {
    fn from(value: &TCPRoute) -> Self {
        Self::tcp_route(&value.name_any(), &namespace_of(value))
    }
}

impl From<&Service> for ResourceKey {
    fn from(value: &Service) -> Self {
        Self { group: String::new(), namespace: namespace_of(value), name: value.name_any(), kind: SERVICE_KIND_NAME.to_owned() }
    }
}

impl From<&Secret> for ResourceKey {
    fn from(value: &Secret) -> Self {
        Self { group: String::new(), namespace: namespace_of(value), name: value.name_any(), kind: SECRET_KIND_NAME.to_owned() }
    }
}

impl From<&Upstream> for ResourceKey {
    fn from(value: &Upstream) -> Self {
        Self {
            group: KUBVERNOR_GROUP_NAME.to_owned(),
            namespace: namespace_of(value),
            name: value.name_any(),
            kind: UPSTREAM_KIND_NAME.to_owned(),
        }
    }
}

/// Parent reference of a ListenerSet; the namespace defaults to the ListenerSet's own.
impl From<(&ParentGatewayReference, &str)> for ResourceKey {
    fn from((value, default_namespace): (&ParentGatewayReference, &str)) -> Self {
        Self {
            group: value.group.clone().filter(|g| !g.is_empty()).unwrap_or(DEFAULT_GROUP_NAME.to_owned()),
            namespace: value.namespace.clone().unwrap_or(default_namespace.to_owned()),
            name: value.name.clone(),
            kind: value.kind.clone().unwrap_or(DEFAULT_KIND_NAME.to_owned()),
        }
    }
}

/// Route parent reference with Gateway API defaults applied.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct RouteRefKey {
    pub resource_key: ResourceKey,
    pub section_name: Option<String>,
    pub port: Option<i32>,
}

impl AsRef<ResourceKey> for RouteRefKey {
    fn as_ref(&self) -> &ResourceKey {
        &self.resource_key
    }
}

impl From<(&ParentReference, &str)> for RouteRefKey {
    fn from((value, route_namespace): (&ParentReference, &str)) -> Self {
        Self {
            resource_key: ResourceKey {
                group: value.group.clone().filter(|g| !g.is_empty()).unwrap_or(DEFAULT_GROUP_NAME.to_owned()),
                namespace: value.namespace.clone().unwrap_or(route_namespace.to_owned()),
                name: value.name.clone(),
                kind: value.kind.clone().unwrap_or(DEFAULT_KIND_NAME.to_owned()),
            },
            section_name: value.section_name.clone(),
            port: value.port,
        }
    }
}

/// Canonical form of a backend reference used as a map key, so that equivalent
/// references written differently collide.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct BackendRefKey {
    pub group: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub port: Option<i32>,
}

impl BackendRefKey {
    pub fn new(backend_ref: &HTTPBackendRef, default_namespace: &str) -> Self {
        let group = backend_ref.group.clone().unwrap_or_default();
        Self {
            group: if group == CORE_GROUP_NAME { String::new() } else { group },
            kind: backend_ref.kind.clone().unwrap_or(SERVICE_KIND_NAME.to_owned()),
            namespace: backend_ref.namespace.clone().unwrap_or(default_namespace.to_owned()),
            name: backend_ref.name.clone(),
            port: backend_ref.port,
        }
    }

    pub fn resource_key(&self) -> ResourceKey {
        ResourceKey { group: self.group.clone(), namespace: self.namespace.clone(), name: self.name.clone(), kind: self.kind.clone() }
    }

    pub fn is_delegation(&self) -> bool {
        self.kind == HTTP_ROUTE_KIND_NAME && self.group == DEFAULT_GROUP_NAME
    }
}

impl Display for BackendRefKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} {}", core_if_empty(&self.group), self.kind, create_id(&self.name, &self.namespace))?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}
