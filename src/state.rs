use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use k8s_openapi::api::core::v1::{Namespace, Secret, Service};
use kube::{Resource, ResourceExt};

use crate::common::{
    api::{Gateway, HTTPRoute, ListenerSet, ParentReference, ReferenceGrant, TCPRoute, Upstream},
    ResourceKey, RouteRefKey, DEFAULT_NAMESPACE_NAME,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },
    #[error("Unable to lock the store")]
    LockingError,
}

/// Read access to the cluster objects a translation needs. Implementations are
/// expected to answer from one consistent view for the duration of a translation.
pub trait ResourceStore {
    fn gateway(&self, namespace: &str, name: &str) -> Result<Arc<Gateway>, StoreError>;
    fn listener_sets_for_gateway(&self, gateway: &ResourceKey) -> Result<Vec<Arc<ListenerSet>>, StoreError>;
    fn http_route(&self, namespace: &str, name: &str) -> Result<Arc<HTTPRoute>, StoreError>;
    /// All routes in a namespace, or in every namespace when `namespace` is `None`.
    fn http_routes(&self, namespace: Option<&str>) -> Result<Vec<Arc<HTTPRoute>>, StoreError>;
    /// Routes with a parent reference naming `parent`, which is a Gateway or a ListenerSet.
    fn http_routes_for_parent(&self, parent: &ResourceKey) -> Result<Vec<Arc<HTTPRoute>>, StoreError>;
    fn tcp_routes_for_parent(&self, parent: &ResourceKey) -> Result<Vec<Arc<TCPRoute>>, StoreError>;
    /// Grants living in `namespace` with a `from` entry for `from_namespace`.
    fn reference_grants(&self, namespace: &str, from_namespace: &str) -> Result<Vec<Arc<ReferenceGrant>>, StoreError>;
    fn service(&self, namespace: &str, name: &str) -> Result<Arc<Service>, StoreError>;
    fn upstream(&self, namespace: &str, name: &str) -> Result<Arc<Upstream>, StoreError>;
    fn secret(&self, namespace: &str, name: &str) -> Result<Arc<Secret>, StoreError>;
    fn namespace_labels(&self, namespace: &str) -> Result<BTreeMap<String, String>, StoreError>;
}

type Objects<T> = Arc<Mutex<HashMap<ResourceKey, Arc<T>>>>;

/// Mutable in-memory store fed by whatever watches the cluster.
#[derive(Clone, Default)]
pub struct State {
    gateways: Objects<Gateway>,
    listener_sets: Objects<ListenerSet>,
    http_routes: Objects<HTTPRoute>,
    tcp_routes: Objects<TCPRoute>,
    reference_grants: Objects<ReferenceGrant>,
    services: Objects<Service>,
    upstreams: Objects<Upstream>,
    secrets: Objects<Secret>,
    namespaces: Objects<Namespace>,
}

fn key_of<R: Resource<DynamicType = ()>>(resource: &R) -> ResourceKey {
    ResourceKey {
        group: R::group(&()).into_owned(),
        namespace: resource.meta().namespace.clone().unwrap_or(DEFAULT_NAMESPACE_NAME.to_owned()),
        name: resource.meta().name.clone().unwrap_or_default(),
        kind: R::kind(&()).into_owned(),
    }
}

fn save<T>(objects: &Objects<T>, id: ResourceKey, object: &Arc<T>) -> Result<(), StoreError> {
    let mut lock = objects.lock().map_err(|_| StoreError::LockingError)?;
    lock.insert(id, Arc::clone(object));
    Ok(())
}

fn delete<T>(objects: &Objects<T>, id: &ResourceKey) -> Result<Option<Arc<T>>, StoreError> {
    let mut lock = objects.lock().map_err(|_| StoreError::LockingError)?;
    Ok(lock.remove(id))
}

/// Indexes routes by every distinct parent their parent references name.
fn index_by_parent<T>(
    routes: &BTreeMap<(String, String), Arc<T>>,
    parent_refs: impl Fn(&T) -> Option<&Vec<ParentReference>>,
) -> BTreeMap<ResourceKey, Vec<Arc<T>>> {
    let mut routes_by_parent: BTreeMap<ResourceKey, Vec<Arc<T>>> = BTreeMap::new();
    for ((namespace, _), route) in routes {
        let mut parents: Vec<ResourceKey> =
            parent_refs(route).into_iter().flatten().map(|r| RouteRefKey::from((r, namespace.as_str())).resource_key).collect();
        parents.sort();
        parents.dedup();
        for parent in parents {
            routes_by_parent.entry(parent).or_default().push(Arc::clone(route));
        }
    }
    routes_by_parent
}

fn copy<T>(objects: &Objects<T>) -> Result<BTreeMap<(String, String), Arc<T>>, StoreError> {
    let lock = objects.lock().map_err(|_| StoreError::LockingError)?;
    Ok(lock.iter().map(|(k, v)| ((k.namespace.clone(), k.name.clone()), Arc::clone(v))).collect())
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_gateway(&self, gateway: &Arc<Gateway>) -> Result<(), StoreError> {
        save(&self.gateways, key_of(gateway.as_ref()), gateway)
    }

    pub fn delete_gateway(&self, id: &ResourceKey) -> Result<Option<Arc<Gateway>>, StoreError> {
        delete(&self.gateways, id)
    }

    pub fn save_listener_set(&self, listener_set: &Arc<ListenerSet>) -> Result<(), StoreError> {
        save(&self.listener_sets, key_of(listener_set.as_ref()), listener_set)
    }

    pub fn delete_listener_set(&self, id: &ResourceKey) -> Result<Option<Arc<ListenerSet>>, StoreError> {
        delete(&self.listener_sets, id)
    }

    pub fn save_http_route(&self, route: &Arc<HTTPRoute>) -> Result<(), StoreError> {
        save(&self.http_routes, key_of(route.as_ref()), route)
    }

    pub fn delete_http_route(&self, id: &ResourceKey) -> Result<Option<Arc<HTTPRoute>>, StoreError> {
        delete(&self.http_routes, id)
    }

    pub fn save_tcp_route(&self, route: &Arc<TCPRoute>) -> Result<(), StoreError> {
        save(&self.tcp_routes, key_of(route.as_ref()), route)
    }

    pub fn delete_tcp_route(&self, id: &ResourceKey) -> Result<Option<Arc<TCPRoute>>, StoreError> {
        delete(&self.tcp_routes, id)
    }

    pub fn save_reference_grant(&self, grant: &Arc<ReferenceGrant>) -> Result<(), StoreError> {
        save(&self.reference_grants, key_of(grant.as_ref()), grant)
    }

    pub fn delete_reference_grant(&self, id: &ResourceKey) -> Result<Option<Arc<ReferenceGrant>>, StoreError> {
        delete(&self.reference_grants, id)
    }

    pub fn save_service(&self, service: &Arc<Service>) -> Result<(), StoreError> {
        save(&self.services, key_of(service.as_ref()), service)
    }

    pub fn save_upstream(&self, upstream: &Arc<Upstream>) -> Result<(), StoreError> {
        save(&self.upstreams, key_of(upstream.as_ref()), upstream)
    }

    pub fn save_secret(&self, secret: &Arc<Secret>) -> Result<(), StoreError> {
        save(&self.secrets, key_of(secret.as_ref()), secret)
    }

    pub fn save_namespace(&self, namespace: &Arc<Namespace>) -> Result<(), StoreError> {
        let id = ResourceKey { namespace: String::new(), ..key_of(namespace.as_ref()) };
        save(&self.namespaces, id, namespace)
    }

    /// Freezes the current content into an indexed, immutable view.
    pub fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let gateways = copy(&self.gateways)?;
        let listener_sets = copy(&self.listener_sets)?;
        let http_routes = copy(&self.http_routes)?;
        let reference_grants = copy(&self.reference_grants)?;

        let mut listener_sets_by_parent: BTreeMap<ResourceKey, Vec<Arc<ListenerSet>>> = BTreeMap::new();
        for listener_set in listener_sets.values() {
            let namespace = listener_set.namespace().unwrap_or(DEFAULT_NAMESPACE_NAME.to_owned());
            let parent = ResourceKey::from((&listener_set.spec.parent_ref, namespace.as_str()));
            listener_sets_by_parent.entry(parent).or_default().push(Arc::clone(listener_set));
        }

        let routes_by_parent = index_by_parent(&http_routes, |route| route.spec.parent_refs.as_ref());
        let tcp_routes_by_parent = index_by_parent(&copy(&self.tcp_routes)?, |route| route.spec.parent_refs.as_ref());

        let mut grants_by_namespace: BTreeMap<(String, String), Vec<Arc<ReferenceGrant>>> = BTreeMap::new();
        for ((namespace, _), grant) in &reference_grants {
            let mut from_namespaces: Vec<&String> = grant.spec.from.iter().map(|f| &f.namespace).collect();
            from_namespaces.sort();
            from_namespaces.dedup();
            for from_namespace in from_namespaces {
                grants_by_namespace.entry((namespace.clone(), from_namespace.clone())).or_default().push(Arc::clone(grant));
            }
        }

        let namespaces = {
            let lock = self.namespaces.lock().map_err(|_| StoreError::LockingError)?;
            lock.iter().map(|(k, v)| (k.name.clone(), v.labels().clone())).collect()
        };

        Ok(Snapshot {
            gateways,
            http_routes,
            services: copy(&self.services)?,
            upstreams: copy(&self.upstreams)?,
            secrets: copy(&self.secrets)?,
            namespaces,
            listener_sets_by_parent,
            routes_by_parent,
            tcp_routes_by_parent,
            grants_by_namespace,
        })
    }
}

/// Immutable view of a [`State`] with lookup indexes.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    gateways: BTreeMap<(String, String), Arc<Gateway>>,
    http_routes: BTreeMap<(String, String), Arc<HTTPRoute>>,
    services: BTreeMap<(String, String), Arc<Service>>,
    upstreams: BTreeMap<(String, String), Arc<Upstream>>,
    secrets: BTreeMap<(String, String), Arc<Secret>>,
    namespaces: BTreeMap<String, BTreeMap<String, String>>,
    listener_sets_by_parent: BTreeMap<ResourceKey, Vec<Arc<ListenerSet>>>,
    routes_by_parent: BTreeMap<ResourceKey, Vec<Arc<HTTPRoute>>>,
    tcp_routes_by_parent: BTreeMap<ResourceKey, Vec<Arc<TCPRoute>>>,
    grants_by_namespace: BTreeMap<(String, String), Vec<Arc<ReferenceGrant>>>,
}

fn lookup<T>(objects: &BTreeMap<(String, String), Arc<T>>, kind: &'static str, namespace: &str, name: &str) -> Result<Arc<T>, StoreError> {
    objects
        .get(&(namespace.to_owned(), name.to_owned()))
        .cloned()
        .ok_or_else(|| StoreError::NotFound { kind, key: ResourceKey::namespaced(name, namespace).to_string() })
}

impl ResourceStore for Snapshot {
    fn gateway(&self, namespace: &str, name: &str) -> Result<Arc<Gateway>, StoreError> {
        lookup(&self.gateways, "Gateway", namespace, name)
    }

    fn listener_sets_for_gateway(&self, gateway: &ResourceKey) -> Result<Vec<Arc<ListenerSet>>, StoreError> {
        Ok(self.listener_sets_by_parent.get(gateway).cloned().unwrap_or_default())
    }

    fn http_route(&self, namespace: &str, name: &str) -> Result<Arc<HTTPRoute>, StoreError> {
        lookup(&self.http_routes, "HTTPRoute", namespace, name)
    }

    fn http_routes(&self, namespace: Option<&str>) -> Result<Vec<Arc<HTTPRoute>>, StoreError> {
        Ok(self
            .http_routes
            .iter()
            .filter(|((route_namespace, _), _)| namespace.map_or(true, |namespace| namespace == route_namespace))
            .map(|(_, route)| Arc::clone(route))
            .collect())
    }

    fn http_routes_for_parent(&self, parent: &ResourceKey) -> Result<Vec<Arc<HTTPRoute>>, StoreError> {
        Ok(self.routes_by_parent.get(parent).cloned().unwrap_or_default())
    }

    fn tcp_routes_for_parent(&self, parent: &ResourceKey) -> Result<Vec<Arc<TCPRoute>>, StoreError> {
        Ok(self.tcp_routes_by_parent.get(parent).cloned().unwrap_or_default())
    }

    fn reference_grants(&self, namespace: &str, from_namespace: &str) -> Result<Vec<Arc<ReferenceGrant>>, StoreError> {
        Ok(self.grants_by_namespace.get(&(namespace.to_owned(), from_namespace.to_owned())).cloned().unwrap_or_default())
    }

    fn service(&self, namespace: &str, name: &str) -> Result<Arc<Service>, StoreError> {
        lookup(&self.services, "Service", namespace, name)
    }

    fn upstream(&self, namespace: &str, name: &str) -> Result<Arc<Upstream>, StoreError> {
        lookup(&self.upstreams, "Upstream", namespace, name)
    }

    fn secret(&self, namespace: &str, name: &str) -> Result<Arc<Secret>, StoreError> {
        lookup(&self.secrets, "Secret", namespace, name)
    }

    fn namespace_labels(&self, namespace: &str) -> Result<BTreeMap<String, String>, StoreError> {
        Ok(self.namespaces.get(namespace).cloned().unwrap_or_default())
    }
}
