mod hostname_match_filter;
mod route_listener_matcher;

use std::{collections::BTreeSet, sync::Arc};

pub use hostname_match_filter::HostnameMatchFilter;
use kube::ResourceExt;
pub use route_listener_matcher::{AttachableRoute, AttachedRoute, RouteListenerMatcher};
use tracing::{debug, warn};

use crate::{
    common::{
        api::{HTTPRoute, ParentReference},
        configuration::DelegationPolicy,
        BackendMap, BackendObject, BackendRefKey, ResolveError, ResourceKey, DEFAULT_GROUP_NAME, HTTP_ROUTE_KIND_NAME,
        WILDCARD_NAMESPACE, WILDCARD_ROUTE_NAME,
    },
    references_resolver::{FromResourceKey, ReferenceResolver},
    state::{ResourceStore, StoreError},
};

/// A route together with everything it references, resolved against one snapshot.
/// Delegated children are owned by their parent; a route reached through several
/// parents appears once under each of them.
#[derive(Clone, Debug)]
pub struct RouteInfo {
    pub object: Arc<HTTPRoute>,
    pub key: ResourceKey,
    /// The gateway reference for a root route, the delegating route for a child.
    pub parent_ref: ParentReference,
    /// The gateway reference the whole chain hangs off.
    pub listener_parent_ref: ParentReference,
    pub hostname_overrides: Option<Vec<String>>,
    pub backends: BackendMap<BackendObject>,
    pub children: BackendMap<Vec<RouteInfo>>,
}

impl RouteInfo {
    pub fn namespace(&self) -> &str {
        &self.key.namespace
    }

    pub fn hostnames(&self) -> Vec<String> {
        self.hostname_overrides.clone().unwrap_or_else(|| self.object.spec.hostnames.clone().unwrap_or_default())
    }

    pub fn unique_route_name(&self, rule_index: usize, match_index: usize) -> String {
        format!("{}-{}-{}-{rule_index}-{match_index}", self.key.kind.to_lowercase(), self.key.name, self.key.namespace)
    }

    /// The reference recorded on children delegated from this route.
    pub fn as_parent_ref(&self) -> ParentReference {
        ParentReference {
            group: Some(DEFAULT_GROUP_NAME.to_owned()),
            kind: Some(HTTP_ROUTE_KIND_NAME.to_owned()),
            namespace: Some(self.key.namespace.clone()),
            name: self.key.name.clone(),
            section_name: None,
            port: None,
        }
    }
}

pub struct RoutesResolver<'a, S> {
    store: &'a S,
    references: ReferenceResolver<'a, S>,
    policy: &'a DelegationPolicy,
}

impl<'a, S: ResourceStore> RoutesResolver<'a, S> {
    pub fn new(store: &'a S, policy: &'a DelegationPolicy) -> Self {
        Self { store, references: ReferenceResolver::new(store), policy }
    }

    /// Resolves a route attached to a listener and, recursively, every route it delegates to.
    pub fn route_chain(&self, route: &Arc<HTTPRoute>, hostnames: Option<Vec<String>>, listener_parent_ref: &ParentReference) -> RouteInfo {
        let mut visited = BTreeSet::new();
        self.resolve(route, hostnames, listener_parent_ref.clone(), listener_parent_ref, &mut visited)
    }

    fn resolve(
        &self,
        route: &Arc<HTTPRoute>,
        hostname_overrides: Option<Vec<String>>,
        parent_ref: ParentReference,
        listener_parent_ref: &ParentReference,
        visited: &mut BTreeSet<ResourceKey>,
    ) -> RouteInfo {
        let key = ResourceKey::from(route.as_ref());
        visited.insert(key.clone());

        let mut info = RouteInfo {
            object: Arc::clone(route),
            key: key.clone(),
            parent_ref,
            listener_parent_ref: listener_parent_ref.clone(),
            hostname_overrides,
            backends: BackendMap::default(),
            children: BackendMap::default(),
        };

        let from = FromResourceKey::http_route(&key.namespace);
        let backend_refs: BTreeSet<BackendRefKey> = route
            .spec
            .rules
            .iter()
            .flatten()
            .flat_map(|rule| rule.backend_refs.iter().flatten())
            .map(|backend_ref| BackendRefKey::new(backend_ref, &key.namespace))
            .collect();

        for backend_ref in backend_refs {
            if !backend_ref.is_delegation() {
                match self.references.resolve_backend(&from, &backend_ref) {
                    Ok(backend) => info.backends.add(backend_ref, backend),
                    Err(e) => {
                        debug!("Unable to resolve {backend_ref} for {key}: {e}");
                        info.backends.add_error(backend_ref, e);
                    },
                }
                continue;
            }

            let child_routes = match self.fetch_child_routes(&backend_ref) {
                Ok(child_routes) => child_routes,
                Err(e) => {
                    warn!("Unable to resolve delegation {backend_ref} for {key}: {e}");
                    info.children.add_error(backend_ref, e);
                    continue;
                },
            };

            let parent_for_children = info.as_parent_ref();
            let mut children = vec![];
            for child in child_routes {
                let child_key = ResourceKey::from(child.as_ref());
                if visited.contains(&child_key) {
                    warn!("Delegation cycle {key} -> {child_key}");
                    info.children.add_error(backend_ref.clone(), ResolveError::CyclicReference { parent: key.clone(), child: child_key });
                    continue;
                }
                children.push(self.resolve(&child, None, parent_for_children.clone(), listener_parent_ref, visited));
            }
            info.children.add(backend_ref, children);
        }

        visited.remove(&key);
        info
    }

    /// Routes selected by a delegating backend reference. An empty or `*` name selects
    /// every route in the namespace, including the selecting route itself.
    fn fetch_child_routes(&self, backend_ref: &BackendRefKey) -> Result<Vec<Arc<HTTPRoute>>, ResolveError> {
        let wildcard_name = backend_ref.name.is_empty() || backend_ref.name == WILDCARD_ROUTE_NAME;
        let routes = if backend_ref.namespace == WILDCARD_NAMESPACE {
            if !self.policy.allow_wildcard_namespace {
                return Err(ResolveError::WildcardNamespaceDisallowed(backend_ref.to_string()));
            }
            self.store.http_routes(None)?.into_iter().filter(|r| wildcard_name || r.name_any() == backend_ref.name).collect()
        } else if wildcard_name {
            self.store.http_routes(Some(&backend_ref.namespace))?
        } else {
            match self.store.http_route(&backend_ref.namespace, &backend_ref.name) {
                Ok(route) => vec![route],
                Err(StoreError::NotFound { .. }) => vec![],
                Err(e) => return Err(e.into()),
            }
        };

        if routes.is_empty() {
            Err(ResolveError::UnresolvedReference(backend_ref.to_string()))
        } else {
            Ok(routes)
        }
    }
}
