use kube_core::SelectorExt;
use std::{collections::BTreeSet, sync::Arc};

use kube_core::Selector;
use tracing::{debug, warn};

use super::HostnameMatchFilter;
use crate::{
    common::{
        api::{FromNamespaces, HTTPRoute, ParentReference, TCPRoute},
        Listener, ResourceKey, RouteRefKey, DEFAULT_GROUP_NAME, HTTP_ROUTE_KIND_NAME, TCP_ROUTE_KIND_NAME,
    },
    reports::{ConditionReason, ReportCondition, ReportMap},
    state::{ResourceStore, StoreError},
};

/// Route kinds attaching to listeners through parent references.
pub trait AttachableRoute {
    const KIND: &'static str;

    fn route_key(&self) -> ResourceKey;
    fn parent_refs(&self) -> &[ParentReference];
    fn hostnames(&self) -> &[String];
}

impl AttachableRoute for HTTPRoute {
    const KIND: &'static str = HTTP_ROUTE_KIND_NAME;

    fn route_key(&self) -> ResourceKey {
        ResourceKey::from(self)
    }

    fn parent_refs(&self) -> &[ParentReference] {
        self.spec.parent_refs.as_deref().unwrap_or_default()
    }

    fn hostnames(&self) -> &[String] {
        self.spec.hostnames.as_deref().unwrap_or_default()
    }
}

impl AttachableRoute for TCPRoute {
    const KIND: &'static str = TCP_ROUTE_KIND_NAME;

    fn route_key(&self) -> ResourceKey {
        ResourceKey::from(self)
    }

    fn parent_refs(&self) -> &[ParentReference] {
        self.spec.parent_refs.as_deref().unwrap_or_default()
    }

    fn hostnames(&self) -> &[String] {
        &[]
    }
}

/// A route accepted by a listener, with the hostnames it serves there.
#[derive(Clone, Debug)]
pub struct AttachedRoute<R = HTTPRoute> {
    pub route: Arc<R>,
    pub parent_ref: ParentReference,
    pub hostnames: Vec<String>,
}

/// Outcome of attaching one parent reference.
enum Attachment {
    /// Indexes of the accepting listeners with the hostnames served on each.
    Accepted(Vec<(usize, Vec<String>)>),
    Rejected(ReportCondition),
}

pub struct RouteListenerMatcher<'a, S> {
    store: &'a S,
    listeners: &'a [Listener],
}

impl<'a, S: ResourceStore> RouteListenerMatcher<'a, S> {
    pub fn new(store: &'a S, listeners: &'a [Listener]) -> Self {
        Self { store, listeners }
    }

    /// Attaches the HTTPRoutes of every listener owner (the Gateway and its accepted
    /// ListenerSets). The result is index aligned with the listeners; rejected parent
    /// references are recorded in `reports`.
    pub fn filter_matching_routes(&self, owners: &[ResourceKey], reports: &mut ReportMap) -> Result<Vec<Vec<AttachedRoute>>, StoreError> {
        self.attach(owners, reports, |owner| self.store.http_routes_for_parent(owner))
    }

    pub fn filter_matching_tcp_routes(
        &self,
        owners: &[ResourceKey],
        reports: &mut ReportMap,
    ) -> Result<Vec<Vec<AttachedRoute<TCPRoute>>>, StoreError> {
        self.attach(owners, reports, |owner| self.store.tcp_routes_for_parent(owner))
    }

    fn attach<R: AttachableRoute>(
        &self,
        owners: &[ResourceKey],
        reports: &mut ReportMap,
        routes_for_parent: impl Fn(&ResourceKey) -> Result<Vec<Arc<R>>, StoreError>,
    ) -> Result<Vec<Vec<AttachedRoute<R>>>, StoreError> {
        let mut attached: Vec<Vec<AttachedRoute<R>>> = self.listeners.iter().map(|_| vec![]).collect();
        for owner in owners {
            for route in routes_for_parent(owner)? {
                let route_key = route.route_key();
                let mut seen = BTreeSet::new();
                for parent_ref in route.parent_refs() {
                    let parent_key = RouteRefKey::from((parent_ref, route_key.namespace.as_str()));
                    if parent_key.resource_key != *owner || !seen.insert(parent_key.clone()) {
                        continue;
                    }
                    reports.parent_ref(&route_key, parent_ref);
                    match self.filter_matching_route(owner, route.as_ref(), &route_key, parent_ref)? {
                        Attachment::Accepted(matched) => {
                            for (index, hostnames) in matched {
                                let listener = &self.listeners[index];
                                reports.listener(listener.origin(), listener.name()).attached_routes += 1;
                                attached[index].push(AttachedRoute { route: Arc::clone(&route), parent_ref: parent_ref.clone(), hostnames });
                            }
                        },
                        Attachment::Rejected(condition) => {
                            debug!("Route {route_key} rejected by {owner}: {}", condition.message);
                            reports.parent_ref(&route_key, parent_ref).set(condition);
                        },
                    }
                }
            }
        }
        Ok(attached)
    }

    fn filter_matching_route<R: AttachableRoute>(
        &self,
        owner: &ResourceKey,
        route: &R,
        route_key: &ResourceKey,
        parent_ref: &ParentReference,
    ) -> Result<Attachment, StoreError> {
        let candidates: Vec<usize> =
            self.listeners.iter().enumerate().filter(|(_, l)| l.origin().resource_key() == owner).map(|(i, _)| i).collect();
        if candidates.is_empty() {
            return Ok(Attachment::Rejected(ReportCondition::not_accepted(
                ConditionReason::NoMatchingParent,
                format!("{owner} has no valid listeners"),
            )));
        }

        let route_labels = self.store.namespace_labels(&route_key.namespace)?;
        let allowed: Vec<usize> = candidates
            .into_iter()
            .filter(|i| {
                let listener = &self.listeners[*i];
                listener.accepts_kind(DEFAULT_GROUP_NAME, R::KIND) && is_namespace_allowed(listener, &route_key.namespace, &route_labels)
            })
            .collect();
        if allowed.is_empty() {
            return Ok(Attachment::Rejected(ReportCondition::not_accepted(
                ConditionReason::NotAllowedByListeners,
                format!("No listener of {owner} allows this route"),
            )));
        }

        let sectioned: Vec<usize> = allowed
            .into_iter()
            .filter(|i| {
                let listener = &self.listeners[*i];
                parent_ref.section_name.as_ref().map_or(true, |s| s == listener.name()) && parent_ref.port.map_or(true, |p| p == listener.port())
            })
            .collect();
        if sectioned.is_empty() {
            return Ok(Attachment::Rejected(ReportCondition::not_accepted(
                ConditionReason::NoMatchingParent,
                format!("No listener of {owner} matches section {:?} port {:?}", parent_ref.section_name, parent_ref.port),
            )));
        }

        let matched: Vec<(usize, Vec<String>)> = sectioned
            .into_iter()
            .filter_map(|i| {
                let listener = &self.listeners[i];
                HostnameMatchFilter::new(listener.hostname().map(String::as_str), route.hostnames()).intersect().map(|hostnames| (i, hostnames))
            })
            .collect();
        if matched.is_empty() {
            return Ok(Attachment::Rejected(ReportCondition::not_accepted(
                ConditionReason::NoMatchingListenerHostname,
                "No listener hostname matches the route hostnames",
            )));
        }
        Ok(Attachment::Accepted(matched))
    }
}

fn is_namespace_allowed(listener: &Listener, route_namespace: &str, route_labels: &std::collections::BTreeMap<String, String>) -> bool {
    let owner_namespace = &listener.origin().resource_key().namespace;
    let namespaces = listener.data().allowed_routes.as_ref().and_then(|ar| ar.namespaces.as_ref());
    match namespaces.and_then(|n| n.from).unwrap_or(FromNamespaces::Same) {
        FromNamespaces::All => true,
        FromNamespaces::Same => route_namespace == owner_namespace,
        FromNamespaces::None => false,
        FromNamespaces::Selector => match namespaces.and_then(|n| n.selector.clone()) {
            Some(selector) => match Selector::try_from(selector) {
                Ok(selector) => selector.matches(route_labels),
                Err(e) => {
                    warn!("Invalid namespace selector on listener {}: {e}", listener.name());
                    false
                },
            },
            None => false,
        },
    }
}
