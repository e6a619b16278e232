mod status;

use std::{collections::BTreeMap, fmt::Display};

pub use status::set_status_condition;

use crate::common::{
    api::{ParentReference, RouteGroupKind},
    ListenerOrigin, ResolveError, ResourceKey,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConditionType {
    Accepted,
    Programmed,
    ResolvedRefs,
    Conflicted,
    AttachedListenerSets,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionReason {
    Accepted,
    Programmed,
    ResolvedRefs,
    NoConflicts,
    Invalid,
    ListenersNotValid,
    UnsupportedProtocol,
    InvalidRouteKinds,
    ProtocolConflict,
    HostnameConflict,
    RefNotPermitted,
    InvalidCertificateRef,
    InvalidKind,
    BackendNotFound,
    NotAllowedByListeners,
    NoMatchingParent,
    NoMatchingListenerHostname,
    UnsupportedValue,
    NotAllowed,
    ListenerSetsAttached,
    NoListenerSetsAttached,
}

impl Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Display for ConditionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<&ResolveError> for ConditionReason {
    fn from(error: &ResolveError) -> Self {
        match error {
            ResolveError::MissingReferenceGrant { .. } | ResolveError::CyclicReference { .. } | ResolveError::WildcardNamespaceDisallowed(_) => {
                ConditionReason::RefNotPermitted
            },
            ResolveError::UnknownKind(_) => ConditionReason::InvalidKind,
            ResolveError::Store(_) | ResolveError::UnresolvedReference(_) => ConditionReason::BackendNotFound,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportCondition {
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    pub reason: ConditionReason,
    pub message: String,
}

impl ReportCondition {
    pub fn new(condition_type: ConditionType, status: ConditionStatus, reason: ConditionReason, message: impl Into<String>) -> Self {
        Self { condition_type, status, reason, message: message.into() }
    }

    pub fn resolve_error(error: &ResolveError) -> Self {
        Self::new(ConditionType::ResolvedRefs, ConditionStatus::False, ConditionReason::from(error), error.to_string())
    }

    pub fn not_accepted(reason: ConditionReason, message: impl Into<String>) -> Self {
        Self::new(ConditionType::Accepted, ConditionStatus::False, reason, message)
    }
}

/// Conditions keyed by type; setting a condition replaces any earlier one of the same type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Conditions(BTreeMap<ConditionType, ReportCondition>);

impl Conditions {
    pub fn set(&mut self, condition: ReportCondition) {
        self.0.insert(condition.condition_type, condition);
    }

    /// Sets the condition only when no condition of that type was recorded yet.
    pub fn set_if_absent(&mut self, condition: ReportCondition) {
        self.0.entry(condition.condition_type).or_insert(condition);
    }

    pub fn get(&self, condition_type: ConditionType) -> Option<&ReportCondition> {
        self.0.get(&condition_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReportCondition> {
        self.0.values()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListenerReport {
    pub supported_kinds: Vec<RouteGroupKind>,
    pub attached_routes: i32,
    pub conditions: Conditions,
}

/// Report for an object owning listeners, i.e. a Gateway or a ListenerSet.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListenerOwnerReport {
    pub conditions: Conditions,
    pub listeners: BTreeMap<String, ListenerReport>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteReport {
    pub parents: BTreeMap<ParentReference, Conditions>,
}

/// Everything observed about the objects touched by one translation.
#[derive(Clone, Debug, Default)]
pub struct ReportMap {
    gateways: BTreeMap<ResourceKey, ListenerOwnerReport>,
    listener_sets: BTreeMap<ResourceKey, ListenerOwnerReport>,
    routes: BTreeMap<ResourceKey, RouteReport>,
}

impl ReportMap {
    pub fn gateway(&mut self, key: &ResourceKey) -> &mut ListenerOwnerReport {
        self.gateways.entry(key.clone()).or_default()
    }

    pub fn listener_set(&mut self, key: &ResourceKey) -> &mut ListenerOwnerReport {
        self.listener_sets.entry(key.clone()).or_default()
    }

    pub fn listener_owner(&mut self, origin: &ListenerOrigin) -> &mut ListenerOwnerReport {
        match origin {
            ListenerOrigin::Gateway(key) => self.gateway(key),
            ListenerOrigin::ListenerSet(key) => self.listener_set(key),
        }
    }

    pub fn listener(&mut self, origin: &ListenerOrigin, name: &str) -> &mut ListenerReport {
        self.listener_owner(origin).listeners.entry(name.to_owned()).or_default()
    }

    pub fn route(&mut self, key: &ResourceKey) -> &mut RouteReport {
        self.routes.entry(key.clone()).or_default()
    }

    pub fn parent_ref(&mut self, route: &ResourceKey, parent_ref: &ParentReference) -> &mut Conditions {
        self.route(route).parents.entry(parent_ref.clone()).or_default()
    }

    pub fn gateway_report(&self, key: &ResourceKey) -> Option<&ListenerOwnerReport> {
        self.gateways.get(key)
    }

    pub fn listener_set_report(&self, key: &ResourceKey) -> Option<&ListenerOwnerReport> {
        self.listener_sets.get(key)
    }

    pub fn route_report(&self, key: &ResourceKey) -> Option<&RouteReport> {
        self.routes.get(key)
    }

    pub fn routes(&self) -> impl Iterator<Item = &ResourceKey> {
        self.routes.keys()
    }

    pub fn listener_sets(&self) -> impl Iterator<Item = &ResourceKey> {
        self.listener_sets.keys()
    }
}
