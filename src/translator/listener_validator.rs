use kube_core::SelectorExt;
use std::collections::{BTreeMap, BTreeSet};

use kube::ResourceExt;
use kube_core::Selector;
use tracing::{debug, info, warn};

use crate::{
    common::{
        api::{FromNamespaces, Gateway, GatewayListener, ListenerSet},
        Listener, ListenerOrigin, ResourceKey, DEFAULT_NAMESPACE_NAME,
    },
    reports::{ConditionReason, ConditionStatus, ConditionType, ReportCondition, ReportMap},
    state::{ResourceStore, StoreError},
};

/// Listeners that survived validation, in declaration order, and the objects owning them.
#[derive(Clone, Debug, Default)]
pub struct ValidatedListeners {
    pub listeners: Vec<Listener>,
    /// The Gateway followed by every ListenerSet it accepted.
    pub owners: Vec<ResourceKey>,
}

pub struct ListenerValidator<'a, S> {
    store: &'a S,
    gateway: &'a Gateway,
}

fn not_programmed(message: impl Into<String>) -> ReportCondition {
    ReportCondition::new(ConditionType::Programmed, ConditionStatus::False, ConditionReason::Invalid, message)
}

fn conflicted(reason: ConditionReason, message: impl Into<String>) -> ReportCondition {
    ReportCondition::new(ConditionType::Conflicted, ConditionStatus::True, reason, message)
}

impl<'a, S: ResourceStore> ListenerValidator<'a, S> {
    pub fn new(store: &'a S, gateway: &'a Gateway) -> Self {
        Self { store, gateway }
    }

    pub fn validate(&self, reports: &mut ReportMap) -> Result<ValidatedListeners, StoreError> {
        let gateway_key = ResourceKey::from(self.gateway);
        let mut declared: Vec<(&GatewayListener, ListenerOrigin)> =
            self.gateway.spec.listeners.iter().map(|l| (l, ListenerOrigin::Gateway(gateway_key.clone()))).collect();

        let mut listener_sets = self.store.listener_sets_for_gateway(&gateway_key)?;
        listener_sets.sort_by_key(|set| ResourceKey::from(set.as_ref()));
        let mut owners = vec![gateway_key.clone()];
        for listener_set in &listener_sets {
            let key = ResourceKey::from(listener_set.as_ref());
            if self.is_listener_set_allowed(listener_set)? {
                declared.extend(listener_set.spec.listeners.iter().map(|l| (l, ListenerOrigin::ListenerSet(key.clone()))));
                owners.push(key);
            } else {
                info!("Gateway {gateway_key} does not allow listeners from {key}");
                let report = reports.listener_set(&key);
                report.conditions.set(ReportCondition::not_accepted(ConditionReason::NotAllowed, format!("{gateway_key} does not allow this ListenerSet")));
                report.conditions.set(not_programmed("ListenerSet is not allowed"));
            }
        }

        let parsed = Self::parse(declared, reports);
        let listeners = self.detect_conflicts(parsed, reports);

        let contributing: BTreeSet<&ResourceKey> = listeners
            .iter()
            .filter_map(|l| match l.origin() {
                ListenerOrigin::ListenerSet(key) => Some(key),
                ListenerOrigin::Gateway(_) => None,
            })
            .collect();
        for key in owners.iter().skip(1).filter(|key| !contributing.contains(key)) {
            let report = reports.listener_set(key);
            report.conditions.set(ReportCondition::not_accepted(ConditionReason::ListenersNotValid, "No valid listeners"));
            report.conditions.set(not_programmed("No valid listeners"));
        }

        let gateway_report = reports.gateway(&gateway_key);
        if !contributing.is_empty() {
            gateway_report.conditions.set(ReportCondition::new(
                ConditionType::AttachedListenerSets,
                ConditionStatus::True,
                ConditionReason::ListenerSetsAttached,
                "",
            ));
        } else if !listener_sets.is_empty() {
            gateway_report.conditions.set(ReportCondition::new(
                ConditionType::AttachedListenerSets,
                ConditionStatus::False,
                ConditionReason::NoListenerSetsAttached,
                "",
            ));
        }
        if listeners.is_empty() {
            warn!("Gateway {gateway_key} has no valid listeners");
            gateway_report.conditions.set(ReportCondition::not_accepted(ConditionReason::ListenersNotValid, "No valid listeners"));
            gateway_report.conditions.set(not_programmed("No valid listeners"));
        }

        Ok(ValidatedListeners { listeners, owners })
    }

    fn is_listener_set_allowed(&self, listener_set: &ListenerSet) -> Result<bool, StoreError> {
        let gateway_namespace = self.gateway.namespace().unwrap_or(DEFAULT_NAMESPACE_NAME.to_owned());
        let set_namespace = listener_set.namespace().unwrap_or(DEFAULT_NAMESPACE_NAME.to_owned());
        let namespaces = self.gateway.spec.allowed_listeners.as_ref().and_then(|al| al.namespaces.as_ref());
        Ok(match namespaces.and_then(|n| n.from).unwrap_or(FromNamespaces::None) {
            FromNamespaces::All => true,
            FromNamespaces::Same => set_namespace == gateway_namespace,
            FromNamespaces::None => false,
            FromNamespaces::Selector => match namespaces.and_then(|n| n.selector.clone()).map(Selector::try_from) {
                Some(Ok(selector)) => selector.matches(&self.store.namespace_labels(&set_namespace)?),
                Some(Err(e)) => {
                    warn!("Invalid allowedListeners selector: {e}");
                    false
                },
                None => false,
            },
        })
    }

    /// Parses protocols and route kinds; listeners failing either are reported and dropped.
    fn parse(declared: Vec<(&GatewayListener, ListenerOrigin)>, reports: &mut ReportMap) -> Vec<Listener> {
        declared
            .into_iter()
            .filter_map(|(gateway_listener, origin)| {
                let listener_report = reports.listener(&origin, &gateway_listener.name);
                match Listener::try_from((gateway_listener, origin.clone())) {
                    Ok(listener) => {
                        listener_report.supported_kinds = listener.supported_kinds().to_vec();
                        if listener.data().has_invalid_kinds {
                            debug!("Listener {} has invalid route kinds", listener.name());
                            listener_report.conditions.set(ReportCondition::new(
                                ConditionType::ResolvedRefs,
                                ConditionStatus::False,
                                ConditionReason::InvalidRouteKinds,
                                "Invalid route kinds",
                            ));
                            listener_report.conditions.set(not_programmed("Invalid route kinds"));
                            None
                        } else {
                            Some(listener)
                        }
                    },
                    Err(e) => {
                        debug!("Listener {} rejected: {e}", gateway_listener.name);
                        listener_report.conditions.set(ReportCondition::not_accepted(ConditionReason::UnsupportedProtocol, e.to_string()));
                        listener_report.conditions.set(not_programmed(e.to_string()));
                        None
                    },
                }
            })
            .collect()
    }

    /// Buckets listeners by declared port and drops every listener involved in a protocol
    /// or hostname conflict. Declaration order is kept.
    fn detect_conflicts(&self, listeners: Vec<Listener>, reports: &mut ReportMap) -> Vec<Listener> {
        let mut buckets: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
        for (index, listener) in listeners.iter().enumerate() {
            buckets.entry(listener.port()).or_default().push(index);
        }

        let mut conflicting: BTreeMap<usize, ConditionReason> = BTreeMap::new();
        for (port, indexes) in buckets {
            let classes: BTreeSet<_> = indexes.iter().map(|i| listeners[*i].protocol().port_class()).collect();
            if classes.len() > 1 {
                warn!("Protocol conflict on port {port} {classes:?}");
                for i in indexes {
                    conflicting.insert(i, ConditionReason::ProtocolConflict);
                }
                continue;
            }

            let mut by_hostname: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
            for i in &indexes {
                by_hostname.entry(listeners[*i].effective_hostname()).or_default().push(*i);
            }
            for (hostname, sharing) in by_hostname.into_iter().filter(|(_, sharing)| sharing.len() > 1) {
                warn!("Hostname conflict on port {port} for {hostname}");
                for i in sharing {
                    conflicting.insert(i, ConditionReason::HostnameConflict);
                }
            }
        }

        for (i, reason) in &conflicting {
            let listener = &listeners[*i];
            let listener_report = reports.listener(listener.origin(), listener.name());
            listener_report.conditions.set(conflicted(*reason, format!("{reason} on port {}", listener.port())));
            listener_report.conditions.set(not_programmed(reason.to_string()));
        }

        listeners.into_iter().enumerate().filter(|(i, _)| !conflicting.contains_key(i)).map(|(_, listener)| listener).collect()
    }
}
