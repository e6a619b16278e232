use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

use super::{ConditionReason, ConditionStatus, ConditionType, Conditions, ListenerOwnerReport, ListenerReport, ReportCondition, ReportMap};
use crate::common::{
    api::{
        Gateway, GatewayListener, GatewayStatus, HTTPRoute, HTTPRouteStatus, ListenerEntryStatus, ListenerSet, ListenerSetStatus,
        ListenerStatus, ParentReference, RouteParentStatus, TCPRoute, TCPRouteStatus,
    },
    ResourceKey,
};

const OWNER_TYPES: [ConditionType; 2] = [ConditionType::Accepted, ConditionType::Programmed];
const LISTENER_TYPES: [ConditionType; 4] =
    [ConditionType::Accepted, ConditionType::Conflicted, ConditionType::ResolvedRefs, ConditionType::Programmed];
const PARENT_REF_TYPES: [ConditionType; 2] = [ConditionType::Accepted, ConditionType::ResolvedRefs];

fn default_condition(condition_type: ConditionType) -> ReportCondition {
    match condition_type {
        ConditionType::Accepted => ReportCondition::new(condition_type, ConditionStatus::True, ConditionReason::Accepted, ""),
        ConditionType::Programmed => ReportCondition::new(condition_type, ConditionStatus::True, ConditionReason::Programmed, ""),
        ConditionType::ResolvedRefs => ReportCondition::new(condition_type, ConditionStatus::True, ConditionReason::ResolvedRefs, ""),
        ConditionType::Conflicted => ReportCondition::new(condition_type, ConditionStatus::False, ConditionReason::NoConflicts, ""),
        ConditionType::AttachedListenerSets => {
            ReportCondition::new(condition_type, ConditionStatus::False, ConditionReason::NoListenerSetsAttached, "")
        },
    }
}

/// Upserts `new` by type. `lastTransitionTime` moves only when status or reason change.
pub fn set_status_condition(conditions: &mut Vec<Condition>, new: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == new.type_) {
        Some(existing) => {
            if existing.status != new.status || existing.reason != new.reason {
                existing.last_transition_time = new.last_transition_time;
            }
            existing.status = new.status;
            existing.reason = new.reason;
            existing.message = new.message;
            existing.observed_generation = new.observed_generation;
        },
        None => conditions.push(new),
    }
}

fn to_condition(condition: &ReportCondition, generation: Option<i64>, now: &Time) -> Condition {
    Condition {
        last_transition_time: now.clone(),
        message: condition.message.clone(),
        observed_generation: generation,
        reason: condition.reason.to_string(),
        status: condition.status.to_string(),
        type_: condition.condition_type.to_string(),
    }
}

/// Seeds the previously persisted conditions, then applies the reported ones or the
/// defaults for every owned type. Conditions of other types are left untouched.
fn reconcile(old: &[Condition], reported: &Conditions, owned: &[ConditionType], generation: Option<i64>, now: &Time) -> Vec<Condition> {
    let mut conditions = old.to_vec();
    for condition_type in owned {
        let condition = reported.get(*condition_type).cloned().unwrap_or_else(|| default_condition(*condition_type));
        set_status_condition(&mut conditions, to_condition(&condition, generation, now));
    }
    conditions
}

fn listener_conditions(old: &[Condition], report: &ListenerReport, generation: Option<i64>, now: &Time) -> Vec<Condition> {
    reconcile(old, &report.conditions, &LISTENER_TYPES, generation, now)
}

fn owner_conditions(old: &[Condition], report: &ListenerOwnerReport, generation: Option<i64>, now: &Time) -> Vec<Condition> {
    let mut conditions = reconcile(old, &report.conditions, &OWNER_TYPES, generation, now);
    let attached = ConditionType::AttachedListenerSets.to_string();
    match report.conditions.get(ConditionType::AttachedListenerSets) {
        Some(condition) => set_status_condition(&mut conditions, to_condition(condition, generation, now)),
        None => conditions.retain(|c| c.type_ != attached),
    }
    conditions
}

fn listener_report<'a>(report: &'a ListenerOwnerReport, listener: &GatewayListener, empty: &'a ListenerReport) -> &'a ListenerReport {
    report.listeners.get(&listener.name).unwrap_or(empty)
}

impl ReportMap {
    pub fn build_gateway_status(&self, gateway: &Gateway, now: &Time) -> GatewayStatus {
        let key = ResourceKey::from(gateway);
        let generation = gateway.metadata.generation;
        let old = gateway.status.clone().unwrap_or_default();
        let empty_owner = ListenerOwnerReport::default();
        let report = self.gateway_report(&key).unwrap_or(&empty_owner);
        let empty_listener = ListenerReport::default();

        let old_listeners = old.listeners.unwrap_or_default();
        let listeners = gateway
            .spec
            .listeners
            .iter()
            .map(|listener| {
                let listener_report = listener_report(report, listener, &empty_listener);
                let old_conditions = old_listeners.iter().find(|l| l.name == listener.name).map(|l| l.conditions.as_slice()).unwrap_or_default();
                ListenerStatus {
                    name: listener.name.clone(),
                    supported_kinds: listener_report.supported_kinds.clone(),
                    attached_routes: listener_report.attached_routes,
                    conditions: listener_conditions(old_conditions, listener_report, generation, now),
                }
            })
            .collect();

        GatewayStatus {
            conditions: Some(owner_conditions(&old.conditions.unwrap_or_default(), report, generation, now)),
            listeners: Some(listeners),
        }
    }

    pub fn build_listener_set_status(&self, listener_set: &ListenerSet, now: &Time) -> ListenerSetStatus {
        let key = ResourceKey::from(listener_set);
        let generation = listener_set.metadata.generation;
        let old = listener_set.status.clone().unwrap_or_default();
        let empty_owner = ListenerOwnerReport::default();
        let report = self.listener_set_report(&key).unwrap_or(&empty_owner);
        let empty_listener = ListenerReport::default();

        let old_listeners = old.listeners.unwrap_or_default();
        let listeners = listener_set
            .spec
            .listeners
            .iter()
            .map(|listener| {
                let listener_report = listener_report(report, listener, &empty_listener);
                let old_conditions = old_listeners.iter().find(|l| l.name == listener.name).map(|l| l.conditions.as_slice()).unwrap_or_default();
                ListenerEntryStatus {
                    name: listener.name.clone(),
                    port: listener.port,
                    supported_kinds: listener_report.supported_kinds.clone(),
                    attached_routes: listener_report.attached_routes,
                    conditions: listener_conditions(old_conditions, listener_report, generation, now),
                }
            })
            .collect();

        ListenerSetStatus {
            conditions: Some(reconcile(&old.conditions.unwrap_or_default(), &report.conditions, &OWNER_TYPES, generation, now)),
            listeners: Some(listeners),
        }
    }

    /// Builds the route status for this controller. Parent statuses written by other
    /// controllers are kept as they are.
    pub fn build_route_status(&self, route: &HTTPRoute, controller_name: &str, now: &Time) -> HTTPRouteStatus {
        let old = route.status.clone().unwrap_or_default();
        let parents = self.route_parents(
            &ResourceKey::from(route),
            route.metadata.generation,
            route.spec.parent_refs.as_deref().unwrap_or_default(),
            &old.parents,
            controller_name,
            now,
        );
        HTTPRouteStatus { parents }
    }

    pub fn build_tcp_route_status(&self, route: &TCPRoute, controller_name: &str, now: &Time) -> TCPRouteStatus {
        let old = route.status.clone().unwrap_or_default();
        let parents = self.route_parents(
            &ResourceKey::from(route),
            route.metadata.generation,
            route.spec.parent_refs.as_deref().unwrap_or_default(),
            &old.parents,
            controller_name,
            now,
        );
        TCPRouteStatus { parents }
    }

    /// Declared parent references come first in declaration order, followed by the
    /// reported ones the route does not declare, such as delegating routes.
    fn route_parents(
        &self,
        key: &ResourceKey,
        generation: Option<i64>,
        declared: &[ParentReference],
        old_parents: &[RouteParentStatus],
        controller_name: &str,
        now: &Time,
    ) -> Vec<RouteParentStatus> {
        let empty = Conditions::default();
        let Some(report) = self.route_report(key) else {
            return old_parents.iter().filter(|p| p.controller_name != controller_name).cloned().collect();
        };

        let parent_refs = declared
            .iter()
            .filter(|r| report.parents.contains_key(*r))
            .chain(report.parents.keys().filter(|r| !declared.contains(*r)));

        let mut parents: Vec<RouteParentStatus> = parent_refs
            .map(|parent_ref| {
                let reported = report.parents.get(parent_ref).unwrap_or(&empty);
                let old_conditions = old_parents
                    .iter()
                    .find(|p| p.controller_name == controller_name && p.parent_ref == *parent_ref)
                    .map(|p| p.conditions.as_slice())
                    .unwrap_or_default();
                RouteParentStatus {
                    parent_ref: parent_ref.clone(),
                    controller_name: controller_name.to_owned(),
                    conditions: reconcile(old_conditions, reported, &PARENT_REF_TYPES, generation, now),
                }
            })
            .collect();

        parents.extend(old_parents.iter().filter(|p| p.controller_name != controller_name).cloned());
        parents
    }
}
