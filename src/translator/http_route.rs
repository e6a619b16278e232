use tracing::debug;

use super::{
    delegation::{declared_parent_ref, declares_parent_refs, delegated_rules, DelegatedRule, DelegationMode},
    model::{OutputRoute, RouteAction, WeightedDestination},
};
use crate::{
    common::{api::ParentReference, BackendRefKey, NormalizedMatch, BLACKHOLE_CLUSTER_NAME},
    reports::{ConditionReason, ReportCondition, ReportMap},
    routes_resolver::RouteInfo,
};

const NO_BACKENDS_STATUS: u16 = 500;

/// Flattens a resolved route tree into output routes, recording resolution problems
/// against the parent reference each route was reached through.
pub struct HTTPRouteTranslator<'a> {
    reports: &'a mut ReportMap,
}

impl<'a> HTTPRouteTranslator<'a> {
    pub fn new(reports: &'a mut ReportMap) -> Self {
        Self { reports }
    }

    /// Output routes for a route attached to a listener, most specific first.
    pub fn translate(&mut self, info: &RouteInfo) -> Vec<OutputRoute> {
        let rules: Vec<DelegatedRule<'_>> = info
            .object
            .spec
            .rules
            .iter()
            .flatten()
            .enumerate()
            .map(|(rule_index, rule)| {
                let matches: Vec<NormalizedMatch> = rule.matches.iter().flatten().map(NormalizedMatch::from).collect();
                let matches = if matches.is_empty() { vec![NormalizedMatch::default()] } else { matches };
                DelegatedRule { rule_index, rule, matches: matches.into_iter().enumerate().collect() }
            })
            .collect();

        let mut routes = vec![];
        self.translate_rules(info, &info.parent_ref, None, &rules, &mut routes);
        routes.sort_by(OutputRoute::compare_matching);
        routes.dedup_by(|a, b| a.name == b.name && a.matcher == b.matcher);
        routes
    }

    /// Delegated routes are named after the output route of the parent rule they were
    /// reached through, so a route shared by several parents gets one name per parent.
    fn translate_rules(
        &mut self,
        info: &RouteInfo,
        report_ref: &ParentReference,
        name_prefix: Option<&str>,
        rules: &[DelegatedRule<'_>],
        routes: &mut Vec<OutputRoute>,
    ) {
        self.report_resolution(info, report_ref);
        let route_name = |rule_index: usize, match_index: usize| match name_prefix {
            Some(prefix) => format!("{prefix}/{}", info.unique_route_name(rule_index, match_index)),
            None => info.unique_route_name(rule_index, match_index),
        };
        let namespace = info.namespace();

        for DelegatedRule { rule_index, rule, matches } in rules {
            let backend_refs = rule.backend_refs.as_deref().unwrap_or_default();
            let (delegations, destinations): (Vec<_>, Vec<_>) =
                backend_refs.iter().map(|br| (BackendRefKey::new(br, namespace), br.weight.unwrap_or(1))).partition(|(key, _)| key.is_delegation());

            if !delegations.is_empty() {
                if !destinations.is_empty() {
                    debug!("Route {}: rule {rule_index} delegates; ignoring its {} destination(s)", info.key, destinations.len());
                }
                for (match_index, parent_match) in matches {
                    let parent_route_name = route_name(*rule_index, *match_index);
                    for (key, _) in &delegations {
                        for child in info.children.item(key).into_iter().flatten() {
                            self.translate_child(info, child, &parent_route_name, parent_match, routes);
                        }
                    }
                }
                continue;
            }

            let action = if destinations.is_empty() {
                RouteAction::DirectResponse { status: NO_BACKENDS_STATUS }
            } else {
                let weighted: Vec<WeightedDestination> = destinations
                    .iter()
                    .map(|(key, weight)| WeightedDestination {
                        cluster_name: info.backends.item(key).map_or(BLACKHOLE_CLUSTER_NAME.to_owned(), |backend| backend.cluster_name(key.port)),
                        weight: *weight,
                    })
                    .collect();
                if weighted.iter().all(|d| d.cluster_name == BLACKHOLE_CLUSTER_NAME) {
                    RouteAction::Blackhole
                } else {
                    RouteAction::Forward(weighted)
                }
            };

            for (match_index, matcher) in matches {
                routes.push(OutputRoute { name: route_name(*rule_index, *match_index), matcher: matcher.clone(), action: action.clone() });
            }
        }
    }

    fn translate_child(
        &mut self,
        parent: &RouteInfo,
        child: &RouteInfo,
        parent_route_name: &str,
        parent_match: &NormalizedMatch,
        routes: &mut Vec<OutputRoute>,
    ) {
        let mode = DelegationMode::from_route(&child.object);
        let report_ref = match declared_parent_ref(&child.object, child.namespace(), &parent.key) {
            Some(declared) => declared.clone(),
            None if mode == DelegationMode::Match && declares_parent_refs(&child.object) => {
                debug!("Route {} does not accept {} as its parent", child.key, parent.key);
                return;
            },
            None => child.parent_ref.clone(),
        };

        if child.object.spec.hostnames.as_ref().is_some_and(|h| !h.is_empty()) {
            debug!("Delegated route {} declares hostnames", child.key);
            self.reports.parent_ref(&child.key, &report_ref).set(ReportCondition::not_accepted(
                ConditionReason::UnsupportedValue,
                "Delegated routes must not declare hostnames",
            ));
            return;
        }

        let rules = delegated_rules(&child.object, mode, parent_match);
        if rules.is_empty() {
            debug!("Route {} has no rule matching {parent_match} of {}", child.key, parent.key);
            self.reports.parent_ref(&child.key, &report_ref);
            return;
        }
        self.translate_rules(child, &report_ref, Some(parent_route_name), &rules, routes);
    }

    fn report_resolution(&mut self, info: &RouteInfo, report_ref: &ParentReference) {
        let conditions = self.reports.parent_ref(&info.key, report_ref);
        for (key, error) in info.backends.errors().chain(info.children.errors()) {
            debug!("Route {}: {key} not resolved: {error}", info.key);
            conditions.set_if_absent(ReportCondition::resolve_error(error));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        common::{
            api::HTTPRoute,
            configuration::DelegationPolicy,
            test::{http_route, service},
            ResourceKey,
        },
        reports::ConditionType,
        routes_resolver::RoutesResolver,
        state::{ResourceStore, State},
    };

    fn gateway_ref() -> ParentReference {
        ParentReference { name: "gateway".to_owned(), namespace: Some("infra".to_owned()), ..Default::default() }
    }

    fn translate(state: &State, namespace: &str, name: &str, reports: &mut ReportMap) -> Vec<OutputRoute> {
        let snapshot = state.snapshot().unwrap();
        let policy = DelegationPolicy::default();
        let route = snapshot.http_route(namespace, name).unwrap();
        let info = RoutesResolver::new(&snapshot, &policy).route_chain(&route, None, &gateway_ref());
        HTTPRouteTranslator::new(reports).translate(&info)
    }

    fn parent_route() -> HTTPRoute {
        http_route(
            r"
metadata:
  name: parent
  namespace: apps
spec:
  rules:
  - matches:
    - path:
        type: PathPrefix
        value: /api
      headers:
      - name: env
        value: prod
    backendRefs:
    - group: gateway.networking.k8s.io
      kind: HTTPRoute
      name: '*'
      namespace: team
",
        )
    }

    #[test]
    fn test_direct_routes() {
        let state = State::new();
        state.save_service(&Arc::new(service("backend", "apps"))).unwrap();
        state
            .save_http_route(&Arc::new(http_route(
                r"
metadata:
  name: route
  namespace: apps
spec:
  rules:
  - backendRefs:
    - name: backend
      port: 8080
      weight: 3
    - name: missing
      port: 8080
  - matches:
    - path:
        type: Exact
        value: /health
  - matches:
    - path:
        value: /gone
    backendRefs:
    - name: missing
",
            )))
            .unwrap();
        let mut reports = ReportMap::default();
        let routes = translate(&state, "apps", "route", &mut reports);

        assert_eq!(routes.len(), 3);
        assert_eq!(routes[0].name, "httproute-route-apps-1-0");
        assert_eq!(routes[0].action, RouteAction::DirectResponse { status: 500 });
        assert_eq!(routes[1].name, "httproute-route-apps-2-0");
        assert_eq!(routes[1].action, RouteAction::Blackhole);
        assert_eq!(routes[2].matcher, NormalizedMatch::default());
        assert_eq!(
            routes[2].action,
            RouteAction::Forward(vec![
                WeightedDestination { cluster_name: "backend.apps:8080".to_owned(), weight: 3 },
                WeightedDestination { cluster_name: BLACKHOLE_CLUSTER_NAME.to_owned(), weight: 1 },
            ])
        );
        let conditions = reports.route_report(&ResourceKey::http_route("route", "apps")).unwrap().parents.get(&gateway_ref()).unwrap();
        assert_eq!(conditions.get(ConditionType::ResolvedRefs).map(|c| c.reason), Some(ConditionReason::BackendNotFound));
    }

    #[test]
    fn test_match_mode_delegation() {
        let state = State::new();
        state.save_service(&Arc::new(service("backend", "team"))).unwrap();
        state.save_http_route(&Arc::new(parent_route())).unwrap();
        state
            .save_http_route(&Arc::new(http_route(
                r"
metadata:
  name: narrow
  namespace: team
spec:
  rules:
  - matches:
    - path:
        value: /api/v1
      headers:
      - name: env
        value: prod
    - path:
        value: /api/v2
    backendRefs:
    - name: backend
      port: 80
",
            )))
            .unwrap();
        state
            .save_http_route(&Arc::new(http_route(
                r"
metadata:
  name: with-hostnames
  namespace: team
spec:
  hostnames:
  - foo.example.com
  rules:
  - backendRefs:
    - name: backend
",
            )))
            .unwrap();
        let mut reports = ReportMap::default();
        let routes = translate(&state, "apps", "parent", &mut reports);

        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].name, "httproute-parent-apps-0-0/httproute-narrow-team-0-0");
        assert_eq!(routes[0].matcher.path.value, "/api/v1");

        let child_ref = ParentReference {
            group: Some("gateway.networking.k8s.io".to_owned()),
            kind: Some("HTTPRoute".to_owned()),
            namespace: Some("apps".to_owned()),
            name: "parent".to_owned(),
            ..Default::default()
        };
        let rejected = reports.route_report(&ResourceKey::http_route("with-hostnames", "team")).unwrap().parents.get(&child_ref).unwrap();
        assert_eq!(rejected.get(ConditionType::Accepted).map(|c| c.reason), Some(ConditionReason::UnsupportedValue));
        assert!(reports.route_report(&ResourceKey::http_route("narrow", "team")).unwrap().parents.contains_key(&child_ref));
    }

    #[test]
    fn test_match_mode_child_without_matches() {
        let state = State::new();
        state.save_service(&Arc::new(service("backend", "team"))).unwrap();
        state.save_http_route(&Arc::new(parent_route())).unwrap();
        state
            .save_http_route(&Arc::new(http_route(
                r"
metadata:
  name: catch-all
  namespace: team
spec:
  rules:
  - backendRefs:
    - name: backend
      port: 80
",
            )))
            .unwrap();
        let mut reports = ReportMap::default();
        let routes = translate(&state, "apps", "parent", &mut reports);

        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].name, "httproute-parent-apps-0-0/httproute-catch-all-team-0-0");
        assert_eq!(routes[0].matcher.path.value, "/api");
        assert_eq!(routes[0].matcher.headers[0].value, "prod");
        assert_eq!(
            routes[0].action,
            RouteAction::Forward(vec![WeightedDestination { cluster_name: "backend.team:80".to_owned(), weight: 1 }])
        );
    }

    #[test]
    fn test_inherit_mode_delegation() {
        let state = State::new();
        state.save_service(&Arc::new(service("backend", "team"))).unwrap();
        state.save_http_route(&Arc::new(parent_route())).unwrap();
        state
            .save_http_route(&Arc::new(http_route(
                r"
metadata:
  name: child
  namespace: team
  annotations:
    delegation.kubvernor.io/inherit-parent-matcher: 'true'
spec:
  rules:
  - matches:
    - path:
        value: /users
      headers:
      - name: env
        value: dev
    backendRefs:
    - name: backend
      port: 80
  - backendRefs:
    - name: backend
      port: 80
",
            )))
            .unwrap();
        let mut reports = ReportMap::default();
        let routes = translate(&state, "apps", "parent", &mut reports);

        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].name, "httproute-parent-apps-0-0/httproute-child-team-0-0");
        assert_eq!(routes[0].matcher.path.value, "/api/users");
        assert_eq!(routes[0].matcher.headers[0].value, "prod");
        assert_eq!(routes[1].name, "httproute-parent-apps-0-0/httproute-child-team-1-0");
        assert_eq!(routes[1].matcher.path.value, "/api");
    }

    #[test]
    fn test_cycle_is_reported_on_parent() {
        let state = State::new();
        for (name, child) in [("a", "b"), ("b", "a")] {
            state
                .save_http_route(&Arc::new(http_route(&format!(
                    r"
metadata:
  name: {name}
  namespace: apps
  annotations:
    delegation.kubvernor.io/inherit-parent-matcher: 'true'
spec:
  rules:
  - backendRefs:
    - group: gateway.networking.k8s.io
      kind: HTTPRoute
      name: {child}
"
                ))))
                .unwrap();
        }
        let mut reports = ReportMap::default();
        let routes = translate(&state, "apps", "a", &mut reports);
        assert!(routes.is_empty());

        let b_report = reports.route_report(&ResourceKey::http_route("b", "apps")).unwrap();
        let (_, conditions) = b_report.parents.iter().next().unwrap();
        assert_eq!(conditions.get(ConditionType::ResolvedRefs).map(|c| c.reason), Some(ConditionReason::RefNotPermitted));
    }
}
