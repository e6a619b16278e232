mod delegation;
mod http_route;
mod listener_validator;
mod merged_listener;
pub mod model;
mod tcp_route;

pub use delegation::{inherit_match, is_delegated_match, join_paths, DelegationMode};
pub use http_route::HTTPRouteTranslator;
pub use listener_validator::{ListenerValidator, ValidatedListeners};
pub use merged_listener::{listener_id, ListenerResources, MergedListenerBuilder};
pub use model::{
    FilterChain, OutputRoute, Proxy, ProxyListener, RouteAction, SslMatcher, TcpFilterChain, TcpHost, VirtualHost, WeightedDestination,
};
pub use tcp_route::TCPRouteTranslator;
use thiserror::Error;
use tracing::{debug, info};
use typed_builder::TypedBuilder;

use crate::{
    common::{configuration::Configuration, ResourceKey},
    reports::ReportMap,
    routes_resolver::{RouteListenerMatcher, RoutesResolver},
    state::{ResourceStore, StoreError},
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslatorError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Translates one Gateway, its ListenerSets and every route reachable from them into
/// a proxy configuration. Everything observed on the way is recorded in a `ReportMap`.
#[derive(TypedBuilder)]
pub struct GatewayTranslator<'a, S> {
    store: &'a S,
    configuration: &'a Configuration,
}

impl<'a, S: ResourceStore> GatewayTranslator<'a, S> {
    pub fn translate(&self, gateway_key: &ResourceKey, reports: &mut ReportMap) -> Result<Proxy, TranslatorError> {
        let gateway = self.store.gateway(&gateway_key.namespace, &gateway_key.name)?;
        let validated = ListenerValidator::new(self.store, &gateway).validate(reports)?;
        info!("Gateway {gateway_key}: {} valid listeners from {} owners", validated.listeners.len(), validated.owners.len());

        let matcher = RouteListenerMatcher::new(self.store, &validated.listeners);
        let attached = matcher.filter_matching_routes(&validated.owners, reports)?;
        let attached_tcp = matcher.filter_matching_tcp_routes(&validated.owners, reports)?;
        let routes_resolver = RoutesResolver::new(self.store, &self.configuration.delegation);
        let tcp_translator = TCPRouteTranslator::new(self.store);

        let mut resources = Vec::with_capacity(validated.listeners.len());
        for ((listener, attached_routes), attached_tcp_routes) in validated.listeners.iter().zip(attached).zip(attached_tcp) {
            let mut routes = Vec::with_capacity(attached_routes.len());
            for attached_route in attached_routes {
                let info = routes_resolver.route_chain(&attached_route.route, Some(attached_route.hostnames.clone()), &attached_route.parent_ref);
                let output = HTTPRouteTranslator::new(reports).translate(&info);
                debug!("Listener {} route {}: {} output routes", listener_id(listener), info.key, output.len());
                routes.push((attached_route.hostnames, output));
            }
            let tcp_hosts: Vec<TcpHost> =
                attached_tcp_routes.iter().flat_map(|attached_route| tcp_translator.translate(attached_route, listener.port(), reports)).collect();
            resources.push(ListenerResources { listener: listener.clone(), routes, tcp_hosts });
        }

        Ok(MergedListenerBuilder::new(self.store, self.configuration).build(resources, reports))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use k8s_openapi::{
        apimachinery::pkg::apis::meta::v1::{Condition, Time},
        chrono::{TimeZone, Utc},
    };

    use super::*;
    use crate::{
        common::{
            api::{HTTPRoute, ParentReference},
            test::{gateway, http_route, listener_set, namespace, reference_grant, secret, service, tcp_route},
            ListenerOrigin, ResourceKey, DEFAULT_GROUP_NAME, HTTP_ROUTE_KIND_NAME,
        },
        reports::{ConditionReason, ConditionType},
        state::State,
    };

    const GATEWAY: &str = r"
metadata:
  name: gateway
  namespace: infra
  generation: 1
spec:
  gatewayClassName: kubvernor
  listeners:
  - name: http
    port: 80
    protocol: HTTP
    hostname: '*.example.com'
    allowedRoutes:
      namespaces:
        from: All
  allowedListeners:
    namespaces:
      from: All
";

    fn configuration() -> Configuration {
        Configuration::builder().controller_name("kubvernor.com/proxy-controller").build()
    }

    fn time(seconds: i64) -> Time {
        Time(Utc.timestamp_opt(seconds, 0).unwrap())
    }

    fn state() -> State {
        let state = State::new();
        for name in ["infra", "apps", "team", "backends"] {
            state.save_namespace(&Arc::new(namespace(name, &[]))).unwrap();
        }
        state.save_gateway(&Arc::new(gateway(GATEWAY))).unwrap();
        state.save_service(&Arc::new(service("backend", "apps"))).unwrap();
        state.save_service(&Arc::new(service("backend", "team"))).unwrap();
        state.save_service(&Arc::new(service("backend", "backends"))).unwrap();
        state
    }

    fn route(yaml: &str) -> Arc<HTTPRoute> {
        Arc::new(http_route(yaml))
    }

    fn translate(state: &State, reports: &mut ReportMap) -> Proxy {
        let snapshot = state.snapshot().unwrap();
        let configuration = configuration();
        let translator = GatewayTranslator::builder().store(&snapshot).configuration(&configuration).build();
        translator.translate(&ResourceKey::namespaced("gateway", "infra"), reports).unwrap()
    }

    fn gateway_ref() -> ParentReference {
        ParentReference { name: "gateway".to_owned(), namespace: Some("infra".to_owned()), ..Default::default() }
    }

    fn route_ref(name: &str, namespace: &str) -> ParentReference {
        ParentReference {
            group: Some(DEFAULT_GROUP_NAME.to_owned()),
            kind: Some(HTTP_ROUTE_KIND_NAME.to_owned()),
            namespace: Some(namespace.to_owned()),
            name: name.to_owned(),
            section_name: None,
            port: None,
        }
    }

    fn route_names(proxy: &Proxy, virtual_host: &str) -> Vec<String> {
        proxy.virtual_host(virtual_host).unwrap().routes.iter().map(|r| r.name.clone()).collect()
    }

    fn find<'c>(conditions: &'c [Condition], type_: ConditionType) -> &'c Condition {
        conditions.iter().find(|c| c.type_ == type_.to_string()).unwrap()
    }

    const PARENT_ROUTE: &str = r"
metadata:
  name: parent
  namespace: apps
spec:
  parentRefs:
  - name: gateway
    namespace: infra
  hostnames:
  - foo.example.com
  rules:
  - matches:
    - path:
        value: /api
    backendRefs:
    - group: gateway.networking.k8s.io
      kind: HTTPRoute
      name: child
      namespace: team
  - matches:
    - path:
        value: /static/files
    backendRefs:
    - name: backend
      port: 8080
";

    const CHILD_ROUTE: &str = r"
metadata:
  name: child
  namespace: team
spec:
  rules:
  - matches:
    - path:
        value: /api/v1
    backendRefs:
    - name: backend
      port: 8080
  - matches:
    - path:
        value: /other
    backendRefs:
    - name: backend
      port: 8080
";

    #[test]
    fn test_translate_delegated_routes() {
        let state = state();
        state.save_http_route(&route(PARENT_ROUTE)).unwrap();
        state.save_http_route(&route(CHILD_ROUTE)).unwrap();
        let mut reports = ReportMap::default();
        let proxy = translate(&state, &mut reports);

        assert_eq!(proxy.listeners.len(), 1);
        let listener = proxy.listener(8080).unwrap();
        assert_eq!(listener.name, "http");
        assert_eq!(listener.filter_chains[0].virtual_host_refs, vec!["http~foo.example.com"]);
        assert_eq!(route_names(&proxy, "http~foo.example.com"), vec!["httproute-parent-apps-1-0", "httproute-parent-apps-0-0/httproute-child-team-0-0"]);
        let child = &proxy.virtual_host("http~foo.example.com").unwrap().routes[1];
        assert_eq!(child.matcher.path.value, "/api/v1");
        assert_eq!(
            child.action,
            RouteAction::Forward(vec![WeightedDestination { cluster_name: "backend.team:8080".to_owned(), weight: 1 }])
        );

        let gateway_report = reports.gateway_report(&ResourceKey::namespaced("gateway", "infra")).unwrap();
        assert_eq!(gateway_report.listeners.get("http").unwrap().attached_routes, 1);
        let child_report = reports.route_report(&ResourceKey::http_route("child", "team")).unwrap();
        assert!(child_report.parents.contains_key(&route_ref("parent", "apps")));
    }

    #[test]
    fn test_diamond_delegation() {
        let state = state();
        let parent = |name: &str, prefix: &str| {
            route(&format!(
                r"
metadata:
  name: {name}
  namespace: apps
spec:
  parentRefs:
  - name: gateway
    namespace: infra
  rules:
  - matches:
    - path:
        value: {prefix}
    backendRefs:
    - group: gateway.networking.k8s.io
      kind: HTTPRoute
      name: shared
      namespace: team
"
            ))
        };
        state.save_http_route(&parent("first", "/first")).unwrap();
        state.save_http_route(&parent("second", "/second")).unwrap();
        state
            .save_http_route(&route(
                r"
metadata:
  name: shared
  namespace: team
  annotations:
    delegation.kubvernor.io/inherit-parent-matcher: 'true'
spec:
  rules:
  - matches:
    - path:
        value: /items
    backendRefs:
    - name: backend
      port: 8080
",
            ))
            .unwrap();
        let mut reports = ReportMap::default();
        let proxy = translate(&state, &mut reports);

        let routes = &proxy.virtual_host("http~*.example.com").unwrap().routes;
        let paths: Vec<&str> = routes.iter().map(|r| r.matcher.path.value.as_str()).collect();
        assert_eq!(paths, vec!["/second/items", "/first/items"]);
        let names: Vec<&str> = routes.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["httproute-second-apps-0-0/httproute-shared-team-0-0", "httproute-first-apps-0-0/httproute-shared-team-0-0"]);

        let shared = http_route(
            r"
metadata:
  name: shared
  namespace: team
spec: {}
",
        );
        let status = reports.build_route_status(&shared, "kubvernor.com/proxy-controller", &time(1));
        let parents: Vec<&ParentReference> = status.parents.iter().map(|p| &p.parent_ref).collect();
        assert_eq!(parents, vec![&route_ref("first", "apps"), &route_ref("second", "apps")]);
    }

    #[test]
    fn test_delegation_cycle() {
        let state = state();
        state
            .save_http_route(&route(
                r"
metadata:
  name: a
  namespace: apps
spec:
  parentRefs:
  - name: gateway
    namespace: infra
  rules:
  - matches:
    - path:
        value: /a
    backendRefs:
    - group: gateway.networking.k8s.io
      kind: HTTPRoute
      name: b
",
            ))
            .unwrap();
        state
            .save_http_route(&route(
                r"
metadata:
  name: b
  namespace: apps
spec:
  rules:
  - matches:
    - path:
        value: /a/b
    backendRefs:
    - group: gateway.networking.k8s.io
      kind: HTTPRoute
      name: a
",
            ))
            .unwrap();
        let mut reports = ReportMap::default();
        let proxy = translate(&state, &mut reports);

        assert!(proxy.virtual_host("http~*.example.com").unwrap().routes.is_empty());
        let b_report = reports.route_report(&ResourceKey::http_route("b", "apps")).unwrap();
        let conditions = b_report.parents.get(&route_ref("a", "apps")).unwrap();
        assert_eq!(conditions.get(ConditionType::ResolvedRefs).map(|c| c.reason), Some(ConditionReason::RefNotPermitted));
    }

    #[test]
    fn test_reference_grant_enforcement() {
        const ROUTE: &str = r"
metadata:
  name: cross
  namespace: apps
spec:
  parentRefs:
  - name: gateway
    namespace: infra
  rules:
  - backendRefs:
    - name: backend
      namespace: backends
      port: 8080
";
        const GRANT: &str = r"
metadata:
  name: grant
  namespace: backends
spec:
  from:
  - group: gateway.networking.k8s.io
    kind: HTTPRoute
    namespace: {from}
  to:
  - group: ''
    kind: Service
";
        let state = state();
        state.save_http_route(&route(ROUTE)).unwrap();
        let key = ResourceKey::http_route("cross", "apps");
        let action = |proxy: &Proxy| proxy.virtual_host("http~*.example.com").unwrap().routes[0].action.clone();

        let mut reports = ReportMap::default();
        let proxy = translate(&state, &mut reports);
        assert_eq!(action(&proxy), RouteAction::Blackhole);
        let conditions = reports.route_report(&key).unwrap().parents.get(&gateway_ref()).unwrap();
        assert_eq!(conditions.get(ConditionType::ResolvedRefs).map(|c| c.reason), Some(ConditionReason::RefNotPermitted));

        state.save_reference_grant(&Arc::new(reference_grant(&GRANT.replace("{from}", "team")))).unwrap();
        let mut reports = ReportMap::default();
        assert_eq!(action(&translate(&state, &mut reports)), RouteAction::Blackhole);

        state.save_reference_grant(&Arc::new(reference_grant(&GRANT.replace("{from}", "apps")))).unwrap();
        let mut reports = ReportMap::default();
        assert_eq!(
            action(&translate(&state, &mut reports)),
            RouteAction::Forward(vec![WeightedDestination { cluster_name: "backend.backends:8080".to_owned(), weight: 1 }])
        );
        assert!(reports.route_report(&key).unwrap().parents.get(&gateway_ref()).unwrap().get(ConditionType::ResolvedRefs).is_none());
    }

    #[test]
    fn test_tls_listener() {
        let state = state();
        state
            .save_gateway(&Arc::new(gateway(
                r"
metadata:
  name: gateway
  namespace: infra
spec:
  gatewayClassName: kubvernor
  listeners:
  - name: https
    port: 443
    protocol: HTTPS
    hostname: secure.example.com
    tls:
      certificateRefs:
      - name: cert
        namespace: certs
",
            )))
            .unwrap();
        state.save_secret(&Arc::new(secret("cert", "certs"))).unwrap();
        let origin = ListenerOrigin::Gateway(ResourceKey::namespaced("gateway", "infra"));

        let mut reports = ReportMap::default();
        let proxy = translate(&state, &mut reports);
        assert!(proxy.listeners.is_empty());
        let conditions = &reports.listener(&origin, "https").conditions;
        assert_eq!(conditions.get(ConditionType::ResolvedRefs).map(|c| c.reason), Some(ConditionReason::RefNotPermitted));

        state
            .save_reference_grant(&Arc::new(reference_grant(
                r"
metadata:
  name: certs
  namespace: certs
spec:
  from:
  - group: gateway.networking.k8s.io
    kind: Gateway
    namespace: infra
  to:
  - group: ''
    kind: Secret
    name: cert
",
            )))
            .unwrap();
        let mut reports = ReportMap::default();
        let proxy = translate(&state, &mut reports);
        let chain = &proxy.listener(8443).unwrap().filter_chains[0];
        assert_eq!(chain.matcher.as_ref().and_then(|m| m.secret.as_deref()), Some("certs.cert"));
        assert_eq!(chain.matcher.as_ref().map(|m| m.sni_domains.clone()), Some(vec!["secure.example.com".to_owned()]));
    }

    #[test]
    fn test_gateway_status_is_idempotent() {
        let state = state();
        state.save_http_route(&route(PARENT_ROUTE)).unwrap();
        state.save_http_route(&route(CHILD_ROUTE)).unwrap();
        let mut reports = ReportMap::default();
        translate(&state, &mut reports);

        let mut gateway = gateway(GATEWAY);
        let first = reports.build_gateway_status(&gateway, &time(100));
        let listener = &first.listeners.as_ref().unwrap()[0];
        assert_eq!(listener.attached_routes, 1);
        assert_eq!(find(&listener.conditions, ConditionType::Conflicted).reason, "NoConflicts");
        assert_eq!(find(&listener.conditions, ConditionType::Programmed).status, "True");

        gateway.status = Some(first.clone());
        state.save_gateway(&Arc::new(gateway.clone())).unwrap();
        let mut reports = ReportMap::default();
        translate(&state, &mut reports);
        let second = reports.build_gateway_status(&gateway, &time(200));
        assert_eq!(first, second);
        let conditions = second.conditions.unwrap();
        assert_eq!(find(&conditions, ConditionType::Accepted).last_transition_time, time(100));
        assert_eq!(find(&conditions, ConditionType::Accepted).observed_generation, Some(1));
    }

    #[test]
    fn test_listener_set_routes() {
        let state = state();
        let listener_set = listener_set(
            r"
metadata:
  name: team-listeners
  namespace: team
spec:
  parentRef:
    name: gateway
    namespace: infra
  listeners:
  - name: team
    port: 8081
    protocol: HTTP
    hostname: team.example.com
",
        );
        state.save_listener_set(&Arc::new(listener_set.clone())).unwrap();
        state
            .save_http_route(&route(
                r"
metadata:
  name: team-route
  namespace: team
spec:
  parentRefs:
  - group: gateway.networking.x-k8s.io
    kind: XListenerSet
    name: team-listeners
  rules:
  - backendRefs:
    - name: backend
      port: 8080
",
            ))
            .unwrap();
        let mut reports = ReportMap::default();
        let proxy = translate(&state, &mut reports);

        let listener = proxy.listener(8081).unwrap();
        assert_eq!(listener.name, "team/team-listeners/team");
        assert_eq!(route_names(&proxy, "team/team-listeners/team~team.example.com"), vec!["httproute-team-route-team-0-0"]);

        let status = reports.build_listener_set_status(&listener_set, &time(1));
        assert_eq!(find(&status.conditions.unwrap(), ConditionType::Accepted).status, "True");
        let entry = &status.listeners.unwrap()[0];
        assert_eq!(entry.port, 8081);
        assert_eq!(entry.attached_routes, 1);

        let gateway_status = reports.build_gateway_status(&gateway(GATEWAY), &time(1));
        let attached = find(gateway_status.conditions.as_ref().unwrap(), ConditionType::AttachedListenerSets);
        assert_eq!(attached.status, "True");
        assert_eq!(attached.reason, "ListenerSetsAttached");
    }

    #[test]
    fn test_tcp_routes() {
        let state = state();
        state
            .save_gateway(&Arc::new(gateway(
                r"
metadata:
  name: gateway
  namespace: infra
spec:
  gatewayClassName: kubvernor
  listeners:
  - name: http
    port: 80
    protocol: HTTP
  - name: postgres
    port: 5432
    protocol: TCP
    allowedRoutes:
      namespaces:
        from: All
",
            )))
            .unwrap();
        let database = tcp_route(
            r"
metadata:
  name: database
  namespace: apps
spec:
  parentRefs:
  - name: gateway
    namespace: infra
  rules:
  - backendRefs:
    - name: backend
      port: 8080
    - name: missing
",
        );
        state.save_tcp_route(&Arc::new(database.clone())).unwrap();
        let mut reports = ReportMap::default();
        let proxy = translate(&state, &mut reports);

        let listener = proxy.listener(5432).unwrap();
        assert_eq!(listener.name, "postgres");
        let chain = &listener.tcp_filter_chains[0];
        assert_eq!(chain.name, "postgres");
        assert_eq!(
            chain.hosts,
            vec![TcpHost {
                name: "tcproute-database-apps-0".to_owned(),
                destinations: vec![WeightedDestination { cluster_name: "backend.apps:8080".to_owned(), weight: 1 }],
            }]
        );

        let origin = ListenerOrigin::Gateway(ResourceKey::namespaced("gateway", "infra"));
        assert_eq!(reports.listener(&origin, "postgres").attached_routes, 1);
        assert_eq!(reports.listener(&origin, "http").attached_routes, 0);
        let status = reports.build_tcp_route_status(&database, "kubvernor.com/proxy-controller", &time(1));
        assert_eq!(status.parents.len(), 1);
        assert_eq!(find(&status.parents[0].conditions, ConditionType::Accepted).status, "True");
        assert_eq!(find(&status.parents[0].conditions, ConditionType::ResolvedRefs).reason, "BackendNotFound");
    }

    #[test]
    fn test_missing_gateway() {
        let state = State::new();
        let snapshot = state.snapshot().unwrap();
        let configuration = configuration();
        let translator = GatewayTranslator::builder().store(&snapshot).configuration(&configuration).build();
        let mut reports = ReportMap::default();
        let result = translator.translate(&ResourceKey::namespaced("gateway", "infra"), &mut reports);
        assert!(matches!(result, Err(TranslatorError::Store(StoreError::NotFound { .. }))));
    }
}
