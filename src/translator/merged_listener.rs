use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use super::model::{FilterChain, OutputRoute, Proxy, ProxyListener, SslMatcher, TcpFilterChain, TcpHost, VirtualHost};
use crate::{
    common::{
        api::SecretObjectReference, configuration::Configuration, Listener, ListenerOrigin, ProtocolType, ResourceKey, TlsType,
        DEFAULT_ROUTE_HOSTNAME, TLS_SECRET_TYPE,
    },
    references_resolver::{FromResourceKey, ReferenceResolver},
    reports::{ConditionReason, ConditionStatus, ConditionType, ReportCondition, ReportMap},
    state::ResourceStore,
};

const TLS_CERTIFICATE_KEY: &str = "tls.crt";
const TLS_PRIVATE_KEY: &str = "tls.key";

/// A valid listener with what is attached to it: HTTP routes grouped by the hostnames
/// each attached route serves on the listener, and the hosts of its TCPRoutes.
#[derive(Clone, Debug)]
pub struct ListenerResources {
    pub listener: Listener,
    pub routes: Vec<(Vec<String>, Vec<OutputRoute>)>,
    pub tcp_hosts: Vec<TcpHost>,
}

/// Name of a listener that is unique across the Gateway and its ListenerSets.
pub fn listener_id(listener: &Listener) -> String {
    match listener.origin() {
        ListenerOrigin::Gateway(_) => listener.name().to_owned(),
        ListenerOrigin::ListenerSet(key) => format!("{}/{}/{}", key.namespace, key.name, listener.name()),
    }
}

type RoutesByHost = BTreeMap<String, Vec<OutputRoute>>;

/// Adds the routes of a listener to `by_host`. Routes without hostnames land on the
/// listener hostname, or on `*` when the listener has none.
fn add_routes_by_host(listener: &Listener, routes: &[(Vec<String>, Vec<OutputRoute>)], by_host: &mut RoutesByHost) {
    let default_host = listener.hostname().cloned().unwrap_or(DEFAULT_ROUTE_HOSTNAME.to_owned());
    for (hostnames, host_routes) in routes {
        let hosts = if hostnames.is_empty() { vec![default_host.clone()] } else { hostnames.clone() };
        for host in hosts {
            by_host.entry(host).or_default().extend(host_routes.iter().cloned());
        }
    }
}

fn virtual_hosts(prefix: &str, by_host: RoutesByHost) -> Vec<VirtualHost> {
    by_host
        .into_iter()
        .map(|(host, mut routes)| {
            routes.sort_by(OutputRoute::compare_matching);
            routes.dedup_by(|a, b| a.name == b.name && a.matcher == b.matcher);
            VirtualHost { name: format!("{prefix}~{host}"), domains: vec![host], routes }
        })
        .collect()
}

fn ssl_matcher(listener: &Listener, secret: Option<String>) -> SslMatcher {
    SslMatcher { sni_domains: listener.hostname().cloned().into_iter().collect(), secret }
}

/// Plain HTTP listeners sharing a port share one chain and one set of virtual hosts.
#[derive(Default)]
struct HttpChain {
    listener_names: Vec<String>,
    routes_by_host: RoutesByHost,
}

struct SecureChain {
    listener_name: String,
    matcher: SslMatcher,
    routes_by_host: RoutesByHost,
}

#[derive(Default)]
struct MergedListener {
    names: Vec<String>,
    http: Option<HttpChain>,
    secure: Vec<SecureChain>,
    tcp: Vec<TcpFilterChain>,
}

impl MergedListener {
    /// Builds the filter chains, naming the shared HTTP virtual hosts after `name`.
    /// A virtual host whose name is already taken is skipped.
    fn filter_chains(self, name: &str, accepted: &mut Vec<VirtualHost>, accepted_names: &mut BTreeSet<String>) -> Vec<FilterChain> {
        let mut add = |virtual_hosts: Vec<VirtualHost>| -> Vec<String> {
            let mut refs = vec![];
            for virtual_host in virtual_hosts {
                if !accepted_names.insert(virtual_host.name.clone()) {
                    warn!("Duplicate virtual host {} on listener {name}", virtual_host.name);
                    continue;
                }
                refs.push(virtual_host.name.clone());
                accepted.push(virtual_host);
            }
            refs.sort();
            refs
        };

        let mut chains = vec![];
        if let Some(HttpChain { listener_names, routes_by_host }) = self.http {
            let virtual_host_refs = add(virtual_hosts(name, routes_by_host));
            chains.push(FilterChain { name: listener_names.join("~"), listener_names, matcher: None, virtual_host_refs });
        }
        for SecureChain { listener_name, matcher, routes_by_host } in self.secure {
            let virtual_host_refs = add(virtual_hosts(&listener_name, routes_by_host));
            chains.push(FilterChain { name: listener_name.clone(), listener_names: vec![listener_name], matcher: Some(matcher), virtual_host_refs });
        }
        chains
    }
}

/// Merges listeners sharing a bind port into proxy listeners.
pub struct MergedListenerBuilder<'a, S> {
    configuration: &'a Configuration,
    references: ReferenceResolver<'a, S>,
}

impl<'a, S: ResourceStore> MergedListenerBuilder<'a, S> {
    pub fn new(store: &'a S, configuration: &'a Configuration) -> Self {
        Self { configuration, references: ReferenceResolver::new(store) }
    }

    pub fn build(&self, resources: Vec<ListenerResources>, reports: &mut ReportMap) -> Proxy {
        let mut merged: BTreeMap<i32, MergedListener> = BTreeMap::new();

        for ListenerResources { listener, routes, tcp_hosts } in resources {
            let id = listener_id(&listener);
            let bind_port = self.configuration.bind_port(listener.port());
            match listener.protocol() {
                ProtocolType::Http => {
                    let merged_listener = merged.entry(bind_port).or_default();
                    merged_listener.names.push(id.clone());
                    let http = merged_listener.http.get_or_insert_with(HttpChain::default);
                    http.listener_names.push(id);
                    add_routes_by_host(&listener, &routes, &mut http.routes_by_host);
                },
                ProtocolType::Https => {
                    let Some(secret) = self.resolve_tls(&listener, reports) else {
                        continue;
                    };
                    let mut routes_by_host = RoutesByHost::new();
                    add_routes_by_host(&listener, &routes, &mut routes_by_host);
                    let merged_listener = merged.entry(bind_port).or_default();
                    merged_listener.names.push(id.clone());
                    merged_listener.secure.push(SecureChain { listener_name: id, matcher: ssl_matcher(&listener, secret), routes_by_host });
                },
                ProtocolType::Tcp | ProtocolType::Tls => {
                    if tcp_hosts.is_empty() {
                        debug!("Listener {id} has no TCP hosts");
                        continue;
                    }
                    let matcher = if listener.protocol() == ProtocolType::Tls {
                        let Some(secret) = self.resolve_tls(&listener, reports) else {
                            continue;
                        };
                        Some(ssl_matcher(&listener, secret))
                    } else {
                        None
                    };
                    let merged_listener = merged.entry(bind_port).or_default();
                    merged_listener.names.push(id.clone());
                    merged_listener.tcp.push(TcpFilterChain { name: id, matcher, hosts: tcp_hosts });
                },
            }
        }

        let mut accepted = vec![];
        let mut accepted_names = BTreeSet::new();
        let listeners = merged
            .into_iter()
            .map(|(bind_port, mut merged_listener)| {
                let name = merged_listener.names.join("~");
                info!("Listener {name} on port {bind_port}");
                let tcp_filter_chains = std::mem::take(&mut merged_listener.tcp);
                let filter_chains = merged_listener.filter_chains(&name, &mut accepted, &mut accepted_names);
                ProxyListener { name, bind_address: self.configuration.bind_address.clone(), bind_port, filter_chains, tcp_filter_chains }
            })
            .collect();

        accepted.sort_by(|a, b| a.name.cmp(&b.name));
        Proxy { listeners, virtual_hosts: accepted }
    }

    /// Secret reference the listener terminates with, `Some(None)` for passthrough.
    /// A listener whose certificate cannot be used is reported and yields `None`.
    fn resolve_tls(&self, listener: &Listener, reports: &mut ReportMap) -> Option<Option<String>> {
        let certificate_refs = match &listener.config().tls_type {
            Some(TlsType::Passthrough) => return Some(None),
            Some(TlsType::Terminate(certificate_refs)) => certificate_refs.as_slice(),
            None => &[],
        };

        let from = FromResourceKey::from(listener.origin().resource_key());
        let result = match certificate_refs.first() {
            Some(certificate_ref) => self.resolve_certificate(&from, certificate_ref),
            None => Err((ConditionReason::InvalidCertificateRef, "No certificate reference".to_owned())),
        };

        match result {
            Ok(secret) => Some(Some(secret.to_string())),
            Err((reason, message)) => {
                warn!("Listener {} dropped: {message}", listener.name());
                let listener_report = reports.listener(listener.origin(), listener.name());
                listener_report.conditions.set(ReportCondition::new(ConditionType::ResolvedRefs, ConditionStatus::False, reason, message.clone()));
                listener_report.conditions.set(ReportCondition::new(ConditionType::Programmed, ConditionStatus::False, ConditionReason::Invalid, message));
                None
            },
        }
    }

    fn resolve_certificate(&self, from: &FromResourceKey, certificate_ref: &SecretObjectReference) -> Result<ResourceKey, (ConditionReason, String)> {
        let secret = self.references.resolve_secret(from, certificate_ref).map_err(|e| {
            let reason = if e.is_not_permitted() { ConditionReason::RefNotPermitted } else { ConditionReason::InvalidCertificateRef };
            (reason, e.to_string())
        })?;
        let has_key_pair = secret.data.as_ref().is_some_and(|data| data.contains_key(TLS_CERTIFICATE_KEY) && data.contains_key(TLS_PRIVATE_KEY));
        if secret.type_.as_deref() == Some(TLS_SECRET_TYPE) && has_key_pair {
            Ok(ResourceKey::from(secret.as_ref()))
        } else {
            Err((ConditionReason::InvalidCertificateRef, format!("Secret {} is not a valid TLS secret", certificate_ref.name)))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        common::{api::GatewayListener, test::secret, NormalizedMatch},
        state::State,
        translator::model::{RouteAction, WeightedDestination},
    };

    fn listener(yaml: &str) -> Listener {
        let gateway_listener: GatewayListener = serde_yaml::from_str(yaml).unwrap();
        Listener::try_from((&gateway_listener, ListenerOrigin::Gateway(ResourceKey::namespaced("gateway", "infra")))).unwrap()
    }

    fn route(name: &str) -> OutputRoute {
        OutputRoute { name: name.to_owned(), matcher: NormalizedMatch::default(), action: RouteAction::Blackhole }
    }

    fn configuration() -> Configuration {
        Configuration::builder().controller_name("kubvernor.com/proxy-controller").build()
    }

    fn listener_resources(listener_yaml: &str, routes: Vec<(Vec<String>, Vec<OutputRoute>)>) -> ListenerResources {
        ListenerResources { listener: listener(listener_yaml), routes, tcp_hosts: vec![] }
    }

    fn tcp_host(name: &str) -> TcpHost {
        TcpHost { name: name.to_owned(), destinations: vec![WeightedDestination { cluster_name: "postgres.apps:5432".to_owned(), weight: 1 }] }
    }

    #[test]
    fn test_http_listeners_share_chain() {
        let state = State::new();
        let snapshot = state.snapshot().unwrap();
        let configuration = configuration();
        let resources = vec![
            listener_resources(
                "name: wildcard\nport: 80\nprotocol: HTTP\nhostname: '*.example.com'\n",
                vec![(vec!["foo.example.com".to_owned(), "bar.example.com".to_owned()], vec![route("a")])],
            ),
            listener_resources("name: foo\nport: 80\nprotocol: HTTP\nhostname: foo.example.com\n", vec![(vec!["foo.example.com".to_owned()], vec![route("b")])]),
            listener_resources("name: any\nport: 8080\nprotocol: HTTP\n", vec![(vec![], vec![route("c"), route("c")])]),
        ];
        let mut reports = ReportMap::default();
        let proxy = MergedListenerBuilder::new(&snapshot, &configuration).build(resources, &mut reports);

        assert_eq!(proxy.listeners.len(), 1);
        let merged = proxy.listener(8080).unwrap();
        assert_eq!(merged.name, "wildcard~foo~any");
        assert_eq!(merged.bind_address, "::");
        assert_eq!(merged.filter_chains.len(), 1);
        assert!(merged.tcp_filter_chains.is_empty());
        let chain = &merged.filter_chains[0];
        assert_eq!(chain.name, "wildcard~foo~any");
        assert_eq!(chain.listener_names, vec!["wildcard", "foo", "any"]);
        assert_eq!(chain.virtual_host_refs, vec!["wildcard~foo~any~*", "wildcard~foo~any~bar.example.com", "wildcard~foo~any~foo.example.com"]);
        let foo_routes: Vec<&str> =
            proxy.virtual_host("wildcard~foo~any~foo.example.com").unwrap().routes.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(foo_routes, vec!["a", "b"]);
        assert_eq!(proxy.virtual_host("wildcard~foo~any~*").unwrap().routes.len(), 1);
        assert_eq!(proxy.virtual_hosts.len(), 3);
    }

    #[test]
    fn test_tcp_listeners() {
        let state = State::new();
        state.save_secret(&Arc::new(secret("cert", "infra"))).unwrap();
        let snapshot = state.snapshot().unwrap();
        let configuration = configuration();
        let resources = vec![
            ListenerResources { tcp_hosts: vec![tcp_host("tcproute-database-apps-0")], ..listener_resources("name: tcp\nport: 5432\nprotocol: TCP\n", vec![]) },
            listener_resources("name: idle\nport: 5433\nprotocol: TCP\n", vec![]),
            ListenerResources {
                tcp_hosts: vec![tcp_host("tcproute-passthrough-apps-0")],
                ..listener_resources("name: passthrough\nport: 443\nprotocol: TLS\nhostname: db.example.com\ntls:\n  mode: Passthrough\n", vec![])
            },
            ListenerResources {
                tcp_hosts: vec![tcp_host("tcproute-terminate-apps-0")],
                ..listener_resources(
                    "name: terminate\nport: 443\nprotocol: TLS\nhostname: other.example.com\ntls:\n  certificateRefs:\n  - name: cert\n",
                    vec![],
                )
            },
        ];
        let mut reports = ReportMap::default();
        let proxy = MergedListenerBuilder::new(&snapshot, &configuration).build(resources, &mut reports);

        assert_eq!(proxy.listeners.len(), 2);
        assert!(proxy.listener(5433).is_none());
        let tcp = proxy.listener(5432).unwrap();
        assert!(tcp.filter_chains.is_empty());
        assert_eq!(tcp.tcp_filter_chains, vec![TcpFilterChain { name: "tcp".to_owned(), matcher: None, hosts: vec![tcp_host("tcproute-database-apps-0")] }]);

        let tls = proxy.listener(8443).unwrap();
        assert_eq!(tls.name, "passthrough~terminate");
        let matchers: Vec<(Vec<String>, Option<String>)> =
            tls.tcp_filter_chains.iter().filter_map(|c| c.matcher.clone()).map(|m| (m.sni_domains, m.secret)).collect();
        assert_eq!(
            matchers,
            vec![(vec!["db.example.com".to_owned()], None), (vec!["other.example.com".to_owned()], Some("infra.cert".to_owned()))]
        );
        assert!(proxy.virtual_hosts.is_empty());
    }

    #[test]
    fn test_https_listeners() {
        let state = State::new();
        state.save_secret(&Arc::new(secret("cert", "infra"))).unwrap();
        let mut broken = secret("broken", "infra");
        broken.type_ = Some("Opaque".to_owned());
        state.save_secret(&Arc::new(broken)).unwrap();
        let snapshot = state.snapshot().unwrap();
        let configuration = configuration();

        let https = |name: &str, certificate: &str| {
            listener_resources(
                &format!("name: {name}\nport: 443\nprotocol: HTTPS\nhostname: {name}.example.com\ntls:\n  certificateRefs:\n  - name: {certificate}\n"),
                vec![(vec![], vec![route(name)])],
            )
        };
        let resources = vec![https("good", "cert"), https("broken", "broken"), https("missing", "missing")];
        let mut reports = ReportMap::default();
        let proxy = MergedListenerBuilder::new(&snapshot, &configuration).build(resources, &mut reports);

        let merged = proxy.listener(8443).unwrap();
        assert_eq!(merged.filter_chains.len(), 1);
        let matcher = merged.filter_chains[0].matcher.as_ref().unwrap();
        assert_eq!(matcher.sni_domains, vec!["good.example.com"]);
        assert_eq!(matcher.secret.as_deref(), Some("infra.cert"));
        assert_eq!(proxy.virtual_hosts.len(), 1);
        assert_eq!(merged.filter_chains[0].virtual_host_refs, vec!["good~good.example.com"]);

        let origin = ListenerOrigin::Gateway(ResourceKey::namespaced("gateway", "infra"));
        for name in ["broken", "missing"] {
            let conditions = &reports.listener(&origin, name).conditions;
            assert_eq!(conditions.get(ConditionType::ResolvedRefs).map(|c| c.reason), Some(ConditionReason::InvalidCertificateRef));
            assert_eq!(conditions.get(ConditionType::Programmed).map(|c| c.reason), Some(ConditionReason::Invalid));
        }
    }
}
