use std::cmp::Ordering;

use serde::Serialize;

use crate::common::{api::PathMatchType, NormalizedMatch};

/// Proxy configuration produced for one Gateway.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Proxy {
    pub listeners: Vec<ProxyListener>,
    pub virtual_hosts: Vec<VirtualHost>,
}

impl Proxy {
    pub fn virtual_host(&self, name: &str) -> Option<&VirtualHost> {
        self.virtual_hosts.iter().find(|vh| vh.name == name)
    }

    pub fn listener(&self, bind_port: i32) -> Option<&ProxyListener> {
        self.listeners.iter().find(|l| l.bind_port == bind_port)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProxyListener {
    pub name: String,
    pub bind_address: String,
    pub bind_port: i32,
    pub filter_chains: Vec<FilterChain>,
    pub tcp_filter_chains: Vec<TcpFilterChain>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FilterChain {
    pub name: String,
    /// Listeners served by this chain. Plain HTTP listeners on one port share a chain.
    pub listener_names: Vec<String>,
    pub matcher: Option<SslMatcher>,
    pub virtual_host_refs: Vec<String>,
}

/// Chain of a TCP or TLS listener; TLS listeners select it by SNI.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TcpFilterChain {
    pub name: String,
    pub matcher: Option<SslMatcher>,
    pub hosts: Vec<TcpHost>,
}

/// One TCPRoute rule and the destinations it forwards to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TcpHost {
    pub name: String,
    pub destinations: Vec<WeightedDestination>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SslMatcher {
    pub sni_domains: Vec<String>,
    /// `namespace.name` of the certificate secret; `None` for passthrough.
    pub secret: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VirtualHost {
    pub name: String,
    pub domains: Vec<String>,
    pub routes: Vec<OutputRoute>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutputRoute {
    pub name: String,
    pub matcher: NormalizedMatch,
    pub action: RouteAction,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WeightedDestination {
    pub cluster_name: String,
    pub weight: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum RouteAction {
    Forward(Vec<WeightedDestination>),
    Blackhole,
    DirectResponse { status: u16 },
}

impl OutputRoute {
    fn path_matching(this: &NormalizedMatch, other: &NormalizedMatch) -> Ordering {
        let rank = |match_type: PathMatchType| match match_type {
            PathMatchType::Exact => 0,
            PathMatchType::PathPrefix => 1,
            PathMatchType::RegularExpression => 2,
        };
        match rank(this.path.match_type).cmp(&rank(other.path.match_type)) {
            Ordering::Equal => other.path.value.len().cmp(&this.path.value.len()),
            not_equal => not_equal,
        }
    }

    fn method_matching(this: &NormalizedMatch, other: &NormalizedMatch) -> Ordering {
        match (this.method, other.method) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(this_method), Some(other_method)) => this_method.cmp(&other_method),
        }
    }

    /// Most specific first: exact paths before prefixes before regexes, longer paths
    /// first, then routes with a method, more headers, more query params.
    pub fn compare_matching(&self, other: &Self) -> Ordering {
        let (this, other_match) = (&self.matcher, &other.matcher);
        Self::path_matching(this, other_match)
            .then_with(|| Self::method_matching(this, other_match))
            .then_with(|| other_match.headers.len().cmp(&this.headers.len()))
            .then_with(|| other_match.query_params.len().cmp(&this.query_params.len()))
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| this.cmp(other_match))
    }
}
