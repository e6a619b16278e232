use std::fmt::Display;

use thiserror::Error;

use super::{
    api::{AllowedRoutes, GatewayListener, RouteGroupKind, SecretObjectReference, TlsMode},
    resource_key::{DEFAULT_GROUP_NAME, HTTP_ROUTE_KIND_NAME, TCP_ROUTE_KIND_NAME},
    ResourceKey, DEFAULT_ROUTE_HOSTNAME,
};

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Ord, Hash, Eq)]
pub enum ProtocolType {
    Http,
    Https,
    Tcp,
    Tls,
}

impl TryFrom<&String> for ProtocolType {
    type Error = ListenerError;

    fn try_from(value: &String) -> Result<Self, Self::Error> {
        Ok(match value.as_str() {
            "HTTP" => Self::Http,
            "HTTPS" => Self::Https,
            "TCP" => Self::Tcp,
            "TLS" => Self::Tls,
            _ => {
                return Err(ListenerError::UnknownProtocol(value.clone()));
            },
        })
    }
}

impl Display for ProtocolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut e = format! {"{self:?}"};
        e.make_ascii_uppercase();
        write!(f, "{e}")
    }
}

impl ProtocolType {
    /// Protocols that may share a port with each other. HTTPS and TLS both terminate
    /// or pass through TLS and are told apart by SNI.
    pub fn port_class(self) -> Self {
        match self {
            ProtocolType::Tls => ProtocolType::Https,
            other => other,
        }
    }

    pub fn supported_kinds(self) -> &'static [&'static str] {
        match self {
            ProtocolType::Http | ProtocolType::Https => &[HTTP_ROUTE_KIND_NAME],
            ProtocolType::Tcp | ProtocolType::Tls => &[TCP_ROUTE_KIND_NAME],
        }
    }
}

/// Where a listener was declared.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ListenerOrigin {
    Gateway(ResourceKey),
    ListenerSet(ResourceKey),
}

impl ListenerOrigin {
    pub fn resource_key(&self) -> &ResourceKey {
        match self {
            ListenerOrigin::Gateway(key) | ListenerOrigin::ListenerSet(key) => key,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TlsType {
    Terminate(Vec<SecretObjectReference>),
    Passthrough,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct ListenerConfig {
    pub name: String,
    pub port: i32,
    pub hostname: Option<String>,
    pub tls_type: Option<TlsType>,
}

impl ListenerConfig {
    pub fn new(name: String, port: i32, hostname: Option<String>) -> Self {
        Self { name, port, hostname, tls_type: None }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ListenerData {
    pub config: ListenerConfig,
    pub origin: ListenerOrigin,
    pub allowed_routes: Option<AllowedRoutes>,
    pub supported_kinds: Vec<RouteGroupKind>,
    pub has_invalid_kinds: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Listener {
    Http(ListenerData),
    Https(ListenerData),
    Tcp(ListenerData),
    Tls(ListenerData),
}

impl Listener {
    pub fn name(&self) -> &str {
        self.data().config.name.as_str()
    }

    pub fn port(&self) -> i32 {
        self.data().config.port
    }

    pub fn protocol(&self) -> ProtocolType {
        match self {
            Listener::Http(_) => ProtocolType::Http,
            Listener::Https(_) => ProtocolType::Https,
            Listener::Tcp(_) => ProtocolType::Tcp,
            Listener::Tls(_) => ProtocolType::Tls,
        }
    }

    pub fn hostname(&self) -> Option<&String> {
        self.data().config.hostname.as_ref()
    }

    /// Hostname used for conflict detection; a missing hostname matches everything.
    pub fn effective_hostname(&self) -> &str {
        self.hostname().map_or(DEFAULT_ROUTE_HOSTNAME, String::as_str)
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.data().config
    }

    pub fn origin(&self) -> &ListenerOrigin {
        &self.data().origin
    }

    pub fn data(&self) -> &ListenerData {
        match self {
            Listener::Http(listener_data) | Listener::Https(listener_data) | Listener::Tcp(listener_data) | Listener::Tls(listener_data) => {
                listener_data
            },
        }
    }

    pub fn data_mut(&mut self) -> &mut ListenerData {
        match self {
            Listener::Http(listener_data) | Listener::Https(listener_data) | Listener::Tcp(listener_data) | Listener::Tls(listener_data) => {
                listener_data
            },
        }
    }

    pub fn supported_kinds(&self) -> &[RouteGroupKind] {
        &self.data().supported_kinds
    }

    pub fn accepts_kind(&self, group: &str, kind: &str) -> bool {
        self.supported_kinds().iter().any(|k| k.kind == kind && k.group.as_deref().unwrap_or(DEFAULT_GROUP_NAME) == group)
    }
}

impl TryFrom<(&GatewayListener, ListenerOrigin)> for Listener {
    type Error = ListenerError;

    fn try_from((gateway_listener, origin): (&GatewayListener, ListenerOrigin)) -> std::result::Result<Self, Self::Error> {
        let protocol = ProtocolType::try_from(&gateway_listener.protocol)?;
        let mut config = ListenerConfig::new(gateway_listener.name.clone(), gateway_listener.port, gateway_listener.hostname.clone());

        config.tls_type = gateway_listener.tls.as_ref().map(|tls| match tls.mode {
            Some(TlsMode::Passthrough) => TlsType::Passthrough,
            Some(TlsMode::Terminate) | None => TlsType::Terminate(tls.certificate_refs.clone().unwrap_or_default()),
        });

        let (supported_kinds, has_invalid_kinds) = validate_allowed_routes(gateway_listener, protocol);

        let listener_data = ListenerData {
            config,
            origin,
            allowed_routes: gateway_listener.allowed_routes.clone(),
            supported_kinds,
            has_invalid_kinds,
        };

        Ok(match protocol {
            ProtocolType::Http => Self::Http(listener_data),
            ProtocolType::Https => Self::Https(listener_data),
            ProtocolType::Tcp => Self::Tcp(listener_data),
            ProtocolType::Tls => Self::Tls(listener_data),
        })
    }
}

#[derive(Error, Debug, PartialEq, PartialOrd)]
pub enum ListenerError {
    #[error("Unknown protocol {0}")]
    UnknownProtocol(String),
}

/// Splits the declared route kinds into the ones this protocol can serve and reports
/// whether any declared kind had to be rejected.
fn validate_allowed_routes(gateway_listener: &GatewayListener, protocol: ProtocolType) -> (Vec<RouteGroupKind>, bool) {
    let approved = protocol.supported_kinds();
    if let Some(kinds) = gateway_listener.allowed_routes.as_ref().and_then(|ar| ar.kinds.as_ref()) {
        let (supported, invalid): (Vec<_>, Vec<_>) = kinds.iter().cloned().partition(|k| {
            k.group.as_deref().filter(|g| !g.is_empty()).unwrap_or(DEFAULT_GROUP_NAME) == DEFAULT_GROUP_NAME
                && approved.contains(&k.kind.as_str())
        });
        let mut supported = supported;
        supported.sort();
        supported.dedup();
        let has_invalid = !invalid.is_empty() || supported.is_empty();
        (supported, has_invalid)
    } else {
        (
            approved.iter().map(|kind| RouteGroupKind { group: Some(DEFAULT_GROUP_NAME.to_owned()), kind: (*kind).to_owned() }).collect(),
            false,
        )
    }
}
