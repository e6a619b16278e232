use std::{collections::BTreeMap, sync::Arc};

use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;

use super::{
    api::Upstream,
    errors::ResolveError,
    resource_key::{BackendRefKey, CORE_GROUP_NAME, KUBVERNOR_GROUP_NAME, SERVICE_KIND_NAME, UPSTREAM_KIND_NAME},
    DEFAULT_NAMESPACE_NAME,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DestinationKind {
    Service,
    Upstream,
    Unknown,
}

impl DestinationKind {
    pub fn classify(group: &str, kind: &str) -> Self {
        match (group, kind) {
            ("" | CORE_GROUP_NAME, SERVICE_KIND_NAME) => DestinationKind::Service,
            (KUBVERNOR_GROUP_NAME, UPSTREAM_KIND_NAME) => DestinationKind::Upstream,
            _ => DestinationKind::Unknown,
        }
    }
}

/// A resolved destination object.
#[derive(Clone, Debug)]
pub enum BackendObject {
    Service(Arc<Service>),
    Upstream(Arc<Upstream>),
}

impl BackendObject {
    pub fn cluster_name(&self, port: Option<i32>) -> String {
        let (name, namespace) = match self {
            BackendObject::Service(service) => (service.name_any(), service.namespace()),
            BackendObject::Upstream(upstream) => (upstream.name_any(), upstream.namespace()),
        };
        let base = name + "." + &namespace.unwrap_or(DEFAULT_NAMESPACE_NAME.to_owned());
        match (self, port) {
            (BackendObject::Service(_), Some(port)) => format!("{base}:{port}"),
            _ => base,
        }
    }
}

/// Resolution results keyed by canonical backend reference. Successes and failures are
/// kept apart so either can be queried without disturbing the other.
#[derive(Clone, Debug)]
pub struct BackendMap<T> {
    items: BTreeMap<BackendRefKey, T>,
    errors: BTreeMap<BackendRefKey, ResolveError>,
}

impl<T> Default for BackendMap<T> {
    fn default() -> Self {
        Self { items: BTreeMap::new(), errors: BTreeMap::new() }
    }
}

impl<T> BackendMap<T> {
    pub fn add(&mut self, key: BackendRefKey, value: T) {
        self.items.insert(key, value);
    }

    pub fn add_error(&mut self, key: BackendRefKey, error: ResolveError) {
        self.errors.insert(key, error);
    }

    pub fn item(&self, key: &BackendRefKey) -> Option<&T> {
        self.items.get(key)
    }

    pub fn error(&self, key: &BackendRefKey) -> Option<&ResolveError> {
        self.errors.get(key)
    }

    pub fn items(&self) -> impl Iterator<Item = (&BackendRefKey, &T)> {
        self.items.iter()
    }

    pub fn items_mut(&mut self) -> impl Iterator<Item = (&BackendRefKey, &mut T)> {
        self.items.iter_mut()
    }

    pub fn errors(&self) -> impl Iterator<Item = (&BackendRefKey, &ResolveError)> {
        self.errors.iter()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.errors.is_empty()
    }
}
