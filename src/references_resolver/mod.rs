mod reference_grants_resolver;

use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
pub use reference_grants_resolver::{FromResourceKey, ReferenceGrantsResolver, ToResourceKey};
use tracing::debug;

use crate::{
    common::{
        api::SecretObjectReference, core_if_empty, BackendObject, BackendRefKey, DestinationKind, ResolveError, ResourceKey,
        CORE_GROUP_NAME, DEFAULT_GROUP_NAME, DEFAULT_KIND_NAME, HTTP_ROUTE_KIND_NAME, SECRET_KIND_NAME, TCP_ROUTE_KIND_NAME,
    },
    state::ResourceStore,
};

impl FromResourceKey {
    pub fn http_route(namespace: &str) -> Self {
        Self { group: DEFAULT_GROUP_NAME.to_owned(), namespace: namespace.to_owned(), kind: HTTP_ROUTE_KIND_NAME.to_owned() }
    }

    pub fn tcp_route(namespace: &str) -> Self {
        Self { group: DEFAULT_GROUP_NAME.to_owned(), namespace: namespace.to_owned(), kind: TCP_ROUTE_KIND_NAME.to_owned() }
    }

    pub fn gateway(namespace: &str) -> Self {
        Self { group: DEFAULT_GROUP_NAME.to_owned(), namespace: namespace.to_owned(), kind: DEFAULT_KIND_NAME.to_owned() }
    }
}

/// Resolves destination and secret references against a store snapshot, enforcing
/// ReferenceGrants for cross-namespace references.
pub struct ReferenceResolver<'a, S> {
    store: &'a S,
    grants: ReferenceGrantsResolver<'a, S>,
}

impl<'a, S: ResourceStore> ReferenceResolver<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store, grants: ReferenceGrantsResolver::new(store) }
    }

    fn check_grant(&self, from: &FromResourceKey, to: &ResourceKey) -> Result<(), ResolveError> {
        if to.namespace == from.namespace || self.grants.is_allowed(from, to)? {
            Ok(())
        } else {
            debug!("Missing reference grant from {from:?} to {to}");
            Err(ResolveError::MissingReferenceGrant { from: format!("{}/{} {}", from.group, from.kind, from.namespace), to: to.clone() })
        }
    }

    pub fn resolve_backend(&self, from: &FromResourceKey, backend_ref: &BackendRefKey) -> Result<BackendObject, ResolveError> {
        let to = backend_ref.resource_key();
        self.check_grant(from, &to)?;
        match DestinationKind::classify(&backend_ref.group, &backend_ref.kind) {
            DestinationKind::Service => Ok(BackendObject::Service(self.store.service(&to.namespace, &to.name)?)),
            DestinationKind::Upstream => Ok(BackendObject::Upstream(self.store.upstream(&to.namespace, &to.name)?)),
            DestinationKind::Unknown => Err(ResolveError::UnknownKind(format!("{}/{}", core_if_empty(&backend_ref.group), backend_ref.kind))),
        }
    }

    pub fn resolve_secret(&self, from: &FromResourceKey, secret_ref: &SecretObjectReference) -> Result<Arc<Secret>, ResolveError> {
        let group = secret_ref.group.clone().unwrap_or_default();
        let to = ResourceKey {
            group: if group == CORE_GROUP_NAME { String::new() } else { group },
            namespace: secret_ref.namespace.clone().unwrap_or(from.namespace.clone()),
            name: secret_ref.name.clone(),
            kind: secret_ref.kind.clone().unwrap_or(SECRET_KIND_NAME.to_owned()),
        };
        self.check_grant(from, &to)?;
        if !to.group.is_empty() || to.kind != SECRET_KIND_NAME {
            return Err(ResolveError::UnknownKind(format!("{}/{}", core_if_empty(&to.group), to.kind)));
        }
        Ok(self.store.secret(&to.namespace, &to.name)?)
    }
}
