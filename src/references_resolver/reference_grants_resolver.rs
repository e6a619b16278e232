use tracing::debug;

use crate::{
    common::{
        api::{ReferenceGrantFrom, ReferenceGrantTo},
        core_if_empty, ResourceKey,
    },
    state::{ResourceStore, StoreError},
};

/// The referencing side of a cross-namespace reference.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct FromResourceKey {
    pub group: String,
    pub namespace: String,
    pub kind: String,
}

impl FromResourceKey {
    fn matches(&self, from: &ReferenceGrantFrom) -> bool {
        core_if_empty(&self.group) == core_if_empty(&from.group) && self.kind == from.kind && self.namespace == from.namespace
    }
}

impl From<&ResourceKey> for FromResourceKey {
    fn from(rk: &ResourceKey) -> Self {
        Self { group: rk.group.clone(), namespace: rk.namespace.clone(), kind: rk.kind.clone() }
    }
}

/// The referenced side of a cross-namespace reference.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ToResourceKey {
    pub group: String,
    pub name: String,
    pub kind: String,
}

impl ToResourceKey {
    fn matches(&self, to: &ReferenceGrantTo) -> bool {
        core_if_empty(&self.group) == core_if_empty(&to.group)
            && self.kind == to.kind
            && to.name.as_ref().map_or(true, |name| name.is_empty() || *name == self.name)
    }
}

impl From<&ResourceKey> for ToResourceKey {
    fn from(rk: &ResourceKey) -> Self {
        Self { group: rk.group.clone(), name: rk.name.clone(), kind: rk.kind.clone() }
    }
}

pub struct ReferenceGrantsResolver<'a, S> {
    store: &'a S,
}

impl<'a, S: ResourceStore> ReferenceGrantsResolver<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// True when a grant in the target's namespace admits the reference.
    pub fn is_allowed(&self, from: &FromResourceKey, to: &ResourceKey) -> Result<bool, StoreError> {
        let grants = self.store.reference_grants(&to.namespace, &from.namespace)?;
        let to_key = ToResourceKey::from(to);
        let allowed = grants
            .iter()
            .any(|grant| grant.spec.from.iter().any(|f| from.matches(f)) && grant.spec.to.iter().any(|t| to_key.matches(t)));
        debug!("Reference from {from:?} to {to} allowed {allowed}");
        Ok(allowed)
    }
}
