use thiserror::Error;

use super::ResourceKey;
use crate::state::StoreError;

/// Reasons a single reference could not be resolved. These are stored as values next
/// to the reference that produced them and surfaced as status conditions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Reference from {from} to {to} is not permitted by any ReferenceGrant")]
    MissingReferenceGrant { from: String, to: ResourceKey },
    #[error("Kind {0} is not a supported destination")]
    UnknownKind(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("No routes selected by {0}")]
    UnresolvedReference(String),
    #[error("Delegation from {parent} to {child} would create a cycle")]
    CyclicReference { parent: ResourceKey, child: ResourceKey },
    #[error("Wildcard namespace selection is not allowed for {0}")]
    WildcardNamespaceDisallowed(String),
}

impl ResolveError {
    pub fn is_not_permitted(&self) -> bool {
        matches!(
            self,
            ResolveError::MissingReferenceGrant { .. } | ResolveError::CyclicReference { .. } | ResolveError::WildcardNamespaceDisallowed(_)
        )
    }
}
