use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{HTTPBackendRef, ParentReference, RouteParentStatus};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1alpha2",
    kind = "TCPRoute",
    plural = "tcproutes",
    status = "TCPRouteStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TCPRouteSpec {
    pub parent_refs: Option<Vec<ParentReference>>,
    pub rules: Vec<TCPRouteRule>,
}

/// Backend references of a TCPRoute have the same shape as the HTTPRoute ones.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TCPRouteRule {
    pub backend_refs: Option<Vec<HTTPBackendRef>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TCPRouteStatus {
    pub parents: Vec<RouteParentStatus>,
}
