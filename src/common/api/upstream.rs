use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A destination that is not backed by a Service, e.g. an external host.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "kubvernor.io", version = "v1alpha1", kind = "Upstream", plural = "upstreams", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamSpec {
    pub hosts: Vec<UpstreamHost>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamHost {
    pub host: String,
    pub port: i32,
}
