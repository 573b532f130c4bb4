//! The `Addon` custom resource (`harvesterhci.io/v1beta1`)

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Helm chart managed as a cluster add-on
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "harvesterhci.io",
    version = "v1beta1",
    kind = "Addon",
    plural = "addons",
    namespaced,
    status = "AddonStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct AddonSpec {
    #[serde(default)]
    pub repo: String,
    pub chart: String,
    #[serde(default)]
    pub version: String,
    /// Whether the chart should be deployed
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub values_content: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddonStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}
