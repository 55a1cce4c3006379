//! Read-only views of the Cluster API core types
//!
//! Only the fields the reconcilers consume are modelled; everything else in
//! the upstream objects is ignored on deserialization. The schema is owned by
//! Cluster API, so these types never generate a CRD.

use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// API group of the Cluster API core types
pub const CAPI_GROUP: &str = "cluster.x-k8s.io";

/// Label on a Machine naming the Cluster it belongs to
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Label marking a Machine as a control plane member
pub const CONTROL_PLANE_LABEL: &str = "cluster.x-k8s.io/control-plane";

/// Cluster API `Cluster` spec (subset)
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1alpha2",
    kind = "Cluster",
    plural = "clusters",
    status = "ClusterStatus",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Reference to the provider-specific cluster object (our VultrCluster)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,
}

/// Cluster API `Cluster` status (subset)
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Infrastructure provider reports ready
    #[serde(default)]
    pub infrastructure_ready: bool,
}

/// Cluster API `Machine` spec (subset)
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1alpha2",
    kind = "Machine",
    plural = "machines",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Bootstrap configuration
    #[serde(default)]
    pub bootstrap: Bootstrap,

    /// Reference to the provider-specific machine object (our VultrMachine)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,
}

/// Bootstrap section of a Machine spec
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bootstrap {
    /// Base64-encoded bootstrap payload, set once the bootstrap provider is done
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Cluster {
    /// Whether the infrastructure provider has reported ready
    pub fn infrastructure_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.infrastructure_ready)
    }

    /// Name of the referenced infrastructure cluster
    pub fn infrastructure_name(&self) -> Option<&str> {
        self.spec
            .infrastructure_ref
            .as_ref()
            .and_then(|r| r.name.as_deref())
    }
}

impl Machine {
    /// Name of the owning Cluster, from the cluster-name label
    pub fn cluster_name(&self) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(CLUSTER_NAME_LABEL))
            .map(String::as_str)
            .filter(|n| !n.is_empty())
    }

    /// Whether this machine is a control plane member
    pub fn is_control_plane(&self) -> bool {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(CONTROL_PLANE_LABEL))
            .is_some_and(|v| v == "true")
    }

    /// Bootstrap payload, if the bootstrap provider has produced it
    pub fn bootstrap_data(&self) -> Option<&str> {
        self.spec.bootstrap.data.as_deref()
    }
}

/// Name of the Cluster API owner of the given kind, if any
///
/// Matches on kind and API group only, so any Cluster API version counts.
pub fn capi_owner_name(meta: &ObjectMeta, kind: &str) -> Option<String> {
    meta.owner_references.as_ref()?.iter().find_map(|owner| {
        let group = owner.api_version.split('/').next().unwrap_or_default();
        (owner.kind == kind && group == CAPI_GROUP).then(|| owner.name.clone())
    })
}
