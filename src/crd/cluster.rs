//! VultrCluster Custom Resource Definition
//!
//! A VultrCluster is the infrastructure half of a Cluster API `Cluster`. It
//! owns the reserved IP that fronts the cluster's API server.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::APIEndpoint;

/// Finalizer guarding release of the cluster's reserved IPs
pub const CLUSTER_FINALIZER: &str = "vultrcluster.infrastructure.cluster.x-k8s.io";

/// Specification for a VultrCluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1alpha2",
    kind = "VultrCluster",
    plural = "vultrclusters",
    status = "VultrClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Region","type":"integer","jsonPath":".spec.region"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VultrClusterSpec {
    /// Vultr datacenter id (DCID) the cluster lives in
    pub region: i64,
}

/// Status for a VultrCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VultrClusterStatus {
    /// Infrastructure is ready; implies at least one API endpoint
    #[serde(default)]
    pub ready: bool,

    /// Reserved endpoints for the API server
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_endpoints: Vec<APIEndpoint>,
}

impl VultrCluster {
    /// Recorded API endpoints
    pub fn api_endpoints(&self) -> &[APIEndpoint] {
        self.status
            .as_ref()
            .map(|s| s.api_endpoints.as_slice())
            .unwrap_or_default()
    }

    /// Whether the infrastructure has been marked ready
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.ready)
    }

    /// Mutable status, created on first use
    pub fn status_mut(&mut self) -> &mut VultrClusterStatus {
        self.status.get_or_insert_with(Default::default)
    }
}
