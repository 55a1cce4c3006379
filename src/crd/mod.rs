//! Custom Resource Definitions for the Vultr provider
//!
//! `VultrCluster` and `VultrMachine` are owned by this provider; the Cluster
//! API `Cluster` and `Machine` types are read-only views of upstream objects.

mod capi;
mod cluster;
mod machine;
mod types;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

pub use capi::{
    capi_owner_name, Bootstrap, Cluster, ClusterSpec, ClusterStatus, Machine, MachineSpec,
    CAPI_GROUP, CLUSTER_NAME_LABEL, CONTROL_PLANE_LABEL,
};
pub use cluster::{VultrCluster, VultrClusterSpec, VultrClusterStatus, CLUSTER_FINALIZER};
pub use machine::{VultrMachine, VultrMachineSpec, VultrMachineStatus, MACHINE_FINALIZER};
pub use types::{APIEndpoint, PowerStatus, ServerState, SubscriptionStatus};

/// Check if the object carries the given finalizer
pub fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == finalizer))
}

/// Add a finalizer unless already present
///
/// Returns true if the list changed.
pub fn add_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    if has_finalizer(meta, finalizer) {
        return false;
    }
    meta.finalizers
        .get_or_insert_with(Vec::new)
        .push(finalizer.to_string());
    true
}

/// Remove every occurrence of a finalizer
///
/// Returns true if the list changed.
pub fn remove_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    let Some(finalizers) = meta.finalizers.as_mut() else {
        return false;
    };
    let before = finalizers.len();
    finalizers.retain(|f| f != finalizer);
    finalizers.len() != before
}
