//! Stateful test doubles for multi-pass reconciliation stories
//!
//! [`FakeKube`] stores objects and applies JSON patches the way the API
//! server would, including removing a deleted object once its last finalizer
//! is gone. [`FakeVultr`] keeps servers in memory. Single-pass tests use the
//! mockall doubles instead.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};
use kube::core::ErrorResponse;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::KubeClient;
use crate::crd::{
    Cluster, ClusterSpec, ClusterStatus, Machine, MachineSpec, VultrCluster, VultrClusterSpec,
    VultrMachine, VultrMachineSpec, CLUSTER_NAME_LABEL, CONTROL_PLANE_LABEL,
};
use crate::scope::ResourcePatch;
use crate::vultr::{
    CreateServerRequest, IpType, ReservedIp, Server, SshKey, VultrClient, VultrError,
};
use crate::Error;

pub(crate) const NAMESPACE: &str = "default";

fn owner(kind: &str, name: &str) -> OwnerReference {
    OwnerReference {
        api_version: "cluster.x-k8s.io/v1alpha2".to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("uid-{}", name),
        ..Default::default()
    }
}

/// VultrCluster in region 1 owned by the named Cluster
pub(crate) fn sample_vultr_cluster(name: &str, owner_cluster: &str) -> VultrCluster {
    let mut cluster = VultrCluster::new(name, VultrClusterSpec { region: 1 });
    cluster.metadata.namespace = Some(NAMESPACE.to_string());
    cluster.metadata.owner_references = Some(vec![owner("Cluster", owner_cluster)]);
    cluster
}

/// Cluster API Cluster pointing at the named VultrCluster
pub(crate) fn sample_capi_cluster(
    name: &str,
    infrastructure: &str,
    infrastructure_ready: bool,
) -> Cluster {
    let mut cluster = Cluster::new(
        name,
        ClusterSpec {
            infrastructure_ref: Some(ObjectReference {
                api_version: Some("infrastructure.cluster.x-k8s.io/v1alpha2".to_string()),
                kind: Some("VultrCluster".to_string()),
                name: Some(infrastructure.to_string()),
                ..Default::default()
            }),
        },
    );
    cluster.metadata.namespace = Some(NAMESPACE.to_string());
    cluster.status = Some(ClusterStatus {
        infrastructure_ready,
    });
    cluster
}

/// Cluster API Machine in the named cluster
pub(crate) fn sample_capi_machine(
    name: &str,
    cluster: &str,
    control_plane: bool,
    bootstrap_data: Option<&str>,
) -> Machine {
    let mut machine = Machine::new(name, MachineSpec::default());
    machine.metadata.namespace = Some(NAMESPACE.to_string());
    let mut labels = BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), cluster.to_string())]);
    if control_plane {
        labels.insert(CONTROL_PLANE_LABEL.to_string(), "true".to_string());
    }
    machine.metadata.labels = Some(labels);
    machine.spec.bootstrap.data = bootstrap_data.map(str::to_string);
    machine
}

/// VultrMachine owned by the named Machine
pub(crate) fn sample_vultr_machine(name: &str, owner_machine: &str) -> VultrMachine {
    let mut machine = VultrMachine::new(
        name,
        VultrMachineSpec {
            plan_id: 201,
            os_id: 270,
            ssh_key_name: "deploy".to_string(),
            ..Default::default()
        },
    );
    machine.metadata.namespace = Some(NAMESPACE.to_string());
    machine.metadata.owner_references = Some(vec![owner("Machine", owner_machine)]);
    machine
}

/// Set a deletion timestamp
pub(crate) fn mark_deleted(meta: &mut ObjectMeta) {
    meta.deletion_timestamp = Some(Time(chrono::Utc::now()));
}

fn not_found(name: &str) -> Error {
    Error::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} not found", name),
        reason: "NotFound".to_string(),
        code: 404,
    }))
}

fn invalid(name: &str, error: json_patch::PatchError) -> Error {
    Error::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} patch rejected: {}", name, error),
        reason: "Invalid".to_string(),
        code: 422,
    }))
}

fn apply_patch<K>(
    store: &Mutex<BTreeMap<String, K>>,
    name: &str,
    patch: &ResourcePatch,
) -> Result<(), Error>
where
    K: Resource + Serialize + DeserializeOwned,
{
    let mut store = store.lock().unwrap();
    let current = store.get(name).ok_or_else(|| not_found(name))?;
    let mut value = serde_json::to_value(current)?;

    for ops in [&patch.status, &patch.object].into_iter().flatten() {
        json_patch::patch(&mut value, &ops.0).map_err(|e| invalid(name, e))?;
    }

    let updated: K = serde_json::from_value(value)?;
    let meta = updated.meta();
    let released = meta.deletion_timestamp.is_some()
        && meta.finalizers.as_ref().map_or(true, |f| f.is_empty());
    if released {
        store.remove(name);
    } else {
        store.insert(name.to_string(), updated);
    }
    Ok(())
}

/// In-memory Kubernetes API
#[derive(Default)]
pub(crate) struct FakeKube {
    vultr_clusters: Mutex<BTreeMap<String, VultrCluster>>,
    vultr_machines: Mutex<BTreeMap<String, VultrMachine>>,
    clusters: Mutex<BTreeMap<String, Cluster>>,
    machines: Mutex<BTreeMap<String, Machine>>,
    patches: Mutex<Vec<ResourcePatch>>,
}

impl FakeKube {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn insert_vultr_cluster(&self, cluster: VultrCluster) {
        self.vultr_clusters
            .lock()
            .unwrap()
            .insert(cluster.metadata.name.clone().unwrap(), cluster);
    }

    pub(crate) fn insert_vultr_machine(&self, machine: VultrMachine) {
        self.vultr_machines
            .lock()
            .unwrap()
            .insert(machine.metadata.name.clone().unwrap(), machine);
    }

    pub(crate) fn insert_cluster(&self, cluster: Cluster) {
        self.clusters
            .lock()
            .unwrap()
            .insert(cluster.metadata.name.clone().unwrap(), cluster);
    }

    pub(crate) fn insert_machine(&self, machine: Machine) {
        self.machines
            .lock()
            .unwrap()
            .insert(machine.metadata.name.clone().unwrap(), machine);
    }

    pub(crate) fn vultr_cluster(&self, name: &str) -> VultrCluster {
        self.vultr_clusters.lock().unwrap()[name].clone()
    }

    pub(crate) fn vultr_cluster_arc(&self, name: &str) -> Arc<VultrCluster> {
        Arc::new(self.vultr_cluster(name))
    }

    pub(crate) fn has_vultr_cluster(&self, name: &str) -> bool {
        self.vultr_clusters.lock().unwrap().contains_key(name)
    }

    pub(crate) fn vultr_machine(&self, name: &str) -> VultrMachine {
        self.vultr_machines.lock().unwrap()[name].clone()
    }

    pub(crate) fn vultr_machine_arc(&self, name: &str) -> Arc<VultrMachine> {
        Arc::new(self.vultr_machine(name))
    }

    pub(crate) fn has_vultr_machine(&self, name: &str) -> bool {
        self.vultr_machines.lock().unwrap().contains_key(name)
    }

    pub(crate) fn patch_count(&self) -> usize {
        self.patches.lock().unwrap().len()
    }
}

#[async_trait]
impl KubeClient for FakeKube {
    async fn get_vultr_cluster(
        &self,
        _namespace: &str,
        name: &str,
    ) -> Result<Option<VultrCluster>, Error> {
        Ok(self.vultr_clusters.lock().unwrap().get(name).cloned())
    }

    async fn get_vultr_machine(
        &self,
        _namespace: &str,
        name: &str,
    ) -> Result<Option<VultrMachine>, Error> {
        Ok(self.vultr_machines.lock().unwrap().get(name).cloned())
    }

    async fn get_cluster(&self, _namespace: &str, name: &str) -> Result<Option<Cluster>, Error> {
        Ok(self.clusters.lock().unwrap().get(name).cloned())
    }

    async fn get_machine(&self, _namespace: &str, name: &str) -> Result<Option<Machine>, Error> {
        Ok(self.machines.lock().unwrap().get(name).cloned())
    }

    async fn patch_vultr_cluster(
        &self,
        _namespace: &str,
        name: &str,
        patch: &ResourcePatch,
    ) -> Result<(), Error> {
        self.patches.lock().unwrap().push(patch.clone());
        apply_patch(&self.vultr_clusters, name, patch)
    }

    async fn patch_vultr_machine(
        &self,
        _namespace: &str,
        name: &str,
        patch: &ResourcePatch,
    ) -> Result<(), Error> {
        self.patches.lock().unwrap().push(patch.clone());
        apply_patch(&self.vultr_machines, name, patch)
    }
}

/// In-memory Vultr account
#[derive(Default)]
pub(crate) struct FakeVultr {
    servers: Mutex<Vec<Server>>,
    ssh_keys: Mutex<Vec<SshKey>>,
    created: Mutex<Vec<CreateServerRequest>>,
    destroyed: Mutex<Vec<String>>,
    next_id: Mutex<u64>,
}

impl FakeVultr {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: Mutex::new(576965),
            ..Default::default()
        })
    }

    pub(crate) fn add_ssh_key(&self, id: &str, name: &str) {
        self.ssh_keys.lock().unwrap().push(SshKey {
            id: id.to_string(),
            name: name.to_string(),
        });
    }

    /// Add a running server that the reconciler did not create
    pub(crate) fn add_server(&self, id: &str, label: &str, tag: &str) {
        self.servers.lock().unwrap().push(Server {
            id: id.to_string(),
            label: label.to_string(),
            tag: tag.to_string(),
            main_ip: "123.123.123.123".to_string(),
            status: "active".to_string(),
            power_status: "running".to_string(),
            server_state: "ok".to_string(),
        });
    }

    pub(crate) fn created(&self) -> Vec<CreateServerRequest> {
        self.created.lock().unwrap().clone()
    }

    pub(crate) fn destroyed(&self) -> Vec<String> {
        self.destroyed.lock().unwrap().clone()
    }

    pub(crate) fn server_count(&self) -> usize {
        self.servers.lock().unwrap().len()
    }
}

#[async_trait]
impl VultrClient for FakeVultr {
    async fn get_server(&self, id: &str) -> Result<Server, VultrError> {
        self.servers
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| VultrError::NotFound("Invalid server.".to_string()))
    }

    async fn list_servers_by_tag(&self, tag: &str) -> Result<Vec<Server>, VultrError> {
        Ok(self
            .servers
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.tag == tag)
            .cloned()
            .collect())
    }

    async fn create_server(&self, request: &CreateServerRequest) -> Result<String, VultrError> {
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            next.to_string()
        };
        self.created.lock().unwrap().push(request.clone());
        self.servers.lock().unwrap().push(Server {
            id: id.clone(),
            label: request.label.clone(),
            tag: request.tag.clone(),
            status: "pending".to_string(),
            power_status: "stopped".to_string(),
            server_state: "none".to_string(),
            ..Default::default()
        });
        Ok(id)
    }

    async fn destroy_server(&self, id: &str) -> Result<(), VultrError> {
        let mut servers = self.servers.lock().unwrap();
        let before = servers.len();
        servers.retain(|s| s.id != id);
        if servers.len() == before {
            return Err(VultrError::NotFound("Invalid server.".to_string()));
        }
        self.destroyed.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn create_reserved_ip(
        &self,
        _region: i64,
        _ip_type: IpType,
        _label: &str,
    ) -> Result<String, VultrError> {
        Err(VultrError::Api {
            status: 501,
            message: "reserved IPs are not simulated".to_string(),
        })
    }

    async fn list_reserved_ips(&self) -> Result<Vec<ReservedIp>, VultrError> {
        Ok(Vec::new())
    }

    async fn destroy_reserved_ip(&self, id: &str) -> Result<(), VultrError> {
        Err(VultrError::NotFound(format!("reserved IP {}", id)))
    }

    async fn list_ssh_keys(&self) -> Result<Vec<SshKey>, VultrError> {
        Ok(self.ssh_keys.lock().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn rejected_patch_leaves_object_untouched() {
        let kube = FakeKube::new();
        kube.insert_vultr_cluster(sample_vultr_cluster("mycluster", "mycluster"));

        let patch = ResourcePatch {
            object: Some(serde_json::from_value(json!([
                { "op": "replace", "path": "/spec/region", "value": 2 },
                { "op": "remove", "path": "/metadata/finalizers/0" }
            ]))
            .unwrap()),
            status: None,
        };
        let result = kube.patch_vultr_cluster(NAMESPACE, "mycluster", &patch).await;

        assert!(matches!(result, Err(Error::Kube(kube::Error::Api(ref e))) if e.code == 422));
        assert_eq!(kube.vultr_cluster("mycluster").spec.region, 1);
    }

    #[tokio::test]
    async fn removing_last_finalizer_of_deleted_object_deletes_it() {
        let kube = FakeKube::new();
        let mut cluster = sample_vultr_cluster("mycluster", "mycluster");
        cluster.metadata.finalizers = Some(vec!["x".to_string()]);
        mark_deleted(&mut cluster.metadata);
        kube.insert_vultr_cluster(cluster);

        let patch = ResourcePatch {
            object: Some(serde_json::from_value(json!([
                { "op": "remove", "path": "/metadata/finalizers/0" }
            ]))
            .unwrap()),
            status: None,
        };
        kube.patch_vultr_cluster(NAMESPACE, "mycluster", &patch)
            .await
            .unwrap();
        assert!(!kube.has_vultr_cluster("mycluster"));
    }
}
