//! Scope for one VultrCluster reconciliation pass

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, warn};

use super::patch::PatchHelper;
use crate::controller::KubeClient;
use crate::crd::{
    add_finalizer, remove_finalizer, APIEndpoint, Cluster, VultrCluster, CLUSTER_FINALIZER,
};
use crate::vultr::VultrClient;
use crate::{Error, Result};

/// Inputs for [`ClusterScope::new`]
pub struct ClusterScopeParams {
    /// Kubernetes persistence
    pub kube: Arc<dyn KubeClient>,
    /// Vultr API
    pub vultr: Arc<dyn VultrClient>,
    /// Owning Cluster API cluster
    pub cluster: Cluster,
    /// The resource being reconciled
    pub vultr_cluster: VultrCluster,
}

/// Transaction object for a VultrCluster
///
/// Mutations happen in memory; [`ClusterScope::close`] persists whatever
/// changed since the scope was opened.
pub struct ClusterScope {
    kube: Arc<dyn KubeClient>,
    vultr: Arc<dyn VultrClient>,
    cluster: Cluster,
    vultr_cluster: VultrCluster,
    namespace: String,
    patch: PatchHelper,
    closed: bool,
}

impl ClusterScope {
    /// Open a scope, snapshotting the VultrCluster
    pub fn new(params: ClusterScopeParams) -> Result<Self> {
        let namespace = params
            .vultr_cluster
            .namespace()
            .ok_or_else(|| Error::scope("VultrCluster has no namespace"))?;
        if params.vultr_cluster.metadata.name.is_none() {
            return Err(Error::scope("VultrCluster has no name"));
        }
        let patch = PatchHelper::new(&params.vultr_cluster)?;

        Ok(Self {
            kube: params.kube,
            vultr: params.vultr,
            cluster: params.cluster,
            vultr_cluster: params.vultr_cluster,
            namespace,
            patch,
            closed: false,
        })
    }

    /// VultrCluster name
    pub fn name(&self) -> String {
        self.vultr_cluster.name_any()
    }

    /// Name of the owning Cluster API cluster
    pub fn cluster_name(&self) -> String {
        self.cluster.name_any()
    }

    /// Vultr datacenter id
    pub fn region(&self) -> i64 {
        self.vultr_cluster.spec.region
    }

    /// Vultr API handle
    pub fn vultr(&self) -> &dyn VultrClient {
        self.vultr.as_ref()
    }

    /// The resource as currently mutated
    pub fn vultr_cluster(&self) -> &VultrCluster {
        &self.vultr_cluster
    }

    /// Whether the resource is being deleted
    pub fn is_deleting(&self) -> bool {
        self.vultr_cluster.metadata.deletion_timestamp.is_some()
    }

    /// Recorded API endpoints
    pub fn api_endpoints(&self) -> &[APIEndpoint] {
        self.vultr_cluster.api_endpoints()
    }

    /// Record a new API endpoint
    pub fn add_api_endpoint(&mut self, endpoint: APIEndpoint) {
        self.vultr_cluster.status_mut().api_endpoints.push(endpoint);
    }

    /// Fill in the host of a recorded endpoint
    pub fn set_api_endpoint_host(&mut self, id: &str, host: &str) {
        if let Some(endpoint) = self
            .vultr_cluster
            .status_mut()
            .api_endpoints
            .iter_mut()
            .find(|e| e.id == id)
        {
            endpoint.host = host.to_string();
        }
    }

    /// Drop a released endpoint from the status
    pub fn remove_api_endpoint(&mut self, id: &str) {
        self.vultr_cluster
            .status_mut()
            .api_endpoints
            .retain(|e| e.id != id);
    }

    /// Set readiness; never reports ready without an endpoint
    pub fn set_ready(&mut self, ready: bool) {
        let ready = ready && !self.api_endpoints().is_empty();
        self.vultr_cluster.status_mut().ready = ready;
    }

    /// Add the cluster finalizer if absent
    pub fn add_finalizer(&mut self) -> bool {
        add_finalizer(&mut self.vultr_cluster.metadata, CLUSTER_FINALIZER)
    }

    /// Remove the cluster finalizer
    pub fn remove_finalizer(&mut self) -> bool {
        remove_finalizer(&mut self.vultr_cluster.metadata, CLUSTER_FINALIZER)
    }

    /// Persist changes made since the scope was opened
    pub async fn close(&mut self) -> Result<()> {
        self.closed = true;

        let patch = self.patch.diff(&self.vultr_cluster)?;
        if patch.is_empty() {
            debug!("no VultrCluster changes to persist");
            return Ok(());
        }

        let name = self.name();
        self.kube
            .patch_vultr_cluster(&self.namespace, &name, &patch)
            .await?;
        debug!(name = %name, "persisted VultrCluster changes");
        Ok(())
    }

    /// Close the scope and combine the close result with the pass outcome
    ///
    /// A failed pass keeps its own error; a close failure is reported only
    /// when the pass succeeded.
    pub async fn finish(mut self, outcome: Result<Action>) -> Result<Action> {
        let closed = self.close().await;
        match (outcome, closed) {
            (Ok(action), Ok(())) => Ok(action),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!(error = %close_err, "failed to persist VultrCluster after failed pass");
                Err(e)
            }
        }
    }
}

impl Drop for ClusterScope {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                vultr_cluster = %self.vultr_cluster.name_any(),
                "cluster scope dropped without close; changes were not persisted"
            );
        }
    }
}
