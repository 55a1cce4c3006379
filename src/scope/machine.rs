//! Scope for one VultrMachine reconciliation pass

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, warn};

use super::patch::PatchHelper;
use crate::controller::KubeClient;
use crate::crd::{
    add_finalizer, remove_finalizer, Cluster, Machine, PowerStatus, ServerState,
    SubscriptionStatus, VultrCluster, VultrMachine, MACHINE_FINALIZER,
};
use crate::provider_id::ProviderId;
use crate::vultr::{ownership_tag, Server, VultrClient};
use crate::{Error, Result};

/// Inputs for [`MachineScope::new`]
pub struct MachineScopeParams {
    /// Kubernetes persistence
    pub kube: Arc<dyn KubeClient>,
    /// Vultr API
    pub vultr: Arc<dyn VultrClient>,
    /// Owning Cluster API cluster
    pub cluster: Cluster,
    /// Owning Cluster API machine
    pub machine: Machine,
    /// Infrastructure cluster the machine lives in
    pub vultr_cluster: VultrCluster,
    /// The resource being reconciled
    pub vultr_machine: VultrMachine,
}

/// Transaction object for a VultrMachine
///
/// Only the VultrMachine is persisted on close; the owner chain is read-only
/// context.
pub struct MachineScope {
    kube: Arc<dyn KubeClient>,
    vultr: Arc<dyn VultrClient>,
    cluster: Cluster,
    machine: Machine,
    vultr_cluster: VultrCluster,
    vultr_machine: VultrMachine,
    namespace: String,
    patch: PatchHelper,
    closed: bool,
}

impl MachineScope {
    /// Open a scope, snapshotting the VultrMachine
    pub fn new(params: MachineScopeParams) -> Result<Self> {
        let namespace = params
            .vultr_machine
            .namespace()
            .ok_or_else(|| Error::scope("VultrMachine has no namespace"))?;
        if params.vultr_machine.metadata.name.is_none() {
            return Err(Error::scope("VultrMachine has no name"));
        }
        let patch = PatchHelper::new(&params.vultr_machine)?;

        Ok(Self {
            kube: params.kube,
            vultr: params.vultr,
            cluster: params.cluster,
            machine: params.machine,
            vultr_cluster: params.vultr_cluster,
            vultr_machine: params.vultr_machine,
            namespace,
            patch,
            closed: false,
        })
    }

    /// VultrMachine name; also the instance label and hostname
    pub fn name(&self) -> String {
        self.vultr_machine.name_any()
    }

    /// Vultr API handle
    pub fn vultr(&self) -> &dyn VultrClient {
        self.vultr.as_ref()
    }

    /// The resource as currently mutated
    pub fn vultr_machine(&self) -> &VultrMachine {
        &self.vultr_machine
    }

    /// Whether the resource is being deleted
    pub fn is_deleting(&self) -> bool {
        self.vultr_machine.metadata.deletion_timestamp.is_some()
    }

    /// Whether the owning Machine is a control plane member
    pub fn is_control_plane(&self) -> bool {
        self.machine.is_control_plane()
    }

    /// Whether the owning Cluster reports its infrastructure ready
    pub fn cluster_infrastructure_ready(&self) -> bool {
        self.cluster.infrastructure_ready()
    }

    /// Base64 bootstrap payload from the owning Machine
    pub fn bootstrap_data(&self) -> Option<&str> {
        self.machine.bootstrap_data()
    }

    /// Datacenter of the infrastructure cluster
    pub fn region(&self) -> i64 {
        self.vultr_cluster.spec.region
    }

    /// Tag marking instances as owned by the infrastructure cluster
    pub fn ownership_tag(&self) -> String {
        ownership_tag(&self.vultr_cluster.name_any())
    }

    /// Address of the cluster's first reserved IP, if resolved
    pub fn control_plane_address(&self) -> Option<&str> {
        self.vultr_cluster
            .api_endpoints()
            .first()
            .map(|e| e.host.as_str())
            .filter(|host| !host.is_empty())
    }

    /// Recorded provider id
    pub fn provider_id(&self) -> Option<&str> {
        self.vultr_machine.provider_id()
    }

    /// Record the provider id of the backing instance
    pub fn set_provider_id(&mut self, id: &ProviderId) {
        self.vultr_machine.spec.provider_id = Some(id.to_string());
    }

    /// Set readiness
    pub fn set_ready(&mut self, ready: bool) {
        self.vultr_machine.status_mut().ready = ready;
    }

    /// Copy the observed instance state into the status
    pub fn set_server_status(&mut self, server: &Server) {
        let status = self.vultr_machine.status_mut();
        status.subscription_status = SubscriptionStatus::from_api(&server.status);
        status.power_status = PowerStatus::from_api(&server.power_status);
        status.server_state = ServerState::from_api(&server.server_state);
    }

    /// Add the machine finalizer if absent
    pub fn add_finalizer(&mut self) -> bool {
        add_finalizer(&mut self.vultr_machine.metadata, MACHINE_FINALIZER)
    }

    /// Remove the machine finalizer
    pub fn remove_finalizer(&mut self) -> bool {
        remove_finalizer(&mut self.vultr_machine.metadata, MACHINE_FINALIZER)
    }

    /// Persist changes made since the scope was opened
    pub async fn close(&mut self) -> Result<()> {
        self.closed = true;

        let patch = self.patch.diff(&self.vultr_machine)?;
        if patch.is_empty() {
            debug!("no VultrMachine changes to persist");
            return Ok(());
        }

        let name = self.name();
        self.kube
            .patch_vultr_machine(&self.namespace, &name, &patch)
            .await?;
        debug!(name = %name, "persisted VultrMachine changes");
        Ok(())
    }

    /// Close the scope and combine the close result with the pass outcome
    pub async fn finish(mut self, outcome: Result<Action>) -> Result<Action> {
        let closed = self.close().await;
        match (outcome, closed) {
            (Ok(action), Ok(())) => Ok(action),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!(error = %close_err, "failed to persist VultrMachine after failed pass");
                Err(e)
            }
        }
    }
}

impl Drop for MachineScope {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                vultr_machine = %self.vultr_machine.name_any(),
                "machine scope dropped without close; changes were not persisted"
            );
        }
    }
}
