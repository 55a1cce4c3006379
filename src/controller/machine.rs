//! VultrMachine controller implementation
//!
//! Each VultrMachine is backed by one Vultr instance. Provisioning waits for
//! the owning cluster's infrastructure and the machine's bootstrap data, then
//! finds or creates the instance and records its provider id. Deletion
//! destroys the instance before the finalizer is released.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use super::{requeue_after_error, Context, READY_REQUEUE, WAIT_REQUEUE};
use crate::crd::{capi_owner_name, Cluster, Machine, VultrCluster, VultrMachine};
use crate::provider_id::ProviderId;
use crate::scope::{MachineScope, MachineScopeParams};
use crate::vultr::{CreateServerRequest, Server};
use crate::{Error, Result};

/// Owner chain of a VultrMachine
struct Owners {
    machine: Machine,
    cluster: Cluster,
    vultr_cluster: VultrCluster,
}

/// Reconcile a VultrMachine resource
#[instrument(skip(vultr_machine, ctx), fields(vultr_machine = %vultr_machine.name_any()))]
pub async fn reconcile_machine(
    vultr_machine: Arc<VultrMachine>,
    ctx: Arc<Context>,
) -> Result<Action> {
    let name = vultr_machine.name_any();
    let namespace = vultr_machine
        .namespace()
        .ok_or_else(|| Error::scope("VultrMachine has no namespace"))?;

    let Some(vultr_machine) = ctx.kube.get_vultr_machine(&namespace, &name).await? else {
        debug!("VultrMachine no longer exists");
        return Ok(Action::await_change());
    };

    let Some(owners) = resolve_owners(&ctx, &namespace, &vultr_machine).await? else {
        return Ok(Action::requeue(WAIT_REQUEUE));
    };

    let mut scope = MachineScope::new(MachineScopeParams {
        kube: ctx.kube.clone(),
        vultr: ctx.vultr.clone(),
        cluster: owners.cluster,
        machine: owners.machine,
        vultr_cluster: owners.vultr_cluster,
        vultr_machine,
    })?;

    let outcome = if scope.is_deleting() {
        reconcile_delete(&mut scope).await
    } else {
        reconcile_normal(&mut scope).await
    };
    scope.finish(outcome).await
}

/// Walk VultrMachine -> Machine -> Cluster -> VultrCluster
///
/// Any missing link means another controller has not caught up yet; it is
/// logged and the pass ends without error.
async fn resolve_owners(
    ctx: &Context,
    namespace: &str,
    vultr_machine: &VultrMachine,
) -> Result<Option<Owners>> {
    let Some(machine_name) = capi_owner_name(&vultr_machine.metadata, "Machine") else {
        info!("waiting for Machine controller to set owner reference");
        return Ok(None);
    };
    let Some(machine) = ctx.kube.get_machine(namespace, &machine_name).await? else {
        info!(machine = %machine_name, "owner Machine not found");
        return Ok(None);
    };

    let Some(cluster_name) = machine.cluster_name().map(str::to_string) else {
        info!(machine = %machine_name, "Machine is missing cluster label");
        return Ok(None);
    };
    let Some(cluster) = ctx.kube.get_cluster(namespace, &cluster_name).await? else {
        info!(cluster = %cluster_name, "Cluster not found");
        return Ok(None);
    };

    let Some(infra_name) = cluster.infrastructure_name().map(str::to_string) else {
        info!(cluster = %cluster_name, "Cluster has no infrastructure reference");
        return Ok(None);
    };
    let Some(vultr_cluster) = ctx.kube.get_vultr_cluster(namespace, &infra_name).await? else {
        info!(vultr_cluster = %infra_name, "VultrCluster not found");
        return Ok(None);
    };

    Ok(Some(Owners {
        machine,
        cluster,
        vultr_cluster,
    }))
}

/// Find the instance backing this machine
///
/// A recorded provider id wins. Without one, or when the id lookup is
/// inconclusive, instances tagged for the cluster are matched by label.
async fn find_server(scope: &MachineScope) -> Result<Option<Server>> {
    if let Some(raw) = scope.provider_id() {
        let provider_id: ProviderId = raw.parse()?;
        match scope.vultr().get_server(provider_id.instance_id()).await {
            Ok(server) => return Ok(Some(server)),
            Err(e) if e.is_not_found() => {
                debug!(provider_id = %raw, "recorded instance no longer exists");
                return Ok(None);
            }
            Err(e) => {
                warn!(provider_id = %raw, error = %e, "instance lookup failed, falling back to tag");
            }
        }
    }

    let name = scope.name();
    let servers = scope
        .vultr()
        .list_servers_by_tag(&scope.ownership_tag())
        .await?;
    Ok(servers.into_iter().find(|s| s.label == name))
}

async fn reconcile_delete(scope: &mut MachineScope) -> Result<Action> {
    info!("deleting machine");

    match find_server(scope).await? {
        Some(server) => match scope.vultr().destroy_server(&server.id).await {
            Ok(()) => info!(instance = %server.id, "destroyed instance"),
            Err(e) if e.is_not_found() => info!(instance = %server.id, "instance already gone"),
            Err(e) => return Err(e.into()),
        },
        None => info!("no instance to destroy"),
    }

    scope.set_ready(false);
    if scope.remove_finalizer() {
        info!("removed finalizer");
    }
    Ok(Action::await_change())
}

async fn reconcile_normal(scope: &mut MachineScope) -> Result<Action> {
    if scope.add_finalizer() {
        debug!("added finalizer");
    }

    if !scope.cluster_infrastructure_ready() {
        info!("waiting for cluster infrastructure to be ready");
        return Ok(Action::requeue(WAIT_REQUEUE));
    }

    if scope.bootstrap_data().is_none() {
        info!("waiting for bootstrap data to be available");
        return Ok(Action::requeue(WAIT_REQUEUE));
    }

    let requeue = match find_server(scope).await? {
        Some(server) => {
            debug!(instance = %server.id, "found existing instance");
            scope.set_server_status(&server);
            scope.set_provider_id(&ProviderId::new(&server.id));
            if is_settled(&server) {
                READY_REQUEUE
            } else {
                WAIT_REQUEUE
            }
        }
        None => {
            let Some(id) = create_server(scope).await? else {
                return Ok(Action::requeue(WAIT_REQUEUE));
            };
            scope.set_provider_id(&ProviderId::new(&id));
            WAIT_REQUEUE
        }
    };

    if !scope.vultr_machine().is_ready() {
        info!("machine ready");
    }
    scope.set_ready(true);
    Ok(Action::requeue(requeue))
}

/// Create the instance, returning its id
///
/// Returns `None` when a control plane machine has no API endpoint address
/// to attach yet.
async fn create_server(scope: &MachineScope) -> Result<Option<String>> {
    let reserved_ip_v4 = if scope.is_control_plane() {
        let Some(address) = scope.control_plane_address() else {
            info!("waiting for cluster API endpoint address");
            return Ok(None);
        };
        Some(address.to_string())
    } else {
        None
    };

    let spec = &scope.vultr_machine().spec;
    let ssh_key_id = resolve_ssh_key(scope, &spec.ssh_key_name).await?;
    let user_data = decode_bootstrap_data(scope.bootstrap_data().unwrap_or_default())?;

    let name = scope.name();
    let request = CreateServerRequest {
        region: scope.region(),
        plan_id: spec.plan_id,
        os_id: spec.os_id,
        label: name.clone(),
        hostname: name,
        tag: scope.ownership_tag(),
        ssh_key_id,
        user_data: Some(user_data),
        script_id: spec.script_id,
        reserved_ip_v4,
    };

    let id = scope.vultr().create_server(&request).await?;
    info!(
        instance = %id,
        region = request.region,
        plan = request.plan_id,
        control_plane = request.reserved_ip_v4.is_some(),
        "created instance"
    );
    Ok(Some(id))
}

/// Look up an SSH key id by exact name
async fn resolve_ssh_key(scope: &MachineScope, key_name: &str) -> Result<String> {
    let keys = scope.vultr().list_ssh_keys().await?;
    keys.into_iter()
        .find(|k| k.name == key_name)
        .map(|k| k.id)
        .ok_or_else(|| Error::validation(format!("ssh key {:?} not found", key_name)))
}

/// Bootstrap payloads may be binary (gzip-compressed cloud-init)
fn decode_bootstrap_data(encoded: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::validation(format!("bootstrap data is not valid base64: {}", e)))
}

/// Instance is running and fully provisioned
fn is_settled(server: &Server) -> bool {
    server.power_status == "running" && server.server_state == "ok"
}

/// Error policy for the VultrMachine controller
pub fn machine_error_policy(
    vultr_machine: Arc<VultrMachine>,
    error: &Error,
    _ctx: Arc<Context>,
) -> Action {
    requeue_after_error("VultrMachine", &vultr_machine.name_any(), error)
}
