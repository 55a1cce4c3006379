//! VultrCluster controller implementation
//!
//! A VultrCluster owns one reserved IPv4 address that fronts the cluster's
//! API server. The normal path reserves it and records it as an API endpoint;
//! the delete path releases every recorded address before letting the
//! resource go.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use super::{requeue_after_error, Context, READY_REQUEUE, WAIT_REQUEUE};
use crate::crd::{capi_owner_name, APIEndpoint, VultrCluster};
use crate::scope::{ClusterScope, ClusterScopeParams};
use crate::vultr::IpType;
use crate::{Error, Result};

/// Reconcile a VultrCluster resource
///
/// The object delivered by the runtime may be stale, so it is re-read before
/// anything else happens.
#[instrument(skip(vultr_cluster, ctx), fields(vultr_cluster = %vultr_cluster.name_any()))]
pub async fn reconcile_cluster(
    vultr_cluster: Arc<VultrCluster>,
    ctx: Arc<Context>,
) -> Result<Action> {
    let name = vultr_cluster.name_any();
    let namespace = vultr_cluster
        .namespace()
        .ok_or_else(|| Error::scope("VultrCluster has no namespace"))?;

    let Some(vultr_cluster) = ctx.kube.get_vultr_cluster(&namespace, &name).await? else {
        debug!("VultrCluster no longer exists");
        return Ok(Action::await_change());
    };

    let Some(owner) = capi_owner_name(&vultr_cluster.metadata, "Cluster") else {
        info!("waiting for Cluster controller to set owner reference");
        return Ok(Action::requeue(WAIT_REQUEUE));
    };
    let Some(cluster) = ctx.kube.get_cluster(&namespace, &owner).await? else {
        info!(cluster = %owner, "owner Cluster not found");
        return Ok(Action::requeue(WAIT_REQUEUE));
    };

    let mut scope = ClusterScope::new(ClusterScopeParams {
        kube: ctx.kube.clone(),
        vultr: ctx.vultr.clone(),
        cluster,
        vultr_cluster,
    })?;

    let outcome = if scope.is_deleting() {
        reconcile_delete(&mut scope).await
    } else {
        reconcile_normal(&mut scope, ctx.api_server_port).await
    };
    scope.finish(outcome).await
}

/// Release every reserved IP, then drop the finalizer
///
/// Each released endpoint is pruned from the status right away, so a pass
/// that fails halfway persists its progress and the next pass does not
/// release the same address twice.
async fn reconcile_delete(scope: &mut ClusterScope) -> Result<Action> {
    info!("deleting cluster");
    scope.set_ready(false);

    let ids: Vec<String> = scope.api_endpoints().iter().map(|e| e.id.clone()).collect();
    for id in ids {
        match scope.vultr().destroy_reserved_ip(&id).await {
            Ok(()) => info!(reserved_ip = %id, "released reserved IP"),
            Err(e) if e.is_not_found() => {
                info!(reserved_ip = %id, "reserved IP already released")
            }
            Err(e) => {
                warn!(reserved_ip = %id, error = %e, "failed to release reserved IP");
                return Err(e.into());
            }
        }
        scope.remove_api_endpoint(&id);
    }

    if scope.remove_finalizer() {
        info!("all reserved IPs released, removed finalizer");
    }
    Ok(Action::await_change())
}

async fn reconcile_normal(scope: &mut ClusterScope, api_server_port: u16) -> Result<Action> {
    if scope.add_finalizer() {
        debug!("added finalizer");
    }

    if scope.api_endpoints().is_empty() {
        let label = scope.name();
        let id = scope
            .vultr()
            .create_reserved_ip(scope.region(), IpType::V4, &label)
            .await?;
        info!(reserved_ip = %id, region = scope.region(), "reserved API server IP");
        // Recorded before the host is known so the id survives a failed lookup
        scope.add_api_endpoint(APIEndpoint::new(id, "", api_server_port));
    }

    resolve_endpoint_hosts(scope).await?;

    let was_ready = scope.vultr_cluster().is_ready();
    scope.set_ready(true);
    if !was_ready {
        info!(cluster = %scope.cluster_name(), "cluster infrastructure ready");
    }
    Ok(Action::requeue(READY_REQUEUE))
}

/// Fill in the address of endpoints whose host is still unknown
async fn resolve_endpoint_hosts(scope: &mut ClusterScope) -> Result<()> {
    let pending: Vec<String> = scope
        .api_endpoints()
        .iter()
        .filter(|e| e.host.is_empty())
        .map(|e| e.id.clone())
        .collect();
    if pending.is_empty() {
        return Ok(());
    }

    let reserved = scope.vultr().list_reserved_ips().await?;
    for id in pending {
        match reserved.iter().find(|ip| ip.id == id) {
            Some(ip) => {
                debug!(reserved_ip = %id, host = %ip.subnet, "resolved endpoint host");
                scope.set_api_endpoint_host(&id, &ip.subnet);
            }
            None => warn!(reserved_ip = %id, "reserved IP not listed; endpoint host left empty"),
        }
    }
    Ok(())
}

/// Error policy for the VultrCluster controller
pub fn cluster_error_policy(
    vultr_cluster: Arc<VultrCluster>,
    error: &Error,
    _ctx: Arc<Context>,
) -> Action {
    requeue_after_error("VultrCluster", &vultr_cluster.name_any(), error)
}
