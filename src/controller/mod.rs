//! Controllers for the Vultr infrastructure CRDs
//!
//! Both reconcilers share a [`Context`] holding the Kubernetes persistence
//! layer and the Vultr API as trait objects, so tests can swap in doubles.

mod cluster;
mod machine;

#[cfg(test)]
pub(crate) mod fakes;

pub use cluster::{cluster_error_policy, reconcile_cluster};
pub use machine::{machine_error_policy, reconcile_machine};

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{error, warn};

#[cfg(test)]
use mockall::automock;

use crate::crd::{Cluster, Machine, VultrCluster, VultrMachine};
use crate::scope::ResourcePatch;
use crate::vultr::VultrClient;
use crate::{Error, DEFAULT_API_SERVER_PORT};

/// Field manager recorded on every patch
pub const FIELD_MANAGER: &str = "capv-controller";

/// Requeue delay while waiting on another controller
pub const WAIT_REQUEUE: Duration = Duration::from_secs(30);

/// Requeue delay for resources in steady state, to catch drift
pub const READY_REQUEUE: Duration = Duration::from_secs(300);

/// Requeue delay after a transient failure
pub const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Requeue delay after a failure that needs a resource change
pub const FATAL_REQUEUE: Duration = Duration::from_secs(60);

/// Trait abstracting the Kubernetes operations the reconcilers need
///
/// Lookups return `Ok(None)` when the object does not exist.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a VultrCluster
    async fn get_vultr_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VultrCluster>, Error>;

    /// Get a VultrMachine
    async fn get_vultr_machine(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VultrMachine>, Error>;

    /// Get a Cluster API Cluster
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, Error>;

    /// Get a Cluster API Machine
    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>, Error>;

    /// Apply JSON patches to a VultrCluster
    async fn patch_vultr_cluster(
        &self,
        namespace: &str,
        name: &str,
        patch: &ResourcePatch,
    ) -> Result<(), Error>;

    /// Apply JSON patches to a VultrMachine
    async fn patch_vultr_machine(
        &self,
        namespace: &str,
        name: &str,
        patch: &ResourcePatch,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Status goes first: once the last finalizer is removed the object may vanish
async fn apply_patch<K>(api: Api<K>, name: &str, patch: &ResourcePatch) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let params = PatchParams::apply(FIELD_MANAGER);
    if let Some(ref status) = patch.status {
        api.patch_status(name, &params, &Patch::Json::<()>(status.clone()))
            .await?;
    }
    if let Some(ref object) = patch.object {
        api.patch(name, &params, &Patch::Json::<()>(object.clone()))
            .await?;
    }
    Ok(())
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_vultr_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VultrCluster>, Error> {
        Ok(self.api::<VultrCluster>(namespace).get_opt(name).await?)
    }

    async fn get_vultr_machine(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VultrMachine>, Error> {
        Ok(self.api::<VultrMachine>(namespace).get_opt(name).await?)
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, Error> {
        Ok(self.api::<Cluster>(namespace).get_opt(name).await?)
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>, Error> {
        Ok(self.api::<Machine>(namespace).get_opt(name).await?)
    }

    async fn patch_vultr_cluster(
        &self,
        namespace: &str,
        name: &str,
        patch: &ResourcePatch,
    ) -> Result<(), Error> {
        apply_patch(self.api::<VultrCluster>(namespace), name, patch).await
    }

    async fn patch_vultr_machine(
        &self,
        namespace: &str,
        name: &str,
        patch: &ResourcePatch,
    ) -> Result<(), Error> {
        apply_patch(self.api::<VultrMachine>(namespace), name, patch).await
    }
}

/// Controller context containing shared clients and settings
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```ignore
/// let ctx = Context::builder(client, vultr)
///     .api_server_port(6443)
///     .build();
/// ```
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Vultr API client (trait object for testability)
    pub vultr: Arc<dyn VultrClient>,
    /// Port recorded on every API endpoint
    pub api_server_port: u16,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client, vultr: Arc<dyn VultrClient>) -> ContextBuilder {
        ContextBuilder::new(client, vultr)
    }

    /// Create a context for testing with custom clients
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn KubeClient>, vultr: Arc<dyn VultrClient>) -> Self {
        Self {
            kube,
            vultr,
            api_server_port: DEFAULT_API_SERVER_PORT,
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    vultr: Arc<dyn VultrClient>,
    api_server_port: u16,
}

impl ContextBuilder {
    fn new(client: Client, vultr: Arc<dyn VultrClient>) -> Self {
        Self {
            client,
            vultr,
            api_server_port: DEFAULT_API_SERVER_PORT,
        }
    }

    /// Set the port recorded on API endpoints
    pub fn api_server_port(mut self, port: u16) -> Self {
        self.api_server_port = port;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            kube: Arc::new(KubeClientImpl::new(self.client)),
            vultr: self.vultr,
            api_server_port: self.api_server_port,
        }
    }
}

/// Requeue policy shared by both controllers
///
/// Transient failures retry quickly; failures that need an operator to fix
/// the resource retry slowly so the error stays visible in the logs.
fn requeue_after_error(kind: &str, name: &str, error: &Error) -> Action {
    if error.is_retryable() {
        error!(?error, kind, name, "reconciliation failed");
        Action::requeue(ERROR_REQUEUE)
    } else {
        warn!(error = %error, kind, name, "reconciliation blocked on resource configuration");
        Action::requeue(FATAL_REQUEUE)
    }
}
