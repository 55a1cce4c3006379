//! VultrMachine Custom Resource Definition
//!
//! A VultrMachine is the infrastructure half of a Cluster API `Machine`: one
//! Vultr instance per resource.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{PowerStatus, ServerState, SubscriptionStatus};

/// Finalizer guarding destruction of the machine's instance
pub const MACHINE_FINALIZER: &str = "vultrmachine.infrastructure.cluster.x-k8s.io";

/// Specification for a VultrMachine
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1alpha2",
    kind = "VultrMachine",
    plural = "vultrmachines",
    status = "VultrMachineStatus",
    namespaced,
    printcolumn = r#"{"name":"ProviderID","type":"string","jsonPath":".spec.providerID"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.serverState"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VultrMachineSpec {
    /// Vultr plan (VPSPLANID)
    #[serde(default)]
    pub plan_id: i64,

    /// Operating system (OSID)
    #[serde(default)]
    pub os_id: i64,

    /// Name of the account SSH key to install
    #[serde(default)]
    pub ssh_key_name: String,

    /// Startup script to run on first boot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_id: Option<i64>,

    /// Cluster API provider id, set once the instance exists
    #[serde(
        default,
        rename = "providerID",
        skip_serializing_if = "Option::is_none"
    )]
    pub provider_id: Option<String>,
}

/// Status for a VultrMachine
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VultrMachineStatus {
    /// Instance has been provisioned
    #[serde(default)]
    pub ready: bool,

    /// Last observed subscription status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_status: Option<SubscriptionStatus>,

    /// Last observed power status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_status: Option<PowerStatus>,

    /// Last observed server state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_state: Option<ServerState>,
}

impl VultrMachine {
    /// Recorded provider id, ignoring empty strings
    pub fn provider_id(&self) -> Option<&str> {
        self.spec.provider_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Whether the instance has been marked ready
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.ready)
    }

    /// Mutable status, created on first use
    pub fn status_mut(&mut self) -> &mut VultrMachineStatus {
        self.status.get_or_insert_with(Default::default)
    }
}
