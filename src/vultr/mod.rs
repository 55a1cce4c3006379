//! Vultr compute API abstraction
//!
//! The reconcilers only ever talk to Vultr through the [`VultrClient`] trait so
//! tests can substitute doubles that simulate "not found", transient failure
//! and success deterministically. [`HttpVultrClient`] is the production
//! implementation against the v1 REST API.

mod client;

pub use client::{HttpVultrClient, DEFAULT_API_URL};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

/// Errors returned by the Vultr API
#[derive(Debug, Error)]
pub enum VultrError {
    /// The referenced server, reserved IP or key does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The API rejected the request
    #[error("API returned {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },

    /// Transport failure talking to the API
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a body we could not interpret
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl VultrError {
    /// Returns true if the error means the remote object is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, VultrError::NotFound(_))
    }
}

/// A Vultr compute instance ("subscription" in v1 terms)
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Server {
    /// Subscription id
    #[serde(rename = "SUBID", deserialize_with = "string_or_number")]
    pub id: String,

    /// Instance label; the reconciler sets it to the VultrMachine name
    #[serde(default)]
    pub label: String,

    /// Primary public IPv4 address
    #[serde(default)]
    pub main_ip: String,

    /// Subscription status (pending, active, suspended, closed)
    #[serde(default)]
    pub status: String,

    /// Power status (starting, stopped, running)
    #[serde(default)]
    pub power_status: String,

    /// Server state (none, locked, installing, booting, isomounting, ok)
    #[serde(default)]
    pub server_state: String,

    /// Instance tag
    #[serde(default)]
    pub tag: String,
}

/// A reserved (independently releasable) IP address
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ReservedIp {
    /// Reserved IP subscription id
    #[serde(rename = "SUBID", deserialize_with = "string_or_number")]
    pub id: String,

    /// Assigned address
    #[serde(default)]
    pub subnet: String,

    /// Address family ("v4" or "v6")
    #[serde(default)]
    pub ip_type: String,

    /// Label given at creation
    #[serde(default)]
    pub label: String,
}

/// An SSH key registered with the account
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct SshKey {
    /// Key id
    #[serde(rename = "SSHKEYID")]
    pub id: String,

    /// Key name
    #[serde(default)]
    pub name: String,
}

/// Address family of a reserved IP
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpType {
    /// IPv4
    V4,
}

impl IpType {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            IpType::V4 => "v4",
        }
    }
}

/// Parameters for creating a compute instance
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CreateServerRequest {
    /// Datacenter (DCID)
    pub region: i64,
    /// Plan (VPSPLANID)
    pub plan_id: i64,
    /// Operating system (OSID)
    pub os_id: i64,
    /// Instance label
    pub label: String,
    /// Instance hostname
    pub hostname: String,
    /// Instance tag
    pub tag: String,
    /// SSH key to install
    pub ssh_key_id: String,
    /// Raw user data bytes; the client handles wire encoding
    pub user_data: Option<Vec<u8>>,
    /// Startup script to run
    pub script_id: Option<i64>,
    /// Reserved IPv4 address to attach
    pub reserved_ip_v4: Option<String>,
}

/// Operations the reconcilers need from Vultr
///
/// All calls are awaited one at a time by a reconciliation pass.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VultrClient: Send + Sync {
    /// Get a server by subscription id
    async fn get_server(&self, id: &str) -> Result<Server, VultrError>;

    /// List servers carrying the given tag
    async fn list_servers_by_tag(&self, tag: &str) -> Result<Vec<Server>, VultrError>;

    /// Create a server, returning its subscription id
    async fn create_server(&self, request: &CreateServerRequest) -> Result<String, VultrError>;

    /// Destroy a server
    async fn destroy_server(&self, id: &str) -> Result<(), VultrError>;

    /// Reserve an IP address, returning its id
    ///
    /// The response carries only the id; use [`VultrClient::list_reserved_ips`]
    /// to learn the assigned address.
    async fn create_reserved_ip(
        &self,
        region: i64,
        ip_type: IpType,
        label: &str,
    ) -> Result<String, VultrError>;

    /// List all reserved IPs on the account
    async fn list_reserved_ips(&self) -> Result<Vec<ReservedIp>, VultrError>;

    /// Release a reserved IP
    async fn destroy_reserved_ip(&self, id: &str) -> Result<(), VultrError>;

    /// List SSH keys on the account
    async fn list_ssh_keys(&self) -> Result<Vec<SshKey>, VultrError>;
}

/// Tag applied to every instance created for a VultrCluster
pub fn ownership_tag(cluster_name: &str) -> String {
    format!("{}:owned", cluster_name)
}

/// The v1 API returns ids as strings for servers and as numbers for reserved IPs
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}
