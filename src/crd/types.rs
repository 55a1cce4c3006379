//! Supporting types for the Vultr infrastructure CRDs

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Stable API endpoint of a cluster, backed by a reserved IP
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct APIEndpoint {
    /// Vultr id of the reserved IP, used to release it
    pub id: String,

    /// Address the API server is reachable on
    #[serde(default)]
    pub host: String,

    /// API server port
    pub port: u16,
}

impl APIEndpoint {
    /// Create an endpoint
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
        }
    }
}

/// Billing state of a Vultr subscription
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    /// Being set up
    Pending,
    /// Running and billed
    Active,
    /// Suspended by Vultr
    Suspended,
    /// Closed
    Closed,
}

impl SubscriptionStatus {
    /// Map the API string, returning `None` for values we do not know
    pub fn from_api(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "suspended" => Some(Self::Suspended),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Power state of a Vultr instance
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PowerStatus {
    /// Powering on
    Starting,
    /// Powered off
    Stopped,
    /// Powered on
    Running,
}

impl PowerStatus {
    /// Map the API string, returning `None` for values we do not know
    pub fn from_api(s: &str) -> Option<Self> {
        match s {
            "starting" => Some(Self::Starting),
            "stopped" => Some(Self::Stopped),
            "running" => Some(Self::Running),
            _ => None,
        }
    }
}

/// Provisioning state of a Vultr instance
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    /// No state reported
    None,
    /// Locked by Vultr
    Locked,
    /// OS installation running
    Installing,
    /// Booting
    Booting,
    /// ISO being mounted
    IsoMounting,
    /// Fully provisioned
    Ok,
}

impl ServerState {
    /// Map the API string, returning `None` for values we do not know
    pub fn from_api(s: &str) -> Option<Self> {
        match s {
            "none" | "" => Some(Self::None),
            "locked" => Some(Self::Locked),
            // v1 reports the combined install+boot step as one value
            "installing" | "installingbooting" => Some(Self::Installing),
            "booting" => Some(Self::Booting),
            "isomounting" => Some(Self::IsoMounting),
            "ok" => Some(Self::Ok),
            _ => None,
        }
    }
}
