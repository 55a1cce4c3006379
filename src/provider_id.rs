//! Cluster API provider ids for Vultr instances
//!
//! A provider id has the form `vultr:////<instance-id>`: the cloud prefix,
//! an empty authority and path segments, then the subscription id.

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Cloud prefix of every provider id this provider writes
pub const PROVIDER_PREFIX: &str = "vultr";

const SEPARATOR: &str = ":////";

/// Parsed provider id
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderId {
    cloud: String,
    instance_id: String,
}

impl ProviderId {
    /// Provider id for a Vultr instance
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            cloud: PROVIDER_PREFIX.to_string(),
            instance_id: instance_id.into(),
        }
    }

    /// Instance (subscription) id
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.cloud, SEPARATOR, self.instance_id)
    }
}

impl FromStr for ProviderId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (cloud, rest) = s
            .split_once("://")
            .ok_or_else(|| Error::validation(format!("invalid providerID {:?}: missing ://", s)))?;

        if cloud.is_empty() {
            return Err(Error::validation(format!(
                "invalid providerID {:?}: empty cloud prefix",
                s
            )));
        }

        // The id is the last path segment; anything in between is ignored
        let instance_id = rest.rsplit('/').next().unwrap_or_default();
        if instance_id.is_empty() {
            return Err(Error::validation(format!(
                "invalid providerID {:?}: empty instance id",
                s
            )));
        }

        Ok(Self {
            cloud: cloud.to_string(),
            instance_id: instance_id.to_string(),
        })
    }
}
