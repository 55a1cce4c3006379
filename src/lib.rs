//! capv - Cluster API infrastructure provider for Vultr
//!
//! Reconciles `VultrCluster` and `VultrMachine` resources against the Vultr
//! v1 API. A VultrCluster owns the reserved IP fronting the cluster's API
//! server; each VultrMachine owns one Vultr instance.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (VultrCluster, VultrMachine) and
//!   read-only views of the Cluster API types
//! - [`controller`] - Reconciliation logic for both resources
//! - [`scope`] - Per-pass transaction objects that persist changes on close
//! - [`vultr`] - Vultr API abstraction and HTTP client
//! - [`provider_id`] - Cluster API provider id encoding
//! - [`error`] - Error types for the provider

#![deny(missing_docs)]

pub mod controller;
pub mod crd;
pub mod error;
pub mod provider_id;
pub mod scope;
pub mod vultr;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default port recorded on cluster API endpoints
pub const DEFAULT_API_SERVER_PORT: u16 = 6443;
