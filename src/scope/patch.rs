//! Snapshot-and-diff persistence for reconciled resources
//!
//! A [`PatchHelper`] captures the serialized form of a resource when a scope is
//! opened. On close it compares that snapshot with the mutated resource and
//! produces a [`ResourcePatch`] holding JSON patches (RFC 6902) for the
//! sections that changed. Only `metadata.finalizers`, `spec` and `status` are
//! ever diffed; everything else on the object belongs to other writers.

use json_patch::Patch;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::Result;

/// JSON patches for one resource, rooted at the object
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourcePatch {
    /// Patch for the main resource (`metadata.finalizers`, `spec`)
    pub object: Option<Patch>,
    /// Patch for the status subresource
    pub status: Option<Patch>,
}

impl ResourcePatch {
    /// True if nothing changed
    pub fn is_empty(&self) -> bool {
        self.object.is_none() && self.status.is_none()
    }
}

/// Snapshot of a resource taken when a scope opens
#[derive(Clone, Debug)]
pub struct PatchHelper {
    object: Value,
    status: Value,
}

impl PatchHelper {
    /// Snapshot the given resource
    pub fn new<T: Serialize>(resource: &T) -> Result<Self> {
        let before = serde_json::to_value(resource)?;
        Ok(Self {
            object: object_view(&before),
            status: status_view(&before),
        })
    }

    /// Compute the patches that turn the snapshot into `resource`
    pub fn diff<T: Serialize>(&self, resource: &T) -> Result<ResourcePatch> {
        let after = serde_json::to_value(resource)?;
        Ok(ResourcePatch {
            object: non_empty(json_patch::diff(&self.object, &object_view(&after))),
            status: non_empty(json_patch::diff(&self.status, &status_view(&after))),
        })
    }
}

/// The parts of the object this controller owns, at their real paths
fn object_view(value: &Value) -> Value {
    let mut metadata = Map::new();
    if let Some(finalizers) = value.pointer("/metadata/finalizers") {
        metadata.insert("finalizers".to_string(), finalizers.clone());
    }
    let mut view = Map::new();
    view.insert("metadata".to_string(), Value::Object(metadata));
    if let Some(spec) = value.get("spec") {
        view.insert("spec".to_string(), spec.clone());
    }
    Value::Object(view)
}

fn status_view(value: &Value) -> Value {
    let mut view = Map::new();
    if let Some(status) = value.get("status").filter(|s| !s.is_null()) {
        view.insert("status".to_string(), status.clone());
    }
    Value::Object(view)
}

fn non_empty(patch: Patch) -> Option<Patch> {
    (!patch.is_empty()).then_some(patch)
}
