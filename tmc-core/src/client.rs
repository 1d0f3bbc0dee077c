//! The dynamic resource client boundary (§6). This crate only specifies
//! the interface; the concrete physical-cluster transport is an external
//! collaborator injected by the caller (a real Kubernetes client, or
//! `tmc-test`'s in-memory [`tmc_test`](https://docs.rs/tmc-test) adapter
//! in tests).

use crate::value::Object;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Group/version/resource triple identifying an API kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Gvr {
    /// API group, empty for the core group.
    pub group: String,
    /// API version.
    pub version: String,
    /// Plural resource name, e.g. `deployments`.
    pub resource: String,
}

impl Gvr {
    /// Constructs a new GVR from explicit parts.
    pub fn new(group: impl Into<String>, version: impl Into<String>, resource: impl Into<String>) -> Self {
        Gvr { group: group.into(), version: version.into(), resource: resource.into() }
    }
}

impl fmt::Display for Gvr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.resource)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.resource)
        }
    }
}

/// Propagation policy for [`DynamicResourceClient::delete`], mirroring the
/// `DeleteOptions.propagationPolicy` choices a real cluster API exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PropagationPolicy {
    /// Delete dependents in the background after the owner is gone (the default).
    #[default]
    Background,
    /// Delete the owner first, leave dependents orphaned.
    Orphan,
    /// Block until dependents are deleted too.
    Foreground,
}

/// Errors surfaced by a [`DynamicResourceClient`], classified per §6 into
/// exactly the three buckets a syncer needs to branch on.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The target object does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// An optimistic-concurrency resource-version mismatch.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Any other transport-level failure.
    #[error("transport error: {0}")]
    Other(String),
}

impl ClientError {
    /// Converts into the workspace-wide [`crate::error::Error`] taxonomy.
    pub fn into_core_error(self) -> crate::error::Error {
        use crate::error::{ConflictType, Error, ErrorKind};
        match self {
            ClientError::NotFound(msg) => Error::new(ErrorKind::NotFound, msg),
            ClientError::Conflict(msg) => Error::new(ErrorKind::Conflict(ConflictType::ResourceVersion), msg),
            ClientError::Other(msg) => Error::new(ErrorKind::Transient, msg),
        }
    }
}

/// A single change event from [`DynamicResourceClient::watch`].
///
/// `Restarted` signals that the stream was (re)established and callers
/// should treat its payload as the full current list, replacing any
/// state built from prior events the way a cluster watch's relist does.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// An object was added or modified.
    Applied(Object),
    /// An object was deleted.
    Deleted(Object),
    /// The stream (re)started; this is the full current list.
    Restarted(Vec<Object>),
}

/// The boundary interface a physical-cluster transport must implement.
/// §6: "offers `Get/List/Create/Update/UpdateStatus/Delete/Watch` on
/// GVR-addressed namespaced/cluster-scoped resources."
#[async_trait]
pub trait DynamicResourceClient: Send + Sync {
    /// Fetches a single object by namespace/name. `namespace` is empty for
    /// cluster-scoped resources.
    async fn get(&self, gvr: &Gvr, namespace: &str, name: &str) -> Result<Object, ClientError>;

    /// Lists all objects of a GVR in a namespace (empty for cluster-scoped
    /// or all-namespaces, depending on the implementation).
    async fn list(&self, gvr: &Gvr, namespace: &str) -> Result<Vec<Object>, ClientError>;

    /// Creates a new object.
    async fn create(&self, gvr: &Gvr, namespace: &str, obj: Object) -> Result<Object, ClientError>;

    /// Updates the spec/metadata of an existing object (not its status subresource).
    async fn update(&self, gvr: &Gvr, namespace: &str, obj: Object) -> Result<Object, ClientError>;

    /// Updates only the `status` subresource of an existing object.
    async fn update_status(&self, gvr: &Gvr, namespace: &str, obj: Object) -> Result<Object, ClientError>;

    /// Deletes an object. `NotFound` is idempotently ignorable by callers.
    async fn delete(
        &self,
        gvr: &Gvr,
        namespace: &str,
        name: &str,
        propagation: PropagationPolicy,
    ) -> Result<(), ClientError>;

    /// Streams change events for a GVR in a namespace. The first item is
    /// always a [`WatchEvent::Restarted`] carrying the current list, then
    /// `Applied`/`Deleted` events as they occur, matching how a real
    /// cluster watch begins with a relist.
    async fn watch(&self, gvr: &Gvr, namespace: &str) -> Result<BoxStream<'static, Result<WatchEvent, ClientError>>, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gvr_display() {
        assert_eq!(Gvr::new("apps", "v1", "deployments").to_string(), "apps/v1/deployments");
        assert_eq!(Gvr::new("", "v1", "services").to_string(), "v1/services");
    }

    #[test]
    fn client_error_maps_to_core_kind() {
        use crate::error::ErrorKind;
        assert!(matches!(ClientError::NotFound("x".into()).into_core_error().kind(), ErrorKind::NotFound));
        assert!(matches!(
            ClientError::Conflict("x".into()).into_core_error().kind(),
            ErrorKind::Conflict(_)
        ));
        assert!(matches!(ClientError::Other("x".into()).into_core_error().kind(), ErrorKind::Transient));
    }
}
