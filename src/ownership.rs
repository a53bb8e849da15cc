//! Ownership of child resources
//!
//! Every child an MCPServer produces carries a controller owner reference to
//! it (`controller: true`, `blockOwnerDeletion: true`). The cluster garbage
//! collector uses that relation to delete children when the MCPServer goes
//! away, and the reconciler uses it to decide which existing objects it may
//! overwrite or delete.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use crate::crd::McpServer;
use crate::Error;

/// Identity of the MCPServer that owns a set of children
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Owner {
    /// MCPServer name; also the name of every child
    pub name: String,
    /// MCPServer namespace; also the namespace of every child
    pub namespace: String,
    /// MCPServer UID
    pub uid: String,
}

impl Owner {
    /// Extract owner identity from a live MCPServer
    ///
    /// Fails for objects without a namespace or UID, which the API server never
    /// hands out for a namespaced resource.
    pub fn from_server(server: &McpServer) -> Result<Self, Error> {
        let namespace = server
            .namespace()
            .ok_or_else(|| Error::validation("MCPServer must be namespaced"))?;
        let uid = server
            .uid()
            .ok_or_else(|| Error::validation("MCPServer has no uid"))?;
        Ok(Self {
            name: server.name_any(),
            namespace,
            uid,
        })
    }

    /// Controller owner reference pointing at this MCPServer
    pub fn reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: McpServer::api_version(&()).to_string(),
            kind: McpServer::kind(&()).to_string(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// Returns true if `meta` names this MCPServer as its controller
    pub fn controls(&self, meta: &ObjectMeta) -> bool {
        controller_uid(meta) == Some(self.uid.as_str())
    }
}

/// UID of the controlling owner, if any
pub fn controller_uid(meta: &ObjectMeta) -> Option<&str> {
    meta.owner_references
        .iter()
        .flatten()
        .find(|r| r.controller == Some(true))
        .map(|r| r.uid.as_str())
}

/// UIDs of every owner listed on `meta`
pub fn owner_uids(meta: &ObjectMeta) -> impl Iterator<Item = &str> {
    meta.owner_references.iter().flatten().map(|r| r.uid.as_str())
}
