//! Kubernetes API access for the MCPServer controller
//!
//! The reconciler talks to the cluster only through [`McpServerKubeClient`]
//! and [`ReferenceLookup`], so tests can swap in mocks or an in-memory
//! cluster. [`KubeClientImpl`] implements both on top of a `kube::Client`.

use std::collections::BTreeSet;
use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use kube::api::{Api, DeleteParams, Patch, PatchParams, Preconditions};
use kube::core::NamespaceResourceScope;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::compiler::{ChildKind, ChildResource};
use crate::crd::{McpServer, McpServerStatus};
use crate::resolver::ReferenceLookup;
use crate::{Error, FIELD_MANAGER};

/// Trait abstracting Kubernetes client operations for MCPServer children
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait McpServerKubeClient: Send + Sync {
    /// Get a child resource, or `None` if it does not exist
    async fn get_child(
        &self,
        kind: ChildKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ChildResource>, Error>;

    /// Create a child resource the caller observed as absent
    ///
    /// Uses server-side apply like [`update_child`](Self::update_child), so
    /// every rendered field is owned by one apply manager from the start and
    /// a later apply that omits a field removes it.
    async fn create_child(&self, child: &ChildResource) -> Result<ChildResource, Error>;

    /// Update a child resource with server-side apply
    ///
    /// `metadata.resourceVersion` on `child` must be the version the caller
    /// observed; a concurrent write makes the API server reject the update
    /// with 409.
    async fn update_child(&self, child: &ChildResource) -> Result<ChildResource, Error>;

    /// Delete a child resource if its UID still matches
    ///
    /// A child that is already gone counts as deleted.
    async fn delete_child(
        &self,
        kind: ChildKind,
        namespace: &str,
        name: &str,
        uid: &str,
    ) -> Result<(), Error>;

    /// Patch the status subresource of an MCPServer
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &McpServerStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
#[derive(Clone)]
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get_opt<K>(&self, namespace: &str, name: &str) -> Result<Option<K>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + DeserializeOwned,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn apply<K>(&self, obj: &K) -> Result<K, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + DeserializeOwned
            + Serialize,
    {
        let meta = obj.meta();
        let namespace = meta
            .namespace
            .as_deref()
            .ok_or_else(|| Error::validation("child resource has no namespace"))?;
        let name = meta
            .name
            .as_deref()
            .ok_or_else(|| Error::validation("child resource has no name"))?;
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let params = PatchParams::apply(FIELD_MANAGER).force();
        Ok(api.patch(name, &params, &Patch::Apply(obj)).await?)
    }

    async fn delete<K>(&self, namespace: &str, name: &str, uid: &str) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + DeserializeOwned,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let params = DeleteParams {
            preconditions: Some(Preconditions {
                uid: Some(uid.to_string()),
                resource_version: None,
            }),
            ..Default::default()
        };
        match api.delete(name, &params).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(namespace, name, "child already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl McpServerKubeClient for KubeClientImpl {
    async fn get_child(
        &self,
        kind: ChildKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ChildResource>, Error> {
        let child = match kind {
            ChildKind::ServiceAccount => self
                .get_opt::<ServiceAccount>(namespace, name)
                .await?
                .map(ChildResource::ServiceAccount),
            ChildKind::ConfigMap => self
                .get_opt::<ConfigMap>(namespace, name)
                .await?
                .map(ChildResource::ConfigMap),
            ChildKind::Deployment => self
                .get_opt::<Deployment>(namespace, name)
                .await?
                .map(ChildResource::Deployment),
            ChildKind::Service => self
                .get_opt::<Service>(namespace, name)
                .await?
                .map(ChildResource::Service),
        };
        Ok(child)
    }

    async fn create_child(&self, child: &ChildResource) -> Result<ChildResource, Error> {
        let created = match child {
            ChildResource::ServiceAccount(o) => ChildResource::ServiceAccount(self.apply(o).await?),
            ChildResource::ConfigMap(o) => ChildResource::ConfigMap(self.apply(o).await?),
            ChildResource::Deployment(o) => ChildResource::Deployment(self.apply(o).await?),
            ChildResource::Service(o) => ChildResource::Service(self.apply(o).await?),
        };
        Ok(created)
    }

    async fn update_child(&self, child: &ChildResource) -> Result<ChildResource, Error> {
        let updated = match child {
            ChildResource::ServiceAccount(o) => ChildResource::ServiceAccount(self.apply(o).await?),
            ChildResource::ConfigMap(o) => ChildResource::ConfigMap(self.apply(o).await?),
            ChildResource::Deployment(o) => ChildResource::Deployment(self.apply(o).await?),
            ChildResource::Service(o) => ChildResource::Service(self.apply(o).await?),
        };
        Ok(updated)
    }

    async fn delete_child(
        &self,
        kind: ChildKind,
        namespace: &str,
        name: &str,
        uid: &str,
    ) -> Result<(), Error> {
        match kind {
            ChildKind::ServiceAccount => self.delete::<ServiceAccount>(namespace, name, uid).await,
            ChildKind::ConfigMap => self.delete::<ConfigMap>(namespace, name, uid).await,
            ChildKind::Deployment => self.delete::<Deployment>(namespace, name, uid).await,
            ChildKind::Service => self.delete::<Service>(namespace, name, uid).await,
        }
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &McpServerStatus,
    ) -> Result<(), Error> {
        let api: Api<McpServer> = Api::namespaced(self.client.clone(), namespace);

        let status_patch = serde_json::json!({
            "status": status
        });

        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ReferenceLookup for KubeClientImpl {
    async fn secret_keys(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeSet<String>>, Error> {
        let secret = self.get_opt::<Secret>(namespace, name).await?;
        Ok(secret.map(|s| {
            let mut keys: BTreeSet<String> = s.data.unwrap_or_default().into_keys().collect();
            keys.extend(s.string_data.unwrap_or_default().into_keys());
            keys
        }))
    }

    async fn config_map_exists(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        Ok(self
            .get_opt::<ConfigMap>(namespace, name)
            .await?
            .is_some())
    }
}
