//! In-memory cluster for controller tests
//!
//! Behaves like the API server where the reconciler can tell the difference:
//! assigns UIDs and resource versions, bumps Deployment generations on spec
//! changes, fills in a few server-side defaults, rejects stale updates with
//! 409 and cascades deletion through owner references.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};

use crate::compiler::{ChildKind, ChildResource};
use crate::crd::McpServerStatus;
use crate::error::api_error;
use crate::ownership::owner_uids;
use crate::resolver::ReferenceLookup;
use crate::Error;

use super::client::McpServerKubeClient;

type Key = (ChildKind, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, ChildResource>,
    secrets: BTreeMap<(String, String), BTreeSet<String>>,
    config_maps: BTreeSet<(String, String)>,
    statuses: BTreeMap<(String, String), McpServerStatus>,
    injected_failures: Vec<(ChildKind, u16)>,
    next_uid: u64,
    next_version: u64,
    writes: usize,
    status_writes: usize,
}

impl State {
    fn uid(&mut self) -> String {
        self.next_uid += 1;
        format!("uid-{}", self.next_uid)
    }

    fn version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn take_failure(&mut self, kind: ChildKind) -> Option<Error> {
        let index = self.injected_failures.iter().position(|(k, _)| *k == kind)?;
        let (_, code) = self.injected_failures.remove(index);
        Some(api_error(code, "Injected"))
    }
}

/// Thread-safe in-memory stand-in for the API server
#[derive(Default)]
pub(crate) struct FakeCluster {
    state: Mutex<State>,
}

fn key(kind: ChildKind, namespace: &str, name: &str) -> Key {
    (kind, namespace.to_string(), name.to_string())
}

fn key_of(child: &ChildResource) -> Key {
    let meta = child.meta();
    key(
        child.kind(),
        meta.namespace.as_deref().unwrap_or_default(),
        meta.name.as_deref().unwrap_or_default(),
    )
}

/// Fields the API server fills in on write
fn apply_server_defaults(child: &mut ChildResource) {
    match child {
        ChildResource::Deployment(d) => {
            if let Some(spec) = d.spec.as_mut() {
                spec.revision_history_limit.get_or_insert(10);
                spec.progress_deadline_seconds.get_or_insert(600);
            }
        }
        ChildResource::Service(s) => {
            if let Some(spec) = s.spec.as_mut() {
                spec.cluster_ip.get_or_insert_with(|| "10.96.0.10".to_string());
                spec.session_affinity.get_or_insert_with(|| "None".to_string());
            }
        }
        ChildResource::ServiceAccount(_) | ChildResource::ConfigMap(_) => {}
    }
}

impl FakeCluster {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub(crate) fn add_secret(&self, namespace: &str, name: &str, keys: &[&str]) {
        self.lock().secrets.insert(
            (namespace.to_string(), name.to_string()),
            keys.iter().map(|k| k.to_string()).collect(),
        );
    }

    pub(crate) fn remove_secret(&self, namespace: &str, name: &str) {
        self.lock()
            .secrets
            .remove(&(namespace.to_string(), name.to_string()));
    }

    pub(crate) fn add_config_map(&self, namespace: &str, name: &str) {
        self.lock()
            .config_maps
            .insert((namespace.to_string(), name.to_string()));
    }

    pub(crate) fn get(&self, kind: ChildKind, namespace: &str, name: &str) -> Option<ChildResource> {
        self.lock().objects.get(&key(kind, namespace, name)).cloned()
    }

    pub(crate) fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        match self.get(ChildKind::Deployment, namespace, name)? {
            ChildResource::Deployment(d) => Some(d),
            _ => None,
        }
    }

    pub(crate) fn resource_version(
        &self,
        kind: ChildKind,
        namespace: &str,
        name: &str,
    ) -> Option<String> {
        self.get(kind, namespace, name)?.meta().resource_version.clone()
    }

    pub(crate) fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    /// Child creates, updates and deletes so far
    pub(crate) fn writes(&self) -> usize {
        self.lock().writes
    }

    pub(crate) fn status_writes(&self) -> usize {
        self.lock().status_writes
    }

    pub(crate) fn status(&self, namespace: &str, name: &str) -> Option<McpServerStatus> {
        self.lock()
            .statuses
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Make the next write of `kind` fail with an API error
    pub(crate) fn fail_next_write(&self, kind: ChildKind, code: u16) {
        self.lock().injected_failures.push((kind, code));
    }

    /// Store an object with no owner, as if another tool created it
    pub(crate) fn insert_foreign(&self, mut child: ChildResource) {
        let mut state = self.lock();
        let uid = state.uid();
        let version = state.version();
        let meta = child.meta_mut();
        meta.uid = Some(uid);
        meta.resource_version = Some(version);
        state.objects.insert(key_of(&child), child);
    }

    /// Simulate the Deployment controller finishing a rollout
    pub(crate) fn set_deployment_available(&self, namespace: &str, name: &str) {
        let mut state = self.lock();
        if let Some(ChildResource::Deployment(d)) =
            state.objects.get_mut(&key(ChildKind::Deployment, namespace, name))
        {
            let replicas = d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
            d.status = Some(DeploymentStatus {
                observed_generation: d.metadata.generation,
                replicas: Some(replicas),
                ready_replicas: Some(replicas),
                available_replicas: Some(replicas),
                updated_replicas: Some(replicas),
                ..Default::default()
            });
        }
    }

    /// Simulate the garbage collector after the owner is deleted
    pub(crate) fn delete_owner(&self, uid: &str) {
        self.lock()
            .objects
            .retain(|_, child| !owner_uids(child.meta()).any(|u| u == uid));
    }
}

#[async_trait]
impl McpServerKubeClient for FakeCluster {
    async fn get_child(
        &self,
        kind: ChildKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ChildResource>, Error> {
        Ok(self.get(kind, namespace, name))
    }

    async fn create_child(&self, child: &ChildResource) -> Result<ChildResource, Error> {
        let mut state = self.lock();
        if let Some(err) = state.take_failure(child.kind()) {
            return Err(err);
        }
        let key = key_of(child);
        if state.objects.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists"));
        }

        let mut created = child.clone();
        let uid = state.uid();
        let version = state.version();
        let meta = created.meta_mut();
        meta.uid = Some(uid);
        meta.resource_version = Some(version);
        if created.kind() == ChildKind::Deployment {
            created.meta_mut().generation = Some(1);
        }
        apply_server_defaults(&mut created);

        state.writes += 1;
        state.objects.insert(key, created.clone());
        Ok(created)
    }

    async fn update_child(&self, child: &ChildResource) -> Result<ChildResource, Error> {
        let mut state = self.lock();
        if let Some(err) = state.take_failure(child.kind()) {
            return Err(err);
        }
        let key = key_of(child);
        let Some(existing) = state.objects.get(&key).cloned() else {
            return Err(api_error(404, "NotFound"));
        };
        if child.meta().resource_version != existing.meta().resource_version {
            return Err(api_error(409, "Conflict"));
        }

        let mut updated = child.clone();
        apply_server_defaults(&mut updated);
        let version = state.version();
        {
            let meta = updated.meta_mut();
            meta.uid = existing.meta().uid.clone();
            meta.resource_version = Some(version);
            meta.generation = existing.meta().generation;
        }
        if let (ChildResource::Deployment(new), ChildResource::Deployment(old)) =
            (&mut updated, &existing)
        {
            if new.spec != old.spec {
                new.metadata.generation = Some(old.metadata.generation.unwrap_or_default() + 1);
            }
            new.status = old.status.clone();
        }

        state.writes += 1;
        state.objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete_child(
        &self,
        kind: ChildKind,
        namespace: &str,
        name: &str,
        uid: &str,
    ) -> Result<(), Error> {
        let mut state = self.lock();
        let key = key(kind, namespace, name);
        let Some(existing) = state.objects.get(&key) else {
            return Ok(());
        };
        if existing.meta().uid.as_deref() != Some(uid) {
            return Err(api_error(409, "Conflict"));
        }
        state.objects.remove(&key);
        state.writes += 1;
        Ok(())
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &McpServerStatus,
    ) -> Result<(), Error> {
        let mut state = self.lock();
        state
            .statuses
            .insert((namespace.to_string(), name.to_string()), status.clone());
        state.status_writes += 1;
        Ok(())
    }
}

#[async_trait]
impl ReferenceLookup for FakeCluster {
    async fn secret_keys(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeSet<String>>, Error> {
        Ok(self
            .lock()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn config_map_exists(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        Ok(self
            .lock()
            .config_maps
            .contains(&(namespace.to_string(), name.to_string())))
    }
}
